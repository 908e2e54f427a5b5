// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

use {
    super::{model::*, *},
    std::{
        io::{BufRead, Write},
        sync::mpsc,
        thread,
    },
};

/// The operation requested by the user at console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Set { name: String, value: String },
    Defaults { channel: AmpChannel, amp_index: u8 },
    Resync,
    Show,
    Status,
    Quit,
}

const USAGE: &str = "set <name> <value> | defaults <a|b> <amp-index> | resync | show | status | quit";

fn inval(line: &str) -> Error {
    let msg = format!("Unknown command '{}', available: {}", line.trim(), USAGE);
    Error::new(FileError::Inval, &msg)
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, Error> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match &tokens[..] {
            ["set", name, value] => Ok(Self::Set {
                name: name.to_string(),
                value: value.to_string(),
            }),
            ["defaults", channel, index] => {
                let channel = match *channel {
                    "a" | "A" => AmpChannel::A,
                    "b" | "B" => AmpChannel::B,
                    _ => return Err(inval(line)),
                };
                let amp_index = index.parse().map_err(|_| inval(line))?;
                Ok(Self::Defaults { channel, amp_index })
            }
            ["resync"] => Ok(Self::Resync),
            ["show"] => Ok(Self::Show),
            ["status"] => Ok(Self::Status),
            ["quit"] | ["exit"] => Ok(Self::Quit),
            _ => Err(inval(line)),
        }
    }
}

const READER_NAME: &str = "console reader";
const PANEL_NAME: &str = "console panel";

/// Read commands from standard input in a new thread. The end of input is delivered as quit.
pub fn spawn_reader<F>(mut cb: F) -> Result<thread::JoinHandle<()>, Error>
where
    F: FnMut(Command) + Send + 'static,
{
    thread::Builder::new()
        .name(READER_NAME.to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Fail to read console: {}", e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match Command::parse(&line) {
                    Ok(cmd) => cb(cmd),
                    Err(e) => eprintln!("{}", e),
                }
            }
            cb(Command::Quit);
        })
        .map_err(|e| {
            let msg = format!("Fail to launch {}: {}", READER_NAME, e);
            Error::new(FileError::Again, &msg)
        })
}

/// The lines to print for the command.
pub fn render(cmd: &PanelCommand) -> Vec<String> {
    match cmd {
        PanelCommand::Refresh { name, value } => vec![format!("{} = {}", name, value)],
        PanelCommand::Busy(true) => vec!["busy...".to_string()],
        PanelCommand::Busy(false) => vec!["ready".to_string()],
        PanelCommand::Status(status) => vec![format!("status: {}", status)],
        PanelCommand::Show(entries) if entries.is_empty() => {
            vec!["no parameter is known yet".to_string()]
        }
        PanelCommand::Show(entries) => entries
            .iter()
            .map(|(name, value)| format!("{:<20} {}", name, value))
            .collect(),
    }
}

/// Print the commands to standard output in a new thread, till every sender is dropped.
pub fn spawn_panel(rx: mpsc::Receiver<PanelCommand>) -> Result<thread::JoinHandle<()>, Error> {
    thread::Builder::new()
        .name(PANEL_NAME.to_string())
        .spawn(move || {
            let stdout = std::io::stdout();
            rx.iter().for_each(|cmd| {
                let mut out = stdout.lock();
                render(&cmd).iter().for_each(|line| {
                    let _ = writeln!(out, "{}", line);
                });
                let _ = out.flush();
            });
        })
        .map_err(|e| {
            let msg = format!("Fail to launch {}: {}", PANEL_NAME, e);
            Error::new(FileError::Again, &msg)
        })
}
