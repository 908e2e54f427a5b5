// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto
mod console;
mod handshake;
mod incoming;
mod model;
mod resync;
mod suppression;
mod transport;

use {
    clap::Parser,
    console::*,
    glib::{ControlFlow, Error, FileError},
    line6_dt_protocols as protocols,
    midir::MidiInputConnection,
    model::*,
    nix::sys::signal,
    protocols::{identity::*, registry::*, state::*, *},
    runtime_core::{cmdline::*, dispatcher::*, LogLevel, *},
    std::{
        sync::mpsc,
        time::{Duration, Instant},
    },
    tracing::{debug, debug_span, info, warn, Level},
    transport::*,
};

enum Event {
    Shutdown,
    Datagram(Vec<u8>, u64),
    Command(Command),
    Timer,
}

struct DtRuntime {
    params: LinkParams,
    model: DtModel,
    inlet: Option<MidiInputConnection<()>>,
    rx: mpsc::Receiver<Event>,
    tx: mpsc::SyncSender<Event>,
    dispatchers: Vec<Dispatcher>,
}

impl Drop for DtRuntime {
    fn drop(&mut self) {
        // At first, stop event loop in all of dispatchers to avoid queueing new events.
        for dispatcher in &mut self.dispatchers {
            dispatcher.stop();
        }

        // Next, consume all events in queue to release blocked thread for sender.
        for _ in self.rx.try_iter() {}

        // Finally Finish I/O threads.
        self.dispatchers.clear();
        self.inlet = None;
        self.model.join_workers();
    }
}

impl RuntimeOperation<LinkParams> for DtRuntime {
    fn new(params: LinkParams, log_level: Option<LogLevel>) -> Result<Self, Error> {
        if let Some(level) = log_level {
            tracing_subscriber::fmt()
                .with_max_level(Level::from(level))
                .init();
        }

        // Inbound datagrams arrive in a burst for dump request.
        let (tx, rx) = mpsc::sync_channel(Self::EVENT_QUEUE_SIZE);

        let (panel_tx, panel_rx) = mpsc::channel();
        spawn_panel(panel_rx)?;

        let model = DtModel::new(&params, Outlet::default(), panel_tx);

        Ok(DtRuntime {
            params,
            model,
            inlet: Default::default(),
            rx,
            tx,
            dispatchers: Default::default(),
        })
    }

    fn listen(&mut self) -> Result<(), Error> {
        self.launch_system_event_dispatcher()?;

        let tx = self.tx.clone();
        spawn_reader(move |cmd| {
            let _ = tx.send(Event::Command(cmd));
        })?;

        self.open_link()
    }

    fn run(&mut self) -> Result<(), Error> {
        let enter = debug_span!("event").entered();
        loop {
            let ev = match self.rx.recv() {
                Ok(ev) => ev,
                Err(_) => continue,
            };

            match ev {
                Event::Shutdown | Event::Command(Command::Quit) => break,
                Event::Datagram(raw, stamp) => {
                    let _enter = debug_span!("datagram").entered();
                    debug!(stamp, "inbound");
                    self.model.handle_datagram(&raw, Instant::now());
                }
                Event::Command(cmd) => {
                    let _enter = debug_span!("command").entered();
                    debug!(?cmd);
                    if let Err(e) = self.dispatch_command(cmd) {
                        eprintln!("{}", e);
                    }
                }
                Event::Timer => {
                    let _enter = debug_span!("timer").entered();
                    self.supervise();
                }
            }
        }
        enter.exit();

        self.close_link();

        Ok(())
    }
}

impl DtRuntime {
    const SYSTEM_DISPATCHER_NAME: &'static str = "system event dispatcher";

    const TIMER_INTERVAL: Duration = Duration::from_secs(1);
    const EVENT_QUEUE_SIZE: usize = 1024;

    fn launch_system_event_dispatcher(&mut self) -> Result<(), Error> {
        let name = Self::SYSTEM_DISPATCHER_NAME.to_string();
        let mut dispatcher = Dispatcher::run(name)?;

        let tx = self.tx.clone();
        dispatcher.attach_signal_handler(signal::Signal::SIGINT, move || {
            let _ = tx.send(Event::Shutdown);
            ControlFlow::Break
        });

        let tx = self.tx.clone();
        dispatcher.attach_interval_handler(Self::TIMER_INTERVAL, move || {
            let _ = tx.send(Event::Timer);
            ControlFlow::Continue
        });

        self.dispatchers.push(dispatcher);

        Ok(())
    }

    fn open_link(&mut self) -> Result<(), Error> {
        let enter = debug_span!("open").entered();

        let tx = self.tx.clone();
        let (inlet, output) =
            MidiLink::open(&self.params.input, &self.params.output, move |stamp, raw| {
                let _ = tx.send(Event::Datagram(raw.to_vec(), stamp));
            })?;
        self.model.outlet().attach(Box::new(output))?;
        self.inlet = Some(inlet);
        info!(
            input = %self.params.input,
            output = %self.params.output,
            channel = self.params.channel.number(),
            "MIDI link is open"
        );
        enter.exit();

        self.model.connected()?;
        self.model.resync().map(|_| ())
    }

    fn close_link(&mut self) {
        self.inlet = None;
        self.model.disconnected();
    }

    /// Follow the presence of MIDI ports.
    fn supervise(&mut self) {
        let present = MidiLink::ports_present(&self.params.input, &self.params.output);
        match (self.inlet.is_some(), present) {
            (true, false) => {
                warn!("MIDI port disappears, wait for reconnection");
                self.close_link();
            }
            (false, true) => {
                info!("MIDI port appears");
                if let Err(e) = self.open_link() {
                    warn!("Fail to reopen MIDI link: {}", e);
                    self.close_link();
                }
            }
            _ => (),
        }

        self.model.check_timers(Instant::now());
    }

    fn dispatch_command(&mut self, cmd: Command) -> Result<(), Error> {
        match cmd {
            Command::Set { name, value } => self.model.write_by_name(&name, &value).map(|sent| {
                if !sent {
                    info!(name = %name, "write is dropped during the other transmission");
                }
            }),
            Command::Defaults { channel, amp_index } => {
                self.model.load_amp_defaults(channel, amp_index)
            }
            Command::Resync => self.model.resync().map(|done| {
                if !done {
                    info!("bulk resync is already running");
                }
            }),
            Command::Show => {
                self.model.show();
                Ok(())
            }
            Command::Status => {
                self.model.status();
                Ok(())
            }
            Command::Quit => Ok(()),
        }
    }
}

struct DtServiceCmd;

#[derive(Parser, Default)]
#[clap(name = "line6-dt-ctl-service")]
struct Arguments {
    /// The name of MIDI input port to which the amplifier transmits.
    #[clap(long, required_unless_present = "list")]
    input: Option<String>,
    /// The name of MIDI output port from which the amplifier receives.
    #[clap(long, required_unless_present = "list")]
    output: Option<String>,
    /// The MIDI channel configured in the amplifier.
    #[clap(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=16))]
    channel: u8,
    /// The delay in millisecond after each dump request.
    #[clap(long, default_value_t = 50)]
    pacing_ms: u64,
    /// The timeout in millisecond to release suppression without echo of sentinel, 0 to disable.
    #[clap(long, default_value_t = 1000)]
    suppression_timeout_ms: u64,
    /// List the names of available MIDI ports, then exit.
    #[clap(long)]
    list: bool,

    /// The level to debug runtime, disabled as a default.
    #[clap(long, short, value_enum)]
    log_level: Option<LogLevel>,
}

impl ServiceCmd<Arguments, LinkParams, DtRuntime> for DtServiceCmd {
    fn params(args: &Arguments) -> (LinkParams, Option<LogLevel>) {
        let timeout = match args.suppression_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        let params = LinkParams {
            input: args.input.clone().unwrap_or_default(),
            output: args.output.clone().unwrap_or_default(),
            // The range is already checked by parser.
            channel: MidiChannel::new(args.channel).unwrap_or_default(),
            pacing: Duration::from_millis(args.pacing_ms),
            suppression_timeout: timeout,
        };
        (params, args.log_level)
    }

    fn query(args: &Arguments) -> Option<Result<(), Error>> {
        if !args.list {
            return None;
        }

        let res = MidiLink::port_names().map(|(inputs, outputs)| {
            println!("input ports:");
            inputs.iter().for_each(|name| println!("  {}", name));
            println!("output ports:");
            outputs.iter().for_each(|name| println!("  {}", name));
        });
        Some(res)
    }
}

fn main() {
    DtServiceCmd::run()
}
