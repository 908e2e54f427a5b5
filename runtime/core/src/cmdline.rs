// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2022 Takashi Sakamoto

use {
    super::{LogLevel, RuntimeOperation},
    clap::Parser,
    glib::{Error, FileError},
};

pub trait ServiceCmd<A, T, R>: Sized
where
    A: Parser,
    R: RuntimeOperation<T>,
{
    fn params(args: &A) -> (T, Option<LogLevel>);

    /// Handle the request which completes without runtime, such as listing of resources.
    fn query(_args: &A) -> Option<Result<(), Error>> {
        None
    }

    fn run() {
        let code = A::try_parse()
            .map_err(|err| err.to_string())
            .and_then(|args| match Self::query(&args) {
                Some(res) => res
                    .map(|_| libc::EXIT_SUCCESS)
                    .map_err(|err| specific_err_to_string(&err)),
                None => {
                    let (params, log_level) = Self::params(&args);
                    R::new(params, log_level)
                        .and_then(|mut runtime| {
                            runtime.listen()?;
                            runtime.run()?;
                            Ok(libc::EXIT_SUCCESS)
                        })
                        .map_err(|err| specific_err_to_string(&err))
                }
            })
            .unwrap_or_else(|msg| {
                eprintln!("{}", msg);
                libc::EXIT_FAILURE
            });

        std::process::exit(code)
    }
}

fn specific_err_to_string(e: &Error) -> String {
    let (domain, cause) = if let Some(error) = e.kind::<FileError>() {
        (
            "MIDI link operation error",
            match error {
                FileError::Noent => "Port not exists",
                FileError::Nodev => "Link is not open",
                FileError::Io => "Input/output failure",
                FileError::Inval => "Invalid argument",
                FileError::Again => "Resource temporarily unavailable",
                _ => "",
            },
        )
    } else {
        ("Unknown domain error", "")
    };
    format!("{}: {}, {}", domain, cause, e)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_message() {
        let err = Error::new(FileError::Noent, "DT50 MIDI 1 is not found");
        assert_eq!(
            specific_err_to_string(&err),
            "MIDI link operation error: Port not exists, DT50 MIDI 1 is not found"
        );
    }
}
