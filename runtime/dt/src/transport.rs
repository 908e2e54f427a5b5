// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

use {
    super::*,
    midir::{Ignore, MidiIO, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection},
    std::sync::{Arc, Mutex, TryLockError},
};

/// The destination of outbound datagrams.
pub trait DatagramSink: Send {
    fn send(&mut self, datagram: &[u8]) -> Result<(), Error>;
}

impl DatagramSink for MidiOutputConnection {
    fn send(&mut self, datagram: &[u8]) -> Result<(), Error> {
        MidiOutputConnection::send(self, datagram).map_err(|e| {
            let msg = format!("Fail to send datagram {:02x?}: {}", datagram, e);
            Error::new(FileError::Io, &msg)
        })
    }
}

/// The entry to outbound path, shared by the control loop and workers for resync. Senders are
/// serialized.
#[derive(Clone, Default)]
pub struct Outlet(Arc<Mutex<Option<Box<dyn DatagramSink>>>>);

impl std::fmt::Debug for Outlet {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Outlet(attached: {})", self.is_attached())
    }
}

fn poisoned_error() -> Error {
    Error::new(FileError::Io, "Outbound path is poisoned")
}

fn detached_error() -> Error {
    Error::new(FileError::Nodev, "MIDI link is not open")
}

impl Outlet {
    pub fn attach(&self, sink: Box<dyn DatagramSink>) -> Result<(), Error> {
        let mut entry = self.0.lock().map_err(|_| poisoned_error())?;
        *entry = Some(sink);
        Ok(())
    }

    pub fn detach(&self) {
        if let Ok(mut entry) = self.0.lock() {
            *entry = None;
        }
    }

    pub fn is_attached(&self) -> bool {
        self.0
            .lock()
            .map(|entry| entry.is_some())
            .unwrap_or_default()
    }

    /// Send the datagram, waiting for the other sender.
    pub fn send(&self, datagram: &[u8]) -> Result<(), Error> {
        let mut entry = self.0.lock().map_err(|_| poisoned_error())?;
        let sink = entry.as_mut().ok_or_else(detached_error)?;
        debug!(datagram = ?datagram, "outbound");
        sink.send(datagram)
    }

    /// Send the datagrams in a row unless the other sender holds the path. No datagram from the
    /// other senders is interleaved. Return false when the path is held.
    ///
    /// The path is held only while one datagram is sent. The batch can land between two dump
    /// requests of bulk resync running in a worker.
    pub fn try_send_batch(&self, datagrams: &[&[u8]]) -> Result<bool, Error> {
        let mut entry = match self.0.try_lock() {
            Ok(entry) => entry,
            Err(TryLockError::WouldBlock) => return Ok(false),
            Err(TryLockError::Poisoned(_)) => return Err(poisoned_error()),
        };
        let sink = entry.as_mut().ok_or_else(detached_error)?;
        datagrams.iter().try_for_each(|datagram| {
            debug!(datagram = ?datagram, "outbound");
            sink.send(datagram)
        })?;
        Ok(true)
    }
}

const CLIENT_NAME: &str = "line6-dt-ctl-service";

fn find_port<IO: MidiIO>(io: &IO, name: &str) -> Result<IO::Port, Error> {
    io.ports()
        .into_iter()
        .find(|port| {
            io.port_name(port)
                .map(|port_name| port_name == name)
                .unwrap_or_default()
        })
        .ok_or_else(|| {
            let msg = format!("MIDI port is not found: {}", name);
            Error::new(FileError::Noent, &msg)
        })
}

fn port_names_of<IO: MidiIO>(io: &IO) -> Vec<String> {
    io.ports()
        .iter()
        .filter_map(|port| io.port_name(port).ok())
        .collect()
}

fn init_error<E: std::fmt::Display>(e: E) -> Error {
    let msg = format!("Fail to initialize MIDI client: {}", e);
    Error::new(FileError::Io, &msg)
}

/// The pair of connections to MIDI input and output port of the amplifier.
pub struct MidiLink;

impl MidiLink {
    /// Connect to the ports by name. The callback is invoked with the timestamp in micro second
    /// and the datagram, in the thread of MIDI backend.
    pub fn open<F>(
        in_name: &str,
        out_name: &str,
        mut on_receive: F,
    ) -> Result<(MidiInputConnection<()>, MidiOutputConnection), Error>
    where
        F: FnMut(u64, &[u8]) + Send + 'static,
    {
        let mut input = MidiInput::new(CLIENT_NAME).map_err(init_error)?;
        // The response to identity request is system exclusive.
        input.ignore(Ignore::None);
        let output = MidiOutput::new(CLIENT_NAME).map_err(init_error)?;

        let in_port = find_port(&input, in_name)?;
        let out_port = find_port(&output, out_name)?;

        let input_conn = input
            .connect(
                &in_port,
                in_name,
                move |stamp, datagram, _| on_receive(stamp, datagram),
                (),
            )
            .map_err(|e| {
                let msg = format!("Fail to connect to {}: {}", in_name, e);
                Error::new(FileError::Io, &msg)
            })?;

        let output_conn = output.connect(&out_port, out_name).map_err(|e| {
            let msg = format!("Fail to connect to {}: {}", out_name, e);
            Error::new(FileError::Io, &msg)
        })?;

        Ok((input_conn, output_conn))
    }

    /// The names of available input and output ports.
    pub fn port_names() -> Result<(Vec<String>, Vec<String>), Error> {
        let input = MidiInput::new(CLIENT_NAME).map_err(init_error)?;
        let output = MidiOutput::new(CLIENT_NAME).map_err(init_error)?;
        Ok((port_names_of(&input), port_names_of(&output)))
    }

    /// Whether both ports are available.
    pub fn ports_present(in_name: &str, out_name: &str) -> bool {
        Self::port_names()
            .map(|(inputs, outputs)| {
                inputs.iter().any(|name| name == in_name)
                    && outputs.iter().any(|name| name == out_name)
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
pub(crate) mod test {
    use {super::*, std::time::Instant};

    /// The sink to record datagrams with the time to send.
    #[derive(Clone, Default)]
    pub(crate) struct Recorder(pub Arc<Mutex<Vec<(Instant, Vec<u8>)>>>);

    impl DatagramSink for Recorder {
        fn send(&mut self, datagram: &[u8]) -> Result<(), Error> {
            self.0
                .lock()
                .unwrap()
                .push((Instant::now(), datagram.to_vec()));
            Ok(())
        }
    }

    impl Recorder {
        pub(crate) fn datagrams(&self) -> Vec<Vec<u8>> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .map(|(_, datagram)| datagram.clone())
                .collect()
        }
    }

    #[test]
    fn outlet_detached() {
        let outlet = Outlet::default();
        assert!(!outlet.is_attached());
        let err = outlet.send(&[0xb0, 0x0d, 0x00]).unwrap_err();
        assert_eq!(err.kind::<FileError>(), Some(FileError::Nodev));
    }

    #[test]
    fn outlet_batch() {
        let outlet = Outlet::default();
        let recorder = Recorder::default();
        outlet.attach(Box::new(recorder.clone())).unwrap();

        let frames: [&[u8]; 2] = [&[0xb0, 127, 127], &[0xb0, 127, 0]];
        assert_eq!(outlet.try_send_batch(&frames).unwrap(), true);
        assert_eq!(recorder.datagrams(), vec![vec![0xb0, 127, 127], vec![0xb0, 127, 0]]);

        // The batch is not sent while the other sender holds the path.
        let held = outlet.0.lock().unwrap();
        let other = outlet.clone();
        let res = std::thread::spawn(move || other.try_send_batch(&frames).unwrap())
            .join()
            .unwrap();
        drop(held);
        assert_eq!(res, false);
        assert_eq!(recorder.datagrams().len(), 2);

        outlet.detach();
        assert!(!outlet.is_attached());
    }
}
