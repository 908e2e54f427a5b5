// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2020 Takashi Sakamoto

use {
    glib::{source, ControlFlow, FileError, MainContext, MainLoop, Source},
    nix::sys::signal,
    std::{
        sync::{mpsc, Arc},
        thread,
        time::Duration,
    },
    tracing::{debug, warn},
};

use super::*;

/// The thread to run glib event loop with own context, to which sources are attached.
pub struct Dispatcher {
    name: String,
    th: Option<thread::JoinHandle<()>>,
    ev_loop: Arc<MainLoop>,
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.ev_loop.quit();

        if let Some(th) = self.th.take() {
            if th.join().is_err() {
                warn!("Fail to join thread for {}.", self.name);
            }
        }
    }
}

const LAUNCH_TIMEOUT: Duration = Duration::from_secs(1);

impl Dispatcher {
    pub fn run(name: String) -> Result<Dispatcher, Error> {
        // Use own context.
        let ctx = MainContext::new();
        let ev_loop = Arc::new(MainLoop::new(Some(&ctx), false));

        // The idle source is dispatched just after the loop starts running.
        let (tx, rx) = mpsc::sync_channel(1);
        let src = source::idle_source_new(None, source::Priority::HIGH, move || {
            let _ = tx.send(());
            ControlFlow::Break
        });
        src.attach(Some(&ctx));

        // launch one thread to dispatch all events.
        let l = ev_loop.clone();
        let th = thread::Builder::new()
            .name(name.clone())
            .spawn(move || l.run())
            .map_err(|e| {
                let msg = format!("Fail to launch thread for {}: {}", name, e);
                Error::new(FileError::Again, &msg)
            })?;

        rx.recv_timeout(LAUNCH_TIMEOUT).map_err(|e| {
            ev_loop.quit();
            let msg = format!("Event loop for {} is not running: {}", name, e);
            Error::new(FileError::Again, &msg)
        })?;

        debug!(name = name.as_str(), "dispatcher launched");

        Ok(Dispatcher {
            name,
            th: Some(th),
            ev_loop,
        })
    }

    pub fn stop(&mut self) {
        self.ev_loop.quit();
    }

    fn attach_src_to_ctx(&mut self, src: &Source) {
        let ctx = self.ev_loop.context();
        src.attach(Some(&ctx));
    }

    pub fn attach_signal_handler<F>(&mut self, signum: signal::Signal, cb: F)
    where
        F: FnMut() -> ControlFlow + Send + 'static,
    {
        let src =
            source::unix_signal_source_new(signum as i32, None, source::Priority::DEFAULT_IDLE, cb);

        self.attach_src_to_ctx(&src);
    }

    pub fn attach_interval_handler<F>(&mut self, interval: Duration, cb: F)
    where
        F: FnMut() -> ControlFlow + Send + 'static,
    {
        let src = source::timeout_source_new(interval, None, source::Priority::DEFAULT_IDLE, cb);

        self.attach_src_to_ctx(&src);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn interval_handler_fires() {
        let mut dispatcher = Dispatcher::run("test dispatcher".to_string()).unwrap();

        let (tx, rx) = mpsc::channel();
        dispatcher.attach_interval_handler(Duration::from_millis(5), move || {
            let _ = tx.send(());
            ControlFlow::Continue
        });

        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());

        dispatcher.stop();
    }
}
