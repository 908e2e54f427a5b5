// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

use {
    super::{transport::*, *},
    std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        thread,
        time::Duration,
    },
};

/// The token to run one bulk resync at most.
#[derive(Debug, Clone, Default)]
pub struct SyncToken(Arc<AtomicBool>);

/// The holder of token, which releases it when dropped.
#[derive(Debug)]
pub struct SyncGuard(Arc<AtomicBool>);

impl Drop for SyncGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SyncToken {
    pub fn try_acquire(&self) -> Option<SyncGuard> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SyncGuard(self.0.clone()))
    }

    pub fn is_held(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// The sequencer of requests to pull the whole parameters from the amplifier.
#[derive(Debug, Clone)]
pub struct Sequencer {
    channel: MidiChannel,
    outlet: Outlet,
    token: SyncToken,
    pacing: Duration,
}

const RESYNC_WORKER_NAME: &str = "resync worker";

impl Sequencer {
    pub fn new(channel: MidiChannel, outlet: Outlet, pacing: Duration) -> Self {
        Self {
            channel,
            outlet,
            token: Default::default(),
            pacing,
        }
    }

    pub fn token(&self) -> &SyncToken {
        &self.token
    }

    /// Run bulk resync in the calling thread. The callback is invoked to mark the caller busy and
    /// unmark it. Return false without any request when the other resync is running.
    pub fn resync<F>(&self, busy: F) -> Result<bool, Error>
    where
        F: FnMut(bool),
    {
        match self.token.try_acquire() {
            Some(guard) => self.transmit(&guard, busy).map(|_| true),
            None => {
                debug!("bulk resync is already running");
                Ok(false)
            }
        }
    }

    /// Run bulk resync in a new worker thread. None is returned without any request when the
    /// other resync is running.
    pub fn spawn(&self) -> Result<Option<thread::JoinHandle<Result<(), Error>>>, Error> {
        let guard = match self.token.try_acquire() {
            Some(guard) => guard,
            None => {
                debug!("bulk resync is already running");
                return Ok(None);
            }
        };

        let sequencer = self.clone();
        thread::Builder::new()
            .name(RESYNC_WORKER_NAME.to_string())
            .spawn(move || {
                let res = sequencer.transmit(&guard, |_| ());
                if let Err(e) = &res {
                    warn!("bulk resync in worker failed: {}", e);
                }
                res
            })
            .map(Some)
            .map_err(|e| {
                let msg = format!("Fail to launch {}: {}", RESYNC_WORKER_NAME, e);
                Error::new(FileError::Again, &msg)
            })
    }

    fn transmit<F>(&self, _guard: &SyncGuard, mut busy: F) -> Result<(), Error>
    where
        F: FnMut(bool),
    {
        let _enter = debug_span!("resync").entered();

        busy(true);

        let res = self
            .outlet
            .send(&Sentinel::Receiving(true).build(self.channel))
            .and_then(|_| {
                DUMP_GROUPS.iter().try_for_each(|&group| {
                    self.outlet
                        .send(&build_dump_request(self.channel, group))
                        .map(|_| thread::sleep(self.pacing))
                })
            });

        // Clear lingering suppression by interrupted write as well.
        let block_off = self.outlet.send(&Sentinel::Block(false).build(self.channel));

        busy(false);

        let receiving_off = self
            .outlet
            .send(&Sentinel::Receiving(false).build(self.channel));

        debug!(?res, ?block_off, ?receiving_off);

        res.and(block_off).and(receiving_off)
    }
}
