// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

use {
    super::{transport::*, *},
    std::time::{Duration, Instant},
};

/// The flag driven by the echo of sentinel in inbound path.
#[derive(Debug, Default, Copy, Clone)]
pub struct SentinelLatch {
    since: Option<Instant>,
}

impl SentinelLatch {
    pub fn set(&mut self, state: bool, now: Instant) {
        self.since = if state { Some(now) } else { None };
    }

    pub fn is_on(&self) -> bool {
        self.since.is_some()
    }

    pub fn reset(&mut self) {
        self.since = None;
    }

    /// Release the latch enabled longer than the timeout. Return true when released.
    pub fn expire(&mut self, now: Instant, timeout: Option<Duration>) -> bool {
        match (self.since, timeout) {
            (Some(since), Some(timeout)) if now.saturating_duration_since(since) >= timeout => {
                self.since = None;
                true
            }
            _ => false,
        }
    }
}

/// The writer of parameter, which surrounds the write with block sentinels so that its echo is
/// dropped in inbound path.
#[derive(Clone)]
pub struct EchoSuppressor {
    channel: MidiChannel,
    outlet: Outlet,
}

impl EchoSuppressor {
    pub fn new(channel: MidiChannel, outlet: Outlet) -> Self {
        Self { channel, outlet }
    }

    /// Send block=on, the value, then block=off. The write is dropped and false is returned when
    /// the other sender holds outbound path.
    pub fn write(&self, param: u8, value: u8) -> Result<bool, Error> {
        let frames = build_guarded_write(self.channel, param, value);
        let datagrams: Vec<&[u8]> = frames.iter().map(|frame| &frame[..]).collect();
        let res = self.outlet.try_send_batch(&datagrams);
        debug!(param, value, ?res, "guarded write");
        res
    }
}
