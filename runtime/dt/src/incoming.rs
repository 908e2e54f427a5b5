// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

use {
    super::{handshake::*, suppression::*, *},
    protocols::{registry::*, state::*},
    std::time::{Duration, Instant},
};

/// The outcome of dispatching one inbound datagram.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Dispatched {
    /// Too short, no status byte, or unterminated system exclusive.
    Malformed,
    /// Control change in the other channel.
    Foreign,
    /// Sentinel consumed to drive the flags.
    Sentinel(Sentinel),
    /// Dropped while the block flag is on.
    Suppressed,
    Unknown(u8),
    /// The echo of write to the parameter which the amplifier never reports.
    WriteOnly(u8),
    Identified,
    Ignored,
    Applied {
        desc: ParameterDescriptor,
        value: ParamValue,
        changed: bool,
        /// Whether the change requires bulk resync.
        cascade: bool,
    },
}

/// The router of inbound datagrams to the mirror of parameters. It never sends anything.
#[derive(Debug)]
pub struct IncomingDispatcher {
    channel: MidiChannel,
    blocked: SentinelLatch,
    receiving: SentinelLatch,
    timeout: Option<Duration>,
}

impl IncomingDispatcher {
    pub fn new(channel: MidiChannel, timeout: Option<Duration>) -> Self {
        Self {
            channel,
            blocked: Default::default(),
            receiving: Default::default(),
            timeout,
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.is_on()
    }

    pub fn is_receiving(&self) -> bool {
        self.receiving.is_on()
    }

    pub fn reset(&mut self) {
        self.blocked.reset();
        self.receiving.reset();
    }

    /// Release the flags stuck longer than the timeout.
    pub fn expire(&mut self, now: Instant) {
        if self.blocked.expire(now, self.timeout) {
            warn!(timeout = ?self.timeout, "block flag is released without echo of sentinel");
        }
        if self.receiving.expire(now, self.timeout) {
            warn!(timeout = ?self.timeout, "receiving flag is released without echo of sentinel");
        }
    }

    pub fn dispatch(
        &mut self,
        raw: &[u8],
        now: Instant,
        registry: &Registry,
        state: &mut ParameterState,
        handshake: &mut IdentificationHandshake,
    ) -> Dispatched {
        self.expire(now);

        let cc = match parse_message(raw) {
            None => return Dispatched::Malformed,
            Some(Message::SystemExclusive(frame)) => {
                return if handshake.handle_sysex(frame) {
                    Dispatched::Identified
                } else {
                    Dispatched::Ignored
                };
            }
            Some(Message::Other(class)) => {
                debug!(?class, "ignored message");
                return Dispatched::Ignored;
            }
            Some(Message::ControlChange(cc)) => cc,
        };

        if cc.channel != self.channel.index() {
            return Dispatched::Foreign;
        }

        if let Some(sentinel) = Sentinel::parse(&cc) {
            match sentinel {
                Sentinel::Block(on) => self.blocked.set(on, now),
                Sentinel::Receiving(on) => self.receiving.set(on, now),
            }
            return Dispatched::Sentinel(sentinel);
        }

        if self.blocked.is_on() {
            return Dispatched::Suppressed;
        }

        let desc = match registry.lookup(cc.param) {
            Some(desc) => *desc,
            None => return Dispatched::Unknown(cc.param),
        };

        if desc.role == ParamRole::AmpWithDefaults {
            return Dispatched::WriteOnly(desc.id);
        }

        let decoded = desc.domain.decode(cc.value);
        let (value, changed) = state.update(&desc, &decoded);
        let cascade = desc.role == ParamRole::VoiceSelect && changed && !self.receiving.is_on();

        Dispatched::Applied {
            desc,
            value,
            changed,
            cascade,
        }
    }
}
