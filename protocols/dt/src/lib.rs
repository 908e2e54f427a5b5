// SPDX-License-Identifier: LGPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

#![doc = include_str!("../README.md")]

//! ## Synchronization of parameters
//!
//! The amplifier retransmits every MIDI message it receives. Without any care, the value written
//! by the runtime comes back and is handled as if the user operated the amplifier. To avoid it,
//! each write is surrounded by a pair of sentinel messages, `block=on` and `block=off`. The
//! receiver drops every control change between the echo of the pair.
//!
//! The runtime requests the amplifier to dump the whole parameters when connecting, and after a
//! change which makes the amplifier rewrite the other parameters internally. The sequence of the
//! requests is surrounded by another pair of sentinel messages, `receiving=on` and
//! `receiving=off`, so that the receiver can distinguish the values in the dump from the ones by
//! user operation.
//!
//! ```text
//!                 ++==================================================++
//!                 ||                 Service runtime                  ||
//!                 ||                                                  ||
//!   user          ||  +----------+  block=on, value, block=off        ||
//!   operation ------> |  writer  | -----------------------------+     ||
//!                 ||  +----------+                              |     ||
//!                 ||                                            v     ||        ++===========++
//!                 ||  +----------+  receiving=on, dump x 11,  +------+ ||  MIDI  ||           ||
//!                 ||  | resync   | ------------------------> |outlet| -------> ||           ||
//!                 ||  +----------+  block=off, receiving=off +------+ ||        || amplifier ||
//!                 ||       ^                                          ||        ||           ||
//!                 ||       | cascade                        +------+  ||  MIDI  ||           ||
//!                 ||  +----------+  parameter value        |inlet | <-------- ||           ||
//!                 ||  | incoming | <---------------------- +------+  ||  echo  ++===========++
//!                 ||  +----------+                                    ||  and dump
//!                 ||       |                                          ||
//!                 ++=======|==========================================++
//!                          v
//!                     panel refresh
//! ```

pub mod identity;
pub mod registry;
pub mod state;

use glib::{Error, FileError};

/// The status nibble of control change message.
pub const CONTROL_CHANGE_STATUS: u8 = 0xb0;

/// The parameter identifier to suppress handling of control change messages in receiver.
pub const BLOCK_PARAM_ID: u8 = 127;

/// The parameter identifier to notify that values for dump request are arriving.
pub const RECEIVING_PARAM_ID: u8 = 126;

/// The parameter identifier to request the amplifier to dump a group of parameters.
pub const DUMP_REQUEST_PARAM_ID: u8 = 83;

/// The sub-addresses of parameter groups, in the order to request.
pub const DUMP_GROUPS: [u8; 11] = [0, 17, 18, 19, 29, 30, 31, 32, 33, 34, 35];

/// The value of sentinel and boolean parameters in enabled state.
pub const SWITCH_ON: u8 = 0x7f;

/// The value of sentinel and boolean parameters in disabled state.
pub const SWITCH_OFF: u8 = 0x00;

const SWITCH_THRESHOLD: u8 = 0x40;

const DATA_MASK: u8 = 0x7f;

const SYSEX_START: u8 = 0xf0;
const SYSEX_END: u8 = 0xf7;

/// The MIDI channel for messages of control change.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MidiChannel(u8);

impl Default for MidiChannel {
    fn default() -> Self {
        Self(0)
    }
}

impl MidiChannel {
    /// Instantiate by the number of channel, between 1 and 16.
    pub fn new(number: u8) -> Result<Self, Error> {
        if number >= 1 && number <= 16 {
            Ok(Self(number - 1))
        } else {
            let msg = format!("MIDI channel should be between 1 and 16 but {}", number);
            Err(Error::new(FileError::Inval, &msg))
        }
    }

    /// The value in the low nibble of status byte.
    pub fn index(&self) -> u8 {
        self.0
    }

    /// The number of channel, between 1 and 16.
    pub fn number(&self) -> u8 {
        self.0 + 1
    }
}

/// The class of MIDI message, expressed in the high nibble of status byte.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MessageClass {
    NoteOff,
    NoteOn,
    PolyphonicPressure,
    ControlChange,
    ProgramChange,
    ChannelPressure,
    PitchBend,
    System,
}

impl MessageClass {
    fn from_status(status: u8) -> Self {
        match status & 0xf0 {
            0x80 => Self::NoteOff,
            0x90 => Self::NoteOn,
            0xa0 => Self::PolyphonicPressure,
            0xb0 => Self::ControlChange,
            0xc0 => Self::ProgramChange,
            0xd0 => Self::ChannelPressure,
            0xe0 => Self::PitchBend,
            _ => Self::System,
        }
    }

    fn length(&self) -> usize {
        match self {
            Self::ProgramChange | Self::ChannelPressure => 2,
            Self::System => 1,
            _ => 3,
        }
    }
}

/// The message of control change.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ControlChange {
    /// The channel index, between 0 and 15.
    pub channel: u8,
    /// The identifier of parameter.
    pub param: u8,
    /// The value of parameter.
    pub value: u8,
}

impl ControlChange {
    pub const LENGTH: usize = 3;

    pub fn new(channel: MidiChannel, param: u8, value: u8) -> Self {
        Self {
            channel: channel.index(),
            param: param & DATA_MASK,
            value: value & DATA_MASK,
        }
    }

    pub fn build(&self) -> [u8; Self::LENGTH] {
        [
            CONTROL_CHANGE_STATUS | (self.channel & 0x0f),
            self.param & DATA_MASK,
            self.value & DATA_MASK,
        ]
    }

    /// Whether the value expresses enabled state of switch.
    pub fn is_on(&self) -> bool {
        self.value >= SWITCH_THRESHOLD
    }
}

/// The message parsed from the datagram.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Message<'a> {
    ControlChange(ControlChange),
    /// The whole frame including the start and end byte.
    SystemExclusive(&'a [u8]),
    Other(MessageClass),
}

/// Parse the datagram. None is returned for malformed one; too short, no status byte, data byte
/// with MSB, or system exclusive without end byte.
pub fn parse_message(raw: &[u8]) -> Option<Message<'_>> {
    let status = *raw.first()?;
    if status & 0x80 == 0 {
        return None;
    }

    if status == SYSEX_START {
        return match raw.last() {
            Some(&SYSEX_END) if raw.len() >= 2 => {
                if raw[1..(raw.len() - 1)].iter().all(|&b| b & 0x80 == 0) {
                    Some(Message::SystemExclusive(raw))
                } else {
                    None
                }
            }
            _ => None,
        };
    }

    let class = MessageClass::from_status(status);
    let length = class.length();
    if raw.len() < length || raw[1..length].iter().any(|&b| b & 0x80 > 0) {
        return None;
    }

    match class {
        MessageClass::ControlChange => Some(Message::ControlChange(ControlChange {
            channel: status & 0x0f,
            param: raw[1],
            value: raw[2],
        })),
        _ => Some(Message::Other(class)),
    }
}

/// The message of control change for protocol signaling.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Sentinel {
    /// Receiver drops control change messages while enabled.
    Block(bool),
    /// Values are arriving for dump request while enabled.
    Receiving(bool),
}

impl Sentinel {
    pub fn parse(cc: &ControlChange) -> Option<Self> {
        match cc.param {
            BLOCK_PARAM_ID => Some(Self::Block(cc.is_on())),
            RECEIVING_PARAM_ID => Some(Self::Receiving(cc.is_on())),
            _ => None,
        }
    }

    pub fn build(&self, channel: MidiChannel) -> [u8; ControlChange::LENGTH] {
        let (param, state) = match self {
            Self::Block(state) => (BLOCK_PARAM_ID, state),
            Self::Receiving(state) => (RECEIVING_PARAM_ID, state),
        };
        let value = if *state { SWITCH_ON } else { SWITCH_OFF };
        ControlChange::new(channel, param, value).build()
    }
}

/// Build the sequence of datagrams for a write of parameter, surrounded by sentinels.
pub fn build_guarded_write(
    channel: MidiChannel,
    param: u8,
    value: u8,
) -> [[u8; ControlChange::LENGTH]; 3] {
    [
        Sentinel::Block(true).build(channel),
        ControlChange::new(channel, param, value).build(),
        Sentinel::Block(false).build(channel),
    ]
}

/// Build the datagram to request dump for the group of parameters.
pub fn build_dump_request(channel: MidiChannel, group: u8) -> [u8; ControlChange::LENGTH] {
    ControlChange::new(channel, DUMP_REQUEST_PARAM_ID, group).build()
}
