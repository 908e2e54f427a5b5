// SPDX-License-Identifier: LGPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

//! Protocol about identification of the amplifier.
//!
//! The module includes protocol about MIDI Universal Device Inquiry. The response from the
//! amplifier has the layout below:
//!
//! ```text
//! offset  0: 0xf0 (start of system exclusive)
//! offset  1: 0x7e 0x7f 0x06 0x02 (universal non real time, all call, identity reply)
//! offset  5: 0x00 0x01 0x0c (manufacturer identifier)
//! offset  8: 0x15 0x00 (device family)
//! offset 10: model code
//! offset 11: 0x00
//! offset 12: version in ASCII, like " 1.07", with space-padded tens of major version
//! ...      : 0xf7 (end of system exclusive)
//! ```

/// The request of MIDI Universal Device Inquiry.
pub const IDENTITY_REQUEST: [u8; 6] = [0xf0, 0x7e, 0x7f, 0x06, 0x01, 0xf7];

// Header at 1..=7, family at 8..=9, model at 10, version in ASCII at 12..=16, then end byte.
const RESPONSE_MIN_LENGTH: usize = 18;
const RESPONSE_HEADER_OFFSET: usize = 1;
const RESPONSE_HEADER: [u8; 7] = [0x7e, 0x7f, 0x06, 0x02, 0x00, 0x01, 0x0c];
const FAMILY_OFFSET: usize = 8;
const FAMILY: [u8; 2] = [0x15, 0x00];
const MODEL_OFFSET: usize = 10;
const MAJOR_TENS_OFFSET: usize = 12;
const MAJOR_ONES_OFFSET: usize = 13;
const MINOR_OFFSET: usize = 15;
const PATCH_OFFSET: usize = 16;

/// The model of amplifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeviceModel {
    Dt25Combo112,
    Dt25Head,
    Dt50Head,
    Dt50Combo112,
    Dt50Combo212,
    Unknown(u8),
}

impl Default for DeviceModel {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

impl From<u8> for DeviceModel {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::Dt25Combo112,
            1 => Self::Dt25Head,
            2 => Self::Dt50Head,
            3 => Self::Dt50Combo112,
            4 => Self::Dt50Combo212,
            _ => Self::Unknown(code),
        }
    }
}

impl std::fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let label = match self {
            Self::Dt25Combo112 => "DT25 112",
            Self::Dt25Head => "DT25 Head",
            Self::Dt50Head => "DT50 Head",
            Self::Dt50Combo112 => "DT50 112",
            Self::Dt50Combo212 => "DT50 212",
            Self::Unknown(_) => "Unknown model",
        };
        write!(f, "{}", label)
    }
}

/// The information of connected amplifier.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub identified: bool,
    pub model: DeviceModel,
    pub version_major: u8,
    pub version_minor: u8,
    pub version_patch: u8,
}

fn ascii_digit(byte: u8) -> Option<u8> {
    if byte.is_ascii_digit() {
        Some(byte - b'0')
    } else {
        None
    }
}

impl ConnectionInfo {
    pub fn reset(&mut self) {
        *self = Default::default();
    }

    /// Parse the frame of system exclusive. The information is updated only if the frame is the
    /// expected response, else left as is.
    pub fn parse_identity_response(&mut self, frame: &[u8]) -> bool {
        if frame.len() < RESPONSE_MIN_LENGTH {
            return false;
        }

        let header = &frame[RESPONSE_HEADER_OFFSET..(RESPONSE_HEADER_OFFSET + RESPONSE_HEADER.len())];
        if header != RESPONSE_HEADER {
            return false;
        }

        if frame[FAMILY_OFFSET..(FAMILY_OFFSET + FAMILY.len())] != FAMILY {
            return false;
        }

        let tens = match frame[MAJOR_TENS_OFFSET] {
            b' ' => Some(0),
            byte => ascii_digit(byte),
        };

        let version = tens.and_then(|tens| {
            let ones = ascii_digit(frame[MAJOR_ONES_OFFSET])?;
            let minor = ascii_digit(frame[MINOR_OFFSET])?;
            let patch = ascii_digit(frame[PATCH_OFFSET])?;
            Some((tens * 10 + ones, minor, patch))
        });

        match version {
            Some((major, minor, patch)) => {
                self.identified = true;
                self.model = DeviceModel::from(frame[MODEL_OFFSET]);
                self.version_major = major;
                self.version_minor = minor;
                self.version_patch = patch;
                true
            }
            None => false,
        }
    }

    /// The version in `major.minorpatch` form, like `1.07`.
    pub fn version(&self) -> Option<String> {
        if self.identified {
            Some(format!(
                "{}.{}{}",
                self.version_major, self.version_minor, self.version_patch
            ))
        } else {
            None
        }
    }

    /// Human readable status of connection.
    pub fn status(&self) -> String {
        match self.version() {
            Some(version) => format!("{} v{}", self.model, version),
            None => "not connected".to_string(),
        }
    }
}
