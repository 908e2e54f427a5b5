// SPDX-License-Identifier: LGPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

//! Table of parameters.
//!
//! The module includes the table of parameters which the amplifier exposes as control change
//! messages, and the conversion between the value in the message and the semantic value.

use super::*;

/// The group to which the parameter belongs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum AmpChannel {
    A,
    B,
    Master,
}

impl AmpChannel {
    /// The suffix of parameter name for the channel.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::A => "a",
            Self::B => "b",
            Self::Master => "",
        }
    }
}

/// The domain of value.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Domain {
    /// 0..=127 for normalized level between 0.0 and 1.0.
    Continuous7Bit,
    /// Enabled when 64 or greater.
    Boolean,
    /// Direct index of list with the given number of entries.
    Enum(u8),
    /// Four-way selector.
    Quad,
}

/// The semantic value of parameter.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ParamValue {
    Level(f64),
    Switch(bool),
    Index(u8),
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Level(level) => write!(f, "{:.3}", level),
            Self::Switch(state) => write!(f, "{}", if *state { "on" } else { "off" }),
            Self::Index(index) => write!(f, "{}", index),
        }
    }
}

const QUAD_MAX: u8 = 3;

impl Domain {
    fn max_index(&self) -> u8 {
        match self {
            Self::Enum(count) => count.saturating_sub(1),
            Self::Quad => QUAD_MAX,
            _ => DATA_MASK,
        }
    }

    /// Convert the value in the message to the semantic value.
    pub fn decode(&self, raw: u8) -> ParamValue {
        let raw = raw.min(DATA_MASK);
        match self {
            Self::Continuous7Bit => ParamValue::Level(raw as f64 / DATA_MASK as f64),
            Self::Boolean => ParamValue::Switch(raw >= SWITCH_THRESHOLD),
            Self::Enum(_) | Self::Quad => ParamValue::Index(raw.min(self.max_index())),
        }
    }

    /// Convert the semantic value to the value in the message. The semantic value is clipped to
    /// the domain in advance.
    pub fn encode(&self, value: &ParamValue) -> u8 {
        match self.clip(value) {
            ParamValue::Level(level) => (level * DATA_MASK as f64).round() as u8,
            ParamValue::Switch(state) => {
                if state {
                    SWITCH_ON
                } else {
                    SWITCH_OFF
                }
            }
            ParamValue::Index(index) => index,
        }
    }

    /// Coerce the semantic value into the bounds and the kind of domain.
    pub fn clip(&self, value: &ParamValue) -> ParamValue {
        match self {
            Self::Continuous7Bit => {
                let level = match *value {
                    ParamValue::Level(level) if level.is_nan() => 0.0,
                    ParamValue::Level(level) => level,
                    ParamValue::Switch(state) => {
                        if state {
                            1.0
                        } else {
                            0.0
                        }
                    }
                    ParamValue::Index(index) => index as f64 / DATA_MASK as f64,
                };
                ParamValue::Level(level.max(0.0).min(1.0))
            }
            Self::Boolean => {
                let state = match *value {
                    ParamValue::Level(level) => level >= 0.5,
                    ParamValue::Switch(state) => state,
                    ParamValue::Index(index) => index > 0,
                };
                ParamValue::Switch(state)
            }
            Self::Enum(_) | Self::Quad => {
                let index = match *value {
                    ParamValue::Level(level) if level.is_nan() => 0,
                    ParamValue::Level(level) => {
                        (level.max(0.0).min(1.0) * self.max_index() as f64).round() as u8
                    }
                    ParamValue::Switch(state) => state as u8,
                    ParamValue::Index(index) => index,
                };
                ParamValue::Index(index.min(self.max_index()))
            }
        }
    }

    /// Parse the text expression of semantic value; level between 0.0 and 1.0, `on` or `off`,
    /// or index.
    pub fn parse(&self, text: &str) -> Result<ParamValue, Error> {
        let text = text.trim();
        let value = match self {
            Self::Continuous7Bit => text.parse::<f64>().ok().map(ParamValue::Level),
            Self::Boolean => match text {
                "on" | "true" | "1" => Some(ParamValue::Switch(true)),
                "off" | "false" | "0" => Some(ParamValue::Switch(false)),
                _ => None,
            },
            Self::Enum(_) | Self::Quad => text
                .parse::<u8>()
                .ok()
                .filter(|&index| index <= self.max_index())
                .map(ParamValue::Index),
        };
        value.ok_or_else(|| {
            let msg = format!("Invalid value for {:?}: {}", self, text);
            Error::new(FileError::Inval, &msg)
        })
    }
}

/// The role of parameter in protocol.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ParamRole {
    Plain,
    /// The change makes the amplifier rewrite dependent parameters internally.
    VoiceSelect,
    /// Write-only alternative of amp model, to load power amp defaults as well.
    AmpWithDefaults,
}

/// The descriptor of parameter.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ParameterDescriptor {
    pub id: u8,
    pub name: &'static str,
    pub channel: AmpChannel,
    pub domain: Domain,
    pub role: ParamRole,
}

const fn plain(id: u8, name: &'static str, channel: AmpChannel, domain: Domain) -> ParameterDescriptor {
    ParameterDescriptor {
        id,
        name,
        channel,
        domain,
        role: ParamRole::Plain,
    }
}

const AMP_MODEL_COUNT: u8 = 31;
const CAB_MODEL_COUNT: u8 = 18;
const REVERB_TYPE_COUNT: u8 = 13;
const XLR_MIC_COUNT: u8 = 9;

const CH_B_OFFSET: u8 = 40;

const AMP_A_ID: u8 = 11;
const AMP_DEFAULTS_A_ID: u8 = 35;
const VOICE_A_ID: u8 = 22;
const CLASS_A_A_ID: u8 = 29;
const TRIODE_A_ID: u8 = 30;
const BOOST_A_ID: u8 = 32;
const PI_VOLTAGE_HIGH_A_ID: u8 = 33;
const CAP_MODERN_A_ID: u8 = 34;

macro_rules! channel_params {
    ($ch:expr, $offset:expr, $suffix:literal) => {
        [
            plain(AMP_A_ID + $offset, concat!("amp-", $suffix), $ch, Domain::Enum(AMP_MODEL_COUNT)),
            plain(12 + $offset, concat!("cab-", $suffix), $ch, Domain::Enum(CAB_MODEL_COUNT)),
            plain(13 + $offset, concat!("gain-", $suffix), $ch, Domain::Continuous7Bit),
            plain(14 + $offset, concat!("bass-", $suffix), $ch, Domain::Continuous7Bit),
            plain(15 + $offset, concat!("middle-", $suffix), $ch, Domain::Continuous7Bit),
            plain(16 + $offset, concat!("treble-", $suffix), $ch, Domain::Continuous7Bit),
            plain(17 + $offset, concat!("volume-", $suffix), $ch, Domain::Continuous7Bit),
            plain(21 + $offset, concat!("presence-", $suffix), $ch, Domain::Continuous7Bit),
            ParameterDescriptor {
                id: VOICE_A_ID + $offset,
                name: concat!("voice-", $suffix),
                channel: $ch,
                domain: Domain::Quad,
                role: ParamRole::VoiceSelect,
            },
            plain(23 + $offset, concat!("reverb-", $suffix), $ch, Domain::Boolean),
            plain(24 + $offset, concat!("reverb-type-", $suffix), $ch, Domain::Enum(REVERB_TYPE_COUNT)),
            plain(25 + $offset, concat!("reverb-decay-", $suffix), $ch, Domain::Continuous7Bit),
            plain(26 + $offset, concat!("reverb-predelay-", $suffix), $ch, Domain::Continuous7Bit),
            plain(27 + $offset, concat!("reverb-tone-", $suffix), $ch, Domain::Continuous7Bit),
            plain(28 + $offset, concat!("reverb-mix-", $suffix), $ch, Domain::Continuous7Bit),
            plain(CLASS_A_A_ID + $offset, concat!("class-a-", $suffix), $ch, Domain::Boolean),
            plain(TRIODE_A_ID + $offset, concat!("triode-", $suffix), $ch, Domain::Boolean),
            plain(31 + $offset, concat!("topology-", $suffix), $ch, Domain::Quad),
            plain(BOOST_A_ID + $offset, concat!("boost-", $suffix), $ch, Domain::Boolean),
            plain(PI_VOLTAGE_HIGH_A_ID + $offset, concat!("pi-voltage-high-", $suffix), $ch, Domain::Boolean),
            plain(CAP_MODERN_A_ID + $offset, concat!("cap-modern-", $suffix), $ch, Domain::Boolean),
            ParameterDescriptor {
                id: AMP_DEFAULTS_A_ID + $offset,
                name: concat!("amp-defaults-", $suffix),
                channel: $ch,
                domain: Domain::Enum(AMP_MODEL_COUNT),
                role: ParamRole::AmpWithDefaults,
            },
        ]
    };
}

const CH_A_PARAMS: [ParameterDescriptor; 22] = channel_params!(AmpChannel::A, 0, "a");
const CH_B_PARAMS: [ParameterDescriptor; 22] = channel_params!(AmpChannel::B, CH_B_OFFSET, "b");

const MASTER_PARAMS: [ParameterDescriptor; 4] = [
    plain(7, "master-volume", AmpChannel::Master, Domain::Continuous7Bit),
    plain(80, "xlr-mic", AmpChannel::Master, Domain::Enum(XLR_MIC_COUNT)),
    plain(81, "low-volume", AmpChannel::Master, Domain::Boolean),
    plain(82, "channel-b", AmpChannel::Master, Domain::Boolean),
];

const PARAM_ID_COUNT: usize = 128;

/// The table of parameters, immutable after instantiation.
#[derive(Debug, Clone)]
pub struct Registry {
    entries: Vec<ParameterDescriptor>,
    index: [Option<usize>; PARAM_ID_COUNT],
}

impl Default for Registry {
    fn default() -> Self {
        let mut entries = Vec::new();
        let mut index = [None; PARAM_ID_COUNT];

        CH_A_PARAMS
            .iter()
            .chain(CH_B_PARAMS.iter())
            .chain(MASTER_PARAMS.iter())
            .for_each(|&desc| {
                let pos = desc.id as usize;
                assert!(
                    pos < PARAM_ID_COUNT && index[pos].is_none(),
                    "Programming error for table of parameters: {}",
                    desc.id,
                );
                assert!(
                    ![BLOCK_PARAM_ID, RECEIVING_PARAM_ID, DUMP_REQUEST_PARAM_ID].contains(&desc.id),
                    "Programming error for reserved parameter: {}",
                    desc.id,
                );
                index[pos] = Some(entries.len());
                entries.push(desc);
            });

        Self { entries, index }
    }
}

impl Registry {
    pub fn lookup(&self, id: u8) -> Option<&ParameterDescriptor> {
        self.index
            .get(id as usize)
            .and_then(|pos| *pos)
            .map(|pos| &self.entries[pos])
    }

    pub fn find(&self, name: &str) -> Option<&ParameterDescriptor> {
        self.entries.iter().find(|desc| desc.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParameterDescriptor> {
        self.entries.iter()
    }

    /// The descriptor of plain amp model for the channel.
    pub fn amp_model(&self, channel: AmpChannel) -> Option<&ParameterDescriptor> {
        channel_offset(channel).and_then(|offset| self.lookup(AMP_A_ID + offset))
    }

    /// The descriptor of amp model with defaults for the channel.
    pub fn amp_with_defaults(&self, channel: AmpChannel) -> Option<&ParameterDescriptor> {
        channel_offset(channel).and_then(|offset| self.lookup(AMP_DEFAULTS_A_ID + offset))
    }
}

fn channel_offset(channel: AmpChannel) -> Option<u8> {
    match channel {
        AmpChannel::A => Some(0),
        AmpChannel::B => Some(CH_B_OFFSET),
        AmpChannel::Master => None,
    }
}

/// The parameters of power amp expressed as boolean.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PowerAmpSwitches {
    /// Class A if enabled, else class A/B.
    pub class_a: bool,
    /// Triode if enabled, else pentode.
    pub triode: bool,
    pub boost: bool,
    /// High voltage for phase inverter.
    pub pi_voltage_high: bool,
    /// Modern type of capacitor, else vintage.
    pub cap_modern: bool,
}

/// The values which the amplifier loads when amp model is written with defaults.
pub const POWER_AMP_RESET: PowerAmpSwitches = PowerAmpSwitches {
    class_a: false,
    triode: false,
    boost: false,
    pi_voltage_high: true,
    cap_modern: false,
};

impl PowerAmpSwitches {
    /// The pairs of parameter identifier and value for the channel.
    pub fn entries(&self, channel: AmpChannel) -> Vec<(u8, bool)> {
        channel_offset(channel)
            .map(|offset| {
                vec![
                    (CLASS_A_A_ID + offset, self.class_a),
                    (TRIODE_A_ID + offset, self.triode),
                    (BOOST_A_ID + offset, self.boost),
                    (PI_VOLTAGE_HIGH_A_ID + offset, self.pi_voltage_high),
                    (CAP_MODERN_A_ID + offset, self.cap_modern),
                ]
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn registry_lookup() {
        let registry = Registry::default();

        let desc = registry.lookup(13).unwrap();
        assert_eq!(desc.name, "gain-a");
        assert_eq!(desc.channel, AmpChannel::A);
        assert_eq!(desc.domain, Domain::Continuous7Bit);

        let desc = registry.lookup(62).unwrap();
        assert_eq!(desc.name, "voice-b");
        assert_eq!(desc.role, ParamRole::VoiceSelect);

        let desc = registry.find("xlr-mic").unwrap();
        assert_eq!(desc.id, 80);
        assert_eq!(desc.domain, Domain::Enum(9));

        assert_eq!(registry.lookup(BLOCK_PARAM_ID), None);
        assert_eq!(registry.lookup(RECEIVING_PARAM_ID), None);
        assert_eq!(registry.lookup(DUMP_REQUEST_PARAM_ID), None);
        assert_eq!(registry.lookup(0), None);
        assert_eq!(registry.lookup(200), None);

        assert_eq!(registry.amp_model(AmpChannel::B).unwrap().id, 51);
        assert_eq!(registry.amp_with_defaults(AmpChannel::A).unwrap().id, 35);
        assert_eq!(registry.amp_model(AmpChannel::Master), None);

        assert_eq!(registry.iter().count(), 48);
    }

    #[test]
    fn domain_round_trip() {
        let registry = Registry::default();

        registry.iter().for_each(|desc| match desc.domain {
            Domain::Continuous7Bit => (0..=127u8).for_each(|raw| {
                let value = ParamValue::Level(raw as f64 / 127.0);
                assert_eq!(desc.domain.decode(desc.domain.encode(&value)), value);
            }),
            Domain::Boolean => [false, true].iter().for_each(|&state| {
                let value = ParamValue::Switch(state);
                assert_eq!(desc.domain.decode(desc.domain.encode(&value)), value);
            }),
            Domain::Enum(count) => (0..count).for_each(|index| {
                let value = ParamValue::Index(index);
                assert_eq!(desc.domain.decode(desc.domain.encode(&value)), value);
            }),
            Domain::Quad => (0..4).for_each(|index| {
                let value = ParamValue::Index(index);
                assert_eq!(desc.domain.decode(desc.domain.encode(&value)), value);
            }),
        });
    }

    #[test]
    fn encode_clipping() {
        let domain = Domain::Continuous7Bit;
        assert_eq!(domain.encode(&ParamValue::Level(1.5)), 127);
        assert_eq!(domain.encode(&ParamValue::Level(-0.5)), 0);
        assert_eq!(domain.encode(&ParamValue::Level(f64::NAN)), 0);
        assert_eq!(domain.encode(&ParamValue::Level(0.5)), 64);

        let domain = Domain::Quad;
        assert_eq!(domain.encode(&ParamValue::Index(9)), 3);

        let domain = Domain::Enum(13);
        assert_eq!(domain.encode(&ParamValue::Index(100)), 12);

        let domain = Domain::Boolean;
        assert_eq!(domain.encode(&ParamValue::Switch(true)), 127);
        assert_eq!(domain.encode(&ParamValue::Switch(false)), 0);
    }

    #[test]
    fn decode_boolean_threshold() {
        let domain = Domain::Boolean;
        assert_eq!(domain.decode(0), ParamValue::Switch(false));
        assert_eq!(domain.decode(63), ParamValue::Switch(false));
        assert_eq!(domain.decode(64), ParamValue::Switch(true));
        assert_eq!(domain.decode(0xff), ParamValue::Switch(true));

        // No round trip for the value below threshold except for zero.
        assert_eq!(domain.encode(&domain.decode(32)), 0);
    }

    #[test]
    fn decode_clipping() {
        assert_eq!(Domain::Quad.decode(100), ParamValue::Index(3));
        assert_eq!(Domain::Enum(31).decode(40), ParamValue::Index(30));
        assert_eq!(Domain::Continuous7Bit.decode(0xff), ParamValue::Level(1.0));
    }

    #[test]
    fn parse_text() {
        assert_eq!(
            Domain::Continuous7Bit.parse("0.25").unwrap(),
            ParamValue::Level(0.25)
        );
        assert_eq!(Domain::Boolean.parse("on").unwrap(), ParamValue::Switch(true));
        assert_eq!(Domain::Quad.parse("2").unwrap(), ParamValue::Index(2));
        assert!(Domain::Quad.parse("4").is_err());
        assert!(Domain::Boolean.parse("maybe").is_err());
        assert!(Domain::Enum(9).parse("-1").is_err());
    }

    #[test]
    fn power_amp_entries() {
        let entries = POWER_AMP_RESET.entries(AmpChannel::B);
        assert_eq!(
            entries,
            vec![(69, false), (70, false), (72, false), (73, true), (74, false)]
        );
        assert!(POWER_AMP_RESET.entries(AmpChannel::Master).is_empty());
    }
}
