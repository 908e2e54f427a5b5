// SPDX-License-Identifier: LGPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

//! Mirror of parameters in the amplifier.

use super::registry::*;

/// The latest known values of parameters, indexed by parameter identifier.
#[derive(Debug, Clone)]
pub struct ParameterState {
    values: Vec<Option<ParamValue>>,
}

impl Default for ParameterState {
    fn default() -> Self {
        Self {
            values: vec![None; 128],
        }
    }
}

impl ParameterState {
    pub fn get(&self, id: u8) -> Option<ParamValue> {
        self.values.get(id as usize).copied().flatten()
    }

    /// Store the value after clipping it to the domain. Return the stored value and whether it
    /// differs from the previous one.
    pub fn update(&mut self, desc: &ParameterDescriptor, value: &ParamValue) -> (ParamValue, bool) {
        let value = desc.domain.clip(value);
        let entry = &mut self.values[desc.id as usize];
        let changed = *entry != Some(value);
        *entry = Some(value);
        (value, changed)
    }

    /// Forget every value, for example when the amplifier is disconnected.
    pub fn clear(&mut self) {
        self.values.iter_mut().for_each(|v| *v = None);
    }

    /// The pairs of descriptor and value for known parameters, in the order of registry.
    pub fn known<'a>(
        &'a self,
        registry: &'a Registry,
    ) -> impl Iterator<Item = (&'a ParameterDescriptor, ParamValue)> + 'a {
        registry
            .iter()
            .filter_map(move |desc| self.get(desc.id).map(|value| (desc, value)))
    }
}
