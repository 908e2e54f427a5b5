// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

use {
    super::{transport::*, *},
    protocols::identity::*,
};

/// One-shot exchange of identity request and response after opening ports.
#[derive(Debug, Default)]
pub struct IdentificationHandshake {
    info: ConnectionInfo,
}

impl IdentificationHandshake {
    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub fn reset(&mut self) {
        self.info.reset();
    }

    /// Forget the previous information, then send identity request.
    pub fn start(&mut self, outlet: &Outlet) -> Result<(), Error> {
        self.info.reset();
        outlet.send(&IDENTITY_REQUEST)
    }

    /// Handle the frame of system exclusive. Unrelated frames are ignored.
    pub fn handle_sysex(&mut self, frame: &[u8]) -> bool {
        let identified = self.info.parse_identity_response(frame);
        if identified {
            info!(
                model = %self.info.model,
                version = ?self.info.version(),
                "amplifier identified"
            );
        } else {
            debug!(len = frame.len(), "unrelated system exclusive");
        }
        identified
    }
}
