//! Discovery parameter set consumed by `enable_discovery`.

use serde::{Deserialize, Serialize};

use crate::tech::{tech_mask, TechMask};

/// Screen state bits gating the polling policy.
pub mod screen_state {
    pub const OFF_LOCKED: u8 = 0x01;
    pub const OFF_UNLOCKED: u8 = 0x02;
    pub const ON_LOCKED: u8 = 0x04;
    pub const ON_UNLOCKED: u8 = 0x08;
}

/// One application-policy snapshot of what to poll and listen for.
///
/// Constructed by policy, consumed once per `enable_discovery` call and
/// superseded by the next one. Equality against the previously applied
/// set drives the no-op rule when `restart` is false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryParameters {
    pub poll_mask: TechMask,
    pub listen_mask: TechMask,
    pub screen_state_mask: u8,
    pub enable_p2p: bool,
}

impl Default for DiscoveryParameters {
    fn default() -> Self {
        Self {
            poll_mask: tech_mask::A | tech_mask::B | tech_mask::F | tech_mask::V,
            listen_mask: tech_mask::A | tech_mask::B | tech_mask::F,
            screen_state_mask: screen_state::ON_UNLOCKED,
            enable_p2p: false,
        }
    }
}

impl DiscoveryParameters {
    pub fn with_poll_mask(mut self, mask: TechMask) -> Self {
        self.poll_mask = mask;
        self
    }

    pub fn with_listen_mask(mut self, mask: TechMask) -> Self {
        self.listen_mask = mask;
        self
    }

    pub fn with_screen_state(mut self, mask: u8) -> Self {
        self.screen_state_mask = mask;
        self
    }
}
