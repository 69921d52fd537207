//! RF discovery control.
//!
//! Single-writer: every operation that reprograms the controller's
//! discovery state takes the shared rf lock, which it also shares with
//! routing commits so discovery changes and commits serialize.

use std::sync::{Arc, Mutex};

use nfc_core::discovery::{screen_state, DiscoveryParameters};
use nfc_core::tech::{tech_mask, TechMask};
use nfc_core::Result;
use nfc_hal::HalHandle;

#[derive(Debug, Clone)]
pub(crate) struct DiscoveryState {
    pub enabled: bool,
    /// Last parameters applied via `enable_discovery`; the baseline
    /// `reset_discovery_tech` restores.
    pub params: Option<DiscoveryParameters>,
    /// One-shot poll/listen override from `set_discovery_tech`.
    pub override_tech: Option<(TechMask, TechMask)>,
    /// Current screen state reported by the platform.
    pub screen_mask: u8,
    pub always_poll: bool,
    /// Explicit polling switch, orthogonal to discovery parameters.
    pub polling_enabled: bool,
}

impl Default for DiscoveryState {
    fn default() -> Self {
        Self {
            enabled: false,
            params: None,
            override_tech: None,
            screen_mask: screen_state::ON_UNLOCKED,
            always_poll: false,
            polling_enabled: true,
        }
    }
}

impl DiscoveryState {
    /// Polling runs only if the explicit switch allows it AND the
    /// current screen state is within the configured policy mask (or
    /// `always_poll` overrides the suppression).
    pub fn polling_active(&self) -> bool {
        if !self.polling_enabled {
            return false;
        }
        if self.always_poll {
            return true;
        }
        match (&self.override_tech, &self.params) {
            (Some(_), _) => true,
            (None, Some(params)) => params.screen_state_mask & self.screen_mask != 0,
            (None, None) => self.screen_mask & screen_state::ON_UNLOCKED != 0,
        }
    }

    /// Poll/listen masks to program, after applying the polling gate.
    fn effective_masks(&self) -> (TechMask, TechMask) {
        let (poll, listen) = match (&self.override_tech, &self.params) {
            (Some(over), _) => *over,
            (None, Some(params)) => (params.poll_mask, params.listen_mask),
            (None, None) => (tech_mask::NONE, tech_mask::NONE),
        };
        if self.polling_active() {
            (poll, listen)
        } else {
            (tech_mask::NONE, listen)
        }
    }
}

pub struct DiscoveryController {
    hal: HalHandle,
    rf_lock: Arc<tokio::sync::Mutex<()>>,
    state: Mutex<DiscoveryState>,
}

impl DiscoveryController {
    pub fn new(hal: HalHandle, rf_lock: Arc<tokio::sync::Mutex<()>>) -> Self {
        Self { hal, rf_lock, state: Mutex::new(DiscoveryState::default()) }
    }

    pub(crate) fn snapshot(&self) -> DiscoveryState {
        self.state.lock().unwrap().clone()
    }

    /// Apply a discovery parameter set. With `restart` false, identical
    /// parameters are a no-op (no stop/start pair reaches the
    /// controller); with `restart` true a full cycle is always forced.
    /// Existing endpoint connections are left alone either way.
    pub async fn enable_discovery(&self, params: DiscoveryParameters, restart: bool) -> Result<()> {
        let _rf = self.rf_lock.lock().await;

        let (was_enabled, unchanged) = {
            let st = self.state.lock().unwrap();
            let unchanged =
                st.enabled && st.override_tech.is_none() && st.params.as_ref() == Some(&params);
            (st.enabled, unchanged)
        };
        if unchanged && !restart {
            tracing::debug!("discovery parameters unchanged, skipping restart");
            return Ok(());
        }

        if was_enabled {
            self.hal.stop_discovery().await?;
        }

        let (poll, listen) = {
            let mut st = self.state.lock().unwrap();
            st.params = Some(params);
            st.override_tech = None;
            st.effective_masks()
        };
        self.hal.set_discovery(poll, listen).await?;
        self.state.lock().unwrap().enabled = true;
        tracing::info!(poll = format!("0x{poll:02x}"), listen = format!("0x{listen:02x}"), restart, "discovery enabled");
        Ok(())
    }

    /// Idempotent.
    pub async fn disable_discovery(&self) -> Result<()> {
        let _rf = self.rf_lock.lock().await;
        if !self.state.lock().unwrap().enabled {
            return Ok(());
        }
        self.hal.stop_discovery().await?;
        self.state.lock().unwrap().enabled = false;
        tracing::info!("discovery disabled");
        Ok(())
    }

    /// One-shot poll/listen override, independent of the full
    /// parameter set.
    pub async fn set_discovery_tech(&self, poll: TechMask, listen: TechMask) -> Result<()> {
        let _rf = self.rf_lock.lock().await;
        if self.state.lock().unwrap().enabled {
            self.hal.stop_discovery().await?;
        }
        let (effective_poll, effective_listen) = {
            let mut st = self.state.lock().unwrap();
            st.override_tech = Some((poll, listen));
            st.effective_masks()
        };
        self.hal.set_discovery(effective_poll, effective_listen).await?;
        self.state.lock().unwrap().enabled = true;
        tracing::info!(poll = format!("0x{poll:02x}"), listen = format!("0x{listen:02x}"), "discovery tech override");
        Ok(())
    }

    /// Restore the configuration from the last `enable_discovery`.
    pub async fn reset_discovery_tech(&self) -> Result<()> {
        let _rf = self.rf_lock.lock().await;
        let (had_override, enabled) = {
            let st = self.state.lock().unwrap();
            (st.override_tech.is_some(), st.enabled)
        };
        if !had_override {
            return Ok(());
        }
        if enabled {
            self.hal.stop_discovery().await?;
        }
        let masks = {
            let mut st = self.state.lock().unwrap();
            st.override_tech = None;
            st.params.is_some().then(|| st.effective_masks())
        };
        match masks {
            Some((poll, listen)) => {
                self.hal.set_discovery(poll, listen).await?;
                self.state.lock().unwrap().enabled = true;
            }
            None => {
                self.state.lock().unwrap().enabled = false;
            }
        }
        tracing::info!("discovery tech override reset");
        Ok(())
    }

    /// Screen-state transition from the platform. Reprograms discovery
    /// only when it flips the polling gate.
    pub async fn set_screen_state(&self, mask: u8, always_poll: bool) -> Result<()> {
        let _rf = self.rf_lock.lock().await;
        let (gate_changed, enabled) = {
            let mut st = self.state.lock().unwrap();
            let before = st.polling_active();
            st.screen_mask = mask;
            st.always_poll = always_poll;
            (st.polling_active() != before, st.enabled)
        };
        self.hal.set_screen_state(mask, always_poll).await?;
        if gate_changed && enabled {
            self.reprogram().await?;
        }
        tracing::debug!(mask = format!("0x{mask:02x}"), always_poll, "screen state applied");
        Ok(())
    }

    /// Explicit polling switch layered under the discovery parameters.
    pub async fn start_stop_polling(&self, enable: bool) -> Result<()> {
        let _rf = self.rf_lock.lock().await;
        let (gate_changed, enabled) = {
            let mut st = self.state.lock().unwrap();
            if st.polling_enabled == enable {
                return Ok(());
            }
            let before = st.polling_active();
            st.polling_enabled = enable;
            (st.polling_active() != before, st.enabled)
        };
        self.hal.set_polling(enable).await?;
        if gate_changed && enabled {
            self.reprogram().await?;
        }
        tracing::info!(enable, "polling switch");
        Ok(())
    }

    /// Stop/start with current effective masks. Caller holds the rf lock.
    async fn reprogram(&self) -> Result<()> {
        self.hal.stop_discovery().await?;
        let (poll, listen) = self.state.lock().unwrap().effective_masks();
        self.hal.set_discovery(poll, listen).await
    }
}
