//! Persisted per-modem configuration and the `PUT` body schema.
//! Loaded once at boot, rewritten only by the facade's request
//! handler, never written from the [`crate::manager::Manager`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PdpType {
    Ipv4,
    Ipv6,
    Ipv4v6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProtocol {
    None,
    Pap,
    Chap,
    Both,
}

impl Default for AuthProtocol {
    fn default() -> Self {
        Self::None
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auth {
    #[serde(default)]
    pub protocol: AuthProtocol,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApnProfile {
    pub apn: String,
    #[serde(rename = "type")]
    pub pdp_type: PdpType,
    #[serde(default)]
    pub auth: Auth,
}

impl ApnProfile {
    fn validate(&self) -> Result<(), SchemaError> {
        if self.apn.len() > 100 {
            return Err(SchemaError::ApnTooLong);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdpConfig {
    #[serde(rename = "static")]
    pub is_static: bool,
    pub id: u32,
    #[serde(rename = "retryTimeout")]
    pub retry_timeout_sec: u64,
    pub primary: ApnProfile,
    pub secondary: Option<ApnProfile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebootHint {
    pub enable: bool,
    pub cycles: u32,
}

impl Default for RebootHint {
    fn default() -> Self {
        Self {
            enable: false,
            cycles: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepaliveConfig {
    pub enable: bool,
    #[serde(rename = "targetHost")]
    pub host: String,
    #[serde(rename = "intervalSec")]
    pub interval_sec: u32,
    #[serde(default)]
    pub reboot: RebootHint,
}

/// Persisted configuration for the single supported modem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub id: u32,
    pub enable: bool,
    #[serde(rename = "pdpContext")]
    pub pdp: PdpConfig,
    #[serde(rename = "pinCode", default)]
    pub pin: String,
    pub keepalive: KeepaliveConfig,
    #[serde(rename = "logPeriodSec", default = "default_log_period")]
    pub log_period_sec: u64,
}

fn default_log_period() -> u64 {
    60
}

impl Config {
    /// Validate and normalize a `PUT` body. Unknown keys are
    /// stripped automatically by `serde`'s default "ignore unknown field"
    /// behavior; everything else is checked here.
    pub fn validate(mut self) -> Result<Self, SchemaError> {
        if !(self.pin.is_empty()
            || (self.pin.len() == 4 && self.pin.chars().all(|c| c.is_ascii_digit())))
        {
            return Err(SchemaError::InvalidPin);
        }

        if self.pdp.is_static {
            // A static PDP context always rides on the first context slot.
            self.pdp.id = 1;
        }
        if self.pdp.id < 1 {
            return Err(SchemaError::InvalidPdpId);
        }
        self.pdp.primary.validate()?;
        if let Some(secondary) = &self.pdp.secondary {
            secondary.validate()?;
        }

        let interval = self.keepalive.interval_sec;
        if interval != 0 && !(60..=86399).contains(&interval) {
            return Err(SchemaError::InvalidKeepaliveInterval);
        }

        if self.keepalive.reboot.enable && !(1..=48).contains(&self.keepalive.reboot.cycles) {
            return Err(SchemaError::InvalidRebootCycles);
        }

        self.id = 1;
        Ok(self)
    }

    /// Load a previously-persisted configuration file, if any.
    pub fn load(path: &Path) -> std::io::Result<Option<Self>> {
        match std::fs::read(path) {
            Ok(bytes) => {
                let cfg: Config = serde_json::from_slice(&bytes)?;
                Ok(Some(cfg))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Persist atomically: write to a sibling temp file, then rename over
    /// the target so a crash mid-write never leaves a truncated config.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            id: 0,
            enable: true,
            pdp: PdpConfig {
                is_static: true,
                id: 1,
                retry_timeout_sec: 120,
                primary: ApnProfile {
                    apn: "internet".into(),
                    pdp_type: PdpType::Ipv4v6,
                    auth: Auth::default(),
                },
                secondary: None,
            },
            pin: String::new(),
            keepalive: KeepaliveConfig {
                enable: false,
                host: String::new(),
                interval_sec: 0,
                reboot: RebootHint::default(),
            },
            log_period_sec: 60,
        }
    }

    #[test]
    fn accepts_empty_pin() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn accepts_four_digit_pin() {
        let mut cfg = base_config();
        cfg.pin = "1234".into();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_short_pin() {
        let mut cfg = base_config();
        cfg.pin = "123".into();
        assert_eq!(cfg.validate().unwrap_err(), SchemaError::InvalidPin);
    }

    #[test]
    fn rejects_non_numeric_pin() {
        let mut cfg = base_config();
        cfg.pin = "12ab".into();
        assert_eq!(cfg.validate().unwrap_err(), SchemaError::InvalidPin);
    }

    #[test]
    fn rejects_pdp_id_zero() {
        let mut cfg = base_config();
        cfg.pdp.id = 0;
        cfg.pdp.is_static = false;
        assert_eq!(cfg.validate().unwrap_err(), SchemaError::InvalidPdpId);
    }

    #[test]
    fn static_pdp_context_always_normalizes_to_id_one() {
        let mut cfg = base_config();
        cfg.pdp.is_static = true;
        cfg.pdp.id = 7;
        let validated = cfg.validate().unwrap();
        assert_eq!(validated.pdp.id, 1);
    }

    #[test]
    fn rejects_keepalive_interval_below_60() {
        let mut cfg = base_config();
        cfg.keepalive.interval_sec = 30;
        assert_eq!(
            cfg.validate().unwrap_err(),
            SchemaError::InvalidKeepaliveInterval
        );
    }

    #[test]
    fn accepts_keepalive_interval_zero_meaning_disabled() {
        let mut cfg = base_config();
        cfg.keepalive.interval_sec = 0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn accepts_keepalive_interval_upper_boundary() {
        let mut cfg = base_config();
        cfg.keepalive.interval_sec = 86399;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_keepalive_interval_past_upper_boundary() {
        let mut cfg = base_config();
        cfg.keepalive.interval_sec = 86400;
        assert_eq!(
            cfg.validate().unwrap_err(),
            SchemaError::InvalidKeepaliveInterval
        );
    }

    #[test]
    fn rejects_reboot_cycles_out_of_range_when_enabled() {
        let mut cfg = base_config();
        cfg.keepalive.reboot = RebootHint {
            enable: true,
            cycles: 49,
        };
        assert_eq!(
            cfg.validate().unwrap_err(),
            SchemaError::InvalidRebootCycles
        );
    }

    #[test]
    fn round_trips_through_json() {
        let cfg = base_config().validate().unwrap();
        let bytes = serde_json::to_vec(&cfg).unwrap();
        let back: Config = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cellular.json");
        let cfg = base_config().validate().unwrap();
        cfg.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap().unwrap();
        assert_eq!(cfg, loaded);
    }

    #[test]
    fn load_missing_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        assert!(Config::load(&path).unwrap().is_none());
    }
}
