//! Typed values parsed out of `modem_ctl` output.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtStatus {
    Ok,
    Err,
    CmeErr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtResponse {
    pub status: AtStatus,
    pub info: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub status: LinkStatus,
    pub ip: String,
    pub netmask: String,
    pub gateway: String,
    pub dns: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkStatus {
    #[default]
    Down,
    Up,
}

impl NetworkInfo {
    pub fn down() -> Self {
        Self {
            status: LinkStatus::Down,
            ip: String::new(),
            netmask: String::new(),
            gateway: String::new(),
            dns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticInfo {
    pub iccid: String,
    pub imsi: String,
    pub imei: String,
    pub pin_retry_remain: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Signal {
    pub mode: SignalMode,
    pub rssi_dbm: i32,
    pub ecio_dbm: i32,
    pub csq: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalMode {
    NotAvailable,
    Gsm,
    Umts,
    Lte,
    Other,
}

impl Default for SignalMode {
    fn default() -> Self {
        Self::NotAvailable
    }
}

impl SignalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotAvailable => "n/a",
            Self::Gsm => "gsm",
            Self::Umts => "umts",
            Self::Lte => "lte",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "gsm" => Self::Gsm,
            "umts" => Self::Umts,
            "lte" => Self::Lte,
            "n/a" => Self::NotAvailable,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleInfo {
    pub module: String,
    pub wwan_node: String,
    pub lac: String,
    pub cell_id: String,
    pub icc_id: String,
    pub imei: String,
    pub qmi_port: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimStatus {
    NoSim,
    Pin,
    Ready,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleIds {
    pub imei: String,
    pub esn: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimInfo {
    pub iccid: String,
    pub imsi: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub cell_id: String,
    pub lac: String,
    pub tac: String,
    pub bid: String,
    pub nid: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdpContextEntry {
    pub id: u32,
    pub pdp_type: crate::config::PdpType,
    pub apn: String,
}
