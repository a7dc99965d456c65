//! GET response record shape. Built fresh on every request
//! from the Facade's held config plus the Manager's and UsageCounter's
//! last-known state — never cached.

use serde::Serialize;

use crate::config::Config;
use crate::manager::{ManagerStatus, ModemState};
use crate::observer::CellularSnapshot;
use crate::usage_counter::Usage;

const NOT_AVAILABLE: &str = "n/a";

#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    pub txkbyte: i64,
    pub rxkbyte: i64,
}

/// One composite record describing the single supported modem.
#[derive(Debug, Clone, Serialize)]
pub struct CellularRecord {
    pub id: u32,
    pub name: String,
    pub mode: String,
    pub signal: i32,
    #[serde(rename = "operatorName")]
    pub operator_name: String,
    pub lac: String,
    #[serde(rename = "cellId")]
    pub cell_id: String,
    #[serde(rename = "iccId")]
    pub icc_id: String,
    pub imei: String,
    #[serde(rename = "pinRetryRemain")]
    pub pin_retry_remain: i32,
    pub status: String,
    pub ip: String,
    pub netmask: String,
    pub gateway: String,
    pub dns: Vec<String>,
    pub usage: UsageRecord,
    pub enable: bool,
    #[serde(rename = "pdpContext")]
    pub pdp_context: crate::config::PdpConfig,
    #[serde(rename = "pinCode")]
    pub pin_code: String,
    pub keepalive: crate::config::KeepaliveConfig,
}

/// Builds the record for a modem that was never detected: empty/`n/a`
/// fields throughout, since the facade serves an empty list until one
/// is found.
pub fn placeholder(config: &Config) -> CellularRecord {
    build(config, None, None, None)
}

/// Builds the record from the Manager's latest status, the Observer's
/// latest radio snapshot, and the UsageCounter's latest reading (any may
/// be absent: before init completes, before the first sample, or when a
/// usage read failed, respectively).
pub fn build(
    config: &Config,
    status: Option<&ManagerStatus>,
    radio: Option<&CellularSnapshot>,
    usage: Option<Usage>,
) -> CellularRecord {
    let snapshot = status;

    CellularRecord {
        id: 1,
        name: "cellular1".to_string(),
        mode: radio
            .map(|r| r.mode.as_str().to_string())
            .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        signal: radio.map(|r| r.signal_rssi_dbm).unwrap_or(0),
        operator_name: radio
            .map(|r| r.operator.clone())
            .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        lac: radio
            .map(|r| r.lac.clone())
            .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        cell_id: radio
            .map(|r| r.cell_id.clone())
            .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        icc_id: snapshot
            .map(|s| s.static_info.iccid.clone())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        imei: snapshot
            .map(|s| s.static_info.imei.clone())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        pin_retry_remain: snapshot.map(|s| s.static_info.pin_retry_remain).unwrap_or(-1),
        status: snapshot
            .map(|s| state_string(s.state))
            .unwrap_or_else(|| state_string(ModemState::Initializing))
            .to_string(),
        ip: non_empty_or_na(snapshot.map(|s| s.network_info.ip.clone()).unwrap_or_default()),
        netmask: non_empty_or_na(
            snapshot
                .map(|s| s.network_info.netmask.clone())
                .unwrap_or_default(),
        ),
        gateway: non_empty_or_na(
            snapshot
                .map(|s| s.network_info.gateway.clone())
                .unwrap_or_default(),
        ),
        dns: snapshot.map(|s| s.network_info.dns.clone()).unwrap_or_default(),
        usage: usage
            .map(|u| UsageRecord {
                txkbyte: u.tx_kbyte,
                rxkbyte: u.rx_kbyte,
            })
            .unwrap_or(UsageRecord {
                txkbyte: -1,
                rxkbyte: -1,
            }),
        enable: config.enable,
        pdp_context: config.pdp.clone(),
        pin_code: config.pin.clone(),
        keepalive: config.keepalive.clone(),
    }
}

/// Renders an unknown/empty network-info field as `"n/a"` (spec §6
/// record shape), matching `examples/original_source/index.py`'s
/// `_get()` (`"ip": "n/a" if ninfo is None else ninfo.ip`).
fn non_empty_or_na(s: String) -> String {
    if s.is_empty() {
        NOT_AVAILABLE.to_string()
    } else {
        s
    }
}

fn state_string(state: ModemState) -> &'static str {
    match state {
        ModemState::Initializing => "initializing",
        ModemState::NoSim => "nosim",
        ModemState::Pin => "pin",
        ModemState::PinError => "pinError",
        ModemState::Ready => "ready",
        ModemState::ServiceSearching => "serviceSearching",
        ModemState::ServiceAttached => "serviceAttached",
        ModemState::Connecting => "connecting",
        ModemState::ConnectFailure => "connectFailure",
        ModemState::Connected => "connected",
        ModemState::PowerCycle => "powerCycle",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApnProfile, Auth, KeepaliveConfig, PdpConfig, PdpType, RebootHint};

    fn test_config() -> Config {
        Config {
            id: 1,
            enable: true,
            pdp: PdpConfig {
                is_static: false,
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
    fn placeholder_reports_na_network_fields_not_empty_strings() {
        let record = placeholder(&test_config());
        assert_eq!(record.ip, "n/a");
        assert_eq!(record.netmask, "n/a");
        assert_eq!(record.gateway, "n/a");
        assert_eq!(record.dns, Vec::<String>::new());
    }

    #[test]
    fn down_network_info_renders_as_na_not_empty_strings() {
        let config = test_config();
        let status = ManagerStatus {
            state: ModemState::Connecting,
            network_info: crate::modem_control::NetworkInfo::down(),
            static_info: Default::default(),
        };
        let record = build(&config, Some(&status), None, None);
        assert_eq!(record.ip, "n/a");
        assert_eq!(record.netmask, "n/a");
        assert_eq!(record.gateway, "n/a");
    }
}
