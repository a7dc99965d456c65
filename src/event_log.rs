//! Fixed-vocabulary event log. Every state transition the
//! manager cares about is emitted through here as a single `log::info!`
//! line rather than scattered ad-hoc logging, so the vocabulary stays
//! closed and greppable.

use crate::modem_control::{NetworkInfo, SignalMode};

/// One of the closed set of events the manager can raise.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    NoSim,
    NoPin,
    PinError,
    NoApn,
    NoPdpContext,
    ConnectBegin,
    ConnectSuccess(NetworkInfo),
    ConnectFailure,
    CellularDisconnect,
    CheckAliveFailure,
    PowerCycle,
    CellularInformation {
        mode: SignalMode,
        dbm: i32,
        lac: String,
        cell_id: String,
    },
}

impl Event {
    /// RSSI index (0-31 scale) derived from dBm for the
    /// `cellular-information` log line only; never stored or reused for
    /// policy decisions.
    fn rssi_from_dbm(dbm: i32) -> i32 {
        if dbm == 0 || dbm < -110 {
            return 0;
        }
        ((dbm + 109) as f64 * 0.5 + 2.0) as i32
    }
}

/// Emits [`Event`]s as structured `log` records. A trait rather than a
/// bare function so the manager can hold it as `&dyn EventLog` in tests
/// without pulling in a mocking crate.
pub trait EventLog {
    fn log(&self, event: Event);
}

/// Logs through the `log` facade (spec §4.7: "the event log is a log").
pub struct StdEventLog;

impl EventLog for StdEventLog {
    fn log(&self, event: Event) {
        match event {
            Event::NoSim => log::info!("no-sim"),
            Event::NoPin => log::info!("no-pin"),
            Event::PinError => log::warn!("pin-error"),
            Event::NoApn => log::warn!("no-apn"),
            Event::NoPdpContext => log::warn!("no-pdp-context"),
            Event::ConnectBegin => log::info!("connect-begin"),
            Event::ConnectSuccess(info) => log::info!(
                "connect-success ip={} netmask={} gateway={} dns={:?}",
                info.ip,
                info.netmask,
                info.gateway,
                info.dns
            ),
            Event::ConnectFailure => log::warn!("connect-failure"),
            Event::CellularDisconnect => log::warn!("cellular-disconnect"),
            Event::CheckAliveFailure => log::warn!("checkalive-failure"),
            Event::PowerCycle => log::warn!("power-cycle"),
            Event::CellularInformation {
                mode,
                dbm,
                lac,
                cell_id,
            } => log::info!(
                "mode {}, signal {} dBm, rssi {}, lac {}, cell_id {}",
                mode.as_str(),
                dbm,
                Event::rssi_from_dbm(dbm),
                lac,
                cell_id
            ),
        }
    }
}
