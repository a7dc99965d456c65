//! Keep-alive probing for a connected session: poll
//! `status()` every `keepalive.intervalSec`, and when keepalive is
//! enabled, additionally require at least one of three ICMP echoes to
//! succeed.

use std::time::Duration;

use super::{ping_once, Manager};
use crate::config::KeepaliveConfig;
use crate::error::ModemCtlError;
use crate::event_log::Event;
use crate::modem_control::ProcessRunner;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
const ECHO_TIMEOUT_SEC: u64 = 5;
const PROBE_GUARD: Duration = Duration::from_secs(25);

pub enum Outcome {
    Disconnected,
    Cancelled,
    Helper(ModemCtlError),
}

/// Runs until the session is found dead or the Manager is cancelled.
pub async fn run<R: ProcessRunner>(
    manager: &Manager<R>,
    cfg: &KeepaliveConfig,
    interface: &str,
) -> Outcome {
    let interval = if cfg.interval_sec > 0 {
        Duration::from_secs(cfg.interval_sec as u64)
    } else {
        DEFAULT_INTERVAL
    };

    loop {
        if manager.sleep_cancellable(interval).await.is_err() {
            return Outcome::Cancelled;
        }

        match manager.modem.status().await {
            Ok(true) => {}
            Ok(false) => {
                manager.events.log(Event::CellularDisconnect);
                return Outcome::Disconnected;
            }
            Err(ModemCtlError::StopRequested) => return Outcome::Cancelled,
            Err(e) if e.is_helper_error() => return Outcome::Helper(e),
            Err(_) => {}
        }

        if cfg.enable && !probe(interface, &cfg.host).await {
            manager.events.log(Event::CheckAliveFailure);
            return Outcome::Disconnected;
        }
    }
}

/// A probe fails only if all three echoes fail or error.
async fn probe(interface: &str, host: &str) -> bool {
    let attempt = async {
        for _ in 0..3 {
            if ping_once(interface, host, ECHO_TIMEOUT_SEC).await {
                return true;
            }
        }
        false
    };

    tokio::time::timeout(PROBE_GUARD, attempt)
        .await
        .unwrap_or(false)
}
