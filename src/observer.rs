//! Periodic signal/operator/location sampling into a shared snapshot.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::modem_control::{ModemControl, ProcessRunner, Signal, SignalMode};

const SAMPLE_PERIOD: Duration = Duration::from_secs(30);

/// Last-writer-wins view of the modem's radio state. Readers always see
/// either the old or the new snapshot, never a torn one.
#[derive(Debug, Clone, PartialEq)]
pub struct CellularSnapshot {
    pub mode: SignalMode,
    pub signal_csq: i32,
    pub signal_rssi_dbm: i32,
    pub signal_ecio_dbm: i32,
    pub operator: String,
    pub lac: String,
    pub tac: String,
    pub cell_id: String,
    pub bid: String,
    pub nid: String,
}

impl CellularSnapshot {
    fn placeholder() -> Self {
        Self {
            mode: SignalMode::NotAvailable,
            signal_csq: 0,
            signal_rssi_dbm: 0,
            signal_ecio_dbm: 0,
            operator: "n/a".to_string(),
            lac: "n/a".to_string(),
            tac: "n/a".to_string(),
            cell_id: "n/a".to_string(),
            bid: "n/a".to_string(),
            nid: "n/a".to_string(),
        }
    }
}

/// Samples the modem every ~30s and publishes a [`CellularSnapshot`]
/// through a `tokio::sync::watch` channel. Never terminates on a helper
/// fault: a failed sample just republishes placeholders for the fields
/// that could not be read.
pub struct Observer {
    tx: watch::Sender<CellularSnapshot>,
}

impl Observer {
    pub fn snapshot_receiver(&self) -> watch::Receiver<CellularSnapshot> {
        self.tx.subscribe()
    }
}

/// Spawns the sampling loop, returning the [`Observer`] handle and the
/// task's join handle so the caller can cancel and await it (spec §5:
/// "Observer... joins in at most period_sec + 1").
pub fn spawn<R: ProcessRunner + 'static>(
    modem: Arc<ModemControl<R>>,
    cancel: CancellationToken,
) -> (Arc<Observer>, tokio::task::JoinHandle<()>) {
    let (tx, _rx) = watch::channel(CellularSnapshot::placeholder());
    let observer = Arc::new(Observer { tx });
    let loop_observer = observer.clone();

    let handle = tokio::spawn(async move {
        loop {
            let snapshot = sample(modem.as_ref()).await;
            let _ = loop_observer.tx.send(snapshot);

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(SAMPLE_PERIOD) => {}
            }
        }
    });

    (observer, handle)
}

async fn sample<R: ProcessRunner>(modem: &ModemControl<R>) -> CellularSnapshot {
    let signal = modem.signal_adv().await.unwrap_or(Signal {
        mode: SignalMode::NotAvailable,
        rssi_dbm: 0,
        ecio_dbm: 0,
        csq: 0,
    });
    let operator = modem
        .operator()
        .await
        .unwrap_or_else(|_| "n/a".to_string());
    let location = modem.location().await.unwrap_or_default();

    CellularSnapshot {
        mode: signal.mode,
        signal_csq: signal.csq,
        signal_rssi_dbm: signal.rssi_dbm,
        signal_ecio_dbm: signal.ecio_dbm,
        operator,
        lac: non_empty_or_na(location.lac),
        tac: non_empty_or_na(location.tac),
        cell_id: non_empty_or_na(location.cell_id),
        bid: non_empty_or_na(location.bid),
        nid: non_empty_or_na(location.nid),
    }
}

fn non_empty_or_na(s: String) -> String {
    if s.is_empty() {
        "n/a".to_string()
    } else {
        s
    }
}
