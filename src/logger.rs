//! Periodic `cellular-information` emission. Separate from
//! the [`crate::observer::Observer`] it reads from: the Observer samples
//! on its own ~30s cadence, while the Logger reports on the
//! operator-configured `logPeriodSec`, deferring its next check by 10s
//! whenever no snapshot is available yet rather than failing or busy
//! spinning.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::event_log::{Event, EventLog};
use crate::observer::CellularSnapshot;

const NO_SNAPSHOT_RETRY: Duration = Duration::from_secs(10);

/// Shared, hot-updatable `logPeriodSec`, so a `PUT` that only changes the
/// log period doesn't require tearing down the logger task.
pub type SharedPeriod = Arc<AtomicU64>;

pub fn shared_period(initial_sec: u64) -> SharedPeriod {
    Arc::new(AtomicU64::new(initial_sec))
}

/// Current source of radio snapshots, swapped by the
/// [`crate::facade::Facade`] whenever the Manager (and its Observer) is
/// recreated. `None` models "no snapshot yet".
pub type SnapshotSource = Arc<tokio::sync::RwLock<Option<watch::Receiver<CellularSnapshot>>>>;

pub fn new_snapshot_source() -> SnapshotSource {
    Arc::new(tokio::sync::RwLock::new(None))
}

/// Spawns the logger loop, returning its join handle so the caller can
/// await it after cancellation.
pub fn spawn(
    source: SnapshotSource,
    events: Arc<dyn EventLog + Send + Sync>,
    period: SharedPeriod,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let snapshot = source.read().await.as_ref().map(|rx| rx.borrow().clone());

            match snapshot {
                Some(snapshot) => {
                    events.log(Event::CellularInformation {
                        mode: snapshot.mode,
                        dbm: snapshot.signal_rssi_dbm,
                        lac: snapshot.lac.clone(),
                        cell_id: snapshot.cell_id.clone(),
                    });

                    let sleep_for = Duration::from_secs(period.load(Ordering::Relaxed).max(1));
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(sleep_for) => {}
                    }
                }
                None => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(NO_SNAPSHOT_RETRY) => {}
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingEventLog(StdMutex<Vec<Event>>);

    impl EventLog for RecordingEventLog {
        fn log(&self, event: Event) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn defers_ten_seconds_when_no_snapshot_yet() {
        let source = new_snapshot_source();
        let events: Arc<RecordingEventLog> = Arc::new(RecordingEventLog::default());
        let cancel = CancellationToken::new();

        let handle = spawn(source.clone(), events.clone(), shared_period(60), cancel.clone());

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(events.0.lock().unwrap().is_empty());

        cancel.cancel();
        let _ = handle.await;
    }

    #[tokio::test(start_paused = true)]
    async fn logs_once_snapshot_available() {
        let source = new_snapshot_source();
        let events: Arc<RecordingEventLog> = Arc::new(RecordingEventLog::default());
        let cancel = CancellationToken::new();

        let (tx, rx) = watch::channel(CellularSnapshot {
            mode: crate::modem_control::SignalMode::Lte,
            signal_csq: 20,
            signal_rssi_dbm: -70,
            signal_ecio_dbm: 0,
            operator: "Carrier".into(),
            lac: "1".into(),
            tac: "n/a".into(),
            cell_id: "2".into(),
            bid: "n/a".into(),
            nid: "n/a".into(),
        });
        *source.write().await = Some(rx);
        drop(tx);

        let handle = spawn(source, events.clone(), shared_period(60), cancel.clone());
        tokio::time::advance(Duration::from_millis(50)).await;

        assert_eq!(events.0.lock().unwrap().len(), 1);

        cancel.cancel();
        let _ = handle.await;
    }
}
