//! Holds the persisted configuration, orchestrates Observer + Manager +
//! UsageCounter for the single supported modem, and exposes the
//! read/update surface the message bus calls into.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::SchemaError;
use crate::event_log::EventLog;
use crate::logger;
use crate::manager::{Manager, ManagerStatus};
use crate::modem_control::{ModemControl, NetworkInfo, SystemRunner};
use crate::observer;
use crate::record::{self, CellularRecord};
use crate::usage_counter::UsageCounter;

const DETECT_MAX_ATTEMPTS: u32 = 3;
const DETECT_POWER_CYCLE_TIMEOUT_SEC: u64 = 60;

/// Invoked with the learned interface name whenever the Manager observes
/// a connect or disconnect, so the caller can publish the outbound
/// `/network/interfaces/<name>` event.
pub type InterfaceEventPublisher = Arc<dyn Fn(&str, NetworkInfo) + Send + Sync>;

struct Running {
    manager: Arc<Manager<SystemRunner>>,
    cancel: CancellationToken,
    manager_task: tokio::task::JoinHandle<()>,
    observer_task: tokio::task::JoinHandle<()>,
    logger_task: tokio::task::JoinHandle<()>,
    status_rx: tokio::sync::watch::Receiver<ManagerStatus>,
}

struct Inner {
    config: Config,
    dev_name: Option<String>,
    usage_counter: Option<UsageCounter>,
    running: Option<Running>,
}

/// Top-level orchestrator. One instance per process; holds
/// the only `Arc<ModemControl>` and hands it to successive Managers.
pub struct Facade {
    config_path: PathBuf,
    modem: Arc<ModemControl<SystemRunner>>,
    events: Arc<dyn EventLog + Send + Sync>,
    byte_counter_exe: String,
    publish_interface: InterfaceEventPublisher,
    radio: logger::SnapshotSource,
    log_period: logger::SharedPeriod,
    inner: RwLock<Inner>,
}

impl Facade {
    pub fn new(
        config_path: PathBuf,
        config: Config,
        modem: Arc<ModemControl<SystemRunner>>,
        events: Arc<dyn EventLog + Send + Sync>,
        byte_counter_exe: impl Into<String>,
        publish_interface: InterfaceEventPublisher,
    ) -> Arc<Self> {
        let log_period = logger::shared_period(config.log_period_sec.max(1));
        Arc::new(Self {
            config_path,
            modem,
            events,
            byte_counter_exe: byte_counter_exe.into(),
            publish_interface,
            radio: logger::new_snapshot_source(),
            log_period,
            inner: RwLock::new(Inner {
                config,
                dev_name: None,
                usage_counter: None,
                running: None,
            }),
        })
    }

    /// Detects the modem (up to 3 `mInfo` attempts, power-cycling between
    /// attempts but never after the last one), then starts the Manager if
    /// a device was found. Leaves the Facade serving an empty list
    /// otherwise, still accepting `PUT`s for later recovery.
    pub async fn init(self: &Arc<Self>) {
        let dev_name = self.detect_device().await;

        if let Some(name) = dev_name {
            log::info!("detected cellular interface {name}");
            let mut inner = self.inner.write().await;
            inner.dev_name = Some(name.clone());
            inner.usage_counter = Some(UsageCounter::with_exe(self.byte_counter_exe.clone(), name));
            drop(inner);
            self.start_manager().await;
        } else {
            log::warn!("no cellular modem detected after {DETECT_MAX_ATTEMPTS} attempts");
        }
    }

    async fn detect_device(&self) -> Option<String> {
        for attempt in 0..DETECT_MAX_ATTEMPTS {
            match self.modem.m_info().await {
                Ok(info) => return Some(info.wwan_node),
                Err(e) => {
                    log::warn!("modem detection attempt {} failed: {e}", attempt + 1);
                    if attempt + 1 < DETECT_MAX_ATTEMPTS {
                        let _ = self
                            .modem
                            .power_cycle(Some(DETECT_POWER_CYCLE_TIMEOUT_SEC))
                            .await;
                    }
                }
            }
        }
        None
    }

    async fn start_manager(self: &Arc<Self>) {
        let (interface, config) = {
            let inner = self.inner.read().await;
            (inner.dev_name.clone(), inner.config.clone())
        };
        let Some(interface) = interface else {
            return;
        };

        self.log_period.store(config.log_period_sec.max(1), std::sync::atomic::Ordering::Relaxed);

        let publish = self.publish_interface.clone();
        let cb_interface = interface.clone();
        let on_network_info: Arc<dyn Fn(NetworkInfo) + Send + Sync> =
            Arc::new(move |info| (publish)(&cb_interface, info));

        let (manager, status_rx) = Manager::new(
            self.modem.clone(),
            self.events.clone(),
            config,
            interface,
            on_network_info,
        );

        let cancel = CancellationToken::new();
        let (observer, observer_join) = observer::spawn(self.modem.clone(), cancel.clone());
        *self.radio.write().await = Some(observer.snapshot_receiver());

        let logger_task = logger::spawn(
            self.radio.clone(),
            self.events.clone(),
            self.log_period.clone(),
            cancel.clone(),
        );

        let manager_for_run = manager.clone();
        let manager_task = tokio::spawn(async move { manager_for_run.run().await });

        let mut inner = self.inner.write().await;
        inner.running = Some(Running {
            manager,
            cancel,
            manager_task,
            observer_task: observer_join,
            logger_task,
            status_rx,
        });
    }

    /// Cooperative shutdown of the running Manager plus its Observer and
    /// Logger: the Manager's own `request_stop` drives it through
    /// `clean_stop`, while the Facade's own token tears down the two
    /// workers the Manager doesn't own directly.
    async fn stop_manager(&self) {
        let running = {
            let mut inner = self.inner.write().await;
            inner.running.take()
        };
        let Some(running) = running else { return };

        running.manager.request_stop();
        running.cancel.cancel();
        let _ = running.manager_task.await;
        let _ = running.observer_task.await;
        let _ = running.logger_task.await;
        *self.radio.write().await = None;
    }

    /// `GET /network/cellulars`: empty before detection
    /// completes or when no modem was found.
    pub async fn list(&self) -> Vec<CellularRecord> {
        let inner = self.inner.read().await;
        if inner.dev_name.is_none() {
            return Vec::new();
        }
        vec![self.build_record(&inner).await]
    }

    /// `GET /network/cellulars/:id`: `400 no such resource` only for an
    /// id other than `1`; like `put`, an undetected modem still serves a
    /// placeholder record rather than an error.
    pub async fn get(&self, id: u32) -> Result<CellularRecord, SchemaError> {
        if id != 1 {
            return Err(SchemaError::NoSuchResource);
        }
        let inner = self.inner.read().await;
        if inner.dev_name.is_none() {
            return Ok(record::placeholder(&inner.config));
        }
        Ok(self.build_record(&inner).await)
    }

    /// `PUT /network/cellulars/:id`: validate, persist, and
    /// recreate the Manager from scratch (never reused across a config
    /// change).
    pub async fn put(self: &Arc<Self>, id: u32, body: Config) -> Result<CellularRecord, SchemaError> {
        if id != 1 {
            return Err(SchemaError::NoSuchResource);
        }
        let config = body.validate()?;

        self.stop_manager().await;

        {
            let mut inner = self.inner.write().await;
            inner.config = config.clone();
        }

        if let Err(e) = config.save(&self.config_path) {
            log::error!("failed to persist configuration: {e}");
        }

        self.start_manager().await;

        let inner = self.inner.read().await;
        if inner.dev_name.is_none() {
            return Ok(record::placeholder(&inner.config));
        }
        Ok(self.build_record(&inner).await)
    }

    async fn build_record(&self, inner: &Inner) -> CellularRecord {
        let status = match &inner.running {
            Some(r) => Some(r.status_rx.borrow().clone()),
            None => None,
        };
        let radio = self.radio.read().await.as_ref().map(|rx| rx.borrow().clone());

        let usage = match &inner.usage_counter {
            Some(uc) => {
                let _ = uc.update().await;
                uc.usage().await.ok()
            }
            None => None,
        };

        record::build(&inner.config, status.as_ref(), radio.as_ref(), usage)
    }

    pub async fn shutdown(&self) {
        self.stop_manager().await;
    }
}
