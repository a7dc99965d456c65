//! Message-bus front end: exposes `GET /network/cellulars`,
//! `GET /network/cellulars/:id`, `PUT /network/cellulars/:id` as D-Bus
//! methods over `zbus`, and publishes `/network/interfaces/<name>` as a
//! signal whenever the Facade observes a connect or disconnect. The
//! transport itself is an external collaborator; this module
//! is purely the thin adapter between it and [`crate::facade::Facade`].

use std::sync::Arc;

use serde::Serialize;
use zbus::{fdo, interface, zvariant::Type, Connection};

use crate::config::Config;
use crate::facade::{Facade, InterfaceEventPublisher};
use crate::modem_control::NetworkInfo;

pub const SERVICE_NAME: &str = "com.moxa.cellular1";
pub const OBJECT_PATH: &str = "/network/cellulars";
const INTERFACE_EVENT_PATH: &str = "/network/interfaces";
const INTERFACE_EVENT_NAME: &str = "com.moxa.network1.InterfaceChanged";

/// Payload of the `/network/interfaces/<name>` signal.
#[derive(Debug, Clone, Serialize, Type)]
pub struct InterfaceChangedPayload {
    pub name: String,
    pub ip: String,
    pub netmask: String,
    pub gateway: String,
    pub dns: Vec<String>,
}

impl From<(&str, NetworkInfo)> for InterfaceChangedPayload {
    fn from((name, info): (&str, NetworkInfo)) -> Self {
        Self {
            name: name.to_string(),
            ip: info.ip,
            netmask: info.netmask,
            gateway: info.gateway,
            dns: info.dns,
        }
    }
}

/// D-Bus object backing [`OBJECT_PATH`]; every method forwards straight
/// into the Facade and serializes its typed result/error as JSON, since
/// the wire schema is itself JSON-shaped and the transport is
/// explicitly out of scope.
pub struct CellularService {
    facade: Arc<Facade>,
}

impl CellularService {
    pub fn new(facade: Arc<Facade>) -> Self {
        Self { facade }
    }
}

#[interface(name = "com.moxa.network1.Cellular")]
impl CellularService {
    /// `GET /network/cellulars`.
    async fn get_cellulars(&self) -> String {
        let records = self.facade.list().await;
        serde_json::to_string(&records).unwrap_or_else(|_| "[]".to_string())
    }

    /// `GET /network/cellulars/:id`.
    async fn get_cellular(&self, id: u32) -> fdo::Result<String> {
        self.facade
            .get(id)
            .await
            .map(|record| serde_json::to_string(&record).unwrap_or_default())
            .map_err(|e| fdo::Error::Failed(e.to_string()))
    }

    /// `PUT /network/cellulars/:id`: `body` is the raw JSON request body;
    /// unknown keys are stripped by `serde`, the rest validated by
    /// [`Config::validate`].
    async fn put_cellular(&self, id: u32, body: String) -> fdo::Result<String> {
        let parsed: Config = serde_json::from_str(&body)
            .map_err(|e| fdo::Error::Failed(format!("invalid request body: {e}")))?;

        self.facade
            .put(id, parsed)
            .await
            .map(|record| serde_json::to_string(&record).unwrap_or_default())
            .map_err(|e| fdo::Error::Failed(e.to_string()))
    }
}

/// Builds the [`InterfaceEventPublisher`] the Facade invokes on every
/// connect/disconnect, emitting it as a plain (non-interface-bound)
/// signal on the connection so each interface name gets its own
/// effective sub-path without needing a registered object per modem.
pub fn interface_event_publisher(connection: Connection) -> InterfaceEventPublisher {
    Arc::new(move |name: &str, info: NetworkInfo| {
        let connection = connection.clone();
        let payload = InterfaceChangedPayload::from((name, info));
        let path = format!("{INTERFACE_EVENT_PATH}/{name}");
        tokio::spawn(async move {
            let object_path = match zbus::zvariant::ObjectPath::try_from(path.as_str()) {
                Ok(p) => p,
                Err(e) => {
                    log::warn!("invalid interface-event path {path}: {e}");
                    return;
                }
            };
            if let Err(e) = connection
                .emit_signal(
                    None::<&str>,
                    &object_path,
                    INTERFACE_EVENT_NAME,
                    "Changed",
                    &payload,
                )
                .await
            {
                log::warn!("failed to emit interface-changed signal for {path}: {e}");
            }
        });
    })
}

/// Registers [`CellularService`] on `connection` at [`OBJECT_PATH`] and
/// requests [`SERVICE_NAME`].
pub async fn serve(connection: &Connection, facade: Arc<Facade>) -> zbus::Result<()> {
    connection
        .object_server()
        .at(OBJECT_PATH, CellularService::new(facade))
        .await?;
    connection.request_name(SERVICE_NAME).await?;
    Ok(())
}
