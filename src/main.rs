//! `cellmond`: wires the library's components behind a CLI and a
//! message-bus front end, and blocks until a termination signal arrives.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use zbus::Connection;

use cellmon_core::bus;
use cellmon_core::config::Config;
use cellmon_core::event_log::StdEventLog;
use cellmon_core::facade::Facade;
use cellmon_core::modem_control::ModemControl;

/// Supervisory daemon for a single cellular WWAN data connection.
#[derive(Parser, Debug)]
#[command(name = "cellmond", about = "Cellular connection supervisor")]
struct Args {
    /// Path to the persisted configuration file.
    #[arg(long, default_value = "/etc/cellmond/cellular.json")]
    config: PathBuf,

    /// Path to the `modem_ctl` helper executable.
    #[arg(long, default_value = "/usr/sbin/modem_ctl")]
    modem_ctl: PathBuf,

    /// Byte-counter executable used by the usage counter.
    #[arg(long, default_value = "vnstat")]
    byte_counter: String,

    /// Log verbosity.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn default_config() -> Config {
    serde_json::from_value(serde_json::json!({
        "id": 1,
        "enable": false,
        "pdpContext": {
            "static": true,
            "id": 1,
            "retryTimeout": 120,
            "primary": { "apn": "internet", "type": "ipv4v6" },
        },
        "pinCode": "",
        "keepalive": {
            "enable": false,
            "targetHost": "8.8.8.8",
            "intervalSec": 0,
        },
        "logPeriodSec": 60,
    }))
    .expect("default configuration is always well-formed")
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    let config = match Config::load(&args.config) {
        Ok(Some(cfg)) => cfg,
        Ok(None) => {
            log::info!("no persisted configuration at {:?}, using defaults", args.config);
            default_config()
        }
        Err(e) => {
            log::error!("failed to load configuration: {e}, using defaults");
            default_config()
        }
    };

    let modem = Arc::new(ModemControl::new(args.modem_ctl.to_string_lossy().to_string()));
    let events = Arc::new(StdEventLog);

    let connection = match Connection::system().await {
        Ok(c) => c,
        Err(e) => {
            log::error!("failed to connect to the system bus: {e}");
            std::process::exit(1);
        }
    };

    let publish_interface = bus::interface_event_publisher(connection.clone());

    let facade = Facade::new(
        args.config.clone(),
        config,
        modem,
        events,
        args.byte_counter,
        publish_interface,
    );

    if let Err(e) = bus::serve(&connection, facade.clone()).await {
        log::error!("failed to register cellular service on the bus: {e}");
        std::process::exit(1);
    }

    facade.init().await;

    log::info!("cellmond ready");

    match tokio::signal::ctrl_c().await {
        Ok(()) => log::info!("received termination signal, shutting down"),
        Err(e) => log::error!("failed to install signal handler: {e}"),
    }

    facade.shutdown().await;
}
