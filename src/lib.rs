//! Core of the cellular connection supervisor: modem control, the
//! connection-management state machine, observation/logging loops, and the
//! configuration surface. The binary in `src/main.rs` wires these together
//! behind a message-bus front end; everything here is usable on its own for
//! testing.
#![allow(async_fn_in_trait)]

pub mod bus;
pub mod config;
pub mod error;
pub mod event_log;
pub mod facade;
pub mod logger;
pub mod manager;
pub mod modem_control;
pub mod observer;
pub mod record;
pub mod usage_counter;

pub use config::Config;
