//! Serialized GATT request queue for BLE client links.
//!
//! The Android Bluetooth stack (like most others) can only process one outstanding GATT
//! operation per connection, and its callbacks do not say which request they answer.
//! This crate keeps one FIFO queue per device, sends at most one request at a time,
//! waits for the platform's confirmation, and retries on failure or timeout until the
//! request's retry budget runs out.
//!
//! The platform itself stays outside: implement [`Transport`] to submit operations and
//! forward the platform callbacks to a [`SchedulerHandle`] through [`TransportEvents`].
//!
//! ```no_run
//! use gatt_queue::{Request, Result, SchedulerConfig, SchedulerTask};
//!
//! let transport = |_request: &Request| -> Result<()> {
//!     // hand the request to the platform GATT client here
//!     Ok(())
//! };
//! let (scheduler, task) = SchedulerTask::new(transport, SchedulerConfig::default(), |failed| {
//!     eprintln!("giving up on {failed:?}");
//! });
//! task.spawn_thread().unwrap();
//! ```

pub use btuuid::BluetoothUuidExt;
pub use config::SchedulerConfig;
pub use error::{AttError, Error, ErrorKind};
pub use events::{EventReceiver, GattEvent};
pub use guard::ProtectedTransport;
pub use queue::{LinkQueue, LinkState, TickOutcome};
pub use registry::{BatteryDecoder, DecoderRegistry, ServiceDecoder};
pub use request::{Operation, Request};
pub use scheduler::{FailureCallback, SchedulerHandle, SchedulerTask};
pub use transport::{Transport, TransportEvents};

/// Convenience alias for a result with [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

pub use uuid::Uuid;
pub mod btuuid;
pub mod error;
mod types;
pub use types::*;

mod config;
mod events;
mod force;
mod guard;
mod queue;
mod registry;
mod request;
mod scheduler;
mod transport;

#[cfg(test)]
mod mock;
