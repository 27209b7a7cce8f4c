//! The boundary between the queue and the platform Bluetooth stack.

use crate::error::AttError;
use crate::request::Request;
use crate::{AttributeId, DeviceId, Result};

/// Submits GATT operations to the physical link.
///
/// `execute` reports only whether the platform accepted the operation. The outcome
/// arrives later, out of band, through a [`TransportEvents`] sink.
pub trait Transport: Send {
    fn execute(&self, request: &Request) -> Result<()>;
}

impl<F> Transport for F
where
    F: Fn(&Request) -> Result<()> + Send,
{
    fn execute(&self, request: &Request) -> Result<()> {
        self(request)
    }
}

/// Receives the asynchronous callbacks of the platform GATT client.
///
/// None of the methods carry a request identifier: a confirmation or failure always
/// belongs to the single in-flight request of that device's link.
pub trait TransportEvents {
    /// The in-flight operation completed. `value` holds the bytes read, if any.
    fn on_operation_confirmed(&self, device: &DeviceId, value: Option<Vec<u8>>);

    /// The in-flight operation completed with an error status.
    fn on_operation_failed(&self, device: &DeviceId, status: Option<AttError>);

    /// The link was lost; everything pending for the device is discarded.
    fn on_link_lost(&self, device: &DeviceId);

    /// The remote device sent a notification or indication.
    fn on_value_changed(&self, device: &DeviceId, attribute: AttributeId, value: Vec<u8>);
}
