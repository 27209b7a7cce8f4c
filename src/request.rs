use std::panic::{catch_unwind, AssertUnwindSafe};

use log::{debug, warn};

use crate::transport::Transport;
use crate::{AttributeId, DeviceId, OperationKind};

/// Number of attempts a request gets unless configured otherwise.
pub const DEFAULT_RETRIES: u32 = 10;

/// What to do with the target attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write { value: Vec<u8>, with_response: bool },
    ReadDescriptor,
    WriteDescriptor { value: Vec<u8> },
    SetNotification { enabled: bool },
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Read => OperationKind::Read,
            Self::Write { .. } => OperationKind::Write,
            Self::ReadDescriptor => OperationKind::ReadDescriptor,
            Self::WriteDescriptor { .. } => OperationKind::WriteDescriptor,
            Self::SetNotification { .. } => OperationKind::SetNotification,
        }
    }

    /// Bytes to be written, for write operations.
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Self::Write { value, .. } | Self::WriteDescriptor { value } => Some(value),
            _ => None,
        }
    }
}

/// One queued GATT operation on one device.
///
/// Everything but the retry budget is fixed at construction; the budget only goes down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    device: DeviceId,
    attribute: AttributeId,
    operation: Operation,
    retries: u32,
    tag: Option<u64>,
}

impl Request {
    pub fn new(device: DeviceId, attribute: AttributeId, operation: Operation) -> Self {
        Self {
            device,
            attribute,
            operation,
            retries: DEFAULT_RETRIES,
            tag: None,
        }
    }

    pub fn read(device: DeviceId, attribute: AttributeId) -> Self {
        Self::new(device, attribute, Operation::Read)
    }

    pub fn write(device: DeviceId, attribute: AttributeId, value: Vec<u8>) -> Self {
        let operation = Operation::Write {
            value,
            with_response: true,
        };
        Self::new(device, attribute, operation)
    }

    pub fn set_notification(device: DeviceId, attribute: AttributeId, enabled: bool) -> Self {
        Self::new(device, attribute, Operation::SetNotification { enabled })
    }

    /// Replaces the initial retry budget.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    pub fn attribute(&self) -> AttributeId {
        self.attribute
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn kind(&self) -> OperationKind {
        self.operation.kind()
    }

    /// Remaining attempts before the request is dropped and reported.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Marks a copy scheduled on behalf of a blocking call, so it can be withdrawn later.
    pub(crate) fn tagged(mut self, tag: u64) -> Self {
        self.tag = Some(tag);
        self
    }

    pub(crate) fn tag(&self) -> Option<u64> {
        self.tag
    }

    pub(crate) fn consume_retry(&mut self) {
        self.retries = self.retries.saturating_sub(1);
    }

    /// A malformed request can never succeed and is dropped without being reported.
    pub fn is_valid(&self) -> bool {
        self.attribute.is_valid()
            && (!self.kind().needs_descriptor() || self.attribute.descriptor.is_some())
    }

    /// Hands the request to the transport. Returns whether the submission was accepted.
    ///
    /// Errors and panics raised by the transport are logged and reported as `false`.
    pub fn attempt(&self, transport: &dyn Transport) -> bool {
        match catch_unwind(AssertUnwindSafe(|| transport.execute(self))) {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(
                    "{:?} on {} ({}) was not submitted: {e}",
                    self.kind(),
                    self.attribute,
                    self.device
                );
                false
            }
            Err(_) => {
                warn!(
                    "transport panicked while submitting {:?} on {} ({})",
                    self.kind(),
                    self.attribute,
                    self.device
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, TransportError};
    use crate::Result;
    use uuid::Uuid;

    fn attr() -> AttributeId {
        AttributeId::characteristic(Uuid::from_u128(0x10), Uuid::from_u128(0x11))
    }

    #[test]
    fn attempt_converts_errors_to_false() {
        let req = Request::read("dev".into(), attr());
        let accept = |_: &Request| -> Result<()> { Ok(()) };
        let reject = |_: &Request| -> Result<()> { Err(TransportError::Rejected.into()) };
        let busy = |_: &Request| -> Result<()> { Err(ErrorKind::NotReady.into()) };
        assert!(req.attempt(&accept));
        assert!(!req.attempt(&reject));
        assert!(!req.attempt(&busy));
    }

    #[test]
    fn attempt_survives_panicking_transport() {
        let req = Request::read("dev".into(), attr());
        let explode = |_: &Request| -> Result<()> { panic!("DeadObjectException") };
        assert!(!req.attempt(&explode));
    }

    #[test]
    fn retry_budget_only_decreases() {
        let mut req = Request::read("dev".into(), attr()).with_retries(1);
        req.consume_retry();
        req.consume_retry();
        assert_eq!(req.retries(), 0);
        assert_eq!(Request::read("dev".into(), attr()).retries(), DEFAULT_RETRIES);
    }

    #[test]
    fn descriptor_operations_need_a_descriptor() {
        let dev = DeviceId::new("dev");
        let op = Operation::WriteDescriptor { value: vec![1, 0] };
        assert!(!Request::new(dev.clone(), attr(), op.clone()).is_valid());

        let with_desc = AttributeId::descriptor(
            Uuid::from_u128(0x10),
            Uuid::from_u128(0x11),
            Uuid::from_u128(0x12),
        );
        assert!(Request::new(dev.clone(), with_desc, op).is_valid());

        let nil = AttributeId::characteristic(Uuid::from_u128(0x10), Uuid::nil());
        assert!(!Request::read(dev, nil).is_valid());
    }
}
