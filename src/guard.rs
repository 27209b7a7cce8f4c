//! Protection against a collapsing platform Bluetooth stack.
//!
//! Some Android stacks throw from `BluetoothGatt` calls once the Bluetooth service has died
//! (`DeadObjectException` and friends). Such a failure must not unwind through the scheduler;
//! it is turned into an error here, and a device whose stack keeps collapsing gets its
//! pending state cleared so the queue recovers once the link is re-established.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use log::error;

use crate::error::TransportError;
use crate::request::Request;
use crate::transport::Transport;
use crate::{DeviceId, Result};

/// Consecutive collapses after which a device's queue is cleared, unless configured otherwise.
pub const DEFAULT_COLLAPSE_THRESHOLD: u32 = 3;

pub struct ProtectedTransport<T> {
    inner: T,
    threshold: u32,
    collapses: RefCell<HashMap<DeviceId, u32>>,
    collapsed: RefCell<Vec<DeviceId>>,
}

impl<T: Transport> ProtectedTransport<T> {
    pub fn new(inner: T, threshold: u32) -> Self {
        Self {
            inner,
            threshold: threshold.max(1),
            collapses: RefCell::new(HashMap::new()),
            collapsed: RefCell::new(Vec::new()),
        }
    }

    /// Devices whose stack reached the collapse threshold since the last call.
    pub fn take_collapsed(&self) -> Vec<DeviceId> {
        std::mem::take(&mut *self.collapsed.borrow_mut())
    }

    /// Forgets the collapse history of a device, e.g. after it disconnected.
    pub fn forget(&self, device: &DeviceId) {
        self.collapses.borrow_mut().remove(device);
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: Transport> Transport for ProtectedTransport<T> {
    fn execute(&self, request: &Request) -> Result<()> {
        match catch_unwind(AssertUnwindSafe(|| self.inner.execute(request))) {
            Ok(result) => {
                if result.is_ok() {
                    self.collapses.borrow_mut().remove(request.device());
                }
                result
            }
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                let device = request.device();
                let mut collapses = self.collapses.borrow_mut();
                let count = collapses.entry(device.clone()).or_insert(0);
                *count += 1;
                error!("Bluetooth stack collapsed on {device} ({count} in a row): {msg}");
                if *count >= self.threshold {
                    collapses.remove(device);
                    self.collapsed.borrow_mut().push(device.clone());
                }
                Err(TransportError::Collapsed(msg).into())
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
