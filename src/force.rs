//! Blocking "do it now and wait" access on top of the asynchronous queue.
//!
//! These calls park the calling thread until the scheduler reports the confirmation of the
//! requested attribute. Never call them from the thread that runs the scheduler task: the
//! confirmation could not be processed and every attempt would time out.
//!
//! Blocking calls on the same device run one after another; calls on different devices do
//! not wait for each other. When a call gives up, the copies it scheduled are withdrawn: a
//! copy already handed to the radio is left to finish, but it is never retried or reported
//! to the failure callback.

use std::time::{Duration, Instant};

use futures_lite::future::block_on;
use futures_lite::FutureExt;
use futures_timer::Delay;
use log::debug;

use crate::events::{EventReceiver, GattEvent};
use crate::request::Request;
use crate::scheduler::SchedulerHandle;
use crate::{AttributeId, DeviceId};

enum Wait {
    Confirmed(Option<Vec<u8>>),
    Failed,
    TimedOut,
    LinkLost,
    Closed,
}

impl SchedulerHandle {
    /// Reads `attribute` and blocks until the read is confirmed.
    ///
    /// Each attempt waits at most `attempt_timeout`; the whole call gives up after
    /// `max_attempts` attempts. Returns whether the confirmation was observed.
    pub fn force_read(
        &self,
        device: &DeviceId,
        attribute: AttributeId,
        attempt_timeout: Duration,
        max_attempts: u32,
    ) -> bool {
        self.force_read_value(device, attribute, attempt_timeout, max_attempts)
            .is_some()
    }

    /// Like [`SchedulerHandle::force_read`], but returns the bytes that were read.
    pub fn force_read_value(
        &self,
        device: &DeviceId,
        attribute: AttributeId,
        attempt_timeout: Duration,
        max_attempts: u32,
    ) -> Option<Vec<u8>> {
        let request = Request::read(device.clone(), attribute);
        self.force(request, attempt_timeout, max_attempts)
            .map(|value| value.unwrap_or_default())
    }

    /// Writes `value` to `attribute` with response and blocks until the write is confirmed.
    pub fn force_write(
        &self,
        device: &DeviceId,
        attribute: AttributeId,
        value: &[u8],
        attempt_timeout: Duration,
        max_attempts: u32,
    ) -> bool {
        let request = Request::write(device.clone(), attribute, value.to_vec());
        self.force(request, attempt_timeout, max_attempts).is_some()
    }

    /// Schedules `request` and blocks until it is confirmed, re-issuing it after every
    /// failed or timed out attempt.
    pub fn force_request(
        &self,
        request: Request,
        attempt_timeout: Duration,
        max_attempts: u32,
    ) -> bool {
        self.force(request, attempt_timeout, max_attempts).is_some()
    }

    fn force(
        &self,
        request: Request,
        attempt_timeout: Duration,
        max_attempts: u32,
    ) -> Option<Option<Vec<u8>>> {
        let device = request.device().clone();
        let lock = self.force_lock(&device);
        let _guard = lock.lock_blocking();
        let deadline = Instant::now() + attempt_timeout.saturating_mul(max_attempts);
        let tag = self.next_tag();
        let request = request.tagged(tag);

        // subscribed before the first copy is scheduled so no confirmation can be missed
        let mut events = self.subscribe();
        let mut outcome = None;
        for attempt in 1..=max_attempts {
            if self.schedule(request.clone().with_retries(1)).is_err() {
                return None;
            }
            let attempt_deadline = deadline.min(Instant::now() + attempt_timeout);
            match block_on(wait_for(&mut events, &request, attempt_deadline)) {
                Wait::Confirmed(value) => {
                    outcome = Some(value);
                    break;
                }
                Wait::Failed => debug!(
                    "forced {:?} on {} failed (attempt {attempt}/{max_attempts})",
                    request.kind(),
                    request.attribute()
                ),
                Wait::TimedOut => debug!(
                    "forced {:?} on {} timed out (attempt {attempt}/{max_attempts})",
                    request.kind(),
                    request.attribute()
                ),
                Wait::LinkLost | Wait::Closed => break,
            }
            // the next copy must not queue up behind leftovers of this one
            if self.withdraw(&device, tag).is_err() || Instant::now() >= deadline {
                break;
            }
        }

        let _ = self.withdraw(&device, tag);
        outcome
    }
}

fn targets(request: &Request, event: &GattEvent) -> bool {
    event.device() == request.device() && event.attribute() == Some(request.attribute())
}

async fn wait_for(events: &mut EventReceiver, request: &Request, deadline: Instant) -> Wait {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Wait::TimedOut;
        }
        let received = async { Some(events.recv().await) }
            .or(async {
                Delay::new(remaining).await;
                None
            })
            .await;
        let event = match received {
            None => return Wait::TimedOut,
            Some(None) => return Wait::Closed,
            Some(Some(event)) => event,
        };
        match &event {
            GattEvent::Completed { kind, value, .. }
                if *kind == request.kind() && targets(request, &event) =>
            {
                return Wait::Confirmed(value.clone())
            }
            GattEvent::Failed { kind, .. }
                if *kind == request.kind() && targets(request, &event) =>
            {
                return Wait::Failed
            }
            GattEvent::LinkLost { device } if device == request.device() => return Wait::LinkLost,
            _ => (),
        }
    }
}
