//! Per-link request queue.
//!
//! The platform GATT client can only process one outstanding operation per connection,
//! and its callbacks carry no request identifier. The queue therefore keeps exactly one
//! request in flight: the head stays in place while it waits for confirmation, so the
//! next confirmation for the link always belongs to the head.

use std::collections::VecDeque;

use log::{debug, warn};

use crate::request::Request;
use crate::transport::Transport;

/// Default number of ticks to wait for a confirmation (5 seconds at 50 ms per tick).
pub const DEFAULT_TIMEOUT_TICKS: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Nothing is in flight; the head may be dispatched on the next tick.
    Idle,
    /// The head has been submitted and waits for a confirm/fail signal.
    AwaitingConfirmation,
}

/// What a single [`LinkQueue::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Empty,
    /// The head was malformed and has been discarded.
    DroppedMalformed,
    /// The head ran out of retries, was reported and discarded.
    Exhausted,
    /// The head was accepted by the transport.
    Submitted,
    /// The transport refused the head; one retry consumed.
    Rejected,
    /// Still waiting for the confirmation of the head.
    Waiting,
    /// The confirmation did not arrive in time; one retry consumed.
    TimedOut,
    /// A withdrawn request stopped waiting and was discarded without being reported.
    Withdrawn,
}

#[derive(Debug)]
pub struct LinkQueue {
    requests: VecDeque<Request>,
    state: LinkState,
    countdown: u32,
    timeout_ticks: u32,
    withdrawn: bool,
}

impl LinkQueue {
    /// Creates an empty queue that waits `timeout_ticks` ticks (at least 1) for each confirmation.
    pub fn new(timeout_ticks: u32) -> Self {
        Self {
            requests: VecDeque::new(),
            state: LinkState::Idle,
            countdown: 0,
            timeout_ticks: timeout_ticks.max(1),
            withdrawn: false,
        }
    }

    pub fn enqueue(&mut self, request: Request) {
        self.requests.push_back(request);
    }

    /// Completes the in-flight request and returns it. Does nothing while idle, so duplicate
    /// or late confirmations are harmless.
    pub fn confirm(&mut self) -> Option<Request> {
        if self.state != LinkState::AwaitingConfirmation {
            debug!("ignoring confirmation without a request in flight");
            return None;
        }
        self.reset();
        self.requests.pop_front()
    }

    /// Marks the in-flight request as failed right away, consuming one retry.
    /// Returns `false` if nothing was in flight.
    pub fn fail(&mut self) -> bool {
        if self.state != LinkState::AwaitingConfirmation {
            return false;
        }
        let withdrawn = self.withdrawn;
        self.reset();
        if withdrawn {
            self.requests.pop_front();
        } else if let Some(head) = self.requests.front_mut() {
            head.consume_retry();
        }
        true
    }

    /// Withdraws every request carrying `tag`. Returns how many were removed.
    ///
    /// A matching request that is already in flight keeps the link busy until it is
    /// confirmed or times out, but it is then discarded instead of being retried or reported.
    pub(crate) fn withdraw(&mut self, tag: u64) -> usize {
        let in_flight = self.state == LinkState::AwaitingConfirmation;
        if in_flight && self.requests.front().and_then(Request::tag) == Some(tag) {
            self.withdrawn = true;
        }
        let before = self.requests.len();
        let mut index = 0;
        self.requests.retain(|request| {
            let keep = (in_flight && index == 0) || request.tag() != Some(tag);
            index += 1;
            keep
        });
        before - self.requests.len()
    }

    /// Advances the state machine by one step.
    ///
    /// `on_exhausted` receives the head when its retry budget is used up; it is never called
    /// for malformed requests.
    pub fn tick(
        &mut self,
        transport: &dyn Transport,
        on_exhausted: &mut dyn FnMut(Request),
    ) -> TickOutcome {
        let Some(head) = self.requests.front_mut() else {
            self.reset();
            return TickOutcome::Empty;
        };

        if !head.is_valid() {
            warn!("dropping malformed request {head:?}");
            self.requests.pop_front();
            self.reset();
            return TickOutcome::DroppedMalformed;
        }

        if head.retries() == 0 {
            if let Some(head) = self.requests.pop_front() {
                warn!(
                    "{:?} on {} ({}) failed permanently",
                    head.kind(),
                    head.attribute(),
                    head.device()
                );
                on_exhausted(head);
            }
            self.reset();
            return TickOutcome::Exhausted;
        }

        match self.state {
            LinkState::Idle => {
                if head.attempt(transport) {
                    self.state = LinkState::AwaitingConfirmation;
                    self.countdown = self.timeout_ticks;
                    TickOutcome::Submitted
                } else {
                    head.consume_retry();
                    TickOutcome::Rejected
                }
            }
            LinkState::AwaitingConfirmation => {
                self.countdown = self.countdown.saturating_sub(1);
                if self.countdown > 0 {
                    return TickOutcome::Waiting;
                }
                debug!(
                    "confirmation of {:?} on {} ({}) timed out",
                    head.kind(),
                    head.attribute(),
                    head.device()
                );
                if self.withdrawn {
                    self.requests.pop_front();
                    self.reset();
                    return TickOutcome::Withdrawn;
                }
                head.consume_retry();
                self.reset();
                TickOutcome::TimedOut
            }
        }
    }

    /// Drops every pending request, including the one in flight. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.requests.len();
        self.requests.clear();
        self.reset();
        dropped
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Number of requests held, including the one in flight.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn head(&self) -> Option<&Request> {
        self.requests.front()
    }

    /// The request waiting for confirmation, if any.
    pub fn in_flight(&self) -> Option<&Request> {
        match self.state {
            LinkState::AwaitingConfirmation => self.requests.front(),
            LinkState::Idle => None,
        }
    }

    fn reset(&mut self) {
        self.state = LinkState::Idle;
        self.countdown = 0;
        self.withdrawn = false;
    }
}

impl Default for LinkQueue {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT_TICKS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{attr, MockTransport};
    use crate::request::Operation;
    use crate::{AttributeId, DeviceId};
    use uuid::Uuid;

    fn read(n: u128) -> Request {
        Request::read(DeviceId::new("dev"), attr(n))
    }

    fn tick(
        queue: &mut LinkQueue,
        transport: &MockTransport,
        failed: &mut Vec<Request>,
    ) -> TickOutcome {
        queue.tick(transport, &mut |r| failed.push(r))
    }

    #[test]
    fn never_more_than_one_in_flight() {
        let transport = MockTransport::new();
        let mut failed = Vec::new();
        let mut queue = LinkQueue::new(3);
        for n in 1..=5 {
            queue.enqueue(read(n));
        }

        for round in 0..30 {
            tick(&mut queue, &transport, &mut failed);
            if let Some(in_flight) = queue.in_flight() {
                assert_eq!(Some(in_flight), queue.head());
            }
            if round % 7 == 6 {
                queue.confirm();
            }
        }

        // every execution since the last confirmation targeted the same head
        let executed = transport.executed();
        for pair in executed.windows(2) {
            assert!(pair[0].attribute() <= pair[1].attribute());
        }
        assert!(failed.is_empty());
    }

    #[test]
    fn requests_complete_in_fifo_order() {
        let transport = MockTransport::new();
        let mut failed = Vec::new();
        let mut queue = LinkQueue::new(10);
        queue.enqueue(read(1));
        queue.enqueue(read(2));

        assert_eq!(tick(&mut queue, &transport, &mut failed), TickOutcome::Submitted);
        assert_eq!(tick(&mut queue, &transport, &mut failed), TickOutcome::Waiting);
        assert_eq!(transport.executed(), vec![read(1)]);

        let first = queue.confirm().unwrap();
        assert_eq!(first.attribute(), attr(1));

        assert_eq!(tick(&mut queue, &transport, &mut failed), TickOutcome::Submitted);
        assert_eq!(queue.confirm().unwrap().attribute(), attr(2));
        assert_eq!(transport.executed(), vec![read(1), read(2)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn exhausted_request_is_reported_once() {
        let transport = MockTransport::failing();
        let mut failed = Vec::new();
        let mut queue = LinkQueue::new(10);
        queue.enqueue(read(1).with_retries(2));

        assert_eq!(tick(&mut queue, &transport, &mut failed), TickOutcome::Rejected);
        assert_eq!(tick(&mut queue, &transport, &mut failed), TickOutcome::Rejected);
        assert_eq!(tick(&mut queue, &transport, &mut failed), TickOutcome::Exhausted);
        assert_eq!(tick(&mut queue, &transport, &mut failed), TickOutcome::Empty);

        assert_eq!(transport.executed().len(), 2);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].attribute(), attr(1));
        assert!(queue.is_empty());
    }

    #[test]
    fn confirm_while_idle_is_a_no_op() {
        let mut queue = LinkQueue::new(10);
        assert!(queue.confirm().is_none());

        queue.enqueue(read(1));
        assert!(queue.confirm().is_none());
        assert!(!queue.fail());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.state(), LinkState::Idle);
        assert_eq!(queue.head().unwrap().retries(), crate::request::DEFAULT_RETRIES);
    }

    #[test]
    fn stalled_confirmation_consumes_a_retry() {
        let transport = MockTransport::new();
        let mut failed = Vec::new();
        let mut queue = LinkQueue::new(1);
        queue.enqueue(read(1).with_retries(10));

        assert_eq!(tick(&mut queue, &transport, &mut failed), TickOutcome::Submitted);
        assert_eq!(queue.state(), LinkState::AwaitingConfirmation);

        assert_eq!(tick(&mut queue, &transport, &mut failed), TickOutcome::TimedOut);
        assert_eq!(queue.state(), LinkState::Idle);
        assert_eq!(queue.head().unwrap().retries(), 9);
        assert_eq!(transport.executed().len(), 1);

        assert_eq!(tick(&mut queue, &transport, &mut failed), TickOutcome::Submitted);
        assert_eq!(queue.state(), LinkState::AwaitingConfirmation);
        assert_eq!(transport.executed().len(), 2);
        assert!(failed.is_empty());
    }

    #[test]
    fn timeout_waits_the_full_budget() {
        let transport = MockTransport::new();
        let mut failed = Vec::new();
        let mut queue = LinkQueue::new(3);
        queue.enqueue(read(1));

        assert_eq!(tick(&mut queue, &transport, &mut failed), TickOutcome::Submitted);
        assert_eq!(tick(&mut queue, &transport, &mut failed), TickOutcome::Waiting);
        assert_eq!(tick(&mut queue, &transport, &mut failed), TickOutcome::Waiting);
        assert_eq!(tick(&mut queue, &transport, &mut failed), TickOutcome::TimedOut);
    }

    #[test]
    fn explicit_failure_consumes_a_retry() {
        let transport = MockTransport::new();
        let mut failed = Vec::new();
        let mut queue = LinkQueue::new(10);
        queue.enqueue(read(1).with_retries(3));

        tick(&mut queue, &transport, &mut failed);
        assert!(queue.fail());
        assert_eq!(queue.state(), LinkState::Idle);
        assert_eq!(queue.head().unwrap().retries(), 2);
        assert_eq!(tick(&mut queue, &transport, &mut failed), TickOutcome::Submitted);
    }

    #[test]
    fn malformed_head_is_dropped_silently() {
        let transport = MockTransport::new();
        let mut failed = Vec::new();
        let mut queue = LinkQueue::new(10);
        let nil = AttributeId::characteristic(Uuid::from_u128(1), Uuid::nil());
        queue.enqueue(Request::read(DeviceId::new("dev"), nil));
        queue.enqueue(Request::new(
            DeviceId::new("dev"),
            attr(2),
            Operation::ReadDescriptor,
        ));
        queue.enqueue(read(3));

        assert_eq!(tick(&mut queue, &transport, &mut failed), TickOutcome::DroppedMalformed);
        assert_eq!(tick(&mut queue, &transport, &mut failed), TickOutcome::DroppedMalformed);
        assert_eq!(tick(&mut queue, &transport, &mut failed), TickOutcome::Submitted);
        assert_eq!(transport.executed(), vec![read(3)]);
        assert!(failed.is_empty());
    }

    #[test]
    fn clear_drops_in_flight_and_pending() {
        let transport = MockTransport::new();
        let mut failed = Vec::new();
        let mut queue = LinkQueue::new(10);
        queue.enqueue(read(1));
        queue.enqueue(read(2));
        tick(&mut queue, &transport, &mut failed);

        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.state(), LinkState::Idle);
        assert!(queue.confirm().is_none());
    }

    #[test]
    fn withdraw_removes_waiting_copies() {
        let transport = MockTransport::new();
        let mut failed = Vec::new();
        let mut queue = LinkQueue::new(10);
        queue.enqueue(read(1));
        queue.enqueue(read(2).tagged(7));
        queue.enqueue(read(3));
        queue.enqueue(read(2).tagged(7));

        assert_eq!(queue.withdraw(7), 2);
        assert_eq!(queue.withdraw(8), 0);
        assert_eq!(queue.len(), 2);
        assert_eq!(tick(&mut queue, &transport, &mut failed), TickOutcome::Submitted);
        assert_eq!(queue.confirm().unwrap().attribute(), attr(1));
        assert_eq!(queue.head().unwrap().attribute(), attr(3));
    }

    #[test]
    fn withdrawn_request_in_flight_is_discarded_silently() {
        let transport = MockTransport::new();
        let mut failed = Vec::new();
        let mut queue = LinkQueue::new(2);
        queue.enqueue(read(1).tagged(3).with_retries(5));
        queue.enqueue(read(2));

        assert_eq!(tick(&mut queue, &transport, &mut failed), TickOutcome::Submitted);
        assert_eq!(queue.withdraw(3), 0);
        assert_eq!(queue.in_flight().map(Request::attribute), Some(attr(1)));

        assert_eq!(tick(&mut queue, &transport, &mut failed), TickOutcome::Waiting);
        assert_eq!(tick(&mut queue, &transport, &mut failed), TickOutcome::Withdrawn);
        assert_eq!(queue.head().unwrap().attribute(), attr(2));
        assert_eq!(tick(&mut queue, &transport, &mut failed), TickOutcome::Submitted);

        // the withdrawn request was sent exactly once and never reported
        assert_eq!(transport.executed().len(), 2);
        assert!(failed.is_empty());
    }

    #[test]
    fn withdrawn_request_failing_is_not_retried() {
        let transport = MockTransport::new();
        let mut failed = Vec::new();
        let mut queue = LinkQueue::new(10);
        queue.enqueue(read(1).tagged(3));

        tick(&mut queue, &transport, &mut failed);
        queue.withdraw(3);
        assert!(queue.fail());
        assert!(queue.is_empty());
        assert_eq!(tick(&mut queue, &transport, &mut failed), TickOutcome::Empty);
        assert!(failed.is_empty());
    }
}
