//! Broadcast of GATT results to any number of consumers.
//!
//! Subscribers are plain channel receivers: dropping one unsubscribes it, and a slow or
//! vanished subscriber never affects the scheduler or the other subscribers.

use std::pin::Pin;
use std::task;

use async_broadcast::{InactiveReceiver, Receiver, RecvError, Sender, TrySendError};
use futures_core::Stream;
use log::{debug, trace};

use crate::{AttributeId, DeviceId, OperationKind};

/// Something that happened on a link, as seen by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattEvent {
    /// The request at the head of the device's queue was confirmed.
    Completed {
        device: DeviceId,
        attribute: AttributeId,
        kind: OperationKind,
        value: Option<Vec<u8>>,
    },
    /// The device pushed a new value through a notification or indication.
    Changed {
        device: DeviceId,
        attribute: AttributeId,
        value: Vec<u8>,
    },
    /// A request ran out of retries and has been dropped.
    Failed {
        device: DeviceId,
        attribute: AttributeId,
        kind: OperationKind,
    },
    /// The link is gone and its pending requests were discarded.
    LinkLost { device: DeviceId },
}

impl GattEvent {
    pub fn device(&self) -> &DeviceId {
        match self {
            Self::Completed { device, .. }
            | Self::Changed { device, .. }
            | Self::Failed { device, .. }
            | Self::LinkLost { device } => device,
        }
    }

    pub fn attribute(&self) -> Option<AttributeId> {
        match self {
            Self::Completed { attribute, .. }
            | Self::Changed { attribute, .. }
            | Self::Failed { attribute, .. } => Some(*attribute),
            Self::LinkLost { .. } => None,
        }
    }

    /// The bytes carried by a completed read or a notification.
    pub fn value(&self) -> Option<&[u8]> {
        match self {
            Self::Completed { value, .. } => value.as_deref(),
            Self::Changed { value, .. } => Some(value),
            _ => None,
        }
    }
}

/// Publishing side of the event channel; cloning shares the same channel.
#[derive(Clone)]
pub(crate) struct EventBus {
    sender: Sender<GattEvent>,
    #[allow(unused)]
    sender_keeper: InactiveReceiver<GattEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (mut sender, receiver) = async_broadcast::broadcast(capacity.max(1));
        sender.set_overflow(true);
        Self {
            sender,
            sender_keeper: receiver.deactivate(),
        }
    }

    pub fn publish(&self, event: GattEvent) {
        match self.sender.try_broadcast(event) {
            Ok(None) => (),
            Ok(Some(dropped)) => debug!("event channel overflowed, dropped {dropped:?}"),
            Err(TrySendError::Inactive(event)) => trace!("no subscriber for {event:?}"),
            Err(e) => debug!("failed to publish event: {e:?}"),
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.new_receiver(),
        }
    }
}

/// A subscription to [`GattEvent`]s, usable as a [`Stream`].
pub struct EventReceiver {
    receiver: Receiver<GattEvent>,
}

impl EventReceiver {
    /// Waits for the next event. Returns `None` once the scheduler is gone.
    ///
    /// Events lost to overflow are skipped.
    pub async fn recv(&mut self) -> Option<GattEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Overflowed(n)) => debug!("subscriber missed {n} events"),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Returns a pending event without waiting.
    pub fn try_recv(&mut self) -> Option<GattEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(async_broadcast::TryRecvError::Overflowed(n)) => {
                    debug!("subscriber missed {n} events")
                }
                Err(_) => return None,
            }
        }
    }
}

impl Stream for EventReceiver {
    type Item = GattEvent;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<GattEvent>> {
        Pin::new(&mut self.receiver).poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.receiver.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_lite::future::block_on;
    use futures_lite::StreamExt;

    fn lost(n: &str) -> GattEvent {
        GattEvent::LinkLost { device: n.into() }
    }

    #[test]
    fn every_subscriber_sees_every_event() {
        let bus = EventBus::new(8);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        bus.publish(lost("a"));

        assert_eq!(first.try_recv(), Some(lost("a")));
        assert_eq!(block_on(second.next()), Some(lost("a")));
    }

    #[test]
    fn publishing_without_subscribers_is_harmless() {
        let bus = EventBus::new(8);
        bus.publish(lost("a"));
        let mut late = bus.subscribe();
        assert_eq!(late.try_recv(), None);
    }

    #[test]
    fn overflow_keeps_the_newest_events() {
        let bus = EventBus::new(2);
        let mut receiver = bus.subscribe();
        for name in ["a", "b", "c"] {
            bus.publish(lost(name));
        }
        assert_eq!(block_on(receiver.recv()), Some(lost("b")));
        assert_eq!(block_on(receiver.recv()), Some(lost("c")));
    }

    #[test]
    fn dropped_subscriber_does_not_block_others() {
        let bus = EventBus::new(1);
        let dropped = bus.subscribe();
        let mut kept = bus.subscribe();
        drop(dropped);
        bus.publish(lost("a"));
        bus.publish(lost("b"));
        assert_eq!(kept.try_recv(), Some(lost("b")));
    }
}
