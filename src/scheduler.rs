//! Multi-device scheduler.
//!
//! A single task owns every per-link queue. Callers, the transport callbacks and the tick
//! timer all reach it through one command channel, so no queue state is shared between
//! threads.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use futures_lite::FutureExt;
use futures_timer::Delay;
use log::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::error::{AttError, ErrorKind};
use crate::events::{EventBus, EventReceiver, GattEvent};
use crate::guard::ProtectedTransport;
use crate::queue::LinkQueue;
use crate::request::{Operation, Request};
use crate::transport::{Transport, TransportEvents};
use crate::{AttributeId, DeviceId, Result};

/// Called once for every request that ran out of retries.
pub type FailureCallback = Box<dyn FnMut(&Request) + Send + 'static>;

/// Queue bookkeeping for all devices, without any timer or channel.
pub(crate) struct SchedulerCore<T: Transport> {
    queues: HashMap<DeviceId, LinkQueue>,
    transport: ProtectedTransport<T>,
    on_failed: FailureCallback,
    events: EventBus,
    timeout_ticks: u32,
}

impl<T: Transport> SchedulerCore<T> {
    pub(crate) fn new(
        transport: T,
        config: &SchedulerConfig,
        on_failed: FailureCallback,
        events: EventBus,
    ) -> Self {
        Self {
            queues: HashMap::new(),
            transport: ProtectedTransport::new(transport, config.collapse_threshold),
            on_failed,
            events,
            timeout_ticks: config.timeout_ticks,
        }
    }

    /// Appends the request to its device's queue, creating the queue if needed.
    pub fn schedule(&mut self, request: Request) {
        let timeout_ticks = self.timeout_ticks;
        self.queues
            .entry(request.device().clone())
            .or_insert_with(|| LinkQueue::new(timeout_ticks))
            .enqueue(request);
    }

    /// Completes the in-flight request of `device`. Returns `false` if nothing was in flight.
    pub fn confirm(&mut self, device: &DeviceId, value: Option<Vec<u8>>) -> bool {
        let Some(request) = self.queues.get_mut(device).and_then(|q| q.confirm()) else {
            debug!("unexpected confirmation from {device}");
            return false;
        };
        self.events.publish(GattEvent::Completed {
            device: device.clone(),
            attribute: request.attribute(),
            kind: request.kind(),
            value,
        });
        true
    }

    /// Fails the in-flight request of `device` right away, consuming one of its retries.
    pub fn fail(&mut self, device: &DeviceId, status: Option<AttError>) -> bool {
        let failed = self.queues.get_mut(device).is_some_and(|q| q.fail());
        match (failed, status) {
            (true, Some(status)) => debug!("operation on {device} failed: {status}"),
            (true, None) => debug!("operation on {device} failed"),
            (false, _) => debug!("unexpected failure report from {device}"),
        }
        failed
    }

    /// Ticks every queue once. Returns whether any work remains.
    pub fn on_tick(&mut self) -> bool {
        let Self {
            queues,
            transport,
            on_failed,
            events,
            ..
        } = self;

        for queue in queues.values_mut() {
            queue.tick(&*transport, &mut |request: Request| {
                if catch_unwind(AssertUnwindSafe(|| on_failed(&request))).is_err() {
                    let (kind, device) = (request.kind(), request.device());
                    error!("failure callback panicked for {kind:?} on {device}");
                }
                events.publish(GattEvent::Failed {
                    device: request.device().clone(),
                    attribute: request.attribute(),
                    kind: request.kind(),
                });
            });
        }

        for device in transport.take_collapsed() {
            if let Some(queue) = queues.remove(&device) {
                error!(
                    "cleared {} requests for {device} after repeated stack collapses",
                    queue.len()
                );
            }
        }

        queues.retain(|_, queue| !queue.is_empty());
        self.has_work()
    }

    /// Silently drops everything pending for `device`. Returns how many requests were dropped.
    pub fn clear(&mut self, device: &DeviceId) -> usize {
        self.transport.forget(device);
        self.queues
            .remove(device)
            .map(|mut queue| queue.clear())
            .unwrap_or(0)
    }

    pub fn clear_all(&mut self) {
        let devices: Vec<DeviceId> = self.queues.keys().cloned().collect();
        for device in devices {
            self.clear(&device);
        }
    }

    /// Number of requests held for `device`, including the one in flight.
    pub fn pending(&self, device: &DeviceId) -> usize {
        self.queues.get(device).map_or(0, |q| q.len())
    }

    pub fn has_work(&self) -> bool {
        self.queues.values().any(|q| !q.is_empty())
    }

    /// Withdraws the requests of `device` scheduled under `tag` by a blocking call.
    pub fn withdraw(&mut self, device: &DeviceId, tag: u64) -> usize {
        let Some(queue) = self.queues.get_mut(device) else {
            return 0;
        };
        let removed = queue.withdraw(tag);
        if queue.is_empty() {
            self.queues.remove(device);
        }
        removed
    }

    #[cfg(test)]
    pub fn queue(&self, device: &DeviceId) -> Option<&LinkQueue> {
        self.queues.get(device)
    }

    fn link_lost(&mut self, device: &DeviceId) {
        let dropped = self.clear(device);
        info!("link to {device} lost, dropped {dropped} pending requests");
        self.events.publish(GattEvent::LinkLost {
            device: device.clone(),
        });
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Schedule(request) => self.schedule(request),
            Command::Confirm(device, value) => {
                self.confirm(&device, value);
            }
            Command::Fail(device, status) => {
                self.fail(&device, status);
            }
            Command::ValueChanged(device, attribute, value) => {
                self.events.publish(GattEvent::Changed {
                    device,
                    attribute,
                    value,
                });
            }
            Command::Withdraw(device, tag) => {
                let removed = self.withdraw(&device, tag);
                debug!("withdrew {removed} queued copies for {device}");
            }
            Command::LinkLost(device) => self.link_lost(&device),
            Command::ClearAll => self.clear_all(),
            Command::Pending(device, reply) => {
                let _ = reply.try_send(self.pending(&device));
            }
            Command::Shutdown => (),
        }
    }
}

enum Command {
    Schedule(Request),
    Confirm(DeviceId, Option<Vec<u8>>),
    Fail(DeviceId, Option<AttError>),
    ValueChanged(DeviceId, AttributeId, Vec<u8>),
    Withdraw(DeviceId, u64),
    LinkLost(DeviceId),
    ClearAll,
    Pending(DeviceId, Sender<usize>),
    Shutdown,
}

enum Wake {
    Tick,
    Command(std::result::Result<Command, async_channel::RecvError>),
}

/// The scheduler's event loop. Spawn [`SchedulerTask::run`] on any executor, or use
/// [`SchedulerTask::spawn_thread`].
pub struct SchedulerTask<T: Transport> {
    core: SchedulerCore<T>,
    commands: Receiver<Command>,
    tick_interval: Duration,
}

impl<T: Transport + 'static> SchedulerTask<T> {
    /// Creates the scheduler task and a handle to talk to it.
    pub fn new(
        transport: T,
        config: SchedulerConfig,
        on_failed: impl FnMut(&Request) + Send + 'static,
    ) -> (SchedulerHandle, Self) {
        let (sender, receiver) = async_channel::unbounded();
        let events = EventBus::new(config.event_capacity);
        let core = SchedulerCore::new(transport, &config, Box::new(on_failed), events.clone());
        let handle = SchedulerHandle {
            commands: sender,
            events,
            default_retries: config.default_retries,
            force_locks: Arc::new(async_lock::Mutex::new(HashMap::new())),
            next_tag: Arc::new(AtomicU64::new(0)),
        };
        let task = Self {
            core,
            commands: receiver,
            tick_interval: config.tick_interval,
        };
        (handle, task)
    }

    /// Runs until [`SchedulerHandle::shutdown`] is called or every handle is dropped.
    ///
    /// The tick timer is armed only while some queue has work.
    pub async fn run(self) {
        let Self {
            mut core,
            commands,
            tick_interval,
        } = self;
        let mut timer: Option<Delay> = None;
        debug!("scheduler started");

        loop {
            if timer.is_none() && core.has_work() {
                timer = Some(Delay::new(tick_interval));
            }
            // timer first: a busy mailbox must not starve the queues
            let wake = match timer.as_mut() {
                Some(delay) => {
                    let tick = async move {
                        delay.await;
                        Wake::Tick
                    };
                    let command = async { Wake::Command(commands.recv().await) };
                    tick.or(command).await
                }
                None => Wake::Command(commands.recv().await),
            };
            match wake {
                Wake::Tick => {
                    timer = None;
                    if !core.on_tick() {
                        debug!("all queues drained, tick stopped");
                    }
                }
                Wake::Command(Ok(Command::Shutdown)) | Wake::Command(Err(_)) => break,
                Wake::Command(Ok(command)) => core.handle(command),
            }
        }

        core.clear_all();
        debug!("scheduler stopped");
    }

    /// Runs the scheduler on a dedicated thread.
    pub fn spawn_thread(self) -> std::io::Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name("gatt-scheduler".into())
            .spawn(move || futures_lite::future::block_on(self.run()))
    }
}

/// Cheap, cloneable access to a running scheduler.
///
/// Every method returns immediately; results surface later as [`GattEvent`]s or through
/// the failure callback.
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: Sender<Command>,
    events: EventBus,
    default_retries: u32,
    force_locks: Arc<async_lock::Mutex<HashMap<DeviceId, Arc<async_lock::Mutex<()>>>>>,
    next_tag: Arc<AtomicU64>,
}

impl SchedulerHandle {
    pub fn schedule(&self, request: Request) -> Result<()> {
        self.send(Command::Schedule(request))
    }

    pub fn read(&self, device: &DeviceId, attribute: AttributeId) -> Result<()> {
        self.schedule_operation(device, attribute, Operation::Read)
    }

    pub fn write(&self, device: &DeviceId, attribute: AttributeId, value: &[u8]) -> Result<()> {
        let operation = Operation::Write {
            value: value.to_vec(),
            with_response: true,
        };
        self.schedule_operation(device, attribute, operation)
    }

    pub fn write_without_response(
        &self,
        device: &DeviceId,
        attribute: AttributeId,
        value: &[u8],
    ) -> Result<()> {
        let operation = Operation::Write {
            value: value.to_vec(),
            with_response: false,
        };
        self.schedule_operation(device, attribute, operation)
    }

    pub fn read_descriptor(&self, device: &DeviceId, attribute: AttributeId) -> Result<()> {
        self.schedule_operation(device, attribute, Operation::ReadDescriptor)
    }

    pub fn write_descriptor(
        &self,
        device: &DeviceId,
        attribute: AttributeId,
        value: &[u8],
    ) -> Result<()> {
        let operation = Operation::WriteDescriptor {
            value: value.to_vec(),
        };
        self.schedule_operation(device, attribute, operation)
    }

    /// Enables or disables notifications of a characteristic.
    pub fn set_notification(
        &self,
        device: &DeviceId,
        attribute: AttributeId,
        enabled: bool,
    ) -> Result<()> {
        self.schedule_operation(device, attribute, Operation::SetNotification { enabled })
    }

    /// Number of requests held for `device`, including the one in flight.
    pub async fn pending(&self, device: &DeviceId) -> Result<usize> {
        let (reply, answer) = async_channel::bounded(1);
        self.send(Command::Pending(device.clone(), reply))?;
        answer
            .recv()
            .await
            .map_err(|_| ErrorKind::SchedulerClosed.into())
    }

    /// Drops every pending request of every device.
    pub fn clear_all(&self) -> Result<()> {
        self.send(Command::ClearAll)
    }

    /// Stops the scheduler task; pending requests are dropped.
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    pub(crate) fn default_retries(&self) -> u32 {
        self.default_retries
    }

    /// The lock serializing blocking calls on `device`.
    pub(crate) fn force_lock(&self, device: &DeviceId) -> Arc<async_lock::Mutex<()>> {
        self.force_locks
            .lock_blocking()
            .entry(device.clone())
            .or_default()
            .clone()
    }

    pub(crate) fn next_tag(&self) -> u64 {
        self.next_tag.fetch_add(1, Ordering::Relaxed)
    }

    /// Withdraws what is left of a blocking call's copies of a request.
    pub(crate) fn withdraw(&self, device: &DeviceId, tag: u64) -> Result<()> {
        self.send(Command::Withdraw(device.clone(), tag))
    }

    fn schedule_operation(
        &self,
        device: &DeviceId,
        attribute: AttributeId,
        operation: Operation,
    ) -> Result<()> {
        let request =
            Request::new(device.clone(), attribute, operation).with_retries(self.default_retries);
        self.schedule(request)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .try_send(command)
            .map_err(|_| ErrorKind::SchedulerClosed.into())
    }

    fn send_event(&self, command: Command) {
        if self.send(command).is_err() {
            warn!("transport event dropped: scheduler is not running");
        }
    }
}

impl TransportEvents for SchedulerHandle {
    fn on_operation_confirmed(&self, device: &DeviceId, value: Option<Vec<u8>>) {
        self.send_event(Command::Confirm(device.clone(), value));
    }

    fn on_operation_failed(&self, device: &DeviceId, status: Option<AttError>) {
        self.send_event(Command::Fail(device.clone(), status));
    }

    fn on_link_lost(&self, device: &DeviceId) {
        self.send_event(Command::LinkLost(device.clone()));
    }

    fn on_value_changed(&self, device: &DeviceId, attribute: AttributeId, value: Vec<u8>) {
        self.send_event(Command::ValueChanged(device.clone(), attribute, value));
    }
}
