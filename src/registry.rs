//! Maps discovered GATT services to the decoders that understand them.
//!
//! The registry is an ordinary value: build it once at startup, then pass it to whatever
//! attaches decoders to freshly connected devices.

use std::collections::HashMap;

use log::{debug, warn};
use uuid::Uuid;

use crate::btuuid::{characteristics, descriptors, services};
use crate::events::GattEvent;
use crate::request::{Operation, Request};
use crate::scheduler::SchedulerHandle;
use crate::{AttributeId, DeviceId, Result};

/// Consumes the events of one service on one device.
pub trait ServiceDecoder: Send {
    /// The service this decoder handles.
    fn service(&self) -> Uuid;

    /// Requests to issue as soon as the service has been discovered on `device`.
    fn initial_requests(&self, device: &DeviceId) -> Vec<Request>;

    /// Feeds an event to the decoder. Returns `true` if the decoder consumed it.
    fn handle_event(&mut self, event: &GattEvent) -> bool;
}

pub type DecoderConstructor = fn() -> Box<dyn ServiceDecoder>;

#[derive(Default, Clone)]
pub struct DecoderRegistry {
    constructors: HashMap<Uuid, DecoderConstructor>,
}

impl DecoderRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the decoders of standard Bluetooth SIG services.
    pub fn with_standard_services() -> Self {
        let mut registry = Self::new();
        registry.register(services::BATTERY, BatteryDecoder::boxed);
        registry
    }

    /// Registers a decoder for `service`, returning the constructor it replaced.
    pub fn register(
        &mut self,
        service: Uuid,
        constructor: DecoderConstructor,
    ) -> Option<DecoderConstructor> {
        self.constructors.insert(service, constructor)
    }

    pub fn contains(&self, service: &Uuid) -> bool {
        self.constructors.contains_key(service)
    }

    /// Builds a fresh decoder for `service`.
    pub fn resolve(&self, service: &Uuid) -> Option<Box<dyn ServiceDecoder>> {
        self.constructors.get(service).map(|construct| construct())
    }

    /// Builds decoders for every known service in `discovered` and schedules their
    /// initial requests on `device`.
    pub fn attach(
        &self,
        scheduler: &SchedulerHandle,
        device: &DeviceId,
        discovered: &[Uuid],
    ) -> Result<Vec<Box<dyn ServiceDecoder>>> {
        let mut decoders = Vec::new();
        for service in discovered {
            let Some(decoder) = self.resolve(service) else {
                debug!("no decoder for service {service} on {device}");
                continue;
            };
            for request in decoder.initial_requests(device) {
                scheduler.schedule(request.with_retries(scheduler.default_retries()))?;
            }
            decoders.push(decoder);
        }
        Ok(decoders)
    }
}

/// Decoder of the standard Battery Service.
#[derive(Debug, Default)]
pub struct BatteryDecoder {
    level: Option<u8>,
}

impl BatteryDecoder {
    pub const LEVEL: AttributeId =
        AttributeId::characteristic(services::BATTERY, characteristics::BATTERY_LEVEL);

    pub fn boxed() -> Box<dyn ServiceDecoder> {
        Box::new(Self::default())
    }

    /// Last known battery level in percent.
    pub fn level(&self) -> Option<u8> {
        self.level
    }
}

impl ServiceDecoder for BatteryDecoder {
    fn service(&self) -> Uuid {
        services::BATTERY
    }

    fn initial_requests(&self, device: &DeviceId) -> Vec<Request> {
        let cccd = AttributeId::descriptor(
            services::BATTERY,
            characteristics::BATTERY_LEVEL,
            descriptors::CLIENT_CHARACTERISTIC_CONFIGURATION,
        );
        vec![
            Request::read(device.clone(), Self::LEVEL),
            Request::set_notification(device.clone(), Self::LEVEL, true),
            Request::new(
                device.clone(),
                cccd,
                Operation::WriteDescriptor {
                    value: vec![0x01, 0x00],
                },
            ),
        ]
    }

    fn handle_event(&mut self, event: &GattEvent) -> bool {
        if event.attribute() != Some(Self::LEVEL) {
            return false;
        }
        let Some(&level) = event.value().and_then(|v| v.first()) else {
            return false;
        };
        if level > 100 {
            warn!("ignoring out of range battery level {level}");
            return false;
        }
        self.level = Some(level);
        true
    }
}
