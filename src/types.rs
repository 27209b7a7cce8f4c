use uuid::Uuid;

/// A platform-specific device identifier (the stable link address on Android).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceId(pub(crate) String);

impl DeviceId {
    /// Wraps a link address such as `AA:BB:CC:DD:EE:FF`.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

/// Locates a characteristic, or one of its descriptors, in a device's GATT tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AttributeId {
    pub service: Uuid,
    pub characteristic: Uuid,
    pub descriptor: Option<Uuid>,
}

impl AttributeId {
    pub const fn characteristic(service: Uuid, characteristic: Uuid) -> Self {
        Self {
            service,
            characteristic,
            descriptor: None,
        }
    }

    pub const fn descriptor(service: Uuid, characteristic: Uuid, descriptor: Uuid) -> Self {
        Self {
            service,
            characteristic,
            descriptor: Some(descriptor),
        }
    }

    /// Returns `false` if any UUID that is set is nil.
    pub fn is_valid(&self) -> bool {
        !self.characteristic.is_nil() && !self.descriptor.is_some_and(|d| d.is_nil())
    }
}

impl std::fmt::Display for AttributeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.service, self.characteristic)?;
        if let Some(desc) = self.descriptor {
            write!(f, "/{desc}")?;
        }
        Ok(())
    }
}

/// The kind of GATT operation a request performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OperationKind {
    Read,
    Write,
    ReadDescriptor,
    WriteDescriptor,
    SetNotification,
}

impl OperationKind {
    /// Whether the operation targets a descriptor rather than the characteristic value.
    pub fn needs_descriptor(self) -> bool {
        matches!(self, Self::ReadDescriptor | Self::WriteDescriptor)
    }
}
