//! Bluetooth SIG base UUID helpers.

use uuid::Uuid;

const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Creates a [`Uuid`] from a 16-bit assigned number.
pub const fn bluetooth_uuid_from_u16(uuid: u16) -> Uuid {
    Uuid::from_u128(((uuid as u128) << 96) | BLUETOOTH_BASE_UUID)
}

/// Extension trait for [`Uuid`] with helper methods for Bluetooth UUIDs.
pub trait BluetoothUuidExt: private::Sealed {
    /// Creates a [`Uuid`] from a 16-bit assigned number.
    fn from_u16(uuid: u16) -> Self;

    /// Returns the 16-bit assigned number if this UUID is derived from the Bluetooth base UUID.
    fn as_u16(&self) -> Option<u16>;
}

impl BluetoothUuidExt for Uuid {
    fn from_u16(uuid: u16) -> Self {
        bluetooth_uuid_from_u16(uuid)
    }

    fn as_u16(&self) -> Option<u16> {
        let value = self.as_u128();
        if value & !(0xffff_u128 << 96) == BLUETOOTH_BASE_UUID {
            Some((value >> 96) as u16)
        } else {
            None
        }
    }
}

mod private {
    pub trait Sealed {}

    impl Sealed for uuid::Uuid {}
}

pub mod services {
    use super::bluetooth_uuid_from_u16;
    use uuid::Uuid;

    pub const BATTERY: Uuid = bluetooth_uuid_from_u16(0x180f);
}

pub mod characteristics {
    use super::bluetooth_uuid_from_u16;
    use uuid::Uuid;

    pub const BATTERY_LEVEL: Uuid = bluetooth_uuid_from_u16(0x2a19);
}

pub mod descriptors {
    use super::bluetooth_uuid_from_u16;
    use uuid::Uuid;

    pub const CLIENT_CHARACTERISTIC_CONFIGURATION: Uuid = bluetooth_uuid_from_u16(0x2902);
}
