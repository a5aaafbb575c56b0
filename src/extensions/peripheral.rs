//! Peripheral contract between hardware extensions and the host.
//!
//! The BLE transport itself lives outside this crate. Hardware extensions
//! talk to it through [`BleConnection`] and expose their connection lifecycle
//! to the editor through [`PeripheralExtension`], registered on the
//! [`HostRuntime`](super::HostRuntime).

/// Connection lifecycle driven by the editor's connection dialog.
pub trait PeripheralExtension: Send + Sync {
    /// Start scanning for devices.
    fn scan(&self);

    /// Connect to the device found during scanning.
    fn connect(&self, peripheral_id: u32);

    fn disconnect(&self);

    fn is_connected(&self) -> bool;
}

/// A BLE session with one device.
///
/// Service and characteristic ids are UUID strings. Payloads are raw bytes.
pub trait BleConnection: Send + Sync {
    fn connect_peripheral(&self, peripheral_id: u32) -> anyhow::Result<()>;

    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Read a characteristic. With `start_notifications` the device keeps
    /// pushing updates after this read.
    fn read(
        &self,
        service: &str,
        characteristic: &str,
        start_notifications: bool,
    ) -> anyhow::Result<Vec<u8>>;

    fn write(
        &self,
        service: &str,
        characteristic: &str,
        data: &[u8],
        with_response: bool,
    ) -> anyhow::Result<()>;
}
