/*!
 * Drive a USB HDMI-CEC adapter in pure rust.
 *
 * Create a [CecAdapter], [open](CecAdapter::open) the serial device of the
 * adapter (see [find_adapters]) and the driver joins the CEC bus as a
 * playback device: it answers the queries other devices send, and hands
 * key presses, commands and diagnostics to you through non-blocking
 * [poll](CecAdapter::poll_keypress)s.
 *
 * ```no_run
 * # fn main() -> Result<(), cec_usb::CecError> {
 * use cec_usb::{CecAdapter, CecLogicalAddress, CEC_DEFAULT_OPEN_TIMEOUT};
 *
 * let mut cec = CecAdapter::new("living room");
 * cec.open("/dev/ttyACM0", CEC_DEFAULT_OPEN_TIMEOUT)?;
 * cec.power_on_devices(CecLogicalAddress::Tv)?;
 * cec.set_active_view()?;
 * while let Some(key) = cec.poll_keypress() {
 *     println!("key {:#04x} held for {}ms", key.keycode, key.duration);
 * }
 * # Ok(())
 * # }
 * ```
 */

mod codec;
mod detect;
mod error;
mod events;
mod link;
mod processor;
#[cfg(test)]
mod testutil;
mod types;

pub use detect::{find_adapters, CecAdapterInfo, CEC_ADAPTER_PID, CEC_ADAPTER_VID};
pub use error::CecError;
pub use events::{CecCommand, CecKeypress, EventRing, LogLevel, LogMessage};
pub use types::{
    CecAbortReason, CecAckMask, CecDeviceType, CecLogicalAddress, CecMessage, CecOpcode,
    CecPowerStatus, CecUserControlCode, CecVersion, OsdName, TransmitRequest, CEC_ACK_TIMEOUT,
    CEC_BUTTON_TIMEOUT, CEC_DEFAULT_OPEN_TIMEOUT, CEC_DEFAULT_PHYSICAL_ADDRESS,
    CEC_SERIAL_BAUD_RATE,
};

use events::EventSink;
use link::AdapterLink;
use processor::CecProcessor;
use std::sync::Arc;
use std::time::Duration;

/// Oldest library version still compatible with this one.
pub const CEC_MIN_VERSION: u32 = 1;
/// Version of this library.
pub const CEC_LIB_VERSION: u32 = 1;

struct Connection {
    link: Arc<AdapterLink>,
    processor: CecProcessor,
}

/// A handle on a USB CEC adapter.
///
/// The adapter presents itself on the bus under the configured device
/// name and logical address ([Playback1](CecLogicalAddress::Playback1)
/// unless changed). Dropping the handle closes the connection.
pub struct CecAdapter {
    device_name: OsdName,
    logical_address: CecLogicalAddress,
    physical_address: u16,
    events: Arc<EventSink>,
    connection: Option<Connection>,
}

impl CecAdapter {
    /// A playback device on input 1 of the TV, named `device_name`
    /// (truncated to 13 ASCII bytes).
    pub fn new(device_name: &str) -> CecAdapter {
        CecAdapter::with_addresses(
            device_name,
            CecLogicalAddress::Playback1,
            CEC_DEFAULT_PHYSICAL_ADDRESS,
        )
    }

    /// Choose the addresses the device presents on the bus.
    pub fn with_addresses(
        device_name: &str,
        logical_address: CecLogicalAddress,
        physical_address: u16,
    ) -> CecAdapter {
        CecAdapter {
            device_name: OsdName::from(device_name),
            logical_address,
            physical_address,
            events: Arc::new(EventSink::new()),
            connection: None,
        }
    }

    /**
     * Connect to the adapter behind the serial device `port`.
     *
     * Waits up to `timeout` for the firmware to answer a ping, then
     * claims the logical address and starts answering bus traffic.
     * ```no_run
     * # fn main() -> Result<(), cec_usb::CecError> {
     * # use cec_usb::{CecAdapter, CEC_DEFAULT_OPEN_TIMEOUT};
     * let mut cec = CecAdapter::new("pi");
     * cec.open("/dev/ttyACM0", CEC_DEFAULT_OPEN_TIMEOUT)?;
     * # Ok(())
     * # }
     * ```
     */
    pub fn open(&mut self, port: &str, timeout: Duration) -> Result<(), CecError> {
        if self.connection.is_some() {
            self.events
                .log(LogLevel::Error, "connection already opened");
            return Err(CecError::AlreadyOpen);
        }
        let link = Arc::new(AdapterLink::open(
            port,
            CEC_SERIAL_BAUD_RATE,
            timeout,
            Arc::clone(&self.events),
        )?);
        let processor = CecProcessor::new(
            Arc::clone(&link),
            Arc::clone(&self.events),
            self.device_name,
            self.logical_address,
            self.physical_address,
        );
        if let Err(e) = processor.start() {
            self.events
                .log(LogLevel::Error, "could not start CEC communications");
            link.close();
            return Err(e);
        }
        self.connection = Some(Connection { link, processor });
        Ok(())
    }

    /// Stop both background threads and release the serial port.
    pub fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.processor.stop();
            connection.link.close();
        }
    }

    pub fn is_open(&self) -> bool {
        self.connection.as_ref().map_or(false, |c| c.link.is_open())
    }

    fn connection(&self) -> Result<&Connection, CecError> {
        self.connection.as_ref().ok_or(CecError::Closed)
    }

    /// Check that the adapter firmware is alive.
    pub fn ping(&self) -> Result<(), CecError> {
        self.connection()?.link.ping()
    }

    /// Put the adapter into bootloader mode for a firmware update.
    /// The connection is useless afterwards until the device is re-plugged.
    pub fn start_bootloader(&self) -> Result<(), CecError> {
        self.connection()?.link.start_bootloader()
    }

    /// Send a CEC message. With `wait_for_ack` the call returns once the
    /// destination confirmed reception on the bus.
    pub fn transmit(&self, request: &TransmitRequest, wait_for_ack: bool) -> Result<(), CecError> {
        self.connection()?.processor.transmit(request, wait_for_ack)
    }

    /// Present ourselves under a different logical address from now on.
    pub fn set_logical_address(&mut self, address: CecLogicalAddress) -> Result<(), CecError> {
        self.logical_address = address;
        match &self.connection {
            Some(connection) => connection.processor.set_logical_address(address),
            // not connected yet: takes effect when the connection comes up
            None => Ok(()),
        }
    }

    /// Wake a device, the TV unless asked otherwise.
    pub fn power_on_devices(&self, address: CecLogicalAddress) -> Result<(), CecError> {
        self.connection()?.processor.power_on_devices(address)
    }

    /// Put a device into standby; broadcast to power down the whole bus.
    pub fn standby_devices(&self, address: CecLogicalAddress) -> Result<(), CecError> {
        self.connection()?.processor.standby_devices(address)
    }

    /// Announce ourselves as the active source.
    pub fn set_active_view(&self) -> Result<(), CecError> {
        self.connection()?.processor.set_active_view()
    }

    /// Tell the bus we have no video to present anymore.
    pub fn set_inactive_view(&self) -> Result<(), CecError> {
        self.connection()?.processor.set_inactive_view()
    }

    /// Oldest diagnostic message not yet drained, if any. Never blocks.
    pub fn poll_log_message(&self) -> Option<LogMessage> {
        self.events.pop_log()
    }

    /// Oldest remote control event not yet drained, if any. Never blocks.
    pub fn poll_keypress(&self) -> Option<CecKeypress> {
        self.events.pop_keypress()
    }

    /// Oldest bus command not yet drained, if any. Never blocks.
    pub fn poll_command(&self) -> Option<CecCommand> {
        self.events.pop_command()
    }

    pub fn min_version() -> u32 {
        CEC_MIN_VERSION
    }

    pub fn lib_version() -> u32 {
        CEC_LIB_VERSION
    }
}

impl Drop for CecAdapter {
    fn drop(&mut self) {
        self.close();
    }
}
