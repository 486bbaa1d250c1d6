//! Finding adapters on the USB bus.

use crate::error::CecError;
use serialport::SerialPortType;

/// USB vendor id of the adapter.
pub const CEC_ADAPTER_VID: u16 = 0x2548;
/// USB product id of the adapter.
pub const CEC_ADAPTER_PID: u16 = 0x1001;

/// One adapter found on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CecAdapterInfo {
    /// Bus location, `usb:vvvv:pppp`.
    pub path: String,
    /// The serial device to hand to [open](crate::CecAdapter::open),
    /// e.g. `/dev/ttyACM0` or `COM3`.
    pub comm: String,
}

/// List the CEC adapters connected to this machine.
///
/// `device_path` restricts the result to a single device, matched against
/// either field of [CecAdapterInfo].
pub fn find_adapters(device_path: Option<&str>) -> Result<Vec<CecAdapterInfo>, CecError> {
    let ports = serialport::available_ports().map_err(CecError::PortUnavailable)?;
    Ok(ports
        .into_iter()
        .filter_map(|port| match port.port_type {
            SerialPortType::UsbPort(usb)
                if usb.vid == CEC_ADAPTER_VID && usb.pid == CEC_ADAPTER_PID =>
            {
                Some(CecAdapterInfo {
                    path: format!("usb:{:04x}:{:04x}", usb.vid, usb.pid),
                    comm: port.port_name,
                })
            }
            _ => None,
        })
        .filter(|adapter| {
            device_path.map_or(true, |wanted| adapter.comm == wanted || adapter.path == wanted)
        })
        .collect())
}
