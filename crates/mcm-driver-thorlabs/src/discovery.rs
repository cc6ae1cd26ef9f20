//! Serial port resolution for MCM3000 controllers.
//!
//! A configured port is used as-is unless it is `"auto"`, in which case the
//! system's USB serial ports are scanned for one whose product or
//! manufacturer string mentions `MCM3000`.

use mcm_core::{McmError, McmResult};
use serialport::SerialPortType;
use tracing::{debug, info, warn};

/// Port name that requests auto-detection.
pub const AUTO_PORT: &str = "auto";

/// Marker the controller's USB descriptor carries.
const DEVICE_MARKER: &str = "MCM3000";

/// A serial port as reported by the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortListing {
    /// OS port name (`/dev/ttyUSB0`, `COM3`)
    pub name: String,
    /// USB product string, if any
    pub product: Option<String>,
    /// USB manufacturer string, if any
    pub manufacturer: Option<String>,
}

impl PortListing {
    /// Whether the descriptor identifies an MCM3000.
    #[must_use]
    pub fn is_mcm3000(&self) -> bool {
        descriptor_matches(self.product.as_deref()) || descriptor_matches(self.manufacturer.as_deref())
    }
}

fn descriptor_matches(text: Option<&str>) -> bool {
    text.is_some_and(|t| t.to_ascii_uppercase().contains(DEVICE_MARKER))
}

/// Enumerate the system serial ports.
pub fn list_ports() -> McmResult<Vec<PortListing>> {
    let ports = serialport::available_ports()
        .map_err(|e| McmError::connection(AUTO_PORT, format!("failed to enumerate ports: {}", e)))?;

    Ok(ports
        .into_iter()
        .map(|p| match p.port_type {
            SerialPortType::UsbPort(info) => PortListing {
                name: p.port_name,
                product: info.product,
                manufacturer: info.manufacturer,
            },
            _ => PortListing {
                name: p.port_name,
                product: None,
                manufacturer: None,
            },
        })
        .collect())
}

/// Choose the controller among `ports`.
///
/// Picks the first match and warns when there are several.
pub fn select_mcm3000(ports: &[PortListing]) -> McmResult<String> {
    let matches: Vec<&PortListing> = ports.iter().filter(|p| p.is_mcm3000()).collect();

    match matches.as_slice() {
        [] => Err(McmError::connection(
            AUTO_PORT,
            "unable to automatically detect MCM3000 on any port",
        )),
        [only] => {
            info!(port = %only.name, "Found MCM3000");
            Ok(only.name.clone())
        }
        [first, rest @ ..] => {
            let others: Vec<&str> = rest.iter().map(|p| p.name.as_str()).collect();
            warn!(
                port = %first.name,
                others = ?others,
                "Multiple MCM3000 controllers found, using the first"
            );
            Ok(first.name.clone())
        }
    }
}

/// Resolve a configured port name to a concrete path.
pub fn resolve_port(configured: &str) -> McmResult<String> {
    if configured.eq_ignore_ascii_case(AUTO_PORT) {
        debug!("Auto-detecting MCM3000 port");
        select_mcm3000(&list_ports()?)
    } else {
        Ok(configured.to_string())
    }
}
