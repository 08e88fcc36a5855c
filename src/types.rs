use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{
    error::{Concept2Error, Result},
    DEFAULT_RECORD_ID, VENDOR_ID,
};

/// Identifying metadata for one attached HID device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// USB vendor id
    pub vendor_id: u16,
    /// USB product id
    pub product_id: u16,
    /// Platform specific transport path used to open the device
    pub path: String,
    /// Serial number string
    pub serial_number: Option<String>,
    /// Manufacturer string
    pub manufacturer: Option<String>,
    /// Product string
    pub product: Option<String>,
    /// USB interface number
    pub interface_number: Option<i32>,
}

impl DeviceDescriptor {
    /// Create a descriptor with only the identifying fields set
    #[must_use]
    pub fn new(vendor_id: u16, product_id: u16, path: impl Into<String>) -> Self {
        Self {
            vendor_id,
            product_id,
            path: path.into(),
            serial_number: None,
            manufacturer: None,
            product: None,
            interface_number: None,
        }
    }

    /// Check if this descriptor belongs to the given vendor
    #[must_use]
    pub const fn matches_vendor(&self, vendor_id: u16) -> bool {
        self.vendor_id == vendor_id
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} {}",
            self.vendor_id, self.product_id, self.path
        )?;
        if let Some(product) = &self.product {
            write!(f, " ({product})")?;
        }
        Ok(())
    }
}

/// Adapter lifecycle state
///
/// Construction either yields an `Open` adapter or an error, so the
/// unopened and failed states are never observable on an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterState {
    /// Transport is live and subscriptions are active
    Open,
    /// Transport has been released
    Closed,
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "Open"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// Device selection parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Zero-based index into the vendor-filtered device list
    pub index: usize,
    /// Vendor id used to filter enumerated devices
    pub vendor_id: u16,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            index: 0,
            vendor_id: VENDOR_ID,
        }
    }
}

/// Options for a single outbound write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOptions {
    /// Record identifier placed in the first byte of the wire record
    pub record_id: u8,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            record_id: DEFAULT_RECORD_ID,
        }
    }
}

/// HID transport settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HidConfig {
    /// Read timeout used by the background reader and by pass-through reads
    ///
    /// Must be positive. It bounds how long an outbound write or a close
    /// waits for the reader thread.
    pub read_timeout_ms: i32,
    /// Size of the buffer a single input report is read into
    pub input_report_size: usize,
}

impl Default for HidConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 50,
            input_report_size: 128,
        }
    }
}

impl HidConfig {
    /// Check that the reader thread can make progress with these settings
    ///
    /// # Errors
    ///
    /// Returns [`Concept2Error::InvalidParameters`] if the read timeout is not
    /// positive or the input report size is zero.
    pub fn validate(&self) -> Result<()> {
        if self.read_timeout_ms <= 0 {
            return Err(Concept2Error::InvalidParameters(format!(
                "read timeout must be positive, got {}ms",
                self.read_timeout_ms
            )));
        }

        if self.input_report_size == 0 {
            return Err(Concept2Error::InvalidParameters(
                "input report size must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_adapter_config_defaults() {
        let config = AdapterConfig::default();
        assert_eq!(config.index, 0);
        assert_eq!(config.vendor_id, 6052);
    }

    #[test]
    fn test_write_options_default_record_id() {
        assert_eq!(WriteOptions::default().record_id, 1);
    }

    #[test]
    fn test_hid_config_defaults() {
        let config = HidConfig::default();
        assert_eq!(config.read_timeout_ms, 50);
        assert_eq!(config.input_report_size, 128);
        assert_ok!(config.validate());
    }

    #[test]
    fn test_hid_config_rejects_blocking_timeout() {
        for read_timeout_ms in [0, -1, i32::MIN] {
            let config = HidConfig {
                read_timeout_ms,
                ..HidConfig::default()
            };
            assert!(matches!(
                config.validate(),
                Err(Concept2Error::InvalidParameters(_))
            ));
        }
    }

    #[test]
    fn test_hid_config_rejects_empty_report_buffer() {
        let config = HidConfig {
            input_report_size: 0,
            ..HidConfig::default()
        };
        assert_err!(config.validate());
    }

    #[test]
    fn test_descriptor_display() {
        let mut descriptor = DeviceDescriptor::new(0x17a4, 0x0001, "/dev/hidraw3");
        assert_eq!(descriptor.to_string(), "17a4:0001 /dev/hidraw3");

        descriptor.product = Some("PM5".to_string());
        assert_eq!(descriptor.to_string(), "17a4:0001 /dev/hidraw3 (PM5)");
        assert!(descriptor.matches_vendor(6052));
        assert!(!descriptor.matches_vendor(0x0483));
    }
}
