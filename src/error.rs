use thiserror::Error;

/// Errors that can occur when working with Concept2 performance monitors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Concept2Error {
    /// No attached device matched the Concept2 vendor id
    #[error("No Concept2 devices found")]
    NoDeviceFound,

    /// The selected device could not be opened
    #[error("Failed to open device at {path}: {reason}")]
    DeviceOpenFailed {
        /// Transport path of the selected device
        path: String,
        /// Underlying failure reported by the transport
        reason: String,
    },

    /// Requested device index is outside the matching device list
    #[error("Device index {index} out of range ({available} matching device(s))")]
    InvalidSelection {
        /// Requested zero-based index
        index: usize,
        /// Number of devices matching the vendor id
        available: usize,
    },

    /// Outbound payload does not fit in a wire record
    #[error("Payload too large: {len} bytes, at most {max} fit in a wire record")]
    PayloadTooLarge {
        /// Length of the rejected payload
        len: usize,
        /// Maximum payload length
        max: usize,
    },

    /// Failure reported by the underlying read/write primitives
    #[error("Transport error: {0}")]
    Transport(String),

    /// The frame decoder rejected the inbound byte stream
    #[error("Failed to decode frame: {0}")]
    Decode(String),

    /// Operation attempted on a closed adapter
    #[error("Device adapter is closed")]
    Closed,

    /// Invalid caller-supplied parameters
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
}

/// Result type for Concept2 operations
pub type Result<T> = std::result::Result<T, Concept2Error>;

impl Concept2Error {
    /// Check if this error aborted adapter construction
    #[must_use]
    pub const fn is_construction_error(&self) -> bool {
        matches!(
            self,
            Self::NoDeviceFound | Self::DeviceOpenFailed { .. } | Self::InvalidSelection { .. }
        )
    }

    /// Check if the caller can retry after adjusting the request
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PayloadTooLarge { .. } | Self::InvalidParameters(_) | Self::Decode(_)
        )
    }

    /// Check if this error came from the transport layer
    #[must_use]
    pub const fn is_transport_error(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::DeviceOpenFailed { .. })
    }
}

#[cfg(feature = "hid")]
impl From<hidapi::HidError> for Concept2Error {
    fn from(err: hidapi::HidError) -> Self {
        Self::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let no_device = Concept2Error::NoDeviceFound;
        assert!(no_device.is_construction_error());
        assert!(!no_device.is_recoverable());
        assert!(!no_device.is_transport_error());

        let open_failed = Concept2Error::DeviceOpenFailed {
            path: "/dev/hidraw0".to_string(),
            reason: "permission denied".to_string(),
        };
        assert!(open_failed.is_construction_error());
        assert!(open_failed.is_transport_error());

        let too_large = Concept2Error::PayloadTooLarge { len: 22, max: 21 };
        assert!(!too_large.is_construction_error());
        assert!(too_large.is_recoverable());

        let io = Concept2Error::Transport("device unplugged".to_string());
        assert!(io.is_transport_error());
        assert!(!io.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let error = Concept2Error::InvalidSelection {
            index: 2,
            available: 2,
        };
        let error_string = format!("{error}");
        assert!(error_string.contains("index 2"));
        assert!(error_string.contains("2 matching device(s)"));

        let error = Concept2Error::PayloadTooLarge { len: 30, max: 21 };
        assert_eq!(
            error.to_string(),
            "Payload too large: 30 bytes, at most 21 fit in a wire record"
        );
    }
}
