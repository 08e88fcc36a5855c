#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # Concept2
//!
//! A Rust library for talking to Concept2 performance monitors (PM3, PM4,
//! PM5) over USB HID using the CSAFE communication protocol.
//!
//! The monitor exposes itself as a HID device that streams fixed-size input
//! reports and accepts fixed-size output reports. This crate turns that report
//! stream into discrete events:
//!
//! - **Data events**: each report's payload with the HID report id stripped
//! - **Frame events**: complete CSAFE frames reassembled from the payloads
//! - **Error events**: frames the decoder rejected and inbound transport failures
//!
//! Outbound payloads (raw bytes or a prebuilt [`Frame`]) are written as 22-byte
//! wire records whose first byte is the record id.
//!
//! ## Architecture
//!
//! - [`transport`]: the [`DeviceEnumerator`] and [`Transport`] seams, so tests
//!   and alternative backends can stand in for real hardware
//! - [`hid`]: the `hidapi` backed implementation (feature `hid`, on by default)
//! - [`protocol`]: wire records, report id stripping and the CSAFE [`FrameReader`]
//! - [`events`]: the typed subscriber registry
//! - [`device`]: [`Concept2Device`], which wires all of the above together
//!
//! ## Quick Start
//!
//! ```no_run
//! use concept2::{Concept2Device, EventKind, Frame};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Open the first attached monitor
//!     let mut monitor = Concept2Device::open()?;
//!     let mut frames = monitor.stream(EventKind::Frame);
//!
//!     // Send a status request
//!     monitor.write(Frame::standard(&[0x80])?)?;
//!
//!     // Wait for the monitor's reply
//!     while monitor.process_next().await? {
//!         if let Some(frame) = frames.next().await {
//!             println!("{frame:?}");
//!             break;
//!         }
//!     }
//!
//!     monitor.close()?;
//!     Ok(())
//! }
//! ```

/// Device adapter
pub mod device;
/// Error types and handling
pub mod error;
/// Event kinds and subscriber registry
pub mod events;
/// HID transport backend
#[cfg(feature = "hid")]
pub mod hid;
/// Wire records and CSAFE framing
pub mod protocol;
/// Transport and enumeration traits
pub mod transport;
/// Type definitions and configuration
pub mod types;

// Re-export the main types for convenient usage
pub use device::Concept2Device;
pub use error::{Concept2Error, Result};
pub use events::{AdapterEvent, EventDispatcher, EventKind, EventStream, SubscriptionId};
#[cfg(feature = "hid")]
pub use hid::{HidEnumerator, HidTransport};
pub use protocol::{Frame, FrameDecoder, FrameReader, WireRecord, WIRE_RECORD_SIZE};
pub use transport::{DeviceEnumerator, ReadCallback, ReportStream, Transport};
pub use types::{AdapterConfig, AdapterState, DeviceDescriptor, HidConfig, WriteOptions};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Concept2 USB vendor id (0x17A4)
///
/// Every performance monitor enumerates under this vendor id; product ids
/// differ per monitor generation.
pub const VENDOR_ID: u16 = 6052;

/// Record id used for outbound writes unless one is given
///
/// Matches the monitor's smallest output report.
pub const DEFAULT_RECORD_ID: u8 = 1;
