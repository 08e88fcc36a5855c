use bytes::Bytes;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, info, warn};

#[cfg(feature = "hid")]
use crate::hid::HidEnumerator;
use crate::{
    error::{Concept2Error, Result},
    events::{AdapterEvent, EventDispatcher, EventKind, EventStream, SubscriptionId},
    protocol::{strip_report_id, Frame, FrameDecoder, FrameReader, WireRecord},
    transport::{DeviceEnumerator, ReportStream, Transport},
    types::{AdapterConfig, AdapterState, DeviceDescriptor, WriteOptions},
};

/// Event-driven adapter for a Concept2 performance monitor
///
/// `Concept2Device` owns one open transport to a monitor and a CSAFE frame
/// decoder. Every inbound report has its report id stripped, is published as
/// a [`EventKind::Data`] event and is fed to the decoder; every frame the
/// decoder completes bumps [`frame_count`](Self::frame_count) and is
/// published as a [`EventKind::Frame`] event. Decoder failures are published
/// separately as [`EventKind::Error`] events.
///
/// Outbound payloads are written as fixed 22-byte wire records prefixed with
/// a record id. Writes are fire-and-forget: the monitor's answer arrives later
/// as an inbound frame.
///
/// Inbound reports are processed when the caller drives the adapter with
/// [`run`](Self::run), [`process_next`](Self::process_next) or
/// [`process_pending`](Self::process_pending).
///
/// # Examples
///
/// ```no_run
/// use concept2::{Concept2Device, Frame};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut monitor = Concept2Device::open()?;
///
///     monitor.on_frame(|frame| println!("frame: {:02X?}", frame.as_bytes()));
///
///     // Ask the monitor for its status
///     monitor.write(Frame::standard(&[0x80])?)?;
///
///     monitor.run().await?;
///     Ok(())
/// }
/// ```
pub struct Concept2Device {
    descriptor: DeviceDescriptor,
    transport: Option<Box<dyn Transport>>,
    reports: Option<ReportStream>,
    decoder: Box<dyn FrameDecoder>,
    events: EventDispatcher,
    frame_count: u64,
}

impl Concept2Device {
    /// Open the first attached Concept2 monitor
    ///
    /// # Errors
    ///
    /// Returns [`Concept2Error::NoDeviceFound`] if no monitor is attached,
    /// or [`Concept2Error::DeviceOpenFailed`] if it cannot be opened.
    #[cfg(feature = "hid")]
    pub fn open() -> Result<Self> {
        Self::open_with_config(&AdapterConfig::default())
    }

    /// Open the attached Concept2 monitor at `index`
    ///
    /// # Errors
    ///
    /// Returns [`Concept2Error::InvalidSelection`] if fewer than `index + 1`
    /// monitors are attached, plus the errors of [`open`](Self::open).
    #[cfg(feature = "hid")]
    pub fn open_index(index: usize) -> Result<Self> {
        Self::open_with_config(&AdapterConfig {
            index,
            ..AdapterConfig::default()
        })
    }

    /// Open a monitor over HID using custom selection parameters
    ///
    /// # Errors
    ///
    /// Returns any construction error described on [`open_with`](Self::open_with),
    /// or [`Concept2Error::Transport`] if the HID library cannot be initialised.
    #[cfg(feature = "hid")]
    pub fn open_with_config(config: &AdapterConfig) -> Result<Self> {
        let enumerator = HidEnumerator::new()?;
        Self::open_with(&enumerator, Box::new(FrameReader::new()), config)
    }

    /// Open a monitor through the given enumerator and frame decoder
    ///
    /// Devices are filtered by `config.vendor_id` in enumeration order and the
    /// one at `config.index` is opened.
    ///
    /// # Errors
    ///
    /// - [`Concept2Error::NoDeviceFound`] if no device matches the vendor id
    /// - [`Concept2Error::InvalidSelection`] if `config.index` is out of range
    /// - [`Concept2Error::DeviceOpenFailed`] if the transport cannot be opened
    ///   or refuses to deliver reports
    /// - [`Concept2Error::Transport`] if enumeration itself fails
    pub fn open_with(
        enumerator: &dyn DeviceEnumerator,
        decoder: Box<dyn FrameDecoder>,
        config: &AdapterConfig,
    ) -> Result<Self> {
        let mut devices = Self::list_devices(enumerator, config.vendor_id)?;

        if devices.is_empty() {
            return Err(Concept2Error::NoDeviceFound);
        }

        if config.index >= devices.len() {
            return Err(Concept2Error::InvalidSelection {
                index: config.index,
                available: devices.len(),
            });
        }

        let descriptor = devices.swap_remove(config.index);
        info!("Opening Concept2 device {}", descriptor);

        let mut transport =
            enumerator
                .open(&descriptor)
                .map_err(|e| Concept2Error::DeviceOpenFailed {
                    path: descriptor.path.clone(),
                    reason: e.to_string(),
                })?;

        let reports = match transport.subscribe() {
            Ok(reports) => reports,
            Err(e) => {
                let _ = transport.close();
                return Err(Concept2Error::DeviceOpenFailed {
                    path: descriptor.path,
                    reason: e.to_string(),
                });
            }
        };

        Ok(Self {
            descriptor,
            transport: Some(transport),
            reports: Some(reports),
            decoder,
            events: EventDispatcher::new(),
            frame_count: 0,
        })
    }

    /// List attached devices belonging to `vendor_id`, in enumeration order
    ///
    /// # Errors
    ///
    /// Returns [`Concept2Error::Transport`] if enumeration fails.
    pub fn list_devices(
        enumerator: &dyn DeviceEnumerator,
        vendor_id: u16,
    ) -> Result<Vec<DeviceDescriptor>> {
        let devices: Vec<DeviceDescriptor> = enumerator
            .devices()?
            .into_iter()
            .filter(|d| d.matches_vendor(vendor_id))
            .collect();

        debug!("Found {} device(s) for vendor {:04x}", devices.len(), vendor_id);
        Ok(devices)
    }

    /// List attached Concept2 monitors over HID
    ///
    /// # Errors
    ///
    /// Returns [`Concept2Error::Transport`] if the HID library cannot be
    /// initialised or enumeration fails.
    #[cfg(feature = "hid")]
    pub fn devices() -> Result<Vec<DeviceDescriptor>> {
        let enumerator = HidEnumerator::new()?;
        Self::list_devices(&enumerator, crate::VENDOR_ID)
    }

    /// Descriptor of the opened device
    #[must_use]
    pub const fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// Number of frame events emitted since construction
    #[must_use]
    pub const fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Current lifecycle state
    #[must_use]
    pub const fn state(&self) -> AdapterState {
        if self.transport.is_some() {
            AdapterState::Open
        } else {
            AdapterState::Closed
        }
    }

    /// Check if the transport is still held
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Register a callback for one kind of event
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&AdapterEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(kind, handler)
    }

    /// Register a callback for report payloads
    pub fn on_data<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Bytes) + Send + Sync + 'static,
    {
        self.events.subscribe(EventKind::Data, move |event| {
            if let AdapterEvent::Data(payload) = event {
                handler(payload);
            }
        })
    }

    /// Register a callback for decoded frames
    pub fn on_frame<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        self.events.subscribe(EventKind::Frame, move |event| {
            if let AdapterEvent::Frame(frame) = event {
                handler(frame);
            }
        })
    }

    /// Register a callback for inbound failures
    pub fn on_error<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Concept2Error) + Send + Sync + 'static,
    {
        self.events.subscribe(EventKind::Error, move |event| {
            if let AdapterEvent::Error(err) = event {
                handler(err);
            }
        })
    }

    /// Remove a subscription, returning whether it existed
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Subscribe to one kind of event as a stream
    ///
    /// The stream ends when the adapter is closed.
    #[must_use]
    pub fn stream(&self, kind: EventKind) -> EventStream {
        self.events.stream(kind)
    }

    /// Shared handle to the adapter's subscriber registry
    #[must_use]
    pub fn events(&self) -> EventDispatcher {
        self.events.clone()
    }

    /// Wait for the next inbound report and process it
    ///
    /// Returns `Ok(false)` once the transport stops delivering reports.
    ///
    /// # Errors
    ///
    /// Returns [`Concept2Error::Closed`] after [`close`](Self::close), or the
    /// transport failure delivered in place of a report. Transport failures
    /// are also published as error events and leave the adapter open.
    pub async fn process_next(&mut self) -> Result<bool> {
        let reports = self.reports.as_mut().ok_or(Concept2Error::Closed)?;

        match reports.recv().await {
            Some(Ok(record)) => {
                self.handle_report(&record)?;
                Ok(true)
            }
            Some(Err(e)) => Err(self.report_failure(e)),
            None => {
                debug!("Report stream for {} ended", self.descriptor.path);
                Ok(false)
            }
        }
    }

    /// Process every inbound report already delivered, without waiting
    ///
    /// Returns the number of reports processed.
    ///
    /// # Errors
    ///
    /// Same as [`process_next`](Self::process_next). Reports behind a failure
    /// stay queued for the next call.
    pub fn process_pending(&mut self) -> Result<usize> {
        let mut processed = 0;

        loop {
            let reports = self.reports.as_mut().ok_or(Concept2Error::Closed)?;
            match reports.try_recv() {
                Ok(Ok(record)) => {
                    self.handle_report(&record)?;
                    processed += 1;
                }
                Ok(Err(e)) => return Err(self.report_failure(e)),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return Ok(processed),
            }
        }
    }

    /// Process inbound reports until the transport stops delivering them
    ///
    /// Transport failures are published as error events and processing
    /// continues.
    ///
    /// # Errors
    ///
    /// Returns [`Concept2Error::Closed`] if the adapter is already closed.
    pub async fn run(&mut self) -> Result<()> {
        self.ensure_open()?;

        loop {
            match self.process_next().await {
                Ok(true) => {}
                Ok(false) => return Ok(()),
                Err(Concept2Error::Closed) => return Err(Concept2Error::Closed),
                Err(e) => debug!("Continuing after inbound failure: {}", e),
            }
        }
    }

    /// Handle one raw inbound record as delivered by the transport
    ///
    /// The report id is stripped, the payload is published as a data event
    /// and then fed to the frame decoder; completed frames and decode
    /// failures are published before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`Concept2Error::Closed`] after [`close`](Self::close).
    pub fn handle_report(&mut self, record: &Bytes) -> Result<()> {
        self.ensure_open()?;

        let payload = strip_report_id(record);
        self.events.emit(&AdapterEvent::Data(payload.clone()));

        self.decoder.read(&payload);
        while let Some(result) = self.decoder.next_frame() {
            match result {
                Ok(frame) => self.emit_frame(frame),
                Err(e) => {
                    warn!("Frame decoder rejected input: {}", e);
                    self.events.emit(&AdapterEvent::Error(e));
                }
            }
        }

        Ok(())
    }

    fn emit_frame(&mut self, frame: Frame) {
        self.frame_count += 1;
        debug!(
            "Frame #{}: {:02X?}",
            self.frame_count,
            frame.as_bytes()
        );
        self.events.emit(&AdapterEvent::Frame(frame));
    }

    fn report_failure(&self, err: Concept2Error) -> Concept2Error {
        warn!("Inbound transport failure on {}: {}", self.descriptor.path, err);
        self.events.emit(&AdapterEvent::Error(err.clone()));
        err
    }

    /// Hand `callback` directly to the transport's read primitive
    ///
    /// The callback receives the raw record, report id included.
    ///
    /// The read competes with inbound processing for the same report queue:
    /// a record handed to `callback` is consumed by it and never published as
    /// a data or frame event, nor fed to the frame decoder.
    ///
    /// Over HID the read is queued to the transport's reader thread and this
    /// call returns at once; `callback` runs on that thread after at most one
    /// read timeout, with an error if no report arrived in time. Other
    /// transports may run `callback` synchronously before returning, so keep
    /// it short and non-blocking.
    ///
    /// # Errors
    ///
    /// Returns [`Concept2Error::Closed`] after [`close`](Self::close).
    pub fn read<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(Result<Bytes>) + Send + 'static,
    {
        self.transport()?.read(Box::new(callback));
        Ok(())
    }

    /// Write a payload with the default record id
    ///
    /// `data` may be raw bytes or a [`Frame`], whose raw buffer is written.
    ///
    /// # Errors
    ///
    /// Same as [`write_with`](Self::write_with).
    pub fn write<D: AsRef<[u8]>>(&self, data: D) -> Result<()> {
        self.write_with(data, WriteOptions::default())
    }

    /// Write a payload as a fixed-size wire record
    ///
    /// # Errors
    ///
    /// - [`Concept2Error::PayloadTooLarge`] if the payload does not fit behind
    ///   the record id byte; nothing is written
    /// - [`Concept2Error::Transport`] if the device rejects the write
    /// - [`Concept2Error::Closed`] after [`close`](Self::close)
    pub fn write_with<D: AsRef<[u8]>>(&self, data: D, options: WriteOptions) -> Result<()> {
        let transport = self.transport()?;
        let record = WireRecord::new(options.record_id, data.as_ref())?;

        let written = transport.write(record.as_bytes())?;
        debug!("Wrote {} byte record to {}", written, transport.path());
        Ok(())
    }

    /// Release the transport and end all event streams
    ///
    /// Closing an already closed adapter is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Concept2Error::Transport`] if the transport fails to
    /// release cleanly; the adapter is closed regardless.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut transport) = self.transport.take() else {
            return Ok(());
        };

        self.reports = None;
        self.decoder.reset();
        self.events.clear();

        info!(
            "Closing Concept2 device {} after {} frame(s)",
            self.descriptor.path, self.frame_count
        );
        transport.close()
    }

    fn transport(&self) -> Result<&dyn Transport> {
        self.transport.as_deref().ok_or(Concept2Error::Closed)
    }

    fn ensure_open(&self) -> Result<()> {
        self.transport().map(|_| ())
    }
}

impl Drop for Concept2Device {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close {}: {}", self.descriptor.path, e);
        }
    }
}
