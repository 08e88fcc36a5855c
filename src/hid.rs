use bytes::Bytes;
use futures::{channel::oneshot, executor};
use hidapi::{HidApi, HidDevice};
use std::{
    ffi::CString,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle},
};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use crate::{
    error::{Concept2Error, Result},
    transport::{DeviceEnumerator, ReadCallback, ReportStream, Transport},
    types::{DeviceDescriptor, HidConfig},
};

/// Device enumerator backed by the platform HID library
pub struct HidEnumerator {
    api: Mutex<HidApi>,
    config: HidConfig,
}

impl HidEnumerator {
    /// Initialise the HID library with default transport settings
    ///
    /// # Errors
    ///
    /// Returns [`Concept2Error::Transport`] if the HID library cannot be initialised.
    pub fn new() -> Result<Self> {
        Self::with_config(HidConfig::default())
    }

    /// Initialise the HID library with custom transport settings
    ///
    /// # Errors
    ///
    /// Returns [`Concept2Error::InvalidParameters`] if `config` fails
    /// [`HidConfig::validate`], or [`Concept2Error::Transport`] if the HID
    /// library cannot be initialised.
    pub fn with_config(config: HidConfig) -> Result<Self> {
        config.validate()?;

        let api = HidApi::new()?;
        Ok(Self {
            api: Mutex::new(api),
            config,
        })
    }

    fn api(&self) -> MutexGuard<'_, HidApi> {
        self.api.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DeviceEnumerator for HidEnumerator {
    fn devices(&self) -> Result<Vec<DeviceDescriptor>> {
        let mut api = self.api();
        api.refresh_devices()?;

        let devices: Vec<DeviceDescriptor> = api
            .device_list()
            .map(|info| DeviceDescriptor {
                vendor_id: info.vendor_id(),
                product_id: info.product_id(),
                path: info.path().to_string_lossy().into_owned(),
                serial_number: info.serial_number().map(str::to_string),
                manufacturer: info.manufacturer_string().map(str::to_string),
                product: info.product_string().map(str::to_string),
                interface_number: Some(info.interface_number()),
            })
            .collect();

        debug!("Enumerated {} HID device(s)", devices.len());
        Ok(devices)
    }

    fn open(&self, descriptor: &DeviceDescriptor) -> Result<Box<dyn Transport>> {
        let path = CString::new(descriptor.path.as_str())
            .map_err(|e| Concept2Error::InvalidParameters(format!("Invalid device path: {e}")))?;

        let device = self.api().open_path(&path)?;
        info!("Opened HID device {}", descriptor);

        Ok(Box::new(HidTransport::start(
            descriptor.path.clone(),
            device,
            self.config.clone(),
        )?))
    }
}

/// Blocking report I/O driven by the HID worker thread
pub(crate) trait ReportSource: Send + 'static {
    /// Read one report into `buf`, returning 0 if none arrived within `timeout_ms`
    fn read_report(&mut self, buf: &mut [u8], timeout_ms: i32) -> Result<usize>;

    /// Write one complete record
    fn write_report(&mut self, record: &[u8]) -> Result<usize>;
}

impl ReportSource for HidDevice {
    fn read_report(&mut self, buf: &mut [u8], timeout_ms: i32) -> Result<usize> {
        Ok(self.read_timeout(buf, timeout_ms)?)
    }

    fn write_report(&mut self, record: &[u8]) -> Result<usize> {
        Ok(self.write(record)?)
    }
}

/// Work handed to the worker thread between two reads
enum Request {
    Write(Vec<u8>, oneshot::Sender<Result<usize>>),
    Read(ReadCallback),
}

impl Request {
    fn fail(self, error: Concept2Error) {
        match self {
            Self::Write(_, reply) => {
                let _ = reply.send(Err(error));
            }
            Self::Read(callback) => callback(Err(error)),
        }
    }
}

fn worker_stopped() -> Concept2Error {
    Concept2Error::Transport("HID worker stopped".to_string())
}

/// Sole owner of the device handle
///
/// Each pass serves every queued request, then waits up to one read timeout
/// for an inbound report. A queued write therefore waits at most one read
/// window, however busy the inbound side is.
struct Worker<S> {
    source: S,
    config: HidConfig,
    reports: mpsc::UnboundedSender<Result<Bytes>>,
    requests: mpsc::UnboundedReceiver<Request>,
    running: Arc<AtomicBool>,
}

impl<S: ReportSource> Worker<S> {
    fn run(mut self) {
        while self.running.load(Ordering::SeqCst) {
            if !self.serve_requests() {
                debug!("HID transport dropped");
                break;
            }

            match self.read_report() {
                Ok(Some(record)) => {
                    if self.reports.send(Ok(record)).is_err() {
                        debug!("Report stream dropped");
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("HID read failed: {}", e);
                    let _ = self.reports.send(Err(e));
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        self.requests.close();
        while let Ok(request) = self.requests.try_recv() {
            request.fail(worker_stopped());
        }
        debug!("HID worker stopped");
    }

    /// Returns `false` once the owning transport is gone
    fn serve_requests(&mut self) -> bool {
        loop {
            match self.requests.try_recv() {
                Ok(Request::Write(record, reply)) => {
                    let _ = reply.send(self.source.write_report(&record));
                }
                Ok(Request::Read(callback)) => {
                    let result = self.read_report().and_then(|record| {
                        record.ok_or_else(|| {
                            Concept2Error::Transport(format!(
                                "No report within {}ms",
                                self.config.read_timeout_ms
                            ))
                        })
                    });
                    callback(result);
                }
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn read_report(&mut self) -> Result<Option<Bytes>> {
        let mut buf = vec![0u8; self.config.input_report_size];
        let len = self
            .source
            .read_report(&mut buf, self.config.read_timeout_ms)?;

        if len == 0 {
            return Ok(None);
        }

        buf.truncate(len);
        Ok(Some(Bytes::from(buf)))
    }
}

/// Transport-side handle to a running worker
struct WorkerHandle {
    requests: mpsc::UnboundedSender<Request>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    fn spawn<S: ReportSource>(
        name: String,
        source: S,
        config: HidConfig,
    ) -> Result<(Self, ReportStream)> {
        let (reports, stream) = mpsc::unbounded_channel();
        let (requests, inbox) = mpsc::unbounded_channel();
        let running = Arc::new(AtomicBool::new(true));

        let worker = Worker {
            source,
            config,
            reports,
            requests: inbox,
            running: Arc::clone(&running),
        };

        let thread = thread::Builder::new()
            .name(name)
            .spawn(move || worker.run())
            .map_err(|e| Concept2Error::Transport(format!("Failed to start reader: {e}")))?;

        Ok((
            Self {
                requests,
                running,
                thread: Some(thread),
            },
            stream,
        ))
    }

    fn write(&self, record: &[u8]) -> Result<usize> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request::Write(record.to_vec(), reply))
            .map_err(|_| worker_stopped())?;

        executor::block_on(response).map_err(|_| worker_stopped())?
    }

    fn read(&self, callback: ReadCallback) {
        if let Err(mpsc::error::SendError(request)) = self.requests.send(Request::Read(callback)) {
            request.fail(worker_stopped());
        }
    }

    fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);

        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| Concept2Error::Transport("HID reader thread panicked".to_string()))?;
        }
        Ok(())
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Open HID connection
///
/// The HID library only offers blocking reads, so the device handle is moved
/// into a background worker thread that pulls inbound reports into the report
/// stream in arrival order. Writes and pass-through reads are queued to the
/// same thread and served between two reads. Reports arriving before
/// [`subscribe`](Transport::subscribe) is called are buffered.
pub struct HidTransport {
    path: String,
    worker: WorkerHandle,
    reports: Option<ReportStream>,
}

impl HidTransport {
    fn start(path: String, device: HidDevice, config: HidConfig) -> Result<Self> {
        let (worker, reports) =
            WorkerHandle::spawn(format!("concept2-hid-reader {path}"), device, config)?;

        Ok(Self {
            path,
            worker,
            reports: Some(reports),
        })
    }
}

impl Transport for HidTransport {
    fn path(&self) -> &str {
        &self.path
    }

    fn subscribe(&mut self) -> Result<ReportStream> {
        self.reports.take().ok_or_else(|| {
            Concept2Error::Transport(format!("Report stream for {} already taken", self.path))
        })
    }

    fn read(&self, callback: ReadCallback) {
        self.worker.read(callback);
    }

    fn write(&self, record: &[u8]) -> Result<usize> {
        debug!("Writing record: {:02X?}", record);
        self.worker.write(record)
    }

    fn close(&mut self) -> Result<()> {
        self.reports = None;
        self.worker.stop()?;

        info!("Closed HID device {}", self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::VecDeque, time::Duration};
    use tokio_test::{assert_err, assert_ok};

    fn test_config() -> HidConfig {
        HidConfig {
            read_timeout_ms: 5,
            input_report_size: 64,
        }
    }

    /// Scripted inbound reports; once the script runs out the source either
    /// idles for the full timeout or, when busy, reports a status frame on
    /// every read.
    #[derive(Default)]
    struct ScriptedSource {
        inbound: VecDeque<Result<Vec<u8>>>,
        written: Arc<Mutex<Vec<Vec<u8>>>>,
        busy: bool,
    }

    impl ScriptedSource {
        fn idle() -> Self {
            Self::default()
        }

        fn busy() -> Self {
            Self {
                busy: true,
                ..Self::default()
            }
        }

        fn with_inbound(inbound: Vec<Result<Vec<u8>>>) -> Self {
            Self {
                inbound: inbound.into(),
                ..Self::default()
            }
        }

        fn written(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
            Arc::clone(&self.written)
        }
    }

    impl ReportSource for ScriptedSource {
        fn read_report(&mut self, buf: &mut [u8], timeout_ms: i32) -> Result<usize> {
            match self.inbound.pop_front() {
                Some(Ok(report)) => {
                    buf[..report.len()].copy_from_slice(&report);
                    Ok(report.len())
                }
                Some(Err(e)) => Err(e),
                None if self.busy => {
                    buf[..3].copy_from_slice(&[0x01, 0xF1, 0xF2]);
                    Ok(3)
                }
                None => {
                    thread::sleep(Duration::from_millis(
                        u64::try_from(timeout_ms).unwrap_or_default(),
                    ));
                    Ok(0)
                }
            }
        }

        fn write_report(&mut self, record: &[u8]) -> Result<usize> {
            self.written.lock().unwrap().push(record.to_vec());
            Ok(record.len())
        }
    }

    fn spawn(source: ScriptedSource) -> (WorkerHandle, ReportStream) {
        WorkerHandle::spawn("concept2-test-worker".to_string(), source, test_config()).unwrap()
    }

    #[test]
    fn test_writes_interleave_with_busy_reader() {
        let source = ScriptedSource::busy();
        let written = source.written();
        let (mut worker, mut reports) = spawn(source);

        for i in 0..50u8 {
            assert_eq!(worker.write(&[0x01, i]), Ok(2));
        }

        let written = written.lock().unwrap().clone();
        assert_eq!(written.len(), 50);
        assert_eq!(written[0], vec![0x01, 0]);
        assert_eq!(written[49], vec![0x01, 49]);

        // The reader kept delivering while writes were served
        assert_eq!(
            reports.try_recv().unwrap(),
            Ok(Bytes::from_static(&[0x01, 0xF1, 0xF2]))
        );

        assert_ok!(worker.stop());
    }

    #[tokio::test]
    async fn test_write_from_async_task() {
        let source = ScriptedSource::with_inbound(vec![Ok(vec![0x01, 0xF1, 0x80, 0x80, 0xF2])]);
        let written = source.written();
        let (mut worker, mut reports) = spawn(source);

        assert_eq!(
            reports.recv().await,
            Some(Ok(Bytes::from_static(&[0x01, 0xF1, 0x80, 0x80, 0xF2])))
        );
        assert_eq!(worker.write(&[0x01, 0xF1, 0x80, 0x80, 0xF2]), Ok(5));
        assert_eq!(written.lock().unwrap().len(), 1);

        assert_ok!(worker.stop());
    }

    #[test]
    fn test_stop_joins_idle_worker() {
        let (mut worker, mut reports) = spawn(ScriptedSource::idle());

        assert_ok!(worker.stop());
        assert!(!worker.running.load(Ordering::SeqCst));
        assert_eq!(reports.blocking_recv(), None);

        // Stopping twice is harmless
        assert_ok!(worker.stop());
    }

    #[test]
    fn test_read_failure_is_forwarded_and_ends_stream() {
        let source = ScriptedSource::with_inbound(vec![
            Ok(vec![0x01, 0xAA]),
            Err(Concept2Error::Transport("device unplugged".to_string())),
        ]);
        let (mut worker, mut reports) = spawn(source);

        assert_eq!(
            reports.blocking_recv(),
            Some(Ok(Bytes::from_static(&[0x01, 0xAA])))
        );
        assert_eq!(
            reports.blocking_recv(),
            Some(Err(Concept2Error::Transport("device unplugged".to_string())))
        );
        assert_eq!(reports.blocking_recv(), None);

        assert_ok!(worker.stop());
        assert_eq!(worker.write(&[0x01]), Err(worker_stopped()));
    }

    #[test]
    fn test_dropped_report_stream_stops_worker() {
        let (mut worker, reports) = spawn(ScriptedSource::busy());
        drop(reports);

        assert_ok!(worker.stop());
        assert_err!(worker.write(&[0x01]));
    }

    #[test]
    fn test_pass_through_read_times_out() {
        let (mut worker, _reports) = spawn(ScriptedSource::idle());
        let (reply, response) = oneshot::channel();

        worker.read(Box::new(move |result| {
            let _ = reply.send(result);
        }));

        assert_eq!(
            executor::block_on(response).unwrap(),
            Err(Concept2Error::Transport("No report within 5ms".to_string()))
        );
        assert_ok!(worker.stop());
    }

    #[test]
    fn test_requests_after_stop_fail() {
        let (mut worker, _reports) = spawn(ScriptedSource::idle());
        assert_ok!(worker.stop());

        let (reply, response) = oneshot::channel();
        worker.read(Box::new(move |result| {
            let _ = reply.send(result);
        }));

        assert_eq!(executor::block_on(response).unwrap(), Err(worker_stopped()));
        assert_eq!(worker.write(&[0x01, 0x02]), Err(worker_stopped()));
    }

    #[test]
    fn test_with_config_rejects_non_positive_timeout() {
        let config = HidConfig {
            read_timeout_ms: -1,
            ..HidConfig::default()
        };

        assert!(matches!(
            HidEnumerator::with_config(config),
            Err(Concept2Error::InvalidParameters(_))
        ));
    }
}
