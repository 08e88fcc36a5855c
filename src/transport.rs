use bytes::Bytes;
use tokio::sync::mpsc;

use crate::{error::Result, types::DeviceDescriptor};

/// Inbound reports in arrival order, one item per physical report
///
/// Records still carry their report id byte. The stream ends when the
/// transport is closed or stops delivering after a read failure.
pub type ReportStream = mpsc::UnboundedReceiver<Result<Bytes>>;

/// Callback handed to a single pass-through read
pub type ReadCallback = Box<dyn FnOnce(Result<Bytes>) + Send + 'static>;

/// One open connection to a physical device
pub trait Transport: Send {
    /// Path the transport was opened from
    fn path(&self) -> &str;

    /// Take the inbound report stream
    ///
    /// # Errors
    ///
    /// Returns an error if the stream was already taken or the transport
    /// cannot start delivering reports.
    fn subscribe(&mut self) -> Result<ReportStream>;

    /// Read a single report and hand the outcome to `callback`
    ///
    /// The report is taken from the same queue that feeds the report stream.
    /// Implementations may run `callback` on another thread.
    fn read(&self, callback: ReadCallback);

    /// Write one complete record, returning the number of bytes written
    ///
    /// # Errors
    ///
    /// Returns [`crate::Concept2Error::Transport`] if the device rejects the write.
    fn write(&self, record: &[u8]) -> Result<usize>;

    /// Release the connection
    ///
    /// # Errors
    ///
    /// Returns [`crate::Concept2Error::Transport`] if the connection cannot be
    /// released cleanly.
    fn close(&mut self) -> Result<()>;
}

/// Source of attached devices
pub trait DeviceEnumerator {
    /// List every attached device, unfiltered and in enumeration order
    ///
    /// # Errors
    ///
    /// Returns [`crate::Concept2Error::Transport`] if enumeration fails.
    fn devices(&self) -> Result<Vec<DeviceDescriptor>>;

    /// Open a transport to the given device
    ///
    /// # Errors
    ///
    /// Returns an error describing why the device could not be opened.
    fn open(&self, descriptor: &DeviceDescriptor) -> Result<Box<dyn Transport>>;
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use crate::error::Concept2Error;
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
    };

    #[derive(Default)]
    struct MockState {
        sender: Option<mpsc::UnboundedSender<Result<Bytes>>>,
        written: Vec<Vec<u8>>,
        reads: VecDeque<Result<Bytes>>,
        fail_writes: bool,
        closed: bool,
    }

    /// Test-side view of an opened mock transport
    #[derive(Clone)]
    pub(crate) struct MockHandle {
        pub(crate) path: String,
        state: Arc<Mutex<MockState>>,
    }

    impl MockHandle {
        pub(crate) fn push(&self, record: &[u8]) {
            self.push_result(Ok(Bytes::copy_from_slice(record)));
        }

        pub(crate) fn push_result(&self, result: Result<Bytes>) {
            let state = self.state.lock().unwrap();
            if let Some(sender) = &state.sender {
                let _ = sender.send(result);
            }
        }

        pub(crate) fn end_stream(&self) {
            self.state.lock().unwrap().sender = None;
        }

        pub(crate) fn queue_read(&self, result: Result<Bytes>) {
            self.state.lock().unwrap().reads.push_back(result);
        }

        pub(crate) fn fail_writes(&self, fail: bool) {
            self.state.lock().unwrap().fail_writes = fail;
        }

        pub(crate) fn written(&self) -> Vec<Vec<u8>> {
            self.state.lock().unwrap().written.clone()
        }

        pub(crate) fn is_closed(&self) -> bool {
            self.state.lock().unwrap().closed
        }
    }

    pub(crate) struct MockTransport {
        path: String,
        stream: Option<ReportStream>,
        state: Arc<Mutex<MockState>>,
    }

    impl Transport for MockTransport {
        fn path(&self) -> &str {
            &self.path
        }

        fn subscribe(&mut self) -> Result<ReportStream> {
            self.stream
                .take()
                .ok_or_else(|| Concept2Error::Transport("already subscribed".to_string()))
        }

        fn read(&self, callback: ReadCallback) {
            let next = self.state.lock().unwrap().reads.pop_front();
            callback(next.unwrap_or_else(|| Err(Concept2Error::Transport("timed out".to_string()))));
        }

        fn write(&self, record: &[u8]) -> Result<usize> {
            let mut state = self.state.lock().unwrap();
            if state.fail_writes {
                return Err(Concept2Error::Transport("device disconnected".to_string()));
            }
            state.written.push(record.to_vec());
            Ok(record.len())
        }

        fn close(&mut self) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.closed = true;
            state.sender = None;
            Ok(())
        }
    }

    /// Enumerator over a fixed device list
    #[derive(Default)]
    pub(crate) struct MockEnumerator {
        devices: Vec<DeviceDescriptor>,
        fail_open: Option<String>,
        opened: Mutex<Vec<MockHandle>>,
    }

    impl MockEnumerator {
        pub(crate) fn new(devices: Vec<DeviceDescriptor>) -> Self {
            Self {
                devices,
                ..Self::default()
            }
        }

        pub(crate) fn failing_open(devices: Vec<DeviceDescriptor>, reason: &str) -> Self {
            Self {
                devices,
                fail_open: Some(reason.to_string()),
                ..Self::default()
            }
        }

        pub(crate) fn opened(&self) -> Vec<MockHandle> {
            self.opened.lock().unwrap().clone()
        }

        pub(crate) fn last_opened(&self) -> MockHandle {
            self.opened().pop().unwrap()
        }
    }

    impl DeviceEnumerator for MockEnumerator {
        fn devices(&self) -> Result<Vec<DeviceDescriptor>> {
            Ok(self.devices.clone())
        }

        fn open(&self, descriptor: &DeviceDescriptor) -> Result<Box<dyn Transport>> {
            if let Some(reason) = &self.fail_open {
                return Err(Concept2Error::Transport(reason.clone()));
            }

            let (sender, receiver) = mpsc::unbounded_channel();
            let state = Arc::new(Mutex::new(MockState {
                sender: Some(sender),
                ..MockState::default()
            }));

            self.opened.lock().unwrap().push(MockHandle {
                path: descriptor.path.clone(),
                state: Arc::clone(&state),
            });

            Ok(Box::new(MockTransport {
                path: descriptor.path.clone(),
                stream: Some(receiver),
                state,
            }))
        }
    }
}
