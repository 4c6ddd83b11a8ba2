//! ## Transport
//!
//! A thin abstraction over USB control, bulk and interrupt transfers, so
//! the engine (framing, read/write, abort/clear, interrupt demux) can run
//! against either a real `rusb::DeviceHandle` or, in tests, an in-memory
//! mock.
//!

use std::time::Duration;

/// Transport-level failure classification, independent of any particular
/// USB backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Timeout,
    Disconnected,
    Stall,
    Overflow,
    Cancelled,
    Io(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Timeout => write!(f, "transfer timed out"),
            TransportError::Disconnected => write!(f, "device disconnected"),
            TransportError::Stall => write!(f, "endpoint stalled"),
            TransportError::Overflow => write!(f, "transfer overflow"),
            TransportError::Cancelled => write!(f, "transfer cancelled"),
            TransportError::Io(msg) => write!(f, "io error: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<rusb::Error> for TransportError {
    fn from(err: rusb::Error) -> Self {
        match err {
            rusb::Error::Timeout => TransportError::Timeout,
            rusb::Error::NoDevice | rusb::Error::NotFound => TransportError::Disconnected,
            rusb::Error::Pipe => TransportError::Stall,
            rusb::Error::Overflow => TransportError::Overflow,
            rusb::Error::Interrupted => TransportError::Cancelled,
            other => TransportError::Io(other.to_string()),
        }
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Abstract USB transport: control, bulk and interrupt transfers, plus
/// endpoint halt-clear. Mirrors the operations a USBTMC engine needs from
/// the host's USB stack, independent of `rusb`.
pub trait Transport: Send + Sync {
    /// Perform a control transfer. Direction is taken from bit 7 of
    /// `bm_request_type`: if set, this is an IN transfer and `buf` is
    /// filled with the device's reply; if clear, this is an OUT transfer
    /// and `buf` is sent to the device. Returns the number of bytes
    /// transferred.
    fn control_transfer(
        &self,
        bm_request_type: u8,
        b_request: u8,
        w_value: u16,
        w_index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> TransportResult<usize>;

    /// Write `buf` to a bulk-out endpoint. May return fewer bytes than
    /// `buf.len()`; callers resend the remainder.
    fn bulk_out(&self, endpoint: u8, buf: &[u8], timeout: Duration) -> TransportResult<usize>;

    /// Read up to `buf.len()` bytes from a bulk-in endpoint.
    fn bulk_in(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> TransportResult<usize>;

    /// Read a single interrupt-in notification, blocking up to `timeout`.
    fn interrupt_in(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> TransportResult<usize>;

    /// Clear a halt/stall condition on an endpoint.
    fn clear_halt(&self, endpoint: u8) -> TransportResult<()>;

    /// Release a claimed interface. Called once, from the client's
    /// teardown path; default no-op for transports without the concept.
    fn release_interface(&self, _interface_number: u8) -> TransportResult<()> {
        Ok(())
    }

    /// Re-attach the OS kernel driver to an interface this crate
    /// detached it from. Default no-op for transports without the
    /// concept.
    fn attach_kernel_driver(&self, _interface_number: u8) -> TransportResult<()> {
        Ok(())
    }
}

/// `Transport` implementation over a real `rusb::DeviceHandle`.
pub struct RusbTransport {
    handle: rusb::DeviceHandle<rusb::Context>,
}

impl RusbTransport {
    pub fn new(handle: rusb::DeviceHandle<rusb::Context>) -> Self {
        RusbTransport { handle }
    }

    pub fn inner(&self) -> &rusb::DeviceHandle<rusb::Context> {
        &self.handle
    }

    pub fn inner_mut(&mut self) -> &mut rusb::DeviceHandle<rusb::Context> {
        &mut self.handle
    }
}

impl Transport for RusbTransport {
    fn control_transfer(
        &self,
        bm_request_type: u8,
        b_request: u8,
        w_value: u16,
        w_index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> TransportResult<usize> {
        if bm_request_type & 0x80 != 0 {
            self.handle
                .read_control(bm_request_type, b_request, w_value, w_index, buf, timeout)
                .map_err(TransportError::from)
        } else {
            self.handle
                .write_control(bm_request_type, b_request, w_value, w_index, buf, timeout)
                .map_err(TransportError::from)
        }
    }

    fn bulk_out(&self, endpoint: u8, buf: &[u8], timeout: Duration) -> TransportResult<usize> {
        self.handle
            .write_bulk(endpoint, buf, timeout)
            .map_err(TransportError::from)
    }

    fn bulk_in(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> TransportResult<usize> {
        self.handle
            .read_bulk(endpoint, buf, timeout)
            .map_err(TransportError::from)
    }

    fn interrupt_in(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> TransportResult<usize> {
        self.handle
            .read_interrupt(endpoint, buf, timeout)
            .map_err(TransportError::from)
    }

    fn clear_halt(&self, endpoint: u8) -> TransportResult<()> {
        self.handle.clear_halt(endpoint).map_err(TransportError::from)
    }

    fn release_interface(&self, interface_number: u8) -> TransportResult<()> {
        self.handle
            .release_interface(interface_number)
            .map_err(TransportError::from)
    }

    fn attach_kernel_driver(&self, interface_number: u8) -> TransportResult<()> {
        self.handle
            .attach_kernel_driver(interface_number)
            .map_err(TransportError::from)
    }
}

#[cfg(test)]
pub mod mock {
    //! An in-memory `Transport` used by the engine's unit tests. Lets a
    //! test script a sequence of control/bulk replies and inspect what the
    //! engine sent, without any real USB hardware.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Initialize `env_logger` for a test run, suitable for `cargo test --
    /// --nocapture`. Safe to call from every test; only the first call
    /// takes effect.
    pub fn init_test_logging() {
        static INIT: std::sync::Once = std::sync::Once::new();
        INIT.call_once(|| {
            let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
                .is_test(true)
                .try_init();
        });
    }

    #[derive(Debug, Clone)]
    pub enum ScriptedReply {
        Control(TransportResult<Vec<u8>>),
        BulkIn(TransportResult<Vec<u8>>),
        InterruptIn(TransportResult<Vec<u8>>),
    }

    #[derive(Default)]
    pub struct MockTransport {
        control_replies: Mutex<VecDeque<TransportResult<Vec<u8>>>>,
        bulk_in_replies: Mutex<VecDeque<TransportResult<Vec<u8>>>>,
        interrupt_replies: Mutex<VecDeque<TransportResult<Vec<u8>>>>,
        pub sent_control: Mutex<Vec<(u8, u8, u16, u16, Vec<u8>)>>,
        pub sent_bulk_out: Mutex<Vec<Vec<u8>>>,
        pub halts_cleared: Mutex<Vec<u8>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_control_reply(&self, reply: TransportResult<Vec<u8>>) {
            self.control_replies.lock().unwrap().push_back(reply);
        }

        pub fn push_bulk_in(&self, reply: TransportResult<Vec<u8>>) {
            self.bulk_in_replies.lock().unwrap().push_back(reply);
        }

        pub fn push_interrupt_in(&self, reply: TransportResult<Vec<u8>>) {
            self.interrupt_replies.lock().unwrap().push_back(reply);
        }
    }

    impl Transport for MockTransport {
        fn control_transfer(
            &self,
            bm_request_type: u8,
            b_request: u8,
            w_value: u16,
            w_index: u16,
            buf: &mut [u8],
            _timeout: Duration,
        ) -> TransportResult<usize> {
            self.sent_control.lock().unwrap().push((
                bm_request_type,
                b_request,
                w_value,
                w_index,
                buf.to_vec(),
            ));
            let reply = self
                .control_replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(vec![0u8; buf.len()]))?;
            let n = reply.len().min(buf.len());
            buf[..n].copy_from_slice(&reply[..n]);
            Ok(n)
        }

        fn bulk_out(&self, _endpoint: u8, buf: &[u8], _timeout: Duration) -> TransportResult<usize> {
            self.sent_bulk_out.lock().unwrap().push(buf.to_vec());
            Ok(buf.len())
        }

        fn bulk_in(&self, _endpoint: u8, buf: &mut [u8], _timeout: Duration) -> TransportResult<usize> {
            let reply = self
                .bulk_in_replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(Vec::new()))?;
            let n = reply.len().min(buf.len());
            buf[..n].copy_from_slice(&reply[..n]);
            Ok(n)
        }

        fn interrupt_in(&self, _endpoint: u8, buf: &mut [u8], _timeout: Duration) -> TransportResult<usize> {
            let reply = self
                .interrupt_replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(TransportError::Timeout))?;
            let n = reply.len().min(buf.len());
            buf[..n].copy_from_slice(&reply[..n]);
            Ok(n)
        }

        fn clear_halt(&self, endpoint: u8) -> TransportResult<()> {
            self.halts_cleared.lock().unwrap().push(endpoint);
            Ok(())
        }
    }
}
