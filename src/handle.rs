//! ## Handle state
//!
//! The per-open-handle record (C3): TermChar/auto_abort/EOM overrides,
//! the SRQ latch, and the public dispatcher methods (C9) a caller uses
//! to drive control requests, USB488 remote-control operations, and
//! status-byte notification.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::abort;
use crate::communication::{bulk, control};
use crate::device::DeviceState;
use crate::error::Error;
use crate::transport::Transport;
use crate::types::Capabilities;

/// A single open session against a device. Cloning a `Handle` is cheap
/// (it shares the underlying `Arc<HandleState>`); each clone sees the
/// same TermChar/auto_abort overrides and SRQ latch.
#[derive(Clone)]
pub struct Handle {
    pub(crate) state: Arc<HandleState>,
}

pub struct HandleState {
    pub(crate) device: Arc<DeviceState>,

    term_char: std::sync::Mutex<Option<u8>>,
    term_char_enabled: std::sync::Mutex<Option<bool>>,
    auto_abort: std::sync::Mutex<Option<bool>>,

    srq_byte: AtomicU8,
    srq_asserted: AtomicBool,
}

impl Handle {
    pub(crate) fn new(device: Arc<DeviceState>) -> Self {
        let state = Arc::new(HandleState {
            device,
            term_char: std::sync::Mutex::new(None),
            term_char_enabled: std::sync::Mutex::new(None),
            auto_abort: std::sync::Mutex::new(None),
            srq_byte: AtomicU8::new(0),
            srq_asserted: AtomicBool::new(false),
        });
        state.device.register_handle(&state);
        Handle { state }
    }

    fn check_alive(&self) -> Result<(), Error> {
        self.state.device.check_alive()
    }

    /// Resolved TermChar this handle reads with: its own override if set,
    /// else the device default.
    pub fn term_char(&self) -> u8 {
        self.state
            .term_char
            .lock()
            .unwrap()
            .unwrap_or_else(|| self.state.device.defaults.lock().unwrap().term_char)
    }

    pub fn term_char_enabled(&self) -> bool {
        self.state
            .term_char_enabled
            .lock()
            .unwrap()
            .unwrap_or_else(|| self.state.device.defaults.lock().unwrap().term_char_enabled)
    }

    pub fn auto_abort(&self) -> bool {
        self.state
            .auto_abort
            .lock()
            .unwrap()
            .unwrap_or_else(|| self.state.device.defaults.lock().unwrap().auto_abort)
    }

    pub fn eom_enabled(&self) -> bool {
        self.state.device.defaults.lock().unwrap().eom_val
    }

    /// Configure this handle's TermChar override and whether the device
    /// should honor it on reads (§4.7 `config_term_char`).
    pub fn config_term_char(&self, term_char: u8, enabled: bool) -> Result<(), Error> {
        self.check_alive()?;
        if enabled && !self.state.device.capabilities.supports_bulk_in_term_char {
            return Err(Error::NotSupported("device does not support TermChar"));
        }
        *self.state.term_char.lock().unwrap() = Some(term_char);
        *self.state.term_char_enabled.lock().unwrap() = Some(enabled);
        Ok(())
    }

    pub fn set_auto_abort(&self, enabled: bool) -> Result<(), Error> {
        self.check_alive()?;
        *self.state.auto_abort.lock().unwrap() = Some(enabled);
        Ok(())
    }

    pub fn set_eom_enable(&self, enabled: bool) -> Result<(), Error> {
        self.check_alive()?;
        self.state.device.defaults.lock().unwrap().eom_val = enabled;
        Ok(())
    }

    pub fn set_timeout(&self, timeout: Duration) -> Result<(), Error> {
        self.check_alive()?;
        let ms = timeout.as_millis() as u64;
        self.state.device.set_timeout_ms(ms)
    }

    pub fn get_timeout(&self) -> Duration {
        self.state.device.timeout()
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.state.device.capabilities
    }

    /// Write a device-dependent message (§4.2/§4.3, C5).
    pub fn write(&self, data: &[u8], eom: bool) -> Result<(), Error> {
        self.check_alive()?;
        let _gate = self.state.device.io_gate.lock().unwrap();
        self.check_alive()?;
        bulk::write_dev_dep_msg(&self.state.device, self, data, eom)
    }

    /// Read a device-dependent message, returning the accumulated payload
    /// and whether EOM was observed (§4.2/§4.3, C6).
    pub fn read(&self, max_len: usize) -> Result<(Vec<u8>, bool), Error> {
        self.check_alive()?;
        let _gate = self.state.device.io_gate.lock().unwrap();
        self.check_alive()?;
        bulk::read_dev_dep_msg(&self.state.device, self, max_len)
    }

    /// Convenience: write then read, as most instrument queries do.
    pub fn query(&self, data: &[u8], max_len: usize) -> Result<Vec<u8>, Error> {
        self.write(data, true)?;
        let (buf, _eom) = self.read(max_len)?;
        Ok(buf)
    }

    pub fn indicator_pulse(&self) -> Result<(), Error> {
        self.check_alive()?;
        let _gate = self.state.device.io_gate.lock().unwrap();
        self.check_alive()?;
        control::indicator_pulse(&self.state.device)
    }

    /// Generic CTRL_REQUEST escape hatch (§4.6): direction is taken from
    /// bit 7 of `bm_request_type`, `wLength` is capped, and a zero-length
    /// OUT request with a non-null `data` pointer is rejected.
    pub fn ctrl_request(
        &self,
        bm_request_type: u8,
        b_request: u8,
        w_value: u16,
        w_index: u16,
        data: &mut [u8],
    ) -> Result<usize, Error> {
        self.check_alive()?;
        let _gate = self.state.device.io_gate.lock().unwrap();
        self.check_alive()?;
        control::raw_ctrl_request(&self.state.device, bm_request_type, b_request, w_value, w_index, data)
    }

    pub fn clear_in_halt(&self) -> Result<(), Error> {
        self.check_alive()?;
        let _gate = self.state.device.io_gate.lock().unwrap();
        self.check_alive()?;
        Ok(self
            .state
            .device
            .transport
            .clear_halt(self.state.device.endpoints.bulk_in_ep.address)?)
    }

    pub fn clear_out_halt(&self) -> Result<(), Error> {
        self.check_alive()?;
        let _gate = self.state.device.io_gate.lock().unwrap();
        self.check_alive()?;
        Ok(self
            .state
            .device
            .transport
            .clear_halt(self.state.device.endpoints.bulk_out_ep.address)?)
    }

    /// INITIATE_CLEAR + CHECK_CLEAR_STATUS handshake (§4.5, C7).
    pub fn clear(&self) -> Result<(), Error> {
        self.check_alive()?;
        let _gate = self.state.device.io_gate.lock().unwrap();
        self.check_alive()?;
        abort::clear(&self.state.device)
    }

    /// INITIATE_ABORT_BULK_IN + CHECK_ABORT_BULK_IN_STATUS (§4.5, C7).
    pub fn abort_bulk_in(&self) -> Result<(), Error> {
        self.check_alive()?;
        let _gate = self.state.device.io_gate.lock().unwrap();
        self.check_alive()?;
        let tag = self.state.device.b_tag_last_read();
        abort::abort_bulk_in(&self.state.device, tag)
    }

    /// INITIATE_ABORT_BULK_OUT + CHECK_ABORT_BULK_OUT_STATUS (§4.5, C7).
    pub fn abort_bulk_out(&self) -> Result<(), Error> {
        self.check_alive()?;
        let _gate = self.state.device.io_gate.lock().unwrap();
        self.check_alive()?;
        let tag = self.state.device.b_tag_last_write();
        abort::abort_bulk_out(&self.state.device, tag)
    }

    pub fn ren_control(&self, enable: bool) -> Result<(), Error> {
        self.check_alive()?;
        let _gate = self.state.device.io_gate.lock().unwrap();
        self.check_alive()?;
        control::ren_control(&self.state.device, enable)
    }

    pub fn goto_local(&self) -> Result<(), Error> {
        self.check_alive()?;
        let _gate = self.state.device.io_gate.lock().unwrap();
        self.check_alive()?;
        control::goto_local(&self.state.device)
    }

    pub fn local_lockout(&self) -> Result<(), Error> {
        self.check_alive()?;
        let _gate = self.state.device.io_gate.lock().unwrap();
        self.check_alive()?;
        control::local_lockout(&self.state.device)
    }

    /// USB488 TRIGGER (§4.4).
    pub fn trigger(&self) -> Result<(), Error> {
        self.check_alive()?;
        let _gate = self.state.device.io_gate.lock().unwrap();
        self.check_alive()?;
        bulk::trigger(&self.state.device)
    }

    /// READ_STATUS_BYTE (§4.4/§4.8, C9/C10): if an SRQ has already been
    /// latched on this handle (e.g. delivered by the interrupt-in reader
    /// ahead of this call), serves it directly with no transport traffic.
    /// Otherwise issues the control request and waits on the interrupt-in
    /// notification that carries the tagged reply, exactly as the class
    /// spec's two-phase status-byte protocol requires.
    pub fn read_stb(&self) -> Result<u8, Error> {
        self.check_alive()?;
        if self.state.srq_asserted.swap(false, Ordering::SeqCst) {
            return Ok(self.state.srq_byte.load(Ordering::SeqCst));
        }
        let _gate = self.state.device.io_gate.lock().unwrap();
        self.check_alive()?;
        control::read_stb(&self.state.device)
    }

    pub fn usb488_caps(&self) -> Capabilities {
        self.state.device.capabilities.clone()
    }

    /// Register a callback invoked whenever an SRQ notification arrives on
    /// the interrupt-in endpoint (SIGIO/fasync equivalent, §4.8).
    pub fn register_srq_notify(&self, callback: Box<dyn Fn(u8) + Send + Sync>) {
        self.state.device.register_srq_notify(callback);
    }

    /// Poll-equivalent: returns true and clears the latch if an SRQ has
    /// arrived since the last call.
    pub fn poll_srq(&self) -> bool {
        self.state.srq_asserted.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn latch_srq(&self, status_byte: u8) {
        self.state.srq_byte.store(status_byte, Ordering::SeqCst);
        self.state.srq_asserted.store(true, Ordering::SeqCst);
    }
}

// No explicit unregistration on drop: `open_handles` holds only `Weak`
// references, and `register_handle` prunes dead entries on every new
// open. A dropped handle's slot is reclaimed lazily rather than eagerly.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IoConfig;
    use crate::transport::mock::MockTransport;
    use crate::transport::TransportResult;
    use crate::types::{Endpoint, UsbtmcEndpoints};
    use rusb::{Direction, TransferType};

    fn endpoints() -> UsbtmcEndpoints {
        UsbtmcEndpoints {
            bulk_out_ep: Endpoint {
                address: 0x02,
                max_packet_size: 64,
                transfer_type: TransferType::Bulk,
                direction: Direction::Out,
            },
            bulk_in_ep: Endpoint {
                address: 0x86,
                max_packet_size: 64,
                transfer_type: TransferType::Bulk,
                direction: Direction::In,
            },
            interrupt_ep: None,
        }
    }

    fn device_with_mock() -> (Arc<DeviceState>, Arc<MockTransport>) {
        let mock = Arc::new(MockTransport::new());
        struct Wrap(Arc<MockTransport>);
        impl Transport for Wrap {
            fn control_transfer(
                &self,
                a: u8,
                b: u8,
                c: u16,
                d: u16,
                buf: &mut [u8],
                t: std::time::Duration,
            ) -> TransportResult<usize> {
                self.0.control_transfer(a, b, c, d, buf, t)
            }
            fn bulk_out(&self, e: u8, buf: &[u8], t: std::time::Duration) -> TransportResult<usize> {
                self.0.bulk_out(e, buf, t)
            }
            fn bulk_in(&self, e: u8, buf: &mut [u8], t: std::time::Duration) -> TransportResult<usize> {
                self.0.bulk_in(e, buf, t)
            }
            fn interrupt_in(&self, e: u8, buf: &mut [u8], t: std::time::Duration) -> TransportResult<usize> {
                self.0.interrupt_in(e, buf, t)
            }
            fn clear_halt(&self, e: u8) -> TransportResult<()> {
                self.0.clear_halt(e)
            }
        }
        let device = Arc::new(DeviceState::new(
            Box::new(Wrap(mock.clone())),
            endpoints(),
            0,
            Capabilities::default(),
            IoConfig::default(),
        ));
        (device, mock)
    }

    #[test]
    fn read_stb_serves_latched_srq_without_transport_traffic() {
        let (device, mock) = device_with_mock();
        let handle = Handle::new(device);
        handle.latch_srq(0x42);

        let stb = handle.read_stb().unwrap();
        assert_eq!(stb, 0x42);
        assert!(mock.sent_control.lock().unwrap().is_empty());
        // the latch is consumed, not left for the next call.
        assert!(!handle.poll_srq());
    }

    #[test]
    fn set_timeout_rejects_values_below_minimum() {
        let (device, _mock) = device_with_mock();
        let handle = Handle::new(device);
        let err = handle.set_timeout(Duration::from_millis(1)).unwrap_err();
        assert!(matches!(err, Error::BadArg(_)));
    }
}
