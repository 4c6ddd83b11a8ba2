//! ## Device state
//!
//! The per-device record (C2): endpoint addresses, capabilities, tags,
//! timeouts, the open-handle list, and the lifecycle/concurrency
//! primitives (C11) that keep reads, writes, control operations,
//! interrupt-callback updates and disconnect safe against one another.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Condvar, Mutex, Weak};
use std::time::Duration;

use crate::config::IoConfig;
use crate::constants::misc::{DEFAULT_TERM_CHAR, IIN_BTAG_MAX, IIN_BTAG_MIN};
use crate::error::Error;
use crate::handle::HandleState;
use crate::transport::Transport;
use crate::types::{Capabilities, UsbtmcEndpoints};

/// Device-level defaults inherited by a handle at open time, and used
/// directly by the read/write engines when a handle has not overridden
/// them (see SPEC_FULL.md §9, resolution of the TermChar/auto_abort open
/// question).
#[derive(Debug, Clone, Copy)]
pub struct DeviceDefaults {
    pub term_char: u8,
    pub term_char_enabled: bool,
    pub auto_abort: bool,
    pub eom_val: bool,
}

impl Default for DeviceDefaults {
    fn default() -> Self {
        DeviceDefaults {
            term_char: DEFAULT_TERM_CHAR,
            term_char_enabled: false,
            auto_abort: false,
            eom_val: true,
        }
    }
}

/// The per-device record shared across every open handle and the
/// interrupt-reader thread.
pub struct DeviceState {
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) endpoints: UsbtmcEndpoints,
    pub(crate) interface_number: u8,
    pub(crate) reattach_kernel_driver: bool,

    b_tag: AtomicU8,
    b_tag_last_write: AtomicU8,
    b_tag_last_read: AtomicU8,
    iin_b_tag: AtomicU8,
    iin_b_tag_last_sent: AtomicU8,

    pub(crate) capabilities: Capabilities,
    pub(crate) config: IoConfig,
    timeout_ms: AtomicU64,
    pub(crate) defaults: Mutex<DeviceDefaults>,

    zombie: AtomicBool,

    open_handles: Mutex<Vec<Weak<HandleState>>>,
    #[allow(clippy::type_complexity)]
    notify_callbacks: Mutex<Vec<Box<dyn Fn(u8) + Send + Sync>>>,

    /// The IO gate (C11): held for the whole duration of any read, write,
    /// control op, or disconnect.
    pub(crate) io_gate: Mutex<()>,

    wait_mutex: Mutex<()>,
    wait_cv: Condvar,

    iin_notify: Mutex<Option<(u8, u8)>>,
    iin_data_valid: AtomicBool,

    interrupt_thread: Mutex<Option<InterruptThread>>,
}

pub(crate) struct InterruptThread {
    pub(crate) stop: std::sync::Arc<AtomicBool>,
    pub(crate) join: Option<std::thread::JoinHandle<()>>,
}

impl DeviceState {
    pub fn new(
        transport: Box<dyn Transport>,
        endpoints: UsbtmcEndpoints,
        interface_number: u8,
        capabilities: Capabilities,
        config: IoConfig,
    ) -> Self {
        Self::with_kernel_driver_flag(transport, endpoints, interface_number, capabilities, config, false)
    }

    pub fn with_kernel_driver_flag(
        transport: Box<dyn Transport>,
        endpoints: UsbtmcEndpoints,
        interface_number: u8,
        capabilities: Capabilities,
        config: IoConfig,
        reattach_kernel_driver: bool,
    ) -> Self {
        DeviceState {
            transport,
            endpoints,
            interface_number,
            reattach_kernel_driver,
            b_tag: AtomicU8::new(1),
            b_tag_last_write: AtomicU8::new(0),
            b_tag_last_read: AtomicU8::new(0),
            iin_b_tag: AtomicU8::new(IIN_BTAG_MIN),
            iin_b_tag_last_sent: AtomicU8::new(0),
            capabilities,
            timeout_ms: AtomicU64::new(config.default_timeout_ms()),
            config,
            defaults: Mutex::new(DeviceDefaults::default()),
            zombie: AtomicBool::new(false),
            open_handles: Mutex::new(Vec::new()),
            notify_callbacks: Mutex::new(Vec::new()),
            io_gate: Mutex::new(()),
            wait_mutex: Mutex::new(()),
            wait_cv: Condvar::new(),
            iin_notify: Mutex::new(None),
            iin_data_valid: AtomicBool::new(false),
            interrupt_thread: Mutex::new(None),
        }
    }

    /// Advance `bTag` and return the value to use for this bulk-out
    /// framing. Never returns 0; wraps from 255 back to 1.
    pub fn next_b_tag(&self) -> u8 {
        loop {
            let current = self.b_tag.load(Ordering::SeqCst);
            let next = if current == 255 { 1 } else { current + 1 };
            if self
                .b_tag
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return current;
            }
        }
    }

    pub fn set_b_tag_last_write(&self, tag: u8) {
        self.b_tag_last_write.store(tag, Ordering::SeqCst);
    }

    pub fn b_tag_last_write(&self) -> u8 {
        self.b_tag_last_write.load(Ordering::SeqCst)
    }

    pub fn set_b_tag_last_read(&self, tag: u8) {
        self.b_tag_last_read.store(tag, Ordering::SeqCst);
    }

    pub fn b_tag_last_read(&self) -> u8 {
        self.b_tag_last_read.load(Ordering::SeqCst)
    }

    /// Advance `iin_bTag` within `[2, 127]` and return the value to use for
    /// this READ_STATUS_BYTE request.
    pub fn next_iin_b_tag(&self) -> u8 {
        loop {
            let current = self.iin_b_tag.load(Ordering::SeqCst);
            let next = if current >= IIN_BTAG_MAX {
                IIN_BTAG_MIN
            } else {
                current + 1
            };
            if self
                .iin_b_tag
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return current;
            }
        }
    }

    pub fn iin_b_tag(&self) -> u8 {
        self.iin_b_tag.load(Ordering::SeqCst)
    }

    /// Record the `iin_bTag` actually placed on the wire in the most
    /// recent READ_STATUS_BYTE request, so the interrupt-in reader can
    /// validate a tagged reply's correlation tag against it.
    pub(crate) fn set_iin_b_tag_last_sent(&self, tag: u8) {
        self.iin_b_tag_last_sent.store(tag, Ordering::SeqCst);
    }

    pub(crate) fn iin_b_tag_last_sent(&self) -> u8 {
        self.iin_b_tag_last_sent.load(Ordering::SeqCst)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::SeqCst))
    }

    pub fn set_timeout_ms(&self, ms: u64) -> Result<(), Error> {
        use crate::constants::misc::MIN_TIMEOUT_MS;
        if ms < MIN_TIMEOUT_MS {
            return Err(Error::BadArg("timeout below USBTMC_MIN_TIMEOUT"));
        }
        self.timeout_ms.store(ms, Ordering::SeqCst);
        Ok(())
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms.load(Ordering::SeqCst)
    }

    pub fn is_zombie(&self) -> bool {
        self.zombie.load(Ordering::SeqCst)
    }

    /// Refuse to proceed if the device has been disconnected.
    pub fn check_alive(&self) -> Result<(), Error> {
        if self.is_zombie() {
            Err(Error::NoDevice)
        } else {
            Ok(())
        }
    }

    /// Register a newly-opened handle in the open-handle list.
    pub(crate) fn register_handle(&self, handle: &std::sync::Arc<HandleState>) {
        let mut handles = self.open_handles.lock().unwrap();
        handles.retain(|weak| weak.strong_count() > 0);
        handles.push(std::sync::Arc::downgrade(handle));
    }

    /// Unlink a handle from the open-handle list (called from
    /// `Handle::drop`, before the handle's own refcount drops to zero).
    pub(crate) fn unregister_handle(&self, handle: &std::sync::Arc<HandleState>) {
        let mut handles = self.open_handles.lock().unwrap();
        handles.retain(|weak| {
            weak.upgrade()
                .map(|h| !std::sync::Arc::ptr_eq(&h, handle))
                .unwrap_or(false)
        });
    }

    pub(crate) fn for_each_open_handle(&self, mut f: impl FnMut(&std::sync::Arc<HandleState>)) {
        let handles = self.open_handles.lock().unwrap();
        for weak in handles.iter() {
            if let Some(strong) = weak.upgrade() {
                f(&strong);
            }
        }
    }

    pub fn register_srq_notify(&self, callback: Box<dyn Fn(u8) + Send + Sync>) {
        self.notify_callbacks.lock().unwrap().push(callback);
    }

    pub(crate) fn notify_srq_callbacks(&self, status_byte: u8) {
        for cb in self.notify_callbacks.lock().unwrap().iter() {
            cb(status_byte);
        }
    }

    pub(crate) fn publish_status_byte(&self, b0: u8, b1: u8) {
        *self.iin_notify.lock().unwrap() = Some((b0, b1));
        self.iin_data_valid.store(true, Ordering::SeqCst);
        self.wake_all();
    }

    pub(crate) fn clear_data_valid(&self) {
        self.iin_data_valid.store(false, Ordering::SeqCst);
    }

    pub(crate) fn is_data_valid(&self) -> bool {
        self.iin_data_valid.load(Ordering::SeqCst)
    }

    pub(crate) fn notify_second_byte(&self) -> Option<u8> {
        self.iin_notify.lock().unwrap().map(|(_, b1)| b1)
    }

    pub fn wake_all(&self) {
        let _guard = self.wait_mutex.lock().unwrap();
        self.wait_cv.notify_all();
    }

    /// Block until `is_data_valid()` becomes true, zombie is set, or
    /// `timeout` elapses. Returns `Ok(())` on data-valid, `Err(Timeout)` on
    /// timeout, `Err(NoDevice)` if disconnect fires first.
    pub fn wait_for_status_byte(&self, timeout: Duration) -> Result<(), Error> {
        let guard = self.wait_mutex.lock().unwrap();
        let deadline = std::time::Instant::now() + timeout;
        let mut guard = guard;
        loop {
            if self.is_zombie() {
                return Err(Error::NoDevice);
            }
            if self.is_data_valid() {
                return Ok(());
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return Err(Error::Timeout);
            }
            let (next_guard, result) = self
                .wait_cv
                .wait_timeout(guard, deadline - now)
                .unwrap();
            guard = next_guard;
            if result.timed_out() && !self.is_data_valid() && !self.is_zombie() {
                return Err(Error::Timeout);
            }
        }
    }

    pub(crate) fn set_interrupt_thread(&self, thread: InterruptThread) {
        *self.interrupt_thread.lock().unwrap() = Some(thread);
    }

    pub(crate) fn has_interrupt_thread(&self) -> bool {
        self.interrupt_thread.lock().unwrap().is_some()
    }

    /// Disconnect procedure (§4.9): take the IO gate, flip zombie, wake
    /// everyone, release the gate, then stop the interrupt thread.
    pub fn disconnect(&self) {
        log::warn!("device disconnected, failing all open handles with NoDevice");
        {
            let _gate = self.io_gate.lock().unwrap();
            self.zombie.store(true, Ordering::SeqCst);
        }
        self.wake_all();
        if let Some(thread) = self.interrupt_thread.lock().unwrap().take() {
            thread.stop.store(true, Ordering::SeqCst);
            if let Some(join) = thread.join {
                let _ = join.join();
            }
        }
    }
}

impl Drop for DeviceState {
    fn drop(&mut self) {
        self.zombie.store(true, Ordering::SeqCst);
        if let Some(thread) = self.interrupt_thread.lock().unwrap().take() {
            thread.stop.store(true, Ordering::SeqCst);
            if let Some(join) = thread.join {
                let _ = join.join();
            }
        }
        let _ = self.transport.release_interface(self.interface_number);
        if self.reattach_kernel_driver {
            let _ = self.transport.attach_kernel_driver(self.interface_number);
        }
    }
}
