//! ## Interrupt-in demultiplexer
//!
//! A background thread (C10) reading 2-byte notifications off the
//! optional interrupt-in endpoint and fanning them out to every open
//! handle: SRQ assertions and tagged READ_STATUS_BYTE replies share the
//! same endpoint, distinguished by the high bit and value of the first
//! notification byte.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::device::{DeviceState, InterruptThread};
use crate::transport::Transport;

/// First byte of a bare SRQ notification (no outstanding tagged
/// READ_STATUS_BYTE poll).
const SRQ_NOTIFICATION: u8 = 0x81;

/// Poll interval used while the interrupt read times out without data;
/// keeps the thread responsive to `stop` without busy-looping.
const IDLE_RETRY: Duration = Duration::from_millis(100);

/// Spawn the interrupt-in reader thread for `device`, if it has an
/// interrupt-in endpoint. No-op otherwise -- devices without one only
/// ever deliver the status byte directly in the READ_STATUS_BYTE
/// control reply (see [`crate::communication::control::read_stb`]).
pub fn spawn(device: Arc<DeviceState>) {
    let Some(endpoint) = device.endpoints.interrupt_ep.clone() else {
        return;
    };
    if device.has_interrupt_thread() {
        return;
    }

    let stop = Arc::new(AtomicBool::new(false));
    let stop_for_thread = stop.clone();
    let device_for_thread = device.clone();

    log::debug!("starting interrupt-in reader on endpoint {:#04x}", endpoint.address);
    let join = std::thread::Builder::new()
        .name("usbtmc-interrupt-in".into())
        .spawn(move || run(device_for_thread, endpoint.address, stop_for_thread))
        .expect("failed to spawn interrupt-in reader thread");

    device.set_interrupt_thread(InterruptThread {
        stop,
        join: Some(join),
    });
}

fn run(device: Arc<DeviceState>, endpoint_address: u8, stop: Arc<AtomicBool>) {
    let mut buf = [0u8; 2];
    while !stop.load(Ordering::SeqCst) && !device.is_zombie() {
        match device.transport.interrupt_in(endpoint_address, &mut buf, IDLE_RETRY) {
            Ok(n) if n >= 2 => dispatch(&device, buf[0], buf[1]),
            Ok(_) => {}
            Err(crate::transport::TransportError::Timeout) => {}
            Err(crate::transport::TransportError::Disconnected) => {
                log::warn!("interrupt-in endpoint disconnected");
                break;
            }
            Err(e) => log::warn!("interrupt-in read failed: {e}"),
        }
    }
    log::debug!("interrupt-in reader stopped");
}

fn dispatch(device: &DeviceState, b0: u8, b1: u8) {
    if b0 == SRQ_NOTIFICATION {
        device.for_each_open_handle(|handle_state| {
            let handle = crate::handle::Handle {
                state: handle_state.clone(),
            };
            handle.latch_srq(b1);
        });
        device.notify_srq_callbacks(b1);
        return;
    }

    if b0 & 0x80 != 0 {
        // tagged READ_STATUS_BYTE reply; low 7 bits carry the ctl bTag.
        let tag = b0 & 0x7F;
        let expected = device.iin_b_tag_last_sent();
        if tag != expected {
            log::warn!(
                "status-byte notification tag {tag} does not match last sent iin_bTag {expected}"
            );
        }
        device.publish_status_byte(b0, b1);
        return;
    }

    log::warn!("unrecognized interrupt-in notification byte0={b0:#04x}");
}
