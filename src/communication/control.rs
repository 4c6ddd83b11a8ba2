//! ## Control
//!
//! Class and USB488 control requests (C7/C8/C9): capability probe,
//! the generic `ctrl_request` escape hatch, USB488 remote-control
//! requests, indicator pulse, and the READ_STATUS_BYTE/interrupt-in
//! status-byte protocol.

use std::time::Duration;

use crate::constants::{control_requests, misc, usbtmc_status};
use crate::device::DeviceState;
use crate::error::Error;
use crate::transport::Transport;
use crate::types::Capabilities;

fn class_interface_in() -> u8 {
    rusb::request_type(rusb::Direction::In, rusb::RequestType::Class, rusb::Recipient::Interface)
}

fn class_endpoint_in() -> u8 {
    rusb::request_type(rusb::Direction::In, rusb::RequestType::Class, rusb::Recipient::Endpoint)
}

/// GET_CAPABILITIES (§4.1, C7), called once during connection setup
/// before a `DeviceState` exists -- operates directly on the transport.
pub fn get_capabilities(
    transport: &dyn Transport,
    interface_number: u8,
    timeout: Duration,
) -> Result<Capabilities, Error> {
    let w_index = u16::from_le_bytes([interface_number, 0x00]);
    let mut buffer = [0u8; 0x0018];

    transport.control_transfer(
        class_interface_in(),
        control_requests::GET_CAPABILITIES,
        0x0000,
        w_index,
        &mut buffer,
        timeout,
    )?;

    if buffer[0] != usbtmc_status::STATUS_SUCCESS {
        return Err(Error::StatusUnexpectedFailure);
    }

    let bcd_version = u16::from_le_bytes([buffer[2], buffer[3]]);
    let interface_capabilities = buffer[4];
    let device_capabilities = buffer[5];
    let usb488_interface_capabilities = buffer[14];
    let usb488_device_capabilities = buffer[15];
    let is_usb488 = usb488_interface_capabilities != 0 || usb488_device_capabilities != 0;
    let usb488_capabilities =
        (usb488_interface_capabilities & 0x07) | ((usb488_device_capabilities & 0x0F) << 4);

    Ok(Capabilities {
        bcd_version,
        accepts_indicator_pulse_request: interface_capabilities & 0b0000_0100 != 0,
        is_talk_only: interface_capabilities & 0b0000_0010 != 0,
        is_listen_only: interface_capabilities & 0b0000_0001 != 0,
        supports_bulk_in_term_char: device_capabilities & 0b0000_0001 != 0,
        interface_capabilities,
        device_capabilities,
        usb488_interface_capabilities,
        usb488_device_capabilities,
        usb488_capabilities,
        is_usb488,
    })
}

/// INDICATOR_PULSE (§4.7).
pub fn indicator_pulse(device: &DeviceState) -> Result<(), Error> {
    if !device.capabilities.accepts_indicator_pulse_request {
        return Err(Error::NotSupported("device does not accept INDICATOR_PULSE"));
    }
    let w_index = u16::from_le_bytes([device.interface_number, 0x00]);
    let mut buffer = [0u8; 1];
    device.transport.control_transfer(
        class_interface_in(),
        control_requests::INDICATOR_PULSE,
        0x0000,
        w_index,
        &mut buffer,
        device.timeout(),
    )?;
    match buffer[0] {
        usbtmc_status::STATUS_SUCCESS => Ok(()),
        usbtmc_status::STATUS_FAILED => Err(Error::StatusFailure),
        _ => Err(Error::StatusUnexpectedFailure),
    }
}

/// Generic CTRL_REQUEST escape hatch (§4.6). Direction is taken from bit
/// 7 of `bm_request_type`; `wLength` (i.e. `data.len()`) is capped at
/// `MAX_CTRL_REQUEST_LENGTH`, and a zero-length OUT request is only
/// meaningful with an empty `data` slice -- this function never treats
/// a non-null, non-empty `data` as "send nothing".
pub fn raw_ctrl_request(
    device: &DeviceState,
    bm_request_type: u8,
    b_request: u8,
    w_value: u16,
    w_index: u16,
    data: &mut [u8],
) -> Result<usize, Error> {
    if data.len() > misc::MAX_CTRL_REQUEST_LENGTH {
        return Err(Error::BadArg("wLength exceeds MAX_CTRL_REQUEST_LENGTH"));
    }
    Ok(device
        .transport
        .control_transfer(bm_request_type, b_request, w_value, w_index, data, device.timeout())?)
}

/// USB488 REN_CONTROL (§4.7).
pub fn ren_control(device: &DeviceState, enable: bool) -> Result<(), Error> {
    if !device.capabilities.supports_usb488_simple() {
        return Err(Error::NotSupported("device does not support REN_CONTROL"));
    }
    let w_value = if enable { 1 } else { 0 };
    let w_index = u16::from_le_bytes([device.interface_number, 0x00]);
    let mut buffer = [0u8; 1];
    device.transport.control_transfer(
        class_interface_in(),
        control_requests::REN_CONTROL,
        w_value,
        w_index,
        &mut buffer,
        device.timeout(),
    )?;
    match buffer[0] {
        usbtmc_status::STATUS_SUCCESS => Ok(()),
        usbtmc_status::STATUS_FAILED => Err(Error::StatusFailure),
        _ => Err(Error::StatusUnexpectedFailure),
    }
}

/// USB488 GOTO_LOCAL (§4.7).
pub fn goto_local(device: &DeviceState) -> Result<(), Error> {
    if !device.capabilities.supports_usb488_simple() {
        return Err(Error::NotSupported("device does not support GOTO_LOCAL"));
    }
    let w_index = u16::from_le_bytes([device.interface_number, 0x00]);
    let mut buffer = [0u8; 1];
    device.transport.control_transfer(
        class_interface_in(),
        control_requests::GOTO_LOCAL,
        0x0000,
        w_index,
        &mut buffer,
        device.timeout(),
    )?;
    match buffer[0] {
        usbtmc_status::STATUS_SUCCESS => Ok(()),
        usbtmc_status::STATUS_FAILED => Err(Error::StatusFailure),
        _ => Err(Error::StatusUnexpectedFailure),
    }
}

/// USB488 LOCAL_LOCKOUT (§4.7).
pub fn local_lockout(device: &DeviceState) -> Result<(), Error> {
    if !device.capabilities.supports_usb488_simple() {
        return Err(Error::NotSupported("device does not support LOCAL_LOCKOUT"));
    }
    let w_index = u16::from_le_bytes([device.interface_number, 0x00]);
    let mut buffer = [0u8; 1];
    device.transport.control_transfer(
        class_interface_in(),
        control_requests::LOCAL_LOCKOUT,
        0x0000,
        w_index,
        &mut buffer,
        device.timeout(),
    )?;
    match buffer[0] {
        usbtmc_status::STATUS_SUCCESS => Ok(()),
        usbtmc_status::STATUS_FAILED => Err(Error::StatusFailure),
        _ => Err(Error::StatusUnexpectedFailure),
    }
}

/// CLEAR_FEATURE on an endpoint, used during connection setup.
pub fn clear_feature(transport: &dyn Transport, endpoint_address: u8) -> Result<(), Error> {
    Ok(transport.clear_halt(endpoint_address)?)
}

/// INITIATE_CLEAR + CHECK_CLEAR_STATUS, used once during connection
/// setup (the per-handle `clear()` goes through [`crate::abort::clear`]
/// instead, which additionally drains the bulk-in FIFO).
pub fn clear_buffers(
    transport: &dyn Transport,
    interface_number: u8,
    timeout: Duration,
) -> Result<(), Error> {
    let w_index = u16::from_le_bytes([interface_number, 0x00]);
    let mut buffer = [0u8; 1];
    transport.control_transfer(
        class_interface_in(),
        control_requests::INITIATE_CLEAR,
        0x0000,
        w_index,
        &mut buffer,
        timeout,
    )?;
    if buffer[0] != usbtmc_status::STATUS_SUCCESS {
        return Err(Error::StatusUnexpectedFailure);
    }

    let mut buffer = [0u8; 2];
    loop {
        transport.control_transfer(
            class_interface_in(),
            control_requests::CHECK_CLEAR_STATUS,
            0x0000,
            w_index,
            &mut buffer,
            timeout,
        )?;
        match buffer[0] {
            usbtmc_status::STATUS_PENDING => continue,
            usbtmc_status::STATUS_SUCCESS => return Ok(()),
            _ => return Err(Error::StatusUnexpectedFailure),
        }
    }
}

/// READ_STATUS_BYTE (§4.4/§4.8, C9/C10).
///
/// When the device has no interrupt-in endpoint, USB488 defines the
/// status byte as returned directly in byte 2 of the control reply.
/// When an interrupt-in endpoint is present, the control reply only
/// acknowledges the request; the actual status byte arrives later,
/// tagged, on the interrupt-in endpoint, and is correlated here by
/// waiting on the device's notification latch.
pub fn read_stb(device: &DeviceState) -> Result<u8, Error> {
    if !device.capabilities.is_usb488 {
        return Err(Error::NotSupported("device is not USB488"));
    }
    let has_interrupt = device.endpoints.interrupt_ep.is_some();
    let ctl_b_tag = device.next_iin_b_tag();
    device.set_iin_b_tag_last_sent(ctl_b_tag);
    let w_value = ctl_b_tag as u16;
    let w_index = u16::from_le_bytes([device.interface_number, 0x00]);

    if has_interrupt {
        device.clear_data_valid();
    }

    let mut buffer = [0u8; 3];
    device.transport.control_transfer(
        class_interface_in(),
        control_requests::READ_STATUS_BYTE,
        w_value,
        w_index,
        &mut buffer,
        device.timeout(),
    )?;

    match buffer[0] {
        usbtmc_status::STATUS_SUCCESS => {}
        usbtmc_status::STATUS_FAILED => return Err(Error::StatusFailure),
        _ => return Err(Error::StatusUnexpectedFailure),
    }

    if !has_interrupt {
        return Ok(buffer[2]);
    }

    if let Err(e) = device.wait_for_status_byte(device.timeout()) {
        log::warn!("timed out waiting for tagged status-byte notification (ctlBTag {ctl_b_tag})");
        return Err(e);
    }
    device
        .notify_second_byte()
        .ok_or(Error::StatusUnexpectedFailure)
}

/// INITIATE_ABORT_BULK_OUT + CHECK_ABORT_BULK_OUT_STATUS (§4.5, C7).
/// Returns the number of bytes the device received before aborting.
pub fn abort_bulk_out(device: &DeviceState, transfer_b_tag: u8) -> Result<usize, Error> {
    let w_value = transfer_b_tag as u16;
    let w_index = u16::from_le_bytes([device.endpoints.bulk_out_ep.address, 0x00]);
    let mut buffer = [0u8; 2];

    device.transport.control_transfer(
        class_endpoint_in(),
        control_requests::INITIATE_ABORT_BULK_OUT,
        w_value,
        w_index,
        &mut buffer,
        device.timeout(),
    )?;

    match buffer[0] {
        usbtmc_status::STATUS_SUCCESS => {}
        usbtmc_status::STATUS_FAILED => return Err(Error::StatusFailure),
        usbtmc_status::STATUS_TRANSFER_NOT_IN_PROGRESS => {
            return Err(Error::StatusNoTransferInProgress)
        }
        _ => return Err(Error::StatusUnexpectedFailure),
    }

    let mut buffer = [0u8; 8];
    let mut completed = false;
    for _ in 0..misc::MAX_READS_TO_CLEAR_BULK_IN {
        device.transport.control_transfer(
            class_endpoint_in(),
            control_requests::CHECK_ABORT_BULK_OUT_STATUS,
            0x0000,
            w_index,
            &mut buffer,
            device.timeout(),
        )?;
        match buffer[0] {
            usbtmc_status::STATUS_PENDING => continue,
            usbtmc_status::STATUS_SUCCESS => {
                completed = true;
                break;
            }
            _ => return Err(Error::StatusUnexpectedFailure),
        }
    }

    if !completed {
        return Err(Error::Perm("abort bulk-out did not complete within MAX_READS_TO_CLEAR_BULK_IN"));
    }

    device
        .transport
        .clear_halt(device.endpoints.bulk_out_ep.address)?;

    Ok(u32::from_le_bytes([buffer[4], buffer[5], buffer[6], buffer[7]]) as usize)
}

/// INITIATE_ABORT_BULK_IN + CHECK_ABORT_BULK_IN_STATUS (§4.5, C7).
/// Returns the number of bytes the device transferred before aborting.
/// Drains the bulk-in FIFO while the device reports it non-empty,
/// bounded by `MAX_READS_TO_CLEAR_BULK_IN` to keep a misbehaving
/// device from wedging the caller forever.
pub fn abort_bulk_in(device: &DeviceState, transfer_b_tag: u8) -> Result<usize, Error> {
    let w_value = transfer_b_tag as u16;
    let w_index = u16::from_le_bytes([device.endpoints.bulk_in_ep.address, 0x00]);
    let mut buffer = [0u8; 2];

    device.transport.control_transfer(
        class_endpoint_in(),
        control_requests::INITIATE_ABORT_BULK_IN,
        w_value,
        w_index,
        &mut buffer,
        device.timeout(),
    )?;

    match buffer[0] {
        usbtmc_status::STATUS_SUCCESS => {}
        // Nothing was in flight to abort; not an error for the caller.
        usbtmc_status::STATUS_FAILED => return Ok(0),
        usbtmc_status::STATUS_TRANSFER_NOT_IN_PROGRESS => {
            return Err(Error::StatusNoTransferInProgress)
        }
        _ => return Err(Error::StatusUnexpectedFailure),
    }

    let mut buffer = [0u8; 8];
    let mut drain_buf = vec![0u8; device.endpoints.bulk_in_ep.max_packet_size as usize];
    for _ in 0..misc::MAX_READS_TO_CLEAR_BULK_IN {
        device.transport.control_transfer(
            class_endpoint_in(),
            control_requests::CHECK_ABORT_BULK_IN_STATUS,
            0x0000,
            w_index,
            &mut buffer,
            device.timeout(),
        )?;
        match buffer[0] {
            usbtmc_status::STATUS_SUCCESS => {
                return Ok(u32::from_le_bytes([buffer[4], buffer[5], buffer[6], buffer[7]]) as usize)
            }
            usbtmc_status::STATUS_PENDING => {
                let fifo_empty = buffer[1] & 0b0000_0001 == 0;
                if !fifo_empty {
                    let _ = device
                        .transport
                        .bulk_in(device.endpoints.bulk_in_ep.address, &mut drain_buf, device.timeout());
                }
            }
            _ => return Err(Error::StatusUnexpectedFailure),
        }
    }

    Err(Error::Perm("abort bulk-in did not complete within MAX_READS_TO_CLEAR_BULK_IN"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IoConfig;
    use crate::transport::mock::MockTransport;
    use crate::transport::TransportResult;
    use crate::types::{Capabilities, Endpoint, UsbtmcEndpoints};
    use rusb::{Direction, TransferType};
    use std::sync::Arc;

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

    fn device_with_mock(capabilities: Capabilities) -> (DeviceState, Arc<MockTransport>) {
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
        let device = DeviceState::new(Box::new(Wrap(mock.clone())), endpoints(), 0, capabilities, IoConfig::default());
        (device, mock)
    }

    #[test]
    fn abort_bulk_in_status_failed_returns_ok_zero() {
        let (device, mock) = device_with_mock(Capabilities::default());
        mock.push_control_reply(Ok(vec![usbtmc_status::STATUS_FAILED, 0]));
        let n = abort_bulk_in(&device, 3).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn abort_bulk_out_clears_halt_on_success() {
        let (device, mock) = device_with_mock(Capabilities::default());
        mock.push_control_reply(Ok(vec![usbtmc_status::STATUS_SUCCESS, 0]));
        let mut status = vec![usbtmc_status::STATUS_SUCCESS, 0, 0, 0];
        status.extend_from_slice(&7u32.to_le_bytes());
        mock.push_control_reply(Ok(status));

        let n = abort_bulk_out(&device, 3).unwrap();
        assert_eq!(n, 7);
        assert!(mock.halts_cleared.lock().unwrap().contains(&device.endpoints.bulk_out_ep.address));
    }

    #[test]
    fn abort_bulk_out_errors_if_never_completes() {
        let (device, mock) = device_with_mock(Capabilities::default());
        mock.push_control_reply(Ok(vec![usbtmc_status::STATUS_SUCCESS, 0]));
        for _ in 0..misc::MAX_READS_TO_CLEAR_BULK_IN {
            mock.push_control_reply(Ok(vec![usbtmc_status::STATUS_PENDING, 0]));
        }
        assert!(abort_bulk_out(&device, 3).is_err());
    }

    fn usb488_simple_caps() -> Capabilities {
        Capabilities {
            is_usb488: true,
            usb488_capabilities: 0b0000_0001,
            ..Capabilities::default()
        }
    }

    #[test]
    fn ren_control_requires_simple_capability_not_remote_control() {
        let (device, _mock) = device_with_mock(Capabilities::default());
        assert!(matches!(ren_control(&device, true), Err(Error::NotSupported(_))));

        let (device, mock) = device_with_mock(usb488_simple_caps());
        mock.push_control_reply(Ok(vec![usbtmc_status::STATUS_SUCCESS]));
        assert!(ren_control(&device, true).is_ok());
    }
}
