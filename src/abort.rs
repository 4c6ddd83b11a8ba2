//! ## Abort and clear state machines
//!
//! Drives the INITIATE_CLEAR/CHECK_CLEAR_STATUS and
//! INITIATE_ABORT_BULK_IN/OUT handshakes (§4.5, C7), bounding the
//! bulk-in FIFO drain loop the same way the control-level abort
//! handshake does.

use crate::communication::control;
use crate::constants::{control_requests, misc, usbtmc_status};
use crate::device::DeviceState;
use crate::error::Error;
use crate::transport::Transport;

fn class_interface_in() -> u8 {
    rusb::request_type(rusb::Direction::In, rusb::RequestType::Class, rusb::Recipient::Interface)
}

/// INITIATE_CLEAR + CHECK_CLEAR_STATUS (§4.5). Unlike
/// [`control::clear_buffers`] (used once at connection time before any
/// transfer is in flight), this drains the bulk-in FIFO while the
/// device reports it non-empty, bounded by
/// `MAX_READS_TO_CLEAR_BULK_IN`.
pub fn clear(device: &DeviceState) -> Result<(), Error> {
    let w_index = u16::from_le_bytes([device.interface_number, 0x00]);
    let mut buffer = [0u8; 1];

    device.transport.control_transfer(
        class_interface_in(),
        control_requests::INITIATE_CLEAR,
        0x0000,
        w_index,
        &mut buffer,
        device.timeout(),
    )?;
    if buffer[0] != usbtmc_status::STATUS_SUCCESS {
        return Err(Error::StatusUnexpectedFailure);
    }

    let mut buffer = [0u8; 2];
    let mut drain_buf = vec![0u8; device.endpoints.bulk_in_ep.max_packet_size as usize];
    for _ in 0..misc::MAX_READS_TO_CLEAR_BULK_IN {
        device.transport.control_transfer(
            class_interface_in(),
            control_requests::CHECK_CLEAR_STATUS,
            0x0000,
            w_index,
            &mut buffer,
            device.timeout(),
        )?;
        match buffer[0] {
            usbtmc_status::STATUS_SUCCESS => {
                device
                    .transport
                    .clear_halt(device.endpoints.bulk_out_ep.address)?;
                return Ok(());
            }
            usbtmc_status::STATUS_PENDING => {
                let fifo_empty = buffer[1] & 0b0000_0001 == 0;
                if !fifo_empty {
                    let _ = device.transport.bulk_in(
                        device.endpoints.bulk_in_ep.address,
                        &mut drain_buf,
                        device.timeout(),
                    );
                }
            }
            _ => return Err(Error::StatusUnexpectedFailure),
        }
    }

    Err(Error::Perm("clear did not complete within MAX_READS_TO_CLEAR_BULK_IN"))
}

pub fn abort_bulk_in(device: &DeviceState, transfer_b_tag: u8) -> Result<(), Error> {
    control::abort_bulk_in(device, transfer_b_tag).map(|_| ())
}

pub fn abort_bulk_out(device: &DeviceState, transfer_b_tag: u8) -> Result<(), Error> {
    control::abort_bulk_out(device, transfer_b_tag).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IoConfig;
    use crate::transport::mock::MockTransport;
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

    #[test]
    fn clear_succeeds_immediately() {
        let mock = Arc::new(MockTransport::new());
        mock.push_control_reply(Ok(vec![usbtmc_status::STATUS_SUCCESS]));
        mock.push_control_reply(Ok(vec![usbtmc_status::STATUS_SUCCESS, 0]));

        struct Wrap(Arc<MockTransport>);
        impl crate::transport::Transport for Wrap {
            fn control_transfer(
                &self,
                a: u8,
                b: u8,
                c: u16,
                d: u16,
                buf: &mut [u8],
                t: std::time::Duration,
            ) -> crate::transport::TransportResult<usize> {
                self.0.control_transfer(a, b, c, d, buf, t)
            }
            fn bulk_out(&self, e: u8, buf: &[u8], t: std::time::Duration) -> crate::transport::TransportResult<usize> {
                self.0.bulk_out(e, buf, t)
            }
            fn bulk_in(&self, e: u8, buf: &mut [u8], t: std::time::Duration) -> crate::transport::TransportResult<usize> {
                self.0.bulk_in(e, buf, t)
            }
            fn interrupt_in(&self, e: u8, buf: &mut [u8], t: std::time::Duration) -> crate::transport::TransportResult<usize> {
                self.0.interrupt_in(e, buf, t)
            }
            fn clear_halt(&self, e: u8) -> crate::transport::TransportResult<()> {
                self.0.clear_halt(e)
            }
        }

        let device = DeviceState::new(
            Box::new(Wrap(mock.clone())),
            endpoints(),
            0,
            Capabilities::default(),
            IoConfig::default(),
        );
        assert!(clear(&device).is_ok());
        assert!(mock.halts_cleared.lock().unwrap().contains(&device.endpoints.bulk_out_ep.address));
    }
}
