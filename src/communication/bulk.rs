//! ## Bulk
//!
//! Chunked read/write engines for `DEV_DEP_MSG_OUT`/`DEV_DEP_MSG_IN`
//! framing (C5/C6), and the USB488 `TRIGGER` bulk-out message.

use crate::constants::misc;
use crate::device::DeviceState;
use crate::error::Error;
use crate::framing;
use crate::handle::Handle;
use crate::transport::Transport;

/// Write a device-dependent message to the bulk-out endpoint, chunking
/// it to the configured IO buffer size and setting EOM only on the final
/// chunk (§4.2/§4.3).
pub fn write_dev_dep_msg(
    device: &DeviceState,
    _handle: &Handle,
    data: &[u8],
    eom: bool,
) -> Result<(), Error> {
    let chunk_size = device.config.io_buffer_size();
    let chunks: Vec<&[u8]> = if data.is_empty() {
        vec![&data[..]]
    } else {
        data.chunks(chunk_size).collect()
    };
    let num_chunks = chunks.len();
    let timeout = device.timeout();

    for (i, chunk) in chunks.into_iter().enumerate() {
        let b_tag = device.next_b_tag();
        device.set_b_tag_last_write(b_tag);
        let is_last = i + 1 == num_chunks;
        let header = framing::encode_dev_dep_msg_out(b_tag, chunk.len() as u32, is_last && eom);

        let mut frame = Vec::with_capacity(header.len() + chunk.len());
        frame.extend_from_slice(&header);
        frame.extend_from_slice(chunk);
        framing::pad_to_4(&mut frame);

        let mut sent = 0;
        while sent < frame.len() {
            let n = device
                .transport
                .bulk_out(device.endpoints.bulk_out_ep.address, &frame[sent..], timeout)?;
            if n == 0 {
                return Err(Error::Io("bulk-out made no progress".into()));
            }
            sent += n;
        }
    }

    Ok(())
}

/// Read a device-dependent message from the bulk-in endpoint (§4.2/§4.3).
///
/// Exactly one `REQUEST_DEV_DEP_MSG_IN` is sent, with `transferSize` set
/// to `max_len`; `bTag_last_read` is fixed for the whole logical read.
/// The device may still split its reply across several bulk-in packets
/// (short of a full transfer), so the bulk-in endpoint is drained with
/// plain reads afterwards -- only the first packet carries the 12-byte
/// header, continuation packets are raw payload.
pub fn read_dev_dep_msg(
    device: &DeviceState,
    handle: &Handle,
    max_len: usize,
) -> Result<(Vec<u8>, bool), Error> {
    let chunk_size = device.config.io_buffer_size();
    let timeout = device.timeout();
    let term_char = if handle.term_char_enabled() {
        Some(handle.term_char())
    } else {
        None
    };

    let b_tag = device.next_b_tag();
    device.set_b_tag_last_read(b_tag);
    let request = framing::encode_request_dev_dep_msg_in(b_tag, max_len as u32, term_char);
    device
        .transport
        .bulk_out(device.endpoints.bulk_out_ep.address, &request, timeout)?;

    let mut output = Vec::new();

    let mut buffer = vec![0u8; misc::USBTMC_HEADER_SIZE + max_len.min(chunk_size)];
    let n = device
        .transport
        .bulk_in(device.endpoints.bulk_in_ep.address, &mut buffer, timeout)?;
    buffer.truncate(n);

    let reply = framing::decode_dev_dep_msg_in(&buffer, b_tag)?;
    let total_len = (reply.n_characters as usize).min(max_len);
    let eom = reply.eom;
    let payload_end = (misc::USBTMC_HEADER_SIZE + total_len).min(buffer.len());
    output.extend_from_slice(&buffer[misc::USBTMC_HEADER_SIZE..payload_end]);

    // The device's reply can still arrive split across several USB
    // packets below the declared length; drain the endpoint with plain
    // reads (no header) until the declared byte count is reached.
    while output.len() < total_len {
        let remaining = total_len - output.len();
        let mut buffer = vec![0u8; remaining.min(chunk_size)];
        let n = device
            .transport
            .bulk_in(device.endpoints.bulk_in_ep.address, &mut buffer, timeout)?;
        if n == 0 {
            break;
        }
        buffer.truncate(n);
        output.extend_from_slice(&buffer);
    }

    Ok((output, eom))
}

/// Send a `TRIGGER` (USB488) bulk-out message, header-only.
pub fn trigger(device: &DeviceState) -> Result<(), Error> {
    if !device.capabilities.supports_usb488_trigger() {
        return Err(Error::NotSupported("device does not support TRIGGER"));
    }
    let b_tag = device.next_b_tag();
    device.set_b_tag_last_write(b_tag);
    let mut frame = framing::encode_trigger(b_tag).to_vec();
    framing::pad_to_4(&mut frame);
    device
        .transport
        .bulk_out(device.endpoints.bulk_out_ep.address, &frame, device.timeout())?;
    Ok(())
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

    fn device_with_mock() -> (Arc<DeviceState>, Arc<MockTransport>) {
        let mock = Arc::new(MockTransport::new());
        let transport_box: Box<dyn crate::transport::Transport> = {
            struct Shared(Arc<MockTransport>);
            impl crate::transport::Transport for Shared {
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
            Box::new(Shared(mock.clone()))
        };
        let device = Arc::new(DeviceState::new(
            transport_box,
            endpoints(),
            0,
            Capabilities::default(),
            IoConfig::default(),
        ));
        (device, mock)
    }

    #[test]
    fn write_splits_into_chunks_with_eom_on_last() {
        crate::transport::mock::init_test_logging();
        let (device, mock) = device_with_mock();
        let data = vec![0xABu8; 10];
        let handle = Handle::new(device.clone());
        write_dev_dep_msg(&device, &handle, &data, true).unwrap();

        let sent = mock.sent_bulk_out.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0][8] & framing::ATTR_EOM, framing::ATTR_EOM);
    }

    #[test]
    fn write_retries_until_whole_frame_is_sent() {
        struct PartialWriteTransport {
            max_per_call: usize,
            sent: Arc<std::sync::Mutex<Vec<u8>>>,
        }
        impl crate::transport::Transport for PartialWriteTransport {
            fn control_transfer(
                &self,
                _a: u8,
                _b: u8,
                _c: u16,
                _d: u16,
                buf: &mut [u8],
                _t: std::time::Duration,
            ) -> TransportResult<usize> {
                Ok(buf.len())
            }
            fn bulk_out(&self, _e: u8, buf: &[u8], _t: std::time::Duration) -> TransportResult<usize> {
                let n = buf.len().min(self.max_per_call);
                self.sent.lock().unwrap().extend_from_slice(&buf[..n]);
                Ok(n)
            }
            fn bulk_in(&self, _e: u8, _buf: &mut [u8], _t: std::time::Duration) -> TransportResult<usize> {
                Ok(0)
            }
            fn interrupt_in(&self, _e: u8, _buf: &mut [u8], _t: std::time::Duration) -> TransportResult<usize> {
                Ok(0)
            }
            fn clear_halt(&self, _e: u8) -> TransportResult<()> {
                Ok(())
            }
        }

        let sent = Arc::new(std::sync::Mutex::new(Vec::new()));
        let transport = PartialWriteTransport {
            max_per_call: 3,
            sent: sent.clone(),
        };
        let device = Arc::new(DeviceState::new(
            Box::new(transport),
            endpoints(),
            0,
            Capabilities::default(),
            IoConfig::default(),
        ));
        let handle = Handle::new(device.clone());
        let data = vec![0xCDu8; 10];
        write_dev_dep_msg(&device, &handle, &data, true).unwrap();

        // header (12) + 10 bytes payload, padded to 4 = 24 bytes total,
        // dribbled out 3 bytes at a time by the mock transport.
        assert_eq!(sent.lock().unwrap().len(), 24);
    }

    #[test]
    fn read_sends_single_request_and_drains_continuation_packets() {
        let (device, mock) = device_with_mock();
        let handle = Handle::new(device.clone());

        // device.next_b_tag() starts at 1, so the one request is tagged 1.
        // The header declares the full 5-byte message and sets EOM; the
        // rest of the payload arrives on a headerless continuation packet.
        let mut first = vec![2u8, 1, !1u8, 0];
        first.extend_from_slice(&5u32.to_le_bytes());
        first.push(framing::ATTR_EOM);
        first.extend_from_slice(&[0, 0, 0]);
        first.extend_from_slice(&[b'h', b'e', b'l', b'l']);

        let second = vec![b'o'];

        mock.push_bulk_in(Ok(first));
        mock.push_bulk_in(Ok(second));

        let (data, eom) = read_dev_dep_msg(&device, &handle, 1024).unwrap();
        assert_eq!(data, b"hello");
        assert!(eom);

        let sent = mock.sent_bulk_out.lock().unwrap();
        assert_eq!(sent.len(), 1, "exactly one REQUEST_DEV_DEP_MSG_IN per logical read");
        assert_eq!(sent[0][1], 1, "bTag fixed for the whole logical read");
    }
}
