//! ## Framing
//!
//! Encode and decode the 12-byte USBTMC bulk-transfer headers.
//!
//! Layout is bit-exact per the USBTMC class spec: a 4-byte prefix
//! `[MsgID, bTag, ~bTag, 0]` common to every message, followed by
//! message-specific fields padded out to 12 bytes total.

use crate::constants::{bulk_msg_id, misc::USBTMC_HEADER_SIZE};
use crate::error::Error;

/// Bit 0 of `bmTransferAttributes`: end-of-message.
pub const ATTR_EOM: u8 = 0b0000_0001;
/// Bit 1 of `bmTransferAttributes` on a read request: TermChar enabled.
pub const ATTR_TERM_CHAR_ENABLED: u8 = 0b0000_0010;

/// A decoded `DEV_DEP_MSG_IN` reply header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevDepMsgInReply {
    pub b_tag: u8,
    pub n_characters: u32,
    pub eom: bool,
}

/// Build a `DEV_DEP_MSG_OUT` (MsgID=1) bulk-out header.
///
/// `transfer_size` is the payload length of *this* framed chunk; `eom`
/// marks whether this chunk is the final fragment of the logical message.
pub fn encode_dev_dep_msg_out(b_tag: u8, transfer_size: u32, eom: bool) -> [u8; USBTMC_HEADER_SIZE] {
    let mut header = [0u8; USBTMC_HEADER_SIZE];
    header[0] = bulk_msg_id::DEVICE_DEPENDENT_MSG_OUT;
    header[1] = b_tag;
    header[2] = !b_tag;
    header[3] = 0;
    header[4..8].copy_from_slice(&transfer_size.to_le_bytes());
    header[8] = if eom { ATTR_EOM } else { 0 };
    header
}

/// Build a `REQUEST_DEV_DEP_MSG_IN` (MsgID=2) bulk-out header.
///
/// `transfer_size` tells the device the maximum it may return; `term_char`
/// carries the optional TermChar byte, honored only if `Some`.
pub fn encode_request_dev_dep_msg_in(
    b_tag: u8,
    transfer_size: u32,
    term_char: Option<u8>,
) -> [u8; USBTMC_HEADER_SIZE] {
    let mut header = [0u8; USBTMC_HEADER_SIZE];
    header[0] = bulk_msg_id::REQUEST_DEVICE_DEPENDENT_MSG_IN;
    header[1] = b_tag;
    header[2] = !b_tag;
    header[3] = 0;
    header[4..8].copy_from_slice(&transfer_size.to_le_bytes());
    if let Some(tc) = term_char {
        header[8] = ATTR_TERM_CHAR_ENABLED;
        header[9] = tc;
    }
    header
}

/// Build a `TRIGGER` (MsgID=128, USB488) bulk-out header. Header-only, no
/// payload.
pub fn encode_trigger(b_tag: u8) -> [u8; USBTMC_HEADER_SIZE] {
    let mut header = [0u8; USBTMC_HEADER_SIZE];
    header[0] = bulk_msg_id::TRIGGER;
    header[1] = b_tag;
    header[2] = !b_tag;
    header
}

/// Decode the first 12 bytes of a `DEV_DEP_MSG_IN` reply, validating that
/// the reply is well-formed and tagged with the expected `bTag`.
///
/// Does not validate `n_characters` against the size requested on the
/// wire; callers compare that themselves since the cap differs between
/// the first chunk of a reply and subsequent chunks.
pub fn decode_dev_dep_msg_in(buf: &[u8], expected_b_tag: u8) -> Result<DevDepMsgInReply, Error> {
    if buf.len() < USBTMC_HEADER_SIZE {
        return Err(Error::Perm("bulk-in reply shorter than header"));
    }
    let msg_id = buf[0];
    if msg_id != bulk_msg_id::DEVICE_DEPENDENT_MSG_IN {
        return Err(Error::Perm("bulk-in reply has unexpected MsgID"));
    }
    let b_tag = buf[1];
    if b_tag != expected_b_tag {
        return Err(Error::Perm("bulk-in reply bTag does not match last bTag sent"));
    }
    if buf[2] != !b_tag {
        return Err(Error::Perm("bulk-in reply bTag/~bTag inconsistent"));
    }
    let n_characters = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let eom = buf[8] & ATTR_EOM != 0;
    Ok(DevDepMsgInReply {
        b_tag,
        n_characters,
        eom,
    })
}

/// Zero-pad `buf` up to the next 4-byte multiple, as required after every
/// bulk-out framing (header + payload).
pub fn pad_to_4(buf: &mut Vec<u8>) {
    let remainder = buf.len() % 4;
    if remainder != 0 {
        buf.resize(buf.len() + (4 - remainder), 0);
    }
}
