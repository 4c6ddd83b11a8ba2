//! ## USBTMC Errors
//!
//! The errors used throughout the crate.
//!

#[allow(unused)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("device not found")]
    DeviceNotFound,
    #[error("device is not compatible with USBTMC")]
    DeviceIncompatible,
    #[error("specified configuration not found")]
    ConfigurationNotFound,
    #[error("specified interface not found")]
    InterfaceNotFound,
    #[error("specified interface setting not found")]
    InterfaceSettingNotFound,
    #[error("bulk out endpoint not found")]
    BulkOutEndpointNotFound,
    #[error("bulk in endpoint not found")]
    BulkInEndpointNotFound,
    #[error("used incorrect endpoint")]
    IncorrectEndpoint,
    #[error("bulk in transfer cannot be aborted because FIFO is not empty")]
    BulkInFIFONotEmpty,
    #[error("no transfer in progress")]
    StatusNoTransferInProgress,
    #[error("control request failed")]
    StatusFailure,
    #[error("control request unexpectedly failed")]
    StatusUnexpectedFailure,

    /// Device record has been disconnected; all new IO is refused.
    #[error("device has been disconnected")]
    NoDevice,
    /// Allocation failure surfaced from the transport.
    #[error("out of memory")]
    NoMem,
    /// A user-supplied parameter was rejected.
    #[error("invalid argument: {0}")]
    BadArg(&'static str),
    /// A protocol-level failure: malformed reply, tag mismatch, etc.
    #[error("protocol error: {0}")]
    Perm(&'static str),
    /// A transport-level failure with no more specific classification.
    #[error("transport io error: {0}")]
    Io(String),
    /// A transfer did not complete before its timeout elapsed.
    #[error("operation timed out")]
    Timeout,
    /// A blocking wait was interrupted before it could complete.
    #[error("operation interrupted")]
    Interrupted,
    /// Copying to/from a user-supplied buffer failed.
    #[error("fault accessing user buffer")]
    Fault,
    /// The device (or this handle) lacks the capability the operation needs.
    #[error("capability not supported: {0}")]
    NotSupported(&'static str),
    /// An unknown or malformed request was made of the dispatcher.
    #[error("unrecognized request")]
    BadRequest,
}

impl From<rusb::Error> for Error {
    fn from(err: rusb::Error) -> Self {
        match err {
            rusb::Error::Timeout => Error::Timeout,
            rusb::Error::NoDevice | rusb::Error::NotFound => Error::NoDevice,
            rusb::Error::Pipe => Error::Perm("endpoint stalled"),
            rusb::Error::Overflow => Error::Io("transfer overflow".into()),
            rusb::Error::Interrupted => Error::Interrupted,
            rusb::Error::NoMem => Error::NoMem,
            rusb::Error::InvalidParam => Error::BadArg("invalid parameter rejected by transport"),
            rusb::Error::NotSupported => Error::NotSupported("transport operation"),
            other => Error::Io(other.to_string()),
        }
    }
}

impl From<crate::transport::TransportError> for Error {
    fn from(err: crate::transport::TransportError) -> Self {
        use crate::transport::TransportError::*;
        match err {
            Timeout => Error::Timeout,
            Disconnected => Error::NoDevice,
            Stall => Error::Perm("endpoint stalled"),
            Overflow => Error::Io("transfer overflow".into()),
            Cancelled => Error::Interrupted,
            Io(msg) => Error::Io(msg),
        }
    }
}
