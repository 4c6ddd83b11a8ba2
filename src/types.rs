//! ## Types
//!
//! The different types used across the crate
//!

use rusb::{Direction, TransferType};

/// USB device address
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceAddr {
    /// USB bus number
    pub bus: u8,
    /// USB device number
    pub device: u8,
}

/// USB device identifiers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceId {
    /// USB Id Vendor
    pub vendor_id: u16,
    /// USB Id Product
    pub product_id: u16,
}

/// USB device info
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub address: DeviceAddr,
}

/// ### Device Mode
///
/// A collection of the configuration, interface and interface number. Also if the interface has a kernel driver attached.
///
#[derive(Debug, Clone, Default)]
pub struct DeviceMode {
    /// The USB configuration number
    pub config_number: u8,
    /// The interface number specific to the configuration
    pub interface_number: u8,
    /// The setting number specific to the interface
    pub setting_number: u8,
    /// If the device has a kernel driver. Important for returning control to the OS (on Linux).
    pub has_kernel_driver: bool,
}

/// ### Endpoint
///
/// Properties of an endpoint.
///
#[derive(Clone, Debug)]
pub struct Endpoint {
    /// Address of the endpoint on the interface
    pub address: u8,
    /// The maximal size a packet can have on this endpoint
    pub max_packet_size: u16,
    /// The transfer type of the endpoint (for USBTMC, Bulk or Interrupt)
    pub transfer_type: TransferType,
    /// The direction of the endpoint (for USBTMC, In or Out)
    pub direction: Direction,
}

/// ### USBTMC Endpoints
///
/// Endpoints specific to the USBTMC spec.
///
#[derive(Clone, Debug)]
pub struct UsbtmcEndpoints {
    /// The mandatory BULK OUT endpoint
    pub bulk_out_ep: Endpoint,
    /// The mandatory BULK IN endpoint
    pub bulk_in_ep: Endpoint,
    /// The optional INTERRUPT IN endpoint
    pub interrupt_ep: Option<Endpoint>,
}

/// ### Capabilities
///
/// The collected capabilities of a USBTMC device, including the USB488
/// subclass extensions.
///
#[derive(Clone, Debug, Default)]
pub struct Capabilities {
    pub bcd_version: u16,
    /// Can accept a control command for pulse
    pub accepts_indicator_pulse_request: bool,
    /// Only sends data to the controller
    pub is_talk_only: bool,
    /// Only accepts data from the controller
    pub is_listen_only: bool,
    /// When returning data, it has a terminator character in the data
    pub supports_bulk_in_term_char: bool,

    /// Raw capability bytes from GET_CAPABILITIES, offsets 4/5/14/15.
    pub interface_capabilities: u8,
    pub device_capabilities: u8,
    pub usb488_interface_capabilities: u8,
    pub usb488_device_capabilities: u8,
    /// Coalesced USB488 capability byte:
    /// `(usb488_interface_capabilities & 0x07) | ((usb488_device_capabilities & 0x0F) << 4)`.
    pub usb488_capabilities: u8,
    /// Whether this interface reports USB488 protocol (USB488 requests and
    /// the coalesced caps byte above are only meaningful when this is set).
    pub is_usb488: bool,
}

impl Capabilities {
    /// USB488 "simple" capability bit (REN_CONTROL/GOTO_LOCAL/LOCAL_LOCKOUT
    /// available).
    pub fn supports_usb488_simple(&self) -> bool {
        self.is_usb488 && self.usb488_capabilities & 0b0000_0001 != 0
    }

    /// USB488 SCPI/remote-control capability bit.
    pub fn supports_usb488_remote_control(&self) -> bool {
        self.is_usb488 && self.usb488_capabilities & 0b0000_0010 != 0
    }

    /// USB488 trigger capability bit.
    pub fn supports_usb488_trigger(&self) -> bool {
        self.is_usb488 && self.usb488_capabilities & 0b0000_0100 != 0
    }
}
