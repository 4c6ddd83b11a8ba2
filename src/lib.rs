//! # usbtmc-host
//!
//! Host-side driver for USBTMC (USB Test & Measurement Class) devices,
//! including the USB488 subclass extensions (remote control, trigger,
//! service request). Built on [`rusb`] for the underlying USB stack.
//!
//! ## Usage
//!
//! ```toml
//! usbtmc-host = "0.1"
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use usbtmc_host::UsbtmcClient;
//!
//! const DEVICE_VID: u16 = 0x0000;
//! const DEVICE_PID: u16 = 0x0000;
//!
//! fn main() -> anyhow::Result<()> {
//!     let handle = UsbtmcClient::connect((DEVICE_VID, DEVICE_PID))?;
//!     let response = handle.query(b"*IDN?", 1024)?;
//!     println!("{}", String::from_utf8_lossy(&response));
//!     Ok(())
//! }
//! ```
//!

mod abort;
mod communication {
    pub mod bulk;
    pub mod control;
}
mod config;
mod constants;
mod device;
mod error;
mod framing;
mod handle;
mod init;
mod interrupt;
mod transport;
mod types;

pub use config::IoConfig;
pub use error::Error;
pub use handle::Handle;
pub use types::{Capabilities, DeviceAddr, DeviceId, DeviceInfo};

use std::sync::Arc;

use anyhow::Result;
use rusb::DeviceDescriptor;

use communication::control;
use device::DeviceState;
use transport::RusbTransport;

/// Filters candidate USBTMC devices down to the one a caller wants.
/// Implemented for `()` (first found), `DeviceId`/`(u16, u16)`/`[u16; 2]`
/// (by vendor/product id), `DeviceAddr`/`(u8, u8)`/`[u8; 2]` (by bus and
/// address), and `DeviceInfo` (both).
pub trait DeviceFilter {
    fn apply_filter<T: rusb::UsbContext>(
        &self,
        device: &rusb::Device<T>,
        device_desc: &DeviceDescriptor,
    ) -> bool;
}

/// Entry point: enumerate or connect to USBTMC devices.
pub struct UsbtmcClient;

impl UsbtmcClient {
    /// List every USBTMC device currently visible to libusb.
    pub fn devices() -> Result<Vec<DeviceInfo>> {
        let mut context = rusb::Context::new()?;
        init::list_devices(&mut context)
    }

    /// Connect to a device matching `filter` and perform the full
    /// USBTMC setup sequence (mode detection, kernel-driver detach,
    /// endpoint discovery, capability probe, buffer clear), returning an
    /// open [`Handle`] with the default [`IoConfig`].
    ///
    /// `filter` selects the device:
    /// - `()` -- first USBTMC device found
    /// - `(idVendor, idProduct)` or `DeviceId` -- by USB identifiers
    /// - `(bus, device)` or `DeviceAddr` -- by USB bus and device number
    /// - `DeviceInfo` -- by both
    pub fn connect(filter: impl DeviceFilter) -> Result<Handle> {
        Self::connect_with_config(filter, IoConfig::default())
    }

    /// Like [`Self::connect`], but with an explicit [`IoConfig`]
    /// controlling the bulk chunk size and default timeout.
    pub fn connect_with_config(filter: impl DeviceFilter, config: IoConfig) -> Result<Handle> {
        let mut context = rusb::Context::new()?;
        let (device, mut raw_handle) = init::open_device(&mut context, filter)?;

        let mut mode = init::get_usbtmc_mode(&device)?;
        init::detach_kernel_driver(&mut mode, &mut raw_handle)?;
        log::debug!(
            "claiming interface {} (kernel driver detached: {})",
            mode.interface_number,
            mode.has_kernel_driver
        );

        let endpoints = init::get_endpoints(&mode, &device)?;

        raw_handle.set_active_configuration(mode.config_number)?;
        raw_handle.claim_interface(mode.interface_number)?;
        raw_handle.set_alternate_setting(mode.interface_number, mode.setting_number)?;

        let transport = RusbTransport::new(raw_handle);

        let capabilities =
            control::get_capabilities(&transport, mode.interface_number, config.default_timeout_duration())?;
        log::debug!("device capabilities: {:?}", capabilities);

        control::clear_buffers(&transport, mode.interface_number, config.default_timeout_duration())?;
        control::clear_feature(&transport, endpoints.bulk_out_ep.address)?;
        control::clear_feature(&transport, endpoints.bulk_in_ep.address)?;

        let device_state = Arc::new(DeviceState::with_kernel_driver_flag(
            Box::new(transport),
            endpoints,
            mode.interface_number,
            capabilities,
            config,
            mode.has_kernel_driver,
        ));

        interrupt::spawn(device_state.clone());
        log::info!("connected to USBTMC device on interface {}", mode.interface_number);

        Ok(Handle::new(device_state))
    }
}
