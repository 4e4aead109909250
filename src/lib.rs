// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A USB full-speed device for the RP2040.
//!
//! `rp2040-usbd` drives the RP2040 USB controller in device mode: it answers
//! the host's control requests on EP0 (descriptors, address, configuration)
//! and hands the rest of the endpoints to you. You describe the device with
//! a [`DeviceConfig`], attaching an [`EndpointHandler`] to each endpoint you
//! want to hear from, then [`open`](UsbDevice::open) a [`UsbDevice`] and call
//! [`on_interrupt`](UsbDevice::on_interrupt) from `USBCTRL_IRQ`.
//!
//! ```ignore
//! use rp2040_usbd::{
//!     DeviceConfig, EndpointAttributes, EndpointConfig, InterfaceConfig, Rp2040, Transfer,
//!     UsbDevice, UsbDir,
//! };
//!
//! fn received(usb: &mut dyn Transfer, data: &[u8]) {
//!     usb.begin_transfer(1, 0x82, data);
//! }
//!
//! static ENDPOINTS: [EndpointConfig; 2] = [
//!     EndpointConfig::new(UsbDir::Out, 1, EndpointAttributes::BULK, 64, 0).with_handler(received),
//!     EndpointConfig::new(UsbDir::In, 2, EndpointAttributes::BULK, 64, 1),
//! ];
//! static INTERFACES: [InterfaceConfig<'static>; 1] = [InterfaceConfig {
//!     id: 1,
//!     class: 0xFF,
//!     subclass: 0,
//!     protocol: 0,
//!     descriptor: "Echo",
//!     endpoints: &ENDPOINTS,
//! }];
//!
//! let mut usb = UsbDevice::new(Rp2040::new(p.USBCTRL_REGS, p.USBCTRL_DPRAM, p.RESETS));
//! usb.open(&DeviceConfig {
//!     vendor: "Raspberry Pi",
//!     product: "Echo",
//!     interfaces: &INTERFACES,
//!     ..Default::default()
//! })?;
//! ```
//!
//! The engine never touches hardware except through [`Peripherals`], so it
//! runs just as well against a model of the controller.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod log;

mod config;
mod control;
mod descriptor;
mod device;
mod endpoint;
mod error;
pub mod mmio;
mod rp2040;
pub mod usb;

#[cfg(test)]
mod mock;

pub use config::{
    normalize, round_packet_size, ConfigFlags, Configuration, DeviceConfig, EndpointAttributes,
    EndpointConfig, EndpointHandler, Interface, InterfaceConfig, CONTROL_MAX_PACKET_SIZE,
    MAX_ENDPOINTS, MAX_INTERFACES,
};
pub use control::ControlState;
pub use descriptor::{
    DescriptorSet, FIRST_INTERFACE_STRING, PRODUCT_STRING, SERIAL_STRING, STAGING_SIZE,
    VENDOR_STRING,
};
pub use device::{Transfer, UsbDevice};
pub use error::{ConfigError, Error, Result};
pub use mmio::{DpramAddress, Peripherals};
pub use rp2040::Rp2040;
pub use usb::{UsbDir, UsbSyncType, UsbTransferType, UsbUsageType};
