// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device configuration, as supplied by the caller, and its normalization.
//!
//! The caller describes its device with a [`DeviceConfig`] listing its
//! interfaces and their endpoints. [`normalize`] checks and tidies that
//! description and prepends interface 0, which carries the two halves of the
//! control endpoint and belongs to the engine.

use core::fmt;
use core::ops::Range;

use bitflags::bitflags;
use heapless::Vec;

use crate::error::ConfigError;
use crate::mmio::{self, dpram, DpramAddress, DPRAM_BASE, DPRAM_SIZE};
use crate::usb::{UsbDir, UsbSyncType, UsbTransferType, UsbUsageType};
use crate::Transfer;

/// Most interfaces the engine tracks, including interface 0.
pub const MAX_INTERFACES: usize = 8;
/// Most endpoints the engine tracks: 16 endpoint numbers, two directions.
pub const MAX_ENDPOINTS: usize = 32;

/// Lists longer than this are truncated; interface and endpoint counts go on
/// the wire as bytes.
const LIST_LIMIT: usize = 255;

/// Lengths of the controller's `ep_buffer_control` and `ep_control` arrays.
const BUFFER_CONTROL_REGISTERS: usize = 32;
const ENDPOINT_CONTROL_REGISTERS: usize = 30;

/// Power draw ceiling for a USB 2.0 device, in mA.
const MAX_POWER_MA: u16 = 500;

/// Max packet size of EP0. Also the size of every DPSRAM data buffer.
pub const CONTROL_MAX_PACKET_SIZE: u16 = 64;

/// Interface 0's endpoints: the engine's control endpoint. The IN half
/// answers the host's requests, the OUT half takes the host's status packets.
const CONTROL_ENDPOINTS: [EndpointConfig; 2] = [
    EndpointConfig::control(UsbDir::In),
    EndpointConfig::control(UsbDir::Out),
];

/// Called when a buffer on an endpoint completes.
///
/// For OUT endpoints `data` is what the host sent; for IN endpoints it's a
/// copy of what we sent. The handler runs in interrupt context and may arm
/// further transfers through `usb`.
pub type EndpointHandler = fn(usb: &mut dyn Transfer, data: &[u8]);

bitflags! {
    /// Device attributes reported in the configuration descriptor.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct ConfigFlags: u8 {
        const SELF_POWERED = 0b0100_0000;
        const REMOTE_WAKEUP = 0b0010_0000;
    }
}

/// `bmAttributes` of an endpoint descriptor, in pieces.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EndpointAttributes {
    pub transfer: UsbTransferType,
    pub sync: UsbSyncType,
    pub usage: UsbUsageType,
}

impl EndpointAttributes {
    pub const CONTROL: Self = Self::of(UsbTransferType::Control);
    pub const BULK: Self = Self::of(UsbTransferType::Bulk);
    pub const INTERRUPT: Self = Self::of(UsbTransferType::Interrupt);

    /// Data endpoint of the given transfer type, no synchronization.
    pub const fn of(transfer: UsbTransferType) -> Self {
        Self {
            transfer,
            sync: UsbSyncType::None,
            usage: UsbUsageType::Data,
        }
    }

    /// The attributes byte as it goes on the wire.
    pub const fn bits(self) -> u8 {
        self.transfer as u8 | self.sync as u8 | self.usage as u8
    }
}

/// One endpoint of an interface.
#[derive(Copy, Clone)]
pub struct EndpointConfig {
    /// `In` is device-to-host, `Out` is host-to-device.
    pub direction: UsbDir,
    /// Endpoint number, 0..=15.
    pub number: u8,
    pub handler: Option<EndpointHandler>,
    /// Polling interval in frames, for interrupt endpoints.
    pub interval: u8,
    pub attributes: EndpointAttributes,
    /// Rounded up to 8, 16, 32 or 64 by [`normalize`].
    pub max_packet_size: u16,
    /// Where this endpoint's packets live in DPSRAM.
    pub data_buffer: DpramAddress,
    /// Which `ep_buffer_control` register is this endpoint's.
    pub buffer_control: usize,
    /// Which `ep_control` register is this endpoint's. EP0 has none.
    pub endpoint_control: Option<usize>,
}

impl EndpointConfig {
    /// An endpoint with its registers where the RP2040 puts them, using the
    /// `buffer_index`th data buffer (see [`mmio::data_buffer`]).
    pub const fn new(
        direction: UsbDir,
        number: u8,
        attributes: EndpointAttributes,
        max_packet_size: u16,
        buffer_index: u32,
    ) -> Self {
        Self {
            direction,
            number,
            handler: None,
            interval: 0,
            attributes,
            max_packet_size,
            data_buffer: mmio::data_buffer(buffer_index),
            buffer_control: mmio::buffer_control(number, direction),
            endpoint_control: mmio::endpoint_control(number, direction),
        }
    }

    pub const fn with_handler(mut self, handler: EndpointHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub const fn with_interval(mut self, interval: u8) -> Self {
        self.interval = interval;
        self
    }

    /// The endpoint address: direction bit plus endpoint number.
    pub const fn address(&self) -> u8 {
        self.direction.endpoint(self.number)
    }

    /// Offset of the data buffer into DPSRAM, once it's known to hold a
    /// whole packet where the controller can use it.
    pub fn buffer_offset(&self) -> Result<u16, ConfigError> {
        let offset = self
            .data_buffer
            .offset(DPRAM_BASE)
            .ok_or(ConfigError::BufferOutsideDpram)?;
        let end = u32::from(offset) + u32::from(round_packet_size(self.max_packet_size));
        if offset < dpram::EP0_BUFFER0 || end > DPRAM_SIZE {
            return Err(ConfigError::BufferOutsideDpram);
        }
        if offset % dpram::BUFFER_SIZE != 0 {
            return Err(ConfigError::MisalignedBuffer);
        }
        Ok(offset)
    }

    /// One half of EP0. Both halves share `EP0_BUFFER0`.
    const fn control(direction: UsbDir) -> Self {
        Self {
            direction,
            number: 0,
            handler: None,
            interval: 0,
            attributes: EndpointAttributes::CONTROL,
            max_packet_size: CONTROL_MAX_PACKET_SIZE,
            data_buffer: DpramAddress(DPRAM_BASE + dpram::EP0_BUFFER0 as u32),
            buffer_control: mmio::buffer_control(0, direction),
            endpoint_control: None,
        }
    }
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("address", &self.address())
            .field("handler", &self.handler.is_some())
            .field("interval", &self.interval)
            .field("attributes", &self.attributes)
            .field("max_packet_size", &self.max_packet_size)
            .field("data_buffer", &self.data_buffer)
            .field("buffer_control", &self.buffer_control)
            .field("endpoint_control", &self.endpoint_control)
            .finish()
    }
}

/// One interface of the device.
#[derive(Copy, Clone, Debug)]
pub struct InterfaceConfig<'a> {
    /// Interface number. 0 is taken by the engine.
    pub id: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    /// Human-readable name, served as a string descriptor.
    pub descriptor: &'a str,
    pub endpoints: &'a [EndpointConfig],
}

/// Everything the host gets to know about the device.
#[derive(Copy, Clone, Debug)]
pub struct DeviceConfig<'a> {
    pub vendor: &'a str,
    pub vendor_id: u16,
    pub product: &'a str,
    pub product_id: u16,
    /// `bcdDevice`.
    pub product_version: u16,
    pub flags: ConfigFlags,
    /// In mA. Clamped to 500.
    pub max_power: u16,
    pub serial_number: Option<&'a str>,
    pub interfaces: &'a [InterfaceConfig<'a>],
}

impl Default for DeviceConfig<'_> {
    fn default() -> Self {
        Self {
            vendor: "",
            vendor_id: 0,
            product: "",
            product_id: 0,
            product_version: 0,
            flags: ConfigFlags::empty(),
            max_power: 100,
            serial_number: None,
            interfaces: &[],
        }
    }
}

/// An interface after normalization. Its endpoints are a range of
/// [`Configuration::endpoints`].
#[derive(Clone, Debug)]
pub struct Interface<'a> {
    pub id: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub descriptor: &'a str,
    pub endpoints: Range<usize>,
}

/// A [`DeviceConfig`] after [`normalize`]: interface 0 is first, packet
/// sizes are legal, and everything fits in the engine's tables.
#[derive(Clone, Debug)]
pub struct Configuration<'a> {
    pub vendor: &'a str,
    pub vendor_id: u16,
    pub product: &'a str,
    pub product_id: u16,
    pub product_version: u16,
    pub flags: ConfigFlags,
    pub max_power: u16,
    pub serial_number: Option<&'a str>,
    pub interfaces: Vec<Interface<'a>, MAX_INTERFACES>,
    pub endpoints: Vec<EndpointConfig, MAX_ENDPOINTS>,
}

impl<'a> Configuration<'a> {
    /// The endpoints belonging to `interface`.
    pub fn endpoints_of(&self, interface: &Interface<'a>) -> &[EndpointConfig] {
        &self.endpoints[interface.endpoints.clone()]
    }
}

/// Rounds a max packet size up to the next size full-speed bulk endpoints
/// allow: 8, 16, 32 or 64.
pub const fn round_packet_size(size: u16) -> u16 {
    match size {
        0..=8 => 8,
        9..=16 => 16,
        17..=32 => 32,
        _ => 64,
    }
}

/// Checks and tidies `config`, and adds the control interface.
pub fn normalize<'a>(config: &DeviceConfig<'a>) -> Result<Configuration<'a>, ConfigError> {
    let caller_interfaces = &config.interfaces[..config.interfaces.len().min(LIST_LIMIT)];

    if caller_interfaces.iter().any(|i| i.id == 0) {
        return Err(ConfigError::ReservedInterface);
    }

    let mut normalized = Configuration {
        vendor: config.vendor,
        vendor_id: config.vendor_id,
        product: config.product,
        product_id: config.product_id,
        product_version: config.product_version,
        flags: config.flags,
        max_power: config.max_power.min(MAX_POWER_MA),
        serial_number: config.serial_number.filter(|s| !s.is_empty()),
        interfaces: Vec::new(),
        endpoints: Vec::new(),
    };

    let interface0: InterfaceConfig<'a> = InterfaceConfig {
        id: 0,
        class: 0,
        subclass: 0,
        protocol: 0,
        descriptor: "Interface0",
        endpoints: &CONTROL_ENDPOINTS,
    };

    for interface in core::iter::once(&interface0).chain(caller_interfaces) {
        let first = normalized.endpoints.len();
        for ep in interface.endpoints.iter().take(LIST_LIMIT) {
            ep.buffer_offset()?;
            if ep.buffer_control >= BUFFER_CONTROL_REGISTERS
                || ep.endpoint_control.map_or(false, |i| i >= ENDPOINT_CONTROL_REGISTERS)
            {
                return Err(ConfigError::NoSuchRegister);
            }
            let ep = EndpointConfig {
                max_packet_size: round_packet_size(ep.max_packet_size),
                ..*ep
            };
            normalized
                .endpoints
                .push(ep)
                .map_err(|_| ConfigError::TooManyEndpoints)?;
        }
        normalized
            .interfaces
            .push(Interface {
                id: interface.id,
                class: interface.class,
                subclass: interface.subclass,
                protocol: interface.protocol,
                descriptor: interface.descriptor,
                endpoints: first..normalized.endpoints.len(),
            })
            .map_err(|_| ConfigError::TooManyInterfaces)?;
    }

    Ok(normalized)
}

#[cfg(test)]
mod test {
    use super::*;

    const BULK_IN: EndpointConfig = EndpointConfig::new(UsbDir::In, 1, EndpointAttributes::BULK, 64, 0);
    const BULK_OUT: EndpointConfig = EndpointConfig::new(UsbDir::Out, 2, EndpointAttributes::BULK, 20, 1);

    fn interface(id: u8, endpoints: &[EndpointConfig]) -> InterfaceConfig<'_> {
        InterfaceConfig {
            id,
            class: 0xFF,
            subclass: 0,
            protocol: 0,
            descriptor: "Test",
            endpoints,
        }
    }

    #[test]
    fn packet_sizes_round_up() {
        for (range, expected) in [(1..=8, 8), (9..=16, 16), (17..=32, 32), (33..=64, 64)] {
            for size in range {
                let rounded = round_packet_size(size);
                assert_eq!(rounded, expected, "size {}", size);
                assert_eq!(round_packet_size(rounded), rounded);
            }
        }
        assert_eq!(round_packet_size(0), 8);
        assert_eq!(round_packet_size(1023), 64);
    }

    #[test]
    fn interface_zero_is_reserved() {
        let endpoints = [BULK_IN];
        let interfaces = [interface(0, &endpoints)];
        let config = DeviceConfig { interfaces: &interfaces, ..Default::default() };
        assert_eq!(normalize(&config).unwrap_err(), ConfigError::ReservedInterface);

        for id in 1..=255 {
            let interfaces = [interface(id, &endpoints)];
            let config = DeviceConfig { interfaces: &interfaces, ..Default::default() };
            assert!(normalize(&config).is_ok(), "id {}", id);
        }
    }

    #[test]
    fn control_interface_comes_first() {
        let endpoints = [BULK_IN, BULK_OUT];
        let interfaces = [interface(1, &endpoints)];
        let config = DeviceConfig { interfaces: &interfaces, ..Default::default() };
        let normalized = normalize(&config).unwrap();

        assert_eq!(normalized.interfaces.len(), 2);
        let control = &normalized.interfaces[0];
        assert_eq!(control.id, 0);
        assert_eq!(control.descriptor, "Interface0");
        let control_eps = normalized.endpoints_of(control);
        assert_eq!(control_eps.len(), 2);
        assert_eq!(control_eps[0].address(), 0x80);
        assert_eq!(control_eps[1].address(), 0x00);
        assert_eq!(control_eps[0].buffer_control, mmio::buffer_control(0, UsbDir::In));
        assert_eq!(control_eps[1].buffer_control, mmio::buffer_control(0, UsbDir::Out));
        assert!(control_eps.iter().all(|ep| ep.endpoint_control.is_none()));

        let caller = &normalized.interfaces[1];
        assert_eq!(caller.id, 1);
        let caller_eps = normalized.endpoints_of(caller);
        assert_eq!(caller_eps.len(), 2);
        assert_eq!(caller_eps[0].max_packet_size, 64);
        assert_eq!(caller_eps[1].max_packet_size, 32);
    }

    #[test]
    fn power_is_clamped() {
        let config = DeviceConfig { max_power: 900, ..Default::default() };
        assert_eq!(normalize(&config).unwrap().max_power, 500);
        let config = DeviceConfig { max_power: 250, ..Default::default() };
        assert_eq!(normalize(&config).unwrap().max_power, 250);
    }

    #[test]
    fn empty_serial_is_no_serial() {
        let config = DeviceConfig { serial_number: Some(""), ..Default::default() };
        assert_eq!(normalize(&config).unwrap().serial_number, None);
    }

    #[test]
    fn tables_have_limits() {
        let endpoints = [BULK_IN; MAX_ENDPOINTS];
        let interfaces = [interface(1, &endpoints)];
        let config = DeviceConfig { interfaces: &interfaces, ..Default::default() };
        assert_eq!(normalize(&config).unwrap_err(), ConfigError::TooManyEndpoints);

        let interfaces = [interface(1, &[]); MAX_INTERFACES];
        let config = DeviceConfig { interfaces: &interfaces, ..Default::default() };
        assert_eq!(normalize(&config).unwrap_err(), ConfigError::TooManyInterfaces);
    }

    #[test]
    fn buffers_must_be_in_dpram() {
        let stray = EndpointConfig {
            data_buffer: DpramAddress(0x2000_0000),
            ..BULK_IN
        };
        let endpoints = [stray];
        let interfaces = [interface(1, &endpoints)];
        let config = DeviceConfig { interfaces: &interfaces, ..Default::default() };
        assert_eq!(normalize(&config).unwrap_err(), ConfigError::BufferOutsideDpram);
    }

    fn check_buffer(offset: u32, max_packet_size: u16) -> Result<u16, ConfigError> {
        EndpointConfig {
            data_buffer: DpramAddress(DPRAM_BASE + offset),
            max_packet_size,
            ..BULK_IN
        }
        .buffer_offset()
    }

    #[test]
    fn buffers_must_hold_a_packet() {
        assert_eq!(check_buffer(0x180, 64), Ok(0x180));
        // The last buffer slot in DPSRAM.
        assert_eq!(check_buffer(0xfc0, 64), Ok(0xfc0));
        // Sizes round up before the end is checked.
        assert_eq!(check_buffer(0xfc0, 33), Ok(0xfc0));

        // Would run off the end of DPSRAM, or isn't where the controller can
        // point an endpoint.
        assert_eq!(check_buffer(0xff0, 16), Err(ConfigError::MisalignedBuffer));
        assert_eq!(check_buffer(0x1a0, 64), Err(ConfigError::MisalignedBuffer));
        assert_eq!(check_buffer(0x1000, 8), Err(ConfigError::BufferOutsideDpram));
        // On top of the control registers.
        assert_eq!(check_buffer(0x40, 64), Err(ConfigError::BufferOutsideDpram));

        // 64 bytes from 0xff0 would write past the end of DPSRAM.
        let overrun = EndpointConfig {
            data_buffer: DpramAddress(DPRAM_BASE + 0xff0),
            ..BULK_IN
        };
        let endpoints = [overrun];
        let interfaces = [interface(1, &endpoints)];
        let config = DeviceConfig { interfaces: &interfaces, ..Default::default() };
        assert_eq!(normalize(&config).unwrap_err(), ConfigError::BufferOutsideDpram);
    }

    #[test]
    fn control_registers_must_exist() {
        let endpoints = [EndpointConfig { buffer_control: 32, ..BULK_IN }];
        let interfaces = [interface(1, &endpoints)];
        let config = DeviceConfig { interfaces: &interfaces, ..Default::default() };
        assert_eq!(normalize(&config).unwrap_err(), ConfigError::NoSuchRegister);

        let endpoints = [EndpointConfig { endpoint_control: Some(30), ..BULK_IN }];
        let interfaces = [interface(1, &endpoints)];
        let config = DeviceConfig { interfaces: &interfaces, ..Default::default() };
        assert_eq!(normalize(&config).unwrap_err(), ConfigError::NoSuchRegister);
    }
}
