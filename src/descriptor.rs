// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Descriptor construction.
//!
//! [`DescriptorSet::build`] turns a normalized [`Configuration`] into the
//! bytes the host asks for with `GET_DESCRIPTOR`. The device descriptor is
//! kept as a struct. The configuration descriptor set (configuration, then
//! every interface followed by its endpoints, which is the order the host
//! expects them) is assembled once into a byte block, with the offset of
//! each interface recorded. Strings are kept as `&str` and encoded on
//! demand, since UTF-16 doubles their size.

use core::mem::size_of;

use byteorder::LittleEndian;
use heapless::Vec;
use zerocopy::{AsBytes, U16};

use crate::config::{Configuration, CONTROL_MAX_PACKET_SIZE, MAX_INTERFACES};
use crate::error::ConfigError;
use crate::usb::{
    UsbConfigurationDescriptor, UsbDescType, UsbDeviceDescriptor, UsbDir, UsbEndpointDescriptor,
    UsbInterfaceDescriptor, LANGID_EN_US,
};

/// Size of the buffer that control responses are staged in. Control
/// responses go out as a single EP0 packet, so nothing we send can be bigger.
pub const STAGING_SIZE: usize = CONTROL_MAX_PACKET_SIZE as usize;

/// String descriptor index of the manufacturer name.
pub const VENDOR_STRING: u8 = 1;
/// String descriptor index of the product name.
pub const PRODUCT_STRING: u8 = 2;
/// String descriptor index of the serial number.
pub const SERIAL_STRING: u8 = 3;
/// String descriptor index of interface 0's name. Interface `k` (in
/// configuration order) gets `FIRST_INTERFACE_STRING + k`.
pub const FIRST_INTERFACE_STRING: u8 = 4;

const MAX_STRINGS: usize = 3 + MAX_INTERFACES;

/// The language descriptor, string index 0: we speak US English.
const LANGUAGE_DESCRIPTOR: [u8; 4] = {
    let id = LANGID_EN_US.to_le_bytes();
    [4, UsbDescType::String as u8, id[0], id[1]]
};

/// Every descriptor for one configured device.
#[derive(Debug)]
pub struct DescriptorSet<'a> {
    device: UsbDeviceDescriptor,
    /// Configuration descriptor, then interfaces and their endpoints.
    configuration: [u8; STAGING_SIZE],
    total_length: usize,
    /// Where each interface descriptor starts in `configuration`.
    interface_offsets: Vec<usize, MAX_INTERFACES>,
    /// Strings 1 and up; index `i` is stored at `i - 1`.
    strings: Vec<&'a str, MAX_STRINGS>,
}

impl<'a> DescriptorSet<'a> {
    pub fn build(config: &Configuration<'a>) -> Result<Self, ConfigError> {
        let device = UsbDeviceDescriptor {
            length: size_of::<UsbDeviceDescriptor>() as u8,
            descriptor_type: UsbDescType::Device,
            bcd_usb: U16::new(0x0110),
            device_class: 0,
            device_subclass: 0,
            device_protocol: 0,
            max_packet_size0: CONTROL_MAX_PACKET_SIZE as u8,
            vendor: U16::new(config.vendor_id),
            product: U16::new(config.product_id),
            bcd_device: U16::new(config.product_version),
            manufacturer_s: VENDOR_STRING,
            product_s: PRODUCT_STRING,
            serial_s: if config.serial_number.is_some() { SERIAL_STRING } else { 0 },
            num_configurations: 1,
        };

        let total_length = size_of::<UsbConfigurationDescriptor>()
            + config.interfaces.len() * size_of::<UsbInterfaceDescriptor>()
            + config.endpoints.len() * size_of::<UsbEndpointDescriptor>();
        if total_length > STAGING_SIZE {
            return Err(ConfigError::DescriptorTooLarge);
        }

        let mut strings: Vec<&'a str, MAX_STRINGS> = Vec::new();
        for s in [config.vendor, config.product, config.serial_number.unwrap_or("")] {
            push_string(&mut strings, s)?;
        }

        let mut set = DescriptorSet {
            device,
            configuration: [0; STAGING_SIZE],
            total_length,
            interface_offsets: Vec::new(),
            strings: Vec::new(),
        };

        let mut used = 0;
        let header = UsbConfigurationDescriptor {
            length: size_of::<UsbConfigurationDescriptor>() as u8,
            descriptor_type: UsbDescType::Config,
            total_length: U16::<LittleEndian>::new(total_length as u16),
            num_interfaces: config.interfaces.len() as u8,
            configuration_value: 1,
            configuration_s: 0,
            // Bit 7 is reserved and must be set.
            attributes: 0x80 | config.flags.bits(),
            max_power: (config.max_power / 2) as u8,
        };
        set.append(&mut used, header.as_bytes());

        for (k, interface) in config.interfaces.iter().enumerate() {
            let endpoints = config.endpoints_of(interface);
            // The OUT half of the control endpoint isn't counted; the IN
            // half and every caller endpoint are.
            let num_endpoints = endpoints
                .iter()
                .filter(|ep| !(ep.number == 0 && ep.direction == UsbDir::Out))
                .count();

            let interface_s = if interface.descriptor.is_empty() {
                0
            } else {
                FIRST_INTERFACE_STRING + k as u8
            };
            push_string(&mut strings, interface.descriptor)?;

            // Can't fail: there's one offset per interface and the
            // interfaces already fit in a vec of this capacity.
            let _ = set.interface_offsets.push(used);
            let descriptor = UsbInterfaceDescriptor {
                length: size_of::<UsbInterfaceDescriptor>() as u8,
                descriptor_type: UsbDescType::Interface,
                interface_number: interface.id,
                alternate_setting: 0,
                num_endpoints: num_endpoints as u8,
                interface_class: interface.class,
                interface_subclass: interface.subclass,
                interface_protocol: interface.protocol,
                interface_s,
            };
            set.append(&mut used, descriptor.as_bytes());

            for ep in endpoints {
                let descriptor = UsbEndpointDescriptor {
                    length: size_of::<UsbEndpointDescriptor>() as u8,
                    descriptor_type: UsbDescType::Endpoint,
                    endpoint_address: ep.address(),
                    attributes: ep.attributes.bits(),
                    max_packet_size: U16::new(ep.max_packet_size),
                    interval: ep.interval,
                };
                set.append(&mut used, descriptor.as_bytes());
            }
        }
        debug_assert_eq!(used, total_length);

        set.strings = strings;
        Ok(set)
    }

    fn append(&mut self, used: &mut usize, bytes: &[u8]) {
        self.configuration[*used..*used + bytes.len()].copy_from_slice(bytes);
        *used += bytes.len();
    }

    /// The 18-byte device descriptor.
    pub fn device(&self) -> &[u8] {
        self.device.as_bytes()
    }

    /// The 9-byte configuration descriptor on its own.
    pub fn configuration(&self) -> &[u8] {
        &self.configuration[..size_of::<UsbConfigurationDescriptor>()]
    }

    /// The configuration descriptor followed by all interface and endpoint
    /// descriptors; `wTotalLength` bytes.
    pub fn configuration_set(&self) -> &[u8] {
        &self.configuration[..self.total_length]
    }

    /// `wTotalLength` of the configuration descriptor.
    pub fn total_length(&self) -> u16 {
        self.total_length as u16
    }

    /// The interface descriptor at `position` (in configuration order)
    /// followed by its endpoint descriptors.
    pub fn interface(&self, position: usize) -> Option<&[u8]> {
        let start = *self.interface_offsets.get(position)?;
        let end = self
            .interface_offsets
            .get(position + 1)
            .copied()
            .unwrap_or(self.total_length);
        Some(&self.configuration[start..end])
    }

    /// Number of string descriptors after the language descriptor.
    pub fn string_count(&self) -> usize {
        self.strings.len()
    }

    /// Writes string descriptor `index` into `out` and returns its length.
    /// Index 0 is the language descriptor. Returns `None` for indices we
    /// don't have.
    pub fn string(&self, index: u8, out: &mut [u8; STAGING_SIZE]) -> Option<usize> {
        if index == 0 {
            out[..LANGUAGE_DESCRIPTOR.len()].copy_from_slice(&LANGUAGE_DESCRIPTOR);
            return Some(LANGUAGE_DESCRIPTOR.len());
        }
        let s = self.strings.get(usize::from(index) - 1)?;
        Some(encode_string(s, out))
    }
}

/// Bytes a string descriptor for `s` takes.
fn string_descriptor_len(s: &str) -> usize {
    2 + 2 * s.encode_utf16().count()
}

fn push_string<'a>(strings: &mut Vec<&'a str, MAX_STRINGS>, s: &'a str) -> Result<(), ConfigError> {
    if string_descriptor_len(s) > STAGING_SIZE {
        return Err(ConfigError::StringTooLong);
    }
    strings.push(s).map_err(|_| ConfigError::TooManyInterfaces)
}

/// Encodes `s` as a UTF-16LE string descriptor. `s` must already be known to
/// fit.
fn encode_string(s: &str, out: &mut [u8; STAGING_SIZE]) -> usize {
    let mut len = 2;
    for unit in s.encode_utf16() {
        if len + 2 > STAGING_SIZE {
            break;
        }
        out[len..len + 2].copy_from_slice(&unit.to_le_bytes());
        len += 2;
    }
    out[0] = len as u8;
    out[1] = UsbDescType::String as u8;
    len
}
