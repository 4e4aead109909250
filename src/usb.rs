// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! USB structure and constant definitions.
//!
//! Everything in here is straight out of chapter 9 of the USB 2.0
//! specification, laid out so that `zerocopy` can hand us the exact bytes
//! that go on the wire.

use zerocopy::{AsBytes, FromBytes, Unaligned, U16};
use byteorder::LittleEndian;
use num_derive::FromPrimitive;

/// USB deals in two different transfer directions, called OUT (host-to-device)
/// and IN (device-to-host). In the vast majority of cases, OUT is represented
/// by a 0 byte, and IN by an `0x80` byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UsbDir {
    Out = 0,
    In = 0x80,
}

impl UsbDir {
    /// Produces the endpoint address for endpoint `num` in this direction.
    pub const fn endpoint(self, num: u8) -> u8 {
        (num & 0x0F) | self as u8
    }

    /// Extracts the direction bit from an endpoint address, or from a
    /// `bmRequestType` byte, which keeps its direction in the same place.
    pub const fn of_endpoint_addr(addr: u8) -> Self {
        if addr & Self::In as u8 != 0 {
            Self::In
        } else {
            Self::Out
        }
    }
}

/// Mask selecting the request type (standard, class, vendor) out of
/// `bmRequestType`.
pub const REQUEST_TYPE_MASK: u8 = 0x60;
/// Request type value for requests defined by the USB standard itself.
pub const REQUEST_TYPE_STANDARD: u8 = 0x00;

/// Layout of an 8-byte USB SETUP packet.
#[repr(C)]
#[derive(Debug, AsBytes, FromBytes, Unaligned)]
pub struct UsbSetupPacket {
    /// Request type: direction in bit 7, standard/class/vendor in bits 6:5,
    /// recipient in the bottom bits.
    pub request_type: u8,
    /// Request. Standard setup requests are in the `UsbSetupRequest` enum.
    /// Devices can extend this with additional types as long as they don't
    /// conflict.
    pub request: u8,
    /// A simple argument of up to 16 bits, specific to the request.
    pub value: U16<LittleEndian>,
    /// Not used in the requests we support.
    pub index: U16<LittleEndian>,
    /// If data will be transferred after this request (in the direction given
    /// by `request_type`), this gives the number of bytes (OUT) or maximum
    /// number of bytes (IN).
    pub length: U16<LittleEndian>,
}

impl UsbSetupPacket {
    pub fn direction(&self) -> UsbDir {
        UsbDir::of_endpoint_addr(self.request_type)
    }

    pub fn is_standard(&self) -> bool {
        self.request_type & REQUEST_TYPE_MASK == REQUEST_TYPE_STANDARD
    }
}

/// Standard USB SETUP requests. We only act on `GetDescriptor`, `SetAddress`
/// and `SetConfiguration`; the rest are here so we can name what we're
/// ignoring.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UsbSetupRequest {
    GetStatus = 0x00,
    ClearFeature = 0x01,
    SetFeature = 0x03,
    /// Notifies the device that it's being moved to a different address on the
    /// bus. Always an OUT.
    SetAddress = 0x05,
    /// Asks the device to send a certain descriptor back to the host. Always
    /// used on an IN request.
    GetDescriptor = 0x06,
    SetDescriptor = 0x07,
    GetConfiguration = 0x08,
    /// Configures a device by choosing one of the options listed in its
    /// descriptors. Always an OUT.
    SetConfiguration = 0x09,
    GetInterface = 0x0A,
    SetInterface = 0x0B,
    SynchFrame = 0x0C,
}

/// Describes a device. This is the most broad description in USB and is
/// typically the first thing the host asks for.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbDeviceDescriptor {
    /// Length of this structure, must be 18.
    pub length: u8,
    /// Type of this descriptor, must be `Device`.
    pub descriptor_type: UsbDescType,
    /// Version of the device descriptor / USB protocol, in binary-coded
    /// decimal. This is typically `0x01_10` for USB 1.1.
    pub bcd_usb: U16<LittleEndian>,
    /// Class of device, giving a broad functional area.
    pub device_class: u8,
    /// Subclass of device, refining the class.
    pub device_subclass: u8,
    /// Protocol within the subclass.
    pub device_protocol: u8,
    /// Maximum packet size on EP0.
    pub max_packet_size0: u8,
    /// ID of product vendor.
    pub vendor: U16<LittleEndian>,
    /// ID of product.
    pub product: U16<LittleEndian>,
    /// Device version number, as BCD again.
    pub bcd_device: U16<LittleEndian>,
    /// Index of manufacturer name in string descriptor table.
    pub manufacturer_s: u8,
    /// Index of product name in string descriptor table.
    pub product_s: u8,
    /// Index of serial number in string descriptor table.
    pub serial_s: u8,
    /// Number of configurations supported by this device.
    pub num_configurations: u8,
}

/// Description of a single available device configuration.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbConfigurationDescriptor {
    /// Length of this structure, must be 9.
    pub length: u8,
    /// Type of this descriptor, must be `Config`.
    pub descriptor_type: UsbDescType,
    /// Total length of all descriptors in this configuration, concatenated.
    /// This will include this descriptor, plus at least one interface
    /// descriptor, plus each interface descriptor's endpoint descriptors.
    pub total_length: U16<LittleEndian>,
    /// Number of interface descriptors in this configuration.
    pub num_interfaces: u8,
    /// Number to use when requesting this configuration via a
    /// `SetConfiguration` request.
    pub configuration_value: u8,
    /// Index of this configuration's name in the string descriptor table.
    pub configuration_s: u8,
    /// Bit set of device attributes:
    ///
    /// - Bit 7 should be set (indicates that device can be bus powered in USB
    /// 1.0).
    /// - Bit 6 indicates that the device can be self-powered.
    /// - Bit 5 indicates that the device can signal remote wakeup of the host
    /// (like a keyboard).
    /// - The rest are reserved and should be zero.
    pub attributes: u8,
    /// Maximum device power consumption in units of 2mA.
    pub max_power: u8,
}

/// Description of an interface within a configuration.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbInterfaceDescriptor {
    /// Length of this structure, must be 9.
    pub length: u8,
    /// Type of this descriptor, must be `Interface`.
    pub descriptor_type: UsbDescType,
    /// ID of this interface.
    pub interface_number: u8,
    /// Allows a single `interface_number` to have several alternate interface
    /// settings, where each alternate increments this field. Normally there's
    /// only one, and `alternate_setting` is zero.
    pub alternate_setting: u8,
    /// Number of endpoint descriptors in this interface.
    pub num_endpoints: u8,
    /// Interface class code, distinguishing the type of interface.
    pub interface_class: u8,
    /// Interface subclass code, refining the class of interface.
    pub interface_subclass: u8,
    /// Protocol within the interface class/subclass.
    pub interface_protocol: u8,
    /// Index of interface name within string descriptor table.
    pub interface_s: u8,
}

/// Describes an endpoint within an interface.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbEndpointDescriptor {
    /// Length of this struct, must be 7.
    pub length: u8,
    /// Type of this descriptor, must be `Endpoint`.
    pub descriptor_type: UsbDescType,
    /// Address of this endpoint, where the bottom 4 bits give the endpoint
    /// number (0..15) and the top bit distinguishes IN (1) from OUT (0).
    pub endpoint_address: u8,
    /// Endpoint attributes; the bottom 2 bits select the transfer type using
    /// the values from `UsbTransferType`.
    pub attributes: u8,
    /// Maximum packet size this endpoint can accept/produce.
    pub max_packet_size: U16<LittleEndian>,
    /// Interval for polling interrupt/isochronous endpoints, in milliseconds.
    pub interval: u8,
}

/// Types of USB descriptor.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, AsBytes)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum UsbDescType {
    Device = 0x01,
    Config = 0x02,
    String = 0x03,
    Interface = 0x04,
    Endpoint = 0x05,
}

/// Types of transfer that can be indicated by the `attributes` field on
/// `UsbEndpointDescriptor`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, AsBytes)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum UsbTransferType {
    Control = 0,
    Isochronous = 1,
    Bulk = 2,
    Interrupt = 3,
}

/// Synchronization type, bits 3:2 of the endpoint attributes. Only meaningful
/// for isochronous endpoints.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum UsbSyncType {
    None = 0b0000_0000,
    Async = 0b0000_0100,
    Adaptive = 0b0000_1000,
    Sync = 0b0000_1100,
}

/// Usage type, bits 5:4 of the endpoint attributes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum UsbUsageType {
    Data = 0b0000_0000,
    Feedback = 0b0001_0000,
    ExplicitFeedback = 0b0010_0000,
}

/// The US English language ID, the only one we offer.
pub const LANGID_EN_US: u16 = 0x0409;

#[cfg(test)]
mod test {
    use super::*;
    use num_traits::FromPrimitive;

    #[test]
    fn endpoint_addresses() {
        assert_eq!(UsbDir::In.endpoint(1), 0x81);
        assert_eq!(UsbDir::Out.endpoint(2), 0x02);
        // Only four bits of endpoint number survive.
        assert_eq!(UsbDir::In.endpoint(0x13), 0x83);
        assert_eq!(UsbDir::of_endpoint_addr(0x81), UsbDir::In);
        assert_eq!(UsbDir::of_endpoint_addr(0x01), UsbDir::Out);
    }

    #[test]
    fn setup_packet_layout() {
        let raw = [0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x40, 0x00];
        let setup = zerocopy::LayoutVerified::<_, UsbSetupPacket>::new(&raw[..])
            .unwrap()
            .into_ref();
        assert_eq!(setup.direction(), UsbDir::In);
        assert!(setup.is_standard());
        assert_eq!(UsbSetupRequest::from_u8(setup.request), Some(UsbSetupRequest::GetDescriptor));
        assert_eq!(setup.value.get(), 0x0100);
        assert_eq!(setup.length.get(), 64);

        let class_out = [0x21, 0x0A, 0, 0, 0, 0, 0, 0];
        let setup = zerocopy::LayoutVerified::<_, UsbSetupPacket>::new(&class_out[..])
            .unwrap()
            .into_ref();
        assert_eq!(setup.direction(), UsbDir::Out);
        assert!(!setup.is_standard());
    }

    #[test]
    fn descriptor_sizes_match_wire_lengths() {
        assert_eq!(core::mem::size_of::<UsbSetupPacket>(), 8);
        assert_eq!(core::mem::size_of::<UsbDeviceDescriptor>(), 18);
        assert_eq!(core::mem::size_of::<UsbConfigurationDescriptor>(), 9);
        assert_eq!(core::mem::size_of::<UsbInterfaceDescriptor>(), 9);
        assert_eq!(core::mem::size_of::<UsbEndpointDescriptor>(), 7);
    }
}
