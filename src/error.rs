// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Errors reported by [`UsbDevice::open`](crate::UsbDevice::open).
//!
//! Nothing after `open` reports errors: the host can't be told about them
//! anyway, so runtime oddities are absorbed and, with the `defmt` feature,
//! logged.

use core::fmt;

/// Why a [`DeviceConfig`](crate::DeviceConfig) was refused.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// A caller interface used ID 0, which belongs to the control interface.
    ReservedInterface,
    /// More interfaces than the engine has room for.
    TooManyInterfaces,
    /// More endpoints than the controller has buffer control registers.
    TooManyEndpoints,
    /// An endpoint's data buffer isn't inside USB DPSRAM, or overlaps the
    /// control registers at its base.
    BufferOutsideDpram,
    /// An endpoint's data buffer isn't on a 64-byte boundary.
    MisalignedBuffer,
    /// An endpoint names a buffer or endpoint control register the
    /// controller doesn't have.
    NoSuchRegister,
    /// The full configuration descriptor set doesn't fit in one EP0 packet.
    DescriptorTooLarge,
    /// A string descriptor wouldn't fit in one EP0 packet.
    StringTooLong,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The configuration handed to `open` can't be used.
    InvalidConfiguration(ConfigError),
    /// `open` was called on a device that's already open.
    AlreadyOpen,
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::InvalidConfiguration(e)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConfigError::ReservedInterface => "interface 0 is reserved for the control endpoints",
            ConfigError::TooManyInterfaces => "too many interfaces",
            ConfigError::TooManyEndpoints => "too many endpoints",
            ConfigError::BufferOutsideDpram => "endpoint data buffer is outside USB DPSRAM",
            ConfigError::MisalignedBuffer => "endpoint data buffer is not 64-byte aligned",
            ConfigError::NoSuchRegister => "endpoint control register index out of range",
            ConfigError::DescriptorTooLarge => "configuration descriptor set exceeds 64 bytes",
            ConfigError::StringTooLong => "string descriptor exceeds 64 bytes",
        })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidConfiguration(e) => write!(f, "invalid USB configuration: {}", e),
            Error::AlreadyOpen => f.write_str("USB device already open"),
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;
