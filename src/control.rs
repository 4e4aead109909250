// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The control transfer state machine on EP0.
//!
//! A control transfer is a SETUP packet, an optional data phase, and a
//! status phase in the opposite direction to the data. We answer IN requests
//! with a single packet of data and expect the host's zero-length OUT status
//! afterwards; we answer OUT requests with a zero-length IN status right away.
//! A full-size packet that's shorter than the host asked for doesn't end the
//! data phase on its own, so it gets a zero-length packet after it.
//! Requests we don't understand are acknowledged (OUT) or ignored (IN) rather
//! than stalled, so the host doesn't sit there waiting on a NAK.

use num_traits::FromPrimitive;

use crate::descriptor::{DescriptorSet, STAGING_SIZE};
use crate::endpoint::Endpoint;
use crate::mmio::{self, Peripherals};
use crate::usb::{UsbDescType, UsbDir, UsbSetupPacket, UsbSetupRequest};

/// Where EP0 is in the current control transfer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlState {
    /// Between transfers.
    Idle,
    /// A descriptor is armed on EP0 IN.
    GetDescriptor,
    /// The status packet for `SET_ADDRESS` is armed; the address goes into
    /// effect once it's been sent.
    SetAddress,
    /// The status packet for `SET_CONFIGURATION` is armed.
    SetConfiguration,
    /// We acknowledged an OUT request we don't otherwise act on.
    Unhandled,
    /// Data went out; waiting for the host's zero-length OUT.
    Status,
}

pub(crate) struct Control {
    pub state: ControlState,
    /// Address assigned by the host.
    pub address: u8,
    /// The host gave us a new address that we haven't switched to yet. We
    /// can't just slap it into registers right away, because we have to do
    /// the status phase using our _old_ address.
    pub address_pending: bool,
    /// Set by `SET_CONFIGURATION`, cleared by bus reset.
    pub configured: bool,
    /// The descriptor filled its packet but not the host's request, so the
    /// data phase needs a zero-length packet to end it.
    zlp_pending: bool,
    /// Scratch space for composing descriptors.
    staging: [u8; STAGING_SIZE],
}

impl Control {
    pub fn new() -> Self {
        Self {
            state: ControlState::Idle,
            address: 0,
            address_pending: false,
            configured: false,
            zlp_pending: false,
            staging: [0; STAGING_SIZE],
        }
    }

    /// Handles a SETUP packet.
    pub fn setup<P: Peripherals>(
        &mut self,
        p: &P,
        setup: &UsbSetupPacket,
        descriptors: &DescriptorSet<'_>,
        ep0_in: &mut Endpoint,
        ep0_out: &mut Endpoint,
    ) {
        // Every DATA packet in either direction after a SETUP starts at
        // DATA1.
        ep0_in.next_pid_1 = true;
        ep0_out.next_pid_1 = true;
        self.zlp_pending = false;

        let request = if setup.is_standard() {
            UsbSetupRequest::from_u8(setup.request)
        } else {
            None
        };

        match setup.direction() {
            UsbDir::Out => {
                match request {
                    Some(UsbSetupRequest::SetAddress) => {
                        // The new address is in the bottom 8 bits of the
                        // setup packet value field.
                        self.address = setup.value.get() as u8;
                        self.address_pending = true;
                        self.state = ControlState::SetAddress;
                    }
                    Some(UsbSetupRequest::SetConfiguration) => {
                        // We only have one configuration, so this is more of
                        // a formality.
                        self.configured = true;
                        self.state = ControlState::SetConfiguration;
                    }
                    _ => {
                        debug!(
                            "acknowledging OUT request {=u8:#x} type {=u8:#x}",
                            setup.request,
                            setup.request_type
                        );
                        self.state = ControlState::Unhandled;
                    }
                }
                // Zero-length status phase.
                ep0_in.arm_empty(p);
            }
            UsbDir::In => match request {
                Some(UsbSetupRequest::GetDescriptor) => {
                    self.get_descriptor(p, setup, descriptors, ep0_in);
                }
                _ => {
                    debug!(
                        "ignoring IN request {=u8:#x} type {=u8:#x}",
                        setup.request,
                        setup.request_type
                    );
                    self.state = ControlState::Idle;
                }
            },
        }
    }

    fn get_descriptor<P: Peripherals>(
        &mut self,
        p: &P,
        setup: &UsbSetupPacket,
        descriptors: &DescriptorSet<'_>,
        ep0_in: &mut Endpoint,
    ) {
        let requested = usize::from(setup.length.get());
        // Type in the top 8 bits of value, index in the bottom 8.
        let value = setup.value.get();
        let index = (value & 0xFF) as u8;

        let len = match UsbDescType::from_u16(value >> 8) {
            Some(UsbDescType::Device) => stage(&mut self.staging, descriptors.device()),
            Some(UsbDescType::Config) => {
                // We can respond with just the configuration descriptor, or
                // append the interface and endpoint descriptors and save the
                // host some round trips. Do the latter when it's asking for
                // enough bytes to hold all of it.
                let bytes = if requested >= usize::from(descriptors.total_length()) {
                    descriptors.configuration_set()
                } else {
                    descriptors.configuration()
                };
                stage(&mut self.staging, bytes)
            }
            Some(UsbDescType::String) => descriptors.string(index, &mut self.staging).unwrap_or_else(|| {
                warn!("no string descriptor {=u8}", index);
                0
            }),
            _ => {
                debug!("ignoring request for descriptor {=u16:#x}", value);
                self.state = ControlState::Idle;
                return;
            }
        };

        let sent = ep0_in.arm(p, &self.staging[..len.min(requested)]);
        self.zlp_pending = sent == ep0_in.max_packet_size && usize::from(sent) < requested;
        self.state = ControlState::GetDescriptor;
    }

    /// EP0 IN finished sending something.
    pub fn in_complete<P: Peripherals>(
        &mut self,
        p: &P,
        ep0_in: &mut Endpoint,
        ep0_out: &mut Endpoint,
    ) {
        if self.address_pending {
            // That was the status phase of SET_ADDRESS; now we can move.
            self.address_pending = false;
            let address = self.address & 0x7F;
            mmio::regs(p)
                .addr_endp
                .write(|w| unsafe { w.address().bits(address) });
            self.state = ControlState::Idle;
        } else if self.zlp_pending {
            // A full packet went out and the host wants more than that. Tell
            // it there isn't any.
            self.zlp_pending = false;
            ep0_in.arm_empty(p);
        } else {
            // We've just finished sending something to the host. Set up the
            // zero-byte DATA packet it follows up with on EP0 OUT.
            ep0_out.arm_empty(p);
            self.state = match self.state {
                // That was the data phase of an IN request; the host's status
                // packet is still to come.
                ControlState::GetDescriptor => ControlState::Status,
                // That was the status phase of an OUT request, and the
                // transfer is over.
                _ => ControlState::Idle,
            };
        }
    }

    /// EP0 OUT got the host's status packet.
    pub fn out_complete(&mut self) {
        self.state = ControlState::Idle;
    }

    pub fn bus_reset<P: Peripherals>(&mut self, p: &P) {
        self.address = 0;
        self.address_pending = false;
        self.zlp_pending = false;
        mmio::regs(p)
            .addr_endp
            .write(|w| unsafe { w.address().bits(0) });
        self.configured = false;
        self.state = ControlState::Idle;
    }
}

/// Copies `bytes` into the staging buffer and returns how many fit.
fn stage(staging: &mut [u8; STAGING_SIZE], bytes: &[u8]) -> usize {
    let len = bytes.len().min(STAGING_SIZE);
    staging[..len].copy_from_slice(&bytes[..len]);
    len
}
