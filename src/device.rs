// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The USB device: lifecycle, interrupt dispatch, and transfers.

use heapless::Vec;
use zerocopy::LayoutVerified;

use crate::config::{normalize, Configuration, DeviceConfig, MAX_ENDPOINTS};
use crate::control::{Control, ControlState};
use crate::descriptor::{DescriptorSet, STAGING_SIZE};
use crate::endpoint::{Completion, Endpoint};
use crate::error::{Error, Result};
use crate::mmio::{self, dpram, Peripherals, DPRAM_SIZE};
use crate::usb::{UsbDir, UsbSetupPacket};

/// What endpoint handlers get to do with the device.
pub trait Transfer {
    /// Arms the endpoint with address `endpoint` (direction bit plus number)
    /// of `interface` for its next packet.
    ///
    /// For IN endpoints `buffer` is copied out, so it can be reused as soon as
    /// this returns. For OUT endpoints its length is the most the endpoint
    /// will accept. Anything past the endpoint's max packet size is dropped.
    ///
    /// Returns `false` if the device isn't open or `interface` has no such
    /// endpoint.
    fn begin_transfer(&mut self, interface: u8, endpoint: u8, buffer: &[u8]) -> bool;

    /// Whether the host has sent `SET_CONFIGURATION` since the last bus reset.
    fn is_configured(&self) -> bool;
}

/// Everything that exists between `open` and `close`.
struct Session<'a> {
    config: Configuration<'a>,
    descriptors: DescriptorSet<'a>,
    /// In configuration order, so EP0 IN and EP0 OUT come first.
    endpoints: Vec<Endpoint, MAX_ENDPOINTS>,
    control: Control,
}

/// A USB device on the RP2040 USB controller.
///
/// Call [`on_interrupt`](Self::on_interrupt) from the `USBCTRL_IRQ` handler.
/// Everything else has to happen with that interrupt masked, which in
/// practice means inside a critical section.
pub struct UsbDevice<'a, P> {
    p: P,
    session: Option<Session<'a>>,
}

impl<'a, P> UsbDevice<'a, P> {
    /// A closed device owning `peripherals`.
    pub const fn new(peripherals: P) -> Self {
        Self {
            p: peripherals,
            session: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Address assigned by the host, or 0.
    pub fn address(&self) -> u8 {
        self.session.as_ref().map_or(0, |s| s.control.address)
    }

    pub fn control_state(&self) -> ControlState {
        self.session
            .as_ref()
            .map_or(ControlState::Idle, |s| s.control.state)
    }

    /// The configuration in use, after normalization.
    pub fn configuration(&self) -> Option<&Configuration<'a>> {
        self.session.as_ref().map(|s| &s.config)
    }

    pub fn descriptors(&self) -> Option<&DescriptorSet<'a>> {
        self.session.as_ref().map(|s| &s.descriptors)
    }

    pub fn peripherals(&self) -> &P {
        &self.p
    }

    pub fn peripherals_mut(&mut self) -> &mut P {
        &mut self.p
    }
}

impl<'a, P: Peripherals> UsbDevice<'a, P> {
    /// Brings up the controller as the device described by `config`, and
    /// connects to the bus.
    ///
    /// Nothing touches the hardware unless `config` checks out.
    pub fn open(&mut self, config: &DeviceConfig<'a>) -> Result<()> {
        if self.session.is_some() {
            return Err(Error::AlreadyOpen);
        }

        let config = normalize(config)?;
        let descriptors = DescriptorSet::build(&config)?;
        let mut endpoints: Vec<Endpoint, MAX_ENDPOINTS> = Vec::new();
        for interface in &config.interfaces {
            for ep in config.endpoints_of(interface) {
                // Same capacity as `config.endpoints`, can't overflow.
                let _ = endpoints.push(Endpoint::new(interface.id, ep)?);
            }
        }

        self.p.reset();
        let p = &self.p;
        clear_dpram(p);

        let regs = mmio::regs(p);
        // Mux the controller to the onboard USB PHY.
        regs.usb_muxing.write(|w| w.to_phy().set_bit()
            // Set in the SDK too. Undocumented.
            .softcon().set_bit()
        );
        // Not all boards wire up VBUS detect, so pretend it's always there.
        regs.usb_pwr.write(|w| w.vbus_detect().set_bit()
            .vbus_detect_override_en().set_bit()
        );
        // Enable controller in device mode.
        regs.main_ctrl.write(|w| w
            .controller_en().set_bit()
            .host_ndevice().clear_bit()
        );
        // Set a bit in buff_status every time a buffer moves through EP0.
        regs.sie_ctrl.write(|w| w.ep0_int_1buf().set_bit());
        regs.inte.write(|w| w
            // A buffer is done.
            .buff_status().set_bit()
            // The host has reset us.
            .bus_reset().set_bit()
            // We've gotten a setup request on EP0.
            .setup_req().set_bit()
        );

        for ep in endpoints.iter_mut() {
            ep.bind(p);
        }

        // Pull up DP. This is the point where the host will notice us.
        regs.sie_ctrl.modify(|_, w| w.pullup_en().set_bit());

        debug!(
            "open: {=usize} interfaces, {=usize} endpoints",
            config.interfaces.len(),
            endpoints.len()
        );
        self.session = Some(Session {
            config,
            descriptors,
            endpoints,
            control: Control::new(),
        });
        self.p.set_interrupt_enabled(true);
        Ok(())
    }

    /// Disconnects and shuts down the controller. Transfers in flight are
    /// dropped without their handlers hearing about it.
    pub fn close(&mut self) {
        if self.session.take().is_none() {
            return;
        }
        self.p.set_interrupt_enabled(false);
        self.p.reset();
        clear_dpram(&self.p);
        debug!("closed");
    }

    /// Services the controller. Call this from the USB interrupt.
    pub fn on_interrupt(&mut self) {
        if self.session.is_none() {
            return;
        }
        let ints = mmio::regs(&self.p).ints.read();

        if ints.setup_req().bit() {
            // Acknowledge by writing the write-one-to-clear status bit.
            mmio::regs(&self.p)
                .sie_status
                .write(|w| w.setup_rec().set_bit());
            self.setup();
        }

        if ints.buff_status().bit() {
            let mut bufbits = mmio::regs(&self.p).buff_status.read().bits();
            while bufbits != 0 {
                // Find the lowest outstanding buffer and take it off the set.
                let lowbit_index = bufbits.trailing_zeros();
                let lowbit = 1 << lowbit_index;
                bufbits ^= lowbit;
                mmio::regs(&self.p)
                    .buff_status
                    .write(|w| unsafe { w.bits(lowbit) });

                // Buffer control registers come in pairs per endpoint, IN
                // first.
                let epnum = (lowbit_index >> 1) as u8;
                let dir = if lowbit_index & 1 == 0 {
                    UsbDir::In
                } else {
                    UsbDir::Out
                };
                self.buffer_done(dir.endpoint(epnum));
            }
        }

        if ints.bus_reset().bit() {
            mmio::regs(&self.p)
                .sie_status
                .write(|w| w.bus_reset().set_bit());
            if let Some(session) = self.session.as_mut() {
                debug!("bus reset");
                session.control.bus_reset(&self.p);
            }
        }
    }

    fn setup(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        // The SETUP packet has its own spot at the base of DPSRAM, as two
        // words.
        let dp = mmio::dpram(&self.p);
        let mut packet = [0; 8];
        packet[..4].copy_from_slice(&dp.setup_packet_low.read().bits().to_le_bytes());
        packet[4..].copy_from_slice(&dp.setup_packet_high.read().bits().to_le_bytes());
        let Some(setup) = LayoutVerified::<_, UsbSetupPacket>::new(&packet[..]) else {
            return;
        };

        if let [ep0_in, ep0_out, ..] = &mut session.endpoints[..] {
            session.control.setup(
                &self.p,
                setup.into_ref(),
                &session.descriptors,
                ep0_in,
                ep0_out,
            );
        }
    }

    /// The buffer for endpoint `address` has come back from the hardware.
    fn buffer_done(&mut self, address: u8) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(ep) = session.endpoints.iter().find(|ep| ep.address == address) else {
            warn!("buffer event for unknown endpoint {=u8:#x}", address);
            return;
        };

        // For OUT this is whatever the host sent. For IN, it's a copy of
        // whatever we sent.
        let mut data = [0; STAGING_SIZE];
        let len = ep.read_completed(&self.p, &mut data);
        let completion = ep.completion;

        let handler = match completion {
            Completion::ControlIn => {
                if let [ep0_in, ep0_out, ..] = &mut session.endpoints[..] {
                    session.control.in_complete(&self.p, ep0_in, ep0_out);
                }
                None
            }
            Completion::ControlOut => {
                session.control.out_complete();
                None
            }
            Completion::Handler(handler) => Some(handler),
            Completion::Ignore => None,
        };

        if let Some(handler) = handler {
            handler(self, &data[..len]);
        }
    }
}

impl<'a, P: Peripherals> Transfer for UsbDevice<'a, P> {
    fn begin_transfer(&mut self, interface: u8, endpoint: u8, buffer: &[u8]) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        let Some(ep) = session
            .endpoints
            .iter_mut()
            .find(|ep| ep.interface == interface && ep.address == endpoint)
        else {
            warn!(
                "no endpoint {=u8:#x} on interface {=u8}",
                endpoint,
                interface
            );
            return false;
        };
        if buffer.len() > usize::from(ep.max_packet_size) {
            debug!(
                "clipping {=usize} bytes to {=u16}",
                buffer.len(),
                ep.max_packet_size
            );
        }
        ep.arm(&self.p, buffer);
        true
    }

    fn is_configured(&self) -> bool {
        self.session.as_ref().map_or(false, |s| s.control.configured)
    }
}

/// Zeroes the control registers at the base of DPSRAM, and the data buffers
/// after them.
fn clear_dpram<P: Peripherals>(p: &P) {
    let dp = mmio::dpram(p);
    dp.setup_packet_low.write(|w| unsafe { w.bits(0) });
    dp.setup_packet_high.write(|w| unsafe { w.bits(0) });
    for epc in &dp.ep_control {
        epc.write(|w| unsafe { w.bits(0) });
    }
    for epb in &dp.ep_buffer_control {
        epb.write(|w| unsafe { w.bits(0) });
    }
    let zeros = [0; dpram::BUFFER_SIZE as usize];
    for offset in (dpram::EP0_BUFFER0..DPRAM_SIZE as u16).step_by(zeros.len()) {
        mmio::write_buffer(p, offset, &zeros);
    }
}
