// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A model of the USB controller for tests.
//!
//! The register block and DPSRAM are plain memory, laid out the way
//! `rp2040-pac` expects, so the engine drives them exactly as it drives the
//! chip. The `host_*` methods play the host's part: delivering SETUP packets,
//! completing buffers and resetting the bus. They keep `INTS` in step with
//! `INTE` the way the hardware does.
//!
//! Memory can't do write-one-to-clear, so [`service`] stands in for the
//! controller dropping its status bits once the interrupt has been handled.

use core::cell::UnsafeCell;

use rp2040_pac::{usbctrl_dpram, usbctrl_regs};

use crate::mmio::{self, dpram, Peripherals, DPRAM_SIZE};
use crate::usb::UsbDir;
use crate::UsbDevice;

const REGS_WORDS: usize = 0x100 / 4;
const DPRAM_WORDS: usize = DPRAM_SIZE as usize / 4;

const INTS_BUFF_STATUS: u32 = 1 << 4;
const INTS_BUS_RESET: u32 = 1 << 12;
const INTS_SETUP_REQ: u32 = 1 << 16;

pub struct MockPeripherals {
    regs: Box<UnsafeCell<[u32; REGS_WORDS]>>,
    dpram: Box<UnsafeCell<[u32; DPRAM_WORDS]>>,
    /// Times the controller was put through reset.
    pub resets: usize,
    pub interrupt_enabled: bool,
}

/// Runs the device's interrupt handler, then retires everything it was
/// interrupted for.
pub fn service(usb: &mut UsbDevice<'_, MockPeripherals>) {
    usb.on_interrupt();
    let p = usb.peripherals();
    let regs = mmio::regs(p);
    regs.sie_status.write(|w| unsafe { w.bits(0) });
    regs.buff_status.write(|w| unsafe { w.bits(0) });
    p.update_ints();
}

impl MockPeripherals {
    pub fn new() -> Self {
        Self {
            regs: Box::new(UnsafeCell::new([0; REGS_WORDS])),
            dpram: Box::new(UnsafeCell::new([0; DPRAM_WORDS])),
            resets: 0,
            interrupt_enabled: false,
        }
    }

    /// Recomputes `INTS` from the status registers and `INTE`.
    fn update_ints(&self) {
        let regs = mmio::regs(self);
        let sie_status = regs.sie_status.read();
        let mut raw = 0;
        if sie_status.setup_rec().bit() {
            raw |= INTS_SETUP_REQ;
        }
        if sie_status.bus_reset().bit() {
            raw |= INTS_BUS_RESET;
        }
        if regs.buff_status.read().bits() != 0 {
            raw |= INTS_BUFF_STATUS;
        }
        let ints = raw & regs.inte.read().bits();
        // Safety: INTS is read-only to the engine; only the model sets it.
        unsafe { regs.ints.as_ptr().write_volatile(ints) }
    }

    /// The host sends a SETUP packet.
    pub fn host_setup(&mut self, packet: [u8; 8]) {
        let dp = mmio::dpram(&*self);
        let [a, b, c, d, e, f, g, h] = packet;
        dp.setup_packet_low
            .write(|w| unsafe { w.bits(u32::from_le_bytes([a, b, c, d])) });
        dp.setup_packet_high
            .write(|w| unsafe { w.bits(u32::from_le_bytes([e, f, g, h])) });
        mmio::regs(&*self)
            .sie_status
            .modify(|_, w| w.setup_rec().set_bit());
        self.update_ints();
    }

    /// Same, from its fields.
    pub fn host_request(&mut self, request_type: u8, request: u8, value: u16, index: u16, length: u16) {
        let mut packet = [request_type, request, 0, 0, 0, 0, 0, 0];
        packet[2..4].copy_from_slice(&value.to_le_bytes());
        packet[4..6].copy_from_slice(&index.to_le_bytes());
        packet[6..8].copy_from_slice(&length.to_le_bytes());
        self.host_setup(packet);
    }

    /// The host signals a bus reset.
    pub fn host_bus_reset(&mut self) {
        mmio::regs(&*self)
            .sie_status
            .modify(|_, w| w.bus_reset().set_bit());
        self.update_ints();
    }

    /// The address the controller is answering to.
    pub fn device_address(&self) -> u8 {
        mmio::regs(self).addr_endp.read().address().bits()
    }

    fn buffer_control(address: u8) -> usize {
        mmio::buffer_control(address & 0x0F, UsbDir::of_endpoint_addr(address))
    }

    /// Where the hardware would find the data buffer for `address`.
    fn buffer_of(&self, address: u8) -> u16 {
        match mmio::endpoint_control(address & 0x0F, UsbDir::of_endpoint_addr(address)) {
            None => dpram::EP0_BUFFER0,
            Some(epci) => mmio::dpram(self).ep_control[epci]
                .read()
                .buffer_address()
                .bits(),
        }
    }

    /// Whether the device has handed the buffer for `address` to the
    /// hardware.
    pub fn is_armed(&self, address: u8) -> bool {
        mmio::dpram(self).ep_buffer_control[Self::buffer_control(address)]
            .read()
            .available_0()
            .bit()
    }

    /// PID bit of the buffer armed on `address`: `true` for DATA1.
    pub fn armed_pid_1(&self, address: u8) -> bool {
        mmio::dpram(self).ep_buffer_control[Self::buffer_control(address)]
            .read()
            .pid_0()
            .bit()
    }

    /// What the device armed an IN endpoint with.
    pub fn armed_in_data(&self, address: u8) -> Vec<u8> {
        let bc = mmio::dpram(self).ep_buffer_control[Self::buffer_control(address)].read();
        let mut data = vec![0; usize::from(bc.length_0().bits())];
        mmio::read_buffer(self, self.buffer_of(address), &mut data);
        data
    }

    /// The host finishes a transaction on the buffer armed for `address`.
    ///
    /// For OUT endpoints `data` lands in the endpoint's buffer. For IN
    /// endpoints the armed data is taken as sent and `data` is ignored.
    pub fn host_complete(&mut self, address: u8, data: &[u8]) {
        assert!(self.is_armed(address), "endpoint {:#04x} not armed", address);
        let dir = UsbDir::of_endpoint_addr(address);
        let bci = Self::buffer_control(address);

        if dir == UsbDir::Out {
            mmio::write_buffer(&*self, self.buffer_of(address), data);
        }
        mmio::dpram(&*self).ep_buffer_control[bci].modify(|_, w| unsafe {
            match dir {
                UsbDir::Out => w.full_0().set_bit().length_0().bits(data.len() as u16),
                UsbDir::In => w.full_0().clear_bit(),
            }
            .available_0()
            .clear_bit()
        });

        // One bit per buffer control register, in the same order.
        mmio::regs(&*self)
            .buff_status
            .modify(|r, w| unsafe { w.bits(r.bits() | 1 << bci) });
        self.update_ints();
    }

    /// Whether any DPSRAM byte is non-zero.
    pub fn dpram_dirty(&self) -> bool {
        let mut bytes = vec![0; DPRAM_SIZE as usize];
        mmio::read_buffer(self, 0, &mut bytes);
        bytes.iter().any(|b| *b != 0)
    }
}

unsafe impl Peripherals for MockPeripherals {
    fn regs(&self) -> *const usbctrl_regs::RegisterBlock {
        self.regs.get() as *const _
    }

    fn dpram(&self) -> *const usbctrl_dpram::RegisterBlock {
        self.dpram.get() as *const _
    }

    fn reset(&mut self) {
        self.resets += 1;
        *self.regs.get_mut() = [0; REGS_WORDS];
    }

    fn set_interrupt_enabled(&mut self, enabled: bool) {
        self.interrupt_enabled = enabled;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ints_follow_inte() {
        let mut p = MockPeripherals::new();
        p.host_bus_reset();
        assert_eq!(mmio::regs(&p).ints.read().bits(), 0);

        mmio::regs(&p)
            .inte
            .write(|w| w.bus_reset().set_bit().setup_req().set_bit());
        p.host_setup([0; 8]);
        let ints = mmio::regs(&p).ints.read();
        assert!(ints.bus_reset().bit());
        assert!(ints.setup_req().bit());
        assert!(!ints.buff_status().bit());
    }

    #[test]
    fn setup_packet_lands_at_dpram_base() {
        let mut p = MockPeripherals::new();
        p.host_request(0x80, 0x06, 0x0100, 0, 18);
        let dp = mmio::dpram(&p);
        assert_eq!(dp.setup_packet_low.read().bits(), 0x0100_0680);
        assert_eq!(dp.setup_packet_low.read().brequest().bits(), 0x06);
        assert_eq!(dp.setup_packet_high.read().bits(), 0x0012_0000);
    }

    #[test]
    fn register_blocks_fit() {
        assert!(core::mem::size_of::<usbctrl_regs::RegisterBlock>() <= REGS_WORDS * 4);
        assert!(core::mem::size_of::<usbctrl_dpram::RegisterBlock>() <= DPRAM_WORDS * 4);
    }
}
