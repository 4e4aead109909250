// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Access to the RP2040 USB controller.
//!
//! The engine never touches hardware directly. It asks [`Peripherals`] for
//! the controller's register block and DPSRAM, and drives both through the
//! `rp2040-pac` register API, so that the same code runs against the chip
//! (see [`crate::Rp2040`]) and against a model of it in memory.

use rp2040_pac::{usbctrl_dpram, usbctrl_regs};

use crate::usb::UsbDir;

/// Owner of the USB controller register block and its DPSRAM.
///
/// # Safety
///
/// `regs` must point at a `usbctrl_regs::RegisterBlock`, and `dpram` at
/// `DPRAM_SIZE` bytes starting with a `usbctrl_dpram::RegisterBlock`, both
/// valid for reads and writes for as long as the implementor lives and
/// touched by nobody else. Implementations must only be handed out for a type
/// that exclusively owns the USB controller (or a model of it).
pub unsafe trait Peripherals {
    /// Returns the address of the USB controller registers.
    fn regs(&self) -> *const usbctrl_regs::RegisterBlock;
    /// Returns the address of USB DPSRAM. The endpoint and buffer control
    /// registers sit at its base; data buffers follow.
    fn dpram(&self) -> *const usbctrl_dpram::RegisterBlock;
    /// Cycles the controller through reset and waits for it to come back.
    fn reset(&mut self);
    /// Enables or disables the USBCTRL interrupt line at the interrupt
    /// controller.
    fn set_interrupt_enabled(&mut self, enabled: bool);
}

/// The controller's registers.
pub(crate) fn regs<P: Peripherals>(p: &P) -> &usbctrl_regs::RegisterBlock {
    // Safety: the pointer is valid for the life of `p`, per `Peripherals`.
    unsafe { &*p.regs() }
}

/// The control registers at the base of DPSRAM.
pub(crate) fn dpram<P: Peripherals>(p: &P) -> &usbctrl_dpram::RegisterBlock {
    // Safety: as above.
    unsafe { &*p.dpram() }
}

/// Copies `bytes` into DPSRAM at `offset`.
///
/// Callers keep `offset + bytes.len()` within `DPRAM_SIZE`.
pub(crate) fn write_buffer<P: Peripherals>(p: &P, offset: u16, bytes: &[u8]) {
    debug_assert!(usize::from(offset) + bytes.len() <= DPRAM_SIZE as usize);
    // Safety: in bounds per the above, and the hardware doesn't touch a
    // buffer until it's marked available, which happens after this.
    unsafe {
        let buffer = (p.dpram() as *mut u8).add(usize::from(offset));
        buffer.copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());
    }
}

/// Fills `out` from DPSRAM at `offset`.
///
/// Callers keep `offset + out.len()` within `DPRAM_SIZE`.
pub(crate) fn read_buffer<P: Peripherals>(p: &P, offset: u16, out: &mut [u8]) {
    debug_assert!(usize::from(offset) + out.len() <= DPRAM_SIZE as usize);
    // Safety: in bounds, and the buffer is ours again once its available
    // bit has cleared.
    unsafe {
        let buffer = (p.dpram() as *const u8).add(usize::from(offset));
        out.as_mut_ptr().copy_from_nonoverlapping(buffer, out.len());
    }
}

/// Base of the USB dual-port SRAM, as the CPU sees it.
pub const DPRAM_BASE: u32 = 0x5010_0000;
/// Size of the USB dual-port SRAM in bytes.
pub const DPRAM_SIZE: u32 = 4096;

/// DPSRAM layout, as offsets from its base.
pub mod dpram {
    /// EP0 buffer 0, shared by both directions. (Buffer 1 is only for
    /// double-buffered mode, which we don't use.) Everything below it is
    /// control registers.
    pub const EP0_BUFFER0: u16 = 0x100;
    /// Start of the data buffers for the other endpoints.
    pub const DATA_BUFFERS: u16 = 0x180;
    /// All of our data buffers are this big, and the controller wants them
    /// aligned to it.
    pub const BUFFER_SIZE: u16 = 64;
}

/// A location in USB DPSRAM, as the CPU sees it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DpramAddress(pub u32);

impl DpramAddress {
    /// Offset of this location from `base`, in the form the controller's
    /// endpoint-control registers want it.
    ///
    /// XORing with the base clears the base bits of anything inside DPSRAM and
    /// leaves anything outside it at `DPRAM_SIZE` or more, in which case this
    /// returns `None`.
    pub const fn offset(self, base: u32) -> Option<u16> {
        let offset = self.0 ^ base;
        if offset < DPRAM_SIZE {
            Some(offset as u16)
        } else {
            None
        }
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

/// Index into `ep_buffer_control` for endpoint `number` in direction `dir`.
/// The registers come in pairs per endpoint, IN first.
pub const fn buffer_control(number: u8, dir: UsbDir) -> usize {
    let pair = (number as usize & 0x0F) * 2;
    match dir {
        UsbDir::In => pair,
        UsbDir::Out => pair + 1,
    }
}

/// Index into `ep_control` for endpoint `number` in direction `dir`. EP0
/// doesn't have one; it's always enabled and always uses `EP0_BUFFER0`.
pub const fn endpoint_control(number: u8, dir: UsbDir) -> Option<usize> {
    let number = number as usize & 0x0F;
    if number == 0 {
        return None;
    }
    let pair = (number - 1) * 2;
    Some(match dir {
        UsbDir::In => pair,
        UsbDir::Out => pair + 1,
    })
}

/// The `index`th 64-byte data buffer after the EP0 buffers. Endpoints can
/// use any of these; sharing one between two endpoints is on you.
pub const fn data_buffer(index: u32) -> DpramAddress {
    DpramAddress(DPRAM_BASE + dpram::DATA_BUFFERS as u32 + index * dpram::BUFFER_SIZE as u32)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn offset_strips_base_from_any_alias() {
        assert_eq!(data_buffer(0).offset(DPRAM_BASE), Some(0x180));
        assert_eq!(data_buffer(2).offset(DPRAM_BASE), Some(0x200));
        // A pointer that doesn't land in DPSRAM at all.
        assert_eq!(DpramAddress(0x2000_0000).offset(DPRAM_BASE), None);
        assert_eq!(DpramAddress(DPRAM_BASE + DPRAM_SIZE).offset(DPRAM_BASE), None);
    }

    #[test]
    fn control_register_layout() {
        assert_eq!(buffer_control(0, UsbDir::In), 0);
        assert_eq!(buffer_control(0, UsbDir::Out), 1);
        assert_eq!(buffer_control(2, UsbDir::In), 4);
        assert_eq!(buffer_control(15, UsbDir::Out), 31);

        assert_eq!(endpoint_control(0, UsbDir::In), None);
        assert_eq!(endpoint_control(1, UsbDir::In), Some(0));
        assert_eq!(endpoint_control(1, UsbDir::Out), Some(1));
        assert_eq!(endpoint_control(15, UsbDir::Out), Some(29));
    }

    #[test]
    fn register_blocks_match_dpram_layout() {
        // The control registers fill exactly the space below EP0's buffer.
        assert_eq!(
            core::mem::size_of::<usbctrl_dpram::RegisterBlock>(),
            usize::from(dpram::EP0_BUFFER0)
        );
        assert_eq!(rp2040_pac::USBCTRL_DPRAM::PTR as u32, DPRAM_BASE);
    }
}
