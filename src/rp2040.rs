// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The real USB controller.

use cortex_m::peripheral::NVIC;
use rp2040_pac::{usbctrl_dpram, usbctrl_regs, Interrupt, RESETS, USBCTRL_DPRAM, USBCTRL_REGS};

use crate::mmio::Peripherals;

/// The RP2040 USB controller, its DPSRAM, and the reset controller that
/// cycles it.
///
/// Holding the PAC tokens is what makes it OK for the engine to drive their
/// register blocks. The reset controller goes along because the engine needs
/// it for `open` and `close`; do your other resets (PLLs, IO banks) before
/// handing it over.
pub struct Rp2040 {
    regs: USBCTRL_REGS,
    dpram: USBCTRL_DPRAM,
    resets: RESETS,
}

impl Rp2040 {
    pub fn new(regs: USBCTRL_REGS, dpram: USBCTRL_DPRAM, resets: RESETS) -> Self {
        Self {
            regs,
            dpram,
            resets,
        }
    }
}

unsafe impl Peripherals for Rp2040 {
    #[inline]
    fn regs(&self) -> *const usbctrl_regs::RegisterBlock {
        &*self.regs
    }

    #[inline]
    fn dpram(&self) -> *const usbctrl_dpram::RegisterBlock {
        &*self.dpram
    }

    fn reset(&mut self) {
        self.resets.reset.modify(|_, w| w.usbctrl().set_bit());
        self.resets.reset.modify(|_, w| w.usbctrl().clear_bit());
        while !self.resets.reset_done.read().usbctrl().bit() {}
    }

    fn set_interrupt_enabled(&mut self, enabled: bool) {
        if enabled {
            // Safety: unmasking can break critical sections that rely on
            // this interrupt staying off. The engine is only ever driven
            // from inside one, or from the interrupt itself.
            unsafe { NVIC::unmask(Interrupt::USBCTRL_IRQ) }
        } else {
            NVIC::mask(Interrupt::USBCTRL_IRQ);
            NVIC::unpend(Interrupt::USBCTRL_IRQ);
        }
    }
}
