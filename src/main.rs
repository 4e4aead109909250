// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Echo device firmware.
//!
//! Whatever the host sends to EP1 OUT comes back on EP2 IN. This is the same
//! device as the [pico-sdk lowlevel device example][lowlevel] (vendor 0,
//! product 1), so its Python demo script works against it.
//!
//! [lowlevel]: https://github.com/raspberrypi/pico-examples/blob/master/usb/device/dev_lowlevel/dev_lowlevel.c
//!
//! The clock setup is all here in `main`, top to bottom. The USB side is the
//! library: `main` opens the device, the `USBCTRL_IRQ` handler drives it, and
//! the two endpoint handlers below do the echoing.

#![no_std]
#![no_main]

use core::cell::RefCell;

use cortex_m::interrupt::Mutex;
use cortex_m_rt::entry;
use rp2040_pac::interrupt;

use rp2040_usbd::{
    ConfigFlags, DeviceConfig, EndpointAttributes, EndpointConfig, InterfaceConfig, Rp2040,
    Transfer, UsbDevice, UsbDir,
};

use panic_halt as _;

// The LED is lit while we're servicing the USB interrupt, so you can watch the
// event flow on a logic analyzer.
cfg_if::cfg_if! {
    if #[cfg(feature = "target-pico")] {
        const LED_PIN: u8 = 25;
    } else if #[cfg(feature = "target-feather")] {
        const LED_PIN: u8 = 13;
    } else {
        compile_error!("missing or unknown target-* feature");
    }
}

const ECHO_INTERFACE: u8 = 1;
const EP1_OUT_ADDR: u8 = UsbDir::Out.endpoint(1);
const EP2_IN_ADDR: u8 = UsbDir::In.endpoint(2);

static ENDPOINTS: [EndpointConfig; 2] = [
    EndpointConfig::new(UsbDir::Out, 1, EndpointAttributes::BULK, 64, 0).with_handler(received),
    EndpointConfig::new(UsbDir::In, 2, EndpointAttributes::BULK, 64, 1).with_handler(sent),
];

static INTERFACES: [InterfaceConfig<'static>; 1] = [InterfaceConfig {
    id: ECHO_INTERFACE,
    class: 0xFF,
    subclass: 0,
    protocol: 0,
    descriptor: "Echo",
    endpoints: &ENDPOINTS,
}];

static DEVICE: DeviceConfig<'static> = DeviceConfig {
    vendor: "Raspberry Pi",
    vendor_id: 0x0000,
    product: "Pico Test Device",
    product_id: 0x0001,
    product_version: 0x0000,
    flags: ConfigFlags::SELF_POWERED,
    max_power: 100,
    serial_number: None,
    interfaces: &INTERFACES,
};

/// Shared between `main` and the interrupt handler.
static USB: Mutex<RefCell<Option<UsbDevice<'static, Rp2040>>>> = Mutex::new(RefCell::new(None));

/// We've gotten data from the host on EP1! Set up EP2 to repeat it.
fn received(usb: &mut dyn Transfer, data: &[u8]) {
    usb.begin_transfer(ECHO_INTERFACE, EP2_IN_ADDR, data);
}

/// The host has collected the data we repeated onto EP2. Set up to receive
/// more on EP1.
fn sent(usb: &mut dyn Transfer, _data: &[u8]) {
    usb.begin_transfer(ECHO_INTERFACE, EP1_OUT_ADDR, &[0; 64]);
}

#[entry]
fn main() -> ! {
    // We are running at 6-ish MHz from the highly imprecise internal ring
    // oscillator ROSC, with all pins tristated.
    let p = rp2040_pac::Peripherals::take().unwrap();

    // Bring IO bank 0 out of reset and make the LED pin an SIO output.
    p.RESETS.reset.modify(|_, w| w.io_bank0().clear_bit());
    while !p.RESETS.reset_done.read().io_bank0().bit() {}
    p.IO_BANK0.gpio[LED_PIN as usize].gpio_ctrl.write(|w| w.funcsel().sio());
    p.SIO.gpio_oe_set.write(|w| unsafe { w.bits(1 << LED_PIN) });

    //////////////////////////////////////////////////////////////////////////
    // Clock configuration. Switch over to the crystal oscillator, enable the
    // PLLs, boost clocks to target frequency.

    // Start XOSC and wait for it to stabilize.
    p.XOSC.ctrl.write(|w| unsafe { w.bits(0xfab_aa0) });
    while !p.XOSC.status.read().stable().bit() {}
    // Switch ref clk from ROSC to XOSC. By default, sys clk is derived from
    // this, so this switches the entire system glitchlessly.
    p.CLOCKS.clk_ref_ctrl.write(|w| w.src().xosc_clksrc());
    while p.CLOCKS.clk_ref_selected.read().bits() != (1 << 2) {}
    // Turn off ROSC. We're now running at a crystal-governed 12MHz.
    p.ROSC.ctrl.write(|w| unsafe { w.bits(0xd1e_fa4) });

    // PLL_SYS to 132 MHz: REFDIV = 1, FBDIV = 132 => VCO 1584 MHz, then
    // POSTDIV1 * POSTDIV2 = 12.
    p.RESETS.reset.modify(|_, w| w.pll_sys().clear_bit());
    while !p.RESETS.reset_done.read().pll_sys().bit() {}
    p.PLL_SYS.cs.write(|w| unsafe { w.refdiv().bits(1) });
    p.PLL_SYS.fbdiv_int.write(|w| unsafe { w.fbdiv_int().bits(132) });
    p.PLL_SYS.pwr.write(|w| w.pd().clear_bit().vcopd().clear_bit());
    while !p.PLL_SYS.cs.read().lock().bit() {}
    p.PLL_SYS.prim.write(|w| unsafe { w.postdiv1().bits(6).postdiv2().bits(2) });
    p.PLL_SYS.pwr.modify(|_, w| w.postdivpd().clear_bit());

    // Switch sysclk to be derived from PLL_SYS.
    p.CLOCKS.clk_sys_ctrl.write(|w| w.auxsrc().clksrc_pll_sys());
    p.CLOCKS.clk_sys_ctrl.modify(|_, w| w.src().clksrc_clk_sys_aux());
    while p.CLOCKS.clk_sys_selected.read().bits() != (1 << 1) {}

    // PLL_USB to 48 MHz: REFDIV = 1, FBDIV = 100 => VCO 1200 MHz, then
    // POSTDIV1 = POSTDIV2 = 5.
    p.RESETS.reset.modify(|_, w| w.pll_usb().clear_bit());
    while !p.RESETS.reset_done.read().pll_usb().bit() {}
    p.PLL_USB.cs.write(|w| unsafe { w.refdiv().bits(1) });
    p.PLL_USB.fbdiv_int.write(|w| unsafe { w.fbdiv_int().bits(100) });
    p.PLL_USB.pwr.write(|w| w.pd().clear_bit().vcopd().clear_bit());
    while !p.PLL_USB.cs.read().lock().bit() {}
    p.PLL_USB.prim.write(|w| unsafe { w.postdiv1().bits(5).postdiv2().bits(5) });
    p.PLL_USB.pwr.modify(|_, w| w.postdivpd().clear_bit());

    // Switch usbclk to be derived from PLL_USB. This is the stable 48MHz
    // reference clock USB needs.
    p.CLOCKS.clk_usb_ctrl.write(|w| w.auxsrc().clksrc_pll_usb().enable().set_bit());

    //////////////////////////////////////////////////////////////////////////
    // USB. The device takes the reset controller along with the USB blocks,
    // so we're done with resets from here on.

    let mut usb = UsbDevice::new(Rp2040::new(p.USBCTRL_REGS, p.USBCTRL_DPRAM, p.RESETS));
    cortex_m::interrupt::free(|cs| {
        // Opening unmasks the interrupt, which won't get past us until we
        // leave the critical section, by which point the device is in place.
        usb.open(&DEVICE).unwrap();
        USB.borrow(cs).replace(Some(usb));
    });

    // Whether EP1 OUT has been armed since the host last configured us.
    let mut started = false;
    loop {
        cortex_m::interrupt::free(|cs| {
            if let Some(usb) = USB.borrow(cs).borrow_mut().as_mut() {
                if !usb.is_configured() {
                    started = false;
                } else if !started {
                    started = usb.begin_transfer(ECHO_INTERFACE, EP1_OUT_ADDR, &[0; 64]);
                }
            }
        });
        cortex_m::asm::wfi();
    }
}

#[interrupt]
fn USBCTRL_IRQ() {
    // Safety: SIO set/clear writes are atomic and we only touch our own pin.
    let sio = unsafe { &*rp2040_pac::SIO::ptr() };
    raise_pin(sio, LED_PIN);
    cortex_m::interrupt::free(|cs| {
        if let Some(usb) = USB.borrow(cs).borrow_mut().as_mut() {
            usb.on_interrupt();
        }
    });
    lower_pin(sio, LED_PIN);
}

/// Raise the GPIO pin with index `pin`.
///
/// The pin must already be configured as an SIO output.
#[inline(always)]
fn raise_pin(sio: &rp2040_pac::sio::RegisterBlock, pin: u8) {
    sio.gpio_out_set.write(|w| unsafe { w.bits(1 << pin) });
}

/// Lower the GPIO pin with index `pin`.
#[inline(always)]
fn lower_pin(sio: &rp2040_pac::sio::RegisterBlock, pin: u8) {
    sio.gpio_out_clr.write(|w| unsafe { w.bits(1 << pin) });
}
