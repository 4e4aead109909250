// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Endpoint runtime state: register binding and buffer arming.

use crate::config::{EndpointConfig, EndpointHandler};
use crate::error::ConfigError;
use crate::mmio::{self, Peripherals};
use crate::usb::UsbDir;

/// What to do when a buffer on an endpoint completes.
#[derive(Copy, Clone)]
pub(crate) enum Completion {
    /// EP0 IN: finish a pending `SET_ADDRESS`, or move the control transfer
    /// along.
    ControlIn,
    /// EP0 OUT: the host's status packet. Nothing to do.
    ControlOut,
    /// A caller endpoint.
    Handler(EndpointHandler),
    /// A caller endpoint nobody is listening to.
    Ignore,
}

pub(crate) struct Endpoint {
    /// ID of the interface this endpoint belongs to.
    pub interface: u8,
    /// Direction bit plus endpoint number.
    pub address: u8,
    pub max_packet_size: u16,
    pub completion: Completion,
    /// Keeps track of which DATA PID (DATA0/DATA1) goes with this endpoint's
    /// next packet. If `true`, `DATA1`, otherwise `DATA0`.
    pub next_pid_1: bool,
    transfer_type: u8,
    /// Offset of the data buffer into DPSRAM.
    buffer_offset: u16,
    /// Index of this endpoint's buffer control register in the
    /// `ep_buffer_control` array.
    buffer_control: usize,
    /// Index of this endpoint's control register in the `ep_control` array.
    endpoint_control: Option<usize>,
}

impl Endpoint {
    /// Runtime state for `config`, which must have been through
    /// [`normalize`](crate::normalize).
    pub fn new(interface: u8, config: &EndpointConfig) -> Result<Self, ConfigError> {
        let completion = match (interface, config.number, config.handler) {
            (0, 0, _) => match config.direction {
                UsbDir::In => Completion::ControlIn,
                UsbDir::Out => Completion::ControlOut,
            },
            (_, _, Some(handler)) => Completion::Handler(handler),
            (_, _, None) => Completion::Ignore,
        };
        Ok(Self {
            interface,
            address: config.address(),
            max_packet_size: config.max_packet_size,
            completion,
            next_pid_1: false,
            transfer_type: config.attributes.transfer as u8,
            buffer_offset: config.buffer_offset()?,
            buffer_control: config.buffer_control,
            endpoint_control: config.endpoint_control,
        })
    }

    pub fn direction(&self) -> UsbDir {
        UsbDir::of_endpoint_addr(self.address)
    }

    /// Points the endpoint's control register at its data buffer and turns
    /// it on. Endpoints without a control register (EP0) are always on.
    pub fn bind<P: Peripherals>(&mut self, p: &P) {
        self.next_pid_1 = false;

        let Some(epci) = self.endpoint_control else {
            return;
        };
        mmio::dpram(p).ep_control[epci].write(|w| unsafe {
            w.enable().set_bit()
                // Please set the corresponding bit in buff_status when a
                // buffer is done, thx.
                .interrupt_per_buff().set_bit()
                .endpoint_type().bits(self.transfer_type)
                // And, designate our buffer by its offset.
                .buffer_address().bits(self.buffer_offset)
        });
    }

    /// Hands a buffer to the hardware for the next packet on this endpoint,
    /// and returns the number of bytes it was armed with.
    ///
    /// For IN endpoints `data` (clipped to the max packet size) is copied into
    /// DPSRAM and sent when the host next asks. For OUT endpoints the contents
    /// of `data` are ignored and its length is the most we'll accept.
    pub fn arm<P: Peripherals>(&mut self, p: &P, data: &[u8]) -> u16 {
        let len = data.len().min(usize::from(self.max_packet_size));
        let is_in = self.direction() == UsbDir::In;
        if is_in {
            mmio::write_buffer(p, self.buffer_offset, &data[..len]);
        }

        let np = self.next_pid_1;
        mmio::dpram(p).ep_buffer_control[self.buffer_control].write(|w| unsafe {
            w
                // DATA0/1, depending
                .pid_0().bit(np)
                // IN: we have put data in. OUT: the host gets to fill it.
                .full_0().bit(is_in)
                .available_0().set_bit()
                .length_0().bits(len as u16)
        });
        // Flip the DATA0/1 PID for the next packet.
        self.next_pid_1 = !np;
        len as u16
    }

    /// Arms a zero-length packet: a status phase, in either direction.
    pub fn arm_empty<P: Peripherals>(&mut self, p: &P) {
        self.arm(p, &[]);
    }

    /// Copies the contents of the buffer that just completed into `out`,
    /// returning how many bytes there were.
    pub fn read_completed<P: Peripherals>(&self, p: &P, out: &mut [u8]) -> usize {
        let bc = mmio::dpram(p).ep_buffer_control[self.buffer_control].read();
        let len = usize::from(bc.length_0().bits())
            .min(usize::from(self.max_packet_size))
            .min(out.len());
        mmio::read_buffer(p, self.buffer_offset, &mut out[..len]);
        len
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::EndpointAttributes;
    use crate::mock::MockPeripherals;

    const BULK_IN: EndpointConfig = EndpointConfig::new(UsbDir::In, 2, EndpointAttributes::BULK, 16, 1);
    const BULK_OUT: EndpointConfig = EndpointConfig::new(UsbDir::Out, 1, EndpointAttributes::BULK, 64, 0);

    #[test]
    fn bind_programs_endpoint_control() {
        let p = MockPeripherals::new();
        let mut ep = Endpoint::new(1, &BULK_OUT).unwrap();
        ep.next_pid_1 = true;
        ep.bind(&p);

        assert!(!ep.next_pid_1);
        let epc = mmio::dpram(&p).ep_control[1].read();
        assert!(epc.enable().bit());
        assert!(epc.interrupt_per_buff().bit());
        assert!(epc.endpoint_type().is_bulk());
        assert_eq!(epc.buffer_address().bits(), 0x180);
        assert_eq!(epc.bits(), (1 << 31) | (1 << 29) | (2 << 26) | 0x180);
    }

    #[test]
    fn bind_sets_transfer_type() {
        let p = MockPeripherals::new();
        let config = EndpointConfig::new(UsbDir::In, 3, EndpointAttributes::INTERRUPT, 8, 2)
            .with_interval(10);
        let mut ep = Endpoint::new(1, &config).unwrap();
        ep.bind(&p);

        let epc = mmio::dpram(&p).ep_control[4].read();
        assert!(epc.endpoint_type().is_interrupt());
        assert_eq!(epc.buffer_address().bits(), 0x200);
    }

    #[test]
    fn control_endpoints_have_no_control_register() {
        let p = MockPeripherals::new();
        let config = EndpointConfig {
            endpoint_control: None,
            data_buffer: mmio::DpramAddress(mmio::DPRAM_BASE + 0x100),
            ..EndpointConfig::new(UsbDir::In, 0, EndpointAttributes::CONTROL, 64, 0)
        };
        let mut ep = Endpoint::new(0, &config).unwrap();
        ep.bind(&p);
        assert!(matches!(ep.completion, Completion::ControlIn));
        // Nothing in the endpoint control area was touched.
        assert!(mmio::dpram(&p).ep_control.iter().all(|epc| epc.read().bits() == 0));
    }

    #[test]
    fn pid_alternates() {
        let p = MockPeripherals::new();
        let mut ep = Endpoint::new(1, &BULK_IN).unwrap();
        ep.bind(&p);

        for i in 0..6 {
            ep.arm(&p, &[0xAA]);
            let bc = mmio::dpram(&p).ep_buffer_control[4].read();
            assert_eq!(bc.pid_0().bit(), i % 2 == 1, "packet {}", i);
        }
    }

    #[test]
    fn in_transfers_copy_and_clip() {
        let p = MockPeripherals::new();
        let mut ep = Endpoint::new(1, &BULK_IN).unwrap();
        ep.bind(&p);

        let data: [u8; 20] = core::array::from_fn(|i| i as u8);
        assert_eq!(ep.arm(&p, &data), 16);

        let bc = mmio::dpram(&p).ep_buffer_control[4].read();
        assert_eq!(bc.length_0().bits(), 16);
        assert!(bc.full_0().bit());
        assert!(bc.available_0().bit());

        let mut copied = [0; 20];
        mmio::read_buffer(&p, 0x1c0, &mut copied);
        assert_eq!(&copied[..16], &data[..16]);
        assert_eq!(&copied[16..], &[0; 4]);
    }

    #[test]
    fn out_transfers_leave_buffer_alone() {
        let p = MockPeripherals::new();
        let mut ep = Endpoint::new(1, &BULK_OUT).unwrap();
        ep.bind(&p);

        assert_eq!(ep.arm(&p, &[0x55; 64]), 64);
        let bc = mmio::dpram(&p).ep_buffer_control[3].read();
        assert_eq!(bc.length_0().bits(), 64);
        assert!(bc.available_0().bit());
        assert!(!bc.full_0().bit());
        assert!(!bc.pid_0().bit());
        let mut buffer = [0; 4];
        mmio::read_buffer(&p, 0x180, &mut buffer);
        assert_eq!(buffer, [0; 4]);
    }
}
