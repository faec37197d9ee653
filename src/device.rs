//! Device and library decorators.
//!
//! [`Iso15765Device`] sits in front of a wrapped Pass-Thru device: connect
//! requests for the ISO15765 protocol are rewritten to CAN and the resulting
//! channel is wrapped in the ISO-TP shim; every other protocol, and every
//! other device operation, passes straight through.

use crate::channel::Iso15765Channel;
use crate::error::Result;
use crate::passthru::{DeviceVersion, PassThruChannel, PassThruDevice, PassThruLibrary};
use crate::types::{PassThruMsg, SConfig, PROTOCOL_ID_MASK, PROTOCOL_ISO15765};

/// Channel handed out by [`Iso15765Device::connect`]: either the ISO-TP shim
/// over a CAN channel, or the wrapped channel untouched
pub enum ProxyChannel<C: PassThruChannel> {
    Iso15765(Iso15765Channel<C>),
    Passthrough(C),
}

impl<C: PassThruChannel> PassThruChannel for ProxyChannel<C> {
    fn read_msgs(
        &mut self,
        msgs: &mut [PassThruMsg],
        num_msgs: &mut u32,
        timeout_ms: u32,
    ) -> Result<()> {
        match self {
            Self::Iso15765(c) => c.read_msgs(msgs, num_msgs, timeout_ms),
            Self::Passthrough(c) => c.read_msgs(msgs, num_msgs, timeout_ms),
        }
    }

    fn write_msgs(
        &mut self,
        msgs: &[PassThruMsg],
        num_msgs: &mut u32,
        timeout_ms: u32,
    ) -> Result<()> {
        match self {
            Self::Iso15765(c) => c.write_msgs(msgs, num_msgs, timeout_ms),
            Self::Passthrough(c) => c.write_msgs(msgs, num_msgs, timeout_ms),
        }
    }

    fn start_msg_filter(
        &mut self,
        filter_type: u32,
        mask: Option<&PassThruMsg>,
        pattern: Option<&PassThruMsg>,
        flow_control: Option<&PassThruMsg>,
    ) -> Result<u32> {
        match self {
            Self::Iso15765(c) => c.start_msg_filter(filter_type, mask, pattern, flow_control),
            Self::Passthrough(c) => c.start_msg_filter(filter_type, mask, pattern, flow_control),
        }
    }

    fn stop_msg_filter(&mut self, filter_id: u32) -> Result<()> {
        match self {
            Self::Iso15765(c) => c.stop_msg_filter(filter_id),
            Self::Passthrough(c) => c.stop_msg_filter(filter_id),
        }
    }

    fn start_periodic_msg(&mut self, msg: &PassThruMsg, interval_ms: u32) -> Result<u32> {
        match self {
            Self::Iso15765(c) => c.start_periodic_msg(msg, interval_ms),
            Self::Passthrough(c) => c.start_periodic_msg(msg, interval_ms),
        }
    }

    fn stop_periodic_msg(&mut self, msg_id: u32) -> Result<()> {
        match self {
            Self::Iso15765(c) => c.stop_periodic_msg(msg_id),
            Self::Passthrough(c) => c.stop_periodic_msg(msg_id),
        }
    }

    fn get_config(&mut self, configs: &mut [SConfig]) -> Result<()> {
        match self {
            Self::Iso15765(c) => c.get_config(configs),
            Self::Passthrough(c) => c.get_config(configs),
        }
    }

    fn set_config(&mut self, configs: &[SConfig]) -> Result<()> {
        match self {
            Self::Iso15765(c) => c.set_config(configs),
            Self::Passthrough(c) => c.set_config(configs),
        }
    }

    fn ioctl(&mut self, ioctl_id: u32, input: &[u8], output: &mut [u8]) -> Result<()> {
        match self {
            Self::Iso15765(c) => c.ioctl(ioctl_id, input, output),
            Self::Passthrough(c) => c.ioctl(ioctl_id, input, output),
        }
    }
}

/// Pass-Thru device decorator producing ISO15765 channels on demand
pub struct Iso15765Device<D: PassThruDevice> {
    device: D,
}

impl<D: PassThruDevice> Iso15765Device<D> {
    pub fn new(device: D) -> Self {
        Self { device }
    }
}

impl<D: PassThruDevice> PassThruDevice for Iso15765Device<D> {
    type Channel = ProxyChannel<D::Channel>;

    fn connect(&mut self, protocol_id: u32, flags: u32, baud_rate: u32) -> Result<Self::Channel> {
        if protocol_id & PROTOCOL_ID_MASK == PROTOCOL_ISO15765 {
            // The wrapped device only ever sees raw CAN; the decrement keeps
            // any flag bits above the protocol field intact
            let channel = self.device.connect(protocol_id - 1, flags, baud_rate)?;
            Ok(ProxyChannel::Iso15765(Iso15765Channel::new(channel)))
        } else {
            let channel = self.device.connect(protocol_id, flags, baud_rate)?;
            Ok(ProxyChannel::Passthrough(channel))
        }
    }

    fn read_version(&mut self) -> Result<DeviceVersion> {
        self.device.read_version()
    }

    fn set_programming_voltage(&mut self, pin_number: u32, voltage: u32) -> Result<()> {
        self.device.set_programming_voltage(pin_number, voltage)
    }

    fn ioctl(&mut self, ioctl_id: u32, input: &[u8], output: &mut [u8]) -> Result<()> {
        self.device.ioctl(ioctl_id, input, output)
    }
}

/// Pass-Thru library decorator wrapping every opened device
pub struct Iso15765Library<L: PassThruLibrary> {
    library: L,
}

impl<L: PassThruLibrary> Iso15765Library<L> {
    pub fn new(library: L) -> Self {
        Self { library }
    }
}

impl<L: PassThruLibrary> PassThruLibrary for Iso15765Library<L> {
    type Device = Iso15765Device<L::Device>;

    fn open(&mut self, name: Option<&str>) -> Result<Self::Device> {
        let device = self.library.open(name)?;
        Ok(Iso15765Device::new(device))
    }

    fn get_last_error(&mut self) -> Result<String> {
        self.library.get_last_error()
    }
}
