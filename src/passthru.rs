//! Traits abstracting the wrapped Pass-Thru layer.
//!
//! The ISO15765 shim is written against these traits so it can sit on top of
//! a vendor J2534 DLL (see [`crate::dll`]) or an in-memory test double
//! without caring which. They mirror the J2534 channel/device/library split,
//! with the count-in/count-out convention of PassThruReadMsgs and
//! PassThruWriteMsgs kept intact: `num_msgs` carries the requested count in
//! and the processed count out, so partial success survives an error return.

use crate::error::Result;
use crate::types::{PassThruMsg, SConfig};

/// One open Pass-Thru channel
pub trait PassThruChannel {
    /// Read up to `num_msgs` messages into `msgs` within `timeout_ms`.
    ///
    /// A timeout with nothing received is not an error: implementations set
    /// `num_msgs` to the count actually read and return Ok.
    fn read_msgs(
        &mut self,
        msgs: &mut [PassThruMsg],
        num_msgs: &mut u32,
        timeout_ms: u32,
    ) -> Result<()>;

    /// Write up to `num_msgs` messages from `msgs` within `timeout_ms`,
    /// setting `num_msgs` to the count actually sent.
    fn write_msgs(&mut self, msgs: &[PassThruMsg], num_msgs: &mut u32, timeout_ms: u32)
        -> Result<()>;

    /// Install a message filter; returns the filter handle
    fn start_msg_filter(
        &mut self,
        filter_type: u32,
        mask: Option<&PassThruMsg>,
        pattern: Option<&PassThruMsg>,
        flow_control: Option<&PassThruMsg>,
    ) -> Result<u32>;

    fn stop_msg_filter(&mut self, filter_id: u32) -> Result<()>;

    /// Schedule a message for periodic transmission; returns the message handle
    fn start_periodic_msg(&mut self, msg: &PassThruMsg, interval_ms: u32) -> Result<u32>;

    fn stop_periodic_msg(&mut self, msg_id: u32) -> Result<()>;

    /// GET_CONFIG: fill in the value of each listed parameter
    fn get_config(&mut self, configs: &mut [SConfig]) -> Result<()>;

    /// SET_CONFIG: apply each listed parameter
    fn set_config(&mut self, configs: &[SConfig]) -> Result<()>;

    /// Any other channel ioctl, forwarded verbatim with raw input/output buffers
    fn ioctl(&mut self, ioctl_id: u32, input: &[u8], output: &mut [u8]) -> Result<()>;
}

/// One open Pass-Thru device
pub trait PassThruDevice {
    type Channel: PassThruChannel;

    /// Open a protocol channel. `protocol_id` carries the protocol in its low
    /// 13 bits and connect flags in the high bits.
    fn connect(&mut self, protocol_id: u32, flags: u32, baud_rate: u32) -> Result<Self::Channel>;

    fn read_version(&mut self) -> Result<DeviceVersion>;

    fn set_programming_voltage(&mut self, pin_number: u32, voltage: u32) -> Result<()>;

    /// Device-level ioctl, forwarded verbatim
    fn ioctl(&mut self, ioctl_id: u32, input: &[u8], output: &mut [u8]) -> Result<()>;
}

/// A loaded Pass-Thru library
pub trait PassThruLibrary {
    type Device: PassThruDevice;

    /// Open a device by name, or the first available when `name` is None
    fn open(&mut self, name: Option<&str>) -> Result<Self::Device>;

    /// Description of the most recent error reported by the library
    fn get_last_error(&mut self) -> Result<String>;
}

/// Version info from a Pass-Thru device
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeviceVersion {
    pub firmware: String,
    pub dll: String,
    pub api: String,
}
