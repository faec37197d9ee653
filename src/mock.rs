use std::collections::{HashMap, VecDeque};

use crate::error::{J2534Error, Result};
use crate::frame::{PciType, ID_PREFIX};
use crate::passthru::{DeviceVersion, PassThruChannel, PassThruDevice, PassThruLibrary};
use crate::types::{PassThruMsg, SConfig};

/// Filter recorded by the mock, flattened for easy assertions
#[derive(Debug, Clone)]
pub struct MockFilter {
    pub filter_id: u32,
    pub filter_type: u32,
    pub protocol_id: u32,
    pub mask_id: u32,
    pub pattern_id: u32,
    pub rx_status: u32,
    pub tx_flags: u32,
}

/// Scripted remote peer for segmented sends: answers each flow-control
/// exchange with the next (BS, STmin) pair from the script.
struct FlowControlResponder {
    fc_id: u32,
    scripts: VecDeque<(u8, u8)>,
    block_remaining: u8,
}

/// Mock CAN channel for driving the ISO-TP engine without hardware.
/// Frames written through it are captured; frames queued on it are served
/// to reads in FIFO order.
pub struct MockCanChannel {
    rx_queue: VecDeque<PassThruMsg>,
    tx_frames: Vec<PassThruMsg>,
    filters: Vec<MockFilter>,
    stopped_filters: Vec<u32>,
    next_filter_id: u32,
    periodic_msgs: Vec<(u32, u32)>,
    stopped_periodic: Vec<u32>,
    next_periodic_id: u32,
    config: HashMap<u32, u32>,
    ioctl_calls: Vec<u32>,
    responder: Option<FlowControlResponder>,
    fail_writes: bool,
    fail_reads: bool,
}

impl MockCanChannel {
    pub fn new() -> Self {
        Self {
            rx_queue: VecDeque::new(),
            tx_frames: Vec::new(),
            filters: Vec::new(),
            stopped_filters: Vec::new(),
            next_filter_id: 100,
            periodic_msgs: Vec::new(),
            stopped_periodic: Vec::new(),
            next_periodic_id: 500,
            config: HashMap::new(),
            ioctl_calls: Vec::new(),
            responder: None,
            fail_writes: false,
            fail_reads: false,
        }
    }

    /// Queue a raw CAN frame for delivery on the next read
    pub fn push_rx_frame(&mut self, can_id: u32, payload: &[u8]) {
        self.rx_queue.push_back(PassThruMsg::new_can(can_id, payload));
    }

    pub fn push_rx(&mut self, msg: PassThruMsg) {
        self.rx_queue.push_back(msg);
    }

    /// Answer flow-control exchanges from `fc_id` with the given
    /// (BS, STmin) pairs, one per exchange.
    pub fn respond_with_flow_control(&mut self, fc_id: u32, scripts: &[(u8, u8)]) {
        self.responder = Some(FlowControlResponder {
            fc_id,
            scripts: scripts.iter().copied().collect(),
            block_remaining: 0,
        });
    }

    /// Make write_msgs report zero messages sent
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// Make read_msgs fail hard once the rx queue is drained
    pub fn set_fail_reads(&mut self, fail: bool) {
        self.fail_reads = fail;
    }

    pub fn tx_frames(&self) -> &[PassThruMsg] {
        &self.tx_frames
    }

    pub fn filters(&self) -> &[MockFilter] {
        &self.filters
    }

    pub fn stopped_filters(&self) -> &[u32] {
        &self.stopped_filters
    }

    pub fn periodic_msgs(&self) -> &[(u32, u32)] {
        &self.periodic_msgs
    }

    pub fn stopped_periodic(&self) -> &[u32] {
        &self.stopped_periodic
    }

    pub fn config_value(&self, parameter: u32) -> Option<u32> {
        self.config.get(&parameter).copied()
    }

    pub fn ioctl_calls(&self) -> &[u32] {
        &self.ioctl_calls
    }

    fn note_written_frame(&mut self, msg: &PassThruMsg) {
        let Some(responder) = self.responder.as_mut() else {
            return;
        };
        if (msg.data_size as usize) <= ID_PREFIX {
            return;
        }
        match PciType::from_byte(msg.data[ID_PREFIX]) {
            PciType::FirstFrame => {
                if let Some((bs, stmin)) = responder.scripts.pop_front() {
                    responder.block_remaining = bs;
                    let fc_id = responder.fc_id;
                    self.rx_queue.push_back(flow_control_frame(fc_id, bs, stmin));
                }
            }
            PciType::ConsecutiveFrame => {
                if responder.block_remaining > 0 {
                    responder.block_remaining -= 1;
                    if responder.block_remaining == 0 {
                        if let Some((bs, stmin)) = responder.scripts.pop_front() {
                            responder.block_remaining = bs;
                            let fc_id = responder.fc_id;
                            self.rx_queue.push_back(flow_control_frame(fc_id, bs, stmin));
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

impl Default for MockCanChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the FC frame a remote peer would send: [0x30, BS, STmin, pad..]
pub fn flow_control_frame(fc_id: u32, bs: u8, stmin: u8) -> PassThruMsg {
    let mut payload = [0u8; 8];
    payload[0] = PciType::FlowControl.pci_byte();
    payload[1] = bs;
    payload[2] = stmin;
    PassThruMsg::new_can(fc_id, &payload)
}

impl PassThruChannel for MockCanChannel {
    fn read_msgs(
        &mut self,
        msgs: &mut [PassThruMsg],
        num_msgs: &mut u32,
        _timeout_ms: u32,
    ) -> Result<()> {
        if self.fail_reads && self.rx_queue.is_empty() {
            *num_msgs = 0;
            return Err(J2534Error::Failed);
        }
        let requested = (*num_msgs as usize).min(msgs.len());
        let mut count = 0;
        while count < requested {
            match self.rx_queue.pop_front() {
                Some(msg) => {
                    msgs[count] = msg;
                    count += 1;
                }
                None => break,
            }
        }
        *num_msgs = count as u32;
        Ok(())
    }

    fn write_msgs(
        &mut self,
        msgs: &[PassThruMsg],
        num_msgs: &mut u32,
        _timeout_ms: u32,
    ) -> Result<()> {
        if self.fail_writes {
            *num_msgs = 0;
            return Ok(());
        }
        let requested = (*num_msgs as usize).min(msgs.len());
        for msg in &msgs[..requested] {
            self.tx_frames.push(msg.clone());
            self.note_written_frame(msg);
        }
        *num_msgs = requested as u32;
        Ok(())
    }

    fn start_msg_filter(
        &mut self,
        filter_type: u32,
        mask: Option<&PassThruMsg>,
        pattern: Option<&PassThruMsg>,
        _flow_control: Option<&PassThruMsg>,
    ) -> Result<u32> {
        let filter_id = self.next_filter_id;
        self.next_filter_id += 1;
        self.filters.push(MockFilter {
            filter_id,
            filter_type,
            protocol_id: mask.map(|m| m.protocol_id).unwrap_or(0),
            mask_id: mask.map(|m| m.can_id()).unwrap_or(0),
            pattern_id: pattern.map(|p| p.can_id()).unwrap_or(0),
            rx_status: mask.map(|m| m.rx_status).unwrap_or(0),
            tx_flags: mask.map(|m| m.tx_flags).unwrap_or(0),
        });
        Ok(filter_id)
    }

    fn stop_msg_filter(&mut self, filter_id: u32) -> Result<()> {
        self.stopped_filters.push(filter_id);
        self.filters.retain(|f| f.filter_id != filter_id);
        Ok(())
    }

    fn start_periodic_msg(&mut self, _msg: &PassThruMsg, interval_ms: u32) -> Result<u32> {
        let msg_id = self.next_periodic_id;
        self.next_periodic_id += 1;
        self.periodic_msgs.push((msg_id, interval_ms));
        Ok(msg_id)
    }

    fn stop_periodic_msg(&mut self, msg_id: u32) -> Result<()> {
        self.stopped_periodic.push(msg_id);
        Ok(())
    }

    fn get_config(&mut self, configs: &mut [SConfig]) -> Result<()> {
        for config in configs.iter_mut() {
            config.value = self.config.get(&config.parameter).copied().unwrap_or(0);
        }
        Ok(())
    }

    fn set_config(&mut self, configs: &[SConfig]) -> Result<()> {
        for config in configs {
            self.config.insert(config.parameter, config.value);
        }
        Ok(())
    }

    fn ioctl(&mut self, ioctl_id: u32, _input: &[u8], _output: &mut [u8]) -> Result<()> {
        self.ioctl_calls.push(ioctl_id);
        Ok(())
    }
}

/// Mock device handing out mock channels, recording connect arguments
pub struct MockDevice {
    pub connected_protocols: Vec<(u32, u32, u32)>,
    pub programming_voltage: Vec<(u32, u32)>,
    pub ioctl_calls: Vec<u32>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            connected_protocols: Vec::new(),
            programming_voltage: Vec::new(),
            ioctl_calls: Vec::new(),
        }
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl PassThruDevice for MockDevice {
    type Channel = MockCanChannel;

    fn connect(&mut self, protocol_id: u32, flags: u32, baud_rate: u32) -> Result<Self::Channel> {
        self.connected_protocols.push((protocol_id, flags, baud_rate));
        Ok(MockCanChannel::new())
    }

    fn read_version(&mut self) -> Result<DeviceVersion> {
        Ok(DeviceVersion {
            firmware: "1.0".into(),
            dll: "mock".into(),
            api: "04.04".into(),
        })
    }

    fn set_programming_voltage(&mut self, pin_number: u32, voltage: u32) -> Result<()> {
        self.programming_voltage.push((pin_number, voltage));
        Ok(())
    }

    fn ioctl(&mut self, ioctl_id: u32, _input: &[u8], _output: &mut [u8]) -> Result<()> {
        self.ioctl_calls.push(ioctl_id);
        Ok(())
    }
}

/// Mock library handing out mock devices
pub struct MockLibrary {
    pub opened: Vec<Option<String>>,
    pub last_error: String,
}

impl MockLibrary {
    pub fn new() -> Self {
        Self {
            opened: Vec::new(),
            last_error: String::new(),
        }
    }
}

impl Default for MockLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl PassThruLibrary for MockLibrary {
    type Device = MockDevice;

    fn open(&mut self, name: Option<&str>) -> Result<Self::Device> {
        self.opened.push(name.map(str::to_string));
        Ok(MockDevice::new())
    }

    fn get_last_error(&mut self) -> Result<String> {
        Ok(self.last_error.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_fifo_read() {
        let mut mock = MockCanChannel::new();
        mock.push_rx_frame(0x7E8, &[0x01]);
        mock.push_rx_frame(0x7E8, &[0x02]);

        let mut msgs = vec![PassThruMsg::default(); 4];
        let mut num = 4u32;
        mock.read_msgs(&mut msgs, &mut num, 100).unwrap();
        assert_eq!(num, 2);
        assert_eq!(msgs[0].payload(), &[0x01]);
        assert_eq!(msgs[1].payload(), &[0x02]);
    }

    #[test]
    fn test_mock_read_empty_is_timeout_not_error() {
        let mut mock = MockCanChannel::new();
        let mut msgs = vec![PassThruMsg::default(); 1];
        let mut num = 1u32;
        mock.read_msgs(&mut msgs, &mut num, 100).unwrap();
        assert_eq!(num, 0);
    }

    #[test]
    fn test_mock_captures_writes() {
        let mut mock = MockCanChannel::new();
        let msg = PassThruMsg::new_can(0x7E0, &[0x02, 0x09, 0x02]);
        let mut num = 1u32;
        mock.write_msgs(std::slice::from_ref(&msg), &mut num, 100).unwrap();
        assert_eq!(num, 1);
        assert_eq!(mock.tx_frames().len(), 1);
        assert_eq!(mock.tx_frames()[0].can_id(), 0x7E0);
    }

    #[test]
    fn test_mock_responder_answers_first_frame() {
        let mut mock = MockCanChannel::new();
        mock.respond_with_flow_control(0x7E8, &[(2, 0)]);

        // A FirstFrame write triggers one FC into the rx queue
        let ff = PassThruMsg::new_can(0x7E0, &[0x10, 0x14, 0, 1, 2, 3, 4, 5]);
        let mut num = 1u32;
        mock.write_msgs(std::slice::from_ref(&ff), &mut num, 100).unwrap();

        let mut msgs = vec![PassThruMsg::default(); 1];
        let mut num = 1u32;
        mock.read_msgs(&mut msgs, &mut num, 100).unwrap();
        assert_eq!(num, 1);
        assert_eq!(msgs[0].can_id(), 0x7E8);
        assert_eq!(&msgs[0].data[4..7], &[0x30, 0x02, 0x00]);
    }

    #[test]
    fn test_mock_responder_answers_block_completion() {
        let mut mock = MockCanChannel::new();
        mock.respond_with_flow_control(0x7E8, &[(1, 0), (1, 0)]);

        let ff = PassThruMsg::new_can(0x7E0, &[0x10, 0x14, 0, 1, 2, 3, 4, 5]);
        let cf = PassThruMsg::new_can(0x7E0, &[0x21, 6, 7, 8, 9, 10, 11, 12]);
        let mut num = 1u32;
        mock.write_msgs(std::slice::from_ref(&ff), &mut num, 100).unwrap();
        let mut num = 1u32;
        mock.write_msgs(std::slice::from_ref(&cf), &mut num, 100).unwrap();

        // FF triggered the first FC, the block-completing CF the second
        let mut msgs = vec![PassThruMsg::default(); 4];
        let mut num = 4u32;
        mock.read_msgs(&mut msgs, &mut num, 100).unwrap();
        assert_eq!(num, 2);
    }

    #[test]
    fn test_mock_filter_bookkeeping() {
        let mut mock = MockCanChannel::new();
        let mask = PassThruMsg::new_can(0x1FFFFFFF, &[]);
        let pattern = PassThruMsg::new_can(0x7E8, &[]);
        let id = mock
            .start_msg_filter(crate::types::FILTER_PASS, Some(&mask), Some(&pattern), None)
            .unwrap();
        assert_eq!(mock.filters().len(), 1);
        assert_eq!(mock.filters()[0].pattern_id, 0x7E8);

        mock.stop_msg_filter(id).unwrap();
        assert!(mock.filters().is_empty());
        assert_eq!(mock.stopped_filters(), &[id]);
    }
}
