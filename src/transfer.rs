//! Per-filter ISO-TP transfer engine.
//!
//! A [`Transfer`] owns one direction of an ISO 15765-2 dialogue at a time:
//! it segments outbound payloads into Single/First/Consecutive frames while
//! obeying the peer's flow control, and reassembles inbound frames into a
//! whole message, answering FirstFrames with flow control of its own. The
//! state machine only advances while a caller is inside `write` or `read`;
//! there is no background worker.

use std::thread;
use std::time::{Duration, Instant};

use crate::config::ChannelConfig;
use crate::error::{J2534Error, Result};
use crate::frame::{
    self, low_nibble, CanId, PciType, BS_SIZE, CAN_PAYLOAD, ID_PREFIX, LEN_SIZE, PCI_SIZE,
};
use crate::passthru::PassThruChannel;
use crate::types::{
    PassThruMsg, ISO15765_ADDR_TYPE, ISO15765_BS, ISO15765_FRAME_PAD, ISO15765_STMIN,
    MAX_ISOTP_PAYLOAD, PROTOCOL_CAN, PROTOCOL_ISO15765,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferState {
    /// Idle; the next frame starts a new message in either direction
    Start,
    /// A SingleFrame or block of ConsecutiveFrames went out; the peer owes
    /// us flow control before anything more may be sent
    AwaitingFlowControl { sequence: u8 },
    /// Mid-block: `bs` frames remain before the next flow-control exchange
    /// (0 means the rest of the message runs without one)
    Block { sequence: u8, bs: u8, stmin: u8 },
}

/// ISO-TP transfer bound to one flow-control filter
pub struct Transfer {
    mask_id: CanId,
    pattern_id: CanId,
    flow_control_id: CanId,
    state: TransferState,
    offset: usize,
    /// Scratch frame on the send path, reassembly buffer on the receive path
    buffer: PassThruMsg,
}

impl Transfer {
    /// Seed a transfer from the three filter messages; only their CAN
    /// identifier prefixes participate.
    pub fn new(mask: &PassThruMsg, pattern: &PassThruMsg, flow_control: &PassThruMsg) -> Self {
        Self {
            mask_id: mask.can_id(),
            pattern_id: pattern.can_id(),
            flow_control_id: flow_control.can_id(),
            state: TransferState::Start,
            offset: 0,
            buffer: PassThruMsg::default(),
        }
    }

    pub fn mask_id(&self) -> CanId {
        self.mask_id
    }

    pub fn pattern_id(&self) -> CanId {
        self.pattern_id
    }

    pub fn flow_control_id(&self) -> CanId {
        self.flow_control_id
    }

    /// True when no message is in flight in either direction
    pub fn is_idle(&self) -> bool {
        self.state == TransferState::Start
    }

    /// Abandon any in-flight message and return to idle
    pub fn reset(&mut self) {
        self.state = TransferState::Start;
        self.offset = 0;
    }

    /// Segment `msg` into CAN frames and send them, driving the flow-control
    /// handshake with the peer. Returns once the whole payload went out or
    /// the deadline expired; the transfer is back in idle either way.
    pub fn write<C: PassThruChannel>(
        &mut self,
        channel: &mut C,
        msg: &PassThruMsg,
        deadline: Instant,
    ) -> Result<()> {
        if (msg.data_size as usize) < ID_PREFIX {
            return Err(J2534Error::InvalidMsg);
        }
        if msg.data_size as usize - ID_PREFIX > MAX_ISOTP_PAYLOAD {
            return Err(J2534Error::InvalidMsg);
        }
        if !self.is_idle() {
            log::debug!("write while a transfer is in flight, aborting it");
            self.reset();
            return Err(J2534Error::InvalidMsg);
        }

        let result = self.write_frames(channel, msg, deadline);
        if let Err(ref e) = result {
            log::debug!("isotp write aborted: {}", e);
        }
        self.reset();
        result
    }

    fn write_frames<C: PassThruChannel>(
        &mut self,
        channel: &mut C,
        msg: &PassThruMsg,
        deadline: Instant,
    ) -> Result<()> {
        let total = msg.data_size as usize;
        let pad = msg.tx_flags & ISO15765_FRAME_PAD != 0;

        while self.offset < total {
            let timeout = remaining_ms(deadline);
            if timeout == 0 {
                return Err(J2534Error::Timeout);
            }

            match self.state {
                TransferState::Start => {
                    self.offset = ID_PREFIX;
                    prepare_sent_headers(&mut self.buffer, msg);

                    let remaining = total - self.offset;
                    let sequence = if remaining <= CAN_PAYLOAD - PCI_SIZE {
                        // Fits a SingleFrame: length in the PCI low nibble
                        let size = remaining;
                        self.buffer.data[ID_PREFIX] =
                            PciType::SingleFrame.pci_byte() | (size as u8 & 0x0F);
                        self.buffer.data_size = (ID_PREFIX + PCI_SIZE + size) as u32;
                        self.buffer.data[ID_PREFIX + PCI_SIZE..ID_PREFIX + PCI_SIZE + size]
                            .copy_from_slice(&msg.data[self.offset..self.offset + size]);
                        self.offset += size;
                        0
                    } else {
                        // FirstFrame: 12-bit length split across PCI + length byte
                        self.buffer.data[ID_PREFIX] =
                            PciType::FirstFrame.pci_byte() | ((remaining >> 8) as u8 & 0x0F);
                        self.buffer.data[ID_PREFIX + PCI_SIZE] = remaining as u8;
                        let size = CAN_PAYLOAD - PCI_SIZE - LEN_SIZE;
                        self.buffer.data_size = (ID_PREFIX + PCI_SIZE + LEN_SIZE + size) as u32;
                        self.buffer.data
                            [ID_PREFIX + PCI_SIZE + LEN_SIZE..ID_PREFIX + PCI_SIZE + LEN_SIZE + size]
                            .copy_from_slice(&msg.data[self.offset..self.offset + size]);
                        self.offset += size;
                        1
                    };

                    if pad {
                        pad_frame(&mut self.buffer);
                    }
                    write_one(channel, &self.buffer, timeout)?;
                    self.state = TransferState::AwaitingFlowControl { sequence };
                }

                TransferState::AwaitingFlowControl { sequence } => {
                    read_one(channel, &mut self.buffer, timeout)?;
                    if (self.buffer.data_size as usize) < ID_PREFIX {
                        log::debug!("flow control frame too short");
                        return Err(J2534Error::Failed);
                    }
                    if self.buffer.can_id() & self.mask_id != self.pattern_id {
                        log::debug!(
                            "flow control PID {:08X} does not match filter",
                            self.buffer.can_id()
                        );
                        return Err(J2534Error::Failed);
                    }
                    if PciType::from_byte(self.buffer.data[ID_PREFIX]) != PciType::FlowControl {
                        log::debug!("expected flow control, got another frame type");
                        return Err(J2534Error::Failed);
                    }

                    // Flow status nibble is not inspected: only ContinueToSend
                    // is supported, WAIT/OVERFLOW are treated the same.
                    let bs = self.buffer.data[ID_PREFIX + PCI_SIZE];
                    let stmin = self.buffer.data[ID_PREFIX + PCI_SIZE + BS_SIZE];
                    thread::sleep(Duration::from_millis(stmin as u64));
                    self.state = TransferState::Block { sequence, bs, stmin };
                }

                TransferState::Block { sequence, bs, stmin } => {
                    prepare_sent_headers(&mut self.buffer, msg);

                    let size = (total - self.offset).min(CAN_PAYLOAD - PCI_SIZE);
                    self.buffer.data[ID_PREFIX] =
                        PciType::ConsecutiveFrame.pci_byte() | (sequence & 0x0F);
                    self.buffer.data_size = (ID_PREFIX + PCI_SIZE + size) as u32;
                    self.buffer.data[ID_PREFIX + PCI_SIZE..ID_PREFIX + PCI_SIZE + size]
                        .copy_from_slice(&msg.data[self.offset..self.offset + size]);
                    self.offset += size;

                    if pad {
                        pad_frame(&mut self.buffer);
                    }
                    write_one(channel, &self.buffer, timeout)?;

                    let sequence = sequence.wrapping_add(1);
                    match bs {
                        1 => self.state = TransferState::AwaitingFlowControl { sequence },
                        0 => {
                            self.state = TransferState::Block { sequence, bs, stmin };
                            thread::sleep(Duration::from_millis(stmin as u64));
                        }
                        _ => {
                            self.state = TransferState::Block { sequence, bs: bs - 1, stmin };
                            thread::sleep(Duration::from_millis(stmin as u64));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Feed one incoming CAN frame into the reassembly machine. Returns
    /// Ok(true) with `out` holding the whole message once complete,
    /// Ok(false) while more frames are expected. Any protocol violation
    /// abandons the in-flight message and resets to idle.
    pub fn read<C: PassThruChannel>(
        &mut self,
        channel: &mut C,
        config: &ChannelConfig,
        frame: &PassThruMsg,
        out: &mut PassThruMsg,
        deadline: Instant,
    ) -> Result<bool> {
        match self.read_frame(channel, config, frame, out, deadline) {
            Ok(done) => Ok(done),
            Err(e) => {
                log::debug!("isotp read aborted: {}", e);
                self.reset();
                Err(e)
            }
        }
    }

    fn read_frame<C: PassThruChannel>(
        &mut self,
        channel: &mut C,
        config: &ChannelConfig,
        in_msg: &PassThruMsg,
        out: &mut PassThruMsg,
        deadline: Instant,
    ) -> Result<bool> {
        if (in_msg.data_size as usize) < ID_PREFIX {
            return Err(J2534Error::InvalidMsg);
        }
        if in_msg.can_id() & self.mask_id != self.pattern_id {
            return Err(J2534Error::Failed);
        }

        match self.state {
            TransferState::Start => {
                prepare_received_headers(&mut self.buffer, in_msg);
                self.offset = ID_PREFIX;

                match PciType::from_byte(in_msg.data[ID_PREFIX]) {
                    PciType::SingleFrame => {
                        let size = low_nibble(in_msg.data[ID_PREFIX]) as usize;
                        self.buffer.data_size = (ID_PREFIX + size) as u32;
                        self.buffer.data[ID_PREFIX..ID_PREFIX + size].copy_from_slice(
                            &in_msg.data[ID_PREFIX + PCI_SIZE..ID_PREFIX + PCI_SIZE + size],
                        );
                        self.offset += size;
                    }
                    PciType::FirstFrame => {
                        let total = ((low_nibble(in_msg.data[ID_PREFIX]) as usize) << 8)
                            | in_msg.data[ID_PREFIX + PCI_SIZE] as usize;
                        self.buffer.data_size = (ID_PREFIX + total) as u32;
                        let size = CAN_PAYLOAD - PCI_SIZE - LEN_SIZE;
                        self.buffer.data[ID_PREFIX..ID_PREFIX + size].copy_from_slice(
                            &in_msg.data[ID_PREFIX + PCI_SIZE + LEN_SIZE
                                ..ID_PREFIX + PCI_SIZE + LEN_SIZE + size],
                        );
                        self.offset += size;

                        let (bs, stmin) = self.send_flow_control(channel, config, deadline)?;
                        self.state = TransferState::Block { sequence: 1, bs, stmin };
                    }
                    other => {
                        log::debug!("unexpected {:?} while idle", other);
                        return Err(J2534Error::Failed);
                    }
                }
            }

            TransferState::Block { sequence, bs, stmin } => {
                if PciType::from_byte(in_msg.data[ID_PREFIX]) != PciType::ConsecutiveFrame {
                    log::debug!("expected consecutive frame mid-message");
                    return Err(J2534Error::Failed);
                }
                let seq = low_nibble(in_msg.data[ID_PREFIX]);
                if seq != sequence & 0x0F {
                    log::warn!(
                        "consecutive frame sequence {} (expected {})",
                        seq,
                        sequence & 0x0F
                    );
                    return Err(J2534Error::Failed);
                }

                let size = (self.buffer.data_size as usize - self.offset).min(CAN_PAYLOAD - PCI_SIZE);
                self.buffer.data[self.offset..self.offset + size].copy_from_slice(
                    &in_msg.data[ID_PREFIX + PCI_SIZE..ID_PREFIX + PCI_SIZE + size],
                );
                self.offset += size;

                let sequence = sequence.wrapping_add(1);
                match bs {
                    1 => {
                        // Block complete: grant the peer another one
                        let (bs, stmin) = self.send_flow_control(channel, config, deadline)?;
                        self.state = TransferState::Block { sequence, bs, stmin };
                    }
                    0 => self.state = TransferState::Block { sequence, bs, stmin },
                    _ => self.state = TransferState::Block { sequence, bs: bs - 1, stmin },
                }
            }

            TransferState::AwaitingFlowControl { .. } => {
                log::debug!("unexpected frame while awaiting flow control");
                return Err(J2534Error::Failed);
            }
        }

        if self.offset >= self.buffer.data_size as usize {
            *out = self.buffer.clone();
            self.reset();
            return Ok(true);
        }
        Ok(false)
    }

    /// Emit a flow-control frame granting the peer the next block. BS and
    /// STmin are reread from the channel configuration on every emission, so
    /// reconfiguration takes effect between blocks.
    fn send_flow_control<C: PassThruChannel>(
        &self,
        channel: &mut C,
        config: &ChannelConfig,
        deadline: Instant,
    ) -> Result<(u8, u8)> {
        let bs = config.get_or_default(ISO15765_BS) as u8;
        let stmin = config.get_or_default(ISO15765_STMIN) as u8;

        let mut fc = PassThruMsg::default();
        fc.protocol_id = PROTOCOL_CAN;
        fc.data_size = (ID_PREFIX + PCI_SIZE + BS_SIZE + frame::STMIN_SIZE) as u32;
        frame::encode_id(self.flow_control_id, &mut fc.data[..ID_PREFIX]);
        fc.data[ID_PREFIX] = PciType::FlowControl.pci_byte();
        fc.data[ID_PREFIX + PCI_SIZE] = bs;
        fc.data[ID_PREFIX + PCI_SIZE + BS_SIZE] = stmin;
        pad_frame(&mut fc);

        write_one(channel, &fc, remaining_ms(deadline))?;
        Ok((bs, stmin))
    }
}

/// Milliseconds until `deadline`, saturating at zero
pub(crate) fn remaining_ms(deadline: Instant) -> u32 {
    deadline
        .saturating_duration_since(Instant::now())
        .as_millis()
        .min(u32::MAX as u128) as u32
}

fn write_one<C: PassThruChannel>(channel: &mut C, msg: &PassThruMsg, timeout_ms: u32) -> Result<()> {
    let mut count = 1u32;
    channel.write_msgs(std::slice::from_ref(msg), &mut count, timeout_ms)?;
    if count != 1 {
        return Err(J2534Error::Failed);
    }
    Ok(())
}

fn read_one<C: PassThruChannel>(channel: &mut C, msg: &mut PassThruMsg, timeout_ms: u32) -> Result<()> {
    let mut count = 1u32;
    channel.read_msgs(std::slice::from_mut(msg), &mut count, timeout_ms)?;
    if count != 1 {
        return Err(J2534Error::Timeout);
    }
    Ok(())
}

/// Headers for an outgoing CAN frame: raw CAN protocol, ISO-TP-only flags
/// stripped, the caller's CAN identifier prefix carried over
fn prepare_sent_headers(out: &mut PassThruMsg, src: &PassThruMsg) {
    out.protocol_id = PROTOCOL_CAN;
    out.rx_status = 0;
    out.tx_flags = src.tx_flags & !(ISO15765_FRAME_PAD | ISO15765_ADDR_TYPE);
    out.timestamp = 0;
    out.data_size = 0;
    out.extra_data_index = 0;
    out.data[..ID_PREFIX].copy_from_slice(&src.data[..ID_PREFIX]);
}

/// Headers for the reassembled message handed back to the caller
fn prepare_received_headers(out: &mut PassThruMsg, src: &PassThruMsg) {
    out.protocol_id = PROTOCOL_ISO15765;
    out.rx_status = src.rx_status;
    out.tx_flags = 0;
    out.timestamp = 0;
    out.data_size = 0;
    out.extra_data_index = 0;
    out.data[..ID_PREFIX].copy_from_slice(&src.data[..ID_PREFIX]);
}

/// Zero-extend the CAN payload to the full 8 bytes
fn pad_frame(msg: &mut PassThruMsg) {
    for i in msg.data_size as usize..ID_PREFIX + CAN_PAYLOAD {
        msg.data[i] = 0;
    }
    msg.data_size = (ID_PREFIX + CAN_PAYLOAD) as u32;
}
