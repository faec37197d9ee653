//! ISO15765 channel: the Pass-Thru facade over a raw CAN channel.
//!
//! Outgoing messages are routed to the transfer whose flow-control id
//! matches their CAN identifier; incoming CAN frames are demultiplexed to
//! the transfer whose pattern matches under its mask. Everything that is not
//! ISO-TP specific is forwarded to the wrapped channel untouched.

use std::time::{Duration, Instant};

use crate::config::ChannelConfig;
use crate::error::{J2534Error, Result};
use crate::passthru::PassThruChannel;
use crate::transfer::{remaining_ms, Transfer};
use crate::types::{
    PassThruMsg, SConfig, CLEAR_MSG_FILTERS, CLEAR_PERIODIC_MSGS, CLEAR_RX_BUFFER,
    CLEAR_TX_BUFFER, FILTER_FLOW_CONTROL, FILTER_PASS, ISO15765_ADDR_TYPE, ISO15765_FRAME_PAD,
    ISO15765_PADDING_ERROR, PROTOCOL_CAN,
};

/// Registry entry: one flow-control filter with its transfer and the PASS
/// filter installed on the wrapped channel on its behalf
struct FlowControlFilter {
    handle: u32,
    wrapped_filter_id: u32,
    transfer: Transfer,
}

/// ISO-TP shim over a raw CAN channel
pub struct Iso15765Channel<C: PassThruChannel> {
    channel: C,
    filters: Vec<FlowControlFilter>,
    config: ChannelConfig,
    next_filter_handle: u32,
}

impl<C: PassThruChannel> Iso15765Channel<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            filters: Vec::new(),
            config: ChannelConfig::new(),
            next_filter_handle: 1,
        }
    }

    /// The wrapped CAN channel
    pub fn inner(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Index of the first registered filter whose pattern matches `can_id`
    /// under its mask
    fn filter_index_by_pattern(&self, can_id: u32) -> Option<usize> {
        self.filters
            .iter()
            .position(|f| f.transfer.pattern_id() == (can_id & f.transfer.mask_id()))
    }

    fn clear_message_filters(&mut self) -> Result<()> {
        for filter in self.filters.drain(..) {
            if let Err(e) = self.channel.stop_msg_filter(filter.wrapped_filter_id) {
                log::warn!(
                    "failed to release wrapped filter {}: {}",
                    filter.wrapped_filter_id,
                    e
                );
            }
        }
        Ok(())
    }
}

impl<C: PassThruChannel> PassThruChannel for Iso15765Channel<C> {
    fn read_msgs(
        &mut self,
        msgs: &mut [PassThruMsg],
        num_msgs: &mut u32,
        timeout_ms: u32,
    ) -> Result<()> {
        let requested = (*num_msgs as usize).min(msgs.len());
        let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);
        let mut count = 0usize;
        let mut frame = PassThruMsg::default();

        'slots: while count < requested {
            loop {
                let timeout = remaining_ms(deadline);
                if timeout == 0 {
                    log::debug!("read batch deadline expired after {} messages", count);
                    break 'slots;
                }

                let mut read = 1u32;
                if let Err(e) =
                    self.channel
                        .read_msgs(std::slice::from_mut(&mut frame), &mut read, timeout)
                {
                    // Keep the partial-success contract even on a hard failure
                    *num_msgs = count as u32;
                    return Err(e);
                }
                if read != 1 {
                    log::debug!("wrapped channel returned no frame");
                    break 'slots;
                }

                let Some(index) = self.filter_index_by_pattern(frame.can_id()) else {
                    log::debug!("no transfer matches frame id {:08X}, dropped", frame.can_id());
                    continue;
                };
                let entry = &mut self.filters[index];
                match entry.transfer.read(
                    &mut self.channel,
                    &self.config,
                    &frame,
                    &mut msgs[count],
                    deadline,
                ) {
                    Ok(true) => {
                        count += 1;
                        continue 'slots;
                    }
                    Ok(false) => {}
                    // Protocol violations abandon that message only; keep
                    // draining the wrapped channel
                    Err(e) => log::debug!("frame for id {:08X} rejected: {}", frame.can_id(), e),
                }
            }
        }

        *num_msgs = count as u32;
        Ok(())
    }

    fn write_msgs(
        &mut self,
        msgs: &[PassThruMsg],
        num_msgs: &mut u32,
        timeout_ms: u32,
    ) -> Result<()> {
        let requested = (*num_msgs as usize).min(msgs.len());
        let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);
        let mut count = 0u32;

        for msg in &msgs[..requested] {
            if remaining_ms(deadline) == 0 {
                break;
            }

            let can_id = msg.can_id();
            let Some(index) = self
                .filters
                .iter()
                .position(|f| f.transfer.flow_control_id() == can_id)
            else {
                log::debug!("no transfer owns outbound id {:08X}, message ignored", can_id);
                continue;
            };
            let entry = &mut self.filters[index];
            // A busy transfer also reports INVALID_MSG (and resets); that
            // abandons one message, not the whole batch
            let was_idle = entry.transfer.is_idle();
            match entry.transfer.write(&mut self.channel, msg, deadline) {
                Ok(()) => count += 1,
                // Malformed caller message: surface it, keeping the partial count
                Err(J2534Error::InvalidMsg) if was_idle => {
                    *num_msgs = count;
                    return Err(J2534Error::InvalidMsg);
                }
                Err(e) => log::debug!("write for id {:08X} failed: {}", can_id, e),
            }
        }

        *num_msgs = count;
        Ok(())
    }

    fn start_msg_filter(
        &mut self,
        filter_type: u32,
        mask: Option<&PassThruMsg>,
        pattern: Option<&PassThruMsg>,
        flow_control: Option<&PassThruMsg>,
    ) -> Result<u32> {
        if filter_type != FILTER_FLOW_CONTROL {
            return self
                .channel
                .start_msg_filter(filter_type, mask, pattern, flow_control);
        }

        let (mask, pattern, flow_control) = match (mask, pattern, flow_control) {
            (Some(m), Some(p), Some(f)) => (m, p, f),
            _ => return Err(J2534Error::NullParameter),
        };

        // Install a plain PASS filter on the raw CAN channel. The ISO-TP
        // status/flag bits have no meaning there and would reject matches.
        let mut raw_mask = mask.clone();
        let mut raw_pattern = pattern.clone();
        for msg in [&mut raw_mask, &mut raw_pattern] {
            msg.protocol_id = PROTOCOL_CAN;
            msg.rx_status &= !(ISO15765_PADDING_ERROR | ISO15765_ADDR_TYPE);
            msg.tx_flags &= !ISO15765_FRAME_PAD;
        }
        let wrapped_filter_id =
            self.channel
                .start_msg_filter(FILTER_PASS, Some(&raw_mask), Some(&raw_pattern), None)?;

        // The transfer keeps the caller's original identifiers
        let transfer = Transfer::new(mask, pattern, flow_control);
        let handle = self.next_filter_handle;
        self.next_filter_handle += 1;
        self.filters.push(FlowControlFilter {
            handle,
            wrapped_filter_id,
            transfer,
        });
        Ok(handle)
    }

    fn stop_msg_filter(&mut self, filter_id: u32) -> Result<()> {
        match self.filters.iter().position(|f| f.handle == filter_id) {
            Some(index) => {
                let filter = self.filters.remove(index);
                self.channel.stop_msg_filter(filter.wrapped_filter_id)
            }
            None => self.channel.stop_msg_filter(filter_id),
        }
    }

    fn start_periodic_msg(&mut self, msg: &PassThruMsg, interval_ms: u32) -> Result<u32> {
        self.channel.start_periodic_msg(msg, interval_ms)
    }

    fn stop_periodic_msg(&mut self, msg_id: u32) -> Result<()> {
        self.channel.stop_periodic_msg(msg_id)
    }

    fn get_config(&mut self, configs: &mut [SConfig]) -> Result<()> {
        for config in configs.iter_mut() {
            if ChannelConfig::is_local(config.parameter) {
                config.value = self.config.get_or_default(config.parameter);
            } else {
                self.channel.get_config(std::slice::from_mut(config))?;
            }
        }
        Ok(())
    }

    fn set_config(&mut self, configs: &[SConfig]) -> Result<()> {
        for config in configs {
            if ChannelConfig::is_local(config.parameter) {
                self.config.set(config.parameter, config.value);
            } else {
                self.channel.set_config(std::slice::from_ref(config))?;
            }
        }
        Ok(())
    }

    fn ioctl(&mut self, ioctl_id: u32, input: &[u8], output: &mut [u8]) -> Result<()> {
        match ioctl_id {
            // The shim keeps no buffers of its own and does not intercept
            // periodic messages; pretending to clear them would mislead
            CLEAR_TX_BUFFER | CLEAR_RX_BUFFER | CLEAR_PERIODIC_MSGS => {
                Err(J2534Error::NotSupported)
            }
            CLEAR_MSG_FILTERS => self.clear_message_filters(),
            _ => self.channel.ioctl(ioctl_id, input, output),
        }
    }
}
