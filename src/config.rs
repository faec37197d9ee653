use std::collections::HashMap;

use crate::types::{ISO15765_ADDR_TYPE, ISO15765_BS, ISO15765_STMIN};

/// Per-channel configuration handled locally by the ISO15765 shim.
///
/// Only the ISO-TP parameters live here; everything else is forwarded to the
/// wrapped CAN channel. Absent parameters read as zero, which gives the
/// protocol defaults (BS 0 = no block limit, STmin 0 = no inter-frame gap).
#[derive(Debug, Default)]
pub struct ChannelConfig {
    values: HashMap<u32, u32>,
}

impl ChannelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the parameter is owned by the shim rather than the wrapped channel
    pub fn is_local(parameter: u32) -> bool {
        matches!(parameter, ISO15765_BS | ISO15765_STMIN | ISO15765_ADDR_TYPE)
    }

    pub fn get(&self, parameter: u32) -> Option<u32> {
        self.values.get(&parameter).copied()
    }

    /// Parameter value, defaulting to 0 when never set
    pub fn get_or_default(&self, parameter: u32) -> u32 {
        self.get(parameter).unwrap_or(0)
    }

    pub fn set(&mut self, parameter: u32, value: u32) {
        self.values.insert(parameter, value);
    }
}
