// ID Generator - Snowflake-like, time-ordered 64-bit IDs
// Layout: [timestamp_ms:42][node:10][sequence:12]. IDs from one generator are
// strictly increasing, so ordering by id matches creation order.

use std::sync::Mutex;

use crate::core::current_time_millis;

const NODE_BITS: u64 = 10;
const SEQUENCE_BITS: u64 = 12;
const MAX_SEQUENCE: u64 = (1 << SEQUENCE_BITS) - 1;

#[derive(Debug, Default)]
struct GeneratorState {
    last_timestamp: u64,
    sequence: u64,
}

#[derive(Debug)]
pub struct IdGenerator {
    node_id: u16,
    state: Mutex<GeneratorState>,
}

impl IdGenerator {
    /// Create new ID generator for the given node
    pub fn new(node_id: u16) -> Self {
        assert!(node_id < 1024, "Node ID must be less than 1024");

        Self {
            node_id,
            state: Mutex::new(GeneratorState::default()),
        }
    }

    /// Generate next unique ID
    pub fn next_id(&self) -> i64 {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // A clock that steps backwards keeps using the last timestamp.
        let mut now = (current_time_millis().max(0) as u64).max(state.last_timestamp);

        if now == state.last_timestamp {
            state.sequence += 1;
            if state.sequence > MAX_SEQUENCE {
                // Sequence exhausted for this millisecond: borrow the next one.
                now += 1;
                state.sequence = 0;
            }
        } else {
            state.sequence = 0;
        }
        state.last_timestamp = now;

        let id = ((now & 0x3FF_FFFF_FFFF) << (NODE_BITS + SEQUENCE_BITS))
            | ((self.node_id as u64) << SEQUENCE_BITS)
            | state.sequence;

        id as i64
    }

    #[cfg(test)]
    fn extract_node_id(id: i64) -> u16 {
        (((id as u64) >> SEQUENCE_BITS) & 0x3FF) as u16
    }

    #[cfg(test)]
    fn extract_timestamp(id: i64) -> u64 {
        (id as u64) >> (NODE_BITS + SEQUENCE_BITS)
    }
}
