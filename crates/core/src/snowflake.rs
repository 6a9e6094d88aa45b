//! Snowflake-style identifier generator.
//!
//! Layout of a generated id, high to low bits:
//!
//! | bits | field |
//! |------|-------|
//! | 41   | milliseconds since [`EPOCH_MILLIS`] |
//! | 11   | node id (0–2047) |
//! | 12   | per-millisecond sequence (0–4095) |
//!
//! One generator instance owns one `(last_millis, sequence)` pair behind a
//! mutex; the lock covers the read-modify-write of that pair and nothing else.
//! Node-id uniqueness across running instances is an operational precondition.

use std::sync::Mutex;

use thiserror::Error;

use crate::IdentityId;

/// Custom epoch: 2020-01-01T00:00:00Z.
pub const EPOCH_MILLIS: i64 = 1_577_836_800_000;

const NODE_BITS: u32 = 11;
const SEQUENCE_BITS: u32 = 12;
const TIMESTAMP_BITS: u32 = 41;

const NODE_SHIFT: u32 = SEQUENCE_BITS;
const TIMESTAMP_SHIFT: u32 = NODE_BITS + SEQUENCE_BITS;

pub const MAX_NODE_ID: u16 = (1 << NODE_BITS) - 1;
pub const MAX_SEQUENCE: u16 = (1 << SEQUENCE_BITS) - 1;
const MAX_ELAPSED_MILLIS: i64 = (1 << TIMESTAMP_BITS) - 1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SnowflakeError {
    #[error("node id {0} exceeds the maximum of {max}", max = MAX_NODE_ID)]
    InvalidNodeId(u16),

    /// The wall clock went backwards relative to the last issued id.
    #[error("clock moved backwards: last issued at {last} ms, now {now} ms")]
    ClockRegression { last: i64, now: i64 },

    #[error("clock reads {now} ms, before the generator epoch")]
    BeforeEpoch { now: i64 },

    #[error("timestamp no longer fits in {bits} bits", bits = TIMESTAMP_BITS)]
    TimestampOverflow,

    #[error("generator state lock poisoned")]
    Poisoned,
}

/// Millisecond wall clock.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Default, Copy, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Fields recovered from a generated id.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SnowflakeParts {
    /// Absolute Unix time in milliseconds.
    pub timestamp_ms: i64,
    pub node_id: u16,
    pub sequence: u16,
}

#[derive(Debug)]
struct GeneratorState {
    last_millis: i64,
    sequence: u16,
}

/// Time-ordered, collision-free 64-bit id generator for one node.
#[derive(Debug)]
pub struct IdGenerator<C = SystemClock> {
    node_id: u16,
    clock: C,
    state: Mutex<GeneratorState>,
}

impl IdGenerator<SystemClock> {
    pub fn new(node_id: u16) -> Result<Self, SnowflakeError> {
        Self::with_clock(node_id, SystemClock)
    }
}

impl<C: Clock> IdGenerator<C> {
    pub fn with_clock(node_id: u16, clock: C) -> Result<Self, SnowflakeError> {
        if node_id > MAX_NODE_ID {
            return Err(SnowflakeError::InvalidNodeId(node_id));
        }

        Ok(Self {
            node_id,
            clock,
            state: Mutex::new(GeneratorState {
                last_millis: 0,
                sequence: 0,
            }),
        })
    }

    pub fn node_id(&self) -> u16 {
        self.node_id
    }

    /// Produce the next id.
    ///
    /// On sequence exhaustion within one millisecond this spins until the clock
    /// advances. A clock that reads earlier than the last issued millisecond is
    /// reported as [`SnowflakeError::ClockRegression`] and leaves the state untouched.
    pub fn generate(&self) -> Result<IdentityId, SnowflakeError> {
        let mut state = self.state.lock().map_err(|_| SnowflakeError::Poisoned)?;

        let mut now = self.read_clock()?;
        if now < state.last_millis {
            tracing::error!(
                node_id = self.node_id,
                last = state.last_millis,
                now,
                "clock regression detected"
            );
            return Err(SnowflakeError::ClockRegression {
                last: state.last_millis,
                now,
            });
        }

        let sequence = if now == state.last_millis {
            if state.sequence == MAX_SEQUENCE {
                now = self.wait_next_millis(state.last_millis)?;
                0
            } else {
                state.sequence + 1
            }
        } else {
            0
        };

        let elapsed = now - EPOCH_MILLIS;
        if elapsed > MAX_ELAPSED_MILLIS {
            return Err(SnowflakeError::TimestampOverflow);
        }

        state.last_millis = now;
        state.sequence = sequence;

        Ok(IdentityId::new(compose(elapsed, self.node_id, sequence)))
    }

    fn read_clock(&self) -> Result<i64, SnowflakeError> {
        let now = self.clock.now_millis();
        if now < EPOCH_MILLIS {
            return Err(SnowflakeError::BeforeEpoch { now });
        }
        Ok(now)
    }

    fn wait_next_millis(&self, last: i64) -> Result<i64, SnowflakeError> {
        loop {
            std::hint::spin_loop();
            let now = self.read_clock()?;
            if now > last {
                return Ok(now);
            }
            if now < last {
                return Err(SnowflakeError::ClockRegression { last, now });
            }
        }
    }
}

fn compose(elapsed: i64, node_id: u16, sequence: u16) -> u64 {
    ((elapsed as u64) << TIMESTAMP_SHIFT) | ((node_id as u64) << NODE_SHIFT) | sequence as u64
}

pub fn decompose(id: IdentityId) -> SnowflakeParts {
    let raw = id.get();
    SnowflakeParts {
        timestamp_ms: (raw >> TIMESTAMP_SHIFT) as i64 + EPOCH_MILLIS,
        node_id: ((raw >> NODE_SHIFT) & MAX_NODE_ID as u64) as u16,
        sequence: (raw & MAX_SEQUENCE as u64) as u16,
    }
}
