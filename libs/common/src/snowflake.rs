use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Custom epoch: 2026-01-01T00:00:00Z in milliseconds since Unix epoch.
const TEAMBOARD_EPOCH_MS: u64 = 1_767_225_600_000;

const WORKER_BITS: u64 = 10;
const SEQUENCE_BITS: u64 = 12;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

/// 64-bit time-ordered id generator for chat messages, comments and
/// notifications. Ids sort by creation time, which is what cursor
/// pagination keys on.
///
/// Layout (MSB → LSB): 42 bits of ms since the Teamboard epoch, 10 bits of
/// worker id, 12 bits of per-ms sequence.
pub struct SnowflakeGenerator {
    worker_id: u64,
    // (last_ms, sequence)
    state: Mutex<(u64, u64)>,
}

impl SnowflakeGenerator {
    pub fn new(worker_id: u16) -> Self {
        assert!(
            u64::from(worker_id) < (1 << WORKER_BITS),
            "worker_id must fit in {WORKER_BITS} bits"
        );
        Self {
            worker_id: u64::from(worker_id),
            state: Mutex::new((0, 0)),
        }
    }

    pub fn generate(&self) -> i64 {
        let mut state = self.state.lock();
        let (last_ms, sequence) = *state;

        // A clock that steps backwards keeps issuing ids from the last
        // observed millisecond so ordering never regresses.
        let mut now_ms = current_ms().max(last_ms);

        let next_sequence = if now_ms == last_ms {
            let seq = (sequence + 1) & SEQUENCE_MASK;
            if seq == 0 {
                while now_ms <= last_ms {
                    std::hint::spin_loop();
                    now_ms = current_ms();
                }
            }
            seq
        } else {
            0
        };

        *state = (now_ms, next_sequence);

        let ts = now_ms.saturating_sub(TEAMBOARD_EPOCH_MS);
        ((ts << (WORKER_BITS + SEQUENCE_BITS)) | (self.worker_id << SEQUENCE_BITS) | next_sequence)
            as i64
    }
}

fn current_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(TEAMBOARD_EPOCH_MS)
}

/// Extract the creation timestamp (ms since Unix epoch) from a snowflake.
pub fn snowflake_timestamp_ms(id: i64) -> u64 {
    ((id as u64) >> (WORKER_BITS + SEQUENCE_BITS)) + TEAMBOARD_EPOCH_MS
}
