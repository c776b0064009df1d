use std::time::Duration;

use crate::proto::Gain;

pub const DEFAULT_MAX_READ_RETRIES: u32 = 20;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Consecutive failed attempts tolerated on one pending read.
    pub max_read_retries: u32,
    pub gain: Gain,
    /// Wait between the reset being sent and the init message.
    pub reset_delay: Duration,
    /// Wait after the gain is acked before sampling starts.
    pub gain_settle_delay: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_read_retries: DEFAULT_MAX_READ_RETRIES,
            gain: Gain::Low,
            reset_delay: Duration::ZERO,
            gain_settle_delay: Duration::ZERO,
        }
    }
}
