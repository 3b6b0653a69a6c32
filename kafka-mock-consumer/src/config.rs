use envconfig::Envconfig;

use crate::types::OffsetResetStrategy;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    // Reset strategy for partitions with no committed offset
    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: OffsetResetStrategy, // earliest, latest, none

    // Logged by close(), nothing waits on it
    #[envconfig(default = "30000")]
    pub kafka_consumer_close_timeout_ms: u64,
}
