use serde::{Deserialize, Serialize};

/// How finished voices are removed from the active list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReapPolicy {
    /// Drop only the leading run of finished voices. A short note that
    /// started after a longer one stays in the list, silent, until
    /// everything ahead of it has finished too.
    #[default]
    LeadingRun,
    /// Remove every finished voice on every tick.
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackMode {
    /// Stop once every queued note has played out.
    DrainAndQuit,
    /// Keep accepting notes until told to quit.
    RunForever,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: u32, // used by offline and headless output; devices report their own
    pub channels: u16,
    pub reap_policy: ReapPolicy,
    pub inbox_capacity: usize,
    pub voice_capacity: usize,
    pub block_size: usize,
    pub device: Option<String>,
    pub buffer_size: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            sample_rate: 44100,
            channels: 2,
            reap_policy: ReapPolicy::LeadingRun,
            inbox_capacity: 1024,
            voice_capacity: 64,
            block_size: 512,
            device: None,
            buffer_size: None,
        }
    }
}

impl EngineConfig {
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate.max(1);
        self
    }

    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels = channels.max(1);
        self
    }

    pub fn with_reap_policy(mut self, reap_policy: ReapPolicy) -> Self {
        self.reap_policy = reap_policy;
        self
    }

    pub fn with_inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = capacity.max(1);
        self
    }
}
