//! Per-track sample transfer
//!
//! - `SampleChannel`: pumps one track from reader output to writer input
//! - `JoinBarrier`: fans channel completion back in

pub mod barrier;
pub mod channel;

pub use barrier::{Arrival, JoinBarrier};
pub use channel::SampleChannel;

use crate::media::MediaKind;

/// Terminal state of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOutcome {
    /// Source exhausted and destination finished cleanly
    Finished,
    /// Destination rejected a sample or closed
    Failed,
}

/// What a channel reports to the barrier when it terminates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelReport {
    pub kind: MediaKind,
    pub track_index: usize,
    pub outcome: ChannelOutcome,
    /// Samples accepted by the destination
    pub samples: u64,
}

impl ChannelReport {
    pub fn is_failure(&self) -> bool {
        self.outcome == ChannelOutcome::Failed
    }
}
