//! Single-track sample pump
//!
//! A channel owns one reader output and one writer input. Its pump runs on
//! a dedicated blocking worker, which serializes all calls on the pair:
//!
//! 1. wait for the destination's readiness notification
//! 2. while the destination is ready and no terminal state was reached,
//!    pull a sample and append it
//! 3. on exhaustion or a rejected append, mark the destination finished
//!
//! The completion callback runs on the same worker once the pump returned,
//! never from inside a readiness round.

use tokio::task::JoinHandle;

use super::{ChannelOutcome, ChannelReport};
use crate::media::{MediaKind, Readiness, SampleSink, SampleSource};

pub struct SampleChannel<S, D> {
    kind: MediaKind,
    track_index: usize,
    source: S,
    destination: D,
}

impl<S, D> SampleChannel<S, D>
where
    S: SampleSource,
    D: SampleSink<Sample = S::Sample>,
{
    pub fn new(kind: MediaKind, track_index: usize, source: S, destination: D) -> Self {
        Self {
            kind,
            track_index,
            source,
            destination,
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn track_index(&self) -> usize {
        self.track_index
    }

    /// Start pumping on the channel's own worker. `on_complete` is invoked
    /// exactly once, after the destination has been marked finished.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_transfer<F>(self, on_complete: F) -> JoinHandle<()>
    where
        F: FnOnce(ChannelReport) + Send + 'static,
    {
        let span = tracing::debug_span!("channel", kind = %self.kind, track = self.track_index);
        tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            let report = self.pump();
            tracing::debug!(
                outcome = ?report.outcome,
                samples = report.samples,
                "channel terminated"
            );
            on_complete(report);
        })
    }

    fn pump(mut self) -> ChannelReport {
        let mut completed_or_failed = false;
        let mut outcome = ChannelOutcome::Finished;
        let mut samples = 0u64;

        while !completed_or_failed {
            if self.destination.wait_for_readiness() == Readiness::Closed {
                tracing::warn!("destination closed before the source was drained");
                outcome = ChannelOutcome::Failed;
                completed_or_failed = true;
                self.destination.mark_as_finished();
                break;
            }

            while self.destination.is_ready_for_more() && !completed_or_failed {
                match self.source.copy_next_sample() {
                    Some(sample) => {
                        if self.destination.append(sample) {
                            samples += 1;
                        } else {
                            tracing::warn!(samples, "destination rejected a sample");
                            outcome = ChannelOutcome::Failed;
                            completed_or_failed = true;
                        }
                    }
                    None => completed_or_failed = true,
                }

                if completed_or_failed {
                    self.destination.mark_as_finished();
                }
            }
        }

        ChannelReport {
            kind: self.kind,
            track_index: self.track_index,
            outcome,
            samples,
        }
    }
}
