//! Countdown barrier used to fan in channel completion
//!
//! Armed with the participant count up front, so participants may arrive in
//! any order, including before anyone waits. A participant dropped without
//! arriving (e.g. its worker panicked) still counts down.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::ChannelReport;

struct Shared {
    remaining: AtomicUsize,
    reports: Mutex<Vec<ChannelReport>>,
    released: Notify,
}

impl Shared {
    fn count_down(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            // notify_one stores a permit when nobody is waiting yet
            self.released.notify_one();
        }
    }
}

/// Waiting side of the barrier
pub struct JoinBarrier {
    shared: Arc<Shared>,
    participants: usize,
}

/// Arriving side of the barrier; one per participant
pub struct Arrival {
    shared: Arc<Shared>,
    arrived: bool,
}

impl JoinBarrier {
    /// Create a barrier and one `Arrival` per participant.
    pub fn new(participants: usize) -> (Self, Vec<Arrival>) {
        let shared = Arc::new(Shared {
            remaining: AtomicUsize::new(participants),
            reports: Mutex::new(Vec::with_capacity(participants)),
            released: Notify::new(),
        });
        let arrivals = (0..participants)
            .map(|_| Arrival {
                shared: Arc::clone(&shared),
                arrived: false,
            })
            .collect();
        (
            Self {
                shared,
                participants,
            },
            arrivals,
        )
    }

    pub fn participants(&self) -> usize {
        self.participants
    }

    /// Participants that have not arrived (or been dropped) yet.
    pub fn remaining(&self) -> usize {
        self.shared.remaining.load(Ordering::Acquire)
    }

    /// Resolve once every participant arrived, with the reports in arrival
    /// order. Participants dropped without arriving contribute no report.
    pub async fn wait(self) -> Vec<ChannelReport> {
        loop {
            let notified = self.shared.released.notified();
            if self.shared.remaining.load(Ordering::Acquire) == 0 {
                break;
            }
            notified.await;
        }
        std::mem::take(&mut *self.shared.reports.lock())
    }
}

impl Arrival {
    pub fn arrive(mut self, report: ChannelReport) {
        self.shared.reports.lock().push(report);
        self.arrived = true;
        self.shared.count_down();
    }
}

impl Drop for Arrival {
    fn drop(&mut self) {
        if !self.arrived {
            tracing::warn!("barrier participant dropped without reporting");
            self.shared.count_down();
        }
    }
}
