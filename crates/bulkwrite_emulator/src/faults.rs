//! Deterministic fault injection.

use crate::config::FaultConfig;
use bulkwrite_protocol::{EntryStatus, Status, StatusCode};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

/// What happens to one entry of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryFault {
    /// Applied and confirmed.
    None,
    /// Rejected with a transient status; not applied.
    Transient,
    /// Applied, but reported with a transient status.
    LostAck,
    /// Rejected with a permanent status; not applied.
    Permanent,
}

impl EntryFault {
    /// Whether the entry is written to the table.
    pub fn applies(&self) -> bool {
        matches!(self, EntryFault::None | EntryFault::LostAck)
    }

    /// The status reported for a faulted entry, if any.
    pub fn status(&self) -> Option<Status> {
        match self {
            EntryFault::None => None,
            EntryFault::Transient => Some(Status::unavailable("injected transient failure")),
            EntryFault::LostAck => Some(Status::new(
                StatusCode::DeadlineExceeded,
                "injected lost acknowledgement",
            )),
            EntryFault::Permanent => Some(Status::new(
                StatusCode::FailedPrecondition,
                "injected permanent failure",
            )),
        }
    }
}

/// Draws faults from a seeded RNG.
pub struct FaultInjector {
    config: FaultConfig,
    rng: StdRng,
    call_failures: VecDeque<Status>,
}

impl FaultInjector {
    /// Creates an injector for `config`.
    pub fn new(config: FaultConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            call_failures: config.call_failures.iter().cloned().collect(),
            config,
        }
    }

    /// Returns the next scripted call failure, if any are left.
    pub fn next_call_failure(&mut self) -> Option<Status> {
        self.call_failures.pop_front()
    }

    /// Draws the fault for one entry.
    pub fn entry_fault(&mut self) -> EntryFault {
        if self.config.transient_rate == 0.0
            && self.config.lost_ack_rate == 0.0
            && self.config.permanent_rate == 0.0
        {
            return EntryFault::None;
        }
        let roll: f64 = self.rng.gen();
        let mut threshold = self.config.transient_rate;
        if roll < threshold {
            return EntryFault::Transient;
        }
        threshold += self.config.lost_ack_rate;
        if roll < threshold {
            return EntryFault::LostAck;
        }
        threshold += self.config.permanent_rate;
        if roll < threshold {
            return EntryFault::Permanent;
        }
        EntryFault::None
    }

    /// Decides whether a call over `entries` entries is cut short, and if so
    /// how many entry statuses are delivered before the cut.
    pub fn truncation(&mut self, entries: usize) -> Option<usize> {
        if entries == 0 || self.config.truncate_rate == 0.0 {
            return None;
        }
        if !self.rng.gen_bool(self.config.truncate_rate.clamp(0.0, 1.0)) {
            return None;
        }
        Some(self.rng.gen_range(0..entries))
    }

    /// Reorders `statuses` when shuffling is enabled.
    pub fn reorder(&mut self, statuses: &mut [EntryStatus]) {
        if self.config.shuffle {
            statuses.shuffle(&mut self.rng);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_config_never_faults() {
        let mut injector = FaultInjector::new(FaultConfig::default());
        for _ in 0..100 {
            assert_eq!(injector.entry_fault(), EntryFault::None);
        }
        assert!(injector.truncation(10).is_none());
        assert!(injector.next_call_failure().is_none());
    }

    #[test]
    fn certain_faults_always_fire() {
        let mut injector = FaultInjector::new(FaultConfig::seeded(1).with_transient_rate(1.0));
        assert!((0..50).all(|_| injector.entry_fault() == EntryFault::Transient));

        let mut injector = FaultInjector::new(FaultConfig::seeded(1).with_truncate_rate(1.0));
        for _ in 0..50 {
            let cut = injector.truncation(5).unwrap();
            assert!(cut < 5);
        }
        assert!(injector.truncation(0).is_none());
    }

    #[test]
    fn same_seed_same_faults() {
        let config = FaultConfig::seeded(42)
            .with_transient_rate(0.3)
            .with_lost_ack_rate(0.2)
            .with_permanent_rate(0.1);
        let mut a = FaultInjector::new(config.clone());
        let mut b = FaultInjector::new(config);
        let left: Vec<EntryFault> = (0..200).map(|_| a.entry_fault()).collect();
        let right: Vec<EntryFault> = (0..200).map(|_| b.entry_fault()).collect();
        assert_eq!(left, right);
        assert!(left.contains(&EntryFault::Transient));
        assert!(left.contains(&EntryFault::None));
    }

    #[test]
    fn scripted_call_failures_in_order() {
        let mut injector = FaultInjector::new(
            FaultConfig::default()
                .with_call_failure(Status::unavailable("one"))
                .with_call_failure(Status::unavailable("two")),
        );
        assert_eq!(injector.next_call_failure().unwrap().message, "one");
        assert_eq!(injector.next_call_failure().unwrap().message, "two");
        assert!(injector.next_call_failure().is_none());
    }

    #[test]
    fn fault_semantics() {
        assert!(EntryFault::None.applies());
        assert!(EntryFault::LostAck.applies());
        assert!(!EntryFault::Transient.applies());
        assert!(!EntryFault::Permanent.applies());
        assert!(EntryFault::None.status().is_none());
        assert_eq!(
            EntryFault::LostAck.status().unwrap().code,
            StatusCode::DeadlineExceeded
        );
    }

    #[test]
    fn shuffle_keeps_entries() {
        let mut injector = FaultInjector::new(FaultConfig::seeded(3).with_shuffle());
        let mut statuses: Vec<EntryStatus> =
            (0..20).map(|i| EntryStatus::new(i, Status::ok())).collect();
        injector.reorder(&mut statuses);
        let mut indices: Vec<i64> = statuses.iter().map(|s| s.index).collect();
        indices.sort_unstable();
        assert_eq!(indices, (0..20).collect::<Vec<_>>());
    }
}
