//! Auction epoch phases and the client-side phase tracker.
//!
//! Each epoch cycles through four non-overlapping phases:
//! **COMMIT → REVEAL → SETTLE → CLOSED**
//!
//! During COMMIT, hidden order commitments are accepted. During REVEAL,
//! committed orders are opened. During SETTLE, the uniform clearing
//! price is computed and fills assigned. CLOSED epochs only accept
//! claims against their settlement result.

use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::{
    errors::Result,
    ledger::{EpochClearing, LedgerRead},
    EpochId,
};

/// Seconds per ledger block, used to derive wall-clock estimates from
/// a block count.
pub const BLOCK_TIME_SECS: u64 = 6;

/// The four non-overlapping phases of an auction epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EpochPhase {
    /// Accepting hidden order commitments.
    Commit,
    /// Accepting order reveals for this epoch's commitments.
    Reveal,
    /// Matching revealed orders at the uniform clearing price.
    Settle,
    /// Settled; only claims remain.
    Closed,
}

impl fmt::Display for EpochPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Commit => write!(f, "COMMIT"),
            Self::Reveal => write!(f, "REVEAL"),
            Self::Settle => write!(f, "SETTLE"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

impl EpochPhase {
    /// Return the next phase in the cycle. `Closed` wraps to `Commit`
    /// of the following epoch.
    #[must_use]
    pub fn next(self) -> Self {
        match self {
            Self::Commit => Self::Reveal,
            Self::Reveal => Self::Settle,
            Self::Settle => Self::Closed,
            Self::Closed => Self::Commit,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commit => "COMMIT",
            Self::Reveal => "REVEAL",
            Self::Settle => "SETTLE",
            Self::Closed => "CLOSED",
        }
    }
}

/// The client's view of the auction's current epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochInfo {
    pub epoch: EpochId,
    pub phase: EpochPhase,
    pub blocks_remaining: u64,
    pub seconds_remaining: u64,
    /// Whether this view came from a fresh ledger read. Derived or
    /// cached views must never gate correctness decisions such as
    /// whether to commit.
    pub from_contract: bool,
}

impl EpochInfo {
    /// Mark a cached copy of this view as stale.
    pub fn stale(mut self) -> Self {
        self.from_contract = false;
        self
    }
}

/// Polls the ledger's epoch view and caches per-epoch settlement
/// results as epochs roll over.
pub struct EpochTracker {
    ledger: Arc<dyn LedgerRead>,
    last: Option<EpochInfo>,
    results: HashMap<EpochId, EpochClearing>,
    /// Finished epochs whose settlement result has not been cached
    /// yet; retried on every refresh until a result lands.
    pending_results: BTreeSet<EpochId>,
}

impl EpochTracker {
    pub fn new(ledger: Arc<dyn LedgerRead>) -> Self {
        Self {
            ledger,
            last: None,
            results: HashMap::new(),
            pending_results: BTreeSet::new(),
        }
    }

    /// The last known epoch view, marked stale.
    ///
    /// `None` means "unknown", which callers must never treat as
    /// "closed".
    pub fn last_known(&self) -> Option<EpochInfo> {
        self.last.map(EpochInfo::stale)
    }

    /// A previously cached settlement result.
    pub fn clearing(&self, epoch: EpochId) -> Option<&EpochClearing> {
        self.results.get(&epoch)
    }

    /// Cache a settlement result read outside the polling loop (e.g.
    /// right after a `settle` transaction confirms).
    pub fn cache_clearing(&mut self, epoch: EpochId, clearing: EpochClearing) {
        self.results.entry(epoch).or_insert(clearing);
    }

    /// Read the epoch view fresh from the ledger.
    ///
    /// On a read failure the last known value is retained and returned
    /// (stale); the error is not raised. Every epoch the tracker
    /// observes finishing is queued for a settlement-result fetch, and
    /// the queue is retried on each refresh until the result is cached,
    /// so a failed or not-yet-available read is never silently dropped.
    pub async fn refresh(&mut self) -> Option<EpochInfo> {
        let view = match self.ledger.epoch().await {
            Ok(view) => view,
            Err(err) => {
                log::warn!("epoch refresh failed, keeping last known view: {err}");
                return self.last_known();
            }
        };

        let info = EpochInfo {
            epoch: view.epoch,
            phase: view.phase,
            blocks_remaining: view.blocks_remaining,
            seconds_remaining: view.blocks_remaining * BLOCK_TIME_SECS,
            from_contract: true,
        };

        if let Some(prev) = self.last {
            // The jump can skip epochs; every one that finished while
            // we were not looking owes us a settlement result.
            for epoch in prev.epoch..info.epoch {
                if !self.results.contains_key(&epoch) {
                    self.pending_results.insert(epoch);
                }
            }
        }
        self.fetch_pending_results().await;

        self.last = Some(info);
        Some(info)
    }

    async fn fetch_pending_results(&mut self) {
        let pending: Vec<EpochId> = self.pending_results.iter().copied().collect();
        for epoch in pending {
            match self.ledger.epoch_result(epoch).await {
                Ok(Some(clearing)) => {
                    log::debug!(
                        "cached settlement result for epoch {epoch} (clearing price {})",
                        clearing.clearing_price
                    );
                    self.results.insert(epoch, clearing);
                    self.pending_results.remove(&epoch);
                }
                // Not settled yet; keep asking.
                Ok(None) => {}
                Err(err) => {
                    log::warn!("failed to read result for epoch {epoch}: {err}");
                }
            }
        }
    }

    /// Fetch an epoch's settlement result, consulting the cache first.
    pub async fn clearing_or_fetch(&mut self, epoch: EpochId) -> Result<Option<EpochClearing>> {
        if let Some(clearing) = self.results.get(&epoch) {
            return Ok(Some(*clearing));
        }
        let clearing = self.ledger.epoch_result(epoch).await?;
        if let Some(clearing) = clearing {
            self.results.insert(epoch, clearing);
        }
        Ok(clearing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockLedger;

    fn clearing(price: crate::Balance) -> EpochClearing {
        EpochClearing {
            clearing_price: price,
            total_buy_filled: 0,
            total_sell_filled: 0,
            num_fills: 1,
        }
    }

    #[tokio::test]
    async fn result_fetch_retries_after_read_failure() {
        let ledger = Arc::new(MockLedger::new());
        let mut tracker = EpochTracker::new(ledger.clone());

        ledger.set_phase(5, EpochPhase::Commit);
        tracker.refresh().await;

        ledger.settle_with(5, clearing(21_000));
        ledger.state().fail_result_reads = true;
        ledger.set_phase(6, EpochPhase::Commit);

        // The rollover is observed but the result read fails; the epoch
        // must stay queued rather than be forgotten.
        tracker.refresh().await;
        assert!(tracker.clearing(5).is_none());

        ledger.state().fail_result_reads = false;
        tracker.refresh().await;
        assert_eq!(tracker.clearing(5).unwrap().clearing_price, 21_000);
    }

    #[tokio::test]
    async fn multi_epoch_jump_backfills_every_result() {
        let ledger = Arc::new(MockLedger::new());
        let mut tracker = EpochTracker::new(ledger.clone());

        ledger.set_phase(5, EpochPhase::Commit);
        tracker.refresh().await;

        for epoch in 5..8 {
            ledger.settle_with(epoch, clearing(10_000 + epoch));
        }
        ledger.set_phase(8, EpochPhase::Commit);
        tracker.refresh().await;

        for epoch in 5..8 {
            assert_eq!(
                tracker.clearing(epoch).unwrap().clearing_price,
                10_000 + epoch
            );
        }
    }

    #[tokio::test]
    async fn unsettled_epoch_result_stays_pending() {
        let ledger = Arc::new(MockLedger::new());
        let mut tracker = EpochTracker::new(ledger.clone());

        ledger.set_phase(3, EpochPhase::Settle);
        tracker.refresh().await;

        // Epoch rolls over before its settlement result lands.
        ledger.set_phase(4, EpochPhase::Commit);
        tracker.refresh().await;
        assert!(tracker.clearing(3).is_none());

        ledger.settle_with(3, clearing(9_999));
        tracker.refresh().await;
        assert_eq!(tracker.clearing(3).unwrap().clearing_price, 9_999);
    }

    #[test]
    fn epoch_phase_cycle() {
        assert_eq!(EpochPhase::Commit.next(), EpochPhase::Reveal);
        assert_eq!(EpochPhase::Reveal.next(), EpochPhase::Settle);
        assert_eq!(EpochPhase::Settle.next(), EpochPhase::Closed);
        assert_eq!(EpochPhase::Closed.next(), EpochPhase::Commit);
    }

    #[test]
    fn epoch_phase_display() {
        assert_eq!(format!("{}", EpochPhase::Commit), "COMMIT");
        assert_eq!(format!("{}", EpochPhase::Reveal), "REVEAL");
        assert_eq!(format!("{}", EpochPhase::Settle), "SETTLE");
        assert_eq!(format!("{}", EpochPhase::Closed), "CLOSED");
    }

    #[test]
    fn stale_copy_is_not_authoritative() {
        let info = EpochInfo {
            epoch: 5,
            phase: EpochPhase::Commit,
            blocks_remaining: 10,
            seconds_remaining: 60,
            from_contract: true,
        };
        assert!(!info.stale().from_contract);
    }
}
