//! The order lifecycle state machine: commit → reveal → settle → claim.
//!
//! One orchestrator instance exists per session (account + network).
//! All of its mutable state (the pending-reveal queue, the
//! `submitting`/`revealing` guards, the retry counter) lives on the
//! instance and is torn down by [`Orchestrator::reset_session`] when
//! the account or network switches, so one account's pending
//! commitments can never leak into another account's reveal pass.

use std::{collections::HashMap, sync::Arc};

use curve25519_dalek::scalar::Scalar;
use rand_core::{CryptoRng, RngCore};
use sha3::{Digest, Sha3_256};

use crate::{
    balances::BalanceClient,
    epoch::{EpochInfo, EpochPhase, EpochTracker},
    errors::{Error, Result},
    ledger::{
        ClaimFillTx, CommitOrderTx, EpochClearing, Ledger, LedgerEvent, LedgerOrderStatus,
        LedgerRead, LedgerWrite, RevealOrderTx,
    },
    order::{fixed_mul, AssetPair, NoteStatus, NoteStore, OrderNote, Side},
    proofs::{ensure_sound, BalanceProof},
    Balance, ElgamalKeys, EpochId, OrderId, TraderAddress,
};

/// Maximum number of reveal passes attempted before the queue halts.
pub const MAX_REVEAL_ATTEMPTS: u8 = 3;

/// Where the orchestrator is in the order lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    Building,
    Committing,
    WaitingReveal,
    Revealing,
    WaitingSettle,
    Settling,
    Settled,
    Cancelled,
    Expired,
    Error,
}

impl FlowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Settled | Self::Cancelled | Self::Expired)
    }
}

/// An order waiting for its reveal window.
#[derive(Debug, Clone)]
struct PendingReveal {
    note: OrderNote,
    salt: [u8; 32],
}

pub struct Orchestrator {
    ledger: Arc<dyn Ledger>,
    notes: Arc<dyn NoteStore>,
    keys: ElgamalKeys,
    trader: TraderAddress,
    pub epochs: EpochTracker,
    pub balances: BalanceClient,

    state: FlowState,
    /// Guards one in-flight submission; does not block unrelated calls.
    submitting: bool,
    /// Guards one in-flight auto-reveal pass.
    revealing: bool,
    pending_reveals: HashMap<OrderId, PendingReveal>,
    reveal_attempts: u8,
    last_error: Option<String>,
}

impl Orchestrator {
    pub fn new<L>(
        ledger: Arc<L>,
        notes: Arc<dyn NoteStore>,
        keys: ElgamalKeys,
        trader: TraderAddress,
        assets: Vec<crate::AssetId>,
    ) -> Self
    where
        L: Ledger + 'static,
    {
        let read: Arc<dyn LedgerRead> = ledger.clone();
        let full: Arc<dyn Ledger> = ledger;
        Self {
            epochs: EpochTracker::new(read),
            balances: BalanceClient::new(full.clone(), keys.clone(), trader, assets),
            ledger: full,
            notes,
            keys,
            trader,
            state: FlowState::Idle,
            submitting: false,
            revealing: false,
            pending_reveals: HashMap::new(),
            reveal_attempts: 0,
            last_error: None,
        }
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    /// The last surfaced error message, if the state machine is in
    /// `Error`.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn pending_reveal_count(&self) -> usize {
        self.pending_reveals.len()
    }

    /// Synchronously clear every piece of per-session state.
    ///
    /// Must be called on account or network switch before the instance
    /// is reused.
    pub fn reset_session(&mut self) {
        self.pending_reveals.clear();
        self.submitting = false;
        self.revealing = false;
        self.reveal_attempts = 0;
        self.last_error = None;
        self.state = FlowState::Idle;
        log::info!("session reset: reveal queue and guards cleared");
    }

    fn fail(&mut self, err: Error) -> Error {
        log::warn!("orchestrator entering error state: {err}");
        self.last_error = Some(err.to_string());
        self.state = FlowState::Error;
        err
    }

    /// Submit a hidden order during the COMMIT phase.
    ///
    /// Reads the phase fresh from the ledger (a cached phase never
    /// gates a commit), proves balance sufficiency for the give asset,
    /// submits the commitment, and queues the order for auto-reveal in
    /// its own epoch.
    pub async fn submit_order<R: RngCore + CryptoRng>(
        &mut self,
        price: Balance,
        amount: Balance,
        side: Side,
        pair: AssetPair,
        rng: &mut R,
    ) -> Result<OrderId> {
        ensure!(!self.submitting, Error::SubmissionInProgress);
        if price == 0 || amount == 0 {
            return Err(Error::InvalidAmount);
        }

        self.submitting = true;
        let result = self.submit_order_inner(price, amount, side, pair, rng).await;
        self.submitting = false;

        match result {
            Ok(order_id) => Ok(order_id),
            // Validation errors report immediately without corrupting
            // the lifecycle state.
            Err(
                err @ (Error::WrongPhase { .. }
                | Error::EpochUnknown
                | Error::NotEnoughFund { .. }
                | Error::BalanceNotDecrypted { .. }
                | Error::InvalidAmount),
            ) => {
                if matches!(self.state, FlowState::Building | FlowState::Committing) {
                    self.state = FlowState::Idle;
                }
                Err(err)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    async fn submit_order_inner<R: RngCore + CryptoRng>(
        &mut self,
        price: Balance,
        amount: Balance,
        side: Side,
        pair: AssetPair,
        rng: &mut R,
    ) -> Result<OrderId> {
        // Phase gating is mandatory and must use a fresh read.
        let epoch = self.epochs.refresh().await.ok_or(Error::EpochUnknown)?;
        ensure!(epoch.from_contract, Error::EpochUnknown);
        ensure!(
            epoch.phase == EpochPhase::Commit,
            Error::WrongPhase {
                expected: EpochPhase::Commit.as_str(),
                actual: epoch.phase.as_str(),
            }
        );

        self.state = FlowState::Building;

        // The buyer spends the give asset: amount * price for buys, the
        // raw amount for sells.
        let spend = match side {
            Side::Buy => fixed_mul(amount, price)?,
            Side::Sell => amount,
        };
        let give_balance = self
            .balances
            .decrypted(pair.give)
            .ok_or(Error::BalanceNotDecrypted { asset_id: pair.give })?;

        // Bound to (trader, give asset): not replayable by another
        // account or against another asset.
        let proof = BalanceProof::prove(
            &self.keys,
            &self.trader,
            pair.give,
            give_balance,
            spend,
            rng,
        )?;
        // Soundness gate before any network call.
        ensure_sound(&proof.challenge())?;

        let salt = random_salt(rng);
        let commitment = order_commitment(&self.trader, side, &pair, price, amount, &salt);

        self.state = FlowState::Committing;
        let receipt = self
            .ledger
            .submit_commit(CommitOrderTx {
                trader: self.trader,
                commitment,
                give_asset: pair.give,
                proof,
            })
            .await?;
        let order_id = receipt.order_id()?;

        let note = OrderNote {
            order_id,
            owner: self.trader,
            side,
            pair,
            price,
            amount,
            // Fixed at commit time; reveals in any other epoch expire.
            epoch: epoch.epoch,
            status: NoteStatus::Committed,
            commit_tx: Some(receipt.tx_ref.0.clone()),
            reveal_tx: None,
            fill_amount: None,
            clearing_price: None,
        };
        self.notes.put(note.clone());
        self.pending_reveals
            .insert(order_id, PendingReveal { note, salt });

        log::info!(
            "order {order_id} committed in epoch {} ({side} {amount} @ {price})",
            epoch.epoch
        );
        self.state = FlowState::WaitingReveal;
        Ok(order_id)
    }

    /// Drive the state machine from a fresh epoch view.
    ///
    /// Invoked by the polling session on every tick; fires the
    /// auto-reveal pass when the reveal window opens. A stale view
    /// (one the tracker fell back to after a failed read) never fires
    /// a pass: the chain may already be past the window, and a doomed
    /// pass would burn the bounded retries.
    pub async fn on_epoch_tick(&mut self, info: EpochInfo) -> Result<()> {
        if info.from_contract
            && info.phase == EpochPhase::Reveal
            && !self.pending_reveals.is_empty()
            && self.state == FlowState::WaitingReveal
            && !self.revealing
        {
            self.auto_reveal(info.epoch).await?;
        }
        Ok(())
    }

    /// Reveal every queued order whose epoch matches `current_epoch`.
    ///
    /// Entries from other epochs missed their window and are expired,
    /// never revealed late. Failures return the pass to `WaitingReveal`
    /// for the next tick, up to [`MAX_REVEAL_ATTEMPTS`].
    async fn auto_reveal(&mut self, current_epoch: EpochId) -> Result<()> {
        self.revealing = true;
        self.state = FlowState::Revealing;

        // Expire stale commitments first.
        let stale: Vec<OrderId> = self
            .pending_reveals
            .iter()
            .filter(|(_, pending)| pending.note.epoch != current_epoch)
            .map(|(id, _)| *id)
            .collect();
        for order_id in stale {
            self.pending_reveals.remove(&order_id);
            self.notes
                .set_status(&self.trader, order_id, NoteStatus::Expired);
            log::warn!("order {order_id} missed its reveal window; marked expired");
        }

        let mut queued: Vec<OrderId> = self.pending_reveals.keys().copied().collect();
        queued.sort_unstable();

        for order_id in queued {
            let pending = match self.pending_reveals.get(&order_id) {
                Some(pending) => pending.clone(),
                None => continue,
            };
            let tx = RevealOrderTx {
                order_id,
                side: pending.note.side,
                give_asset: pending.note.pair.give,
                want_asset: pending.note.pair.want,
                price: pending.note.price,
                amount: pending.note.amount,
                salt: pending.salt,
            };
            match self.ledger.submit_reveal(tx).await {
                Ok(receipt) => {
                    self.pending_reveals.remove(&order_id);
                    self.notes.update(&self.trader, order_id, &mut |note| {
                        note.status = NoteStatus::Revealed;
                        note.reveal_tx = Some(receipt.tx_ref.0.clone());
                    });
                    log::info!("order {order_id} revealed");
                }
                Err(err) => {
                    self.revealing = false;
                    self.reveal_attempts += 1;
                    if self.reveal_attempts >= MAX_REVEAL_ATTEMPTS {
                        let attempts = self.reveal_attempts;
                        self.reveal_attempts = 0;
                        return Err(self.fail(Error::RevealRetriesExhausted { attempts }));
                    }
                    log::warn!(
                        "reveal of order {order_id} failed (attempt {}/{}): {err}",
                        self.reveal_attempts,
                        MAX_REVEAL_ATTEMPTS
                    );
                    // Back to waiting; the next poll tick retries.
                    self.state = FlowState::WaitingReveal;
                    return Ok(());
                }
            }
        }

        self.revealing = false;
        self.reveal_attempts = 0;
        self.state = FlowState::WaitingSettle;
        Ok(())
    }

    /// Cancel a not-yet-filled order.
    pub async fn cancel_order(&mut self, order_id: OrderId) -> Result<()> {
        let note = self
            .notes
            .get(&self.trader, order_id)
            .ok_or(Error::UnknownOrder { order_id })?;
        ensure!(
            matches!(note.status, NoteStatus::Committed | NoteStatus::Revealed),
            Error::NotCancellable { order_id }
        );

        self.ledger.submit_cancel(order_id).await?;
        self.pending_reveals.remove(&order_id);
        self.notes
            .set_status(&self.trader, order_id, NoteStatus::Cancelled);
        if self.pending_reveals.is_empty() && self.state == FlowState::WaitingReveal {
            self.state = FlowState::Cancelled;
        }
        log::info!("order {order_id} cancelled");
        Ok(())
    }

    /// Trigger settlement of a closed epoch. Permissionless: any
    /// participant may call this.
    pub async fn settle_epoch(&mut self, epoch: EpochId) -> Result<EpochClearing> {
        self.state = FlowState::Settling;
        let receipt = match self.ledger.submit_settle(epoch).await {
            Ok(receipt) => receipt,
            Err(err) => return Err(self.fail(err)),
        };
        for event in receipt.events() {
            if let LedgerEvent::EpochSettled { epoch, num_fills } = event {
                log::info!("epoch {epoch} settled with {num_fills} fills");
            }
        }

        let clearing = self
            .epochs
            .clearing_or_fetch(epoch)
            .await?
            .ok_or(Error::NoEpochResult { epoch })?;

        // Settlement can move balances; bring the local view back in
        // sync.
        self.balances.refresh_balances().await;
        self.state = FlowState::Settled;
        Ok(clearing)
    }

    /// Pull a settled fill into the encrypted balances.
    ///
    /// Computes the received want-asset amount and the spent give-asset
    /// amount at the epoch's clearing price, re-encrypts both balances
    /// with fresh randomness and fresh hints, and submits the claim.
    /// An "already claimed" response from the ledger is a successful,
    /// idempotent outcome.
    pub async fn claim_fill<R: RngCore + CryptoRng>(
        &mut self,
        order_id: OrderId,
        rng: &mut R,
    ) -> Result<()> {
        let note = self
            .notes
            .get(&self.trader, order_id)
            .ok_or(Error::UnknownOrder { order_id })?;

        if note.status == NoteStatus::Claimed {
            // Nothing to do; stay idempotent locally as well.
            return Ok(());
        }

        let view = self.ledger.order(order_id).await?;
        ensure!(
            matches!(
                view.status,
                LedgerOrderStatus::Filled | LedgerOrderStatus::PartialFill
            ),
            Error::NotClaimable { order_id }
        );

        let clearing = self
            .epochs
            .clearing_or_fetch(note.epoch)
            .await?
            .ok_or(Error::NoEpochResult { epoch: note.epoch })?;

        // A buyer spends fill * clearing price of the quote asset and
        // receives the fill; a seller spends the fill and receives
        // fill * clearing price.
        let scaled = fixed_mul(view.fill_amount, clearing.clearing_price)?;
        let (receive, spend) = match note.side {
            Side::Buy => (view.fill_amount, scaled),
            Side::Sell => (scaled, view.fill_amount),
        };

        let give_balance = self
            .balances
            .decrypted(note.pair.give)
            .ok_or(Error::BalanceNotDecrypted { asset_id: note.pair.give })?;
        ensure!(
            give_balance >= spend,
            Error::NotEnoughFund {
                balance: give_balance,
                amount: spend
            }
        );
        let want_balance = self.balances.decrypted(note.pair.want).unwrap_or(0);

        // Fresh randomness and fresh hints for both resulting balances;
        // previous ciphertext randomness is never reused.
        let (_, new_give_balance, give_hint) = self
            .keys
            .public
            .encrypt_amount_with_hint(give_balance - spend, rng);
        let (_, new_want_balance, want_hint) = self
            .keys
            .public
            .encrypt_amount_with_hint(want_balance + receive, rng);

        let claim = ClaimFillTx {
            order_id,
            trader: self.trader,
            new_give_balance,
            give_hint,
            new_want_balance,
            want_hint,
        };

        match self.ledger.submit_claim(claim).await {
            Ok(_) => {
                // Our replacement ciphertexts landed; keep their hints
                // even if the ledger drops them.
                self.balances.cache_hint(note.pair.give, give_hint);
                self.balances.cache_hint(note.pair.want, want_hint);
            }
            Err(Error::Submission(msg)) if is_already_claimed(&msg) => {
                log::info!("order {order_id} was already claimed; treating as success");
            }
            Err(err) => return Err(err),
        }

        self.notes.update(&self.trader, order_id, &mut |n| {
            n.status = NoteStatus::Claimed;
            n.fill_amount = Some(view.fill_amount);
            n.clearing_price = Some(clearing.clearing_price);
        });
        self.balances.refresh_balances().await;
        log::info!(
            "order {order_id} claimed: received {receive}, spent {spend} at clearing price {}",
            clearing.clearing_price
        );
        Ok(())
    }
}

/// Recognize the ledger's "already claimed" rejection by message
/// inspection.
fn is_already_claimed(msg: &str) -> bool {
    msg.to_ascii_lowercase().contains("already claimed")
}

fn random_salt<R: RngCore + CryptoRng>(rng: &mut R) -> [u8; 32] {
    // A scalar's canonical bytes double as the commitment salt.
    Scalar::random(rng).to_bytes()
}

/// Commitment hash hiding the order until reveal.
pub fn order_commitment(
    trader: &TraderAddress,
    side: Side,
    pair: &AssetPair,
    price: Balance,
    amount: Balance,
    salt: &[u8; 32],
) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(b"DarkPoolOrderCommitV1");
    hasher.update(trader.as_bytes());
    hasher.update([match side {
        Side::Buy => 0u8,
        Side::Sell => 1u8,
    }]);
    hasher.update(pair.give.to_le_bytes());
    hasher.update(pair.want.to_le_bytes());
    hasher.update(price.to_le_bytes());
    hasher.update(amount.to_le_bytes());
    hasher.update(salt);
    hasher.finalize().into()
}
