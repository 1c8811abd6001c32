//! Test helpers: key generation, an in-memory note store and a
//! scriptable mock ledger.

use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use rand_core::{CryptoRng, RngCore};

use crate::{
    elgamal::{CipherText, CipherTextHint},
    epoch::EpochPhase,
    errors::{Error, Result},
    ledger::{
        ClaimFillTx, CommitOrderTx, DepositTx, EpochClearing, EpochView, LedgerOrderStatus,
        LedgerRead, LedgerWrite, OrderView, RawEvent, RevealOrderTx, TxReceipt, TxRef, WithdrawTx,
    },
    order::{NoteStore, OrderNote},
    AssetId, Balance, ElgamalKeys, ElgamalSecretKey, EpochId, OrderId, TraderAddress,
};

/// Generate a fresh ElGamal key pair.
pub fn gen_keys<R: RngCore + CryptoRng>(rng: &mut R) -> ElgamalKeys {
    ElgamalKeys::from_secret(ElgamalSecretKey::random(rng))
}

/// In-memory [`NoteStore`].
#[derive(Default)]
pub struct MemoryNoteStore {
    notes: Mutex<HashMap<(TraderAddress, OrderId), OrderNote>>,
}

impl NoteStore for MemoryNoteStore {
    fn put(&self, note: OrderNote) {
        self.notes
            .lock()
            .unwrap()
            .insert((note.owner, note.order_id), note);
    }

    fn get(&self, owner: &TraderAddress, order_id: OrderId) -> Option<OrderNote> {
        self.notes.lock().unwrap().get(&(*owner, order_id)).cloned()
    }

    fn all(&self, owner: &TraderAddress) -> Vec<OrderNote> {
        let mut notes: Vec<OrderNote> = self
            .notes
            .lock()
            .unwrap()
            .values()
            .filter(|note| note.owner == *owner)
            .cloned()
            .collect();
        notes.sort_by_key(|note| note.order_id);
        notes
    }

    fn update(&self, owner: &TraderAddress, order_id: OrderId, f: &mut dyn FnMut(&mut OrderNote)) {
        if let Some(note) = self.notes.lock().unwrap().get_mut(&(*owner, order_id)) {
            f(note);
        }
    }
}

/// Scriptable state behind [`MockLedger`].
pub struct MockLedgerState {
    pub epoch: EpochView,
    pub balances: HashMap<(TraderAddress, AssetId), CipherText>,
    pub hints: HashMap<(TraderAddress, AssetId), CipherTextHint>,
    pub orders: HashMap<OrderId, OrderView>,
    pub results: HashMap<EpochId, EpochClearing>,
    pub claimed: HashSet<OrderId>,
    pub commits: Vec<CommitOrderTx>,
    pub reveals: Vec<RevealOrderTx>,
    pub withdraws: Vec<WithdrawTx>,
    next_order_id: OrderId,
    next_tx: u64,
    /// Number of upcoming reveal submissions to reject.
    pub reveal_failures: u8,
    /// Make `epoch()` reads fail, simulating a flaky RPC.
    pub fail_epoch_reads: bool,
    /// Make `epoch_result()` reads fail, simulating a flaky RPC.
    pub fail_result_reads: bool,
    /// Drop submitted hints, simulating a ledger that does not persist
    /// them.
    pub persist_hints: bool,
    /// Emit commit receipts without the `OrderCommitted` event.
    pub omit_commit_event: bool,
}

impl Default for MockLedgerState {
    fn default() -> Self {
        Self {
            epoch: EpochView {
                epoch: 1,
                phase: EpochPhase::Commit,
                blocks_remaining: 10,
            },
            balances: HashMap::new(),
            hints: HashMap::new(),
            orders: HashMap::new(),
            results: HashMap::new(),
            claimed: HashSet::new(),
            commits: Vec::new(),
            reveals: Vec::new(),
            withdraws: Vec::new(),
            next_order_id: 1,
            next_tx: 1,
            reveal_failures: 0,
            fail_epoch_reads: false,
            fail_result_reads: false,
            persist_hints: true,
            omit_commit_event: false,
        }
    }
}

impl MockLedgerState {
    fn next_tx_ref(&mut self) -> TxRef {
        let n = self.next_tx;
        self.next_tx += 1;
        TxRef(format!("0xtx{n}"))
    }

    fn receipt(&mut self, events: Vec<RawEvent>) -> TxReceipt {
        TxReceipt {
            tx_ref: self.next_tx_ref(),
            events,
        }
    }
}

/// In-memory ledger implementing both halves of the contract
/// interface, with knobs for failure injection.
#[derive(Default)]
pub struct MockLedger {
    state: Mutex<MockLedgerState>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MockLedgerState> {
        self.state.lock().unwrap()
    }

    pub fn set_phase(&self, epoch: EpochId, phase: EpochPhase) {
        let mut state = self.state();
        state.epoch = EpochView {
            epoch,
            phase,
            blocks_remaining: 10,
        };
    }

    /// Record an epoch's settlement result.
    pub fn settle_with(&self, epoch: EpochId, clearing: EpochClearing) {
        self.state().results.insert(epoch, clearing);
    }

    /// Mark an order filled for `fill_amount`.
    pub fn fill_order(&self, order_id: OrderId, fill_amount: Balance) {
        if let Some(order) = self.state().orders.get_mut(&order_id) {
            order.status = LedgerOrderStatus::Filled;
            order.fill_amount = fill_amount;
        }
    }

    /// Seed an account balance with a ciphertext and a matching hint.
    pub fn seed_balance(
        &self,
        trader: TraderAddress,
        asset_id: AssetId,
        cipher: CipherText,
        hint: CipherTextHint,
    ) {
        let mut state = self.state();
        state.balances.insert((trader, asset_id), cipher);
        state.hints.insert((trader, asset_id), hint);
    }
}

#[async_trait]
impl LedgerRead for MockLedger {
    async fn epoch(&self) -> Result<EpochView> {
        let state = self.state();
        if state.fail_epoch_reads {
            return Err(Error::LedgerRead("epoch read failed".into()));
        }
        Ok(state.epoch)
    }

    async fn epoch_result(&self, epoch: EpochId) -> Result<Option<EpochClearing>> {
        let state = self.state();
        if state.fail_result_reads {
            return Err(Error::LedgerRead("epoch result read failed".into()));
        }
        Ok(state.results.get(&epoch).copied())
    }

    async fn encrypted_balance(
        &self,
        owner: &TraderAddress,
        asset_id: AssetId,
    ) -> Result<CipherText> {
        Ok(self
            .state()
            .balances
            .get(&(*owner, asset_id))
            .copied()
            .unwrap_or_else(CipherText::zero))
    }

    async fn balance_hint(
        &self,
        owner: &TraderAddress,
        asset_id: AssetId,
    ) -> Result<Option<CipherTextHint>> {
        let state = self.state();
        if !state.persist_hints {
            return Ok(None);
        }
        Ok(state.hints.get(&(*owner, asset_id)).copied())
    }

    async fn order(&self, order_id: OrderId) -> Result<OrderView> {
        self.state()
            .orders
            .get(&order_id)
            .copied()
            .ok_or(Error::UnknownOrder { order_id })
    }

    async fn is_order_claimed(&self, order_id: OrderId) -> Result<bool> {
        Ok(self.state().claimed.contains(&order_id))
    }
}

#[async_trait]
impl LedgerWrite for MockLedger {
    async fn submit_commit(&self, tx: CommitOrderTx) -> Result<TxReceipt> {
        let mut state = self.state();
        let order_id = state.next_order_id;
        state.next_order_id += 1;
        let epoch = state.epoch.epoch;
        state.orders.insert(
            order_id,
            OrderView {
                status: LedgerOrderStatus::Committed,
                fill_amount: 0,
                epoch,
                give_asset: tx.give_asset,
                want_asset: 0,
            },
        );
        state.commits.push(tx);
        let events = if state.omit_commit_event {
            vec![]
        } else {
            vec![RawEvent {
                kind: "OrderCommitted".into(),
                data: vec![order_id, epoch],
            }]
        };
        Ok(state.receipt(events))
    }

    async fn submit_reveal(&self, tx: RevealOrderTx) -> Result<TxReceipt> {
        let mut state = self.state();
        if state.reveal_failures > 0 {
            state.reveal_failures -= 1;
            return Err(Error::Submission("reveal rejected".into()));
        }
        let order_id = tx.order_id;
        if let Some(order) = state.orders.get_mut(&order_id) {
            order.status = LedgerOrderStatus::Revealed;
            order.want_asset = tx.want_asset;
        }
        state.reveals.push(tx);
        let events = vec![RawEvent {
            kind: "OrderRevealed".into(),
            data: vec![order_id],
        }];
        Ok(state.receipt(events))
    }

    async fn submit_cancel(&self, order_id: OrderId) -> Result<TxReceipt> {
        let mut state = self.state();
        if let Some(order) = state.orders.get_mut(&order_id) {
            order.status = LedgerOrderStatus::Cancelled;
        }
        let events = vec![RawEvent {
            kind: "OrderCancelled".into(),
            data: vec![order_id],
        }];
        Ok(state.receipt(events))
    }

    async fn submit_settle(&self, epoch: EpochId) -> Result<TxReceipt> {
        let mut state = self.state();
        let num_fills = state
            .results
            .get(&epoch)
            .map(|clearing| clearing.num_fills as u64)
            .unwrap_or(0);
        let events = vec![RawEvent {
            kind: "EpochSettled".into(),
            data: vec![epoch, num_fills],
        }];
        Ok(state.receipt(events))
    }

    async fn submit_claim(&self, tx: ClaimFillTx) -> Result<TxReceipt> {
        let mut state = self.state();
        if state.claimed.contains(&tx.order_id) {
            return Err(Error::Submission(format!(
                "order {} already claimed",
                tx.order_id
            )));
        }
        let (give_asset, want_asset) = match state.orders.get(&tx.order_id) {
            Some(order) => (order.give_asset, order.want_asset),
            None => {
                return Err(Error::Submission(format!("unknown order {}", tx.order_id)))
            }
        };
        state.claimed.insert(tx.order_id);
        state
            .balances
            .insert((tx.trader, give_asset), tx.new_give_balance);
        state.hints.insert((tx.trader, give_asset), tx.give_hint);
        state
            .balances
            .insert((tx.trader, want_asset), tx.new_want_balance);
        state.hints.insert((tx.trader, want_asset), tx.want_hint);
        let events = vec![RawEvent {
            kind: "FillClaimed".into(),
            data: vec![tx.order_id, 1],
        }];
        Ok(state.receipt(events))
    }

    async fn submit_deposit(&self, tx: DepositTx) -> Result<TxReceipt> {
        let mut state = self.state();
        let key = (tx.trader, tx.asset_id);
        let balance = state
            .balances
            .get(&key)
            .map(|cipher| *cipher + tx.encrypted_amount)
            .unwrap_or(tx.encrypted_amount);
        state.balances.insert(key, balance);
        // The deposit hint only matches when it was the first deposit;
        // a stale hint simply fails authentication on refresh.
        state.hints.insert(key, tx.hint);
        let events = vec![RawEvent {
            kind: "Deposited".into(),
            data: vec![tx.asset_id as u64],
        }];
        Ok(state.receipt(events))
    }

    async fn submit_withdraw(&self, tx: WithdrawTx) -> Result<TxReceipt> {
        let mut state = self.state();
        let key = (tx.trader, tx.asset_id);
        let balance = state
            .balances
            .get(&key)
            .copied()
            .unwrap_or_else(CipherText::zero);
        state.balances.insert(key, balance - tx.encrypted_amount);
        state.hints.insert(key, tx.new_balance_hint);
        let asset_id = tx.asset_id;
        state.withdraws.push(tx);
        let events = vec![RawEvent {
            kind: "Withdrawn".into(),
            data: vec![asset_id as u64],
        }];
        Ok(state.receipt(events))
    }
}
