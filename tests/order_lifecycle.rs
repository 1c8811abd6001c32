//! End-to-end order lifecycle against the mock ledger: commit during
//! COMMIT, auto-reveal during REVEAL, settle, claim at the uniform
//! clearing price.

use std::sync::Arc;

use rand::{rngs::StdRng, SeedableRng};

use darkpool_client::{
    epoch::EpochPhase,
    errors::Error,
    ledger::EpochClearing,
    orchestrator::{FlowState, Orchestrator},
    order::{to_fixed, AssetPair, NoteStatus, NoteStore, Side},
    testing::{gen_keys, MemoryNoteStore, MockLedger},
    TraderAddress,
};

const SEED: [u8; 32] = [7u8; 32];

// Quote asset given up by a buyer, base asset wanted.
const STRK: u32 = 1;
const ETH: u32 = 2;

fn setup() -> (Arc<MockLedger>, Arc<MemoryNoteStore>, Orchestrator, StdRng) {
    let mut rng = StdRng::from_seed(SEED);
    let ledger = Arc::new(MockLedger::new());
    let notes = Arc::new(MemoryNoteStore::default());
    let keys = gen_keys(&mut rng);
    let trader = TraderAddress::from([3u8; 32]);
    let orch = Orchestrator::new(
        ledger.clone(),
        notes.clone(),
        keys,
        trader,
        vec![STRK, ETH],
    );
    (ledger, notes, orch, rng)
}

async fn tick(orch: &mut Orchestrator) -> darkpool_client::Result<()> {
    let info = orch.epochs.refresh().await.expect("epoch view");
    orch.on_epoch_tick(info).await
}

#[tokio::test]
async fn full_lifecycle_commit_reveal_settle_claim() {
    let (ledger, notes, mut orch, mut rng) = setup();
    let trader = TraderAddress::from([3u8; 32]);

    // Fund the quote-asset balance: 1000.0000 STRK.
    ledger.set_phase(5, EpochPhase::Commit);
    orch.balances
        .deposit(STRK, to_fixed(1000), &mut rng)
        .await
        .unwrap();
    assert_eq!(orch.balances.decrypted(STRK), Some(to_fixed(1000)));

    // Commit: buy 2.0000 ETH at a limit of 100.0000 STRK/ETH.
    let order_id = orch
        .submit_order(
            to_fixed(100),
            to_fixed(2),
            Side::Buy,
            AssetPair::new(STRK, ETH),
            &mut rng,
        )
        .await
        .unwrap();
    assert_eq!(orch.state(), FlowState::WaitingReveal);
    let note = notes.get(&trader, order_id).unwrap();
    assert_eq!(note.status, NoteStatus::Committed);
    assert_eq!(note.epoch, 5);
    assert_eq!(ledger.state().commits.len(), 1);

    // Reveal window of the same epoch.
    ledger.set_phase(5, EpochPhase::Reveal);
    tick(&mut orch).await.unwrap();
    assert_eq!(orch.state(), FlowState::WaitingSettle);
    assert_eq!(ledger.state().reveals.len(), 1);
    assert_eq!(
        notes.get(&trader, order_id).unwrap().status,
        NoteStatus::Revealed
    );

    // Settlement clears at 105.0000.
    ledger.set_phase(5, EpochPhase::Settle);
    ledger.settle_with(
        5,
        EpochClearing {
            clearing_price: to_fixed(105),
            total_buy_filled: to_fixed(2),
            total_sell_filled: to_fixed(2),
            num_fills: 1,
        },
    );
    ledger.fill_order(order_id, to_fixed(2));
    let clearing = orch.settle_epoch(5).await.unwrap();
    assert_eq!(clearing.clearing_price, to_fixed(105));
    assert_eq!(orch.state(), FlowState::Settled);

    // Claim: spend 2.0000 * 105.0000 = 210.0000 STRK, receive 2.0000
    // ETH.
    ledger.set_phase(6, EpochPhase::Commit);
    orch.claim_fill(order_id, &mut rng).await.unwrap();

    let note = notes.get(&trader, order_id).unwrap();
    assert_eq!(note.status, NoteStatus::Claimed);
    assert_eq!(note.fill_amount, Some(to_fixed(2)));
    assert_eq!(note.clearing_price, Some(to_fixed(105)));

    assert_eq!(orch.balances.decrypted(STRK), Some(to_fixed(790)));
    assert_eq!(orch.balances.decrypted(ETH), Some(to_fixed(2)));
}

#[tokio::test]
async fn sell_side_claim_receives_the_quote_asset() {
    let (ledger, notes, mut orch, mut rng) = setup();
    let trader = TraderAddress::from([3u8; 32]);

    // A seller gives up the base asset.
    ledger.set_phase(5, EpochPhase::Commit);
    orch.balances
        .deposit(ETH, to_fixed(10), &mut rng)
        .await
        .unwrap();

    let order_id = orch
        .submit_order(
            to_fixed(100),
            to_fixed(2),
            Side::Sell,
            AssetPair::new(ETH, STRK),
            &mut rng,
        )
        .await
        .unwrap();

    ledger.set_phase(5, EpochPhase::Reveal);
    tick(&mut orch).await.unwrap();
    ledger.settle_with(
        5,
        EpochClearing {
            clearing_price: to_fixed(105),
            total_buy_filled: to_fixed(2),
            total_sell_filled: to_fixed(2),
            num_fills: 1,
        },
    );
    ledger.fill_order(order_id, to_fixed(2));
    orch.settle_epoch(5).await.unwrap();

    orch.claim_fill(order_id, &mut rng).await.unwrap();
    assert_eq!(
        notes.get(&trader, order_id).unwrap().status,
        NoteStatus::Claimed
    );

    // Spent 2.0000 ETH, received 2.0000 * 105.0000 = 210.0000 STRK.
    assert_eq!(orch.balances.decrypted(ETH), Some(to_fixed(8)));
    assert_eq!(orch.balances.decrypted(STRK), Some(to_fixed(210)));
}

#[tokio::test]
async fn commit_outside_commit_phase_is_rejected() {
    let (ledger, _notes, mut orch, mut rng) = setup();

    ledger.set_phase(5, EpochPhase::Commit);
    orch.balances
        .deposit(STRK, to_fixed(100), &mut rng)
        .await
        .unwrap();

    ledger.set_phase(5, EpochPhase::Reveal);
    let err = orch
        .submit_order(
            to_fixed(100),
            to_fixed(1),
            Side::Buy,
            AssetPair::new(STRK, ETH),
            &mut rng,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::WrongPhase {
            expected: "COMMIT",
            actual: "REVEAL"
        }
    ));
    // Nothing was submitted and the state machine is not poisoned.
    assert!(ledger.state().commits.is_empty());
    assert_ne!(orch.state(), FlowState::Error);
}

#[tokio::test]
async fn missed_reveal_window_expires_the_order() {
    let (ledger, notes, mut orch, mut rng) = setup();
    let trader = TraderAddress::from([3u8; 32]);

    ledger.set_phase(5, EpochPhase::Commit);
    orch.balances
        .deposit(STRK, to_fixed(1000), &mut rng)
        .await
        .unwrap();
    let order_id = orch
        .submit_order(
            to_fixed(100),
            to_fixed(2),
            Side::Buy,
            AssetPair::new(STRK, ETH),
            &mut rng,
        )
        .await
        .unwrap();

    // The reveal window the client sees is for the *next* epoch.
    ledger.set_phase(6, EpochPhase::Reveal);
    tick(&mut orch).await.unwrap();

    assert!(ledger.state().reveals.is_empty());
    assert_eq!(
        notes.get(&trader, order_id).unwrap().status,
        NoteStatus::Expired
    );
    assert_eq!(orch.pending_reveal_count(), 0);
}

#[tokio::test]
async fn reveal_retries_until_exhaustion() {
    let (ledger, _notes, mut orch, mut rng) = setup();

    ledger.set_phase(5, EpochPhase::Commit);
    orch.balances
        .deposit(STRK, to_fixed(1000), &mut rng)
        .await
        .unwrap();
    orch.submit_order(
        to_fixed(100),
        to_fixed(2),
        Side::Buy,
        AssetPair::new(STRK, ETH),
        &mut rng,
    )
    .await
    .unwrap();

    ledger.state().reveal_failures = 3;
    ledger.set_phase(5, EpochPhase::Reveal);

    // Two failed passes keep the order queued for the next tick.
    tick(&mut orch).await.unwrap();
    assert_eq!(orch.state(), FlowState::WaitingReveal);
    tick(&mut orch).await.unwrap();
    assert_eq!(orch.state(), FlowState::WaitingReveal);

    // The third failure halts the queue.
    let err = tick(&mut orch).await.unwrap_err();
    assert!(matches!(
        err,
        Error::RevealRetriesExhausted { attempts: 3 }
    ));
    assert_eq!(orch.state(), FlowState::Error);
    assert!(orch.last_error().is_some());
}

#[tokio::test]
async fn reveal_recovers_after_transient_failure() {
    let (ledger, _notes, mut orch, mut rng) = setup();

    ledger.set_phase(5, EpochPhase::Commit);
    orch.balances
        .deposit(STRK, to_fixed(1000), &mut rng)
        .await
        .unwrap();
    orch.submit_order(
        to_fixed(100),
        to_fixed(2),
        Side::Buy,
        AssetPair::new(STRK, ETH),
        &mut rng,
    )
    .await
    .unwrap();

    ledger.state().reveal_failures = 1;
    ledger.set_phase(5, EpochPhase::Reveal);

    tick(&mut orch).await.unwrap();
    assert_eq!(orch.state(), FlowState::WaitingReveal);
    assert_eq!(orch.pending_reveal_count(), 1);

    tick(&mut orch).await.unwrap();
    assert_eq!(orch.state(), FlowState::WaitingSettle);
    assert_eq!(ledger.state().reveals.len(), 1);
}

#[tokio::test]
async fn stale_epoch_view_never_triggers_reveals() {
    let (ledger, _notes, mut orch, mut rng) = setup();

    ledger.set_phase(5, EpochPhase::Commit);
    orch.balances
        .deposit(STRK, to_fixed(1000), &mut rng)
        .await
        .unwrap();
    orch.submit_order(
        to_fixed(100),
        to_fixed(2),
        Side::Buy,
        AssetPair::new(STRK, ETH),
        &mut rng,
    )
    .await
    .unwrap();

    // The tracker sees the reveal window once, then the RPC drops.
    ledger.set_phase(5, EpochPhase::Reveal);
    orch.epochs.refresh().await.unwrap();
    ledger.state().fail_epoch_reads = true;

    // Ticks driven by the cached view must not burn reveal attempts.
    tick(&mut orch).await.unwrap();
    tick(&mut orch).await.unwrap();
    assert!(ledger.state().reveals.is_empty());
    assert_eq!(orch.state(), FlowState::WaitingReveal);

    // A fresh read resumes the queue.
    ledger.state().fail_epoch_reads = false;
    tick(&mut orch).await.unwrap();
    assert_eq!(ledger.state().reveals.len(), 1);
    assert_eq!(orch.state(), FlowState::WaitingSettle);
}

#[tokio::test]
async fn lifecycle_survives_a_ledger_that_drops_hints() {
    let (ledger, _notes, mut orch, mut rng) = setup();
    ledger.state().persist_hints = false;

    ledger.set_phase(5, EpochPhase::Commit);
    orch.balances
        .deposit(STRK, to_fixed(1000), &mut rng)
        .await
        .unwrap();
    assert_eq!(orch.balances.decrypted(STRK), Some(to_fixed(1000)));

    let order_id = orch
        .submit_order(
            to_fixed(100),
            to_fixed(2),
            Side::Buy,
            AssetPair::new(STRK, ETH),
            &mut rng,
        )
        .await
        .unwrap();
    ledger.set_phase(5, EpochPhase::Reveal);
    tick(&mut orch).await.unwrap();
    ledger.settle_with(
        5,
        EpochClearing {
            clearing_price: to_fixed(105),
            total_buy_filled: to_fixed(2),
            total_sell_filled: to_fixed(2),
            num_fills: 1,
        },
    );
    ledger.fill_order(order_id, to_fixed(2));
    orch.settle_epoch(5).await.unwrap();

    ledger.set_phase(6, EpochPhase::Commit);
    orch.claim_fill(order_id, &mut rng).await.unwrap();

    // The quote balance moved far past the search window; only the
    // locally cached claim hint keeps it decryptable.
    assert_eq!(orch.balances.decrypted(STRK), Some(to_fixed(790)));
    assert_eq!(orch.balances.decrypted(ETH), Some(to_fixed(2)));
}

#[tokio::test]
async fn commit_receipt_without_order_id_is_a_hard_failure() {
    let (ledger, _notes, mut orch, mut rng) = setup();

    ledger.set_phase(5, EpochPhase::Commit);
    orch.balances
        .deposit(STRK, to_fixed(1000), &mut rng)
        .await
        .unwrap();
    ledger.state().omit_commit_event = true;

    let err = orch
        .submit_order(
            to_fixed(100),
            to_fixed(2),
            Side::Buy,
            AssetPair::new(STRK, ETH),
            &mut rng,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::OrderIdNotFound));
    assert_eq!(orch.state(), FlowState::Error);
    // No note was written for an id the contract never assigned.
    assert_eq!(orch.pending_reveal_count(), 0);
}

#[tokio::test]
async fn claim_is_idempotent_when_ledger_reports_already_claimed() {
    let (ledger, notes, mut orch, mut rng) = setup();
    let trader = TraderAddress::from([3u8; 32]);

    ledger.set_phase(5, EpochPhase::Commit);
    orch.balances
        .deposit(STRK, to_fixed(1000), &mut rng)
        .await
        .unwrap();
    let order_id = orch
        .submit_order(
            to_fixed(100),
            to_fixed(2),
            Side::Buy,
            AssetPair::new(STRK, ETH),
            &mut rng,
        )
        .await
        .unwrap();
    ledger.set_phase(5, EpochPhase::Reveal);
    tick(&mut orch).await.unwrap();
    ledger.settle_with(
        5,
        EpochClearing {
            clearing_price: to_fixed(105),
            total_buy_filled: to_fixed(2),
            total_sell_filled: to_fixed(2),
            num_fills: 1,
        },
    );
    ledger.fill_order(order_id, to_fixed(2));

    // Someone (a second device, a relayer) already claimed the fill.
    ledger.state().claimed.insert(order_id);

    orch.claim_fill(order_id, &mut rng).await.unwrap();
    assert_eq!(
        notes.get(&trader, order_id).unwrap().status,
        NoteStatus::Claimed
    );

    // And claiming a claimed order locally is a no-op.
    orch.claim_fill(order_id, &mut rng).await.unwrap();
}

#[tokio::test]
async fn cancel_clears_the_pending_reveal() {
    let (ledger, notes, mut orch, mut rng) = setup();
    let trader = TraderAddress::from([3u8; 32]);

    ledger.set_phase(5, EpochPhase::Commit);
    orch.balances
        .deposit(STRK, to_fixed(1000), &mut rng)
        .await
        .unwrap();
    let order_id = orch
        .submit_order(
            to_fixed(100),
            to_fixed(2),
            Side::Buy,
            AssetPair::new(STRK, ETH),
            &mut rng,
        )
        .await
        .unwrap();

    orch.cancel_order(order_id).await.unwrap();
    assert_eq!(
        notes.get(&trader, order_id).unwrap().status,
        NoteStatus::Cancelled
    );
    assert_eq!(orch.pending_reveal_count(), 0);

    // Its reveal window comes and goes without a submission.
    ledger.set_phase(5, EpochPhase::Reveal);
    let info = orch.epochs.refresh().await.unwrap();
    orch.on_epoch_tick(info).await.unwrap();
    assert!(ledger.state().reveals.is_empty());
}

#[tokio::test]
async fn insufficient_balance_never_reaches_the_ledger() {
    let (ledger, _notes, mut orch, mut rng) = setup();

    ledger.set_phase(5, EpochPhase::Commit);
    orch.balances
        .deposit(STRK, to_fixed(100), &mut rng)
        .await
        .unwrap();

    // Buy 2.0000 at 100.0000 needs 200.0000 of the quote asset.
    let err = orch
        .submit_order(
            to_fixed(100),
            to_fixed(2),
            Side::Buy,
            AssetPair::new(STRK, ETH),
            &mut rng,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotEnoughFund { .. }));
    assert!(ledger.state().commits.is_empty());
}

#[tokio::test]
async fn reset_session_drops_queued_reveals() {
    let (ledger, _notes, mut orch, mut rng) = setup();

    ledger.set_phase(5, EpochPhase::Commit);
    orch.balances
        .deposit(STRK, to_fixed(1000), &mut rng)
        .await
        .unwrap();
    orch.submit_order(
        to_fixed(100),
        to_fixed(2),
        Side::Buy,
        AssetPair::new(STRK, ETH),
        &mut rng,
    )
    .await
    .unwrap();
    assert_eq!(orch.pending_reveal_count(), 1);

    orch.reset_session();
    assert_eq!(orch.pending_reveal_count(), 0);
    assert_eq!(orch.state(), FlowState::Idle);

    // The old account's order is never revealed after the reset.
    ledger.set_phase(5, EpochPhase::Reveal);
    let info = orch.epochs.refresh().await.unwrap();
    orch.on_epoch_tick(info).await.unwrap();
    assert!(ledger.state().reveals.is_empty());
}
