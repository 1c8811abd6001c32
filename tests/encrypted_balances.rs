//! Encrypted balance flows against the mock ledger: deposits, hint
//! and fallback decryption, withdrawals.

use std::sync::Arc;

use rand::{rngs::StdRng, SeedableRng};

use darkpool_client::{
    balances::BalanceClient,
    errors::Error,
    order::to_fixed,
    testing::{gen_keys, MockLedger},
    TraderAddress,
};

const SEED: [u8; 32] = [11u8; 32];
const STRK: u32 = 1;

fn setup() -> (Arc<MockLedger>, BalanceClient, StdRng) {
    let mut rng = StdRng::from_seed(SEED);
    let ledger = Arc::new(MockLedger::new());
    let keys = gen_keys(&mut rng);
    let trader = TraderAddress::from([5u8; 32]);
    let client = BalanceClient::new(ledger.clone(), keys, trader, vec![STRK]);
    (ledger, client, rng)
}

#[tokio::test]
async fn first_deposit_decrypts_through_the_hint() {
    let (_ledger, mut client, mut rng) = setup();

    client.deposit(STRK, to_fixed(500), &mut rng).await.unwrap();
    assert_eq!(client.decrypted(STRK), Some(to_fixed(500)));
    assert!(!client.is_blind(STRK));
}

#[tokio::test]
async fn second_deposit_falls_back_to_bounded_search() {
    let (_ledger, mut client, mut rng) = setup();

    client.deposit(STRK, to_fixed(500), &mut rng).await.unwrap();
    // The second deposit's hint covers only its own ciphertext, not the
    // homomorphic sum; the refresh recovers the total by searching
    // around the last known value.
    client.deposit(STRK, to_fixed(40), &mut rng).await.unwrap();
    assert_eq!(client.decrypted(STRK), Some(to_fixed(540)));
}

#[tokio::test]
async fn far_balance_jump_without_hint_goes_blind() {
    let (_ledger, mut client, mut rng) = setup();

    client.deposit(STRK, to_fixed(500), &mut rng).await.unwrap();
    // A jump beyond the search window with a stale hint cannot be
    // recovered.
    client
        .deposit(STRK, to_fixed(5_000), &mut rng)
        .await
        .unwrap();
    assert_eq!(client.decrypted(STRK), None);
    assert!(client.is_blind(STRK));
}

#[tokio::test]
async fn deposit_survives_a_ledger_that_drops_hints() {
    let (ledger, mut client, mut rng) = setup();
    ledger.state().persist_hints = false;

    // Well beyond the bounded-search window; only the locally cached
    // hint can decrypt this.
    client
        .deposit(STRK, to_fixed(5_000), &mut rng)
        .await
        .unwrap();
    assert_eq!(client.decrypted(STRK), Some(to_fixed(5_000)));
    assert!(!client.is_blind(STRK));
}

#[tokio::test]
async fn withdraw_hint_is_cached_locally() {
    let (ledger, mut client, mut rng) = setup();
    ledger.state().persist_hints = false;

    client
        .deposit(STRK, to_fixed(5_000), &mut rng)
        .await
        .unwrap();
    client
        .withdraw(STRK, to_fixed(1_000), &mut rng)
        .await
        .unwrap();
    assert_eq!(client.decrypted(STRK), Some(to_fixed(4_000)));
}

#[tokio::test]
async fn withdraw_updates_balance_and_hint() {
    let (ledger, mut client, mut rng) = setup();

    client.deposit(STRK, to_fixed(500), &mut rng).await.unwrap();
    client
        .withdraw(STRK, to_fixed(200), &mut rng)
        .await
        .unwrap();

    // The resulting-balance hint makes the next refresh O(1).
    assert_eq!(client.decrypted(STRK), Some(to_fixed(300)));
    let state = ledger.state();
    assert_eq!(state.withdraws.len(), 1);
    assert_eq!(state.withdraws[0].amount, to_fixed(200));
}

#[tokio::test]
async fn overdraft_fails_before_any_submission() {
    let (ledger, mut client, mut rng) = setup();

    client.deposit(STRK, to_fixed(50), &mut rng).await.unwrap();
    let err = client
        .withdraw(STRK, to_fixed(100), &mut rng)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::NotEnoughFund { balance, amount }
            if balance == to_fixed(50) && amount == to_fixed(100)
    ));
    assert!(ledger.state().withdraws.is_empty());
}

#[tokio::test]
async fn blind_balance_cannot_be_withdrawn() {
    let (ledger, mut client, mut rng) = setup();

    client.deposit(STRK, to_fixed(500), &mut rng).await.unwrap();
    client
        .deposit(STRK, to_fixed(5_000), &mut rng)
        .await
        .unwrap();
    assert!(client.is_blind(STRK));

    let err = client
        .withdraw(STRK, to_fixed(10), &mut rng)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::BalanceNotDecrypted { asset_id: STRK }));
    assert!(ledger.state().withdraws.is_empty());
}

#[tokio::test]
async fn untouched_asset_reads_as_zero() {
    let (_ledger, mut client, _rng) = setup();

    client.refresh_balances().await;
    assert_eq!(client.decrypted(STRK), Some(0));
}
