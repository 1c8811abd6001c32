//! The client's view of the on-chain auction contract.
//!
//! The ledger is a black box reachable only through these read and
//! submit traits. Submissions return a receipt whose emitted events
//! carry the identifiers the contract assigned (order id, match id);
//! event payloads arrive as raw `(kind, data)` pairs and are parsed
//! into one tagged variant per event kind.

use async_trait::async_trait;
use codec::Encode;
use serde::{Deserialize, Serialize};

use crate::{
    elgamal::{CipherText, CipherTextHint},
    epoch::EpochPhase,
    errors::{Error, Result},
    order::Side,
    proofs::BalanceProof,
    AssetId, Balance, EpochId, OrderId, TraderAddress,
};

/// Reference to an accepted ledger transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRef(pub String);

impl TxRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The ledger's raw epoch view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochView {
    pub epoch: EpochId,
    pub phase: EpochPhase,
    pub blocks_remaining: u64,
}

/// Settlement result of one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochClearing {
    /// Uniform clearing price, fixed-point.
    pub clearing_price: Balance,
    pub total_buy_filled: Balance,
    pub total_sell_filled: Balance,
    pub num_fills: u32,
}

/// On-ledger order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOrderStatus {
    Committed,
    Revealed,
    Filled,
    PartialFill,
    Cancelled,
    Expired,
}

/// The ledger's view of one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderView {
    pub status: LedgerOrderStatus,
    pub fill_amount: Balance,
    pub epoch: EpochId,
    pub give_asset: AssetId,
    pub want_asset: AssetId,
}

/// A raw event as emitted in a transaction receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: String,
    pub data: Vec<u64>,
}

/// Parsed ledger event, one variant per event kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    OrderCommitted { order_id: OrderId, epoch: EpochId },
    OrderRevealed { order_id: OrderId },
    OrderCancelled { order_id: OrderId },
    EpochSettled { epoch: EpochId, num_fills: u32 },
    FillClaimed { order_id: OrderId, match_id: u64 },
    Deposited { asset_id: AssetId },
    Withdrawn { asset_id: AssetId },
}

impl LedgerEvent {
    /// Parse one raw event. Unknown kinds and malformed payloads yield
    /// `None`; receipts routinely carry events this client does not
    /// consume.
    pub fn parse(raw: &RawEvent) -> Option<Self> {
        match raw.kind.as_str() {
            "OrderCommitted" => Some(Self::OrderCommitted {
                order_id: *raw.data.first()?,
                epoch: *raw.data.get(1)?,
            }),
            "OrderRevealed" => Some(Self::OrderRevealed {
                order_id: *raw.data.first()?,
            }),
            "OrderCancelled" => Some(Self::OrderCancelled {
                order_id: *raw.data.first()?,
            }),
            "EpochSettled" => Some(Self::EpochSettled {
                epoch: *raw.data.first()?,
                num_fills: (*raw.data.get(1)?) as u32,
            }),
            "FillClaimed" => Some(Self::FillClaimed {
                order_id: *raw.data.first()?,
                match_id: *raw.data.get(1)?,
            }),
            "Deposited" => Some(Self::Deposited {
                asset_id: (*raw.data.first()?) as AssetId,
            }),
            "Withdrawn" => Some(Self::Withdrawn {
                asset_id: (*raw.data.first()?) as AssetId,
            }),
            _ => None,
        }
    }
}

/// Receipt of an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_ref: TxRef,
    pub events: Vec<RawEvent>,
}

impl TxReceipt {
    /// Parse all recognized events out of the receipt.
    pub fn events(&self) -> impl Iterator<Item = LedgerEvent> + '_ {
        self.events.iter().filter_map(LedgerEvent::parse)
    }

    /// The ledger-assigned order id, if the receipt carries one.
    ///
    /// A commit receipt without one is a hard error for the caller: a
    /// synthesized id could collide or diverge from the contract's, so
    /// none is ever invented.
    pub fn order_id(&self) -> Result<OrderId> {
        self.events()
            .find_map(|event| match event {
                LedgerEvent::OrderCommitted { order_id, .. } => Some(order_id),
                _ => None,
            })
            .ok_or(Error::OrderIdNotFound)
    }
}

/// Hidden order commitment submitted during the COMMIT phase.
///
/// Only the commitment hash and the balance proof are visible to the
/// ledger; price, amount and side stay local until reveal.
#[derive(Debug, Clone, Encode)]
pub struct CommitOrderTx {
    pub trader: TraderAddress,
    pub commitment: [u8; 32],
    pub give_asset: AssetId,
    pub proof: BalanceProof,
}

/// Opened order submitted during the REVEAL phase.
#[derive(Debug, Clone, Encode)]
pub struct RevealOrderTx {
    pub order_id: OrderId,
    pub side: Side,
    pub give_asset: AssetId,
    pub want_asset: AssetId,
    pub price: Balance,
    pub amount: Balance,
    /// The blinding used in the original commitment hash.
    pub salt: [u8; 32],
}

impl Encode for Side {
    fn encode_to<W: codec::Output + ?Sized>(&self, dest: &mut W) {
        let tag: u8 = match self {
            Side::Buy => 0,
            Side::Sell => 1,
        };
        tag.encode_to(dest);
    }
}

/// Claim of a settled fill: both updated balances re-encrypted with
/// fresh randomness and fresh hints.
#[derive(Debug, Clone, Encode)]
pub struct ClaimFillTx {
    pub order_id: OrderId,
    pub trader: TraderAddress,
    pub new_give_balance: CipherText,
    pub give_hint: CipherTextHint,
    pub new_want_balance: CipherText,
    pub want_hint: CipherTextHint,
}

/// Funding transaction carrying a fresh encryption of the deposit.
#[derive(Debug, Clone, Encode)]
pub struct DepositTx {
    pub trader: TraderAddress,
    pub asset_id: AssetId,
    pub amount: Balance,
    pub encrypted_amount: CipherText,
    pub hint: CipherTextHint,
}

/// Withdrawal carrying the encrypted amount and the sufficiency proof.
#[derive(Debug, Clone, Encode)]
pub struct WithdrawTx {
    pub trader: TraderAddress,
    pub asset_id: AssetId,
    pub amount: Balance,
    pub encrypted_amount: CipherText,
    pub proof: BalanceProof,
    /// Hint for the *resulting* balance, so the next refresh decrypts
    /// in O(1).
    pub new_balance_hint: CipherTextHint,
}

/// Full ledger handle combining the read and submit halves.
pub trait Ledger: LedgerRead + LedgerWrite {}
impl<T: LedgerRead + LedgerWrite> Ledger for T {}

/// Read access to the auction contract.
#[async_trait]
pub trait LedgerRead: Send + Sync {
    async fn epoch(&self) -> Result<EpochView>;

    async fn epoch_result(&self, epoch: EpochId) -> Result<Option<EpochClearing>>;

    async fn encrypted_balance(
        &self,
        owner: &TraderAddress,
        asset_id: AssetId,
    ) -> Result<CipherText>;

    async fn balance_hint(
        &self,
        owner: &TraderAddress,
        asset_id: AssetId,
    ) -> Result<Option<CipherTextHint>>;

    async fn order(&self, order_id: OrderId) -> Result<OrderView>;

    async fn is_order_claimed(&self, order_id: OrderId) -> Result<bool>;
}

/// Write access to the auction contract. Each call submits one
/// transaction and awaits its receipt.
#[async_trait]
pub trait LedgerWrite: Send + Sync {
    async fn submit_commit(&self, tx: CommitOrderTx) -> Result<TxReceipt>;

    async fn submit_reveal(&self, tx: RevealOrderTx) -> Result<TxReceipt>;

    async fn submit_cancel(&self, order_id: OrderId) -> Result<TxReceipt>;

    async fn submit_settle(&self, epoch: EpochId) -> Result<TxReceipt>;

    async fn submit_claim(&self, tx: ClaimFillTx) -> Result<TxReceipt>;

    async fn submit_deposit(&self, tx: DepositTx) -> Result<TxReceipt>;

    async fn submit_withdraw(&self, tx: WithdrawTx) -> Result<TxReceipt>;
}
