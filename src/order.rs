//! Order model, fixed-point amounts and the local order-note store.
//!
//! An order's public footprint before reveal is only its commitment
//! hash; everything the owner needs to reveal and claim later lives in
//! a local note keyed by the ledger-assigned order id.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    errors::{Error, Result},
    AssetId, Balance, EpochId, OrderId, TraderAddress,
};

/// All prices and amounts are fixed-point with four decimal places.
pub const FIXED_POINT_SCALE: Balance = 10_000;

/// Scale a whole-unit value into fixed-point representation.
pub const fn to_fixed(units: Balance) -> Balance {
    units * FIXED_POINT_SCALE
}

/// Multiply two fixed-point values (e.g. `amount * price`), keeping the
/// fixed-point scale. Fails on overflow or a zero operand.
pub fn fixed_mul(a: Balance, b: Balance) -> Result<Balance> {
    if a == 0 || b == 0 {
        return Err(Error::InvalidAmount);
    }
    let wide = (a as u128) * (b as u128) / (FIXED_POINT_SCALE as u128);
    Balance::try_from(wide).map_err(|_| Error::InvalidAmount)
}

/// Which side of the book the order is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// The asset pair of an order: the asset given up and the asset wanted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetPair {
    pub give: AssetId,
    pub want: AssetId,
}

impl AssetPair {
    pub fn new(give: AssetId, want: AssetId) -> Self {
        Self { give, want }
    }
}

/// Local lifecycle status of an order note.
///
/// `Committed` is recorded only once the commit transaction is accepted
/// and the ledger-assigned id has been parsed from its receipt; the
/// note is never written optimistically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteStatus {
    Building,
    Committed,
    Revealed,
    Filled,
    Cancelled,
    /// The order missed its reveal window; it can never be revealed
    /// late.
    Expired,
    Claimed,
}

/// Everything the owner must remember about one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderNote {
    pub order_id: OrderId,
    pub owner: TraderAddress,
    pub side: Side,
    pub pair: AssetPair,
    /// Limit price, fixed-point.
    pub price: Balance,
    /// Order amount in the give-asset's fixed-point precision.
    pub amount: Balance,
    /// The epoch at commit time. Fixed for the life of the order; a
    /// reveal attempted in any other epoch is invalid.
    pub epoch: EpochId,
    pub status: NoteStatus,
    pub commit_tx: Option<String>,
    pub reveal_tx: Option<String>,
    pub fill_amount: Option<Balance>,
    pub clearing_price: Option<Balance>,
}

/// Per-owner key-value store for order notes.
///
/// Implementations persist however they like (the reference test store
/// is an in-memory map); the orchestrator only writes through this
/// interface, and only in response to confirmed ledger events.
pub trait NoteStore: Send + Sync {
    fn put(&self, note: OrderNote);

    fn get(&self, owner: &TraderAddress, order_id: OrderId) -> Option<OrderNote>;

    fn all(&self, owner: &TraderAddress) -> Vec<OrderNote>;

    /// Update a single note in place. Missing notes are ignored.
    fn update(&self, owner: &TraderAddress, order_id: OrderId, f: &mut dyn FnMut(&mut OrderNote));

    fn set_status(&self, owner: &TraderAddress, order_id: OrderId, status: NoteStatus) {
        self.update(owner, order_id, &mut |note| note.status = status);
    }
}
