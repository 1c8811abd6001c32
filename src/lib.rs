//! Client-side engine for a confidential batch-auction dark pool.
//!
//! Balances live on the ledger as twisted ElGamal ciphertexts; orders
//! run through a commit-reveal batch auction with a uniform clearing
//! price per epoch. This crate provides the cryptography (encryption,
//! AE decryption hints, Fiat-Shamir sigma proofs, bulletproof ranges)
//! and the client-side orchestration (epoch tracking, the order
//! lifecycle state machine, encrypted balance management) on top of an
//! abstract ledger interface.

#[macro_use]
pub(crate) mod macros;

pub mod balances;
pub mod codec_wrapper;
pub mod elgamal;
pub mod epoch;
pub mod errors;
pub mod ledger;
pub mod orchestrator;
pub mod order;
pub mod proofs;
pub mod session;
pub mod testing;

use codec::{Decode, Encode, MaxEncodedLen};
use serde::{Deserialize, Serialize};

pub use curve25519_dalek::scalar::Scalar;

pub use crate::{
    elgamal::{CipherText, CipherTextHint, ElgamalKeys, ElgamalPublicKey, ElgamalSecretKey},
    errors::{Error, Result},
    proofs::{BalanceProof, InRangeProof, OwnershipProof},
};

/// Balance and amount type. All amounts are fixed-point with four
/// decimal places (see [`order::FIXED_POINT_SCALE`]).
pub type Balance = u64;

/// Number of bits needed to represent the balance type, used as the
/// bulletproof range.
pub const BALANCE_RANGE: u32 = Balance::BITS;

/// Ledger asset identifier.
pub type AssetId = u32;

/// Auction epoch number.
pub type EpochId = u64;

/// Ledger-assigned order identifier. Never synthesized client-side.
pub type OrderId = u64;

/// A trader's ledger address.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Encode,
    Decode,
    MaxEncodedLen,
    Serialize,
    Deserialize,
)]
pub struct TraderAddress([u8; 32]);

impl TraderAddress {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for TraderAddress {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl core::fmt::Display for TraderAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // Short hex form, enough to tell addresses apart in logs.
        for b in &self.0[..4] {
            write!(f, "{b:02x}")?;
        }
        write!(f, "..")
    }
}
