use thiserror::Error;

use crate::Balance;

/// Dark-pool client error.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// Encrypted value was not found within the valid range.
    #[error("Encrypted value was not found within the valid range")]
    CipherTextDecryptionError,

    /// Failed to verify an ownership proof.
    #[error("Failed to verify the check number {check} of the ownership proof")]
    OwnershipFinalResponseVerificationError { check: u16 },

    /// Failed to verify a balance-sufficiency proof.
    #[error("Failed to verify the check number {check} of the balance proof")]
    BalanceFinalResponseVerificationError { check: u16 },

    /// The Fiat-Shamir challenge came out as the zero scalar.
    ///
    /// A zero challenge breaks the soundness of the transcript binding,
    /// so the proof must not leave the client.
    #[error("The Fiat-Shamir challenge is zero; refusing to submit the proof")]
    ZeroChallenge,

    /// An invalid (identity) point was appended to a proof transcript.
    #[error("Invalid point appended to the proof transcript")]
    InvalidTranscriptPoint,

    /// The trader attempted to spend more than their balance.
    #[error("Amount {amount} must be less than or equal to the balance {balance}")]
    NotEnoughFund { balance: Balance, amount: Balance },

    /// The balance has not been decrypted yet, so a withdrawal cannot
    /// be validated against it.
    #[error("The balance for asset {asset_id} is not decrypted; refusing to withdraw blind")]
    BalanceNotDecrypted { asset_id: u32 },

    /// The order amount is zero or does not fit the asset's precision.
    #[error("Invalid order amount")]
    InvalidAmount,

    /// The auction is not in the phase the operation requires.
    #[error("Wrong auction phase: expected {expected}, the auction is in {actual}")]
    WrongPhase { expected: &'static str, actual: &'static str },

    /// The current epoch could not be read fresh from the ledger.
    #[error("The auction phase is unknown; a stale epoch cannot gate a commit")]
    EpochUnknown,

    /// The commit receipt carried no `OrderCommitted` event.
    #[error("No order id could be parsed from the commit receipt")]
    OrderIdNotFound,

    /// The order is not known to the local note store.
    #[error("Unknown order {order_id}")]
    UnknownOrder { order_id: u64 },

    /// The order's on-ledger status does not allow the operation.
    #[error("Order {order_id} is not claimable in its current status")]
    NotClaimable { order_id: u64 },

    /// The order has already been filled, expired or cancelled.
    #[error("Order {order_id} can no longer be cancelled")]
    NotCancellable { order_id: u64 },

    /// The settlement result for the epoch is not available.
    #[error("No settlement result is available for epoch {epoch}")]
    NoEpochResult { epoch: u64 },

    /// A ledger read failed; the caller may retry.
    #[error("Ledger read failed: {0}")]
    LedgerRead(String),

    /// A ledger submission failed; terminal for the call unless the
    /// operation defines its own retry policy.
    #[error("Ledger submission failed: {0}")]
    Submission(String),

    /// The bounded reveal retries were exhausted.
    #[error("Reveal failed after {attempts} attempts; the queue is halted")]
    RevealRetriesExhausted { attempts: u8 },

    /// Another submission is already in flight on this orchestrator.
    #[error("A submission is already in progress")]
    SubmissionInProgress,

    /// A range proof error occurred.
    #[error(transparent)]
    BulletproofProvingError(#[from] bulletproofs::ProofError),
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
