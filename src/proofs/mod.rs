//! Non-interactive Sigma-protocol proofs over encrypted values.
//!
//! Every proof here is a Fiat-Shamir transcript of the same shape:
//! a commitment `k * G`, a challenge derived from the domain-separated
//! public inputs, and a response `k + challenge * secret (mod order)`.
//! What differs between the proof kinds is which public values are
//! bound into the transcript.
//!
//! The generators never reject a zero challenge themselves; the
//! submission path calls [`ensure_sound`] before any network call.

use curve25519_dalek::{ristretto::CompressedRistretto, scalar::Scalar, traits::IsIdentity};
use merlin::Transcript;

use crate::errors::{Error, Result};

pub mod balance_proof;
pub mod ownership_proof;
pub mod range_proof;

pub use balance_proof::BalanceProof;
pub use ownership_proof::OwnershipProof;
pub use range_proof::InRangeProof;

/// A Fiat-Shamir challenge scalar.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ZKPChallenge(Scalar);

impl ZKPChallenge {
    pub fn x(&self) -> Scalar {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == Scalar::zero()
    }
}

impl From<Scalar> for ZKPChallenge {
    fn from(x: Scalar) -> Self {
        Self(x)
    }
}

/// Reject a proof whose challenge is the zero scalar.
///
/// Zero voids the binding between the witness and the public inputs,
/// so such a proof must never reach the ledger.
pub fn ensure_sound(challenge: &ZKPChallenge) -> Result<()> {
    ensure!(!challenge.is_zero(), Error::ZeroChallenge);
    Ok(())
}

/// The transcript operations shared by all proof kinds.
pub trait TranscriptProtocol {
    fn append_domain_separator(&mut self, label: &'static [u8]);

    /// Append a point, rejecting the identity: an identity commitment
    /// would let a prover cancel the challenge term.
    fn append_validated_point(
        &mut self,
        label: &'static [u8],
        point: &CompressedRistretto,
    ) -> Result<()>;

    fn append_u64(&mut self, label: &'static [u8], value: u64);

    fn append_bytes(&mut self, label: &'static [u8], bytes: &[u8]);

    fn scalar_challenge(&mut self, label: &'static [u8]) -> ZKPChallenge;
}

impl TranscriptProtocol for Transcript {
    fn append_domain_separator(&mut self, label: &'static [u8]) {
        self.append_message(b"dom-sep", label);
    }

    fn append_validated_point(
        &mut self,
        label: &'static [u8],
        point: &CompressedRistretto,
    ) -> Result<()> {
        let decompressed = point
            .decompress()
            .ok_or(Error::InvalidTranscriptPoint)?;
        ensure!(!decompressed.is_identity(), Error::InvalidTranscriptPoint);
        self.append_message(label, point.as_bytes());
        Ok(())
    }

    fn append_u64(&mut self, label: &'static [u8], value: u64) {
        self.append_message(label, &value.to_le_bytes());
    }

    fn append_bytes(&mut self, label: &'static [u8], bytes: &[u8]) {
        self.append_message(label, bytes);
    }

    fn scalar_challenge(&mut self, label: &'static [u8]) -> ZKPChallenge {
        let mut buf = [0u8; 64];
        self.challenge_bytes(label, &mut buf);
        Scalar::from_bytes_mod_order_wide(&buf).into()
    }
}
