//! Bulletproof range proofs over Pedersen commitments.
//!
//! The commitment being range-proved is the second term (Y) of the
//! twisted ElGamal encryption, so a range proof over a fresh encryption
//! of `balance - amount` is exactly the "enough funds" statement the
//! auction contract checks.

use bulletproofs::{BulletproofGens, PedersenGens, RangeProof};
use curve25519_dalek::{ristretto::CompressedRistretto, scalar::Scalar};
use merlin::Transcript;
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::errors::Result;

const RANGE_PROOF_LABEL: &[u8] = b"DarkPoolRangeProof";

/// Holds a non-interactive range proof.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InRangeProof(pub RangeProof);

impl InRangeProof {
    fn gens(len: usize) -> (PedersenGens, BulletproofGens) {
        // Generators for Pedersen commitments.
        let pc_gens = PedersenGens::default();

        // Generators for Bulletproofs, valid for proofs up to bitsize 64
        // and aggregation size up to `len`.
        let bp_gens = BulletproofGens::new(64, len);

        (pc_gens, bp_gens)
    }

    /// Generate a range proof for a commitment to a secret value.
    pub fn prove<Rng: RngCore + CryptoRng>(
        secret_value: u64,
        blinding: Scalar,
        range: u32,
        rng: &mut Rng,
    ) -> Result<Self> {
        let (pc_gens, bp_gens) = Self::gens(1);

        let mut prover_transcript = Transcript::new(RANGE_PROOF_LABEL);

        let (proof, _commitments) = RangeProof::prove_multiple_with_rng(
            &bp_gens,
            &pc_gens,
            &mut prover_transcript,
            &[secret_value],
            &[blinding],
            range as usize,
            rng,
        )?;

        Ok(Self(proof))
    }

    /// Verify a range proof against a commitment to a secret value.
    pub fn verify<Rng: RngCore + CryptoRng>(
        &self,
        commitment: &CompressedRistretto,
        range: u32,
        rng: &mut Rng,
    ) -> Result<()> {
        let (pc_gens, bp_gens) = Self::gens(1);

        let mut verifier_transcript = Transcript::new(RANGE_PROOF_LABEL);

        Ok(self.0.verify_multiple_with_rng(
            &bp_gens,
            &pc_gens,
            &mut verifier_transcript,
            &[*commitment],
            range as usize,
            rng,
        )?)
    }
}
