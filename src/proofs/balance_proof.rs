//! Balance-sufficiency proof: `balance - amount >= 0` without
//! revealing `balance`.
//!
//! The prover re-encrypts the remaining balance with fresh randomness,
//! range-proves the remainder, and binds the whole statement to the
//! `(trader, asset)` pair through the Fiat-Shamir transcript, so a
//! proof produced for one account or asset can never be replayed
//! against another.

use curve25519_dalek::scalar::Scalar;
use merlin::Transcript;
use rand_core::{CryptoRng, RngCore};

use codec::{Decode, Encode};

use crate::{
    codec_wrapper::{WrappedCompressedRistretto, WrappedScalar},
    elgamal::{CipherText, ElgamalKeys, ElgamalPublicKey},
    errors::{Error, Result},
    proofs::{InRangeProof, TranscriptProtocol, ZKPChallenge},
    AssetId, Balance, TraderAddress, BALANCE_RANGE,
};

/// The domain label for the balance-sufficiency proof.
pub const BALANCE_PROOF_LABEL: &[u8] = b"DarkPoolBalanceProof";
/// The domain label for the challenge.
pub const BALANCE_PROOF_CHALLENGE_LABEL: &[u8] = b"DarkPoolBalanceChallenge";

/// Non-interactive proof that the trader's balance covers `amount`,
/// bound to a `(trader, asset)` pair.
#[derive(Clone, Encode, Decode, Debug)]
pub struct BalanceProof {
    /// Fresh encryption of `balance - amount`.
    pub encrypted_remaining: CipherText,
    /// Range proof that the remaining balance is non-negative within
    /// the balance bit-width.
    pub range: InRangeProof,
    /// Sigma commitment `A = k * PK`.
    pub a: WrappedCompressedRistretto,
    /// Fiat-Shamir challenge.
    pub challenge: WrappedScalar,
    /// Response `z = k + challenge * blinding`.
    pub response: WrappedScalar,
}

fn start_transcript(
    transcript: &mut Transcript,
    pub_key: &ElgamalPublicKey,
    trader: &TraderAddress,
    asset_id: AssetId,
    encrypted_remaining: &CipherText,
) -> Result<()> {
    transcript.append_domain_separator(BALANCE_PROOF_LABEL);
    transcript.append_validated_point(b"PK", &pub_key.pub_key.compress())?;
    transcript.append_bytes(b"trader", trader.as_bytes());
    transcript.append_u64(b"asset", asset_id as u64);
    transcript.append_validated_point(b"X", &encrypted_remaining.x.compress())?;
    transcript.append_validated_point(b"Y", &encrypted_remaining.y.compress())?;
    Ok(())
}

impl BalanceProof {
    /// Prove that `balance >= amount` for the given trader and asset.
    ///
    /// `balance` is the caller's decrypted view of its own encrypted
    /// balance; the resulting proof reveals neither it nor the
    /// remainder.
    pub fn prove<R: RngCore + CryptoRng>(
        keys: &ElgamalKeys,
        trader: &TraderAddress,
        asset_id: AssetId,
        balance: Balance,
        amount: Balance,
        rng: &mut R,
    ) -> Result<Self> {
        ensure!(balance >= amount, Error::NotEnoughFund { balance, amount });
        let remaining = balance - amount;

        let (witness, encrypted_remaining) =
            keys.public.encrypt_value(remaining.into(), rng);

        let range = InRangeProof::prove(remaining, witness.blinding(), BALANCE_RANGE, rng)?;

        let mut transcript = Transcript::new(BALANCE_PROOF_LABEL);
        start_transcript(
            &mut transcript,
            &keys.public,
            trader,
            asset_id,
            &encrypted_remaining,
        )?;

        let k = Scalar::random(rng);
        let a = (k * *keys.public.pub_key).compress();
        transcript.append_validated_point(b"A", &a)?;

        let challenge = transcript.scalar_challenge(BALANCE_PROOF_CHALLENGE_LABEL);
        let response = k + challenge.x() * witness.blinding();

        Ok(Self {
            encrypted_remaining,
            range,
            a: a.into(),
            challenge: challenge.x().into(),
            response: response.into(),
        })
    }

    /// Verify the proof against the public key and binding values.
    pub fn verify<R: RngCore + CryptoRng>(
        &self,
        pub_key: &ElgamalPublicKey,
        trader: &TraderAddress,
        asset_id: AssetId,
        rng: &mut R,
    ) -> Result<()> {
        let mut transcript = Transcript::new(BALANCE_PROOF_LABEL);
        start_transcript(
            &mut transcript,
            pub_key,
            trader,
            asset_id,
            &self.encrypted_remaining,
        )?;
        transcript.append_validated_point(b"A", &self.a.compress())?;
        let challenge = transcript.scalar_challenge(BALANCE_PROOF_CHALLENGE_LABEL);

        ensure!(
            challenge.x() == *self.challenge,
            Error::BalanceFinalResponseVerificationError { check: 1 }
        );
        // z * PK == A + c * X, for X = blinding * PK.
        ensure!(
            *self.response * *pub_key.pub_key
                == self.a.decompress() + challenge.x() * *self.encrypted_remaining.x,
            Error::BalanceFinalResponseVerificationError { check: 2 }
        );
        self.range
            .verify(&self.encrypted_remaining.y.compress(), BALANCE_RANGE, rng)?;
        Ok(())
    }

    /// The challenge, for the submission-path soundness check.
    pub fn challenge(&self) -> ZKPChallenge {
        (*self.challenge).into()
    }

    /// The fresh witnessed remainder commitment, for callers that fold
    /// the updated balance into a claim or withdrawal.
    pub fn remaining_ciphertext(&self) -> &CipherText {
        &self.encrypted_remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proofs::ensure_sound;
    use crate::testing;
    use rand::{rngs::StdRng, SeedableRng};

    const SEED: [u8; 32] = [23u8; 32];
    const ASSET_STRK: AssetId = 2;

    #[test]
    fn prove_and_verify_sufficient_balance() {
        let mut rng = StdRng::from_seed(SEED);
        let keys = testing::gen_keys(&mut rng);
        let trader = TraderAddress::from([3u8; 32]);

        let proof = BalanceProof::prove(&keys, &trader, ASSET_STRK, 1_000, 400, &mut rng).unwrap();
        assert!(ensure_sound(&proof.challenge()).is_ok());
        assert!(proof
            .verify(&keys.public, &trader, ASSET_STRK, &mut rng)
            .is_ok());
    }

    #[test]
    fn insufficient_balance_is_rejected_before_proving() {
        let mut rng = StdRng::from_seed(SEED);
        let keys = testing::gen_keys(&mut rng);
        let trader = TraderAddress::from([3u8; 32]);

        assert_err!(
            BalanceProof::prove(&keys, &trader, ASSET_STRK, 100, 400, &mut rng),
            Error::NotEnoughFund {
                balance: 100,
                amount: 400
            }
        );
    }

    #[test]
    fn proof_is_bound_to_trader_and_asset() {
        let mut rng = StdRng::from_seed(SEED);
        let keys = testing::gen_keys(&mut rng);
        let trader = TraderAddress::from([3u8; 32]);
        let other_trader = TraderAddress::from([4u8; 32]);

        let proof = BalanceProof::prove(&keys, &trader, ASSET_STRK, 1_000, 400, &mut rng).unwrap();

        assert_err!(
            proof.verify(&keys.public, &other_trader, ASSET_STRK, &mut rng),
            Error::BalanceFinalResponseVerificationError { check: 1 }
        );
        assert_err!(
            proof.verify(&keys.public, &trader, ASSET_STRK + 1, &mut rng),
            Error::BalanceFinalResponseVerificationError { check: 1 }
        );
    }

    #[test]
    fn exact_balance_spend_is_allowed() {
        let mut rng = StdRng::from_seed(SEED);
        let keys = testing::gen_keys(&mut rng);
        let trader = TraderAddress::from([3u8; 32]);

        let proof = BalanceProof::prove(&keys, &trader, ASSET_STRK, 400, 400, &mut rng).unwrap();
        assert!(proof
            .verify(&keys.public, &trader, ASSET_STRK, &mut rng)
            .is_ok());
    }
}
