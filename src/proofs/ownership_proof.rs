//! Schnorr proof of knowledge of the secret key behind an ElGamal
//! public key, bound to the claimed trader address.
//!
//! The address binding is what prevents a proof generated by one
//! identity from validating for another: the challenge commits to the
//! address, so the transcript of trader A never verifies for trader B.

use bulletproofs::PedersenGens;
use curve25519_dalek::scalar::Scalar;
use merlin::Transcript;
use rand_core::{CryptoRng, RngCore};

use codec::{Decode, Encode};

use crate::{
    codec_wrapper::{WrappedCompressedRistretto, WrappedScalar},
    elgamal::{ElgamalPublicKey, ElgamalSecretKey},
    errors::{Error, Result},
    proofs::{TranscriptProtocol, ZKPChallenge},
    TraderAddress,
};

/// The domain label for the ownership proof.
pub const OWNERSHIP_PROOF_LABEL: &[u8] = b"DarkPoolOwnershipProof";
/// The domain label for the challenge.
pub const OWNERSHIP_PROOF_CHALLENGE_LABEL: &[u8] = b"DarkPoolOwnershipChallenge";

/// Non-interactive proof of ownership of an ElGamal key, bound to a
/// trader address.
#[derive(Copy, Clone, Encode, Decode, Debug, PartialEq, Eq)]
pub struct OwnershipProof {
    /// Sigma commitment `A = k * g`.
    pub a: WrappedCompressedRistretto,
    /// Fiat-Shamir challenge.
    pub challenge: WrappedScalar,
    /// Response `z = k + challenge * secret`.
    pub response: WrappedScalar,
}

fn start_transcript(
    transcript: &mut Transcript,
    pub_key: &ElgamalPublicKey,
    address: &TraderAddress,
) -> Result<()> {
    transcript.append_domain_separator(OWNERSHIP_PROOF_LABEL);
    transcript.append_validated_point(b"PK", &pub_key.pub_key.compress())?;
    transcript.append_bytes(b"addr", address.as_bytes());
    Ok(())
}

impl OwnershipProof {
    /// Prove knowledge of `secret_key` for `address`.
    pub fn prove<R: RngCore + CryptoRng>(
        secret_key: &ElgamalSecretKey,
        address: &TraderAddress,
        rng: &mut R,
    ) -> Result<Self> {
        let gens = PedersenGens::default();
        let pub_key = secret_key.get_public_key();

        let mut transcript = Transcript::new(OWNERSHIP_PROOF_LABEL);
        start_transcript(&mut transcript, &pub_key, address)?;

        let k = Scalar::random(rng);
        let a = (k * gens.B_blinding).compress();
        transcript.append_validated_point(b"A", &a)?;

        let challenge = transcript.scalar_challenge(OWNERSHIP_PROOF_CHALLENGE_LABEL);
        let response = k + challenge.x() * secret_key.secret();

        Ok(Self {
            a: a.into(),
            challenge: challenge.x().into(),
            response: response.into(),
        })
    }

    /// Verify the proof against `pub_key` and the claimed `address`.
    pub fn verify(&self, pub_key: &ElgamalPublicKey, address: &TraderAddress) -> Result<()> {
        let gens = PedersenGens::default();

        let mut transcript = Transcript::new(OWNERSHIP_PROOF_LABEL);
        start_transcript(&mut transcript, pub_key, address)?;
        transcript.append_validated_point(b"A", &self.a.compress())?;
        let challenge = transcript.scalar_challenge(OWNERSHIP_PROOF_CHALLENGE_LABEL);

        ensure!(
            challenge.x() == *self.challenge,
            Error::OwnershipFinalResponseVerificationError { check: 1 }
        );
        ensure!(
            *self.response * gens.B_blinding
                == self.a.decompress() + challenge.x() * *pub_key.pub_key,
            Error::OwnershipFinalResponseVerificationError { check: 2 }
        );
        Ok(())
    }

    /// The challenge, for the submission-path soundness check.
    pub fn challenge(&self) -> ZKPChallenge {
        (*self.challenge).into()
    }
}
