//! Twisted ElGamal encryption over the Ristretto 25519 curve.
//!
//! The dark-pool contract stores one ciphertext per `(trader, asset)`
//! pair. Since the scheme is additively homomorphic, deposits, fills
//! and withdrawals are applied on-chain as ciphertext addition and
//! subtraction without ever decrypting the balance.

use crate::{
    codec_wrapper::WrappedRistretto,
    errors::{Error, Result},
    Balance,
};

use bulletproofs::PedersenGens;
use core::ops::{Add, AddAssign, Deref, Sub, SubAssign};
use curve25519_dalek::scalar::Scalar;
use rand_core::{CryptoRng, RngCore};

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use codec::{Decode, Encode};

pub mod hint;

pub use hint::CipherTextHint;

/// Prover's representation of the commitment secret.
#[derive(Clone, PartialEq, Zeroize, ZeroizeOnDrop, Debug)]
pub struct CommitmentWitness {
    /// The balance value or order amount in Scalar format.
    value: Scalar,

    /// A random blinding factor.
    blinding: Scalar,
}

impl CommitmentWitness {
    pub fn new(value: Scalar, blinding: Scalar) -> Self {
        CommitmentWitness { value, blinding }
    }

    pub fn value(&self) -> Scalar {
        self.value
    }

    pub fn blinding(&self) -> Scalar {
        self.blinding
    }
}

/// Twisted ElGamal ciphertext of a balance or amount.
///
/// ```text
/// X := blinding * public_key
/// Y := blinding * g + value * h
/// ```
/// where `g` and `h` are two orthogonal generators.
#[derive(Copy, Clone, Encode, Decode, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherText {
    pub x: WrappedRistretto,
    pub y: WrappedRistretto,
}

impl CipherText {
    /// Create a `CipherText` when the `value` isn't secret (e.g. a
    /// public faucet deposit on testnet).
    pub fn value(value: Scalar) -> Self {
        let gens = PedersenGens::default();
        Self {
            x: Default::default(),
            y: (value * gens.B).into(),
        }
    }

    /// Create a `CipherText` with zero value and blinding factors.
    ///
    /// Useful for account initialization (zero balance).
    pub fn zero() -> Self {
        Default::default()
    }
}

// ------------------------------------------------------------------------
// Arithmetic operations on the ciphertext.
// ------------------------------------------------------------------------

impl<'a, 'b> Add<&'b CipherText> for &'a CipherText {
    type Output = CipherText;

    fn add(self, other: &'b CipherText) -> CipherText {
        CipherText {
            x: (*self.x + *other.x).into(),
            y: (*self.y + *other.y).into(),
        }
    }
}
define_add_variants!(LHS = CipherText, RHS = CipherText, Output = CipherText);

impl<'b> AddAssign<&'b CipherText> for CipherText {
    fn add_assign(&mut self, _rhs: &CipherText) {
        *self = (self as &CipherText) + _rhs;
    }
}
define_add_assign_variants!(LHS = CipherText, RHS = CipherText);

impl<'a, 'b> Sub<&'b CipherText> for &'a CipherText {
    type Output = CipherText;

    fn sub(self, other: &'b CipherText) -> CipherText {
        CipherText {
            x: (*self.x - *other.x).into(),
            y: (*self.y - *other.y).into(),
        }
    }
}
define_sub_variants!(LHS = CipherText, RHS = CipherText, Output = CipherText);

impl<'b> SubAssign<&'b CipherText> for CipherText {
    fn sub_assign(&mut self, _rhs: &CipherText) {
        *self = (self as &CipherText) - _rhs;
    }
}
define_sub_assign_variants!(LHS = CipherText, RHS = CipherText);

// ------------------------------------------------------------------------
// ElGamal encryption.
// ------------------------------------------------------------------------

/// An ElGamal secret key is a random scalar.
#[derive(Clone, Encode, Decode, Zeroize, ZeroizeOnDrop, Debug, Serialize, Deserialize)]
pub struct ElgamalSecretKey {
    pub secret: crate::codec_wrapper::WrappedScalar,
}

impl Deref for ElgamalSecretKey {
    type Target = Scalar;
    fn deref(&self) -> &Self::Target {
        &self.secret
    }
}

/// The ElGamal public key is the secret key multiplied by the blinding
/// generator (g).
#[derive(Copy, Clone, Encode, Decode, Default, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ElgamalPublicKey {
    pub pub_key: WrappedRistretto,
}

impl ElgamalPublicKey {
    fn encrypt_helper(&self, value: Scalar, blinding: Scalar) -> CipherText {
        let x = blinding * *self.pub_key;
        let gens = PedersenGens::default();
        let y = gens.commit(value, blinding).into();
        CipherText { x: x.into(), y }
    }

    pub fn encrypt(&self, witness: &CommitmentWitness) -> CipherText {
        self.encrypt_helper(witness.value, witness.blinding)
    }

    /// Generates a fresh blinding factor, and encrypts the value.
    pub fn encrypt_value<R: RngCore + CryptoRng>(
        &self,
        value: Scalar,
        rng: &mut R,
    ) -> (CommitmentWitness, CipherText) {
        let blinding = Scalar::random(rng);
        (
            CommitmentWitness { value, blinding },
            self.encrypt_helper(value, blinding),
        )
    }

    /// Encrypts an amount and derives the AE hint that lets the key
    /// holder recover it in constant time later.
    pub fn encrypt_amount_with_hint<R: RngCore + CryptoRng>(
        &self,
        amount: Balance,
        rng: &mut R,
    ) -> (CommitmentWitness, CipherText, CipherTextHint) {
        let (witness, cipher) = self.encrypt_value(amount.into(), rng);
        let hint = CipherTextHint::new(self, &cipher, amount, rng);
        (witness, cipher, hint)
    }
}

impl ElgamalSecretKey {
    pub fn new(secret: Scalar) -> Self {
        ElgamalSecretKey {
            secret: secret.into(),
        }
    }

    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self::new(Scalar::random(rng))
    }

    pub fn secret(&self) -> Scalar {
        *self.secret
    }

    pub fn get_public_key(&self) -> ElgamalPublicKey {
        let gens = PedersenGens::default();
        ElgamalPublicKey {
            pub_key: (self.secret() * gens.B_blinding).into(),
        }
    }

    /// Decrypt a ciphertext that is known to encrypt a `Balance`.
    ///
    /// This searches the whole plaintext space, `Balance::MAX`
    /// included, and is only reasonable for small balances; prefer
    /// `CipherTextHint::decrypt` or `decrypt_in_range`.
    pub fn decrypt(&self, cipher_text: &CipherText) -> Result<Balance> {
        if let Some(value) = self.decrypt_in_range(cipher_text, 0, Balance::MAX) {
            return Ok(value);
        }
        // The half-open search stops one short of Balance::MAX; check
        // that last candidate directly.
        self.verify(cipher_text, &Balance::MAX.into())
            .map(|()| Balance::MAX)
    }

    /// Bounded-search decryption over `[min, max)`.
    ///
    /// Used as the slow path when no AE hint is available, with a range
    /// derived from the last known decrypted balance.
    pub fn decrypt_in_range(
        &self,
        cipher_text: &CipherText,
        min: Balance,
        max: Balance,
    ) -> Option<Balance> {
        if min > max {
            return None;
        }
        let gens = PedersenGens::default();
        // value * h = Y - X / secret_key
        let value_h = *cipher_text.y - self.invert() * *cipher_text.x;
        let mut result = Scalar::from(min) * gens.B;
        for v in min..max {
            if result == value_h {
                return Some(v);
            }
            result += gens.B;
        }

        None
    }

    /// Verifies that a ciphertext encrypts the given `value`.
    ///
    /// Same logic as decryption, except the `value` is provided so no
    /// search is needed. This is the O(1) check backing the AE hint.
    pub fn verify(&self, cipher_text: &CipherText, value: &Scalar) -> Result<()> {
        let gens = PedersenGens::default();
        // value * h = Y - X / secret_key.
        let value_h = *cipher_text.y - self.invert() * *cipher_text.x;
        if value * gens.B == value_h {
            return Ok(());
        }

        Err(Error::CipherTextDecryptionError)
    }

    /// Re-encrypt a known balance under the same key with fresh
    /// randomness, verifying the claimed value against the old
    /// ciphertext first.
    ///
    /// Claim and withdraw flows must never reuse ciphertext randomness,
    /// so every balance mutation goes through this.
    pub fn refresh_with_value<R: RngCore + CryptoRng>(
        &self,
        cipher_text: &CipherText,
        value: Balance,
        rng: &mut R,
    ) -> Result<(CommitmentWitness, CipherText)> {
        self.verify(cipher_text, &value.into())?;
        let pub_key = self.get_public_key();
        Ok(pub_key.encrypt_value(value.into(), rng))
    }
}

/// A trader's ElGamal key pair.
#[derive(Clone, Zeroize, ZeroizeOnDrop, Debug, Serialize, Deserialize, Encode, Decode)]
pub struct ElgamalKeys {
    #[zeroize(skip)]
    pub public: ElgamalPublicKey,
    pub secret: ElgamalSecretKey,
}

impl ElgamalKeys {
    pub fn from_secret(secret: ElgamalSecretKey) -> Self {
        Self {
            public: secret.get_public_key(),
            secret,
        }
    }
}

// ------------------------------------------------------------------------
// Tests
// ------------------------------------------------------------------------
