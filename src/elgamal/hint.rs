//! Authenticated-encryption hint for O(1) ciphertext decryption.
//!
//! ElGamal decryption of a `Balance` requires a discrete-log search.
//! Whoever produced a ciphertext already knows its plaintext, so they
//! can attach a compact authenticated hint: an ECDH-wrapped copy of the
//! amount, MAC-bound to the exact `(ciphertext, public key)` pair. The
//! key holder unwraps the amount, checks the MAC, and then verifies the
//! plaintext against the ciphertext itself, all in constant time.
//!
//! A hint that fails authentication means "no hint available", not an
//! error: callers fall back to the bounded-search decryption path.

use curve25519_dalek::{ristretto::CompressedRistretto, scalar::Scalar};
use rand_core::{CryptoRng, RngCore};
use sha3::{Digest, Sha3_256};

use bulletproofs::PedersenGens;
use codec::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::{
    elgamal::{CipherText, ElgamalPublicKey, ElgamalSecretKey},
    Balance,
};

const HINT_KEY_DOMAIN: &[u8] = b"DarkPoolHintKeyV1";
const HINT_MAC_DOMAIN: &[u8] = b"DarkPoolHintMacV1";

/// Authenticated hint bound to one `(ciphertext, amount, public key)`
/// triple.
#[derive(Copy, Clone, Encode, Decode, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherTextHint {
    /// The amount, XOR-wrapped under the ECDH-derived key.
    pub encrypted_amount: [u8; 8],
    /// The ephemeral ECDH point `R = r * g`, serving as the nonce.
    pub nonce: [u8; 32],
    /// SHA3-256 tag binding the wrapped amount to the ciphertext and
    /// the recipient key.
    pub mac: [u8; 32],
}

fn derive_key(shared: &CompressedRistretto, cipher: &CipherText) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(HINT_KEY_DOMAIN);
    hasher.update(shared.as_bytes());
    hasher.update(cipher.x.compress().as_bytes());
    hasher.update(cipher.y.compress().as_bytes());
    hasher.finalize().into()
}

fn derive_mac(
    key: &[u8; 32],
    encrypted_amount: &[u8; 8],
    cipher: &CipherText,
    pub_key: &ElgamalPublicKey,
) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(HINT_MAC_DOMAIN);
    hasher.update(key);
    hasher.update(encrypted_amount);
    hasher.update(cipher.x.compress().as_bytes());
    hasher.update(cipher.y.compress().as_bytes());
    hasher.update(pub_key.pub_key.compress().as_bytes());
    hasher.finalize().into()
}

fn xor_amount(amount_bytes: [u8; 8], key: &[u8; 32]) -> [u8; 8] {
    let mut out = [0u8; 8];
    for (i, b) in amount_bytes.iter().enumerate() {
        out[i] = b ^ key[i];
    }
    out
}

impl CipherTextHint {
    /// Build a hint for an `amount` known to be encrypted in `cipher`
    /// under `pub_key`.
    pub fn new<R: RngCore + CryptoRng>(
        pub_key: &ElgamalPublicKey,
        cipher: &CipherText,
        amount: Balance,
        rng: &mut R,
    ) -> Self {
        let gens = PedersenGens::default();
        let r = Scalar::random(rng);
        let nonce_point = r * gens.B_blinding;
        // Creator side of the ECDH: S = r * PK.
        let shared = (r * *pub_key.pub_key).compress();

        let key = derive_key(&shared, cipher);
        let encrypted_amount = xor_amount(amount.to_le_bytes(), &key);
        let mac = derive_mac(&key, &encrypted_amount, cipher, pub_key);

        Self {
            encrypted_amount,
            nonce: nonce_point.compress().to_bytes(),
            mac,
        }
    }

    /// Recover the amount bound to `cipher`, or `None` if the hint does
    /// not authenticate against the current ciphertext.
    pub fn decrypt(&self, secret_key: &ElgamalSecretKey, cipher: &CipherText) -> Option<Balance> {
        let nonce_point = CompressedRistretto(self.nonce).decompress()?;
        // Holder side of the ECDH: S = sk * R = r * PK.
        let shared = (secret_key.secret() * nonce_point).compress();

        let key = derive_key(&shared, cipher);
        let pub_key = secret_key.get_public_key();
        if derive_mac(&key, &self.encrypted_amount, cipher, &pub_key) != self.mac {
            return None;
        }

        let amount = Balance::from_le_bytes(xor_amount(self.encrypted_amount, &key));
        // The MAC binds the hint to this ciphertext, but the final word
        // on the plaintext belongs to the ciphertext itself.
        secret_key.verify(cipher, &amount.into()).ok()?;
        Some(amount)
    }
}
