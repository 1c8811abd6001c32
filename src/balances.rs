//! Encrypted balance management for one trader.
//!
//! The ledger stores one twisted ElGamal ciphertext per `(trader,
//! asset)` pair, accompanied by an AE hint written at the last balance
//! mutation. Refreshing a balance tries the hint first (constant
//! time), then falls back to a bounded search around the last known
//! value; a balance that survives neither stays undecrypted, and
//! flows that need the plaintext fail with `BalanceNotDecrypted`
//! rather than guess.

use std::{collections::HashMap, sync::Arc};

use rand_core::{CryptoRng, RngCore};

use crate::{
    elgamal::{CipherText, CipherTextHint},
    errors::{Error, Result},
    ledger::{DepositTx, Ledger, TxRef, WithdrawTx},
    order::to_fixed,
    proofs::{ensure_sound, BalanceProof},
    AssetId, Balance, ElgamalKeys, TraderAddress,
};

/// Half-width of the fallback search window, centred on the last known
/// decrypted balance. 100 whole units at four decimals.
pub const FALLBACK_SEARCH_WINDOW: Balance = to_fixed(100);

/// Local view of one asset's encrypted balance.
#[derive(Debug, Clone, Copy, Default)]
struct BalanceEntry {
    ciphertext: Option<CipherText>,
    /// Present only when the current ciphertext was decrypted.
    decrypted: Option<Balance>,
    /// Last value that ever decrypted, kept as the fallback-search
    /// anchor even after the ciphertext moves on.
    last_known: Option<Balance>,
    /// Hint written by this client's own last balance mutation. Kept
    /// locally so decryption survives a ledger that does not persist
    /// hints.
    local_hint: Option<CipherTextHint>,
}

pub struct BalanceClient {
    ledger: Arc<dyn Ledger>,
    keys: ElgamalKeys,
    trader: TraderAddress,
    assets: Vec<AssetId>,
    entries: HashMap<AssetId, BalanceEntry>,
}

impl BalanceClient {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        keys: ElgamalKeys,
        trader: TraderAddress,
        assets: Vec<AssetId>,
    ) -> Self {
        Self {
            ledger,
            keys,
            trader,
            assets,
            entries: HashMap::new(),
        }
    }

    /// The decrypted balance of `asset_id`, if the current ciphertext
    /// has been decrypted.
    pub fn decrypted(&self, asset_id: AssetId) -> Option<Balance> {
        self.entries.get(&asset_id).and_then(|e| e.decrypted)
    }

    /// The current on-ledger ciphertext, as of the last refresh.
    pub fn ciphertext(&self, asset_id: AssetId) -> Option<CipherText> {
        self.entries.get(&asset_id).and_then(|e| e.ciphertext)
    }

    /// Remember a hint this client produced for the asset's current or
    /// upcoming ciphertext. A stale cached hint is harmless: it simply
    /// fails authentication on the next refresh.
    pub fn cache_hint(&mut self, asset_id: AssetId, hint: CipherTextHint) {
        self.entries.entry(asset_id).or_default().local_hint = Some(hint);
    }

    /// Whether the asset's balance is tracked but currently blind.
    pub fn is_blind(&self, asset_id: AssetId) -> bool {
        self.entries
            .get(&asset_id)
            .map(|e| e.ciphertext.is_some() && e.decrypted.is_none())
            .unwrap_or(false)
    }

    /// Re-read and re-decrypt every tracked asset balance.
    ///
    /// Read failures keep the previous entry; decryption failures leave
    /// the entry blind. Neither raises, since refresh runs from the
    /// polling loop.
    pub async fn refresh_balances(&mut self) {
        for i in 0..self.assets.len() {
            let asset_id = self.assets[i];
            self.refresh_one(asset_id).await;
        }
    }

    async fn refresh_one(&mut self, asset_id: AssetId) {
        let (cipher, hint) = tokio::join!(
            self.ledger.encrypted_balance(&self.trader, asset_id),
            self.ledger.balance_hint(&self.trader, asset_id),
        );

        let cipher = match cipher {
            Ok(cipher) => cipher,
            Err(err) => {
                log::warn!("balance read failed for asset {asset_id}: {err}");
                return;
            }
        };
        let hint = hint.unwrap_or_else(|err| {
            log::warn!("hint read failed for asset {asset_id}: {err}");
            None
        });

        let entry = self.entries.entry(asset_id).or_default();
        if entry.ciphertext == Some(cipher) && entry.decrypted.is_some() {
            return;
        }

        // Constant-time path: the ledger's stored hint, then the hint
        // this client wrote itself. Either decrypts only if it is
        // honest about the current ciphertext.
        let mut value = hint.and_then(|hint| hint.decrypt(&self.keys.secret, &cipher));
        if value.is_none() {
            if let Some(local) = entry.local_hint {
                value = local.decrypt(&self.keys.secret, &cipher);
            }
        }

        // Slow path: bounded search around the last known value.
        if value.is_none() {
            if let Some(anchor) = entry.last_known {
                let min = anchor.saturating_sub(FALLBACK_SEARCH_WINDOW);
                let max = anchor.saturating_add(FALLBACK_SEARCH_WINDOW);
                value = self.keys.secret.decrypt_in_range(&cipher, min, max);
            } else {
                // Fresh account with no anchor: only small balances are
                // recoverable without a hint.
                value = self
                    .keys
                    .secret
                    .decrypt_in_range(&cipher, 0, FALLBACK_SEARCH_WINDOW);
            }
        }

        if value.is_none() {
            log::warn!("balance for asset {asset_id} could not be decrypted; leaving it blind");
        }

        entry.ciphertext = Some(cipher);
        entry.decrypted = value;
        if let Some(v) = value {
            entry.last_known = Some(v);
        }
    }

    /// Deposit `amount` into the encrypted balance.
    ///
    /// The deposit ciphertext uses fresh randomness and ships a fresh
    /// hint so the next refresh decrypts in O(1).
    pub async fn deposit<R: RngCore + CryptoRng>(
        &mut self,
        asset_id: AssetId,
        amount: Balance,
        rng: &mut R,
    ) -> Result<TxRef> {
        if amount == 0 {
            return Err(Error::InvalidAmount);
        }
        let (_, encrypted_amount, hint) = self.keys.public.encrypt_amount_with_hint(amount, rng);

        let receipt = self
            .ledger
            .submit_deposit(DepositTx {
                trader: self.trader,
                asset_id,
                amount,
                encrypted_amount,
                hint,
            })
            .await?;
        log::info!("deposited {amount} of asset {asset_id} ({})", receipt.tx_ref.0);

        self.cache_hint(asset_id, hint);
        self.refresh_one(asset_id).await;
        Ok(receipt.tx_ref)
    }

    /// Withdraw `amount` from the encrypted balance.
    ///
    /// Requires a decrypted local view; fails before any submission if
    /// the balance is blind or insufficient. The transaction carries a
    /// sufficiency proof and a hint for the *resulting* balance.
    pub async fn withdraw<R: RngCore + CryptoRng>(
        &mut self,
        asset_id: AssetId,
        amount: Balance,
        rng: &mut R,
    ) -> Result<TxRef> {
        if amount == 0 {
            return Err(Error::InvalidAmount);
        }
        let entry = self
            .entries
            .get(&asset_id)
            .ok_or(Error::BalanceNotDecrypted { asset_id })?;
        let current_cipher = entry
            .ciphertext
            .ok_or(Error::BalanceNotDecrypted { asset_id })?;
        let balance = entry
            .decrypted
            .ok_or(Error::BalanceNotDecrypted { asset_id })?;
        ensure!(balance >= amount, Error::NotEnoughFund { balance, amount });

        let proof = BalanceProof::prove(&self.keys, &self.trader, asset_id, balance, amount, rng)?;
        ensure_sound(&proof.challenge())?;

        let (_, encrypted_amount) = self.keys.public.encrypt_value(amount.into(), rng);
        // The ledger subtracts the ciphertext homomorphically, so the
        // hint must bind the resulting ciphertext, computed here the
        // same way.
        let remaining = balance - amount;
        let new_cipher = current_cipher - encrypted_amount;
        let new_balance_hint =
            crate::elgamal::CipherTextHint::new(&self.keys.public, &new_cipher, remaining, rng);

        let receipt = self
            .ledger
            .submit_withdraw(WithdrawTx {
                trader: self.trader,
                asset_id,
                amount,
                encrypted_amount,
                proof,
                new_balance_hint,
            })
            .await?;
        log::info!("withdrew {amount} of asset {asset_id} ({})", receipt.tx_ref.0);

        self.cache_hint(asset_id, new_balance_hint);
        self.refresh_one(asset_id).await;
        Ok(receipt.tx_ref)
    }
}
