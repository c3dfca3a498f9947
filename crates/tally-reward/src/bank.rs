//! Account balances.
//!
//! Balances live in the block store, so escrow transfers, payouts and
//! burns commit or roll back together with the rest of the block.

use tally_store::{codec, keys, KvStore};
use tally_types::{Address, Coin};

use crate::{RewardError, Result};

/// Balance bookkeeping used by the reward module.
pub trait Bank: Send + Sync {
    fn balance(&self, store: &dyn KvStore, address: &Address, denom: &str) -> Result<u64>;

    /// Move `coin` from `from` to `to`.
    ///
    /// # Errors
    ///
    /// - [`RewardError::InsufficientFunds`] if `from` holds less than `coin`
    fn send(&self, store: &mut dyn KvStore, from: &Address, to: &Address, coin: &Coin) -> Result<()>;

    /// Destroy `coin` held by `from`.
    fn burn(&self, store: &mut dyn KvStore, from: &Address, coin: &Coin) -> Result<()>;
}

/// [`Bank`] backed by balance records in the block store.
#[derive(Clone, Copy, Debug, Default)]
pub struct LedgerBank;

impl LedgerBank {
    /// Credit new coin to `to`. Used for genesis accounts.
    pub fn mint(&self, store: &mut dyn KvStore, to: &Address, coin: &Coin) -> Result<()> {
        let balance = self.balance(store, to, &coin.denom)?;
        let updated = balance
            .checked_add(coin.amount)
            .ok_or_else(|| RewardError::Overflow(format!("balance of {to} in {}", coin.denom)))?;
        write_balance(store, to, &coin.denom, updated)?;
        tracing::debug!(%to, %coin, "minted");
        Ok(())
    }

    fn debit(&self, store: &mut dyn KvStore, from: &Address, coin: &Coin) -> Result<()> {
        let available = self.balance(store, from, &coin.denom)?;
        if available < coin.amount {
            return Err(RewardError::InsufficientFunds {
                address: from.clone(),
                denom: coin.denom.clone(),
                needed: coin.amount,
                available,
            });
        }
        write_balance(store, from, &coin.denom, available - coin.amount)
    }
}

impl Bank for LedgerBank {
    fn balance(&self, store: &dyn KvStore, address: &Address, denom: &str) -> Result<u64> {
        Ok(codec::get(store, &keys::balance_key(address, denom))?.unwrap_or(0))
    }

    fn send(&self, store: &mut dyn KvStore, from: &Address, to: &Address, coin: &Coin) -> Result<()> {
        if coin.is_zero() || from == to {
            return Ok(());
        }
        self.debit(store, from, coin)?;
        self.mint(store, to, coin)?;
        tracing::debug!(%from, %to, %coin, "transfer");
        Ok(())
    }

    fn burn(&self, store: &mut dyn KvStore, from: &Address, coin: &Coin) -> Result<()> {
        if coin.is_zero() {
            return Ok(());
        }
        self.debit(store, from, coin)?;
        tracing::debug!(%from, %coin, "burned");
        Ok(())
    }
}

fn write_balance(store: &mut dyn KvStore, address: &Address, denom: &str, amount: u64) -> Result<()> {
    let key = keys::balance_key(address, denom);
    if amount == 0 {
        store.delete(&key)?;
    } else {
        codec::put(store, &key, &amount)?;
    }
    Ok(())
}
