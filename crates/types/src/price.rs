use crate::{Amount, AmountError, Asset};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Wei per whole ETH.
pub const WEI_PER_ETH: u128 = 1_000_000_000_000_000_000;

/// Micro-units per whole PYUSD.
pub const MICRO_PER_PYUSD: u128 = 1_000_000;

#[derive(Debug, Error, PartialEq)]
pub enum PriceError {
    #[error("reference price must be a positive finite number, got {0}")]
    NotPositive(f64),

    #[error("conversion overflow at price {0}")]
    Overflow(u128),
}

/// Externally supplied valuation price: micro-PYUSD per whole ETH.
///
/// The relayer performs no price discovery; every batch and every PnL
/// recompute is valued at the price the caller passed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferencePrice(u128);

impl ReferencePrice {
    /// Build from a quote in whole PYUSD per ETH (e.g. `3000.25`).
    pub fn from_quote(quote: f64) -> Result<Self, PriceError> {
        if !quote.is_finite() || quote <= 0.0 {
            return Err(PriceError::NotPositive(quote));
        }
        let micro = (quote * MICRO_PER_PYUSD as f64).floor() as u128;
        if micro == 0 {
            return Err(PriceError::NotPositive(quote));
        }
        Ok(ReferencePrice(micro))
    }

    pub fn micro_per_eth(&self) -> u128 {
        self.0
    }

    /// ETH (wei) received for a PYUSD amount at this price.
    pub fn eth_out(&self, pyusd_in: Amount) -> Result<Amount, PriceError> {
        pyusd_in
            .0
            .checked_mul(WEI_PER_ETH)
            .map(|scaled| Amount(scaled / self.0))
            .ok_or(PriceError::Overflow(self.0))
    }

    /// PYUSD (micro) received for an ETH amount at this price.
    pub fn pyusd_out(&self, eth_in: Amount) -> Result<Amount, PriceError> {
        eth_in
            .0
            .checked_mul(self.0)
            .map(|scaled| Amount(scaled / WEI_PER_ETH))
            .ok_or(PriceError::Overflow(self.0))
    }

    /// Amount of `to` asset received for `amount` of the opposite asset.
    pub fn convert(&self, amount: Amount, to: Asset) -> Result<Amount, PriceError> {
        match to {
            Asset::Eth => self.eth_out(amount),
            Asset::Pyusd => self.pyusd_out(amount),
        }
    }

    /// Total portfolio value in micro-PYUSD at this price.
    pub fn mark_to_market(
        &self,
        positions: &HashMap<Asset, Amount>,
    ) -> Result<Amount, MarkToMarketError> {
        let pyusd = positions.get(&Asset::Pyusd).copied().unwrap_or(Amount::ZERO);
        let eth = positions.get(&Asset::Eth).copied().unwrap_or(Amount::ZERO);
        let eth_value = self.pyusd_out(eth)?;
        Ok(pyusd.checked_add(eth_value)?)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum MarkToMarketError {
    #[error(transparent)]
    Price(#[from] PriceError),

    #[error(transparent)]
    Amount(#[from] AmountError),
}
