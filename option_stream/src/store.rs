//! Quote store: last known field values per contract.
//!
//! One mutex guards the whole table. Update volume is bounded by a single options chain
//! (hundreds to low thousands of contracts), so per-key locking buys nothing. Readers
//! only ever get copies.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::warn;
use option_common::contract::{OptionType, QuoteKey};
use option_common::fields::{FieldName, FieldValue};
use option_common::{Result, StreamError};
use parking_lot::Mutex;
use serde::Serialize;

/// Latest value of every field seen for one contract.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRecord {
    pub description: Option<String>,
    pub bid_price: Option<f64>,
    pub ask_price: Option<f64>,
    pub last_price: Option<f64>,
    pub high_price: Option<f64>,
    pub low_price: Option<f64>,
    pub close_price: Option<f64>,
    pub open_price: Option<f64>,
    pub net_change: Option<f64>,
    pub mark: Option<f64>,
    pub bid_size: Option<u64>,
    pub ask_size: Option<u64>,
    pub last_size: Option<u64>,
    pub total_volume: Option<u64>,
    pub open_interest: Option<u64>,
    pub volatility: Option<f64>,
    pub delta: Option<f64>,
    pub gamma: Option<f64>,
    pub theta: Option<f64>,
    pub vega: Option<f64>,
    pub rho: Option<f64>,
    pub time_value: Option<f64>,
    pub theoretical_value: Option<f64>,
    pub underlying_price: Option<f64>,
    pub days_to_expiration: Option<f64>,
    pub strike_price: Option<f64>,
    pub contract_type: Option<OptionType>,
}

impl QuoteRecord {
    /// Overwrite one field.
    pub fn set(&mut self, field: FieldName, value: FieldValue) -> Result<()> {
        match field {
            FieldName::Description => self.description = Some(text(field, value)?),
            FieldName::BidPrice => self.bid_price = Some(number(field, value)?),
            FieldName::AskPrice => self.ask_price = Some(number(field, value)?),
            FieldName::LastPrice => self.last_price = Some(number(field, value)?),
            FieldName::HighPrice => self.high_price = Some(number(field, value)?),
            FieldName::LowPrice => self.low_price = Some(number(field, value)?),
            FieldName::ClosePrice => self.close_price = Some(number(field, value)?),
            FieldName::OpenPrice => self.open_price = Some(number(field, value)?),
            FieldName::NetChange => self.net_change = Some(number(field, value)?),
            FieldName::Mark => self.mark = Some(number(field, value)?),
            FieldName::BidSize => self.bid_size = Some(count(field, value)?),
            FieldName::AskSize => self.ask_size = Some(count(field, value)?),
            FieldName::LastSize => self.last_size = Some(count(field, value)?),
            FieldName::TotalVolume => self.total_volume = Some(count(field, value)?),
            FieldName::OpenInterest => self.open_interest = Some(count(field, value)?),
            FieldName::Volatility => self.volatility = Some(number(field, value)?),
            FieldName::Delta => self.delta = Some(number(field, value)?),
            FieldName::Gamma => self.gamma = Some(number(field, value)?),
            FieldName::Theta => self.theta = Some(number(field, value)?),
            FieldName::Vega => self.vega = Some(number(field, value)?),
            FieldName::Rho => self.rho = Some(number(field, value)?),
            FieldName::TimeValue => self.time_value = Some(number(field, value)?),
            FieldName::TheoreticalValue => self.theoretical_value = Some(number(field, value)?),
            FieldName::UnderlyingPrice => self.underlying_price = Some(number(field, value)?),
            FieldName::DaysToExpiration => self.days_to_expiration = Some(number(field, value)?),
            FieldName::StrikePrice => self.strike_price = Some(number(field, value)?),
            FieldName::ContractType => match value {
                FieldValue::ContractType(option_type) => self.contract_type = Some(option_type),
                other => return Err(mismatch(field, &other)),
            },
        }
        Ok(())
    }

    /// Current value of one field.
    pub fn get(&self, field: FieldName) -> Option<FieldValue> {
        let number = |v: Option<f64>| v.map(FieldValue::Number);
        let count = |v: Option<u64>| v.map(|c| FieldValue::Number(c as f64));
        match field {
            FieldName::Description => self.description.clone().map(FieldValue::Text),
            FieldName::BidPrice => number(self.bid_price),
            FieldName::AskPrice => number(self.ask_price),
            FieldName::LastPrice => number(self.last_price),
            FieldName::HighPrice => number(self.high_price),
            FieldName::LowPrice => number(self.low_price),
            FieldName::ClosePrice => number(self.close_price),
            FieldName::OpenPrice => number(self.open_price),
            FieldName::NetChange => number(self.net_change),
            FieldName::Mark => number(self.mark),
            FieldName::BidSize => count(self.bid_size),
            FieldName::AskSize => count(self.ask_size),
            FieldName::LastSize => count(self.last_size),
            FieldName::TotalVolume => count(self.total_volume),
            FieldName::OpenInterest => count(self.open_interest),
            FieldName::Volatility => number(self.volatility),
            FieldName::Delta => number(self.delta),
            FieldName::Gamma => number(self.gamma),
            FieldName::Theta => number(self.theta),
            FieldName::Vega => number(self.vega),
            FieldName::Rho => number(self.rho),
            FieldName::TimeValue => number(self.time_value),
            FieldName::TheoreticalValue => number(self.theoretical_value),
            FieldName::UnderlyingPrice => number(self.underlying_price),
            FieldName::DaysToExpiration => number(self.days_to_expiration),
            FieldName::StrikePrice => number(self.strike_price),
            FieldName::ContractType => self.contract_type.map(FieldValue::ContractType),
        }
    }
}

fn mismatch(field: FieldName, value: &FieldValue) -> StreamError {
    StreamError::FieldDecode {
        field: field.to_string(),
        reason: format!("unexpected value {value:?}"),
    }
}

fn number(field: FieldName, value: FieldValue) -> Result<f64> {
    match value {
        FieldValue::Number(n) => Ok(n),
        other => Err(mismatch(field, &other)),
    }
}

fn count(field: FieldName, value: FieldValue) -> Result<u64> {
    match value {
        FieldValue::Number(n) if n.is_finite() && n >= 0.0 => Ok(n.round() as u64),
        other => Err(mismatch(field, &other)),
    }
}

fn text(field: FieldName, value: FieldValue) -> Result<String> {
    match value {
        FieldValue::Text(s) => Ok(s),
        other => Err(mismatch(field, &other)),
    }
}

#[derive(Default)]
struct StoreInner {
    records: HashMap<QuoteKey, QuoteRecord>,
    last_update: Option<DateTime<Utc>>,
}

/// Concurrent last-value cache keyed by canonical contract key.
#[derive(Default)]
pub struct QuoteStore {
    inner: Mutex<StoreInner>,
}

impl QuoteStore {
    #[allow(missing_docs)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last-write-wins update of one field. Creates the record on first sight of `key`.
    pub fn merge(&self, key: QuoteKey, field: FieldName, value: FieldValue) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.last_update = Some(Utc::now());
        inner.records.entry(key).or_default().set(field, value)
    }

    /// Apply one group of updates under a single lock hold.
    ///
    /// Returns how many fields were applied; mismatched values are logged and skipped.
    pub fn merge_all(&self, key: QuoteKey, updates: Vec<(FieldName, FieldValue)>) -> usize {
        let mut inner = self.inner.lock();
        inner.last_update = Some(Utc::now());
        let record = inner.records.entry(key).or_default();
        let mut applied = 0;
        for (field, value) in updates {
            match record.set(field, value) {
                Ok(()) => applied += 1,
                Err(e) => warn!("Skipping field update: {e}"),
            }
        }
        applied
    }

    /// Copy of every record.
    pub fn snapshot(&self) -> HashMap<QuoteKey, QuoteRecord> {
        self.inner.lock().records.clone()
    }

    /// Copy of one record.
    pub fn get(&self, key: &QuoteKey) -> Option<QuoteRecord> {
        self.inner.lock().records.get(key).cloned()
    }

    /// Number of contracts with a record.
    pub fn count(&self) -> usize {
        self.inner.lock().records.len()
    }

    /// Wall-clock time of the latest merge.
    pub fn last_update_time(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().last_update
    }

    /// Drop every record; used when a new session starts.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.records.clear();
        inner.last_update = None;
    }
}
