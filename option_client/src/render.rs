//! Plain-text rendering of stream status and quote rows.

use std::collections::HashMap;
use std::str::FromStr;

use log::warn;
use option_common::contract::QuoteKey;
use option_common::fields::{FieldName, FieldValue, column_name_for};
use option_stream::{QuoteRecord, StreamStatus};

/// Columns printed when `--show` is not given.
pub const DEFAULT_COLUMNS: &[FieldName] = &[
    FieldName::ContractType,
    FieldName::StrikePrice,
    FieldName::BidPrice,
    FieldName::AskPrice,
    FieldName::Mark,
    FieldName::TotalVolume,
    FieldName::OpenInterest,
    FieldName::Volatility,
    FieldName::Delta,
];

const KEY_WIDTH: usize = 22;
const COLUMN_WIDTH: usize = 11;

/// Resolve `--show` names; unknown names are reported and skipped.
pub fn columns_from_names(names: &[String]) -> Vec<FieldName> {
    if names.is_empty() {
        return DEFAULT_COLUMNS.to_vec();
    }
    names
        .iter()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .filter_map(|name| match FieldName::from_str(name) {
            Ok(field) => Some(field),
            Err(_) => {
                warn!("Unknown field {name:?} in --show, skipping it");
                None
            }
        })
        .collect()
}

/// One-line summary of the supervisor state.
pub fn status_line(status: &StreamStatus) -> String {
    let mut line = format!(
        "[{}] {} | subscribed={} quotes={} messages={} unmapped={} reconnects={}",
        status.state,
        status.status_message,
        status.subscribed_count,
        status.quote_count,
        status.messages_processed,
        status.unmapped_fields,
        status.reconnect_attempts,
    );
    if let Some(at) = status.last_data_update {
        line.push_str(&format!(" last_data={}", at.format("%H:%M:%S%.3f")));
    }
    if let Some(error) = &status.error_message {
        line.push_str(&format!(" error={error:?}"));
    }
    line
}

/// Header plus up to `limit` rows, sorted by key.
pub fn quote_table(
    data: &HashMap<QuoteKey, QuoteRecord>,
    columns: &[FieldName],
    limit: usize,
) -> String {
    let mut out = format!("{:<KEY_WIDTH$}", "Contract");
    for column in columns {
        out.push_str(&format!("{:>COLUMN_WIDTH$}", column_name_for(column.as_ref())));
    }
    out.push('\n');

    let mut keys: Vec<&QuoteKey> = data.keys().collect();
    keys.sort_by_cached_key(|key| key.to_string());
    for key in keys.into_iter().take(limit) {
        out.push_str(&format!("{:<KEY_WIDTH$}", key.to_string()));
        let record = &data[key];
        for column in columns {
            out.push_str(&format!("{:>COLUMN_WIDTH$}", cell(record.get(*column))));
        }
        out.push('\n');
    }
    if data.len() > limit {
        out.push_str(&format!("... {} more\n", data.len() - limit));
    }
    out
}

fn cell(value: Option<FieldValue>) -> String {
    match value {
        None => "-".to_string(),
        Some(FieldValue::Number(n)) if n.fract() == 0.0 && n.abs() < 1e12 => format!("{n:.0}"),
        Some(FieldValue::Number(n)) => format!("{n:.2}"),
        Some(FieldValue::Text(text)) => text,
        Some(FieldValue::ContractType(option_type)) => option_type.to_string(),
    }
}
