//! Wire field catalog.
//!
//! The vendor feed identifies quote fields by small numeric ids (`"2"` is the bid) or,
//! on some frames, by short letter codes (`"C"` is the contract type). This module maps
//! both to a typed [`FieldName`], maps field names to display column titles, and turns
//! the loosely-typed JSON values into [`FieldValue`]s.
//!
//! Two tables exist: the compact list of ids requested at subscribe time
//! ([`SUBSCRIPTION_FIELDS`]) and the larger display table used to decode whatever the
//! feed sends. [`FieldCatalog::new`] unifies them and refuses a subscription list that
//! asks for ids the display table cannot decode.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

use crate::contract::OptionType;
use crate::error::StreamError;
use crate::result::Result;

/// Semantic quote field.
#[allow(missing_docs)]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum FieldName {
    Description,
    BidPrice,
    AskPrice,
    LastPrice,
    HighPrice,
    LowPrice,
    ClosePrice,
    OpenPrice,
    NetChange,
    Mark,
    BidSize,
    AskSize,
    LastSize,
    TotalVolume,
    OpenInterest,
    Volatility,
    Delta,
    Gamma,
    Theta,
    Vega,
    Rho,
    TimeValue,
    TheoreticalValue,
    UnderlyingPrice,
    DaysToExpiration,
    StrikePrice,
    ContractType,
}

/// Value shape a field carries once decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Prices, sizes, greeks.
    Number,
    /// Free text.
    Text,
    /// `CALL` / `PUT`.
    ContractType,
}

impl FieldName {
    /// Value shape of this field.
    pub fn kind(self) -> FieldKind {
        match self {
            FieldName::Description => FieldKind::Text,
            FieldName::ContractType => FieldKind::ContractType,
            _ => FieldKind::Number,
        }
    }

    /// Column title used by the display layer.
    pub fn column_name(self) -> &'static str {
        match self {
            FieldName::Description => "Description",
            FieldName::BidPrice => "Bid",
            FieldName::AskPrice => "Ask",
            FieldName::LastPrice => "Last",
            FieldName::HighPrice => "High",
            FieldName::LowPrice => "Low",
            FieldName::ClosePrice => "Close",
            FieldName::OpenPrice => "Open",
            FieldName::NetChange => "Net Chg",
            FieldName::Mark => "Mark",
            FieldName::BidSize => "Bid Size",
            FieldName::AskSize => "Ask Size",
            FieldName::LastSize => "Last Size",
            FieldName::TotalVolume => "Volume",
            FieldName::OpenInterest => "Open Int",
            FieldName::Volatility => "IV",
            FieldName::Delta => "Delta",
            FieldName::Gamma => "Gamma",
            FieldName::Theta => "Theta",
            FieldName::Vega => "Vega",
            FieldName::Rho => "Rho",
            FieldName::TimeValue => "Time Value",
            FieldName::TheoreticalValue => "Theo Value",
            FieldName::UnderlyingPrice => "Underlying",
            FieldName::DaysToExpiration => "DTE",
            FieldName::StrikePrice => "Strike",
            FieldName::ContractType => "Type",
        }
    }
}

/// Display column for a semantic field name; unknown names are returned as given.
pub fn column_name_for(field_name: &str) -> String {
    FieldName::from_str(field_name)
        .map(|name| name.column_name().to_string())
        .unwrap_or_else(|_| field_name.to_string())
}

/// Field identifier as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldId {
    /// Numeric id, e.g. `2` for the bid.
    Numeric(u16),
    /// Short letter code, e.g. `C` for the contract type.
    Code(String),
}

impl From<&str> for FieldId {
    fn from(raw: &str) -> Self {
        match raw.parse::<u16>() {
            Ok(id) => FieldId::Numeric(id),
            Err(_) => FieldId::Code(raw.to_string()),
        }
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldId::Numeric(id) => write!(f, "{id}"),
            FieldId::Code(code) => f.write_str(code),
        }
    }
}

/// Decoded field value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Numeric value.
    Number(f64),
    /// Text value.
    Text(String),
    /// Expanded contract type.
    ContractType(OptionType),
}

/// Ids requested in the subscribe call.
pub const SUBSCRIPTION_FIELDS: &[u16] = &[2, 3, 4, 8, 9, 10, 19, 20, 21, 28, 29, 30, 31, 37];

/// Numeric ids the feed may send.
pub const DISPLAY_FIELDS: &[(u16, FieldName)] = &[
    (1, FieldName::Description),
    (2, FieldName::BidPrice),
    (3, FieldName::AskPrice),
    (4, FieldName::LastPrice),
    (5, FieldName::HighPrice),
    (6, FieldName::LowPrice),
    (7, FieldName::ClosePrice),
    (8, FieldName::TotalVolume),
    (9, FieldName::OpenInterest),
    (10, FieldName::Volatility),
    (15, FieldName::OpenPrice),
    (16, FieldName::BidSize),
    (17, FieldName::AskSize),
    (18, FieldName::LastSize),
    (19, FieldName::NetChange),
    (20, FieldName::StrikePrice),
    (21, FieldName::ContractType),
    (25, FieldName::TimeValue),
    (27, FieldName::DaysToExpiration),
    (28, FieldName::Delta),
    (29, FieldName::Gamma),
    (30, FieldName::Theta),
    (31, FieldName::Vega),
    (32, FieldName::Rho),
    (34, FieldName::TheoreticalValue),
    (35, FieldName::UnderlyingPrice),
    (37, FieldName::Mark),
];

/// Letter codes used by the compact frame variant.
pub const SHORT_CODES: &[(&str, FieldName)] = &[
    ("B", FieldName::BidPrice),
    ("A", FieldName::AskPrice),
    ("L", FieldName::LastPrice),
    ("V", FieldName::TotalVolume),
    ("OI", FieldName::OpenInterest),
    ("IV", FieldName::Volatility),
    ("S", FieldName::StrikePrice),
    ("C", FieldName::ContractType),
    ("D", FieldName::Delta),
    ("G", FieldName::Gamma),
    ("T", FieldName::Theta),
];

/// Unified id table plus the validated subscription field list.
#[derive(Debug, Clone)]
pub struct FieldCatalog {
    by_id: HashMap<FieldId, FieldName>,
    subscription: Vec<u16>,
}

impl FieldCatalog {
    /// Build the catalog, failing if any subscription id cannot be decoded.
    pub fn new(subscription_fields: &[u16]) -> Result<Self> {
        let mut by_id: HashMap<FieldId, FieldName> = DISPLAY_FIELDS
            .iter()
            .map(|&(id, name)| (FieldId::Numeric(id), name))
            .collect();
        by_id.extend(
            SHORT_CODES
                .iter()
                .map(|&(code, name)| (FieldId::Code(code.to_string()), name)),
        );

        let missing: Vec<String> = subscription_fields
            .iter()
            .filter(|id| !by_id.contains_key(&FieldId::Numeric(**id)))
            .map(u16::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(StreamError::Config(format!(
                "subscription field ids [{}] have no entry in the display table",
                missing.join(", ")
            )));
        }

        let mut seen = HashSet::new();
        let subscription = subscription_fields
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();

        Ok(Self { by_id, subscription })
    }

    /// Catalog over [`SUBSCRIPTION_FIELDS`].
    pub fn standard() -> Result<Self> {
        Self::new(SUBSCRIPTION_FIELDS)
    }

    /// Field ids to request when subscribing.
    pub fn subscription_fields(&self) -> &[u16] {
        &self.subscription
    }

    /// Semantic name for a wire id.
    pub fn field_name_for(&self, id: &FieldId) -> Option<FieldName> {
        self.by_id.get(id).copied()
    }

    /// Resolve a raw wire id and decode its value.
    ///
    /// `Ok(None)` means the id is not in the catalog.
    pub fn decode(&self, raw_id: &str, value: &Value) -> Result<Option<(FieldName, FieldValue)>> {
        match self.field_name_for(&FieldId::from(raw_id)) {
            Some(name) => Ok(Some((name, decode_value(name, value)?))),
            None => Ok(None),
        }
    }
}

/// Convert a JSON value to the shape `field` carries.
///
/// Numbers may arrive as JSON numbers or numeric strings. Contract type letters are
/// expanded, so `"P"` becomes [`OptionType::Put`].
pub fn decode_value(field: FieldName, value: &Value) -> Result<FieldValue> {
    let invalid = |reason: &str| StreamError::FieldDecode {
        field: field.to_string(),
        reason: format!("{reason}: {value}"),
    };
    match field.kind() {
        FieldKind::Number => match value {
            Value::Number(n) => n.as_f64().map(FieldValue::Number).ok_or_else(|| invalid("not representable")),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(FieldValue::Number)
                .map_err(|_| invalid("not a number")),
            _ => Err(invalid("not a number")),
        },
        FieldKind::Text => match value {
            Value::String(s) => Ok(FieldValue::Text(s.clone())),
            Value::Null => Err(invalid("null text")),
            other => Ok(FieldValue::Text(other.to_string())),
        },
        FieldKind::ContractType => value
            .as_str()
            .and_then(|s| s.trim().parse::<OptionType>().ok())
            .map(FieldValue::ContractType)
            .ok_or_else(|| invalid("not C/P")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strum::IntoEnumIterator;

    #[test]
    fn standard_catalog_decodes_every_subscription_id() {
        let catalog = FieldCatalog::standard().unwrap();
        for id in catalog.subscription_fields() {
            assert!(catalog.field_name_for(&FieldId::Numeric(*id)).is_some(), "id {id}");
        }
    }

    #[test]
    fn divergent_subscription_list_is_a_config_error() {
        let err = FieldCatalog::new(&[2, 3, 99]).unwrap_err();
        assert!(matches!(err, StreamError::Config(ref msg) if msg.contains("99")), "{err}");
    }

    #[test]
    fn duplicate_subscription_ids_are_collapsed() {
        let catalog = FieldCatalog::new(&[2, 2, 3]).unwrap();
        assert_eq!(catalog.subscription_fields(), &[2, 3]);
    }

    #[test]
    fn numeric_and_letter_ids_resolve() {
        let catalog = FieldCatalog::standard().unwrap();
        assert_eq!(catalog.field_name_for(&FieldId::from("21")), Some(FieldName::ContractType));
        assert_eq!(catalog.field_name_for(&FieldId::from("C")), Some(FieldName::ContractType));
        assert_eq!(catalog.field_name_for(&FieldId::from("S")), Some(FieldName::StrikePrice));
        assert_eq!(catalog.field_name_for(&FieldId::from("999")), None);
        assert_eq!(catalog.field_name_for(&FieldId::from("ZZ")), None);
    }

    #[test]
    fn contract_type_letters_are_expanded() {
        assert_eq!(
            decode_value(FieldName::ContractType, &json!("P")).unwrap(),
            FieldValue::ContractType(OptionType::Put)
        );
        assert_eq!(
            decode_value(FieldName::ContractType, &json!("CALL")).unwrap(),
            FieldValue::ContractType(OptionType::Call)
        );
        assert!(decode_value(FieldName::ContractType, &json!("X")).is_err());
    }

    #[test]
    fn numbers_accept_numeric_strings() {
        assert_eq!(
            decode_value(FieldName::StrikePrice, &json!("205")).unwrap(),
            FieldValue::Number(205.0)
        );
        assert_eq!(decode_value(FieldName::BidPrice, &json!(1.25)).unwrap(), FieldValue::Number(1.25));
        assert!(decode_value(FieldName::BidPrice, &json!("n/a")).is_err());
        assert!(decode_value(FieldName::BidPrice, &json!(null)).is_err());
    }

    #[test]
    fn column_names_fall_back_to_identity() {
        assert_eq!(column_name_for("bidPrice"), "Bid");
        assert_eq!(column_name_for("openInterest"), "Open Int");
        assert_eq!(column_name_for("someVendorField"), "someVendorField");
    }

    #[test]
    fn field_names_round_trip_through_strum() {
        for name in FieldName::iter() {
            assert_eq!(name.to_string().parse::<FieldName>().unwrap(), name);
        }
        assert_eq!(FieldName::TotalVolume.as_ref(), "totalVolume");
    }
}
