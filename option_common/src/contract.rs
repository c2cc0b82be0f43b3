//! Contract key codec.
//!
//! Options contracts reach the system under two encodings: the compact REST form used
//! by the catalog source (`AAPL_240621C190.5`) and the fixed-width wire form required by
//! streaming subscriptions (`AAPL  240621C00190500`). Both decode into one canonical
//! [`ContractKey`] so quotes merged from the stream land on the same record as the
//! contracts the caller asked for.
//!
//! Anything that matches none of the known shapes becomes a
//! [`QuoteKey::Unrecognized`] carrying the input unchanged, so callers degrade to plain
//! string matching instead of losing the data.

use std::fmt;
use std::io::BufRead;
use std::str::FromStr;
use std::sync::OnceLock;

use log::warn;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::StreamError;
use crate::result::Result;

/// Width of the symbol column in the wire form.
pub const WIRE_SYMBOL_WIDTH: usize = 6;
/// Width of the strike column (integer millidollars) in the wire form.
pub const WIRE_STRIKE_WIDTH: usize = 8;
/// Total width of a wire-form key.
pub const WIRE_KEY_WIDTH: usize = WIRE_SYMBOL_WIDTH + 6 + 1 + WIRE_STRIKE_WIDTH;

const MAX_STRIKE_MILLIS: u64 = 99_999_999;

/// Underlying symbol grammar shared by the constructor and every decode shape.
const SYMBOL: &str = r"[A-Z$][A-Z0-9.$/]{0,5}";

/// Call or put.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(ascii_case_insensitive)]
pub enum OptionType {
    #[allow(missing_docs)]
    #[strum(to_string = "CALL", serialize = "C")]
    Call,
    #[allow(missing_docs)]
    #[strum(to_string = "PUT", serialize = "P")]
    Put,
}

impl OptionType {
    /// One-letter code used inside both key encodings.
    pub fn code(self) -> char {
        match self {
            OptionType::Call => 'C',
            OptionType::Put => 'P',
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            "C" => Some(OptionType::Call),
            "P" => Some(OptionType::Put),
            _ => None,
        }
    }
}

/// Canonical identifier of one options contract.
///
/// The strike is kept as integer millidollars so keys hash and compare exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContractKey {
    symbol: String,
    expiration: String,
    option_type: OptionType,
    strike_millis: u64,
}

impl ContractKey {
    /// Build a key from its parts.
    ///
    /// - symbol: underlying, 1 to 6 characters; an uppercase letter or `$` followed by
    ///   uppercase letters, digits, `.`, `$` or `/`.
    /// - expiration: `YYMMDD`.
    /// - strike: dollars, at most three decimals are kept.
    pub fn new(symbol: &str, expiration: &str, option_type: OptionType, strike: f64) -> Result<Self> {
        if !strike.is_finite() || strike < 0.0 {
            return Err(StreamError::InvalidContract(format!("bad strike {strike}")));
        }
        Self::from_parts(symbol, expiration, option_type, (strike * 1000.0).round() as u64)
    }

    fn from_parts(
        symbol: &str,
        expiration: &str,
        option_type: OptionType,
        strike_millis: u64,
    ) -> Result<Self> {
        if !symbol_pattern().is_match(symbol) {
            return Err(StreamError::InvalidContract(format!("bad symbol {symbol:?}")));
        }
        if !is_valid_expiration(expiration) {
            return Err(StreamError::InvalidContract(format!(
                "bad expiration {expiration:?}"
            )));
        }
        if strike_millis > MAX_STRIKE_MILLIS {
            return Err(StreamError::InvalidContract(format!(
                "strike {strike_millis} millidollars does not fit the wire form"
            )));
        }
        Ok(Self {
            symbol: symbol.to_string(),
            expiration: expiration.to_string(),
            option_type,
            strike_millis,
        })
    }

    /// Underlying symbol.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Expiration date as `YYMMDD`.
    pub fn expiration(&self) -> &str {
        &self.expiration
    }

    /// Call or put.
    pub fn option_type(&self) -> OptionType {
        self.option_type
    }

    /// Strike in dollars.
    pub fn strike(&self) -> f64 {
        self.strike_millis as f64 / 1000.0
    }

    /// Strike in integer millidollars.
    pub fn strike_millis(&self) -> u64 {
        self.strike_millis
    }

    /// Fixed-width streaming form, e.g. `AAPL  240621C00190000`.
    ///
    /// The transport rejects subscription strings of any other width.
    pub fn encode_wire(&self) -> String {
        format!(
            "{:<sw$}{}{}{:0>kw$}",
            self.symbol,
            self.expiration,
            self.option_type.code(),
            self.strike_millis,
            sw = WIRE_SYMBOL_WIDTH,
            kw = WIRE_STRIKE_WIDTH,
        )
    }

    /// Compact REST form, e.g. `AAPL_240621C190.5`.
    pub fn encode_rest(&self) -> String {
        format!(
            "{}_{}{}{}",
            self.symbol,
            self.expiration,
            self.option_type.code(),
            format_strike(self.strike_millis)
        )
    }
}

impl fmt::Display for ContractKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode_rest())
    }
}

impl FromStr for ContractKey {
    type Err = StreamError;

    /// Strict parse: unlike [`decode_any`], unknown shapes are an error.
    fn from_str(s: &str) -> Result<Self> {
        match_known(s).ok_or_else(|| StreamError::InvalidContract(s.to_string()))
    }
}

/// Store key: a decoded contract, or the raw string when decoding failed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QuoteKey {
    /// Decoded canonical key.
    Contract(ContractKey),
    /// Pass-through of input that matched no known shape.
    Unrecognized(String),
}

impl QuoteKey {
    /// The decoded contract, if any.
    pub fn contract(&self) -> Option<&ContractKey> {
        match self {
            QuoteKey::Contract(key) => Some(key),
            QuoteKey::Unrecognized(_) => None,
        }
    }

    /// `true` for the pass-through fallback.
    pub fn is_unrecognized(&self) -> bool {
        matches!(self, QuoteKey::Unrecognized(_))
    }
}

impl From<ContractKey> for QuoteKey {
    fn from(key: ContractKey) -> Self {
        QuoteKey::Contract(key)
    }
}

impl fmt::Display for QuoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuoteKey::Contract(key) => key.fmt(f),
            QuoteKey::Unrecognized(raw) => f.write_str(raw),
        }
    }
}

/// Decode a contract key from any of the known shapes.
///
/// Shapes are tried in a fixed order and the first match wins:
/// 1. underscore-delimited, decimal strike: `AAPL_240621C190.5`
/// 2. concatenated, decimal strike: `AAPL240621C190.5`
/// 3. concatenated, 8-digit millidollar strike: `AAPL240621C00190500`
/// 4. space-padded wire form: `AAPL  240621C00190500`
///
/// Input matching none of them comes back as [`QuoteKey::Unrecognized`] and a warning
/// is logged.
pub fn decode_any(s: &str) -> QuoteKey {
    match match_known(s) {
        Some(key) => QuoteKey::Contract(key),
        None => {
            warn!("Unrecognized contract key format, passing through: {s:?}");
            QuoteKey::Unrecognized(s.to_string())
        }
    }
}

fn symbol_pattern() -> &'static Regex {
    static SYMBOL_ONLY: OnceLock<Regex> = OnceLock::new();
    SYMBOL_ONLY.get_or_init(|| {
        Regex::new(&format!("^{SYMBOL}$")).expect("symbol pattern is valid")
    })
}

fn patterns() -> &'static [Regex; 4] {
    static PATTERNS: OnceLock<[Regex; 4]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            format!(r"^({SYMBOL})_(\d{{6}})([CP])(\d+(?:\.\d+)?)$"),
            format!(r"^({SYMBOL})(\d{{6}})([CP])(\d*\.\d+|\d{{1,7}})$"),
            format!(r"^({SYMBOL})(\d{{6}})([CP])(\d{{8}})$"),
            format!(r"^({SYMBOL}) +(\d{{6}})([CP])(\d{{8}})$"),
        ]
        .map(|p| Regex::new(&p).expect("contract key pattern is valid"))
    })
}

fn match_known(s: &str) -> Option<ContractKey> {
    patterns()
        .iter()
        .find_map(|re| re.captures(s))
        .and_then(|caps| key_from_captures(&caps))
}

fn key_from_captures(caps: &Captures<'_>) -> Option<ContractKey> {
    let symbol = caps.get(1)?.as_str();
    let expiration = caps.get(2)?.as_str();
    let option_type = OptionType::from_code(caps.get(3)?.as_str())?;
    let strike_millis = parse_strike(caps.get(4)?.as_str())?;
    ContractKey::from_parts(symbol, expiration, option_type, strike_millis).ok()
}

/// An 8-character digit run is integer millidollars, anything else a decimal.
fn parse_strike(raw: &str) -> Option<u64> {
    if raw.len() == WIRE_STRIKE_WIDTH && raw.bytes().all(|b| b.is_ascii_digit()) {
        return raw.parse().ok();
    }
    let dollars: f64 = raw.parse().ok()?;
    if !dollars.is_finite() || dollars < 0.0 {
        return None;
    }
    Some((dollars * 1000.0).round() as u64)
}

fn format_strike(millis: u64) -> String {
    let whole = millis / 1000;
    let frac = millis % 1000;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{frac:03}");
    format!("{whole}.{}", frac.trim_end_matches('0'))
}

fn is_valid_expiration(date: &str) -> bool {
    if date.len() != 6 || !date.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let month: u32 = date[2..4].parse().unwrap_or(0);
    let day: u32 = date[4..6].parse().unwrap_or(0);
    (1..=12).contains(&month) && (1..=31).contains(&day)
}

/// Loader for the catalog source's contract list.
pub trait ContractParser {
    /// Parses contract keys from a buffered reader.
    ///
    /// One key per non-empty line in any shape [`decode_any`] accepts; `#` starts a
    /// comment. Duplicates are dropped keeping the first occurrence. Returns an error
    /// naming the first line that is not a contract key.
    fn parse_from_file<R: BufRead>(reader: R) -> Result<Vec<ContractKey>>;
}

impl ContractParser for ContractKey {
    fn parse_from_file<R: BufRead>(reader: R) -> Result<Vec<Self>> {
        let mut keys: Vec<Self> = Vec::new();

        for (index, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            let content = line.split('#').next().unwrap_or_default();
            let trimmed_line = content.trim();
            if trimmed_line.is_empty() {
                continue;
            }

            match match_known(trimmed_line) {
                Some(key) if !keys.contains(&key) => keys.push(key),
                Some(_) => {}
                None => {
                    return Err(StreamError::ParseContractsFile(format!(
                        "line {}: {trimmed_line:?} is not a contract key",
                        index + 1
                    )));
                }
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn aapl_call() -> ContractKey {
        ContractKey::new("AAPL", "240621", OptionType::Call, 190.0).unwrap()
    }

    #[test]
    fn encode_wire_pads_symbol_and_strike() {
        let key = aapl_call();
        assert_eq!(key.encode_wire(), "AAPL  240621C00190000");
        assert_eq!(key.encode_wire().len(), WIRE_KEY_WIDTH);

        let key = ContractKey::new("BRK.B", "250117", OptionType::Put, 412.5).unwrap();
        assert_eq!(key.encode_wire(), "BRK.B 250117P00412500");
    }

    #[test]
    fn encode_rest_trims_strike() {
        assert_eq!(aapl_call().encode_rest(), "AAPL_240621C190");
        let key = ContractKey::new("SPY", "240621", OptionType::Put, 123.45).unwrap();
        assert_eq!(key.encode_rest(), "SPY_240621P123.45");
        assert_eq!(key.to_string(), "SPY_240621P123.45");
    }

    #[test]
    fn decodes_all_four_shapes_to_the_same_key() {
        let expected = QuoteKey::Contract(aapl_call());
        for input in [
            "AAPL_240621C190",
            "AAPL_240621C190.000",
            "AAPL240621C190.0",
            "AAPL240621C00190000",
            "AAPL  240621C00190000",
        ] {
            assert_eq!(decode_any(input), expected, "input {input:?}");
        }
    }

    #[test]
    fn eight_digit_run_is_millidollars_in_any_shape() {
        let key = decode_any("AAPL_240621C00190500");
        assert_eq!(key.contract().unwrap().strike(), 190.5);
    }

    #[test]
    fn unrecognized_input_passes_through_unchanged() {
        for input in ["", "AAPL", "not a key", "AAPL_241321C190", "AAPL  240621X00190000"] {
            assert_eq!(decode_any(input), QuoteKey::Unrecognized(input.to_string()));
        }
        assert!("AAPL".parse::<ContractKey>().is_err());
    }

    #[test]
    fn option_type_accepts_letters_and_words() {
        assert_eq!("C".parse::<OptionType>().unwrap(), OptionType::Call);
        assert_eq!("put".parse::<OptionType>().unwrap(), OptionType::Put);
        assert_eq!(OptionType::Put.to_string(), "PUT");
    }

    #[test]
    fn rejects_strikes_wider_than_the_wire_form() {
        assert!(ContractKey::new("AAPL", "240621", OptionType::Call, 100_000.0).is_err());
        assert!(ContractKey::new("TOOLONG", "240621", OptionType::Call, 1.0).is_err());
    }

    #[test]
    fn constructor_only_accepts_symbols_every_shape_can_decode() {
        for symbol in ["spy", "BRK-B", "1ABC", "AB CD", ""] {
            assert!(
                ContractKey::new(symbol, "240621", OptionType::Call, 190.0).is_err(),
                "{symbol:?}"
            );
        }
        for symbol in ["BRK.B", "$SPX", "BF/B", "X2"] {
            let key = ContractKey::new(symbol, "240621", OptionType::Call, 190.0).unwrap();
            assert_eq!(decode_any(&key.encode_wire()), QuoteKey::Contract(key));
        }
    }

    #[test]
    fn parse_from_file_skips_comments_and_duplicates() {
        let input = "# contracts\nAAPL_240621C190\n\nAAPL  240621C00190000\nSPY_240621P500 # index\n";
        let keys = ContractKey::parse_from_file(Cursor::new(input)).unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0], aapl_call());
        assert_eq!(keys[1].symbol(), "SPY");
    }

    #[test]
    fn parse_from_file_reports_bad_line() {
        let input = "AAPL_240621C190\ngarbage\n";
        let err = ContractKey::parse_from_file(Cursor::new(input)).unwrap_err();
        assert!(err.to_string().contains("line 2"), "{err}");
    }

    fn arb_key() -> impl Strategy<Value = ContractKey> {
        (
            "[A-Z$][A-Z0-9.$/]{0,5}",
            20u32..40,
            1u32..=12,
            1u32..=28,
            any::<bool>(),
            0u64..=MAX_STRIKE_MILLIS,
        )
            .prop_map(|(symbol, yy, mm, dd, call, millis)| {
                let option_type = if call { OptionType::Call } else { OptionType::Put };
                ContractKey::from_parts(&symbol, &format!("{yy:02}{mm:02}{dd:02}"), option_type, millis)
                    .unwrap()
            })
    }

    proptest! {
        #[test]
        fn wire_form_has_fixed_width(key in arb_key()) {
            prop_assert_eq!(key.encode_wire().len(), WIRE_KEY_WIDTH);
        }

        #[test]
        fn every_shape_round_trips(key in arb_key()) {
            let concatenated_millis = format!(
                "{}{}{}{:08}",
                key.symbol(), key.expiration(), key.option_type().code(), key.strike_millis()
            );
            let concatenated_decimal = key.encode_rest().replacen('_', "", 1);
            for input in [key.encode_rest(), key.encode_wire(), concatenated_millis, concatenated_decimal] {
                let decoded = decode_any(&input);
                prop_assert_eq!(decoded.contract(), Some(&key), "input {:?}", input);
                let again = decode_any(&decoded.contract().unwrap().encode_wire());
                prop_assert_eq!(again, decoded);
            }
        }
    }
}
