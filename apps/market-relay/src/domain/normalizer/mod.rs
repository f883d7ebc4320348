//! Instrument Normalizer
//!
//! Maps an upstream ticker to a [`CanonicalRecord`]. Pure and stateless:
//! the same upstream instrument always yields the same canonical id.
//!
//! # Classification
//!
//! | upstream id               | class    | canonical id                    | symbol                 |
//! |---------------------------|----------|---------------------------------|------------------------|
//! | `BTC-USDT`                | spot     | `spot:BTC-USDT`                 | `BTC/USDT`             |
//! | `BTC-USDT-SWAP`           | swap     | `swap:BTC-USDT.P`               | `BTC/USDT.P`           |
//! | `BTC-USD-261231-65000-C`  | option   | `option:BTC-USD-261231-65000-C` | `BTC/USD-261231-65000-C` |

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::market::{AssetClass, CanonicalRecord, ProviderTicker, canonical_id};

/// Upstream suffix marking a perpetual swap.
const SWAP_SUFFIX: &str = "-SWAP";

/// Marker appended to perpetual symbols in place of [`SWAP_SUFFIX`].
const PERPETUAL_MARKER: &str = ".P";

/// Errors produced while normalizing an upstream ticker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    /// Instrument identifier is empty or malformed.
    #[error("invalid instrument id: {0:?}")]
    InvalidInstrument(String),

    /// A required price field is absent.
    #[error("{inst_id}: missing field {field}")]
    MissingField {
        /// Upstream instrument id.
        inst_id: String,
        /// Field name.
        field: &'static str,
    },

    /// A price field is not a number.
    #[error("{inst_id}: field {field} is not numeric: {value:?}")]
    NonNumeric {
        /// Upstream instrument id.
        inst_id: String,
        /// Field name.
        field: &'static str,
        /// Raw value.
        value: String,
    },

    /// Last price is zero or negative.
    #[error("{inst_id}: last price must be positive, got {value}")]
    NonPositivePrice {
        /// Upstream instrument id.
        inst_id: String,
        /// Parsed price.
        value: Decimal,
    },
}

/// Normalize an upstream ticker, stamping fallback freshness with the current time.
///
/// # Errors
///
/// Returns [`NormalizeError`] when the instrument id is empty or a price field
/// is missing or non-numeric. Callers must drop the ticker on error.
pub fn normalize(ticker: &ProviderTicker) -> Result<CanonicalRecord, NormalizeError> {
    normalize_at(ticker, Utc::now())
}

/// Normalize an upstream ticker using `received_at` when the exchange
/// timestamp is absent or invalid.
///
/// # Errors
///
/// See [`normalize`].
pub fn normalize_at(
    ticker: &ProviderTicker,
    received_at: DateTime<Utc>,
) -> Result<CanonicalRecord, NormalizeError> {
    // Ids are taken verbatim; padding would otherwise alias distinct ids.
    let inst_id = ticker.inst_id.as_str();
    if inst_id.is_empty() || inst_id.chars().any(char::is_whitespace) {
        return Err(NormalizeError::InvalidInstrument(ticker.inst_id.clone()));
    }

    let asset_class = classify(inst_id);
    let dashed = rewrite_symbol(inst_id, asset_class)?;

    let last_raw = ticker
        .last
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| NormalizeError::MissingField {
            inst_id: inst_id.to_string(),
            field: "last",
        })?;
    let last_price = parse_price(inst_id, "last", last_raw)?;
    if last_price <= Decimal::ZERO {
        return Err(NormalizeError::NonPositivePrice {
            inst_id: inst_id.to_string(),
            value: last_price,
        });
    }

    let open_24h = match ticker.open_24h.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(parse_price(inst_id, "open24h", raw)?),
    };

    let updated_at = ticker
        .ts
        .as_deref()
        .and_then(|ts| ts.trim().parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or(received_at);

    Ok(CanonicalRecord {
        id: canonical_id(asset_class, &dashed),
        asset_class,
        symbol: display_symbol(&dashed),
        last_price,
        change_24h: change_24h(last_price, open_24h),
        updated_at,
    })
}

/// Classify an upstream instrument id by its shape.
#[must_use]
pub fn classify(inst_id: &str) -> AssetClass {
    if inst_id.ends_with(SWAP_SUFFIX) {
        AssetClass::Swap
    } else if is_option_id(inst_id) {
        AssetClass::Option
    } else {
        AssetClass::Spot
    }
}

/// Percentage change of `last` against the 24h open.
///
/// Returns zero when the open is unavailable or not positive.
#[must_use]
pub fn change_24h(last: Decimal, open_24h: Option<Decimal>) -> Decimal {
    let Some(open) = open_24h.filter(|o| *o > Decimal::ZERO) else {
        return Decimal::ZERO;
    };

    last.checked_sub(open)
        .and_then(|diff| diff.checked_div(open))
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .unwrap_or(Decimal::ZERO)
}

/// Rewrite the upstream id into the dashed canonical symbol for its class.
fn rewrite_symbol(inst_id: &str, asset_class: AssetClass) -> Result<String, NormalizeError> {
    match asset_class {
        AssetClass::Swap => {
            let base = inst_id.strip_suffix(SWAP_SUFFIX).unwrap_or(inst_id);
            if base.is_empty() {
                return Err(NormalizeError::InvalidInstrument(inst_id.to_string()));
            }
            Ok(format!("{base}{PERPETUAL_MARKER}"))
        }
        AssetClass::Spot | AssetClass::Option => Ok(inst_id.to_string()),
    }
}

/// Human symbol: the first dash becomes a slash.
fn display_symbol(dashed: &str) -> String {
    dashed.replacen('-', "/", 1)
}

/// Options look like `BASE[-QUOTE]-YYMMDD-STRIKE-C|P`.
fn is_option_id(inst_id: &str) -> bool {
    let parts: Vec<&str> = inst_id.split('-').collect();
    if parts.len() < 4 {
        return false;
    }

    let n = parts.len();
    let kind = parts[n - 1];
    let strike = parts[n - 2];
    let expiry = parts[n - 3];

    matches!(kind, "C" | "P")
        && expiry.len() == 6
        && expiry.bytes().all(|b| b.is_ascii_digit())
        && !strike.is_empty()
        && strike.bytes().all(|b| b.is_ascii_digit() || b == b'.')
}

fn parse_price(inst_id: &str, field: &'static str, raw: &str) -> Result<Decimal, NormalizeError> {
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .map_err(|_| NormalizeError::NonNumeric {
            inst_id: inst_id.to_string(),
            field,
            value: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use proptest::prelude::*;
    use test_case::test_case;

    use super::*;

    fn ticker(inst_id: &str, last: &str, open: &str) -> ProviderTicker {
        ProviderTicker::new(inst_id, last, open)
    }

    #[test_case("BTC-USDT", AssetClass::Spot, "spot:BTC-USDT", "BTC/USDT" ; "spot pair")]
    #[test_case("BTC-USDT-SWAP", AssetClass::Swap, "swap:BTC-USDT.P", "BTC/USDT.P" ; "perpetual swap")]
    #[test_case("SOL-USDT-SWAP", AssetClass::Swap, "swap:SOL-USDT.P", "SOL/USDT.P" ; "sol swap")]
    #[test_case("BTC-USD-261231-65000-C", AssetClass::Option, "option:BTC-USD-261231-65000-C", "BTC/USD-261231-65000-C" ; "call option")]
    #[test_case("ETH-261231-3000-P", AssetClass::Option, "option:ETH-261231-3000-P", "ETH/261231-3000-P" ; "short option form")]
    #[test_case("BTC-USD-261231", AssetClass::Spot, "spot:BTC-USD-261231", "BTC/USD-261231" ; "dated future defaults to spot")]
    fn classifies_and_rewrites(inst_id: &str, class: AssetClass, id: &str, symbol: &str) {
        let record = normalize(&ticker(inst_id, "100", "90")).unwrap();
        assert_eq!(record.asset_class, class);
        assert_eq!(record.id, id);
        assert_eq!(record.symbol, symbol);
    }

    #[test]
    fn change_24h_positive() {
        assert_eq!(
            change_24h(Decimal::new(105, 0), Some(Decimal::new(100, 0))),
            Decimal::new(5, 0)
        );
    }

    #[test]
    fn change_24h_zero_open_is_zero() {
        assert_eq!(change_24h(Decimal::new(105, 0), Some(Decimal::ZERO)), Decimal::ZERO);
        assert_eq!(change_24h(Decimal::new(105, 0), Some(Decimal::new(-1, 0))), Decimal::ZERO);
        assert_eq!(change_24h(Decimal::new(105, 0), None), Decimal::ZERO);
    }

    #[test]
    fn swap_end_to_end_fields() {
        let record = normalize(&ticker("BTC-USDT-SWAP", "61234.50", "60000.00")).unwrap();
        assert_eq!(record.id, "swap:BTC-USDT.P");
        assert_eq!(record.asset_class, AssetClass::Swap);
        assert_eq!(record.symbol, "BTC/USDT.P");
        assert_eq!(record.last_price, Decimal::new(6_123_450, 2));
        assert_eq!(record.change_24h.round_dp(2), Decimal::new(206, 2));
    }

    #[test]
    fn missing_open_reports_zero_change() {
        let mut t = ticker("BTC-USDT", "100", "");
        t.open_24h = None;
        let record = normalize(&t).unwrap();
        assert_eq!(record.change_24h, Decimal::ZERO);

        let blank = normalize(&ticker("BTC-USDT", "100", "  ")).unwrap();
        assert_eq!(blank.change_24h, Decimal::ZERO);
    }

    #[test]
    fn missing_last_is_rejected() {
        let mut t = ticker("BTC-USDT", "", "100");
        assert!(matches!(
            normalize(&t),
            Err(NormalizeError::MissingField { field: "last", .. })
        ));
        t.last = None;
        assert!(matches!(
            normalize(&t),
            Err(NormalizeError::MissingField { field: "last", .. })
        ));
    }

    #[test]
    fn non_numeric_prices_are_rejected() {
        assert!(matches!(
            normalize(&ticker("BTC-USDT", "abc", "100")),
            Err(NormalizeError::NonNumeric { field: "last", .. })
        ));
        assert!(matches!(
            normalize(&ticker("BTC-USDT", "100", "n/a")),
            Err(NormalizeError::NonNumeric { field: "open24h", .. })
        ));
    }

    #[test]
    fn non_positive_last_is_rejected() {
        assert!(matches!(
            normalize(&ticker("BTC-USDT", "0", "100")),
            Err(NormalizeError::NonPositivePrice { .. })
        ));
        assert!(matches!(
            normalize(&ticker("BTC-USDT", "-3", "100")),
            Err(NormalizeError::NonPositivePrice { .. })
        ));
    }

    #[test]
    fn empty_or_bare_suffix_instrument_is_rejected() {
        assert!(matches!(
            normalize(&ticker("", "1", "1")),
            Err(NormalizeError::InvalidInstrument(_))
        ));
        assert!(matches!(
            normalize(&ticker("-SWAP", "1", "1")),
            Err(NormalizeError::InvalidInstrument(_))
        ));
    }

    #[test_case(" BTC-USDT" ; "leading space")]
    #[test_case("BTC-USDT\n" ; "trailing newline")]
    #[test_case("BTC -USDT" ; "inner space")]
    fn whitespace_in_instrument_is_rejected(inst_id: &str) {
        assert_eq!(
            normalize(&ticker(inst_id, "1", "1")),
            Err(NormalizeError::InvalidInstrument(inst_id.to_string()))
        );
    }

    #[test]
    fn exchange_timestamp_sets_updated_at() {
        let received = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let t = ticker("BTC-USDT", "1", "1").with_timestamp_ms(1_700_000_000_000);
        let record = normalize_at(&t, received).unwrap();
        assert_eq!(record.updated_at.timestamp_millis(), 1_700_000_000_000);

        let mut bad = t;
        bad.ts = Some("yesterday".to_string());
        assert_eq!(normalize_at(&bad, received).unwrap().updated_at, received);
    }

    fn inst_id_strategy() -> impl Strategy<Value = String> {
        let base = "[A-Z]{2,5}";
        let quote = "(USDT|USDC|USD|BTC)";
        prop_oneof![
            (base, quote).prop_map(|(b, q)| format!("{b}-{q}")),
            (base, quote).prop_map(|(b, q)| format!("{b}-{q}-SWAP")),
            (base, quote, "[0-9]{6}", "[1-9][0-9]{2,5}", "(C|P)")
                .prop_map(|(b, q, e, s, k)| format!("{b}-{q}-{e}-{s}-{k}")),
        ]
    }

    proptest! {
        #[test]
        fn normalization_is_deterministic(inst_id in inst_id_strategy()) {
            let t = ticker(&inst_id, "10", "9");
            let first = normalize(&t).unwrap();
            let second = normalize(&t).unwrap();
            prop_assert_eq!(first.id, second.id);
            prop_assert_eq!(first.symbol, second.symbol);
            prop_assert_eq!(first.asset_class, second.asset_class);
        }

        #[test]
        fn distinct_instruments_get_distinct_ids(a in inst_id_strategy(), b in inst_id_strategy()) {
            prop_assume!(a != b);
            let ra = normalize(&ticker(&a, "10", "9")).unwrap();
            let rb = normalize(&ticker(&b, "10", "9")).unwrap();
            prop_assert_ne!(ra.id, rb.id);
        }

        #[test]
        fn change_never_divides_by_zero(last in 1i64..1_000_000, open in -1_000i64..=0) {
            prop_assert_eq!(
                change_24h(Decimal::new(last, 2), Some(Decimal::new(open, 2))),
                Decimal::ZERO
            );
        }
    }
}
