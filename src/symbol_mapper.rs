// =============================================================================
// Symbol mapper — B3 option symbol ↔ (ticker, strike, type, expiration)
// =============================================================================
//
// MT5 option symbol format (Brazilian market - B3): [TICKER][TYPE][STRIKE][SUFFIX?]
//   - TICKER: 4-5 letters (VALE, PETR, BBAS, ...)
//   - TYPE: one letter, month + CALL/PUT (A-L = CALL Jan-Dec, M-X = PUT Jan-Dec)
//   - STRIKE: digits only, scaling is heuristic (see `decode_strike`)
//   - optional alphanumeric suffix (e.g. "W1", "W2")
//
// Grounded on `MT5/symbol_mapper.py`. Strike decoding is a documented
// heuristic, not a precise inverse — see SPEC_FULL.md §9's open-question
// decision to preserve it exactly, fragility included.
// =============================================================================

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate};

use crate::types::OptionSide;

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSymbol {
    pub mt5_symbol: String,
    pub ticker: String,
    pub strike: f64,
    pub option_type: OptionSide,
    pub month: u32,
    pub year: i32,
    pub expiration_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapperError {
    #[error("invalid-format: {0}")]
    InvalidFormat(String),
    #[error("invalid-type-code: {0}")]
    InvalidTypeCode(String),
    #[error("invalid-option-type: {0}")]
    InvalidOptionType(String),
    #[error("month-out-of-range: {0}")]
    MonthOutOfRange(u32),
}

fn ticker_suffixes() -> &'static HashMap<&'static str, &'static str> {
    static TABLE: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    TABLE.get_or_init(|| {
        HashMap::from([
            ("VALE", "VALE3"),
            ("PETR", "PETR4"),
            ("BBAS", "BBAS3"),
            ("ITUB", "ITUB4"),
            ("BBDC", "BBDC4"),
            ("ABEV", "ABEV3"),
            ("MGLU", "MGLU3"),
            ("WEGE", "WEGE3"),
            ("RENT", "RENT3"),
            ("GGBR", "GGBR4"),
            ("USIM", "USIM5"),
            ("CSNA", "CSNA3"),
            ("SUZB", "SUZB3"),
            ("EMBR", "EMBR3"),
            ("CIEL", "CIEL3"),
        ])
    })
}

fn call_month(code: char) -> Option<u32> {
    if ('A'..='L').contains(&code) {
        Some(code as u32 - 'A' as u32 + 1)
    } else {
        None
    }
}

fn put_month(code: char) -> Option<u32> {
    if ('M'..='X').contains(&code) {
        Some(code as u32 - 'M' as u32 + 1)
    } else {
        None
    }
}

fn call_code(month: u32) -> Option<char> {
    if (1..=12).contains(&month) {
        Some((b'A' + (month - 1) as u8) as char)
    } else {
        None
    }
}

fn put_code(month: u32) -> Option<char> {
    if (1..=12).contains(&month) {
        Some((b'M' + (month - 1) as u8) as char)
    } else {
        None
    }
}

fn normalize_ticker(ticker_base: &str) -> String {
    let upper = ticker_base.to_ascii_uppercase();
    if upper.chars().last().map(|c| c.is_ascii_digit()).unwrap_or(false) {
        return upper;
    }
    if let Some(full) = ticker_suffixes().get(upper.as_str()) {
        return full.to_string();
    }
    format!("{upper}3")
}

fn ticker_base(ticker: &str) -> String {
    ticker
        .trim_end_matches(|c: char| c.is_ascii_digit())
        .to_ascii_uppercase()
}

/// Strike decoding heuristic: >=1000 divides by 100 (low-price stock),
/// otherwise divides by 2 (mid/high-price stock). Documented as fragile by
/// design — see module header.
fn decode_strike(strike_int: i64) -> f64 {
    if strike_int >= 1000 {
        strike_int as f64 / 100.0
    } else {
        strike_int as f64 / 2.0
    }
}

/// Mirror of `decode_strike`'s heuristic, threshold at strike < 10.0.
fn encode_strike(strike: f64) -> i64 {
    if strike < 10.0 {
        (strike * 100.0) as i64
    } else {
        (strike * 2.0) as i64
    }
}

pub fn third_friday(year: i32, month: u32) -> Option<NaiveDate> {
    let first_day = NaiveDate::from_ymd_opt(year, month, 1)?;
    // weekday() Monday=0 .. Sunday=6; Friday index is 4.
    let weekday_idx = first_day.weekday().num_days_from_monday();
    let days_until_friday = (4 + 7 - weekday_idx) % 7;
    let first_friday_day = 1 + days_until_friday;
    let third_friday_day = first_friday_day + 14;
    NaiveDate::from_ymd_opt(year, month, third_friday_day)
}

/// Decode an MT5 option symbol, with `current_year`/`current_month` supplied
/// explicitly so decoding is a pure function of its inputs rather than
/// reading the wall clock (the teacher's pure-module test style).
pub fn decode(
    mt5_symbol: &str,
    current_year: i32,
    current_month: u32,
) -> Result<DecodedSymbol, MapperError> {
    let upper = mt5_symbol.trim().to_ascii_uppercase();

    let bytes: Vec<char> = upper.chars().collect();
    // The leading alphabetic run covers TICKER+TYPE (both letters, no
    // separator), so the last character of the run is the type code and the
    // ticker is everything before it — not the whole run itself.
    let alpha_run = bytes
        .iter()
        .take_while(|c| c.is_ascii_alphabetic())
        .count();
    if !(5..=6).contains(&alpha_run) || bytes.len() <= alpha_run {
        return Err(MapperError::InvalidFormat(upper));
    }
    let ticker_len = alpha_run - 1;
    let type_code = bytes[ticker_len];
    let rest: String = bytes[ticker_len + 1..].iter().collect();
    let digit_len = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    if digit_len == 0 {
        return Err(MapperError::InvalidFormat(upper));
    }
    let strike_str = &rest[..digit_len];
    // Remaining characters (suffix) are accepted but not interpreted, matching
    // the original's tolerant trailing-suffix regex group.
    if !rest[digit_len..]
        .chars()
        .all(|c| c.is_ascii_alphanumeric())
    {
        return Err(MapperError::InvalidFormat(upper));
    }

    let ticker_raw: String = bytes[..ticker_len].iter().collect();

    let (option_type, month) = if let Some(m) = call_month(type_code) {
        (OptionSide::Call, m)
    } else if let Some(m) = put_month(type_code) {
        (OptionSide::Put, m)
    } else {
        return Err(MapperError::InvalidTypeCode(type_code.to_string()));
    };

    let ticker = normalize_ticker(&ticker_raw);
    let strike_int: i64 = strike_str
        .parse()
        .map_err(|_| MapperError::InvalidFormat(upper.clone()))?;
    let strike = decode_strike(strike_int);

    let mut year = current_year;
    if month < current_month {
        year += 1;
    }

    let expiration_date =
        third_friday(year, month).ok_or(MapperError::MonthOutOfRange(month))?;

    Ok(DecodedSymbol {
        mt5_symbol: upper,
        ticker,
        strike,
        option_type,
        month,
        year,
        expiration_date,
    })
}

pub fn encode(
    ticker: &str,
    strike: f64,
    option_type: OptionSide,
    expiration_date: NaiveDate,
) -> Result<String, MapperError> {
    let month = expiration_date.month();
    let type_code = match option_type {
        OptionSide::Call => call_code(month).ok_or(MapperError::MonthOutOfRange(month))?,
        OptionSide::Put => put_code(month).ok_or(MapperError::MonthOutOfRange(month))?,
    };
    let base = ticker_base(ticker);
    let strike_code = encode_strike(strike);
    Ok(format!("{base}{type_code}{strike_code}"))
}
