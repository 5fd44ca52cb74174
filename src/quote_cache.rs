// =============================================================================
// Quote cache — TTL-bounded in-memory store for bridge-ingested market data
// =============================================================================
//
// The MT5 bridge never receives request/response style quote queries; the EA
// pushes batches on its own cadence and the rest of the process reads
// whatever's freshest. This is a process-wide, TTL-bounded cache: underlying
// quotes, option quotes, and per-terminal heartbeats, each keyed the same way
// the bridge encodes its ingress payloads.
//
// Grounded on `MT5/storage.py`'s `_QUOTES`/`_OPTIONS_QUOTES`/`_HEARTBEATS`
// maps. The original used a single `threading.RLock` guarding all three maps
// at once; here each gets its own `parking_lot::Mutex` since no method here
// ever needs to hold two locks at the same time, and plain `Mutex` is cheaper
// than a reentrant one when nesting never happens (see SPEC_FULL.md §5).
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::warn;

use crate::types::{Heartbeat, OptionQuote, Quote, QuoteSource};

/// Parses an RFC3339 timestamp, falling back to "now" (and logging the
/// offending value) when the EA sends something unparseable. Preserves the
/// original's lenient `_parse_ts_iso` behavior rather than rejecting the
/// quote outright (Open Question 3, SPEC_FULL.md §9).
fn parse_ts_or_now(raw: Option<&str>) -> DateTime<Utc> {
    match raw {
        Some(s) => match DateTime::parse_from_rfc3339(s) {
            Ok(dt) => dt.with_timezone(&Utc),
            Err(_) => {
                warn!(raw_ts = s, "quote cache: unparseable timestamp, using now()");
                Utc::now()
            }
        },
        None => Utc::now(),
    }
}

pub struct QuoteCache {
    default_ttl_seconds: i64,
    quotes: Mutex<HashMap<String, Quote>>,
    option_quotes: Mutex<HashMap<String, OptionQuote>>,
    heartbeats: Mutex<HashMap<String, Heartbeat>>,
}

/// Raw wire shape of one entry in an EA quote-batch payload. Field presence
/// mirrors the bridge's tolerant ingestion (see `upsert_quotes` in the
/// grounding source): `last` is preferred, but bid/ask/mid are all accepted
/// as a last-resort price.
#[derive(Debug, Clone)]
pub struct RawQuote {
    pub symbol: String,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub last: Option<f64>,
    pub volume: Option<f64>,
    pub ts: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RawOptionQuote {
    pub ticker: String,
    pub strike: f64,
    pub option_type: crate::types::OptionSide,
    pub expiration: chrono::NaiveDate,
    pub mt5_symbol: Option<String>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub last: Option<f64>,
    pub volume: Option<f64>,
    pub ts: Option<String>,
}

impl QuoteCache {
    pub fn new(default_ttl_seconds: i64) -> Self {
        Self {
            default_ttl_seconds,
            quotes: Mutex::new(HashMap::new()),
            option_quotes: Mutex::new(HashMap::new()),
            heartbeats: Mutex::new(HashMap::new()),
        }
    }

    pub fn upsert_heartbeat(&self, hb: Heartbeat) {
        let terminal_id = if hb.terminal_id.trim().is_empty() {
            "UNKNOWN".to_string()
        } else {
            hb.terminal_id.clone()
        };
        self.heartbeats.lock().insert(terminal_id, hb);
    }

    pub fn get_heartbeat(&self, terminal_id: &str) -> Option<Heartbeat> {
        self.heartbeats.lock().get(terminal_id).cloned()
    }

    pub fn all_heartbeats(&self) -> Vec<Heartbeat> {
        self.heartbeats.lock().values().cloned().collect()
    }

    /// Ingests a batch of underlying quotes, returning the count accepted.
    /// An entry with an empty symbol is silently dropped, matching the
    /// original's tolerant ingest.
    pub fn upsert_quotes(&self, raws: Vec<RawQuote>) -> usize {
        let mut accepted = 0;
        let mut guard = self.quotes.lock();
        for raw in raws {
            let symbol = raw.symbol.trim().to_ascii_uppercase();
            if symbol.is_empty() {
                continue;
            }
            let ts = parse_ts_or_now(raw.ts.as_deref());
            let quote = Quote {
                symbol: symbol.clone(),
                bid: raw.bid,
                ask: raw.ask,
                last: raw.last,
                volume: raw.volume,
                ts,
                source: QuoteSource::Mt5,
            };
            guard.insert(symbol, quote);
            accepted += 1;
        }
        accepted
    }

    /// Returns the cached quote for `symbol` if present and fresher than
    /// `ttl_seconds` (falling back to the cache's configured default).
    pub fn get_quote(&self, symbol: &str, ttl_seconds: Option<i64>) -> Option<Quote> {
        let symbol = symbol.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            return None;
        }
        let ttl = ttl_seconds.unwrap_or(self.default_ttl_seconds);
        let guard = self.quotes.lock();
        let quote = guard.get(&symbol)?;
        let age = (Utc::now() - quote.ts).num_seconds();
        if age > ttl {
            return None;
        }
        Some(quote.clone())
    }

    pub fn all_quotes(&self, max_age_seconds: Option<i64>) -> Vec<Quote> {
        let guard = self.quotes.lock();
        match max_age_seconds {
            None => guard.values().cloned().collect(),
            Some(max_age) => {
                let now = Utc::now();
                guard
                    .values()
                    .filter(|q| (now - q.ts).num_seconds() <= max_age)
                    .cloned()
                    .collect()
            }
        }
    }

    pub fn upsert_option_quotes(&self, raws: Vec<RawOptionQuote>) -> usize {
        let mut accepted = 0;
        let mut guard = self.option_quotes.lock();
        for raw in raws {
            let ts = parse_ts_or_now(raw.ts.as_deref());
            let quote = OptionQuote {
                ticker: raw.ticker.trim().to_ascii_uppercase(),
                strike: raw.strike,
                option_type: raw.option_type,
                expiration: raw.expiration,
                mt5_symbol: raw.mt5_symbol,
                bid: raw.bid,
                ask: raw.ask,
                last: raw.last,
                volume: raw.volume,
                ts,
            };
            guard.insert(quote.key(), quote);
            accepted += 1;
        }
        accepted
    }

    pub fn get_option_quote(&self, key: &str, ttl_seconds: Option<i64>) -> Option<OptionQuote> {
        let ttl = ttl_seconds.unwrap_or(self.default_ttl_seconds);
        let guard = self.option_quotes.lock();
        let quote = guard.get(key)?;
        let age = (Utc::now() - quote.ts).num_seconds();
        if age > ttl {
            return None;
        }
        Some(quote.clone())
    }

    pub fn all_option_quotes(&self, max_age_seconds: Option<i64>) -> Vec<OptionQuote> {
        let guard = self.option_quotes.lock();
        match max_age_seconds {
            None => guard.values().cloned().collect(),
            Some(max_age) => {
                let now = Utc::now();
                guard
                    .values()
                    .filter(|q| (now - q.ts).num_seconds() <= max_age)
                    .cloned()
                    .collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn rejects_empty_symbol() {
        let cache = QuoteCache::new(10);
        let accepted = cache.upsert_quotes(vec![RawQuote {
            symbol: "  ".into(),
            bid: Some(1.0),
            ask: Some(1.1),
            last: None,
            volume: None,
            ts: None,
        }]);
        assert_eq!(accepted, 0);
        assert!(cache.get_quote("", None).is_none());
    }

    #[test]
    fn stores_and_retrieves_within_ttl() {
        let cache = QuoteCache::new(10);
        cache.upsert_quotes(vec![RawQuote {
            symbol: "vale3".into(),
            bid: Some(61.0),
            ask: Some(63.0),
            last: Some(62.0),
            volume: Some(1000.0),
            ts: None,
        }]);
        let quote = cache.get_quote("VALE3", None).unwrap();
        assert_eq!(quote.symbol, "VALE3");
        assert_eq!(quote.last, Some(62.0));
    }

    #[test]
    fn expired_quote_is_not_returned() {
        let cache = QuoteCache::new(10);
        cache.upsert_quotes(vec![RawQuote {
            symbol: "VALE3".into(),
            bid: None,
            ask: None,
            last: Some(62.0),
            volume: None,
            ts: Some("2000-01-01T00:00:00Z".into()),
        }]);
        assert!(cache.get_quote("VALE3", None).is_none());
        assert!(cache.get_quote("VALE3", Some(999_999_999)).is_some());
    }

    #[test]
    fn unparseable_timestamp_falls_back_to_now() {
        let cache = QuoteCache::new(10);
        cache.upsert_quotes(vec![RawQuote {
            symbol: "VALE3".into(),
            bid: None,
            ask: None,
            last: Some(62.0),
            volume: None,
            ts: Some("not-a-timestamp".into()),
        }]);
        // Falls back to now(), so it's still within any reasonable TTL.
        assert!(cache.get_quote("VALE3", None).is_some());
    }

    #[test]
    fn option_quote_key_roundtrips_through_cache() {
        let cache = QuoteCache::new(10);
        let expiration = NaiveDate::from_ymd_opt(2026, 8, 21).unwrap();
        cache.upsert_option_quotes(vec![RawOptionQuote {
            ticker: "vale3".into(),
            strike: 62.5,
            option_type: crate::types::OptionSide::Call,
            expiration,
            mt5_symbol: Some("VALEC125".into()),
            bid: Some(2.5),
            ask: Some(2.55),
            last: Some(2.52),
            volume: Some(1000.0),
            ts: None,
        }]);
        let key = format!("VALE3_62.5_CALL_{expiration}");
        let quote = cache.get_option_quote(&key, None).unwrap();
        assert_eq!(quote.mt5_symbol.as_deref(), Some("VALEC125"));
    }

    #[test]
    fn all_quotes_filters_by_max_age() {
        let cache = QuoteCache::new(10);
        cache.upsert_quotes(vec![
            RawQuote {
                symbol: "FRESH".into(),
                bid: None,
                ask: None,
                last: Some(1.0),
                volume: None,
                ts: None,
            },
            RawQuote {
                symbol: "STALE".into(),
                bid: None,
                ask: None,
                last: Some(2.0),
                volume: None,
                ts: Some("2000-01-01T00:00:00Z".into()),
            },
        ]);
        let fresh = cache.all_quotes(Some(60));
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].symbol, "FRESH");
    }
}
