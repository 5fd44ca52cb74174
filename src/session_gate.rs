// =============================================================================
// Session gate — is the exchange open right now?
// =============================================================================
//
// Pure function of wall-clock time: in the configured timezone, weekends are
// always closed; otherwise the current (hour, minute) is compared against a
// configured [open, close) window. Monitor and Notifier both gate ticks on
// this; the daily cleanup/expire-positions jobs ignore it and run at fixed
// local cron times instead (see `crate::scheduler`).
//
// Grounded on `_is_b3_market_open()` in the original monitor worker.
// =============================================================================

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use chrono_tz::Tz;

use crate::config::SessionWindowConfig;

pub fn is_market_open(window: &SessionWindowConfig, now: DateTime<Utc>) -> bool {
    let tz: Tz = window.timezone.parse().unwrap_or(chrono_tz::America::Sao_Paulo);
    let local = now.with_timezone(&tz);

    if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }

    let minutes_now = local.hour() * 60 + local.minute();
    let minutes_open = window.open_hour * 60 + window.open_minute;
    let minutes_close = window.close_hour * 60 + window.close_minute;

    minutes_now >= minutes_open && minutes_now < minutes_close
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn window() -> SessionWindowConfig {
        SessionWindowConfig {
            timezone: "America/Sao_Paulo".to_string(),
            open_hour: 10,
            open_minute: 0,
            close_hour: 17,
            close_minute: 0,
        }
    }

    #[test]
    fn open_at_open_boundary() {
        // 2026-07-28 is a Tuesday; 10:00 local (UTC-3) == 13:00 UTC.
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 13, 0, 0).unwrap();
        assert!(is_market_open(&window(), now));
    }

    #[test]
    fn closed_at_close_boundary() {
        // 17:00 local == 20:00 UTC; close is exclusive.
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 20, 0, 0).unwrap();
        assert!(!is_market_open(&window(), now));
    }

    #[test]
    fn closed_on_weekend() {
        // 2026-08-01 is a Saturday.
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 14, 0, 0).unwrap();
        assert!(!is_market_open(&window(), now));
    }

    #[test]
    fn closed_before_open() {
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 10, 0, 0).unwrap();
        assert!(!is_market_open(&window(), now));
    }
}
