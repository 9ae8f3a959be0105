//! # Freshness Policy
//!
//! Decides whether the last published tide extremes still describe what is
//! coming next. While both the next high and the next low lie in the future a
//! new upstream call would return nothing new, so the refresh is skipped.

use crate::refresh::NextTideSummary;
use crate::TideKind;
use chrono::{DateTime, Utc};

/// The most recently published next-high / next-low values.
///
/// Owned by the refresher and only changed by a successful refresh.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RefreshState {
    pub time_high: Option<DateTime<Utc>>,
    pub time_low: Option<DateTime<Utc>>,
    pub height_high: Option<f64>,
    pub height_low: Option<f64>,
}

impl RefreshState {
    /// Replace the state with what a settled refresh published.
    ///
    /// A kind with no upcoming extreme is cleared.
    pub fn settle(&mut self, summary: &NextTideSummary) {
        let high = summary.get(TideKind::High);
        let low = summary.get(TideKind::Low);
        self.time_high = high.map(|e| e.timestamp);
        self.height_high = high.map(|e| e.value);
        self.time_low = low.map(|e| e.timestamp);
        self.height_low = low.map(|e| e.value);
    }
}

/// True only if both known extremes are strictly after `now`.
pub fn is_fresh(state: &RefreshState, now: DateTime<Utc>) -> bool {
    matches!(
        (state.time_high, state.time_low),
        (Some(high), Some(low)) if high > now && low > now
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 16, 12, 0, 0).unwrap()
    }

    fn state(high: Option<i64>, low: Option<i64>) -> RefreshState {
        RefreshState {
            time_high: high.map(|m| now() + Duration::minutes(m)),
            time_low: low.map(|m| now() + Duration::minutes(m)),
            ..RefreshState::default()
        }
    }

    #[test]
    fn first_run_is_stale() {
        assert!(!is_fresh(&RefreshState::default(), now()));
    }

    #[test]
    fn fresh_only_when_both_in_future() {
        let offsets = [None, Some(-60), Some(0), Some(60)];
        for high in offsets {
            for low in offsets {
                let expected = matches!((high, low), (Some(h), Some(l)) if h > 0 && l > 0);
                assert_eq!(
                    is_fresh(&state(high, low), now()),
                    expected,
                    "high={high:?} low={low:?}"
                );
            }
        }
    }

    #[test]
    fn extreme_exactly_now_is_stale() {
        assert!(!is_fresh(&state(Some(0), Some(120)), now()));
    }
}
