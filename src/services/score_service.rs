//! Ranking signals for the feed and comment sort modes.
//!
//! Everything here is a pure function of vote tallies and time.

use chrono::{DateTime, Utc};

/// Seconds of age that cost one order of magnitude of net votes.
const HOT_DECAY_SECONDS: f64 = 45000.0;

/// Exponent and hour offset of the "best" comment decay. Changing either
/// changes observable comment order.
const BEST_GRAVITY: f64 = 1.8;
const BEST_HOUR_OFFSET: f64 = 2.0;

fn signed_order(net: i64) -> f64 {
    let order = ((net.unsigned_abs() as f64) + 1.0).log10();
    match net.signum() {
        1 => order,
        -1 => -order,
        _ => 0.0,
    }
}

/// Time-decayed popularity of an item `age_seconds` old.
pub fn hot_score(upvotes: i32, downvotes: i32, age_seconds: i64) -> f64 {
    let net = i64::from(upvotes) - i64::from(downvotes);
    signed_order(net) - (age_seconds.max(0) as f64) / HOT_DECAY_SECONDS
}

/// Age-invariant form of [`hot_score`] suitable for storing in a column:
/// at any fixed instant both order items identically.
pub fn hot_rank(upvotes: i32, downvotes: i32, created_at: DateTime<Utc>) -> f64 {
    let net = i64::from(upvotes) - i64::from(downvotes);
    signed_order(net) + created_at.timestamp() as f64 / HOT_DECAY_SECONDS
}

/// Zero without opposing votes, largest when the split is even.
pub fn controversy_score(upvotes: i32, downvotes: i32) -> f64 {
    if upvotes <= 0 || downvotes <= 0 {
        return 0.0;
    }

    let magnitude = f64::from(upvotes) + f64::from(downvotes);
    let balance = if upvotes > downvotes {
        f64::from(downvotes) / f64::from(upvotes)
    } else {
        f64::from(upvotes) / f64::from(downvotes)
    };

    magnitude.powf(balance)
}

/// Hours elapsed from `from` to `to`, never negative.
pub fn hours_since(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    ((to - from).num_milliseconds().max(0) as f64) / 3_600_000.0
}

/// `score / (hours_since + 2)^1.8`
pub fn best_score(score: i32, created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    f64::from(score) / (hours_since(created_at, now) + BEST_HOUR_OFFSET).powf(BEST_GRAVITY)
}

/// Vote velocity used by the rising feed.
pub fn rising_score(score: i32, age_seconds: i64) -> f64 {
    let hours = (age_seconds.max(0) as f64) / 3600.0;
    f64::from(score) / (hours + 2.0)
}

pub fn top_score(score: i32) -> i32 {
    score
}

pub fn new_score(created_at: DateTime<Utc>) -> DateTime<Utc> {
    created_at
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn hot_score_increases_with_net_votes() {
        let mut previous = hot_score(0, 50, 3600);
        for up in 1..=100 {
            let current = hot_score(up, 50, 3600);
            assert!(current > previous, "net {} did not outrank net {}", up - 50, up - 51);
            previous = current;
        }
    }

    #[test]
    fn hot_score_decreases_with_age() {
        for net in [-10, 0, 1, 250] {
            let fresh = hot_score(net.max(0), (-net).max(0), 0);
            let aged = hot_score(net.max(0), (-net).max(0), 1);
            let old = hot_score(net.max(0), (-net).max(0), 86_400);
            assert!(fresh > aged);
            assert!(aged > old);
        }
    }

    #[test]
    fn hot_rank_orders_like_hot_score() {
        let now = Utc::now();
        let a_created = now - Duration::hours(3);
        let b_created = now - Duration::hours(20);

        let a = hot_score(12, 2, (now - a_created).num_seconds());
        let b = hot_score(400, 10, (now - b_created).num_seconds());
        let a_rank = hot_rank(12, 2, a_created);
        let b_rank = hot_rank(400, 10, b_created);

        assert_eq!(a > b, a_rank > b_rank);
    }

    #[test]
    fn controversy_requires_opposing_votes() {
        assert_eq!(controversy_score(10, 0), 0.0);
        assert_eq!(controversy_score(0, 10), 0.0);
        assert_eq!(controversy_score(0, 0), 0.0);
    }

    #[test]
    fn controversy_peaks_at_parity() {
        assert!(controversy_score(10, 10) > controversy_score(10, 1));
        // Fixed total of 20 votes.
        assert!(controversy_score(10, 10) > controversy_score(11, 9));
        assert!(controversy_score(11, 9) > controversy_score(15, 5));
        assert_eq!(controversy_score(15, 5), controversy_score(5, 15));
    }

    #[test]
    fn best_score_decays_with_age() {
        let t0 = Utc::now();
        assert!(best_score(100, t0, t0) > best_score(100, t0, t0 + Duration::hours(10)));
    }

    #[test]
    fn best_score_uses_exact_constants() {
        let t0 = Utc::now();
        let expected = 100.0 / 2.0_f64.powf(1.8);
        assert!((best_score(100, t0, t0) - expected).abs() < 1e-9);

        let expected = 50.0 / 12.0_f64.powf(1.8);
        assert!((best_score(50, t0, t0 + Duration::hours(10)) - expected).abs() < 1e-9);
    }

    #[test]
    fn best_score_clamps_future_timestamps() {
        let t0 = Utc::now();
        assert_eq!(best_score(10, t0 + Duration::hours(5), t0), best_score(10, t0, t0));
    }

    #[test]
    fn rising_prefers_fast_growth() {
        assert!(rising_score(20, 1800) > rising_score(20, 36_000));
        assert!(rising_score(40, 3600) > rising_score(20, 3600));
    }
}
