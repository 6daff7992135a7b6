use crate::auction::types::{AuctionDetail, AuctionStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Everything the validator needs from the store, captured at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct BidSnapshot {
    pub current_price: f64,
    pub minimum_bid_increment: f64,
    pub status: AuctionStatus,
    pub end_time: DateTime<Utc>,
    /// Server-pushed remaining time, already decayed to `now`.
    pub server_remaining_seconds: Option<i64>,
}

impl BidSnapshot {
    pub fn from_detail(detail: &AuctionDetail, server_remaining_seconds: Option<i64>) -> Self {
        Self {
            current_price: detail.auction.current_price,
            minimum_bid_increment: detail.auction.minimum_bid_increment,
            status: detail.auction.status,
            end_time: detail.auction.end_time,
            server_remaining_seconds,
        }
    }

    pub fn minimum_next_bid(&self) -> f64 {
        next_minimum_bid(self.current_price, self.minimum_bid_increment)
    }

    /// The pushed timer wins over the local end time when both exist.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.server_remaining_seconds {
            Some(remaining) => remaining <= 0,
            None => now >= self.end_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum BidRejection {
    #[error("bid must be at least {minimum}")]
    BelowMinimum { minimum: f64 },
    #[error("auction is not active ({})", .status.as_str())]
    AuctionNotActive { status: AuctionStatus },
    #[error("auction has expired")]
    AuctionExpired,
    #[error("bid amount must be a finite positive number")]
    InvalidAmount,
}

pub fn next_minimum_bid(current_price: f64, minimum_bid_increment: f64) -> f64 {
    current_price + minimum_bid_increment
}

pub fn quick_bid_amount(snapshot: &BidSnapshot, increment: f64) -> f64 {
    snapshot.minimum_next_bid() + increment.max(0.0)
}

pub fn validate_bid(
    snapshot: &BidSnapshot,
    proposed_amount: f64,
    now: DateTime<Utc>,
) -> Result<(), BidRejection> {
    if !proposed_amount.is_finite() || proposed_amount <= 0.0 {
        return Err(BidRejection::InvalidAmount);
    }
    if !snapshot.status.accepts_bids() {
        return Err(BidRejection::AuctionNotActive {
            status: snapshot.status,
        });
    }
    if snapshot.is_expired(now) {
        return Err(BidRejection::AuctionExpired);
    }

    let minimum = snapshot.minimum_next_bid();
    if proposed_amount < minimum {
        return Err(BidRejection::BelowMinimum { minimum });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn active_snapshot(now: DateTime<Utc>) -> BidSnapshot {
        BidSnapshot {
            current_price: 100.0,
            minimum_bid_increment: 10.0,
            status: AuctionStatus::Active,
            end_time: now + Duration::minutes(5),
            server_remaining_seconds: None,
        }
    }

    #[test]
    fn minimum_is_price_plus_increment() {
        let snapshot = active_snapshot(Utc::now());
        assert_eq!(snapshot.minimum_next_bid(), 110.0);
        assert_eq!(quick_bid_amount(&snapshot, 50.0), 160.0);
    }

    #[test]
    fn rejects_bid_below_minimum() {
        let now = Utc::now();
        let result = validate_bid(&active_snapshot(now), 105.0, now);
        assert_eq!(result, Err(BidRejection::BelowMinimum { minimum: 110.0 }));
        assert_eq!(validate_bid(&active_snapshot(now), 110.0, now), Ok(()));
    }

    #[test]
    fn rejects_inactive_auction_before_checking_amount() {
        let now = Utc::now();
        let mut snapshot = active_snapshot(now);
        snapshot.status = AuctionStatus::Paused;

        let result = validate_bid(&snapshot, 1.0, now);
        assert_eq!(
            result,
            Err(BidRejection::AuctionNotActive {
                status: AuctionStatus::Paused
            })
        );
    }

    #[test]
    fn rejects_expired_auction() {
        let now = Utc::now();
        let mut snapshot = active_snapshot(now);
        snapshot.end_time = now - Duration::seconds(1);

        assert_eq!(
            validate_bid(&snapshot, 500.0, now),
            Err(BidRejection::AuctionExpired)
        );
    }

    #[test]
    fn server_timer_overrides_local_end_time() {
        let now = Utc::now();
        let mut snapshot = active_snapshot(now);
        snapshot.server_remaining_seconds = Some(0);
        assert_eq!(
            validate_bid(&snapshot, 500.0, now),
            Err(BidRejection::AuctionExpired)
        );

        snapshot.end_time = now - Duration::seconds(30);
        snapshot.server_remaining_seconds = Some(20);
        assert_eq!(validate_bid(&snapshot, 500.0, now), Ok(()));
    }

    #[test]
    fn rejects_non_finite_amounts() {
        let now = Utc::now();
        assert_eq!(
            validate_bid(&active_snapshot(now), f64::NAN, now),
            Err(BidRejection::InvalidAmount)
        );
    }
}
