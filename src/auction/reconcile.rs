use crate::auction::bidding::{validate_bid, BidRejection, BidSnapshot};
use crate::auction::normalizer::{AuctionFields, CanonicalEvent};
use crate::auction::types::{Auction, AuctionDetail, AuctionListQuery, AuctionStatus, Bid, PagedResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// Side effects the owner of a store must carry out after an apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Effects {
    pub restart_countdown: bool,
    pub stop_countdown: bool,
    pub refetch_snapshot: bool,
}

impl Effects {
    fn merge(self, other: Effects) -> Self {
        Self {
            restart_countdown: self.restart_countdown || other.restart_countdown,
            stop_countdown: self.stop_countdown || other.stop_countdown,
            refetch_snapshot: self.refetch_snapshot || other.refetch_snapshot,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Applied(Effects),
    Stale(StaleReason),
    Ignored(IgnoreReason),
    BidError { message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum StaleReason {
    BidBelowPrice { current: f64, found: f64 },
    DuplicateBid { bid_id: String },
    EndTimeNotLater {
        current: DateTime<Utc>,
        found: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    OtherAuction,
    UnknownAuction,
    NotLoaded,
    Frozen,
    NotAccepting,
    NotTracked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "camelCase")]
pub enum DetailPhase {
    Loading,
    Ready,
    Ended,
    Failed { reason: String },
    TornDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerTimer {
    pub remaining_seconds: i64,
    pub received_at: DateTime<Utc>,
}

impl ServerTimer {
    pub fn remaining_at(&self, now: DateTime<Utc>) -> i64 {
        let elapsed = (now - self.received_at).num_seconds().max(0);
        self.remaining_seconds.saturating_sub(elapsed).max(0)
    }
}

/// Auction ids are GUIDs; the hub and the REST API disagree on casing.
pub fn same_auction(left: &str, right: &str) -> bool {
    left.eq_ignore_ascii_case(right)
}

fn apply_status(auction: &mut Auction, status: AuctionStatus, refetch: bool) -> ApplyOutcome {
    if auction.status.is_terminal() {
        return ApplyOutcome::Ignored(IgnoreReason::Frozen);
    }
    auction.status = status;
    ApplyOutcome::Applied(Effects {
        stop_countdown: status.is_terminal(),
        refetch_snapshot: refetch,
        ..Effects::default()
    })
}

fn merge_fields(auction: &mut Auction, fields: &AuctionFields) -> Effects {
    let mut effects = Effects::default();

    if let Some(title) = &fields.title {
        auction.title = title.clone();
    }
    if let Some(description) = &fields.description {
        auction.description = description.clone();
    }
    if let Some(starting_price) = fields.starting_price {
        auction.starting_price = starting_price;
    }
    if let Some(increment) = fields.minimum_bid_increment {
        auction.minimum_bid_increment = increment;
    }
    if let Some(start_time) = fields.start_time {
        auction.start_time = start_time;
    }
    if let Some(minutes) = fields.auto_extension_minutes {
        auction.auto_extension_minutes = minutes;
    }
    if let Some(is_approved) = fields.is_approved {
        auction.is_approved = is_approved;
    }
    if let Some(winning_bid_id) = &fields.winning_bid_id {
        auction.winning_bid_id = Some(winning_bid_id.clone());
    }
    if let Some(current_price) = fields.current_price {
        if current_price >= auction.current_price {
            auction.current_price = current_price;
        }
    }
    if let Some(total_bids) = fields.total_bids {
        auction.total_bids = auction.total_bids.max(total_bids);
    }
    if let Some(end_time) = fields.end_time {
        if end_time != auction.end_time && !auction.status.is_terminal() {
            auction.end_time = end_time;
            effects.restart_countdown = true;
        }
    }
    if let Some(status) = fields.status {
        if status != auction.status {
            if let ApplyOutcome::Applied(status_effects) = apply_status(auction, status, false) {
                effects = effects.merge(status_effects);
            }
        }
    }

    effects
}

/// Fetched values never move a known auction backwards.
fn merge_known_auction(fetched: &mut Auction, known: &Auction) {
    fetched.current_price = fetched.current_price.max(known.current_price);
    fetched.total_bids = fetched.total_bids.max(known.total_bids);
    if known.end_time > fetched.end_time {
        fetched.end_time = known.end_time;
    }
    if known.status.is_terminal() && !fetched.status.is_terminal() {
        fetched.status = known.status;
    }
    if fetched.winning_bid_id.is_none() {
        fetched.winning_bid_id = known.winning_bid_id.clone();
    }
}

/// Rules shared by the detail and the list store.
fn apply_to_auction(auction: &mut Auction, event: &CanonicalEvent, now: DateTime<Utc>) -> ApplyOutcome {
    match event {
        CanonicalEvent::BidPlaced { bid, .. } => {
            if auction.status.is_terminal() {
                return ApplyOutcome::Ignored(IgnoreReason::Frozen);
            }
            if !auction.status.accepts_bids() {
                return ApplyOutcome::Ignored(IgnoreReason::NotAccepting);
            }
            if bid.bid_amount < auction.current_price {
                return ApplyOutcome::Stale(StaleReason::BidBelowPrice {
                    current: auction.current_price,
                    found: bid.bid_amount,
                });
            }
            auction.current_price = bid.bid_amount;
            auction.total_bids = auction.total_bids.saturating_add(1);
            ApplyOutcome::Applied(Effects::default())
        }
        CanonicalEvent::AuctionUpdated { fields, .. } => {
            ApplyOutcome::Applied(merge_fields(auction, fields))
        }
        CanonicalEvent::TimeExtended { new_end_time, .. } => {
            if auction.status.is_terminal() {
                return ApplyOutcome::Ignored(IgnoreReason::Frozen);
            }
            if *new_end_time <= auction.end_time {
                return ApplyOutcome::Stale(StaleReason::EndTimeNotLater {
                    current: auction.end_time,
                    found: *new_end_time,
                });
            }
            auction.end_time = *new_end_time;
            ApplyOutcome::Applied(Effects {
                restart_countdown: true,
                ..Effects::default()
            })
        }
        CanonicalEvent::AuctionStarted { .. } => apply_status(auction, AuctionStatus::Active, false),
        CanonicalEvent::AuctionApproved { .. } => {
            let status = if auction.start_time <= now {
                AuctionStatus::Active
            } else {
                AuctionStatus::Pending
            };
            let outcome = apply_status(auction, status, true);
            if matches!(outcome, ApplyOutcome::Applied(_)) {
                auction.is_approved = true;
            }
            outcome
        }
        CanonicalEvent::AuctionCancelled { .. } => {
            apply_status(auction, AuctionStatus::Cancelled, false)
        }
        CanonicalEvent::AuctionPaused { .. } => apply_status(auction, AuctionStatus::Paused, false),
        CanonicalEvent::StatusChanged { status, .. } => apply_status(auction, *status, true),
        CanonicalEvent::AuctionEnded { winning_bid, .. } => {
            let winning_bid_id = winning_bid.as_ref().map(|bid| bid.id.clone());
            if auction.status.is_terminal() {
                if winning_bid_id.is_some() && auction.winning_bid_id != winning_bid_id {
                    auction.winning_bid_id = winning_bid_id;
                    return ApplyOutcome::Applied(Effects::default());
                }
                return ApplyOutcome::Ignored(IgnoreReason::Frozen);
            }

            auction.status = AuctionStatus::Completed;
            if let Some(bid) = winning_bid {
                auction.winning_bid_id = Some(bid.id.clone());
                if bid.bid_amount > auction.current_price {
                    auction.current_price = bid.bid_amount;
                }
            }
            ApplyOutcome::Applied(Effects {
                stop_countdown: true,
                ..Effects::default()
            })
        }
        CanonicalEvent::TimerUpdate { .. } | CanonicalEvent::AuctionError { .. } => {
            ApplyOutcome::Ignored(IgnoreReason::NotTracked)
        }
    }
}

fn sort_and_cap_bids(bids: &mut Vec<Bid>, capacity: usize) {
    bids.sort_by(|left, right| {
        right
            .bid_amount
            .total_cmp(&left.bid_amount)
            .then_with(|| right.bid_time.cmp(&left.bid_time))
    });
    bids.truncate(capacity);
}

/// Reconciliation store for one auction detail view.
#[derive(Debug, Clone)]
pub struct DetailState {
    auction_id: String,
    phase: DetailPhase,
    detail: Option<AuctionDetail>,
    server_timer: Option<ServerTimer>,
    suggested_bid: Option<f64>,
    last_bid_error: Option<String>,
    recent_bids_capacity: usize,
}

impl DetailState {
    pub fn new(auction_id: impl Into<String>, recent_bids_capacity: usize) -> Self {
        Self {
            auction_id: auction_id.into(),
            phase: DetailPhase::Loading,
            detail: None,
            server_timer: None,
            suggested_bid: None,
            last_bid_error: None,
            recent_bids_capacity: recent_bids_capacity.max(1),
        }
    }

    pub fn auction_id(&self) -> &str {
        &self.auction_id
    }

    pub fn phase(&self) -> &DetailPhase {
        &self.phase
    }

    pub fn detail(&self) -> Option<&AuctionDetail> {
        self.detail.as_ref()
    }

    pub fn suggested_bid(&self) -> Option<f64> {
        self.suggested_bid
    }

    pub fn last_bid_error(&self) -> Option<&str> {
        self.last_bid_error.as_deref()
    }

    pub fn minimum_next_bid(&self) -> Option<f64> {
        self.detail
            .as_ref()
            .map(|detail| detail.auction.minimum_next_bid())
    }

    pub fn server_remaining_seconds(&self, now: DateTime<Utc>) -> Option<i64> {
        self.server_timer.map(|timer| timer.remaining_at(now))
    }

    pub fn bid_snapshot(&self, now: DateTime<Utc>) -> Option<BidSnapshot> {
        self.detail
            .as_ref()
            .map(|detail| BidSnapshot::from_detail(detail, self.server_remaining_seconds(now)))
    }

    /// `None` while no snapshot has been loaded.
    pub fn validate(&self, amount: f64, now: DateTime<Utc>) -> Option<Result<(), BidRejection>> {
        self.bid_snapshot(now)
            .map(|snapshot| validate_bid(&snapshot, amount, now))
    }

    /// Local pre-fill only; server-sourced fields are never touched.
    pub fn set_suggested_bid(&mut self, amount: f64) {
        if amount.is_finite() {
            self.suggested_bid = Some(amount);
        }
    }

    pub fn set_bid_error(&mut self, message: Option<String>) {
        self.last_bid_error = message;
    }

    pub fn is_frozen(&self) -> bool {
        self.detail
            .as_ref()
            .map(|detail| detail.auction.status.is_terminal())
            .unwrap_or(false)
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.phase = DetailPhase::Failed {
            reason: reason.into(),
        };
    }

    pub fn mark_torn_down(&mut self) {
        self.phase = DetailPhase::TornDown;
    }

    fn is_closed(&self) -> bool {
        matches!(self.phase, DetailPhase::TornDown | DetailPhase::Failed { .. })
    }

    fn sync_phase(&mut self) {
        if self.is_closed() {
            return;
        }
        self.phase = match &self.detail {
            None => DetailPhase::Loading,
            Some(detail) if detail.auction.status.is_terminal() => DetailPhase::Ended,
            Some(_) => DetailPhase::Ready,
        };
    }

    fn refresh_suggested_bid(&mut self) {
        if let Some(minimum) = self.minimum_next_bid() {
            let current = self.suggested_bid.unwrap_or(minimum);
            self.suggested_bid = Some(current.max(minimum));
        }
    }

    /// Full snapshot load. A reload never regresses values already learned
    /// from events and keeps a frozen auction frozen.
    pub fn apply_snapshot(&mut self, mut snapshot: AuctionDetail) -> ApplyOutcome {
        if self.is_closed() {
            return ApplyOutcome::Ignored(IgnoreReason::NotLoaded);
        }
        if !same_auction(&snapshot.auction.id, &self.auction_id) {
            return ApplyOutcome::Ignored(IgnoreReason::OtherAuction);
        }

        let mut effects = Effects::default();
        match self.detail.take() {
            None => {
                sort_and_cap_bids(&mut snapshot.recent_bids, self.recent_bids_capacity);
                effects.restart_countdown = true;
            }
            Some(previous) => {
                let snapshot_end_time = snapshot.auction.end_time;
                let merged = &mut snapshot.auction;
                let known = &previous.auction;
                merge_known_auction(merged, known);
                effects.restart_countdown = merged.end_time != known.end_time;
                if merged.end_time > known.end_time {
                    self.server_timer = None;
                }
                if merged.end_time == known.end_time && merged.end_time > snapshot_end_time {
                    snapshot.remaining_seconds = previous.remaining_seconds;
                }

                let mut bids = previous.recent_bids;
                for bid in snapshot.recent_bids.drain(..) {
                    if let Some(existing) = bids.iter_mut().find(|known| known.id == bid.id) {
                        *existing = bid;
                    } else {
                        bids.push(bid);
                    }
                }
                sort_and_cap_bids(&mut bids, self.recent_bids_capacity);
                snapshot.recent_bids = bids;

                let highest_amount = snapshot.highest_bid.as_ref().map(|bid| bid.bid_amount);
                let known_highest = previous.highest_bid.as_ref().map(|bid| bid.bid_amount);
                if known_highest > highest_amount {
                    snapshot.highest_bid = previous.highest_bid;
                }
            }
        }

        if snapshot.auction.status.is_terminal() {
            effects.restart_countdown = false;
            effects.stop_countdown = true;
        }
        self.detail = Some(snapshot);
        self.refresh_suggested_bid();
        self.sync_phase();
        ApplyOutcome::Applied(effects)
    }

    pub fn apply_event(&mut self, event: &CanonicalEvent, now: DateTime<Utc>) -> ApplyOutcome {
        if !same_auction(event.auction_id(), &self.auction_id) {
            return ApplyOutcome::Ignored(IgnoreReason::OtherAuction);
        }
        if self.is_closed() {
            return ApplyOutcome::Ignored(IgnoreReason::NotLoaded);
        }
        let capacity = self.recent_bids_capacity;
        let Some(detail) = self.detail.as_mut() else {
            return ApplyOutcome::Ignored(IgnoreReason::NotLoaded);
        };

        let outcome = match event {
            CanonicalEvent::TimerUpdate {
                remaining_seconds, ..
            } => {
                self.server_timer = Some(ServerTimer {
                    remaining_seconds: *remaining_seconds,
                    received_at: now,
                });
                detail.remaining_seconds = Some(*remaining_seconds);
                ApplyOutcome::Applied(Effects::default())
            }
            CanonicalEvent::AuctionError { message, .. } => {
                self.last_bid_error = Some(message.clone());
                ApplyOutcome::BidError {
                    message: message.clone(),
                }
            }
            CanonicalEvent::BidPlaced { bid, .. } => {
                if detail.recent_bids.iter().any(|known| known.id == bid.id) {
                    return ApplyOutcome::Stale(StaleReason::DuplicateBid {
                        bid_id: bid.id.clone(),
                    });
                }
                let outcome = apply_to_auction(&mut detail.auction, event, now);
                if matches!(outcome, ApplyOutcome::Applied(_)) {
                    detail.recent_bids.insert(0, bid.clone());
                    detail.recent_bids.truncate(capacity);
                    detail.highest_bid = Some(bid.clone());
                    self.suggested_bid = Some(detail.auction.minimum_next_bid());
                }
                outcome
            }
            CanonicalEvent::AuctionEnded { winning_bid, .. } => {
                let outcome = apply_to_auction(&mut detail.auction, event, now);
                if let (ApplyOutcome::Applied(_), Some(winner)) = (&outcome, winning_bid) {
                    for bid in detail.recent_bids.iter_mut() {
                        bid.is_winning_bid = bid.id == winner.id;
                    }
                    detail.highest_bid = Some(Bid {
                        is_winning_bid: true,
                        ..winner.clone()
                    });
                }
                outcome
            }
            _ => apply_to_auction(&mut detail.auction, event, now),
        };

        if let ApplyOutcome::Applied(effects) = &outcome {
            // A moved end time invalidates the last pushed countdown.
            if effects.restart_countdown {
                self.server_timer = None;
                if let Some(detail) = self.detail.as_mut() {
                    detail.remaining_seconds = None;
                }
            }
            if let Some(detail) = self.detail.as_mut() {
                detail.is_active = detail.auction.status.accepts_bids();
                detail.is_expired = detail.auction.status.is_terminal();
            }
            self.refresh_suggested_bid();
            self.sync_phase();
        }
        outcome
    }
}

/// Reconciliation store for one page of the auction list.
#[derive(Debug, Clone, Default)]
pub struct ListState {
    items: Vec<Auction>,
    total_count: u64,
    query: AuctionListQuery,
    last_bid_ids: HashMap<String, String>,
}

impl ListState {
    pub fn new(query: AuctionListQuery) -> Self {
        Self {
            query,
            ..Self::default()
        }
    }

    pub fn items(&self) -> &[Auction] {
        &self.items
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn query(&self) -> &AuctionListQuery {
        &self.query
    }

    pub fn page_count(&self) -> u64 {
        let page_size = u64::from(self.query.take.max(1));
        self.total_count.div_ceil(page_size).max(1)
    }

    pub fn get(&self, auction_id: &str) -> Option<&Auction> {
        self.items
            .iter()
            .find(|auction| same_auction(&auction.id, auction_id))
    }

    /// Replaces the page, keeping what live events already taught us about
    /// auctions that appear on both the old and the new page.
    pub fn apply_page(&mut self, query: AuctionListQuery, page: PagedResult<Auction>) {
        let previous = std::mem::take(&mut self.items);
        let mut items = page.items;
        for item in items.iter_mut() {
            if let Some(known) = previous.iter().find(|known| same_auction(&known.id, &item.id)) {
                merge_known_auction(item, known);
            }
        }
        self.last_bid_ids
            .retain(|auction_id, _| items.iter().any(|item| same_auction(&item.id, auction_id)));
        self.query = query;
        self.total_count = page.total_count;
        self.items = items;
    }

    pub fn apply_event(&mut self, event: &CanonicalEvent, now: DateTime<Utc>) -> ApplyOutcome {
        let Some(auction) = self
            .items
            .iter_mut()
            .find(|auction| same_auction(&auction.id, event.auction_id()))
        else {
            return ApplyOutcome::Ignored(IgnoreReason::UnknownAuction);
        };

        if let CanonicalEvent::BidPlaced { bid, .. } = event {
            if self.last_bid_ids.get(&auction.id) == Some(&bid.id) {
                return ApplyOutcome::Stale(StaleReason::DuplicateBid {
                    bid_id: bid.id.clone(),
                });
            }
            let outcome = apply_to_auction(auction, event, now);
            if matches!(outcome, ApplyOutcome::Applied(_)) {
                self.last_bid_ids.insert(auction.id.clone(), bid.id.clone());
            }
            return outcome;
        }

        apply_to_auction(auction, event, now)
    }
}
