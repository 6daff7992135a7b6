//! Maps raw hub invocations onto [`CanonicalEvent`].
//!
//! Hub payloads are not shape-stable: some events carry a single object,
//! others positional arguments (`auctionId`, value), and keys show up in
//! camelCase or PascalCase depending on the server build. Everything past
//! this module only ever sees the canonical form.

use crate::auction::types::{parse_wire_time, AuctionStatus, Bid};
use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionFields {
    pub title: Option<String>,
    pub description: Option<String>,
    pub starting_price: Option<f64>,
    pub current_price: Option<f64>,
    pub minimum_bid_increment: Option<f64>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub auto_extension_minutes: Option<u32>,
    pub status: Option<AuctionStatus>,
    pub total_bids: Option<u32>,
    pub winning_bid_id: Option<String>,
    pub is_approved: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CanonicalEvent {
    BidPlaced {
        auction_id: String,
        bid: Bid,
    },
    AuctionUpdated {
        auction_id: String,
        fields: AuctionFields,
    },
    TimeExtended {
        auction_id: String,
        new_end_time: DateTime<Utc>,
    },
    AuctionStarted {
        auction_id: String,
    },
    AuctionEnded {
        auction_id: String,
        winning_bid: Option<Bid>,
    },
    AuctionApproved {
        auction_id: String,
    },
    AuctionCancelled {
        auction_id: String,
    },
    AuctionPaused {
        auction_id: String,
    },
    StatusChanged {
        auction_id: String,
        status: AuctionStatus,
    },
    TimerUpdate {
        auction_id: String,
        remaining_seconds: i64,
    },
    AuctionError {
        auction_id: String,
        message: String,
    },
}

impl CanonicalEvent {
    pub fn auction_id(&self) -> &str {
        match self {
            Self::BidPlaced { auction_id, .. }
            | Self::AuctionUpdated { auction_id, .. }
            | Self::TimeExtended { auction_id, .. }
            | Self::AuctionStarted { auction_id }
            | Self::AuctionEnded { auction_id, .. }
            | Self::AuctionApproved { auction_id }
            | Self::AuctionCancelled { auction_id }
            | Self::AuctionPaused { auction_id }
            | Self::StatusChanged { auction_id, .. }
            | Self::TimerUpdate { auction_id, .. }
            | Self::AuctionError { auction_id, .. } => auction_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::BidPlaced { .. } => "BidPlaced",
            Self::AuctionUpdated { .. } => "AuctionUpdated",
            Self::TimeExtended { .. } => "TimeExtended",
            Self::AuctionStarted { .. } => "AuctionStarted",
            Self::AuctionEnded { .. } => "AuctionEnded",
            Self::AuctionApproved { .. } => "AuctionApproved",
            Self::AuctionCancelled { .. } => "AuctionCancelled",
            Self::AuctionPaused { .. } => "AuctionPaused",
            Self::StatusChanged { .. } => "StatusChanged",
            Self::TimerUpdate { .. } => "TimerUpdate",
            Self::AuctionError { .. } => "AuctionError",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Event(CanonicalEvent),
    Unrecognized(String),
}

pub fn normalize(event_name: &str, args: &[Value]) -> Result<Normalized, AppError> {
    let event = match canonical_key(event_name).as_str() {
        "bidplaced" | "newbid" => decode_bid_placed(event_name, args)?,
        "auctionupdated" => decode_auction_updated(event_name, args)?,
        "timeextended" | "auctionextended" => decode_time_extended(event_name, args)?,
        "auctionstarted" => CanonicalEvent::AuctionStarted {
            auction_id: leading_auction_id(event_name, args)?,
        },
        "auctionended" => decode_auction_ended(event_name, args)?,
        "auctionapproved" => CanonicalEvent::AuctionApproved {
            auction_id: leading_auction_id(event_name, args)?,
        },
        "auctioncancelled" | "auctioncanceled" => CanonicalEvent::AuctionCancelled {
            auction_id: leading_auction_id(event_name, args)?,
        },
        "auctionpaused" => CanonicalEvent::AuctionPaused {
            auction_id: leading_auction_id(event_name, args)?,
        },
        "statuschanged" | "auctionstatuschanged" => decode_status_changed(event_name, args)?,
        "timerupdate" | "timeupdate" | "remainingtime" => decode_timer_update(event_name, args)?,
        "auctionerror" | "biderror" => decode_auction_error(event_name, args)?,
        _ => return Ok(Normalized::Unrecognized(event_name.to_string())),
    };
    Ok(Normalized::Event(event))
}

/// `auction_id`, `AuctionId` and `auctionId` all collapse to `auctionid`.
fn canonical_key(raw: &str) -> String {
    raw.chars()
        .filter(|ch| *ch != '_' && *ch != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

fn lookup<'a>(object: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| {
        object
            .iter()
            .find(|(key, value)| canonical_key(key) == *name && !value.is_null())
            .map(|(_, value)| value)
    })
}

/// Rewrites object keys into the camelCase shape the serde models expect.
fn camelize_keys(value: &Value) -> Value {
    match value {
        Value::Object(object) => Value::Object(
            object
                .iter()
                .map(|(key, nested)| {
                    let mut chars = key.chars();
                    let camel = match chars.next() {
                        Some(first) => first.to_lowercase().chain(chars).collect(),
                        None => String::new(),
                    };
                    (camel, camelize_keys(nested))
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(camelize_keys).collect()),
        other => other.clone(),
    }
}

fn as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(raw) if !raw.trim().is_empty() => Some(raw.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => raw.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|parsed| parsed.is_finite())
}

fn as_u32(value: &Value) -> Option<u32> {
    as_f64(value)
        .filter(|parsed| *parsed >= 0.0)
        .map(|parsed| parsed.min(u32::MAX as f64) as u32)
}

/// Splits `[auctionId, rest..]` from `[{..}]` payload shapes.
fn split_leading_id(args: &[Value]) -> (Option<String>, &[Value]) {
    match args.first() {
        Some(first) if !first.is_object() => (as_id(first), &args[1..]),
        _ => (None, args),
    }
}

fn object_at<'a>(
    event_name: &str,
    values: &'a [Value],
) -> Result<&'a Map<String, Value>, AppError> {
    values
        .first()
        .and_then(Value::as_object)
        .ok_or_else(|| AppError::malformed(event_name, "expected an object payload"))
}

fn leading_auction_id(event_name: &str, args: &[Value]) -> Result<String, AppError> {
    let (leading, rest) = split_leading_id(args);
    if let Some(auction_id) = leading {
        return Ok(auction_id);
    }
    let object = object_at(event_name, rest)?;
    lookup(object, &["auctionid", "id"])
        .and_then(as_id)
        .ok_or_else(|| AppError::malformed(event_name, "missing auction id"))
}

fn decode_bid(event_name: &str, value: &Value) -> Result<Bid, AppError> {
    let bid: Bid = serde_json::from_value(camelize_keys(value))
        .map_err(|error| AppError::malformed(event_name, format!("invalid bid: {error}")))?;
    if !bid.bid_amount.is_finite() || bid.bid_amount < 0.0 {
        return Err(AppError::malformed(
            event_name,
            "bid amount must be finite and non-negative",
        ));
    }
    Ok(bid)
}

fn decode_bid_placed(event_name: &str, args: &[Value]) -> Result<CanonicalEvent, AppError> {
    let (leading, rest) = split_leading_id(args);
    let raw_bid = rest
        .first()
        .filter(|value| value.is_object())
        .ok_or_else(|| AppError::malformed(event_name, "missing bid payload"))?;

    let mut bid_value = raw_bid.clone();
    if let (Some(auction_id), Some(object)) = (leading.as_ref(), bid_value.as_object_mut()) {
        if lookup(object, &["auctionid"]).is_none() {
            object.insert("auctionId".to_string(), Value::String(auction_id.clone()));
        }
    }

    let bid = decode_bid(event_name, &bid_value)?;
    let auction_id = leading.unwrap_or_else(|| bid.auction_id.clone());
    if !auction_id.eq_ignore_ascii_case(&bid.auction_id) {
        return Err(AppError::malformed(
            event_name,
            "bid belongs to a different auction than the event",
        ));
    }
    Ok(CanonicalEvent::BidPlaced { auction_id, bid })
}

fn decode_auction_updated(event_name: &str, args: &[Value]) -> Result<CanonicalEvent, AppError> {
    let (leading, rest) = split_leading_id(args);
    let object = object_at(event_name, rest)?;
    let auction_id = match leading {
        Some(auction_id) => auction_id,
        None => lookup(object, &["auctionid", "id"])
            .and_then(as_id)
            .ok_or_else(|| AppError::malformed(event_name, "missing auction id"))?,
    };

    let fields = AuctionFields {
        title: lookup(object, &["title"])
            .and_then(Value::as_str)
            .map(str::to_string),
        description: lookup(object, &["description"])
            .and_then(Value::as_str)
            .map(str::to_string),
        starting_price: lookup(object, &["startingprice"]).and_then(as_f64),
        current_price: lookup(object, &["currentprice"]).and_then(as_f64),
        minimum_bid_increment: lookup(object, &["minimumbidincrement"]).and_then(as_f64),
        start_time: lookup(object, &["starttime"]).and_then(parse_wire_time),
        end_time: lookup(object, &["endtime"]).and_then(parse_wire_time),
        auto_extension_minutes: lookup(object, &["autoextensionminutes"]).and_then(as_u32),
        status: lookup(object, &["status"]).and_then(AuctionStatus::from_value),
        total_bids: lookup(object, &["totalbids"]).and_then(as_u32),
        winning_bid_id: lookup(object, &["winningbidid"]).and_then(as_id),
        is_approved: lookup(object, &["isapproved"]).and_then(Value::as_bool),
    };

    Ok(CanonicalEvent::AuctionUpdated { auction_id, fields })
}

fn decode_time_extended(event_name: &str, args: &[Value]) -> Result<CanonicalEvent, AppError> {
    let (leading, rest) = split_leading_id(args);
    let (auction_id, raw_end_time) = match (leading, rest.first()) {
        (Some(auction_id), Some(value)) if !value.is_object() => (auction_id, value),
        (leading, _) => {
            let object = object_at(event_name, rest)?;
            let auction_id = leading
                .or_else(|| lookup(object, &["auctionid", "id"]).and_then(as_id))
                .ok_or_else(|| AppError::malformed(event_name, "missing auction id"))?;
            let raw_end_time = lookup(object, &["newendtime", "endtime"])
                .ok_or_else(|| AppError::malformed(event_name, "missing new end time"))?;
            (auction_id, raw_end_time)
        }
    };

    let new_end_time = parse_wire_time(raw_end_time)
        .ok_or_else(|| AppError::malformed(event_name, "unparseable new end time"))?;
    Ok(CanonicalEvent::TimeExtended {
        auction_id,
        new_end_time,
    })
}

fn decode_auction_ended(event_name: &str, args: &[Value]) -> Result<CanonicalEvent, AppError> {
    let (leading, rest) = split_leading_id(args);
    match leading {
        Some(auction_id) => {
            let winning_bid = match rest.first() {
                Some(value) if value.is_object() => Some(decode_bid(event_name, value)?),
                _ => None,
            };
            Ok(CanonicalEvent::AuctionEnded {
                auction_id,
                winning_bid,
            })
        }
        None => {
            let object = object_at(event_name, rest)?;
            let auction_id = lookup(object, &["auctionid", "id"])
                .and_then(as_id)
                .ok_or_else(|| AppError::malformed(event_name, "missing auction id"))?;
            let winning_bid = match lookup(object, &["winningbid"]) {
                Some(value) => Some(decode_bid(event_name, value)?),
                None => None,
            };
            Ok(CanonicalEvent::AuctionEnded {
                auction_id,
                winning_bid,
            })
        }
    }
}

fn decode_status_changed(event_name: &str, args: &[Value]) -> Result<CanonicalEvent, AppError> {
    let (leading, rest) = split_leading_id(args);
    let (auction_id, raw_status) = match (leading, rest.first()) {
        (Some(auction_id), Some(value)) if !value.is_object() => (auction_id, value),
        (leading, _) => {
            let object = object_at(event_name, rest)?;
            let auction_id = leading
                .or_else(|| lookup(object, &["auctionid", "id"]).and_then(as_id))
                .ok_or_else(|| AppError::malformed(event_name, "missing auction id"))?;
            let raw_status = lookup(object, &["status", "newstatus"])
                .ok_or_else(|| AppError::malformed(event_name, "missing status"))?;
            (auction_id, raw_status)
        }
    };

    let status = AuctionStatus::from_value(raw_status)
        .ok_or_else(|| AppError::malformed(event_name, format!("unknown status {raw_status}")))?;
    Ok(CanonicalEvent::StatusChanged { auction_id, status })
}

fn decode_timer_update(event_name: &str, args: &[Value]) -> Result<CanonicalEvent, AppError> {
    let (leading, rest) = split_leading_id(args);
    let (auction_id, raw_remaining) = match (leading, rest.first()) {
        (Some(auction_id), Some(value)) if !value.is_object() => (auction_id, value),
        (leading, _) => {
            let object = object_at(event_name, rest)?;
            let auction_id = leading
                .or_else(|| lookup(object, &["auctionid", "id"]).and_then(as_id))
                .ok_or_else(|| AppError::malformed(event_name, "missing auction id"))?;
            let raw_remaining = lookup(object, &["remainingseconds", "remaining", "seconds"])
                .ok_or_else(|| AppError::malformed(event_name, "missing remaining seconds"))?;
            (auction_id, raw_remaining)
        }
    };

    let remaining_seconds = as_f64(raw_remaining)
        .map(|seconds| seconds.round().max(0.0) as i64)
        .ok_or_else(|| AppError::malformed(event_name, "remaining seconds is not a number"))?;
    Ok(CanonicalEvent::TimerUpdate {
        auction_id,
        remaining_seconds,
    })
}

fn decode_auction_error(event_name: &str, args: &[Value]) -> Result<CanonicalEvent, AppError> {
    let (leading, rest) = split_leading_id(args);
    let (auction_id, message) = match (leading, rest.first()) {
        (Some(auction_id), Some(Value::String(message))) => (auction_id, message.clone()),
        (leading, _) => {
            let object = object_at(event_name, rest)?;
            let auction_id = leading
                .or_else(|| lookup(object, &["auctionid", "id"]).and_then(as_id))
                .ok_or_else(|| AppError::malformed(event_name, "missing auction id"))?;
            let message = lookup(object, &["message", "error"])
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| AppError::malformed(event_name, "missing error message"))?;
            (auction_id, message)
        }
    };
    Ok(CanonicalEvent::AuctionError {
        auction_id,
        message,
    })
}
