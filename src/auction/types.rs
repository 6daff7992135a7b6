use crate::error::AppError;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::de::{Deserializer, Error as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_SORTING: &str = "EndTime";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "CodeOrName", into = "u8")]
pub enum AuctionStatus {
    Draft,
    Pending,
    Active,
    Completed,
    Cancelled,
    Paused,
}

impl AuctionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "Draft",
            Self::Pending => "Pending",
            Self::Active => "Active",
            Self::Completed => "Completed",
            Self::Cancelled => "Cancelled",
            Self::Paused => "Paused",
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Draft => 0,
            Self::Pending => 1,
            Self::Active => 2,
            Self::Completed => 3,
            Self::Cancelled => 4,
            Self::Paused => 5,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, AppError> {
        match code {
            0 => Ok(Self::Draft),
            1 => Ok(Self::Pending),
            2 => Ok(Self::Active),
            3 => Ok(Self::Completed),
            4 => Ok(Self::Cancelled),
            5 => Ok(Self::Paused),
            other => Err(AppError::InvalidArgument(format!(
                "unsupported auction status code: {other}"
            ))),
        }
    }

    pub fn parse_str(value: &str) -> Result<Self, AppError> {
        let trimmed = value.trim();
        if let Ok(code) = trimmed.parse::<i64>() {
            return Self::from_code(code);
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "completed" | "ended" => Ok(Self::Completed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            "paused" => Ok(Self::Paused),
            _ => Err(AppError::InvalidArgument(format!(
                "unsupported auction status: {value}"
            ))),
        }
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => number.as_i64().and_then(|code| Self::from_code(code).ok()),
            Value::String(raw) => Self::parse_str(raw).ok(),
            _ => None,
        }
    }

    /// Completed and Cancelled auctions never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn accepts_bids(self) -> bool {
        self == Self::Active
    }
}

impl From<AuctionStatus> for u8 {
    fn from(value: AuctionStatus) -> Self {
        value.code()
    }
}

impl TryFrom<CodeOrName> for AuctionStatus {
    type Error = AppError;

    fn try_from(value: CodeOrName) -> Result<Self, Self::Error> {
        match value {
            CodeOrName::Code(code) => Self::from_code(code),
            CodeOrName::Name(name) => Self::parse_str(&name),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "CodeOrName", into = "u8")]
pub enum ProductType {
    Animal,
    OrganicProduct,
}

impl ProductType {
    pub fn code(self) -> u8 {
        match self {
            Self::Animal => 0,
            Self::OrganicProduct => 1,
        }
    }

    pub fn parse_str(value: &str) -> Result<Self, AppError> {
        let trimmed = value.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "0" | "animal" => Ok(Self::Animal),
            "1" | "organicproduct" | "organic_product" => Ok(Self::OrganicProduct),
            _ => Err(AppError::InvalidArgument(format!(
                "unsupported product type: {value}"
            ))),
        }
    }
}

impl From<ProductType> for u8 {
    fn from(value: ProductType) -> Self {
        value.code()
    }
}

impl TryFrom<CodeOrName> for ProductType {
    type Error = AppError;

    fn try_from(value: CodeOrName) -> Result<Self, Self::Error> {
        match value {
            CodeOrName::Code(code) => Self::parse_str(&code.to_string()),
            CodeOrName::Name(name) => Self::parse_str(&name),
        }
    }
}

/// Enum values arrive either as numeric codes or as names.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CodeOrName {
    Code(i64),
    Name(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Reconnecting => "Reconnecting",
            Self::Error => "Error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Bid {
    pub id: String,
    pub auction_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub bidder_id: String,
    #[serde(
        default,
        alias = "bidderUserName",
        deserialize_with = "null_as_default"
    )]
    pub bidder_display_name: String,
    pub bid_amount: f64,
    #[serde(deserialize_with = "wire_time::deserialize")]
    pub bid_time: DateTime<Utc>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_winning_bid: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_auto_bid: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Auction {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    pub starting_price: f64,
    pub current_price: f64,
    pub minimum_bid_increment: f64,
    #[serde(deserialize_with = "wire_time::deserialize")]
    pub start_time: DateTime<Utc>,
    #[serde(deserialize_with = "wire_time::deserialize")]
    pub end_time: DateTime<Utc>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub auto_extension_minutes: u32,
    pub status: AuctionStatus,
    pub product_type: ProductType,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_approved: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_bids: u32,
    #[serde(default)]
    pub winning_bid_id: Option<String>,
}

impl Auction {
    pub fn minimum_next_bid(&self) -> f64 {
        crate::auction::bidding::next_minimum_bid(self.current_price, self.minimum_bid_increment)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuctionDetail {
    #[serde(flatten)]
    pub auction: Auction,
    #[serde(default, deserialize_with = "null_as_default")]
    pub recent_bids: Vec<Bid>,
    #[serde(default)]
    pub highest_bid: Option<Bid>,
    #[serde(default)]
    pub current_user_highest_bid: Option<Bid>,
    #[serde(default)]
    pub remaining_seconds: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_active: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_expired: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", bound(deserialize = "T: Deserialize<'de>"))]
pub struct PagedResult<T> {
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub items: Vec<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuctionListQuery {
    pub filter: Option<String>,
    pub status: Option<AuctionStatus>,
    pub product_type: Option<ProductType>,
    pub skip: u32,
    pub take: u32,
    pub sorting: Option<String>,
}

impl AuctionListQuery {
    /// `page` is 1-based; page 0 is treated as the first page.
    pub fn for_page(page: u32, page_size: u32) -> Self {
        Self {
            skip: page.saturating_sub(1).saturating_mul(page_size),
            take: page_size,
            ..Self::default()
        }
    }

    pub fn page(&self) -> u32 {
        if self.take == 0 {
            return 1;
        }
        self.skip / self.take + 1
    }

    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("SkipCount", self.skip.to_string()),
            ("MaxResultCount", self.take.to_string()),
        ];
        if let Some(filter) = self
            .filter
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            pairs.push(("Filter", filter.to_string()));
        }
        if let Some(status) = self.status {
            pairs.push(("Status", status.code().to_string()));
        }
        if let Some(product_type) = self.product_type {
            pairs.push(("ProductType", product_type.code().to_string()));
        }
        if let Some(sorting) = self.sorting.as_deref() {
            pairs.push(("Sorting", sorting.to_string()));
        }
        pairs
    }
}

impl Default for AuctionListQuery {
    fn default() -> Self {
        Self {
            filter: None,
            status: None,
            product_type: None,
            skip: 0,
            take: crate::config::DEFAULT_PAGE_SIZE,
            sorting: Some(DEFAULT_SORTING.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlaceBidRequest {
    pub auction_id: String,
    pub bid_amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl PlaceBidRequest {
    pub fn new(auction_id: &str, bid_amount: f64, notes: Option<&str>) -> Self {
        Self {
            auction_id: auction_id.to_string(),
            bid_amount,
            notes: notes
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string),
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

pub fn parse_wire_time_str(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    // The backend serialises UTC values without an offset.
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

pub fn parse_wire_time(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(raw) => parse_wire_time_str(raw),
        Value::Number(number) => number
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    }
}

pub(crate) mod wire_time {
    use super::*;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        parse_wire_time(&value)
            .ok_or_else(|| D::Error::custom(format!("unrecognised timestamp: {value}")))
    }
}
