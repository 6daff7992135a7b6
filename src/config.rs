use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "https://localhost:44315";
pub const DEFAULT_HUB_PATH: &str = "/signalr/auction-hub";
pub const DEFAULT_JOIN_COMMAND: &str = "JoinAuctionGroup";
pub const DEFAULT_LEAVE_COMMAND: &str = "LeaveAuctionGroup";
pub const DEFAULT_RECENT_BIDS_CAPACITY: usize = 50;
pub const DEFAULT_PAGE_SIZE: u32 = 12;
pub const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 200;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_KEEP_ALIVE_INTERVAL_MS: u64 = 15_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const MIN_RECENT_BIDS_CAPACITY: usize = 1;
pub const MAX_RECENT_BIDS_CAPACITY: usize = 500;
pub const MIN_PAGE_SIZE: u32 = 1;
pub const MAX_PAGE_SIZE: u32 = 100;
pub const MAX_RECONNECT_ATTEMPTS: u32 = 50;
pub const MIN_RECONNECT_BASE_DELAY_MS: u64 = 50;
pub const MAX_RECONNECT_BASE_DELAY_MS: u64 = 5_000;
pub const MIN_KEEP_ALIVE_INTERVAL_MS: u64 = 1_000;
pub const MAX_KEEP_ALIVE_INTERVAL_MS: u64 = 120_000;
pub const MIN_REQUEST_TIMEOUT_MS: u64 = 500;
pub const MAX_REQUEST_TIMEOUT_MS: u64 = 120_000;

/// Supplies the bearer token for every request and hub (re)connect.
pub type TokenProvider = Arc<dyn Fn() -> Option<String> + Send + Sync>;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClientArgs {
    pub api_base_url: Option<String>,
    pub hub_path: Option<String>,
    pub access_token: Option<String>,
    pub join_command: Option<String>,
    pub leave_command: Option<String>,
    pub recent_bids_capacity: Option<usize>,
    pub page_size: Option<u32>,
    pub reconnect_base_delay_ms: Option<u64>,
    pub max_reconnect_attempts: Option<u32>,
    pub keep_alive_interval_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
}

#[derive(Clone)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub hub_path: String,
    pub access_token: Option<String>,
    pub join_command: String,
    pub leave_command: String,
    pub recent_bids_capacity: usize,
    pub page_size: u32,
    pub reconnect_base_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub keep_alive_interval_ms: u64,
    pub request_timeout_ms: u64,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_base_url", &self.api_base_url)
            .field("hub_path", &self.hub_path)
            .field("access_token", &self.access_token.as_ref().map(|_| "***"))
            .field("join_command", &self.join_command)
            .field("leave_command", &self.leave_command)
            .field("recent_bids_capacity", &self.recent_bids_capacity)
            .field("page_size", &self.page_size)
            .field("reconnect_base_delay_ms", &self.reconnect_base_delay_ms)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("keep_alive_interval_ms", &self.keep_alive_interval_ms)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .finish()
    }
}

impl ClientConfig {
    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn token_provider(&self) -> TokenProvider {
        let token = self.access_token.clone();
        Arc::new(move || token.clone())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            hub_path: DEFAULT_HUB_PATH.to_string(),
            access_token: None,
            join_command: DEFAULT_JOIN_COMMAND.to_string(),
            leave_command: DEFAULT_LEAVE_COMMAND.to_string(),
            recent_bids_capacity: DEFAULT_RECENT_BIDS_CAPACITY,
            page_size: DEFAULT_PAGE_SIZE,
            reconnect_base_delay_ms: DEFAULT_RECONNECT_BASE_DELAY_MS,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            keep_alive_interval_ms: DEFAULT_KEEP_ALIVE_INTERVAL_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_number<T: std::str::FromStr>(
    name: &str,
    value: Option<String>,
) -> Result<Option<T>, AppError> {
    match non_blank(value) {
        None => Ok(None),
        Some(raw) => raw.parse::<T>().map(Some).map_err(|_| {
            AppError::InvalidArgument(format!("{name} must be a number, got '{raw}'"))
        }),
    }
}

impl ClientArgs {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            api_base_url: non_blank(lookup("AUCTION_API_URL")),
            hub_path: non_blank(lookup("AUCTION_HUB_PATH")),
            access_token: non_blank(lookup("AUCTION_ACCESS_TOKEN")),
            join_command: non_blank(lookup("AUCTION_JOIN_COMMAND")),
            leave_command: non_blank(lookup("AUCTION_LEAVE_COMMAND")),
            recent_bids_capacity: parse_number(
                "AUCTION_RECENT_BIDS",
                lookup("AUCTION_RECENT_BIDS"),
            )?,
            page_size: parse_number("AUCTION_PAGE_SIZE", lookup("AUCTION_PAGE_SIZE"))?,
            max_reconnect_attempts: parse_number(
                "AUCTION_RECONNECT_ATTEMPTS",
                lookup("AUCTION_RECONNECT_ATTEMPTS"),
            )?,
            ..Self::default()
        })
    }

    pub fn normalize(self) -> Result<ClientConfig, AppError> {
        let api_base_url = non_blank(self.api_base_url)
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        if !(api_base_url.starts_with("http://") || api_base_url.starts_with("https://")) {
            return Err(AppError::InvalidArgument(
                "apiBaseUrl must be an absolute http(s) URL".to_string(),
            ));
        }

        let mut hub_path =
            non_blank(self.hub_path).unwrap_or_else(|| DEFAULT_HUB_PATH.to_string());
        if !hub_path.starts_with('/') {
            hub_path.insert(0, '/');
        }

        let join_command =
            non_blank(self.join_command).unwrap_or_else(|| DEFAULT_JOIN_COMMAND.to_string());
        let leave_command =
            non_blank(self.leave_command).unwrap_or_else(|| DEFAULT_LEAVE_COMMAND.to_string());

        let recent_bids_capacity = self
            .recent_bids_capacity
            .unwrap_or(DEFAULT_RECENT_BIDS_CAPACITY);
        if !(MIN_RECENT_BIDS_CAPACITY..=MAX_RECENT_BIDS_CAPACITY).contains(&recent_bids_capacity) {
            return Err(AppError::InvalidArgument(format!(
                "recentBidsCapacity must be between {MIN_RECENT_BIDS_CAPACITY} and {MAX_RECENT_BIDS_CAPACITY}"
            )));
        }

        let page_size = self.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(AppError::InvalidArgument(format!(
                "pageSize must be between {MIN_PAGE_SIZE} and {MAX_PAGE_SIZE}"
            )));
        }

        let reconnect_base_delay_ms = self
            .reconnect_base_delay_ms
            .unwrap_or(DEFAULT_RECONNECT_BASE_DELAY_MS);
        if !(MIN_RECONNECT_BASE_DELAY_MS..=MAX_RECONNECT_BASE_DELAY_MS)
            .contains(&reconnect_base_delay_ms)
        {
            return Err(AppError::InvalidArgument(format!(
                "reconnectBaseDelayMs must be between {MIN_RECONNECT_BASE_DELAY_MS} and {MAX_RECONNECT_BASE_DELAY_MS}"
            )));
        }

        let max_reconnect_attempts = self
            .max_reconnect_attempts
            .unwrap_or(DEFAULT_MAX_RECONNECT_ATTEMPTS);
        if max_reconnect_attempts > MAX_RECONNECT_ATTEMPTS {
            return Err(AppError::InvalidArgument(format!(
                "maxReconnectAttempts must be at most {MAX_RECONNECT_ATTEMPTS}"
            )));
        }

        let keep_alive_interval_ms = self
            .keep_alive_interval_ms
            .unwrap_or(DEFAULT_KEEP_ALIVE_INTERVAL_MS);
        if !(MIN_KEEP_ALIVE_INTERVAL_MS..=MAX_KEEP_ALIVE_INTERVAL_MS)
            .contains(&keep_alive_interval_ms)
        {
            return Err(AppError::InvalidArgument(format!(
                "keepAliveIntervalMs must be between {MIN_KEEP_ALIVE_INTERVAL_MS} and {MAX_KEEP_ALIVE_INTERVAL_MS}"
            )));
        }

        let request_timeout_ms = self.request_timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);
        if !(MIN_REQUEST_TIMEOUT_MS..=MAX_REQUEST_TIMEOUT_MS).contains(&request_timeout_ms) {
            return Err(AppError::InvalidArgument(format!(
                "requestTimeoutMs must be between {MIN_REQUEST_TIMEOUT_MS} and {MAX_REQUEST_TIMEOUT_MS}"
            )));
        }

        Ok(ClientConfig {
            api_base_url,
            hub_path,
            access_token: non_blank(self.access_token),
            join_command,
            leave_command,
            recent_bids_capacity,
            page_size,
            reconnect_base_delay_ms,
            max_reconnect_attempts,
            keep_alive_interval_ms,
            request_timeout_ms,
        })
    }
}
