pub mod api;
pub mod bidding;
pub mod countdown;
pub mod hub;
pub mod normalizer;
pub mod reconcile;
pub mod session;
pub mod types;

pub const AUCTION_API_PATH: &str = "/api/app/auction";
pub const EVENT_CHANNEL_CAPACITY: usize = 256;
