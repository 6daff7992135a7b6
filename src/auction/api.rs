use crate::auction::types::{Auction, AuctionDetail, AuctionListQuery, Bid, PagedResult, PlaceBidRequest};
use crate::auction::AUCTION_API_PATH;
use crate::config::{ClientConfig, TokenProvider};
use crate::error::AppError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// REST surface of the auction backend.
#[async_trait]
pub trait AuctionApi: Send + Sync {
    async fn get_list(&self, query: &AuctionListQuery) -> Result<PagedResult<Auction>, AppError>;

    async fn get_detail(&self, auction_id: &str) -> Result<AuctionDetail, AppError>;

    async fn place_bid(&self, request: &PlaceBidRequest) -> Result<Bid, AppError>;
}

fn list_endpoint(base_url: &str) -> String {
    format!("{base_url}{AUCTION_API_PATH}")
}

fn detail_endpoint(base_url: &str, auction_id: &str) -> String {
    format!("{base_url}{AUCTION_API_PATH}/{}/detail", auction_id.trim())
}

fn place_bid_endpoint(base_url: &str) -> String {
    format!("{base_url}{AUCTION_API_PATH}/place-bid")
}

#[derive(Debug, Deserialize)]
struct RemoteErrorEnvelope {
    error: Option<RemoteError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteError {
    message: Option<String>,
    details: Option<String>,
}

fn rejection_from_body(status: u16, body: &str) -> AppError {
    let remote = serde_json::from_str::<RemoteErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error);
    let message = remote
        .and_then(|error| error.message.or(error.details))
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                format!("HTTP {status}")
            } else {
                trimmed.chars().take(200).collect()
            }
        });
    AppError::Rejected { status, message }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }
    let body = response.text().await.unwrap_or_default();
    Err(rejection_from_body(status.as_u16(), &body))
}

pub struct RestAuctionApi {
    client: Client,
    base_url: String,
    token: TokenProvider,
}

impl RestAuctionApi {
    pub fn new(config: &ClientConfig) -> Result<Self, AppError> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: &ClientConfig) -> Self {
        Self {
            client,
            base_url: config.api_base_url.clone(),
            token: config.token_provider(),
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match (self.token)() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl AuctionApi for RestAuctionApi {
    async fn get_list(&self, query: &AuctionListQuery) -> Result<PagedResult<Auction>, AppError> {
        let request = self
            .client
            .get(list_endpoint(&self.base_url))
            .query(&query.query_pairs());
        let response = self.authorized(request).send().await?;
        read_json(response).await
    }

    async fn get_detail(&self, auction_id: &str) -> Result<AuctionDetail, AppError> {
        let request = self.client.get(detail_endpoint(&self.base_url, auction_id));
        let response = self.authorized(request).send().await?;
        read_json(response).await
    }

    async fn place_bid(&self, request: &PlaceBidRequest) -> Result<Bid, AppError> {
        let builder = self
            .client
            .post(place_bid_endpoint(&self.base_url))
            .json(request);
        let response = self.authorized(builder).send().await?;
        read_json(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_endpoint_nests_auction_id() {
        let endpoint = detail_endpoint("https://localhost:44315", " auction-42 ");
        assert_eq!(endpoint, "https://localhost:44315/api/app/auction/auction-42/detail");
    }

    #[test]
    fn list_and_bid_endpoints_share_base_path() {
        assert!(list_endpoint("http://api").ends_with("/api/app/auction"));
        assert!(place_bid_endpoint("http://api").ends_with("/api/app/auction/place-bid"));
    }

    #[test]
    fn rejection_prefers_remote_message() {
        let body = r#"{"error":{"code":null,"message":"Bid must exceed 130","details":null}}"#;
        match rejection_from_body(403, body) {
            AppError::Rejected { status, message } => {
                assert_eq!(status, 403);
                assert_eq!(message, "Bid must exceed 130");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn rejection_falls_back_to_body_or_status() {
        match rejection_from_body(502, "  ") {
            AppError::Rejected { message, .. } => assert_eq!(message, "HTTP 502"),
            other => panic!("unexpected error {other:?}"),
        }
        match rejection_from_body(400, "bad gateway text") {
            AppError::Rejected { message, .. } => assert_eq!(message, "bad gateway text"),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
