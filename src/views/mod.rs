pub mod detail;
pub mod list;

use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Background task owned by a view handle. Dropping the handle cancels the
/// task, which still runs its own teardown.
pub(crate) struct ViewTask {
    cancellation_token: CancellationToken,
    join_handle: Option<JoinHandle<()>>,
    _cancel_on_drop: DropGuard,
}

impl ViewTask {
    pub(crate) fn spawn<F, Fut>(task: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancellation_token = CancellationToken::new();
        let join_handle = tokio::spawn(task(cancellation_token.clone()));
        Self {
            _cancel_on_drop: cancellation_token.clone().drop_guard(),
            cancellation_token,
            join_handle: Some(join_handle),
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.join_handle
            .as_ref()
            .map(JoinHandle::is_finished)
            .unwrap_or(true)
    }

    /// Cancels the task and waits until its teardown has completed.
    pub(crate) async fn close(&mut self) {
        self.cancellation_token.cancel();
        if let Some(join_handle) = self.join_handle.take() {
            let _ = join_handle.await;
        }
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use crate::auction::api::AuctionApi;
    use crate::auction::types::{
        Auction, AuctionDetail, AuctionListQuery, AuctionStatus, Bid, PagedResult, PlaceBidRequest,
        ProductType,
    };
    use crate::error::AppError;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    pub(crate) struct FakeApi {
        pub(crate) detail: Mutex<Option<AuctionDetail>>,
        pub(crate) detail_delay: Mutex<Duration>,
        pub(crate) detail_calls: AtomicUsize,
        pub(crate) list: Mutex<Option<PagedResult<Auction>>>,
        pub(crate) list_queries: Mutex<Vec<AuctionListQuery>>,
        pub(crate) bid_reply: Mutex<Option<Result<Bid, String>>>,
        pub(crate) placed: Mutex<Vec<PlaceBidRequest>>,
    }

    impl FakeApi {
        pub(crate) fn with_detail(detail: AuctionDetail) -> Self {
            let api = Self::default();
            *api.detail.lock() = Some(detail);
            api
        }

        pub(crate) fn with_list(items: Vec<Auction>, total_count: u64) -> Self {
            let api = Self::default();
            *api.list.lock() = Some(PagedResult { total_count, items });
            api
        }

        pub(crate) fn detail_calls(&self) -> usize {
            self.detail_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AuctionApi for FakeApi {
        async fn get_list(&self, query: &AuctionListQuery) -> Result<PagedResult<Auction>, AppError> {
            self.list_queries.lock().push(query.clone());
            let page = self.list.lock().clone();
            page.ok_or_else(|| AppError::Rejected {
                status: 500,
                message: "list unavailable".to_string(),
            })
        }

        async fn get_detail(&self, _auction_id: &str) -> Result<AuctionDetail, AppError> {
            self.detail_calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.detail_delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let detail = self.detail.lock().clone();
            detail.ok_or_else(|| AppError::Rejected {
                status: 404,
                message: "auction not found".to_string(),
            })
        }

        async fn place_bid(&self, request: &PlaceBidRequest) -> Result<Bid, AppError> {
            self.placed.lock().push(request.clone());
            let reply = self.bid_reply.lock().clone();
            match reply {
                Some(Ok(bid)) => Ok(bid),
                Some(Err(message)) => Err(AppError::Rejected {
                    status: 400,
                    message,
                }),
                None => Err(AppError::Rejected {
                    status: 500,
                    message: "no reply scripted".to_string(),
                }),
            }
        }
    }

    pub(crate) fn sample_auction(id: &str, current_price: f64, increment: f64) -> Auction {
        let now = Utc::now();
        Auction {
            id: id.to_string(),
            title: format!("lot {id}"),
            description: String::new(),
            starting_price: current_price,
            current_price,
            minimum_bid_increment: increment,
            start_time: now - ChronoDuration::hours(1),
            end_time: now + ChronoDuration::hours(2),
            auto_extension_minutes: 5,
            status: AuctionStatus::Active,
            product_type: ProductType::OrganicProduct,
            product_id: None,
            is_approved: true,
            total_bids: 0,
            winning_bid_id: None,
        }
    }

    pub(crate) fn sample_detail(id: &str, current_price: f64, increment: f64) -> AuctionDetail {
        AuctionDetail {
            auction: sample_auction(id, current_price, increment),
            recent_bids: Vec::new(),
            highest_bid: None,
            current_user_highest_bid: None,
            remaining_seconds: None,
            is_active: true,
            is_expired: false,
        }
    }

    pub(crate) fn sample_bid(auction_id: &str, id: &str, amount: f64) -> Bid {
        Bid {
            id: id.to_string(),
            auction_id: auction_id.to_string(),
            bidder_id: "user-1".to_string(),
            bidder_display_name: "zeynep".to_string(),
            bid_amount: amount,
            bid_time: Utc::now(),
            is_winning_bid: false,
            is_auto_bid: false,
            notes: None,
        }
    }

    pub(crate) fn bid_payload(auction_id: &str, id: &str, amount: f64) -> Value {
        json!({
            "id": id,
            "auctionId": auction_id,
            "bidderId": "user-2",
            "bidderUserName": "emre",
            "bidAmount": amount,
            "bidTime": Utc::now().to_rfc3339(),
        })
    }
}
