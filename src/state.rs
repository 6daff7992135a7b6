use crate::auction::api::{AuctionApi, RestAuctionApi};
use crate::auction::countdown::CountdownTick;
use crate::auction::hub::{HubConfig, SignalRTransport};
use crate::auction::session::HubSession;
use crate::auction::types::AuctionListQuery;
use crate::config::ClientConfig;
use crate::error::AppResult;
use crate::views::detail::{DetailViewHandle, DetailViewModel};
use crate::views::list::{ListViewHandle, ListViewModel};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

/// Process-wide resources shared by the views, plus the slots of the views
/// currently open. At most one list and one detail view are mounted.
pub struct AppState {
    pub config: ClientConfig,
    pub session: Arc<HubSession>,
    pub api: Arc<dyn AuctionApi>,
    list_view: Mutex<Option<ListViewHandle>>,
    detail_view: Mutex<Option<DetailViewHandle>>,
}

impl AppState {
    pub fn new(config: ClientConfig, session: Arc<HubSession>, api: Arc<dyn AuctionApi>) -> Self {
        Self {
            config,
            session,
            api,
            list_view: Mutex::new(None),
            detail_view: Mutex::new(None),
        }
    }

    pub fn from_config(config: ClientConfig) -> AppResult<Self> {
        let api: Arc<dyn AuctionApi> = Arc::new(RestAuctionApi::new(&config)?);
        let transport = Arc::new(SignalRTransport::new(HubConfig::from_client_config(&config)));
        let session = HubSession::from_config(transport, &config);
        Ok(Self::new(config, session, api))
    }

    /// Mounts the list view, replacing (and tearing down) any list already open.
    pub async fn open_list(&self, query: AuctionListQuery) -> watch::Receiver<ListViewModel> {
        let existing = self.list_view.lock().await.take();
        if let Some(handle) = existing {
            handle.close().await;
        }

        let handle = ListViewHandle::open(Arc::clone(&self.session), Arc::clone(&self.api), query);
        let view = handle.view();
        *self.list_view.lock().await = Some(handle);
        view
    }

    pub async fn open_detail(
        &self,
        auction_id: &str,
    ) -> (watch::Receiver<DetailViewModel>, watch::Receiver<CountdownTick>) {
        let existing = self.detail_view.lock().await.take();
        if let Some(handle) = existing {
            handle.close().await;
        }

        let handle = DetailViewHandle::open(
            auction_id,
            Arc::clone(&self.session),
            Arc::clone(&self.api),
            self.config.recent_bids_capacity,
        );
        let receivers = (handle.view(), handle.countdown());
        *self.detail_view.lock().await = Some(handle);
        receivers
    }

    pub async fn close_detail(&self) -> bool {
        let existing = self.detail_view.lock().await.take();
        match existing {
            Some(handle) => {
                handle.close().await;
                true
            }
            None => false,
        }
    }

    /// Tears down the detail view before the list so its leave command is
    /// sent while the connection is still up.
    pub async fn shutdown(&self) {
        self.close_detail().await;
        let existing = self.list_view.lock().await.take();
        if let Some(handle) = existing {
            handle.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::session::tests::{mock_session, MockTransport};
    use crate::auction::types::{ConnectionState, PagedResult};
    use crate::views::fakes::{sample_auction, sample_detail, FakeApi};
    use std::time::Duration;

    fn state_with_fakes() -> (Arc<MockTransport>, AppState) {
        let (transport, session) = mock_session();
        let api = FakeApi::with_detail(sample_detail("auction-42", 100.0, 10.0));
        *api.list.lock() = Some(PagedResult {
            total_count: 1,
            items: vec![sample_auction("auction-42", 100.0, 10.0)],
        });
        let state = AppState::new(ClientConfig::default(), session, Arc::new(api));
        (transport, state)
    }

    #[tokio::test(start_paused = true)]
    async fn views_share_one_session_and_shutdown_releases_it() {
        let (transport, state) = state_with_fakes();

        let mut list = state.open_list(AuctionListQuery::default()).await;
        list.wait_for(|model| model.connection_status == ConnectionState::Connected)
            .await
            .expect("list view publishes");

        let (mut detail, _countdown) = state.open_detail("auction-42").await;
        detail
            .wait_for(|model| model.detail.is_some())
            .await
            .expect("detail view publishes");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(state.session.scope_refs("auction-42"), 1);
        assert_eq!(transport.invocation_count("JoinAuctionGroup", "auction-42"), 1);

        assert_eq!(state.session.connection_state(), ConnectionState::Connected);

        state.shutdown().await;
        assert_eq!(state.session.scope_refs("auction-42"), 0);
        assert_eq!(transport.invocation_count("LeaveAuctionGroup", "auction-42"), 1);
        assert_eq!(state.session.connection_state(), ConnectionState::Disconnected);
        assert!(!state.close_detail().await);
    }

    #[tokio::test(start_paused = true)]
    async fn reopening_detail_closes_the_previous_one() {
        let (_transport, state) = state_with_fakes();

        state.open_detail("auction-42").await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(state.session.scope_refs("auction-42"), 1);

        state.open_detail("auction-7").await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(state.session.scope_refs("auction-42"), 0);
        assert_eq!(state.session.scope_refs("auction-7"), 1);

        assert!(state.close_detail().await);
        assert!(!state.close_detail().await);
    }
}
