use crate::auction::api::AuctionApi;
use crate::auction::normalizer::CanonicalEvent;
use crate::auction::reconcile::{ApplyOutcome, ListState};
use crate::auction::session::HubSession;
use crate::auction::types::{Auction, AuctionListQuery, ConnectionState, PagedResult};
use crate::error::AppError;
use crate::views::ViewTask;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListViewModel {
    pub loading: bool,
    pub items: Vec<Auction>,
    pub total_count: u64,
    pub page: u32,
    pub page_count: u64,
    pub query: AuctionListQuery,
    pub error: Option<String>,
    pub connection_status: ConnectionState,
}

enum ListCommand {
    Load(AuctionListQuery),
    GoToPage(u32),
    Reload,
}

struct PageLoaded {
    generation: u64,
    query: AuctionListQuery,
    result: Result<PagedResult<Auction>, AppError>,
}

/// Paged auction list kept live from global hub events.
///
/// The list view owns the hub connection: it connects when opened and
/// disconnects when closed.
pub struct ListViewHandle {
    commands: mpsc::UnboundedSender<ListCommand>,
    view: watch::Receiver<ListViewModel>,
    task: ViewTask,
}

impl ListViewHandle {
    pub fn open(session: Arc<HubSession>, api: Arc<dyn AuctionApi>, query: AuctionListQuery) -> Self {
        let store = ListState::new(query);
        let (view_sender, view) = watch::channel(ListViewModel {
            loading: true,
            items: Vec::new(),
            total_count: 0,
            page: store.query().page(),
            page_count: store.page_count(),
            query: store.query().clone(),
            error: None,
            connection_status: session.connection_state(),
        });
        let (commands, command_receiver) = mpsc::unbounded_channel();
        let (loaded, loaded_receiver) = mpsc::unbounded_channel();
        let events = session.subscribe();
        let connection = session.watch_state();

        let task = ViewTask::spawn(move |cancellation_token| {
            let runtime = ListRuntime {
                connection: session.connection_state(),
                session,
                api,
                store,
                view: view_sender,
                loaded,
                cancellation_token,
                generation: 0,
                loading: true,
                error: None,
            };
            runtime.run(command_receiver, loaded_receiver, events, connection)
        });

        Self {
            commands,
            view,
            task,
        }
    }

    pub fn view(&self) -> watch::Receiver<ListViewModel> {
        self.view.clone()
    }

    pub fn current(&self) -> ListViewModel {
        self.view.borrow().clone()
    }

    pub fn connection_status(&self) -> &'static str {
        self.view.borrow().connection_status.as_str()
    }

    pub fn load(&self, query: AuctionListQuery) {
        let _ = self.commands.send(ListCommand::Load(query));
    }

    /// `page` is 1-based.
    pub fn go_to_page(&self, page: u32) {
        let _ = self.commands.send(ListCommand::GoToPage(page));
    }

    pub fn reload(&self) {
        let _ = self.commands.send(ListCommand::Reload);
    }

    pub fn is_closed(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn close(mut self) {
        self.task.close().await;
    }
}

struct ListRuntime {
    session: Arc<HubSession>,
    api: Arc<dyn AuctionApi>,
    store: ListState,
    view: watch::Sender<ListViewModel>,
    loaded: mpsc::UnboundedSender<PageLoaded>,
    cancellation_token: CancellationToken,
    generation: u64,
    loading: bool,
    error: Option<String>,
    connection: ConnectionState,
}

impl ListRuntime {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<ListCommand>,
        mut loaded: mpsc::UnboundedReceiver<PageLoaded>,
        mut events: broadcast::Receiver<CanonicalEvent>,
        mut connection: watch::Receiver<ConnectionState>,
    ) {
        let initial_query = self.store.query().clone();
        self.request_page(initial_query);

        if let Err(error) = self.session.connect().await {
            warn!(%error, "list view could not connect to the hub; showing snapshots only");
        }

        let cancellation_token = self.cancellation_token.clone();
        let mut events_open = true;
        let mut connection_open = true;
        loop {
            tokio::select! {
                biased;
                _ = cancellation_token.cancelled() => break,
                Some(page) = loaded.recv() => self.handle_page(page),
                received = events.recv(), if events_open => match received {
                    Ok(event) => self.handle_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event fan-out lagged, reloading page");
                        self.request_page(self.store.query().clone());
                    }
                    Err(RecvError::Closed) => events_open = false,
                },
                changed = connection.changed(), if connection_open => {
                    if changed.is_err() {
                        connection_open = false;
                        continue;
                    }
                    let next = *connection.borrow_and_update();
                    self.handle_connection(next);
                }
                Some(command) = commands.recv() => self.handle_command(command),
            }
        }

        self.session.disconnect().await;
        info!("list view closed");
    }

    fn request_page(&mut self, query: AuctionListQuery) {
        self.generation = self.generation.wrapping_add(1);
        self.loading = true;
        self.publish_with_query(&query);

        let generation = self.generation;
        let api = Arc::clone(&self.api);
        let loaded = self.loaded.clone();
        let cancellation_token = self.cancellation_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancellation_token.cancelled() => {}
                result = api.get_list(&query) => {
                    let _ = loaded.send(PageLoaded { generation, query, result });
                }
            }
        });
    }

    fn handle_page(&mut self, page: PageLoaded) {
        if page.generation != self.generation {
            debug!(generation = page.generation, "discarding superseded page");
            return;
        }
        self.loading = false;
        match page.result {
            Ok(result) => {
                debug!(items = result.items.len(), total = result.total_count, "page loaded");
                self.error = None;
                self.store.apply_page(page.query, result);
            }
            Err(error) => {
                warn!(%error, "auction list failed to load");
                self.error = Some(error.to_string());
            }
        }
        self.publish();
    }

    fn handle_event(&mut self, event: &CanonicalEvent) {
        match self.store.apply_event(event, Utc::now()) {
            ApplyOutcome::Applied(_) => self.publish(),
            outcome => debug!(kind = event.kind(), ?outcome, "list event not applied"),
        }
    }

    fn handle_connection(&mut self, next: ConnectionState) {
        let previous = std::mem::replace(&mut self.connection, next);
        if previous == ConnectionState::Reconnecting && next == ConnectionState::Connected {
            info!("connection restored, reloading page");
            self.request_page(self.store.query().clone());
            return;
        }
        self.publish();
    }

    fn handle_command(&mut self, command: ListCommand) {
        match command {
            ListCommand::Load(query) => self.request_page(query),
            ListCommand::GoToPage(page) => {
                let current = self.store.query();
                let query = AuctionListQuery {
                    skip: page.saturating_sub(1).saturating_mul(current.take),
                    ..current.clone()
                };
                self.request_page(query);
            }
            ListCommand::Reload => self.request_page(self.store.query().clone()),
        }
    }

    fn publish(&self) {
        self.publish_with_query(self.store.query());
    }

    fn publish_with_query(&self, query: &AuctionListQuery) {
        self.view.send_replace(ListViewModel {
            loading: self.loading,
            items: self.store.items().to_vec(),
            total_count: self.store.total_count(),
            page: query.page(),
            page_count: self.store.page_count(),
            query: query.clone(),
            error: self.error.clone(),
            connection_status: self.connection,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::hub::HubSignal;
    use crate::auction::session::tests::mock_session;
    use crate::auction::types::AuctionStatus;
    use crate::views::fakes::{bid_payload, sample_auction, FakeApi};
    use serde_json::json;
    use std::time::Duration;

    async fn wait_list<F>(handle: &ListViewHandle, predicate: F) -> ListViewModel
    where
        F: Fn(&ListViewModel) -> bool,
    {
        let mut receiver = handle.view();
        let model = tokio::time::timeout(Duration::from_secs(5), receiver.wait_for(|model| predicate(model)))
            .await
            .expect("list reached the expected state")
            .expect("list channel open")
            .clone();
        model
    }

    #[tokio::test(start_paused = true)]
    async fn owns_the_connection_and_applies_global_events() {
        let (transport, session) = mock_session();
        let api = Arc::new(FakeApi::with_list(
            vec![
                sample_auction("auction-42", 100.0, 10.0),
                sample_auction("auction-7", 40.0, 5.0),
            ],
            26,
        ));
        let handle = ListViewHandle::open(
            Arc::clone(&session),
            Arc::clone(&api) as Arc<dyn AuctionApi>,
            AuctionListQuery::default(),
        );

        let model = wait_list(&handle, |model| {
            !model.loading && model.connection_status == ConnectionState::Connected
        })
        .await;
        assert_eq!(model.items.len(), 2);
        assert_eq!(model.page_count, 3);
        assert_eq!(handle.connection_status(), "Connected");

        transport.emit(HubSignal::Event {
            name: "BidPlaced".to_string(),
            args: vec![bid_payload("auction-42", "bid-1", 125.0)],
        });
        transport.emit(HubSignal::Event {
            name: "AuctionEnded".to_string(),
            args: vec![json!("auction-999")],
        });
        transport.emit(HubSignal::Event {
            name: "AuctionCancelled".to_string(),
            args: vec![json!({"auctionId": "auction-7"})],
        });

        let model = wait_list(&handle, |model| {
            model
                .items
                .iter()
                .any(|auction| auction.status == AuctionStatus::Cancelled)
        })
        .await;
        assert_eq!(model.items[0].current_price, 125.0);
        assert_eq!(model.items[0].total_bids, 1);
        assert_eq!(model.items.len(), 2);
        assert_eq!(transport.invocation_count("JoinAuctionGroup", "auction-42"), 0);

        handle.close().await;
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_failure_is_surfaced_and_list_stays_mounted() {
        let (_transport, session) = mock_session();
        let api = Arc::new(FakeApi::default());
        let handle = ListViewHandle::open(
            Arc::clone(&session),
            Arc::clone(&api) as Arc<dyn AuctionApi>,
            AuctionListQuery::default(),
        );

        let model = wait_list(&handle, |model| model.error.is_some()).await;
        assert_eq!(
            model.error.as_deref(),
            Some("request rejected (500): list unavailable")
        );
        assert!(!handle.is_closed());

        *api.list.lock() = Some(PagedResult {
            total_count: 1,
            items: vec![sample_auction("auction-1", 10.0, 1.0)],
        });
        handle.reload();
        let model = wait_list(&handle, |model| model.error.is_none() && !model.loading).await;
        assert_eq!(model.items.len(), 1);

        handle.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn paging_builds_skip_from_page_size() {
        let (_transport, session) = mock_session();
        let api = Arc::new(FakeApi::with_list(Vec::new(), 40));
        let handle = ListViewHandle::open(
            Arc::clone(&session),
            Arc::clone(&api) as Arc<dyn AuctionApi>,
            AuctionListQuery::for_page(1, 12),
        );
        wait_list(&handle, |model| !model.loading).await;

        handle.go_to_page(3);
        let model = wait_list(&handle, |model| model.page == 3 && !model.loading).await;
        assert_eq!(model.query.skip, 24);
        assert_eq!(model.page_count, 4);

        let queries = api.list_queries.lock().clone();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[1].skip, 24);
        assert_eq!(queries[1].take, 12);

        handle.close().await;
    }
}
