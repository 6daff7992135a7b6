use crate::auction::api::AuctionApi;
use crate::auction::bidding::{quick_bid_amount, validate_bid, BidRejection};
use crate::auction::countdown::{CountdownClock, CountdownTick};
use crate::auction::normalizer::CanonicalEvent;
use crate::auction::reconcile::{ApplyOutcome, DetailPhase, DetailState, Effects, IgnoreReason};
use crate::auction::session::HubSession;
use crate::auction::types::{AuctionDetail, Bid, ConnectionState, PlaceBidRequest};
use crate::error::AppError;
use crate::views::ViewTask;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailViewModel {
    pub auction_id: String,
    pub phase: DetailPhase,
    pub detail: Option<AuctionDetail>,
    pub minimum_next_bid: Option<f64>,
    pub suggested_bid: Option<f64>,
    pub server_remaining_seconds: Option<i64>,
    pub last_bid_error: Option<String>,
    pub submitting: bool,
    pub connection_status: ConnectionState,
}

impl DetailViewModel {
    fn loading(auction_id: &str, connection_status: ConnectionState) -> Self {
        Self {
            auction_id: auction_id.to_string(),
            phase: DetailPhase::Loading,
            detail: None,
            minimum_next_bid: None,
            suggested_bid: None,
            server_remaining_seconds: None,
            last_bid_error: None,
            submitting: false,
            connection_status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SubmitBidError {
    #[error(transparent)]
    Rejected(#[from] BidRejection),
    #[error("bid rejected by server: {0}")]
    Command(String),
    #[error("a bid is already being submitted")]
    Busy,
    #[error("auction detail is still loading")]
    NotReady,
    #[error("auction view is closed")]
    TornDown,
}

enum DetailCommand {
    SubmitBid {
        amount: f64,
        notes: Option<String>,
        reply: oneshot::Sender<Result<Bid, SubmitBidError>>,
    },
    QuickBid {
        increment: f64,
        reply: oneshot::Sender<Result<f64, SubmitBidError>>,
    },
    SetSuggestedBid(f64),
    Reload,
}

enum Internal {
    Snapshot {
        generation: u64,
        result: Result<AuctionDetail, AppError>,
    },
    BidSettled {
        result: Result<Bid, AppError>,
        reply: oneshot::Sender<Result<Bid, SubmitBidError>>,
    },
}

enum Flow {
    Continue,
    Stop,
}

/// Live view of a single auction.
///
/// Joins the auction's scope for its whole lifetime and never touches the
/// connection itself. Closing (or dropping) the handle stops the countdown,
/// leaves the scope and discards any fetch still in flight.
pub struct DetailViewHandle {
    auction_id: String,
    commands: mpsc::UnboundedSender<DetailCommand>,
    view: watch::Receiver<DetailViewModel>,
    countdown: watch::Receiver<CountdownTick>,
    task: ViewTask,
}

impl DetailViewHandle {
    pub fn open(
        auction_id: &str,
        session: Arc<HubSession>,
        api: Arc<dyn AuctionApi>,
        recent_bids_capacity: usize,
    ) -> Self {
        let auction_id = auction_id.trim().to_string();
        let (view_sender, view) = watch::channel(DetailViewModel::loading(
            &auction_id,
            session.connection_state(),
        ));
        let (countdown_sender, countdown) = watch::channel(CountdownTick::Idle);
        let (commands, command_receiver) = mpsc::unbounded_channel();
        let (internal, internal_receiver) = mpsc::unbounded_channel();
        let events = session.subscribe();
        let connection = session.watch_state();

        let runtime_auction_id = auction_id.clone();
        let task = ViewTask::spawn(move |cancellation_token| {
            let runtime = DetailRuntime {
                store: DetailState::new(runtime_auction_id.clone(), recent_bids_capacity),
                auction_id: runtime_auction_id,
                connection: session.connection_state(),
                session,
                api,
                clock: CountdownClock::new(countdown_sender),
                view: view_sender,
                internal,
                cancellation_token,
                generation: 0,
                submitting: false,
            };
            runtime.run(command_receiver, internal_receiver, events, connection)
        });

        info!(%auction_id, "detail view opened");
        Self {
            auction_id,
            commands,
            view,
            countdown,
            task,
        }
    }

    pub fn auction_id(&self) -> &str {
        &self.auction_id
    }

    pub fn view(&self) -> watch::Receiver<DetailViewModel> {
        self.view.clone()
    }

    pub fn countdown(&self) -> watch::Receiver<CountdownTick> {
        self.countdown.clone()
    }

    pub fn current(&self) -> DetailViewModel {
        self.view.borrow().clone()
    }

    pub fn connection_status(&self) -> &'static str {
        self.view.borrow().connection_status.as_str()
    }

    pub fn minimum_next_bid(&self) -> Option<f64> {
        self.view.borrow().minimum_next_bid
    }

    pub fn last_bid_error(&self) -> Option<String> {
        self.view.borrow().last_bid_error.clone()
    }

    pub async fn submit_bid(&self, amount: f64, notes: Option<&str>) -> Result<Bid, SubmitBidError> {
        let (reply, receiver) = oneshot::channel();
        self.commands
            .send(DetailCommand::SubmitBid {
                amount,
                notes: notes.map(str::to_string),
                reply,
            })
            .map_err(|_| SubmitBidError::TornDown)?;
        receiver.await.map_err(|_| SubmitBidError::TornDown)?
    }

    /// Pre-fills `minimumNextBid + increment` and validates it.
    pub async fn quick_bid(&self, increment: f64) -> Result<f64, SubmitBidError> {
        let (reply, receiver) = oneshot::channel();
        self.commands
            .send(DetailCommand::QuickBid { increment, reply })
            .map_err(|_| SubmitBidError::TornDown)?;
        receiver.await.map_err(|_| SubmitBidError::TornDown)?
    }

    pub fn set_suggested_bid(&self, amount: f64) {
        let _ = self.commands.send(DetailCommand::SetSuggestedBid(amount));
    }

    pub fn reload(&self) {
        let _ = self.commands.send(DetailCommand::Reload);
    }

    pub fn is_closed(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn close(mut self) {
        self.task.close().await;
    }
}

struct DetailRuntime {
    auction_id: String,
    session: Arc<HubSession>,
    api: Arc<dyn AuctionApi>,
    store: DetailState,
    clock: CountdownClock<watch::Sender<CountdownTick>>,
    view: watch::Sender<DetailViewModel>,
    internal: mpsc::UnboundedSender<Internal>,
    cancellation_token: CancellationToken,
    generation: u64,
    submitting: bool,
    connection: ConnectionState,
}

impl DetailRuntime {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<DetailCommand>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
        mut events: broadcast::Receiver<CanonicalEvent>,
        mut connection: watch::Receiver<ConnectionState>,
    ) {
        self.request_snapshot();
        self.publish();

        let session = Arc::clone(&self.session);
        let scope = self.auction_id.clone();
        let join = async move { session.join_scope(&scope).await };
        tokio::pin!(join);
        let mut joined = false;

        let cancellation_token = self.cancellation_token.clone();
        let mut events_open = true;
        let mut connection_open = true;
        loop {
            tokio::select! {
                biased;
                _ = cancellation_token.cancelled() => break,
                _ = &mut join, if !joined => joined = true,
                Some(message) = internal.recv() => {
                    if let Flow::Stop = self.handle_internal(message) {
                        break;
                    }
                }
                received = events.recv(), if events_open => match received {
                    Ok(event) => self.handle_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(auction_id = %self.auction_id, skipped, "event fan-out lagged, resyncing");
                        self.request_snapshot();
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

        self.teardown().await;
    }

    fn request_snapshot(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        let generation = self.generation;
        let api = Arc::clone(&self.api);
        let auction_id = self.auction_id.clone();
        let internal = self.internal.clone();
        let cancellation_token = self.cancellation_token.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancellation_token.cancelled() => {}
                result = api.get_detail(&auction_id) => {
                    let _ = internal.send(Internal::Snapshot { generation, result });
                }
            }
        });
    }

    fn handle_internal(&mut self, message: Internal) -> Flow {
        match message {
            Internal::Snapshot { generation, result } => {
                if generation != self.generation {
                    debug!(auction_id = %self.auction_id, generation, "discarding superseded snapshot");
                    return Flow::Continue;
                }
                self.handle_snapshot(result)
            }
            Internal::BidSettled { result, reply } => {
                self.submitting = false;
                let outcome = match result {
                    Ok(bid) => {
                        info!(auction_id = %self.auction_id, bid_id = %bid.id, amount = bid.bid_amount, "bid accepted");
                        self.store.set_bid_error(None);
                        Ok(bid)
                    }
                    Err(error) => {
                        let message = match error {
                            AppError::Rejected { message, .. } => message,
                            other => other.to_string(),
                        };
                        warn!(auction_id = %self.auction_id, %message, "bid rejected");
                        self.store.set_bid_error(Some(message.clone()));
                        Err(SubmitBidError::Command(message))
                    }
                };
                self.publish();
                let _ = reply.send(outcome);
                Flow::Continue
            }
        }
    }

    fn handle_snapshot(&mut self, result: Result<AuctionDetail, AppError>) -> Flow {
        match result {
            Ok(detail) => {
                if let ApplyOutcome::Applied(effects) = self.store.apply_snapshot(detail) {
                    self.apply_effects(effects);
                }
                self.publish();
                Flow::Continue
            }
            Err(error) if self.store.detail().is_none() => {
                error!(auction_id = %self.auction_id, %error, "auction detail failed to load");
                self.store.mark_failed(error.to_string());
                self.publish();
                Flow::Stop
            }
            Err(error) => {
                warn!(auction_id = %self.auction_id, %error, "snapshot refresh failed, keeping last known state");
                Flow::Continue
            }
        }
    }

    fn handle_event(&mut self, event: &CanonicalEvent) {
        match self.store.apply_event(event, Utc::now()) {
            ApplyOutcome::Applied(effects) => {
                debug!(auction_id = %self.auction_id, kind = event.kind(), "event applied");
                self.apply_effects(effects);
                self.publish();
            }
            ApplyOutcome::BidError { message } => {
                warn!(auction_id = %self.auction_id, %message, "auction error pushed");
                self.publish();
            }
            ApplyOutcome::Stale(reason) => {
                debug!(auction_id = %self.auction_id, ?reason, "stale event dropped");
            }
            ApplyOutcome::Ignored(IgnoreReason::OtherAuction) => {}
            ApplyOutcome::Ignored(reason) => {
                debug!(auction_id = %self.auction_id, kind = event.kind(), ?reason, "event ignored");
            }
        }
    }

    fn handle_connection(&mut self, next: ConnectionState) {
        let previous = std::mem::replace(&mut self.connection, next);
        if previous == ConnectionState::Reconnecting
            && next == ConnectionState::Connected
            && self.store.detail().is_some()
        {
            info!(auction_id = %self.auction_id, "connection restored, resyncing snapshot");
            self.request_snapshot();
        }
        self.publish();
    }

    fn handle_command(&mut self, command: DetailCommand) {
        match command {
            DetailCommand::SubmitBid {
                amount,
                notes,
                reply,
            } => self.submit_bid(amount, notes, reply),
            DetailCommand::QuickBid { increment, reply } => {
                let result = self.quick_bid(increment);
                let _ = reply.send(result);
            }
            DetailCommand::SetSuggestedBid(amount) => {
                self.store.set_suggested_bid(amount);
                self.publish();
            }
            DetailCommand::Reload => self.request_snapshot(),
        }
    }

    fn submit_bid(
        &mut self,
        amount: f64,
        notes: Option<String>,
        reply: oneshot::Sender<Result<Bid, SubmitBidError>>,
    ) {
        if self.submitting {
            let _ = reply.send(Err(SubmitBidError::Busy));
            return;
        }

        match self.store.validate(amount, Utc::now()) {
            None => {
                let _ = reply.send(Err(SubmitBidError::NotReady));
                return;
            }
            Some(Err(rejection)) => {
                self.store.set_bid_error(Some(rejection.to_string()));
                self.publish();
                let _ = reply.send(Err(SubmitBidError::Rejected(rejection)));
                return;
            }
            Some(Ok(())) => {}
        }

        self.store.set_bid_error(None);
        self.submitting = true;
        self.publish();

        let request = PlaceBidRequest::new(&self.auction_id, amount, notes.as_deref());
        let api = Arc::clone(&self.api);
        let internal = self.internal.clone();
        let cancellation_token = self.cancellation_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    let _ = reply.send(Err(SubmitBidError::TornDown));
                }
                result = api.place_bid(&request) => {
                    let _ = internal.send(Internal::BidSettled { result, reply });
                }
            }
        });
    }

    fn quick_bid(&mut self, increment: f64) -> Result<f64, SubmitBidError> {
        let now = Utc::now();
        let snapshot = self
            .store
            .bid_snapshot(now)
            .ok_or(SubmitBidError::NotReady)?;
        let amount = quick_bid_amount(&snapshot, increment);
        self.store.set_suggested_bid(amount);

        let result = validate_bid(&snapshot, amount, now);
        self.store
            .set_bid_error(result.as_ref().err().map(ToString::to_string));
        self.publish();
        result.map(|()| amount).map_err(SubmitBidError::Rejected)
    }

    fn apply_effects(&mut self, effects: Effects) {
        if effects.stop_countdown {
            self.clock.finish();
        } else if effects.restart_countdown {
            if let Some(end_time) = self.store.detail().map(|detail| detail.auction.end_time) {
                self.clock.restart(end_time);
            }
        }
        if effects.refetch_snapshot {
            self.request_snapshot();
        }
    }

    fn publish(&self) {
        let now = Utc::now();
        self.view.send_replace(DetailViewModel {
            auction_id: self.auction_id.clone(),
            phase: self.store.phase().clone(),
            detail: self.store.detail().cloned(),
            minimum_next_bid: self.store.minimum_next_bid(),
            suggested_bid: self.store.suggested_bid(),
            server_remaining_seconds: self.store.server_remaining_seconds(now),
            last_bid_error: self.store.last_bid_error().map(str::to_string),
            submitting: self.submitting,
            connection_status: self.connection,
        });
    }

    async fn teardown(&mut self) {
        self.clock.stop();
        self.session.leave_scope(&self.auction_id).await;
        if !matches!(self.store.phase(), DetailPhase::Failed { .. }) {
            self.store.mark_torn_down();
        }
        self.submitting = false;
        self.publish();
        info!(auction_id = %self.auction_id, "detail view closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::hub::HubSignal;
    use crate::auction::session::tests::{mock_session, MockTransport};
    use crate::views::fakes::{bid_payload, sample_bid, sample_detail, FakeApi};
    use serde_json::json;
    use std::time::Duration;

    async fn wait_view<F>(handle: &DetailViewHandle, predicate: F) -> DetailViewModel
    where
        F: Fn(&DetailViewModel) -> bool,
    {
        let mut receiver = handle.view();
        let model = tokio::time::timeout(Duration::from_secs(5), receiver.wait_for(|model| predicate(model)))
            .await
            .expect("view reached the expected state")
            .expect("view channel open")
            .clone();
        model
    }

    async fn open_ready(
        current_price: f64,
        increment: f64,
    ) -> (Arc<MockTransport>, Arc<HubSession>, Arc<FakeApi>, DetailViewHandle) {
        let (transport, session) = mock_session();
        session.connect().await.expect("connects");
        let api = Arc::new(FakeApi::with_detail(sample_detail(
            "auction-42",
            current_price,
            increment,
        )));
        let handle = DetailViewHandle::open(
            "auction-42",
            Arc::clone(&session),
            Arc::clone(&api) as Arc<dyn AuctionApi>,
            50,
        );
        wait_view(&handle, |model| model.phase == DetailPhase::Ready).await;
        (transport, session, api, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn loads_joins_and_applies_pushed_bids() {
        let (transport, session, _api, handle) = open_ready(100.0, 10.0).await;
        assert_eq!(handle.minimum_next_bid(), Some(110.0));
        assert_eq!(transport.invocation_count("JoinAuctionGroup", "auction-42"), 1);
        assert_eq!(handle.connection_status(), "Connected");

        transport.emit(HubSignal::Event {
            name: "BidPlaced".to_string(),
            args: vec![json!("auction-42"), bid_payload("auction-42", "bid-1", 120.0)],
        });
        let updated = wait_view(&handle, |model| model.minimum_next_bid == Some(130.0)).await;
        let detail = updated.detail.expect("detail loaded");
        assert_eq!(detail.auction.current_price, 120.0);
        assert_eq!(detail.recent_bids[0].id, "bid-1");
        assert_eq!(updated.suggested_bid, Some(130.0));
        assert!(matches!(*handle.countdown().borrow(), CountdownTick::Running { .. }));

        handle.close().await;
        assert_eq!(transport.invocation_count("LeaveAuctionGroup", "auction-42"), 1);
        assert_eq!(session.scope_refs("auction-42"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_join_does_not_hold_back_the_snapshot() {
        let (transport, session) = mock_session();
        session.connect().await.expect("connects");
        *transport.invoke_delay.lock() = Some(Duration::from_secs(30));
        let api = Arc::new(FakeApi::with_detail(sample_detail("auction-42", 100.0, 10.0)));
        let started = tokio::time::Instant::now();

        let handle = DetailViewHandle::open(
            "auction-42",
            Arc::clone(&session),
            Arc::clone(&api) as Arc<dyn AuctionApi>,
            50,
        );
        wait_view(&handle, |model| model.phase == DetailPhase::Ready).await;
        assert!(started.elapsed() < Duration::from_secs(30));
        assert_eq!(transport.invocation_count("JoinAuctionGroup", "auction-42"), 1);

        *transport.invoke_delay.lock() = None;
        handle.close().await;
        assert!(started.elapsed() < Duration::from_secs(30));
        assert_eq!(session.scope_refs("auction-42"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn local_validation_never_reaches_the_server() {
        let (_transport, _session, api, handle) = open_ready(100.0, 10.0).await;

        let result = handle.submit_bid(105.0, None).await;
        assert_eq!(
            result,
            Err(SubmitBidError::Rejected(BidRejection::BelowMinimum { minimum: 110.0 }))
        );
        assert!(api.placed.lock().is_empty());
        let model = wait_view(&handle, |model| model.last_bid_error.is_some()).await;
        assert_eq!(model.last_bid_error.as_deref(), Some("bid must be at least 110"));

        handle.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn server_rejection_is_transient_and_leaves_state() {
        let (_transport, _session, api, handle) = open_ready(100.0, 10.0).await;
        *api.bid_reply.lock() = Some(Err("someone outbid you".to_string()));
        let before = handle.current().detail;

        let result = handle.submit_bid(150.0, Some("  for the farm  ")).await;
        assert_eq!(
            result,
            Err(SubmitBidError::Command("someone outbid you".to_string()))
        );
        assert_eq!(api.placed.lock()[0].notes.as_deref(), Some("for the farm"));
        let model = handle.current();
        assert_eq!(model.last_bid_error.as_deref(), Some("someone outbid you"));
        assert_eq!(model.detail, before);
        assert!(!model.submitting);

        *api.bid_reply.lock() = Some(Ok(sample_bid("auction-42", "bid-7", 150.0)));
        let accepted = handle.submit_bid(150.0, None).await.expect("bid accepted");
        assert_eq!(accepted.id, "bid-7");
        assert_eq!(handle.last_bid_error(), None);
        assert_eq!(
            handle.current().detail.map(|detail| detail.auction.current_price),
            Some(100.0)
        );

        handle.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn quick_bid_prefills_and_validates() {
        let (_transport, _session, _api, handle) = open_ready(100.0, 10.0).await;

        let amount = handle.quick_bid(50.0).await.expect("quick bid is valid");
        assert_eq!(amount, 160.0);
        assert_eq!(handle.current().suggested_bid, Some(160.0));

        handle.set_suggested_bid(175.0);
        let model = wait_view(&handle, |model| model.suggested_bid == Some(175.0)).await;
        assert_eq!(model.minimum_next_bid, Some(110.0));

        handle.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_discards_in_flight_snapshot() {
        let (transport, session) = mock_session();
        session.connect().await.expect("connects");
        let api = Arc::new(FakeApi::with_detail(sample_detail("auction-42", 100.0, 10.0)));
        *api.detail_delay.lock() = Duration::from_secs(3);

        let handle = DetailViewHandle::open(
            "auction-42",
            Arc::clone(&session),
            Arc::clone(&api) as Arc<dyn AuctionApi>,
            50,
        );
        let view = handle.view();
        let countdown = handle.countdown();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(api.detail_calls(), 1);

        handle.close().await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        let model = view.borrow().clone();
        assert_eq!(model.phase, DetailPhase::TornDown);
        assert!(model.detail.is_none());
        assert_eq!(*countdown.borrow(), CountdownTick::Idle);
        assert_eq!(transport.invocation_count("JoinAuctionGroup", "auction-42"), 1);
        assert_eq!(transport.invocation_count("LeaveAuctionGroup", "auction-42"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_snapshot_ends_the_view() {
        let (transport, session) = mock_session();
        session.connect().await.expect("connects");
        let api = Arc::new(FakeApi::default());

        let handle = DetailViewHandle::open(
            "auction-missing",
            Arc::clone(&session),
            Arc::clone(&api) as Arc<dyn AuctionApi>,
            50,
        );
        let model = wait_view(&handle, |model| matches!(model.phase, DetailPhase::Failed { .. })).await;
        assert_eq!(
            model.phase,
            DetailPhase::Failed {
                reason: "request rejected (404): auction not found".to_string()
            }
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.is_closed());
        assert_eq!(api.detail_calls(), 1);
        assert_eq!(
            transport.invocation_count("LeaveAuctionGroup", "auction-missing"),
            1
        );
        assert_eq!(
            handle.submit_bid(500.0, None).await,
            Err(SubmitBidError::TornDown)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_rejoins_once_and_resyncs() {
        let (transport, _session, api, handle) = open_ready(100.0, 10.0).await;

        transport.emit(HubSignal::Reconnecting {
            reason: "socket reset".to_string(),
        });
        wait_view(&handle, |model| model.connection_status == ConnectionState::Reconnecting).await;

        *api.detail.lock() = Some(sample_detail("auction-42", 140.0, 10.0));
        transport.emit(HubSignal::Reconnected);
        let model = wait_view(&handle, |model| model.minimum_next_bid == Some(150.0)).await;

        assert_eq!(model.connection_status, ConnectionState::Connected);
        assert_eq!(api.detail_calls(), 2);
        assert_eq!(transport.invocation_count("JoinAuctionGroup", "auction-42"), 2);

        handle.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn auction_end_freezes_view_and_countdown() {
        let (transport, _session, _api, handle) = open_ready(100.0, 10.0).await;

        transport.emit(HubSignal::Event {
            name: "AuctionEnded".to_string(),
            args: vec![json!("auction-42"), bid_payload("auction-42", "bid-3", 180.0)],
        });
        let model = wait_view(&handle, |model| model.phase == DetailPhase::Ended).await;
        assert_eq!(*handle.countdown().borrow(), CountdownTick::Ended);
        let detail = model.detail.expect("detail loaded");
        assert_eq!(detail.auction.winning_bid_id.as_deref(), Some("bid-3"));

        transport.emit(HubSignal::Event {
            name: "BidPlaced".to_string(),
            args: vec![json!("auction-42"), bid_payload("auction-42", "bid-4", 900.0)],
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            handle.current().detail.map(|detail| detail.auction.current_price),
            Some(180.0)
        );
        assert!(matches!(
            handle.submit_bid(1_000.0, None).await,
            Err(SubmitBidError::Rejected(BidRejection::AuctionNotActive { .. }))
        ));

        handle.close().await;
    }
}
