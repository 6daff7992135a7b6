pub mod auction;
pub mod config;
pub mod error;
pub mod state;
pub mod views;

use auction::countdown::CountdownTick;
use auction::types::AuctionListQuery;
use config::ClientArgs;
use error::AppResult;
use state::AppState;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use views::detail::DetailViewModel;
use views::list::ListViewModel;

const DEFAULT_LOG_FILTER: &str = "auction_live_lib=info,auction_live=info";

/// Installs the global fmt subscriber. Later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .try_init();
}

/// Runs the terminal client until Ctrl-C: the list view is always open,
/// the detail view only when an auction id is given.
pub async fn run(auction_id: Option<String>) -> AppResult<()> {
    let config = ClientArgs::from_env()?.normalize()?;
    info!(?config, "configuration loaded");

    let state = AppState::from_config(config)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        api = %state.config.api_base_url,
        "client starting"
    );

    let list = state
        .open_list(AuctionListQuery::for_page(1, state.config.page_size))
        .await;
    tokio::spawn(log_list_updates(list));

    if let Some(auction_id) = auction_id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
        let (view, countdown) = state.open_detail(auction_id).await;
        tokio::spawn(log_detail_updates(view));
        tokio::spawn(log_countdown(countdown));
    }

    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "could not listen for Ctrl-C, shutting down");
    }

    info!("shutting down");
    state.shutdown().await;
    info!(hub = state.session.connection_state().as_str(), "stopped");
    Ok(())
}

async fn log_list_updates(mut view: watch::Receiver<ListViewModel>) {
    while view.changed().await.is_ok() {
        let model = view.borrow_and_update().clone();
        if let Some(error) = &model.error {
            warn!(%error, "auction list unavailable");
            continue;
        }
        if model.loading {
            continue;
        }
        info!(
            page = model.page,
            pages = model.page_count,
            total = model.total_count,
            status = model.connection_status.as_str(),
            "auction list"
        );
        for auction in &model.items {
            debug!(
                id = %auction.id,
                title = %auction.title,
                price = auction.current_price,
                status = ?auction.status,
                "  lot"
            );
        }
    }
}

async fn log_detail_updates(mut view: watch::Receiver<DetailViewModel>) {
    while view.changed().await.is_ok() {
        let model = view.borrow_and_update().clone();
        let Some(detail) = &model.detail else {
            info!(auction_id = %model.auction_id, phase = ?model.phase, "auction detail");
            continue;
        };
        info!(
            auction_id = %model.auction_id,
            phase = ?model.phase,
            price = detail.auction.current_price,
            minimum_next_bid = ?model.minimum_next_bid,
            bids = detail.auction.total_bids,
            status = model.connection_status.as_str(),
            "auction detail"
        );
        if let Some(error) = &model.last_bid_error {
            warn!(auction_id = %model.auction_id, %error, "last bid failed");
        }
    }
}

async fn log_countdown(mut countdown: watch::Receiver<CountdownTick>) {
    while countdown.changed().await.is_ok() {
        let tick = countdown.borrow_and_update().clone();
        match tick {
            CountdownTick::Ended => info!("auction ended"),
            CountdownTick::Running { label, .. } => debug!(%label, "time left"),
            CountdownTick::Idle => {}
        }
    }
}
