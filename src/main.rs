use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    auction_live_lib::init_tracing();

    let auction_id = std::env::args().nth(1);
    match auction_live_lib::run(auction_id).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "auction-live failed");
            ExitCode::FAILURE
        }
    }
}
