use anyhow::{Context, Result};
use tracing::info;

use replybot::gmail::GmailClient;
use replybot::scheduler;
use replybot::store::StateStore;
use replybot::sync::SyncState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Without credentials no provider call can succeed; exit before polling.
    let client = GmailClient::from_env().context("resolve gmail credentials")?;

    let store_path = StateStore::default_path().context("resolve replybot state path")?;
    let store = StateStore::open(&store_path)
        .with_context(|| format!("open replybot state at {}", store_path.display()))?;
    let mut state = SyncState::load(&store).context("load sync state")?;

    info!(
        "replybot started; polling every {}-{}s",
        scheduler::MIN_TICK_DELAY_SECS,
        scheduler::MAX_TICK_DELAY_SECS
    );
    scheduler::run(&client, &store, &mut state).await;
    Ok(())
}
