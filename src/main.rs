//! settlecore server entry point.
//!
//! Wires the ledger, the deposit matcher, the webhook processor, and the
//! settlement broadcaster behind one HTTP gateway, then runs the matcher
//! and the settlement recovery sweep as background tasks.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use settlecore::config::AppConfig;
use settlecore::deposit::{
    DepositMatcher, HttpChainIndexer, IntentStore, MatcherConfig, PgIntentStore,
};
use settlecore::gateway::{self, AppState};
use settlecore::invoice::{InvoiceStore, PgInvoiceStore, WebhookProcessor};
use settlecore::ledger::{LedgerStore, PgLedgerStore};
use settlecore::logging::init_logging;
use settlecore::settlement::{
    BroadcasterConfig, HttpCustodialNetwork, HttpPriceFeed, PgSettlementStore, RecoveryWorker,
    SettlementBroadcaster, SettlementStore, WorkerConfig,
};
use settlecore::transfer::TransferCoordinator;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--env" && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

struct Stores {
    ledger: Arc<dyn LedgerStore>,
    intents: Arc<dyn IntentStore>,
    invoices: Arc<dyn InvoiceStore>,
    settlements: Arc<dyn SettlementStore>,
}

async fn build_pg_stores(url: &str) -> anyhow::Result<Stores> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(16)
        .connect(url)
        .await?;
    info!("Connected to PostgreSQL");
    Ok(Stores {
        ledger: Arc::new(PgLedgerStore::new(pool.clone())),
        intents: Arc::new(PgIntentStore::new(pool.clone())),
        invoices: Arc::new(PgInvoiceStore::new(pool.clone())),
        settlements: Arc::new(PgSettlementStore::new(pool)),
    })
}

#[cfg(feature = "mock-api")]
fn build_mem_stores() -> Stores {
    use settlecore::deposit::MemIntentStore;
    use settlecore::invoice::MemInvoiceStore;
    use settlecore::ledger::MemLedgerStore;
    use settlecore::settlement::MemSettlementStore;
    use tracing::warn;

    warn!("No postgres_url configured, using in-memory stores (all state is lost on restart)");
    Stores {
        ledger: Arc::new(MemLedgerStore::new()),
        intents: Arc::new(MemIntentStore::new()),
        invoices: Arc::new(MemInvoiceStore::new()),
        settlements: Arc::new(MemSettlementStore::new()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env);
    let _guard = init_logging(&config);
    info!(env = %env, "Starting settlecore");

    let stores = match &config.postgres_url {
        Some(url) => build_pg_stores(url).await?,
        #[cfg(feature = "mock-api")]
        None => build_mem_stores(),
        #[cfg(not(feature = "mock-api"))]
        None => anyhow::bail!("postgres_url is required without the mock-api feature"),
    };

    // Deposit matcher against the chain indexer.
    let indexer = Arc::new(HttpChainIndexer::new(config.deposit.indexer_url.clone()));
    let matcher = DepositMatcher::new(
        stores.intents.clone(),
        indexer,
        stores.ledger.clone(),
        MatcherConfig {
            receive_address: config.deposit.receive_address.clone(),
            max_attempts: config.deposit.max_attempts,
            window_limit: config.deposit.window_limit,
            poll_interval: Duration::from_secs(config.deposit.poll_interval_secs),
            lease_ttl: Duration::from_secs(config.deposit.lease_ttl_secs),
        },
    );
    tokio::spawn(async move { matcher.run().await });

    // Outbound settlement broadcaster plus its recovery sweep.
    let price_feed = Arc::new(HttpPriceFeed::new(config.settlement.price_feed_url.clone()));
    let network = Arc::new(HttpCustodialNetwork::new(
        config.settlement.rpc_url.clone(),
        config.settlement.fallback_rpc_url.clone(),
        config.settlement.signing_key.clone(),
    ));
    let broadcaster = Arc::new(SettlementBroadcaster::new(
        stores.settlements.clone(),
        stores.ledger.clone(),
        price_feed,
        network,
        BroadcasterConfig {
            network_fee_native: config.settlement.network_fee_nano,
            confirm_interval: Duration::from_millis(config.settlement.confirm_interval_ms),
            confirm_max_attempts: config.settlement.confirm_max_attempts,
        },
    ));
    let recovery = RecoveryWorker::new(
        stores.settlements.clone(),
        broadcaster.clone(),
        WorkerConfig {
            scan_interval: Duration::from_secs(config.settlement.recovery_scan_secs),
            stale_threshold: Duration::from_secs(config.settlement.stale_threshold_secs),
            batch_size: 100,
        },
    );
    tokio::spawn(async move { recovery.run().await });

    let state = AppState {
        ledger: stores.ledger.clone(),
        transfers: Arc::new(TransferCoordinator::new(stores.ledger.clone())),
        intents: stores.intents,
        invoices: stores.invoices.clone(),
        webhooks: Arc::new(WebhookProcessor::new(
            stores.invoices,
            stores.ledger,
            config.webhook.secret.clone(),
        )),
        broadcaster,
        settlements: stores.settlements,
    };

    gateway::serve(state, &config.gateway.host, config.gateway.port).await
}
