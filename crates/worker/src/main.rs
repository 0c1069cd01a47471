//! Background worker: runs the reorder scans and the reconciliation job on
//! their schedules until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;

use cmms_infra::{
    AlertScanner, InMemoryLedgerStore, InventoryConfig, LeaseRunGuard, LedgerStore,
    LocalRunGuard, PostgresLedgerStore, ReconcileJob, RunGuard, ScanGuardKind, ScanRunner,
    ScanRunnerHandle, SuggestionScanner, TracingAuditSink, TracingNotificationSink,
};
use cmms_inventory::SuggestionCriteria;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cmms_observability::init();

    let config = InventoryConfig::from_env().context("invalid worker configuration")?;
    let store = open_store(&config).await?;
    let guard: Arc<dyn RunGuard> = match config.scan_guard {
        ScanGuardKind::Local => Arc::new(LocalRunGuard::new()),
        ScanGuardKind::Lease => Arc::new(LeaseRunGuard::new(store.clone(), config.scan_lease_ttl)),
    };

    let alerts = Arc::new(AlertScanner::new(
        store.clone(),
        Arc::new(TracingNotificationSink),
        guard.clone(),
    ));
    let suggestions = Arc::new(SuggestionScanner::new(
        store.clone(),
        guard.clone(),
        SuggestionCriteria {
            lead_time_buffer_pct: config.lead_time_buffer_pct,
        },
    ));
    let reconcile = Arc::new(ReconcileJob::new(
        store,
        Arc::new(TracingAuditSink),
        guard,
        config.reconcile_repair,
    ));

    let runners: Vec<ScanRunnerHandle> = vec![
        ScanRunner::every(config.alert_scan_interval)
            .spawn(alerts)
            .context("failed to spawn alert scan runner")?,
        ScanRunner::every(config.suggestion_scan_interval)
            .spawn(suggestions)
            .context("failed to spawn suggestion scan runner")?,
        ScanRunner::every(config.reconcile_interval)
            .spawn(reconcile)
            .context("failed to spawn reconciliation runner")?,
    ];
    tracing::info!(
        runners = runners.len(),
        guard = ?config.scan_guard,
        "inventory worker started"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested; waiting for in-flight runs");

    // Runner threads may be blocked on the runtime; join them off the executor.
    tokio::task::spawn_blocking(move || {
        for runner in runners {
            runner.shutdown();
        }
    })
    .await
    .context("runner shutdown task failed")?;

    tracing::info!("inventory worker stopped");
    Ok(())
}

async fn open_store(config: &InventoryConfig) -> anyhow::Result<Arc<dyn LedgerStore>> {
    match &config.database_url {
        Some(url) => {
            let store = PostgresLedgerStore::connect(url, config.database_max_connections)
                .await
                .context("failed to connect to Postgres")?;
            store
                .migrate()
                .await
                .context("failed to apply stock ledger schema")?;
            tracing::info!("using Postgres ledger store");
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using the in-memory ledger store");
            Ok(Arc::new(InMemoryLedgerStore::new()))
        }
    }
}
