use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::time::{self, Duration as TokioDuration};
use tracing::{debug, info, warn};

use super::service::SubscriptionReconciler;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub updated: usize,
    pub failed: usize,
}

/// key: billing-reconciliation-sweep -> periodic provider comparison
pub fn spawn(reconciler: SubscriptionReconciler, interval_secs: u64) {
    let interval = TokioDuration::from_secs(interval_secs);

    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        loop {
            ticker.tick().await;
            match process_tick(&reconciler, Utc::now()).await {
                Ok(report) if report.updated > 0 || report.failed > 0 => info!(
                    checked = report.checked,
                    updated = report.updated,
                    failed = report.failed,
                    "billing reconciliation sweep finished"
                ),
                Ok(report) => debug!(checked = report.checked, "billing reconciliation sweep clean"),
                Err(err) => warn!(?err, "billing reconciliation sweep failed"),
            }
        }
    });
}

/// key: billing-reconciliation-sweep -> tick handler
pub async fn process_tick(reconciler: &SubscriptionReconciler, now: DateTime<Utc>) -> Result<SweepReport> {
    let mut report = SweepReport::default();
    for account_id in reconciler.tracked_accounts().await? {
        report.checked += 1;
        match reconciler.sync_from_provider(account_id, now).await {
            Ok(outcome) if outcome.changed => report.updated += 1,
            Ok(_) => {}
            Err(err) => {
                report.failed += 1;
                warn!(?err, %account_id, "failed to reconcile subscription with provider");
            }
        }
    }
    Ok(report)
}
