//! Scheduled billing sweeps
//!
//! Each job logs its own failures and returns nothing; a failed run is simply
//! retried on the next tick.

use pamdes_billing::{BillingService, InvariantCheckSummary, ViolationSeverity};
use time::OffsetDateTime;
use tracing::{error, info, warn};

/// Close pending payments whose checkout window has passed
pub async fn expire_stale_payments(billing: &BillingService) {
    let now = OffsetDateTime::now_utc();
    match billing.reconciler.expire_stale(now).await {
        Ok(0) => {}
        Ok(expired) => info!(expired = expired, "Expired stale pending payments"),
        Err(e) => error!(error = %e, "Failed to expire stale payments"),
    }
}

/// Move unpaid bills past their due date to overdue
pub async fn mark_overdue_bills(billing: &BillingService) {
    let now = OffsetDateTime::now_utc();
    match billing.bills.mark_overdue(now).await {
        Ok(0) => {}
        Ok(updated) => info!(updated = updated, "Marked bills overdue"),
        Err(e) => error!(error = %e, "Failed to mark overdue bills"),
    }
}

/// Run the consistency checks and log what they find
pub async fn report_invariants(billing: &BillingService) {
    match billing.invariants.run_all_checks().await {
        Ok(summary) => log_summary(&summary),
        Err(e) => error!(error = %e, "Invariant check run failed"),
    }
}

fn log_summary(summary: &InvariantCheckSummary) {
    if summary.healthy {
        info!(checks_run = summary.checks_run, "Billing invariants hold");
        return;
    }

    for violation in &summary.violations {
        match violation.severity {
            ViolationSeverity::Critical | ViolationSeverity::High => error!(
                invariant = %violation.invariant,
                severity = %violation.severity,
                villages = ?violation.village_ids,
                context = %violation.context,
                "{}",
                violation.description
            ),
            ViolationSeverity::Medium | ViolationSeverity::Low => warn!(
                invariant = %violation.invariant,
                severity = %violation.severity,
                villages = ?violation.village_ids,
                "{}",
                violation.description
            ),
        }
    }

    warn!(
        checks_run = summary.checks_run,
        checks_failed = summary.checks_failed,
        violations = summary.violations.len(),
        "Billing invariant violations found"
    );
}
