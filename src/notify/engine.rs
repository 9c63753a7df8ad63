//! The notification engine: scans obligations approaching their due
//! dates and delivers one reminder per obligation/threshold pair.
//!
//! Delivery is idempotent across passes: only a successful dispatch
//! marks a threshold as covered, so failed sends get retried naturally
//! on the next pass, and re-running a pass on the same day sends
//! nothing new.

use std::sync::{Arc, Weak};

use chrono::{Duration, NaiveDate};
use tracing::{debug, error, info, warn};

use crate::db::{
    DebtAlertRecord, DebtRecord, DocumentRecord, NewDispatch, ObligationKind, ObligationStore,
};
use crate::error::EngineError;

use super::email::{Mailer, OutboundEmail};
use super::render::{render_debt_reminder, render_document_reminder};
use super::schedule::due_thresholds;
use super::{profile, render::RenderedEmail};

/// Shared dependencies the engine runs against. The engine holds a
/// `Weak` reference: once the application tears the context down, any
/// still-scheduled pass degrades to a zero-count summary instead of
/// touching dropped resources.
pub struct EngineContext {
    pub store: Arc<dyn ObligationStore>,
    pub mailer: Arc<dyn Mailer>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RunSummary {
    /// Obligations inside the scan horizon.
    pub scanned: u64,
    /// Obligation/threshold pairs that fired this pass.
    pub due: u64,
    pub sent: u64,
    pub failed: u64,
    pub skipped_no_recipients: u64,
}

pub struct NotificationEngine {
    ctx: Weak<EngineContext>,
}

impl NotificationEngine {
    pub fn new(ctx: &Arc<EngineContext>) -> Self {
        Self {
            ctx: Arc::downgrade(ctx),
        }
    }

    /// Run one pass as of `today`.
    pub async fn run(&self, today: NaiveDate) -> Result<RunSummary, EngineError> {
        let Some(ctx) = self.ctx.upgrade() else {
            warn!("engine context already dropped, skipping pass");
            return Ok(RunSummary::default());
        };
        let horizon = profile::max_horizon_days().map_err(EngineError::Profiles)?;
        let end = today + Duration::days(horizon);
        let mut summary = RunSummary::default();

        let documents = ctx.store.list_documents_due_between(today, end).await?;
        for document in &documents {
            summary.scanned += 1;
            self.process_document(&ctx, document, today, &mut summary)
                .await?;
        }

        let debts = ctx.store.list_debts_with_alerts_due_between(today, end).await?;
        for (debt, alert) in &debts {
            summary.scanned += 1;
            self.process_debt(&ctx, debt, alert, today, &mut summary)
                .await?;
        }

        info!(
            scanned = summary.scanned,
            due = summary.due,
            sent = summary.sent,
            failed = summary.failed,
            skipped = summary.skipped_no_recipients,
            "notification pass complete"
        );
        Ok(summary)
    }

    async fn process_document(
        &self,
        ctx: &EngineContext,
        document: &DocumentRecord,
        today: NaiveDate,
        summary: &mut RunSummary,
    ) -> Result<(), EngineError> {
        let Some(expires_on) = document.expires_on else {
            return Ok(());
        };
        let thresholds: &[i32] = match &document.lead_times {
            Some(days) => days.as_slice(),
            None => profile::document_thresholds(document.kind).map_err(EngineError::Profiles)?,
        };
        let already = ctx
            .store
            .sent_thresholds(ObligationKind::Document, document.id)
            .await?;
        for threshold in due_thresholds(expires_on, today, thresholds, &already) {
            summary.due += 1;
            if document.recipients.is_empty() {
                debug!(document = %document.id, "no recipients, skipping");
                summary.skipped_no_recipients += 1;
                continue;
            }
            let rendered = render_document_reminder(document, expires_on, threshold)?;
            self.deliver(
                ctx,
                ObligationKind::Document,
                document.id,
                threshold,
                document.recipients.clone(),
                rendered,
                summary,
            )
            .await?;
        }
        Ok(())
    }

    async fn process_debt(
        &self,
        ctx: &EngineContext,
        debt: &DebtRecord,
        alert: &DebtAlertRecord,
        today: NaiveDate,
        summary: &mut RunSummary,
    ) -> Result<(), EngineError> {
        let thresholds = profile::debt_thresholds().map_err(EngineError::Profiles)?;
        let already = ctx
            .store
            .sent_thresholds(ObligationKind::Debt, debt.id)
            .await?;
        for threshold in due_thresholds(debt.final_due_on, today, thresholds, &already) {
            summary.due += 1;
            if alert.recipients.is_empty() {
                debug!(debt = %debt.id, "no recipients, skipping");
                summary.skipped_no_recipients += 1;
                continue;
            }
            let unpaid = ctx.store.unpaid_total(debt.id).await?;
            let unpaid = if unpaid.is_zero() { None } else { Some(unpaid) };
            let rendered = render_debt_reminder(debt, threshold, unpaid)?;
            self.deliver(
                ctx,
                ObligationKind::Debt,
                debt.id,
                threshold,
                alert.recipients.clone(),
                rendered,
                summary,
            )
            .await?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn deliver(
        &self,
        ctx: &EngineContext,
        kind: ObligationKind,
        obligation_id: uuid::Uuid,
        threshold_days: i32,
        recipients: Vec<String>,
        rendered: RenderedEmail,
        summary: &mut RunSummary,
    ) -> Result<(), EngineError> {
        let outcome = ctx
            .mailer
            .send(OutboundEmail {
                to: recipients.clone(),
                subject: rendered.subject,
                html_body: rendered.html_body,
            })
            .await;
        let (success, error_message) = match outcome {
            Ok(()) => (true, None),
            Err(e) => {
                error!(
                    kind = kind.as_str(),
                    obligation = %obligation_id,
                    threshold_days,
                    error = %e,
                    "reminder delivery failed"
                );
                (false, Some(e.to_string()))
            }
        };
        let recorded = ctx
            .store
            .record_dispatch(NewDispatch {
                obligation_kind: kind,
                obligation_id,
                threshold_days,
                recipients,
                success,
                error: error_message,
            })
            .await?;
        if recorded.is_none() {
            // Lost a race with a concurrent pass: this pair is already
            // covered, so do not double-count the send.
            debug!(
                kind = kind.as_str(),
                obligation = %obligation_id,
                threshold_days,
                "dispatch already recorded"
            );
            return Ok(());
        }
        if success {
            summary.sent += 1;
        } else {
            summary.failed += 1;
        }
        Ok(())
    }
}
