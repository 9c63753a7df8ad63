//! End-to-end engine behavior against an in-memory store and a capture
//! mailer: idempotent delivery, retry of failures, recipient handling
//! and context teardown.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::Mutex;
use uuid::Uuid;

use agrowatch::db::{
    CreateDebt, CreateDocument, CreateInstallment, DebtAlertRecord, DebtRecord, DebtStore,
    DispatchRecord, DispatchStore, DocumentKind, DocumentRecord, DocumentStore,
    InstallmentRecord, NewDispatch, ObligationKind, PersonRecord, UpdateDebt, UpdateDocument,
    UpdateInstallment,
};
use agrowatch::error::DatabaseError;
use agrowatch::notify::email::MemoryMailer;
use agrowatch::notify::{EngineContext, NotificationEngine, RunSummary};

#[derive(Default)]
struct MemoryStore {
    documents: Mutex<Vec<DocumentRecord>>,
    debts: Mutex<Vec<(DebtRecord, DebtAlertRecord)>>,
    installments: Mutex<HashMap<Uuid, Vec<InstallmentRecord>>>,
    dispatches: Mutex<Vec<DispatchRecord>>,
}

impl MemoryStore {
    async fn add_document(
        &self,
        expires_on: NaiveDate,
        recipients: Vec<String>,
        lead_times: Option<Vec<i32>>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.documents.lock().await.push(DocumentRecord {
            id,
            name: format!("doc-{id}"),
            kind: DocumentKind::Other,
            kind_label: None,
            issued_on: None,
            expires_on: Some(expires_on),
            farm_id: None,
            person_id: None,
            recipients,
            lead_times,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });
        id
    }

    async fn add_debt(&self, final_due_on: NaiveDate, recipients: Vec<String>) -> Uuid {
        let id = Uuid::new_v4();
        let debt = DebtRecord {
            id,
            bank: "Banco Teste".to_string(),
            proposal_number: "P-001".to_string(),
            issued_on: None,
            final_due_on,
            interest_rate: None,
            rate_basis: None,
            grace_months: None,
            principal: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let alert = DebtAlertRecord {
            debt_id: id,
            recipients,
            active: true,
            updated_at: Utc::now(),
        };
        self.debts.lock().await.push((debt, alert));
        id
    }

    async fn dispatch_count(&self) -> usize {
        self.dispatches.lock().await.len()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create_document(&self, _: CreateDocument) -> Result<DocumentRecord, DatabaseError> {
        unimplemented!("tests seed documents directly")
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<DocumentRecord>, DatabaseError> {
        Ok(self
            .documents
            .lock()
            .await
            .iter()
            .find(|d| d.id == id)
            .cloned())
    }

    async fn list_documents(&self) -> Result<Vec<DocumentRecord>, DatabaseError> {
        Ok(self.documents.lock().await.clone())
    }

    async fn list_documents_due_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DocumentRecord>, DatabaseError> {
        Ok(self
            .documents
            .lock()
            .await
            .iter()
            .filter(|d| d.expires_on.is_some_and(|e| e >= start && e <= end))
            .cloned()
            .collect())
    }

    async fn update_document(
        &self,
        _: Uuid,
        _: UpdateDocument,
    ) -> Result<Option<DocumentRecord>, DatabaseError> {
        unimplemented!("not exercised by engine tests")
    }

    async fn delete_document(&self, _: Uuid) -> Result<bool, DatabaseError> {
        unimplemented!("not exercised by engine tests")
    }
}

#[async_trait]
impl DebtStore for MemoryStore {
    async fn create_debt(&self, _: CreateDebt) -> Result<DebtRecord, DatabaseError> {
        unimplemented!("tests seed debts directly")
    }

    async fn get_debt(&self, id: Uuid) -> Result<Option<DebtRecord>, DatabaseError> {
        Ok(self
            .debts
            .lock()
            .await
            .iter()
            .find(|(d, _)| d.id == id)
            .map(|(d, _)| d.clone()))
    }

    async fn list_debts(&self) -> Result<Vec<DebtRecord>, DatabaseError> {
        Ok(self.debts.lock().await.iter().map(|(d, _)| d.clone()).collect())
    }

    async fn update_debt(&self, _: Uuid, _: UpdateDebt) -> Result<Option<DebtRecord>, DatabaseError> {
        unimplemented!("not exercised by engine tests")
    }

    async fn delete_debt(&self, _: Uuid) -> Result<bool, DatabaseError> {
        unimplemented!("not exercised by engine tests")
    }

    async fn debt_people(&self, _: Uuid) -> Result<Vec<PersonRecord>, DatabaseError> {
        Ok(Vec::new())
    }

    async fn create_installment(
        &self,
        _: Uuid,
        _: CreateInstallment,
    ) -> Result<InstallmentRecord, DatabaseError> {
        unimplemented!("tests seed installments directly")
    }

    async fn list_installments(
        &self,
        debt_id: Uuid,
    ) -> Result<Vec<InstallmentRecord>, DatabaseError> {
        Ok(self
            .installments
            .lock()
            .await
            .get(&debt_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_installment(
        &self,
        _: Uuid,
        _: UpdateInstallment,
    ) -> Result<Option<InstallmentRecord>, DatabaseError> {
        unimplemented!("not exercised by engine tests")
    }

    async fn delete_installment(&self, _: Uuid) -> Result<bool, DatabaseError> {
        unimplemented!("not exercised by engine tests")
    }

    async fn unpaid_total(&self, debt_id: Uuid) -> Result<Decimal, DatabaseError> {
        Ok(self
            .installments
            .lock()
            .await
            .get(&debt_id)
            .map(|rows| rows.iter().filter(|i| !i.paid).map(|i| i.amount).sum())
            .unwrap_or_default())
    }

    async fn upsert_debt_alert(
        &self,
        _: Uuid,
        _: Vec<String>,
        _: bool,
    ) -> Result<DebtAlertRecord, DatabaseError> {
        unimplemented!("tests seed alerts directly")
    }

    async fn get_debt_alert(
        &self,
        debt_id: Uuid,
    ) -> Result<Option<DebtAlertRecord>, DatabaseError> {
        Ok(self
            .debts
            .lock()
            .await
            .iter()
            .find(|(d, _)| d.id == debt_id)
            .map(|(_, a)| a.clone()))
    }

    async fn list_debts_with_alerts_due_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(DebtRecord, DebtAlertRecord)>, DatabaseError> {
        Ok(self
            .debts
            .lock()
            .await
            .iter()
            .filter(|(d, a)| a.active && d.final_due_on >= start && d.final_due_on <= end)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DispatchStore for MemoryStore {
    async fn record_dispatch(
        &self,
        dispatch: NewDispatch,
    ) -> Result<Option<DispatchRecord>, DatabaseError> {
        let mut dispatches = self.dispatches.lock().await;
        if dispatch.success
            && dispatches.iter().any(|d| {
                d.success
                    && d.obligation_kind == dispatch.obligation_kind
                    && d.obligation_id == dispatch.obligation_id
                    && d.threshold_days == dispatch.threshold_days
            })
        {
            return Ok(None);
        }
        let record = DispatchRecord {
            id: Uuid::new_v4(),
            obligation_kind: dispatch.obligation_kind,
            obligation_id: dispatch.obligation_id,
            threshold_days: dispatch.threshold_days,
            sent_at: Utc::now(),
            recipients: dispatch.recipients,
            success: dispatch.success,
            error: dispatch.error,
        };
        dispatches.push(record.clone());
        Ok(Some(record))
    }

    async fn sent_thresholds(
        &self,
        kind: ObligationKind,
        obligation_id: Uuid,
    ) -> Result<Vec<i32>, DatabaseError> {
        Ok(self
            .dispatches
            .lock()
            .await
            .iter()
            .filter(|d| d.success && d.obligation_kind == kind && d.obligation_id == obligation_id)
            .map(|d| d.threshold_days)
            .collect())
    }

    async fn list_dispatches(
        &self,
        kind: ObligationKind,
        obligation_id: Uuid,
        limit: i64,
    ) -> Result<Vec<DispatchRecord>, DatabaseError> {
        Ok(self
            .dispatches
            .lock()
            .await
            .iter()
            .filter(|d| d.obligation_kind == kind && d.obligation_id == obligation_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn prune_dispatches(&self, older_than: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let mut dispatches = self.dispatches.lock().await;
        let before = dispatches.len();
        dispatches.retain(|d| d.sent_at >= older_than);
        Ok((before - dispatches.len()) as u64)
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn setup() -> (Arc<MemoryStore>, Arc<MemoryMailer>, Arc<EngineContext>, NotificationEngine) {
    let store = Arc::new(MemoryStore::default());
    let mailer = Arc::new(MemoryMailer::default());
    let ctx = Arc::new(EngineContext {
        store: store.clone(),
        mailer: mailer.clone(),
    });
    let engine = NotificationEngine::new(&ctx);
    (store, mailer, ctx, engine)
}

#[tokio::test]
async fn rerunning_a_pass_sends_nothing_new() {
    let (store, mailer, _ctx, engine) = setup();
    let today = date(2026, 8, 30);
    store
        .add_document(today + Duration::days(30), vec!["owner@farm.example".to_string()], None)
        .await;
    store
        .add_debt(today + Duration::days(7), vec!["owner@farm.example".to_string()])
        .await;

    let first = engine.run(today).await.expect("first pass");
    assert_eq!(first.sent, 2);
    assert_eq!(mailer.sent().await.len(), 2);

    let second = engine.run(today).await.expect("second pass");
    assert_eq!(second.sent, 0);
    assert_eq!(second.due, 0);
    assert_eq!(mailer.sent().await.len(), 2);
    assert_eq!(store.dispatch_count().await, 2);
}

#[tokio::test]
async fn thresholds_fire_only_on_the_exact_day() {
    let (store, mailer, _ctx, engine) = setup();
    let today = date(2026, 8, 30);
    // 29 days out: between the 30 and 15 day thresholds, nothing fires.
    store
        .add_document(today + Duration::days(29), vec!["owner@farm.example".to_string()], None)
        .await;

    let summary = engine.run(today).await.expect("pass");
    assert_eq!(summary.scanned, 1);
    assert_eq!(summary.due, 0);
    assert!(mailer.sent().await.is_empty());
}

#[tokio::test]
async fn past_due_obligations_are_ignored() {
    let (store, mailer, _ctx, engine) = setup();
    let today = date(2026, 8, 30);
    store
        .add_debt(today - Duration::days(1), vec!["owner@farm.example".to_string()])
        .await;

    let summary = engine.run(today).await.expect("pass");
    assert_eq!(summary.due, 0);
    assert!(mailer.sent().await.is_empty());
    assert_eq!(store.dispatch_count().await, 0);
}

#[tokio::test]
async fn missing_recipients_skip_without_recording() {
    let (store, mailer, _ctx, engine) = setup();
    let today = date(2026, 8, 30);
    store.add_document(today + Duration::days(7), Vec::new(), None).await;

    let summary = engine.run(today).await.expect("pass");
    assert_eq!(summary.skipped_no_recipients, 1);
    assert_eq!(summary.sent, 0);
    assert!(mailer.sent().await.is_empty());
    // No record means the reminder still fires once recipients appear.
    assert_eq!(store.dispatch_count().await, 0);
}

#[tokio::test]
async fn failed_sends_are_retried_on_the_next_pass() {
    let (store, mailer, _ctx, engine) = setup();
    let today = date(2026, 8, 30);
    let id = store
        .add_debt(today + Duration::days(3), vec!["owner@farm.example".to_string()])
        .await;

    mailer.fail_sends.store(true, Ordering::SeqCst);
    let first = engine.run(today).await.expect("first pass");
    assert_eq!(first.failed, 1);
    assert_eq!(first.sent, 0);

    mailer.fail_sends.store(false, Ordering::SeqCst);
    let second = engine.run(today).await.expect("second pass");
    assert_eq!(second.sent, 1);
    assert_eq!(mailer.sent().await.len(), 1);

    let history = store
        .list_dispatches(ObligationKind::Debt, id, 10)
        .await
        .expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history.iter().filter(|d| d.success).count(), 1);
}

#[tokio::test]
async fn per_document_lead_time_override_wins() {
    let (store, mailer, _ctx, engine) = setup();
    let today = date(2026, 8, 30);
    // 45 days is not in any profile; the override makes it fire.
    store
        .add_document(
            today + Duration::days(45),
            vec!["owner@farm.example".to_string()],
            Some(vec![45, 10]),
        )
        .await;

    let summary = engine.run(today).await.expect("pass");
    assert_eq!(summary.sent, 1);
    let sent = mailer.sent().await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].subject.contains("45 days"));
}

#[tokio::test]
async fn dropped_context_yields_zero_summary() {
    let (store, mailer, ctx, engine) = setup();
    let today = date(2026, 8, 30);
    store
        .add_debt(today, vec!["owner@farm.example".to_string()])
        .await;
    drop(ctx);

    let summary = engine.run(today).await.expect("pass");
    assert_eq!(summary, RunSummary::default());
    assert!(mailer.sent().await.is_empty());
}

#[tokio::test]
async fn debt_reminder_includes_outstanding_amount() {
    let (store, mailer, _ctx, engine) = setup();
    let today = date(2026, 8, 30);
    let id = store
        .add_debt(today + Duration::days(15), vec!["owner@farm.example".to_string()])
        .await;
    store.installments.lock().await.insert(
        id,
        vec![InstallmentRecord {
            id: Uuid::new_v4(),
            debt_id: id,
            due_on: today + Duration::days(15),
            amount: dec!(1250.00),
            paid: false,
            paid_on: None,
            paid_amount: None,
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }],
    );

    let summary = engine.run(today).await.expect("pass");
    assert_eq!(summary.sent, 1);
    let sent = mailer.sent().await;
    assert!(sent[0].html_body.contains("R$ 1250.00"));
}
