//! Postgres-backed store tests. Gated behind the `integration` feature
//! because they need a live database at DATABASE_URL:
//!
//!     cargo test --features integration
#![cfg(feature = "integration")]

use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use uuid::Uuid;

use agrowatch::config::DatabaseConfig;
use agrowatch::db::{
    connect_from_config, CreateDebt, CreateDocument, CreateInstallment, CreatePerson, DebtStore,
    DispatchStore, DocumentKind, DocumentStore, NewDispatch, ObligationKind, PersonStore,
    UpdatePerson,
};

async fn backend() -> std::sync::Arc<agrowatch::db::postgres::PgBackend> {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    connect_from_config(&DatabaseConfig { url, pool_size: 4 })
        .await
        .expect("connect and migrate")
}

#[tokio::test]
async fn person_crud_normalizes_tax_id() {
    let store = backend().await;
    let created = store
        .create_person(CreatePerson {
            name: "Maria Silva".to_string(),
            tax_id: format!("{:011}", rand_suffix()),
            email: Some("maria@example.com".to_string()),
            phone: None,
            address: None,
        })
        .await
        .expect("create");
    assert!(created.tax_id.chars().all(|c| c.is_ascii_digit()));

    let updated = store
        .update_person(
            created.id,
            UpdatePerson {
                email: Some(None),
                ..Default::default()
            },
        )
        .await
        .expect("update")
        .expect("exists");
    assert_eq!(updated.email, None);
    assert_eq!(updated.name, "Maria Silva");

    assert!(store.delete_person(created.id).await.expect("delete"));
    assert!(store.get_person(created.id).await.expect("get").is_none());
}

#[tokio::test]
async fn successful_dispatch_is_unique_per_threshold() {
    let store = backend().await;
    let obligation_id = Uuid::new_v4();
    let dispatch = NewDispatch {
        obligation_kind: ObligationKind::Debt,
        obligation_id,
        threshold_days: 30,
        recipients: vec!["owner@farm.example".to_string()],
        success: true,
        error: None,
    };
    let first = store
        .record_dispatch(dispatch.clone())
        .await
        .expect("first insert");
    assert!(first.is_some());
    let second = store
        .record_dispatch(dispatch)
        .await
        .expect("second insert");
    assert!(second.is_none());

    let sent = store
        .sent_thresholds(ObligationKind::Debt, obligation_id)
        .await
        .expect("sent thresholds");
    assert_eq!(sent, vec![30]);
}

#[tokio::test]
async fn failed_dispatches_accumulate() {
    let store = backend().await;
    let obligation_id = Uuid::new_v4();
    for _ in 0..2 {
        let recorded = store
            .record_dispatch(NewDispatch {
                obligation_kind: ObligationKind::Document,
                obligation_id,
                threshold_days: 7,
                recipients: vec!["owner@farm.example".to_string()],
                success: false,
                error: Some("smtp timeout".to_string()),
            })
            .await
            .expect("insert");
        assert!(recorded.is_some());
    }
    let sent = store
        .sent_thresholds(ObligationKind::Document, obligation_id)
        .await
        .expect("sent thresholds");
    assert!(sent.is_empty());
    let history = store
        .list_dispatches(ObligationKind::Document, obligation_id, 10)
        .await
        .expect("history");
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn debt_with_installments_sums_unpaid() {
    let store = backend().await;
    let debt = store
        .create_debt(CreateDebt {
            bank: "Banco Rural".to_string(),
            proposal_number: format!("P-{}", Uuid::new_v4()),
            issued_on: None,
            final_due_on: Utc::now().date_naive() + Duration::days(90),
            interest_rate: Some(dec!(8.5)),
            rate_basis: None,
            grace_months: None,
            principal: Some(dec!(50000.00)),
            person_ids: Vec::new(),
        })
        .await
        .expect("create debt");
    for (offset, amount) in [(30, dec!(1000.00)), (60, dec!(2500.00))] {
        store
            .create_installment(
                debt.id,
                CreateInstallment {
                    due_on: Utc::now().date_naive() + Duration::days(offset),
                    amount,
                    notes: None,
                },
            )
            .await
            .expect("create installment");
    }
    let total = store.unpaid_total(debt.id).await.expect("total");
    assert_eq!(total, dec!(3500.00));
    assert!(store.delete_debt(debt.id).await.expect("delete"));
}

#[tokio::test]
async fn documents_due_between_is_inclusive() {
    let store = backend().await;
    let expires_on = Utc::now().date_naive() + Duration::days(30);
    let document = store
        .create_document(CreateDocument {
            name: "CCIR".to_string(),
            kind: DocumentKind::Certificate,
            kind_label: Some("Certificado".to_string()),
            issued_on: None,
            expires_on: Some(expires_on),
            farm_id: None,
            person_id: None,
            recipients: vec!["owner@farm.example".to_string()],
            lead_times: None,
        })
        .await
        .expect("create document");
    let found = store
        .list_documents_due_between(expires_on, expires_on)
        .await
        .expect("range query");
    assert!(found.iter().any(|d| d.id == document.id));
    assert!(store.delete_document(document.id).await.expect("delete"));
}

fn rand_suffix() -> u64 {
    // Derived from a v4 uuid so parallel runs do not collide.
    let id = Uuid::new_v4();
    (u64::from(id.as_fields().0) * 65_536 + u64::from(id.as_fields().1)) % 100_000_000_000
}
