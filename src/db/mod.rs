//! Storage abstraction.
//!
//! `Database` is a supertrait composed of narrow per-entity stores so
//! leaf consumers (the notification engine, the HTTP handlers) can
//! depend on the specific sub-trait they need instead of the whole
//! surface. `PgBackend` in `postgres` is the production implementation.

pub mod postgres;

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::DatabaseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Certificate,
    Contract,
    AreaDocument,
    Other,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Certificate => "certificate",
            DocumentKind::Contract => "contract",
            DocumentKind::AreaDocument => "area_document",
            DocumentKind::Other => "other",
        }
    }

    pub fn from_db_value(value: &str) -> Result<Self, DatabaseError> {
        match value {
            "certificate" => Ok(DocumentKind::Certificate),
            "contract" => Ok(DocumentKind::Contract),
            "area_document" => Ok(DocumentKind::AreaDocument),
            "other" => Ok(DocumentKind::Other),
            other => Err(DatabaseError::Serialization(format!(
                "unknown document kind '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateBasis {
    Yearly,
    Monthly,
}

impl RateBasis {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateBasis::Yearly => "yearly",
            RateBasis::Monthly => "monthly",
        }
    }

    pub fn from_db_value(value: &str) -> Result<Self, DatabaseError> {
        match value {
            "yearly" => Ok(RateBasis::Yearly),
            "monthly" => Ok(RateBasis::Monthly),
            other => Err(DatabaseError::Serialization(format!(
                "unknown rate basis '{other}'"
            ))),
        }
    }
}

/// The two obligation families the notification engine tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObligationKind {
    Document,
    Debt,
}

impl ObligationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObligationKind::Document => "document",
            ObligationKind::Debt => "debt",
        }
    }

    pub fn from_db_value(value: &str) -> Result<Self, DatabaseError> {
        match value {
            "document" => Ok(ObligationKind::Document),
            "debt" => Ok(ObligationKind::Debt),
            other => Err(DatabaseError::Serialization(format!(
                "unknown obligation kind '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PersonRecord {
    pub id: Uuid,
    pub name: String,
    pub tax_id: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CreatePerson {
    pub name: String,
    pub tax_id: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

/// Field-level update: outer `None` leaves the column untouched, inner
/// `None` clears it.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct UpdatePerson {
    pub name: Option<String>,
    pub email: Option<Option<String>>,
    pub phone: Option<Option<String>>,
    pub address: Option<Option<String>>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct FarmRecord {
    pub id: Uuid,
    pub name: String,
    pub registration: String,
    pub total_hectares: Option<f64>,
    pub consolidated_hectares: Option<f64>,
    pub available_hectares: Option<f64>,
    pub municipality: Option<String>,
    pub state: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CreateFarm {
    pub name: String,
    pub registration: String,
    pub total_hectares: Option<f64>,
    pub consolidated_hectares: Option<f64>,
    pub available_hectares: Option<f64>,
    pub municipality: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct UpdateFarm {
    pub name: Option<String>,
    pub total_hectares: Option<Option<f64>>,
    pub consolidated_hectares: Option<Option<f64>>,
    pub available_hectares: Option<Option<f64>>,
    pub municipality: Option<Option<String>>,
    pub state: Option<Option<String>>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DocumentRecord {
    pub id: Uuid,
    pub name: String,
    pub kind: DocumentKind,
    pub kind_label: Option<String>,
    pub issued_on: Option<NaiveDate>,
    pub expires_on: Option<NaiveDate>,
    pub farm_id: Option<Uuid>,
    pub person_id: Option<Uuid>,
    pub recipients: Vec<String>,
    /// Per-document reminder override; `None` falls back to the profile.
    pub lead_times: Option<Vec<i32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CreateDocument {
    pub name: String,
    pub kind: DocumentKind,
    pub kind_label: Option<String>,
    pub issued_on: Option<NaiveDate>,
    pub expires_on: Option<NaiveDate>,
    pub farm_id: Option<Uuid>,
    pub person_id: Option<Uuid>,
    #[serde(default)]
    pub recipients: Vec<String>,
    pub lead_times: Option<Vec<i32>>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct UpdateDocument {
    pub name: Option<String>,
    pub kind: Option<DocumentKind>,
    pub kind_label: Option<Option<String>>,
    pub issued_on: Option<Option<NaiveDate>>,
    pub expires_on: Option<Option<NaiveDate>>,
    pub farm_id: Option<Option<Uuid>>,
    pub person_id: Option<Option<Uuid>>,
    pub recipients: Option<Vec<String>>,
    pub lead_times: Option<Option<Vec<i32>>>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DebtRecord {
    pub id: Uuid,
    pub bank: String,
    pub proposal_number: String,
    pub issued_on: Option<NaiveDate>,
    pub final_due_on: NaiveDate,
    pub interest_rate: Option<Decimal>,
    pub rate_basis: Option<RateBasis>,
    pub grace_months: Option<i32>,
    pub principal: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CreateDebt {
    pub bank: String,
    pub proposal_number: String,
    pub issued_on: Option<NaiveDate>,
    pub final_due_on: NaiveDate,
    pub interest_rate: Option<Decimal>,
    pub rate_basis: Option<RateBasis>,
    pub grace_months: Option<i32>,
    pub principal: Option<Decimal>,
    #[serde(default)]
    pub person_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct UpdateDebt {
    pub bank: Option<String>,
    pub proposal_number: Option<String>,
    pub issued_on: Option<Option<NaiveDate>>,
    pub final_due_on: Option<NaiveDate>,
    pub interest_rate: Option<Option<Decimal>>,
    pub rate_basis: Option<Option<RateBasis>>,
    pub grace_months: Option<Option<i32>>,
    pub principal: Option<Option<Decimal>>,
    pub person_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct InstallmentRecord {
    pub id: Uuid,
    pub debt_id: Uuid,
    pub due_on: NaiveDate,
    pub amount: Decimal,
    pub paid: bool,
    pub paid_on: Option<NaiveDate>,
    pub paid_amount: Option<Decimal>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CreateInstallment {
    pub due_on: NaiveDate,
    pub amount: Decimal,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct UpdateInstallment {
    pub due_on: Option<NaiveDate>,
    pub amount: Option<Decimal>,
    pub paid: Option<bool>,
    pub paid_on: Option<Option<NaiveDate>>,
    pub paid_amount: Option<Option<Decimal>>,
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DebtAlertRecord {
    pub debt_id: Uuid,
    pub recipients: Vec<String>,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DispatchRecord {
    pub id: Uuid,
    pub obligation_kind: ObligationKind,
    pub obligation_id: Uuid,
    pub threshold_days: i32,
    pub sent_at: DateTime<Utc>,
    pub recipients: Vec<String>,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewDispatch {
    pub obligation_kind: ObligationKind,
    pub obligation_id: Uuid,
    pub threshold_days: i32,
    pub recipients: Vec<String>,
    pub success: bool,
    pub error: Option<String>,
}

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

/// Strip everything but digits from a tax id so lookups are
/// punctuation-insensitive.
pub fn normalize_tax_id(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Keep only well-formed, deduplicated addresses, lowercased.
pub fn parse_recipients(raw: &[String]) -> Vec<String> {
    let mut seen = Vec::new();
    for addr in raw {
        let addr = addr.trim().to_lowercase();
        if EMAIL_RE.is_match(&addr) && !seen.contains(&addr) {
            seen.push(addr);
        }
    }
    seen
}

#[async_trait]
pub trait PersonStore: Send + Sync {
    async fn create_person(&self, params: CreatePerson) -> Result<PersonRecord, DatabaseError>;
    async fn get_person(&self, id: Uuid) -> Result<Option<PersonRecord>, DatabaseError>;
    async fn list_people(&self) -> Result<Vec<PersonRecord>, DatabaseError>;
    /// Case-insensitive substring match over name and tax id.
    async fn search_people(
        &self,
        term: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<PersonRecord>, DatabaseError>;
    async fn update_person(
        &self,
        id: Uuid,
        params: UpdatePerson,
    ) -> Result<Option<PersonRecord>, DatabaseError>;
    async fn delete_person(&self, id: Uuid) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait FarmStore: Send + Sync {
    async fn create_farm(&self, params: CreateFarm) -> Result<FarmRecord, DatabaseError>;
    async fn get_farm(&self, id: Uuid) -> Result<Option<FarmRecord>, DatabaseError>;
    async fn list_farms(&self) -> Result<Vec<FarmRecord>, DatabaseError>;
    async fn update_farm(
        &self,
        id: Uuid,
        params: UpdateFarm,
    ) -> Result<Option<FarmRecord>, DatabaseError>;
    async fn delete_farm(&self, id: Uuid) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn create_document(
        &self,
        params: CreateDocument,
    ) -> Result<DocumentRecord, DatabaseError>;
    async fn get_document(&self, id: Uuid) -> Result<Option<DocumentRecord>, DatabaseError>;
    async fn list_documents(&self) -> Result<Vec<DocumentRecord>, DatabaseError>;
    /// Documents whose expiry falls inside `[start, end]`, both inclusive.
    async fn list_documents_due_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DocumentRecord>, DatabaseError>;
    async fn update_document(
        &self,
        id: Uuid,
        params: UpdateDocument,
    ) -> Result<Option<DocumentRecord>, DatabaseError>;
    async fn delete_document(&self, id: Uuid) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait DebtStore: Send + Sync {
    async fn create_debt(&self, params: CreateDebt) -> Result<DebtRecord, DatabaseError>;
    async fn get_debt(&self, id: Uuid) -> Result<Option<DebtRecord>, DatabaseError>;
    async fn list_debts(&self) -> Result<Vec<DebtRecord>, DatabaseError>;
    async fn update_debt(
        &self,
        id: Uuid,
        params: UpdateDebt,
    ) -> Result<Option<DebtRecord>, DatabaseError>;
    async fn delete_debt(&self, id: Uuid) -> Result<bool, DatabaseError>;
    async fn debt_people(&self, debt_id: Uuid) -> Result<Vec<PersonRecord>, DatabaseError>;

    async fn create_installment(
        &self,
        debt_id: Uuid,
        params: CreateInstallment,
    ) -> Result<InstallmentRecord, DatabaseError>;
    async fn list_installments(
        &self,
        debt_id: Uuid,
    ) -> Result<Vec<InstallmentRecord>, DatabaseError>;
    async fn update_installment(
        &self,
        id: Uuid,
        params: UpdateInstallment,
    ) -> Result<Option<InstallmentRecord>, DatabaseError>;
    async fn delete_installment(&self, id: Uuid) -> Result<bool, DatabaseError>;
    /// Sum of unpaid installment amounts.
    async fn unpaid_total(&self, debt_id: Uuid) -> Result<Decimal, DatabaseError>;

    async fn upsert_debt_alert(
        &self,
        debt_id: Uuid,
        recipients: Vec<String>,
        active: bool,
    ) -> Result<DebtAlertRecord, DatabaseError>;
    async fn get_debt_alert(
        &self,
        debt_id: Uuid,
    ) -> Result<Option<DebtAlertRecord>, DatabaseError>;
    /// Debts with an active alert whose final due date falls inside
    /// `[start, end]`.
    async fn list_debts_with_alerts_due_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(DebtRecord, DebtAlertRecord)>, DatabaseError>;
}

#[async_trait]
pub trait DispatchStore: Send + Sync {
    /// Record an attempt. Returns `None` when a successful dispatch for
    /// the same obligation/threshold pair already exists.
    async fn record_dispatch(
        &self,
        dispatch: NewDispatch,
    ) -> Result<Option<DispatchRecord>, DatabaseError>;
    /// Thresholds already covered by a successful dispatch.
    async fn sent_thresholds(
        &self,
        kind: ObligationKind,
        obligation_id: Uuid,
    ) -> Result<Vec<i32>, DatabaseError>;
    async fn list_dispatches(
        &self,
        kind: ObligationKind,
        obligation_id: Uuid,
        limit: i64,
    ) -> Result<Vec<DispatchRecord>, DatabaseError>;
    /// Delete dispatch records older than the cutoff; returns the count.
    async fn prune_dispatches(&self, older_than: DateTime<Utc>) -> Result<u64, DatabaseError>;
}

/// Everything the notification engine needs from storage.
pub trait ObligationStore: DocumentStore + DebtStore + DispatchStore {}

impl<T: DocumentStore + DebtStore + DispatchStore> ObligationStore for T {}

#[async_trait]
pub trait Database:
    PersonStore + FarmStore + DocumentStore + DebtStore + DispatchStore + Send + Sync
{
    async fn run_migrations(&self) -> Result<(), DatabaseError>;
}

/// Connect and apply pending migrations. Returns the concrete backend
/// so callers can hand it out as whichever store trait they need.
pub async fn connect_from_config(
    config: &DatabaseConfig,
) -> Result<Arc<postgres::PgBackend>, DatabaseError> {
    let backend = postgres::PgBackend::connect(config).await?;
    backend.run_migrations().await?;
    Ok(Arc::new(backend))
}

#[cfg(test)]
mod tests {
    use super::{normalize_tax_id, parse_recipients};

    #[test]
    fn normalize_tax_id_strips_punctuation() {
        assert_eq!(normalize_tax_id("123.456.789-00"), "12345678900");
        assert_eq!(normalize_tax_id("12.345.678/0001-99"), "12345678000199");
    }

    #[test]
    fn parse_recipients_filters_and_dedupes() {
        let raw = vec![
            "Alice@Example.com ".to_string(),
            "alice@example.com".to_string(),
            "not-an-address".to_string(),
            "bob@farm.example".to_string(),
        ];
        assert_eq!(
            parse_recipients(&raw),
            vec!["alice@example.com".to_string(), "bob@farm.example".to_string()]
        );
    }
}
