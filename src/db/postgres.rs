//! Postgres implementation of the storage traits, backed by a deadpool
//! connection pool. Migrations are embedded with refinery and applied at
//! startup.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use rust_decimal::Decimal;
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::DatabaseError;

use super::{
    parse_recipients, CreateDebt, CreateDocument, CreateFarm, CreateInstallment, CreatePerson,
    Database, DebtAlertRecord, DebtRecord, DebtStore, DispatchRecord, DispatchStore,
    DocumentKind, DocumentRecord, DocumentStore, FarmRecord, FarmStore, InstallmentRecord,
    NewDispatch, ObligationKind, PersonRecord, PersonStore, RateBasis, UpdateDebt,
    UpdateDocument, UpdateFarm, UpdateInstallment, UpdatePerson,
};

mod embedded {
    refinery::embed_migrations!("migrations");
}

pub struct PgBackend {
    pool: Pool,
}

impl PgBackend {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let pg_config: tokio_postgres::Config = config
            .url
            .parse()
            .map_err(|e: tokio_postgres::Error| DatabaseError::Pool(e.to_string()))?;
        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(config.pool_size)
            .build()
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;
        Ok(Self { pool })
    }

    async fn client(&self) -> Result<Object, DatabaseError> {
        self.pool
            .get()
            .await
            .map_err(|e| DatabaseError::Pool(e.to_string()))
    }
}

fn recipients_to_json(recipients: &[String]) -> serde_json::Value {
    serde_json::Value::Array(
        recipients
            .iter()
            .map(|r| serde_json::Value::String(r.clone()))
            .collect(),
    )
}

fn json_to_recipients(value: serde_json::Value) -> Result<Vec<String>, DatabaseError> {
    serde_json::from_value(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn lead_times_to_json(lead_times: &Option<Vec<i32>>) -> Option<serde_json::Value> {
    lead_times.as_ref().map(|days| {
        serde_json::Value::Array(
            days.iter()
                .map(|d| serde_json::Value::Number((*d).into()))
                .collect(),
        )
    })
}

fn json_to_lead_times(
    value: Option<serde_json::Value>,
) -> Result<Option<Vec<i32>>, DatabaseError> {
    value
        .map(|v| serde_json::from_value(v).map_err(|e| DatabaseError::Serialization(e.to_string())))
        .transpose()
}

fn row_to_person_record(row: &Row) -> PersonRecord {
    PersonRecord {
        id: row.get("id"),
        name: row.get("name"),
        tax_id: row.get("tax_id"),
        email: row.get("email"),
        phone: row.get("phone"),
        address: row.get("address"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_farm_record(row: &Row) -> FarmRecord {
    FarmRecord {
        id: row.get("id"),
        name: row.get("name"),
        registration: row.get("registration"),
        total_hectares: row.get("total_hectares"),
        consolidated_hectares: row.get("consolidated_hectares"),
        available_hectares: row.get("available_hectares"),
        municipality: row.get("municipality"),
        state: row.get("state"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_document_record(row: &Row) -> Result<DocumentRecord, DatabaseError> {
    let kind: String = row.get("kind");
    Ok(DocumentRecord {
        id: row.get("id"),
        name: row.get("name"),
        kind: DocumentKind::from_db_value(&kind)?,
        kind_label: row.get("kind_label"),
        issued_on: row.get("issued_on"),
        expires_on: row.get("expires_on"),
        farm_id: row.get("farm_id"),
        person_id: row.get("person_id"),
        recipients: json_to_recipients(row.get("recipients"))?,
        lead_times: json_to_lead_times(row.get("lead_times"))?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_debt_record(row: &Row) -> Result<DebtRecord, DatabaseError> {
    let rate_basis: Option<String> = row.get("rate_basis");
    Ok(DebtRecord {
        id: row.get("id"),
        bank: row.get("bank"),
        proposal_number: row.get("proposal_number"),
        issued_on: row.get("issued_on"),
        final_due_on: row.get("final_due_on"),
        interest_rate: row.get("interest_rate"),
        rate_basis: rate_basis
            .as_deref()
            .map(RateBasis::from_db_value)
            .transpose()?,
        grace_months: row.get("grace_months"),
        principal: row.get("principal"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_installment_record(row: &Row) -> InstallmentRecord {
    InstallmentRecord {
        id: row.get("id"),
        debt_id: row.get("debt_id"),
        due_on: row.get("due_on"),
        amount: row.get("amount"),
        paid: row.get("paid"),
        paid_on: row.get("paid_on"),
        paid_amount: row.get("paid_amount"),
        notes: row.get("notes"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_debt_alert_record(row: &Row) -> Result<DebtAlertRecord, DatabaseError> {
    Ok(DebtAlertRecord {
        debt_id: row.get("debt_id"),
        recipients: json_to_recipients(row.get("recipients"))?,
        active: row.get("active"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_dispatch_record(row: &Row) -> Result<DispatchRecord, DatabaseError> {
    let kind: String = row.get("obligation_kind");
    Ok(DispatchRecord {
        id: row.get("id"),
        obligation_kind: ObligationKind::from_db_value(&kind)?,
        obligation_id: row.get("obligation_id"),
        threshold_days: row.get("threshold_days"),
        sent_at: row.get("sent_at"),
        recipients: json_to_recipients(row.get("recipients"))?,
        success: row.get("success"),
        error: row.get("error"),
    })
}

#[async_trait]
impl PersonStore for PgBackend {
    async fn create_person(&self, params: CreatePerson) -> Result<PersonRecord, DatabaseError> {
        let client = self.client().await?;
        let row = client
            .query_one(
                "INSERT INTO people (id, name, tax_id, email, phone, address)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 RETURNING *",
                &[
                    &Uuid::new_v4(),
                    &params.name,
                    &super::normalize_tax_id(&params.tax_id),
                    &params.email,
                    &params.phone,
                    &params.address,
                ],
            )
            .await?;
        Ok(row_to_person_record(&row))
    }

    async fn get_person(&self, id: Uuid) -> Result<Option<PersonRecord>, DatabaseError> {
        let client = self.client().await?;
        let row = client
            .query_opt("SELECT * FROM people WHERE id = $1", &[&id])
            .await?;
        Ok(row.as_ref().map(row_to_person_record))
    }

    async fn list_people(&self) -> Result<Vec<PersonRecord>, DatabaseError> {
        let client = self.client().await?;
        let rows = client
            .query("SELECT * FROM people ORDER BY name", &[])
            .await?;
        Ok(rows.iter().map(row_to_person_record).collect())
    }

    async fn search_people(
        &self,
        term: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<PersonRecord>, DatabaseError> {
        let client = self.client().await?;
        let name_pattern = format!("%{term}%");
        let tax_pattern = format!("%{}%", super::normalize_tax_id(term));
        let rows = client
            .query(
                "SELECT * FROM people
                 WHERE name ILIKE $1 OR ($2 <> '%%' AND tax_id LIKE $2)
                 ORDER BY name
                 OFFSET $3 LIMIT $4",
                &[&name_pattern, &tax_pattern, &offset, &limit],
            )
            .await?;
        Ok(rows.iter().map(row_to_person_record).collect())
    }

    async fn update_person(
        &self,
        id: Uuid,
        params: UpdatePerson,
    ) -> Result<Option<PersonRecord>, DatabaseError> {
        let Some(existing) = self.get_person(id).await? else {
            return Ok(None);
        };
        let name = params.name.unwrap_or(existing.name);
        let email = params.email.unwrap_or(existing.email);
        let phone = params.phone.unwrap_or(existing.phone);
        let address = params.address.unwrap_or(existing.address);
        let client = self.client().await?;
        let row = client
            .query_one(
                "UPDATE people
                 SET name = $2, email = $3, phone = $4, address = $5, updated_at = NOW()
                 WHERE id = $1
                 RETURNING *",
                &[&id, &name, &email, &phone, &address],
            )
            .await?;
        Ok(Some(row_to_person_record(&row)))
    }

    async fn delete_person(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let client = self.client().await?;
        let count = client
            .execute("DELETE FROM people WHERE id = $1", &[&id])
            .await?;
        Ok(count > 0)
    }
}

#[async_trait]
impl FarmStore for PgBackend {
    async fn create_farm(&self, params: CreateFarm) -> Result<FarmRecord, DatabaseError> {
        let client = self.client().await?;
        let row = client
            .query_one(
                "INSERT INTO farms (id, name, registration, total_hectares,
                     consolidated_hectares, available_hectares, municipality, state)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 RETURNING *",
                &[
                    &Uuid::new_v4(),
                    &params.name,
                    &params.registration,
                    &params.total_hectares,
                    &params.consolidated_hectares,
                    &params.available_hectares,
                    &params.municipality,
                    &params.state,
                ],
            )
            .await?;
        Ok(row_to_farm_record(&row))
    }

    async fn get_farm(&self, id: Uuid) -> Result<Option<FarmRecord>, DatabaseError> {
        let client = self.client().await?;
        let row = client
            .query_opt("SELECT * FROM farms WHERE id = $1", &[&id])
            .await?;
        Ok(row.as_ref().map(row_to_farm_record))
    }

    async fn list_farms(&self) -> Result<Vec<FarmRecord>, DatabaseError> {
        let client = self.client().await?;
        let rows = client
            .query("SELECT * FROM farms ORDER BY name", &[])
            .await?;
        Ok(rows.iter().map(row_to_farm_record).collect())
    }

    async fn update_farm(
        &self,
        id: Uuid,
        params: UpdateFarm,
    ) -> Result<Option<FarmRecord>, DatabaseError> {
        let Some(existing) = self.get_farm(id).await? else {
            return Ok(None);
        };
        let name = params.name.unwrap_or(existing.name);
        let total = params.total_hectares.unwrap_or(existing.total_hectares);
        let consolidated = params
            .consolidated_hectares
            .unwrap_or(existing.consolidated_hectares);
        let available = params
            .available_hectares
            .unwrap_or(existing.available_hectares);
        let municipality = params.municipality.unwrap_or(existing.municipality);
        let state = params.state.unwrap_or(existing.state);
        let client = self.client().await?;
        let row = client
            .query_one(
                "UPDATE farms
                 SET name = $2, total_hectares = $3, consolidated_hectares = $4,
                     available_hectares = $5, municipality = $6, state = $7,
                     updated_at = NOW()
                 WHERE id = $1
                 RETURNING *",
                &[&id, &name, &total, &consolidated, &available, &municipality, &state],
            )
            .await?;
        Ok(Some(row_to_farm_record(&row)))
    }

    async fn delete_farm(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let client = self.client().await?;
        let count = client
            .execute("DELETE FROM farms WHERE id = $1", &[&id])
            .await?;
        Ok(count > 0)
    }
}

#[async_trait]
impl DocumentStore for PgBackend {
    async fn create_document(
        &self,
        params: CreateDocument,
    ) -> Result<DocumentRecord, DatabaseError> {
        let client = self.client().await?;
        let recipients = recipients_to_json(&parse_recipients(&params.recipients));
        let lead_times = lead_times_to_json(&params.lead_times);
        let row = client
            .query_one(
                "INSERT INTO documents (id, name, kind, kind_label, issued_on,
                     expires_on, farm_id, person_id, recipients, lead_times)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                 RETURNING *",
                &[
                    &Uuid::new_v4(),
                    &params.name,
                    &params.kind.as_str(),
                    &params.kind_label,
                    &params.issued_on,
                    &params.expires_on,
                    &params.farm_id,
                    &params.person_id,
                    &recipients,
                    &lead_times,
                ],
            )
            .await?;
        row_to_document_record(&row)
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<DocumentRecord>, DatabaseError> {
        let client = self.client().await?;
        let row = client
            .query_opt("SELECT * FROM documents WHERE id = $1", &[&id])
            .await?;
        row.as_ref().map(row_to_document_record).transpose()
    }

    async fn list_documents(&self) -> Result<Vec<DocumentRecord>, DatabaseError> {
        let client = self.client().await?;
        let rows = client
            .query("SELECT * FROM documents ORDER BY expires_on NULLS LAST, name", &[])
            .await?;
        rows.iter().map(row_to_document_record).collect()
    }

    async fn list_documents_due_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DocumentRecord>, DatabaseError> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT * FROM documents
                 WHERE expires_on BETWEEN $1 AND $2
                 ORDER BY expires_on, name",
                &[&start, &end],
            )
            .await?;
        rows.iter().map(row_to_document_record).collect()
    }

    async fn update_document(
        &self,
        id: Uuid,
        params: UpdateDocument,
    ) -> Result<Option<DocumentRecord>, DatabaseError> {
        let Some(existing) = self.get_document(id).await? else {
            return Ok(None);
        };
        let name = params.name.unwrap_or(existing.name);
        let kind = params.kind.unwrap_or(existing.kind);
        let kind_label = params.kind_label.unwrap_or(existing.kind_label);
        let issued_on = params.issued_on.unwrap_or(existing.issued_on);
        let expires_on = params.expires_on.unwrap_or(existing.expires_on);
        let farm_id = params.farm_id.unwrap_or(existing.farm_id);
        let person_id = params.person_id.unwrap_or(existing.person_id);
        let recipients = params
            .recipients
            .map(|r| parse_recipients(&r))
            .unwrap_or(existing.recipients);
        let lead_times = params.lead_times.unwrap_or(existing.lead_times);
        let recipients_json = recipients_to_json(&recipients);
        let lead_times_json = lead_times_to_json(&lead_times);
        let client = self.client().await?;
        let row = client
            .query_one(
                "UPDATE documents
                 SET name = $2, kind = $3, kind_label = $4, issued_on = $5,
                     expires_on = $6, farm_id = $7, person_id = $8,
                     recipients = $9, lead_times = $10, updated_at = NOW()
                 WHERE id = $1
                 RETURNING *",
                &[
                    &id,
                    &name,
                    &kind.as_str(),
                    &kind_label,
                    &issued_on,
                    &expires_on,
                    &farm_id,
                    &person_id,
                    &recipients_json,
                    &lead_times_json,
                ],
            )
            .await?;
        row_to_document_record(&row).map(Some)
    }

    async fn delete_document(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let client = self.client().await?;
        let count = client
            .execute("DELETE FROM documents WHERE id = $1", &[&id])
            .await?;
        Ok(count > 0)
    }
}

#[async_trait]
impl DebtStore for PgBackend {
    async fn create_debt(&self, params: CreateDebt) -> Result<DebtRecord, DatabaseError> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;
        let row = tx
            .query_one(
                "INSERT INTO debts (id, bank, proposal_number, issued_on, final_due_on,
                     interest_rate, rate_basis, grace_months, principal)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                 RETURNING *",
                &[
                    &Uuid::new_v4(),
                    &params.bank,
                    &params.proposal_number,
                    &params.issued_on,
                    &params.final_due_on,
                    &params.interest_rate,
                    &params.rate_basis.map(|b| b.as_str()),
                    &params.grace_months,
                    &params.principal,
                ],
            )
            .await?;
        let record = row_to_debt_record(&row)?;
        for person_id in &params.person_ids {
            tx.execute(
                "INSERT INTO debt_people (debt_id, person_id)
                 VALUES ($1, $2)
                 ON CONFLICT DO NOTHING",
                &[&record.id, person_id],
            )
            .await?;
        }
        tx.commit().await?;
        Ok(record)
    }

    async fn get_debt(&self, id: Uuid) -> Result<Option<DebtRecord>, DatabaseError> {
        let client = self.client().await?;
        let row = client
            .query_opt("SELECT * FROM debts WHERE id = $1", &[&id])
            .await?;
        row.as_ref().map(row_to_debt_record).transpose()
    }

    async fn list_debts(&self) -> Result<Vec<DebtRecord>, DatabaseError> {
        let client = self.client().await?;
        let rows = client
            .query("SELECT * FROM debts ORDER BY final_due_on", &[])
            .await?;
        rows.iter().map(row_to_debt_record).collect()
    }

    async fn update_debt(
        &self,
        id: Uuid,
        params: UpdateDebt,
    ) -> Result<Option<DebtRecord>, DatabaseError> {
        let Some(existing) = self.get_debt(id).await? else {
            return Ok(None);
        };
        let bank = params.bank.unwrap_or(existing.bank);
        let proposal_number = params.proposal_number.unwrap_or(existing.proposal_number);
        let issued_on = params.issued_on.unwrap_or(existing.issued_on);
        let final_due_on = params.final_due_on.unwrap_or(existing.final_due_on);
        let interest_rate = params.interest_rate.unwrap_or(existing.interest_rate);
        let rate_basis = params.rate_basis.unwrap_or(existing.rate_basis);
        let grace_months = params.grace_months.unwrap_or(existing.grace_months);
        let principal = params.principal.unwrap_or(existing.principal);

        let mut client = self.client().await?;
        let tx = client.transaction().await?;
        let row = tx
            .query_one(
                "UPDATE debts
                 SET bank = $2, proposal_number = $3, issued_on = $4, final_due_on = $5,
                     interest_rate = $6, rate_basis = $7, grace_months = $8,
                     principal = $9, updated_at = NOW()
                 WHERE id = $1
                 RETURNING *",
                &[
                    &id,
                    &bank,
                    &proposal_number,
                    &issued_on,
                    &final_due_on,
                    &interest_rate,
                    &rate_basis.map(|b| b.as_str()),
                    &grace_months,
                    &principal,
                ],
            )
            .await?;
        if let Some(person_ids) = params.person_ids {
            tx.execute("DELETE FROM debt_people WHERE debt_id = $1", &[&id])
                .await?;
            for person_id in &person_ids {
                tx.execute(
                    "INSERT INTO debt_people (debt_id, person_id)
                     VALUES ($1, $2)
                     ON CONFLICT DO NOTHING",
                    &[&id, person_id],
                )
                .await?;
            }
        }
        tx.commit().await?;
        row_to_debt_record(&row).map(Some)
    }

    async fn delete_debt(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let client = self.client().await?;
        let count = client
            .execute("DELETE FROM debts WHERE id = $1", &[&id])
            .await?;
        Ok(count > 0)
    }

    async fn debt_people(&self, debt_id: Uuid) -> Result<Vec<PersonRecord>, DatabaseError> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT p.* FROM people p
                 JOIN debt_people dp ON dp.person_id = p.id
                 WHERE dp.debt_id = $1
                 ORDER BY p.name",
                &[&debt_id],
            )
            .await?;
        Ok(rows.iter().map(row_to_person_record).collect())
    }

    async fn create_installment(
        &self,
        debt_id: Uuid,
        params: CreateInstallment,
    ) -> Result<InstallmentRecord, DatabaseError> {
        let client = self.client().await?;
        let row = client
            .query_one(
                "INSERT INTO installments (id, debt_id, due_on, amount, notes)
                 VALUES ($1, $2, $3, $4, $5)
                 RETURNING *",
                &[
                    &Uuid::new_v4(),
                    &debt_id,
                    &params.due_on,
                    &params.amount,
                    &params.notes,
                ],
            )
            .await?;
        Ok(row_to_installment_record(&row))
    }

    async fn list_installments(
        &self,
        debt_id: Uuid,
    ) -> Result<Vec<InstallmentRecord>, DatabaseError> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT * FROM installments WHERE debt_id = $1 ORDER BY due_on",
                &[&debt_id],
            )
            .await?;
        Ok(rows.iter().map(row_to_installment_record).collect())
    }

    async fn update_installment(
        &self,
        id: Uuid,
        params: UpdateInstallment,
    ) -> Result<Option<InstallmentRecord>, DatabaseError> {
        let client = self.client().await?;
        let Some(row) = client
            .query_opt("SELECT * FROM installments WHERE id = $1", &[&id])
            .await?
        else {
            return Ok(None);
        };
        let existing = row_to_installment_record(&row);
        let due_on = params.due_on.unwrap_or(existing.due_on);
        let amount = params.amount.unwrap_or(existing.amount);
        let paid = params.paid.unwrap_or(existing.paid);
        let paid_on = params.paid_on.unwrap_or(existing.paid_on);
        let paid_amount = params.paid_amount.unwrap_or(existing.paid_amount);
        let notes = params.notes.unwrap_or(existing.notes);
        let row = client
            .query_one(
                "UPDATE installments
                 SET due_on = $2, amount = $3, paid = $4, paid_on = $5,
                     paid_amount = $6, notes = $7, updated_at = NOW()
                 WHERE id = $1
                 RETURNING *",
                &[&id, &due_on, &amount, &paid, &paid_on, &paid_amount, &notes],
            )
            .await?;
        Ok(Some(row_to_installment_record(&row)))
    }

    async fn delete_installment(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let client = self.client().await?;
        let count = client
            .execute("DELETE FROM installments WHERE id = $1", &[&id])
            .await?;
        Ok(count > 0)
    }

    async fn unpaid_total(&self, debt_id: Uuid) -> Result<Decimal, DatabaseError> {
        let client = self.client().await?;
        let row = client
            .query_one(
                "SELECT COALESCE(SUM(amount), 0)::NUMERIC(15, 2) AS total
                 FROM installments
                 WHERE debt_id = $1 AND NOT paid",
                &[&debt_id],
            )
            .await?;
        Ok(row.get("total"))
    }

    async fn upsert_debt_alert(
        &self,
        debt_id: Uuid,
        recipients: Vec<String>,
        active: bool,
    ) -> Result<DebtAlertRecord, DatabaseError> {
        let client = self.client().await?;
        let recipients_json = recipients_to_json(&parse_recipients(&recipients));
        let row = client
            .query_one(
                "INSERT INTO debt_alerts (debt_id, recipients, active)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (debt_id)
                 DO UPDATE SET recipients = $2, active = $3, updated_at = NOW()
                 RETURNING *",
                &[&debt_id, &recipients_json, &active],
            )
            .await?;
        row_to_debt_alert_record(&row)
    }

    async fn get_debt_alert(
        &self,
        debt_id: Uuid,
    ) -> Result<Option<DebtAlertRecord>, DatabaseError> {
        let client = self.client().await?;
        let row = client
            .query_opt("SELECT * FROM debt_alerts WHERE debt_id = $1", &[&debt_id])
            .await?;
        row.as_ref().map(row_to_debt_alert_record).transpose()
    }

    async fn list_debts_with_alerts_due_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(DebtRecord, DebtAlertRecord)>, DatabaseError> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT d.*, a.debt_id AS alert_debt_id, a.recipients AS alert_recipients,
                        a.active AS alert_active, a.updated_at AS alert_updated_at
                 FROM debts d
                 JOIN debt_alerts a ON a.debt_id = d.id AND a.active
                 WHERE d.final_due_on BETWEEN $1 AND $2
                 ORDER BY d.final_due_on",
                &[&start, &end],
            )
            .await?;
        rows.iter()
            .map(|row| {
                let debt = row_to_debt_record(row)?;
                let alert = DebtAlertRecord {
                    debt_id: row.get("alert_debt_id"),
                    recipients: json_to_recipients(row.get("alert_recipients"))?,
                    active: row.get("alert_active"),
                    updated_at: row.get("alert_updated_at"),
                };
                Ok((debt, alert))
            })
            .collect()
    }
}

#[async_trait]
impl DispatchStore for PgBackend {
    async fn record_dispatch(
        &self,
        dispatch: NewDispatch,
    ) -> Result<Option<DispatchRecord>, DatabaseError> {
        let client = self.client().await?;
        let recipients = recipients_to_json(&dispatch.recipients);
        // The partial unique index makes the insert a no-op when a
        // successful dispatch already covers this obligation/threshold.
        let row = client
            .query_opt(
                "INSERT INTO dispatches (id, obligation_kind, obligation_id,
                     threshold_days, recipients, success, error)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (obligation_kind, obligation_id, threshold_days)
                     WHERE success DO NOTHING
                 RETURNING *",
                &[
                    &Uuid::new_v4(),
                    &dispatch.obligation_kind.as_str(),
                    &dispatch.obligation_id,
                    &dispatch.threshold_days,
                    &recipients,
                    &dispatch.success,
                    &dispatch.error,
                ],
            )
            .await?;
        row.as_ref().map(row_to_dispatch_record).transpose()
    }

    async fn sent_thresholds(
        &self,
        kind: ObligationKind,
        obligation_id: Uuid,
    ) -> Result<Vec<i32>, DatabaseError> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT threshold_days FROM dispatches
                 WHERE obligation_kind = $1 AND obligation_id = $2 AND success",
                &[&kind.as_str(), &obligation_id],
            )
            .await?;
        Ok(rows.iter().map(|row| row.get("threshold_days")).collect())
    }

    async fn list_dispatches(
        &self,
        kind: ObligationKind,
        obligation_id: Uuid,
        limit: i64,
    ) -> Result<Vec<DispatchRecord>, DatabaseError> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT * FROM dispatches
                 WHERE obligation_kind = $1 AND obligation_id = $2
                 ORDER BY sent_at DESC
                 LIMIT $3",
                &[&kind.as_str(), &obligation_id, &limit],
            )
            .await?;
        rows.iter().map(row_to_dispatch_record).collect()
    }

    async fn prune_dispatches(&self, older_than: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let client = self.client().await?;
        let count = client
            .execute("DELETE FROM dispatches WHERE sent_at < $1", &[&older_than])
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl Database for PgBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let mut client = self.client().await?;
        embedded::migrations::runner()
            .run_async(&mut **client)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        Ok(())
    }
}
