//! HTTP handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use uuid::Uuid;

use crate::cache::{Cache, CacheEntity};
use crate::db::{
    CreateDebt, CreateDocument, CreateFarm, CreateInstallment, CreatePerson, DebtAlertRecord,
    DebtRecord, DispatchRecord, DocumentRecord, FarmRecord, InstallmentRecord, ObligationKind,
    PersonRecord, UpdateDebt, UpdateDocument, UpdateFarm, UpdateInstallment, UpdatePerson,
};
use crate::notify::schedule::{upcoming, UpcomingReminder};
use crate::notify::{profile, RunSummary};

use super::types::{
    ApiError, DebtAlertBody, DeletedBody, HealthBody, HistoryQuery, SearchQuery,
};
use super::AppState;

const SEARCH_MIN_TERM_LEN: usize = 2;
const SEARCH_MAX_LIMIT: i64 = 50;
const HISTORY_DEFAULT_LIMIT: i64 = 50;

/// Character count, not byte length, so accented names are measured
/// the way users type them.
fn term_too_short(term: &str) -> bool {
    term.chars().count() < SEARCH_MIN_TERM_LEN
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok",
        cache_enabled: state.cache.is_enabled(),
    })
}

#[derive(serde::Serialize)]
pub struct StatsBody {
    pub cache: crate::cache::CacheStats,
    pub last_run: Option<RunSummary>,
}

pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsBody> {
    Json(StatsBody {
        cache: state.cache.stats(),
        last_run: *state.last_run.read().await,
    })
}

/// Trigger a notification pass outside the schedule.
pub async fn run_notifications(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RunSummary>, ApiError> {
    let summary = state.engine.run(Utc::now().date_naive()).await?;
    *state.last_run.write().await = Some(summary);
    state.cache.invalidate(CacheEntity::Notification).await;
    Ok(Json(summary))
}

// People

pub async fn list_people(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<PersonRecord>>, ApiError> {
    Ok(Json(state.store.list_people().await?))
}

pub async fn create_person(
    State(state): State<Arc<AppState>>,
    Json(params): Json<CreatePerson>,
) -> Result<Json<PersonRecord>, ApiError> {
    if params.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name must not be empty".to_string()));
    }
    let record = state.store.create_person(params).await?;
    state.cache.invalidate(CacheEntity::Person).await;
    Ok(Json(record))
}

pub async fn get_person(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<PersonRecord>, ApiError> {
    state
        .store
        .get_person(id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub async fn update_person(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(params): Json<UpdatePerson>,
) -> Result<Json<PersonRecord>, ApiError> {
    let record = state
        .store
        .update_person(id, params)
        .await?
        .ok_or(ApiError::NotFound)?;
    state.cache.invalidate(CacheEntity::Person).await;
    Ok(Json(record))
}

pub async fn delete_person(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeletedBody>, ApiError> {
    let deleted = state.store.delete_person(id).await?;
    if !deleted {
        return Err(ApiError::NotFound);
    }
    state.cache.invalidate(CacheEntity::Person).await;
    Ok(Json(DeletedBody { deleted }))
}

/// Cached person search. Terms shorter than two characters return an
/// empty page rather than scanning the whole table.
pub async fn search_people(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<PersonRecord>>, ApiError> {
    let term = query.term.trim();
    if term_too_short(term) {
        return Ok(Json(Vec::new()));
    }
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, SEARCH_MAX_LIMIT);
    let key = Cache::person_search_key(term, page, limit);
    if let Some(cached) = state.cache.get_json::<Vec<PersonRecord>>(&key).await {
        return Ok(Json(cached));
    }
    let results = state
        .store
        .search_people(term, (page - 1) * limit, limit)
        .await?;
    state.cache.set_json(&key, &results, None).await;
    Ok(Json(results))
}

// Farms

pub async fn list_farms(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<FarmRecord>>, ApiError> {
    Ok(Json(state.store.list_farms().await?))
}

pub async fn create_farm(
    State(state): State<Arc<AppState>>,
    Json(params): Json<CreateFarm>,
) -> Result<Json<FarmRecord>, ApiError> {
    let record = state.store.create_farm(params).await?;
    state.cache.invalidate(CacheEntity::Farm).await;
    Ok(Json(record))
}

pub async fn get_farm(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<FarmRecord>, ApiError> {
    state
        .store
        .get_farm(id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub async fn update_farm(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(params): Json<UpdateFarm>,
) -> Result<Json<FarmRecord>, ApiError> {
    let record = state
        .store
        .update_farm(id, params)
        .await?
        .ok_or(ApiError::NotFound)?;
    state.cache.invalidate(CacheEntity::Farm).await;
    Ok(Json(record))
}

pub async fn delete_farm(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeletedBody>, ApiError> {
    let deleted = state.store.delete_farm(id).await?;
    if !deleted {
        return Err(ApiError::NotFound);
    }
    state.cache.invalidate(CacheEntity::Farm).await;
    Ok(Json(DeletedBody { deleted }))
}

// Documents

pub async fn list_documents(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<DocumentRecord>>, ApiError> {
    Ok(Json(state.store.list_documents().await?))
}

pub async fn create_document(
    State(state): State<Arc<AppState>>,
    Json(params): Json<CreateDocument>,
) -> Result<Json<DocumentRecord>, ApiError> {
    let record = state.store.create_document(params).await?;
    state.cache.invalidate(CacheEntity::Document).await;
    Ok(Json(record))
}

pub async fn get_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DocumentRecord>, ApiError> {
    state
        .store
        .get_document(id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub async fn update_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(params): Json<UpdateDocument>,
) -> Result<Json<DocumentRecord>, ApiError> {
    let record = state
        .store
        .update_document(id, params)
        .await?
        .ok_or(ApiError::NotFound)?;
    state.cache.invalidate(CacheEntity::Document).await;
    Ok(Json(record))
}

pub async fn delete_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeletedBody>, ApiError> {
    let deleted = state.store.delete_document(id).await?;
    if !deleted {
        return Err(ApiError::NotFound);
    }
    state.cache.invalidate(CacheEntity::Document).await;
    Ok(Json(DeletedBody { deleted }))
}

pub async fn document_upcoming(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<UpcomingReminder>>, ApiError> {
    let document = state
        .store
        .get_document(id)
        .await?
        .ok_or(ApiError::NotFound)?;
    let Some(expires_on) = document.expires_on else {
        return Ok(Json(Vec::new()));
    };
    let thresholds: Vec<i32> = match &document.lead_times {
        Some(days) => days.clone(),
        None => profile::document_thresholds(document.kind)
            .map_err(ApiError::Internal)?
            .to_vec(),
    };
    let already = state
        .store
        .sent_thresholds(ObligationKind::Document, id)
        .await?;
    Ok(Json(upcoming(
        expires_on,
        Utc::now().date_naive(),
        &thresholds,
        &already,
    )))
}

// Debts

pub async fn list_debts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<DebtRecord>>, ApiError> {
    Ok(Json(state.store.list_debts().await?))
}

pub async fn create_debt(
    State(state): State<Arc<AppState>>,
    Json(params): Json<CreateDebt>,
) -> Result<Json<DebtRecord>, ApiError> {
    let record = state.store.create_debt(params).await?;
    state.cache.invalidate(CacheEntity::Debt).await;
    Ok(Json(record))
}

pub async fn get_debt(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DebtRecord>, ApiError> {
    state
        .store
        .get_debt(id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub async fn update_debt(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(params): Json<UpdateDebt>,
) -> Result<Json<DebtRecord>, ApiError> {
    let record = state
        .store
        .update_debt(id, params)
        .await?
        .ok_or(ApiError::NotFound)?;
    state.cache.invalidate(CacheEntity::Debt).await;
    Ok(Json(record))
}

pub async fn delete_debt(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeletedBody>, ApiError> {
    let deleted = state.store.delete_debt(id).await?;
    if !deleted {
        return Err(ApiError::NotFound);
    }
    state.cache.invalidate(CacheEntity::Debt).await;
    Ok(Json(DeletedBody { deleted }))
}

pub async fn debt_people(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<PersonRecord>>, ApiError> {
    if state.store.get_debt(id).await?.is_none() {
        return Err(ApiError::NotFound);
    }
    Ok(Json(state.store.debt_people(id).await?))
}

pub async fn list_installments(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<InstallmentRecord>>, ApiError> {
    if state.store.get_debt(id).await?.is_none() {
        return Err(ApiError::NotFound);
    }
    Ok(Json(state.store.list_installments(id).await?))
}

pub async fn create_installment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(params): Json<CreateInstallment>,
) -> Result<Json<InstallmentRecord>, ApiError> {
    if state.store.get_debt(id).await?.is_none() {
        return Err(ApiError::NotFound);
    }
    let record = state.store.create_installment(id, params).await?;
    state.cache.invalidate(CacheEntity::Debt).await;
    Ok(Json(record))
}

pub async fn update_installment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(params): Json<UpdateInstallment>,
) -> Result<Json<InstallmentRecord>, ApiError> {
    let record = state
        .store
        .update_installment(id, params)
        .await?
        .ok_or(ApiError::NotFound)?;
    state.cache.invalidate(CacheEntity::Debt).await;
    Ok(Json(record))
}

pub async fn delete_installment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeletedBody>, ApiError> {
    let deleted = state.store.delete_installment(id).await?;
    if !deleted {
        return Err(ApiError::NotFound);
    }
    state.cache.invalidate(CacheEntity::Debt).await;
    Ok(Json(DeletedBody { deleted }))
}

pub async fn get_debt_alert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DebtAlertRecord>, ApiError> {
    state
        .store
        .get_debt_alert(id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub async fn put_debt_alert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<DebtAlertBody>,
) -> Result<Json<DebtAlertRecord>, ApiError> {
    if state.store.get_debt(id).await?.is_none() {
        return Err(ApiError::NotFound);
    }
    let record = state
        .store
        .upsert_debt_alert(id, body.recipients, body.active)
        .await?;
    state.cache.invalidate(CacheEntity::Notification).await;
    Ok(Json(record))
}

pub async fn debt_upcoming(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<UpcomingReminder>>, ApiError> {
    let debt = state.store.get_debt(id).await?.ok_or(ApiError::NotFound)?;
    let thresholds = profile::debt_thresholds().map_err(ApiError::Internal)?;
    let already = state.store.sent_thresholds(ObligationKind::Debt, id).await?;
    Ok(Json(upcoming(
        debt.final_due_on,
        Utc::now().date_naive(),
        thresholds,
        &already,
    )))
}

// Dispatch history

pub async fn dispatch_history(
    State(state): State<Arc<AppState>>,
    Path((kind, id)): Path<(String, Uuid)>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<DispatchRecord>>, ApiError> {
    let kind = ObligationKind::from_db_value(&kind)
        .map_err(|_| ApiError::BadRequest(format!("unknown obligation kind '{kind}'")))?;
    let limit = query.limit.unwrap_or(HISTORY_DEFAULT_LIMIT).clamp(1, 500);
    Ok(Json(state.store.list_dispatches(kind, id, limit).await?))
}

#[cfg(test)]
mod tests {
    use super::term_too_short;

    #[test]
    fn search_minimum_counts_characters_not_bytes() {
        assert!(term_too_short(""));
        assert!(term_too_short("a"));
        // One accented character is two bytes but still one character.
        assert!(term_too_short("é"));
        assert!(!term_too_short("éa"));
        assert!(!term_too_short("ab"));
    }
}
