use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, NaiveDate};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::middleware::session::AppState;
use crate::error::{AppError, Result};
use crate::models::DdsAssignment;
use crate::services::dds::{self, DdsOutcome, DdsToday};

const DEFAULT_HISTORY_DAYS: i64 = 30;
const MAX_HISTORY_DAYS: i64 = 366;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub member_id: Uuid,
    pub duty_date: NaiveDate,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AcceptRequest {
    pub member_id: Uuid,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub to_member_id: Uuid,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    pub notes: Option<String>,
}

/// Resolves an inclusive date range, defaulting to the last 30 days
fn history_range(
    today: NaiveDate,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<(NaiveDate, NaiveDate)> {
    let to = to.unwrap_or(today);
    let from = match from {
        Some(from) => from,
        None => to
            .checked_sub_signed(Duration::days(DEFAULT_HISTORY_DAYS))
            .ok_or_else(|| AppError::Validation(format!("Date {} is out of range", to)))?,
    };

    if from > to {
        return Err(AppError::Validation(
            "'from' must not be after 'to'".to_string(),
        ));
    }
    if (to - from).num_days() > MAX_HISTORY_DAYS {
        return Err(AppError::Validation(format!(
            "Range may span at most {} days",
            MAX_HISTORY_DAYS
        )));
    }

    Ok((from, to))
}

async fn today(State(state): State<AppState>) -> Result<Json<DdsToday>> {
    Ok(Json(dds::today(&state.pool, state.config.today()).await?))
}

async fn history(
    State(state): State<AppState>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<Vec<DdsAssignment>>> {
    let (from, to) = history_range(state.config.today(), params.from, params.to)?;
    Ok(Json(dds::history(&state.pool, from, to).await?))
}

async fn assign(
    State(state): State<AppState>,
    Json(req): Json<AssignRequest>,
) -> Result<(StatusCode, Json<DdsAssignment>)> {
    let assignment = dds::assign(
        &state.pool,
        &state.feed,
        state.config.today(),
        req.member_id,
        req.duty_date,
        req.notes.as_deref(),
    )
    .await?;

    Ok((StatusCode::CREATED, Json(assignment)))
}

async fn accept(
    State(state): State<AppState>,
    Json(req): Json<AcceptRequest>,
) -> Result<Json<DdsOutcome>> {
    let outcome = dds::accept(
        &state.pool,
        &state.feed,
        state.config.today(),
        req.member_id,
        req.notes.as_deref(),
    )
    .await?;

    Ok(Json(outcome))
}

/// Administrators may hand today's DDS on without being the DDS
async fn transfer(
    State(state): State<AppState>,
    Json(req): Json<TransferRequest>,
) -> Result<Json<DdsOutcome>> {
    let outcome = dds::transfer(
        &state.pool,
        &state.feed,
        state.config.today(),
        None,
        req.to_member_id,
        req.notes.as_deref(),
    )
    .await?;

    Ok(Json(outcome))
}

async fn release(
    State(state): State<AppState>,
    Json(req): Json<ReleaseRequest>,
) -> Result<Json<DdsOutcome>> {
    let outcome = dds::release(
        &state.pool,
        &state.feed,
        state.config.today(),
        None,
        req.notes.as_deref(),
    )
    .await?;

    Ok(Json(outcome))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/dds/today", get(today))
        .route("/api/dds/history", get(history))
        .route("/api/dds/assign", post(assign))
        .route("/api/dds/accept", post(accept))
        .route("/api/dds/transfer", post(transfer))
        .route("/api/dds/release", post(release))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, day).unwrap()
    }

    #[test]
    fn test_history_range_defaults() {
        let (from, to) = history_range(date(31), None, None).unwrap();
        assert_eq!(to, date(31));
        assert_eq!(from, date(1));

        let (from, to) = history_range(date(31), Some(date(10)), Some(date(12))).unwrap();
        assert_eq!((from, to), (date(10), date(12)));
    }

    #[test]
    fn test_history_range_rejects_bad_ranges() {
        assert!(history_range(date(31), Some(date(12)), Some(date(10))).is_err());
        assert!(history_range(
            date(31),
            Some(NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()),
            None
        )
        .is_err());
    }

    #[test]
    fn test_history_range_near_min_date() {
        assert!(matches!(
            history_range(date(31), None, Some(NaiveDate::MIN)),
            Err(AppError::Validation(_))
        ));
        assert!(history_range(date(31), Some(NaiveDate::MIN), Some(NaiveDate::MIN)).is_ok());
    }
}
