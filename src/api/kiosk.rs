//! Endpoints used by badge-scan terminals. Every route requires the shared
//! kiosk key; terminals may identify themselves with `X-Kiosk-Id`.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::middleware::{kiosk::kiosk_id, session::AppState};
use crate::api::required;
use crate::error::Result;
use crate::models::{lockup::LockupStatusView, BuildingStatus, LockupReason, Visitor};
use crate::services::attendance::{self, ScanResult};
use crate::services::dds::{self, DdsOutcome};
use crate::services::lockup::{self, ExecuteOutcome, TransferCommand};
use crate::services::visitors::{self, SignInRequest};

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub serial_number: String,
}

#[derive(Debug, Deserialize)]
pub struct KioskTransferRequest {
    pub from_member_id: Uuid,
    pub to_member_id: Uuid,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct KioskMemberRequest {
    pub member_id: Uuid,
    pub notes: Option<String>,
}

/// What a kiosk screen shows while idle
#[derive(Debug, Serialize)]
pub struct KioskPresence {
    pub member_count: usize,
    pub visitor_count: usize,
    pub building_status: BuildingStatus,
    pub lockup_holder: Option<String>,
    pub dds_member_id: Option<Uuid>,
}

impl From<attendance::Presence> for KioskPresence {
    fn from(presence: attendance::Presence) -> Self {
        Self {
            member_count: presence.member_count,
            visitor_count: presence.visitor_count,
            building_status: presence.lockup.building_status,
            lockup_holder: presence.lockup.holder_name,
            dds_member_id: presence.dds.map(|a| a.member_id),
        }
    }
}

async fn scan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ScanRequest>,
) -> Result<Json<ScanResult>> {
    let serial_number = required("serial_number", &req.serial_number)?;
    let kiosk = kiosk_id(&headers);

    let result = attendance::scan(
        &state.pool,
        &state.feed,
        state.config.today(),
        &serial_number,
        kiosk.as_deref(),
    )
    .await?;

    Ok(Json(result))
}

async fn sign_in_visitor(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SignInRequest>,
) -> Result<(StatusCode, Json<Visitor>)> {
    let kiosk = kiosk_id(&headers);
    let visitor = visitors::sign_in(&state.pool, &state.feed, req, kiosk.as_deref()).await?;

    Ok((StatusCode::CREATED, Json(visitor)))
}

async fn sign_out_visitor(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Visitor>> {
    Ok(Json(visitors::sign_out(&state.pool, &state.feed, id).await?))
}

async fn presence(State(state): State<AppState>) -> Result<Json<KioskPresence>> {
    let presence = attendance::presence(&state.pool, state.config.today()).await?;
    Ok(Json(presence.into()))
}

/// Holder hands lockup to another member at the kiosk
async fn transfer_lockup(
    State(state): State<AppState>,
    Json(req): Json<KioskTransferRequest>,
) -> Result<Json<LockupStatusView>> {
    let view = lockup::transfer(
        &state.pool,
        &state.feed,
        TransferCommand {
            from_member_id: Some(req.from_member_id),
            to_member_id: req.to_member_id,
            reason: LockupReason::Manual,
            notes: req.notes.as_deref(),
        },
    )
    .await?;

    Ok(Json(view))
}

/// Holder locks up the building on the way out
async fn execute_lockup(
    State(state): State<AppState>,
    Json(req): Json<KioskMemberRequest>,
) -> Result<Json<ExecuteOutcome>> {
    let outcome = lockup::execute(
        &state.pool,
        &state.feed,
        Some(req.member_id),
        false,
        req.notes.as_deref(),
    )
    .await?;

    Ok(Json(outcome))
}

async fn accept_dds(
    State(state): State<AppState>,
    Json(req): Json<KioskMemberRequest>,
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

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/kiosk/scan", post(scan))
        .route("/kiosk/visitors", post(sign_in_visitor))
        .route("/kiosk/visitors/:id/sign-out", post(sign_out_visitor))
        .route("/kiosk/presence", get(presence))
        .route("/kiosk/lockup/transfer", post(transfer_lockup))
        .route("/kiosk/lockup/execute", post(execute_lockup))
        .route("/kiosk/dds/accept", post(accept_dds))
}
