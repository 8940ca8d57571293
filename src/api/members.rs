use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::middleware::session::AppState;
use crate::api::{conflict_on_unique, page_bounds, required};
use crate::error::{AppError, Result};
use crate::models::{
    member::{CreateMemberData, MemberFilter, UpdateMemberData},
    Badge, Checkin, CheckoutMethod, LockupStatus, Member, MemberQualification, MemberStatus,
    MemberType, QualificationType,
};
use crate::services::live::LiveEvent;

#[derive(Debug, Deserialize)]
pub struct ListMembersQuery {
    pub status: Option<MemberStatus>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateMemberRequest {
    pub service_number: String,
    pub rank: String,
    pub first_name: String,
    pub last_name: String,
    pub division: Option<String>,
    pub member_type: Option<MemberType>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMemberRequest {
    pub rank: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub division: Option<String>,
    pub member_type: Option<MemberType>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GrantQualificationRequest {
    pub qualification_type_id: Uuid,
    pub expires_at: Option<DateTime<Utc>>,
}

fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Rejects blank values for fields that are present in an update
fn not_blank(field: &str, value: Option<String>) -> Result<Option<String>> {
    value.map(|v| required(field, &v)).transpose()
}

async fn list_members(
    State(state): State<AppState>,
    Query(params): Query<ListMembersQuery>,
) -> Result<Json<Vec<Member>>> {
    let (limit, offset) = page_bounds(params.limit, params.offset);
    let filter = MemberFilter {
        status: params.status,
        search: optional_text(params.search),
        limit,
        offset,
    };

    Ok(Json(Member::list(&state.pool, &filter).await?))
}

async fn create_member(
    State(state): State<AppState>,
    Json(req): Json<CreateMemberRequest>,
) -> Result<(StatusCode, Json<Member>)> {
    let data = CreateMemberData {
        service_number: required("service_number", &req.service_number)?.to_uppercase(),
        rank: required("rank", &req.rank)?,
        first_name: required("first_name", &req.first_name)?,
        last_name: required("last_name", &req.last_name)?,
        division: optional_text(req.division),
        member_type: req.member_type.unwrap_or(MemberType::Regular),
        email: optional_text(req.email),
    };

    let member = Member::create(&state.pool, data)
        .await
        .map_err(|e| conflict_on_unique(e, "A member with this service number already exists"))?;

    tracing::info!(
        member_id = %member.id,
        service_number = %member.service_number,
        "Member created"
    );

    Ok((StatusCode::CREATED, Json(member)))
}

async fn get_member(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Member>> {
    let member = Member::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Member {}", id)))?;

    Ok(Json(member))
}

async fn update_member(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateMemberRequest>,
) -> Result<Json<Member>> {
    let data = UpdateMemberData {
        rank: not_blank("rank", req.rank)?,
        first_name: not_blank("first_name", req.first_name)?,
        last_name: not_blank("last_name", req.last_name)?,
        division: optional_text(req.division),
        member_type: req.member_type,
        email: optional_text(req.email),
    };

    let member = Member::update(&state.pool, id, data)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Member {}", id)))?;

    tracing::info!(member_id = %member.id, "Member updated");

    Ok(Json(member))
}

/// Deactivates a member, unassigning their badge and closing any open visit
async fn deactivate_member(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Member>> {
    let mut tx = state.pool.begin().await?;

    let current = LockupStatus::lock(&mut *tx).await?.snapshot();
    let member = Member::find_by_id(&mut *tx, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Member {}", id)))?;

    if current.is_held_by(id) {
        return Err(AppError::Conflict(
            "Member holds lockup; transfer or execute lockup first".to_string(),
        ));
    }

    let badges = Badge::unassign_member(&mut *tx, id).await?;
    let open = Checkin::find_open_for_member(&mut *tx, id).await?;
    if let Some(open) = &open {
        Checkin::close(&mut *tx, open.id, CheckoutMethod::Admin).await?;
    }
    Member::set_status(&mut *tx, id, MemberStatus::Inactive).await?;

    tx.commit().await?;

    tracing::info!(
        member_id = %id,
        badges_unassigned = badges,
        checked_out = open.is_some(),
        "Member deactivated"
    );

    if open.is_some() {
        state.feed.publish(LiveEvent::CheckedOut {
            member: member.summary(),
            at: Utc::now(),
        });
    }

    let member = Member {
        status: MemberStatus::Inactive,
        ..member
    };
    Ok(Json(member))
}

async fn list_qualifications(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<MemberQualification>>> {
    Member::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Member {}", id)))?;

    Ok(Json(MemberQualification::list_for_member(&state.pool, id).await?))
}

async fn grant_qualification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<GrantQualificationRequest>,
) -> Result<(StatusCode, Json<MemberQualification>)> {
    Member::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Member {}", id)))?;
    QualificationType::find_by_id(&state.pool, req.qualification_type_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("Qualification type {}", req.qualification_type_id))
        })?;

    if req.expires_at.is_some_and(|expires_at| expires_at <= Utc::now()) {
        return Err(AppError::Validation(
            "Expiry must be in the future".to_string(),
        ));
    }

    let granted =
        MemberQualification::grant(&state.pool, id, req.qualification_type_id, req.expires_at)
            .await?;

    tracing::info!(
        member_id = %id,
        qualification = %granted.code,
        expires_at = ?granted.expires_at,
        "Qualification granted"
    );

    Ok((StatusCode::CREATED, Json(granted)))
}

async fn revoke_qualification(
    State(state): State<AppState>,
    Path((id, type_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode> {
    if !MemberQualification::revoke(&state.pool, id, type_id).await? {
        return Err(AppError::NotFound(
            "Member does not hold this qualification".to_string(),
        ));
    }

    tracing::info!(member_id = %id, qualification_type_id = %type_id, "Qualification revoked");

    Ok(StatusCode::NO_CONTENT)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/members", get(list_members).post(create_member))
        .route("/api/members/:id", get(get_member).patch(update_member))
        .route("/api/members/:id/deactivate", post(deactivate_member))
        .route(
            "/api/members/:id/qualifications",
            get(list_qualifications).post(grant_qualification),
        )
        .route(
            "/api/members/:id/qualifications/:type_id",
            delete(revoke_qualification),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_blank() {
        assert_eq!(not_blank("rank", None).unwrap(), None);
        assert_eq!(
            not_blank("rank", Some(" PO1 ".to_string())).unwrap(),
            Some("PO1".to_string())
        );
        assert!(matches!(
            not_blank("rank", Some("  ".to_string())),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_list_query_parses_filters() {
        let query: ListMembersQuery =
            serde_json::from_value(serde_json::json!({ "status": "inactive", "search": "roy" }))
                .unwrap();

        assert_eq!(query.status, Some(MemberStatus::Inactive));
        assert_eq!(query.search.as_deref(), Some("roy"));
        assert_eq!(query.limit, None);
    }

    mod db {
        use super::*;
        use crate::config::test_config;
        use crate::models::{qualification::CreateQualificationTypeData, LockupReason};
        use crate::services::{live::LiveFeed, lockup};
        use sqlx::PgPool;

        fn state(pool: PgPool) -> AppState {
            AppState {
                pool,
                config: test_config(),
                feed: LiveFeed::default(),
            }
        }

        async fn lockup_holder(state: &AppState) -> Member {
            let (_, Json(member)) = create_member(
                State(state.clone()),
                Json(CreateMemberRequest {
                    service_number: "sn-1001".to_string(),
                    rank: "PO1".to_string(),
                    first_name: "Sam".to_string(),
                    last_name: "Roy".to_string(),
                    division: None,
                    member_type: None,
                    email: None,
                }),
            )
            .await
            .unwrap();

            let qualification = QualificationType::create(
                &state.pool,
                CreateQualificationTypeData {
                    code: "BLDG_SEC".to_string(),
                    name: "Building Security".to_string(),
                    description: None,
                    grants_lockup: true,
                },
            )
            .await
            .unwrap();
            MemberQualification::grant(&state.pool, member.id, qualification.id, None)
                .await
                .unwrap();

            let badge = Badge::create(&state.pool, "B-1001").await.unwrap();
            Badge::assign(&state.pool, badge.id, member.id).await.unwrap();
            Checkin::create(&state.pool, member.id, Some(badge.id), None)
                .await
                .unwrap();
            lockup::acquire(&state.pool, &state.feed, member.id, LockupReason::Manual, None)
                .await
                .unwrap();

            member
        }

        #[sqlx::test(migrations = "./migrations")]
        #[ignore]
        async fn test_deactivate_refused_while_holding_lockup(pool: PgPool) {
            let state = state(pool);
            let member = lockup_holder(&state).await;
            assert_eq!(member.service_number, "SN-1001");

            let err = deactivate_member(State(state.clone()), Path(member.id))
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::Conflict(_)));

            let unchanged = Member::find_by_id(&state.pool, member.id).await.unwrap().unwrap();
            assert_eq!(unchanged.status, MemberStatus::Active);

            lockup::execute(&state.pool, &state.feed, Some(member.id), false, None)
                .await
                .unwrap();

            let Json(deactivated) = deactivate_member(State(state.clone()), Path(member.id))
                .await
                .unwrap();
            assert_eq!(deactivated.status, MemberStatus::Inactive);

            let badge = Badge::find_by_serial(&state.pool, "B-1001").await.unwrap().unwrap();
            assert_eq!(badge.member_id, None);
        }
    }
}
