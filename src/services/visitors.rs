use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    visitor::CreateVisitorData, Badge, BadgeStatus, Event, LockupStatus, Member, Visitor,
};
use crate::services::attendance;
use crate::services::live::{LiveEvent, LiveFeed};

const MAX_NAME_LEN: usize = 200;

#[derive(thiserror::Error, Debug)]
pub enum VisitorError {
    #[error("{0}")]
    Invalid(String),

    #[error("Host member not found: {0}")]
    HostNotFound(Uuid),

    #[error("Host member {0} is not active")]
    HostInactive(Uuid),

    #[error("Event not found: {0}")]
    EventNotFound(Uuid),

    #[error("Event {0} is not accepting visitors")]
    EventClosed(Uuid),

    #[error("Badge not found: {0}")]
    BadgeNotFound(Uuid),

    #[error("Badge {0} cannot be issued to a visitor")]
    BadgeUnavailable(String),

    #[error("Visitor not found: {0}")]
    NotFound(Uuid),

    #[error("Visitor {0} has already signed out")]
    AlreadySignedOut(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<VisitorError> for AppError {
    fn from(error: VisitorError) -> Self {
        let message = error.to_string();
        match error {
            VisitorError::Invalid(_) | VisitorError::EventClosed(_) | VisitorError::HostInactive(_) => {
                AppError::Validation(message)
            }
            VisitorError::HostNotFound(_)
            | VisitorError::EventNotFound(_)
            | VisitorError::BadgeNotFound(_)
            | VisitorError::NotFound(_) => AppError::NotFound(message),
            VisitorError::BadgeUnavailable(_) | VisitorError::AlreadySignedOut(_) => {
                AppError::Conflict(message)
            }
            VisitorError::Database(e) => AppError::Database(e),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignInRequest {
    pub full_name: String,
    pub organization: Option<String>,
    pub visit_reason: Option<String>,
    pub host_member_id: Option<Uuid>,
    pub event_id: Option<Uuid>,
    pub badge_id: Option<Uuid>,
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Trims the request and rejects a missing or oversized name.
pub fn normalize(
    request: SignInRequest,
    kiosk_id: Option<&str>,
) -> Result<CreateVisitorData, VisitorError> {
    let full_name = request.full_name.trim().to_string();
    if full_name.is_empty() {
        return Err(VisitorError::Invalid("Visitor name is required".to_string()));
    }
    if full_name.chars().count() > MAX_NAME_LEN {
        return Err(VisitorError::Invalid(format!(
            "Visitor name must be at most {} characters",
            MAX_NAME_LEN
        )));
    }

    Ok(CreateVisitorData {
        full_name,
        organization: clean(request.organization),
        visit_reason: clean(request.visit_reason),
        host_member_id: request.host_member_id,
        event_id: request.event_id,
        badge_id: request.badge_id,
        kiosk_id: kiosk_id.map(str::to_string),
    })
}

/// Temporary visitor badges must be active and not tied to a member.
pub fn check_visitor_badge(badge: &Badge, in_use: bool) -> Result<(), VisitorError> {
    if badge.status != BadgeStatus::Active || badge.member_id.is_some() || in_use {
        return Err(VisitorError::BadgeUnavailable(badge.serial_number.clone()));
    }
    Ok(())
}

#[tracing::instrument(skip(pool, feed, request), fields(kiosk_id = ?kiosk_id))]
pub async fn sign_in(
    pool: &PgPool,
    feed: &LiveFeed,
    request: SignInRequest,
    kiosk_id: Option<&str>,
) -> Result<Visitor, VisitorError> {
    let data = normalize(request, kiosk_id)?;
    let now = Utc::now();

    let mut tx = pool.begin().await?;
    let current = LockupStatus::lock(&mut *tx).await?.snapshot();

    if let Some(host_id) = data.host_member_id {
        let host = Member::find_by_id(&mut *tx, host_id)
            .await?
            .ok_or(VisitorError::HostNotFound(host_id))?;
        if !host.is_active() {
            return Err(VisitorError::HostInactive(host_id));
        }
    }

    if let Some(event_id) = data.event_id {
        let event = Event::find_by_id(&mut *tx, event_id)
            .await?
            .ok_or(VisitorError::EventNotFound(event_id))?;
        if !event.accepts_visitors_at(now) {
            return Err(VisitorError::EventClosed(event_id));
        }
    }

    if let Some(badge_id) = data.badge_id {
        let badge = Badge::lock(&mut *tx, badge_id)
            .await?
            .ok_or(VisitorError::BadgeNotFound(badge_id))?;
        let in_use = Visitor::badge_in_use(&mut *tx, badge_id).await?;
        check_visitor_badge(&badge, in_use)?;
    }

    if let Some(next) = attendance::reopened(current) {
        LockupStatus::store(&mut *tx, next).await?;
    }

    let visitor = Visitor::create(&mut *tx, data).await?;
    tx.commit().await?;

    tracing::info!(visitor_id = %visitor.id, "Visitor signed in");

    feed.publish(LiveEvent::VisitorSignedIn {
        visitor_id: visitor.id,
        full_name: visitor.full_name.clone(),
        at: visitor.signed_in_at,
    });

    Ok(visitor)
}

pub async fn sign_out(pool: &PgPool, feed: &LiveFeed, id: Uuid) -> Result<Visitor, VisitorError> {
    let mut tx = pool.begin().await?;

    let visitor = Visitor::find_by_id(&mut *tx, id)
        .await?
        .ok_or(VisitorError::NotFound(id))?;
    if !visitor.is_signed_in() {
        return Err(VisitorError::AlreadySignedOut(id));
    }

    let visitor = Visitor::sign_out(&mut *tx, id).await?;
    tx.commit().await?;

    tracing::info!(visitor_id = %id, "Visitor signed out");

    feed.publish(LiveEvent::VisitorSignedOut {
        visitor_id: id,
        at: visitor.signed_out_at.unwrap_or_else(Utc::now),
    });

    Ok(visitor)
}

pub async fn list_current(pool: &PgPool) -> Result<Vec<Visitor>, VisitorError> {
    Ok(Visitor::list_current(pool).await?)
}

pub async fn list_between(
    pool: &PgPool,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<Visitor>, VisitorError> {
    if from >= to {
        return Err(VisitorError::Invalid(
            "Range start must be before its end".to_string(),
        ));
    }
    Ok(Visitor::list_between(pool, from, to).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str) -> SignInRequest {
        SignInRequest {
            full_name: name.to_string(),
            organization: Some("  ".to_string()),
            visit_reason: Some(" Band practice ".to_string()),
            host_member_id: None,
            event_id: None,
            badge_id: None,
        }
    }

    fn badge(status: BadgeStatus, member_id: Option<Uuid>) -> Badge {
        Badge {
            id: Uuid::new_v4(),
            serial_number: "V-007".to_string(),
            status,
            member_id,
            assigned_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_normalize_trims_fields() {
        let data = normalize(request("  Jane Visitor "), Some("kiosk-1")).unwrap();

        assert_eq!(data.full_name, "Jane Visitor");
        assert_eq!(data.organization, None);
        assert_eq!(data.visit_reason.as_deref(), Some("Band practice"));
        assert_eq!(data.kiosk_id.as_deref(), Some("kiosk-1"));
    }

    #[test]
    fn test_name_required() {
        assert!(matches!(
            normalize(request("   "), None),
            Err(VisitorError::Invalid(_))
        ));
        assert!(matches!(
            normalize(request(&"x".repeat(MAX_NAME_LEN + 1)), None),
            Err(VisitorError::Invalid(_))
        ));
    }

    #[test]
    fn test_visitor_badge_rules() {
        assert!(check_visitor_badge(&badge(BadgeStatus::Active, None), false).is_ok());
        assert!(check_visitor_badge(&badge(BadgeStatus::Active, None), true).is_err());
        assert!(check_visitor_badge(&badge(BadgeStatus::Lost, None), false).is_err());
        assert!(check_visitor_badge(&badge(BadgeStatus::Active, Some(Uuid::new_v4())), false).is_err());
    }

    #[test]
    fn test_already_signed_out_is_conflict() {
        use axum::http::StatusCode;
        use axum::response::IntoResponse;

        let error: AppError = VisitorError::AlreadySignedOut(Uuid::new_v4()).into();
        assert_eq!(error.into_response().status(), StatusCode::CONFLICT);
    }
}
