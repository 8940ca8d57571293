//! Bulk member import from CSV.
//!
//! A file is first classified row by row against the current roster
//! ([`preview`]); [`commit`] repeats the classification inside a transaction
//! and applies it only when every row is valid.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    member::{CreateMemberData, UpdateMemberData},
    Member, MemberType,
};

const REQUIRED_COLUMNS: [&str; 4] = ["service_number", "rank", "first_name", "last_name"];
const MAX_ROWS: usize = 5_000;

#[derive(thiserror::Error, Debug)]
pub enum ImportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Missing required column '{0}'")]
    MissingColumn(&'static str),

    #[error("The file contains no member rows")]
    Empty,

    #[error("The file has more than {0} rows")]
    TooManyRows(usize),

    #[error("{0} row(s) have errors; nothing was imported")]
    InvalidRows(usize),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<ImportError> for AppError {
    fn from(error: ImportError) -> Self {
        match error {
            ImportError::Database(e) => AppError::Database(e),
            other => AppError::Validation(other.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ImportRecord {
    service_number: String,
    rank: String,
    first_name: String,
    last_name: String,
    #[serde(default)]
    division: Option<String>,
    #[serde(default)]
    member_type: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

/// A validated CSV row. Blank optional columns leave existing values alone.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedMember {
    pub service_number: String,
    pub rank: String,
    pub first_name: String,
    pub last_name: String,
    pub division: Option<String>,
    pub member_type: Option<MemberType>,
    pub email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ParsedRow {
    pub line: u64,
    pub result: Result<ImportedMember, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RowAction {
    Create,
    Update { changes: Vec<&'static str> },
    Unchanged,
    Error { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewRow {
    pub line: u64,
    pub service_number: Option<String>,
    #[serde(flatten)]
    pub action: RowAction,
    #[serde(skip)]
    member: Option<ImportedMember>,
    #[serde(skip)]
    existing_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportCounts {
    pub create: usize,
    pub update: usize,
    pub unchanged: usize,
    pub error: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportPreview {
    pub counts: ImportCounts,
    pub rows: Vec<PreviewRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportResult {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn validate_record(record: ImportRecord) -> Result<ImportedMember, String> {
    let service_number = record.service_number.trim().to_uppercase();
    if service_number.is_empty() {
        return Err("service_number is required".to_string());
    }

    for (column, value) in [
        ("rank", &record.rank),
        ("first_name", &record.first_name),
        ("last_name", &record.last_name),
    ] {
        if value.trim().is_empty() {
            return Err(format!("{} is required", column));
        }
    }

    let member_type = match optional(record.member_type) {
        Some(raw) => Some(raw.parse::<MemberType>()?),
        None => None,
    };

    let email = optional(record.email);
    if let Some(email) = &email {
        if !email.contains('@') {
            return Err(format!("invalid email '{}'", email));
        }
    }

    Ok(ImportedMember {
        service_number,
        rank: record.rank.trim().to_string(),
        first_name: record.first_name.trim().to_string(),
        last_name: record.last_name.trim().to_string(),
        division: optional(record.division),
        member_type,
        email,
    })
}

/// Parses the CSV text. Malformed rows become row errors; a malformed header
/// fails the whole file.
pub fn parse(input: &str) -> Result<Vec<ParsedRow>, ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(input.as_bytes());

    let headers = reader.headers()?.clone();
    for column in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h.eq_ignore_ascii_case(column)) {
            return Err(ImportError::MissingColumn(column));
        }
    }
    let headers = csv::StringRecord::from(
        headers
            .iter()
            .map(|h| h.to_ascii_lowercase())
            .collect::<Vec<_>>(),
    );

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|field| field.is_empty()) {
            continue;
        }
        if rows.len() == MAX_ROWS {
            return Err(ImportError::TooManyRows(MAX_ROWS));
        }

        let line = record.position().map_or(0, |p| p.line());
        let result = record
            .deserialize::<ImportRecord>(Some(&headers))
            .map_err(|e| e.to_string())
            .and_then(validate_record);

        rows.push(ParsedRow { line, result });
    }

    if rows.is_empty() {
        return Err(ImportError::Empty);
    }

    Ok(rows)
}

fn changed_fields(existing: &Member, incoming: &ImportedMember) -> Vec<&'static str> {
    let mut changes = Vec::new();

    if existing.rank != incoming.rank {
        changes.push("rank");
    }
    if existing.first_name != incoming.first_name {
        changes.push("first_name");
    }
    if existing.last_name != incoming.last_name {
        changes.push("last_name");
    }
    if incoming.division.is_some() && existing.division != incoming.division {
        changes.push("division");
    }
    if incoming
        .member_type
        .is_some_and(|member_type| member_type != existing.member_type)
    {
        changes.push("member_type");
    }
    if incoming.email.is_some() && existing.email != incoming.email {
        changes.push("email");
    }

    changes
}

/// Classifies parsed rows against the existing members keyed by service number.
pub fn classify(rows: Vec<ParsedRow>, existing: &HashMap<String, Member>) -> ImportPreview {
    let mut seen = HashSet::new();
    let duplicates: HashSet<String> = rows
        .iter()
        .filter_map(|row| row.result.as_ref().ok())
        .filter(|member| !seen.insert(member.service_number.clone()))
        .map(|member| member.service_number.clone())
        .collect();

    let mut counts = ImportCounts::default();
    let rows = rows
        .into_iter()
        .map(|row| {
            let (service_number, action, member, existing_id) = match row.result {
                Err(message) => (None, RowAction::Error { message }, None, None),
                Ok(member) if duplicates.contains(&member.service_number) => (
                    Some(member.service_number.clone()),
                    RowAction::Error {
                        message: format!(
                            "service number {} appears more than once",
                            member.service_number
                        ),
                    },
                    None,
                    None,
                ),
                Ok(member) => {
                    let current = existing.get(&member.service_number);
                    let action = match current {
                        None => RowAction::Create,
                        Some(current) => {
                            let changes = changed_fields(current, &member);
                            if changes.is_empty() {
                                RowAction::Unchanged
                            } else {
                                RowAction::Update { changes }
                            }
                        }
                    };
                    (
                        Some(member.service_number.clone()),
                        action,
                        Some(member),
                        current.map(|m| m.id),
                    )
                }
            };

            match &action {
                RowAction::Create => counts.create += 1,
                RowAction::Update { .. } => counts.update += 1,
                RowAction::Unchanged => counts.unchanged += 1,
                RowAction::Error { .. } => counts.error += 1,
            }

            PreviewRow {
                line: row.line,
                service_number,
                action,
                member,
                existing_id,
            }
        })
        .collect();

    ImportPreview { counts, rows }
}

async fn load_existing<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    rows: &[ParsedRow],
) -> Result<HashMap<String, Member>, sqlx::Error> {
    let service_numbers: Vec<String> = rows
        .iter()
        .filter_map(|row| row.result.as_ref().ok())
        .map(|member| member.service_number.clone())
        .collect();

    let members = Member::find_by_service_numbers(executor, &service_numbers).await?;
    Ok(members
        .into_iter()
        .map(|m| (m.service_number.clone(), m))
        .collect())
}

pub async fn preview(pool: &PgPool, input: &str) -> Result<ImportPreview, ImportError> {
    let rows = parse(input)?;
    let existing = load_existing(pool, &rows).await?;
    Ok(classify(rows, &existing))
}

#[tracing::instrument(skip_all)]
pub async fn commit(pool: &PgPool, input: &str) -> Result<ImportResult, ImportError> {
    let rows = parse(input)?;

    let mut tx = pool.begin().await?;
    let existing = load_existing(&mut *tx, &rows).await?;
    let preview = classify(rows, &existing);

    if preview.counts.error > 0 {
        return Err(ImportError::InvalidRows(preview.counts.error));
    }

    for row in preview.rows {
        let Some(member) = row.member else {
            continue;
        };

        match (row.action, row.existing_id) {
            (RowAction::Create, _) => {
                Member::create(
                    &mut *tx,
                    CreateMemberData {
                        service_number: member.service_number,
                        rank: member.rank,
                        first_name: member.first_name,
                        last_name: member.last_name,
                        division: member.division,
                        member_type: member.member_type.unwrap_or(MemberType::Regular),
                        email: member.email,
                    },
                )
                .await?;
            }
            (RowAction::Update { .. }, Some(id)) => {
                Member::update(
                    &mut *tx,
                    id,
                    UpdateMemberData {
                        rank: Some(member.rank),
                        first_name: Some(member.first_name),
                        last_name: Some(member.last_name),
                        division: member.division,
                        member_type: member.member_type,
                        email: member.email,
                    },
                )
                .await?;
            }
            _ => {}
        }
    }

    tx.commit().await?;

    tracing::info!(
        created = preview.counts.create,
        updated = preview.counts.update,
        unchanged = preview.counts.unchanged,
        "Member import committed"
    );

    Ok(ImportResult {
        created: preview.counts.create,
        updated: preview.counts.update,
        unchanged: preview.counts.unchanged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MemberStatus;
    use chrono::Utc;

    const HEADER: &str = "service_number,rank,first_name,last_name,division,member_type,email\n";

    fn existing_member(service_number: &str) -> Member {
        Member {
            id: Uuid::new_v4(),
            service_number: service_number.to_string(),
            rank: "PO2".to_string(),
            first_name: "Alex".to_string(),
            last_name: "Tremblay".to_string(),
            division: Some("Operations".to_string()),
            member_type: MemberType::Reserve,
            email: None,
            status: MemberStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn roster(members: Vec<Member>) -> HashMap<String, Member> {
        members
            .into_iter()
            .map(|m| (m.service_number.clone(), m))
            .collect()
    }

    #[test]
    fn test_parse_valid_rows() {
        let input = format!(
            "{}A123,LS,Sam,Roy,Deck,reserve,sam@example.org\n b456 , AB , Kim , Lee ,,,\n",
            HEADER
        );
        let rows = parse(&input).unwrap();

        assert_eq!(rows.len(), 2);
        let second = rows[1].result.as_ref().unwrap();
        assert_eq!(second.service_number, "B456");
        assert_eq!(second.first_name, "Kim");
        assert_eq!(second.division, None);
        assert_eq!(second.member_type, None);
        assert_eq!(rows[1].line, 3);
    }

    #[test]
    fn test_parse_row_errors() {
        let input = format!("{},LS,Sam,Roy,,,\nA1,LS,,Roy,,,\nA2,LS,Sam,Roy,,pirate,\nA3,LS,Sam,Roy,,,nope\n", HEADER);
        let rows = parse(&input).unwrap();

        let errors: Vec<String> = rows
            .into_iter()
            .map(|row| row.result.unwrap_err())
            .collect();
        assert_eq!(errors[0], "service_number is required");
        assert_eq!(errors[1], "first_name is required");
        assert!(errors[2].contains("pirate"));
        assert!(errors[3].contains("invalid email"));
    }

    #[test]
    fn test_parse_rejects_bad_files() {
        assert!(matches!(
            parse("service_number,rank,first_name\nA1,LS,Sam\n"),
            Err(ImportError::MissingColumn("last_name"))
        ));
        assert!(matches!(parse(HEADER), Err(ImportError::Empty)));
        assert!(matches!(parse(&format!("{}\n,,,,,,\n", HEADER)), Err(ImportError::Empty)));
    }

    #[test]
    fn test_classify_rows() {
        let input = format!(
            "{}N1,LS,Sam,Roy,,,\nE1,PO2,Alex,Tremblay,,,\nE2,PO1,Alex,Tremblay,,cadet,\n",
            HEADER
        );
        let preview = classify(
            parse(&input).unwrap(),
            &roster(vec![existing_member("E1"), existing_member("E2")]),
        );

        assert_eq!(
            preview.counts,
            ImportCounts {
                create: 1,
                update: 1,
                unchanged: 1,
                error: 0
            }
        );
        assert_eq!(preview.rows[0].action, RowAction::Create);
        assert_eq!(preview.rows[1].action, RowAction::Unchanged);
        assert_eq!(
            preview.rows[2].action,
            RowAction::Update {
                changes: vec!["rank", "member_type"]
            }
        );
    }

    #[test]
    fn test_duplicates_within_file_are_errors() {
        let input = format!("{}D1,LS,Sam,Roy,,,\nd1,AB,Sam,Roy,,,\nD2,LS,Kim,Lee,,,\n", HEADER);
        let preview = classify(parse(&input).unwrap(), &HashMap::new());

        assert_eq!(preview.counts.error, 2);
        assert_eq!(preview.counts.create, 1);
        assert!(matches!(preview.rows[0].action, RowAction::Error { .. }));
        assert!(matches!(preview.rows[1].action, RowAction::Error { .. }));
    }

    #[test]
    fn test_preview_row_json() {
        let input = format!("{}E1,PO1,Alex,Tremblay,,,\n", HEADER);
        let preview = classify(parse(&input).unwrap(), &roster(vec![existing_member("E1")]));

        let json = serde_json::to_value(&preview.rows[0]).unwrap();
        assert_eq!(json["action"], "update");
        assert_eq!(json["changes"], serde_json::json!(["rank"]));
        assert_eq!(json["service_number"], "E1");
        assert!(json.get("member").is_none());
    }
}
