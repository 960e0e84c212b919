//! Cached organization model.
//!
//! Organizations are sourced from the CRM and mirrored locally so lookups
//! and search work independently of the remote API's availability. Rows are
//! created on first sync observation and updated on every later one; sync
//! never deletes them.

use crate::db::pool::DbPool;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A CRM organization mirrored in the local cache.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Organization {
    /// Remote-assigned UUID, immutable.
    pub uuid: String,

    /// Legal name.
    pub legal_name: String,

    /// English legal name variant.
    pub legal_name_en: Option<String>,

    /// French legal name variant.
    pub legal_name_fr: Option<String>,

    /// Alternate (display/trade) name.
    pub alternate_name: Option<String>,

    /// Free-text organization category (e.g. "company", "section").
    pub org_type: Option<String>,

    /// URL slug.
    pub slug: Option<String>,

    pub description: Option<String>,

    /// Identifying/registration number.
    pub identifying_number: Option<String>,

    /// Member head-count reported by the CRM.
    pub people_count: i64,

    /// Parent organization UUID, if any.
    pub parent_org_uuid: Option<String>,

    /// ISO 8601 creation timestamp from the CRM.
    pub remote_created_at: Option<String>,

    /// ISO 8601 update timestamp from the CRM.
    pub remote_updated_at: Option<String>,

    /// Unix timestamp of the last local sync of this row.
    pub synced_at: i64,
}

/// Whether an upsert inserted a new row or updated an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Look up an organization by UUID. A miss is `None`, not an error.
pub async fn get_organization(
    pool: &DbPool,
    uuid: &str,
) -> Result<Option<Organization>, sqlx::Error> {
    sqlx::query_as::<_, Organization>("SELECT * FROM organizations WHERE uuid = ?")
        .bind(uuid)
        .fetch_optional(pool)
        .await
}

/// Upsert an organization keyed by its remote UUID.
///
/// A full-attribute update on conflict, so re-applying identical input is
/// idempotent: the second call reports [`UpsertOutcome::Updated`] and leaves
/// the row byte-for-byte unchanged apart from `synced_at`.
pub async fn upsert_organization(
    pool: &DbPool,
    org: &Organization,
) -> Result<UpsertOutcome, sqlx::Error> {
    let existing: Option<(String,)> =
        sqlx::query_as("SELECT uuid FROM organizations WHERE uuid = ?")
            .bind(&org.uuid)
            .fetch_optional(pool)
            .await?;

    sqlx::query(
        r#"
        INSERT INTO organizations (
            uuid, legal_name, legal_name_en, legal_name_fr, alternate_name,
            org_type, slug, description, identifying_number, people_count,
            parent_org_uuid, remote_created_at, remote_updated_at, synced_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(uuid) DO UPDATE SET
            legal_name = excluded.legal_name,
            legal_name_en = excluded.legal_name_en,
            legal_name_fr = excluded.legal_name_fr,
            alternate_name = excluded.alternate_name,
            org_type = excluded.org_type,
            slug = excluded.slug,
            description = excluded.description,
            identifying_number = excluded.identifying_number,
            people_count = excluded.people_count,
            parent_org_uuid = excluded.parent_org_uuid,
            remote_created_at = excluded.remote_created_at,
            remote_updated_at = excluded.remote_updated_at,
            synced_at = excluded.synced_at
        "#,
    )
    .bind(&org.uuid)
    .bind(&org.legal_name)
    .bind(&org.legal_name_en)
    .bind(&org.legal_name_fr)
    .bind(&org.alternate_name)
    .bind(&org.org_type)
    .bind(&org.slug)
    .bind(&org.description)
    .bind(&org.identifying_number)
    .bind(org.people_count)
    .bind(&org.parent_org_uuid)
    .bind(&org.remote_created_at)
    .bind(&org.remote_updated_at)
    .bind(org.synced_at)
    .execute(pool)
    .await?;

    Ok(if existing.is_some() {
        UpsertOutcome::Updated
    } else {
        UpsertOutcome::Created
    })
}

/// Search organizations by name, case-insensitively.
///
/// Matches a substring of `legal_name` or `alternate_name`. An optional
/// `org_type` filter restricts the category (company search passes
/// `Some("company")`; section search passes `None`). Results are capped at
/// `limit` and ordered by legal name.
pub async fn search_organizations(
    pool: &DbPool,
    term: &str,
    org_type: Option<&str>,
    limit: i64,
) -> Result<Vec<Organization>, sqlx::Error> {
    let pattern = format!("%{}%", term);

    match org_type {
        Some(t) => {
            sqlx::query_as::<_, Organization>(
                r#"
                SELECT * FROM organizations
                WHERE (legal_name LIKE ? OR alternate_name LIKE ?)
                  AND org_type = ?
                ORDER BY legal_name
                LIMIT ?
                "#,
            )
            .bind(&pattern)
            .bind(&pattern)
            .bind(t)
            .bind(limit)
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query_as::<_, Organization>(
                r#"
                SELECT * FROM organizations
                WHERE legal_name LIKE ? OR alternate_name LIKE ?
                ORDER BY legal_name
                LIMIT ?
                "#,
            )
            .bind(&pattern)
            .bind(&pattern)
            .bind(limit)
            .fetch_all(pool)
            .await
        }
    }
}
