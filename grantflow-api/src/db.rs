//! Database Connection Pool Module
//!
//! PostgreSQL connection pooling using deadpool-postgres and the
//! [`GrantStore`] implementation backed by it.
//!
//! Tenant scoping happens in SQL. Every scoped statement takes the caller's
//! organization as a nullable parameter and filters with
//! `($n::uuid IS NULL OR org_id = $n)`, so service access sees every row.
//! Statements that touch more than one row run inside one transaction.

use crate::error::{ApiError, ApiResult};
use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use grantflow_core::{
    checklist_completion, new_entity_id, now, Award, Budget, BudgetLineItem, BudgetPatch,
    ChecklistItem, Document, DocumentPatch, EntityId, EntityKind, EnumParseError, Funder,
    FunderPatch, Grant, GrantPatch, GrantStage, GrantflowError, GrantflowResult, LineItemPatch,
    Narrative, NarrativePatch, Organization, OrganizationPatch, Profile, Proposal, ProposalPatch,
    ProposalSection, Report, ReportPatch, SectionPatch, StorageError, Submission,
    SubmissionChecklist, WorkflowExecution, WorkflowUpdate,
};
use grantflow_storage::{Access, GrantStore, TemplateCopy, WorkflowFilter};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;
use tokio_postgres::{
    error::SqlState,
    types::{FromSql, ToSql},
    GenericClient, NoTls, Row,
};

/// Schema applied by [`PgStore::run_migrations`].
pub const SCHEMA: &str = include_str!("../migrations/0001_init.sql");

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection wait timeout
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "grantflow".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("GRANTFLOW_DB_HOST").unwrap_or(defaults.host),
            port: std::env::var("GRANTFLOW_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            dbname: std::env::var("GRANTFLOW_DB_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("GRANTFLOW_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("GRANTFLOW_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("GRANTFLOW_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_size),
            timeout: std::env::var("GRANTFLOW_DB_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_cfg = deadpool_postgres::PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_cfg);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::database_error(format!("Failed to create pool: {}", e)))
    }
}

// ============================================================================
// ERROR MAPPING
// ============================================================================

fn query_err(e: tokio_postgres::Error) -> GrantflowError {
    StorageError::QueryFailed {
        reason: e.to_string(),
    }
    .into()
}

fn tx_err(e: tokio_postgres::Error) -> GrantflowError {
    StorageError::TransactionFailed {
        reason: e.to_string(),
    }
    .into()
}

/// Constraint violations become `InsertFailed`; a unique violation keeps the
/// "duplicate key" wording the API maps to 409.
fn write_err(entity: EntityKind, e: tokio_postgres::Error) -> GrantflowError {
    let violated = e.code().map_or(false, |code| {
        *code == SqlState::UNIQUE_VIOLATION
            || *code == SqlState::FOREIGN_KEY_VIOLATION
            || *code == SqlState::CHECK_VIOLATION
    });
    if !violated {
        return query_err(e);
    }
    let reason = e
        .as_db_error()
        .map(|db| db.message().to_string())
        .unwrap_or_else(|| e.to_string());
    StorageError::InsertFailed { entity, reason }.into()
}

fn corrupt(entity: EntityKind, reason: impl Into<String>) -> GrantflowError {
    StorageError::CorruptRow {
        entity,
        reason: reason.into(),
    }
    .into()
}

// ============================================================================
// ROW DECODING
// ============================================================================

fn col<'a, T: FromSql<'a>>(row: &'a Row, entity: EntityKind, name: &str) -> GrantflowResult<T> {
    row.try_get(name)
        .map_err(|e| corrupt(entity, format!("column {name}: {e}")))
}

fn enum_col<E>(row: &Row, entity: EntityKind, name: &str) -> GrantflowResult<E>
where
    E: FromStr<Err = EnumParseError>,
{
    let raw: String = col(row, entity, name)?;
    raw.parse().map_err(|e: EnumParseError| corrupt(entity, e.to_string()))
}

fn opt_enum_col<E>(row: &Row, entity: EntityKind, name: &str) -> GrantflowResult<Option<E>>
where
    E: FromStr<Err = EnumParseError>,
{
    let raw: Option<String> = col(row, entity, name)?;
    raw.map(|s| s.parse().map_err(|e: EnumParseError| corrupt(entity, e.to_string())))
        .transpose()
}

/// A row type with a fixed column list.
trait PgRow: Sized {
    const KIND: EntityKind;
    const COLUMNS: &'static str;
    /// Column holding the owning organization.
    const ORG_COLUMN: &'static str = "org_id";

    fn from_row(row: &Row) -> GrantflowResult<Self>;
}

impl PgRow for Organization {
    const KIND: EntityKind = EntityKind::Organization;
    const COLUMNS: &'static str = "id, name, ein, mission, created_at, updated_at";
    const ORG_COLUMN: &'static str = "id";

    fn from_row(row: &Row) -> GrantflowResult<Self> {
        let k = Self::KIND;
        Ok(Self {
            id: col(row, k, "id")?,
            name: col(row, k, "name")?,
            ein: col(row, k, "ein")?,
            mission: col(row, k, "mission")?,
            created_at: col(row, k, "created_at")?,
            updated_at: col(row, k, "updated_at")?,
        })
    }
}

impl PgRow for Profile {
    const KIND: EntityKind = EntityKind::Profile;
    const COLUMNS: &'static str = "id, org_id, email, full_name, role, created_at";

    fn from_row(row: &Row) -> GrantflowResult<Self> {
        let k = Self::KIND;
        Ok(Self {
            id: col(row, k, "id")?,
            org_id: col(row, k, "org_id")?,
            email: col(row, k, "email")?,
            full_name: col(row, k, "full_name")?,
            role: enum_col(row, k, "role")?,
            created_at: col(row, k, "created_at")?,
        })
    }
}

impl PgRow for Grant {
    const KIND: EntityKind = EntityKind::Grant;
    const COLUMNS: &'static str = "id, org_id, funder_id, title, funder_name, description, \
        amount_requested, deadline, stage, eligibility_score, eligibility_notes, source_url, \
        metadata, created_at, updated_at";

    fn from_row(row: &Row) -> GrantflowResult<Self> {
        let k = Self::KIND;
        Ok(Self {
            id: col(row, k, "id")?,
            org_id: col(row, k, "org_id")?,
            funder_id: col(row, k, "funder_id")?,
            title: col(row, k, "title")?,
            funder_name: col(row, k, "funder_name")?,
            description: col(row, k, "description")?,
            amount_requested: col(row, k, "amount_requested")?,
            deadline: col(row, k, "deadline")?,
            stage: enum_col(row, k, "stage")?,
            eligibility_score: col(row, k, "eligibility_score")?,
            eligibility_notes: col(row, k, "eligibility_notes")?,
            source_url: col(row, k, "source_url")?,
            metadata: col(row, k, "metadata")?,
            created_at: col(row, k, "created_at")?,
            updated_at: col(row, k, "updated_at")?,
        })
    }
}

impl PgRow for Funder {
    const KIND: EntityKind = EntityKind::Funder;
    const COLUMNS: &'static str =
        "id, org_id, name, website, focus_areas, analysis, created_at, updated_at";

    fn from_row(row: &Row) -> GrantflowResult<Self> {
        let k = Self::KIND;
        Ok(Self {
            id: col(row, k, "id")?,
            org_id: col(row, k, "org_id")?,
            name: col(row, k, "name")?,
            website: col(row, k, "website")?,
            focus_areas: col(row, k, "focus_areas")?,
            analysis: col(row, k, "analysis")?,
            created_at: col(row, k, "created_at")?,
            updated_at: col(row, k, "updated_at")?,
        })
    }
}

impl PgRow for Proposal {
    const KIND: EntityKind = EntityKind::Proposal;
    const COLUMNS: &'static str = "id, org_id, grant_id, title, status, quality_score, \
        quality_feedback, created_at, updated_at";

    fn from_row(row: &Row) -> GrantflowResult<Self> {
        let k = Self::KIND;
        Ok(Self {
            id: col(row, k, "id")?,
            org_id: col(row, k, "org_id")?,
            grant_id: col(row, k, "grant_id")?,
            title: col(row, k, "title")?,
            status: enum_col(row, k, "status")?,
            quality_score: col(row, k, "quality_score")?,
            quality_feedback: col(row, k, "quality_feedback")?,
            created_at: col(row, k, "created_at")?,
            updated_at: col(row, k, "updated_at")?,
        })
    }
}

/// Section columns qualified for the join with `proposals p`.
const SECTION_COLUMNS_S: &str =
    "s.id, s.proposal_id, s.title, s.content, s.sort_order, s.created_at, s.updated_at";

impl PgRow for ProposalSection {
    const KIND: EntityKind = EntityKind::ProposalSection;
    const COLUMNS: &'static str =
        "id, proposal_id, title, content, sort_order, created_at, updated_at";

    fn from_row(row: &Row) -> GrantflowResult<Self> {
        let k = Self::KIND;
        Ok(Self {
            id: col(row, k, "id")?,
            proposal_id: col(row, k, "proposal_id")?,
            title: col(row, k, "title")?,
            content: col(row, k, "content")?,
            sort_order: col(row, k, "sort_order")?,
            created_at: col(row, k, "created_at")?,
            updated_at: col(row, k, "updated_at")?,
        })
    }
}

impl PgRow for Budget {
    const KIND: EntityKind = EntityKind::Budget;
    const COLUMNS: &'static str = "id, org_id, grant_id, name, total_amount, narrative, \
        is_template, created_at, updated_at";

    fn from_row(row: &Row) -> GrantflowResult<Self> {
        let k = Self::KIND;
        Ok(Self {
            id: col(row, k, "id")?,
            org_id: col(row, k, "org_id")?,
            grant_id: col(row, k, "grant_id")?,
            name: col(row, k, "name")?,
            total_amount: col(row, k, "total_amount")?,
            narrative: col(row, k, "narrative")?,
            is_template: col(row, k, "is_template")?,
            created_at: col(row, k, "created_at")?,
            updated_at: col(row, k, "updated_at")?,
        })
    }
}

/// Line item columns qualified for the join with `budgets b`.
const LINE_ITEM_COLUMNS_I: &str =
    "i.id, i.budget_id, i.category, i.description, i.amount, i.created_at";

impl PgRow for BudgetLineItem {
    const KIND: EntityKind = EntityKind::BudgetLineItem;
    const COLUMNS: &'static str = "id, budget_id, category, description, amount, created_at";

    fn from_row(row: &Row) -> GrantflowResult<Self> {
        let k = Self::KIND;
        Ok(Self {
            id: col(row, k, "id")?,
            budget_id: col(row, k, "budget_id")?,
            category: col(row, k, "category")?,
            description: col(row, k, "description")?,
            amount: col(row, k, "amount")?,
            created_at: col(row, k, "created_at")?,
        })
    }
}

impl PgRow for Award {
    const KIND: EntityKind = EntityKind::Award;
    const COLUMNS: &'static str =
        "id, org_id, grant_id, amount, start_date, end_date, terms, created_at";

    fn from_row(row: &Row) -> GrantflowResult<Self> {
        let k = Self::KIND;
        Ok(Self {
            id: col(row, k, "id")?,
            org_id: col(row, k, "org_id")?,
            grant_id: col(row, k, "grant_id")?,
            amount: col(row, k, "amount")?,
            start_date: col(row, k, "start_date")?,
            end_date: col(row, k, "end_date")?,
            terms: col(row, k, "terms")?,
            created_at: col(row, k, "created_at")?,
        })
    }
}

impl PgRow for Report {
    const KIND: EntityKind = EntityKind::Report;
    const COLUMNS: &'static str =
        "id, org_id, award_id, title, due_date, status, content, created_at, updated_at";

    fn from_row(row: &Row) -> GrantflowResult<Self> {
        let k = Self::KIND;
        Ok(Self {
            id: col(row, k, "id")?,
            org_id: col(row, k, "org_id")?,
            award_id: col(row, k, "award_id")?,
            title: col(row, k, "title")?,
            due_date: col(row, k, "due_date")?,
            status: enum_col(row, k, "status")?,
            content: col(row, k, "content")?,
            created_at: col(row, k, "created_at")?,
            updated_at: col(row, k, "updated_at")?,
        })
    }
}

impl PgRow for Document {
    const KIND: EntityKind = EntityKind::Document;
    const COLUMNS: &'static str = "id, org_id, grant_id, file_name, content_type, size_bytes, \
        storage_path, category, category_source, created_at";

    fn from_row(row: &Row) -> GrantflowResult<Self> {
        let k = Self::KIND;
        Ok(Self {
            id: col(row, k, "id")?,
            org_id: col(row, k, "org_id")?,
            grant_id: col(row, k, "grant_id")?,
            file_name: col(row, k, "file_name")?,
            content_type: col(row, k, "content_type")?,
            size_bytes: col(row, k, "size_bytes")?,
            storage_path: col(row, k, "storage_path")?,
            category: col(row, k, "category")?,
            category_source: opt_enum_col(row, k, "category_source")?,
            created_at: col(row, k, "created_at")?,
        })
    }
}

impl PgRow for Narrative {
    const KIND: EntityKind = EntityKind::Narrative;
    const COLUMNS: &'static str = "id, org_id, title, content, tags, created_at, updated_at";

    fn from_row(row: &Row) -> GrantflowResult<Self> {
        let k = Self::KIND;
        Ok(Self {
            id: col(row, k, "id")?,
            org_id: col(row, k, "org_id")?,
            title: col(row, k, "title")?,
            content: col(row, k, "content")?,
            tags: col(row, k, "tags")?,
            created_at: col(row, k, "created_at")?,
            updated_at: col(row, k, "updated_at")?,
        })
    }
}

impl PgRow for SubmissionChecklist {
    const KIND: EntityKind = EntityKind::SubmissionChecklist;
    const COLUMNS: &'static str =
        "id, org_id, grant_id, items, completion_percentage, created_at, updated_at";

    fn from_row(row: &Row) -> GrantflowResult<Self> {
        let k = Self::KIND;
        let items: JsonValue = col(row, k, "items")?;
        let items: Vec<ChecklistItem> =
            serde_json::from_value(items).map_err(|e| corrupt(k, format!("items: {e}")))?;
        Ok(Self {
            id: col(row, k, "id")?,
            org_id: col(row, k, "org_id")?,
            grant_id: col(row, k, "grant_id")?,
            items,
            completion_percentage: col(row, k, "completion_percentage")?,
            created_at: col(row, k, "created_at")?,
            updated_at: col(row, k, "updated_at")?,
        })
    }
}

impl PgRow for Submission {
    const KIND: EntityKind = EntityKind::Submission;
    const COLUMNS: &'static str =
        "id, org_id, grant_id, method, status, confirmation, submitted_at, created_at";

    fn from_row(row: &Row) -> GrantflowResult<Self> {
        let k = Self::KIND;
        Ok(Self {
            id: col(row, k, "id")?,
            org_id: col(row, k, "org_id")?,
            grant_id: col(row, k, "grant_id")?,
            method: enum_col(row, k, "method")?,
            status: enum_col(row, k, "status")?,
            confirmation: col(row, k, "confirmation")?,
            submitted_at: col(row, k, "submitted_at")?,
            created_at: col(row, k, "created_at")?,
        })
    }
}

impl PgRow for WorkflowExecution {
    const KIND: EntityKind = EntityKind::WorkflowExecution;
    const COLUMNS: &'static str = "id, org_id, workflow_name, status, entity_id, parameters, \
        result, error, started_at, completed_at";

    fn from_row(row: &Row) -> GrantflowResult<Self> {
        let k = Self::KIND;
        Ok(Self {
            id: col(row, k, "id")?,
            org_id: col(row, k, "org_id")?,
            workflow_name: col(row, k, "workflow_name")?,
            status: enum_col(row, k, "status")?,
            entity_id: col(row, k, "entity_id")?,
            parameters: col(row, k, "parameters")?,
            result: col(row, k, "result")?,
            error: col(row, k, "error")?,
            started_at: col(row, k, "started_at")?,
            completed_at: col(row, k, "completed_at")?,
        })
    }
}

// ============================================================================
// SCOPED QUERIES
// ============================================================================

const NEWEST_FIRST: &str = "created_at DESC, id DESC";

/// Fetch one row visible to `access`. `lock` adds `FOR UPDATE`.
async fn fetch_scoped<T: PgRow, C: GenericClient + Sync>(
    client: &C,
    access: Access,
    id: EntityId,
    lock: bool,
) -> GrantflowResult<Option<T>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE id = $1 AND ($2::uuid IS NULL OR {} = $2){}",
        T::COLUMNS,
        T::KIND.table_name(),
        T::ORG_COLUMN,
        if lock { " FOR UPDATE" } else { "" }
    );
    let org = access.org_filter();
    client
        .query_opt(sql.as_str(), &[&id, &org])
        .await
        .map_err(query_err)?
        .map(|row| T::from_row(&row))
        .transpose()
}

async fn require_scoped<T: PgRow, C: GenericClient + Sync>(
    client: &C,
    access: Access,
    id: EntityId,
) -> GrantflowResult<T> {
    fetch_scoped(client, access, id, true)
        .await?
        .ok_or_else(|| GrantflowError::not_found(T::KIND, id))
}

/// Visible rows. `extra` appends conditions whose parameters start at `$2`.
async fn list_scoped<T: PgRow, C: GenericClient + Sync>(
    client: &C,
    access: Access,
    extra: &str,
    params: &[&(dyn ToSql + Sync)],
    order: &str,
) -> GrantflowResult<Vec<T>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE ($1::uuid IS NULL OR {} = $1){} ORDER BY {}",
        T::COLUMNS,
        T::KIND.table_name(),
        T::ORG_COLUMN,
        extra,
        order
    );
    let org = access.org_filter();
    let mut all: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(params.len() + 1);
    all.push(&org);
    all.extend_from_slice(params);
    let rows = client.query(sql.as_str(), &all).await.map_err(query_err)?;
    rows.iter().map(T::from_row).collect()
}

/// Delete one visible row and return it.
async fn delete_scoped<T: PgRow, C: GenericClient + Sync>(
    client: &C,
    access: Access,
    id: EntityId,
) -> GrantflowResult<T> {
    let sql = format!(
        "DELETE FROM {} WHERE id = $1 AND ($2::uuid IS NULL OR {} = $2) RETURNING {}",
        T::KIND.table_name(),
        T::ORG_COLUMN,
        T::COLUMNS
    );
    let org = access.org_filter();
    match client
        .query_opt(sql.as_str(), &[&id, &org])
        .await
        .map_err(query_err)?
    {
        Some(row) => T::from_row(&row),
        None => Err(GrantflowError::not_found(T::KIND, id)),
    }
}

/// A referenced row must exist, be visible and belong to `org_id`.
async fn require_owned<C: GenericClient + Sync>(
    client: &C,
    kind: EntityKind,
    access: Access,
    id: EntityId,
    org_id: EntityId,
) -> GrantflowResult<()> {
    let sql = format!("SELECT org_id FROM {} WHERE id = $1", kind.table_name());
    let row = client
        .query_opt(sql.as_str(), &[&id])
        .await
        .map_err(query_err)?;
    let owner: Option<EntityId> = match row {
        Some(row) => Some(col(&row, kind, "org_id")?),
        None => None,
    };
    match owner {
        Some(owner) if access.permits(owner) && owner == org_id => Ok(()),
        _ => Err(GrantflowError::not_found(kind, id)),
    }
}

async fn fetch_section<C: GenericClient + Sync>(
    client: &C,
    access: Access,
    id: EntityId,
    lock: bool,
) -> GrantflowResult<Option<ProposalSection>> {
    let sql = format!(
        "SELECT {SECTION_COLUMNS_S} FROM proposal_sections s \
         JOIN proposals p ON p.id = s.proposal_id \
         WHERE s.id = $1 AND ($2::uuid IS NULL OR p.org_id = $2){}",
        if lock { " FOR UPDATE OF s" } else { "" }
    );
    let org = access.org_filter();
    client
        .query_opt(sql.as_str(), &[&id, &org])
        .await
        .map_err(query_err)?
        .map(|row| ProposalSection::from_row(&row))
        .transpose()
}

async fn sections_of<C: GenericClient + Sync>(
    client: &C,
    proposal_id: EntityId,
) -> GrantflowResult<Vec<ProposalSection>> {
    let sql = format!(
        "SELECT {} FROM proposal_sections WHERE proposal_id = $1 \
         ORDER BY sort_order ASC, created_at ASC",
        ProposalSection::COLUMNS
    );
    let rows = client
        .query(sql.as_str(), &[&proposal_id])
        .await
        .map_err(query_err)?;
    rows.iter().map(ProposalSection::from_row).collect()
}

async fn fetch_line_item<C: GenericClient + Sync>(
    client: &C,
    access: Access,
    id: EntityId,
    lock: bool,
) -> GrantflowResult<Option<BudgetLineItem>> {
    let sql = format!(
        "SELECT {LINE_ITEM_COLUMNS_I} FROM budget_line_items i \
         JOIN budgets b ON b.id = i.budget_id \
         WHERE i.id = $1 AND ($2::uuid IS NULL OR b.org_id = $2){}",
        if lock { " FOR UPDATE OF i" } else { "" }
    );
    let org = access.org_filter();
    client
        .query_opt(sql.as_str(), &[&id, &org])
        .await
        .map_err(query_err)?
        .map(|row| BudgetLineItem::from_row(&row))
        .transpose()
}

async fn line_items_of<C: GenericClient + Sync>(
    client: &C,
    budget_id: EntityId,
) -> GrantflowResult<Vec<BudgetLineItem>> {
    let sql = format!(
        "SELECT {} FROM budget_line_items WHERE budget_id = $1 ORDER BY created_at ASC, id ASC",
        BudgetLineItem::COLUMNS
    );
    let rows = client
        .query(sql.as_str(), &[&budget_id])
        .await
        .map_err(query_err)?;
    rows.iter().map(BudgetLineItem::from_row).collect()
}

/// Set a budget's total to the sum of its line items.
/// Locks the parent budget, then the item, in the same order as
/// `line_items_insert`. The budget lock is its own statement so the
/// following recompute reads a snapshot that includes every committed
/// sibling write.
async fn lock_line_item_and_budget<C: GenericClient + Sync>(
    client: &C,
    access: Access,
    id: EntityId,
) -> GrantflowResult<BudgetLineItem> {
    let item = fetch_line_item(client, access, id, false)
        .await?
        .ok_or_else(|| GrantflowError::not_found(EntityKind::BudgetLineItem, id))?;
    require_scoped::<Budget, _>(client, access, item.budget_id).await?;
    fetch_line_item(client, access, id, true)
        .await?
        .ok_or_else(|| GrantflowError::not_found(EntityKind::BudgetLineItem, id))
}

async fn recompute_budget<C: GenericClient + Sync>(
    client: &C,
    budget_id: EntityId,
) -> GrantflowResult<Budget> {
    let sql = format!(
        "UPDATE budgets SET total_amount = \
             (SELECT COALESCE(SUM(amount), 0) FROM budget_line_items WHERE budget_id = $1), \
             updated_at = $2 \
         WHERE id = $1 RETURNING {}",
        Budget::COLUMNS
    );
    let touched = now();
    match client
        .query_opt(sql.as_str(), &[&budget_id, &touched])
        .await
        .map_err(query_err)?
    {
        Some(row) => Budget::from_row(&row),
        None => Err(GrantflowError::not_found(EntityKind::Budget, budget_id)),
    }
}

// ============================================================================
// ROW WRITES
// ============================================================================

async fn insert_grant<C: GenericClient + Sync>(client: &C, g: &Grant) -> GrantflowResult<()> {
    client
        .execute(
            "INSERT INTO grants (id, org_id, funder_id, title, funder_name, description, \
             amount_requested, deadline, stage, eligibility_score, eligibility_notes, source_url, \
             metadata, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
            &[
                &g.id,
                &g.org_id,
                &g.funder_id,
                &g.title,
                &g.funder_name,
                &g.description,
                &g.amount_requested,
                &g.deadline,
                &g.stage.as_db_str(),
                &g.eligibility_score,
                &g.eligibility_notes,
                &g.source_url,
                &g.metadata,
                &g.created_at,
                &g.updated_at,
            ],
        )
        .await
        .map_err(|e| write_err(EntityKind::Grant, e))?;
    Ok(())
}

async fn update_grant<C: GenericClient + Sync>(client: &C, g: &Grant) -> GrantflowResult<()> {
    client
        .execute(
            "UPDATE grants SET funder_id = $2, title = $3, funder_name = $4, description = $5, \
             amount_requested = $6, deadline = $7, stage = $8, eligibility_score = $9, \
             eligibility_notes = $10, source_url = $11, metadata = $12, updated_at = $13 \
             WHERE id = $1",
            &[
                &g.id,
                &g.funder_id,
                &g.title,
                &g.funder_name,
                &g.description,
                &g.amount_requested,
                &g.deadline,
                &g.stage.as_db_str(),
                &g.eligibility_score,
                &g.eligibility_notes,
                &g.source_url,
                &g.metadata,
                &g.updated_at,
            ],
        )
        .await
        .map_err(query_err)?;
    Ok(())
}

async fn insert_section<C: GenericClient + Sync>(
    client: &C,
    s: &ProposalSection,
) -> GrantflowResult<()> {
    client
        .execute(
            "INSERT INTO proposal_sections (id, proposal_id, title, content, sort_order, \
             created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7)",
            &[
                &s.id,
                &s.proposal_id,
                &s.title,
                &s.content,
                &s.sort_order,
                &s.created_at,
                &s.updated_at,
            ],
        )
        .await
        .map_err(|e| write_err(EntityKind::ProposalSection, e))?;
    Ok(())
}

async fn insert_budget<C: GenericClient + Sync>(client: &C, b: &Budget) -> GrantflowResult<()> {
    client
        .execute(
            "INSERT INTO budgets (id, org_id, grant_id, name, total_amount, narrative, \
             is_template, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            &[
                &b.id,
                &b.org_id,
                &b.grant_id,
                &b.name,
                &b.total_amount,
                &b.narrative,
                &b.is_template,
                &b.created_at,
                &b.updated_at,
            ],
        )
        .await
        .map_err(|e| write_err(EntityKind::Budget, e))?;
    Ok(())
}

async fn insert_line_item<C: GenericClient + Sync>(
    client: &C,
    item: &BudgetLineItem,
) -> GrantflowResult<()> {
    client
        .execute(
            "INSERT INTO budget_line_items (id, budget_id, category, description, amount, \
             created_at) VALUES ($1, $2, $3, $4, $5, $6)",
            &[
                &item.id,
                &item.budget_id,
                &item.category,
                &item.description,
                &item.amount,
                &item.created_at,
            ],
        )
        .await
        .map_err(|e| write_err(EntityKind::BudgetLineItem, e))?;
    Ok(())
}

async fn insert_submission<C: GenericClient + Sync>(
    client: &C,
    s: &Submission,
) -> GrantflowResult<()> {
    client
        .execute(
            "INSERT INTO submissions (id, org_id, grant_id, method, status, confirmation, \
             submitted_at, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            &[
                &s.id,
                &s.org_id,
                &s.grant_id,
                &s.method.as_db_str(),
                &s.status.as_db_str(),
                &s.confirmation,
                &s.submitted_at,
                &s.created_at,
            ],
        )
        .await
        .map_err(|e| write_err(EntityKind::Submission, e))?;
    Ok(())
}

fn check_budget_items(budget_id: EntityId, items: &[BudgetLineItem]) -> GrantflowResult<()> {
    for item in items {
        if item.budget_id != budget_id {
            return Err(GrantflowError::invalid_value(
                "budget_id",
                format!("line item {} belongs to budget {}", item.id, item.budget_id),
            ));
        }
    }
    Ok(())
}

// ============================================================================
// POSTGRES STORE
// ============================================================================

/// [`GrantStore`] over a deadpool-postgres pool.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl std::fmt::Debug for PgStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgStore")
            .field("pool_size", &self.pool_size())
            .finish()
    }
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &DbConfig) -> ApiResult<Self> {
        Ok(Self::new(config.create_pool()?))
    }

    /// Current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn conn(&self) -> GrantflowResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| {
            StorageError::ConnectionFailed {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Create tables and indexes that do not exist yet.
    pub async fn run_migrations(&self) -> GrantflowResult<()> {
        let conn = self.conn().await?;
        conn.batch_execute(SCHEMA).await.map_err(query_err)?;
        tracing::info!("Database schema is up to date");
        Ok(())
    }
}

#[async_trait]
impl GrantStore for PgStore {
    // === Organizations & profiles ===

    async fn organization_insert(&self, org: &Organization) -> GrantflowResult<()> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO organizations (id, name, ein, mission, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[&org.id, &org.name, &org.ein, &org.mission, &org.created_at, &org.updated_at],
        )
        .await
        .map_err(|e| write_err(EntityKind::Organization, e))?;
        Ok(())
    }

    async fn organization_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<Organization>> {
        let conn = self.conn().await?;
        fetch_scoped(&**conn, access, id, false).await
    }

    async fn organization_update(
        &self,
        access: Access,
        id: EntityId,
        patch: &OrganizationPatch,
    ) -> GrantflowResult<Organization> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(tx_err)?;
        let mut org: Organization = require_scoped(&*tx, access, id).await?;
        patch.apply(&mut org);
        tx.execute(
            "UPDATE organizations SET name = $2, ein = $3, mission = $4, updated_at = $5 \
             WHERE id = $1",
            &[&org.id, &org.name, &org.ein, &org.mission, &org.updated_at],
        )
        .await
        .map_err(query_err)?;
        tx.commit().await.map_err(tx_err)?;
        Ok(org)
    }

    async fn profile_insert(&self, profile: &Profile) -> GrantflowResult<()> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO profiles (id, org_id, email, full_name, role, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[
                &profile.id,
                &profile.org_id,
                &profile.email,
                &profile.full_name,
                &profile.role.as_db_str(),
                &profile.created_at,
            ],
        )
        .await
        .map_err(|e| write_err(EntityKind::Profile, e))?;
        Ok(())
    }

    async fn profile_get(&self, user_id: EntityId) -> GrantflowResult<Option<Profile>> {
        let conn = self.conn().await?;
        fetch_scoped(&**conn, Access::Service, user_id, false).await
    }

    async fn profile_list(&self, access: Access) -> GrantflowResult<Vec<Profile>> {
        let conn = self.conn().await?;
        list_scoped(&**conn, access, "", &[], NEWEST_FIRST).await
    }

    // === Grants ===

    async fn grant_insert(&self, access: Access, grant: &Grant) -> GrantflowResult<()> {
        self.grant_insert_many(access, std::slice::from_ref(grant)).await
    }

    async fn grant_insert_many(&self, access: Access, grants: &[Grant]) -> GrantflowResult<()> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(tx_err)?;
        for grant in grants {
            access.check_write(EntityKind::Grant, grant.id, grant.org_id)?;
            if let Some(funder_id) = grant.funder_id {
                require_owned(&*tx, EntityKind::Funder, access, funder_id, grant.org_id).await?;
            }
            insert_grant(&*tx, grant).await?;
        }
        tx.commit().await.map_err(tx_err)
    }

    async fn grant_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<Grant>> {
        let conn = self.conn().await?;
        fetch_scoped(&**conn, access, id, false).await
    }

    async fn grant_list(&self, access: Access, stage: Option<GrantStage>) -> GrantflowResult<Vec<Grant>> {
        let conn = self.conn().await?;
        let stage = stage.map(|s| s.as_db_str());
        list_scoped(
            &**conn,
            access,
            " AND ($2::text IS NULL OR stage = $2)",
            &[&stage],
            NEWEST_FIRST,
        )
        .await
    }

    async fn grant_update(&self, access: Access, id: EntityId, patch: &GrantPatch) -> GrantflowResult<Grant> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(tx_err)?;
        let mut grant: Grant = require_scoped(&*tx, access, id).await?;
        if let Some(funder_id) = patch.funder_id {
            require_owned(&*tx, EntityKind::Funder, access, funder_id, grant.org_id).await?;
        }
        patch.apply(&mut grant);
        update_grant(&*tx, &grant).await?;
        tx.commit().await.map_err(tx_err)?;
        Ok(grant)
    }

    async fn grant_delete(&self, access: Access, id: EntityId) -> GrantflowResult<()> {
        // Children go with the foreign keys: cascades and SET NULL.
        let conn = self.conn().await?;
        delete_scoped::<Grant, _>(&**conn, access, id).await.map(|_| ())
    }

    // === Funders ===

    async fn funder_insert(&self, access: Access, funder: &Funder) -> GrantflowResult<()> {
        access.check_write(EntityKind::Funder, funder.id, funder.org_id)?;
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO funders (id, org_id, name, website, focus_areas, analysis, created_at, \
             updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            &[
                &funder.id,
                &funder.org_id,
                &funder.name,
                &funder.website,
                &funder.focus_areas,
                &funder.analysis,
                &funder.created_at,
                &funder.updated_at,
            ],
        )
        .await
        .map_err(|e| write_err(EntityKind::Funder, e))?;
        Ok(())
    }

    async fn funder_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<Funder>> {
        let conn = self.conn().await?;
        fetch_scoped(&**conn, access, id, false).await
    }

    async fn funder_list(&self, access: Access) -> GrantflowResult<Vec<Funder>> {
        let conn = self.conn().await?;
        list_scoped(&**conn, access, "", &[], NEWEST_FIRST).await
    }

    async fn funder_update(&self, access: Access, id: EntityId, patch: &FunderPatch) -> GrantflowResult<Funder> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(tx_err)?;
        let mut funder: Funder = require_scoped(&*tx, access, id).await?;
        patch.apply(&mut funder);
        tx.execute(
            "UPDATE funders SET name = $2, website = $3, focus_areas = $4, analysis = $5, \
             updated_at = $6 WHERE id = $1",
            &[
                &funder.id,
                &funder.name,
                &funder.website,
                &funder.focus_areas,
                &funder.analysis,
                &funder.updated_at,
            ],
        )
        .await
        .map_err(query_err)?;
        tx.commit().await.map_err(tx_err)?;
        Ok(funder)
    }

    // === Proposals & sections ===

    async fn proposal_create(
        &self,
        access: Access,
        proposal: &Proposal,
        sections: &[ProposalSection],
    ) -> GrantflowResult<()> {
        access.check_write(EntityKind::Proposal, proposal.id, proposal.org_id)?;
        for section in sections {
            if section.proposal_id != proposal.id {
                return Err(GrantflowError::invalid_value(
                    "proposal_id",
                    format!("section {} belongs to proposal {}", section.id, section.proposal_id),
                ));
            }
        }

        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(tx_err)?;
        require_owned(&*tx, EntityKind::Grant, access, proposal.grant_id, proposal.org_id).await?;
        tx.execute(
            "INSERT INTO proposals (id, org_id, grant_id, title, status, quality_score, \
             quality_feedback, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            &[
                &proposal.id,
                &proposal.org_id,
                &proposal.grant_id,
                &proposal.title,
                &proposal.status.as_db_str(),
                &proposal.quality_score,
                &proposal.quality_feedback,
                &proposal.created_at,
                &proposal.updated_at,
            ],
        )
        .await
        .map_err(|e| write_err(EntityKind::Proposal, e))?;
        for section in sections {
            insert_section(&*tx, section).await?;
        }
        tx.commit().await.map_err(tx_err)
    }

    async fn proposal_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<Proposal>> {
        let conn = self.conn().await?;
        fetch_scoped(&**conn, access, id, false).await
    }

    async fn proposal_list(&self, access: Access, grant_id: Option<EntityId>) -> GrantflowResult<Vec<Proposal>> {
        let conn = self.conn().await?;
        list_scoped(
            &**conn,
            access,
            " AND ($2::uuid IS NULL OR grant_id = $2)",
            &[&grant_id],
            NEWEST_FIRST,
        )
        .await
    }

    async fn proposal_update(
        &self,
        access: Access,
        id: EntityId,
        patch: &ProposalPatch,
    ) -> GrantflowResult<Proposal> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(tx_err)?;
        let mut proposal: Proposal = require_scoped(&*tx, access, id).await?;
        patch.apply(&mut proposal);
        tx.execute(
            "UPDATE proposals SET title = $2, status = $3, quality_score = $4, \
             quality_feedback = $5, updated_at = $6 WHERE id = $1",
            &[
                &proposal.id,
                &proposal.title,
                &proposal.status.as_db_str(),
                &proposal.quality_score,
                &proposal.quality_feedback,
                &proposal.updated_at,
            ],
        )
        .await
        .map_err(query_err)?;
        tx.commit().await.map_err(tx_err)?;
        Ok(proposal)
    }

    async fn proposal_delete(&self, access: Access, id: EntityId) -> GrantflowResult<()> {
        let conn = self.conn().await?;
        delete_scoped::<Proposal, _>(&**conn, access, id).await.map(|_| ())
    }

    async fn section_insert(&self, access: Access, section: &ProposalSection) -> GrantflowResult<()> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(tx_err)?;
        require_scoped::<Proposal, _>(&*tx, access, section.proposal_id).await?;
        insert_section(&*tx, section).await?;
        tx.commit().await.map_err(tx_err)
    }

    async fn section_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<ProposalSection>> {
        let conn = self.conn().await?;
        fetch_section(&**conn, access, id, false).await
    }

    async fn section_list(&self, access: Access, proposal_id: EntityId) -> GrantflowResult<Vec<ProposalSection>> {
        let conn = self.conn().await?;
        if fetch_scoped::<Proposal, _>(&**conn, access, proposal_id, false)
            .await?
            .is_none()
        {
            return Ok(Vec::new());
        }
        sections_of(&**conn, proposal_id).await
    }

    async fn section_update(
        &self,
        access: Access,
        id: EntityId,
        patch: &SectionPatch,
    ) -> GrantflowResult<ProposalSection> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(tx_err)?;
        let mut section = fetch_section(&*tx, access, id, true)
            .await?
            .ok_or_else(|| GrantflowError::not_found(EntityKind::ProposalSection, id))?;
        patch.apply(&mut section);
        tx.execute(
            "UPDATE proposal_sections SET title = $2, content = $3, sort_order = $4, \
             updated_at = $5 WHERE id = $1",
            &[
                &section.id,
                &section.title,
                &section.content,
                &section.sort_order,
                &section.updated_at,
            ],
        )
        .await
        .map_err(query_err)?;
        tx.commit().await.map_err(tx_err)?;
        Ok(section)
    }

    async fn section_delete(&self, access: Access, id: EntityId) -> GrantflowResult<ProposalSection> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(tx_err)?;
        let section = fetch_section(&*tx, access, id, true)
            .await?
            .ok_or_else(|| GrantflowError::not_found(EntityKind::ProposalSection, id))?;
        tx.execute("DELETE FROM proposal_sections WHERE id = $1", &[&id])
            .await
            .map_err(query_err)?;
        tx.commit().await.map_err(tx_err)?;
        Ok(section)
    }

    async fn section_reorder(
        &self,
        access: Access,
        proposal_id: EntityId,
        ordered_ids: &[EntityId],
    ) -> GrantflowResult<Vec<ProposalSection>> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(tx_err)?;
        require_scoped::<Proposal, _>(&*tx, access, proposal_id).await?;

        let owned: HashSet<EntityId> = sections_of(&*tx, proposal_id)
            .await?
            .into_iter()
            .map(|s| s.id)
            .collect();
        let mut seen = HashSet::new();
        for id in ordered_ids {
            if !owned.contains(id) {
                return Err(GrantflowError::invalid_value(
                    "section_ids",
                    format!("section {id} does not belong to proposal {proposal_id}"),
                ));
            }
            if !seen.insert(*id) {
                return Err(GrantflowError::invalid_value(
                    "section_ids",
                    format!("section {id} listed twice"),
                ));
            }
        }

        let touched = now();
        for (position, id) in ordered_ids.iter().enumerate() {
            let position = position as i32;
            tx.execute(
                "UPDATE proposal_sections SET sort_order = $2, updated_at = $3 WHERE id = $1",
                &[id, &position, &touched],
            )
            .await
            .map_err(query_err)?;
        }
        let sections = sections_of(&*tx, proposal_id).await?;
        tx.commit().await.map_err(tx_err)?;
        Ok(sections)
    }

    // === Budgets & line items ===

    async fn budget_create(
        &self,
        access: Access,
        budget: &Budget,
        items: &[BudgetLineItem],
    ) -> GrantflowResult<Budget> {
        access.check_write(EntityKind::Budget, budget.id, budget.org_id)?;
        check_budget_items(budget.id, items)?;

        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(tx_err)?;
        if let Some(grant_id) = budget.grant_id {
            require_owned(&*tx, EntityKind::Grant, access, grant_id, budget.org_id).await?;
        }
        insert_budget(&*tx, budget).await?;
        for item in items {
            insert_line_item(&*tx, item).await?;
        }
        let stored = recompute_budget(&*tx, budget.id).await?;
        tx.commit().await.map_err(tx_err)?;
        Ok(stored)
    }

    async fn budget_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<Budget>> {
        let conn = self.conn().await?;
        fetch_scoped(&**conn, access, id, false).await
    }

    async fn budget_list(&self, access: Access, grant_id: Option<EntityId>) -> GrantflowResult<Vec<Budget>> {
        let conn = self.conn().await?;
        list_scoped(
            &**conn,
            access,
            " AND ($2::uuid IS NULL OR grant_id = $2)",
            &[&grant_id],
            NEWEST_FIRST,
        )
        .await
    }

    async fn budget_update(&self, access: Access, id: EntityId, patch: &BudgetPatch) -> GrantflowResult<Budget> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(tx_err)?;
        let mut budget: Budget = require_scoped(&*tx, access, id).await?;
        if let Some(grant_id) = patch.grant_id {
            require_owned(&*tx, EntityKind::Grant, access, grant_id, budget.org_id).await?;
        }
        patch.apply(&mut budget);
        tx.execute(
            "UPDATE budgets SET grant_id = $2, name = $3, narrative = $4, is_template = $5, \
             updated_at = $6 WHERE id = $1",
            &[
                &budget.id,
                &budget.grant_id,
                &budget.name,
                &budget.narrative,
                &budget.is_template,
                &budget.updated_at,
            ],
        )
        .await
        .map_err(query_err)?;
        tx.commit().await.map_err(tx_err)?;
        Ok(budget)
    }

    async fn budget_delete(&self, access: Access, id: EntityId) -> GrantflowResult<()> {
        let conn = self.conn().await?;
        delete_scoped::<Budget, _>(&**conn, access, id).await.map(|_| ())
    }

    async fn budget_from_template(&self, access: Access, copy: &TemplateCopy) -> GrantflowResult<Budget> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(tx_err)?;
        let template = fetch_scoped::<Budget, _>(&*tx, access, copy.template_id, false)
            .await?
            .ok_or_else(|| GrantflowError::not_found(EntityKind::Budget, copy.template_id))?;
        if !template.is_template {
            return Err(GrantflowError::invalid_value(
                "template_id",
                format!("budget {} is not a template", template.id),
            ));
        }

        let mut budget = Budget::new(copy.org_id, copy.name.clone().unwrap_or(template.name));
        budget.grant_id = copy.grant_id;
        budget.narrative = template.narrative;
        access.check_write(EntityKind::Budget, budget.id, budget.org_id)?;
        if let Some(grant_id) = budget.grant_id {
            require_owned(&*tx, EntityKind::Grant, access, grant_id, budget.org_id).await?;
        }
        insert_budget(&*tx, &budget).await?;

        for item in line_items_of(&*tx, template.id).await? {
            let copied = BudgetLineItem {
                id: new_entity_id(),
                budget_id: budget.id,
                created_at: now(),
                ..item
            };
            insert_line_item(&*tx, &copied).await?;
        }
        let stored = recompute_budget(&*tx, budget.id).await?;
        tx.commit().await.map_err(tx_err)?;
        Ok(stored)
    }

    async fn line_item_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<BudgetLineItem>> {
        let conn = self.conn().await?;
        fetch_line_item(&**conn, access, id, false).await
    }

    async fn line_item_list(&self, access: Access, budget_id: EntityId) -> GrantflowResult<Vec<BudgetLineItem>> {
        let conn = self.conn().await?;
        if fetch_scoped::<Budget, _>(&**conn, access, budget_id, false)
            .await?
            .is_none()
        {
            return Ok(Vec::new());
        }
        line_items_of(&**conn, budget_id).await
    }

    async fn line_items_insert(
        &self,
        access: Access,
        budget_id: EntityId,
        items: &[BudgetLineItem],
    ) -> GrantflowResult<Budget> {
        check_budget_items(budget_id, items)?;
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(tx_err)?;
        require_scoped::<Budget, _>(&*tx, access, budget_id).await?;
        for item in items {
            insert_line_item(&*tx, item).await?;
        }
        let budget = recompute_budget(&*tx, budget_id).await?;
        tx.commit().await.map_err(tx_err)?;
        Ok(budget)
    }

    async fn line_item_update(
        &self,
        access: Access,
        id: EntityId,
        patch: &LineItemPatch,
    ) -> GrantflowResult<(BudgetLineItem, Budget)> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(tx_err)?;
        let mut item = lock_line_item_and_budget(&*tx, access, id).await?;
        patch.apply(&mut item);
        tx.execute(
            "UPDATE budget_line_items SET category = $2, description = $3, amount = $4 \
             WHERE id = $1",
            &[&item.id, &item.category, &item.description, &item.amount],
        )
        .await
        .map_err(query_err)?;
        let budget = recompute_budget(&*tx, item.budget_id).await?;
        tx.commit().await.map_err(tx_err)?;
        Ok((item, budget))
    }

    async fn line_item_delete(&self, access: Access, id: EntityId) -> GrantflowResult<Budget> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(tx_err)?;
        let item = lock_line_item_and_budget(&*tx, access, id).await?;
        tx.execute("DELETE FROM budget_line_items WHERE id = $1", &[&id])
            .await
            .map_err(query_err)?;
        let budget = recompute_budget(&*tx, item.budget_id).await?;
        tx.commit().await.map_err(tx_err)?;
        Ok(budget)
    }

    // === Awards & reports ===

    async fn award_insert(&self, access: Access, award: &Award) -> GrantflowResult<()> {
        access.check_write(EntityKind::Award, award.id, award.org_id)?;
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(tx_err)?;
        require_owned(&*tx, EntityKind::Grant, access, award.grant_id, award.org_id).await?;
        tx.execute(
            "INSERT INTO awards (id, org_id, grant_id, amount, start_date, end_date, terms, \
             created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            &[
                &award.id,
                &award.org_id,
                &award.grant_id,
                &award.amount,
                &award.start_date,
                &award.end_date,
                &award.terms,
                &award.created_at,
            ],
        )
        .await
        .map_err(|e| write_err(EntityKind::Award, e))?;
        tx.commit().await.map_err(tx_err)
    }

    async fn award_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<Award>> {
        let conn = self.conn().await?;
        fetch_scoped(&**conn, access, id, false).await
    }

    async fn award_list(&self, access: Access, grant_id: Option<EntityId>) -> GrantflowResult<Vec<Award>> {
        let conn = self.conn().await?;
        list_scoped(
            &**conn,
            access,
            " AND ($2::uuid IS NULL OR grant_id = $2)",
            &[&grant_id],
            NEWEST_FIRST,
        )
        .await
    }

    async fn award_delete(&self, access: Access, id: EntityId) -> GrantflowResult<()> {
        let conn = self.conn().await?;
        delete_scoped::<Award, _>(&**conn, access, id).await.map(|_| ())
    }

    async fn report_insert(&self, access: Access, report: &Report) -> GrantflowResult<()> {
        access.check_write(EntityKind::Report, report.id, report.org_id)?;
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(tx_err)?;
        require_owned(&*tx, EntityKind::Award, access, report.award_id, report.org_id).await?;
        tx.execute(
            "INSERT INTO reports (id, org_id, award_id, title, due_date, status, content, \
             created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            &[
                &report.id,
                &report.org_id,
                &report.award_id,
                &report.title,
                &report.due_date,
                &report.status.as_db_str(),
                &report.content,
                &report.created_at,
                &report.updated_at,
            ],
        )
        .await
        .map_err(|e| write_err(EntityKind::Report, e))?;
        tx.commit().await.map_err(tx_err)
    }

    async fn report_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<Report>> {
        let conn = self.conn().await?;
        fetch_scoped(&**conn, access, id, false).await
    }

    async fn report_list(&self, access: Access, award_id: Option<EntityId>) -> GrantflowResult<Vec<Report>> {
        let conn = self.conn().await?;
        list_scoped(
            &**conn,
            access,
            " AND ($2::uuid IS NULL OR award_id = $2)",
            &[&award_id],
            "due_date ASC, id ASC",
        )
        .await
    }

    async fn report_update(&self, access: Access, id: EntityId, patch: &ReportPatch) -> GrantflowResult<Report> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(tx_err)?;
        let mut report: Report = require_scoped(&*tx, access, id).await?;
        patch.apply(&mut report);
        tx.execute(
            "UPDATE reports SET title = $2, due_date = $3, status = $4, content = $5, \
             updated_at = $6 WHERE id = $1",
            &[
                &report.id,
                &report.title,
                &report.due_date,
                &report.status.as_db_str(),
                &report.content,
                &report.updated_at,
            ],
        )
        .await
        .map_err(query_err)?;
        tx.commit().await.map_err(tx_err)?;
        Ok(report)
    }

    async fn report_delete(&self, access: Access, id: EntityId) -> GrantflowResult<()> {
        let conn = self.conn().await?;
        delete_scoped::<Report, _>(&**conn, access, id).await.map(|_| ())
    }

    // === Documents & narratives ===

    async fn document_insert(&self, access: Access, document: &Document) -> GrantflowResult<()> {
        access.check_write(EntityKind::Document, document.id, document.org_id)?;
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(tx_err)?;
        if let Some(grant_id) = document.grant_id {
            require_owned(&*tx, EntityKind::Grant, access, grant_id, document.org_id).await?;
        }
        tx.execute(
            "INSERT INTO documents (id, org_id, grant_id, file_name, content_type, size_bytes, \
             storage_path, category, category_source, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            &[
                &document.id,
                &document.org_id,
                &document.grant_id,
                &document.file_name,
                &document.content_type,
                &document.size_bytes,
                &document.storage_path,
                &document.category,
                &document.category_source.map(|s| s.as_db_str()),
                &document.created_at,
            ],
        )
        .await
        .map_err(|e| write_err(EntityKind::Document, e))?;
        tx.commit().await.map_err(tx_err)
    }

    async fn document_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<Document>> {
        let conn = self.conn().await?;
        fetch_scoped(&**conn, access, id, false).await
    }

    async fn document_list(&self, access: Access, grant_id: Option<EntityId>) -> GrantflowResult<Vec<Document>> {
        let conn = self.conn().await?;
        list_scoped(
            &**conn,
            access,
            " AND ($2::uuid IS NULL OR grant_id = $2)",
            &[&grant_id],
            NEWEST_FIRST,
        )
        .await
    }

    async fn document_update(
        &self,
        access: Access,
        id: EntityId,
        patch: &DocumentPatch,
    ) -> GrantflowResult<Document> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(tx_err)?;
        let mut document: Document = require_scoped(&*tx, access, id).await?;
        if let Some(grant_id) = patch.grant_id {
            require_owned(&*tx, EntityKind::Grant, access, grant_id, document.org_id).await?;
        }
        patch.apply(&mut document);
        tx.execute(
            "UPDATE documents SET grant_id = $2, file_name = $3, category = $4, \
             category_source = $5 WHERE id = $1",
            &[
                &document.id,
                &document.grant_id,
                &document.file_name,
                &document.category,
                &document.category_source.map(|s| s.as_db_str()),
            ],
        )
        .await
        .map_err(query_err)?;
        tx.commit().await.map_err(tx_err)?;
        Ok(document)
    }

    async fn document_delete(&self, access: Access, id: EntityId) -> GrantflowResult<Document> {
        let conn = self.conn().await?;
        delete_scoped(&**conn, access, id).await
    }

    async fn narrative_insert(&self, access: Access, narrative: &Narrative) -> GrantflowResult<()> {
        access.check_write(EntityKind::Narrative, narrative.id, narrative.org_id)?;
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO narratives (id, org_id, title, content, tags, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
            &[
                &narrative.id,
                &narrative.org_id,
                &narrative.title,
                &narrative.content,
                &narrative.tags,
                &narrative.created_at,
                &narrative.updated_at,
            ],
        )
        .await
        .map_err(|e| write_err(EntityKind::Narrative, e))?;
        Ok(())
    }

    async fn narrative_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<Narrative>> {
        let conn = self.conn().await?;
        fetch_scoped(&**conn, access, id, false).await
    }

    async fn narrative_list(&self, access: Access) -> GrantflowResult<Vec<Narrative>> {
        let conn = self.conn().await?;
        list_scoped(&**conn, access, "", &[], NEWEST_FIRST).await
    }

    async fn narrative_update(
        &self,
        access: Access,
        id: EntityId,
        patch: &NarrativePatch,
    ) -> GrantflowResult<Narrative> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(tx_err)?;
        let mut narrative: Narrative = require_scoped(&*tx, access, id).await?;
        patch.apply(&mut narrative);
        tx.execute(
            "UPDATE narratives SET title = $2, content = $3, tags = $4, updated_at = $5 \
             WHERE id = $1",
            &[
                &narrative.id,
                &narrative.title,
                &narrative.content,
                &narrative.tags,
                &narrative.updated_at,
            ],
        )
        .await
        .map_err(query_err)?;
        tx.commit().await.map_err(tx_err)?;
        Ok(narrative)
    }

    async fn narrative_delete(&self, access: Access, id: EntityId) -> GrantflowResult<()> {
        let conn = self.conn().await?;
        delete_scoped::<Narrative, _>(&**conn, access, id).await.map(|_| ())
    }

    // === Checklists & submissions ===

    async fn checklist_upsert(
        &self,
        access: Access,
        org_id: EntityId,
        grant_id: EntityId,
        items: &[ChecklistItem],
    ) -> GrantflowResult<(SubmissionChecklist, bool)> {
        access.check_write(EntityKind::SubmissionChecklist, grant_id, org_id)?;
        let items_json = serde_json::to_value(items)
            .map_err(|e| GrantflowError::invalid_value("items", e.to_string()))?;
        let percentage = checklist_completion(items);
        let id = new_entity_id();
        let touched = now();

        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(tx_err)?;
        require_owned(&*tx, EntityKind::Grant, access, grant_id, org_id).await?;
        // xmax is zero only for a freshly inserted tuple.
        let sql = format!(
            "INSERT INTO submission_checklists (id, org_id, grant_id, items, \
             completion_percentage, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $6) \
             ON CONFLICT (grant_id) DO UPDATE SET items = EXCLUDED.items, \
             completion_percentage = EXCLUDED.completion_percentage, \
             updated_at = EXCLUDED.updated_at \
             RETURNING {}, (xmax = 0) AS inserted",
            SubmissionChecklist::COLUMNS
        );
        let row = tx
            .query_one(
                sql.as_str(),
                &[&id, &org_id, &grant_id, &items_json, &percentage, &touched],
            )
            .await
            .map_err(|e| write_err(EntityKind::SubmissionChecklist, e))?;
        let checklist = SubmissionChecklist::from_row(&row)?;
        let inserted: bool = col(&row, EntityKind::SubmissionChecklist, "inserted")?;
        tx.commit().await.map_err(tx_err)?;
        Ok((checklist, inserted))
    }

    async fn checklist_get(&self, access: Access, grant_id: EntityId) -> GrantflowResult<Option<SubmissionChecklist>> {
        let conn = self.conn().await?;
        let sql = format!(
            "SELECT {} FROM submission_checklists \
             WHERE grant_id = $1 AND ($2::uuid IS NULL OR org_id = $2)",
            SubmissionChecklist::COLUMNS
        );
        let org = access.org_filter();
        conn.query_opt(sql.as_str(), &[&grant_id, &org])
            .await
            .map_err(query_err)?
            .map(|row| SubmissionChecklist::from_row(&row))
            .transpose()
    }

    async fn submission_insert(&self, access: Access, submission: &Submission) -> GrantflowResult<()> {
        access.check_write(EntityKind::Submission, submission.id, submission.org_id)?;
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(tx_err)?;
        require_owned(&*tx, EntityKind::Grant, access, submission.grant_id, submission.org_id).await?;
        insert_submission(&*tx, submission).await?;
        tx.commit().await.map_err(tx_err)
    }

    async fn submission_complete(&self, access: Access, submission: &Submission) -> GrantflowResult<Grant> {
        access.check_write(EntityKind::Submission, submission.id, submission.org_id)?;
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(tx_err)?;
        let mut grant: Grant = require_scoped(&*tx, access, submission.grant_id).await?;
        if grant.org_id != submission.org_id {
            return Err(GrantflowError::not_found(EntityKind::Grant, submission.grant_id));
        }
        insert_submission(&*tx, submission).await?;
        grant.stage = GrantStage::Submission;
        grant.updated_at = now();
        update_grant(&*tx, &grant).await?;
        tx.commit().await.map_err(tx_err)?;
        Ok(grant)
    }

    async fn submission_list(&self, access: Access, grant_id: Option<EntityId>) -> GrantflowResult<Vec<Submission>> {
        let conn = self.conn().await?;
        list_scoped(
            &**conn,
            access,
            " AND ($2::uuid IS NULL OR grant_id = $2)",
            &[&grant_id],
            NEWEST_FIRST,
        )
        .await
    }

    // === Workflow ledger ===

    async fn workflow_insert(&self, access: Access, execution: &WorkflowExecution) -> GrantflowResult<()> {
        access.check_write(EntityKind::WorkflowExecution, execution.id, execution.org_id)?;
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO workflow_executions (id, org_id, workflow_name, status, entity_id, \
             parameters, result, error, started_at, completed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            &[
                &execution.id,
                &execution.org_id,
                &execution.workflow_name,
                &execution.status.as_db_str(),
                &execution.entity_id,
                &execution.parameters,
                &execution.result,
                &execution.error,
                &execution.started_at,
                &execution.completed_at,
            ],
        )
        .await
        .map_err(|e| write_err(EntityKind::WorkflowExecution, e))?;
        Ok(())
    }

    async fn workflow_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<WorkflowExecution>> {
        let conn = self.conn().await?;
        fetch_scoped(&**conn, access, id, false).await
    }

    async fn workflow_list(
        &self,
        access: Access,
        filter: &WorkflowFilter,
    ) -> GrantflowResult<Vec<WorkflowExecution>> {
        let conn = self.conn().await?;
        let status = filter.status.map(|s| s.as_db_str());
        list_scoped(
            &**conn,
            access,
            " AND ($2::text IS NULL OR workflow_name = $2) \
              AND ($3::text IS NULL OR status = $3) \
              AND ($4::uuid IS NULL OR entity_id = $4)",
            &[&filter.workflow_name, &status, &filter.entity_id],
            "started_at DESC, id DESC",
        )
        .await
    }

    async fn workflow_update(
        &self,
        access: Access,
        id: EntityId,
        update: &WorkflowUpdate,
    ) -> GrantflowResult<WorkflowExecution> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(tx_err)?;
        let mut execution: WorkflowExecution = require_scoped(&*tx, access, id).await?;
        update.apply(&mut execution);
        tx.execute(
            "UPDATE workflow_executions SET status = $2, result = $3, error = $4, \
             completed_at = $5 WHERE id = $1",
            &[
                &execution.id,
                &execution.status.as_db_str(),
                &execution.result,
                &execution.error,
                &execution.completed_at,
            ],
        )
        .await
        .map_err(query_err)?;
        tx.commit().await.map_err(tx_err)?;
        Ok(execution)
    }

    async fn health_check(&self) -> GrantflowResult<bool> {
        let conn = self.conn().await?;
        let row = conn.query_one("SELECT 1", &[]).await.map_err(query_err)?;
        let one: i32 = row.try_get(0).map_err(query_err)?;
        Ok(one == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    struct EnvVarGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let previous = std::env::var(key).ok();
            std::env::set_var(key, value);
            Self { key, previous }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match &self.previous {
                Some(value) => std::env::set_var(self.key, value),
                None => std::env::remove_var(self.key),
            }
        }
    }

    #[test]
    fn test_db_config_default() {
        let config = DbConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5432);
        assert_eq!(config.dbname, "grantflow");
        assert_eq!(config.max_size, 16);
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_db_config_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let _host = EnvVarGuard::set("GRANTFLOW_DB_HOST", "db.internal");
        let _port = EnvVarGuard::set("GRANTFLOW_DB_PORT", "6543");
        let _size = EnvVarGuard::set("GRANTFLOW_DB_POOL_SIZE", "4");
        let _timeout = EnvVarGuard::set("GRANTFLOW_DB_TIMEOUT", "not-a-number");

        let config = DbConfig::from_env();
        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 6543);
        assert_eq!(config.max_size, 4);
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_schema_declares_every_table() {
        for kind in EntityKind::ALL {
            let ddl = format!("CREATE TABLE IF NOT EXISTS {} (", kind.table_name());
            assert!(SCHEMA.contains(&ddl), "missing table {}", kind.table_name());
        }
    }

    #[test]
    fn test_schema_checks_match_enum_spellings() {
        for stage in GrantStage::ALL {
            assert!(SCHEMA.contains(&format!("'{}'", stage.as_db_str())));
        }
        for status in grantflow_core::WorkflowStatus::ALL {
            assert!(SCHEMA.contains(&format!("'{}'", status.as_db_str())));
        }
    }

    #[test]
    fn test_unique_checklist_per_grant() {
        assert!(SCHEMA.contains("grant_id               UUID NOT NULL UNIQUE"));
    }

    #[test]
    fn test_organization_scopes_by_id() {
        assert_eq!(<Organization as PgRow>::ORG_COLUMN, "id");
        assert_eq!(<Grant as PgRow>::ORG_COLUMN, "org_id");
    }
}
