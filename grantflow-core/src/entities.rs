//! Persistent entity types
//!
//! Plain relational rows. Every tenant-owned row carries `org_id`; child rows
//! (proposal sections, budget line items) inherit their tenant from the parent.

use crate::{
    new_entity_id, now, CategorySource, Date, EntityId, GrantStage, ProfileRole, ProposalStatus,
    ReportStatus, SubmissionMethod, SubmissionStatus, Timestamp, WorkflowKind, WorkflowStatus,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ============================================================================
// TENANCY
// ============================================================================

/// Organization: the unit of data isolation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Organization {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub id: EntityId,
    pub name: String,
    pub ein: Option<String>,
    pub mission: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: Timestamp,
}

impl Organization {
    pub fn new(name: impl Into<String>) -> Self {
        let now = now();
        Self {
            id: new_entity_id(),
            name: name.into(),
            ein: None,
            mission: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Member identity. The profile id equals the authenticated user id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Profile {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub org_id: EntityId,
    pub email: String,
    pub full_name: Option<String>,
    pub role: ProfileRole,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
}

impl Profile {
    pub fn new(id: EntityId, org_id: EntityId, email: impl Into<String>, role: ProfileRole) -> Self {
        Self {
            id,
            org_id,
            email: email.into(),
            full_name: None,
            role,
            created_at: now(),
        }
    }
}

// ============================================================================
// GRANTS & FUNDERS
// ============================================================================

/// A grant opportunity tracked through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Grant {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub org_id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub funder_id: Option<EntityId>,
    pub title: String,
    pub funder_name: Option<String>,
    pub description: Option<String>,
    pub amount_requested: Option<Decimal>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date"))]
    pub deadline: Option<Date>,
    pub stage: GrantStage,
    pub eligibility_score: Option<i32>,
    pub eligibility_notes: Option<String>,
    pub source_url: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub metadata: JsonValue,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: Timestamp,
}

impl Grant {
    pub fn new(org_id: EntityId, title: impl Into<String>) -> Self {
        let now = now();
        Self {
            id: new_entity_id(),
            org_id,
            funder_id: None,
            title: title.into(),
            funder_name: None,
            description: None,
            amount_requested: None,
            deadline: None,
            stage: GrantStage::default(),
            eligibility_score: None,
            eligibility_notes: None,
            source_url: None,
            metadata: JsonValue::Object(Default::default()),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A grant-making organization and its AI-produced analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Funder {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub org_id: EntityId,
    pub name: String,
    pub website: Option<String>,
    pub focus_areas: Vec<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub analysis: Option<JsonValue>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: Timestamp,
}

impl Funder {
    pub fn new(org_id: EntityId, name: impl Into<String>) -> Self {
        let now = now();
        Self {
            id: new_entity_id(),
            org_id,
            name: name.into(),
            website: None,
            focus_areas: Vec::new(),
            analysis: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ============================================================================
// PROPOSALS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Proposal {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub org_id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub grant_id: EntityId,
    pub title: String,
    pub status: ProposalStatus,
    pub quality_score: Option<i32>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub quality_feedback: Option<JsonValue>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: Timestamp,
}

impl Proposal {
    pub fn new(org_id: EntityId, grant_id: EntityId, title: impl Into<String>) -> Self {
        let now = now();
        Self {
            id: new_entity_id(),
            org_id,
            grant_id,
            title: title.into(),
            status: ProposalStatus::default(),
            quality_score: None,
            quality_feedback: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One section of a proposal. Sections are read in ascending `sort_order`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ProposalSection {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub proposal_id: EntityId,
    pub title: String,
    pub content: String,
    pub sort_order: i32,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: Timestamp,
}

impl ProposalSection {
    pub fn new(
        proposal_id: EntityId,
        title: impl Into<String>,
        content: impl Into<String>,
        sort_order: i32,
    ) -> Self {
        let now = now();
        Self {
            id: new_entity_id(),
            proposal_id,
            title: title.into(),
            content: content.into(),
            sort_order,
            created_at: now,
            updated_at: now,
        }
    }
}

// ============================================================================
// BUDGETS
// ============================================================================

/// A cost breakdown. `total_amount` is always the sum of its line items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Budget {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub org_id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub grant_id: Option<EntityId>,
    pub name: String,
    pub total_amount: Decimal,
    pub narrative: Option<String>,
    pub is_template: bool,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: Timestamp,
}

impl Budget {
    pub fn new(org_id: EntityId, name: impl Into<String>) -> Self {
        let now = now();
        Self {
            id: new_entity_id(),
            org_id,
            grant_id: None,
            name: name.into(),
            total_amount: Decimal::ZERO,
            narrative: None,
            is_template: false,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct BudgetLineItem {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub budget_id: EntityId,
    pub category: String,
    pub description: String,
    pub amount: Decimal,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
}

impl BudgetLineItem {
    pub fn new(
        budget_id: EntityId,
        category: impl Into<String>,
        description: impl Into<String>,
        amount: Decimal,
    ) -> Self {
        Self {
            id: new_entity_id(),
            budget_id,
            category: category.into(),
            description: description.into(),
            amount,
            created_at: now(),
        }
    }
}

// ============================================================================
// POST-AWARD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Award {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub org_id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub grant_id: EntityId,
    pub amount: Decimal,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date"))]
    pub start_date: Option<Date>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date"))]
    pub end_date: Option<Date>,
    pub terms: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
}

impl Award {
    pub fn new(org_id: EntityId, grant_id: EntityId, amount: Decimal) -> Self {
        Self {
            id: new_entity_id(),
            org_id,
            grant_id,
            amount,
            start_date: None,
            end_date: None,
            terms: None,
            created_at: now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Report {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub org_id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub award_id: EntityId,
    pub title: String,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date"))]
    pub due_date: Date,
    pub status: ReportStatus,
    pub content: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: Timestamp,
}

impl Report {
    pub fn new(org_id: EntityId, award_id: EntityId, title: impl Into<String>, due_date: Date) -> Self {
        let now = now();
        Self {
            id: new_entity_id(),
            org_id,
            award_id,
            title: title.into(),
            due_date,
            status: ReportStatus::default(),
            content: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ============================================================================
// CONTENT
// ============================================================================

/// Uploaded file metadata. The bytes live in object storage at `storage_path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Document {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub org_id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub grant_id: Option<EntityId>,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub storage_path: String,
    pub category: Option<String>,
    pub category_source: Option<CategorySource>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
}

impl Document {
    pub fn new(
        org_id: EntityId,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        size_bytes: i64,
        storage_path: impl Into<String>,
    ) -> Self {
        Self {
            id: new_entity_id(),
            org_id,
            grant_id: None,
            file_name: file_name.into(),
            content_type: content_type.into(),
            size_bytes,
            storage_path: storage_path.into(),
            category: None,
            category_source: None,
            created_at: now(),
        }
    }
}

/// Reusable text block, independent of any grant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Narrative {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub org_id: EntityId,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: Timestamp,
}

impl Narrative {
    pub fn new(org_id: EntityId, title: impl Into<String>, content: impl Into<String>) -> Self {
        let now = now();
        Self {
            id: new_entity_id(),
            org_id,
            title: title.into(),
            content: content.into(),
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

// ============================================================================
// SUBMISSION
// ============================================================================

/// One line of a submission checklist.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ChecklistItem {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Per-grant checklist. At most one exists per grant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SubmissionChecklist {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub org_id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub grant_id: EntityId,
    pub items: Vec<ChecklistItem>,
    pub completion_percentage: i32,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: Timestamp,
}

impl SubmissionChecklist {
    /// Build a checklist with its completion percentage already derived.
    pub fn new(org_id: EntityId, grant_id: EntityId, items: Vec<ChecklistItem>) -> Self {
        let now = now();
        let completion_percentage = crate::checklist_completion(&items);
        Self {
            id: new_entity_id(),
            org_id,
            grant_id,
            items,
            completion_percentage,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the items and recompute the percentage.
    pub fn set_items(&mut self, items: Vec<ChecklistItem>) {
        self.completion_percentage = crate::checklist_completion(&items);
        self.items = items;
        self.updated_at = now();
    }
}

/// Submission log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Submission {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub org_id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub grant_id: EntityId,
    pub method: SubmissionMethod,
    pub status: SubmissionStatus,
    pub confirmation: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub submitted_at: Option<Timestamp>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
}

impl Submission {
    pub fn new(
        org_id: EntityId,
        grant_id: EntityId,
        method: SubmissionMethod,
        status: SubmissionStatus,
    ) -> Self {
        let now = now();
        Self {
            id: new_entity_id(),
            org_id,
            grant_id,
            method,
            status,
            confirmation: None,
            submitted_at: (status == SubmissionStatus::Submitted).then_some(now),
            created_at: now,
        }
    }
}

// ============================================================================
// WORKFLOW LEDGER
// ============================================================================

/// Ledger row tracking one task handed to the external automation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct WorkflowExecution {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub org_id: EntityId,
    pub workflow_name: String,
    pub status: WorkflowStatus,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub entity_id: Option<EntityId>,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub parameters: JsonValue,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub result: Option<JsonValue>,
    pub error: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub started_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub completed_at: Option<Timestamp>,
}

impl WorkflowExecution {
    /// A freshly dispatched execution: status `running`, no result yet.
    pub fn running(
        org_id: EntityId,
        kind: WorkflowKind,
        entity_id: Option<EntityId>,
        parameters: JsonValue,
    ) -> Self {
        Self {
            id: new_entity_id(),
            org_id,
            workflow_name: kind.workflow_name().to_string(),
            status: WorkflowStatus::Running,
            entity_id,
            parameters,
            result: None,
            error: None,
            started_at: now(),
            completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_execution_shape() {
        let org = new_entity_id();
        let budget = new_entity_id();
        let exec = WorkflowExecution::running(
            org,
            WorkflowKind::GenerateBudget,
            Some(budget),
            serde_json::json!({}),
        );
        assert_eq!(exec.workflow_name, "generate-budget");
        assert_eq!(exec.status, WorkflowStatus::Running);
        assert_eq!(exec.entity_id, Some(budget));
        assert!(exec.completed_at.is_none());
    }

    #[test]
    fn test_checklist_items_accept_missing_fields() -> Result<(), serde_json::Error> {
        let items: Vec<ChecklistItem> =
            serde_json::from_value(serde_json::json!([{"completed": true}, {"completed": false}]))?;
        assert_eq!(items.len(), 2);
        assert!(items[0].completed);
        assert_eq!(items[1].label, "");
        Ok(())
    }

    #[test]
    fn test_new_checklist_derives_percentage() {
        let items = vec![
            ChecklistItem { label: "LOI".into(), completed: true, notes: None },
            ChecklistItem { label: "Budget".into(), completed: false, notes: None },
        ];
        let checklist = SubmissionChecklist::new(new_entity_id(), new_entity_id(), items);
        assert_eq!(checklist.completion_percentage, 50);
    }

    #[test]
    fn test_submitted_submission_gets_timestamp() {
        let submitted = Submission::new(
            new_entity_id(),
            new_entity_id(),
            SubmissionMethod::Auto,
            SubmissionStatus::Submitted,
        );
        assert!(submitted.submitted_at.is_some());

        let pending = Submission::new(
            new_entity_id(),
            new_entity_id(),
            SubmissionMethod::Manual,
            SubmissionStatus::Pending,
        );
        assert!(pending.submitted_at.is_none());
    }

    #[test]
    fn test_new_budget_starts_at_zero() {
        let budget = Budget::new(new_entity_id(), "FY25");
        assert_eq!(budget.total_amount, Decimal::ZERO);
        assert!(!budget.is_template);
    }
}
