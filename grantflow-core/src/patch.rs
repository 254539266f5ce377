//! Partial updates
//!
//! A patch carries only the fields a caller wants to change. `apply` mutates
//! the target in place and bumps `updated_at` where the row has one.

use crate::{
    now, CategorySource, Date, EntityId, Funder, Grant, GrantStage, Narrative, Organization,
    Proposal, ProposalSection, ProposalStatus, Report, ReportStatus, WorkflowExecution,
    WorkflowStatus, Budget, BudgetLineItem, Document,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct OrganizationPatch {
    pub name: Option<String>,
    pub ein: Option<String>,
    pub mission: Option<String>,
}

impl OrganizationPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.ein.is_none() && self.mission.is_none()
    }

    pub fn apply(&self, org: &mut Organization) {
        if let Some(name) = &self.name {
            org.name = name.clone();
        }
        if let Some(ein) = &self.ein {
            org.ein = Some(ein.clone());
        }
        if let Some(mission) = &self.mission {
            org.mission = Some(mission.clone());
        }
        org.updated_at = now();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct GrantPatch {
    pub title: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub funder_id: Option<EntityId>,
    pub funder_name: Option<String>,
    pub description: Option<String>,
    pub amount_requested: Option<Decimal>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date"))]
    pub deadline: Option<Date>,
    pub stage: Option<GrantStage>,
    pub eligibility_score: Option<i32>,
    pub eligibility_notes: Option<String>,
    pub source_url: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub metadata: Option<JsonValue>,
}

impl GrantPatch {
    pub fn is_empty(&self) -> bool {
        self == &GrantPatch::default()
    }

    pub fn apply(&self, grant: &mut Grant) {
        if let Some(title) = &self.title {
            grant.title = title.clone();
        }
        if self.funder_id.is_some() {
            grant.funder_id = self.funder_id;
        }
        if let Some(name) = &self.funder_name {
            grant.funder_name = Some(name.clone());
        }
        if let Some(description) = &self.description {
            grant.description = Some(description.clone());
        }
        if self.amount_requested.is_some() {
            grant.amount_requested = self.amount_requested;
        }
        if self.deadline.is_some() {
            grant.deadline = self.deadline;
        }
        if let Some(stage) = self.stage {
            grant.stage = stage;
        }
        if self.eligibility_score.is_some() {
            grant.eligibility_score = self.eligibility_score;
        }
        if let Some(notes) = &self.eligibility_notes {
            grant.eligibility_notes = Some(notes.clone());
        }
        if let Some(url) = &self.source_url {
            grant.source_url = Some(url.clone());
        }
        if let Some(metadata) = &self.metadata {
            grant.metadata = metadata.clone();
        }
        grant.updated_at = now();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct FunderPatch {
    pub name: Option<String>,
    pub website: Option<String>,
    pub focus_areas: Option<Vec<String>>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub analysis: Option<JsonValue>,
}

impl FunderPatch {
    pub fn is_empty(&self) -> bool {
        self == &FunderPatch::default()
    }

    pub fn apply(&self, funder: &mut Funder) {
        if let Some(name) = &self.name {
            funder.name = name.clone();
        }
        if let Some(website) = &self.website {
            funder.website = Some(website.clone());
        }
        if let Some(areas) = &self.focus_areas {
            funder.focus_areas = areas.clone();
        }
        if let Some(analysis) = &self.analysis {
            funder.analysis = Some(analysis.clone());
        }
        funder.updated_at = now();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ProposalPatch {
    pub title: Option<String>,
    pub status: Option<ProposalStatus>,
    pub quality_score: Option<i32>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub quality_feedback: Option<JsonValue>,
}

impl ProposalPatch {
    pub fn is_empty(&self) -> bool {
        self == &ProposalPatch::default()
    }

    pub fn apply(&self, proposal: &mut Proposal) {
        if let Some(title) = &self.title {
            proposal.title = title.clone();
        }
        if let Some(status) = self.status {
            proposal.status = status;
        }
        if self.quality_score.is_some() {
            proposal.quality_score = self.quality_score;
        }
        if let Some(feedback) = &self.quality_feedback {
            proposal.quality_feedback = Some(feedback.clone());
        }
        proposal.updated_at = now();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SectionPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub sort_order: Option<i32>,
}

impl SectionPatch {
    pub fn is_empty(&self) -> bool {
        self == &SectionPatch::default()
    }

    pub fn apply(&self, section: &mut ProposalSection) {
        if let Some(title) = &self.title {
            section.title = title.clone();
        }
        if let Some(content) = &self.content {
            section.content = content.clone();
        }
        if let Some(order) = self.sort_order {
            section.sort_order = order;
        }
        section.updated_at = now();
    }
}

/// Budget header fields. The total is never patched directly; it follows the
/// line items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct BudgetPatch {
    pub name: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub grant_id: Option<EntityId>,
    pub narrative: Option<String>,
    pub is_template: Option<bool>,
}

impl BudgetPatch {
    pub fn is_empty(&self) -> bool {
        self == &BudgetPatch::default()
    }

    pub fn apply(&self, budget: &mut Budget) {
        if let Some(name) = &self.name {
            budget.name = name.clone();
        }
        if self.grant_id.is_some() {
            budget.grant_id = self.grant_id;
        }
        if let Some(narrative) = &self.narrative {
            budget.narrative = Some(narrative.clone());
        }
        if let Some(is_template) = self.is_template {
            budget.is_template = is_template;
        }
        budget.updated_at = now();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct LineItemPatch {
    pub category: Option<String>,
    pub description: Option<String>,
    pub amount: Option<Decimal>,
}

impl LineItemPatch {
    pub fn is_empty(&self) -> bool {
        self == &LineItemPatch::default()
    }

    pub fn apply(&self, item: &mut BudgetLineItem) {
        if let Some(category) = &self.category {
            item.category = category.clone();
        }
        if let Some(description) = &self.description {
            item.description = description.clone();
        }
        if let Some(amount) = self.amount {
            item.amount = amount;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ReportPatch {
    pub title: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date"))]
    pub due_date: Option<Date>,
    pub status: Option<ReportStatus>,
    pub content: Option<String>,
}

impl ReportPatch {
    pub fn is_empty(&self) -> bool {
        self == &ReportPatch::default()
    }

    pub fn apply(&self, report: &mut Report) {
        if let Some(title) = &self.title {
            report.title = title.clone();
        }
        if let Some(due) = self.due_date {
            report.due_date = due;
        }
        if let Some(status) = self.status {
            report.status = status;
        }
        if let Some(content) = &self.content {
            report.content = Some(content.clone());
        }
        report.updated_at = now();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct DocumentPatch {
    pub file_name: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub grant_id: Option<EntityId>,
    pub category: Option<String>,
    pub category_source: Option<CategorySource>,
}

impl DocumentPatch {
    pub fn is_empty(&self) -> bool {
        self == &DocumentPatch::default()
    }

    pub fn apply(&self, document: &mut Document) {
        if let Some(name) = &self.file_name {
            document.file_name = name.clone();
        }
        if self.grant_id.is_some() {
            document.grant_id = self.grant_id;
        }
        if let Some(category) = &self.category {
            document.category = Some(category.clone());
            // A category set without a source came from a person.
            document.category_source = Some(self.category_source.unwrap_or(CategorySource::User));
        } else if self.category_source.is_some() {
            document.category_source = self.category_source;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct NarrativePatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl NarrativePatch {
    pub fn is_empty(&self) -> bool {
        self == &NarrativePatch::default()
    }

    pub fn apply(&self, narrative: &mut Narrative) {
        if let Some(title) = &self.title {
            narrative.title = title.clone();
        }
        if let Some(content) = &self.content {
            narrative.content = content.clone();
        }
        if let Some(tags) = &self.tags {
            narrative.tags = tags.clone();
        }
        narrative.updated_at = now();
    }
}

/// Status change reported for a workflow execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct WorkflowUpdate {
    pub status: Option<WorkflowStatus>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub result: Option<JsonValue>,
    pub error: Option<String>,
}

impl WorkflowUpdate {
    pub fn is_empty(&self) -> bool {
        self == &WorkflowUpdate::default()
    }

    pub fn apply(&self, execution: &mut WorkflowExecution) {
        if let Some(status) = self.status {
            execution.status = status;
            if status.is_terminal() {
                execution.completed_at.get_or_insert_with(now);
            } else {
                execution.completed_at = None;
            }
        }
        if let Some(result) = &self.result {
            execution.result = Some(result.clone());
        }
        if let Some(error) = &self.error {
            execution.error = Some(error.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{new_entity_id, WorkflowKind};

    #[test]
    fn test_empty_patch_detected() {
        assert!(GrantPatch::default().is_empty());
        let patch = GrantPatch {
            stage: Some(GrantStage::Drafting),
            ..Default::default()
        };
        assert!(!patch.is_empty());
    }

    #[test]
    fn test_grant_patch_touches_only_given_fields() {
        let mut grant = Grant::new(new_entity_id(), "Arts Access");
        grant.description = Some("keep me".to_string());
        let patch = GrantPatch {
            stage: Some(GrantStage::Screening),
            eligibility_score: Some(82),
            ..Default::default()
        };
        patch.apply(&mut grant);
        assert_eq!(grant.stage, GrantStage::Screening);
        assert_eq!(grant.eligibility_score, Some(82));
        assert_eq!(grant.description.as_deref(), Some("keep me"));
        assert_eq!(grant.title, "Arts Access");
    }

    #[test]
    fn test_budget_patch_never_touches_total() {
        let mut budget = Budget::new(new_entity_id(), "Operating");
        budget.total_amount = Decimal::new(1000, 0);
        BudgetPatch {
            name: Some("Renamed".into()),
            ..Default::default()
        }
        .apply(&mut budget);
        assert_eq!(budget.total_amount, Decimal::new(1000, 0));
        assert_eq!(budget.name, "Renamed");
    }

    #[test]
    fn test_document_category_defaults_to_user_source() {
        let mut doc = Document {
            id: new_entity_id(),
            org_id: new_entity_id(),
            grant_id: None,
            file_name: "990.pdf".into(),
            content_type: "application/pdf".into(),
            size_bytes: 10,
            storage_path: "org/990.pdf".into(),
            category: None,
            category_source: None,
            created_at: now(),
        };
        DocumentPatch {
            category: Some("financial".into()),
            ..Default::default()
        }
        .apply(&mut doc);
        assert_eq!(doc.category_source, Some(CategorySource::User));

        DocumentPatch {
            category: Some("legal".into()),
            category_source: Some(CategorySource::Ai),
            ..Default::default()
        }
        .apply(&mut doc);
        assert_eq!(doc.category_source, Some(CategorySource::Ai));
    }

    #[test]
    fn test_terminal_workflow_update_sets_completed_at() {
        let mut exec = WorkflowExecution::running(
            new_entity_id(),
            WorkflowKind::DiscoverGrants,
            None,
            serde_json::json!({}),
        );
        WorkflowUpdate {
            status: Some(WorkflowStatus::Completed),
            result: Some(serde_json::json!({"found": 3})),
            error: None,
        }
        .apply(&mut exec);
        assert_eq!(exec.status, WorkflowStatus::Completed);
        assert!(exec.completed_at.is_some());
        assert_eq!(exec.result, Some(serde_json::json!({"found": 3})));
    }

    #[test]
    fn test_failed_workflow_update_records_error() {
        let mut exec = WorkflowExecution::running(
            new_entity_id(),
            WorkflowKind::AutoSubmit,
            Some(new_entity_id()),
            serde_json::json!({}),
        );
        WorkflowUpdate {
            status: Some(WorkflowStatus::Failed),
            result: None,
            error: Some("portal rejected upload".into()),
        }
        .apply(&mut exec);
        assert!(exec.completed_at.is_some());
        assert_eq!(exec.error.as_deref(), Some("portal rejected upload"));
    }
}
