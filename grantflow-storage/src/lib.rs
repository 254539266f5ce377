//! Grantflow Storage - Storage Trait and In-Memory Implementation
//!
//! Defines the storage abstraction for Grantflow entities. The PostgreSQL
//! implementation lives in grantflow-api next to its connection pool.
//!
//! Every call carries an [`Access`] describing who is asking. Tenant access
//! only sees rows of its own organization; service access (the callback
//! receiver) sees everything.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use grantflow_core::{
    Award, Budget, BudgetLineItem, BudgetPatch, ChecklistItem, Document, DocumentPatch, EntityId,
    EntityKind, Funder, FunderPatch, Grant, GrantPatch, GrantStage, GrantflowResult, LineItemPatch,
    Narrative, NarrativePatch, Organization, OrganizationPatch, Profile, Proposal, ProposalPatch,
    ProposalSection, Report, ReportPatch, SectionPatch, StorageError, Submission,
    SubmissionChecklist, WorkflowExecution, WorkflowStatus, WorkflowUpdate,
};

// ============================================================================
// ACCESS
// ============================================================================

/// Who a storage call runs on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// A member of one organization. Rows of other organizations are invisible.
    Tenant(EntityId),
    /// Elevated access used by the callback receiver. No tenant filter.
    Service,
}

impl Access {
    /// Organization to filter by, or `None` for unfiltered access.
    pub fn org_filter(&self) -> Option<EntityId> {
        match self {
            Access::Tenant(org_id) => Some(*org_id),
            Access::Service => None,
        }
    }

    /// Whether a row owned by `org_id` is visible.
    pub fn permits(&self, org_id: EntityId) -> bool {
        match self {
            Access::Tenant(own) => *own == org_id,
            Access::Service => true,
        }
    }

    /// Reject a write whose row belongs to another organization.
    pub fn check_write(&self, entity: EntityKind, id: EntityId, org_id: EntityId) -> GrantflowResult<()> {
        match self {
            Access::Tenant(own) if *own != org_id => Err(StorageError::AccessDenied {
                entity,
                id,
                org_id: *own,
            }
            .into()),
            _ => Ok(()),
        }
    }
}

/// Filter for listing workflow executions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowFilter {
    pub workflow_name: Option<String>,
    pub status: Option<WorkflowStatus>,
    pub entity_id: Option<EntityId>,
}

impl WorkflowFilter {
    pub fn matches(&self, execution: &WorkflowExecution) -> bool {
        self.workflow_name
            .as_deref()
            .map_or(true, |name| execution.workflow_name == name)
            && self.status.map_or(true, |status| execution.status == status)
            && self.entity_id.map_or(true, |id| execution.entity_id == Some(id))
    }
}

/// Parameters for copying a template budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateCopy {
    pub template_id: EntityId,
    /// Organization that will own the copy.
    pub org_id: EntityId,
    pub grant_id: Option<EntityId>,
    pub name: Option<String>,
}

// ============================================================================
// STORAGE TRAIT
// ============================================================================

/// Async storage for Grantflow entities.
///
/// Getters return `Ok(None)` for rows that are missing or invisible to the
/// caller. Updates and deletes of such rows fail with `NotFound`. Operations
/// that touch more than one row are atomic.
#[async_trait]
pub trait GrantStore: Send + Sync {
    // ========================================================================
    // ORGANIZATIONS & PROFILES
    // ========================================================================

    async fn organization_insert(&self, org: &Organization) -> GrantflowResult<()>;

    async fn organization_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<Organization>>;

    async fn organization_update(
        &self,
        access: Access,
        id: EntityId,
        patch: &OrganizationPatch,
    ) -> GrantflowResult<Organization>;

    async fn profile_insert(&self, profile: &Profile) -> GrantflowResult<()>;

    /// Look up a profile by user id. Used to resolve tenant membership, so it
    /// takes no access scope.
    async fn profile_get(&self, user_id: EntityId) -> GrantflowResult<Option<Profile>>;

    async fn profile_list(&self, access: Access) -> GrantflowResult<Vec<Profile>>;

    // ========================================================================
    // GRANTS
    // ========================================================================

    async fn grant_insert(&self, access: Access, grant: &Grant) -> GrantflowResult<()>;

    /// Insert a batch of grants. Either all rows land or none do.
    async fn grant_insert_many(&self, access: Access, grants: &[Grant]) -> GrantflowResult<()>;

    async fn grant_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<Grant>>;

    async fn grant_list(&self, access: Access, stage: Option<GrantStage>) -> GrantflowResult<Vec<Grant>>;

    async fn grant_update(&self, access: Access, id: EntityId, patch: &GrantPatch) -> GrantflowResult<Grant>;

    /// Delete a grant with its proposals, awards, checklist and submissions.
    async fn grant_delete(&self, access: Access, id: EntityId) -> GrantflowResult<()>;

    // ========================================================================
    // FUNDERS
    // ========================================================================

    async fn funder_insert(&self, access: Access, funder: &Funder) -> GrantflowResult<()>;

    async fn funder_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<Funder>>;

    async fn funder_list(&self, access: Access) -> GrantflowResult<Vec<Funder>>;

    async fn funder_update(&self, access: Access, id: EntityId, patch: &FunderPatch) -> GrantflowResult<Funder>;

    // ========================================================================
    // PROPOSALS & SECTIONS
    // ========================================================================

    /// Insert a proposal together with its sections.
    async fn proposal_create(
        &self,
        access: Access,
        proposal: &Proposal,
        sections: &[ProposalSection],
    ) -> GrantflowResult<()>;

    async fn proposal_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<Proposal>>;

    async fn proposal_list(&self, access: Access, grant_id: Option<EntityId>) -> GrantflowResult<Vec<Proposal>>;

    async fn proposal_update(
        &self,
        access: Access,
        id: EntityId,
        patch: &ProposalPatch,
    ) -> GrantflowResult<Proposal>;

    /// Delete a proposal and its sections.
    async fn proposal_delete(&self, access: Access, id: EntityId) -> GrantflowResult<()>;

    async fn section_insert(&self, access: Access, section: &ProposalSection) -> GrantflowResult<()>;

    async fn section_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<ProposalSection>>;

    /// Sections of a proposal in ascending sort order.
    async fn section_list(&self, access: Access, proposal_id: EntityId) -> GrantflowResult<Vec<ProposalSection>>;

    async fn section_update(
        &self,
        access: Access,
        id: EntityId,
        patch: &SectionPatch,
    ) -> GrantflowResult<ProposalSection>;

    async fn section_delete(&self, access: Access, id: EntityId) -> GrantflowResult<ProposalSection>;

    /// Assign `sort_order = position` to each listed section. Every id must
    /// belong to the proposal.
    async fn section_reorder(
        &self,
        access: Access,
        proposal_id: EntityId,
        ordered_ids: &[EntityId],
    ) -> GrantflowResult<Vec<ProposalSection>>;

    // ========================================================================
    // BUDGETS & LINE ITEMS
    // ========================================================================

    /// Insert a budget with its line items. The stored total is the sum of
    /// the items regardless of `budget.total_amount`.
    async fn budget_create(
        &self,
        access: Access,
        budget: &Budget,
        items: &[BudgetLineItem],
    ) -> GrantflowResult<Budget>;

    async fn budget_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<Budget>>;

    async fn budget_list(&self, access: Access, grant_id: Option<EntityId>) -> GrantflowResult<Vec<Budget>>;

    async fn budget_update(&self, access: Access, id: EntityId, patch: &BudgetPatch) -> GrantflowResult<Budget>;

    /// Delete a budget and its line items.
    async fn budget_delete(&self, access: Access, id: EntityId) -> GrantflowResult<()>;

    /// Copy a template budget and its line items.
    async fn budget_from_template(&self, access: Access, copy: &TemplateCopy) -> GrantflowResult<Budget>;

    async fn line_item_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<BudgetLineItem>>;

    async fn line_item_list(&self, access: Access, budget_id: EntityId) -> GrantflowResult<Vec<BudgetLineItem>>;

    /// Add line items and return the budget with its recomputed total.
    async fn line_items_insert(
        &self,
        access: Access,
        budget_id: EntityId,
        items: &[BudgetLineItem],
    ) -> GrantflowResult<Budget>;

    async fn line_item_update(
        &self,
        access: Access,
        id: EntityId,
        patch: &LineItemPatch,
    ) -> GrantflowResult<(BudgetLineItem, Budget)>;

    async fn line_item_delete(&self, access: Access, id: EntityId) -> GrantflowResult<Budget>;

    // ========================================================================
    // AWARDS & REPORTS
    // ========================================================================

    async fn award_insert(&self, access: Access, award: &Award) -> GrantflowResult<()>;

    async fn award_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<Award>>;

    async fn award_list(&self, access: Access, grant_id: Option<EntityId>) -> GrantflowResult<Vec<Award>>;

    /// Delete an award and its reports.
    async fn award_delete(&self, access: Access, id: EntityId) -> GrantflowResult<()>;

    async fn report_insert(&self, access: Access, report: &Report) -> GrantflowResult<()>;

    async fn report_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<Report>>;

    async fn report_list(&self, access: Access, award_id: Option<EntityId>) -> GrantflowResult<Vec<Report>>;

    async fn report_update(&self, access: Access, id: EntityId, patch: &ReportPatch) -> GrantflowResult<Report>;

    async fn report_delete(&self, access: Access, id: EntityId) -> GrantflowResult<()>;

    // ========================================================================
    // DOCUMENTS & NARRATIVES
    // ========================================================================

    async fn document_insert(&self, access: Access, document: &Document) -> GrantflowResult<()>;

    async fn document_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<Document>>;

    async fn document_list(&self, access: Access, grant_id: Option<EntityId>) -> GrantflowResult<Vec<Document>>;

    async fn document_update(
        &self,
        access: Access,
        id: EntityId,
        patch: &DocumentPatch,
    ) -> GrantflowResult<Document>;

    /// Delete document metadata and return the removed row so the caller can
    /// drop the stored object.
    async fn document_delete(&self, access: Access, id: EntityId) -> GrantflowResult<Document>;

    async fn narrative_insert(&self, access: Access, narrative: &Narrative) -> GrantflowResult<()>;

    async fn narrative_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<Narrative>>;

    async fn narrative_list(&self, access: Access) -> GrantflowResult<Vec<Narrative>>;

    async fn narrative_update(
        &self,
        access: Access,
        id: EntityId,
        patch: &NarrativePatch,
    ) -> GrantflowResult<Narrative>;

    async fn narrative_delete(&self, access: Access, id: EntityId) -> GrantflowResult<()>;

    // ========================================================================
    // CHECKLISTS & SUBMISSIONS
    // ========================================================================

    /// Create or replace the checklist of a grant, recomputing its completion
    /// percentage. Returns the stored row and whether it was newly created.
    async fn checklist_upsert(
        &self,
        access: Access,
        org_id: EntityId,
        grant_id: EntityId,
        items: &[ChecklistItem],
    ) -> GrantflowResult<(SubmissionChecklist, bool)>;

    async fn checklist_get(&self, access: Access, grant_id: EntityId) -> GrantflowResult<Option<SubmissionChecklist>>;

    async fn submission_insert(&self, access: Access, submission: &Submission) -> GrantflowResult<()>;

    /// Record a submission and move its grant to the `submission` stage.
    async fn submission_complete(&self, access: Access, submission: &Submission) -> GrantflowResult<Grant>;

    async fn submission_list(&self, access: Access, grant_id: Option<EntityId>) -> GrantflowResult<Vec<Submission>>;

    // ========================================================================
    // WORKFLOW LEDGER
    // ========================================================================

    async fn workflow_insert(&self, access: Access, execution: &WorkflowExecution) -> GrantflowResult<()>;

    async fn workflow_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<WorkflowExecution>>;

    async fn workflow_list(
        &self,
        access: Access,
        filter: &WorkflowFilter,
    ) -> GrantflowResult<Vec<WorkflowExecution>>;

    async fn workflow_update(
        &self,
        access: Access,
        id: EntityId,
        update: &WorkflowUpdate,
    ) -> GrantflowResult<WorkflowExecution>;

    // ========================================================================
    // HEALTH
    // ========================================================================

    /// Check if the storage backend is reachable.
    async fn health_check(&self) -> GrantflowResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use grantflow_core::{new_entity_id, WorkflowKind};

    #[test]
    fn test_tenant_access_filters_by_org() {
        let org = new_entity_id();
        let access = Access::Tenant(org);
        assert_eq!(access.org_filter(), Some(org));
        assert!(access.permits(org));
        assert!(!access.permits(new_entity_id()));
    }

    #[test]
    fn test_service_access_sees_everything() {
        assert_eq!(Access::Service.org_filter(), None);
        assert!(Access::Service.permits(new_entity_id()));
        assert!(Access::Service
            .check_write(EntityKind::Grant, new_entity_id(), new_entity_id())
            .is_ok());
    }

    #[test]
    fn test_tenant_write_to_other_org_denied() {
        let access = Access::Tenant(new_entity_id());
        let result = access.check_write(EntityKind::Grant, new_entity_id(), new_entity_id());
        assert!(matches!(
            result,
            Err(grantflow_core::GrantflowError::Storage(StorageError::AccessDenied { .. }))
        ));
    }

    #[test]
    fn test_workflow_filter_matches() {
        let exec = WorkflowExecution::running(
            new_entity_id(),
            WorkflowKind::GenerateBudget,
            None,
            serde_json::json!({}),
        );
        assert!(WorkflowFilter::default().matches(&exec));
        assert!(WorkflowFilter {
            workflow_name: Some("generate-budget".into()),
            status: Some(WorkflowStatus::Running),
            entity_id: None,
        }
        .matches(&exec));
        assert!(!WorkflowFilter {
            status: Some(WorkflowStatus::Completed),
            ..Default::default()
        }
        .matches(&exec));
    }
}
