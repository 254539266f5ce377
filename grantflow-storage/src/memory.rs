//! In-memory `GrantStore`
//!
//! One lock guards every table, so each call is atomic the way a database
//! transaction would be. Foreign keys and cascades follow the PostgreSQL
//! schema: a tenant row needs an existing organization, and deleting a parent
//! removes its children.

use crate::{Access, GrantStore, TemplateCopy, WorkflowFilter};
use async_trait::async_trait;
use grantflow_core::{
    budget_total, new_entity_id, now, Award, Budget, BudgetLineItem, BudgetPatch, ChecklistItem,
    Document, DocumentPatch, EntityId, EntityKind, Funder, FunderPatch, Grant, GrantPatch,
    GrantStage, GrantflowError, GrantflowResult, LineItemPatch, Narrative, NarrativePatch,
    Organization, OrganizationPatch, Profile, Proposal, ProposalPatch, ProposalSection, Report,
    ReportPatch, SectionPatch, StorageError, Submission, SubmissionChecklist, Timestamp,
    WorkflowExecution, WorkflowUpdate,
};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

// ============================================================================
// ROW HELPERS
// ============================================================================

/// A tenant-owned row.
trait Row: Clone {
    const KIND: EntityKind;
    fn id(&self) -> EntityId;
    fn org_id(&self) -> EntityId;
    fn created(&self) -> Timestamp;
}

macro_rules! tenant_row {
    ($ty:ty, $kind:expr, $created:ident) => {
        impl Row for $ty {
            const KIND: EntityKind = $kind;
            fn id(&self) -> EntityId {
                self.id
            }
            fn org_id(&self) -> EntityId {
                self.org_id
            }
            fn created(&self) -> Timestamp {
                self.$created
            }
        }
    };
}

tenant_row!(Profile, EntityKind::Profile, created_at);
tenant_row!(Grant, EntityKind::Grant, created_at);
tenant_row!(Funder, EntityKind::Funder, created_at);
tenant_row!(Proposal, EntityKind::Proposal, created_at);
tenant_row!(Budget, EntityKind::Budget, created_at);
tenant_row!(Award, EntityKind::Award, created_at);
tenant_row!(Report, EntityKind::Report, created_at);
tenant_row!(Document, EntityKind::Document, created_at);
tenant_row!(Narrative, EntityKind::Narrative, created_at);
tenant_row!(SubmissionChecklist, EntityKind::SubmissionChecklist, created_at);
tenant_row!(Submission, EntityKind::Submission, created_at);
tenant_row!(WorkflowExecution, EntityKind::WorkflowExecution, started_at);

impl Row for Organization {
    const KIND: EntityKind = EntityKind::Organization;
    fn id(&self) -> EntityId {
        self.id
    }
    fn org_id(&self) -> EntityId {
        self.id
    }
    fn created(&self) -> Timestamp {
        self.created_at
    }
}

fn visible<T: Row>(map: &HashMap<EntityId, T>, access: Access, id: EntityId) -> Option<T> {
    map.get(&id)
        .filter(|row| access.permits(row.org_id()))
        .cloned()
}

fn visible_mut<T: Row>(
    map: &mut HashMap<EntityId, T>,
    access: Access,
    id: EntityId,
) -> GrantflowResult<&mut T> {
    map.get_mut(&id)
        .filter(|row| access.permits(row.org_id()))
        .ok_or_else(|| GrantflowError::not_found(T::KIND, id))
}

fn remove_visible<T: Row>(
    map: &mut HashMap<EntityId, T>,
    access: Access,
    id: EntityId,
) -> GrantflowResult<T> {
    match map.get(&id) {
        Some(row) if access.permits(row.org_id()) => {}
        _ => return Err(GrantflowError::not_found(T::KIND, id)),
    }
    map.remove(&id)
        .ok_or_else(|| GrantflowError::not_found(T::KIND, id))
}

/// Visible rows matching `keep`, newest first.
fn list<T: Row>(map: &HashMap<EntityId, T>, access: Access, keep: impl Fn(&T) -> bool) -> Vec<T> {
    let mut rows: Vec<T> = map
        .values()
        .filter(|row| access.permits(row.org_id()) && keep(row))
        .cloned()
        .collect();
    rows.sort_by(|a, b| b.created().cmp(&a.created()).then_with(|| b.id().cmp(&a.id())));
    rows
}

fn ensure_absent<T>(map: &HashMap<EntityId, T>, entity: EntityKind, id: EntityId) -> GrantflowResult<()> {
    if map.contains_key(&id) {
        return Err(StorageError::InsertFailed {
            entity,
            reason: format!("duplicate key {id}"),
        }
        .into());
    }
    Ok(())
}

fn sort_sections(sections: &mut [ProposalSection]) {
    sections.sort_by(|a, b| {
        a.sort_order
            .cmp(&b.sort_order)
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
}

// ============================================================================
// TABLES
// ============================================================================

#[derive(Debug, Default)]
struct Tables {
    organizations: HashMap<EntityId, Organization>,
    profiles: HashMap<EntityId, Profile>,
    grants: HashMap<EntityId, Grant>,
    funders: HashMap<EntityId, Funder>,
    proposals: HashMap<EntityId, Proposal>,
    sections: HashMap<EntityId, ProposalSection>,
    budgets: HashMap<EntityId, Budget>,
    line_items: HashMap<EntityId, BudgetLineItem>,
    awards: HashMap<EntityId, Award>,
    reports: HashMap<EntityId, Report>,
    documents: HashMap<EntityId, Document>,
    narratives: HashMap<EntityId, Narrative>,
    checklists: HashMap<EntityId, SubmissionChecklist>,
    submissions: HashMap<EntityId, Submission>,
    workflows: HashMap<EntityId, WorkflowExecution>,
}

impl Tables {
    /// Tenant-owned rows reference an existing organization.
    fn require_org(&self, entity: EntityKind, org_id: EntityId) -> GrantflowResult<()> {
        if self.organizations.contains_key(&org_id) {
            Ok(())
        } else {
            Err(StorageError::InsertFailed {
                entity,
                reason: format!("organization {org_id} does not exist"),
            }
            .into())
        }
    }

    /// A referenced grant must exist, be visible and share the row's org.
    fn require_grant(&self, access: Access, grant_id: EntityId, org_id: EntityId) -> GrantflowResult<()> {
        match self.grants.get(&grant_id) {
            Some(grant) if access.permits(grant.org_id) && grant.org_id == org_id => Ok(()),
            _ => Err(GrantflowError::not_found(EntityKind::Grant, grant_id)),
        }
    }

    fn require_funder(&self, access: Access, funder_id: EntityId, org_id: EntityId) -> GrantflowResult<()> {
        match self.funders.get(&funder_id) {
            Some(funder) if access.permits(funder.org_id) && funder.org_id == org_id => Ok(()),
            _ => Err(GrantflowError::not_found(EntityKind::Funder, funder_id)),
        }
    }

    fn require_award(&self, access: Access, award_id: EntityId, org_id: EntityId) -> GrantflowResult<()> {
        match self.awards.get(&award_id) {
            Some(award) if access.permits(award.org_id) && award.org_id == org_id => Ok(()),
            _ => Err(GrantflowError::not_found(EntityKind::Award, award_id)),
        }
    }

    fn proposal_visible(&self, access: Access, proposal_id: EntityId) -> GrantflowResult<&Proposal> {
        self.proposals
            .get(&proposal_id)
            .filter(|p| access.permits(p.org_id))
            .ok_or_else(|| GrantflowError::not_found(EntityKind::Proposal, proposal_id))
    }

    fn budget_visible(&self, access: Access, budget_id: EntityId) -> GrantflowResult<&Budget> {
        self.budgets
            .get(&budget_id)
            .filter(|b| access.permits(b.org_id))
            .ok_or_else(|| GrantflowError::not_found(EntityKind::Budget, budget_id))
    }

    /// Section by id, hidden when its proposal is not visible.
    fn section_visible(&self, access: Access, id: EntityId) -> GrantflowResult<&ProposalSection> {
        self.sections
            .get(&id)
            .filter(|s| self.proposal_visible(access, s.proposal_id).is_ok())
            .ok_or_else(|| GrantflowError::not_found(EntityKind::ProposalSection, id))
    }

    fn line_item_visible(&self, access: Access, id: EntityId) -> GrantflowResult<&BudgetLineItem> {
        self.line_items
            .get(&id)
            .filter(|item| self.budget_visible(access, item.budget_id).is_ok())
            .ok_or_else(|| GrantflowError::not_found(EntityKind::BudgetLineItem, id))
    }

    fn validate_grant(&self, access: Access, grant: &Grant) -> GrantflowResult<()> {
        access.check_write(EntityKind::Grant, grant.id, grant.org_id)?;
        self.require_org(EntityKind::Grant, grant.org_id)?;
        if let Some(funder_id) = grant.funder_id {
            self.require_funder(access, funder_id, grant.org_id)?;
        }
        ensure_absent(&self.grants, EntityKind::Grant, grant.id)
    }

    fn validate_budget(&self, access: Access, budget: &Budget) -> GrantflowResult<()> {
        access.check_write(EntityKind::Budget, budget.id, budget.org_id)?;
        self.require_org(EntityKind::Budget, budget.org_id)?;
        if let Some(grant_id) = budget.grant_id {
            self.require_grant(access, grant_id, budget.org_id)?;
        }
        ensure_absent(&self.budgets, EntityKind::Budget, budget.id)
    }

    fn validate_line_items(&self, budget_id: EntityId, items: &[BudgetLineItem]) -> GrantflowResult<()> {
        let mut seen = HashSet::new();
        for item in items {
            if item.budget_id != budget_id {
                return Err(GrantflowError::invalid_value(
                    "budget_id",
                    format!("line item {} belongs to budget {}", item.id, item.budget_id),
                ));
            }
            if !seen.insert(item.id) {
                return Err(StorageError::InsertFailed {
                    entity: EntityKind::BudgetLineItem,
                    reason: format!("duplicate key {}", item.id),
                }
                .into());
            }
            ensure_absent(&self.line_items, EntityKind::BudgetLineItem, item.id)?;
        }
        Ok(())
    }

    fn validate_submission(&self, access: Access, submission: &Submission) -> GrantflowResult<()> {
        access.check_write(EntityKind::Submission, submission.id, submission.org_id)?;
        self.require_org(EntityKind::Submission, submission.org_id)?;
        self.require_grant(access, submission.grant_id, submission.org_id)?;
        ensure_absent(&self.submissions, EntityKind::Submission, submission.id)
    }

    /// Set a budget's total to the sum of its line items.
    fn recompute_budget(&mut self, budget_id: EntityId) -> GrantflowResult<Budget> {
        let total = budget_total(self.line_items.values().filter(|item| item.budget_id == budget_id));
        let budget = self
            .budgets
            .get_mut(&budget_id)
            .ok_or_else(|| GrantflowError::not_found(EntityKind::Budget, budget_id))?;
        budget.total_amount = total;
        budget.updated_at = now();
        Ok(budget.clone())
    }

    fn remove_proposal_tree(&mut self, proposal_id: EntityId) {
        self.sections.retain(|_, s| s.proposal_id != proposal_id);
        self.proposals.remove(&proposal_id);
    }

    fn remove_award_tree(&mut self, award_id: EntityId) {
        self.reports.retain(|_, r| r.award_id != award_id);
        self.awards.remove(&award_id);
    }
}

// ============================================================================
// MEMORY STORE
// ============================================================================

/// In-memory storage for tests and local development.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of workflow ledger rows across all tenants.
    pub async fn workflow_count(&self) -> usize {
        self.tables.read().await.workflows.len()
    }

    /// Total number of rows across all tables.
    pub async fn row_count(&self) -> usize {
        let t = self.tables.read().await;
        t.organizations.len()
            + t.profiles.len()
            + t.grants.len()
            + t.funders.len()
            + t.proposals.len()
            + t.sections.len()
            + t.budgets.len()
            + t.line_items.len()
            + t.awards.len()
            + t.reports.len()
            + t.documents.len()
            + t.narratives.len()
            + t.checklists.len()
            + t.submissions.len()
            + t.workflows.len()
    }
}

#[async_trait]
impl GrantStore for MemoryStore {
    // === Organizations & profiles ===

    async fn organization_insert(&self, org: &Organization) -> GrantflowResult<()> {
        let mut t = self.tables.write().await;
        ensure_absent(&t.organizations, EntityKind::Organization, org.id)?;
        t.organizations.insert(org.id, org.clone());
        Ok(())
    }

    async fn organization_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<Organization>> {
        Ok(visible(&self.tables.read().await.organizations, access, id))
    }

    async fn organization_update(
        &self,
        access: Access,
        id: EntityId,
        patch: &OrganizationPatch,
    ) -> GrantflowResult<Organization> {
        let mut t = self.tables.write().await;
        let org = visible_mut(&mut t.organizations, access, id)?;
        patch.apply(org);
        Ok(org.clone())
    }

    async fn profile_insert(&self, profile: &Profile) -> GrantflowResult<()> {
        let mut t = self.tables.write().await;
        t.require_org(EntityKind::Profile, profile.org_id)?;
        ensure_absent(&t.profiles, EntityKind::Profile, profile.id)?;
        t.profiles.insert(profile.id, profile.clone());
        Ok(())
    }

    async fn profile_get(&self, user_id: EntityId) -> GrantflowResult<Option<Profile>> {
        Ok(self.tables.read().await.profiles.get(&user_id).cloned())
    }

    async fn profile_list(&self, access: Access) -> GrantflowResult<Vec<Profile>> {
        Ok(list(&self.tables.read().await.profiles, access, |_| true))
    }

    // === Grants ===

    async fn grant_insert(&self, access: Access, grant: &Grant) -> GrantflowResult<()> {
        let mut t = self.tables.write().await;
        t.validate_grant(access, grant)?;
        t.grants.insert(grant.id, grant.clone());
        Ok(())
    }

    async fn grant_insert_many(&self, access: Access, grants: &[Grant]) -> GrantflowResult<()> {
        let mut t = self.tables.write().await;
        let mut seen = HashSet::new();
        for grant in grants {
            t.validate_grant(access, grant)?;
            if !seen.insert(grant.id) {
                return Err(StorageError::InsertFailed {
                    entity: EntityKind::Grant,
                    reason: format!("duplicate key {}", grant.id),
                }
                .into());
            }
        }
        for grant in grants {
            t.grants.insert(grant.id, grant.clone());
        }
        Ok(())
    }

    async fn grant_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<Grant>> {
        Ok(visible(&self.tables.read().await.grants, access, id))
    }

    async fn grant_list(&self, access: Access, stage: Option<GrantStage>) -> GrantflowResult<Vec<Grant>> {
        Ok(list(&self.tables.read().await.grants, access, |g| {
            stage.map_or(true, |s| g.stage == s)
        }))
    }

    async fn grant_update(&self, access: Access, id: EntityId, patch: &GrantPatch) -> GrantflowResult<Grant> {
        let mut guard = self.tables.write().await;
        let t = &mut *guard;
        if let Some(funder_id) = patch.funder_id {
            let org_id = visible(&t.grants, access, id)
                .map(|g| g.org_id)
                .ok_or_else(|| GrantflowError::not_found(EntityKind::Grant, id))?;
            t.require_funder(access, funder_id, org_id)?;
        }
        let grant = visible_mut(&mut t.grants, access, id)?;
        patch.apply(grant);
        Ok(grant.clone())
    }

    async fn grant_delete(&self, access: Access, id: EntityId) -> GrantflowResult<()> {
        let mut guard = self.tables.write().await;
        let t = &mut *guard;
        remove_visible(&mut t.grants, access, id)?;

        let proposal_ids: Vec<EntityId> = t
            .proposals
            .values()
            .filter(|p| p.grant_id == id)
            .map(|p| p.id)
            .collect();
        for proposal_id in proposal_ids {
            t.remove_proposal_tree(proposal_id);
        }
        let award_ids: Vec<EntityId> = t
            .awards
            .values()
            .filter(|a| a.grant_id == id)
            .map(|a| a.id)
            .collect();
        for award_id in award_ids {
            t.remove_award_tree(award_id);
        }
        t.checklists.retain(|_, c| c.grant_id != id);
        t.submissions.retain(|_, s| s.grant_id != id);
        for budget in t.budgets.values_mut().filter(|b| b.grant_id == Some(id)) {
            budget.grant_id = None;
        }
        for document in t.documents.values_mut().filter(|d| d.grant_id == Some(id)) {
            document.grant_id = None;
        }
        Ok(())
    }

    // === Funders ===

    async fn funder_insert(&self, access: Access, funder: &Funder) -> GrantflowResult<()> {
        let mut t = self.tables.write().await;
        access.check_write(EntityKind::Funder, funder.id, funder.org_id)?;
        t.require_org(EntityKind::Funder, funder.org_id)?;
        ensure_absent(&t.funders, EntityKind::Funder, funder.id)?;
        t.funders.insert(funder.id, funder.clone());
        Ok(())
    }

    async fn funder_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<Funder>> {
        Ok(visible(&self.tables.read().await.funders, access, id))
    }

    async fn funder_list(&self, access: Access) -> GrantflowResult<Vec<Funder>> {
        Ok(list(&self.tables.read().await.funders, access, |_| true))
    }

    async fn funder_update(&self, access: Access, id: EntityId, patch: &FunderPatch) -> GrantflowResult<Funder> {
        let mut t = self.tables.write().await;
        let funder = visible_mut(&mut t.funders, access, id)?;
        patch.apply(funder);
        Ok(funder.clone())
    }

    // === Proposals & sections ===

    async fn proposal_create(
        &self,
        access: Access,
        proposal: &Proposal,
        sections: &[ProposalSection],
    ) -> GrantflowResult<()> {
        let mut t = self.tables.write().await;
        access.check_write(EntityKind::Proposal, proposal.id, proposal.org_id)?;
        t.require_org(EntityKind::Proposal, proposal.org_id)?;
        t.require_grant(access, proposal.grant_id, proposal.org_id)?;
        ensure_absent(&t.proposals, EntityKind::Proposal, proposal.id)?;
        let mut seen = HashSet::new();
        for section in sections {
            if section.proposal_id != proposal.id {
                return Err(GrantflowError::invalid_value(
                    "proposal_id",
                    format!("section {} belongs to proposal {}", section.id, section.proposal_id),
                ));
            }
            if !seen.insert(section.id) {
                return Err(StorageError::InsertFailed {
                    entity: EntityKind::ProposalSection,
                    reason: format!("duplicate key {}", section.id),
                }
                .into());
            }
            ensure_absent(&t.sections, EntityKind::ProposalSection, section.id)?;
        }
        t.proposals.insert(proposal.id, proposal.clone());
        for section in sections {
            t.sections.insert(section.id, section.clone());
        }
        Ok(())
    }

    async fn proposal_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<Proposal>> {
        Ok(visible(&self.tables.read().await.proposals, access, id))
    }

    async fn proposal_list(&self, access: Access, grant_id: Option<EntityId>) -> GrantflowResult<Vec<Proposal>> {
        Ok(list(&self.tables.read().await.proposals, access, |p| {
            grant_id.map_or(true, |g| p.grant_id == g)
        }))
    }

    async fn proposal_update(
        &self,
        access: Access,
        id: EntityId,
        patch: &ProposalPatch,
    ) -> GrantflowResult<Proposal> {
        let mut t = self.tables.write().await;
        let proposal = visible_mut(&mut t.proposals, access, id)?;
        patch.apply(proposal);
        Ok(proposal.clone())
    }

    async fn proposal_delete(&self, access: Access, id: EntityId) -> GrantflowResult<()> {
        let mut t = self.tables.write().await;
        t.proposal_visible(access, id)?;
        t.remove_proposal_tree(id);
        Ok(())
    }

    async fn section_insert(&self, access: Access, section: &ProposalSection) -> GrantflowResult<()> {
        let mut t = self.tables.write().await;
        t.proposal_visible(access, section.proposal_id)?;
        ensure_absent(&t.sections, EntityKind::ProposalSection, section.id)?;
        t.sections.insert(section.id, section.clone());
        Ok(())
    }

    async fn section_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<ProposalSection>> {
        let t = self.tables.read().await;
        Ok(t.section_visible(access, id).ok().cloned())
    }

    async fn section_list(&self, access: Access, proposal_id: EntityId) -> GrantflowResult<Vec<ProposalSection>> {
        let t = self.tables.read().await;
        if t.proposal_visible(access, proposal_id).is_err() {
            return Ok(Vec::new());
        }
        let mut sections: Vec<ProposalSection> = t
            .sections
            .values()
            .filter(|s| s.proposal_id == proposal_id)
            .cloned()
            .collect();
        sort_sections(&mut sections);
        Ok(sections)
    }

    async fn section_update(
        &self,
        access: Access,
        id: EntityId,
        patch: &SectionPatch,
    ) -> GrantflowResult<ProposalSection> {
        let mut t = self.tables.write().await;
        t.section_visible(access, id)?;
        let section = t
            .sections
            .get_mut(&id)
            .ok_or_else(|| GrantflowError::not_found(EntityKind::ProposalSection, id))?;
        patch.apply(section);
        Ok(section.clone())
    }

    async fn section_delete(&self, access: Access, id: EntityId) -> GrantflowResult<ProposalSection> {
        let mut t = self.tables.write().await;
        t.section_visible(access, id)?;
        t.sections
            .remove(&id)
            .ok_or_else(|| GrantflowError::not_found(EntityKind::ProposalSection, id))
    }

    async fn section_reorder(
        &self,
        access: Access,
        proposal_id: EntityId,
        ordered_ids: &[EntityId],
    ) -> GrantflowResult<Vec<ProposalSection>> {
        let mut t = self.tables.write().await;
        t.proposal_visible(access, proposal_id)?;
        let mut seen = HashSet::new();
        for id in ordered_ids {
            let belongs = t
                .sections
                .get(id)
                .map_or(false, |s| s.proposal_id == proposal_id);
            if !belongs {
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
            if let Some(section) = t.sections.get_mut(id) {
                section.sort_order = position as i32;
                section.updated_at = touched;
            }
        }
        let mut sections: Vec<ProposalSection> = t
            .sections
            .values()
            .filter(|s| s.proposal_id == proposal_id)
            .cloned()
            .collect();
        sort_sections(&mut sections);
        Ok(sections)
    }

    // === Budgets & line items ===

    async fn budget_create(
        &self,
        access: Access,
        budget: &Budget,
        items: &[BudgetLineItem],
    ) -> GrantflowResult<Budget> {
        let mut t = self.tables.write().await;
        t.validate_budget(access, budget)?;
        t.validate_line_items(budget.id, items)?;
        t.budgets.insert(budget.id, budget.clone());
        for item in items {
            t.line_items.insert(item.id, item.clone());
        }
        t.recompute_budget(budget.id)
    }

    async fn budget_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<Budget>> {
        Ok(visible(&self.tables.read().await.budgets, access, id))
    }

    async fn budget_list(&self, access: Access, grant_id: Option<EntityId>) -> GrantflowResult<Vec<Budget>> {
        Ok(list(&self.tables.read().await.budgets, access, |b| {
            grant_id.map_or(true, |g| b.grant_id == Some(g))
        }))
    }

    async fn budget_update(&self, access: Access, id: EntityId, patch: &BudgetPatch) -> GrantflowResult<Budget> {
        let mut guard = self.tables.write().await;
        let t = &mut *guard;
        if let Some(grant_id) = patch.grant_id {
            let org_id = t.budget_visible(access, id)?.org_id;
            t.require_grant(access, grant_id, org_id)?;
        }
        let budget = visible_mut(&mut t.budgets, access, id)?;
        patch.apply(budget);
        Ok(budget.clone())
    }

    async fn budget_delete(&self, access: Access, id: EntityId) -> GrantflowResult<()> {
        let mut t = self.tables.write().await;
        remove_visible(&mut t.budgets, access, id)?;
        t.line_items.retain(|_, item| item.budget_id != id);
        Ok(())
    }

    async fn budget_from_template(&self, access: Access, copy: &TemplateCopy) -> GrantflowResult<Budget> {
        let mut t = self.tables.write().await;
        let template = t.budget_visible(access, copy.template_id)?.clone();
        if !template.is_template {
            return Err(GrantflowError::invalid_value(
                "template_id",
                format!("budget {} is not a template", template.id),
            ));
        }

        let mut budget = Budget::new(copy.org_id, copy.name.clone().unwrap_or(template.name));
        budget.grant_id = copy.grant_id;
        budget.narrative = template.narrative;
        t.validate_budget(access, &budget)?;

        let items: Vec<BudgetLineItem> = t
            .line_items
            .values()
            .filter(|item| item.budget_id == template.id)
            .map(|item| BudgetLineItem {
                id: new_entity_id(),
                budget_id: budget.id,
                created_at: now(),
                ..item.clone()
            })
            .collect();

        t.budgets.insert(budget.id, budget.clone());
        for item in items {
            t.line_items.insert(item.id, item);
        }
        t.recompute_budget(budget.id)
    }

    async fn line_item_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<BudgetLineItem>> {
        let t = self.tables.read().await;
        Ok(t.line_item_visible(access, id).ok().cloned())
    }

    async fn line_item_list(&self, access: Access, budget_id: EntityId) -> GrantflowResult<Vec<BudgetLineItem>> {
        let t = self.tables.read().await;
        if t.budget_visible(access, budget_id).is_err() {
            return Ok(Vec::new());
        }
        let mut items: Vec<BudgetLineItem> = t
            .line_items
            .values()
            .filter(|item| item.budget_id == budget_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(items)
    }

    async fn line_items_insert(
        &self,
        access: Access,
        budget_id: EntityId,
        items: &[BudgetLineItem],
    ) -> GrantflowResult<Budget> {
        let mut t = self.tables.write().await;
        t.budget_visible(access, budget_id)?;
        t.validate_line_items(budget_id, items)?;
        for item in items {
            t.line_items.insert(item.id, item.clone());
        }
        t.recompute_budget(budget_id)
    }

    async fn line_item_update(
        &self,
        access: Access,
        id: EntityId,
        patch: &LineItemPatch,
    ) -> GrantflowResult<(BudgetLineItem, Budget)> {
        let mut t = self.tables.write().await;
        let budget_id = t.line_item_visible(access, id)?.budget_id;
        let item = t
            .line_items
            .get_mut(&id)
            .ok_or_else(|| GrantflowError::not_found(EntityKind::BudgetLineItem, id))?;
        patch.apply(item);
        let item = item.clone();
        let budget = t.recompute_budget(budget_id)?;
        Ok((item, budget))
    }

    async fn line_item_delete(&self, access: Access, id: EntityId) -> GrantflowResult<Budget> {
        let mut t = self.tables.write().await;
        let budget_id = t.line_item_visible(access, id)?.budget_id;
        t.line_items.remove(&id);
        t.recompute_budget(budget_id)
    }

    // === Awards & reports ===

    async fn award_insert(&self, access: Access, award: &Award) -> GrantflowResult<()> {
        let mut t = self.tables.write().await;
        access.check_write(EntityKind::Award, award.id, award.org_id)?;
        t.require_org(EntityKind::Award, award.org_id)?;
        t.require_grant(access, award.grant_id, award.org_id)?;
        ensure_absent(&t.awards, EntityKind::Award, award.id)?;
        t.awards.insert(award.id, award.clone());
        Ok(())
    }

    async fn award_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<Award>> {
        Ok(visible(&self.tables.read().await.awards, access, id))
    }

    async fn award_list(&self, access: Access, grant_id: Option<EntityId>) -> GrantflowResult<Vec<Award>> {
        Ok(list(&self.tables.read().await.awards, access, |a| {
            grant_id.map_or(true, |g| a.grant_id == g)
        }))
    }

    async fn award_delete(&self, access: Access, id: EntityId) -> GrantflowResult<()> {
        let mut t = self.tables.write().await;
        if visible(&t.awards, access, id).is_none() {
            return Err(GrantflowError::not_found(EntityKind::Award, id));
        }
        t.remove_award_tree(id);
        Ok(())
    }

    async fn report_insert(&self, access: Access, report: &Report) -> GrantflowResult<()> {
        let mut t = self.tables.write().await;
        access.check_write(EntityKind::Report, report.id, report.org_id)?;
        t.require_org(EntityKind::Report, report.org_id)?;
        t.require_award(access, report.award_id, report.org_id)?;
        ensure_absent(&t.reports, EntityKind::Report, report.id)?;
        t.reports.insert(report.id, report.clone());
        Ok(())
    }

    async fn report_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<Report>> {
        Ok(visible(&self.tables.read().await.reports, access, id))
    }

    async fn report_list(&self, access: Access, award_id: Option<EntityId>) -> GrantflowResult<Vec<Report>> {
        let mut reports = list(&self.tables.read().await.reports, access, |r| {
            award_id.map_or(true, |a| r.award_id == a)
        });
        reports.sort_by(|a, b| a.due_date.cmp(&b.due_date).then_with(|| a.id.cmp(&b.id)));
        Ok(reports)
    }

    async fn report_update(&self, access: Access, id: EntityId, patch: &ReportPatch) -> GrantflowResult<Report> {
        let mut t = self.tables.write().await;
        let report = visible_mut(&mut t.reports, access, id)?;
        patch.apply(report);
        Ok(report.clone())
    }

    async fn report_delete(&self, access: Access, id: EntityId) -> GrantflowResult<()> {
        let mut t = self.tables.write().await;
        remove_visible(&mut t.reports, access, id).map(|_| ())
    }

    // === Documents & narratives ===

    async fn document_insert(&self, access: Access, document: &Document) -> GrantflowResult<()> {
        let mut t = self.tables.write().await;
        access.check_write(EntityKind::Document, document.id, document.org_id)?;
        t.require_org(EntityKind::Document, document.org_id)?;
        if let Some(grant_id) = document.grant_id {
            t.require_grant(access, grant_id, document.org_id)?;
        }
        ensure_absent(&t.documents, EntityKind::Document, document.id)?;
        t.documents.insert(document.id, document.clone());
        Ok(())
    }

    async fn document_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<Document>> {
        Ok(visible(&self.tables.read().await.documents, access, id))
    }

    async fn document_list(&self, access: Access, grant_id: Option<EntityId>) -> GrantflowResult<Vec<Document>> {
        Ok(list(&self.tables.read().await.documents, access, |d| {
            grant_id.map_or(true, |g| d.grant_id == Some(g))
        }))
    }

    async fn document_update(
        &self,
        access: Access,
        id: EntityId,
        patch: &DocumentPatch,
    ) -> GrantflowResult<Document> {
        let mut guard = self.tables.write().await;
        let t = &mut *guard;
        if let Some(grant_id) = patch.grant_id {
            let org_id = visible(&t.documents, access, id)
                .map(|d| d.org_id)
                .ok_or_else(|| GrantflowError::not_found(EntityKind::Document, id))?;
            t.require_grant(access, grant_id, org_id)?;
        }
        let document = visible_mut(&mut t.documents, access, id)?;
        patch.apply(document);
        Ok(document.clone())
    }

    async fn document_delete(&self, access: Access, id: EntityId) -> GrantflowResult<Document> {
        let mut t = self.tables.write().await;
        remove_visible(&mut t.documents, access, id)
    }

    async fn narrative_insert(&self, access: Access, narrative: &Narrative) -> GrantflowResult<()> {
        let mut t = self.tables.write().await;
        access.check_write(EntityKind::Narrative, narrative.id, narrative.org_id)?;
        t.require_org(EntityKind::Narrative, narrative.org_id)?;
        ensure_absent(&t.narratives, EntityKind::Narrative, narrative.id)?;
        t.narratives.insert(narrative.id, narrative.clone());
        Ok(())
    }

    async fn narrative_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<Narrative>> {
        Ok(visible(&self.tables.read().await.narratives, access, id))
    }

    async fn narrative_list(&self, access: Access) -> GrantflowResult<Vec<Narrative>> {
        Ok(list(&self.tables.read().await.narratives, access, |_| true))
    }

    async fn narrative_update(
        &self,
        access: Access,
        id: EntityId,
        patch: &NarrativePatch,
    ) -> GrantflowResult<Narrative> {
        let mut t = self.tables.write().await;
        let narrative = visible_mut(&mut t.narratives, access, id)?;
        patch.apply(narrative);
        Ok(narrative.clone())
    }

    async fn narrative_delete(&self, access: Access, id: EntityId) -> GrantflowResult<()> {
        let mut t = self.tables.write().await;
        remove_visible(&mut t.narratives, access, id).map(|_| ())
    }

    // === Checklists & submissions ===

    async fn checklist_upsert(
        &self,
        access: Access,
        org_id: EntityId,
        grant_id: EntityId,
        items: &[ChecklistItem],
    ) -> GrantflowResult<(SubmissionChecklist, bool)> {
        let mut t = self.tables.write().await;
        access.check_write(EntityKind::SubmissionChecklist, grant_id, org_id)?;
        t.require_org(EntityKind::SubmissionChecklist, org_id)?;
        t.require_grant(access, grant_id, org_id)?;

        if let Some(existing) = t.checklists.values_mut().find(|c| c.grant_id == grant_id) {
            existing.set_items(items.to_vec());
            return Ok((existing.clone(), false));
        }
        let checklist = SubmissionChecklist::new(org_id, grant_id, items.to_vec());
        t.checklists.insert(checklist.id, checklist.clone());
        Ok((checklist, true))
    }

    async fn checklist_get(&self, access: Access, grant_id: EntityId) -> GrantflowResult<Option<SubmissionChecklist>> {
        let t = self.tables.read().await;
        Ok(t.checklists
            .values()
            .find(|c| c.grant_id == grant_id && access.permits(c.org_id))
            .cloned())
    }

    async fn submission_insert(&self, access: Access, submission: &Submission) -> GrantflowResult<()> {
        let mut t = self.tables.write().await;
        t.validate_submission(access, submission)?;
        t.submissions.insert(submission.id, submission.clone());
        Ok(())
    }

    async fn submission_complete(&self, access: Access, submission: &Submission) -> GrantflowResult<Grant> {
        let mut t = self.tables.write().await;
        t.validate_submission(access, submission)?;
        t.submissions.insert(submission.id, submission.clone());
        let grant = visible_mut(&mut t.grants, access, submission.grant_id)?;
        grant.stage = GrantStage::Submission;
        grant.updated_at = now();
        Ok(grant.clone())
    }

    async fn submission_list(&self, access: Access, grant_id: Option<EntityId>) -> GrantflowResult<Vec<Submission>> {
        Ok(list(&self.tables.read().await.submissions, access, |s| {
            grant_id.map_or(true, |g| s.grant_id == g)
        }))
    }

    // === Workflow ledger ===

    async fn workflow_insert(&self, access: Access, execution: &WorkflowExecution) -> GrantflowResult<()> {
        let mut t = self.tables.write().await;
        access.check_write(EntityKind::WorkflowExecution, execution.id, execution.org_id)?;
        t.require_org(EntityKind::WorkflowExecution, execution.org_id)?;
        ensure_absent(&t.workflows, EntityKind::WorkflowExecution, execution.id)?;
        t.workflows.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn workflow_get(&self, access: Access, id: EntityId) -> GrantflowResult<Option<WorkflowExecution>> {
        Ok(visible(&self.tables.read().await.workflows, access, id))
    }

    async fn workflow_list(
        &self,
        access: Access,
        filter: &WorkflowFilter,
    ) -> GrantflowResult<Vec<WorkflowExecution>> {
        Ok(list(&self.tables.read().await.workflows, access, |w| filter.matches(w)))
    }

    async fn workflow_update(
        &self,
        access: Access,
        id: EntityId,
        update: &WorkflowUpdate,
    ) -> GrantflowResult<WorkflowExecution> {
        let mut t = self.tables.write().await;
        let execution = visible_mut(&mut t.workflows, access, id)?;
        update.apply(execution);
        Ok(execution.clone())
    }

    async fn health_check(&self) -> GrantflowResult<bool> {
        Ok(true)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use grantflow_core::{ProposalStatus, WorkflowKind, WorkflowStatus};
    use grantflow_test_utils::assertions::{assert_access_denied, assert_not_found};
    use grantflow_test_utils::fixtures;
    use rust_decimal::Decimal;

    async fn seeded() -> GrantflowResult<(MemoryStore, Organization)> {
        let store = MemoryStore::new();
        let org = fixtures::organization();
        store.organization_insert(&org).await?;
        Ok((store, org))
    }

    #[tokio::test]
    async fn test_grant_insert_get() -> GrantflowResult<()> {
        let (store, org) = seeded().await?;
        let access = Access::Tenant(org.id);
        let grant = fixtures::grant(org.id);
        store.grant_insert(access, &grant).await?;

        let fetched = store.grant_get(access, grant.id).await?;
        assert_eq!(fetched.map(|g| g.id), Some(grant.id));
        Ok(())
    }

    #[tokio::test]
    async fn test_other_tenant_cannot_see_grant() -> GrantflowResult<()> {
        let (store, org) = seeded().await?;
        let other = fixtures::organization();
        store.organization_insert(&other).await?;
        let grant = fixtures::grant(org.id);
        store.grant_insert(Access::Tenant(org.id), &grant).await?;

        let outsider = Access::Tenant(other.id);
        assert!(store.grant_get(outsider, grant.id).await?.is_none());
        assert!(store.grant_list(outsider, None).await?.is_empty());
        let result = store
            .grant_update(outsider, grant.id, &GrantPatch::default())
            .await;
        assert_not_found(&result, EntityKind::Grant);
        assert!(store.grant_get(Access::Service, grant.id).await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_tenant_cannot_insert_into_other_org() -> GrantflowResult<()> {
        let (store, org) = seeded().await?;
        let other = fixtures::organization();
        store.organization_insert(&other).await?;
        let result = store
            .grant_insert(Access::Tenant(org.id), &fixtures::grant(other.id))
            .await;
        assert_access_denied(&result);
        Ok(())
    }

    #[tokio::test]
    async fn test_insert_requires_organization() {
        let store = MemoryStore::new();
        let exec = WorkflowExecution::running(
            new_entity_id(),
            WorkflowKind::DiscoverGrants,
            None,
            serde_json::json!({}),
        );
        let result = store.workflow_insert(Access::Service, &exec).await;
        assert!(matches!(
            result,
            Err(GrantflowError::Storage(StorageError::InsertFailed { .. }))
        ));
        assert_eq!(store.workflow_count().await, 0);
    }

    #[tokio::test]
    async fn test_grant_insert_many_is_all_or_nothing() -> GrantflowResult<()> {
        let (store, org) = seeded().await?;
        let good = fixtures::grant(org.id);
        let orphan = fixtures::grant(new_entity_id());
        let result = store
            .grant_insert_many(Access::Service, &[good.clone(), orphan])
            .await;
        assert!(result.is_err());
        assert!(store.grant_get(Access::Service, good.id).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_grant_list_filters_by_stage() -> GrantflowResult<()> {
        let (store, org) = seeded().await?;
        let access = Access::Tenant(org.id);
        let mut drafting = fixtures::grant(org.id);
        drafting.stage = GrantStage::Drafting;
        store.grant_insert(access, &fixtures::grant(org.id)).await?;
        store.grant_insert(access, &drafting).await?;

        let found = store.grant_list(access, Some(GrantStage::Drafting)).await?;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, drafting.id);
        assert_eq!(store.grant_list(access, None).await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_budget_total_tracks_line_items() -> GrantflowResult<()> {
        let (store, org) = seeded().await?;
        let access = Access::Tenant(org.id);
        let mut budget = fixtures::budget(org.id);
        // A stale total in the input is ignored.
        budget.total_amount = Decimal::new(999, 0);
        let items = vec![
            fixtures::line_item(budget.id, 150_000),
            fixtures::line_item(budget.id, 25_050),
        ];
        let created = store.budget_create(access, &budget, &items).await?;
        assert_eq!(created.total_amount, Decimal::new(175_050, 2));

        let added = store
            .line_items_insert(access, budget.id, &[fixtures::line_item(budget.id, 10_000)])
            .await?;
        assert_eq!(added.total_amount, Decimal::new(185_050, 2));

        let (_, updated) = store
            .line_item_update(
                access,
                items[0].id,
                &LineItemPatch {
                    amount: Some(Decimal::new(50_000, 2)),
                    ..Default::default()
                },
            )
            .await?;
        assert_eq!(updated.total_amount, Decimal::new(85_050, 2));

        let after_delete = store.line_item_delete(access, items[1].id).await?;
        assert_eq!(after_delete.total_amount, Decimal::new(60_000, 2));
        Ok(())
    }

    #[tokio::test]
    async fn test_budget_update_keeps_total() -> GrantflowResult<()> {
        let (store, org) = seeded().await?;
        let access = Access::Tenant(org.id);
        let budget = fixtures::budget(org.id);
        store
            .budget_create(access, &budget, &[fixtures::line_item(budget.id, 1_000)])
            .await?;
        let updated = store
            .budget_update(
                access,
                budget.id,
                &BudgetPatch {
                    narrative: Some("Salaries dominate".into()),
                    ..Default::default()
                },
            )
            .await?;
        assert_eq!(updated.total_amount, Decimal::new(1_000, 2));
        assert_eq!(updated.narrative.as_deref(), Some("Salaries dominate"));
        Ok(())
    }

    #[tokio::test]
    async fn test_budget_from_template_copies_items() -> GrantflowResult<()> {
        let (store, org) = seeded().await?;
        let access = Access::Tenant(org.id);
        let template = fixtures::template_budget(org.id);
        store
            .budget_create(
                access,
                &template,
                &[
                    fixtures::line_item(template.id, 2_000),
                    fixtures::line_item(template.id, 3_000),
                ],
            )
            .await?;
        let grant = fixtures::grant(org.id);
        store.grant_insert(access, &grant).await?;

        let copy = store
            .budget_from_template(
                access,
                &TemplateCopy {
                    template_id: template.id,
                    org_id: org.id,
                    grant_id: Some(grant.id),
                    name: None,
                },
            )
            .await?;
        assert_ne!(copy.id, template.id);
        assert!(!copy.is_template);
        assert_eq!(copy.grant_id, Some(grant.id));
        assert_eq!(copy.name, template.name);
        assert_eq!(copy.total_amount, Decimal::new(5_000, 2));
        assert_eq!(store.line_item_list(access, copy.id).await?.len(), 2);
        assert_eq!(store.line_item_list(access, template.id).await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_budget_from_non_template_rejected() -> GrantflowResult<()> {
        let (store, org) = seeded().await?;
        let access = Access::Tenant(org.id);
        let budget = fixtures::budget(org.id);
        store.budget_create(access, &budget, &[]).await?;
        let result = store
            .budget_from_template(
                access,
                &TemplateCopy {
                    template_id: budget.id,
                    org_id: org.id,
                    grant_id: None,
                    name: Some("copy".into()),
                },
            )
            .await;
        assert!(matches!(result, Err(GrantflowError::Validation(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_proposal_create_is_atomic() -> GrantflowResult<()> {
        let (store, org) = seeded().await?;
        let access = Access::Tenant(org.id);
        let grant = fixtures::grant(org.id);
        store.grant_insert(access, &grant).await?;

        let proposal = Proposal::new(org.id, grant.id, "Draft");
        let good = ProposalSection::new(proposal.id, "Need", "...", 0);
        let stray = ProposalSection::new(new_entity_id(), "Stray", "...", 1);
        let result = store.proposal_create(access, &proposal, &[good, stray]).await;
        assert!(result.is_err());
        assert!(store.proposal_get(access, proposal.id).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_section_reorder() -> GrantflowResult<()> {
        let (store, org) = seeded().await?;
        let access = Access::Tenant(org.id);
        let grant = fixtures::grant(org.id);
        store.grant_insert(access, &grant).await?;
        let proposal = Proposal::new(org.id, grant.id, "Draft");
        let a = ProposalSection::new(proposal.id, "A", "", 0);
        let b = ProposalSection::new(proposal.id, "B", "", 1);
        let c = ProposalSection::new(proposal.id, "C", "", 2);
        store
            .proposal_create(access, &proposal, &[a.clone(), b.clone(), c.clone()])
            .await?;

        let reordered = store
            .section_reorder(access, proposal.id, &[c.id, a.id, b.id])
            .await?;
        let titles: Vec<&str> = reordered.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["C", "A", "B"]);

        let foreign = store
            .section_reorder(access, proposal.id, &[new_entity_id()])
            .await;
        assert!(matches!(foreign, Err(GrantflowError::Validation(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_proposal_delete_cascades_sections() -> GrantflowResult<()> {
        let (store, org) = seeded().await?;
        let access = Access::Tenant(org.id);
        let grant = fixtures::grant(org.id);
        store.grant_insert(access, &grant).await?;
        let proposal = Proposal::new(org.id, grant.id, "Draft");
        let section = ProposalSection::new(proposal.id, "Need", "", 0);
        store.proposal_create(access, &proposal, &[section.clone()]).await?;

        store.proposal_delete(access, proposal.id).await?;
        assert!(store.section_get(Access::Service, section.id).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_award_delete_cascades_reports() -> GrantflowResult<()> {
        let (store, org) = seeded().await?;
        let access = Access::Tenant(org.id);
        let grant = fixtures::grant(org.id);
        store.grant_insert(access, &grant).await?;
        let award = Award::new(org.id, grant.id, Decimal::new(40_000, 0));
        store.award_insert(access, &award).await?;
        let due = chrono::NaiveDate::from_ymd_opt(2026, 6, 30)
            .ok_or_else(|| GrantflowError::invalid_value("due_date", "bad date"))?;
        let report = Report::new(org.id, award.id, "Interim report", due);
        store.report_insert(access, &report).await?;

        store.award_delete(access, award.id).await?;
        assert!(store.report_get(access, report.id).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_grant_delete_cascades() -> GrantflowResult<()> {
        let (store, org) = seeded().await?;
        let access = Access::Tenant(org.id);
        let grant = fixtures::grant(org.id);
        store.grant_insert(access, &grant).await?;
        let proposal = Proposal::new(org.id, grant.id, "Draft");
        store.proposal_create(access, &proposal, &[]).await?;
        let mut budget = fixtures::budget(org.id);
        budget.grant_id = Some(grant.id);
        store.budget_create(access, &budget, &[]).await?;

        store.grant_delete(access, grant.id).await?;
        assert!(store.proposal_get(access, proposal.id).await?.is_none());
        let orphaned = store.budget_get(access, budget.id).await?;
        assert_eq!(orphaned.map(|b| b.grant_id), Some(None));
        Ok(())
    }

    #[tokio::test]
    async fn test_checklist_upsert_recomputes_percentage() -> GrantflowResult<()> {
        let (store, org) = seeded().await?;
        let grant = fixtures::grant(org.id);
        store.grant_insert(Access::Tenant(org.id), &grant).await?;

        let (first, created) = store
            .checklist_upsert(Access::Service, org.id, grant.id, &fixtures::checklist_items(&[true, false]))
            .await?;
        assert!(created);
        assert_eq!(first.completion_percentage, 50);

        let (second, created) = store
            .checklist_upsert(
                Access::Service,
                org.id,
                grant.id,
                &fixtures::checklist_items(&[true, true, true]),
            )
            .await?;
        assert!(!created);
        assert_eq!(second.id, first.id);
        assert_eq!(second.completion_percentage, 100);

        let (empty, _) = store
            .checklist_upsert(Access::Service, org.id, grant.id, &[])
            .await?;
        assert_eq!(empty.completion_percentage, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_submission_complete_moves_grant_stage() -> GrantflowResult<()> {
        let (store, org) = seeded().await?;
        let grant = fixtures::grant(org.id);
        store.grant_insert(Access::Tenant(org.id), &grant).await?;
        let submission = Submission::new(
            org.id,
            grant.id,
            grantflow_core::SubmissionMethod::Auto,
            grantflow_core::SubmissionStatus::Submitted,
        );
        let updated = store.submission_complete(Access::Service, &submission).await?;
        assert_eq!(updated.stage, GrantStage::Submission);
        assert_eq!(store.submission_list(Access::Service, Some(grant.id)).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_workflow_update_to_terminal() -> GrantflowResult<()> {
        let (store, org) = seeded().await?;
        let exec = WorkflowExecution::running(
            org.id,
            WorkflowKind::ReviewProposal,
            Some(new_entity_id()),
            serde_json::json!({"depth": "full"}),
        );
        store.workflow_insert(Access::Tenant(org.id), &exec).await?;
        let updated = store
            .workflow_update(
                Access::Service,
                exec.id,
                &WorkflowUpdate {
                    status: Some(WorkflowStatus::Completed),
                    result: Some(serde_json::json!({"score": 87})),
                    error: None,
                },
            )
            .await?;
        assert!(updated.completed_at.is_some());

        let running = store
            .workflow_list(
                Access::Tenant(org.id),
                &WorkflowFilter {
                    status: Some(WorkflowStatus::Running),
                    ..Default::default()
                },
            )
            .await?;
        assert!(running.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_proposal_update_status() -> GrantflowResult<()> {
        let (store, org) = seeded().await?;
        let access = Access::Tenant(org.id);
        let grant = fixtures::grant(org.id);
        store.grant_insert(access, &grant).await?;
        let proposal = Proposal::new(org.id, grant.id, "Draft");
        store.proposal_create(access, &proposal, &[]).await?;
        let updated = store
            .proposal_update(
                Access::Service,
                proposal.id,
                &ProposalPatch {
                    status: Some(ProposalStatus::InReview),
                    quality_score: Some(78),
                    ..Default::default()
                },
            )
            .await?;
        assert_eq!(updated.status, ProposalStatus::InReview);
        assert_eq!(updated.quality_score, Some(78));
        Ok(())
    }
}
