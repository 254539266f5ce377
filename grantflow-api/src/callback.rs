//! Callback Receiver
//!
//! The automation engine reports results as `{action, data}` envelopes. Each
//! action name maps to one typed payload and one store write, performed with
//! service access (no tenant filter). Multi-row actions go through store
//! calls that are atomic.
//!
//! Error bodies are `{"error": "..."}` because that is what the engine reads.

use crate::telemetry::METRICS;
use crate::ws::WsState;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use grantflow_core::{
    Award, BudgetLineItem, BudgetPatch, CategorySource, ChangeKind, ChecklistItem, Date, Document,
    DocumentPatch, EntityId, EntityKind, Funder, FunderPatch, Grant, GrantPatch, GrantStage,
    GrantflowError, Narrative, NarrativePatch, Proposal, ProposalPatch, ProposalSection,
    ProposalStatus, Report, ReportPatch, ReportStatus, SectionPatch, Submission, SubmissionMethod,
    SubmissionStatus, WorkflowUpdate,
};
use grantflow_storage::{Access, GrantStore, TemplateCopy};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

const SERVICE: Access = Access::Service;

// ============================================================================
// ACTIONS
// ============================================================================

/// Every action the engine may send back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackAction {
    InsertGrant,
    InsertGrants,
    UpdateGrant,
    InsertFunder,
    UpdateFunder,
    InsertProposal,
    CreateProposal,
    UpdateProposal,
    InsertProposalSection,
    UpdateProposalSection,
    UpdateBudget,
    InsertBudgetLineItems,
    CreateBudgetFromTemplate,
    InsertAward,
    InsertReport,
    UpdateReport,
    InsertDocument,
    UpdateDocument,
    InsertChecklist,
    SubmissionComplete,
    UpdateNarrative,
    UpdateWorkflow,
}

impl CallbackAction {
    pub const ALL: &'static [CallbackAction] = &[
        CallbackAction::InsertGrant,
        CallbackAction::InsertGrants,
        CallbackAction::UpdateGrant,
        CallbackAction::InsertFunder,
        CallbackAction::UpdateFunder,
        CallbackAction::InsertProposal,
        CallbackAction::CreateProposal,
        CallbackAction::UpdateProposal,
        CallbackAction::InsertProposalSection,
        CallbackAction::UpdateProposalSection,
        CallbackAction::UpdateBudget,
        CallbackAction::InsertBudgetLineItems,
        CallbackAction::CreateBudgetFromTemplate,
        CallbackAction::InsertAward,
        CallbackAction::InsertReport,
        CallbackAction::UpdateReport,
        CallbackAction::InsertDocument,
        CallbackAction::UpdateDocument,
        CallbackAction::InsertChecklist,
        CallbackAction::SubmissionComplete,
        CallbackAction::UpdateNarrative,
        CallbackAction::UpdateWorkflow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackAction::InsertGrant => "insert_grant",
            CallbackAction::InsertGrants => "insert_grants",
            CallbackAction::UpdateGrant => "update_grant",
            CallbackAction::InsertFunder => "insert_funder",
            CallbackAction::UpdateFunder => "update_funder",
            CallbackAction::InsertProposal => "insert_proposal",
            CallbackAction::CreateProposal => "create_proposal",
            CallbackAction::UpdateProposal => "update_proposal",
            CallbackAction::InsertProposalSection => "insert_proposal_section",
            CallbackAction::UpdateProposalSection => "update_proposal_section",
            CallbackAction::UpdateBudget => "update_budget",
            CallbackAction::InsertBudgetLineItems => "insert_budget_line_items",
            CallbackAction::CreateBudgetFromTemplate => "create_budget_from_template",
            CallbackAction::InsertAward => "insert_award",
            CallbackAction::InsertReport => "insert_report",
            CallbackAction::UpdateReport => "update_report",
            CallbackAction::InsertDocument => "insert_document",
            CallbackAction::UpdateDocument => "update_document",
            CallbackAction::InsertChecklist => "insert_checklist",
            CallbackAction::SubmissionComplete => "submission_complete",
            CallbackAction::UpdateNarrative => "update_narrative",
            CallbackAction::UpdateWorkflow => "update_workflow",
        }
    }

    /// Exact, case-sensitive match on the wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|action| action.as_str() == name)
    }
}

// ============================================================================
// ENVELOPE & ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CallbackEnvelope {
    pub action: String,
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub data: JsonValue,
}

impl CallbackEnvelope {
    pub fn from_slice(body: &[u8]) -> Result<Self, CallbackError> {
        serde_json::from_slice(body)
            .map_err(|e| CallbackError::InvalidPayload(format!("Invalid callback body: {}", e)))
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallbackError {
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("{0}")]
    InvalidPayload(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Store(String),
}

impl CallbackError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CallbackError::UnknownAction(_) | CallbackError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            CallbackError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            CallbackError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn outcome(&self) -> &'static str {
        match self {
            CallbackError::Store(_) => "error",
            _ => "rejected",
        }
    }
}

/// Validation failures are the sender's fault; everything else from the
/// store is reported as a server error.
impl From<GrantflowError> for CallbackError {
    fn from(err: GrantflowError) -> Self {
        match err {
            GrantflowError::Validation(inner) => CallbackError::InvalidPayload(inner.to_string()),
            other => CallbackError::Store(other.to_string()),
        }
    }
}

impl IntoResponse for CallbackError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

// ============================================================================
// PAYLOADS
// ============================================================================

/// Row addressed by an update action.
#[derive(Debug, Deserialize)]
struct Target {
    #[serde(alias = "workflow_id")]
    id: EntityId,
}

#[derive(Debug, Deserialize)]
struct GrantInput {
    id: Option<EntityId>,
    org_id: EntityId,
    title: String,
    funder_id: Option<EntityId>,
    funder_name: Option<String>,
    description: Option<String>,
    amount_requested: Option<Decimal>,
    deadline: Option<Date>,
    stage: Option<GrantStage>,
    eligibility_score: Option<i32>,
    eligibility_notes: Option<String>,
    source_url: Option<String>,
    metadata: Option<JsonValue>,
}

impl GrantInput {
    fn into_grant(self) -> Grant {
        let mut grant = Grant::new(self.org_id, self.title);
        if let Some(id) = self.id {
            grant.id = id;
        }
        grant.funder_id = self.funder_id;
        grant.funder_name = self.funder_name;
        grant.description = self.description;
        grant.amount_requested = self.amount_requested;
        grant.deadline = self.deadline;
        grant.stage = self.stage.unwrap_or_default();
        grant.eligibility_score = self.eligibility_score;
        grant.eligibility_notes = self.eligibility_notes;
        grant.source_url = self.source_url;
        if let Some(metadata) = self.metadata {
            grant.metadata = metadata;
        }
        grant
    }
}

/// `insert_grants` accepts `{grants: [...]}` or a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GrantBatch {
    Wrapped { grants: Vec<GrantInput> },
    Bare(Vec<GrantInput>),
}

impl GrantBatch {
    fn into_grants(self) -> Vec<Grant> {
        let inputs = match self {
            GrantBatch::Wrapped { grants } => grants,
            GrantBatch::Bare(grants) => grants,
        };
        inputs.into_iter().map(GrantInput::into_grant).collect()
    }
}

#[derive(Debug, Deserialize)]
struct FunderInput {
    id: Option<EntityId>,
    org_id: EntityId,
    name: String,
    website: Option<String>,
    #[serde(default)]
    focus_areas: Vec<String>,
    analysis: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct SectionInput {
    id: Option<EntityId>,
    title: String,
    #[serde(default)]
    content: String,
    sort_order: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct ProposalInput {
    id: Option<EntityId>,
    org_id: EntityId,
    grant_id: EntityId,
    title: String,
    status: Option<ProposalStatus>,
    quality_score: Option<i32>,
    quality_feedback: Option<JsonValue>,
    #[serde(default)]
    sections: Vec<SectionInput>,
}

#[derive(Debug, Deserialize)]
struct SectionRowInput {
    id: Option<EntityId>,
    proposal_id: EntityId,
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    sort_order: i32,
}

#[derive(Debug, Deserialize)]
struct LineItemInput {
    id: Option<EntityId>,
    category: String,
    #[serde(default)]
    description: String,
    amount: Decimal,
}

#[derive(Debug, Deserialize)]
struct LineItemsInput {
    budget_id: EntityId,
    items: Vec<LineItemInput>,
}

#[derive(Debug, Deserialize)]
struct TemplateInput {
    template_id: EntityId,
    org_id: EntityId,
    grant_id: Option<EntityId>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AwardInput {
    id: Option<EntityId>,
    org_id: EntityId,
    grant_id: EntityId,
    amount: Decimal,
    start_date: Option<Date>,
    end_date: Option<Date>,
    terms: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReportInput {
    id: Option<EntityId>,
    org_id: EntityId,
    award_id: EntityId,
    title: String,
    due_date: Date,
    status: Option<ReportStatus>,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DocumentInput {
    id: Option<EntityId>,
    org_id: EntityId,
    grant_id: Option<EntityId>,
    file_name: String,
    content_type: String,
    size_bytes: i64,
    storage_path: String,
    category: Option<String>,
    category_source: Option<CategorySource>,
}

#[derive(Debug, Deserialize)]
struct ChecklistInput {
    org_id: Option<EntityId>,
    grant_id: EntityId,
    #[serde(default)]
    items: Vec<ChecklistItem>,
}

#[derive(Debug, Deserialize)]
struct SubmissionInput {
    id: Option<EntityId>,
    org_id: Option<EntityId>,
    grant_id: EntityId,
    method: Option<SubmissionMethod>,
    status: Option<SubmissionStatus>,
    confirmation: Option<String>,
}

fn parse<T: DeserializeOwned>(action: CallbackAction, data: &JsonValue) -> Result<T, CallbackError> {
    T::deserialize(data)
        .map_err(|e| CallbackError::InvalidPayload(format!("Invalid data for {}: {}", action.as_str(), e)))
}

fn require_changes(action: CallbackAction, empty: bool) -> Result<(), CallbackError> {
    if empty {
        Err(CallbackError::InvalidPayload(format!(
            "{} carries no fields to update",
            action.as_str()
        )))
    } else {
        Ok(())
    }
}

/// An engine-supplied category without a source was produced by the engine.
fn ai_categorized(category: &Option<String>, source: Option<CategorySource>) -> Option<CategorySource> {
    match (category, source) {
        (Some(_), None) => Some(CategorySource::Ai),
        (_, source) => source,
    }
}

// ============================================================================
// RECEIVER
// ============================================================================

/// One row change to announce after a successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeNotice {
    pub table: EntityKind,
    pub change: ChangeKind,
    pub record_id: EntityId,
    pub org_id: EntityId,
}

impl ChangeNotice {
    fn insert(table: EntityKind, record_id: EntityId, org_id: EntityId) -> Self {
        Self { table, change: ChangeKind::Insert, record_id, org_id }
    }

    fn update(table: EntityKind, record_id: EntityId, org_id: EntityId) -> Self {
        Self { table, change: ChangeKind::Update, record_id, org_id }
    }
}

/// Applies engine callbacks to the store.
#[derive(Clone)]
pub struct CallbackReceiver {
    store: Arc<dyn GrantStore>,
    ws: WsState,
}

impl CallbackReceiver {
    pub fn new(store: Arc<dyn GrantStore>, ws: WsState) -> Self {
        Self { store, ws }
    }

    /// Route one envelope. Unknown actions and malformed payloads are
    /// rejected before anything is written.
    pub async fn handle(&self, envelope: CallbackEnvelope) -> Result<Vec<ChangeNotice>, CallbackError> {
        let Some(action) = CallbackAction::from_name(&envelope.action) else {
            warn!(action = %envelope.action, "Unknown callback action");
            if let Ok(m) = METRICS.as_ref() {
                m.record_callback("unknown", "rejected");
            }
            return Err(CallbackError::UnknownAction(envelope.action));
        };

        match self.apply(action, &envelope.data).await {
            Ok(notices) => {
                for notice in &notices {
                    self.ws
                        .publish(notice.table, notice.change, notice.record_id, notice.org_id);
                }
                info!(action = action.as_str(), rows = notices.len(), "Callback applied");
                if let Ok(m) = METRICS.as_ref() {
                    m.record_callback(action.as_str(), "success");
                }
                Ok(notices)
            }
            Err(e) => {
                match &e {
                    CallbackError::Store(_) => error!(action = action.as_str(), error = %e, "Callback write failed"),
                    _ => warn!(action = action.as_str(), error = %e, "Callback rejected"),
                }
                if let Ok(m) = METRICS.as_ref() {
                    m.record_callback(action.as_str(), e.outcome());
                }
                Err(e)
            }
        }
    }

    async fn apply(&self, action: CallbackAction, data: &JsonValue) -> Result<Vec<ChangeNotice>, CallbackError> {
        let store = self.store.as_ref();
        match action {
            CallbackAction::InsertGrant => {
                let grant = parse::<GrantInput>(action, data)?.into_grant();
                store.grant_insert(SERVICE, &grant).await?;
                Ok(vec![ChangeNotice::insert(EntityKind::Grant, grant.id, grant.org_id)])
            }
            CallbackAction::InsertGrants => {
                let grants = parse::<GrantBatch>(action, data)?.into_grants();
                if grants.is_empty() {
                    return Err(CallbackError::InvalidPayload(
                        "insert_grants requires at least one grant".to_string(),
                    ));
                }
                store.grant_insert_many(SERVICE, &grants).await?;
                Ok(grants
                    .iter()
                    .map(|g| ChangeNotice::insert(EntityKind::Grant, g.id, g.org_id))
                    .collect())
            }
            CallbackAction::UpdateGrant => {
                let Target { id } = parse(action, data)?;
                let patch: GrantPatch = parse(action, data)?;
                require_changes(action, patch.is_empty())?;
                let grant = store.grant_update(SERVICE, id, &patch).await?;
                Ok(vec![ChangeNotice::update(EntityKind::Grant, grant.id, grant.org_id)])
            }
            CallbackAction::InsertFunder => {
                let input: FunderInput = parse(action, data)?;
                let mut funder = Funder::new(input.org_id, input.name);
                if let Some(id) = input.id {
                    funder.id = id;
                }
                funder.website = input.website;
                funder.focus_areas = input.focus_areas;
                funder.analysis = input.analysis;
                store.funder_insert(SERVICE, &funder).await?;
                Ok(vec![ChangeNotice::insert(EntityKind::Funder, funder.id, funder.org_id)])
            }
            CallbackAction::UpdateFunder => {
                let Target { id } = parse(action, data)?;
                let patch: FunderPatch = parse(action, data)?;
                require_changes(action, patch.is_empty())?;
                let funder = store.funder_update(SERVICE, id, &patch).await?;
                Ok(vec![ChangeNotice::update(EntityKind::Funder, funder.id, funder.org_id)])
            }
            CallbackAction::InsertProposal | CallbackAction::CreateProposal => {
                let input: ProposalInput = parse(action, data)?;
                let mut proposal = Proposal::new(input.org_id, input.grant_id, input.title);
                if let Some(id) = input.id {
                    proposal.id = id;
                }
                proposal.status = input.status.unwrap_or_default();
                proposal.quality_score = input.quality_score;
                proposal.quality_feedback = input.quality_feedback;

                let sections: Vec<ProposalSection> = input
                    .sections
                    .into_iter()
                    .enumerate()
                    .map(|(position, s)| {
                        let order = s.sort_order.unwrap_or(position as i32);
                        let mut section = ProposalSection::new(proposal.id, s.title, s.content, order);
                        if let Some(id) = s.id {
                            section.id = id;
                        }
                        section
                    })
                    .collect();
                store.proposal_create(SERVICE, &proposal, &sections).await?;

                let mut notices = vec![ChangeNotice::insert(EntityKind::Proposal, proposal.id, proposal.org_id)];
                notices.extend(
                    sections
                        .iter()
                        .map(|s| ChangeNotice::insert(EntityKind::ProposalSection, s.id, proposal.org_id)),
                );
                Ok(notices)
            }
            CallbackAction::UpdateProposal => {
                let Target { id } = parse(action, data)?;
                let patch: ProposalPatch = parse(action, data)?;
                require_changes(action, patch.is_empty())?;
                let proposal = store.proposal_update(SERVICE, id, &patch).await?;
                Ok(vec![ChangeNotice::update(EntityKind::Proposal, proposal.id, proposal.org_id)])
            }
            CallbackAction::InsertProposalSection => {
                let input: SectionRowInput = parse(action, data)?;
                let org_id = self.proposal_org(input.proposal_id).await?;
                let mut section =
                    ProposalSection::new(input.proposal_id, input.title, input.content, input.sort_order);
                if let Some(id) = input.id {
                    section.id = id;
                }
                store.section_insert(SERVICE, &section).await?;
                Ok(vec![ChangeNotice::insert(EntityKind::ProposalSection, section.id, org_id)])
            }
            CallbackAction::UpdateProposalSection => {
                let Target { id } = parse(action, data)?;
                let patch: SectionPatch = parse(action, data)?;
                require_changes(action, patch.is_empty())?;
                let section = store.section_update(SERVICE, id, &patch).await?;
                let org_id = self.proposal_org(section.proposal_id).await?;
                Ok(vec![ChangeNotice::update(EntityKind::ProposalSection, section.id, org_id)])
            }
            CallbackAction::UpdateBudget => {
                // BudgetPatch has no total; a total_amount in the payload is ignored.
                let Target { id } = parse(action, data)?;
                let patch: BudgetPatch = parse(action, data)?;
                require_changes(action, patch.is_empty())?;
                let budget = store.budget_update(SERVICE, id, &patch).await?;
                Ok(vec![ChangeNotice::update(EntityKind::Budget, budget.id, budget.org_id)])
            }
            CallbackAction::InsertBudgetLineItems => {
                let input: LineItemsInput = parse(action, data)?;
                if input.items.is_empty() {
                    return Err(CallbackError::InvalidPayload(
                        "insert_budget_line_items requires at least one item".to_string(),
                    ));
                }
                let items: Vec<BudgetLineItem> = input
                    .items
                    .into_iter()
                    .map(|i| {
                        let mut item = BudgetLineItem::new(input.budget_id, i.category, i.description, i.amount);
                        if let Some(id) = i.id {
                            item.id = id;
                        }
                        item
                    })
                    .collect();
                let budget = store.line_items_insert(SERVICE, input.budget_id, &items).await?;

                let mut notices: Vec<ChangeNotice> = items
                    .iter()
                    .map(|i| ChangeNotice::insert(EntityKind::BudgetLineItem, i.id, budget.org_id))
                    .collect();
                notices.push(ChangeNotice::update(EntityKind::Budget, budget.id, budget.org_id));
                Ok(notices)
            }
            CallbackAction::CreateBudgetFromTemplate => {
                let input: TemplateInput = parse(action, data)?;
                let copy = TemplateCopy {
                    template_id: input.template_id,
                    org_id: input.org_id,
                    grant_id: input.grant_id,
                    name: input.name,
                };
                let budget = store.budget_from_template(SERVICE, &copy).await?;
                Ok(vec![ChangeNotice::insert(EntityKind::Budget, budget.id, budget.org_id)])
            }
            CallbackAction::InsertAward => {
                let input: AwardInput = parse(action, data)?;
                let mut award = Award::new(input.org_id, input.grant_id, input.amount);
                if let Some(id) = input.id {
                    award.id = id;
                }
                award.start_date = input.start_date;
                award.end_date = input.end_date;
                award.terms = input.terms;
                store.award_insert(SERVICE, &award).await?;
                Ok(vec![ChangeNotice::insert(EntityKind::Award, award.id, award.org_id)])
            }
            CallbackAction::InsertReport => {
                let input: ReportInput = parse(action, data)?;
                let mut report = Report::new(input.org_id, input.award_id, input.title, input.due_date);
                if let Some(id) = input.id {
                    report.id = id;
                }
                report.status = input.status.unwrap_or_default();
                report.content = input.content;
                store.report_insert(SERVICE, &report).await?;
                Ok(vec![ChangeNotice::insert(EntityKind::Report, report.id, report.org_id)])
            }
            CallbackAction::UpdateReport => {
                let Target { id } = parse(action, data)?;
                let patch: ReportPatch = parse(action, data)?;
                require_changes(action, patch.is_empty())?;
                let report = store.report_update(SERVICE, id, &patch).await?;
                Ok(vec![ChangeNotice::update(EntityKind::Report, report.id, report.org_id)])
            }
            CallbackAction::InsertDocument => {
                let input: DocumentInput = parse(action, data)?;
                let mut document = Document::new(
                    input.org_id,
                    input.file_name,
                    input.content_type,
                    input.size_bytes,
                    input.storage_path,
                );
                if let Some(id) = input.id {
                    document.id = id;
                }
                document.grant_id = input.grant_id;
                document.category_source = ai_categorized(&input.category, input.category_source);
                document.category = input.category;
                store.document_insert(SERVICE, &document).await?;
                Ok(vec![ChangeNotice::insert(EntityKind::Document, document.id, document.org_id)])
            }
            CallbackAction::UpdateDocument => {
                let Target { id } = parse(action, data)?;
                let mut patch: DocumentPatch = parse(action, data)?;
                require_changes(action, patch.is_empty())?;
                patch.category_source = ai_categorized(&patch.category, patch.category_source);
                let document = store.document_update(SERVICE, id, &patch).await?;
                Ok(vec![ChangeNotice::update(EntityKind::Document, document.id, document.org_id)])
            }
            CallbackAction::InsertChecklist => {
                let input: ChecklistInput = parse(action, data)?;
                let org_id = match input.org_id {
                    Some(org_id) => org_id,
                    None => self.grant_org(input.grant_id).await?,
                };
                let (checklist, created) = store
                    .checklist_upsert(SERVICE, org_id, input.grant_id, &input.items)
                    .await?;
                let notice = if created { ChangeNotice::insert } else { ChangeNotice::update };
                Ok(vec![notice(EntityKind::SubmissionChecklist, checklist.id, checklist.org_id)])
            }
            CallbackAction::SubmissionComplete => {
                let input: SubmissionInput = parse(action, data)?;
                let org_id = match input.org_id {
                    Some(org_id) => org_id,
                    None => self.grant_org(input.grant_id).await?,
                };
                let mut submission = Submission::new(
                    org_id,
                    input.grant_id,
                    input.method.unwrap_or(SubmissionMethod::Auto),
                    input.status.unwrap_or(SubmissionStatus::Submitted),
                );
                if let Some(id) = input.id {
                    submission.id = id;
                }
                submission.confirmation = input.confirmation;
                let grant = store.submission_complete(SERVICE, &submission).await?;
                Ok(vec![
                    ChangeNotice::insert(EntityKind::Submission, submission.id, org_id),
                    ChangeNotice::update(EntityKind::Grant, grant.id, grant.org_id),
                ])
            }
            CallbackAction::UpdateNarrative => {
                let Target { id } = parse(action, data)?;
                let patch: NarrativePatch = parse(action, data)?;
                require_changes(action, patch.is_empty())?;
                let narrative: Narrative = store.narrative_update(SERVICE, id, &patch).await?;
                Ok(vec![ChangeNotice::update(EntityKind::Narrative, narrative.id, narrative.org_id)])
            }
            CallbackAction::UpdateWorkflow => {
                let Target { id } = parse(action, data)?;
                let update: WorkflowUpdate = parse(action, data)?;
                require_changes(action, update.is_empty())?;
                let execution = store.workflow_update(SERVICE, id, &update).await?;
                Ok(vec![ChangeNotice::update(
                    EntityKind::WorkflowExecution,
                    execution.id,
                    execution.org_id,
                )])
            }
        }
    }

    async fn grant_org(&self, grant_id: EntityId) -> Result<EntityId, CallbackError> {
        self.store
            .grant_get(SERVICE, grant_id)
            .await?
            .map(|g| g.org_id)
            .ok_or_else(|| GrantflowError::not_found(EntityKind::Grant, grant_id).into())
    }

    async fn proposal_org(&self, proposal_id: EntityId) -> Result<EntityId, CallbackError> {
        self.store
            .proposal_get(SERVICE, proposal_id)
            .await?
            .map(|p| p.org_id)
            .ok_or_else(|| GrantflowError::not_found(EntityKind::Proposal, proposal_id).into())
    }
}
