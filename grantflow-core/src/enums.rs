//! Enum types for Grantflow entities
//!
//! Every enum here is stored as lowercase TEXT in PostgreSQL and travels as the
//! same string on the wire, so `as_db_str`, `Display`, `FromStr` and serde all
//! agree on one spelling.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error when parsing an invalid enum string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid {kind}: {value}")]
pub struct EnumParseError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! db_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident ($label:literal) {
            $( $(#[$vmeta:meta])* $variant:ident => $db:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $db)]
                $variant,
            )+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Convert to database string representation.
            pub fn as_db_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $db,)+
                }
            }

            /// Parse from database string representation (case-insensitive).
            pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
                match s.trim().to_lowercase().as_str() {
                    $($db => Ok($name::$variant),)+
                    _ => Err(EnumParseError {
                        kind: $label,
                        value: s.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.as_db_str())
            }
        }

        impl FromStr for $name {
            type Err = EnumParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_db_str(s)
            }
        }
    };
}

db_enum! {
    /// Role of a profile within its organization.
    pub enum ProfileRole ("profile role") {
        Owner => "owner",
        Admin => "admin",
        Member => "member",
    }
}

impl ProfileRole {
    /// Owners and admins may perform destructive and org-wide operations.
    pub fn can_manage(&self) -> bool {
        matches!(self, ProfileRole::Owner | ProfileRole::Admin)
    }
}

db_enum! {
    /// Pipeline position of a grant.
    ///
    /// This is a label, not a state machine: any stage may be set directly.
    pub enum GrantStage ("grant stage") {
        Discovery => "discovery",
        Screening => "screening",
        Drafting => "drafting",
        Submission => "submission",
        Awarded => "awarded",
        Reporting => "reporting",
        Closed => "closed",
    }
}

impl Default for GrantStage {
    fn default() -> Self {
        GrantStage::Discovery
    }
}

db_enum! {
    pub enum ProposalStatus ("proposal status") {
        Draft => "draft",
        InReview => "in_review",
        Final => "final",
    }
}

impl Default for ProposalStatus {
    fn default() -> Self {
        ProposalStatus::Draft
    }
}

db_enum! {
    pub enum ReportStatus ("report status") {
        Draft => "draft",
        Submitted => "submitted",
    }
}

impl Default for ReportStatus {
    fn default() -> Self {
        ReportStatus::Draft
    }
}

db_enum! {
    /// Who assigned a document's category.
    pub enum CategorySource ("category source") {
        User => "user",
        Ai => "ai",
    }
}

db_enum! {
    pub enum SubmissionMethod ("submission method") {
        Auto => "auto",
        Manual => "manual",
    }
}

db_enum! {
    pub enum SubmissionStatus ("submission status") {
        Pending => "pending",
        Submitted => "submitted",
        Failed => "failed",
    }
}

db_enum! {
    /// Lifecycle status of a workflow execution ledger row.
    pub enum WorkflowStatus ("workflow status") {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
    }
}

impl WorkflowStatus {
    /// Completed and failed executions receive a `completed_at` timestamp.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }
}

db_enum! {
    /// Table discriminator used in storage errors and realtime change notices.
    pub enum EntityKind ("entity kind") {
        Organization => "organizations",
        Profile => "profiles",
        Grant => "grants",
        Funder => "funders",
        Proposal => "proposals",
        ProposalSection => "proposal_sections",
        Budget => "budgets",
        BudgetLineItem => "budget_line_items",
        Award => "awards",
        Report => "reports",
        Document => "documents",
        Narrative => "narratives",
        SubmissionChecklist => "submission_checklists",
        Submission => "submissions",
        WorkflowExecution => "workflow_executions",
    }
}

impl EntityKind {
    /// Table name in the relational store.
    pub fn table_name(&self) -> &'static str {
        self.as_db_str()
    }

    /// Human-readable singular name.
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Organization => "Organization",
            EntityKind::Profile => "Profile",
            EntityKind::Grant => "Grant",
            EntityKind::Funder => "Funder",
            EntityKind::Proposal => "Proposal",
            EntityKind::ProposalSection => "Proposal section",
            EntityKind::Budget => "Budget",
            EntityKind::BudgetLineItem => "Budget line item",
            EntityKind::Award => "Award",
            EntityKind::Report => "Report",
            EntityKind::Document => "Document",
            EntityKind::Narrative => "Narrative",
            EntityKind::SubmissionChecklist => "Submission checklist",
            EntityKind::Submission => "Submission",
            EntityKind::WorkflowExecution => "Workflow execution",
        }
    }
}

db_enum! {
    /// Kind of row change carried by a realtime notice.
    pub enum ChangeKind ("change kind") {
        Insert => "insert",
        Update => "update",
        Delete => "delete",
    }
}

db_enum! {
    /// Work that can be handed to the external automation engine.
    ///
    /// The database string doubles as the `workflow_name` recorded in the
    /// ledger and as the last segment of the engine endpoint path.
    pub enum WorkflowKind ("workflow") {
        DiscoverGrants => "discover-grants",
        ScreenEligibility => "screen-eligibility",
        GenerateProposal => "generate-proposal",
        ReviewProposal => "review-proposal",
        AnalyzeFunder => "analyze-funder",
        CustomizeNarrative => "customize-narrative",
        GenerateBudget => "generate-budget",
        GenerateReport => "generate-report",
        GenerateChecklist => "generate-checklist",
        AutoSubmit => "auto-submit",
        CategorizeDocument => "categorize-document",
    }
}

impl WorkflowKind {
    /// Name recorded in `workflow_executions.workflow_name`.
    pub fn workflow_name(&self) -> &'static str {
        self.as_db_str()
    }

    /// Path appended to the engine base URL.
    pub fn engine_path(&self) -> String {
        format!("/webhook/{}", self.as_db_str())
    }

    /// The entity a trigger of this kind must reference, if any.
    pub fn target_entity(&self) -> Option<EntityKind> {
        match self {
            WorkflowKind::DiscoverGrants => None,
            WorkflowKind::ScreenEligibility
            | WorkflowKind::GenerateProposal
            | WorkflowKind::GenerateChecklist
            | WorkflowKind::AutoSubmit => Some(EntityKind::Grant),
            WorkflowKind::ReviewProposal => Some(EntityKind::Proposal),
            WorkflowKind::AnalyzeFunder => Some(EntityKind::Funder),
            WorkflowKind::CustomizeNarrative => Some(EntityKind::Narrative),
            WorkflowKind::GenerateBudget => Some(EntityKind::Budget),
            WorkflowKind::GenerateReport => Some(EntityKind::Report),
            WorkflowKind::CategorizeDocument => Some(EntityKind::Document),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_stage_round_trips_through_db_str() {
        for stage in GrantStage::ALL {
            assert_eq!(GrantStage::from_db_str(stage.as_db_str()), Ok(*stage));
        }
    }

    #[test]
    fn test_enum_parse_is_case_insensitive() {
        assert_eq!("RUNNING".parse::<WorkflowStatus>(), Ok(WorkflowStatus::Running));
        assert_eq!(" Owner ".parse::<ProfileRole>(), Ok(ProfileRole::Owner));
    }

    #[test]
    fn test_enum_parse_error_names_kind() {
        let err = "archived".parse::<GrantStage>().unwrap_err();
        assert_eq!(err.to_string(), "Invalid grant stage: archived");
    }

    #[test]
    fn test_serde_uses_db_spelling() -> Result<(), serde_json::Error> {
        assert_eq!(serde_json::to_string(&ProposalStatus::InReview)?, "\"in_review\"");
        let kind: WorkflowKind = serde_json::from_str("\"generate-budget\"")?;
        assert_eq!(kind, WorkflowKind::GenerateBudget);
        Ok(())
    }

    #[test]
    fn test_budget_narrative_workflow_name() {
        assert_eq!(WorkflowKind::GenerateBudget.workflow_name(), "generate-budget");
        assert_eq!(WorkflowKind::GenerateBudget.engine_path(), "/webhook/generate-budget");
        assert_eq!(
            WorkflowKind::GenerateBudget.target_entity(),
            Some(EntityKind::Budget)
        );
    }

    #[test]
    fn test_discovery_needs_no_entity() {
        assert_eq!(WorkflowKind::DiscoverGrants.target_entity(), None);
    }

    #[test]
    fn test_terminal_workflow_statuses() {
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Failed.is_terminal());
        assert!(!WorkflowStatus::Running.is_terminal());
        assert!(!WorkflowStatus::Pending.is_terminal());
    }

    #[test]
    fn test_role_management_rights() {
        assert!(ProfileRole::Owner.can_manage());
        assert!(ProfileRole::Admin.can_manage());
        assert!(!ProfileRole::Member.can_manage());
    }
}
