//! OpenAPI Document for the Grantflow API
//!
//! Generated with utoipa from the route annotations and the entity types in
//! grantflow-core.

use utoipa::openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::error::{ApiError, ErrorCode};
use crate::events::WsEvent;
use crate::routes::{
    awards, budgets, documents, files, funders, grants, health, narratives, organization,
    proposals, submissions, webhook, workflows,
};

use grantflow_core::{
    Award, Budget, BudgetLineItem, CategorySource, ChangeKind, ChecklistItem, Document, EntityKind,
    Funder, Grant, GrantStage, Narrative, Organization, Profile, ProfileRole, Proposal,
    ProposalSection, ProposalStatus, Report, ReportStatus, Submission, SubmissionChecklist,
    SubmissionMethod, SubmissionStatus, WorkflowExecution, WorkflowStatus,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Grantflow API",
        version = "0.1.0",
        description = "Multi-tenant grant management with workflow dispatch to an external automation engine",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "http://localhost:3000", description = "Local Development")
    ),
    tags(
        (name = "Organization", description = "Tenant, members and caller identity"),
        (name = "Grants", description = "Grant pipeline"),
        (name = "Funders", description = "Funders and their analysis"),
        (name = "Proposals", description = "Proposals and ordered sections"),
        (name = "Budgets", description = "Budgets, line items and templates"),
        (name = "Awards", description = "Awards and reporting obligations"),
        (name = "Documents", description = "Uploads and signed downloads"),
        (name = "Narratives", description = "Reusable text blocks"),
        (name = "Submissions", description = "Checklists and submission log"),
        (name = "Workflows", description = "Dispatch to the automation engine and the execution ledger"),
        (name = "Callbacks", description = "Results reported by the automation engine"),
        (name = "Realtime", description = "Row change notices over WebSocket"),
        (name = "Health", description = "Probes"),
        (name = "Metrics", description = "Prometheus metrics")
    ),
    paths(
        organization::get_organization,
        organization::update_organization,
        organization::list_profiles,
        organization::me,

        grants::list_grants,
        grants::create_grant,
        grants::get_grant,
        grants::update_grant,
        grants::update_stage,
        grants::delete_grant,

        funders::list_funders,
        funders::create_funder,
        funders::get_funder,
        funders::update_funder,

        proposals::list_proposals,
        proposals::create_proposal,
        proposals::get_proposal,
        proposals::update_proposal,
        proposals::delete_proposal,
        proposals::create_section,
        proposals::reorder_sections,
        proposals::update_section,
        proposals::delete_section,

        budgets::list_budgets,
        budgets::create_budget,
        budgets::create_from_template,
        budgets::get_budget,
        budgets::update_budget,
        budgets::delete_budget,
        budgets::add_line_items,
        budgets::update_line_item,
        budgets::delete_line_item,

        awards::list_awards,
        awards::create_award,
        awards::get_award,
        awards::delete_award,
        awards::list_reports,
        awards::create_report,
        awards::update_report,
        awards::delete_report,

        documents::upload_document,
        documents::list_documents,
        documents::get_document,
        documents::document_url,
        documents::update_document,
        documents::delete_document,
        files::download_file,

        narratives::list_narratives,
        narratives::create_narrative,
        narratives::get_narrative,
        narratives::update_narrative,
        narratives::delete_narrative,

        submissions::get_checklist,
        submissions::put_checklist,
        submissions::list_submissions,
        submissions::create_submission,

        workflows::list_workflows,
        workflows::get_workflow,
        workflows::trigger_workflow,

        webhook::receive_callback,
        crate::ws::ws_handler,

        health::ping,
        health::liveness,
        health::readiness,
        crate::telemetry::metrics::metrics_handler,
    ),
    components(
        schemas(
            ApiError,
            ErrorCode,
            WsEvent,
            Organization,
            Profile,
            ProfileRole,
            Grant,
            GrantStage,
            Funder,
            Proposal,
            ProposalStatus,
            ProposalSection,
            Budget,
            BudgetLineItem,
            Award,
            Report,
            ReportStatus,
            Document,
            CategorySource,
            Narrative,
            ChecklistItem,
            SubmissionChecklist,
            Submission,
            SubmissionMethod,
            SubmissionStatus,
            WorkflowExecution,
            WorkflowStatus,
            EntityKind,
            ChangeKind,
            crate::dispatch::EngineRequest,
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Security scheme definitions.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "api_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("X-API-Key"))),
            );

            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some("JWT Bearer token"))
                        .build(),
                ),
            );

            // Shared secret the automation engine sends on callbacks.
            components.add_security_scheme(
                "webhook_secret",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("X-Webhook-Secret"))),
            );
        }
    }
}

impl ApiDoc {
    /// Render the OpenAPI document as pretty JSON.
    pub fn to_json() -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::openapi())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_generation() -> Result<(), String> {
        let openapi = ApiDoc::openapi();
        assert_eq!(openapi.info.title, "Grantflow API");

        let tags = openapi
            .tags
            .as_ref()
            .ok_or_else(|| "OpenAPI tags missing".to_string())?;
        assert!(tags.iter().any(|t| t.name == "Workflows"));

        for path in [
            "/api/v1/grants",
            "/api/v1/workflows/{kind}",
            "/api/webhook",
            "/files/{path}",
            "/health/ready",
        ] {
            assert!(openapi.paths.paths.contains_key(path), "missing path {}", path);
        }
        Ok(())
    }

    #[test]
    fn test_security_schemes_registered() -> Result<(), String> {
        let openapi = ApiDoc::openapi();
        let components = openapi
            .components
            .as_ref()
            .ok_or_else(|| "OpenAPI components missing".to_string())?;
        for scheme in ["api_key", "bearer_auth", "webhook_secret"] {
            assert!(components.security_schemes.contains_key(scheme), "missing {}", scheme);
        }
        Ok(())
    }

    #[test]
    fn test_ids_and_dates_render_as_formatted_strings() -> Result<(), String> {
        let doc = serde_json::to_value(ApiDoc::openapi()).map_err(|e| e.to_string())?;
        let grant = &doc["components"]["schemas"]["Grant"]["properties"];
        assert_eq!(grant["id"]["type"], "string");
        assert_eq!(grant["id"]["format"], "uuid");
        assert_eq!(grant["funder_id"]["format"], "uuid");
        assert_eq!(grant["deadline"]["format"], "date");
        assert_eq!(grant["created_at"]["format"], "date-time");

        let event = doc["components"]["schemas"]["WsEvent"].to_string();
        assert!(event.contains("record_id"));
        Ok(())
    }

    #[test]
    fn test_openapi_serializes() -> Result<(), String> {
        let json = ApiDoc::to_json().map_err(|e| e.to_string())?;
        assert!(json.contains("\"openapi\""));
        Ok(())
    }
}
