//! PostgreSQL-backed smoke tests for `PgStore`.
//!
//! Run with `--features db-tests` against a database reachable through the
//! `GRANTFLOW_DB_*` variables.

#![cfg(feature = "db-tests")]

use std::sync::Arc;

use grantflow_api::{ApiResult, DbConfig, PgStore};
use grantflow_core::{
    Grant, GrantStage, LineItemPatch, Proposal, ProposalSection, WorkflowKind, WorkflowStatus,
    WorkflowUpdate,
};
use grantflow_storage::{Access, GrantStore, TemplateCopy};
use grantflow_test_utils::fixtures;
use rust_decimal::Decimal;
use serde_json::json;

async fn test_store() -> ApiResult<PgStore> {
    let store = PgStore::from_config(&DbConfig::from_env())?;
    store.run_migrations().await?;
    Ok(store)
}

#[tokio::test]
async fn smoke_test_grant_budget_checklist_chain() -> ApiResult<()> {
    let store = test_store().await?;
    let org = fixtures::organization();
    store.organization_insert(&org).await?;
    let access = Access::Tenant(org.id);

    let grant = fixtures::grant(org.id);
    store.grant_insert(access, &grant).await?;
    let listed = store.grant_list(access, Some(GrantStage::Discovery)).await?;
    assert!(listed.iter().any(|g| g.id == grant.id));

    let budget = fixtures::budget(org.id);
    let items = vec![
        fixtures::line_item(budget.id, 120_050),
        fixtures::line_item(budget.id, 30_025),
    ];
    let created = store.budget_create(access, &budget, &items).await?;
    assert_eq!(created.total_amount, Decimal::new(150_075, 2));

    let (checklist, inserted) = store
        .checklist_upsert(access, org.id, grant.id, &fixtures::checklist_items(&[true, false, true, false]))
        .await?;
    assert!(inserted);
    assert_eq!(checklist.completion_percentage, 50);

    let (checklist, inserted) = store
        .checklist_upsert(access, org.id, grant.id, &fixtures::checklist_items(&[true, true]))
        .await?;
    assert!(!inserted);
    assert_eq!(checklist.completion_percentage, 100);
    Ok(())
}

#[tokio::test]
async fn smoke_test_workflow_ledger_lifecycle() -> ApiResult<()> {
    let store = test_store().await?;
    let org = fixtures::organization();
    store.organization_insert(&org).await?;
    let access = Access::Tenant(org.id);

    let execution = grantflow_core::WorkflowExecution::running(
        org.id,
        WorkflowKind::DiscoverGrants,
        None,
        json!({ "keywords": ["arts"] }),
    );
    store.workflow_insert(access, &execution).await?;

    let update = WorkflowUpdate {
        status: Some(WorkflowStatus::Completed),
        result: Some(json!({ "found": 2 })),
        error: None,
    };
    let updated = store.workflow_update(Access::Service, execution.id, &update).await?;
    assert_eq!(updated.status, WorkflowStatus::Completed);
    assert!(updated.completed_at.is_some());

    // Invisible to another tenant.
    let other = fixtures::organization();
    store.organization_insert(&other).await?;
    assert!(store
        .workflow_get(Access::Tenant(other.id), execution.id)
        .await?
        .is_none());
    Ok(())
}

#[tokio::test]
async fn smoke_test_grant_batch_rolls_back_on_bad_row() -> ApiResult<()> {
    let store = test_store().await?;
    let org = fixtures::organization();
    store.organization_insert(&org).await?;

    let good = fixtures::grant(org.id);
    // No such organization: the foreign key rejects the second row.
    let orphan = Grant::new(uuid::Uuid::now_v7(), "Orphaned discovery");
    let result = store.grant_insert_many(Access::Service, &[good.clone(), orphan]).await;
    assert!(result.is_err());

    assert!(store.grant_get(Access::Service, good.id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn smoke_test_proposal_rolls_back_when_a_section_fails() -> ApiResult<()> {
    let store = test_store().await?;
    let org = fixtures::organization();
    store.organization_insert(&org).await?;
    let access = Access::Tenant(org.id);
    let grant = fixtures::grant(org.id);
    store.grant_insert(access, &grant).await?;

    let proposal = Proposal::new(org.id, grant.id, "Arts Access proposal");
    let section = ProposalSection::new(proposal.id, "Need", "Rural students lack access.", 0);
    // Same primary key twice: the proposal and first section are written
    // before the second section fails.
    let duplicate = ProposalSection { sort_order: 1, ..section.clone() };
    let result = store.proposal_create(access, &proposal, &[section, duplicate]).await;
    assert!(result.is_err());

    assert!(store.proposal_get(access, proposal.id).await?.is_none());
    assert!(store.section_list(access, proposal.id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn smoke_test_copy_of_non_template_writes_nothing() -> ApiResult<()> {
    let store = test_store().await?;
    let org = fixtures::organization();
    store.organization_insert(&org).await?;
    let access = Access::Tenant(org.id);

    let plain = fixtures::budget(org.id);
    store.budget_create(access, &plain, &[fixtures::line_item(plain.id, 10_000)]).await?;
    let before = store.budget_list(access, None).await?.len();

    let copy = TemplateCopy {
        template_id: plain.id,
        org_id: org.id,
        grant_id: None,
        name: None,
    };
    assert!(store.budget_from_template(access, &copy).await.is_err());
    assert_eq!(store.budget_list(access, None).await?.len(), before);
    Ok(())
}

#[tokio::test]
async fn smoke_test_template_copy_carries_items_and_total() -> ApiResult<()> {
    let store = test_store().await?;
    let org = fixtures::organization();
    store.organization_insert(&org).await?;
    let access = Access::Tenant(org.id);

    let template = fixtures::template_budget(org.id);
    let items = vec![
        fixtures::line_item(template.id, 40_000),
        fixtures::line_item(template.id, 2_550),
    ];
    store.budget_create(access, &template, &items).await?;

    let copy = TemplateCopy {
        template_id: template.id,
        org_id: org.id,
        grant_id: None,
        name: Some("FY26 copy".to_string()),
    };
    let copied = store.budget_from_template(access, &copy).await?;
    assert_ne!(copied.id, template.id);
    assert!(!copied.is_template);
    assert_eq!(copied.total_amount, Decimal::new(42_550, 2));
    assert_eq!(store.line_item_list(access, copied.id).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn smoke_test_line_item_update_and_delete_recompute_total() -> ApiResult<()> {
    let store = test_store().await?;
    let org = fixtures::organization();
    store.organization_insert(&org).await?;
    let access = Access::Tenant(org.id);

    let budget = fixtures::budget(org.id);
    let first = fixtures::line_item(budget.id, 100_000);
    let second = fixtures::line_item(budget.id, 25_000);
    store.budget_create(access, &budget, &[first.clone(), second.clone()]).await?;

    let patch = LineItemPatch {
        amount: Some(Decimal::new(90_000, 2)),
        ..Default::default()
    };
    let (item, updated) = store.line_item_update(access, first.id, &patch).await?;
    assert_eq!(item.amount, Decimal::new(90_000, 2));
    assert_eq!(updated.total_amount, Decimal::new(115_000, 2));

    let after_delete = store.line_item_delete(access, second.id).await?;
    assert_eq!(after_delete.total_amount, Decimal::new(90_000, 2));

    let stored = store.budget_get(access, budget.id).await?;
    assert_eq!(stored.map(|b| b.total_amount), Some(Decimal::new(90_000, 2)));
    Ok(())
}

#[tokio::test]
async fn smoke_test_concurrent_sibling_edits_keep_total_consistent() -> ApiResult<()> {
    let store = Arc::new(test_store().await?);
    let org = fixtures::organization();
    store.organization_insert(&org).await?;
    let access = Access::Tenant(org.id);

    let budget = fixtures::budget(org.id);
    let items: Vec<_> = (0..8).map(|_| fixtures::line_item(budget.id, 1_000)).collect();
    store.budget_create(access, &budget, &items).await?;

    let mut tasks = Vec::new();
    for (i, item) in items.iter().enumerate() {
        let store = store.clone();
        let id = item.id;
        let patch = LineItemPatch {
            amount: Some(Decimal::new(2_000 + i as i64, 2)),
            ..Default::default()
        };
        tasks.push(tokio::spawn(async move { store.line_item_update(access, id, &patch).await }));
    }
    for task in tasks {
        task.await
            .map_err(|e| grantflow_api::ApiError::internal_error(e.to_string()))??;
    }

    let stored_items = store.line_item_list(access, budget.id).await?;
    let sum: Decimal = stored_items.iter().map(|i| i.amount).sum();
    let total = store.budget_get(access, budget.id).await?.map(|b| b.total_amount);
    assert_eq!(total, Some(sum));
    assert_eq!(sum, Decimal::new(16_028, 2));
    Ok(())
}
