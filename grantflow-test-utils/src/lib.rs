//! Grantflow Test Utilities
//!
//! Shared test infrastructure for the Grantflow workspace:
//! - Proptest generators for entity fields and enums
//! - Fixtures for common rows
//! - Assertions over `GrantflowResult`

pub use grantflow_core::{
    Budget, BudgetLineItem, ChecklistItem, EntityId, EntityKind, Grant, GrantStage,
    GrantflowError, GrantflowResult, Organization, Profile, ProfileRole, StorageError,
    WorkflowKind, WorkflowStatus,
};

use rust_decimal::Decimal;

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating Grantflow values.

    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    /// Generate a random UUID.
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    pub fn arb_grant_stage() -> impl Strategy<Value = GrantStage> {
        prop::sample::select(GrantStage::ALL.to_vec())
    }

    pub fn arb_workflow_kind() -> impl Strategy<Value = WorkflowKind> {
        prop::sample::select(WorkflowKind::ALL.to_vec())
    }

    pub fn arb_workflow_status() -> impl Strategy<Value = WorkflowStatus> {
        prop::sample::select(WorkflowStatus::ALL.to_vec())
    }

    /// Money amount in whole cents, up to ten million dollars.
    pub fn arb_amount() -> impl Strategy<Value = Decimal> {
        (0i64..1_000_000_000).prop_map(|cents| Decimal::new(cents, 2))
    }

    /// Checklist of up to 40 items with random completion.
    pub fn arb_checklist_items() -> impl Strategy<Value = Vec<ChecklistItem>> {
        prop::collection::vec(("[A-Za-z ]{1,24}", any::<bool>()), 0..40).prop_map(|pairs| {
            pairs
                .into_iter()
                .map(|(label, completed)| ChecklistItem {
                    label,
                    completed,
                    notes: None,
                })
                .collect()
        })
    }

    /// Lowercase snake-case action names, some of which collide with real
    /// callback actions.
    pub fn arb_action_name() -> impl Strategy<Value = String> {
        "[a-z][a-z_]{0,30}"
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built rows for common testing scenarios.

    use super::*;

    pub fn organization() -> Organization {
        let mut org = Organization::new("Riverbend Community Arts");
        org.mission = Some("Arts education for rural youth".to_string());
        org
    }

    pub fn owner(org_id: EntityId) -> Profile {
        Profile::new(grantflow_core::new_entity_id(), org_id, "owner@riverbend.test", ProfileRole::Owner)
    }

    pub fn member(org_id: EntityId) -> Profile {
        Profile::new(grantflow_core::new_entity_id(), org_id, "member@riverbend.test", ProfileRole::Member)
    }

    pub fn grant(org_id: EntityId) -> Grant {
        let mut grant = Grant::new(org_id, "Community Arts Access Program");
        grant.funder_name = Some("State Arts Council".to_string());
        grant.amount_requested = Some(Decimal::new(50_000, 0));
        grant
    }

    pub fn budget(org_id: EntityId) -> Budget {
        Budget::new(org_id, "FY25 Program Budget")
    }

    pub fn template_budget(org_id: EntityId) -> Budget {
        let mut budget = Budget::new(org_id, "Standard program template");
        budget.is_template = true;
        budget
    }

    /// A line item worth `cents / 100` dollars.
    pub fn line_item(budget_id: EntityId, cents: i64) -> BudgetLineItem {
        BudgetLineItem::new(budget_id, "personnel", "Program coordinator", Decimal::new(cents, 2))
    }

    pub fn checklist_items(flags: &[bool]) -> Vec<ChecklistItem> {
        flags
            .iter()
            .enumerate()
            .map(|(i, &completed)| ChecklistItem {
                label: format!("Item {}", i + 1),
                completed,
                notes: None,
            })
            .collect()
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for Grantflow-specific error shapes.

    use super::*;

    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &GrantflowResult<T>, entity: EntityKind) {
        match result {
            Err(GrantflowError::Storage(StorageError::NotFound { entity: found, .. })) => {
                assert_eq!(*found, entity, "Wrong entity in NotFound error");
            }
            other => panic!("Expected NotFound error for {:?}, got: {:?}", entity, other),
        }
    }

    #[track_caller]
    pub fn assert_access_denied<T: std::fmt::Debug>(result: &GrantflowResult<T>) {
        match result {
            Err(GrantflowError::Storage(StorageError::AccessDenied { .. })) => {}
            other => panic!("Expected AccessDenied error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &GrantflowResult<T>) {
        match result {
            Err(GrantflowError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fixture_grant_starts_in_discovery() {
        let org = fixtures::organization();
        let grant = fixtures::grant(org.id);
        assert_eq!(grant.org_id, org.id);
        assert_eq!(grant.stage, GrantStage::Discovery);
    }

    #[test]
    fn test_checklist_items_fixture_labels() {
        let items = fixtures::checklist_items(&[true, false]);
        assert_eq!(items[0].label, "Item 1");
        assert!(items[0].completed);
        assert!(!items[1].completed);
    }

    proptest! {
        #[test]
        fn prop_amounts_are_non_negative(amount in generators::arb_amount()) {
            prop_assert!(amount >= Decimal::ZERO);
            prop_assert_eq!(amount.scale(), 2);
        }
    }
}
