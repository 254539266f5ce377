//! Derived values that must be recomputed on every write.

use crate::{BudgetLineItem, ChecklistItem};
use rust_decimal::Decimal;

/// Completion percentage of a checklist.
///
/// `round(100 * completed / total)` with halves rounded up; `0` for an empty
/// checklist.
pub fn checklist_completion(items: &[ChecklistItem]) -> i32 {
    let total = items.len() as i64;
    if total == 0 {
        return 0;
    }
    let completed = items.iter().filter(|item| item.completed).count() as i64;
    ((200 * completed + total) / (2 * total)) as i32
}

/// Budget total: the sum of all line item amounts.
pub fn budget_total<'a>(items: impl IntoIterator<Item = &'a BudgetLineItem>) -> Decimal {
    items.into_iter().map(|item| item.amount).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::new_entity_id;
    use proptest::prelude::*;

    fn items(flags: &[bool]) -> Vec<ChecklistItem> {
        flags
            .iter()
            .map(|&completed| ChecklistItem {
                label: String::new(),
                completed,
                notes: None,
            })
            .collect()
    }

    #[test]
    fn test_empty_checklist_is_zero() {
        assert_eq!(checklist_completion(&[]), 0);
    }

    #[test]
    fn test_half_complete() {
        assert_eq!(checklist_completion(&items(&[true, false])), 50);
    }

    #[test]
    fn test_thirds_round_to_nearest() {
        assert_eq!(checklist_completion(&items(&[true, false, false])), 33);
        assert_eq!(checklist_completion(&items(&[true, true, false])), 67);
    }

    #[test]
    fn test_exact_half_rounds_up() {
        // 1 of 8 = 12.5%
        let mut flags = vec![false; 8];
        flags[0] = true;
        assert_eq!(checklist_completion(&items(&flags)), 13);
    }

    #[test]
    fn test_budget_total_sums_amounts() {
        let budget_id = new_entity_id();
        let line_items = vec![
            BudgetLineItem::new(budget_id, "personnel", "PI salary", Decimal::new(4_500_000, 2)),
            BudgetLineItem::new(budget_id, "travel", "Conference", Decimal::new(125_050, 2)),
        ];
        assert_eq!(budget_total(&line_items), Decimal::new(4_625_050, 2));
    }

    #[test]
    fn test_budget_total_empty_is_zero() {
        assert_eq!(budget_total(&[]), Decimal::ZERO);
    }

    proptest! {
        #[test]
        fn prop_checklist_matches_float_rounding(flags in prop::collection::vec(any::<bool>(), 1..200)) {
            let total = flags.len() as f64;
            let completed = flags.iter().filter(|f| **f).count() as f64;
            let expected = (100.0 * completed / total + 0.5).floor() as i32;
            prop_assert_eq!(checklist_completion(&items(&flags)), expected);
        }

        #[test]
        fn prop_checklist_bounded(flags in prop::collection::vec(any::<bool>(), 0..200)) {
            let pct = checklist_completion(&items(&flags));
            prop_assert!((0..=100).contains(&pct));
        }

        #[test]
        fn prop_budget_total_is_sum(cents in prop::collection::vec(0i64..10_000_000, 0..50)) {
            let budget_id = new_entity_id();
            let line_items: Vec<BudgetLineItem> = cents
                .iter()
                .map(|c| BudgetLineItem::new(budget_id, "other", "item", Decimal::new(*c, 2)))
                .collect();
            let expected = Decimal::new(cents.iter().sum::<i64>(), 2);
            prop_assert_eq!(budget_total(&line_items), expected);
        }
    }
}
