//! Segment evaluation — combines per-group rule results into membership.

use pulse_core::types::{Customer, Group, GroupLogic, Rule, Segment};
use pulse_core::{PulseError, PulseResult};
use serde::Serialize;
use std::collections::HashMap;

use crate::rules;

/// Result of a segment size computation: match count and share of the
/// customer base, percentage rounded to two decimals.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SegmentPreview {
    pub count: u64,
    pub percentage: f64,
}

/// Does `customer` belong to `segment`?
///
/// Rules are partitioned by `group_id`; each declared group combines its
/// rules with its own logic, and the per-group results combine under the
/// segment's top-level `rule_logic`. Deterministic and side-effect-free.
///
/// A group with zero rules matches nothing under either combinator, and a
/// segment with zero declared groups matches no one. (The vacuous-true
/// alternative would make an empty segment match the entire customer base.)
pub fn matches(segment: &Segment, customer: &Customer) -> bool {
    if segment.groups.is_empty() {
        return false;
    }

    let mut by_group: HashMap<&str, Vec<&Rule>> = HashMap::new();
    for rule in &segment.rules {
        by_group.entry(rule.group_id.as_str()).or_default().push(rule);
    }

    let mut group_results = segment.groups.iter().map(|group| {
        let group_rules = by_group.get(group.id.as_str()).map_or(&[][..], |v| v.as_slice());
        eval_group(group_rules, group.logic, customer)
    });

    match segment.rule_logic {
        GroupLogic::And => group_results.all(|matched| matched),
        GroupLogic::Or => group_results.any(|matched| matched),
    }
}

fn eval_group(group_rules: &[&Rule], logic: GroupLogic, customer: &Customer) -> bool {
    if group_rules.is_empty() {
        return false;
    }
    match logic {
        GroupLogic::And => group_rules.iter().all(|r| rules::evaluate(r, customer)),
        GroupLogic::Or => group_rules.iter().any(|r| rules::evaluate(r, customer)),
    }
}

/// Full scan of `customers` against `segment`: O(rules × customers), no
/// index. Re-run synchronously whenever a segment's rules or groups change.
pub fn compute_count(segment: &Segment, customers: &[Customer]) -> SegmentPreview {
    let count = customers.iter().filter(|c| matches(segment, c)).count() as u64;
    SegmentPreview {
        count,
        percentage: percentage(count, customers.len()),
    }
}

/// Stateless evaluation of a candidate rule set, for the segment builder's
/// preview. When no groups are supplied, every rule lands in one implicit
/// group combined with `rule_logic`.
pub fn preview(
    rule_set: &[Rule],
    groups: &[Group],
    rule_logic: GroupLogic,
    customers: &[Customer],
) -> SegmentPreview {
    let segment = candidate_segment(rule_set, groups, rule_logic);
    compute_count(&segment, customers)
}

fn candidate_segment(rule_set: &[Rule], groups: &[Group], rule_logic: GroupLogic) -> Segment {
    let (rule_set, groups) = if groups.is_empty() {
        let implicit = "preview";
        let remapped = rule_set
            .iter()
            .cloned()
            .map(|mut rule| {
                rule.group_id = implicit.to_string();
                rule
            })
            .collect();
        (
            remapped,
            vec![Group {
                id: implicit.to_string(),
                logic: rule_logic,
            }],
        )
    } else {
        (rule_set.to_vec(), groups.to_vec())
    };

    let now = chrono::Utc::now();
    Segment {
        id: uuid::Uuid::nil(),
        name: String::new(),
        description: None,
        rules: rule_set,
        groups,
        rule_logic,
        customer_count: 0,
        created_by: uuid::Uuid::nil(),
        last_evaluated: None,
        tags: Vec::new(),
        created_at: now,
        updated_at: now,
    }
}

fn percentage(count: u64, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (count as f64 / total as f64 * 10_000.0).round() / 100.0
}

/// Boundary validation for a segment's rule set: at least one rule, and
/// every rule's `group_id` must reference a declared group. Violations are
/// rejected synchronously and never enter the delivery queue.
pub fn validate(rule_set: &[Rule], groups: &[Group]) -> PulseResult<()> {
    if rule_set.is_empty() {
        return Err(PulseError::Validation(
            "segment requires at least one rule".into(),
        ));
    }
    for rule in rule_set {
        if !groups.iter().any(|g| g.id == rule.group_id) {
            return Err(PulseError::Validation(format!(
                "rule on '{}' references undeclared group '{}'",
                rule.field, rule.group_id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pulse_core::types::RuleOperator;
    use serde_json::json;
    use uuid::Uuid;

    fn customer(name: &str, total_spent: f64, visit_count: u32) -> Customer {
        let now = Utc::now();
        Customer {
            id: Uuid::new_v4(),
            name: name.into(),
            email: format!("{}@example.com", name.to_lowercase()),
            phone: None,
            total_spent,
            visit_count,
            last_visit: None,
            tags: Vec::new(),
            custom_fields: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn rule(field: &str, operator: RuleOperator, value: serde_json::Value, group: &str) -> Rule {
        Rule {
            field: field.into(),
            operator,
            value,
            group_id: group.into(),
        }
    }

    fn segment(rules: Vec<Rule>, groups: Vec<Group>, rule_logic: GroupLogic) -> Segment {
        let now = Utc::now();
        Segment {
            id: Uuid::new_v4(),
            name: "test".into(),
            description: None,
            rules,
            groups,
            rule_logic,
            customer_count: 0,
            created_by: Uuid::new_v4(),
            last_evaluated: None,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn group(id: &str, logic: GroupLogic) -> Group {
        Group {
            id: id.into(),
            logic,
        }
    }

    #[test]
    fn single_group_greater_than_round_trip() {
        let seg = segment(
            vec![rule("totalSpent", RuleOperator::GreaterThan, json!("100"), "g1")],
            vec![group("g1", GroupLogic::And)],
            GroupLogic::And,
        );
        let customers = vec![
            customer("Ada", 150.0, 3),
            customer("Bob", 50.0, 1),
            customer("Cyd", 101.0, 9),
        ];

        let matching: Vec<_> = customers.iter().filter(|c| matches(&seg, c)).collect();
        assert_eq!(matching.len(), 2);
        assert!(matching.iter().all(|c| c.total_spent > 100.0));

        let preview = compute_count(&seg, &customers);
        assert_eq!(preview.count, 2);
        assert!((preview.percentage - 66.67).abs() < f64::EPSILON);
    }

    #[test]
    fn two_groups_combined_with_or() {
        // Spender OR frequent visitor: satisfying a single group is enough.
        let seg = segment(
            vec![
                rule("totalSpent", RuleOperator::GreaterThan, json!(1000), "spenders"),
                rule("visitCount", RuleOperator::GreaterThan, json!(10), "regulars"),
            ],
            vec![
                group("spenders", GroupLogic::And),
                group("regulars", GroupLogic::And),
            ],
            GroupLogic::Or,
        );

        let visits_only = customer("Ada", 10.0, 20);
        let neither = customer("Bob", 10.0, 1);
        assert!(matches(&seg, &visits_only));
        assert!(!matches(&seg, &neither));
    }

    #[test]
    fn and_across_groups_requires_all() {
        let seg = segment(
            vec![
                rule("totalSpent", RuleOperator::GreaterThan, json!(100), "a"),
                rule("visitCount", RuleOperator::GreaterThan, json!(5), "b"),
            ],
            vec![group("a", GroupLogic::And), group("b", GroupLogic::And)],
            GroupLogic::And,
        );

        assert!(matches(&seg, &customer("Ada", 200.0, 10)));
        assert!(!matches(&seg, &customer("Bob", 200.0, 2)));
    }

    #[test]
    fn empty_group_matches_no_one() {
        // Declared group with no rules assigned to it.
        let seg = segment(
            vec![],
            vec![group("empty", GroupLogic::And)],
            GroupLogic::And,
        );
        assert!(!matches(&seg, &customer("Ada", 150.0, 3)));

        let seg_or = segment(vec![], vec![group("empty", GroupLogic::Or)], GroupLogic::Or);
        assert!(!matches(&seg_or, &customer("Ada", 150.0, 3)));
    }

    #[test]
    fn segment_without_groups_matches_no_one() {
        let seg = segment(
            vec![rule("totalSpent", RuleOperator::GreaterThan, json!(0), "orphan")],
            vec![],
            GroupLogic::And,
        );
        assert!(!matches(&seg, &customer("Ada", 150.0, 3)));
    }

    #[test]
    fn matches_is_deterministic() {
        let seg = segment(
            vec![rule("totalSpent", RuleOperator::Between, json!("10,200"), "g1")],
            vec![group("g1", GroupLogic::And)],
            GroupLogic::And,
        );
        let c = customer("Ada", 150.0, 3);
        let first = matches(&seg, &c);
        for _ in 0..10 {
            assert_eq!(matches(&seg, &c), first);
        }
    }

    #[test]
    fn preview_without_groups_synthesizes_one() {
        let customers = vec![customer("Ada", 150.0, 3), customer("Bob", 50.0, 1)];
        let result = preview(
            &[rule("totalSpent", RuleOperator::GreaterThan, json!(100), "whatever")],
            &[],
            GroupLogic::And,
            &customers,
        );
        assert_eq!(result.count, 1);
        assert!((result.percentage - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn preview_of_empty_customer_base_is_zero_percent() {
        let result = preview(
            &[rule("totalSpent", RuleOperator::GreaterThan, json!(0), "g")],
            &[],
            GroupLogic::And,
            &[],
        );
        assert_eq!(result.count, 0);
        assert_eq!(result.percentage, 0.0);
    }

    #[test]
    fn validate_rejects_undeclared_group_reference() {
        let rules = vec![rule("totalSpent", RuleOperator::GreaterThan, json!(1), "ghost")];
        let groups = vec![group("g1", GroupLogic::And)];
        assert!(validate(&rules, &groups).is_err());
        assert!(validate(&rules, &[group("ghost", GroupLogic::And)]).is_ok());
        assert!(validate(&[], &groups).is_err());
    }
}
