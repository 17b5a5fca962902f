//! Predicate compiler: rule descriptors in, one evaluable predicate out.
//!
//! Ungrouped rules form a single AND clause; every group forms a clause
//! combined with its own operator; the clauses are ORed together. Invalid
//! rules are dropped with a warning and never abort the compile.

use audience_core::types::{GroupOperator, RuleDescriptor};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::warn;

use crate::predicates::{coerce_numeric, Condition, Operand, Predicate};
use crate::rules::{physical_field, Operator, Rule, RuleTerm, CUSTOMER_AGE};

struct GroupBucket {
    group_id: String,
    operator: GroupOperator,
    conditions: Vec<Predicate>,
}

/// Compile `rules` against the current time.
pub fn compile(rules: &[RuleDescriptor]) -> Predicate {
    compile_at(rules, Utc::now())
}

/// Compile `rules` with `now` as the reference point for date arithmetic.
pub fn compile_at(rules: &[RuleDescriptor], now: DateTime<Utc>) -> Predicate {
    let mut ungrouped = Vec::new();
    let mut groups: Vec<GroupBucket> = Vec::new();

    for rule in rules.iter().map(Rule::from) {
        match rule {
            Rule::Plain(term) => ungrouped.extend(compile_rule(&term, now)),
            Rule::Grouped {
                group_id,
                operator,
                term,
            } => {
                let idx = match groups.iter().position(|g| g.group_id == group_id) {
                    Some(idx) => idx,
                    None => {
                        groups.push(GroupBucket {
                            group_id,
                            operator,
                            conditions: Vec::new(),
                        });
                        groups.len() - 1
                    }
                };
                groups[idx].conditions.extend(compile_rule(&term, now));
            }
        }
    }

    let mut clauses: Vec<Predicate> = Predicate::all(ungrouped).into_iter().collect();
    for bucket in groups {
        let clause = match bucket.operator {
            GroupOperator::And => Predicate::all(bucket.conditions),
            GroupOperator::Or => Predicate::any(bucket.conditions),
        };
        clauses.extend(clause);
    }

    Predicate::any(clauses).unwrap_or(Predicate::Nothing)
}

/// Compile one rule, or `None` if it must be dropped.
pub fn compile_rule(term: &RuleTerm, now: DateTime<Utc>) -> Option<Predicate> {
    if term.field.is_empty() || term.operator.is_empty() {
        return drop_rule(term, "missing field or operator");
    }
    let Some(operator) = Operator::parse(&term.operator) else {
        return drop_rule(term, "unsupported operator");
    };

    if term.field == CUSTOMER_AGE {
        return compile_customer_age(term, operator, now);
    }

    let operand = match operator {
        Operator::Contains | Operator::NotContains => {
            Value::String(value_as_text(&term.value).to_lowercase())
        }
        Operator::In => match &term.value {
            Value::Array(_) => term.value.clone(),
            other => Value::Array(vec![other.clone()]),
        },
        op if op.is_comparison() => coerce_numeric(&term.value),
        _ => term.value.clone(),
    };

    Some(Predicate::Condition(Condition {
        field: physical_field(&term.field).to_string(),
        operator,
        operand: Operand::Value(operand),
    }))
}

/// `customer_age` is a day count compared against the creation timestamp.
/// Older than N days means created before `now - N`, so the comparison
/// direction flips.
fn compile_customer_age(
    term: &RuleTerm,
    operator: Operator,
    now: DateTime<Utc>,
) -> Option<Predicate> {
    let flipped = match operator {
        Operator::GreaterThan => Operator::LessThan,
        Operator::LessThan => Operator::GreaterThan,
        _ => return drop_rule(term, "customer_age only supports greaterThan and lessThan"),
    };
    let Some(days) = day_count(&term.value) else {
        return drop_rule(term, "customer_age value is not a day count");
    };
    let Some(cutoff) = Duration::try_days(days).and_then(|age| now.checked_sub_signed(age))
    else {
        return drop_rule(term, "customer_age value out of range");
    };

    Some(Predicate::Condition(Condition {
        field: physical_field(CUSTOMER_AGE).to_string(),
        operator: flipped,
        operand: Operand::Timestamp(cutoff),
    }))
}

fn day_count(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn drop_rule(term: &RuleTerm, reason: &'static str) -> Option<Predicate> {
    warn!(
        field = %term.field,
        operator = %term.operator,
        reason,
        "Dropping invalid segment rule"
    );
    metrics::counter!("segmentation.rules.dropped").increment(1);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use audience_core::types::Customer;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn rule(field: &str, op: &str, value: Value) -> RuleDescriptor {
        RuleDescriptor::new(field, op, value)
    }

    fn customer(spend: f64, visits: u64, tags: &[&str]) -> Customer {
        let mut c = Customer::new("test");
        c.total_spend = spend;
        c.visit_count = visits;
        c.tags = tags.iter().map(|t| t.to_string()).collect();
        c
    }

    #[test]
    fn test_empty_rules_match_nothing() {
        let predicate = compile_at(&[], now());
        assert_eq!(predicate, Predicate::Nothing);
        assert!(!predicate.matches(&customer(1_000_000.0, 100, &["vip"])));
    }

    #[test]
    fn test_all_rules_dropped_match_nothing() {
        let rules = vec![
            rule("", ">", json!(1)),
            rule("total_spend", "", json!(1)),
            rule("total_spend", "between", json!([1, 2])),
        ];
        assert_eq!(compile_at(&rules, now()), Predicate::Nothing);
    }

    #[test]
    fn test_single_rule_with_numeric_coercion() {
        let predicate = compile_at(&[rule("total_spend", ">", json!("1000"))], now());
        assert_eq!(
            predicate,
            Predicate::Condition(Condition {
                field: "totalSpend".into(),
                operator: Operator::GreaterThan,
                operand: Operand::Value(json!(1000)),
            })
        );
        assert!(predicate.matches(&customer(1000.5, 0, &[])));
        assert!(!predicate.matches(&customer(1000.0, 0, &[])));
        assert!(!predicate.matches(&customer(500.0, 0, &[])));
    }

    #[test]
    fn test_or_group_has_no_extra_wrapper() {
        let rules = vec![
            rule("total_spend", ">", json!(1000)).in_group("g1", GroupOperator::Or),
            rule("visit_count", ">", json!(3)).in_group("g1", GroupOperator::Or),
        ];
        let predicate = compile_at(&rules, now());
        match &predicate {
            Predicate::Or(parts) => {
                assert_eq!(parts.len(), 2);
                assert!(parts.iter().all(|p| matches!(p, Predicate::Condition(_))));
            }
            other => panic!("expected a flat OR, got {other:?}"),
        }
    }

    #[test]
    fn test_ungrouped_clause_or_group_clause() {
        let rules = vec![
            rule("tags", "contains", json!("Newsletter")),
            rule("total_spend", ">", json!(1000)).in_group("g1", GroupOperator::Or),
            rule("visit_count", ">", json!(3)).in_group("g1", GroupOperator::Or),
        ];
        let predicate = compile_at(&rules, now());
        match &predicate {
            Predicate::Or(clauses) => {
                assert_eq!(clauses.len(), 2);
                assert!(matches!(clauses[0], Predicate::Condition(_)));
                assert!(matches!(clauses[1], Predicate::Or(_)));
            }
            other => panic!("expected two OR clauses, got {other:?}"),
        }

        assert!(predicate.matches(&customer(0.0, 0, &["newsletter"])));
        assert!(predicate.matches(&customer(0.0, 5, &[])));
        assert!(predicate.matches(&customer(2000.0, 0, &[])));
        assert!(!predicate.matches(&customer(10.0, 1, &["other"])));
    }

    #[test]
    fn test_ungrouped_rules_are_anded() {
        let rules = vec![
            rule("total_spend", ">", json!(1000)),
            rule("visit_count", ">", json!(3)),
        ];
        let predicate = compile_at(&rules, now());
        assert!(matches!(predicate, Predicate::And(ref parts) if parts.len() == 2));
        assert!(predicate.matches(&customer(1500.0, 4, &[])));
        assert!(!predicate.matches(&customer(1500.0, 2, &[])));
    }

    #[test]
    fn test_group_order_follows_first_seen_id() {
        let rules = vec![
            rule("location", "=", json!("Rome")).in_group("b", GroupOperator::And),
            rule("location", "=", json!("Oslo")).in_group("a", GroupOperator::And),
            rule("visit_count", ">", json!(1)).in_group("b", GroupOperator::And),
        ];
        let predicate = compile_at(&rules, now());
        let Predicate::Or(clauses) = &predicate else {
            panic!("expected OR of groups, got {predicate:?}");
        };
        assert!(matches!(clauses[0], Predicate::And(ref parts) if parts.len() == 2));
        assert!(matches!(clauses[1], Predicate::Condition(_)));
    }

    #[test]
    fn test_compile_is_deterministic() {
        let rules = vec![
            rule("total_spend", ">=", json!("10")),
            rule("location", "in", json!("Paris")).in_group("g", GroupOperator::Or),
            rule("tags", "not_contains", json!("spam")).in_group("g", GroupOperator::Or),
        ];
        assert_eq!(compile_at(&rules, now()), compile_at(&rules, now()));
    }

    #[test]
    fn test_unsupported_operator_is_dropped() {
        let valid = rule("total_spend", ">", json!(1000));
        let with_invalid = vec![valid.clone(), rule("total_spend", "between", json!([1, 2]))];
        assert_eq!(
            compile_at(&with_invalid, now()),
            compile_at(&[valid], now())
        );
    }

    #[test]
    fn test_in_wraps_scalar() {
        let predicate = compile_at(&[rule("location", "in", json!("Paris"))], now());
        let Predicate::Condition(condition) = &predicate else {
            panic!("expected condition");
        };
        assert_eq!(condition.operand, Operand::Value(json!(["Paris"])));

        let mut c = customer(0.0, 0, &[]);
        c.location = Some("Paris".into());
        assert!(predicate.matches(&c));
    }

    #[test]
    fn test_unknown_field_passes_through() {
        let predicate = compile_at(&[rule("tier", "=", json!("gold"))], now());
        let mut c = customer(0.0, 0, &[]);
        c.attributes.insert("tier".into(), json!("gold"));
        assert!(predicate.matches(&c));
    }

    #[test]
    fn test_product_category_maps_to_preferred_category() {
        let predicate = compile_at(&[rule("product_category", "equals", json!("books"))], now());
        let mut c = customer(0.0, 0, &[]);
        c.preferred_category = Some("books".into());
        assert!(predicate.matches(&c));
    }

    #[test]
    fn test_customer_age_is_inverted() {
        let mut old = customer(0.0, 0, &[]);
        old.created_at = now() - Duration::days(45);
        let mut young = customer(0.0, 0, &[]);
        young.created_at = now() - Duration::days(5);

        let older_than = compile_at(&[rule("customer_age", "greaterThan", json!(30))], now());
        assert!(older_than.matches(&old));
        assert!(!older_than.matches(&young));

        let younger_than = compile_at(&[rule("customer_age", "lessThan", json!(30))], now());
        assert!(younger_than.matches(&young));
        assert!(!younger_than.matches(&old));

        let Predicate::Condition(condition) = older_than else {
            panic!("expected condition");
        };
        assert_eq!(condition.field, "createdAt");
        assert_eq!(condition.operator, Operator::LessThan);
        assert_eq!(condition.operand, Operand::Timestamp(now() - Duration::days(30)));
    }

    #[test]
    fn test_customer_age_rejects_other_operators() {
        for op in ["=", ">=", "<=", "contains", "in"] {
            let predicate = compile_at(&[rule("customer_age", op, json!(30))], now());
            assert_eq!(predicate, Predicate::Nothing, "operator {op} should be dropped");
        }
        let predicate = compile_at(&[rule("customer_age", ">", json!("soon"))], now());
        assert_eq!(predicate, Predicate::Nothing);
    }

    #[test]
    fn test_customer_age_out_of_range_is_dropped() {
        let valid = rule("total_spend", ">", json!(10));
        for value in [json!(1_000_000_000), json!(1e300), json!(-1e300), json!(i64::MAX)] {
            for op in ["greaterThan", "lessThan"] {
                let predicate = compile_at(&[rule("customer_age", op, value.clone())], now());
                assert_eq!(predicate, Predicate::Nothing, "{op} {value} should be dropped");
            }
            let with_valid =
                compile_at(&[valid.clone(), rule("customer_age", ">", value.clone())], now());
            assert_eq!(with_valid, compile_at(&[valid.clone()], now()));
        }
    }

    #[test]
    fn test_only_comparisons_coerce_numeric_strings() {
        let Predicate::Condition(eq) = compile_at(&[rule("visit_count", "=", json!("3"))], now())
        else {
            panic!("expected condition");
        };
        assert_eq!(eq.operand, Operand::Value(json!(3)));

        let Predicate::Condition(within) =
            compile_at(&[rule("location", "in", json!(["10", "20"]))], now())
        else {
            panic!("expected condition");
        };
        assert_eq!(within.operand, Operand::Value(json!(["10", "20"])));
    }

    #[test]
    fn test_last_order_date_compares_instants() {
        let mut recent = customer(0.0, 0, &[]);
        recent.last_order_date = Some(
            DateTime::parse_from_rfc3339("2026-01-10T10:00:00.500Z")
                .unwrap()
                .with_timezone(&Utc),
        );
        let mut never = customer(0.0, 0, &[]);
        never.last_order_date = None;

        let after = compile_at(
            &[rule("last_order_date", ">", json!("2026-01-10T12:00:00+05:00"))],
            now(),
        );
        assert!(after.matches(&recent));
        assert!(!after.matches(&never));

        let before = compile_at(
            &[rule("last_order_date", "<", json!("2026-01-10T10:00:00Z"))],
            now(),
        );
        assert!(!before.matches(&recent));
        assert!(!before.matches(&never));
    }
}
