//! Rule model: logical field vocabulary, operator tokens, and the split
//! between plain and grouped rules.

use audience_core::types::{GroupOperator, RuleDescriptor};

/// Logical field compiled against the customer's creation timestamp.
pub const CUSTOMER_AGE: &str = "customer_age";

/// Logical -> physical field names. Fields not listed pass through verbatim.
const FIELD_MAP: &[(&str, &str)] = &[
    ("total_spend", "totalSpend"),
    ("visit_count", "visitCount"),
    ("last_order_date", "lastOrderDate"),
    ("product_category", "preferredCategory"),
    ("location", "location"),
    (CUSTOMER_AGE, "createdAt"),
];

/// Translate a logical field name into the storage field it targets.
pub fn physical_field(logical: &str) -> &str {
    FIELD_MAP
        .iter()
        .find(|(name, _)| *name == logical)
        .map(|(_, physical)| *physical)
        .unwrap_or(logical)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterThanEquals,
    LessThanEquals,
    Contains,
    NotContains,
    In,
}

impl Operator {
    /// Parse an operator token. Word and symbol forms are both accepted;
    /// anything else yields `None`.
    pub fn parse(token: &str) -> Option<Self> {
        let op = match token.trim() {
            "equals" | "=" => Operator::Equals,
            "notEquals" | "!=" => Operator::NotEquals,
            "greaterThan" | ">" => Operator::GreaterThan,
            "lessThan" | "<" => Operator::LessThan,
            "greaterThanEquals" | ">=" => Operator::GreaterThanEquals,
            "lessThanEquals" | "<=" => Operator::LessThanEquals,
            "contains" => Operator::Contains,
            "notContains" | "not_contains" => Operator::NotContains,
            "in" => Operator::In,
            _ => return None,
        };
        Some(op)
    }

    /// Comparison operators coerce numeric-looking string values.
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Operator::Equals
                | Operator::NotEquals
                | Operator::GreaterThan
                | Operator::LessThan
                | Operator::GreaterThanEquals
                | Operator::LessThanEquals
        )
    }
}

/// The condition part of a rule, independent of grouping.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleTerm {
    pub field: String,
    pub operator: String,
    pub value: serde_json::Value,
}

/// A rule is either part of the implicit top-level AND clause or belongs to
/// an explicit group combined with its own operator.
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    Plain(RuleTerm),
    Grouped {
        group_id: String,
        operator: GroupOperator,
        term: RuleTerm,
    },
}

impl From<&RuleDescriptor> for Rule {
    fn from(descriptor: &RuleDescriptor) -> Self {
        let term = RuleTerm {
            field: descriptor.field.trim().to_string(),
            operator: descriptor.operator.trim().to_string(),
            value: descriptor.value.clone(),
        };
        match descriptor.group_id.as_deref().map(str::trim) {
            Some(group_id) if !group_id.is_empty() => Rule::Grouped {
                group_id: group_id.to_string(),
                operator: GroupOperator::parse(descriptor.group_operator.as_deref()),
                term,
            },
            _ => Rule::Plain(term),
        }
    }
}
