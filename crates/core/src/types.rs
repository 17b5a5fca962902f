//! Shared domain types: customers, segments and the rule descriptor wire shape.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Customer ──────────────────────────────────────────────────────────────

/// A customer record as persisted in the customer store.
///
/// Field names serialize to the physical storage names the rule compiler
/// targets (`totalSpend`, `visitCount`, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub total_spend: f64,
    #[serde(default)]
    pub visit_count: u64,
    #[serde(default)]
    pub last_visit: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_order_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub preferred_category: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub status: CustomerStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
    /// Explicit segment assignments. Only the membership delta path mutates
    /// segment counters in response to changes here.
    #[serde(default)]
    pub segments: BTreeSet<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            email: None,
            phone: None,
            total_spend: 0.0,
            visit_count: 0,
            last_visit: None,
            last_order_date: None,
            preferred_category: None,
            location: None,
            status: CustomerStatus::Active,
            tags: Vec::new(),
            attributes: HashMap::new(),
            segments: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Render the customer as the JSON document that store-side filters
    /// are evaluated against.
    pub fn to_document(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CustomerStatus {
    #[default]
    Active,
    Inactive,
    Churned,
}

// ─── Segment ───────────────────────────────────────────────────────────────

/// A named, rule-defined grouping of customers with a cached audience size.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub rules: Vec<RuleDescriptor>,
    /// Written by both the recompute path and the membership delta path.
    /// Signed because unclamped decrements may take it below zero.
    #[serde(default)]
    pub audience_size: i64,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: String,
}

fn default_active() -> bool {
    true
}

/// Read-only projection consumed by campaign targeting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SegmentSummary {
    pub id: Uuid,
    pub name: String,
    pub audience_size: i64,
}

impl From<&Segment> for SegmentSummary {
    fn from(segment: &Segment) -> Self {
        Self {
            id: segment.id,
            name: segment.name.clone(),
            audience_size: segment.audience_size,
        }
    }
}

// ─── Rule descriptor ───────────────────────────────────────────────────────

/// A single targeting condition as it arrives over the wire.
///
/// Missing `field`/`operator` deserialize to empty strings so that the
/// compiler can drop the rule instead of rejecting the whole request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuleDescriptor {
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub operator: String,
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_operator: Option<String>,
}

impl RuleDescriptor {
    pub fn new(
        field: impl Into<String>,
        operator: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        Self {
            field: field.into(),
            operator: operator.into(),
            value,
            group_id: None,
            group_operator: None,
        }
    }

    pub fn in_group(mut self, group_id: impl Into<String>, operator: GroupOperator) -> Self {
        self.group_id = Some(group_id.into());
        self.group_operator = Some(operator.as_str().to_string());
        self
    }
}

/// Boolean combinator for rules that share a group id.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GroupOperator {
    #[default]
    And,
    Or,
}

impl GroupOperator {
    /// Lenient parse: anything other than "or" is treated as "and".
    pub fn parse(token: Option<&str>) -> Self {
        match token {
            Some(t) if t.trim().eq_ignore_ascii_case("or") => GroupOperator::Or,
            _ => GroupOperator::And,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GroupOperator::And => "and",
            GroupOperator::Or => "or",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_descriptor_tolerates_missing_fields() {
        let rule: RuleDescriptor = serde_json::from_str(r#"{"value": 3}"#).unwrap();
        assert!(rule.field.is_empty());
        assert!(rule.operator.is_empty());
        assert!(rule.group_id.is_none());
    }

    #[test]
    fn test_rule_descriptor_wire_names() {
        let rule = RuleDescriptor::new("total_spend", ">", serde_json::json!(10))
            .in_group("g1", GroupOperator::Or);
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["groupId"], "g1");
        assert_eq!(json["groupOperator"], "or");
    }

    #[test]
    fn test_group_operator_parse_is_lenient() {
        assert_eq!(GroupOperator::parse(Some("OR")), GroupOperator::Or);
        assert_eq!(GroupOperator::parse(Some("and")), GroupOperator::And);
        assert_eq!(GroupOperator::parse(Some("xor")), GroupOperator::And);
        assert_eq!(GroupOperator::parse(None), GroupOperator::And);
    }

    #[test]
    fn test_customer_document_uses_physical_names() {
        let mut customer = Customer::new("Ada");
        customer.total_spend = 1200.0;
        customer.preferred_category = Some("books".into());
        let doc = customer.to_document();
        assert_eq!(doc["totalSpend"], 1200.0);
        assert_eq!(doc["preferredCategory"], "books");
        assert!(doc.get("createdAt").is_some());
    }
}
