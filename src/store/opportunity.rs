use std::fmt;

use serde::{Deserialize, Serialize};

use crate::serde_utils::deserialize_opt_timestamp_ms;

/// Lifecycle of an opportunity.
///
/// `active → executing → completed`, or `active → expired`. Terminal states
/// are final.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityStatus {
    #[default]
    Active,
    Executing,
    Completed,
    Expired,
}

impl OpportunityStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OpportunityStatus::Completed | OpportunityStatus::Expired)
    }

    pub fn can_transition_to(self, next: OpportunityStatus) -> bool {
        use OpportunityStatus::*;
        matches!(
            (self, next),
            (Active, Active | Executing | Expired)
                | (Executing, Executing | Completed)
                | (Completed, Completed)
                | (Expired, Expired)
        )
    }
}

impl fmt::Display for OpportunityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpportunityStatus::Active => write!(f, "active"),
            OpportunityStatus::Executing => write!(f, "executing"),
            OpportunityStatus::Completed => write!(f, "completed"),
            OpportunityStatus::Expired => write!(f, "expired"),
        }
    }
}

/// One live, time-bounded MEV opportunity.
///
/// Fields the client does not interpret are kept in `extra` and survive
/// merges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
    pub id: String,
    /// Opportunity category (arbitrage, sandwich, liquidation, ...)
    #[serde(rename = "type", default)]
    pub category: String,
    /// Creation time, epoch milliseconds
    #[serde(
        default,
        deserialize_with = "deserialize_opt_timestamp_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub detected_at: Option<i64>,
    /// Lifetime from `detected_at`, milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_expiry: Option<i64>,
    /// Explicit expiry, epoch milliseconds; overrides the derived value
    #[serde(
        default,
        deserialize_with = "deserialize_opt_timestamp_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub status: OpportunityStatus,
    #[serde(default)]
    pub estimated_profit: f64,
    #[serde(default)]
    pub risk_score: f64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Opportunity {
    /// Point after which the record is no longer active.
    pub fn expiry_ms(&self, default_time_to_expiry_ms: i64) -> i64 {
        if let Some(explicit) = self.expires_at {
            return explicit;
        }
        let detected = self.detected_at.unwrap_or(0);
        detected.saturating_add(self.time_to_expiry.unwrap_or(default_time_to_expiry_ms))
    }

    pub fn is_active(&self) -> bool {
        self.status == OpportunityStatus::Active
    }
}

/// Simple predicate filter over the store contents. Unset fields match
/// everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpportunityFilter {
    /// Allowed categories (empty = all)
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub min_profit: Option<f64>,
    #[serde(default)]
    pub max_risk: Option<f64>,
}

impl OpportunityFilter {
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.categories.push(category.into());
        self
    }

    pub fn min_profit(mut self, value: f64) -> Self {
        self.min_profit = Some(value);
        self
    }

    pub fn max_risk(mut self, value: f64) -> Self {
        self.max_risk = Some(value);
        self
    }

    pub fn matches(&self, opportunity: &Opportunity) -> bool {
        if !self.categories.is_empty() && !self.categories.iter().any(|c| c == &opportunity.category)
        {
            return false;
        }
        if let Some(min) = self.min_profit {
            if opportunity.estimated_profit < min {
                return false;
            }
        }
        if let Some(max) = self.max_risk {
            if opportunity.risk_score > max {
                return false;
            }
        }
        true
    }
}
