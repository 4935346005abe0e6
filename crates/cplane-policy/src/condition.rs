//! ---
//! cp_section: "05-policy-automation"
//! cp_subsection: "module"
//! cp_type: "source"
//! cp_scope: "code"
//! cp_description: "Declarative remediation policies and their evaluation engine."
//! cp_version: "v0.1.0-alpha"
//! cp_owner: "tbd"
//! ---
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};

use cplane_state::{SystemState, SystemStateContext};

/// Condition over one system's live state.
///
/// Conditions are pure over a context snapshot; the evaluator never holds a
/// state lock while matching. All sub-fields present on a `State` condition
/// are implicitly ANDed; an absent field does not constrain the match.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyCondition {
    /// Constraints on the state record itself.
    State {
        /// State the system must currently hold.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<SystemState>,
        /// Minimum time the current state must have been held.
        #[serde_as(as = "Option<DurationSeconds<u64>>")]
        #[serde(
            default,
            rename = "duration_seconds",
            skip_serializing_if = "Option::is_none"
        )]
        duration: Option<Duration>,
        /// Minimum retry count.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_count_threshold: Option<u32>,
        /// Minimum consecutive-failure count.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        consecutive_failures_threshold: Option<u32>,
    },
    /// The most recently observed latency exceeds `threshold_ms`.
    Latency {
        /// Exclusive latency threshold in milliseconds.
        threshold_ms: u64,
    },
    /// Every nested condition holds.
    And {
        /// Conjoined conditions; an empty list never matches.
        conditions: Vec<PolicyCondition>,
    },
}

impl PolicyCondition {
    /// Condition matching a bare state, the most common form.
    pub fn state(state: SystemState) -> Self {
        PolicyCondition::State {
            state: Some(state),
            duration: None,
            retry_count_threshold: None,
            consecutive_failures_threshold: None,
        }
    }

    /// Condition matching a state held for at least `duration`.
    pub fn state_held(state: SystemState, duration: Duration) -> Self {
        PolicyCondition::State {
            state: Some(state),
            duration: Some(duration),
            retry_count_threshold: None,
            consecutive_failures_threshold: None,
        }
    }

    /// Whether the condition holds for `ctx`.
    pub fn evaluate(&self, ctx: &SystemStateContext) -> bool {
        match self {
            PolicyCondition::State {
                state,
                duration,
                retry_count_threshold,
                consecutive_failures_threshold,
            } => {
                if state.is_some_and(|expected| ctx.current_state != expected) {
                    return false;
                }
                if let Some(duration) = duration {
                    match chrono::Duration::from_std(*duration) {
                        Ok(held) if ctx.is_stable_for(held) => {}
                        _ => return false,
                    }
                }
                if retry_count_threshold.is_some_and(|min| ctx.retry_count < min) {
                    return false;
                }
                if consecutive_failures_threshold
                    .is_some_and(|min| ctx.consecutive_failures < min)
                {
                    return false;
                }
                true
            }
            PolicyCondition::Latency { threshold_ms } => {
                ctx.latency_ms.is_some_and(|observed| observed > *threshold_ms)
            }
            PolicyCondition::And { conditions } => {
                !conditions.is_empty() && conditions.iter().all(|c| c.evaluate(ctx))
            }
        }
    }

    /// Operator-facing description used in alerts, audit records, and logs.
    pub fn describe(&self) -> String {
        match self {
            PolicyCondition::State {
                state,
                duration,
                retry_count_threshold,
                consecutive_failures_threshold,
            } => {
                let mut parts = Vec::new();
                if let Some(state) = state {
                    parts.push(format!("state == {state}"));
                }
                if let Some(duration) = duration {
                    parts.push(format!("held >= {}s", duration.as_secs()));
                }
                if let Some(min) = retry_count_threshold {
                    parts.push(format!("retries >= {min}"));
                }
                if let Some(min) = consecutive_failures_threshold {
                    parts.push(format!("consecutive failures >= {min}"));
                }
                if parts.is_empty() {
                    "always".to_owned()
                } else {
                    parts.join(" AND ")
                }
            }
            PolicyCondition::Latency { threshold_ms } => {
                format!("latency > {threshold_ms}ms")
            }
            PolicyCondition::And { conditions } => {
                let parts: Vec<String> = conditions.iter().map(|c| c.describe()).collect();
                format!("({})", parts.join(" AND "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, Utc};

    use cplane_common::SystemType;

    use super::*;

    fn context_in(state: SystemState) -> SystemStateContext {
        let mut ctx = SystemStateContext::initial(SystemType::Mysql);
        ctx.current_state = state;
        ctx
    }

    #[test]
    fn state_condition_ands_its_present_fields() {
        let mut ctx = context_in(SystemState::Retrying);
        ctx.last_transition_at = Utc::now() - ChronoDuration::seconds(45);
        ctx.retry_count = 4;

        assert!(PolicyCondition::state(SystemState::Retrying).evaluate(&ctx));
        assert!(!PolicyCondition::state(SystemState::Connected).evaluate(&ctx));

        let full = PolicyCondition::State {
            state: Some(SystemState::Retrying),
            duration: Some(Duration::from_secs(30)),
            retry_count_threshold: Some(3),
            consecutive_failures_threshold: None,
        };
        assert!(full.evaluate(&ctx));

        // One failing field sinks the whole condition.
        let strict_retries = PolicyCondition::State {
            state: Some(SystemState::Retrying),
            duration: Some(Duration::from_secs(30)),
            retry_count_threshold: Some(10),
            consecutive_failures_threshold: None,
        };
        assert!(!strict_retries.evaluate(&ctx));

        // No fields at all constrains nothing.
        let empty = PolicyCondition::State {
            state: None,
            duration: None,
            retry_count_threshold: None,
            consecutive_failures_threshold: None,
        };
        assert!(empty.evaluate(&ctx));
        assert_eq!(empty.describe(), "always");
    }

    #[test]
    fn latency_condition_is_strictly_greater_than() {
        let mut ctx = context_in(SystemState::Connected);
        let condition = PolicyCondition::Latency { threshold_ms: 500 };
        assert!(!condition.evaluate(&ctx), "no observation, no match");

        ctx.latency_ms = Some(500);
        assert!(!condition.evaluate(&ctx));
        ctx.latency_ms = Some(501);
        assert!(condition.evaluate(&ctx));
    }

    #[test]
    fn and_condition_requires_every_branch() {
        let mut ctx = context_in(SystemState::Degraded);
        ctx.latency_ms = Some(900);
        let condition = PolicyCondition::And {
            conditions: vec![
                PolicyCondition::state(SystemState::Degraded),
                PolicyCondition::Latency { threshold_ms: 500 },
            ],
        };
        assert!(condition.evaluate(&ctx));

        ctx.latency_ms = Some(100);
        assert!(!condition.evaluate(&ctx));

        let empty = PolicyCondition::And { conditions: vec![] };
        assert!(!empty.evaluate(&ctx));
    }

    #[test]
    fn conditions_round_trip_through_tagged_json() {
        let raw = r#"{
            "type": "and",
            "conditions": [
                {"type": "state", "state": "DEGRADED", "consecutive_failures_threshold": 2},
                {"type": "latency", "threshold_ms": 250}
            ]
        }"#;
        let condition: PolicyCondition = serde_json::from_str(raw).unwrap();
        assert_eq!(
            condition.describe(),
            "(state == DEGRADED AND consecutive failures >= 2 AND latency > 250ms)"
        );
        let json = serde_json::to_string(&condition).unwrap();
        let reparsed: PolicyCondition = serde_json::from_str(&json).unwrap();
        assert_eq!(condition, reparsed);
    }
}
