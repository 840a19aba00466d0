//! Tier selector
//!
//! Chooses investigation depth from incident and monitor signals. Rules are
//! ordered, first match wins, and selection is deterministic. Refinement may
//! upgrade a tier after metrics context is collected; it never downgrades.

use crate::models::{Incident, InvestigationTier, MonitorConfig, Severity};

/// Signals driving tier selection.
#[derive(Debug, Clone, Copy)]
pub struct TierCriteria {
    pub has_stack_trace: bool,
    pub has_deployment_event: bool,
    pub severity: Severity,
    pub has_git_config: bool,
    pub has_db_config: bool,
}

impl TierCriteria {
    /// Initial criteria; deployment events are unknown until metrics context
    /// is collected, so the flag starts false.
    pub fn from_incident(incident: &Incident, monitor: &MonitorConfig) -> Self {
        Self {
            has_stack_trace: incident.stack_trace.as_deref().is_some_and(|s| !s.is_empty()),
            has_deployment_event: false,
            severity: incident.severity,
            has_git_config: !monitor.gitlab_repositories.is_empty(),
            has_db_config: monitor.has_database_scope(),
        }
    }
}

/// Per-tier collection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierStrategy {
    pub collect_git: bool,
    pub collect_db: bool,
    pub collect_cross_repo: bool,
    pub max_commits_to_analyze: usize,
    pub include_commit_diffs: bool,
}

pub struct TierSelector;

impl TierSelector {
    /// Ordered rules, first match wins.
    pub fn select(criteria: TierCriteria) -> InvestigationTier {
        if criteria.severity == Severity::Critical
            && criteria.has_stack_trace
            && criteria.has_db_config
        {
            return InvestigationTier::T3;
        }
        if criteria.severity == Severity::High
            && criteria.has_deployment_event
            && criteria.has_git_config
        {
            return InvestigationTier::T3;
        }
        if (criteria.has_stack_trace || criteria.has_deployment_event) && criteria.has_git_config {
            return InvestigationTier::T2;
        }
        if matches!(criteria.severity, Severity::High | Severity::Critical)
            && criteria.has_git_config
        {
            return InvestigationTier::T2;
        }
        InvestigationTier::T1
    }

    /// Upgrade after metrics collection: a fresh deployment event lifts
    /// T1 -> T2 (git config required) or T2 -> T3 (DB config required).
    pub fn refine(
        tier: InvestigationTier,
        has_deployment_event: bool,
        monitor: &MonitorConfig,
    ) -> InvestigationTier {
        if !has_deployment_event {
            return tier;
        }
        match tier {
            InvestigationTier::T1 if !monitor.gitlab_repositories.is_empty() => InvestigationTier::T2,
            InvestigationTier::T2 if monitor.has_database_scope() => InvestigationTier::T3,
            other => other,
        }
    }

    pub fn strategy(tier: InvestigationTier) -> TierStrategy {
        match tier {
            InvestigationTier::T1 => TierStrategy {
                collect_git: false,
                collect_db: false,
                collect_cross_repo: false,
                max_commits_to_analyze: 0,
                include_commit_diffs: false,
            },
            InvestigationTier::T2 => TierStrategy {
                collect_git: true,
                collect_db: false,
                collect_cross_repo: false,
                max_commits_to_analyze: 10,
                include_commit_diffs: true,
            },
            InvestigationTier::T3 => TierStrategy {
                collect_git: true,
                collect_db: true,
                collect_cross_repo: true,
                max_commits_to_analyze: 20,
                include_commit_diffs: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(git: bool, db: bool) -> MonitorConfig {
        let mut value = serde_json::json!({
            "id": "m1",
            "name": "m1",
            "enabled": true,
            "queries": { "metric": "avg:latency" },
            "checkIntervalSeconds": 60,
            "threshold": { "type": "absolute", "warning": 50.0, "critical": 100.0 },
            "timeWindow": "5m",
            "teamsNotification": { "channelWebhookUrl": "https://example.test/hook" },
            "severity": "high"
        });
        if git {
            value["gitlabRepositories"] = serde_json::json!(["org/repo"]);
        }
        if db {
            value["enableDatabaseInvestigation"] = serde_json::json!(true);
            value["databaseContext"] = serde_json::json!({ "relevantTables": ["orders"] });
        }
        serde_json::from_value(value).unwrap()
    }

    fn criteria(
        severity: Severity,
        stack: bool,
        deployment: bool,
        git: bool,
        db: bool,
    ) -> TierCriteria {
        TierCriteria {
            has_stack_trace: stack,
            has_deployment_event: deployment,
            severity,
            has_git_config: git,
            has_db_config: db,
        }
    }

    #[test]
    fn test_critical_with_stack_and_db_is_t3() {
        let tier = TierSelector::select(criteria(Severity::Critical, true, false, true, true));
        assert_eq!(tier, InvestigationTier::T3);
    }

    #[test]
    fn test_high_with_deployment_and_git_is_t3() {
        let tier = TierSelector::select(criteria(Severity::High, false, true, true, false));
        assert_eq!(tier, InvestigationTier::T3);
    }

    #[test]
    fn test_stack_with_git_is_t2() {
        let tier = TierSelector::select(criteria(Severity::Medium, true, false, true, false));
        assert_eq!(tier, InvestigationTier::T2);
    }

    #[test]
    fn test_high_severity_with_git_is_t2() {
        let tier = TierSelector::select(criteria(Severity::High, false, false, true, false));
        assert_eq!(tier, InvestigationTier::T2);
    }

    #[test]
    fn test_default_is_t1() {
        let tier = TierSelector::select(criteria(Severity::Low, false, false, false, false));
        assert_eq!(tier, InvestigationTier::T1);
    }

    #[test]
    fn test_selection_is_deterministic() {
        let c = criteria(Severity::Critical, true, false, true, true);
        assert_eq!(TierSelector::select(c), TierSelector::select(c));
    }

    #[test]
    fn test_refinement_is_monotone() {
        let m = monitor(true, true);
        assert_eq!(
            TierSelector::refine(InvestigationTier::T1, true, &m),
            InvestigationTier::T2
        );
        assert_eq!(
            TierSelector::refine(InvestigationTier::T2, true, &m),
            InvestigationTier::T3
        );
        assert_eq!(
            TierSelector::refine(InvestigationTier::T3, true, &m),
            InvestigationTier::T3
        );
        // No deployment event: unchanged.
        assert_eq!(
            TierSelector::refine(InvestigationTier::T1, false, &m),
            InvestigationTier::T1
        );
        // Upgrades require the matching config.
        assert_eq!(
            TierSelector::refine(InvestigationTier::T1, true, &monitor(false, false)),
            InvestigationTier::T1
        );
        assert_eq!(
            TierSelector::refine(InvestigationTier::T2, true, &monitor(true, false)),
            InvestigationTier::T2
        );
    }

    #[test]
    fn test_strategy_limits() {
        assert_eq!(TierSelector::strategy(InvestigationTier::T1).max_commits_to_analyze, 0);
        let t2 = TierSelector::strategy(InvestigationTier::T2);
        assert_eq!(t2.max_commits_to_analyze, 10);
        assert!(t2.include_commit_diffs && t2.collect_git && !t2.collect_db);
        let t3 = TierSelector::strategy(InvestigationTier::T3);
        assert_eq!(t3.max_commits_to_analyze, 20);
        assert!(t3.collect_git && t3.collect_db && t3.collect_cross_repo);
    }
}
