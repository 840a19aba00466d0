//! Evidence aggregator
//!
//! Merges per-source collection results into a single evidence bundle,
//! computes the completeness score, and captures warnings from recoverable
//! collector failures. Absent contexts are never invented; the metrics
//! context alone is synthesized from the incident when collectors returned
//! nothing.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{
    CollectionError, CrossRepoContext, DatabaseEvidence, DatadogContext, DbFinding, ErrorDetails,
    EvidenceBundle, FindingSeverity, GitlabContext, Incident, InvestigationTier, Relevance,
};
use crate::services::db_investigator::DbInvestigationResult;

/// Ordered stack-trace location patterns: JS/TS frames with and without
/// parentheses, Python frames, then a bare `file.ext:line` fallback.
static LOCATION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"at .* \((.+?):(\d+):\d+\)",
        r"at (.+?):(\d+):\d+",
        r#"File "(.+?)", line (\d+)"#,
        r"(\S+\.(?:ts|js|py|java|go|rb)):(\d+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("location regex"))
    .collect()
});

/// Per-tier completeness weights: (metrics, git, db, cross-repo).
fn tier_weights(tier: InvestigationTier) -> (f64, f64, f64, f64) {
    match tier {
        InvestigationTier::T1 => (1.0, 0.0, 0.0, 0.0),
        InvestigationTier::T2 => (0.4, 0.6, 0.0, 0.0),
        InvestigationTier::T3 => (0.25, 0.35, 0.25, 0.15),
    }
}

/// Bonus multiplier applied to the metrics weight when error details are
/// present, and to the git weight when any commit carries a diff.
const PRESENCE_BONUS: f64 = 1.2;

/// Everything the orchestrator collected for one incident.
pub struct AggregationInput<'a> {
    pub incident: &'a Incident,
    pub tier: InvestigationTier,
    pub metrics_context: Option<DatadogContext>,
    pub gitlab_context: Option<GitlabContext>,
    pub database_result: Option<DbInvestigationResult>,
    pub cross_repo_context: Option<CrossRepoContext>,
    pub errors: Vec<CollectionError>,
}

pub struct EvidenceAggregator;

impl EvidenceAggregator {
    pub fn aggregate(input: AggregationInput<'_>) -> EvidenceBundle {
        let datadog_context = input
            .metrics_context
            .unwrap_or_else(|| Self::synthesize_metrics_context(input.incident));

        let gitlab_context = input.gitlab_context.filter(|ctx| !ctx.commits.is_empty());
        let database_context = input.database_result.map(Self::classify_database_result);
        let cross_repo_context = input.cross_repo_context;

        let warnings: Vec<String> = input
            .errors
            .iter()
            .filter(|e| e.recoverable)
            .map(|e| format!("{}: {}", e.source, e.message))
            .collect();

        let completeness = Self::completeness(
            input.tier,
            &datadog_context,
            gitlab_context.as_ref(),
            database_context.is_some(),
            cross_repo_context.is_some(),
        );

        EvidenceBundle {
            incident_id: input.incident.id,
            investigation_tier: input.tier,
            completeness,
            collected_at: Utc::now(),
            datadog_context,
            gitlab_context,
            database_context,
            cross_repo_context,
            warnings,
        }
    }

    /// Metrics context built from the incident itself when no collector
    /// produced one.
    fn synthesize_metrics_context(incident: &Incident) -> DatadogContext {
        let error_details = incident
            .error_message
            .as_deref()
            .map(|message| build_error_details(message, incident.stack_trace.as_deref()));

        DatadogContext { error_details, deployment_event: None, metric_history: Vec::new() }
    }

    fn classify_database_result(result: DbInvestigationResult) -> DatabaseEvidence {
        let all = || {
            result
                .schema_findings
                .iter()
                .chain(&result.data_findings)
                .chain(&result.performance_findings)
        };
        let has_high = all().any(|f: &DbFinding| f.severity == FindingSeverity::High);
        let total = all().count();

        let relevance = if has_high {
            Relevance::High
        } else if total > 3 {
            Relevance::Medium
        } else {
            Relevance::Low
        };

        DatabaseEvidence {
            schema_findings: result.schema_findings,
            data_findings: result.data_findings,
            performance_findings: result.performance_findings,
            relevance,
        }
    }

    /// Completeness: each present source contributes its tier weight, with a
    /// 20% bonus on metrics when error details exist and on git when any
    /// commit has a diff. Normalized by the tier's total weight, capped at 1.
    fn completeness(
        tier: InvestigationTier,
        metrics: &DatadogContext,
        git: Option<&GitlabContext>,
        has_db: bool,
        has_cross_repo: bool,
    ) -> f64 {
        let (w_metrics, w_git, w_db, w_cross) = tier_weights(tier);
        let total: f64 = w_metrics + w_git + w_db + w_cross;

        let mut sum = if metrics.error_details.is_some() {
            w_metrics * PRESENCE_BONUS
        } else {
            w_metrics
        };

        if let Some(git_ctx) = git {
            let bonus = git_ctx.commits.iter().any(|c| c.has_diff());
            sum += if bonus { w_git * PRESENCE_BONUS } else { w_git };
        }
        if has_db {
            sum += w_db;
        }
        if has_cross_repo {
            sum += w_cross;
        }

        (sum / total).min(1.0)
    }
}

/// Extract error details, pulling a file path and line number out of the
/// stack trace (or the message itself) via the ordered location patterns.
pub fn build_error_details(message: &str, stack_trace: Option<&str>) -> ErrorDetails {
    let haystacks = [stack_trace.unwrap_or(""), message];
    let location = haystacks.iter().filter(|h| !h.is_empty()).find_map(|haystack| {
        LOCATION_PATTERNS.iter().find_map(|pattern| {
            pattern.captures(haystack).and_then(|caps| {
                let file = caps.get(1)?.as_str().to_string();
                let line = caps.get(2)?.as_str().parse::<u32>().ok()?;
                Some((file, line))
            })
        })
    });

    ErrorDetails {
        message: message.to_string(),
        stack_trace: stack_trace.map(String::from),
        file_path: location.as_ref().map(|(file, _)| file.clone()),
        line_number: location.map(|(_, line)| line),
    }
}
