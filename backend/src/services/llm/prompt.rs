//! Prompt construction for incident analysis.
//!
//! Pure and deterministic: identical (incident, bundle) inputs yield a
//! byte-identical prompt, which keeps the response cache key stable. Large
//! fields are truncated to fixed budgets with a visible middle marker.

use std::fmt::Write as _;

use crate::models::{EvidenceBundle, Incident, ScoredCommit};

/// Character budget for the stack trace section.
pub const STACK_TRACE_BUDGET: usize = 2000;
/// Character budget for a single commit message.
pub const COMMIT_MESSAGE_BUDGET: usize = 300;
/// Changed files listed per expanded commit.
pub const FILES_PER_COMMIT: usize = 20;
/// Commits expanded with full detail; the rest are single lines.
pub const EXPANDED_COMMITS: usize = 3;
/// Code-search matches included in the prompt.
pub const SEARCH_MATCHES_SHOWN: usize = 10;

pub const ANALYSIS_SYSTEM_PROMPT: &str = r#"
You are a senior site reliability engineer performing root-cause analysis of
a production incident. You receive the incident header, metrics context,
recent scored commits, database findings, and cross-repository impact data.

Your job:
1. Identify the most likely root cause and the mechanism by which it produced
   the observed anomaly.
2. Cite concrete evidence from the provided data; never invent commits,
   tables, or metrics that were not supplied.
3. Propose prioritized, actionable remediation steps.

Output contract: respond with ONLY a JSON object, no prose, no Markdown
fences. The required schema is appended to the user message.
"#;

/// Instruction block demanding a strict JSON object.
const JSON_SCHEMA_INSTRUCTION: &str = r#"## Output Schema

Respond with ONLY a JSON object of this exact shape:

{
  "summary": "string, at least 20 characters",
  "rootCause": {
    "hypothesis": "string, at least 10 characters",
    "confidence": "high" | "medium" | "low",
    "evidence": ["non-empty array of strings"],
    "suspectedCommit": "optional commit sha"
  },
  "mechanism": "string explaining how the cause produced the symptom",
  "databaseFindings": "optional string",
  "crossRepoFindings": "optional string",
  "contributingFactors": ["strings"],
  "recommendedActions": [
    {
      "priority": 1,
      "action": "string",
      "reasoning": "string",
      "estimatedImpact": "string"
    }
  ],
  "estimatedComplexity": "low" | "medium" | "high",
  "requiresHumanReview": true | false,
  "requiresRollback": true | false (optional)
}
"#;

/// Truncate to `budget` characters, keeping head and tail with a visible
/// middle marker. No-op when the text fits.
pub fn truncate_middle(text: &str, budget: usize) -> String {
    const MARKER: &str = "\n... [truncated] ...\n";
    if text.chars().count() <= budget {
        return text.to_string();
    }
    let keep = budget.saturating_sub(MARKER.len()) / 2;
    let head: String = text.chars().take(keep).collect();
    let tail_start = text.chars().count().saturating_sub(keep);
    let tail: String = text.chars().skip(tail_start).collect();
    format!("{}{}{}", head, MARKER, tail)
}

fn write_commit(out: &mut String, index: usize, commit: &ScoredCommit) {
    let c = &commit.commit;
    let _ = writeln!(
        out,
        "### {}. {} ({}) score={:.2} temporal={:.2} risk={:.2}",
        index + 1,
        c.sha,
        c.repository,
        commit.score.combined,
        commit.score.temporal,
        commit.score.risk
    );
    let _ = writeln!(out, "- author: {}", c.author);
    let _ = writeln!(out, "- committed: {}", c.timestamp.to_rfc3339());
    let _ = writeln!(out, "- message: {}", truncate_middle(c.message.trim(), COMMIT_MESSAGE_BUDGET));
    let _ = writeln!(out, "- changes: +{} -{}", c.additions, c.deletions);
    if !c.files_changed.is_empty() {
        let shown: Vec<&str> =
            c.files_changed.iter().take(FILES_PER_COMMIT).map(String::as_str).collect();
        let suffix = if c.files_changed.len() > FILES_PER_COMMIT {
            format!(" (+{} more)", c.files_changed.len() - FILES_PER_COMMIT)
        } else {
            String::new()
        };
        let _ = writeln!(out, "- files: {}{}", shown.join(", "), suffix);
    }
    for factor in &commit.scoring_factors {
        let _ = writeln!(out, "- factor {}={:.2}: {}", factor.factor, factor.value, factor.detail);
    }
    if let Some(pipeline) = &commit.pipeline {
        let _ = writeln!(out, "- pipeline: {}", pipeline.status);
    }
    if let Some(mr) = &commit.merge_request {
        let _ = writeln!(out, "- merge request: !{} {}", mr.iid, mr.title);
    }
}

/// Build the deterministic analysis prompt for an incident and its evidence.
pub fn build_analysis_prompt(incident: &Incident, bundle: &EvidenceBundle) -> String {
    let mut out = String::with_capacity(4096);

    let _ = writeln!(out, "# Incident {}", incident.external_id);
    let _ = writeln!(out, "- service: {}", incident.service_name);
    let _ = writeln!(out, "- monitor: {}", incident.monitor_id);
    let _ = writeln!(out, "- severity: {}", incident.severity.as_str());
    let _ = writeln!(out, "- investigation tier: {}", bundle.investigation_tier.as_str());
    let _ = writeln!(out, "- metric: {}", incident.metric_name);
    let _ = writeln!(
        out,
        "- current={:.4} baseline={:.4} threshold={:.4} deviation={:.2}%",
        incident.metric_value,
        incident.baseline_value,
        incident.threshold_value,
        incident.deviation_percentage
    );
    let _ = writeln!(out, "- detected at: {}", incident.detected_at.to_rfc3339());

    let dd = &bundle.datadog_context;
    let _ = writeln!(out, "\n## Metrics Context");
    match &dd.error_details {
        Some(details) => {
            let _ = writeln!(out, "- error: {}", details.message);
            if let (Some(file), Some(line)) = (&details.file_path, details.line_number) {
                let _ = writeln!(out, "- location: {}:{}", file, line);
            }
            if let Some(stack) = &details.stack_trace {
                let _ = writeln!(out, "- stack trace:\n```\n{}\n```", truncate_middle(stack, STACK_TRACE_BUDGET));
            }
        },
        None => {
            let _ = writeln!(out, "- no error details collected");
        },
    }
    if let Some(event) = &dd.deployment_event {
        let _ = writeln!(
            out,
            "- deployment: {} at {} (sha: {})",
            event.title,
            event.timestamp,
            event.commit_sha.as_deref().unwrap_or("unknown")
        );
    }
    if !dd.metric_history.is_empty() {
        let values: Vec<f64> = dd.metric_history.iter().map(|s| s.value).collect();
        let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let _ = writeln!(
            out,
            "- metric history: {} samples, min={:.4} max={:.4} mean={:.4}",
            values.len(),
            min,
            max,
            mean
        );
    }

    if let Some(git) = &bundle.gitlab_context {
        let _ = writeln!(out, "\n## Recent Commits (scoring: {:?})", git.scoring_method);
        for (i, commit) in git.commits.iter().take(EXPANDED_COMMITS).enumerate() {
            write_commit(&mut out, i, commit);
        }
        for commit in git.commits.iter().skip(EXPANDED_COMMITS) {
            let _ = writeln!(
                out,
                "- {} ({}) score={:.2}",
                commit.commit.sha, commit.commit.repository, commit.score.combined
            );
        }
    }

    if let Some(db) = &bundle.database_context {
        let _ = writeln!(out, "\n## Database Findings (relevance: {:?})", db.relevance);
        for finding in
            db.schema_findings.iter().chain(&db.data_findings).chain(&db.performance_findings)
        {
            let _ = writeln!(out, "- [{:?}] {}", finding.severity, finding.description);
        }
    }

    if let Some(cross) = &bundle.cross_repo_context {
        let _ = writeln!(out, "\n## Cross-Repository Impact");
        let _ = writeln!(out, "- search pattern: {}", cross.search_pattern);
        let _ = writeln!(out, "- affected repositories: {}", cross.affected_repositories.join(", "));
        let _ = writeln!(out, "- total matches: {}", cross.total_match_count);
        if !cross.critical_paths.is_empty() {
            let _ = writeln!(out, "- critical paths: {}", cross.critical_paths.join(", "));
        }
        for m in cross.matches.iter().take(SEARCH_MATCHES_SHOWN) {
            let _ = writeln!(out, "- {}:{}:{} {}", m.repository, m.file_path, m.line_number, m.preview);
        }
    }

    if !bundle.warnings.is_empty() {
        let _ = writeln!(out, "\n## Collection Warnings");
        for warning in &bundle.warnings {
            let _ = writeln!(out, "- {}", warning);
        }
    }

    let _ = writeln!(out, "\n{}", JSON_SCHEMA_INSTRUCTION);
    out
}
