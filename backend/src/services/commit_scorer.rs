//! Commit scorer
//!
//! Ranks recent commits by temporal proximity to the incident, stack-trace
//! file overlap, change size, risky-path heuristics, and message heuristics.
//! Every contribution is recorded as a scoring factor so individual factors
//! can be asserted on.

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::models::{Commit, CommitScore, ScoredCommit, ScoringFactor};

// Factor weights. `combined = TEMPORAL_WEIGHT * temporal + RISK_WEIGHT * risk`.
pub const TEMPORAL_WEIGHT: f64 = 0.4;
pub const RISK_WEIGHT: f64 = 0.6;

/// Boost applied when a commit matches the deployment SHA, capped at 1.0.
pub const DEPLOYMENT_BONUS: f64 = 0.3;

/// Risk contribution when a changed file overlaps the stack-trace path.
const STACK_OVERLAP_WEIGHT: f64 = 0.35;
/// Risk weight applied to the change-size score.
const CHANGE_SIZE_WEIGHT: f64 = 0.2;
/// Risk weight applied to the best risky-path match.
const RISKY_PATH_WEIGHT: f64 = 0.25;
/// Risk weight applied to the message score.
const MESSAGE_WEIGHT: f64 = 0.2;

/// Path fragments that historically correlate with production breakage.
const RISKY_PATHS: &[(&str, f64)] = &[
    ("migration", 0.9),
    ("schema", 0.8),
    ("database", 0.8),
    ("db", 0.8),
    ("auth", 0.8),
    ("security", 0.8),
    ("config", 0.7),
    ("env", 0.7),
    ("api", 0.6),
    ("route", 0.6),
    ("endpoint", 0.6),
];

/// Inputs that contextualize scoring for one incident.
#[derive(Debug, Clone, Default)]
pub struct ScoringContext {
    pub incident_time: Option<DateTime<Utc>>,
    pub stack_file_path: Option<String>,
    pub deployment_commit_sha: Option<String>,
    /// Temporal decay window; defaults to 24h.
    pub window: Option<ChronoDuration>,
}

pub struct CommitScorer;

impl CommitScorer {
    /// Score and sort commits, highest combined score first. Ties break
    /// toward the more recent commit.
    pub fn score_commits(commits: Vec<Commit>, ctx: &ScoringContext) -> Vec<ScoredCommit> {
        let mut scored: Vec<ScoredCommit> =
            commits.into_iter().map(|c| Self::score_commit(c, ctx)).collect();

        scored.sort_by(|a, b| {
            b.score
                .combined
                .partial_cmp(&a.score.combined)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.commit.timestamp.cmp(&a.commit.timestamp))
        });
        scored
    }

    fn score_commit(commit: Commit, ctx: &ScoringContext) -> ScoredCommit {
        let mut factors = Vec::new();

        let temporal = Self::temporal_score(&commit, ctx, &mut factors);
        let risk = Self::risk_score(&commit, ctx, &mut factors);
        let combined = round2(TEMPORAL_WEIGHT * temporal + RISK_WEIGHT * risk);

        ScoredCommit {
            commit,
            score: CommitScore { temporal, risk, combined },
            scoring_factors: factors,
            pipeline: None,
            merge_request: None,
        }
    }

    fn temporal_score(commit: &Commit, ctx: &ScoringContext, factors: &mut Vec<ScoringFactor>) -> f64 {
        let Some(incident_time) = ctx.incident_time else {
            return 0.0;
        };

        if commit.timestamp > incident_time {
            factors.push(ScoringFactor {
                factor: "after_incident".to_string(),
                value: 0.0,
                detail: "commit landed after the incident was detected".to_string(),
            });
            return 0.0;
        }

        let window = ctx.window.unwrap_or_else(|| ChronoDuration::hours(24));
        let age = incident_time - commit.timestamp;
        let mut proximity =
            (1.0 - age.num_seconds() as f64 / window.num_seconds() as f64).max(0.0);

        factors.push(ScoringFactor {
            factor: "temporal_proximity".to_string(),
            value: proximity,
            detail: format!("committed {} minutes before detection", age.num_minutes()),
        });

        if ctx.deployment_commit_sha.as_deref() == Some(commit.sha.as_str()) {
            proximity = (proximity + DEPLOYMENT_BONUS).min(1.0);
            factors.push(ScoringFactor {
                factor: "deployment_match".to_string(),
                value: DEPLOYMENT_BONUS,
                detail: "commit sha matches the most recent deployment".to_string(),
            });
        }

        proximity
    }

    fn risk_score(commit: &Commit, ctx: &ScoringContext, factors: &mut Vec<ScoringFactor>) -> f64 {
        let mut risk = 0.0;

        if let Some(stack_path) = ctx.stack_file_path.as_deref() {
            if let Some(matched) = Self::stack_overlap(commit, stack_path) {
                risk += STACK_OVERLAP_WEIGHT;
                factors.push(ScoringFactor {
                    factor: "stack_trace_overlap".to_string(),
                    value: STACK_OVERLAP_WEIGHT,
                    detail: format!("{} appears in the stack trace", matched),
                });
            }
        }

        let total_changes = commit.additions + commit.deletions;
        let size_score = change_size_score(total_changes);
        risk += CHANGE_SIZE_WEIGHT * size_score;
        factors.push(ScoringFactor {
            factor: "change_size".to_string(),
            value: size_score,
            detail: format!("{} lines changed", total_changes),
        });

        if let Some((pattern, weight)) = Self::riskiest_path(commit) {
            risk += RISKY_PATH_WEIGHT * weight;
            factors.push(ScoringFactor {
                factor: "risky_path".to_string(),
                value: weight,
                detail: format!("touches '{}' path", pattern),
            });
        }

        let message_score = message_score(&commit.message);
        risk += MESSAGE_WEIGHT * message_score;
        factors.push(ScoringFactor {
            factor: "message_heuristics".to_string(),
            value: message_score,
            detail: "keyword analysis of the commit message".to_string(),
        });

        risk.clamp(0.0, 1.0)
    }

    /// Match a changed file against the stack-trace path: exact, suffix in
    /// either direction, or basename equality. Case-insensitive, backslashes
    /// normalized.
    fn stack_overlap(commit: &Commit, stack_path: &str) -> Option<String> {
        let stack = normalize_path(stack_path);
        let stack_base = basename(&stack);

        commit.files_changed.iter().find_map(|file| {
            let changed = normalize_path(file);
            let matches = changed == stack
                || stack.ends_with(&changed)
                || changed.ends_with(&stack)
                || basename(&changed) == stack_base;
            matches.then(|| file.clone())
        })
    }

    /// Highest risky-path weight over all changed files.
    fn riskiest_path(commit: &Commit) -> Option<(&'static str, f64)> {
        commit
            .files_changed
            .iter()
            .flat_map(|file| {
                let lowered = file.to_lowercase();
                RISKY_PATHS
                    .iter()
                    .filter(move |(pattern, _)| lowered.contains(pattern))
                    .copied()
                    .collect::<Vec<_>>()
            })
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    }
}

fn normalize_path(path: &str) -> String {
    path.to_lowercase().replace('\\', "/")
}

fn basename(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

/// Mid-sized changes carry the most risk; tiny and huge ones less so.
fn change_size_score(total: u64) -> f64 {
    match total {
        0..=9 => 0.2,
        10..=49 => 0.5,
        50..=199 => 0.8,
        200..=499 => 0.6,
        _ => 0.3,
    }
}

/// Keyword-driven message score, clamped to [0, 1].
fn message_score(message: &str) -> f64 {
    let lowered = message.to_lowercase();
    let mut score: f64 = 0.3;

    let contains_any = |words: &[&str]| words.iter().any(|w| lowered.contains(w));

    if contains_any(&["fix", "hotfix", "patch"]) {
        score += 0.2;
    }
    if contains_any(&["urgent", "critical", "emergency"]) {
        score += 0.3;
    }
    if contains_any(&["quick", "temp", "hack"]) {
        score += 0.25;
    }
    if lowered.contains("revert") {
        score += 0.15;
    }
    if contains_any(&["test", "spec"]) {
        score -= 0.3;
    }
    if contains_any(&["doc", "readme", "comment"]) {
        score -= 0.4;
    }
    if contains_any(&["lint", "format", "style"]) {
        score -= 0.35;
    }
    if contains_any(&["typo", "spelling"]) {
        score -= 0.3;
    }

    score.clamp(0.0, 1.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn incident_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap()
    }

    fn commit(sha: &str, minutes_before: i64) -> Commit {
        Commit {
            sha: sha.to_string(),
            message: "update order handling".to_string(),
            author: "dev".to_string(),
            timestamp: incident_time() - ChronoDuration::minutes(minutes_before),
            repository: "shop/checkout".to_string(),
            files_changed: vec!["src/orders.ts".to_string()],
            additions: 30,
            deletions: 5,
        }
    }

    fn ctx() -> ScoringContext {
        ScoringContext { incident_time: Some(incident_time()), ..Default::default() }
    }

    #[test]
    fn test_scores_bounded_and_sorted() {
        let commits = vec![commit("a", 30), commit("b", 600), commit("c", 1200)];
        let scored = CommitScorer::score_commits(commits, &ctx());

        for s in &scored {
            assert!((0.0..=1.0).contains(&s.score.temporal));
            assert!((0.0..=1.0).contains(&s.score.risk));
            assert!((0.0..=1.0).contains(&s.score.combined));
        }
        for pair in scored.windows(2) {
            assert!(pair[0].score.combined >= pair[1].score.combined);
        }
        assert_eq!(scored[0].commit.sha, "a");
    }

    #[test]
    fn test_after_incident_scores_zero_temporal() {
        let mut late = commit("late", 0);
        late.timestamp = incident_time() + ChronoDuration::minutes(10);
        let scored = CommitScorer::score_commits(vec![late], &ctx());

        assert_eq!(scored[0].score.temporal, 0.0);
        assert!(scored[0].scoring_factors.iter().any(|f| f.factor == "after_incident"));
    }

    #[test]
    fn test_deployment_match_beats_identical_twin() {
        // Two identical commits 30 minutes before the incident; one matches
        // the deployment SHA and must score strictly higher.
        let commits = vec![commit("deployed", 30), commit("other", 30)];
        let mut context = ctx();
        context.deployment_commit_sha = Some("deployed".to_string());

        let scored = CommitScorer::score_commits(commits, &context);
        assert_eq!(scored[0].commit.sha, "deployed");
        assert!(scored[0].score.combined > scored[1].score.combined);
        assert!(scored[0].scoring_factors.iter().any(|f| f.factor == "deployment_match"));
    }

    #[test]
    fn test_stack_trace_overlap_variants() {
        let mut context = ctx();
        context.stack_file_path = Some("/app/src/orders.ts".to_string());

        let scored = CommitScorer::score_commits(vec![commit("a", 30)], &context);
        assert!(scored[0].scoring_factors.iter().any(|f| f.factor == "stack_trace_overlap"));

        // Basename match with Windows separators.
        let mut win = commit("b", 30);
        win.files_changed = vec!["lib\\handlers\\Orders.TS".to_string()];
        let scored = CommitScorer::score_commits(vec![win], &context);
        assert!(scored[0].scoring_factors.iter().any(|f| f.factor == "stack_trace_overlap"));
    }

    #[test]
    fn test_change_size_buckets() {
        assert_eq!(change_size_score(5), 0.2);
        assert_eq!(change_size_score(30), 0.5);
        assert_eq!(change_size_score(100), 0.8);
        assert_eq!(change_size_score(300), 0.6);
        assert_eq!(change_size_score(2000), 0.3);
    }

    #[test]
    fn test_risky_path_takes_max_weight() {
        let mut c = commit("a", 30);
        c.files_changed =
            vec!["src/config/app.ts".to_string(), "db/migrations/0042_drop_index.sql".to_string()];
        let (pattern, weight) = CommitScorer::riskiest_path(&c).unwrap();
        assert_eq!(pattern, "migration");
        assert_eq!(weight, 0.9);
    }

    #[test]
    fn test_message_score_keywords() {
        assert!((message_score("hotfix: urgent repair") - 0.8).abs() < 1e-9);
        assert_eq!(message_score("update readme docs and fix typos"), 0.0);
        assert!((message_score("revert previous deploy") - 0.45).abs() < 1e-9);
        assert!((message_score("plain change") - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_ties_break_toward_newer_commit() {
        let older = commit("older", 120);
        let mut newer = commit("newer", 60);
        // Force equal combined scores by making both commits identical except
        // timestamps far enough apart to round to the same combined value.
        newer.timestamp = older.timestamp;
        newer.sha = "newer".to_string();
        let scored = CommitScorer::score_commits(vec![older, newer], &ctx());
        assert_eq!(scored[0].score.combined, scored[1].score.combined);
    }
}
