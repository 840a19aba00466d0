//! Incident persistence
//!
//! SQLite-backed store for incidents and LLM usage records. Timestamps are
//! stored as fixed-width RFC3339 text (microsecond precision, Z suffix) so
//! lexicographic comparison matches chronological order.

use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::models::{Incident, IncidentStatus, InvestigationTier, Severity};
use crate::utils::{ApiError, ApiResult};

/// One LLM interaction worth of accounting.
#[derive(Debug, Clone)]
pub struct LlmUsageRecord {
    pub incident_id: Uuid,
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    pub cost_usd: f64,
    pub duration_ms: i64,
}

/// Listing filter for the admin surface.
#[derive(Debug, Clone, Default)]
pub struct IncidentFilter {
    pub status: Option<IncidentStatus>,
    pub monitor_id: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

pub struct IncidentService {
    pool: SqlitePool,
}

fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> ApiResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ApiError::internal_error(format!("bad stored timestamp '{}': {}", raw, e)))
}

#[derive(Debug, FromRow)]
struct IncidentRow {
    id: String,
    external_id: String,
    monitor_id: String,
    service_name: String,
    severity: String,
    status: String,
    investigation_tier: String,
    metric_name: String,
    metric_value: f64,
    baseline_value: f64,
    threshold_value: f64,
    deviation_percentage: f64,
    error_message: Option<String>,
    stack_trace: Option<String>,
    detected_at: String,
    resolved_at: Option<String>,
    created_at: String,
    updated_at: String,
    tags: String,
}

impl TryFrom<IncidentRow> for Incident {
    type Error = ApiError;

    fn try_from(row: IncidentRow) -> ApiResult<Incident> {
        let severity: Severity = serde_json::from_value(serde_json::Value::String(row.severity))?;
        let status: IncidentStatus = serde_json::from_value(serde_json::Value::String(row.status))?;
        let tier: InvestigationTier =
            serde_json::from_value(serde_json::Value::String(row.investigation_tier))?;
        let tags: Vec<String> = serde_json::from_str(&row.tags).unwrap_or_default();

        Ok(Incident {
            id: Uuid::parse_str(&row.id)
                .map_err(|e| ApiError::internal_error(format!("bad incident id: {}", e)))?,
            external_id: row.external_id,
            monitor_id: row.monitor_id,
            service_name: row.service_name,
            severity,
            status,
            investigation_tier: tier,
            metric_name: row.metric_name,
            metric_value: row.metric_value,
            baseline_value: row.baseline_value,
            threshold_value: row.threshold_value,
            deviation_percentage: row.deviation_percentage,
            error_message: row.error_message,
            stack_trace: row.stack_trace,
            detected_at: parse_ts(&row.detected_at)?,
            resolved_at: row.resolved_at.as_deref().map(parse_ts).transpose()?,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
            tags,
        })
    }
}

impl IncidentService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Idempotent schema initialization, run once at startup.
    pub async fn init_schema(pool: &SqlitePool) -> ApiResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS incidents (
                id TEXT PRIMARY KEY,
                external_id TEXT NOT NULL,
                monitor_id TEXT NOT NULL,
                service_name TEXT NOT NULL,
                severity TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                investigation_tier TEXT NOT NULL,
                metric_name TEXT NOT NULL,
                metric_value REAL NOT NULL,
                baseline_value REAL NOT NULL,
                threshold_value REAL NOT NULL,
                deviation_percentage REAL NOT NULL,
                error_message TEXT,
                stack_trace TEXT,
                detected_at TEXT NOT NULL,
                resolved_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '[]'
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_incidents_monitor_detected \
             ON incidents (monitor_id, detected_at)",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS llm_usage (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                incident_id TEXT NOT NULL,
                model TEXT NOT NULL,
                input_tokens INTEGER NOT NULL,
                output_tokens INTEGER NOT NULL,
                total_tokens INTEGER NOT NULL,
                cost_usd REAL NOT NULL,
                duration_ms INTEGER NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn create_incident(&self, incident: &Incident) -> ApiResult<()> {
        sqlx::query(
            r#"
            INSERT INTO incidents (
                id, external_id, monitor_id, service_name, severity, status,
                investigation_tier, metric_name, metric_value, baseline_value,
                threshold_value, deviation_percentage, error_message, stack_trace,
                detected_at, resolved_at, created_at, updated_at, tags
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(incident.id.to_string())
        .bind(&incident.external_id)
        .bind(&incident.monitor_id)
        .bind(&incident.service_name)
        .bind(incident.severity.as_str())
        .bind(incident.status.as_str())
        .bind(incident.investigation_tier.as_str())
        .bind(&incident.metric_name)
        .bind(incident.metric_value)
        .bind(incident.baseline_value)
        .bind(incident.threshold_value)
        .bind(incident.deviation_percentage)
        .bind(&incident.error_message)
        .bind(&incident.stack_trace)
        .bind(fmt_ts(incident.detected_at))
        .bind(incident.resolved_at.map(fmt_ts))
        .bind(fmt_ts(incident.created_at))
        .bind(fmt_ts(incident.updated_at))
        .bind(serde_json::to_string(&incident.tags)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Incidents for a monitor detected within the last `within_minutes`.
    /// This backs the 5-minute deduplication window.
    pub async fn get_recent_incidents(
        &self,
        monitor_id: &str,
        within_minutes: i64,
    ) -> ApiResult<Vec<Incident>> {
        let cutoff = fmt_ts(Utc::now() - ChronoDuration::minutes(within_minutes));

        let rows: Vec<IncidentRow> = sqlx::query_as(
            "SELECT * FROM incidents WHERE monitor_id = ? AND detected_at >= ? \
             ORDER BY detected_at DESC",
        )
        .bind(monitor_id)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Incident::try_from).collect()
    }

    pub async fn get_active_incident_count(&self) -> ApiResult<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM incidents WHERE status = 'active'")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    pub async fn get_incident(&self, id: Uuid) -> ApiResult<Incident> {
        let row: Option<IncidentRow> = sqlx::query_as("SELECT * FROM incidents WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Incident::try_from)
            .transpose()?
            .ok_or_else(|| ApiError::not_found(format!("incident {}", id)))
    }

    pub async fn list_incidents(&self, filter: &IncidentFilter) -> ApiResult<Vec<Incident>> {
        let mut sql = String::from("SELECT * FROM incidents WHERE 1=1");
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if filter.monitor_id.is_some() {
            sql.push_str(" AND monitor_id = ?");
        }
        sql.push_str(" ORDER BY detected_at DESC LIMIT ? OFFSET ?");

        let mut query = sqlx::query_as::<_, IncidentRow>(&sql);
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(monitor_id) = &filter.monitor_id {
            query = query.bind(monitor_id.clone());
        }
        let limit = if filter.limit > 0 { filter.limit } else { 50 };
        let rows = query.bind(limit).bind(filter.offset).fetch_all(&self.pool).await?;

        rows.into_iter().map(Incident::try_from).collect()
    }

    /// Update incident status. `detected_at` is immutable; `resolved_at` is
    /// set iff the new status is resolved.
    pub async fn update_status(&self, id: Uuid, status: IncidentStatus) -> ApiResult<Incident> {
        let now = Utc::now();
        let resolved_at = (status == IncidentStatus::Resolved).then(|| fmt_ts(now));

        let result = sqlx::query(
            "UPDATE incidents SET status = ?, resolved_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(resolved_at)
        .bind(fmt_ts(now))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ApiError::not_found(format!("incident {}", id)));
        }
        self.get_incident(id).await
    }

    /// Record the tier the investigation actually ran at (refinement may
    /// upgrade the initially selected tier).
    pub async fn update_tier(&self, id: Uuid, tier: InvestigationTier) -> ApiResult<()> {
        sqlx::query("UPDATE incidents SET investigation_tier = ?, updated_at = ? WHERE id = ?")
            .bind(tier.as_str())
            .bind(fmt_ts(Utc::now()))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn store_llm_usage(&self, record: &LlmUsageRecord) -> ApiResult<()> {
        sqlx::query(
            r#"
            INSERT INTO llm_usage (
                incident_id, model, input_tokens, output_tokens, total_tokens,
                cost_usd, duration_ms, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.incident_id.to_string())
        .bind(&record.model)
        .bind(record.input_tokens)
        .bind(record.output_tokens)
        .bind(record.total_tokens)
        .bind(record.cost_usd)
        .bind(record.duration_ms)
        .bind(fmt_ts(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn service() -> IncidentService {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        IncidentService::init_schema(&pool).await.expect("schema init");
        IncidentService::new(pool)
    }

    fn incident(monitor_id: &str, detected_at: DateTime<Utc>) -> Incident {
        Incident {
            id: Uuid::new_v4(),
            external_id: format!("INC-{}", Uuid::new_v4().simple()),
            monitor_id: monitor_id.to_string(),
            service_name: "checkout".to_string(),
            severity: Severity::Critical,
            status: IncidentStatus::Active,
            investigation_tier: InvestigationTier::T2,
            metric_name: "latency".to_string(),
            metric_value: 150.0,
            baseline_value: 20.0,
            threshold_value: 100.0,
            deviation_percentage: 650.0,
            error_message: Some("boom".to_string()),
            stack_trace: None,
            detected_at,
            resolved_at: None,
            created_at: detected_at,
            updated_at: detected_at,
            tags: vec!["service:checkout".to_string()],
        }
    }

    #[tokio::test]
    async fn test_create_and_fetch_roundtrip() {
        let service = service().await;
        let original = incident("m1", Utc::now());
        service.create_incident(&original).await.unwrap();

        let fetched = service.get_incident(original.id).await.unwrap();
        assert_eq!(fetched.external_id, original.external_id);
        assert_eq!(fetched.severity, Severity::Critical);
        assert_eq!(fetched.investigation_tier, InvestigationTier::T2);
        assert_eq!(fetched.tags, original.tags);
        assert_eq!(fetched.detected_at.timestamp_micros(), original.detected_at.timestamp_micros());
    }

    #[tokio::test]
    async fn test_recent_incident_window() {
        let service = service().await;
        service.create_incident(&incident("m1", Utc::now() - ChronoDuration::minutes(2))).await.unwrap();
        service.create_incident(&incident("m1", Utc::now() - ChronoDuration::minutes(30))).await.unwrap();
        service.create_incident(&incident("m2", Utc::now())).await.unwrap();

        let recent = service.get_recent_incidents("m1", 5).await.unwrap();
        assert_eq!(recent.len(), 1);
    }

    #[tokio::test]
    async fn test_status_update_sets_resolved_at() {
        let service = service().await;
        let original = incident("m1", Utc::now());
        service.create_incident(&original).await.unwrap();

        let resolved = service.update_status(original.id, IncidentStatus::Resolved).await.unwrap();
        assert_eq!(resolved.status, IncidentStatus::Resolved);
        assert!(resolved.resolved_at.is_some());
        assert_eq!(resolved.detected_at.timestamp_micros(), original.detected_at.timestamp_micros());

        let reopened = service.update_status(original.id, IncidentStatus::Active).await.unwrap();
        assert_eq!(reopened.status, IncidentStatus::Active);
        assert!(reopened.resolved_at.is_none());
    }

    #[tokio::test]
    async fn test_active_count_and_filters() {
        let service = service().await;
        let a = incident("m1", Utc::now());
        let b = incident("m2", Utc::now());
        service.create_incident(&a).await.unwrap();
        service.create_incident(&b).await.unwrap();
        service.update_status(b.id, IncidentStatus::FalsePositive).await.unwrap();

        assert_eq!(service.get_active_incident_count().await.unwrap(), 1);

        let filtered = service
            .list_incidents(&IncidentFilter {
                status: Some(IncidentStatus::FalsePositive),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].monitor_id, "m2");
    }

    #[tokio::test]
    async fn test_store_llm_usage() {
        let service = service().await;
        let record = LlmUsageRecord {
            incident_id: Uuid::new_v4(),
            model: "fallback-template".to_string(),
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
            cost_usd: 0.0,
            duration_ms: 12,
        };
        service.store_llm_usage(&record).await.unwrap();
    }
}
