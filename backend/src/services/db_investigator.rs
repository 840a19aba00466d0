//! Read-only database investigation adapter.
//!
//! Runs three bounded probes against the investigated MySQL-compatible
//! database: nullable business columns (schema), empty relevant tables when
//! error context exists (data), and missing secondary indexes (performance).
//! Every identifier is whitelisted before interpolation; the session is
//! forced read-only and every query runs under the configured timeout.

use std::time::Duration;

use async_trait::async_trait;
use mysql_async::prelude::*;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{DbFinding, FindingSeverity};
use crate::utils::{ApiError, ApiResult};

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("identifier regex"));

/// Columns that are expected to be nullable and not worth flagging.
const HOUSEKEEPING_COLUMNS: &[&str] =
    &["id", "created_at", "updated_at", "deleted_at", "resolved_at"];

/// Raw probe results before aggregation assigns relevance.
#[derive(Debug, Clone, Default)]
pub struct DbInvestigationResult {
    pub schema_findings: Vec<DbFinding>,
    pub data_findings: Vec<DbFinding>,
    pub performance_findings: Vec<DbFinding>,
}

/// Database investigation contract.
#[async_trait]
pub trait DbInvestigator: Send + Sync {
    async fn investigate(
        &self,
        tables: &[String],
        schemas: &[String],
        error_context: Option<&str>,
    ) -> ApiResult<DbInvestigationResult>;
}

#[derive(Debug, Clone)]
pub struct DbInvestigatorConfig {
    pub url: String,
    pub query_timeout_secs: u64,
}

pub struct MySqlInvestigator {
    pool: mysql_async::Pool,
    query_timeout: Duration,
}

impl MySqlInvestigator {
    pub fn new(config: &DbInvestigatorConfig) -> ApiResult<Self> {
        let opts = mysql_async::Opts::from_url(&config.url)
            .map_err(|e| ApiError::configuration(format!("Invalid investigation DB URL: {}", e)))?;
        Ok(Self {
            pool: mysql_async::Pool::new(opts),
            query_timeout: Duration::from_secs(config.query_timeout_secs),
        })
    }

    /// Reject any identifier outside `[A-Za-z0-9_]`.
    fn sanitize<'a>(kind: &str, idents: &'a [String]) -> ApiResult<Vec<&'a str>> {
        idents
            .iter()
            .map(|ident| {
                if IDENTIFIER_RE.is_match(ident) {
                    Ok(ident.as_str())
                } else {
                    Err(ApiError::validation_error(format!("Illegal {} identifier '{}'", kind, ident)))
                }
            })
            .collect()
    }

    async fn read_only_conn(&self) -> ApiResult<mysql_async::Conn> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| ApiError::external_api_unavailable("db-investigation", e.to_string()))?;
        conn.query_drop("SET SESSION TRANSACTION READ ONLY")
            .await
            .map_err(|e| ApiError::external_api("db-investigation", e.to_string()))?;
        Ok(conn)
    }

    async fn run_query<T>(&self, conn: &mut mysql_async::Conn, sql: &str) -> ApiResult<Vec<T>>
    where
        T: FromRow + Send + 'static,
    {
        let rows = tokio::time::timeout(self.query_timeout, conn.query::<T, _>(sql))
            .await
            .map_err(|_| ApiError::external_api_timeout("db-investigation"))?
            .map_err(|e| ApiError::external_api("db-investigation", e.to_string()))?;
        Ok(rows)
    }

    fn in_list(idents: &[&str]) -> String {
        idents.iter().map(|i| format!("'{}'", i)).collect::<Vec<_>>().join(", ")
    }

    async fn schema_probe(
        &self,
        conn: &mut mysql_async::Conn,
        tables: &[&str],
        schemas: &[&str],
    ) -> ApiResult<Vec<DbFinding>> {
        let schema_filter = if schemas.is_empty() {
            "TABLE_SCHEMA = DATABASE()".to_string()
        } else {
            format!("TABLE_SCHEMA IN ({})", Self::in_list(schemas))
        };
        let sql = format!(
            "SELECT TABLE_NAME, COLUMN_NAME FROM information_schema.COLUMNS \
             WHERE {} AND TABLE_NAME IN ({}) AND IS_NULLABLE = 'YES'",
            schema_filter,
            Self::in_list(tables)
        );

        let rows: Vec<(String, String)> = self.run_query(conn, &sql).await?;
        Ok(rows
            .into_iter()
            .filter(|(_, column)| !HOUSEKEEPING_COLUMNS.contains(&column.to_lowercase().as_str()))
            .map(|(table, column)| DbFinding {
                description: format!("Nullable business column {}.{}", table, column),
                severity: FindingSeverity::Medium,
                table: Some(table),
            })
            .collect())
    }

    async fn data_probe(
        &self,
        conn: &mut mysql_async::Conn,
        tables: &[&str],
        schemas: &[&str],
    ) -> ApiResult<Vec<DbFinding>> {
        let mut findings = Vec::new();
        for table in tables {
            let qualified = match schemas.first() {
                Some(schema) => format!("`{}`.`{}`", schema, table),
                None => format!("`{}`", table),
            };
            let sql = format!("SELECT COUNT(*) FROM {}", qualified);
            match self.run_query::<(u64,)>(conn, &sql).await {
                Ok(counts) if counts.first().map(|c| c.0) == Some(0) => {
                    findings.push(DbFinding {
                        description: format!("Table {} is empty", table),
                        severity: FindingSeverity::Medium,
                        table: Some(table.to_string()),
                    });
                },
                Ok(_) => {},
                Err(e) => {
                    tracing::warn!("data probe failed for {}: {}", table, e);
                },
            }
        }
        Ok(findings)
    }

    async fn index_probe(
        &self,
        conn: &mut mysql_async::Conn,
        tables: &[&str],
        schemas: &[&str],
        error_context: Option<&str>,
    ) -> ApiResult<Vec<DbFinding>> {
        let schema_filter = if schemas.is_empty() {
            "TABLE_SCHEMA = DATABASE()".to_string()
        } else {
            format!("TABLE_SCHEMA IN ({})", Self::in_list(schemas))
        };
        let sql = format!(
            "SELECT TABLE_NAME, COUNT(DISTINCT INDEX_NAME) FROM information_schema.STATISTICS \
             WHERE {} AND TABLE_NAME IN ({}) AND INDEX_NAME <> 'PRIMARY' \
             GROUP BY TABLE_NAME",
            schema_filter,
            Self::in_list(tables)
        );

        let indexed: Vec<(String, u64)> = self.run_query(conn, &sql).await?;
        let error_lower = error_context.map(str::to_lowercase);

        Ok(tables
            .iter()
            .filter(|table| !indexed.iter().any(|(name, count)| name == *table && *count > 0))
            .map(|table| {
                // A table mentioned in the error context gets escalated.
                let severity = match &error_lower {
                    Some(err) if err.contains(&table.to_lowercase()) => FindingSeverity::High,
                    _ => FindingSeverity::Medium,
                };
                DbFinding {
                    description: format!("Table {} has no secondary index", table),
                    severity,
                    table: Some(table.to_string()),
                }
            })
            .collect())
    }
}

#[async_trait]
impl DbInvestigator for MySqlInvestigator {
    async fn investigate(
        &self,
        tables: &[String],
        schemas: &[String],
        error_context: Option<&str>,
    ) -> ApiResult<DbInvestigationResult> {
        if tables.is_empty() {
            return Ok(DbInvestigationResult::default());
        }

        let tables = Self::sanitize("table", tables)?;
        let schemas = Self::sanitize("schema", schemas)?;

        let mut conn = self.read_only_conn().await?;
        let mut result = DbInvestigationResult::default();

        result.schema_findings = self.schema_probe(&mut conn, &tables, &schemas).await?;
        if error_context.is_some() {
            result.data_findings = self.data_probe(&mut conn, &tables, &schemas).await?;
        }
        result.performance_findings =
            self.index_probe(&mut conn, &tables, &schemas, error_context).await?;

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_accepts_plain_identifiers() {
        let idents = vec!["orders".to_string(), "order_items_2".to_string()];
        assert!(MySqlInvestigator::sanitize("table", &idents).is_ok());
    }

    #[test]
    fn test_sanitize_rejects_injection() {
        for bad in ["orders; DROP TABLE x", "a.b", "a b", "`a`", "users--"] {
            let idents = vec![bad.to_string()];
            assert!(
                MySqlInvestigator::sanitize("table", &idents).is_err(),
                "expected '{}' to be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_in_list_formatting() {
        assert_eq!(MySqlInvestigator::in_list(&["a", "b"]), "'a', 'b'");
    }
}
