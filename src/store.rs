//! Access to the usage database.

use crate::cli::CommandLineArgs;
use crate::error::ForecastError;
use crate::models::{UsageDataPoint, UsageType};
use crate::planner::UsageQuery;

use async_trait::async_trait;
use hashbrown::HashMap;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{event, Level};

/// Source of the named queries, embedded at compile time.
const QUERIES: &str = include_str!("../resources/queries.sql");

/// Marker introducing a named query.
const NAME_MARKER: &str = "-- name:";

/// Name of the query listing all consumer groups.
const ALL_USAGE_TYPES: &str = "get-consumer-groups";

/// Name of the query resolving consumer groups by external identifier.
const USAGE_TYPES_BY_EXTERNAL_ID: &str = "get-consumer-groups-by-external-id";

/// Read-only access to consumer groups and usage data.
///
/// This forms the contract between the forecast pipeline and the relational store.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// List all consumer groups.
    async fn usage_types(&self) -> Result<Vec<UsageType>, ForecastError>;

    /// Look up consumer groups by their external identifiers.
    ///
    /// Unknown identifiers are left out of the result.
    async fn usage_types_by_external_id(
        &self,
        external_ids: &[String],
    ) -> Result<Vec<UsageType>, ForecastError>;

    /// Run a usage query.
    async fn usages(&self, query: &UsageQuery) -> Result<Vec<UsageDataPoint>, ForecastError>;
}

/// SQL queries indexed by logical name.
#[derive(Clone, Debug)]
pub struct QueryCatalog {
    queries: HashMap<String, String>,
}

impl QueryCatalog {
    /// Parse a file of named queries.
    ///
    /// Every query follows a `-- name: <logical-name>` line and runs until the next such line.
    /// Other comments and blank lines are dropped.
    pub fn parse(source: &str) -> Self {
        let mut queries = HashMap::new();
        let mut current: Option<(String, Vec<&str>)> = None;
        for line in source.lines() {
            let trimmed = line.trim();
            if let Some(name) = trimmed.strip_prefix(NAME_MARKER) {
                if let Some((name, lines)) = current.take() {
                    queries.insert(name, lines.join("\n"));
                }
                current = Some((name.trim().to_string(), vec![]));
            } else if trimmed.is_empty() || trimmed.starts_with("--") {
                continue;
            } else if let Some((_, lines)) = current.as_mut() {
                lines.push(line.trim_end());
            }
        }
        if let Some((name, lines)) = current.take() {
            queries.insert(name, lines.join("\n"));
        }
        Self { queries }
    }

    /// Returns the catalog of queries shipped with the server.
    pub fn builtin() -> Self {
        Self::parse(QUERIES)
    }

    /// Returns the SQL of a named query.
    pub fn get(&self, name: &str) -> Result<&str, ForecastError> {
        self.queries
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| ForecastError::UnknownQuery {
                name: name.to_string(),
            })
    }
}

/// [UsageStore] backed by a PostgreSQL connection pool.
pub struct PgUsageStore {
    /// Connection pool shared by all requests
    pool: PgPool,
    /// Named queries
    queries: QueryCatalog,
}

impl PgUsageStore {
    /// Connect to the database given on the command line.
    pub async fn connect(args: &CommandLineArgs) -> Result<Self, ForecastError> {
        let pool = PgPoolOptions::new()
            .max_connections(args.database_max_connections)
            .connect(args.database_url.as_str())
            .await?;
        event!(
            Level::INFO,
            "Connected to database {}",
            args.database_url.host_str().unwrap_or_default()
        );
        Ok(Self::new(pool, QueryCatalog::builtin()))
    }

    /// Returns a new PgUsageStore.
    pub fn new(pool: PgPool, queries: QueryCatalog) -> Self {
        Self { pool, queries }
    }
}

#[async_trait]
impl UsageStore for PgUsageStore {
    async fn usage_types(&self) -> Result<Vec<UsageType>, ForecastError> {
        let sql = self.queries.get(ALL_USAGE_TYPES)?;
        let usage_types = sqlx::query_as::<_, UsageType>(sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(usage_types)
    }

    async fn usage_types_by_external_id(
        &self,
        external_ids: &[String],
    ) -> Result<Vec<UsageType>, ForecastError> {
        let sql = self.queries.get(USAGE_TYPES_BY_EXTERNAL_ID)?;
        let usage_types = sqlx::query_as::<_, UsageType>(sql)
            .bind(external_ids.to_vec())
            .fetch_all(&self.pool)
            .await?;
        Ok(usage_types)
    }

    async fn usages(&self, query: &UsageQuery) -> Result<Vec<UsageDataPoint>, ForecastError> {
        let sql = self.queries.get(query.shape().query_name())?;
        // Parameters are bound in the order the named queries number them.
        let mut statement =
            sqlx::query_as::<_, UsageDataPoint>(sql).bind(query.municipality_pattern.clone());
        if let Some(bucket_width) = &query.bucket_width {
            statement = statement.bind(bucket_width.to_string());
        }
        if let Some(usage_types) = &query.usage_types {
            statement = statement.bind(usage_types.clone());
        }
        Ok(statement.fetch_all(&self.pool).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::QueryShape;

    #[test]
    fn parse_named_queries() {
        let catalog = QueryCatalog::parse(
            "-- header comment\n\n-- name: first\nSELECT 1;\n\n-- name: second\nSELECT a\n  -- inline note\nFROM b;\n",
        );
        assert_eq!("SELECT 1;", catalog.get("first").unwrap());
        assert_eq!("SELECT a\nFROM b;", catalog.get("second").unwrap());
    }

    #[test]
    fn unknown_query() {
        let catalog = QueryCatalog::parse("-- name: first\nSELECT 1;\n");
        let error = catalog.get("second").unwrap_err();
        assert!(
            matches!(error, ForecastError::UnknownQuery { ref name } if name == "second"),
            "{error:?}"
        );
    }

    #[test]
    fn builtin_contains_every_shape() {
        let catalog = QueryCatalog::builtin();
        for shape in [
            QueryShape::Plain,
            QueryShape::ConsumerGroups,
            QueryShape::Bucketed,
            QueryShape::BucketedConsumerGroups,
        ] {
            let sql = catalog.get(shape.query_name()).unwrap();
            assert!(sql.contains("municipality ~ $1"), "{sql}");
        }
        assert!(catalog.get(ALL_USAGE_TYPES).is_ok());
        assert!(catalog
            .get(USAGE_TYPES_BY_EXTERNAL_ID)
            .unwrap()
            .contains("ANY($1)"));
    }

    #[test]
    fn builtin_parameter_numbering() {
        let catalog = QueryCatalog::builtin();
        let sql = catalog
            .get(QueryShape::ConsumerGroups.query_name())
            .unwrap();
        assert!(sql.contains("ANY($2)"));
        let sql = catalog.get(QueryShape::Bucketed.query_name()).unwrap();
        assert!(sql.contains("$2::interval"));
        let sql = catalog
            .get(QueryShape::BucketedConsumerGroups.query_name())
            .unwrap();
        assert!(sql.contains("$2::interval"));
        assert!(sql.contains("ANY($3)"));
    }
}
