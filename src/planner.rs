//! Usage query planning.
//!
//! A forecast reads usage rows through exactly one of four named queries, chosen by whether the
//! algorithm wants bucketed data and whether the caller filtered by consumer group.

use crate::error::ForecastError;
use crate::models::{BucketWidth, ForecastRequest, UsageDataPoint};
use crate::store::UsageStore;

use strum_macros::{Display, IntoStaticStr};
use tracing::{event, Level};
use uuid::Uuid;

/// The four shapes of usage query. Each maps to a named query in the query catalog.
#[derive(Clone, Copy, Debug, Display, Eq, IntoStaticStr, PartialEq)]
pub enum QueryShape {
    /// Raw rows of the selected municipalities
    #[strum(serialize = "get-usages-by-municipality")]
    Plain,
    /// Raw rows of the selected municipalities and consumer groups
    #[strum(serialize = "get-usages-by-municipality-consumer-groups")]
    ConsumerGroups,
    /// Bucketed rows of the selected municipalities
    #[strum(serialize = "get-bucketed-usages-by-municipality")]
    Bucketed,
    /// Bucketed rows of the selected municipalities and consumer groups
    #[strum(serialize = "get-bucketed-usages-by-municipality-consumer-groups")]
    BucketedConsumerGroups,
}

impl QueryShape {
    /// Select the query shape.
    ///
    /// # Arguments
    ///
    /// * `bucketed`: Whether usage amounts are aggregated into time buckets
    /// * `filtered`: Whether rows are restricted to a set of consumer groups
    pub fn select(bucketed: bool, filtered: bool) -> Self {
        match (bucketed, filtered) {
            (false, false) => Self::Plain,
            (false, true) => Self::ConsumerGroups,
            (true, false) => Self::Bucketed,
            (true, true) => Self::BucketedConsumerGroups,
        }
    }

    /// Name of the query in the query catalog.
    pub fn query_name(self) -> &'static str {
        self.into()
    }
}

/// A fully parameterised usage query
#[derive(Clone, Debug, PartialEq)]
pub struct UsageQuery {
    /// Regular expression matching the selected municipality keys
    pub municipality_pattern: String,
    /// Bucket width, if amounts are aggregated
    pub bucket_width: Option<BucketWidth>,
    /// Usage type ids to restrict rows to, if filtering by consumer group
    pub usage_types: Option<Vec<Uuid>>,
}

impl UsageQuery {
    /// Shape of this query.
    pub fn shape(&self) -> QueryShape {
        QueryShape::select(self.bucket_width.is_some(), self.usage_types.is_some())
    }
}

/// Returns a regular expression matching municipality keys that start with one of the prefixes
/// and continue with digits only, i.e. the areas and all of their sub-areas.
///
/// Prefixes are escaped, so they only ever match literally.
pub fn municipality_pattern(prefixes: &[String]) -> String {
    prefixes
        .iter()
        .map(|prefix| format!(r"^{}\d*$", regex::escape(prefix)))
        .collect::<Vec<_>>()
        .join("|")
}

/// Plan the usage query for a forecast request.
///
/// Consumer groups are resolved to usage type ids only when the request names any. Requests
/// without consumer groups use an unfiltered query rather than a filter listing every group.
///
/// # Arguments
///
/// * `request`: Forecast request
/// * `bucket_width`: Bucket width of the algorithm, if it uses bucketing
/// * `store`: Store used to resolve consumer groups
pub async fn plan(
    request: &ForecastRequest,
    bucket_width: Option<BucketWidth>,
    store: &dyn UsageStore,
) -> Result<UsageQuery, ForecastError> {
    let usage_types = match &request.consumer_groups {
        Some(external_ids) => {
            let usage_types = store.usage_types_by_external_id(external_ids).await?;
            if usage_types.len() < external_ids.len() {
                event!(
                    Level::WARN,
                    "Only {} of {} requested consumer groups are known",
                    usage_types.len(),
                    external_ids.len()
                );
            }
            Some(usage_types.into_iter().map(|usage_type| usage_type.id).collect())
        }
        None => None,
    };
    Ok(UsageQuery {
        municipality_pattern: municipality_pattern(&request.keys),
        bucket_width,
        usage_types,
    })
}

/// Run a usage query, returning the rows in time order.
pub async fn run(
    query: &UsageQuery,
    store: &dyn UsageStore,
) -> Result<Vec<UsageDataPoint>, ForecastError> {
    event!(Level::DEBUG, shape = %query.shape(), "Pulling usage data");
    let mut usages = store.usages(query).await?;
    usages.sort_by_key(|usage| usage.timestamp);
    event!(Level::DEBUG, rows = usages.len(), "Pulled usage data");
    Ok(usages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{self, FakeStore};

    use regex::Regex;

    fn request(consumer_groups: Option<Vec<&str>>) -> ForecastRequest {
        ForecastRequest {
            algorithm: "linreg".to_string(),
            keys: vec!["03".to_string()],
            consumer_groups: consumer_groups
                .map(|groups| groups.into_iter().map(str::to_string).collect()),
        }
    }

    #[test]
    fn pattern_single_prefix() {
        let pattern = municipality_pattern(&["03".to_string()]);
        assert_eq!(r"^03\d*$", pattern);
        let re = Regex::new(&pattern).unwrap();
        assert!(re.is_match("03"));
        assert!(re.is_match("03241001"));
        assert!(!re.is_match("04241001"));
        assert!(!re.is_match("0324a"));
        assert!(!re.is_match("x03"));
    }

    #[test]
    fn pattern_alternation() {
        let prefixes = vec!["03".to_string(), "0524".to_string(), "1".to_string()];
        let pattern = municipality_pattern(&prefixes);
        assert_eq!(r"^03\d*$|^0524\d*$|^1\d*$", pattern);
        let re = Regex::new(&pattern).unwrap();
        for prefix in &prefixes {
            for suffix in ["", "0", "123", "99999"] {
                let key = format!("{prefix}{suffix}");
                assert!(re.is_match(&key), "{key}");
                let key = format!("{prefix}{suffix}-");
                assert!(!re.is_match(&key), "{key}");
            }
        }
        assert!(!re.is_match("0525"));
        assert!(!re.is_match("2"));
    }

    #[test]
    fn pattern_escapes_prefix() {
        let pattern = municipality_pattern(&[".*".to_string()]);
        let re = Regex::new(&pattern).unwrap();
        assert!(re.is_match(".*12"));
        assert!(!re.is_match("0312"));
    }

    #[test]
    fn shape_selection() {
        assert_eq!(QueryShape::Plain, QueryShape::select(false, false));
        assert_eq!(QueryShape::ConsumerGroups, QueryShape::select(false, true));
        assert_eq!(QueryShape::Bucketed, QueryShape::select(true, false));
        assert_eq!(
            QueryShape::BucketedConsumerGroups,
            QueryShape::select(true, true)
        );
        assert_eq!(
            "get-bucketed-usages-by-municipality-consumer-groups",
            QueryShape::BucketedConsumerGroups.query_name()
        );
        assert_eq!(
            "get-usages-by-municipality",
            QueryShape::Plain.to_string()
        );
    }

    #[tokio::test]
    async fn plan_unfiltered_skips_lookup() {
        let store = FakeStore::default();
        let query = plan(&request(None), None, &store).await.unwrap();
        assert_eq!(QueryShape::Plain, query.shape());
        assert_eq!(r"^03\d*$", query.municipality_pattern);
        assert_eq!(0, store.lookups().len());
    }

    #[tokio::test]
    async fn plan_filtered() {
        let store = FakeStore::default();
        let query = plan(&request(Some(vec!["A1"])), None, &store)
            .await
            .unwrap();
        assert_eq!(QueryShape::ConsumerGroups, query.shape());
        assert_eq!(Some(vec![test_utils::usage_type_id("A1")]), query.usage_types);
        assert_eq!(vec![vec!["A1".to_string()]], store.lookups());
    }

    #[tokio::test]
    async fn plan_filtered_unknown_group() {
        let store = FakeStore::default();
        let query = plan(&request(Some(vec!["ZZ"])), None, &store)
            .await
            .unwrap();
        // Still filtered, but by nothing.
        assert_eq!(QueryShape::ConsumerGroups, query.shape());
        assert_eq!(Some(vec![]), query.usage_types);
    }

    #[tokio::test]
    async fn plan_bucketed() {
        let store = FakeStore::default();
        let width: BucketWidth = "1 month".parse().unwrap();
        let query = plan(&request(None), Some(width.clone()), &store)
            .await
            .unwrap();
        assert_eq!(QueryShape::Bucketed, query.shape());
        assert_eq!(Some(width.clone()), query.bucket_width);
        let query = plan(&request(Some(vec!["A1", "B2"])), Some(width), &store)
            .await
            .unwrap();
        assert_eq!(QueryShape::BucketedConsumerGroups, query.shape());
        assert_eq!(2, query.usage_types.unwrap().len());
    }

    #[tokio::test]
    async fn run_sorts_by_time() {
        let store = FakeStore::default();
        let query = plan(&request(None), None, &store).await.unwrap();
        let usages = run(&query, &store).await.unwrap();
        assert_eq!(test_utils::get_test_usages().len(), usages.len());
        assert!(usages.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(vec![query], store.queries());
    }

    #[tokio::test]
    async fn run_propagates_failure() {
        let store = FakeStore::failing();
        let query = plan(&request(None), None, &store).await.unwrap();
        let error = run(&query, &store).await.unwrap_err();
        assert!(matches!(error, ForecastError::Database(_)), "{error:?}");
    }
}
