//! FILENAME: tests/common/mod.rs
//! In-memory query backend and sales fixtures for drill-engine integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use drill_engine::{BackendError, QueryBackend};
use pivot_engine::{
    group_label, pivot_rows, AggregationType, PivotConfig, PivotMetric, QueryRequest,
    QueryResponse, Row, ValueSpec,
};

type RequestPredicate<T> = Box<dyn Fn(&QueryRequest) -> Option<T> + Send + Sync>;

/// Answers requests from a fixed data set, the way a pivoting backend
/// would: filter by the parent path, group by the level field, pivot on the
/// split fields, then slice the requested window.
pub struct SalesBackend {
    rows: Vec<Row>,
    /// Return raw rows instead of pivoted aggregates.
    raw: bool,
    requests: Mutex<Vec<QueryRequest>>,
    delay: RequestPredicate<Duration>,
    failure: RequestPredicate<BackendError>,
}

impl SalesBackend {
    pub fn new(rows: Vec<Row>) -> Self {
        SalesBackend {
            rows,
            raw: false,
            requests: Mutex::new(Vec::new()),
            delay: Box::new(|_| None),
            failure: Box::new(|_| None),
        }
    }

    pub fn sales() -> Self {
        Self::new(SalesFixture::rows())
    }

    /// Behaves like a backend without pivot support.
    pub fn raw(mut self) -> Self {
        self.raw = true;
        self
    }

    pub fn with_delay(
        mut self,
        delay: impl Fn(&QueryRequest) -> Option<Duration> + Send + Sync + 'static,
    ) -> Self {
        self.delay = Box::new(delay);
        self
    }

    pub fn failing(
        mut self,
        failure: impl Fn(&QueryRequest) -> Option<BackendError> + Send + Sync + 'static,
    ) -> Self {
        self.failure = Box::new(failure);
        self
    }

    pub fn requests(&self) -> Vec<QueryRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn answer(&self, request: &QueryRequest) -> Result<QueryResponse, BackendError> {
        if let Some(err) = (self.failure)(request) {
            return Err(err);
        }

        let matching: Vec<Row> = self
            .rows
            .iter()
            .filter(|row| {
                request
                    .row_group_cols
                    .iter()
                    .zip(&request.group_keys)
                    .all(|(field, key)| group_label(row.value(field)) == *key)
            })
            .cloned()
            .collect();

        let shaped = if self.raw {
            matching
        } else {
            let grouping: Vec<String> =
                request.level_field().map(str::to_string).into_iter().collect();
            let metrics: Vec<PivotMetric> = request
                .value_cols
                .iter()
                .map(|v| PivotMetric::aliased(v.col_id.clone(), v.output_name()))
                .collect();
            // Ungrouped, unsplit pages list raw rows unless the grand total
            // was asked for.
            let listing = grouping.is_empty()
                && request.pivot_cols.is_empty()
                && !request.totals_only;
            if listing {
                matching
            } else {
                pivot_rows(&matching, &grouping, &request.pivot_cols, &metrics, "|")
                    .map_err(|err| BackendError::Rejected(err.to_string()))?
            }
        };

        let count = shaped.len() as u64;
        let rows = shaped
            .into_iter()
            .skip(request.start_row)
            .take(request.end_row.saturating_sub(request.start_row))
            .collect();
        Ok(QueryResponse {
            rows,
            count: Some(count),
        })
    }
}

impl QueryBackend for SalesBackend {
    fn fetch(
        &self,
        request: QueryRequest,
    ) -> impl Future<Output = Result<QueryResponse, BackendError>> + Send {
        self.requests.lock().unwrap().push(request.clone());
        let delay = (self.delay)(&request);
        let result = self.answer(&request);
        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            result
        }
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub struct SalesFixture;

impl SalesFixture {
    pub fn data() -> Vec<(&'static str, &'static str, &'static str, f64, f64)> {
        vec![
            ("North", "Widget", "Q1", 10000.0, 100.0),
            ("North", "Widget", "Q2", 12000.0, 120.0),
            ("North", "Gadget", "Q1", 8000.0, 80.0),
            ("North", "Gadget", "Q2", 9000.0, 90.0),
            ("South", "Widget", "Q1", 15000.0, 150.0),
            ("South", "Widget", "Q2", 14000.0, 140.0),
            ("South", "Gadget", "Q1", 11000.0, 110.0),
            ("East", "Widget", "Q1", 9000.0, 90.0),
            ("East", "Widget", "Q2", 11000.0, 110.0),
            ("East", "Gadget", "Q2", 8500.0, 85.0),
        ]
    }

    pub fn rows() -> Vec<Row> {
        Self::data()
            .into_iter()
            .map(|(region, product, quarter, sales, quantity)| {
                Row::new()
                    .with("Region", region)
                    .with("Product", product)
                    .with("Quarter", quarter)
                    .with("Sales", sales)
                    .with("Quantity", quantity)
            })
            .collect()
    }

    /// Region > Product, summing Sales.
    pub fn grouped_config() -> PivotConfig {
        PivotConfig {
            rows: vec!["Region".to_string(), "Product".to_string()],
            values: vec![ValueSpec::new("Sales", AggregationType::Sum)],
            ..PivotConfig::default()
        }
    }

    /// Region rows, Quarter columns, summing Sales.
    pub fn pivoted_config() -> PivotConfig {
        PivotConfig {
            rows: vec!["Region".to_string()],
            columns: vec!["Quarter".to_string()],
            values: vec![ValueSpec::new("Sales", AggregationType::Sum)],
            ..PivotConfig::default()
        }
    }

    pub fn flat_config() -> PivotConfig {
        PivotConfig {
            values: vec![ValueSpec::new("Sales", AggregationType::Sum)],
            ..PivotConfig::default()
        }
    }
}
