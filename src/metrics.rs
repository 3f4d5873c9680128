//! Metrics and tracing helpers.
//!
//! With the `metrics` feature, [`METRICS`] exposes OpenTelemetry instruments backed by a
//! Prometheus registry that `coffer-server` renders on `/metrics`. With the `tracing`
//! feature, [`tracing_helpers`] provides the spans wrapped around queries and transactions.

#[cfg(feature = "metrics")]
pub use self::instruments::{CofferMetrics, METRICS};

#[cfg(feature = "metrics")]
mod instruments {
    use once_cell::sync::Lazy;
    use opentelemetry::{
        global,
        metrics::{Counter, Histogram},
        KeyValue,
    };
    use opentelemetry_sdk::metrics::SdkMeterProvider;
    use prometheus::{Encoder, Registry, TextEncoder};
    use std::time::Duration;

    pub static METRICS: Lazy<CofferMetrics> = Lazy::new(CofferMetrics::init);

    pub struct CofferMetrics {
        registry: Registry,
        queries_total: Counter<u64>,
        query_errors_total: Counter<u64>,
        query_duration: Histogram<f64>,
        connection_wait: Histogram<f64>,
        workflow_events: Counter<u64>,
        records_approved: Counter<u64>,
        signatures_recorded: Counter<u64>,
    }

    impl CofferMetrics {
        pub fn init() -> Self {
            let registry = Registry::new();
            match opentelemetry_prometheus::exporter()
                .with_registry(registry.clone())
                .build()
            {
                Ok(exporter) => {
                    let provider = SdkMeterProvider::builder().with_reader(exporter).build();
                    global::set_meter_provider(provider);
                }
                Err(e) => {
                    log::warn!("prometheus exporter unavailable, metrics will not be exported: {e}");
                }
            }
            let meter = global::meter("coffer");

            let queries_total = meter
                .u64_counter("coffer_queries_total")
                .with_description("Total statements executed against the record store")
                .build();
            let query_errors_total = meter
                .u64_counter("coffer_query_errors_total")
                .with_description("Statements that failed in the record store")
                .build();
            let query_duration = meter
                .f64_histogram("coffer_query_duration_seconds")
                .with_description("Duration of record store statements")
                .build();
            let connection_wait = meter
                .f64_histogram("coffer_connection_wait_seconds")
                .with_description("Time spent establishing database connections")
                .build();
            let workflow_events = meter
                .u64_counter("coffer_workflow_events_total")
                .with_description("Workflow operations by record kind and action")
                .build();
            let records_approved = meter
                .u64_counter("coffer_records_approved_total")
                .with_description("Records transitioned to approved")
                .build();
            let signatures_recorded = meter
                .u64_counter("coffer_signatures_recorded_total")
                .with_description("Signature rows appended to the audit tables")
                .build();

            Self {
                registry,
                queries_total,
                query_errors_total,
                query_duration,
                connection_wait,
                workflow_events,
                records_approved,
                signatures_recorded,
            }
        }

        pub fn record_query_duration(&self, elapsed: Duration) {
            self.queries_total.add(1, &[]);
            self.query_duration.record(elapsed.as_secs_f64(), &[]);
        }

        pub fn record_query_error(&self) {
            self.query_errors_total.add(1, &[]);
        }

        pub fn record_connection_wait(&self, elapsed: Duration) {
            self.connection_wait.record(elapsed.as_secs_f64(), &[]);
        }

        pub fn record_workflow_event(&self, kind: &'static str, action: &'static str) {
            self.workflow_events.add(
                1,
                &[KeyValue::new("kind", kind), KeyValue::new("action", action)],
            );
        }

        pub fn record_approval(&self, kind: &'static str, approved: u64, signatures: u64) {
            self.records_approved.add(approved, &[KeyValue::new("kind", kind)]);
            if signatures > 0 {
                self.signatures_recorded
                    .add(signatures, &[KeyValue::new("kind", kind)]);
            }
        }

        /// Render the registry in the Prometheus text exposition format.
        pub fn render(&self) -> Result<String, String> {
            let families = self.registry.gather();
            let mut buffer = Vec::new();
            TextEncoder::new()
                .encode(&families, &mut buffer)
                .map_err(|e| format!("failed to encode metrics: {e}"))?;
            String::from_utf8(buffer).map_err(|e| format!("metrics are not valid UTF-8: {e}"))
        }
    }
}

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::Span;

    const MAX_SQL_IN_SPAN: usize = 120;

    fn statement_label(query: &str) -> &str {
        let trimmed = query.trim();
        match trimmed.char_indices().nth(MAX_SQL_IN_SPAN) {
            Some((idx, _)) => &trimmed[..idx],
            None => trimmed,
        }
    }

    pub fn execute_query_span(query: &str) -> Span {
        tracing::debug_span!("coffer.query", sql = statement_label(query))
    }

    pub fn acquire_connection_span() -> Span {
        tracing::debug_span!("coffer.connect")
    }

    pub fn begin_transaction_span() -> Span {
        tracing::debug_span!("coffer.transaction.begin")
    }

    pub fn commit_transaction_span() -> Span {
        tracing::debug_span!("coffer.transaction.commit")
    }

    pub fn rollback_transaction_span() -> Span {
        tracing::debug_span!("coffer.transaction.rollback")
    }

    pub fn workflow_span(kind: &'static str, action: &'static str, actor_id: i64) -> Span {
        tracing::info_span!("coffer.workflow", kind, action, actor_id)
    }

}
