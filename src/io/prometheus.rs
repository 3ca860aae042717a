//! Prometheus text exposition for reconciler metrics
//!
//! Served at GET /metrics by the ingestion HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary};
use std::fmt::Write;

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Format metrics in Prometheus text exposition format
pub fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_event_metrics(&mut output, site_id, &summary);
    write_patch_metrics(&mut output, site_id, &summary);
    write_anomaly_metrics(&mut output, site_id, &summary);
    write_twin_error_metrics(&mut output, site_id, &summary);

    output
}

fn write_event_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "reconciler_events_accepted_total",
        "Sensor events decoded and reconciled",
        MetricType::Counter,
        site,
        summary.events_accepted,
    );
    write_metric(
        output,
        "reconciler_events_rejected_total",
        "Events dropped as malformed",
        MetricType::Counter,
        site,
        summary.events_rejected,
    );
    write_metric(
        output,
        "reconciler_stale_samples_total",
        "Room samples older than the twin's recorded timestamp",
        MetricType::Counter,
        site,
        summary.stale_samples,
    );
    write_metric(
        output,
        "reconciler_event_latency_avg_us",
        "Average per-event reconciliation latency in microseconds",
        MetricType::Gauge,
        site,
        summary.avg_reconcile_latency_us,
    );
    write_metric(
        output,
        "reconciler_event_latency_max_us",
        "Maximum per-event reconciliation latency in microseconds",
        MetricType::Gauge,
        site,
        summary.max_reconcile_latency_us,
    );
}

fn write_patch_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "reconciler_patches_applied_total",
        "Patch calls issued to the twin store",
        MetricType::Counter,
        site,
        summary.patches_applied,
    );
    write_metric(
        output,
        "reconciler_patches_skipped_total",
        "Reconciliations skipped because nothing changed",
        MetricType::Counter,
        site,
        summary.patches_skipped,
    );
    write_metric(
        output,
        "reconciler_properties_written_total",
        "Twin properties written",
        MetricType::Counter,
        site,
        summary.properties_written,
    );
}

fn write_anomaly_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "reconciler_anomaly_batches_total",
        "Anomaly batches reconciled",
        MetricType::Counter,
        site,
        summary.anomaly_batches,
    );
    write_metric(
        output,
        "reconciler_anomaly_records_applied_total",
        "Anomaly records that changed a twin",
        MetricType::Counter,
        site,
        summary.anomaly_records_applied,
    );
    write_metric(
        output,
        "reconciler_anomaly_records_skipped_total",
        "Anomaly records already recorded on the twin",
        MetricType::Counter,
        site,
        summary.anomaly_records_skipped,
    );
}

fn write_twin_error_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    let name = "reconciler_twin_errors_total";
    let _ = writeln!(output, "# HELP {name} Twin store call failures by kind");
    let _ = writeln!(output, "# TYPE {name} counter");
    for (kind, val) in [
        ("not_found", summary.twin_not_found),
        ("unavailable", summary.twin_unavailable),
        ("conflict", summary.twin_conflict),
        ("timeout", summary.twin_timeout),
    ] {
        let _ = writeln!(output, "{name}{{site=\"{site}\",kind=\"{kind}\"}} {val}");
    }
}
