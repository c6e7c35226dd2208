//! Metrics source behind the `metrics` topic and `fetch_metrics` request.

use anyhow::{Context, Result};
use async_trait::async_trait;
use portrelay_common::PrometheusMetric;

/// Produces one metrics snapshot per call.
/// Real implementation: `HttpMetricsSource`.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<PrometheusMetric>>;
}

/// Scrapes a Prometheus text endpoint over HTTP.
pub struct HttpMetricsSource {
    client: reqwest::Client,
    url: String,
    limit: usize,
}

impl HttpMetricsSource {
    pub fn new(url: impl Into<String>, limit: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("portrelay/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
            limit,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl MetricsSource for HttpMetricsSource {
    async fn fetch(&self) -> Result<Vec<PrometheusMetric>> {
        let text = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", self.url))?
            .error_for_status()
            .with_context(|| format!("GET {} returned an error status", self.url))?
            .text()
            .await
            .context("Failed to read metrics body")?;
        Ok(parse_prometheus_metrics(&text, self.limit))
    }
}

/// Take the first `limit` samples from a text exposition.
///
/// Blank lines and `#` comments are skipped. A sample is `name value`; any
/// labels stay part of the name and trailing timestamps are ignored. A value
/// that does not parse becomes NaN, which serializes as `null`.
pub fn parse_prometheus_metrics(text: &str, limit: usize) -> Vec<PrometheusMetric> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .take(limit)
        .map(|line| {
            let mut fields = line.split_whitespace();
            let key = fields.next().unwrap_or_default().to_string();
            let value = fields
                .next()
                .and_then(|raw| raw.parse::<f64>().ok())
                .unwrap_or(f64::NAN);
            PrometheusMetric { key, value }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPOSITION: &str = "\
# HELP http_requests_total Total requests.
# TYPE http_requests_total counter
http_requests_total 1027

process_cpu_seconds_total 12.47
process_open_fds 42 1712000000000
ws_clients{region=\"eu\"} 3
";

    #[test]
    fn skips_comments_and_blank_lines() {
        let metrics = parse_prometheus_metrics(EXPOSITION, 6);
        let keys: Vec<&str> = metrics.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "http_requests_total",
                "process_cpu_seconds_total",
                "process_open_fds",
                "ws_clients{region=\"eu\"}",
            ]
        );
        assert_eq!(metrics[0].value, 1027.0);
        assert_eq!(metrics[1].value, 12.47);
        assert_eq!(metrics[2].value, 42.0);
    }

    #[test]
    fn respects_limit() {
        let metrics = parse_prometheus_metrics(EXPOSITION, 2);
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[1].key, "process_cpu_seconds_total");
        assert!(parse_prometheus_metrics(EXPOSITION, 0).is_empty());
    }

    #[test]
    fn unparsable_value_is_nan_and_serializes_as_null() {
        let metrics = parse_prometheus_metrics("up oops\nlonely", 6);
        assert!(metrics[0].value.is_nan());
        assert!(metrics[1].value.is_nan());
        let json = serde_json::to_value(&metrics).unwrap();
        assert!(json[0]["value"].is_null());
        assert_eq!(json[1]["key"], "lonely");
    }

    #[test]
    fn empty_body_yields_nothing() {
        assert!(parse_prometheus_metrics("", 6).is_empty());
        assert!(parse_prometheus_metrics("# only comments\n\n", 6).is_empty());
    }

    #[test]
    fn http_source_keeps_url() {
        let source = HttpMetricsSource::new("http://localhost:3000/metrics", 6).unwrap();
        assert_eq!(source.url(), "http://localhost:3000/metrics");
    }
}
