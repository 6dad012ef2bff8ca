//! Prometheus HTTP API metrics source

use super::{MetricsSource, RawSeries, SourceError};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

const UNKNOWN_LABEL: &str = "unknown";

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<QueryData>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<VectorSample>,
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    #[serde(default)]
    metric: HashMap<String, String>,
    /// `[unix_seconds, "value"]`
    #[serde(default)]
    value: Vec<serde_json::Value>,
}

fn parse_value(raw: &[serde_json::Value]) -> Option<f64> {
    match raw.get(1)? {
        serde_json::Value::String(s) => s.parse().ok(),
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Instant queries against `<base_url>/api/v1/query`
#[derive(Debug, Clone)]
pub struct PrometheusSource {
    client: reqwest::Client,
    query_url: String,
}

impl PrometheusSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            query_url: format!("{}/api/v1/query", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl MetricsSource for PrometheusSource {
    async fn query(&self, query: &str) -> Result<Vec<RawSeries>, SourceError> {
        let body = self
            .client
            .get(&self.query_url)
            .query(&[("query", query)])
            .send()
            .await?
            .text()
            .await?;

        let response: QueryResponse =
            serde_json::from_str(&body).map_err(|e| SourceError::Malformed(e.to_string()))?;
        if response.status != "success" {
            return Err(SourceError::Query(
                response.error.unwrap_or_else(|| response.status.clone()),
            ));
        }

        let samples = response.data.map(|d| d.result).unwrap_or_default();
        let mut series = Vec::with_capacity(samples.len());
        for sample in samples {
            let label = sample
                .metric
                .get("name")
                .cloned()
                .unwrap_or_else(|| UNKNOWN_LABEL.to_string());
            match parse_value(&sample.value) {
                Some(value) => series.push(RawSeries { label, value }),
                None => warn!(label = %label, "Skipping series with unparsable value"),
            }
        }
        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const CPU: &str = r#"rate(container_cpu_usage_seconds_total{image!="",name!=""}[1m])"#;

    #[tokio::test]
    async fn test_query_parses_vector_result() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::UrlEncoded("query".into(), CPU.into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"status":"success","data":{"resultType":"vector","result":[
                    {"metric":{"name":"web","image":"nginx"},"value":[1700000000.1,"0.5"]},
                    {"metric":{"image":"redis"},"value":[1700000000.1,"2"]},
                    {"metric":{"name":"bad"},"value":[1700000000.1,"NaNx"]}
                ]}}"#,
            )
            .create_async()
            .await;

        let source = PrometheusSource::new(&server.url(), Duration::from_secs(10)).unwrap();
        let series = source.query(CPU).await.unwrap();

        mock.assert_async().await;
        assert_eq!(
            series,
            vec![
                RawSeries {
                    label: "web".to_string(),
                    value: 0.5
                },
                RawSeries {
                    label: "unknown".to_string(),
                    value: 2.0
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_query_error_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"status":"error","errorType":"bad_data","error":"parse error"}"#)
            .create_async()
            .await;

        let source = PrometheusSource::new(&server.url(), Duration::from_secs(10)).unwrap();
        let err = source.query("bogus{").await.unwrap_err();
        assert!(matches!(err, SourceError::Query(ref m) if m == "parse error"));
    }

    #[tokio::test]
    async fn test_query_non_json_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::Any)
            .with_status(502)
            .with_body("Bad Gateway")
            .create_async()
            .await;

        let source = PrometheusSource::new(&format!("{}/", server.url()), Duration::from_secs(10))
            .unwrap();
        assert!(matches!(
            source.query(CPU).await.unwrap_err(),
            SourceError::Malformed(_)
        ));
    }
}
