//! HTTP implementation of the metrics and city-structure backends.

use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::models::{DateRange, MetricDescriptor, ShapeInstance};
use futures::future::{BoxFuture, FutureExt};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info};

use super::backend::{CityStructureBackend, MapDataResponse, MetricsBackend, ResponseStatus};

/// Talks to the dashboard REST API.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    base_url: Url,
    auth_token: Option<String>,
    timeout_seconds: u64,
    http_client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        info!("Using metrics backend at {}", config.base_url);

        let base_url = Url::parse(&config.base_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| {
                BackendError::Transport(format!("Invalid backend URL: {}", config.base_url))
            })?;

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| BackendError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            auth_token: config.auth_token.clone(),
            timeout_seconds: config.timeout_seconds,
            http_client,
        })
    }

    /// Base URL with `segments` appended, each percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn metrics_url(&self, city_id: &str) -> Url {
        let mut url = self.endpoint(&["cities", city_id, "metrics"]);
        url.query_pairs_mut().append_pair("map_eligible", "true");
        url
    }

    fn map_data_url(&self, metric_id: &str, range: Option<DateRange>) -> Url {
        let mut url = self.endpoint(&["metrics", metric_id, "map-data"]);
        if let Some(r) = range {
            url.query_pairs_mut()
                .append_pair("start", &r.start.to_string())
                .append_pair("end", &r.end.to_string());
        }
        url
    }

    fn shapes_url(&self, city_id: &str) -> Url {
        self.endpoint(&["cities", city_id, "shapes"])
    }

    /// GET `url` and return the status with the raw body.
    fn fetch(&self, url: Url) -> BoxFuture<'static, Result<(StatusCode, String), BackendError>> {
        let client = self.http_client.clone();
        let token = self.auth_token.clone();
        let timeout = self.timeout_seconds;
        let base = self.base_url.clone();

        async move {
            debug!("GET {}", url);
            let mut request = client.get(url);
            if let Some(token) = token {
                request = request.bearer_auth(token);
            }

            let response = request.send().await.map_err(|e| {
                if e.is_timeout() {
                    BackendError::Transport(format!("Request timed out after {}s", timeout))
                } else if e.is_connect() {
                    BackendError::Transport(format!("Cannot connect to backend at {}", base))
                } else {
                    BackendError::Transport(format!("Failed to send request: {}", e))
                }
            })?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| BackendError::Transport(format!("Failed to read response: {}", e)))?;
            Ok((status, body))
        }
        .boxed()
    }

    /// GET `url` and decode the JSON body.
    fn get_json<T>(&self, url: Url) -> BoxFuture<'static, Result<T, BackendError>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let fetch = self.fetch(url);
        async move {
            let (status, body) = fetch.await?;
            if !status.is_success() {
                return Err(BackendError::Backend(format!("HTTP {}: {}", status, body)));
            }
            decode(&body)
        }
        .boxed()
    }
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, BackendError> {
    serde_json::from_str(body).map_err(|e| BackendError::Malformed(e.to_string()))
}

impl MetricsBackend for HttpBackend {
    fn list_map_eligible_metrics(
        &self,
        city_id: &str,
    ) -> BoxFuture<'static, Result<Vec<MetricDescriptor>, BackendError>> {
        let fetch = self.get_json::<Vec<MetricDescriptor>>(self.metrics_url(city_id));
        async move {
            let metrics = fetch.await?;
            Ok(metrics.into_iter().filter(|m| m.is_map_eligible()).collect())
        }
        .boxed()
    }

    fn get_map_data(
        &self,
        metric_id: &str,
        range: Option<DateRange>,
    ) -> BoxFuture<'static, Result<MapDataResponse, BackendError>> {
        let fetch = self.fetch(self.map_data_url(metric_id, range));
        async move {
            let (status, body) = fetch.await?;
            if status.is_success() {
                return decode(&body);
            }
            // Error bodies still carry the classification, e.g. a missing map query.
            match serde_json::from_str::<MapDataResponse>(&body) {
                Ok(response) if response.status == ResponseStatus::Error => {
                    debug!("HTTP {} with error body: {:?}", status, response.error);
                    Ok(response)
                }
                _ => Err(BackendError::Backend(format!("HTTP {}: {}", status, body))),
            }
        }
        .boxed()
    }
}

impl CityStructureBackend for HttpBackend {
    fn list_shape_instances(
        &self,
        city_id: &str,
    ) -> BoxFuture<'static, Result<Vec<ShapeInstance>, BackendError>> {
        self.get_json(self.shapes_url(city_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn backend() -> HttpBackend {
        HttpBackend::new(&BackendConfig {
            base_url: "https://civic.example.org/api/".to_string(),
            ..BackendConfig::default()
        })
        .unwrap()
    }

    /// Serve one canned HTTP response on a local port; returns the base URL.
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn local(base_url: String) -> HttpBackend {
        HttpBackend::new(&BackendConfig {
            base_url,
            timeout_seconds: 5,
            ..BackendConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_urls() {
        let b = backend();
        assert_eq!(
            b.metrics_url("sf").as_str(),
            "https://civic.example.org/api/cities/sf/metrics?map_eligible=true"
        );
        assert_eq!(
            b.map_data_url("m1", None).as_str(),
            "https://civic.example.org/api/metrics/m1/map-data"
        );
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
        );
        assert_eq!(
            b.map_data_url("m1", Some(range)).as_str(),
            "https://civic.example.org/api/metrics/m1/map-data?start=2024-06-01&end=2024-06-30"
        );
        assert_eq!(
            b.shapes_url("sf").as_str(),
            "https://civic.example.org/api/cities/sf/shapes"
        );
    }

    #[test]
    fn test_ids_are_percent_encoded() {
        let b = backend();
        assert_eq!(
            b.map_data_url("street lights/2024", None).as_str(),
            "https://civic.example.org/api/metrics/street%20lights%2F2024/map-data"
        );
        assert_eq!(
            b.shapes_url("san francisco").as_str(),
            "https://civic.example.org/api/cities/san%20francisco/shapes"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let err = HttpBackend::new(&BackendConfig {
            base_url: "not a url".to_string(),
            ..BackendConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, BackendError::Transport(_)));
    }

    #[tokio::test]
    async fn test_error_status_with_no_query_body_is_terminal() {
        let base = serve_once(
            "404 Not Found",
            r#"{"status":"error","error":"No map query configured for this metric"}"#,
        )
        .await;

        let response = local(base).get_map_data("m1", None).await.unwrap();
        let err = response.into_records("m1").unwrap_err();
        assert_eq!(err, BackendError::NoMapQuery("m1".to_string()));
        assert!(err.is_terminal());
    }

    #[tokio::test]
    async fn test_error_status_without_body_is_transient() {
        let base = serve_once("502 Bad Gateway", "upstream down").await;

        let err = local(base).get_map_data("m1", None).await.unwrap_err();
        assert!(matches!(err, BackendError::Backend(_)), "{:?}", err);
        assert!(!err.is_terminal());
    }

    #[tokio::test]
    async fn test_success_body_decoded() {
        let base = serve_once(
            "200 OK",
            r#"{"status":"success","records":[{"latitude":37.7,"longitude":-122.4}]}"#,
        )
        .await;

        let response = local(base).get_map_data("m1", None).await.unwrap();
        assert_eq!(response.into_records("m1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_transport_error() {
        let b = HttpBackend::new(&BackendConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_seconds: 2,
            ..BackendConfig::default()
        })
        .unwrap();

        let err = b.get_map_data("m1", None).await.unwrap_err();
        assert!(matches!(err, BackendError::Transport(_)), "{:?}", err);
    }
}
