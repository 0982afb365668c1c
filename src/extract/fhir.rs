//! HTTP client for the FHIR extraction service.

use super::query::QueryDescriptor;
use super::table::RawTable;
use crate::error::{Error, Result};
use std::time::Duration;
use tracing::{debug, info};

/// Anything that can answer a query descriptor with a table.
pub trait DataSource {
    /// Runs one query. Implementations perform a single attempt.
    async fn fetch(&self, query: &QueryDescriptor) -> Result<RawTable>;
}

/// Connection settings for the extraction service.
#[derive(Debug, Clone)]
pub struct FhirSettings {
    /// Scheme and host, e.g. `http://localhost`.
    pub server: String,
    pub port: u16,
    pub timeout_seconds: u64,
}

/// Fetches CSV projections from the extraction service.
pub struct FhirClient {
    settings: FhirSettings,
    http_client: reqwest::Client,
}

impl FhirClient {
    pub fn new(settings: FhirSettings) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()
            .map_err(|e| Error::RemoteFetch(format!("cannot create HTTP client: {}", e)))?;

        Ok(Self {
            settings,
            http_client,
        })
    }

    #[cfg(test)]
    fn with_http_client(settings: FhirSettings, http_client: reqwest::Client) -> Self {
        Self {
            settings,
            http_client,
        }
    }
}

impl DataSource for FhirClient {
    async fn fetch(&self, query: &QueryDescriptor) -> Result<RawTable> {
        let url = query.url(&self.settings.server, self.settings.port);
        info!("Requesting {} data from {}:{}", query.kind, self.settings.server, self.settings.port);
        debug!("GET {}", url);

        let response = self
            .http_client
            .get(&url)
            .header(reqwest::header::ACCEPT, "text/csv")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::RemoteFetch(format!(
                        "request timed out after {}s",
                        self.settings.timeout_seconds
                    ))
                } else if e.is_connect() {
                    Error::RemoteFetch(format!(
                        "cannot connect to {}:{}",
                        self.settings.server, self.settings.port
                    ))
                } else {
                    Error::RemoteFetch(format!("failed to send request: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::RemoteFetch(format!("HTTP {}: {}", status, body.trim())));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::RemoteFetch(format!("failed to read response body: {}", e)))?;

        let table = RawTable::from_csv(&body)?;
        table.require_columns(query.required_columns)?;
        debug!("Received {} rows with columns {:?}", table.len(), table.columns());

        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::query;
    use crate::models::TimeSeriesVariant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one canned HTTP response and returns the request line it saw.
    async fn serve_once(status: &'static str, body: &'static str) -> (u16, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16 * 1024];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: text/csv\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();

            request.lines().next().unwrap_or_default().to_string()
        });

        (port, handle)
    }

    fn client(port: u16) -> FhirClient {
        let settings = FhirSettings {
            server: "http://127.0.0.1".to_string(),
            port,
            timeout_seconds: 5,
        };
        let http_client = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        FhirClient::with_http_client(settings, http_client)
    }

    #[tokio::test]
    async fn test_fetch_parses_csv() {
        let (port, server) = serve_once("200 OK", "id,gender,birthDate\n1,male,1980\n2,female,1975\n").await;
        let query = query::age_pyramid("I11.00").unwrap();

        let table = client(port).fetch(&query).await.unwrap();
        assert_eq!(table.len(), 2);

        let request_line = server.await.unwrap();
        assert!(request_line.starts_with("GET /fhir/Patient?_has:Condition:subject:code=I11.00"));
    }

    #[tokio::test]
    async fn test_http_error_is_remote_fetch_error() {
        let (port, _server) = serve_once("500 Internal Server Error", "boom").await;
        let query = query::time_series(TimeSeriesVariant::Covid19);

        let err = client(port).fetch(&query).await.unwrap_err();
        assert!(matches!(err, Error::RemoteFetch(_)));
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_missing_column_is_schema_error() {
        let (port, _server) = serve_once("200 OK", "condition_id,code\nc1,U07.1\n").await;
        let query = query::time_series(TimeSeriesVariant::Covid19);

        let err = client(port).fetch(&query).await.unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_remote_fetch_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let query = query::diagnosis_coincidence();

        let err = client(port).fetch(&query).await.unwrap_err();
        assert!(matches!(err, Error::RemoteFetch(_)));
    }
}
