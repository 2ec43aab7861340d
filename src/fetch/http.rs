use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_DISPOSITION;
use tracing::{debug, error, instrument};

use crate::config::FetchConfig;
use crate::error::{ExtractError, ExtractResult};

use super::{derive_file_name, FetchedFile, Fetcher};

/// [`Fetcher`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build reqwest client: {e}"))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &str) -> ExtractResult<FetchedFile> {
        let upstream_err = |reason: String| ExtractError::UpstreamFetchFailed {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| upstream_err(e.to_string()))?;

        let disposition = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let suggested_name = derive_file_name(disposition.as_deref(), url);

        let status = response.status();
        if !status.is_success() {
            error!(%url, %status, "unable to retrieve file");
            return Ok(FetchedFile {
                suggested_name,
                content: Bytes::new(),
            });
        }

        let content = response
            .bytes()
            .await
            .map_err(|e| upstream_err(format!("failed to read body: {e}")))?;

        debug!(
            bytes = content.len(),
            file_name = suggested_name.as_deref().unwrap_or("<none>"),
            "fetch complete"
        );
        Ok(FetchedFile {
            suggested_name,
            content,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::http::{header, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;

    use super::*;

    async fn serve(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(&FetchConfig {
            timeout_secs: 10,
            ..FetchConfig::default()
        })
        .unwrap()
    }

    fn upstream() -> Router {
        Router::new()
            .route("/extracts/a.osm.pbf", get(|| async { "PBFDATA" }))
            .route(
                "/named",
                get(|| async {
                    (
                        [(header::CONTENT_DISPOSITION, "attachment; filename=\"b.osm.pbf\"")],
                        "NAMED",
                    )
                        .into_response()
                }),
            )
            .route(
                "/gone/c.osm.pbf",
                get(|| async { (StatusCode::NOT_FOUND, "no such file").into_response() }),
            )
    }

    #[tokio::test]
    async fn fetch_uses_url_name() {
        let addr = serve(upstream()).await;
        let file = fetcher()
            .fetch(&format!("http://{addr}/extracts/a.osm.pbf"))
            .await
            .unwrap();
        assert_eq!(file.suggested_name.as_deref(), Some("a.osm.pbf"));
        assert_eq!(&file.content[..], b"PBFDATA");
    }

    #[tokio::test]
    async fn fetch_prefers_content_disposition() {
        let addr = serve(upstream()).await;
        let file = fetcher().fetch(&format!("http://{addr}/named")).await.unwrap();
        assert_eq!(file.suggested_name.as_deref(), Some("b.osm.pbf"));
        assert_eq!(&file.content[..], b"NAMED");
    }

    #[tokio::test]
    async fn non_success_status_yields_empty_content() {
        let addr = serve(upstream()).await;
        let file = fetcher()
            .fetch(&format!("http://{addr}/gone/c.osm.pbf"))
            .await
            .unwrap();
        assert!(file.is_empty());
        assert_eq!(file.suggested_name.as_deref(), Some("c.osm.pbf"));
    }

    #[tokio::test]
    async fn connection_failure_is_an_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = fetcher()
            .fetch(&format!("http://{addr}/a.pbf"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::UpstreamFetchFailed { .. }));
    }
}
