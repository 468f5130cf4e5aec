// src/core/feed/sender.rs

//! Delivery of feed documents to the indexer's feed endpoint.

use crate::core::errors::FeedgateError;
use flate2::Compression;
use flate2::write::GzEncoder;
use reqwest::multipart::{Form, Part};
use std::io::Write;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// The port the indexer accepts feeds on.
const FEED_PORT: u16 = 19900;

const FEED_TIMEOUT: Duration = Duration::from_secs(300);

/// Posts multipart feed uploads to one indexer.
#[derive(Debug, Clone)]
pub struct GsaFeedFileSender {
    feed_url: Url,
    client: reqwest::Client,
    compress: bool,
}

impl GsaFeedFileSender {
    pub fn new(gsa_hostname: &str, secure: bool, compress: bool) -> Result<Self, FeedgateError> {
        let scheme = if secure { "https" } else { "http" };
        let feed_url = Url::parse(&format!("{scheme}://{gsa_hostname}:{FEED_PORT}/xmlfeed"))
            .map_err(|e| {
                FeedgateError::InvalidConfiguration(format!(
                    "gsa.hostname '{gsa_hostname}' does not form a feed URL: {e}"
                ))
            })?;
        let client = reqwest::Client::builder()
            .timeout(FEED_TIMEOUT)
            .use_rustls_tls()
            .build()
            .map_err(|e| FeedgateError::Internal(format!("HTTP client construction: {e}")))?;
        Ok(Self {
            feed_url,
            client,
            compress,
        })
    }

    pub fn feed_url(&self) -> &Url {
        &self.feed_url
    }

    /// Sends one metadata-and-url feed.
    pub async fn send_metadata_and_url(
        &self,
        datasource: &str,
        xml: &str,
    ) -> Result<(), FeedgateError> {
        self.send(datasource, "metadata-and-url", xml, None).await
    }

    /// Sends one xmlgroups feed; `incremental=false` asks the indexer to
    /// replace every previously fed group of this source.
    pub async fn send_groups(
        &self,
        source: &str,
        xml: &str,
        incremental: bool,
    ) -> Result<(), FeedgateError> {
        self.send(source, "xmlgroups", xml, Some(incremental)).await
    }

    async fn send(
        &self,
        datasource: &str,
        feedtype: &str,
        xml: &str,
        incremental: Option<bool>,
    ) -> Result<(), FeedgateError> {
        let data_part = if self.compress {
            let compressed = gzip(xml.as_bytes())?;
            debug!(
                "Compressed feed body {} -> {} bytes.",
                xml.len(),
                compressed.len()
            );
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert(
                reqwest::header::CONTENT_ENCODING,
                reqwest::header::HeaderValue::from_static("gzip"),
            );
            Part::bytes(compressed)
                .file_name("feed.xml")
                .mime_str("text/xml")
                .map_err(|e| FeedgateError::Internal(e.to_string()))?
                .headers(headers)
        } else {
            Part::bytes(xml.as_bytes().to_vec())
                .file_name("feed.xml")
                .mime_str("text/xml")
                .map_err(|e| FeedgateError::Internal(e.to_string()))?
        };

        let mut form = Form::new()
            .text("feedtype", feedtype.to_string())
            .text("datasource", datasource.to_string());
        if let Some(incremental) = incremental {
            form = form.text("incremental", incremental.to_string());
        }
        let form = form.part("data", data_part);

        // Transport errors map to Transient through the From impl.
        let response = self
            .client
            .post(self.feed_url.clone())
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(FeedgateError::FeedRejected {
                status: status.as_u16(),
                message: body,
            });
        }
        // The feed endpoint answers 200 with a textual verdict.
        if body.trim() != "Success" {
            return Err(FeedgateError::FeedRejected {
                status: status.as_u16(),
                message: body,
            });
        }
        info!("Feed ({feedtype}) for '{datasource}' accepted by the indexer.");
        Ok(())
    }
}

fn gzip(data: &[u8]) -> Result<Vec<u8>, FeedgateError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder
        .finish()
        .map_err(|e| FeedgateError::Internal(format!("gzip failed: {e}")))
}
