//! Archive uploader
//!
//! One `send` is one HTTPS POST carrying the archive as a multipart body:
//! field `file`, filename = archive base name, `application/zip`, plus an
//! `X-File-Name` header repeating the name. There is no retry here; the
//! delivery queue decides whether to try again.

use crate::archive::ARCHIVE_CONTENT_TYPE;
use crate::config::UploadConfig;
use crate::error::UploadError;
use reqwest::multipart::{Form, Part};
use reqwest::Url;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Header carrying the archive file name.
pub const FILE_NAME_HEADER: &str = "X-File-Name";

/// Successful receiver response.
#[derive(Debug, Clone)]
pub struct Ack {
    pub status: u16,
    pub body: String,
}

/// HTTP client bound to one receiver endpoint.
#[derive(Debug, Clone)]
pub struct Uploader {
    client: reqwest::Client,
    endpoint: Url,
    accept_invalid_certs: bool,
}

impl Uploader {
    /// Build an uploader for `endpoint`.
    ///
    /// `accept_invalid_certs` turns off server certificate validation. It is
    /// meant for receivers on a local network with a self-signed certificate
    /// and is logged loudly whenever it is in effect.
    pub fn new(
        endpoint: &str,
        accept_invalid_certs: bool,
        timeout: Duration,
    ) -> Result<Self, UploadError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| UploadError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
        match endpoint.scheme() {
            "https" => {}
            "http" => warn!(
                endpoint = %endpoint,
                "Upload endpoint is plain HTTP; archives will travel unencrypted"
            ),
            other => {
                return Err(UploadError::InvalidEndpoint(format!(
                    "unsupported scheme '{other}' in {endpoint}"
                )))
            }
        }

        if accept_invalid_certs {
            warn!(
                endpoint = %endpoint,
                "TLS certificate validation is DISABLED for uploads; any server certificate will be accepted"
            );
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(UploadError::Transport)?;

        Ok(Self {
            client,
            endpoint,
            accept_invalid_certs,
        })
    }

    pub fn from_config(config: &UploadConfig) -> Result<Self, UploadError> {
        Self::new(
            &config.endpoint_url(),
            config.accept_invalid_certs,
            config.timeout(),
        )
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// POST the archive once.
    pub async fn send(&self, archive_path: &Path) -> Result<Ack, UploadError> {
        let bytes = tokio::fs::read(archive_path)
            .await
            .map_err(|source| UploadError::Io {
                path: archive_path.to_path_buf(),
                source,
            })?;
        let file_name = archive_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "archive.zip".to_string());

        if self.accept_invalid_certs {
            warn!(endpoint = %self.endpoint, "Sending without certificate validation");
        }
        debug!(
            endpoint = %self.endpoint,
            file = %file_name,
            bytes = bytes.len(),
            "Uploading archive"
        );

        let part = Part::bytes(bytes)
            .file_name(file_name.clone())
            .mime_str(ARCHIVE_CONTENT_TYPE)
            .map_err(UploadError::Transport)?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(FILE_NAME_HEADER, file_name.as_str())
            .multipart(form)
            .send()
            .await
            .map_err(UploadError::Transport)?;

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                debug!(
                    endpoint = %self.endpoint,
                    status = status.as_u16(),
                    error = %e,
                    "Failed to read response body"
                );
                format!("<unreadable response body: {e}>")
            }
        };
        if status.is_success() {
            Ok(Ack {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(UploadError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_endpoints() {
        let err = Uploader::new("not a url", false, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, UploadError::InvalidEndpoint(_)));

        let err = Uploader::new("ftp://host/in", false, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, UploadError::InvalidEndpoint(_)));
    }

    #[test]
    fn builds_from_config() {
        let config = UploadConfig {
            host: "10.0.0.2:7026".to_string(),
            accept_invalid_certs: true,
            ..UploadConfig::default()
        };
        let uploader = Uploader::from_config(&config).unwrap();
        assert_eq!(
            uploader.endpoint().as_str(),
            "https://10.0.0.2:7026/WeatherForecast/ZipReceiver"
        );
    }

    #[tokio::test]
    async fn missing_archive_is_io_error() {
        let uploader =
            Uploader::new("http://127.0.0.1:9/in", false, Duration::from_secs(1)).unwrap();
        let err = uploader
            .send(Path::new("/definitely/missing.zip"))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Io { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn transient_classification() {
        let status = |status| UploadError::Status {
            status,
            body: String::new(),
        };
        assert!(status(500).is_transient());
        assert!(status(503).is_transient());
        assert!(status(429).is_transient());
        assert!(!status(400).is_transient());
        assert!(!status(404).is_transient());
    }
}
