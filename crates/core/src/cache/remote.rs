//! Remote cache backends.
//!
//! A remote cache is a strict optimisation layered over the local store:
//! a remote miss falls through to a local miss (the task executes), and a
//! push failure is a warning only. Two backends are implemented, plain
//! HTTP with optional bearer auth and S3 with AWS Signature v4, plus the
//! reserved `gcs`/`azure` identifiers.

use crate::config::RemoteCacheConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Environment variables the S3 backend reads its credentials from.
pub const AWS_ACCESS_KEY_ENV: &str = "AWS_ACCESS_KEY_ID";
pub const AWS_SECRET_KEY_ENV: &str = "AWS_SECRET_ACCESS_KEY";

/// Pluggable remote artifact store.
#[async_trait]
pub trait RemoteCache: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &'static str;

    /// Fetch the entry body for `key`, `None` on a miss.
    async fn pull(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Upload the entry body for `key`.
    async fn push(&self, key: &str, body: &[u8]) -> Result<()>;
}

/// Build a backend from configuration.
///
/// # Errors
///
/// Reserved backends return [`Error::RemoteNotImplemented`]; the S3 backend
/// requires credentials in the environment.
pub fn from_config(config: &RemoteCacheConfig) -> Result<Arc<dyn RemoteCache>> {
    match config {
        RemoteCacheConfig::Http { url, token } => {
            Ok(Arc::new(HttpRemote::new(url.clone(), token.clone())))
        }
        RemoteCacheConfig::S3 {
            bucket,
            region,
            prefix,
        } => {
            let access_key = std::env::var(AWS_ACCESS_KEY_ENV)
                .map_err(|_| Error::cache(format!("{AWS_ACCESS_KEY_ENV} is not set")))?;
            let secret_key = std::env::var(AWS_SECRET_KEY_ENV)
                .map_err(|_| Error::cache(format!("{AWS_SECRET_KEY_ENV} is not set")))?;
            Ok(Arc::new(S3Remote::new(
                bucket.clone(),
                region.clone(),
                prefix.clone(),
                access_key,
                secret_key,
            )))
        }
        RemoteCacheConfig::Gcs {} => Err(Error::RemoteNotImplemented("gcs")),
        RemoteCacheConfig::Azure {} => Err(Error::RemoteNotImplemented("azure")),
    }
}

/// HTTP backend: `GET`/`PUT <base>/<key>.cache` with an optional bearer
/// token.
pub struct HttpRemote {
    client: reqwest::Client,
    base: String,
    token: Option<String>,
}

impl HttpRemote {
    #[must_use]
    pub fn new(base: String, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base: base.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn entry_url(&self, key: &str) -> String {
        format!("{}/{key}.cache", self.base)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl RemoteCache for HttpRemote {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn pull(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let url = self.entry_url(key);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| Error::cache(format!("GET {url}: {e}")))?;

        match response.status() {
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| Error::cache(format!("GET {url} body: {e}")))?;
                debug!(key, bytes = body.len(), "remote cache hit");
                Ok(Some(body.to_vec()))
            }
            status => Err(Error::cache(format!("GET {url}: unexpected status {status}"))),
        }
    }

    async fn push(&self, key: &str, body: &[u8]) -> Result<()> {
        let url = self.entry_url(key);
        let response = self
            .authorize(self.client.put(&url))
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| Error::cache(format!("PUT {url}: {e}")))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::cache(format!(
                "PUT {url}: unexpected status {}",
                response.status()
            )))
        }
    }
}

/// S3 backend with AWS Signature Version 4.
pub struct S3Remote {
    client: reqwest::Client,
    bucket: String,
    region: String,
    prefix: String,
    access_key: String,
    secret_key: String,
}

/// Headers produced by signing one request.
struct SignedHeaders {
    authorization: String,
    amz_date: String,
    content_sha256: String,
}

impl S3Remote {
    #[must_use]
    pub fn new(
        bucket: String,
        region: String,
        prefix: String,
        access_key: String,
        secret_key: String,
    ) -> Self {
        let prefix = prefix.trim_matches('/').to_string();
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            bucket,
            region,
            prefix,
            access_key,
            secret_key,
        }
    }

    fn host(&self) -> String {
        format!("{}.s3.{}.amazonaws.com", self.bucket, self.region)
    }

    fn object_path(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            format!("/{key}.cache")
        } else {
            format!("/{}/{key}.cache", self.prefix)
        }
    }

    /// AWS SigV4: canonical request, string-to-sign, then the
    /// key→date→region→service→"aws4_request" HMAC chain.
    fn sign(&self, method: &str, uri_path: &str, body: &[u8], now: DateTime<Utc>) -> Result<SignedHeaders> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let datestamp = now.format("%Y%m%d").to_string();
        let payload_hash = hex::encode(Sha256::digest(body));
        let host = self.host();

        let canonical_request = format!(
            "{method}\n{uri_path}\n\nhost:{host}\nx-amz-content-sha256:{payload_hash}\nx-amz-date:{amz_date}\n\nhost;x-amz-content-sha256;x-amz-date\n{payload_hash}"
        );

        let scope = format!("{datestamp}/{}/s3/aws4_request", self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let date_key = hmac_sha256(format!("AWS4{}", self.secret_key).as_bytes(), datestamp.as_bytes())?;
        let region_key = hmac_sha256(&date_key, self.region.as_bytes())?;
        let service_key = hmac_sha256(&region_key, b"s3")?;
        let signing_key = hmac_sha256(&service_key, b"aws4_request")?;
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes())?);

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature={signature}",
            self.access_key
        );

        Ok(SignedHeaders {
            authorization,
            amz_date,
            content_sha256: payload_hash,
        })
    }

    fn apply(
        request: reqwest::RequestBuilder,
        headers: &SignedHeaders,
    ) -> reqwest::RequestBuilder {
        request
            .header("Authorization", &headers.authorization)
            .header("x-amz-date", &headers.amz_date)
            .header("x-amz-content-sha256", &headers.content_sha256)
    }
}

#[async_trait]
impl RemoteCache for S3Remote {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn pull(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.object_path(key);
        let url = format!("https://{}{path}", self.host());
        let headers = self.sign("GET", &path, b"", Utc::now())?;

        let response = Self::apply(self.client.get(&url), &headers)
            .send()
            .await
            .map_err(|e| Error::cache(format!("GET {url}: {e}")))?;

        match response.status() {
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| Error::cache(format!("GET {url} body: {e}")))?;
                Ok(Some(body.to_vec()))
            }
            status => Err(Error::cache(format!("GET {url}: unexpected status {status}"))),
        }
    }

    async fn push(&self, key: &str, body: &[u8]) -> Result<()> {
        let path = self.object_path(key);
        let url = format!("https://{}{path}", self.host());
        let headers = self.sign("PUT", &path, body, Utc::now())?;

        let response = Self::apply(self.client.put(&url), &headers)
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| Error::cache(format!("PUT {url}: {e}")))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::cache(format!(
                "PUT {url}: unexpected status {}",
                response.status()
            )))
        }
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::cache(format!("hmac key error: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}
