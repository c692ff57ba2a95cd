use std::collections::BTreeMap;
use std::fmt;

use chrono::Utc;
use reqwest::blocking::Client as HttpClient;
use tracing::debug;

use crate::error::{StoreError, REDACTED};
use crate::http::error_body;
use crate::sigv4::{amz_date, authorization, sha256_hex, uri_encode_path, SigningScope};

pub const DEFAULT_REGION: &str = "auto";

pub trait BlobStore: Send + Sync {
    /// Stores `bytes` under `key` and returns the object's public URL.
    fn put(&self, bytes: &[u8], key: &str, content_type: &str) -> Result<String, StoreError>;
}

#[derive(Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub bucket: String,
    pub public_base_url: String,
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &REDACTED)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("public_base_url", &self.public_base_url)
            .finish()
    }
}

impl S3Config {
    /// Cloudflare R2's S3 endpoint for an account.
    pub fn r2_endpoint(account_id: &str) -> String {
        format!("https://{}.r2.cloudflarestorage.com", account_id.trim())
    }
}

/// S3-compatible store using path-style `PUT {endpoint}/{bucket}/{key}`.
pub struct S3BlobStore {
    config: S3Config,
    host: String,
    http: HttpClient,
}

impl S3BlobStore {
    pub fn new(mut config: S3Config, http: HttpClient) -> Result<Self, StoreError> {
        config.endpoint = config.endpoint.trim().trim_end_matches('/').to_string();
        config.public_base_url = config.public_base_url.trim().trim_end_matches('/').to_string();
        if config.region.trim().is_empty() {
            config.region = DEFAULT_REGION.to_string();
        }
        let host = endpoint_host(&config.endpoint)?;
        if config.bucket.trim().is_empty() {
            return Err(StoreError::Config("bucket name is empty".to_string()));
        }
        Ok(Self { config, host, http })
    }

    pub fn public_url(&self, key: &str) -> String {
        let base = &self.config.public_base_url;
        if base.contains("://") {
            format!("{base}/{key}")
        } else {
            format!("https://{base}/{key}")
        }
    }

    fn canonical_uri(&self, key: &str) -> String {
        uri_encode_path(&format!("/{}/{}", self.config.bucket, key))
    }
}

impl BlobStore for S3BlobStore {
    fn put(&self, bytes: &[u8], key: &str, content_type: &str) -> Result<String, StoreError> {
        let canonical_uri = self.canonical_uri(key);
        let url = format!("{}{}", self.config.endpoint, canonical_uri);
        let now = Utc::now();
        let payload_hash = sha256_hex(bytes);

        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), content_type.to_string());
        headers.insert("host".to_string(), self.host.clone());
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.clone());
        headers.insert("x-amz-date".to_string(), amz_date(&now));
        let scope = SigningScope {
            access_key: &self.config.access_key,
            secret_key: &self.config.secret_key,
            region: &self.config.region,
            service: "s3",
        };
        let auth = authorization(&scope, &now, "PUT", &canonical_uri, "", &headers, &payload_hash);

        let mut request = self.http.put(&url).header("authorization", auth);
        for (name, value) in &headers {
            if name != "host" {
                request = request.header(name.as_str(), value.as_str());
            }
        }
        let response = request
            .body(bytes.to_vec())
            .send()
            .map_err(|source| StoreError::Transport {
                endpoint: url.clone(),
                source,
            })?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            return Err(StoreError::Status {
                key: key.to_string(),
                status,
                body: error_body(&body),
            });
        }
        debug!(key, size = bytes.len(), "blob stored");
        Ok(self.public_url(key))
    }
}

/// Host (with port, if any) of an `http(s)://host[:port][/...]` endpoint.
fn endpoint_host(endpoint: &str) -> Result<String, StoreError> {
    let rest = endpoint
        .strip_prefix("https://")
        .or_else(|| endpoint.strip_prefix("http://"))
        .ok_or_else(|| {
            StoreError::Config(format!("endpoint must start with http(s)://: {endpoint}"))
        })?;
    let host = rest.split('/').next().unwrap_or("").trim();
    if host.is_empty() {
        return Err(StoreError::Config(format!("endpoint has no host: {endpoint}")));
    }
    Ok(host.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use chrono::NaiveDateTime;

    use super::{endpoint_host, BlobStore, S3BlobStore, S3Config};
    use crate::error::StoreError;
    use crate::http::build_http_client;
    use crate::sigv4::{authorization, sha256_hex, SigningScope};
    use crate::testing::{fixture_client, HttpFixture};

    fn config() -> S3Config {
        S3Config {
            endpoint: "https://acct123.r2.cloudflarestorage.com/".to_string(),
            access_key: "AKIA".to_string(),
            secret_key: "secret".to_string(),
            region: String::new(),
            bucket: "storybooks".to_string(),
            public_base_url: "https://pub-abc.r2.dev/".to_string(),
        }
    }

    #[test]
    fn endpoint_host_strips_scheme_and_path() -> anyhow::Result<()> {
        assert_eq!(
            endpoint_host("https://acct.r2.cloudflarestorage.com")?,
            "acct.r2.cloudflarestorage.com"
        );
        assert_eq!(endpoint_host("http://localhost:9000/minio")?, "localhost:9000");
        assert!(endpoint_host("acct.r2.cloudflarestorage.com").is_err());
        assert!(endpoint_host("https://").is_err());
        Ok(())
    }

    #[test]
    fn store_normalizes_config_and_builds_urls() -> anyhow::Result<()> {
        let store = S3BlobStore::new(config(), build_http_client(Duration::from_secs(5))?)?;
        assert_eq!(store.config.region, "auto");
        assert_eq!(
            store.canonical_uri("ideogram/Mia_s_Big_Day_/page_3.jpg"),
            "/storybooks/ideogram/Mia_s_Big_Day_/page_3.jpg"
        );
        assert_eq!(
            store.public_url("ideogram/Mia_s_Big_Day_/page_3.jpg"),
            "https://pub-abc.r2.dev/ideogram/Mia_s_Big_Day_/page_3.jpg"
        );
        Ok(())
    }

    #[test]
    fn bare_public_domain_gets_https() -> anyhow::Result<()> {
        let mut cfg = config();
        cfg.public_base_url = "images.example.com".to_string();
        let store = S3BlobStore::new(cfg, build_http_client(Duration::from_secs(5))?)?;
        assert_eq!(store.public_url("k/page_1.jpg"), "https://images.example.com/k/page_1.jpg");
        Ok(())
    }

    #[test]
    fn empty_bucket_is_rejected() -> anyhow::Result<()> {
        let mut cfg = config();
        cfg.bucket = " ".to_string();
        assert!(S3BlobStore::new(cfg, build_http_client(Duration::from_secs(5))?).is_err());
        assert_eq!(
            S3Config::r2_endpoint(" acct "),
            "https://acct.r2.cloudflarestorage.com"
        );
        Ok(())
    }

    fn store_at(fixture: &HttpFixture) -> anyhow::Result<S3BlobStore> {
        let mut cfg = config();
        cfg.endpoint = fixture.base_url().to_string();
        Ok(S3BlobStore::new(cfg, fixture_client()?)?)
    }

    #[test]
    fn put_sends_a_signed_path_style_request() -> anyhow::Result<()> {
        let fixture = HttpFixture::respond(200, "text/plain", b"")?;
        let store = store_at(&fixture)?;
        let bytes = b"\x89PNG page three".to_vec();

        let url = store.put(&bytes, "ideogram/Mia_s_Big_Day_/page_3.png", "image/png")?;
        let request = fixture.request()?;

        assert_eq!(url, "https://pub-abc.r2.dev/ideogram/Mia_s_Big_Day_/page_3.png");
        assert_eq!(request.method, "PUT");
        assert_eq!(request.path, "/storybooks/ideogram/Mia_s_Big_Day_/page_3.png");
        assert_eq!(request.body, bytes);
        assert_eq!(request.header("content-type"), Some("image/png"));
        let payload_hash = sha256_hex(&bytes);
        assert_eq!(request.header("x-amz-content-sha256"), Some(payload_hash.as_str()));

        let amz_date = request.header("x-amz-date").unwrap_or_default().to_string();
        let signed_at = NaiveDateTime::parse_from_str(&amz_date, "%Y%m%dT%H%M%SZ")?.and_utc();
        let mut headers = BTreeMap::new();
        for name in ["content-type", "host", "x-amz-content-sha256", "x-amz-date"] {
            headers.insert(
                name.to_string(),
                request.header(name).unwrap_or_default().to_string(),
            );
        }
        let scope = SigningScope {
            access_key: "AKIA",
            secret_key: "secret",
            region: "auto",
            service: "s3",
        };
        let expected = authorization(
            &scope,
            &signed_at,
            "PUT",
            &request.path,
            "",
            &headers,
            &payload_hash,
        );
        let auth = request.header("authorization").unwrap_or_default();
        assert_eq!(auth, expected);
        assert!(auth.starts_with(&format!(
            "AWS4-HMAC-SHA256 Credential=AKIA/{}/auto/s3/aws4_request,",
            &amz_date[..8]
        )));
        assert!(auth.contains("SignedHeaders=content-type;host;x-amz-content-sha256;x-amz-date,"));
        Ok(())
    }

    #[test]
    fn rejected_put_names_the_key_and_status() -> anyhow::Result<()> {
        let fixture = HttpFixture::respond(403, "application/xml", b"<Error>AccessDenied</Error>")?;
        let store = store_at(&fixture)?;

        let result = store.put(b"img", "ideogram/Fox/page_1.jpg", "image/jpeg");
        fixture.request()?;

        match result {
            Err(StoreError::Status { key, status, body }) => {
                assert_eq!(key, "ideogram/Fox/page_1.jpg");
                assert_eq!(status, 403);
                assert!(body.contains("AccessDenied"));
            }
            other => anyhow::bail!("expected a status error, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn config_debug_hides_the_secret() {
        let shown = format!("{:?}", config());
        assert!(!shown.contains("\"secret\""));
        assert!(shown.contains("<redacted>"));
        assert!(shown.contains("storybooks"));
    }
}
