//! S3 object store over the REST API with Signature Version 4.
//!
//! Works against AWS (virtual-hosted style URLs) and S3-compatible services
//! such as MinIO when an endpoint is configured (path-style URLs).

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use pagecast_config::S3Config;
use pagecast_core::{Error, ObjectStore, ObjectSummary, Result, StoredObject};
use regex::Regex;
use reqwest::{Method, StatusCode};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::debug;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

const SERVICE: &str = "s3";
const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
/// Largest page ListObjectsV2 returns.
const MAX_PAGE: usize = 1000;

/// Static credentials used to sign requests.
#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

pub struct S3ObjectStore {
    client: reqwest::Client,
    bucket: String,
    region: String,
    credentials: Credentials,
    /// Custom endpoint; `None` means AWS virtual-hosted style.
    endpoint: Option<Url>,
}

impl S3ObjectStore {
    pub fn new(config: &S3Config) -> Result<Self> {
        let endpoint = config
            .endpoint
            .as_deref()
            .map(|raw| {
                Url::parse(raw)
                    .map_err(|e| Error::InvalidInput(format!("S3 endpoint {:?}: {}", raw, e)))
            })
            .transpose()?;

        Ok(Self {
            client: reqwest::Client::new(),
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            credentials: Credentials {
                access_key_id: config.access_key_id.clone(),
                secret_access_key: config.secret_access_key.clone(),
                session_token: config.session_token.clone(),
            },
            endpoint,
        })
    }

    /// Origin (`scheme://host[:port]`) and the canonical path prefix for the bucket.
    fn base(&self) -> Result<(Url, String)> {
        match &self.endpoint {
            Some(endpoint) => {
                let mut origin = endpoint.clone();
                origin.set_path("");
                origin.set_query(None);
                Ok((origin, format!("/{}", encode_path(&self.bucket))))
            }
            None => {
                let origin = format!("https://{}.s3.{}.amazonaws.com", self.bucket, self.region);
                let origin = Url::parse(&origin)
                    .map_err(|e| Error::InvalidInput(format!("bucket {:?}: {}", self.bucket, e)))?;
                Ok((origin, String::new()))
            }
        }
    }

    async fn send(
        &self,
        method: Method,
        key: Option<&str>,
        query: &[(&str, String)],
        body: Option<(Bytes, &str)>,
    ) -> Result<reqwest::Response> {
        let (origin, bucket_path) = self.base()?;
        let canonical_uri = match key {
            Some(key) => format!("{}/{}", bucket_path, encode_path(key)),
            None if bucket_path.is_empty() => "/".to_string(),
            None => bucket_path,
        };
        let canonical_query = canonical_query(query);

        let host = match origin.port() {
            Some(port) => format!("{}:{}", origin.host_str().unwrap_or_default(), port),
            None => origin.host_str().unwrap_or_default().to_string(),
        };
        let payload_hash = match &body {
            Some((data, _)) => hex::encode(Sha256::digest(data)),
            None => EMPTY_PAYLOAD_SHA256.to_string(),
        };

        let now = Utc::now();
        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), host);
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.clone());
        headers.insert("x-amz-date".to_string(), amz_date(&now));
        if let Some(token) = &self.credentials.session_token {
            headers.insert("x-amz-security-token".to_string(), token.clone());
        }

        let request = CanonicalRequest {
            method: method.as_str(),
            uri: &canonical_uri,
            query: &canonical_query,
            headers: &headers,
            payload_hash: &payload_hash,
        };
        let authorization = request.authorization(&self.credentials, &self.region, &now);

        let mut url = format!(
            "{}{}",
            origin.as_str().trim_end_matches('/'),
            canonical_uri
        );
        if !canonical_query.is_empty() {
            url.push('?');
            url.push_str(&canonical_query);
        }

        let mut builder = self
            .client
            .request(method, &url)
            .header("authorization", authorization);
        for (name, value) in &headers {
            if name != "host" {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        if let Some((data, content_type)) = body {
            builder = builder.header("content-type", content_type).body(data);
        }

        builder
            .send()
            .await
            .map_err(|e| Error::Storage(format!("request to {} failed: {}", url, e)))
    }

    async fn list_page(
        &self,
        prefix: &str,
        max_keys: usize,
        continuation: Option<&str>,
    ) -> Result<ListPage> {
        let mut query = vec![
            ("list-type", "2".to_string()),
            ("max-keys", max_keys.to_string()),
            ("prefix", prefix.to_string()),
        ];
        if let Some(token) = continuation {
            query.push(("continuation-token", token.to_string()));
        }

        let response = self.send(Method::GET, None, &query, None).await?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Storage(format!("reading list response: {}", e)))?;
        if !status.is_success() {
            return Err(Error::Storage(format!(
                "ListObjectsV2 {} returned {}: {}",
                prefix,
                status,
                error_code(&body)
            )));
        }
        Ok(parse_list_response(&body))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn get(&self, key: &str) -> Result<StoredObject> {
        let response = self.send(Method::GET, Some(key), &[], None).await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("object {}", key)));
        }
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Storage(format!("reading {}: {}", key, e)))?;
        if !status.is_success() {
            return Err(Error::Storage(format!(
                "GetObject {} returned {}: {}",
                key,
                status,
                error_code(&String::from_utf8_lossy(&body))
            )));
        }
        Ok(StoredObject {
            data: body,
            content_type,
        })
    }

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<()> {
        let size = data.len();
        let response = self
            .send(Method::PUT, Some(key), &[], Some((data, content_type)))
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Storage(format!(
                "PutObject {} returned {}: {}",
                key,
                status,
                error_code(&body)
            )));
        }
        debug!(key = %key, bytes = size, "Uploaded object");
        Ok(())
    }

    async fn list(&self, prefix: &str, limit: Option<usize>) -> Result<Vec<ObjectSummary>> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let wanted = limit
                .map(|l| l.saturating_sub(objects.len()).min(MAX_PAGE))
                .unwrap_or(MAX_PAGE);
            if wanted == 0 {
                break;
            }

            let page = self
                .list_page(prefix, wanted, continuation.as_deref())
                .await?;
            objects.extend(page.objects);

            match page.next_token {
                Some(token) if page.truncated => continuation = Some(token),
                _ => break,
            }
        }

        if let Some(limit) = limit {
            objects.truncate(limit);
        }
        Ok(objects)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let response = self.send(Method::DELETE, Some(key), &[], None).await?;
        let status = response.status();
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Storage(format!(
                "DeleteObject {} returned {}: {}",
                key,
                status,
                error_code(&body)
            )));
        }
        Ok(())
    }
}

/// The pieces of a request that SigV4 signs.
struct CanonicalRequest<'a> {
    method: &'a str,
    /// Already URI-encoded path.
    uri: &'a str,
    /// Already encoded and sorted query string.
    query: &'a str,
    /// Lowercase header names to values; all of them are signed.
    headers: &'a BTreeMap<String, String>,
    payload_hash: &'a str,
}

impl CanonicalRequest<'_> {
    fn signed_headers(&self) -> String {
        self.headers.keys().cloned().collect::<Vec<_>>().join(";")
    }

    fn canonical(&self) -> String {
        let headers: String = self
            .headers
            .iter()
            .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
            .collect();
        format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            self.method,
            self.uri,
            self.query,
            headers,
            self.signed_headers(),
            self.payload_hash
        )
    }

    fn string_to_sign(&self, region: &str, now: &DateTime<Utc>) -> String {
        format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date(now),
            scope(region, now),
            hex::encode(Sha256::digest(self.canonical().as_bytes()))
        )
    }

    fn signature(&self, credentials: &Credentials, region: &str, now: &DateTime<Utc>) -> String {
        let key = signing_key(
            &credentials.secret_access_key,
            &now.format("%Y%m%d").to_string(),
            region,
            SERVICE,
        );
        hex::encode(hmac_sha256(&key, self.string_to_sign(region, now).as_bytes()))
    }

    fn authorization(&self, credentials: &Credentials, region: &str, now: &DateTime<Utc>) -> String {
        format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            credentials.access_key_id,
            scope(region, now),
            self.signed_headers(),
            self.signature(credentials, region, now)
        )
    }
}

fn amz_date(now: &DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%SZ").to_string()
}

fn scope(region: &str, now: &DateTime<Utc>) -> String {
    format!("{}/{}/{}/aws4_request", now.format("%Y%m%d"), region, SERVICE)
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length.
    let mut mac = HmacSha256::new_from_slice(key).unwrap();
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode each `/`-separated segment of a key.
fn encode_path(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn canonical_query(params: &[(&str, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| {
            (
                urlencoding::encode(k).into_owned(),
                urlencoding::encode(v).into_owned(),
            )
        })
        .collect();
    encoded.sort();
    encoded
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

#[derive(Debug, Default, PartialEq)]
struct ListPage {
    objects: Vec<ObjectSummary>,
    truncated: bool,
    next_token: Option<String>,
}

static CONTENTS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<Contents>(.*?)</Contents>").unwrap());
static KEY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<Key>(.*?)</Key>").unwrap());
static SIZE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<Size>(\d+)</Size>").unwrap());
static TRUNCATED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<IsTruncated>\s*true\s*</IsTruncated>").unwrap());
static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<NextContinuationToken>(.*?)</NextContinuationToken>").unwrap()
});
static CODE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<Code>(.*?)</Code>").unwrap());

fn parse_list_response(xml: &str) -> ListPage {
    let objects = CONTENTS_RE
        .captures_iter(xml)
        .filter_map(|contents| {
            let body = contents.get(1)?.as_str();
            let key = KEY_RE.captures(body)?.get(1)?.as_str();
            let size = SIZE_RE
                .captures(body)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0);
            Some(ObjectSummary {
                key: unescape_xml(key),
                size,
            })
        })
        .collect();

    ListPage {
        objects,
        truncated: TRUNCATED_RE.is_match(xml),
        next_token: TOKEN_RE
            .captures(xml)
            .and_then(|c| c.get(1))
            .map(|m| unescape_xml(m.as_str())),
    }
}

fn error_code(body: &str) -> String {
    CODE_RE
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "no error code".to_string())
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#13;", "\r")
        .replace("&amp;", "&")
}
