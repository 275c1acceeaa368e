// src/io/mqtt/presign.rs
//
// AWS Signature Version 4 query-string presigning for the AWS IoT websocket
// endpoint. The resulting URL authorizes one connection until it expires.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::PresignError;
use crate::settings::AwsSettings;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SIGNED_HEADERS: &str = "host";
const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const SCOPE_DATE_FORMAT: &str = "%Y%m%d";

// ============================================================================
// Types
// ============================================================================

/// Signed URL to open the transport against
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub url: Url,
    pub expires_at: DateTime<Utc>,
}

/// Produces a fresh connection target; called on every (re)connect
pub trait Authorize: Send + Sync {
    fn authorize(&self) -> Result<ConnectionTarget, PresignError>;
}

/// Static credentials used for signing
#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

// ============================================================================
// Presigner
// ============================================================================

#[derive(Clone)]
pub struct Presigner {
    endpoint: Url,
    host: String,
    region: String,
    service: String,
    expires: Duration,
    credentials: Credentials,
}

impl Presigner {
    pub fn new(
        endpoint: Url,
        region: impl Into<String>,
        service: impl Into<String>,
        expires: Duration,
        credentials: Credentials,
    ) -> Result<Self, PresignError> {
        let host = match (endpoint.host_str(), endpoint.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(PresignError::MissingHost(endpoint.to_string())),
        };
        Ok(Self {
            endpoint,
            host,
            region: region.into(),
            service: service.into(),
            expires,
            credentials,
        })
    }

    pub fn from_settings(settings: &AwsSettings) -> Result<Self, PresignError> {
        Self::new(
            settings.endpoint.clone(),
            settings.region.clone(),
            settings.service_name.clone(),
            settings.mqtt.signed_request_expires,
            Credentials {
                access_key_id: settings.access_key_id.clone(),
                secret_access_key: settings.secret_access_key.clone(),
            },
        )
    }

    /// Presign `GET <endpoint>` as of `now`
    pub fn presign_at(&self, now: DateTime<Utc>) -> Result<ConnectionTarget, PresignError> {
        let amz_date = now.format(AMZ_DATE_FORMAT).to_string();
        let scope_date = now.format(SCOPE_DATE_FORMAT).to_string();
        let scope = format!("{}/{}/{}/aws4_request", scope_date, self.region, self.service);

        let mut query: Vec<(String, String)> = self
            .endpoint
            .query_pairs()
            .map(|(k, v)| (uri_encode(&k), uri_encode(&v)))
            .collect();
        let signing_params = [
            ("X-Amz-Algorithm", ALGORITHM.to_string()),
            (
                "X-Amz-Credential",
                format!("{}/{}", self.credentials.access_key_id, scope),
            ),
            ("X-Amz-Date", amz_date.clone()),
            ("X-Amz-Expires", self.expires.as_secs().to_string()),
            ("X-Amz-SignedHeaders", SIGNED_HEADERS.to_string()),
        ];
        query.extend(
            signing_params
                .iter()
                .map(|(k, v)| (uri_encode(k), uri_encode(v))),
        );
        query.sort();
        let canonical_query = join_query(&query);

        let path = match self.endpoint.path() {
            "" => "/",
            path => path,
        };
        let canonical_request = format!(
            "GET\n{}\n{}\nhost:{}\n\n{}\n{}",
            path,
            canonical_query,
            self.host,
            SIGNED_HEADERS,
            hex::encode(Sha256::digest(b"")),
        );
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes())),
        );

        let key = signing_key(
            &self.credentials.secret_access_key,
            &scope_date,
            &self.region,
            &self.service,
        )?;
        let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?);

        let mut url = self.endpoint.clone();
        url.set_query(Some(&format!(
            "{}&X-Amz-Signature={}",
            canonical_query, signature
        )));

        let expires_at = now
            + chrono::Duration::from_std(self.expires).unwrap_or_else(|_| chrono::Duration::zero());
        Ok(ConnectionTarget { url, expires_at })
    }
}

impl Authorize for Presigner {
    fn authorize(&self) -> Result<ConnectionTarget, PresignError> {
        self.presign_at(Utc::now())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn signing_key(
    secret: &str,
    date: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, PresignError> {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, PresignError> {
    let mut mac = HmacSha256::new_from_slice(key)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn join_query(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// RFC 3986 encoding: everything but unreserved characters is escaped
fn uri_encode(input: &str) -> String {
    urlencoding::encode(input).into_owned()
}
