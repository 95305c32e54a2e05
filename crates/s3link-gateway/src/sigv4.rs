//! AWS Signature Version 4 (header form)
//!
//! Verification for inbound `AWS4-HMAC-SHA256` requests and a signer used by
//! in-process clients.

use crate::error::{ApiError, Result, S3ErrorCode};
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, Uri};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

/// The only supported signing algorithm
pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Payload hash value for unsigned bodies
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// SHA-256 of the empty string
pub const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Largest accepted distance between the request time and the local clock
pub const MAX_CLOCK_SKEW_SECS: i64 = 15 * 60;

/// Timestamp format of `x-amz-date`
pub const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

const X_AMZ_DATE: &str = "x-amz-date";
const X_AMZ_CONTENT_SHA256: &str = "x-amz-content-sha256";

/// Components of a SigV4 `Authorization` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigV4Header {
    pub access_key_id: String,
    /// `YYYYMMDD` from the credential scope
    pub date: String,
    pub region: String,
    pub service: String,
    /// Signed header names, lowercase
    pub signed_headers: Vec<String>,
    pub signature: String,
}

impl SigV4Header {
    /// `date/region/service/aws4_request`
    pub fn scope(&self) -> String {
        format!("{}/{}/{}/aws4_request", self.date, self.region, self.service)
    }
}

fn malformed(message: impl Into<String>) -> ApiError {
    ApiError::s3(S3ErrorCode::InvalidRequest, message)
}

/// Parse `AWS4-HMAC-SHA256 Credential=..., SignedHeaders=..., Signature=...`
pub fn parse_authorization(value: &str) -> Result<SigV4Header> {
    let (algorithm, rest) = value
        .split_once(' ')
        .ok_or_else(|| malformed("malformed Authorization header"))?;
    if algorithm != ALGORITHM {
        return Err(malformed(format!("unsupported signing algorithm {}", algorithm)));
    }

    let mut credential = None;
    let mut signed_headers = None;
    let mut signature = None;
    for part in rest.split(',') {
        let part = part.trim();
        if let Some(v) = part.strip_prefix("Credential=") {
            credential = Some(v);
        } else if let Some(v) = part.strip_prefix("SignedHeaders=") {
            signed_headers = Some(v);
        } else if let Some(v) = part.strip_prefix("Signature=") {
            signature = Some(v);
        }
    }

    let (Some(credential), Some(signed_headers), Some(signature)) =
        (credential, signed_headers, signature)
    else {
        return Err(malformed("Authorization header is missing a component"));
    };

    let scope: Vec<&str> = credential.splitn(5, '/').collect();
    if scope.len() != 5 || scope[4] != "aws4_request" || scope[0].is_empty() {
        return Err(malformed("malformed credential scope"));
    }

    Ok(SigV4Header {
        access_key_id: scope[0].to_string(),
        date: scope[1].to_string(),
        region: scope[2].to_string(),
        service: scope[3].to_string(),
        signed_headers: signed_headers
            .split(';')
            .filter(|h| !h.is_empty())
            .map(|h| h.to_ascii_lowercase())
            .collect(),
        signature: signature.to_string(),
    })
}

fn percent_decode(input: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(input.as_bytes())).into_owned()
}

/// Canonical URI: every segment decoded once and re-encoded, `/` kept
pub fn canonical_uri(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    path.split('/')
        .map(|segment| urlencoding::encode(&percent_decode(segment)).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Canonical query string: pairs encoded and sorted by name, then value
pub fn canonical_query(query: Option<&str>) -> String {
    let Some(query) = query.filter(|q| !q.is_empty()) else {
        return String::new();
    };
    let mut pairs: Vec<(String, String)> = query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            (
                urlencoding::encode(&percent_decode(name)).into_owned(),
                urlencoding::encode(&percent_decode(value)).into_owned(),
            )
        })
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("&")
}

/// Canonical header block (each line newline-terminated)
pub fn canonical_headers(headers: &HeaderMap, uri: &Uri, signed: &[String]) -> Result<String> {
    let mut lines = BTreeMap::new();
    for name in signed {
        let mut values = Vec::new();
        for value in headers.get_all(name.as_str()) {
            let value = value
                .to_str()
                .map_err(|_| malformed(format!("signed header {} is not valid text", name)))?;
            values.push(value.split_whitespace().collect::<Vec<_>>().join(" "));
        }
        if values.is_empty() && name == "host" {
            if let Some(authority) = uri.authority() {
                values.push(authority.as_str().to_string());
            }
        }
        if values.is_empty() {
            return Err(ApiError::s3(
                S3ErrorCode::SignatureDoesNotMatch,
                format!("signed header {} is not present", name),
            ));
        }
        lines.insert(name.as_str(), values.join(","));
    }

    Ok(lines
        .into_iter()
        .map(|(name, value)| format!("{}:{}\n", name, value))
        .collect())
}

/// Build the canonical request
pub fn canonical_request(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    signed: &[String],
    payload_hash: &str,
) -> Result<String> {
    let mut signed_sorted = signed.to_vec();
    signed_sorted.sort();
    Ok(format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method.as_str(),
        canonical_uri(uri.path()),
        canonical_query(uri.query()),
        canonical_headers(headers, uri, &signed_sorted)?,
        signed_sorted.join(";"),
        payload_hash
    ))
}

/// Hex SHA-256
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Build the string to sign
pub fn string_to_sign(timestamp: &str, scope: &str, canonical_request: &str) -> String {
    format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        timestamp,
        scope,
        sha256_hex(canonical_request.as_bytes())
    )
}

fn hmac(key: &[u8], data: &[u8]) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| ApiError::Internal(format!("hmac key: {}", e)))?;
    mac.update(data);
    Ok(mac)
}

/// `AWS4<secret>` → date → region → service → `aws4_request`
pub fn derive_signing_key(secret: &str, date: &str, region: &str, service: &str) -> Result<Vec<u8>> {
    let mut key = format!("AWS4{}", secret).into_bytes();
    for part in [date, region, service, "aws4_request"] {
        key = hmac(&key, part.as_bytes())?.finalize().into_bytes().to_vec();
    }
    Ok(key)
}

/// Hex signature of `string_to_sign`
pub fn compute_signature(signing_key: &[u8], string_to_sign: &str) -> Result<String> {
    Ok(hex::encode(
        hmac(signing_key, string_to_sign.as_bytes())?.finalize().into_bytes(),
    ))
}

/// Compare a provided hex signature in constant time
pub fn verify_signature(signing_key: &[u8], string_to_sign: &str, provided: &str) -> Result<()> {
    let mismatch = || {
        ApiError::s3(
            S3ErrorCode::SignatureDoesNotMatch,
            "The request signature we calculated does not match the signature you provided",
        )
    };
    let provided = hex::decode(provided).map_err(|_| mismatch())?;
    hmac(signing_key, string_to_sign.as_bytes())?
        .verify_slice(&provided)
        .map_err(|_| mismatch())
}

/// Payload hash to sign with, checked against the body when it is a digest
pub fn payload_hash(headers: &HeaderMap, body: &[u8]) -> Result<String> {
    let Some(value) = headers.get(X_AMZ_CONTENT_SHA256) else {
        return Ok(sha256_hex(body));
    };
    let value = value
        .to_str()
        .map_err(|_| malformed("x-amz-content-sha256 is not valid text"))?;

    if value == UNSIGNED_PAYLOAD {
        return Ok(value.to_string());
    }
    if value.starts_with("STREAMING-") {
        return Err(ApiError::s3(
            S3ErrorCode::NotImplemented,
            "streaming signed payloads are not supported",
        ));
    }
    if value.len() != 64 || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ApiError::s3(
            S3ErrorCode::InvalidArgument,
            "x-amz-content-sha256 must be UNSIGNED-PAYLOAD or a SHA-256 hex digest",
        ));
    }
    if !value.eq_ignore_ascii_case(&sha256_hex(body)) {
        return Err(ApiError::s3(
            S3ErrorCode::XAmzContentSHA256Mismatch,
            "The provided 'x-amz-content-sha256' header does not match what was computed",
        ));
    }
    Ok(value.to_ascii_lowercase())
}

/// Request timestamp from `x-amz-date`, falling back to `Date`
pub fn request_time(headers: &HeaderMap) -> Result<(String, DateTime<Utc>)> {
    let missing = || {
        ApiError::s3(
            S3ErrorCode::MissingSecurityHeader,
            "request is missing x-amz-date",
        )
    };

    if let Some(value) = headers.get(X_AMZ_DATE) {
        let text = value.to_str().map_err(|_| missing())?;
        let parsed = NaiveDateTime::parse_from_str(text, AMZ_DATE_FORMAT)
            .map_err(|_| malformed(format!("invalid x-amz-date {}", text)))?;
        return Ok((text.to_string(), Utc.from_utc_datetime(&parsed)));
    }

    let value = headers.get(header::DATE).ok_or_else(missing)?;
    let text = value.to_str().map_err(|_| missing())?;
    let parsed = DateTime::parse_from_rfc2822(text)
        .map_err(|_| malformed(format!("invalid Date header {}", text)))?
        .with_timezone(&Utc);
    Ok((parsed.format(AMZ_DATE_FORMAT).to_string(), parsed))
}

/// Reject requests signed too far from `now`
pub fn check_clock_skew(request_time: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
    if (now - request_time).num_seconds().abs() > MAX_CLOCK_SKEW_SECS {
        return Err(ApiError::s3(
            S3ErrorCode::RequestTimeTooSkewed,
            "The difference between the request time and the current time is too large",
        ));
    }
    Ok(())
}

/// Verify a parsed header against the request it came with
pub fn verify(
    auth: &SigV4Header,
    secret_key: &str,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    payload_hash: &str,
    timestamp: &str,
) -> Result<()> {
    if !timestamp.starts_with(auth.date.as_str()) {
        return Err(ApiError::s3(
            S3ErrorCode::SignatureDoesNotMatch,
            "credential scope date does not match the request date",
        ));
    }
    if !auth.signed_headers.iter().any(|h| h == "host") {
        return Err(ApiError::s3(
            S3ErrorCode::SignatureDoesNotMatch,
            "the host header must be signed",
        ));
    }

    let canonical = canonical_request(method, uri, headers, &auth.signed_headers, payload_hash)?;
    let to_sign = string_to_sign(timestamp, &auth.scope(), &canonical);
    let key = derive_signing_key(secret_key, &auth.date, &auth.region, &auth.service)?;
    verify_signature(&key, &to_sign, &auth.signature).inspect_err(|_| {
        tracing::debug!(canonical_request = %canonical, "signature mismatch");
    })
}

/// Key pair and region used to sign outgoing requests
#[derive(Clone)]
pub struct SigningCredentials {
    pub access_key_id: String,
    pub secret_key: String,
    pub region: String,
}

impl SigningCredentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_key: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_key: secret_key.into(),
            region: region.into(),
        }
    }
}

impl std::fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

/// Sign `request` in place, adding `x-amz-date`, `x-amz-content-sha256` and
/// `Authorization`. Every `x-amz-*` header plus host, content-md5 and
/// content-type are signed.
pub fn sign_request<B: AsRef<[u8]>>(
    request: &mut Request<B>,
    credentials: &SigningCredentials,
    now: DateTime<Utc>,
) -> Result<()> {
    let timestamp = now.format(AMZ_DATE_FORMAT).to_string();
    let date = now.format("%Y%m%d").to_string();
    let payload = sha256_hex(request.body().as_ref());

    if !request.headers().contains_key(header::HOST) {
        let host = request
            .uri()
            .authority()
            .map(|a| a.as_str().to_string())
            .ok_or_else(|| malformed("request has no host to sign"))?;
        let host = HeaderValue::from_str(&host).map_err(|_| malformed("invalid host"))?;
        request.headers_mut().insert(header::HOST, host);
    }
    let headers = request.headers_mut();
    headers.insert(
        X_AMZ_DATE,
        HeaderValue::from_str(&timestamp).map_err(|_| malformed("invalid x-amz-date"))?,
    );
    headers.insert(
        X_AMZ_CONTENT_SHA256,
        HeaderValue::from_str(&payload).map_err(|_| malformed("invalid payload hash"))?,
    );
    headers.remove(header::AUTHORIZATION);

    let mut signed: Vec<String> = request
        .headers()
        .keys()
        .map(|name| name.as_str())
        .filter(|name| {
            name.starts_with("x-amz-") || matches!(*name, "host" | "content-md5" | "content-type")
        })
        .map(str::to_string)
        .collect();
    signed.sort();
    signed.dedup();

    let auth = SigV4Header {
        access_key_id: credentials.access_key_id.clone(),
        date,
        region: credentials.region.clone(),
        service: "s3".to_string(),
        signed_headers: signed,
        signature: String::new(),
    };
    let canonical = canonical_request(
        request.method(),
        request.uri(),
        request.headers(),
        &auth.signed_headers,
        &payload,
    )?;
    let key = derive_signing_key(&credentials.secret_key, &auth.date, &auth.region, &auth.service)?;
    let signature = compute_signature(&key, &string_to_sign(&timestamp, &auth.scope(), &canonical))?;

    let value = format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM,
        auth.access_key_id,
        auth.scope(),
        auth.signed_headers.join(";"),
        signature
    );
    request.headers_mut().insert(
        header::AUTHORIZATION,
        HeaderValue::from_str(&value).map_err(|_| malformed("invalid access key id"))?,
    );
    Ok(())
}
