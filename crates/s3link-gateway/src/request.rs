//! Request parsing
//!
//! Turns method, path, query, headers and body into an [`S3Operation`]. The
//! path is taken as received: segments are percent-decoded once and never
//! cleaned, so keys such as `a/../b` or `x//y` survive intact.

use crate::error::{ApiError, Result, S3ErrorCode};
use crate::operation::{
    CompletedPart, Conditions, GetObjectRequest, ListObjectsRequest, ListVersion, S3Operation,
};
use axum::http::{header, request::Parts, HeaderMap, Method};
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use s3link_core::{validate_bucket_name, ObjectKey, PutOptions};
use serde::Deserialize;
use std::collections::BTreeMap;

/// Largest part number S3 accepts
pub const MAX_PART_NUMBER: u32 = 10_000;

/// Keys per DeleteObjects request
pub const MAX_DELETE_KEYS: usize = 1000;

const METADATA_PREFIX: &str = "x-amz-meta-";
const COPY_SOURCE: &str = "x-amz-copy-source";
const METADATA_DIRECTIVE: &str = "x-amz-metadata-directive";

/// Sub-resources outside the supported S3 subset
const UNSUPPORTED_SUBRESOURCES: &[&str] = &[
    "accelerate",
    "acl",
    "analytics",
    "cors",
    "encryption",
    "intelligent-tiering",
    "inventory",
    "legal-hold",
    "lifecycle",
    "logging",
    "metrics",
    "notification",
    "object-lock",
    "ownershipControls",
    "policy",
    "publicAccessBlock",
    "replication",
    "requestPayment",
    "restore",
    "retention",
    "select",
    "tagging",
    "torrent",
    "versioning",
    "versions",
    "website",
];

/// Decoded query parameters
#[derive(Debug, Default)]
struct Query(BTreeMap<String, String>);

impl Query {
    fn parse(raw: Option<&str>) -> Result<Self> {
        let mut params = BTreeMap::new();
        for pair in raw.unwrap_or("").split('&').filter(|p| !p.is_empty()) {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            params.insert(decode(name)?, decode(value)?);
        }
        Ok(Self(params))
    }

    fn has(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    fn owned(&self, name: &str) -> Option<String> {
        self.0.get(name).cloned()
    }

    fn number<T: std::str::FromStr>(&self, name: &str) -> Result<Option<T>> {
        self.get(name)
            .map(|v| {
                v.parse::<T>().map_err(|_| {
                    ApiError::invalid_argument(format!("{} must be a non-negative integer", name))
                })
            })
            .transpose()
    }

    fn unsupported(&self) -> Option<&str> {
        UNSUPPORTED_SUBRESOURCES
            .iter()
            .find(|name| self.has(name))
            .copied()
    }
}

fn decode(raw: &str) -> Result<String> {
    let bytes = urlencoding::decode_binary(raw.as_bytes());
    String::from_utf8(bytes.into_owned()).map_err(|_| {
        ApiError::s3(
            S3ErrorCode::InvalidURI,
            "Couldn't parse the specified URI: not valid UTF-8",
        )
    })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>> {
    headers
        .get(name)
        .map(|v| {
            v.to_str().map_err(|_| {
                ApiError::invalid_argument(format!("header {} is not valid text", name))
            })
        })
        .transpose()
}

/// Decode and validate `Content-MD5`
pub fn content_md5(headers: &HeaderMap) -> Result<Option<Vec<u8>>> {
    let Some(value) = header_str(headers, "content-md5")? else {
        return Ok(None);
    };
    match STANDARD.decode(value.trim()) {
        Ok(digest) if digest.len() == 16 => Ok(Some(digest)),
        _ => Err(ApiError::s3(
            S3ErrorCode::InvalidDigest,
            "The Content-MD5 you specified was invalid",
        )),
    }
}

/// Content type and `x-amz-meta-*` headers
pub fn put_options(headers: &HeaderMap) -> Result<PutOptions> {
    let mut options = PutOptions {
        content_type: header_str(headers, header::CONTENT_TYPE.as_str())?.map(str::to_string),
        ..Default::default()
    };
    for (name, value) in headers {
        if let Some(meta) = name.as_str().strip_prefix(METADATA_PREFIX) {
            let value = value.to_str().map_err(|_| {
                ApiError::invalid_argument(format!("metadata {} is not valid text", meta))
            })?;
            options
                .custom_metadata
                .insert(meta.to_string(), value.to_string());
        }
    }
    Ok(options)
}

fn http_date(headers: &HeaderMap, name: header::HeaderName) -> Option<DateTime<Utc>> {
    // unparseable dates are ignored, as S3 does
    headers
        .get(&name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
        .map(|d| d.with_timezone(&Utc))
}

fn conditions(headers: &HeaderMap) -> Result<Conditions> {
    Ok(Conditions {
        if_match: header_str(headers, header::IF_MATCH.as_str())?.map(str::to_string),
        if_none_match: header_str(headers, header::IF_NONE_MATCH.as_str())?.map(str::to_string),
        if_modified_since: http_date(headers, header::IF_MODIFIED_SINCE),
        if_unmodified_since: http_date(headers, header::IF_UNMODIFIED_SINCE),
    })
}

fn part_number(query: &Query) -> Result<u32> {
    match query.number::<u32>("partNumber") {
        Ok(Some(n)) if (1..=MAX_PART_NUMBER).contains(&n) => Ok(n),
        _ => Err(ApiError::invalid_argument(
            "Part number must be an integer between 1 and 10000, inclusive",
        )),
    }
}

fn upload_id(query: &Query) -> Result<String> {
    match query.get("uploadId") {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(ApiError::invalid_argument("uploadId must not be empty")),
    }
}

fn copy_source(value: &str) -> Result<ObjectKey> {
    let value = value.strip_prefix('/').unwrap_or(value);
    let (path, version) = match value.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (value, None),
    };
    if version.is_some_and(|q| q.starts_with("versionId=")) {
        return Err(ApiError::s3(
            S3ErrorCode::NotImplemented,
            "copying a specific version is not supported",
        ));
    }
    let decoded = decode(path)?;
    let (bucket, key) = decoded.split_once('/').ok_or_else(|| {
        ApiError::invalid_argument("Copy Source must mention the source bucket and key")
    })?;
    Ok(ObjectKey::new(bucket, key)?)
}

#[derive(Deserialize)]
struct DeleteXml {
    #[serde(rename = "Quiet", default)]
    quiet: bool,
    #[serde(rename = "Object", default)]
    objects: Vec<DeleteObjectXml>,
}

#[derive(Deserialize)]
struct DeleteObjectXml {
    #[serde(rename = "Key")]
    key: String,
}

#[derive(Deserialize)]
struct CompleteXml {
    #[serde(rename = "Part", default)]
    parts: Vec<CompletePartXml>,
}

#[derive(Deserialize)]
struct CompletePartXml {
    #[serde(rename = "PartNumber")]
    part_number: u32,
    #[serde(rename = "ETag")]
    etag: String,
}

fn xml_body<'de, T: Deserialize<'de>>(body: &'de [u8]) -> Result<T> {
    let malformed = || {
        ApiError::s3(
            S3ErrorCode::MalformedXML,
            "The XML you provided was not well-formed or did not validate against our published schema",
        )
    };
    let text = std::str::from_utf8(body).map_err(|_| malformed())?;
    quick_xml::de::from_str(text).map_err(|e| {
        tracing::debug!(error = %e, "XML body rejected");
        malformed()
    })
}

/// Parses raw requests into operations
#[derive(Clone, Debug)]
pub struct RequestParser {
    domains: Vec<String>,
}

impl RequestParser {
    /// `domains` enable virtual-hosted-style addressing (`bucket.domain`)
    pub fn new(domains: Vec<String>) -> Self {
        Self {
            domains: domains
                .into_iter()
                .map(|d| d.trim_matches('.').to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
        }
    }

    /// Bucket named by the `Host` header, if it is a subdomain of a configured domain
    fn virtual_host_bucket(&self, parts: &Parts) -> Option<String> {
        let host = parts
            .headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| parts.uri.host())?;
        let host = match host.rsplit_once(':') {
            Some((name, port)) if port.bytes().all(|b| b.is_ascii_digit()) => name,
            _ => host,
        };
        let host = host.to_ascii_lowercase();
        self.domains.iter().find_map(|domain| {
            host.strip_suffix(domain.as_str())
                .and_then(|rest| rest.strip_suffix('.'))
                .filter(|bucket| !bucket.is_empty())
                .map(str::to_string)
        })
    }

    /// Split the raw path into bucket and key
    fn locate(&self, parts: &Parts) -> Result<(Option<String>, Option<String>)> {
        let raw = parts.uri.path();
        let path = raw.strip_prefix('/').unwrap_or(raw);

        let (bucket, key) = match self.virtual_host_bucket(parts) {
            Some(bucket) => (bucket, decode(path)?),
            None => {
                let (bucket, key) = path.split_once('/').unwrap_or((path, ""));
                (decode(bucket)?, decode(key)?)
            }
        };
        Ok((
            Some(bucket).filter(|b| !b.is_empty()),
            Some(key).filter(|k| !k.is_empty()),
        ))
    }

    /// Parse a request into an operation
    pub fn parse(&self, parts: &Parts, body: Bytes) -> Result<S3Operation> {
        let query = Query::parse(parts.uri.query())?;
        if let Some(name) = query.unsupported() {
            return Err(ApiError::s3(
                S3ErrorCode::NotImplemented,
                format!("the {} sub-resource is not implemented", name),
            ));
        }

        match self.locate(parts)? {
            (None, _) => match parts.method {
                Method::GET => Ok(S3Operation::ListBuckets),
                _ => Err(method_not_allowed()),
            },
            (Some(bucket), None) => {
                validate_bucket_name(&bucket)?;
                parse_bucket(&parts.method, bucket, &query, &body)
            }
            (Some(bucket), Some(key)) => {
                let key = ObjectKey::new(bucket, key)?;
                parse_object(parts, key, &query, body)
            }
        }
    }
}

fn method_not_allowed() -> ApiError {
    ApiError::s3(
        S3ErrorCode::MethodNotAllowed,
        "The specified method is not allowed against this resource",
    )
}

fn parse_bucket(method: &Method, bucket: String, query: &Query, body: &[u8]) -> Result<S3Operation> {
    match *method {
        Method::PUT => Ok(S3Operation::CreateBucket { bucket }),
        Method::DELETE => Ok(S3Operation::DeleteBucket { bucket }),
        Method::HEAD => Ok(S3Operation::HeadBucket { bucket }),
        Method::GET if query.has("location") => Ok(S3Operation::GetBucketLocation { bucket }),
        Method::GET if query.has("uploads") => Ok(S3Operation::ListMultipartUploads {
            bucket,
            prefix: query.owned("prefix").unwrap_or_default(),
            max_uploads: query.number("max-uploads")?,
        }),
        Method::GET => parse_list(bucket, query).map(S3Operation::ListObjects),
        Method::POST if query.has("delete") => {
            let request: DeleteXml = xml_body(body)?;
            if request.objects.is_empty() || request.objects.len() > MAX_DELETE_KEYS {
                return Err(ApiError::s3(
                    S3ErrorCode::MalformedXML,
                    "DeleteObjects takes between 1 and 1000 keys",
                ));
            }
            Ok(S3Operation::DeleteObjects {
                bucket,
                keys: request.objects.into_iter().map(|o| o.key).collect(),
                quiet: request.quiet,
            })
        }
        _ => Err(method_not_allowed()),
    }
}

fn parse_list(bucket: String, query: &Query) -> Result<ListObjectsRequest> {
    let version = match query.get("list-type") {
        None => ListVersion::V1 {
            marker: query.owned("marker").filter(|m| !m.is_empty()),
        },
        Some("2") => ListVersion::V2 {
            continuation_token: query.owned("continuation-token").filter(|t| !t.is_empty()),
            start_after: query.owned("start-after").filter(|s| !s.is_empty()),
            fetch_owner: query.get("fetch-owner") == Some("true"),
        },
        Some(other) => {
            return Err(ApiError::invalid_argument(format!(
                "unsupported list-type {}",
                other
            )))
        }
    };
    let url_encoding = match query.get("encoding-type") {
        None => false,
        Some(value) if value.eq_ignore_ascii_case("url") => true,
        Some(_) => return Err(ApiError::invalid_argument("Invalid Encoding Method specified in Request")),
    };

    Ok(ListObjectsRequest {
        bucket,
        version,
        prefix: query.owned("prefix").unwrap_or_default(),
        delimiter: query.owned("delimiter").filter(|d| !d.is_empty()),
        max_keys: query.number("max-keys")?,
        url_encoding,
        include_metadata: query.get("metadata") == Some("true"),
    })
}

fn parse_object(parts: &Parts, key: ObjectKey, query: &Query, body: Bytes) -> Result<S3Operation> {
    let headers = &parts.headers;
    match parts.method {
        Method::GET if query.has("uploadId") => Ok(S3Operation::ListParts {
            key,
            upload_id: upload_id(query)?,
            part_number_marker: query.number("part-number-marker")?.unwrap_or(0),
            max_parts: query.number("max-parts")?,
        }),
        Method::GET | Method::HEAD => {
            let request = GetObjectRequest {
                key,
                range: header_str(headers, header::RANGE.as_str())?.map(str::to_string),
                conditions: conditions(headers)?,
            };
            Ok(if parts.method == Method::GET {
                S3Operation::GetObject(request)
            } else {
                S3Operation::HeadObject(request)
            })
        }
        Method::PUT if query.has("partNumber") || query.has("uploadId") => {
            if headers.contains_key(COPY_SOURCE) {
                return Err(ApiError::s3(
                    S3ErrorCode::NotImplemented,
                    "UploadPartCopy is not implemented",
                ));
            }
            Ok(S3Operation::UploadPart {
                upload_id: upload_id(query)?,
                part_number: part_number(query)?,
                content_md5: content_md5(headers)?,
                key,
                body,
            })
        }
        Method::PUT if headers.contains_key(COPY_SOURCE) => {
            let source = header_str(headers, COPY_SOURCE)?.unwrap_or_default();
            let replace = match header_str(headers, METADATA_DIRECTIVE)? {
                None | Some("COPY") => None,
                Some("REPLACE") => Some(put_options(headers)?),
                Some(other) => {
                    return Err(ApiError::invalid_argument(format!(
                        "Unknown metadata directive {}",
                        other
                    )))
                }
            };
            Ok(S3Operation::CopyObject {
                source: copy_source(source)?,
                destination: key,
                replace,
            })
        }
        Method::PUT => Ok(S3Operation::PutObject {
            content_md5: content_md5(headers)?,
            options: put_options(headers)?,
            key,
            body,
        }),
        Method::DELETE if query.has("uploadId") => Ok(S3Operation::AbortMultipartUpload {
            key,
            upload_id: upload_id(query)?,
        }),
        Method::DELETE => Ok(S3Operation::DeleteObject { key }),
        Method::POST if query.has("uploads") => Ok(S3Operation::InitiateMultipartUpload {
            options: put_options(headers)?,
            key,
        }),
        Method::POST if query.has("uploadId") => {
            let request: CompleteXml = xml_body(&body)?;
            if request.parts.is_empty() {
                return Err(ApiError::s3(
                    S3ErrorCode::MalformedXML,
                    "You must specify at least one part",
                ));
            }
            Ok(S3Operation::CompleteMultipartUpload {
                upload_id: upload_id(query)?,
                parts: request
                    .parts
                    .into_iter()
                    .map(|p| CompletedPart {
                        part_number: p.part_number,
                        etag: p.etag.trim().trim_matches('"').to_string(),
                    })
                    .collect(),
                key,
            })
        }
        _ => Err(method_not_allowed()),
    }
}
