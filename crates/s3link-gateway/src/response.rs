//! Response encoding
//!
//! Maps operation results and errors onto S3 status codes, headers and bodies.

use crate::error::ApiError;
use crate::operation::S3Output;
use crate::xml;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Response, StatusCode};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use s3link_core::ObjectMetadata;
use uuid::Uuid;

/// Header carrying the request id
pub const REQUEST_ID_HEADER: &str = "x-amz-request-id";

/// Header repeating the error code, for HEAD responses without a body
pub const ERROR_CODE_HEADER: &str = "x-amz-error-code";

const DEFAULT_CONTENT_TYPE: &str = "binary/octet-stream";

/// 16 upper-case hex characters, like S3 request ids
pub fn new_request_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(16);
    id.to_ascii_uppercase()
}

/// RFC 7231 date used by `Last-Modified`
pub fn http_date(ts: &DateTime<Utc>) -> String {
    ts.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn set(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => tracing::debug!(header = %name, "dropping header with unencodable value"),
    }
}

fn build(status: StatusCode, body: Bytes, request_id: &str) -> Response<Bytes> {
    let length = body.len();
    let mut response = Response::new(body);
    *response.status_mut() = status;
    let headers = response.headers_mut();
    set(headers, HeaderName::from_static(REQUEST_ID_HEADER), request_id);
    set(headers, header::CONTENT_LENGTH, &length.to_string());
    response
}

fn xml_response(body: String, request_id: &str) -> Response<Bytes> {
    let mut response = build(StatusCode::OK, Bytes::from(body), request_id);
    set(response.headers_mut(), header::CONTENT_TYPE, "application/xml");
    response
}

fn object_headers(headers: &mut HeaderMap, metadata: &ObjectMetadata, with_content_type: bool) {
    set(headers, header::ETAG, &metadata.quoted_etag());
    set(headers, header::LAST_MODIFIED, &http_date(&metadata.last_modified));
    set(headers, header::ACCEPT_RANGES, "bytes");
    if with_content_type {
        set(
            headers,
            header::CONTENT_TYPE,
            metadata.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE),
        );
    }
    for (name, value) in &metadata.custom_metadata {
        if let Ok(name) = HeaderName::from_bytes(format!("x-amz-meta-{}", name).as_bytes()) {
            set(headers, name, value);
        }
    }
}

/// Encode an error. HEAD responses carry the code in a header only.
pub fn error_response(err: &ApiError, request_id: &str, is_head: bool) -> Response<Bytes> {
    let code = err.error_code();
    let body = if is_head {
        Bytes::new()
    } else {
        Bytes::from(xml::error(
            code.as_str(),
            &err.public_message(),
            err.resource().as_deref(),
            request_id,
        ))
    };

    let mut response = build(code.status_code(), body, request_id);
    let headers = response.headers_mut();
    set(headers, header::CONTENT_TYPE, "application/xml");
    set(headers, HeaderName::from_static(ERROR_CODE_HEADER), code.as_str());
    response
}

/// Encode a successful result
pub fn success_response(output: S3Output, request_id: &str) -> Response<Bytes> {
    match output {
        S3Output::Buckets(buckets) => xml_response(xml::list_buckets(&buckets), request_id),
        S3Output::BucketCreated { bucket } => {
            let mut response = build(StatusCode::OK, Bytes::new(), request_id);
            set(response.headers_mut(), header::LOCATION, &format!("/{}", bucket));
            response
        }
        S3Output::Empty => build(StatusCode::OK, Bytes::new(), request_id),
        S3Output::NoContent => {
            let mut response = build(StatusCode::NO_CONTENT, Bytes::new(), request_id);
            response.headers_mut().remove(header::CONTENT_LENGTH);
            response
        }
        S3Output::Location { region } => xml_response(xml::location(&region), request_id),
        S3Output::ObjectList(listing) => xml_response(xml::list_objects(&listing), request_id),
        S3Output::Object {
            metadata,
            body,
            range,
        } => {
            let status = if range.is_some() {
                StatusCode::PARTIAL_CONTENT
            } else {
                StatusCode::OK
            };
            let mut response = build(status, body, request_id);
            let headers = response.headers_mut();
            object_headers(headers, &metadata, true);
            if let Some((start, end)) = range {
                set(
                    headers,
                    header::CONTENT_RANGE,
                    &format!("bytes {}-{}/{}", start, end, metadata.size),
                );
            }
            response
        }
        S3Output::ObjectHead { metadata } => {
            let mut response = build(StatusCode::OK, Bytes::new(), request_id);
            let headers = response.headers_mut();
            object_headers(headers, &metadata, true);
            set(headers, header::CONTENT_LENGTH, &metadata.size.to_string());
            response
        }
        S3Output::NotModified { metadata } => {
            let mut response = build(StatusCode::NOT_MODIFIED, Bytes::new(), request_id);
            let headers = response.headers_mut();
            headers.remove(header::CONTENT_LENGTH);
            object_headers(headers, &metadata, false);
            response
        }
        S3Output::Stored { metadata } => {
            let mut response = build(StatusCode::OK, Bytes::new(), request_id);
            set(response.headers_mut(), header::ETAG, &metadata.quoted_etag());
            response
        }
        S3Output::Copied { metadata } => xml_response(xml::copy_object(&metadata), request_id),
        S3Output::Deleted(result) => xml_response(xml::delete_result(&result), request_id),
        S3Output::UploadInitiated { key, upload_id } => {
            xml_response(xml::initiate_multipart(&key, &upload_id), request_id)
        }
        S3Output::PartStored { etag } => {
            let mut response = build(StatusCode::OK, Bytes::new(), request_id);
            set(response.headers_mut(), header::ETAG, &format!("\"{}\"", etag));
            response
        }
        S3Output::UploadCompleted { key, metadata } => {
            let location = format!("/{}/{}", key.bucket, urlencoding::encode(&key.key));
            xml_response(xml::complete_multipart(&location, &key, &metadata), request_id)
        }
        S3Output::Parts(listing) => xml_response(xml::list_parts(&listing), request_id),
        S3Output::Uploads(listing) => xml_response(xml::list_uploads(&listing), request_id),
    }
}

/// Encode a result or an error. No failure is ever answered with a 2xx.
pub fn encode(result: Result<S3Output, ApiError>, request_id: &str, is_head: bool) -> Response<Bytes> {
    match result {
        Ok(output) => {
            let mut response = success_response(output, request_id);
            if is_head {
                *response.body_mut() = Bytes::new();
            }
            response
        }
        Err(err) => error_response(&err, request_id, is_head),
    }
}
