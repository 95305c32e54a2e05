//! S3 XML response bodies
//!
//! Bodies are assembled in a fixed element order from already-sorted data, so
//! the same input always yields the same bytes.

use crate::operation::{DeleteResult, ListVersion, ObjectListing, PartsListing, UploadsListing};
use chrono::{DateTime, Utc};
use quick_xml::escape::escape;
use s3link_core::{BucketInfo, ObjectKey, ObjectMetadata};
use std::borrow::Cow;

/// S3 XML namespace
pub const S3_NAMESPACE: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

/// Owner reported for every bucket and object
pub const OWNER_ID: &str = "s3link";

const DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// ISO 8601 with milliseconds, as S3 formats listing timestamps
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Small builder over a `String`
struct XmlWriter {
    out: String,
}

impl XmlWriter {
    fn document(root: &str) -> Self {
        let mut out = String::with_capacity(512);
        out.push_str(DECLARATION);
        out.push('\n');
        out.push_str(&format!("<{} xmlns=\"{}\">", root, S3_NAMESPACE));
        Self { out }
    }

    fn open(&mut self, name: &str) -> &mut Self {
        self.out.push('<');
        self.out.push_str(name);
        self.out.push('>');
        self
    }

    fn close(&mut self, name: &str) -> &mut Self {
        self.out.push_str("</");
        self.out.push_str(name);
        self.out.push('>');
        self
    }

    fn text(&mut self, name: &str, value: &str) -> &mut Self {
        self.open(name);
        self.out.push_str(&escape(value));
        self.close(name)
    }

    fn opt(&mut self, name: &str, value: Option<&str>) -> &mut Self {
        if let Some(value) = value {
            self.text(name, value);
        }
        self
    }

    fn display(&mut self, name: &str, value: impl std::fmt::Display) -> &mut Self {
        self.text(name, &value.to_string())
    }

    fn owner(&mut self) -> &mut Self {
        self.open("Owner")
            .text("ID", OWNER_ID)
            .text("DisplayName", OWNER_ID)
            .close("Owner")
    }

    fn finish(mut self, root: &str) -> String {
        self.close(root);
        self.out
    }
}

/// ListAllMyBucketsResult
pub fn list_buckets(buckets: &[BucketInfo]) -> String {
    let mut w = XmlWriter::document("ListAllMyBucketsResult");
    w.owner().open("Buckets");
    for bucket in buckets {
        w.open("Bucket")
            .text("Name", &bucket.name)
            .text("CreationDate", &format_timestamp(&bucket.created_at))
            .close("Bucket");
    }
    w.close("Buckets");
    w.finish("ListAllMyBucketsResult")
}

/// LocationConstraint; `us-east-1` is reported as empty, as S3 does
pub fn location(region: &str) -> String {
    let region = if region == "us-east-1" { "" } else { region };
    format!(
        "{}\n<LocationConstraint xmlns=\"{}\">{}</LocationConstraint>",
        DECLARATION,
        S3_NAMESPACE,
        escape(region)
    )
}

/// Metadata names usable as element names
fn is_element_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.')
}

/// `owner-name` → `X-Amz-Meta-Owner-Name`
fn metadata_element(name: &str) -> String {
    let mut element = String::from("X-Amz-Meta");
    for word in name.split('-') {
        element.push('-');
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            element.extend(first.to_uppercase());
            element.push_str(chars.as_str());
        }
    }
    element
}

/// ListBucketResult for V1 and V2
pub fn list_objects(listing: &ObjectListing) -> String {
    let req = &listing.request;
    let page = &listing.page;
    let encode = |value: &str| -> String {
        if req.url_encoding {
            urlencoding::encode(value).into_owned()
        } else {
            value.to_string()
        }
    };

    let mut w = XmlWriter::document("ListBucketResult");
    w.text("Name", &req.bucket).text("Prefix", &encode(&req.prefix));

    let fetch_owner = match &req.version {
        ListVersion::V1 { marker } => {
            w.text("Marker", &encode(marker.as_deref().unwrap_or("")));
            if page.is_truncated {
                w.opt("NextMarker", page.next_marker.as_deref().map(encode).as_deref());
            }
            true
        }
        ListVersion::V2 {
            continuation_token,
            start_after,
            fetch_owner,
        } => {
            w.display("KeyCount", page.len());
            w.opt("ContinuationToken", continuation_token.as_deref());
            w.opt("NextContinuationToken", page.next_continuation_token().as_deref());
            w.opt("StartAfter", start_after.as_deref().map(encode).as_deref());
            *fetch_owner
        }
    };

    w.display("MaxKeys", listing.max_keys)
        .opt("Delimiter", req.delimiter.as_deref().map(encode).as_deref())
        .display("IsTruncated", page.is_truncated);
    if req.url_encoding {
        w.text("EncodingType", "url");
    }

    for entry in &page.entries {
        w.open("Contents")
            .text("Key", &encode(&entry.key))
            .text("LastModified", &format_timestamp(&entry.last_modified))
            .text("ETag", &entry.quoted_etag())
            .display("Size", entry.size);
        if fetch_owner {
            w.owner();
        }
        w.text("StorageClass", "STANDARD");
        if listing.include_metadata {
            user_metadata(&mut w, entry);
        }
        w.close("Contents");
    }
    for prefix in &page.common_prefixes {
        w.open("CommonPrefixes")
            .text("Prefix", &encode(prefix))
            .close("CommonPrefixes");
    }
    w.finish("ListBucketResult")
}

fn user_metadata(w: &mut XmlWriter, entry: &ObjectMetadata) {
    w.open("UserMetadata");
    for (name, value) in &entry.custom_metadata {
        if is_element_name(name) {
            w.text(&metadata_element(name), value);
        }
    }
    w.opt("content-type", entry.content_type.as_deref());
    w.close("UserMetadata");
}

/// CopyObjectResult
pub fn copy_object(metadata: &ObjectMetadata) -> String {
    let mut w = XmlWriter::document("CopyObjectResult");
    w.text("LastModified", &format_timestamp(&metadata.last_modified))
        .text("ETag", &metadata.quoted_etag());
    w.finish("CopyObjectResult")
}

/// InitiateMultipartUploadResult
pub fn initiate_multipart(key: &ObjectKey, upload_id: &str) -> String {
    let mut w = XmlWriter::document("InitiateMultipartUploadResult");
    w.text("Bucket", &key.bucket)
        .text("Key", &key.key)
        .text("UploadId", upload_id);
    w.finish("InitiateMultipartUploadResult")
}

/// CompleteMultipartUploadResult
pub fn complete_multipart(location: &str, key: &ObjectKey, metadata: &ObjectMetadata) -> String {
    let mut w = XmlWriter::document("CompleteMultipartUploadResult");
    w.text("Location", location)
        .text("Bucket", &key.bucket)
        .text("Key", &key.key)
        .text("ETag", &metadata.quoted_etag());
    w.finish("CompleteMultipartUploadResult")
}

/// ListPartsResult
pub fn list_parts(listing: &PartsListing) -> String {
    let mut w = XmlWriter::document("ListPartsResult");
    w.text("Bucket", &listing.key.bucket)
        .text("Key", &listing.key.key)
        .text("UploadId", &listing.upload_id)
        .open("Initiator")
        .text("ID", &listing.owner)
        .text("DisplayName", &listing.owner)
        .close("Initiator")
        .owner()
        .text("StorageClass", "STANDARD")
        .display("PartNumberMarker", listing.part_number_marker);
    if let Some(next) = listing.next_part_number_marker() {
        w.display("NextPartNumberMarker", next);
    }
    w.display("MaxParts", listing.max_parts)
        .display("IsTruncated", listing.is_truncated);
    for part in &listing.parts {
        w.open("Part")
            .display("PartNumber", part.part_number)
            .text("LastModified", &format_timestamp(&part.last_modified))
            .text("ETag", &format!("\"{}\"", part.etag))
            .display("Size", part.size)
            .close("Part");
    }
    w.finish("ListPartsResult")
}

/// ListMultipartUploadsResult
pub fn list_uploads(listing: &UploadsListing) -> String {
    let mut w = XmlWriter::document("ListMultipartUploadsResult");
    w.text("Bucket", &listing.bucket)
        .text("KeyMarker", "")
        .text("UploadIdMarker", "")
        .text("Prefix", &listing.prefix)
        .display("MaxUploads", listing.max_uploads)
        .display("IsTruncated", listing.is_truncated);
    if listing.is_truncated {
        if let Some(last) = listing.uploads.last() {
            w.text("NextKeyMarker", &last.key)
                .text("NextUploadIdMarker", &last.upload_id);
        }
    }
    for upload in &listing.uploads {
        w.open("Upload")
            .text("Key", &upload.key)
            .text("UploadId", &upload.upload_id)
            .open("Initiator")
            .text("ID", &upload.owner)
            .text("DisplayName", &upload.owner)
            .close("Initiator")
            .owner()
            .text("StorageClass", "STANDARD")
            .text("Initiated", &format_timestamp(&upload.initiated_at))
            .close("Upload");
    }
    w.finish("ListMultipartUploadsResult")
}

/// DeleteResult; quiet mode lists only failures
pub fn delete_result(result: &DeleteResult) -> String {
    let mut w = XmlWriter::document("DeleteResult");
    if !result.quiet {
        for key in &result.deleted {
            w.open("Deleted").text("Key", key).close("Deleted");
        }
    }
    for failure in &result.errors {
        w.open("Error")
            .text("Key", &failure.key)
            .text("Code", failure.code)
            .text("Message", &failure.message)
            .close("Error");
    }
    w.finish("DeleteResult")
}

/// Error body
pub fn error(code: &str, message: &str, resource: Option<&str>, request_id: &str) -> String {
    let mut out = String::with_capacity(256);
    out.push_str(DECLARATION);
    out.push('\n');
    let mut w = XmlWriter { out };
    w.open("Error").text("Code", code).text("Message", message);
    w.opt("Resource", resource).text("RequestId", request_id);
    w.finish("Error")
}

/// Text of the first `<name>` element, unescaped
pub fn first_element<'a>(xml: &'a str, name: &str) -> Option<Cow<'a, str>> {
    let open = format!("<{}>", name);
    let close = format!("</{}>", name);
    let start = xml.find(&open)? + open.len();
    let end = start + xml[start..].find(&close)?;
    quick_xml::escape::unescape(&xml[start..end]).ok()
}
