//! Listing over a sorted bucket index
//!
//! Keys are walked in lexicographic order starting after the marker (the
//! decoded continuation token or `start-after`). With a delimiter, keys that
//! share the part of their suffix up to the delimiter collapse into one
//! common prefix; the walk then jumps straight past that group instead of
//! visiting every key in it.

use crate::error::{BackendError, Result};
use crate::metadata::ObjectMetadata;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::collections::BTreeMap;
use std::ops::Bound;

/// Parameters of one list call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListQuery {
    pub prefix: String,
    pub delimiter: Option<String>,
    pub max_keys: usize,
    pub start_after: Option<String>,
    pub continuation_token: Option<String>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            delimiter: None,
            max_keys: crate::DEFAULT_MAX_KEYS,
            start_after: None,
            continuation_token: None,
        }
    }
}

impl ListQuery {
    /// Query for everything under a prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Default::default()
        }
    }

    pub fn delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = Some(delimiter.into());
        self
    }

    pub fn max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys;
        self
    }

    pub fn continuation_token(mut self, token: Option<String>) -> Self {
        self.continuation_token = token;
        self
    }

    /// Key to resume after; a continuation token wins over `start_after`
    pub fn marker(&self) -> Result<Option<String>> {
        match &self.continuation_token {
            Some(token) => decode_continuation_token(token).map(Some),
            None => Ok(self.start_after.clone()),
        }
    }
}

/// One page of listing results
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListPage {
    /// Objects in key order
    pub entries: Vec<ObjectMetadata>,
    /// Grouped prefixes in order
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    /// Last key or common prefix returned, set when truncated
    pub next_marker: Option<String>,
}

impl ListPage {
    /// Entries plus common prefixes; never exceeds the query's `max_keys`
    pub fn len(&self) -> usize {
        self.entries.len() + self.common_prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Opaque token for the next page
    pub fn next_continuation_token(&self) -> Option<String> {
        self.next_marker.as_deref().map(encode_continuation_token)
    }
}

/// Encode a resume marker as an opaque token
pub fn encode_continuation_token(marker: &str) -> String {
    URL_SAFE_NO_PAD.encode(marker.as_bytes())
}

/// Decode a token produced by [`encode_continuation_token`]
pub fn decode_continuation_token(token: &str) -> Result<String> {
    let raw = URL_SAFE_NO_PAD
        .decode(token.as_bytes())
        .map_err(|_| BackendError::InvalidContinuationToken)?;
    String::from_utf8(raw).map_err(|_| BackendError::InvalidContinuationToken)
}

/// Produce one page from a sorted index
///
/// `scan_limit` bounds how many index entries the walk may touch; hitting
/// it ends the page early as truncated.
pub(crate) fn list_index(
    objects: &BTreeMap<String, ObjectMetadata>,
    query: &ListQuery,
    scan_limit: usize,
) -> Result<ListPage> {
    let mut page = ListPage::default();
    let marker = query.marker()?;
    if query.max_keys == 0 {
        return Ok(page);
    }

    let prefix = query.prefix.as_str();
    let delimiter = query.delimiter.as_deref().filter(|d| !d.is_empty());
    let scan_limit = scan_limit.max(1);

    let mut cursor = match marker.as_deref() {
        Some(m) if m >= prefix => match delimiter.and_then(|d| common_prefix(prefix, m, d)) {
            // the group the marker belongs to was already returned
            Some(group) => match prefix_successor(&group) {
                Some(next) => Bound::Included(next),
                None => return Ok(page),
            },
            None => Bound::Excluded(m.to_string()),
        },
        _ => Bound::Included(prefix.to_string()),
    };

    let mut scanned = 0usize;
    let mut last_returned: Option<String> = None;
    let mut last_scanned: Option<String> = None;

    'scan: loop {
        let mut jump = None;
        let range = (cursor.as_ref().map(String::as_str), Bound::Unbounded);
        for (key, metadata) in objects.range::<str, _>(range) {
            if !key.starts_with(prefix) {
                break 'scan;
            }
            if scanned >= scan_limit {
                // resume after everything already looked at
                page.is_truncated = true;
                last_returned = last_scanned.or(last_returned);
                break 'scan;
            }
            scanned += 1;
            last_scanned = Some(key.clone());

            if let Some(group) = delimiter.and_then(|d| common_prefix(prefix, key, d)) {
                if last_returned.as_deref() == Some(group.as_str()) {
                    continue;
                }
                if page.len() >= query.max_keys {
                    page.is_truncated = true;
                    break 'scan;
                }
                jump = prefix_successor(&group);
                page.common_prefixes.push(group.clone());
                last_returned = Some(group);
                if jump.is_some() {
                    break;
                }
                continue;
            }

            if page.len() >= query.max_keys {
                page.is_truncated = true;
                break 'scan;
            }
            page.entries.push(metadata.clone());
            last_returned = Some(key.clone());
        }

        match jump {
            Some(next) => cursor = Bound::Included(next),
            None => break,
        }
    }

    if page.is_truncated {
        page.next_marker = last_returned;
    }
    Ok(page)
}

/// The common prefix `key` falls under, if its suffix contains the delimiter
fn common_prefix(prefix: &str, key: &str, delimiter: &str) -> Option<String> {
    let suffix = key.strip_prefix(prefix)?;
    let pos = suffix.find(delimiter)?;
    Some(format!("{}{}", prefix, &suffix[..pos + delimiter.len()]))
}

/// Smallest string greater than every string starting with `prefix`
fn prefix_successor(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        let next = match last as u32 {
            0xD7FF => Some('\u{E000}'),
            c => char::from_u32(c + 1),
        };
        if let Some(next) = next {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}
