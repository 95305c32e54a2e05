//! Bucket index and name validation

use crate::error::{BackendError, Result};
use crate::listing::{list_index, ListPage, ListQuery};
use crate::metadata::{BucketInfo, ObjectMetadata};
use crate::MAX_KEY_LENGTH;
use std::collections::BTreeMap;

/// Sorted index of the objects in one bucket
#[derive(Clone, Debug)]
pub struct BucketIndex {
    info: BucketInfo,
    objects: BTreeMap<String, ObjectMetadata>,
    total_size: u64,
}

impl BucketIndex {
    /// Create an empty index
    pub fn new(info: BucketInfo) -> Self {
        Self {
            info,
            objects: BTreeMap::new(),
            total_size: 0,
        }
    }

    /// Bucket information
    pub fn info(&self) -> &BucketInfo {
        &self.info
    }

    /// Look up an object
    pub fn get(&self, key: &str) -> Option<&ObjectMetadata> {
        self.objects.get(key)
    }

    /// Insert or replace an object, returning the replaced entry
    pub fn insert(&mut self, metadata: ObjectMetadata) -> Option<ObjectMetadata> {
        self.total_size += metadata.size;
        let previous = self.objects.insert(metadata.key.clone(), metadata);
        if let Some(old) = &previous {
            self.total_size -= old.size;
        }
        previous
    }

    /// Remove an object
    pub fn remove(&mut self, key: &str) -> Option<ObjectMetadata> {
        let removed = self.objects.remove(key);
        if let Some(old) = &removed {
            self.total_size -= old.size;
        }
        removed
    }

    /// One page of a listing
    pub fn list(&self, query: &ListQuery, scan_limit: usize) -> Result<ListPage> {
        list_index(&self.objects, query, scan_limit)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Sum of object sizes
    pub fn total_size(&self) -> u64 {
        self.total_size
    }
}

/// Validate bucket name according to S3 DNS naming rules
pub fn validate_bucket_name(name: &str) -> Result<()> {
    let invalid = |msg: &str| -> Result<()> {
        Err(BackendError::InvalidBucketName(format!("{}: {}", name, msg)))
    };

    if name.len() < 3 || name.len() > 63 {
        return invalid("must be between 3 and 63 characters");
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return invalid("only lowercase letters, numbers, hyphens, and periods are allowed");
    }

    for label in name.split('.') {
        if label.is_empty() {
            return invalid("labels cannot be empty");
        }
        if label.starts_with('-') || label.ends_with('-') {
            return invalid("labels cannot start or end with a hyphen");
        }
    }

    if name.split('.').count() == 4 && name.split('.').all(|l| l.parse::<u8>().is_ok()) {
        return invalid("cannot be formatted as an IP address");
    }

    Ok(())
}

/// Validate object key
pub fn validate_object_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(BackendError::EmptyObjectKey);
    }

    if key.len() > MAX_KEY_LENGTH {
        return Err(BackendError::ObjectKeyTooLong(MAX_KEY_LENGTH));
    }

    Ok(())
}
