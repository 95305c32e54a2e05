//! Authentication and authorization
//!
//! Grants are loaded once at startup into an immutable map. Requests
//! authenticate with SigV4 headers or, when a JWT secret is configured, with
//! HS256 bearer tokens whose claims describe the grant.

use crate::config::{CredentialSource, GrantConfig};
use crate::error::{ApiError, Result, S3ErrorCode};
use crate::sigv4;
use axum::http::{header, request::Parts};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// What a grant may do
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Permissions {
    pub read: bool,
    pub write: bool,
    pub list: bool,
    pub delete: bool,
}

impl Permissions {
    pub fn all() -> Self {
        Self {
            read: true,
            write: true,
            list: true,
            delete: true,
        }
    }

    pub fn none() -> Self {
        Self {
            read: false,
            write: false,
            list: false,
            delete: false,
        }
    }

    /// Parse `read`/`write`/`list`/`delete`/`*`; an empty list means all
    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut permissions = Self::none();
        let mut any = false;
        for name in names {
            any = true;
            match name.as_ref() {
                "read" => permissions.read = true,
                "write" => permissions.write = true,
                "list" => permissions.list = true,
                "delete" => permissions.delete = true,
                "*" => permissions = Self::all(),
                other => {
                    return Err(ApiError::Internal(format!("unknown permission {}", other)))
                }
            }
        }
        Ok(if any { permissions } else { Self::all() })
    }
}

/// An access key and what it may touch
#[derive(Clone, PartialEq, Eq)]
pub struct AccessGrant {
    pub access_key_id: String,
    pub secret_key: String,
    /// Only this bucket, when set
    pub bucket: Option<String>,
    /// Only keys under this prefix, when set
    pub scope_prefix: Option<String>,
    pub permissions: Permissions,
    pub expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for AccessGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessGrant")
            .field("access_key_id", &self.access_key_id)
            .field("bucket", &self.bucket)
            .field("scope_prefix", &self.scope_prefix)
            .field("permissions", &self.permissions)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl AccessGrant {
    /// Unrestricted grant
    pub fn new(access_key_id: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_key: secret_key.into(),
            bucket: None,
            scope_prefix: None,
            permissions: Permissions::all(),
            expires_at: None,
        }
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    pub fn with_scope_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.scope_prefix = Some(prefix.into());
        self
    }

    pub fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Whether bucket-level operations (create, delete) are allowed
    pub fn is_unscoped(&self) -> bool {
        self.scope_prefix.is_none()
    }

    pub fn allows_bucket(&self, bucket: &str) -> bool {
        self.bucket.as_deref().is_none_or(|b| b == bucket)
    }

    pub fn allows_key(&self, bucket: &str, key: &str) -> bool {
        self.allows_bucket(bucket)
            && self
                .scope_prefix
                .as_deref()
                .is_none_or(|prefix| key.starts_with(prefix))
    }

    /// A list prefix is contained when every key it can return is
    pub fn allows_prefix(&self, bucket: &str, prefix: &str) -> bool {
        self.allows_key(bucket, prefix)
    }
}

impl TryFrom<GrantConfig> for AccessGrant {
    type Error = ApiError;

    fn try_from(config: GrantConfig) -> Result<Self> {
        Ok(Self {
            permissions: Permissions::from_names(&config.permissions)?,
            access_key_id: config.access_key_id,
            secret_key: config.secret_key,
            bucket: config.bucket,
            scope_prefix: config.scope_prefix,
            expires_at: config.expires_at,
        })
    }
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Expiration time
    pub exp: i64,
    /// Issued at
    pub iat: Option<i64>,
    /// Issuer
    pub iss: Option<String>,
    /// Space-separated scopes: `storage:read`, `storage:write`, `storage:*`
    #[serde(default)]
    pub scope: String,
    /// Restrict to one bucket
    #[serde(default)]
    pub bucket: Option<String>,
    /// Restrict to a key prefix
    #[serde(default)]
    pub prefix: Option<String>,
}

/// Validate a JWT token and extract claims
pub fn validate_token(token: &str, secret: &str) -> Result<Claims> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    decode::<Claims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::debug!("Token validation failed: {}", e);
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    ApiError::s3(S3ErrorCode::ExpiredToken, "The provided token has expired")
                }
                _ => ApiError::s3(S3ErrorCode::InvalidToken, "The provided token is malformed or otherwise invalid"),
            }
        })
}

/// Convert claims to an access grant
pub fn claims_to_grant(claims: Claims) -> AccessGrant {
    let mut permissions = Permissions::none();
    for scope in claims.scope.split_whitespace() {
        match scope {
            "storage:*" => permissions = Permissions::all(),
            "storage:read" => {
                permissions.read = true;
                permissions.list = true;
            }
            "storage:write" => {
                permissions.write = true;
                permissions.delete = true;
            }
            _ => {}
        }
    }

    AccessGrant {
        access_key_id: claims.sub,
        secret_key: String::new(),
        bucket: claims.bucket,
        scope_prefix: claims.prefix,
        permissions,
        expires_at: DateTime::from_timestamp(claims.exp, 0),
    }
}

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .or_else(|| auth_header.strip_prefix("bearer "))
}

/// Access key named by a request, without verifying anything
pub fn access_key_hint(auth_header: &str) -> Option<&str> {
    let credential = auth_header
        .strip_prefix(sigv4::ALGORITHM)?
        .split(',')
        .find_map(|part| part.trim().strip_prefix("Credential="))?;
    credential.split('/').next()
}

/// Resolves the caller of a request to an [`AccessGrant`]
pub struct CredentialResolver {
    grants: HashMap<String, Arc<AccessGrant>>,
    jwt_secret: Option<String>,
    skip_signature_validation: bool,
}

impl fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialResolver")
            .field("grants", &self.grants.len())
            .field("jwt", &self.jwt_secret.is_some())
            .field("skip_signature_validation", &self.skip_signature_validation)
            .finish()
    }
}

impl CredentialResolver {
    /// Build from a list of grants; later duplicates replace earlier ones
    pub fn new(grants: impl IntoIterator<Item = AccessGrant>) -> Self {
        Self {
            grants: grants
                .into_iter()
                .map(|g| (g.access_key_id.clone(), Arc::new(g)))
                .collect(),
            jwt_secret: None,
            skip_signature_validation: false,
        }
    }

    pub fn with_jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.jwt_secret = Some(secret.into());
        self
    }

    /// Accept any known access key without checking its signature
    pub fn skip_signature_validation(mut self, skip: bool) -> Self {
        self.skip_signature_validation = skip;
        self
    }

    /// Load grants from a configured source
    pub fn from_source(source: &CredentialSource) -> anyhow::Result<Self> {
        match source {
            CredentialSource::Static { grants } => Ok(Self::new(
                grants
                    .iter()
                    .cloned()
                    .map(AccessGrant::try_from)
                    .collect::<Result<Vec<_>>>()?,
            )),
            CredentialSource::File { path } => Self::from_file(path),
            CredentialSource::Jwt { secret } => Ok(Self::new([]).with_jwt_secret(secret.clone())),
        }
    }

    /// Read a JSON array of grants
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let configs: Vec<GrantConfig> = serde_json::from_str(&text)?;
        let grants = configs
            .into_iter()
            .map(AccessGrant::try_from)
            .collect::<Result<Vec<_>>>()?;
        tracing::info!(path = %path.display(), grants = grants.len(), "Loaded credentials");
        Ok(Self::new(grants))
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty() && self.jwt_secret.is_none()
    }

    /// Look up an access key
    pub fn resolve(&self, access_key_id: &str) -> Result<Arc<AccessGrant>> {
        self.resolve_at(access_key_id, Utc::now())
    }

    fn resolve_at(&self, access_key_id: &str, now: DateTime<Utc>) -> Result<Arc<AccessGrant>> {
        let grant = self.grants.get(access_key_id).ok_or_else(|| {
            ApiError::s3(
                S3ErrorCode::InvalidAccessKeyId,
                "The AWS Access Key Id you provided does not exist in our records",
            )
        })?;
        if grant.is_expired(now) {
            return Err(ApiError::s3(
                S3ErrorCode::ExpiredToken,
                "The provided access key has expired",
            ));
        }
        Ok(Arc::clone(grant))
    }

    /// Authenticate a request from its head and body
    pub fn authenticate(&self, parts: &Parts, body: &[u8]) -> Result<Arc<AccessGrant>> {
        self.authenticate_at(parts, body, Utc::now())
    }

    pub(crate) fn authenticate_at(
        &self,
        parts: &Parts,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Arc<AccessGrant>> {
        let Some(value) = parts.headers.get(header::AUTHORIZATION) else {
            if parts
                .uri
                .query()
                .is_some_and(|q| q.contains("X-Amz-Signature=") || q.contains("Signature="))
            {
                return Err(ApiError::s3(
                    S3ErrorCode::NotImplemented,
                    "query string authentication is not supported",
                ));
            }
            return Err(ApiError::s3(
                S3ErrorCode::MissingSecurityHeader,
                "request is not authenticated",
            ));
        };
        let value = value
            .to_str()
            .map_err(|_| ApiError::s3(S3ErrorCode::InvalidRequest, "malformed Authorization header"))?;

        if let Some(token) = extract_bearer_token(value) {
            let secret = self.jwt_secret.as_deref().ok_or_else(|| {
                ApiError::s3(S3ErrorCode::InvalidToken, "bearer tokens are not accepted")
            })?;
            return Ok(Arc::new(claims_to_grant(validate_token(token, secret)?)));
        }

        if value.starts_with("AWS ") {
            return Err(ApiError::s3(
                S3ErrorCode::InvalidRequest,
                "Signature Version 2 is not supported; use AWS4-HMAC-SHA256",
            ));
        }

        let auth = sigv4::parse_authorization(value)?;
        let grant = self.resolve_at(&auth.access_key_id, now)?;
        if self.skip_signature_validation {
            return Ok(grant);
        }

        let (timestamp, signed_at) = sigv4::request_time(&parts.headers)?;
        sigv4::check_clock_skew(signed_at, now)?;
        let payload_hash = sigv4::payload_hash(&parts.headers, body)?;
        sigv4::verify(
            &auth,
            &grant.secret_key,
            &parts.method,
            &parts.uri,
            &parts.headers,
            &payload_hash,
            &timestamp,
        )?;
        Ok(grant)
    }
}
