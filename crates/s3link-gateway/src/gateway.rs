//! Gateway façade
//!
//! [`Gateway::handle`] turns one raw request into one raw response: parse,
//! authenticate, dispatch, encode. A parse or authentication failure never
//! reaches the backend.

use crate::auth::CredentialResolver;
use crate::config::GatewayConfig;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::multipart::MultipartManager;
use crate::operation::S3Output;
use crate::request::RequestParser;
use crate::response::{encode, new_request_id};
use axum::http::request::Parts;
use axum::http::{Method, Request, Response};
use bytes::Bytes;
use chrono::Utc;
use s3link_blockstore::{FlexibleBlockStore, IpfsBlockStore, IpfsConfig, MemoryBlockStore};
use s3link_core::{BlockObjectStore, ObjectStore};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

/// Stateless request handler shared by every connection
pub struct Gateway {
    parser: RequestParser,
    credentials: Arc<CredentialResolver>,
    dispatcher: Dispatcher,
    uploads: Arc<MultipartManager>,
    store: Arc<dyn ObjectStore>,
}

impl Gateway {
    /// Assemble a gateway over an existing backend
    pub fn new(
        config: &GatewayConfig,
        credentials: CredentialResolver,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        let uploads = Arc::new(MultipartManager::new(
            config.multipart_expiry_secs,
            config.s3.min_part_size,
        ));
        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&uploads),
            config.s3.clone(),
            config.region.clone(),
        );

        Self {
            parser: RequestParser::new(config.domains.clone()),
            credentials: Arc::new(credentials),
            dispatcher,
            uploads,
            store,
        }
    }

    /// Build the backend and credentials described by `config`
    pub async fn from_config(config: &GatewayConfig) -> anyhow::Result<Self> {
        let credentials = CredentialResolver::from_source(&config.credential_source)?
            .skip_signature_validation(config.skip_signature_validation);
        if credentials.is_empty() {
            warn!("No credentials configured; every request will be rejected");
        }
        if config.skip_signature_validation {
            warn!("Signature validation is DISABLED - for development only");
        }

        let blocks = if config.backend.use_memory_store {
            warn!("Using in-memory block store (data will not persist)");
            FlexibleBlockStore::Memory(MemoryBlockStore::new())
        } else {
            let mut ipfs_config = IpfsConfig::with_url(&config.backend.ipfs_url);
            ipfs_config.connect_timeout = config.backend.dial_timeout();
            let ipfs = IpfsBlockStore::new(ipfs_config)?;
            // An unreachable node is reported per request as ServiceUnavailable
            match ipfs.verify_connection().await {
                Ok(()) => info!(url = %config.backend.ipfs_url, "Connected to IPFS"),
                Err(e) => warn!(url = %config.backend.ipfs_url, error = %e, "IPFS node not reachable yet"),
            }
            FlexibleBlockStore::Ipfs(ipfs)
        };
        info!(backend = blocks.kind(), "Block store ready");

        let store = BlockObjectStore::new(
            Arc::new(blocks),
            config
                .backend
                .store_config(config.s3.max_keys_exhaustive_limit),
        )?;

        Ok(Self::new(config, credentials, Arc::new(store)))
    }

    /// Handle one request
    pub async fn handle(&self, request: Request<Bytes>) -> Response<Bytes> {
        let request_id = new_request_id();
        let (parts, body) = request.into_parts();
        let is_head = parts.method == Method::HEAD;
        let span = info_span!(
            "s3_request",
            request_id = %request_id,
            method = %parts.method,
            path = %parts.uri.path(),
        );

        let result = self.execute(&parts, body).instrument(span.clone()).await;
        if let Err(err) = &result {
            let code = err.error_code();
            span.in_scope(|| {
                if code.status_code().is_server_error() {
                    warn!(code = code.as_str(), error = %err, "Request failed");
                } else {
                    debug!(code = code.as_str(), error = %err, "Request rejected");
                }
            });
        }

        encode(result, &request_id, is_head)
    }

    async fn execute(&self, parts: &Parts, body: Bytes) -> Result<S3Output> {
        let op = self.parser.parse(parts, body.clone())?;
        let grant = self.credentials.authenticate(parts, &body)?;
        debug!(operation = op.name(), "Parsed request");
        self.dispatcher.dispatch(op, &grant).await
    }

    /// Abort expired multipart uploads and drop the blocks they held
    pub async fn reap_expired_uploads(&self) -> usize {
        let reaped = self.uploads.reap_expired(self.store.as_ref(), Utc::now()).await;
        if reaped > 0 {
            match self.store.collect_garbage().await {
                Ok(blocks) => info!(uploads = reaped, blocks, "Expired multipart uploads reaped"),
                Err(e) => warn!(uploads = reaped, error = %e, "Garbage collection failed"),
            }
        }
        reaped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AccessGrant;
    use crate::response::ERROR_CODE_HEADER;
    use axum::http::StatusCode;
    use s3link_core::StoreConfig;

    fn gateway() -> Gateway {
        gateway_with(StoreConfig::default())
    }

    fn gateway_with(store_config: StoreConfig) -> Gateway {
        let config = GatewayConfig::default();
        let store = BlockObjectStore::new(Arc::new(MemoryBlockStore::new()), store_config).unwrap();
        let credentials =
            CredentialResolver::new([AccessGrant::new("AKID", "secret")]).skip_signature_validation(true);
        Gateway::new(&config, credentials, Arc::new(store))
    }

    fn request(method: Method, uri: &str, body: &'static [u8]) -> Request<Bytes> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("host", "localhost:7777")
            .header(
                "authorization",
                "AWS4-HMAC-SHA256 Credential=AKID/20240101/us-east-1/s3/aws4_request, \
                 SignedHeaders=host, Signature=00",
            )
            .body(Bytes::from_static(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let gateway = gateway();
        assert_eq!(gateway.handle(request(Method::PUT, "/photos", b"")).await.status(), StatusCode::OK);
        let put = gateway.handle(request(Method::PUT, "/photos/cat.jpg", b"meow")).await;
        assert_eq!(put.status(), StatusCode::OK);

        let get = gateway.handle(request(Method::GET, "/photos/cat.jpg", b"")).await;
        assert_eq!(get.status(), StatusCode::OK);
        assert_eq!(get.body().as_ref(), b"meow");
        assert_eq!(get.headers()["etag"], put.headers()["etag"]);
    }

    #[tokio::test]
    async fn test_unauthenticated_request_is_rejected() {
        let gateway = gateway();
        let anonymous = Request::builder()
            .method(Method::GET)
            .uri("/")
            .header("host", "localhost")
            .body(Bytes::new())
            .unwrap();
        let response = gateway.handle(anonymous).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[ERROR_CODE_HEADER], "MissingSecurityHeader");
    }

    #[tokio::test]
    async fn test_head_missing_object_has_no_body() {
        let gateway = gateway();
        gateway.handle(request(Method::PUT, "/photos", b"")).await;
        let response = gateway.handle(request(Method::HEAD, "/photos/nope", b"")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.body().is_empty());
    }

    #[tokio::test]
    async fn test_backend_rejections_keep_their_cause() {
        let gateway = gateway_with(StoreConfig {
            quota_bytes: Some(8),
            ..Default::default()
        });
        gateway.handle(request(Method::PUT, "/photos", b"")).await;
        assert_eq!(
            gateway.handle(request(Method::PUT, "/photos/small", b"tiny")).await.status(),
            StatusCode::OK
        );
        let full = gateway.handle(request(Method::PUT, "/photos/big", b"too large")).await;
        assert_eq!(full.status(), StatusCode::CONFLICT);
        assert_eq!(full.headers()[ERROR_CODE_HEADER], "QuotaExceeded");

        let read_only = gateway_with(StoreConfig {
            read_only: true,
            ..Default::default()
        });
        let refused = read_only.handle(request(Method::PUT, "/photos", b"")).await;
        assert_eq!(refused.status(), StatusCode::FORBIDDEN);
        assert_eq!(refused.headers()[ERROR_CODE_HEADER], "AccessDenied");
    }

    #[tokio::test]
    async fn test_reap_without_uploads() {
        assert_eq!(gateway().reap_expired_uploads().await, 0);
    }
}
