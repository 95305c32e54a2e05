//! In-process transport
//!
//! A [`tower::Service`] that hands requests straight to a [`Gateway`] without
//! a socket, for clients embedded in the same process.

use crate::gateway::Gateway;
use crate::response::{error_response, new_request_id};
use crate::sigv4::{sign_request, SigningCredentials};
use axum::http::{header, HeaderValue, Method, Request, Response};
use bytes::Bytes;
use chrono::Utc;
use futures::future::BoxFuture;
use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;

/// Host used when a request carries none
pub const DEFAULT_HOST: &str = "s3.amazonaws.com";

/// Calls [`Gateway::handle`] directly, optionally signing each request first
#[derive(Clone)]
pub struct InProcessTransport {
    gateway: Arc<Gateway>,
    signer: Option<SigningCredentials>,
}

impl InProcessTransport {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self {
            gateway,
            signer: None,
        }
    }

    /// Sign every outgoing request with SigV4
    pub fn with_signer(mut self, credentials: SigningCredentials) -> Self {
        self.signer = Some(credentials);
        self
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }
}

impl Service<Request<Bytes>> for InProcessTransport {
    type Response = Response<Bytes>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response<Bytes>, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, mut request: Request<Bytes>) -> Self::Future {
        if !request.headers().contains_key(header::HOST) && request.uri().authority().is_none() {
            request
                .headers_mut()
                .insert(header::HOST, HeaderValue::from_static(DEFAULT_HOST));
        }

        if let Some(signer) = &self.signer {
            if let Err(err) = sign_request(&mut request, signer, Utc::now()) {
                let is_head = request.method() == Method::HEAD;
                let response = error_response(&err, &new_request_id(), is_head);
                return Box::pin(async move { Ok(response) });
            }
        }

        let gateway = Arc::clone(&self.gateway);
        Box::pin(async move { Ok(gateway.handle(request).await) })
    }
}
