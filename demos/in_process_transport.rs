//! Drive the gateway without a socket.
//!
//! Builds a memory-backed gateway, wraps it in a signing `InProcessTransport`
//! and runs a small upload/list/download session through `tower::Service`.
//!
//! ```sh
//! cargo run --example in_process_transport
//! ```

use axum::http::{Method, Request};
use bytes::Bytes;
use s3link_blockstore::MemoryBlockStore;
use s3link_core::{BlockObjectStore, StoreConfig};
use s3link_gateway::{
    AccessGrant, CredentialResolver, Gateway, GatewayConfig, InProcessTransport, SigningCredentials,
};
use std::sync::Arc;
use tower::ServiceExt;

async fn call(
    transport: &InProcessTransport,
    method: Method,
    uri: &str,
    body: &'static str,
) -> anyhow::Result<()> {
    let request = Request::builder()
        .method(method.clone())
        .uri(uri)
        .body(Bytes::from_static(body.as_bytes()))?;
    let response = transport.clone().oneshot(request).await?;

    println!("{} {} -> {}", method, uri, response.status());
    if let Some(etag) = response.headers().get("etag") {
        println!("  ETag: {}", etag.to_str()?);
    }
    if !response.body().is_empty() {
        println!("  {}", String::from_utf8_lossy(response.body()));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("s3link_gateway=debug")
        .init();

    let config = GatewayConfig::default();
    let store = BlockObjectStore::new(Arc::new(MemoryBlockStore::new()), StoreConfig::default())?;
    let credentials = CredentialResolver::new([AccessGrant::new("demo", "demo-secret")]);
    let gateway = Arc::new(Gateway::new(&config, credentials, Arc::new(store)));

    let transport = InProcessTransport::new(gateway)
        .with_signer(SigningCredentials::new("demo", "demo-secret", &config.region));

    call(&transport, Method::PUT, "/notes", "").await?;
    call(&transport, Method::PUT, "/notes/2024/todo.txt", "buy milk").await?;
    call(&transport, Method::PUT, "/notes/readme.md", "# notes").await?;
    call(&transport, Method::GET, "/notes?list-type=2&delimiter=/", "").await?;
    call(&transport, Method::GET, "/notes/2024/todo.txt", "").await?;

    Ok(())
}
