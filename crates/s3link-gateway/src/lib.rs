//! # s3link Gateway
//!
//! S3-compatible front end for content-addressed block storage.
//!
//! This crate provides:
//! - **Request parsing**: path- and virtual-hosted-style S3 REST requests
//! - **Authentication**: AWS SigV4 header signatures, or JWT bearer tokens
//! - **Dispatch**: scoped grants, conditional and ranged reads, multipart uploads
//! - **Transports**: an axum server and an in-process `tower::Service`
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │        HTTP clients          In-process clients     │
//! └──────────────┬──────────────────────────┬───────────┘
//!                │ axum server              │ InProcessTransport
//! ┌──────────────▼──────────────────────────▼───────────┐
//! │                   Gateway::handle                    │
//! │  RequestParser → CredentialResolver → Dispatcher    │
//! │                  → response encoder                  │
//! ├─────────────────────────────────────────────────────┤
//! │                    s3link-core                       │
//! │        (ObjectStore, bucket index, listing)          │
//! ├─────────────────────────────────────────────────────┤
//! │                 s3link-blockstore                    │
//! │               (memory, IPFS HTTP API)                │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod middleware;
pub mod multipart;
pub mod operation;
pub mod request;
pub mod response;
pub mod routes;
pub mod server;
pub mod sigv4;
pub mod state;
pub mod transport;
pub mod xml;

pub use auth::{AccessGrant, CredentialResolver, Permissions};
pub use config::GatewayConfig;
pub use error::{ApiError, S3ErrorCode};
pub use gateway::Gateway;
pub use operation::{S3Operation, S3Output};
pub use server::{run_server, run_server_with_shutdown, serve};
pub use sigv4::{sign_request, SigningCredentials};
pub use state::AppState;
pub use transport::InProcessTransport;
