use axum::http::{self, Method};
use chrono::Utc;
use reqwest::{Client, Response, StatusCode};
use s3link_gateway::config::{CredentialSource, GrantConfig};
use s3link_gateway::{serve, sign_request, AppState, GatewayConfig, SigningCredentials};
use std::sync::Arc;
use tokio::net::TcpListener;

const ACCESS_KEY: &str = "AKIDEXAMPLE";
const SECRET_KEY: &str = "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY";

fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config.backend.use_memory_store = true;
    config.rate_limit_rps = 0;
    config.credential_source = CredentialSource::Static {
        grants: vec![GrantConfig {
            access_key_id: ACCESS_KEY.to_string(),
            secret_key: SECRET_KEY.to_string(),
            bucket: None,
            scope_prefix: None,
            permissions: Vec::new(),
            expires_at: None,
        }],
    };
    config
}

// Helper to spawn a server on a random port
async fn spawn_server(config: GatewayConfig) -> String {
    let state = Arc::new(AppState::new(config).await.unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        serve(listener, state, std::future::pending()).await.unwrap();
    });

    format!("http://{}", addr)
}

/// Send a SigV4-signed request
async fn signed(client: &Client, method: Method, url: &str, body: &[u8]) -> Response {
    signed_with(client, method, url, body, &[]).await
}

async fn signed_with(
    client: &Client,
    method: Method,
    url: &str,
    body: &[u8],
    headers: &[(&str, &str)],
) -> Response {
    let mut builder = http::Request::builder().method(method.clone()).uri(url);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let mut request = builder.body(body.to_vec()).unwrap();
    let credentials = SigningCredentials::new(ACCESS_KEY, SECRET_KEY, "us-east-1");
    sign_request(&mut request, &credentials, Utc::now()).unwrap();

    client
        .request(method, url)
        .headers(request.headers().clone())
        .body(request.into_body())
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_bucket_lifecycle() {
    let base_url = spawn_server(test_config()).await;
    let client = Client::new();
    let bucket_name = "lifecycle-bucket";

    // 1. List buckets (should be empty)
    let res = signed(&client, Method::GET, &format!("{}/", base_url), b"").await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = res.text().await.unwrap();
    assert!(body.contains("<ListAllMyBucketsResult"));
    assert!(!body.contains(bucket_name));

    // 2. Create bucket
    let res = signed(&client, Method::PUT, &format!("{}/{}", base_url, bucket_name), b"").await;
    assert_eq!(res.status(), StatusCode::OK);

    // 3. Creating it again conflicts
    let res = signed(&client, Method::PUT, &format!("{}/{}", base_url, bucket_name), b"").await;
    assert_eq!(res.status(), StatusCode::CONFLICT);

    // 4. List buckets (should contain it)
    let res = signed(&client, Method::GET, &format!("{}/", base_url), b"").await;
    assert!(res.text().await.unwrap().contains(bucket_name));

    // 5. Non-empty bucket cannot be deleted
    let object_url = format!("{}/{}/note.txt", base_url, bucket_name);
    signed(&client, Method::PUT, &object_url, b"hi").await;
    let res = signed(&client, Method::DELETE, &format!("{}/{}", base_url, bucket_name), b"").await;
    assert_eq!(res.status(), StatusCode::CONFLICT);
    assert!(res.text().await.unwrap().contains("<Code>BucketNotEmpty</Code>"));

    // 6. Empty it and delete
    let res = signed(&client, Method::DELETE, &object_url, b"").await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    let res = signed(&client, Method::DELETE, &format!("{}/{}", base_url, bucket_name), b"").await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    // 7. Verify bucket gone
    let res = signed(&client, Method::HEAD, &format!("{}/{}", base_url, bucket_name), b"").await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_object_lifecycle() {
    let base_url = spawn_server(test_config()).await;
    let client = Client::new();
    signed(&client, Method::PUT, &format!("{}/objects", base_url), b"").await;

    let url = format!("{}/objects/docs/hello.txt", base_url);
    let res = signed_with(
        &client,
        Method::PUT,
        &url,
        b"Hello, World!",
        &[("content-type", "text/plain"), ("x-amz-meta-author", "tester")],
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    let etag = res.headers()["etag"].to_str().unwrap().to_string();

    let res = signed(&client, Method::HEAD, &url, b"").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-length"], "13");
    assert_eq!(res.headers()["content-type"], "text/plain");
    assert_eq!(res.headers()["x-amz-meta-author"], "tester");
    assert_eq!(res.headers()["etag"].to_str().unwrap(), etag);

    let res = signed(&client, Method::GET, &url, b"").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "Hello, World!");

    let res = signed_with(&client, Method::GET, &url, b"", &[("range", "bytes=7-11")]).await;
    assert_eq!(res.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(res.headers()["content-range"], "bytes 7-11/13");
    assert_eq!(res.text().await.unwrap(), "World");

    let res = signed_with(&client, Method::GET, &url, b"", &[("range", "bytes=100-")]).await;
    assert_eq!(res.status(), StatusCode::RANGE_NOT_SATISFIABLE);

    let res = signed_with(&client, Method::GET, &url, b"", &[("if-none-match", etag.as_str())]).await;
    assert_eq!(res.status(), StatusCode::NOT_MODIFIED);

    let res = signed_with(&client, Method::GET, &url, b"", &[("if-match", "\"other\"")]).await;
    assert_eq!(res.status(), StatusCode::PRECONDITION_FAILED);

    let res = signed(&client, Method::DELETE, &url, b"").await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    let res = signed(&client, Method::GET, &url, b"").await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert!(res.text().await.unwrap().contains("<Code>NoSuchKey</Code>"));
}

#[tokio::test]
async fn test_content_md5_mismatch() {
    let base_url = spawn_server(test_config()).await;
    let client = Client::new();
    signed(&client, Method::PUT, &format!("{}/digests", base_url), b"").await;

    // sixteen zero bytes, a well-formed digest of some other body
    let res = signed_with(
        &client,
        Method::PUT,
        &format!("{}/digests/file", base_url),
        b"payload",
        &[("content-md5", "AAAAAAAAAAAAAAAAAAAAAA==")],
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(res.text().await.unwrap().contains("<Code>BadDigest</Code>"));
}

#[tokio::test]
async fn test_unauthenticated_request() {
    let base_url = spawn_server(test_config()).await;
    let client = Client::new();

    let res = client.get(format!("{}/", base_url)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert!(res.headers().contains_key("x-amz-request-id"));
    let body = res.text().await.unwrap();
    assert!(body.contains("<Code>MissingSecurityHeader</Code>"));
}

#[tokio::test]
async fn test_bad_signature_is_forbidden() {
    let base_url = spawn_server(test_config()).await;
    let client = Client::new();
    let url = format!("{}/", base_url);

    let mut request = http::Request::builder().uri(&url).body(Vec::new()).unwrap();
    let wrong = SigningCredentials::new(ACCESS_KEY, "not-the-secret", "us-east-1");
    sign_request(&mut request, &wrong, Utc::now()).unwrap();

    let res = client
        .get(&url)
        .headers(request.headers().clone())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert!(res.text().await.unwrap().contains("<Code>SignatureDoesNotMatch</Code>"));
}

#[tokio::test]
async fn test_body_size_limit() {
    let mut config = test_config();
    config.max_body_size = 16;
    let base_url = spawn_server(config).await;
    let client = Client::new();
    signed(&client, Method::PUT, &format!("{}/limited", base_url), b"").await;

    let res = signed(&client, Method::PUT, &format!("{}/limited/big", base_url), &[b'x'; 64]).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(res.text().await.unwrap().contains("<Code>EntityTooLarge</Code>"));
}

#[tokio::test]
async fn test_rate_limit() {
    let mut config = test_config();
    config.rate_limit_rps = 1;
    let base_url = spawn_server(config).await;
    let client = Client::new();
    let url = format!("{}/", base_url);

    let first = signed(&client, Method::GET, &url, b"").await;
    assert_eq!(first.status(), StatusCode::OK);
    let second = signed(&client, Method::GET, &url, b"").await;
    assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(second.text().await.unwrap().contains("<Code>SlowDown</Code>"));
}
