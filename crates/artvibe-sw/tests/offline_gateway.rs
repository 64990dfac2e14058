//! End-to-end: real HTTP through `HttpFetcher`, driven by the gateway worker.

use std::sync::Arc;

use artvibe_net::{HttpFetcher, LoaderConfig, Request};
use artvibe_sw::{
    CacheStorage, GatewayConfig, GatewayWorker, OfflineGateway, RequestKey, ResponseSource,
    ServiceWorkerError,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn storefront() -> MockServer {
    let server = MockServer::start().await;
    for (route, body) in [
        ("/", "<html>home</html>"),
        ("/index.html", "<html>shell</html>"),
        ("/style.css", "body{}"),
        ("/images/avatar.webp", "RIFF"),
    ] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;
    }
    server
}

fn config(origin: &str) -> GatewayConfig {
    GatewayConfig {
        origin: format!("{origin}/"),
        manifest: vec!["/".into(), "/index.html".into(), "/style.css".into()],
        ..Default::default()
    }
}

fn fetcher() -> Arc<HttpFetcher> {
    Arc::new(HttpFetcher::new(LoaderConfig::default()).unwrap())
}

fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn requests_to(server: &MockServer, route: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == route)
        .count()
}

#[tokio::test]
async fn test_cache_first_then_offline_fallback() {
    let server = storefront().await;
    let origin = server.uri();
    let (gateway, _events) = OfflineGateway::new(config(&origin), fetcher()).unwrap();
    let storage = gateway.cache_storage();
    let handle = GatewayWorker::spawn(Arc::new(gateway));

    let outcome = handle.install().await.unwrap();
    assert!(outcome.activation.is_some());
    assert_eq!(requests_to(&server, "/style.css").await, 1);

    // Pre-cached: served without touching the server.
    let served = handle
        .fetch(Request::parse_get(&format!("{origin}/style.css")).unwrap())
        .await
        .unwrap();
    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(requests_to(&server, "/style.css").await, 1);

    // Not pre-cached: fetched once, then cached.
    let avatar = Request::parse_get(&format!("{origin}/images/avatar.webp")).unwrap();
    let served = handle.fetch(avatar.clone()).await.unwrap();
    assert_eq!(served.source, ResponseSource::Network);
    assert_eq!(served.response.body.as_ref(), b"RIFF");
    assert!(storage
        .read()
        .await
        .match_in("artvibestudio-cache-v2", &RequestKey::for_request(&avatar))
        .is_some());

    // Unreachable network: the shell is served instead.
    let served = handle
        .fetch(Request::parse_get(&format!("http://127.0.0.1:{}/shop", closed_port())).unwrap())
        .await
        .unwrap();
    assert_eq!(served.source, ResponseSource::Fallback);
    assert_eq!(served.response.body.as_ref(), b"<html>shell</html>");

    handle.shutdown().await;
}

#[tokio::test]
async fn test_missing_manifest_entry_fails_install() {
    let server = storefront().await;
    let mut config = config(&server.uri());
    config.manifest.push("/images/missing.webp".into());

    let (gateway, _events) = OfflineGateway::new(config, fetcher()).unwrap();
    let storage = gateway.cache_storage();
    let handle = GatewayWorker::spawn(Arc::new(gateway));

    assert!(matches!(
        handle.install().await,
        Err(ServiceWorkerError::InstallFailed { .. })
    ));
    assert!(storage.read().await.keys().is_empty());

    handle.shutdown().await;
}

#[tokio::test]
async fn test_snapshot_survives_restart() {
    let server = storefront().await;
    let origin = server.uri();
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("caches.json");

    {
        let (gateway, _events) = OfflineGateway::new(config(&origin), fetcher()).unwrap();
        gateway.on_install().await.unwrap();
        gateway
            .cache_storage()
            .read()
            .await
            .save_snapshot(&snapshot)
            .unwrap();
    }

    let restored = CacheStorage::load_snapshot(&snapshot).unwrap().shared();
    let (gateway, _events) = OfflineGateway::new(config(&origin), fetcher()).unwrap();
    let gateway = gateway.with_cache_storage(restored);

    let served = gateway
        .handle_fetch(&Request::parse_get(&format!("{origin}/style.css")).unwrap())
        .await
        .unwrap();
    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response.body.as_ref(), b"body{}");
    assert_eq!(requests_to(&server, "/style.css").await, 1);
}
