//! Integration tests for the request interceptor.
//!
//! Uses wiremock as the origin server; request counts on the mocks stand in
//! for a network-call counter.

use std::time::Duration;

use lessoncache_core::api::{ApiClient, ApiError, Request};
use lessoncache_core::interceptor::{
    CacheStorage, InterceptError, Interceptor, Lifecycle, ResponseSource, PRECACHE_MANIFEST,
};
use lessoncache_core::Config;
use reqwest::{Method, Url};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    _dir: TempDir,
    config: Config,
    storage: CacheStorage,
    interceptor: Interceptor,
}

async fn harness(server: &MockServer) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = Config::with_base_url(format!("{}/api", server.uri()));
    config.request_timeout_secs = 1;
    let api = ApiClient::new(&config).expect("client");
    let storage = CacheStorage::open(dir.path().join("partitions"))
        .await
        .expect("storage");
    let interceptor = Interceptor::new(&config, api, storage.clone());
    Harness {
        _dir: dir,
        config,
        storage,
        interceptor,
    }
}

async fn mount_shell(server: &MockServer) {
    for asset in PRECACHE_MANIFEST {
        Mock::given(method("GET"))
            .and(path(*asset))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!("asset {asset}")))
            .mount(server)
            .await;
    }
}

async fn active_harness(server: &MockServer) -> Harness {
    mount_shell(server).await;
    let h = harness(server).await;
    h.interceptor.start().await.expect("install + activate");
    h
}

fn get(server: &MockServer, p: &str) -> Request {
    Request::get_str(&format!("{}{}", server.uri(), p)).expect("url")
}

// ===== Lifecycle =====

#[tokio::test]
async fn test_install_seeds_shell_partition() {
    let server = MockServer::start().await;
    mount_shell(&server).await;
    let h = harness(&server).await;

    h.interceptor.install().await.expect("install");

    assert_eq!(h.interceptor.lifecycle(), Lifecycle::Installed);
    let shell = h.storage.partition(&h.config.shell_partition());
    assert_eq!(shell.len().await.unwrap(), PRECACHE_MANIFEST.len());
    let index = shell.lookup(&get(&server, "/index.html")).await.unwrap().unwrap();
    assert_eq!(index.data.text(), "asset /index.html");
}

#[tokio::test]
async fn test_install_is_all_or_nothing() {
    let server = MockServer::start().await;
    for asset in PRECACHE_MANIFEST.iter().filter(|a| **a != "/logo512.png") {
        Mock::given(method("GET"))
            .and(path(*asset))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/logo512.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let h = harness(&server).await;

    let result = h.interceptor.install().await;

    assert!(matches!(result, Err(InterceptError::Precache { status: 404, .. })));
    assert_eq!(h.interceptor.lifecycle(), Lifecycle::Pending);
    assert!(h.storage.partition_names().await.unwrap().is_empty());
    assert!(matches!(
        h.interceptor.activate().await,
        Err(InterceptError::Lifecycle(Lifecycle::Pending))
    ));
}

#[tokio::test]
async fn test_activate_purges_partitions_outside_whitelist() {
    let server = MockServer::start().await;
    mount_shell(&server).await;
    let h = harness(&server).await;

    let stale = get(&server, "/old.js");
    let old_response = lessoncache_core::api::HttpResponse {
        url: stale.url.to_string(),
        status: 200,
        headers: Default::default(),
        body: b"old".to_vec(),
        response_type: lessoncache_core::api::ResponseType::Basic,
    };
    h.storage
        .partition("lessoncache-shell-v6")
        .put(&stale, old_response.clone())
        .await
        .unwrap();
    h.storage
        .partition(&h.config.metadata_partition())
        .put(&stale, old_response)
        .await
        .unwrap();

    let deleted = h.interceptor.start().await.expect("start");

    assert_eq!(deleted, vec!["lessoncache-shell-v6".to_string()]);
    assert_eq!(h.interceptor.lifecycle(), Lifecycle::Active);
    let mut remaining = h.storage.partition_names().await.unwrap();
    remaining.sort();
    let mut expected = h.config.partition_whitelist();
    expected.sort();
    assert_eq!(remaining, expected);
}

#[tokio::test]
async fn test_resume_activates_from_seeded_shell_offline() {
    let server = MockServer::start().await;
    let first = active_harness(&server).await;
    server.reset().await;

    let interceptor = Interceptor::new(
        &first.config,
        ApiClient::new(&first.config).unwrap(),
        first.storage.clone(),
    );
    assert!(interceptor.resume().await.unwrap());
    assert_eq!(interceptor.lifecycle(), Lifecycle::Active);

    let index = interceptor.fetch(&get(&server, "/index.html")).await.unwrap();
    assert_eq!(index.source, ResponseSource::Cache);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_resume_without_shell_stays_pending() {
    let server = MockServer::start().await;
    let h = harness(&server).await;

    assert!(!h.interceptor.resume().await.unwrap());
    assert_eq!(h.interceptor.lifecycle(), Lifecycle::Pending);
}

#[tokio::test]
async fn test_requests_are_not_intercepted_before_activation() {
    let server = MockServer::start().await;
    mount_shell(&server).await;
    let h = harness(&server).await;

    let handled = h.interceptor.handle(&get(&server, "/index.html")).await.unwrap();
    assert!(handled.is_none());
}

// ===== Network-only =====

#[tokio::test]
async fn test_network_only_routes_always_hit_network() {
    let server = MockServer::start().await;
    let h = active_harness(&server).await;

    Mock::given(method("GET"))
        .and(path("/api/math/lesson/level-1/addition"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[1,2,3]"))
        .expect(3)
        .mount(&server)
        .await;

    let request = get(&server, "/api/math/lesson/level-1/addition");
    for _ in 0..3 {
        assert!(h.interceptor.handle(&request).await.unwrap().is_none());
    }
    // handle() leaves it alone, fetch() sends it straight through
    for _ in 0..3 {
        let result = h.interceptor.fetch(&request).await.unwrap();
        assert_eq!(result.source, ResponseSource::Network);
        assert!(result.revalidation.is_none());
    }

    for name in h.storage.partition_names().await.unwrap() {
        assert!(h.storage.partition(&name).lookup(&request).await.unwrap().is_none());
    }
    server.verify().await;
}

#[tokio::test]
async fn test_bulk_and_placement_routes_are_never_cached() {
    let server = MockServer::start().await;
    let h = active_harness(&server).await;

    for p in ["/api/math/bulk-lessons/level-1", "/api/math/placement-test/level-3"] {
        Mock::given(method("GET"))
            .and(path(p))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .expect(2)
            .mount(&server)
            .await;
        let request = get(&server, p);
        h.interceptor.fetch(&request).await.unwrap();
        h.interceptor.fetch(&request).await.unwrap();
    }

    let shell = h.storage.partition(&h.config.shell_partition());
    assert_eq!(shell.len().await.unwrap(), PRECACHE_MANIFEST.len());
    server.verify().await;
}

#[tokio::test]
async fn test_non_get_requests_pass_through() {
    let server = MockServer::start().await;
    let h = active_harness(&server).await;

    Mock::given(method("POST"))
        .and(path("/api/progress"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{}/api/progress", server.uri())).unwrap();
    let request = Request::new(Method::POST, url);
    // handle() returns None without touching the network; only fetch() sends it
    assert!(h.interceptor.handle(&request).await.unwrap().is_none());
    let result = h.interceptor.fetch(&request).await.unwrap();
    assert_eq!(result.response.status, 201);

    let shell = h.storage.partition(&h.config.shell_partition());
    assert_eq!(shell.len().await.unwrap(), PRECACHE_MANIFEST.len());
    server.verify().await;
}

// ===== Stale-while-revalidate =====

#[tokio::test]
async fn test_curriculum_first_call_returns_network_and_caches_once() {
    let server = MockServer::start().await;
    let h = active_harness(&server).await;

    Mock::given(method("GET"))
        .and(path("/api/math/curriculum"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"version":1}"#))
        .mount(&server)
        .await;

    let request = get(&server, "/api/math/curriculum");
    let first = h.interceptor.fetch(&request).await.unwrap();
    assert_eq!(first.source, ResponseSource::Network);
    assert_eq!(first.response.text(), r#"{"version":1}"#);

    let metadata = h.storage.partition(&h.config.metadata_partition());
    assert_eq!(metadata.keys().await.unwrap(), vec![request.cache_key()]);
}

#[tokio::test]
async fn test_curriculum_serves_stale_and_overwrites_in_background() {
    let server = MockServer::start().await;
    let h = active_harness(&server).await;
    let request = get(&server, "/api/math/curriculum");

    Mock::given(method("GET"))
        .and(path("/api/math/curriculum"))
        .respond_with(ResponseTemplate::new(200).set_body_string("v1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/math/curriculum"))
        .respond_with(ResponseTemplate::new(200).set_body_string("v2"))
        .mount(&server)
        .await;

    h.interceptor.fetch(&request).await.unwrap();

    let second = h.interceptor.fetch(&request).await.unwrap();
    assert_eq!(second.source, ResponseSource::Cache);
    assert_eq!(second.response.text(), "v1");
    let refreshed = second
        .revalidation
        .expect("background refresh")
        .wait()
        .await
        .unwrap();
    assert_eq!(refreshed.text(), "v2");

    let metadata = h.storage.partition(&h.config.metadata_partition());
    assert_eq!(metadata.len().await.unwrap(), 1);
    assert_eq!(metadata.lookup(&request).await.unwrap().unwrap().data.text(), "v2");

    let third = h.interceptor.fetch(&request).await.unwrap();
    assert_eq!(third.source, ResponseSource::Cache);
    assert_eq!(third.response.text(), "v2");
    third.revalidation.unwrap().wait().await.unwrap();
}

#[tokio::test]
async fn test_curriculum_refresh_failure_keeps_cached_copy() {
    let server = MockServer::start().await;
    let h = active_harness(&server).await;
    let request = get(&server, "/api/math/curriculum");

    Mock::given(method("GET"))
        .and(path("/api/math/curriculum"))
        .respond_with(ResponseTemplate::new(200).set_body_string("cached"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/math/curriculum"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    h.interceptor.fetch(&request).await.unwrap();

    let stale = h.interceptor.fetch(&request).await.unwrap();
    assert_eq!(stale.response.text(), "cached");
    let refresh = stale.revalidation.unwrap().wait().await;
    assert!(matches!(refresh, Err(InterceptError::Api(ApiError::Network(_)))));

    let metadata = h.storage.partition(&h.config.metadata_partition());
    assert_eq!(metadata.lookup(&request).await.unwrap().unwrap().data.text(), "cached");
}

#[tokio::test]
async fn test_curriculum_without_cache_surfaces_network_failure() {
    let server = MockServer::start().await;
    let h = active_harness(&server).await;

    Mock::given(method("GET"))
        .and(path("/api/math/curriculum"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let result = h.interceptor.fetch(&get(&server, "/api/math/curriculum")).await;
    assert!(matches!(result, Err(InterceptError::Api(ApiError::Network(_)))));
    let metadata = h.storage.partition(&h.config.metadata_partition());
    assert!(metadata.is_empty().await.unwrap());
}

// ===== Cache-first =====

#[tokio::test]
async fn test_cache_first_hit_skips_network() {
    let server = MockServer::start().await;
    let h = active_harness(&server).await;

    Mock::given(method("GET"))
        .and(path("/static/app.css"))
        .respond_with(ResponseTemplate::new(200).set_body_string("body{}"))
        .expect(1)
        .mount(&server)
        .await;

    let request = get(&server, "/static/app.css");
    let first = h.interceptor.fetch(&request).await.unwrap();
    assert_eq!(first.source, ResponseSource::Network);
    let second = h.interceptor.fetch(&request).await.unwrap();
    assert_eq!(second.source, ResponseSource::Cache);
    assert_eq!(second.response.body, first.response.body);

    server.verify().await;
}

#[tokio::test]
async fn test_precached_shell_served_offline() {
    let server = MockServer::start().await;
    let h = active_harness(&server).await;
    server.reset().await;

    let result = h.interceptor.fetch(&get(&server, "/manifest.json")).await.unwrap();
    assert_eq!(result.source, ResponseSource::Cache);
    assert_eq!(result.response.text(), "asset /manifest.json");
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cache_first_never_stores_404() {
    let server = MockServer::start().await;
    let h = active_harness(&server).await;

    Mock::given(method("GET"))
        .and(path("/images/missing.png"))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&server)
        .await;

    let request = get(&server, "/images/missing.png");
    for _ in 0..2 {
        let result = h.interceptor.fetch(&request).await.unwrap();
        assert_eq!(result.source, ResponseSource::Network);
        assert_eq!(result.response.status, 404);
    }

    let shell = h.storage.partition(&h.config.shell_partition());
    assert!(shell.lookup(&request).await.unwrap().is_none());
    server.verify().await;
}

#[tokio::test]
async fn test_cache_first_skips_opaque_cross_origin() {
    let server = MockServer::start().await;
    let other = MockServer::start().await;
    let h = active_harness(&server).await;

    Mock::given(method("GET"))
        .and(path("/font.woff2"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1, 2, 3]))
        .expect(2)
        .mount(&other)
        .await;
    Mock::given(method("GET"))
        .and(path("/shared.css"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("p{}")
                .insert_header("access-control-allow-origin", "*"),
        )
        .expect(1)
        .mount(&other)
        .await;

    let opaque = get(&other, "/font.woff2");
    h.interceptor.fetch(&opaque).await.unwrap();
    let again = h.interceptor.fetch(&opaque).await.unwrap();
    assert_eq!(again.source, ResponseSource::Network);

    let cors = get(&other, "/shared.css");
    h.interceptor.fetch(&cors).await.unwrap();
    let cached = h.interceptor.fetch(&cors).await.unwrap();
    assert_eq!(cached.source, ResponseSource::Cache);

    other.verify().await;
}

#[tokio::test]
async fn test_cache_first_miss_propagates_network_error() {
    let server = MockServer::start().await;
    let h = active_harness(&server).await;

    Mock::given(method("GET"))
        .and(path("/slow.js"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let result = h.interceptor.fetch(&get(&server, "/slow.js")).await;
    assert!(matches!(result, Err(InterceptError::Api(ApiError::Network(_)))));
}
