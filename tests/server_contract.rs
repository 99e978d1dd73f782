//! Remote server contract tests.
//!
//! Verify the URL layout requested from a PlantUML server, how responses are
//! cached, and how server-side failures are classified.

use std::path::Path;
use std::sync::Arc;

use base64::Engine as _;
use puml_render::{
    ArtifactCache, ArtifactKind, ConfigHandle, DirectoryResolver, Dispatcher, Environment,
    RenderConfig, encoder,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SOURCE: &str = "@startuml\nAlice -> Bob: hello\n@enduml";
const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR";

fn dispatcher_for(server: &MockServer, environment: Environment) -> Dispatcher {
    let config = RenderConfig {
        server_url: server.uri(),
        request_timeout_secs: 5,
        ..RenderConfig::default()
    };
    Dispatcher::new(
        ConfigHandle::new(config),
        ArtifactCache::open_in_memory().expect("in-memory cache"),
        environment,
        Arc::new(DirectoryResolver::new(std::env::temp_dir())),
    )
}

// ────────────────────────────────────────────────────────────────────────────
// Request layout
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn png_render_fetches_image_and_map_then_caches_both() {
    let server = MockServer::start().await;
    let key = encoder::encode(SOURCE);

    Mock::given(method("GET"))
        .and(path(format!("/png/{key}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PNG_BYTES))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/map/{key}")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<map id=\"plantuml_map\"><area href=\"x\"/></map>"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = dispatcher_for(&server, Environment::Desktop);
    let rendered = dispatcher
        .render(SOURCE, ArtifactKind::Raster, Path::new(""))
        .await
        .expect("render");

    let expected_body = base64::engine::general_purpose::STANDARD.encode(PNG_BYTES);
    assert_eq!(rendered.key, key);
    assert_eq!(rendered.body, expected_body);
    assert!(rendered.click_map.as_deref().unwrap().contains("plantuml_map"));

    let cache = dispatcher.cache();
    assert_eq!(
        cache.get(ArtifactKind::Raster, &key).await.unwrap().as_deref(),
        Some(expected_body.as_str())
    );
    assert!(cache.get(ArtifactKind::ClickMap, &key).await.unwrap().is_some());
    assert!(cache.last_accessed(&key).await.unwrap().is_some());

    // Served from the cache: the `.expect(1)` above fails on a second request.
    let again = dispatcher
        .render(SOURCE, ArtifactKind::Raster, Path::new(""))
        .await
        .expect("cached render");
    assert!(again.from_cache);
    assert_eq!(again.click_map, rendered.click_map);
}

#[tokio::test]
async fn empty_map_is_tolerated_and_not_cached() {
    let server = MockServer::start().await;
    let key = encoder::encode(SOURCE);

    Mock::given(method("GET"))
        .and(path(format!("/png/{key}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PNG_BYTES))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/map/{key}")))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = dispatcher_for(&server, Environment::Desktop);
    let rendered = dispatcher
        .render(SOURCE, ArtifactKind::Raster, Path::new(""))
        .await
        .expect("render");

    assert_eq!(
        rendered.body,
        base64::engine::general_purpose::STANDARD.encode(PNG_BYTES)
    );
    assert_eq!(rendered.click_map, None);
    let cache = dispatcher.cache();
    assert!(cache.get(ArtifactKind::Raster, &key).await.unwrap().is_some());
    assert_eq!(cache.get(ArtifactKind::ClickMap, &key).await.unwrap(), None);
}

#[tokio::test]
async fn svg_render_uses_svg_segment() {
    let server = MockServer::start().await;
    let key = encoder::encode(SOURCE);

    Mock::given(method("GET"))
        .and(path(format!("/svg/{key}")))
        .respond_with(ResponseTemplate::new(200).set_body_string("<svg></svg>"))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = dispatcher_for(&server, Environment::Desktop);
    let rendered = dispatcher
        .render(SOURCE, ArtifactKind::Vector, Path::new(""))
        .await
        .expect("render");
    assert_eq!(rendered.body, "<svg></svg>");
    assert_eq!(rendered.click_map, None);
}

#[tokio::test]
async fn ascii_render_uses_txt_segment() {
    let server = MockServer::start().await;
    let key = encoder::encode(SOURCE);

    Mock::given(method("GET"))
        .and(path(format!("/txt/{key}")))
        .respond_with(ResponseTemplate::new(200).set_body_string("Alice -> Bob"))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = dispatcher_for(&server, Environment::Mobile);
    let rendered = dispatcher
        .render(SOURCE, ArtifactKind::AsciiArt, Path::new(""))
        .await
        .expect("render");
    assert_eq!(rendered.body, "Alice -> Bob");
}

// ────────────────────────────────────────────────────────────────────────────
// Failure classification
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn ascii_answered_with_png_is_unsupported() {
    let server = MockServer::start().await;
    let key = encoder::encode(SOURCE);

    Mock::given(method("GET"))
        .and(path(format!("/txt/{key}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PNG_BYTES))
        .mount(&server)
        .await;

    let dispatcher = dispatcher_for(&server, Environment::Desktop);
    let err = dispatcher
        .render(SOURCE, ArtifactKind::AsciiArt, Path::new(""))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "UNSUPPORTED_OUTPUT_KIND");
    assert_eq!(
        err.user_message(),
        "Your configured PlantUML server does not support ASCII art"
    );
    assert_eq!(
        dispatcher
            .cache()
            .get(ArtifactKind::AsciiArt, &key)
            .await
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn server_error_is_network_failure_and_not_cached() {
    let server = MockServer::start().await;
    let key = encoder::encode(SOURCE);

    Mock::given(method("GET"))
        .and(path(format!("/svg/{key}")))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dispatcher = dispatcher_for(&server, Environment::Desktop);
    let err = dispatcher
        .render(SOURCE, ArtifactKind::Vector, Path::new(""))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "NETWORK_FAILURE");
    assert!(err.is_retryable());
    assert!(err.to_string().contains("503"));
    assert_eq!(dispatcher.cache().last_accessed(&key).await.unwrap(), None);
}

#[tokio::test]
async fn failed_map_request_fails_the_png_render() {
    let server = MockServer::start().await;
    let key = encoder::encode(SOURCE);

    Mock::given(method("GET"))
        .and(path(format!("/png/{key}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PNG_BYTES))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/map/{key}")))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dispatcher = dispatcher_for(&server, Environment::Desktop);
    let err = dispatcher
        .render(SOURCE, ArtifactKind::Raster, Path::new(""))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NETWORK_FAILURE");
}

#[tokio::test]
async fn mobile_ignores_local_executable() {
    let server = MockServer::start().await;
    let key = encoder::encode(SOURCE);

    Mock::given(method("GET"))
        .and(path(format!("/svg/{key}")))
        .respond_with(ResponseTemplate::new(200).set_body_string("<svg/>"))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = dispatcher_for(&server, Environment::Mobile);
    dispatcher
        .config()
        .replace(RenderConfig {
            server_url: server.uri(),
            local_jar: "/does/not/exist/plantuml.jar".into(),
            ..RenderConfig::default()
        })
        .unwrap();

    let rendered = dispatcher
        .render(SOURCE, ArtifactKind::Vector, Path::new(""))
        .await
        .expect("mobile renders remotely");
    assert_eq!(rendered.body, "<svg/>");
}
