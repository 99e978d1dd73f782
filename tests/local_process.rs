//! Local renderer process tests.
//!
//! Stand-in renderers are small `sh` scripts that record their arguments
//! and echo stdin, so the tests exercise real process spawning and piping.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine as _;
use puml_render::{
    ArtifactCache, ArtifactKind, ConfigHandle, DirectoryResolver, Dispatcher, Environment,
    RenderConfig, RenderError,
};

const SOURCE: &str = "@startuml\nAlice -> Bob: hello\n@enduml";

/// Echoes stdin for image renders and records the arguments it received.
const ECHO_RENDERER: &str = r#"
case " $* " in
  *" -pipemap "*)
    cat > /dev/null
    printf '<map id="m"><area href="x"/></map>'
    exit 0
    ;;
esac
printf '%s\n' "$@" > "$0.args"
cat
"#;

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn dispatcher(root: &Path, local_jar: &str) -> Dispatcher {
    let config = RenderConfig {
        local_jar: local_jar.into(),
        dot_path: "dot".into(),
        ..RenderConfig::default()
    };
    Dispatcher::new(
        ConfigHandle::new(config),
        ArtifactCache::open_in_memory().unwrap(),
        Environment::Desktop,
        Arc::new(DirectoryResolver::new(root)),
    )
}

fn recorded_args(script: &Path) -> Vec<String> {
    let log = std::fs::read_to_string(format!("{}.args", script.display())).unwrap();
    log.lines().map(str::to_owned).collect()
}

#[tokio::test]
async fn png_render_pipes_source_and_collects_click_map() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "plantuml", ECHO_RENDERER);
    let dispatcher = dispatcher(dir.path(), script.to_str().unwrap());

    let rendered = dispatcher
        .render(SOURCE, ArtifactKind::Raster, Path::new(""))
        .await
        .unwrap();

    assert_eq!(
        rendered.body,
        base64::engine::general_purpose::STANDARD.encode(SOURCE)
    );
    assert_eq!(
        rendered.click_map.as_deref(),
        Some("<map id=\"m\"><area href=\"x\"/></map>")
    );
    assert_eq!(
        recorded_args(&script),
        [
            "-Djava.awt.headless=true",
            "-charset",
            "utf-8",
            "-graphvizdot",
            "dot",
            "-tpng",
            "-pipe"
        ]
    );
}

#[tokio::test]
async fn binary_png_output_is_base64_of_exact_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "plantuml",
        r#"
case " $* " in
  *" -pipemap "*) cat > /dev/null; exit 0 ;;
esac
cat > /dev/null
printf '\211PNG\r\n\032\n\377\000'
"#,
    );
    let dispatcher = dispatcher(dir.path(), script.to_str().unwrap());

    let rendered = dispatcher
        .render(SOURCE, ArtifactKind::Raster, Path::new(""))
        .await
        .unwrap();

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&rendered.body)
        .unwrap();
    assert_eq!(bytes, b"\x89PNG\r\n\x1a\n\xff\x00");
    assert_eq!(rendered.click_map, None);
}

#[tokio::test]
async fn svg_render_returns_stdout_text() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "plantuml", ECHO_RENDERER);
    let dispatcher = dispatcher(dir.path(), script.to_str().unwrap());

    let rendered = dispatcher
        .render(SOURCE, ArtifactKind::Vector, Path::new(""))
        .await
        .unwrap();

    assert_eq!(rendered.body, SOURCE);
    assert!(recorded_args(&script).contains(&"-tsvg".to_owned()));
}

#[tokio::test]
async fn relative_executable_resolves_against_document_root() {
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "tools/plantuml", ECHO_RENDERER);
    let dispatcher = dispatcher(dir.path(), "tools/plantuml");

    let rendered = dispatcher
        .render(SOURCE, ArtifactKind::AsciiArt, Path::new(""))
        .await
        .unwrap();
    assert_eq!(rendered.body, SOURCE);
}

#[tokio::test]
async fn renderer_runs_in_working_directory() {
    let dir = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "plantuml", "cat > /dev/null\npwd\n");
    let dispatcher = dispatcher(dir.path(), script.to_str().unwrap());

    let rendered = dispatcher
        .render(SOURCE, ArtifactKind::Vector, work.path())
        .await
        .unwrap();

    let reported = PathBuf::from(rendered.body.trim());
    assert_eq!(
        reported.canonicalize().unwrap(),
        work.path().canonicalize().unwrap()
    );
}

#[tokio::test]
async fn exit_code_one_is_render_failure_with_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "plantuml",
        "cat > /dev/null\necho 'Syntax Error?' >&2\nexit 1\n",
    );
    let dispatcher = dispatcher(dir.path(), script.to_str().unwrap());

    let err = dispatcher
        .render(SOURCE, ArtifactKind::Vector, Path::new(""))
        .await
        .unwrap_err();

    match err {
        RenderError::RenderProcessFailed { exit_code, stderr } => {
            assert_eq!(exit_code, Some(1));
            assert!(stderr.contains("Syntax Error?"));
        }
        other => panic!("expected RenderProcessFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn other_exit_codes_keep_the_error_image() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "plantuml",
        "cat > /dev/null\nprintf '<svg>error</svg>'\nexit 200\n",
    );
    let dispatcher = dispatcher(dir.path(), script.to_str().unwrap());

    let rendered = dispatcher
        .render(SOURCE, ArtifactKind::Vector, Path::new(""))
        .await
        .unwrap();
    assert_eq!(rendered.body, "<svg>error</svg>");
}

#[tokio::test]
async fn missing_executable_is_spawn_failure() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("no-such-plantuml");
    let dispatcher = dispatcher(dir.path(), missing.to_str().unwrap());

    let err = dispatcher
        .render(SOURCE, ArtifactKind::Vector, Path::new(""))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SPAWN_FAILED");
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn second_render_does_not_spawn() {
    let dir = tempfile::tempdir().unwrap();
    let counter = dir.path().join("count");
    let script = write_script(
        dir.path(),
        "plantuml",
        &format!("echo run >> '{}'\ncat\n", counter.display()),
    );
    let dispatcher = dispatcher(dir.path(), script.to_str().unwrap());

    for _ in 0..3 {
        dispatcher
            .render(SOURCE, ArtifactKind::Vector, Path::new(""))
            .await
            .unwrap();
    }

    let runs = std::fs::read_to_string(&counter).unwrap();
    assert_eq!(runs.lines().count(), 1);
}
