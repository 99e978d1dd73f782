//! CLI binary for puml-render.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use puml_render::{
    ArtifactCache, ArtifactKind, ConfigHandle, Debouncer, DirectoryResolver, Dispatcher,
    Environment, OutputFormat, RenderConfig, RenderRequest, RenderedDiagram, SourceWatcher,
    encoder,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Render PlantUML diagrams through a server, a local executable or an engine.
#[derive(Parser)]
#[command(name = "puml-render", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the artifact cache database.
    #[arg(long)]
    cache_db: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Command,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Render a diagram file once.
    Render {
        /// Diagram source file, or `-` for stdin.
        file: PathBuf,
        /// Output format (png, svg, txt). Defaults to the configured processor.
        #[arg(short, long)]
        format: Option<OutputFormat>,
        /// Output path, or `-` for stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Re-render a diagram file whenever it changes.
    Watch {
        /// Diagram source file.
        file: PathBuf,
        /// Output format (png, svg, txt). Defaults to the configured processor.
        #[arg(short, long)]
        format: Option<OutputFormat>,
        /// Output path.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Print the encoded key of a diagram file.
    Encode {
        /// Diagram source file, or `-` for stdin.
        file: PathBuf,
    },

    /// Print the diagram source behind an encoded key.
    Decode {
        /// Encoded diagram key.
        key: String,
    },

    /// Artifact cache maintenance.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Configuration inspection.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Evict artifacts not accessed within the retention window.
    Evict {
        /// Retention in days. Defaults to the configured value.
        #[arg(long)]
        days: Option<u32>,
    },
    /// Delete every cached artifact.
    Clear,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML.
    Show,
    /// Print the configuration file path.
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("puml_render=info,reqwest=warn,hyper=warn")),
        )
        .init();

    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(RenderConfig::default_config_path);
    let config = RenderConfig::load_or_default(&config_path)?;
    let cache_path = cli.cache_db.clone().unwrap_or_else(puml_render::puml_dirs::cache_db);

    match cli.command {
        Command::Render { file, format, out } => {
            let format = format.unwrap_or(config.default_processor);
            let dispatcher = open_dispatcher(config, &cache_path).await?;
            run_render(&dispatcher, &file, format, out).await
        }
        Command::Watch { file, format, out } => {
            let format = format.unwrap_or(config.default_processor);
            let dispatcher = open_dispatcher(config, &cache_path).await?;
            run_watch(Arc::new(dispatcher), file, format, out).await
        }
        Command::Encode { file } => {
            let source = read_source(&file).await?;
            let prepared = puml_render::source::prepare(&config.header, &source);
            println!("{}", encoder::encode(&prepared));
            Ok(())
        }
        Command::Decode { key } => {
            let source = encoder::decode(key.trim()).context("invalid diagram key")?;
            println!("{source}");
            Ok(())
        }
        Command::Cache { action } => run_cache(action, &config, &cache_path).await,
        Command::Config { action } => match action {
            ConfigAction::Show => {
                print!("{}", toml::to_string_pretty(&config)?);
                Ok(())
            }
            ConfigAction::Path => {
                println!("{}", config_path.display());
                Ok(())
            }
        },
    }
}

async fn open_dispatcher(config: RenderConfig, cache_path: &Path) -> anyhow::Result<Dispatcher> {
    config.validate()?;
    let cache = ArtifactCache::open(cache_path)?;
    let dispatcher = Dispatcher::new(
        ConfigHandle::new(config),
        cache,
        Environment::detect(),
        Arc::new(DirectoryResolver::current_dir()),
    );
    dispatcher.startup_maintenance().await;
    Ok(dispatcher)
}

async fn read_source(file: &Path) -> anyhow::Result<String> {
    if file == Path::new("-") {
        let mut source = String::new();
        std::io::Read::read_to_string(&mut std::io::stdin(), &mut source)?;
        return Ok(source);
    }
    tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("cannot read {}", file.display()))
}

fn working_dir_of(file: &Path) -> PathBuf {
    file.parent().map(Path::to_path_buf).unwrap_or_default()
}

fn default_output(config: &RenderConfig, input: &Path, format: OutputFormat) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "diagram".to_owned());
    let file_name = format!("{stem}.{}", format.extension());
    let export = config.export_path.trim();
    if export.is_empty() {
        working_dir_of(input).join(file_name)
    } else {
        let export = Path::new(export);
        let dir = if export.is_absolute() {
            export.to_path_buf()
        } else {
            working_dir_of(input).join(export)
        };
        dir.join(file_name)
    }
}

async fn run_render(
    dispatcher: &Dispatcher,
    file: &Path,
    format: OutputFormat,
    out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let source = read_source(file).await?;
    let request =
        RenderRequest::new(source, format.artifact_kind()).with_working_dir(working_dir_of(file));
    let diagram = dispatcher
        .render_with_cache(&request)
        .await
        .map_err(|e| anyhow::anyhow!("[{}] {}", e.code(), e.user_message()))?;

    let out = out.unwrap_or_else(|| default_output(&dispatcher.config().snapshot(), file, format));
    write_output(&diagram, &out).await
}

async fn write_output(diagram: &RenderedDiagram, out: &Path) -> anyhow::Result<()> {
    let bytes = if diagram.kind == ArtifactKind::Raster {
        base64::engine::general_purpose::STANDARD
            .decode(&diagram.body)
            .context("cached PNG is not valid base64")?
    } else {
        diagram.body.clone().into_bytes()
    };

    if out == Path::new("-") {
        std::io::stdout().write_all(&bytes)?;
        return Ok(());
    }

    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(out, &bytes)
        .await
        .with_context(|| format!("cannot write {}", out.display()))?;
    if let Some(map) = &diagram.click_map {
        tokio::fs::write(out.with_extension("cmapx"), map).await?;
    }
    info!(
        path = %out.display(),
        from_cache = diagram.from_cache,
        "diagram written"
    );
    Ok(())
}

async fn run_watch(
    dispatcher: Arc<Dispatcher>,
    file: PathBuf,
    format: OutputFormat,
    out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut watcher = SourceWatcher::new(&file)
        .with_context(|| format!("cannot watch {}", file.display()))?;
    let (debouncer, fired) = Debouncer::from_config(dispatcher.config().clone());
    let mut outcomes = Arc::clone(&dispatcher).serve(fired);
    let target = file.display().to_string();
    let working_dir = working_dir_of(&file);
    let out = out.unwrap_or_else(|| default_output(&dispatcher.config().snapshot(), &file, format));

    // Render the current contents once, then on every edit.
    let mut last_seen = read_source(&file).await?;
    debouncer.trigger(
        target.clone(),
        RenderRequest::new(last_seen.clone(), format.artifact_kind()).with_working_dir(&working_dir),
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            changed = watcher.changed() => {
                let Some(path) = changed else { break };
                let source = match tokio::fs::read_to_string(&path).await {
                    Ok(source) => source,
                    Err(e) => {
                        warn!(error = %e, file = %path.display(), "cannot read watched file");
                        continue;
                    }
                };
                // Metadata-only events leave the content unchanged.
                if source != last_seen {
                    last_seen = source.clone();
                    let request = RenderRequest::new(source, format.artifact_kind())
                        .with_working_dir(&working_dir);
                    debouncer.trigger(target.clone(), request);
                }
            }
            Some(outcome) = outcomes.recv() => match outcome.result {
                Ok(diagram) => write_output(&diagram, &out).await?,
                Err(e) => warn!(code = e.code(), "{}", e.user_message()),
            },
            _ = &mut ctrl_c => break,
        }
    }
    Ok(())
}

async fn run_cache(action: CacheAction, config: &RenderConfig, path: &Path) -> anyhow::Result<()> {
    let cache = ArtifactCache::open(path)?;
    match action {
        CacheAction::Evict { days } => {
            let days = days.unwrap_or(config.cache_days).max(1);
            let retention = Duration::from_secs(u64::from(days) * 24 * 60 * 60);
            let report = cache.evict_older_than(retention).await?;
            println!(
                "scanned {} diagrams, evicted {}",
                report.scanned, report.evicted
            );
        }
        CacheAction::Clear => {
            let removed = cache.clear().await?;
            println!("removed {removed} entries");
        }
    }
    Ok(())
}
