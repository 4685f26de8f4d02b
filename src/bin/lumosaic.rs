use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lumosaic", version, about = "Turn a video into a brightness-matched photo mosaic")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Normalize a reference directory into a brightness catalog.
    Catalog(CatalogArgs),
    /// Mosaic a single image into a PNG.
    Frame(FrameArgs),
    /// Mosaic a whole video into an MP4 (requires `ffmpeg` on PATH).
    Render(RenderArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// JSON config file. Flags given on the command line override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Tile edge length in pixels.
    #[arg(long)]
    tile_size: Option<u32>,

    /// Edge length reference images are normalized to.
    #[arg(long)]
    canonical_size: Option<u32>,

    /// Concurrent workers (defaults to CPU count - 1, at most 8).
    #[arg(long)]
    workers: Option<usize>,

    /// How references with identical brightness are kept.
    #[arg(long, value_enum)]
    policy: Option<PolicyChoice>,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct CatalogChoice {
    /// Directory of reference images to normalize.
    #[arg(long)]
    refs: Option<PathBuf>,

    /// Existing `catalog.json` to reuse instead of normalizing references again.
    #[arg(long)]
    catalog: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct CatalogArgs {
    /// Directory of reference images.
    #[arg(long)]
    refs: PathBuf,

    /// Output directory for normalized images and `catalog.json`.
    #[arg(long)]
    out: PathBuf,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Parser, Debug)]
struct FrameArgs {
    /// Input image.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,

    #[command(flatten)]
    source: CatalogChoice,

    /// Where normalized references go when `--refs` is used.
    #[arg(long, default_value = "lumosaic-catalog")]
    catalog_dir: PathBuf,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Input video.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Output root; receives `catalog/`, `frames/`, `mosaic/` and `mosaic.mp4`.
    #[arg(long)]
    out_dir: PathBuf,

    #[command(flatten)]
    source: CatalogChoice,

    /// Frame rate for extraction and re-encoding.
    #[arg(long)]
    fps: Option<u32>,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PolicyChoice {
    KeepFirst,
    KeepAll,
}

impl From<PolicyChoice> for lumosaic::CollisionPolicy {
    fn from(p: PolicyChoice) -> Self {
        match p {
            PolicyChoice::KeepFirst => Self::KeepFirst,
            PolicyChoice::KeepAll => Self::KeepAll,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Catalog(args) => cmd_catalog(args),
        Command::Frame(args) => cmd_frame(args),
        Command::Render(args) => cmd_render(args),
    }
}

fn load_config(common: &CommonArgs) -> anyhow::Result<lumosaic::MosaicConfig> {
    let mut cfg = match &common.config {
        Some(path) => lumosaic::MosaicConfig::from_path(path)?,
        None => lumosaic::MosaicConfig::default(),
    };
    if let Some(t) = common.tile_size {
        cfg.tile_size = t;
    }
    if let Some(c) = common.canonical_size {
        cfg.canonical_size = c;
    }
    if common.workers.is_some() {
        cfg.workers = common.workers;
    }
    if let Some(p) = common.policy {
        cfg.collision_policy = p.into();
    }
    cfg.validate()?;
    Ok(cfg)
}

fn catalog_source(choice: CatalogChoice) -> anyhow::Result<lumosaic::CatalogSource> {
    match (choice.refs, choice.catalog) {
        (Some(refs_dir), None) => Ok(lumosaic::CatalogSource::Build { refs_dir }),
        (None, Some(manifest)) => Ok(lumosaic::CatalogSource::Manifest(manifest)),
        _ => anyhow::bail!("pass exactly one of --refs or --catalog"),
    }
}

fn cmd_catalog(args: CatalogArgs) -> anyhow::Result<()> {
    let cfg = load_config(&args.common)?;
    let pixels = lumosaic::pixels_for(&cfg);
    let pool = lumosaic::FramePool::new(cfg.effective_workers())?;
    let catalog = lumosaic::prepare_catalog(
        &lumosaic::CatalogSource::Build {
            refs_dir: args.refs,
        },
        &args.out,
        &cfg,
        pixels.as_ref(),
        &pool,
    )?;
    pool.shutdown();

    println!(
        "wrote {} references to {}",
        catalog.len(),
        args.out.join(lumosaic::CATALOG_MANIFEST_FILE).display()
    );
    Ok(())
}

fn cmd_frame(args: FrameArgs) -> anyhow::Result<()> {
    let cfg = load_config(&args.common)?;
    let source = catalog_source(args.source)?;
    let tally = lumosaic::mosaic_image(&args.in_path, &args.out, &source, &args.catalog_dir, &cfg)
        .with_context(|| format!("mosaic '{}'", args.in_path.display()))?;

    println!(
        "wrote {} ({}/{} tiles matched)",
        args.out.display(),
        tally.matched,
        tally.total
    );
    Ok(())
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let mut cfg = load_config(&args.common)?;
    if let Some(fps) = args.fps {
        cfg.fps = fps;
    }
    let source = catalog_source(args.source)?;
    let layout = lumosaic::OutputLayout::new(args.out_dir);

    let report = lumosaic::render_mosaic_video(&args.in_path, &source, &layout, &cfg)?;
    let summary = &report.frames.summary;
    println!(
        "wrote {} ({} frames encoded; {}/{} frames ok, {} failed; {} references; cache {} hits / {} misses)",
        report.video_path.display(),
        report.frames_encoded,
        summary.succeeded,
        summary.total,
        summary.failed + summary.abandoned,
        report.catalog_size,
        report.frames.cache.hits,
        report.frames.cache.misses,
    );
    Ok(())
}
