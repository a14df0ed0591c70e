use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facepick::provider::ImageSource;
use facepick::{config, local, provider, storage, workflow};
use facepick_match::FaceEmbedding;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "facepick")]
#[command(
    version,
    about = "Find a customer's photos in an archive and deliver the best ones"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll reference photos for a customer
    Enroll {
        /// Customer name the references belong to
        #[arg(short, long)]
        customer: String,
        /// Reference photos showing the customer's face
        images: Vec<PathBuf>,
    },
    /// Scan an archive directory and deliver matched photos
    Run {
        /// Customer to match against
        #[arg(short, long)]
        customer: String,
        /// Directory holding the photo archive
        archive: PathBuf,
        /// Directory the delivery folders are created under
        #[arg(short, long)]
        out: PathBuf,
        /// Extra reference photos for this run only (not enrolled)
        #[arg(long)]
        reference: Vec<PathBuf>,
        /// Use the deterministic in-process engine instead of the configured one
        #[arg(long)]
        mock: bool,
    },
    /// Rank the photos in a directory against each other, no reference needed
    Select {
        /// Directory holding the photos to rank
        dir: PathBuf,
        /// How many to keep
        #[arg(short, long)]
        limit: Option<usize>,
        /// Use the deterministic in-process engine instead of the configured one
        #[arg(long)]
        mock: bool,
    },
    /// Remove all enrolled references for a customer
    Purge {
        #[arg(short, long)]
        customer: String,
    },
    /// Open config file in editor
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(None)?;

    match cli.command {
        Commands::Enroll { customer, images } => enroll(&cfg, &customer, &images).await,
        Commands::Run {
            customer,
            archive,
            out,
            reference,
            mock,
        } => run(&cfg, &customer, &archive, &out, &reference, mock).await,
        Commands::Select { dir, limit, mock } => select(&cfg, &dir, limit, mock).await,
        Commands::Purge { customer } => purge(&customer),
        Commands::Config => open_config(),
    }
}

fn engine(cfg: &config::Config, mock: bool) -> Result<Arc<dyn provider::EmbeddingProvider>> {
    if mock || cfg.engine_command.is_empty() {
        if !mock {
            warn!("no engine_command configured; using the in-process mock engine");
        }
        return Ok(Arc::new(provider::MockProvider::default()));
    }
    let engine = provider::SubprocessProvider::new(
        &cfg.engine_command,
        Duration::from_secs(cfg.engine_timeout_secs),
    )
    .context("engine_command in config is empty")?;
    Ok(Arc::new(engine))
}

fn local_images(paths: &[PathBuf]) -> Vec<provider::ArchiveImage> {
    paths
        .iter()
        .map(|p| provider::ArchiveImage {
            id: p.display().to_string(),
            name: p
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            location: provider::ImageLocation::Path(p.clone()),
        })
        .collect()
}

async fn enroll(cfg: &config::Config, customer: &str, images: &[PathBuf]) -> Result<()> {
    anyhow::ensure!(!images.is_empty(), "no reference images given");
    info!("Enrolling {} reference photo(s) for {customer}", images.len());

    let engine = engine(cfg, false)?;
    let images = local_images(images);
    let (accepted, rejections) =
        workflow::build_reference_set(engine.as_ref(), &images, &cfg.policy).await?;

    for rejection in &rejections {
        warn!("{rejection}");
    }
    if accepted.is_empty() {
        anyhow::bail!(
            "no usable reference photos. Use sharp, well-lit photos of one person \
             (hãy dùng ảnh rõ nét, đủ sáng của một người)."
        );
    }

    let records: Vec<storage::ReferenceRecord> = accepted
        .into_iter()
        .map(|face| storage::ReferenceRecord {
            id: uuid::Uuid::new_v4().to_string(),
            image_name: face.image_name,
            embedding: face.embedding,
        })
        .collect();
    let count = records.len();
    storage::ReferenceStore::default().append_records(customer, records)?;

    info!("✓ Enrolled {count} reference face(s) for {customer}");
    Ok(())
}

async fn run(
    cfg: &config::Config,
    customer: &str,
    archive: &Path,
    out: &Path,
    extra_reference: &[PathBuf],
    mock: bool,
) -> Result<()> {
    let engine = engine(cfg, mock)?;

    let mut reference: Vec<FaceEmbedding> = storage::ReferenceStore::default()
        .load_records(customer)
        .context("loading enrolled references")?
        .into_iter()
        .map(|r| r.embedding)
        .collect();

    if !extra_reference.is_empty() {
        let images = local_images(extra_reference);
        let (accepted, rejections) =
            workflow::build_reference_set(engine.as_ref(), &images, &cfg.policy).await?;
        for rejection in &rejections {
            warn!("{rejection}");
        }
        reference.extend(accepted.into_iter().map(|face| face.embedding));
    }
    if reference.is_empty() {
        anyhow::bail!("no references for {customer}. Run 'enroll' first or pass --reference.");
    }
    info!(
        "Scanning {} for {customer} with {} reference face(s)",
        archive.display(),
        reference.len()
    );

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; finishing in-flight work");
            ctrl_c.cancel();
        }
    });

    let mut source = local::DirectorySource::open(archive)
        .await
        .with_context(|| format!("opening archive {}", archive.display()))?;
    let sink = local::DirectorySink::new(out);
    let options = workflow::RunOptions::from_config(customer, cfg);

    let report = workflow::run_archive(
        engine,
        &mut source,
        &sink,
        reference,
        &options,
        &cancel,
    )
    .await?;

    match &report.folder_url {
        Some(url) => info!("✓ Delivered {} photo(s): {url}", report.matched),
        None => info!("No matches delivered"),
    }
    Ok(())
}

async fn select(cfg: &config::Config, dir: &Path, limit: Option<usize>, mock: bool) -> Result<()> {
    let engine = engine(cfg, mock)?;

    let mut source = local::DirectorySource::open(dir)
        .await
        .with_context(|| format!("opening {}", dir.display()))?;
    let mut images = Vec::new();
    while let Some(image) = source.next_image().await? {
        images.push(image);
    }
    anyhow::ensure!(!images.is_empty(), "no images found in {}", dir.display());
    info!("Ranking {} photo(s)", images.len());

    let mut options = workflow::RunOptions::from_config("pool", cfg);
    if let Some(limit) = limit {
        options.pool_limit = limit;
    }
    let ranked = workflow::rank_pool_images(engine, &images, &options).await?;

    for (i, photo) in ranked.iter().enumerate() {
        info!("{:>2}. {:.3}  {}", i + 1, photo.score, photo.image_id);
    }
    Ok(())
}

fn purge(customer: &str) -> Result<()> {
    info!("Purging enrolled references for {customer}");
    storage::ReferenceStore::default()
        .purge(customer)
        .context("Failed to purge reference records")?;
    info!("✓ All references purged for {customer}");
    Ok(())
}

fn open_config() -> Result<()> {
    let config_path = config::CONFIG_PATH.as_os_str();
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
