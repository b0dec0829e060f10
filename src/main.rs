//! A CLI tool that renders DICOM slices and manages their sidecar caches.
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use dicom_gray16::{
    ClutMode, DicomDecoder, Pipeline, PipelineConfig, PipelineMessage, WindowLevel, WindowPreset,
    clear_cache, config::DEFAULT_CACHE_EXTENSION, render,
};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{Level, error, info, warn};

const PROGRESS_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})";

/// Decode DICOM slices into cached 16-bit grayscale images
#[derive(Debug, Parser)]
#[command(version)]
struct App {
    #[command(subcommand)]
    command: Command,

    /// Extension appended to a source file name for its cache file
    #[arg(long = "cache-ext", global = true, default_value = DEFAULT_CACHE_EXTENSION)]
    cache_extension: String,

    /// Largest pixel buffer to allocate for one image, in bytes
    #[arg(long = "max-pixel-bytes", global = true)]
    max_pixel_bytes: Option<usize>,

    /// Print more information about what is going on
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load a DICOM file (from its cache when possible) and save it as an image
    View {
        /// Path to the DICOM file
        file: PathBuf,

        /// Path to the output image
        /// (default is to replace input extension with `.png`)
        #[arg(short = 'o', long = "out")]
        output: Option<PathBuf>,

        /// Color lookup: normal, inverse or rainbow
        #[arg(long, default_value = "normal")]
        clut: ClutMode,

        /// Window center, in modality units
        #[arg(long, requires = "width", allow_negative_numbers = true)]
        center: Option<f32>,

        /// Window width, in modality units
        #[arg(long, requires = "center")]
        width: Option<f32>,

        /// CT window preset: bone, cranium, lung or abdomen
        #[arg(long, conflicts_with_all = ["center", "width"])]
        preset: Option<WindowPreset>,
    },
    /// Decode and cache every DICOM file of a directory
    Cache {
        dir: PathBuf,
    },
    /// Delete the cache files of a directory
    ClearCache {
        dir: PathBuf,
    },
    /// List the elements of a DICOM file
    Info {
        file: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let App {
        command,
        cache_extension,
        max_pixel_bytes,
        verbose,
    } = App::parse();

    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(if verbose { Level::DEBUG } else { Level::INFO })
            .finish(),
    )
    .unwrap_or_else(|e| {
        eprintln!("[ERROR] Could not set up global logging subscriber: {e}");
    });

    let mut config = PipelineConfig::new().with_cache_extension(cache_extension);
    if let Some(bytes) = max_pixel_bytes {
        config = config.with_max_pixel_bytes(bytes);
    }
    let pipeline = Pipeline::new(config);

    match command {
        Command::View {
            file,
            output,
            clut,
            center,
            width,
            preset,
        } => {
            let window = preset
                .map(WindowLevel::from)
                .or_else(|| center.zip(width).map(|(c, w)| WindowLevel::new(c, w)));
            view(&pipeline, file, output, window, clut).await
        }
        Command::Cache { dir } => cache_directory(&pipeline, dir).await,
        Command::ClearCache { dir } => {
            let removed = clear_cache(&dir, pipeline.config()).unwrap_or_else(|e| {
                error!("{e}");
                std::process::exit(-1);
            });
            println!("Removed {removed} cache file(s) from {}", dir.display());
        }
        Command::Info { file } => {
            let object = DicomDecoder::read_object(&file, pipeline.config()).unwrap_or_else(|e| {
                error!("{}: {e}", file.display());
                std::process::exit(-1);
            });
            println!("Transfer syntax: {}", object.meta.transfer_syntax_uid);
            for row in object.describe() {
                println!("{} {:<40} {} {}", row.tag, row.name, row.vr, row.value);
            }
        }
    }
}

async fn view(
    pipeline: &Pipeline,
    file: PathBuf,
    output: Option<PathBuf>,
    window: Option<WindowLevel>,
    clut: ClutMode,
) {
    let mut handle = pipeline.load(&file);
    let mut image = None;
    while let Some(message) = handle.next_message().await {
        match message {
            PipelineMessage::Started { .. } => info!("Decoding {}", file.display()),
            PipelineMessage::Finished { image: loaded } => image = loaded,
            PipelineMessage::FatalError { reason } => {
                error!("{}: {reason}", file.display());
                std::process::exit(-1);
            }
            PipelineMessage::OutOfMemory { path } => {
                error!(
                    "Out of memory while decoding {}, cache the directory first",
                    path.display()
                );
                std::process::exit(-2);
            }
            PipelineMessage::ProgressUpdate { .. } | PipelineMessage::RecoverableError { .. } => {}
        }
    }
    let Some(image) = image else {
        error!("{}: no image was produced", file.display());
        std::process::exit(-1);
    };

    if let Some(labels) = image.orientation_labels() {
        println!("Rows: {}, columns: {}", labels.row, labels.column);
    }

    let rendered = render(&image, window, clut).unwrap_or_else(|| {
        error!("Could not build a {}x{} image", image.width(), image.height());
        std::process::exit(-3);
    });

    let output = output.unwrap_or_else(|| {
        let mut path = file.clone();
        path.set_extension("png");
        path
    });
    rendered.save(&output).unwrap_or_else(|e| {
        error!("{e}");
        std::process::exit(-4);
    });
    println!("Image saved to {}", output.display());
}

async fn cache_directory(pipeline: &Pipeline, dir: PathBuf) {
    let mut messages = std::pin::pin!(pipeline.cache_directory(&dir).into_stream());
    let mut progress = ProgressBar::hidden();
    let mut total = 0;
    let mut failures = 0;

    while let Some(message) = messages.next().await {
        match message {
            PipelineMessage::Started { expected_total } => {
                total = expected_total.unwrap_or_default();
                progress = ProgressBar::new(total as u64);
                progress.set_style(
                    ProgressStyle::with_template(PROGRESS_TEMPLATE)
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("#>-"),
                );
            }
            PipelineMessage::ProgressUpdate { current } => progress.set_position(current as u64),
            PipelineMessage::RecoverableError { path, reason } => {
                failures += 1;
                progress.suspend(|| warn!("Skipped {}: {reason}", path.display()));
            }
            PipelineMessage::Finished { .. } => progress.finish(),
            PipelineMessage::FatalError { reason } => {
                progress.abandon();
                error!("{}: {reason}", dir.display());
                std::process::exit(-1);
            }
            PipelineMessage::OutOfMemory { path } => {
                progress.abandon();
                error!("Out of memory while caching {}", path.display());
                std::process::exit(-2);
            }
        }
    }

    println!(
        "Cached {} of {total} file(s) in {}",
        total - failures,
        dir.display()
    );
}
