//! Thin binary entry point. CLI/HTTP presentation is explicitly out of scope
//! for the core (`spec.md` §1); this only resolves an input path, wires the
//! pipeline's collaborators from `Config`, and drives documents through it.

use std::path::{Path, PathBuf};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use se_letters_core::config::CommandLineArgs;
use se_letters_core::models::Document;
use se_letters_core::{Config, PipelineContext, ProcessingStatus};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    init_logging(&config);

    tracing::info!("document-to-catalog matching pipeline starting up");

    let context = PipelineContext::connect(&config).await?;
    let pipeline = context.into_pipeline(&config);

    let cancellation = CancellationToken::new();
    let cancel_on_ctrl_c = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("received ctrl-c, cancelling in-flight documents");
            cancel_on_ctrl_c.cancel();
        }
    });

    let cli = CommandLineArgs::parse();
    let input = cli.input.ok_or("an input document or directory path is required")?;
    let documents = collect_documents(Path::new(&input))?;
    tracing::info!(count = documents.len(), "documents discovered");

    let mut failures = 0usize;
    for path in documents {
        let document = match build_document(&path) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "failed to read document identity");
                failures += 1;
                continue;
            },
        };

        let result = pipeline.process_document(&document, &cancellation).await;
        tracing::info!(
            path = %path.display(),
            status = ?result.status,
            letter_id = ?result.letter_id,
            elapsed_ms = result.elapsed_ms,
            confidence = result.confidence,
            "document processed"
        );
        if result.status == ProcessingStatus::Failed {
            failures += 1;
        }

        if cancellation.is_cancelled() {
            tracing::warn!("stopping remaining documents after cancellation");
            break;
        }
    }

    if failures > 0 {
        tracing::warn!(failures, "pipeline run completed with failures");
        std::process::exit(1);
    }

    Ok(())
}

fn init_logging(config: &Config) {
    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    if let Some(log_file) = &config.logging.file {
        let log_path = Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path.file_name().and_then(|n| n.to_str()).unwrap_or("se-letters.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
        // Leaking the guard keeps the non-blocking writer alive for the
        // process lifetime; this binary never tears down the subscriber.
        std::mem::forget(_guard);
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

const DOCUMENT_EXTENSIONS: [&str; 3] = ["pdf", "doc", "docx"];

/// A single file is processed as-is; a directory is scanned (non-recursive)
/// for files with a recognized document extension.
fn collect_documents(input: &Path) -> std::io::Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }

    let mut documents = Vec::new();
    for entry in std::fs::read_dir(input)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_document = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| DOCUMENT_EXTENSIONS.contains(&e.to_lowercase().as_str()))
            .unwrap_or(false);
        if is_document {
            documents.push(path);
        }
    }
    documents.sort();
    Ok(documents)
}

fn build_document(path: &Path) -> std::io::Result<Document> {
    let metadata = std::fs::metadata(path)?;
    let content_hash = se_letters_core::identity::file_hash(path)?;
    let mime_hint = Document::mime_hint_from_extension(path);
    Ok(Document { path: path.to_path_buf(), byte_size: metadata.len(), content_hash, mime_hint })
}
