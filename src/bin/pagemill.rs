//! Command-line driver for the pagemill library.
//!
//! Converts one PDF to Markdown, optionally writes the relational-insert
//! script, and optionally publishes chunks into the vector store.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pagemill::{
    process_file, publish, render_insert_script, InsertScriptOptions, OpenAiEmbeddings,
    OpenAiVision, PageSeparator, PipelineConfig, RestVectorStore, TesseractOcr,
};

#[derive(Parser, Debug)]
#[command(
    name = "pagemill",
    version,
    about = "Convert PDF documents to structured Markdown, with optional OCR, image analysis, and vector-store ingestion"
)]
struct Cli {
    /// Input PDF file.
    input: PathBuf,

    /// Output Markdown file (defaults to the input name with .md).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Also write a relational-insert script to this path.
    #[arg(long)]
    sql: Option<PathBuf>,

    /// Include the schema-setup DDL in the insert script.
    #[arg(long, requires = "sql")]
    sql_setup: bool,

    /// Run OCR on pages without native text (requires tesseract).
    #[arg(long)]
    ocr: bool,

    /// OCR language hint set.
    #[arg(long, default_value = "rus+eng")]
    ocr_languages: String,

    /// Describe embedded images through the vision model.
    #[arg(long)]
    analyze_images: bool,

    /// Publish chunks and embeddings into the vector store.
    #[arg(long)]
    publish: bool,

    /// API key for the vision and embedding models.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Vision model identifier.
    #[arg(long, default_value = "gpt-4o")]
    vision_model: String,

    /// Embedding model identifier.
    #[arg(long, default_value = "text-embedding-3-small")]
    embedding_model: String,

    /// Vector store base URL.
    #[arg(long, env = "SUPABASE_URL")]
    store_url: Option<String>,

    /// Vector store API key.
    #[arg(long, env = "SUPABASE_KEY", hide_env_values = true)]
    store_key: Option<String>,

    /// Chunk character budget.
    #[arg(long, default_value_t = 1500)]
    chunk_size: usize,

    /// Insert `<!-- page N -->` markers between pages.
    #[arg(long)]
    page_markers: bool,

    /// Include YAML front matter with document metadata.
    #[arg(long)]
    metadata: bool,

    /// Scratch directory for intermediate rasters.
    #[arg(long, env = "PAGEMILL_TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = build_config(&cli)?;

    let output = process_file(&cli.input, &config)
        .await
        .with_context(|| format!("failed to process {}", cli.input.display()))?;

    let out_path = cli
        .output
        .clone()
        .unwrap_or_else(|| cli.input.with_extension("md"));
    std::fs::write(&out_path, &output.markdown)
        .with_context(|| format!("failed to write {}", out_path.display()))?;
    eprintln!(
        "{}: {} pages ({} OCR, {} failed), {} chunks -> {}",
        output.metadata.title,
        output.stats.total_pages,
        output.stats.ocr_pages,
        output.stats.failed_pages,
        output.chunks.len(),
        out_path.display(),
    );
    for warning in &output.warnings {
        eprintln!("warning: {warning}");
    }

    if let Some(sql_path) = &cli.sql {
        let script = render_insert_script(
            &output,
            &InsertScriptOptions {
                include_setup: cli.sql_setup,
            },
        );
        std::fs::write(sql_path, script)
            .with_context(|| format!("failed to write {}", sql_path.display()))?;
        eprintln!("insert script -> {}", sql_path.display());
    }

    if cli.publish {
        let report = publish(&output, &config).await.context("publish failed")?;
        eprintln!(
            "published {}/{} chunks as document {}",
            report.published_chunks, report.total_chunks, report.document_id,
        );
        for failure in &report.failed {
            eprintln!("chunk {} failed: {}", failure.chunk_index, failure.detail);
        }
        if report.published_chunks == 0 && report.total_chunks > 0 {
            bail!("no chunks were published");
        }
    }

    Ok(())
}

fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .ocr_enabled(cli.ocr)
        .ocr_languages(cli.ocr_languages.clone())
        .analyze_images(cli.analyze_images)
        .chunk_budget(cli.chunk_size)
        .include_metadata(cli.metadata);

    if cli.page_markers {
        builder = builder.page_separator(PageSeparator::Comment);
    }
    if let Some(dir) = &cli.temp_dir {
        builder = builder.scratch_dir(dir);
    }

    if cli.ocr {
        let mut engine = TesseractOcr::new();
        if let Some(dir) = &cli.temp_dir {
            engine = engine.with_scratch_dir(dir);
        }
        builder = builder.ocr_engine(Arc::new(engine));
    }

    if cli.analyze_images {
        let key = cli
            .api_key
            .as_deref()
            .context("--analyze-images requires --api-key or OPENAI_API_KEY")?;
        builder = builder.vision(Arc::new(
            OpenAiVision::new(key).with_model(cli.vision_model.clone()),
        ));
    }

    if cli.publish {
        let key = cli
            .api_key
            .as_deref()
            .context("--publish requires --api-key or OPENAI_API_KEY")?;
        let store_url = cli
            .store_url
            .as_deref()
            .context("--publish requires --store-url or SUPABASE_URL")?;
        let store_key = cli
            .store_key
            .as_deref()
            .context("--publish requires --store-key or SUPABASE_KEY")?;
        builder = builder
            .embedder(Arc::new(
                OpenAiEmbeddings::new(key).with_model(cli.embedding_model.clone()),
            ))
            .store(Arc::new(RestVectorStore::new(store_url, store_key)));
    }

    Ok(builder.build()?)
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "pagemill=warn",
        1 => "pagemill=info",
        _ => "pagemill=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
