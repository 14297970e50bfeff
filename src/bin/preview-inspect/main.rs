//! CLI tool to render the preview props of a document.
//!
//! Usage:
//!   preview-inspect --schema schema.json --input doc.json \
//!       [--set path=json]... [--output doc.automerge] [--stats]
//!
//! The input may be a JSON value or a saved Automerge document (`.automerge`).
//! Edits given with `--set` are applied after a first render, so `--stats`
//! reports the incremental cost of the second pass.

mod edit;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use collab_preview::document::display_path;
use collab_preview::preview::display_memo_path;
use collab_preview::{ComponentSchema, PreviewEngine, SharedDocument, Value};
use edit::parse_edit;

#[derive(Parser, Debug)]
#[command(
    name = "preview-inspect",
    about = "Render the preview props of a schema-described document",
    version
)]
struct Args {
    /// Schema JSON file path
    #[arg(short, long)]
    schema: PathBuf,

    /// Input document: JSON value, or Automerge binary with .automerge extension
    #[arg(short, long)]
    input: PathBuf,

    /// Edits applied before the final render, as path=json (e.g. tags/0="z")
    #[arg(long = "set")]
    edits: Vec<String>,

    /// Save the resulting document as Automerge binary
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print recompute statistics of the final render
    #[arg(long, default_value = "false")]
    stats: bool,

    /// Log engine events to stderr
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_writer(std::io::stderr)
            .init();
    }

    // 1. Load schema
    let schema_json =
        std::fs::read_to_string(&args.schema).context("Failed to read schema file")?;
    let schema = ComponentSchema::from_json(&schema_json).context("Failed to parse schema")?;

    // 2. Load document
    if !args.input.exists() {
        anyhow::bail!("Input file does not exist: {}", args.input.display());
    }
    let is_binary = args
        .input
        .extension()
        .map_or(false, |ext| ext == "automerge");
    let doc = if is_binary {
        let bytes = std::fs::read(&args.input).context("Failed to read input file")?;
        SharedDocument::from_bytes(&bytes).context("Failed to load Automerge document")?
    } else {
        let content = std::fs::read_to_string(&args.input).context("Failed to read input file")?;
        let json: serde_json::Value =
            serde_json::from_str(&content).context("Failed to parse JSON")?;
        SharedDocument::from_value(&Value::from(json)).context("Failed to create document")?
    };

    // 3. First render
    let mut engine = PreviewEngine::new(schema, &doc, |path| display_memo_path(path));
    engine.refresh().context("Failed to render props")?;

    // 4. Apply edits, then render again
    let edits = args
        .edits
        .iter()
        .map(|arg| parse_edit(arg))
        .collect::<Result<Vec<_>>>()?;
    engine.reset_stats();
    for edit in edits {
        engine
            .write(&edit.path, edit.value)
            .with_context(|| format!("Failed to apply edit at {}", display_path(&edit.path)))?;
    }
    let props = engine.refresh().context("Failed to render props")?;

    println!("{}", serde_json::to_string_pretty(&props.to_json())?);

    // 5. Optional output
    if let Some(output) = &args.output {
        std::fs::write(output, doc.save()).context("Failed to write output file")?;
        eprintln!("Saved document to {}", output.display());
    }

    // 6. Optional stats
    if args.stats {
        let stats = engine.stats();
        eprintln!();
        eprintln!("Recompute statistics:");
        for kind in collab_preview::preview::SchemaKind::ALL {
            eprintln!("  {:<18} {:>6}", kind.as_str(), stats.factory_calls(kind));
        }
        eprintln!("  Cache hits:        {:>6}", stats.cache_hits);
        eprintln!("  Schema resets:     {:>6}", stats.schema_resets);
        eprintln!("  Released subtrees: {:>6}", stats.released_subtrees);
        eprintln!("  Cache entries:     {:>6}", engine.cache_len());
        eprintln!("  Keyed arrays:      {:>6}", engine.keys().len());
    }

    Ok(())
}
