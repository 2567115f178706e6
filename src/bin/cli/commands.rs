//! Subcommand implementations for the quarry CLI.

use std::io::Read;
use std::path::Path;

use anyhow::Context;
use uuid::Uuid;

use quarry::Engine;

use super::OutputFormat;

pub fn run_ingest(
    engine: &Engine,
    file: &str,
    source: Option<&str>,
    id: Option<Uuid>,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let (text, default_source) = if file == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        (buf, "stdin".to_string())
    } else {
        let text = std::fs::read_to_string(file)
            .with_context(|| format!("failed to read {}", file))?;
        let name = Path::new(file)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file.to_string());
        (text, name)
    };
    let source = source.unwrap_or(&default_source);

    let report = engine.ingest_text(id, source, &text)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Plain => {
            println!(
                "Ingested {} as document {} ({} chunk(s), {} skipped)",
                source, report.document_id, report.chunk_count, report.skipped_chunks
            );
        }
    }
    Ok(())
}

pub fn run_ask(
    engine: &Engine,
    question: &str,
    top_k: Option<usize>,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let answer = engine.ask(question, top_k)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&answer)?),
        OutputFormat::Plain => {
            println!("{}", answer.text);
            if !answer.citations.is_empty() {
                println!("\nSources:");
                for citation in &answer.citations {
                    println!("  {} (similarity: {:.3})", citation.source, citation.score);
                }
            }
        }
    }
    Ok(())
}

pub fn run_search(
    engine: &Engine,
    query: &str,
    top_k: Option<usize>,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let results = engine.search(query, top_k)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
        OutputFormat::Plain => {
            if results.is_empty() {
                println!("No matches.");
            }
            for scored in &results {
                println!(
                    "[{:.3}] {} #{}\n  {}",
                    scored.score,
                    scored.source,
                    scored.chunk.seq,
                    snippet(&scored.chunk.content, 160)
                );
            }
        }
    }
    Ok(())
}

pub fn run_grep(
    engine: &Engine,
    query: &str,
    limit: usize,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let documents = engine.keyword_search(query, limit)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&documents)?),
        OutputFormat::Plain => {
            if documents.is_empty() {
                println!("No matches.");
            }
            for document in &documents {
                println!("{}  {}", document.id, document.source);
            }
        }
    }
    Ok(())
}

pub fn run_documents(engine: &Engine, format: &OutputFormat) -> anyhow::Result<()> {
    let documents = engine.list_documents()?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&documents)?),
        OutputFormat::Plain => {
            if documents.is_empty() {
                println!("No documents ingested yet.");
            }
            for document in &documents {
                println!(
                    "{}  {}  ({} chars, {})",
                    document.id,
                    document.source,
                    document.content.chars().count(),
                    document.ingested_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
    }
    Ok(())
}

pub fn run_remove(engine: &Engine, id: Uuid, format: &OutputFormat) -> anyhow::Result<()> {
    let removed = engine.remove_document(id)?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::json!({ "documentId": id, "removedChunks": removed }))
        }
        OutputFormat::Plain => println!("Removed document {} ({} chunk(s))", id, removed),
    }
    Ok(())
}

pub fn run_stats(engine: &Engine, format: &OutputFormat) -> anyhow::Result<()> {
    let stats = engine.stats()?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        OutputFormat::Plain => {
            println!("Documents:     {}", stats.document_count);
            println!("Chunks:        {}", stats.chunk_count);
            println!("Index entries: {}", stats.index_entries);
            println!("Dimensions:    {}", stats.dimensions);
        }
    }
    Ok(())
}

pub fn run_rebuild(engine: &Engine, format: &OutputFormat) -> anyhow::Result<()> {
    let entries = engine.rebuild_index()?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::json!({ "indexEntries": entries })),
        OutputFormat::Plain => println!("Index rebuilt with {} entries", entries),
    }
    Ok(())
}

/// First `max` characters of a chunk, flattened to one line.
fn snippet(text: &str, max: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let cut: String = flat.chars().take(max).collect();
    format!("{}…", cut)
}
