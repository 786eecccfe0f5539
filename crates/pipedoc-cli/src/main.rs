//! Offline driver for the pipedoc extraction pipelines.
//!
//! Runs the same pipelines as the server's background worker against local
//! files, writing the JSON dumps and spreadsheet reports into an output
//! directory.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use pipedoc_bom::{
    analyze_pid_pages, compare_all_pages, compute_extraction_stats, merge_regex_and_vlm,
    run_bom_pipeline,
};
use pipedoc_core::{symbol_reference_text, CancelFlag, SymbolEntry};
use pipedoc_extract::{extract_pipe_bom, extract_valves};
use pipedoc_legend::extract_symbols_from_legend;
use pipedoc_pdf::PageRenderer;
use pipedoc_report::{generate_pipe_bom_report, generate_valve_report, generate_vlm_bom_report};
use pipedoc_vlm::{PacedVlm, VlmClient};

#[derive(Parser)]
#[command(name = "pipedoc")]
#[command(about = "Piping document extraction pipelines")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Harvest the symbol legend from a P&ID's first page
    Legend {
        /// Path to the P&ID PDF
        #[arg(short, long)]
        pdf: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Run the full vision BOM pipeline over an isometric package
    Bom {
        /// Path to the BOM PDF
        #[arg(short, long)]
        pdf: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// symbols_legend.json from a previous legend harvest, used as the
        /// reference block in drawing prompts
        #[arg(long)]
        symbols: Option<PathBuf>,

        /// Skip the vision passes (text extraction and report only)
        #[arg(long)]
        text_only: bool,
    },

    /// Analyze P&ID sheets: valves, line specs, equipment
    Pid {
        /// Path to the P&ID PDF
        #[arg(short, long)]
        pdf: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Reconcile a saved vlm_bom_data.json against its drawing components
    Compare {
        /// Path to vlm_bom_data.json
        #[arg(long)]
        vlm_data: PathBuf,

        /// Output path for bom_comparison.json
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pipedoc=info".parse().expect("static directive")),
        )
        .init();

    let args = Args::parse();
    match args.command {
        Command::Legend { pdf, output } => legend(&pdf, &output).await,
        Command::Bom {
            pdf,
            output,
            symbols,
            text_only,
        } => bom(&pdf, &output, symbols.as_deref(), text_only).await,
        Command::Pid { pdf, output } => pid(&pdf, &output).await,
        Command::Compare { vlm_data, output } => compare(&vlm_data, &output),
    }
}

async fn legend(pdf: &std::path::Path, output: &std::path::Path) -> Result<()> {
    let vlm = PacedVlm::new(VlmClient::from_env().context("ANTHROPIC_API_KEY not set")?);
    let symbols = extract_symbols_from_legend(&vlm, pdf, output).await?;
    info!(count = symbols.len(), "legend harvest complete");
    println!("Extracted {} symbols into {}", symbols.len(), output.display());
    Ok(())
}

async fn bom(
    pdf: &std::path::Path,
    output: &std::path::Path,
    symbols: Option<&std::path::Path>,
    text_only: bool,
) -> Result<()> {
    std::fs::create_dir_all(output)?;

    let text_pages = {
        let renderer = PageRenderer::new()?;
        let pages = extract_pipe_bom(&renderer, pdf)?;
        renderer.render_bom_pages(pdf, output, None)?;
        pages
    };
    std::fs::write(
        output.join("pipe_bom_data.json"),
        serde_json::to_string_pretty(&text_pages)?,
    )?;
    generate_pipe_bom_report(&text_pages, &output.join("pipe_bom.xlsx"))?;
    println!("Text extraction: {} pages", text_pages.len());

    if text_only {
        return Ok(());
    }

    let reference = match symbols {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            let entries: Vec<SymbolEntry> = serde_json::from_str(&json)?;
            Some(symbol_reference_text(&entries))
        }
        None => None,
    };

    let vlm = PacedVlm::new(VlmClient::from_env().context("ANTHROPIC_API_KEY not set")?);
    let cancel = CancelFlag::new();
    let records = run_bom_pipeline(
        &vlm,
        pdf,
        output,
        reference.as_deref(),
        Some(&text_pages),
        &cancel,
    )
    .await?;

    let comparisons = compare_all_pages(&records);
    std::fs::write(
        output.join("bom_comparison.json"),
        serde_json::to_string_pretty(&comparisons)?,
    )?;
    let stats = compute_extraction_stats(&records);
    generate_vlm_bom_report(&records, &comparisons, &stats, &output.join("vlm_bom.xlsx"))?;

    println!(
        "Analyzed {} pages ({} with data); reports in {}",
        records.len(),
        stats.pages_with_data,
        output.display()
    );
    Ok(())
}

async fn pid(pdf: &std::path::Path, output: &std::path::Path) -> Result<()> {
    std::fs::create_dir_all(output)?;

    let regex_valves = {
        let renderer = PageRenderer::new()?;
        extract_valves(&renderer, pdf)?
    };
    println!("Regex extraction: {} valves", regex_valves.len());

    let vlm = PacedVlm::new(VlmClient::from_env().context("ANTHROPIC_API_KEY not set")?);
    let symbols = extract_symbols_from_legend(&vlm, pdf, output).await?;
    let reference = symbol_reference_text(&symbols);

    let cancel = CancelFlag::new();
    let analysis = analyze_pid_pages(&vlm, pdf, output, &reference, None, &cancel).await?;
    std::fs::write(
        output.join("pid_analysis.json"),
        serde_json::to_string_pretty(&analysis)?,
    )?;

    let valves = merge_regex_and_vlm(&regex_valves, &analysis);
    std::fs::write(
        output.join("valve_data.json"),
        serde_json::to_string_pretty(&valves)?,
    )?;
    generate_valve_report(&valves, &output.join("valve_list.xlsx"))?;

    println!(
        "{} valves, {} line specs, {} symbols; reports in {}",
        valves.len(),
        analysis.line_specs.len(),
        symbols.len(),
        output.display()
    );
    Ok(())
}

fn compare(vlm_data: &std::path::Path, output: &std::path::Path) -> Result<()> {
    let json = std::fs::read_to_string(vlm_data)
        .with_context(|| format!("cannot read {}", vlm_data.display()))?;
    let records: Vec<pipedoc_core::PageBomRecord> = serde_json::from_str(&json)?;
    let comparisons = compare_all_pages(&records);
    std::fs::write(output, serde_json::to_string_pretty(&comparisons)?)?;

    let matched: usize = comparisons.iter().map(|c| c.summary.matched).sum();
    let comparable: usize = comparisons.iter().map(|c| c.summary.comparable_items).sum();
    println!(
        "Compared {} pages: {matched}/{comparable} matched",
        comparisons.len()
    );
    Ok(())
}
