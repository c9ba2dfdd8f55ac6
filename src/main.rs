use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use stand_init::{config::ProjectLoader, output::TreeListWriter};

#[derive(Debug, Parser)]
#[command(author, version, about = "Forest stand initialization")]
struct Cli {
    /// Path to the project YAML file
    #[arg(long, default_value = "scenarios/single_unit.yaml")]
    project: PathBuf,

    /// Override the project seed
    #[arg(long)]
    seed: Option<u64>,

    /// Tree list destination (defaults to the project's output.tree_file)
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let loader = ProjectLoader::new(".");
    let project = loader.load(&cli.project)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&project.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let seed = cli.seed.unwrap_or(project.seed);
    let outcome = project.run(Some(seed))?;
    let output = cli
        .output
        .unwrap_or_else(|| project.resolve(&project.output.tree_file));
    let writer = TreeListWriter::new(&output);
    writer.write(
        &project.name,
        seed,
        &outcome.landscape,
        &outcome.species,
        &outcome.summary,
    )?;

    println!(
        "Project '{}' initialized: {} trees in {} areas ({} misses, {} skipped stands). Tree list: {}",
        project.name,
        outcome.summary.total_trees,
        outcome.summary.reports.len(),
        outcome.summary.total_misses,
        outcome.summary.skipped_stands.len(),
        output.display()
    );
    Ok(())
}
