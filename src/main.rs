use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{ArgAction, Parser};
use rustyline::DefaultEditor;
use tracing::Level;

use sequence_table::config::{AppConfig, DEFAULT_CONFIG_PATH};
use sequence_table::report::open_sequence_table;

/// Render a project's sequences and their query fields as an HTML table
#[derive(Parser, Debug)]
#[command(name = "sequence_table")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Project id; prompted for when omitted
    #[arg(long)]
    project: Option<i64>,

    /// Path to configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Write the HTML here instead of a temp file
    #[arg(long)]
    output: Option<PathBuf>,

    /// Only write the file, do not open a browser
    #[arg(long)]
    no_browser: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match (cli.quiet, cli.verbose) {
        (true, _) => Level::ERROR,
        (false, 0) => Level::INFO,
        (false, 1) => Level::DEBUG,
        (false, _) => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    // Config problems must surface before any request is made
    let config = AppConfig::from_json_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let project_id = match cli.project {
        Some(id) => id,
        None => prompt_project_id()?,
    };
    if project_id <= 0 {
        bail!("project id must be positive, got {}", project_id);
    }

    let path = open_sequence_table(&config, project_id, cli.output.as_deref(), !cli.no_browser)
        .with_context(|| format!("building sequence table for project {}", project_id))?;
    println!("{}", path.display());
    Ok(())
}

fn prompt_project_id() -> anyhow::Result<i64> {
    let mut editor = DefaultEditor::new().context("starting prompt")?;
    loop {
        let line = editor.readline("Project ID: ").context("reading project id")?;
        match line.trim().parse::<i64>() {
            Ok(id) if id > 0 => return Ok(id),
            _ => eprintln!("'{}' is not a valid project id", line.trim()),
        }
    }
}
