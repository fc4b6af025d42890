use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use saber_rs::config::{ProjectPaths, RunConfig};
use std::path::PathBuf;

/// Gauge assignment and bootstrap validation for regional bias correction
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Project working directory
    work_dir: PathBuf,

    /// TOML file with run settings, defaults to <WORK_DIR>/saber.toml if present
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum number of segments a gauge propagates up or downstream
    #[arg(short, long)]
    max_propagation: Option<usize>,

    /// Number of worker threads for bootstrap trials
    #[arg(short = 'j', long)]
    processes: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Create the working directory layout
    Scaffold,
    /// Assign every segment a reference gauge and write the assignment table
    Assign,
    /// Run leave-one-out validation of the assignments
    Bootstrap,
}

pub struct Invocation {
    pub command: Command,
    pub paths: ProjectPaths,
    pub config: RunConfig,
}

pub fn get_args() -> Result<Invocation> {
    let args = Args::parse();
    let paths = ProjectPaths::new(&args.work_dir);

    let config_path = args
        .config
        .clone()
        .or_else(|| Some(args.work_dir.join("saber.toml")).filter(|p| p.exists()));

    let mut config = match config_path {
        Some(path) => RunConfig::from_toml_file(&path)
            .with_context(|| format!("Failed to load config: {:?}", path))?,
        None => RunConfig::default(),
    };

    if let Some(max) = args.max_propagation {
        config.max_propagation = max;
    }
    if let Some(processes) = args.processes {
        config.n_processes = processes;
    }
    config.validate().context("Invalid run configuration")?;

    Ok(Invocation {
        command: args.command,
        paths,
        config,
    })
}
