use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

use cli::{Command, Invocation, get_args};
use saber_rs::assign::AssignmentTable;
use saber_rs::bootstrap::Bootstrap;
use saber_rs::correction::FdcQuantileMapping;
use saber_rs::io::csv::{CsvObservations, read_assign_table, write_assign_table, write_metrics_report};
use saber_rs::io::netcdf::NetCdfHindcast;
use saber_rs::metrics::{Change, ChangeCounts, Metric, postprocess};
use saber_rs::pipeline::{Inputs, assign, load_inputs};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let invocation = get_args()?;
    match invocation.command {
        Command::Scaffold => {
            invocation
                .paths
                .scaffold()
                .with_context(|| format!("Failed to scaffold {:?}", invocation.paths.workdir))?;
            info!(workdir = %invocation.paths.workdir.display(), "created project layout");
            Ok(())
        }
        Command::Assign => {
            let inputs = load(&invocation)?;
            assign_and_save(&invocation, &inputs).map(|_| ())
        }
        Command::Bootstrap => run_bootstrap(&invocation),
    }
}

fn load(invocation: &Invocation) -> Result<Inputs> {
    info!("Building network topology...");
    load_inputs(&invocation.paths, &invocation.config).context("Failed to load network inputs")
}

fn assign_and_save(invocation: &Invocation, inputs: &Inputs) -> Result<AssignmentTable> {
    let Invocation { paths, config, .. } = invocation;

    let table = assign(
        &inputs.network,
        inputs.gauges.clone(),
        inputs.clusters.as_ref(),
        config,
    )
    .context("Failed to assign gauges")?;

    let out = paths.assign_table();
    std::fs::create_dir_all(paths.tables_dir())?;
    write_assign_table(&out, table.iter())
        .with_context(|| format!("Failed to write assignment table: {:?}", out))?;
    info!(path = %out.display(), "assignment table saved");
    Ok(table)
}

fn run_bootstrap(invocation: &Invocation) -> Result<()> {
    let Invocation { paths, config, .. } = invocation;

    let inputs = load(invocation)?;

    // Reuse the cached assignment table when one exists
    let cached = paths.assign_table();
    let table = if cached.exists() {
        info!(path = %cached.display(), "reading cached assignment table");
        let records = read_assign_table(&cached)
            .with_context(|| format!("Failed to read assignment table: {:?}", cached))?;
        AssignmentTable::from_records(&inputs.network, records)
            .with_context(|| format!("Cached assignment table does not match the network: {:?}", cached))?
    } else {
        assign_and_save(invocation, &inputs)?
    };

    let hindcast_path = paths.hindcast(config);
    let hindcast = NetCdfHindcast::open(&hindcast_path)
        .with_context(|| format!("Failed to open hindcast: {:?}", hindcast_path))?;
    let observations = CsvObservations::new(paths.gauge_data(config));

    let mut bootstrap = Bootstrap::new(&inputs.network, &table, config)?;
    if let Some(clusters) = inputs.clusters.as_ref() {
        bootstrap = bootstrap.with_clusters(clusters);
    }

    let pb = ProgressBar::new(bootstrap.trial_count() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} trials ({eta})")?
            .progress_chars("#>-"),
    );
    let bootstrap = bootstrap.with_progress(pb);

    let report = bootstrap.run(&FdcQuantileMapping, &hindcast, &observations)?;

    std::fs::create_dir_all(paths.tables_dir())?;
    let assign_out = paths.bootstrap_assign_table();
    write_assign_table(&assign_out, report.assignments().iter())
        .with_context(|| format!("Failed to write bootstrap assignments: {:?}", assign_out))?;

    let records = report.records();
    let metrics_out = paths.bootstrap_metrics();
    write_metrics_report(&metrics_out, &postprocess(&records))
        .with_context(|| format!("Failed to write bootstrap metrics: {:?}", metrics_out))?;

    let counts = ChangeCounts::tally(&records);
    for metric in Metric::ALL {
        info!(
            metric = %metric,
            better = counts.get(metric, Change::Improved),
            same = counts.get(metric, Change::Unchanged),
            worse = counts.get(metric, Change::Worsened),
            "metric change"
        );
    }

    info!(
        succeeded = report.succeeded(),
        skipped = report.skipped(),
        path = %metrics_out.display(),
        "Bootstrap validation complete"
    );
    Ok(())
}
