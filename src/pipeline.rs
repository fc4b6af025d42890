use crate::assign::{AssignmentTable, GaugeId, Method};
use crate::cluster::{ClusterLabels, assign_by_cluster};
use crate::config::{ColumnConfig, ProjectPaths, RunConfig};
use crate::error::{ConfigError, Result};
use crate::io;
use crate::network::{NetworkTopology, SegmentId};
use crate::propagation::PropagationEngine;
use tracing::info;

pub struct Inputs {
    pub network: NetworkTopology,
    pub gauges: Vec<(SegmentId, GaugeId)>,
    pub clusters: Option<ClusterLabels>,
}

/// Loads the network and gauges from the configured GeoPackage, or from the
/// drain and gauge CSV tables otherwise. The cluster table is optional.
pub fn load_inputs(paths: &ProjectPaths, config: &RunConfig) -> Result<Inputs> {
    let (records, gauges) = match paths.gpkg(config) {
        Some(gpkg) => {
            let conn = io::gpkg::open(&gpkg)?;
            // CSV column defaults do not apply to a hydrofabric
            let columns = if config.columns == ColumnConfig::new() {
                ColumnConfig::hydrofabric()
            } else {
                config.columns.clone()
            };
            (
                io::gpkg::read_flowpaths(&conn, &columns)?,
                io::gpkg::read_gauges(&conn, &columns)?,
            )
        }
        None => (
            io::csv::read_drain_table(&paths.drain_table(config), &config.columns)?,
            io::csv::read_gauge_table(&paths.gauge_table(config), &config.columns)?,
        ),
    };

    let network = NetworkTopology::from_records(records)?;
    info!(
        segments = network.len(),
        outlets = network.outlets().len(),
        "network topology built"
    );

    let cluster_path = paths.cluster_table(config);
    let clusters = if cluster_path.exists() {
        Some(io::csv::read_cluster_table(&cluster_path, &config.columns)?)
    } else {
        None
    };

    Ok(Inputs {
        network,
        gauges,
        clusters,
    })
}

/// Builds the assignment table: gauged segments first, then propagation,
/// then the cluster fallback when labels are given.
pub fn assign(
    network: &NetworkTopology,
    gauges: Vec<(SegmentId, GaugeId)>,
    clusters: Option<&ClusterLabels>,
    config: &RunConfig,
) -> Result<AssignmentTable> {
    config.validate()?;
    if gauges.is_empty() {
        return Err(ConfigError::EmptyGaugePool.into());
    }
    let engine = PropagationEngine::new(network, config.max_propagation)?;

    let mut table = AssignmentTable::new(network, gauges)?;
    engine.propagate(&mut table);
    if let Some(clusters) = clusters {
        assign_by_cluster(&mut table, network, clusters);
    }

    let counts = table.count_by_method();
    for method in Method::ALL {
        info!(
            method = %method,
            segments = counts.get(&method).copied().unwrap_or(0),
            "assignment summary"
        );
    }
    Ok(table)
}
