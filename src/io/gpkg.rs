use crate::assign::GaugeId;
use crate::config::ColumnConfig;
use crate::error::Result;
use crate::io::parse_segment_id;
use crate::network::{SegmentId, SegmentRecord};
use rusqlite::Connection;
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

pub fn open(path: &Path) -> Result<Connection> {
    Ok(Connection::open(path)?)
}

// Terminal nexus ids mark where a hydrofabric subset drains out of the domain
fn is_terminal_nexus(id: &str) -> bool {
    id.starts_with("tnx-")
}

/// Reads segments from the `flowpaths` table of a hydrofabric GeoPackage.
///
/// `toid` values that point at a terminal nexus become outlets; any other
/// reference is kept as-is and validated when the network is built.
pub fn read_flowpaths(conn: &Connection, config: &ColumnConfig) -> Result<Vec<SegmentRecord>> {
    let network_query = format!(
        "SELECT \"{}\", \"{}\", \"{}\", \"{}\" FROM 'flowpaths' GROUP BY \"{}\"",
        config.key, config.downstream, config.order, config.area, config.key
    );

    let mut stmt = conn.prepare(&network_query)?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,         // wb id
            row.get::<_, Option<String>>(1)?, // downstream nexus or wb id
            row.get::<_, Option<f64>>(2)?,
            row.get::<_, Option<f64>>(3)?,
        ))
    })?;

    let mut segments = Vec::new();
    let mut terminal = 0usize;
    for row in rows {
        let (id, downstream_id, order, area) = row?;
        let downstream_id = match downstream_id.as_deref() {
            Some(ds) if is_terminal_nexus(ds) => {
                terminal += 1;
                None
            }
            Some(ds) => Some(parse_segment_id(ds)?),
            None => None,
        };
        let id = parse_segment_id(&id)?;
        let order = match order {
            Some(order) if order >= 1.0 => order as u32,
            _ => {
                warn!(segment = id, "flowpath has no stream order");
                0
            }
        };
        segments.push(SegmentRecord {
            id,
            order,
            downstream_id,
            area_sqkm: area.filter(|a| a.is_finite()),
        });
    }

    info!(
        segments = segments.len(),
        terminal_outlets = terminal,
        "loaded flowpaths from geopackage"
    );
    Ok(segments)
}

/// Reads gauge ids from the `flowpath-attributes` table.
pub fn read_gauges(conn: &Connection, config: &ColumnConfig) -> Result<Vec<(SegmentId, GaugeId)>> {
    let query = format!(
        "SELECT \"{}\", \"{}\" FROM 'flowpath-attributes' WHERE \"{}\" IS NOT NULL AND \"{}\" != ''",
        config.key, config.gauge, config.gauge, config.gauge
    );

    let mut stmt = conn.prepare(&query)?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut seen = HashSet::new();
    let mut gauges = Vec::new();
    for row in rows {
        let (id, gage) = row?;
        let id = parse_segment_id(&id)?;
        let gage = gage.trim();
        // attributes can repeat per segment; one gauge per segment is kept
        if seen.insert((id, gage.to_string())) {
            gauges.push((id, GaugeId::new(gage)));
        }
    }

    info!(gauges = gauges.len(), "loaded gauges from geopackage");
    Ok(gauges)
}
