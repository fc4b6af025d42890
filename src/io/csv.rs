use crate::assign::{AssignmentRecord, GaugeId, Method};
use crate::cluster::{ClusterId, ClusterLabels};
use crate::config::ColumnConfig;
use crate::correction::ObservationSource;
use crate::error::{Error, Result};
use crate::io::{parse_segment_id, parse_timestamp};
use crate::metrics::ReportRow;
use crate::network::{SegmentId, SegmentRecord};
use crate::series::Series;
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

fn open_reader(path: &Path) -> Result<csv::Reader<BufReader<File>>> {
    let file = File::open(path)?;
    Ok(ReaderBuilder::new()
        .has_headers(true)
        .delimiter(b',')
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(BufReader::new(file)))
}

fn column_index(headers: &StringRecord, name: &str, path: &Path) -> Result<usize> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| Error::MissingColumn {
            column: name.to_string(),
            path: path.to_path_buf(),
        })
}

// Short rows are allowed by the flexible reader; a missing field is an error
fn field<'r>(record: &'r StringRecord, idx: usize, headers: &StringRecord, path: &Path) -> Result<&'r str> {
    record.get(idx).ok_or_else(|| Error::MissingColumn {
        column: format!(
            "{} (line {})",
            headers.get(idx).unwrap_or_default(),
            record.position().map_or(0, |p| p.line())
        ),
        path: path.to_path_buf(),
    })
}

fn optional_id(value: &str) -> Result<Option<SegmentId>> {
    let value = value.trim();
    // outlets are written as empty, NaN or a negative sentinel
    if value.is_empty() || value.eq_ignore_ascii_case("nan") || value.starts_with('-') {
        return Ok(None);
    }
    parse_segment_id(value).map(Some)
}

fn parse_order(value: &str) -> Result<u32> {
    let parse_err = || Error::Parse {
        what: "stream order",
        value: value.to_string(),
    };
    let order: f64 = value.trim().parse().map_err(|_| parse_err())?;
    if order.fract() != 0.0 || order < 0.0 {
        return Err(parse_err());
    }
    Ok(order as u32)
}

/// Reads the drain table: one row per segment with its downstream id and
/// stream order, plus the drainage area when that column exists.
pub fn read_drain_table(path: &Path, config: &ColumnConfig) -> Result<Vec<SegmentRecord>> {
    let mut rdr = open_reader(path)?;
    let headers = rdr.headers()?.clone();
    let key_idx = column_index(&headers, &config.key, path)?;
    let down_idx = column_index(&headers, &config.downstream, path)?;
    let order_idx = column_index(&headers, &config.order, path)?;
    let area_idx = headers.iter().position(|h| h == config.area);

    let mut segments = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let id = parse_segment_id(field(&record, key_idx, &headers, path)?)?;
        let downstream_id = optional_id(field(&record, down_idx, &headers, path)?)?;
        let order = parse_order(field(&record, order_idx, &headers, path)?)?;
        let area_sqkm = area_idx
            .and_then(|i| record.get(i))
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite());

        segments.push(SegmentRecord {
            id,
            order,
            downstream_id,
            area_sqkm,
        });
    }

    info!(segments = segments.len(), path = %path.display(), "loaded drain table");
    Ok(segments)
}

/// Reads `(segment, gauge)` pairs. Rows with an empty gauge are skipped.
pub fn read_gauge_table(path: &Path, config: &ColumnConfig) -> Result<Vec<(SegmentId, GaugeId)>> {
    let mut rdr = open_reader(path)?;
    let headers = rdr.headers()?.clone();
    let key_idx = column_index(&headers, &config.key, path)?;
    let gauge_idx = column_index(&headers, &config.gauge, path)?;

    let mut gauges = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let gauge = field(&record, gauge_idx, &headers, path)?.trim();
        if gauge.is_empty() || gauge.eq_ignore_ascii_case("nan") {
            continue;
        }
        let segment = parse_segment_id(field(&record, key_idx, &headers, path)?)?;
        gauges.push((segment, GaugeId::new(gauge)));
    }

    info!(gauges = gauges.len(), path = %path.display(), "loaded gauge table");
    Ok(gauges)
}

pub fn read_cluster_table(path: &Path, config: &ColumnConfig) -> Result<ClusterLabels> {
    let mut rdr = open_reader(path)?;
    let headers = rdr.headers()?.clone();
    let key_idx = column_index(&headers, &config.key, path)?;
    let cluster_idx = column_index(&headers, &config.cluster, path)?;

    let mut labels = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let value = field(&record, cluster_idx, &headers, path)?;
        let label: ClusterId = value.trim().parse().map_err(|_| Error::Parse {
            what: "cluster label",
            value: value.to_string(),
        })?;
        labels.push((parse_segment_id(field(&record, key_idx, &headers, path)?)?, label));
    }

    Ok(labels.into_iter().collect())
}

// Persisted form of an assignment record
#[derive(Debug, Serialize, Deserialize)]
struct AssignRow {
    model_id: SegmentId,
    gauge_id: Option<GaugeId>,
    asgn_gid: Option<GaugeId>,
    asgn_mid: Option<SegmentId>,
    reason: Method,
    gprop: Option<usize>,
}

impl From<&AssignmentRecord> for AssignRow {
    fn from(r: &AssignmentRecord) -> Self {
        AssignRow {
            model_id: r.segment_id,
            gauge_id: r.gauge_id.clone(),
            asgn_gid: r.assigned_gauge_id.clone(),
            asgn_mid: r.assigned_segment_id,
            reason: r.method,
            gprop: r.propagation_distance,
        }
    }
}

impl From<AssignRow> for AssignmentRecord {
    fn from(r: AssignRow) -> Self {
        AssignmentRecord {
            segment_id: r.model_id,
            gauge_id: r.gauge_id,
            assigned_gauge_id: r.asgn_gid,
            assigned_segment_id: r.asgn_mid,
            method: r.reason,
            propagation_distance: r.gprop,
        }
    }
}

pub fn write_assign_table<'a, I>(path: &Path, records: I) -> Result<()>
where
    I: IntoIterator<Item = &'a AssignmentRecord>,
{
    let mut wtr = WriterBuilder::new().has_headers(true).from_path(path)?;
    for record in records {
        wtr.serialize(AssignRow::from(record))?;
    }
    wtr.flush()?;
    debug!(path = %path.display(), "wrote assignment table");
    Ok(())
}

pub fn read_assign_table(path: &Path) -> Result<Vec<AssignmentRecord>> {
    let mut rdr = open_reader(path)?;
    let mut records = Vec::new();
    for row in rdr.deserialize::<AssignRow>() {
        records.push(row?.into());
    }
    Ok(records)
}

pub fn write_metrics_report(path: &Path, rows: &[ReportRow]) -> Result<()> {
    let mut wtr = WriterBuilder::new().has_headers(true).from_path(path)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn read_metrics_report(path: &Path) -> Result<Vec<ReportRow>> {
    let mut rdr = open_reader(path)?;
    rdr.deserialize().map(|row| row.map_err(Error::from)).collect()
}

// Observation file row: timestamp in the first column, flow in the second
#[derive(Debug)]
struct FlowData {
    time: chrono::NaiveDateTime,
    flow: f64,
}

impl FlowData {
    fn from_record(record: &StringRecord) -> Result<Option<Self>> {
        if record.len() < 2 {
            return Ok(None);
        }
        let time = parse_timestamp(&record[0])?;
        // blank or non-numeric flows are gaps, not errors
        Ok(record[1]
            .trim()
            .parse::<f64>()
            .ok()
            .map(|flow| FlowData { time, flow }))
    }
}

pub fn read_observations(path: &Path) -> Result<Series> {
    let mut rdr = open_reader(path)?;
    let mut series = Series::new();
    for result in rdr.records() {
        let record = result?;
        if let Some(row) = FlowData::from_record(&record)? {
            series.insert(row.time, row.flow);
        }
    }
    Ok(series)
}

/// Directory of `<gauge_id>.csv` observation files.
#[derive(Debug, Clone)]
pub struct CsvObservations {
    dir: PathBuf,
}

impl CsvObservations {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        CsvObservations { dir: dir.into() }
    }

    pub fn path_for(&self, gauge: &GaugeId) -> PathBuf {
        self.dir.join(format!("{}.csv", gauge.as_str()))
    }
}

impl ObservationSource for CsvObservations {
    fn observed(&self, gauge: &GaugeId) -> anyhow::Result<Option<Series>> {
        let path = self.path_for(gauge);
        if !path.exists() {
            debug!(gauge = %gauge, path = %path.display(), "no observation file");
            return Ok(None);
        }
        Ok(Some(read_observations(&path)?))
    }
}
