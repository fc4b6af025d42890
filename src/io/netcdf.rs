use crate::correction::HindcastSource;
use crate::error::{Error, Result};
use crate::network::SegmentId;
use crate::series::Series;
use chrono::{Duration, NaiveDateTime};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

const FILL_VALUE: f32 = -9999.0;

fn parse_time_units(units: &str) -> Result<NaiveDateTime> {
    let parse_err = || Error::Parse {
        what: "time units",
        value: units.to_string(),
    };
    let reference = units
        .strip_prefix("seconds since ")
        .ok_or_else(parse_err)?
        .trim();
    NaiveDateTime::parse_from_str(reference, "%Y-%m-%d %H:%M:%S").map_err(|_| parse_err())
}

/// Hindcast streamflow loaded from a `feature_id` x `time` NetCDF file with
/// a `flow` variable and time in seconds since a reference time.
#[derive(Debug, Clone, Default)]
pub struct NetCdfHindcast {
    flows: HashMap<SegmentId, Series>,
}

impl NetCdfHindcast {
    /// Reads the whole file up front so lookups are cheap and the source can
    /// be shared across worker threads.
    pub fn open(path: &Path) -> Result<Self> {
        let file = netcdf::open(path)?;
        let missing = |name: &str| Error::MissingColumn {
            column: name.to_string(),
            path: path.to_path_buf(),
        };

        let feature_var = file.variable("feature_id").ok_or_else(|| missing("feature_id"))?;
        let feature_ids: Vec<i64> = feature_var.get_values::<i64, _>(..)?;

        let time_var = file.variable("time").ok_or_else(|| missing("time"))?;
        let units = match time_var.attribute_value("units").transpose()? {
            Some(netcdf::AttributeValue::Str(units)) => units,
            _ => return Err(missing("time:units")),
        };
        let reference_time = parse_time_units(&units)?;
        let times: Vec<NaiveDateTime> = time_var
            .get_values::<f64, _>(..)?
            .into_iter()
            .map(|s| reference_time + Duration::seconds(s as i64))
            .collect();

        let flow_var = file.variable("flow").ok_or_else(|| missing("flow"))?;
        let mut flows = HashMap::with_capacity(feature_ids.len());
        for (i, &feature_id) in feature_ids.iter().enumerate() {
            let values: Vec<f32> = flow_var.get_values::<f32, _>((i, ..))?;
            let series: Series = times
                .iter()
                .zip(values)
                .filter(|&(_, v)| v.is_finite() && v != FILL_VALUE)
                .map(|(&t, v)| (t, f64::from(v)))
                .collect();
            flows.insert(feature_id as SegmentId, series);
        }

        info!(
            features = flows.len(),
            timesteps = times.len(),
            path = %path.display(),
            "loaded hindcast"
        );
        Ok(NetCdfHindcast { flows })
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

impl HindcastSource for NetCdfHindcast {
    fn simulated(&self, segment: SegmentId) -> anyhow::Result<Option<Series>> {
        Ok(self.flows.get(&segment).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reference_time() {
        let t = parse_time_units("seconds since 2000-01-01 00:00:00").unwrap();
        assert_eq!(t.to_string(), "2000-01-01 00:00:00");
        assert!(parse_time_units("hours since 2000-01-01").is_err());
    }
}
