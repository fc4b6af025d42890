use crate::assign::GaugeId;
use crate::network::SegmentId;
use crate::series::Series;
use std::collections::HashMap;

/// Simulated (hindcast) streamflow, addressable by segment.
pub trait HindcastSource: Sync {
    fn simulated(&self, segment: SegmentId) -> anyhow::Result<Option<Series>>;
}

/// Observed streamflow, addressable by gauge.
pub trait ObservationSource: Sync {
    fn observed(&self, gauge: &GaugeId) -> anyhow::Result<Option<Series>>;
}

/// Output of a correction: the raw simulation of the target and its
/// corrected counterpart. Either may come back empty when the transform
/// could not produce it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Correction {
    pub simulated: Series,
    pub corrected: Series,
}

/// Corrects the simulation of `target` using the statistics of
/// `reference_gauge`, which sits on `reference_segment`. `Ok(None)` means
/// no result.
pub trait Corrector: Sync {
    fn correct(
        &self,
        target: SegmentId,
        reference_segment: SegmentId,
        reference_gauge: &GaugeId,
        hindcast: &dyn HindcastSource,
        gauges: &dyn ObservationSource,
    ) -> anyhow::Result<Option<Correction>>;
}

impl HindcastSource for HashMap<SegmentId, Series> {
    fn simulated(&self, segment: SegmentId) -> anyhow::Result<Option<Series>> {
        Ok(self.get(&segment).cloned())
    }
}

impl ObservationSource for HashMap<GaugeId, Series> {
    fn observed(&self, gauge: &GaugeId) -> anyhow::Result<Option<Series>> {
        Ok(self.get(gauge).cloned())
    }
}

/// Flow duration curve ratio mapping.
///
/// Each target value is located on the target's own flow duration curve;
/// the ratio between the reference gauge's observed and simulated curves at
/// that exceedance probability scales the value.
#[derive(Debug, Clone, Copy, Default)]
pub struct FdcQuantileMapping;

fn sorted_values(series: &Series) -> Vec<f64> {
    let mut values: Vec<f64> = series.values().copied().filter(|v| v.is_finite()).collect();
    values.sort_by(f64::total_cmp);
    values
}

// linear interpolation on the empirical curve; p in [0, 1]
fn quantile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let pos = p.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
        }
    }
}

fn non_exceedance(sorted: &[f64], value: f64) -> f64 {
    if sorted.len() < 2 {
        return 0.5;
    }
    let rank = sorted.partition_point(|&v| v < value);
    rank.min(sorted.len() - 1) as f64 / (sorted.len() - 1) as f64
}

impl Corrector for FdcQuantileMapping {
    fn correct(
        &self,
        target: SegmentId,
        reference_segment: SegmentId,
        reference_gauge: &GaugeId,
        hindcast: &dyn HindcastSource,
        gauges: &dyn ObservationSource,
    ) -> anyhow::Result<Option<Correction>> {
        let Some(target_sim) = hindcast.simulated(target)? else {
            return Ok(None);
        };
        let Some(reference_sim) = hindcast.simulated(reference_segment)? else {
            return Ok(None);
        };
        let Some(reference_obs) = gauges.observed(reference_gauge)? else {
            return Ok(None);
        };

        let target_curve = sorted_values(&target_sim);
        let sim_curve = sorted_values(&reference_sim);
        let obs_curve = sorted_values(&reference_obs);
        if target_curve.is_empty() || sim_curve.is_empty() || obs_curve.is_empty() {
            return Ok(None);
        }

        let corrected = target_sim
            .iter()
            .map(|(&time, &value)| {
                let p = non_exceedance(&target_curve, value);
                let sim_q = quantile(&sim_curve, p);
                let ratio = if sim_q > 0.0 {
                    quantile(&obs_curve, p) / sim_q
                } else {
                    1.0
                };
                (time, value * ratio)
            })
            .collect();

        Ok(Some(Correction {
            simulated: target_sim,
            corrected,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{NaiveDate, NaiveDateTime};

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2010, 3, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn quantile_interpolates() {
        let sorted = [0.0, 10.0, 20.0];
        assert_relative_eq!(quantile(&sorted, 0.25), 5.0);
        assert_relative_eq!(quantile(&sorted, 1.0), 20.0);
        assert_relative_eq!(non_exceedance(&sorted, 10.0), 0.5);
    }

    #[test]
    fn scales_by_reference_bias() {
        let sim: Series = (1..=4).map(|d| (day(d), d as f64)).collect();
        // reference gauge observes exactly twice what was simulated there
        let obs: Series = (1..=4).map(|d| (day(d), 2.0 * d as f64)).collect();

        let hindcast = HashMap::from([(1, sim.clone()), (2, sim.clone())]);
        let observations = HashMap::from([(GaugeId::new("g2"), obs)]);

        let correction = FdcQuantileMapping
            .correct(1, 2, &GaugeId::new("g2"), &hindcast, &observations)
            .unwrap()
            .unwrap();
        assert_eq!(correction.simulated, sim);
        for (time, value) in &correction.corrected {
            assert_relative_eq!(*value, 2.0 * sim[time], epsilon = 1e-9);
        }
    }

    #[test]
    fn missing_data_yields_no_correction() {
        let hindcast: HashMap<SegmentId, Series> = HashMap::new();
        let observations: HashMap<GaugeId, Series> = HashMap::new();
        let result = FdcQuantileMapping
            .correct(1, 2, &GaugeId::new("g"), &hindcast, &observations)
            .unwrap();
        assert!(result.is_none());
    }
}
