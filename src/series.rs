use chrono::NaiveDateTime;
use std::collections::BTreeMap;

/// Streamflow values indexed by timestamp.
pub type Series = BTreeMap<NaiveDateTime, f64>;

/// Observed, simulated and corrected values on their shared timestamps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlignedSeries {
    pub times: Vec<NaiveDateTime>,
    pub observed: Vec<f64>,
    pub simulated: Vec<f64>,
    pub corrected: Vec<f64>,
}

impl AlignedSeries {
    /// Inner join on timestamp. Rows where any of the three values is NaN or
    /// infinite are dropped.
    pub fn inner_join(observed: &Series, simulated: &Series, corrected: &Series) -> Self {
        let mut aligned = AlignedSeries::default();
        for (time, &obs) in observed {
            let (Some(&sim), Some(&corr)) = (simulated.get(time), corrected.get(time)) else {
                continue;
            };
            if !(obs.is_finite() && sim.is_finite() && corr.is_finite()) {
                continue;
            }
            aligned.times.push(*time);
            aligned.observed.push(obs);
            aligned.simulated.push(sim);
            aligned.corrected.push(corr);
        }
        aligned
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}
