use crate::assign::GaugeId;
use crate::network::SegmentId;
use crate::series::AlignedSeries;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Absolute band within which NSE and KGE count as unchanged.
pub const EFFICIENCY_TOLERANCE: f64 = 0.2;
/// Relative band (fraction of the simulated value) for ME, MAE and RMSE.
pub const ERROR_TOLERANCE: f64 = 0.1;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

// population standard deviation, matching numpy's default
fn std_dev(values: &[f64]) -> f64 {
    let mu = mean(values);
    mean(&values.iter().map(|v| (v - mu).powi(2)).collect::<Vec<_>>()).sqrt()
}

pub fn mean_error(sim: &[f64], obs: &[f64]) -> f64 {
    mean(&sim.iter().zip(obs).map(|(s, o)| s - o).collect::<Vec<_>>())
}

pub fn mean_absolute_error(sim: &[f64], obs: &[f64]) -> f64 {
    mean(&sim.iter().zip(obs).map(|(s, o)| (s - o).abs()).collect::<Vec<_>>())
}

pub fn root_mean_square_error(sim: &[f64], obs: &[f64]) -> f64 {
    mean(&sim.iter().zip(obs).map(|(s, o)| (s - o).powi(2)).collect::<Vec<_>>()).sqrt()
}

/// Nash–Sutcliffe efficiency. NaN when the observations have no variance.
pub fn nash_sutcliffe(sim: &[f64], obs: &[f64]) -> f64 {
    let mu = mean(obs);
    let residual: f64 = sim.iter().zip(obs).map(|(s, o)| (s - o).powi(2)).sum();
    let variance: f64 = obs.iter().map(|o| (o - mu).powi(2)).sum();
    if variance == 0.0 {
        return f64::NAN;
    }
    1.0 - residual / variance
}

fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let (mx, my) = (mean(x), mean(y));
    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (a, b) in x.iter().zip(y) {
        cov += (a - mx) * (b - my);
        vx += (a - mx).powi(2);
        vy += (b - my).powi(2);
    }
    cov / (vx.sqrt() * vy.sqrt())
}

/// Kling–Gupta efficiency, 2012 variant (variability as ratio of
/// coefficients of variation).
pub fn kling_gupta_2012(sim: &[f64], obs: &[f64]) -> f64 {
    let (mu_s, mu_o) = (mean(sim), mean(obs));
    let r = pearson(sim, obs);
    let beta = mu_s / mu_o;
    let gamma = (std_dev(sim) / mu_s) / (std_dev(obs) / mu_o);
    1.0 - ((r - 1.0).powi(2) + (beta - 1.0).powi(2) + (gamma - 1.0).powi(2)).sqrt()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Metric {
    Me,
    Mae,
    Rmse,
    Nse,
    Kge,
}

impl Metric {
    pub const ALL: [Metric; 5] = [Metric::Me, Metric::Mae, Metric::Rmse, Metric::Nse, Metric::Kge];

    pub fn name(&self) -> &'static str {
        match self {
            Metric::Me => "me",
            Metric::Mae => "mae",
            Metric::Rmse => "rmse",
            Metric::Nse => "nse",
            Metric::Kge => "kge",
        }
    }

    fn higher_is_better(&self) -> bool {
        matches!(self, Metric::Nse | Metric::Kge)
    }

    /// Buckets a (simulated, corrected) pair. Checked in the order improved,
    /// within tolerance, worsened: the first test that holds decides, so a
    /// pair inside the tolerance band is never reported as worsened. NaN
    /// inputs fail every test and land in `Worsened`.
    pub fn classify(&self, sim: f64, corr: f64) -> Change {
        if self.higher_is_better() {
            if corr > sim {
                Change::Improved
            } else if (corr - sim).abs() <= EFFICIENCY_TOLERANCE {
                Change::Unchanged
            } else {
                Change::Worsened
            }
        } else if corr.abs() < sim.abs() {
            Change::Improved
        } else if (corr - sim).abs() <= sim.abs() * ERROR_TOLERANCE {
            Change::Unchanged
        } else {
            Change::Worsened
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Change {
    Worsened = 0,
    Unchanged = 1,
    Improved = 2,
}

impl Change {
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

/// The five statistics for one series against a reference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scores {
    pub me: f64,
    pub mae: f64,
    pub rmse: f64,
    pub nse: f64,
    pub kge: f64,
}

impl Scores {
    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Me => self.me,
            Metric::Mae => self.mae,
            Metric::Rmse => self.rmse,
            Metric::Nse => self.nse,
            Metric::Kge => self.kge,
        }
    }
}

/// Raw scores of one bootstrap trial.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsRecord {
    pub segment_id: SegmentId,
    pub gauge_id: GaugeId,
    pub assigned_segment_id: SegmentId,
    pub sim: Scores,
    pub corr: Scores,
}

impl MetricsRecord {
    /// Scores the simulated and corrected series against the withheld
    /// observations. KGE for the corrected series uses the simulated series
    /// as its reference, not the observations.
    pub fn compute(
        segment_id: SegmentId,
        gauge_id: GaugeId,
        assigned_segment_id: SegmentId,
        aligned: &AlignedSeries,
    ) -> Self {
        let obs = &aligned.observed;
        let sim = &aligned.simulated;
        let corr = &aligned.corrected;

        MetricsRecord {
            segment_id,
            gauge_id,
            assigned_segment_id,
            sim: Scores {
                me: mean_error(sim, obs),
                mae: mean_absolute_error(sim, obs),
                rmse: root_mean_square_error(sim, obs),
                nse: nash_sutcliffe(sim, obs),
                kge: kling_gupta_2012(sim, obs),
            },
            corr: Scores {
                me: mean_error(corr, obs),
                mae: mean_absolute_error(corr, obs),
                rmse: root_mean_square_error(corr, obs),
                nse: nash_sutcliffe(corr, obs),
                kge: kling_gupta_2012(corr, sim),
            },
        }
    }

    pub fn change(&self, metric: Metric) -> Change {
        metric.classify(self.sim.get(metric), self.corr.get(metric))
    }

    pub fn diff(&self, metric: Metric) -> f64 {
        self.corr.get(metric) - self.sim.get(metric)
    }
}

/// One row of the persisted bootstrap metrics report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub reach_id: SegmentId,
    pub gauge_id: GaugeId,
    pub asgn_reach_id: SegmentId,
    pub me_sim: f64,
    pub mae_sim: f64,
    pub rmse_sim: f64,
    pub nse_sim: f64,
    pub kge_sim: f64,
    pub me_corr: f64,
    pub mae_corr: f64,
    pub rmse_corr: f64,
    pub nse_corr: f64,
    pub kge_corr: f64,
    pub me: u8,
    pub mae: u8,
    pub rmse: u8,
    pub nse: u8,
    pub kge: u8,
    pub me_diff: f64,
    pub mae_diff: f64,
    pub rmse_diff: f64,
    pub nse_diff: f64,
    pub kge_diff: f64,
}

impl From<&MetricsRecord> for ReportRow {
    fn from(r: &MetricsRecord) -> Self {
        ReportRow {
            reach_id: r.segment_id,
            gauge_id: r.gauge_id.clone(),
            asgn_reach_id: r.assigned_segment_id,
            me_sim: r.sim.me,
            mae_sim: r.sim.mae,
            rmse_sim: r.sim.rmse,
            nse_sim: r.sim.nse,
            kge_sim: r.sim.kge,
            me_corr: r.corr.me,
            mae_corr: r.corr.mae,
            rmse_corr: r.corr.rmse,
            nse_corr: r.corr.nse,
            kge_corr: r.corr.kge,
            me: r.change(Metric::Me).code(),
            mae: r.change(Metric::Mae).code(),
            rmse: r.change(Metric::Rmse).code(),
            nse: r.change(Metric::Nse).code(),
            kge: r.change(Metric::Kge).code(),
            me_diff: r.diff(Metric::Me),
            mae_diff: r.diff(Metric::Mae),
            rmse_diff: r.diff(Metric::Rmse),
            nse_diff: r.diff(Metric::Nse),
            kge_diff: r.diff(Metric::Kge),
        }
    }
}

/// Post-processes trial records into report rows, ordered by segment id.
pub fn postprocess(records: &[MetricsRecord]) -> Vec<ReportRow> {
    let mut rows: Vec<ReportRow> = records.iter().map(ReportRow::from).collect();
    rows.sort_by(|a, b| a.reach_id.cmp(&b.reach_id).then_with(|| a.gauge_id.cmp(&b.gauge_id)));
    rows
}

/// How many trials improved, stayed the same or worsened, per metric.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeCounts {
    counts: BTreeMap<Metric, [usize; 3]>,
}

impl ChangeCounts {
    pub fn tally(records: &[MetricsRecord]) -> Self {
        let mut counts: BTreeMap<Metric, [usize; 3]> = BTreeMap::new();
        for record in records {
            for metric in Metric::ALL {
                counts.entry(metric).or_default()[record.change(metric) as usize] += 1;
            }
        }
        ChangeCounts { counts }
    }

    pub fn get(&self, metric: Metric, change: Change) -> usize {
        self.counts
            .get(&metric)
            .map(|c| c[change as usize])
            .unwrap_or(0)
    }
}
