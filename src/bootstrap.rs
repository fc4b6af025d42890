use crate::assign::{AssignmentRecord, AssignmentTable, GaugeId};
use crate::cluster::{ClusterLabels, assign_by_cluster};
use crate::config::RunConfig;
use crate::correction::{Corrector, HindcastSource, ObservationSource};
use crate::error::{ConfigError, Result, TrialFailure};
use crate::metrics::MetricsRecord;
use crate::network::{NetworkTopology, SegmentId};
use crate::propagation::PropagationEngine;
use crate::series::AlignedSeries;
use indicatif::ProgressBar;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::{debug, error, info, warn};

/// Result of one leave-one-out trial.
#[derive(Debug, Clone)]
pub struct Trial {
    pub segment_id: SegmentId,
    pub gauge_id: GaugeId,
    /// The withheld segment's assignment computed without its own gauge.
    pub assignment: AssignmentRecord,
    pub outcome: std::result::Result<MetricsRecord, TrialFailure>,
}

#[derive(Debug, Clone, Default)]
pub struct BootstrapReport {
    pub trials: Vec<Trial>,
}

impl BootstrapReport {
    pub fn records(&self) -> Vec<MetricsRecord> {
        self.trials
            .iter()
            .filter_map(|t| t.outcome.as_ref().ok().cloned())
            .collect()
    }

    pub fn succeeded(&self) -> usize {
        self.trials.iter().filter(|t| t.outcome.is_ok()).count()
    }

    pub fn skipped(&self) -> usize {
        self.trials.len() - self.succeeded()
    }

    pub fn failure_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for trial in &self.trials {
            if let Err(reason) = &trial.outcome {
                *counts.entry(reason.kind()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Bootstrap assignment table: one row per withheld gauge, ordered by
    /// segment id.
    pub fn assignments(&self) -> Vec<AssignmentRecord> {
        let mut rows: Vec<AssignmentRecord> =
            self.trials.iter().map(|t| t.assignment.clone()).collect();
        rows.sort_by_key(|r| r.segment_id);
        rows
    }
}

// Leave-one-out validation; each trial withholds one gauge and re-assigns from the rest
pub struct Bootstrap<'a> {
    network: &'a NetworkTopology,
    table: &'a AssignmentTable,
    engine: PropagationEngine<'a>,
    clusters: Option<&'a ClusterLabels>,
    n_processes: usize,
    progress: ProgressBar,
}

impl<'a> Bootstrap<'a> {
    pub fn new(
        network: &'a NetworkTopology,
        table: &'a AssignmentTable,
        config: &RunConfig,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        if table.gauged_segments().is_empty() {
            return Err(ConfigError::EmptyGaugePool);
        }
        Ok(Bootstrap {
            network,
            table,
            engine: PropagationEngine::new(network, config.max_propagation)?,
            clusters: None,
            n_processes: config.n_processes,
            progress: ProgressBar::hidden(),
        })
    }

    pub fn with_clusters(mut self, clusters: &'a ClusterLabels) -> Self {
        self.clusters = Some(clusters);
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn trial_count(&self) -> usize {
        self.table.gauged_segments().len()
    }

    /// Runs every trial on a pool of `n_processes` workers. Trials share only
    /// read-only inputs; results are gathered once all of them finish.
    pub fn run(
        &self,
        corrector: &dyn Corrector,
        hindcast: &dyn HindcastSource,
        observations: &dyn ObservationSource,
    ) -> Result<BootstrapReport> {
        let gauges = self.table.gauged_segments();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.n_processes)
            .build()?;

        info!(
            trials = gauges.len(),
            workers = self.n_processes,
            "starting bootstrap validation"
        );
        self.progress.set_length(gauges.len() as u64);

        let trials: Vec<Trial> = pool.install(|| {
            gauges
                .par_iter()
                .map(|(segment, gauge)| {
                    let trial = self.run_trial(*segment, gauge, corrector, hindcast, observations);
                    self.progress.inc(1);
                    trial
                })
                .collect()
        });
        self.progress.finish();

        let report = BootstrapReport { trials };
        info!(
            succeeded = report.succeeded(),
            skipped = report.skipped(),
            "bootstrap validation complete"
        );
        for (kind, count) in report.failure_counts() {
            info!(reason = kind, count, "skipped trials");
        }
        Ok(report)
    }

    /// Re-assigns the network with `segment`'s gauge withheld.
    pub fn reassign(&self, segment: SegmentId) -> AssignmentTable {
        let mut trial_table = self.table.without_gauge(segment);
        self.engine.propagate(&mut trial_table);
        if let Some(clusters) = self.clusters {
            assign_by_cluster(&mut trial_table, self.network, clusters);
        }
        trial_table
    }

    fn run_trial(
        &self,
        segment: SegmentId,
        gauge: &GaugeId,
        corrector: &dyn Corrector,
        hindcast: &dyn HindcastSource,
        observations: &dyn ObservationSource,
    ) -> Trial {
        let trial_table = self.reassign(segment);
        let assignment = trial_table
            .get(segment)
            .cloned()
            .unwrap_or_else(|| AssignmentRecord::unassigned(segment, Some(gauge.clone())));

        let outcome = score(segment, gauge, &assignment, corrector, hindcast, observations);
        match &outcome {
            Ok(_) => debug!(segment, gauge = %gauge, "trial scored"),
            Err(reason @ (TrialFailure::Correction(_) | TrialFailure::Observations(_))) => {
                error!(segment, gauge = %gauge, %reason, "bootstrap trial failed")
            }
            Err(reason) => warn!(segment, gauge = %gauge, %reason, "skipping bootstrap trial"),
        }

        Trial {
            segment_id: segment,
            gauge_id: gauge.clone(),
            assignment,
            outcome,
        }
    }
}

fn score(
    segment: SegmentId,
    gauge: &GaugeId,
    assignment: &AssignmentRecord,
    corrector: &dyn Corrector,
    hindcast: &dyn HindcastSource,
    observations: &dyn ObservationSource,
) -> std::result::Result<MetricsRecord, TrialFailure> {
    let (Some(reference_gauge), Some(reference_segment)) =
        (&assignment.assigned_gauge_id, assignment.assigned_segment_id)
    else {
        return Err(TrialFailure::Unassigned);
    };

    // a panicking transform only takes its own trial down
    let corrected = catch_unwind(AssertUnwindSafe(|| {
        corrector.correct(segment, reference_segment, reference_gauge, hindcast, observations)
    }))
    .map_err(|_| TrialFailure::Correction("correction panicked".to_string()))?
    .map_err(|e| TrialFailure::Correction(format!("{e:#}")))?
    .ok_or(TrialFailure::NoCorrection)?;

    if corrected.simulated.is_empty() {
        return Err(TrialFailure::MissingColumn("simulated"));
    }
    if corrected.corrected.is_empty() {
        return Err(TrialFailure::MissingColumn("corrected"));
    }

    let observed = observations
        .observed(gauge)
        .map_err(|e| TrialFailure::Observations(format!("{e:#}")))?
        .ok_or(TrialFailure::NoObservations)?;

    let aligned = AlignedSeries::inner_join(&observed, &corrected.simulated, &corrected.corrected);
    if aligned.is_empty() {
        return Err(TrialFailure::EmptyOverlap);
    }

    Ok(MetricsRecord::compute(
        segment,
        gauge.clone(),
        reference_segment,
        &aligned,
    ))
}
