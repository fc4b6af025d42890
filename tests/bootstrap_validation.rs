use chrono::{NaiveDate, NaiveDateTime};
use saber_rs::bootstrap::Bootstrap;
use saber_rs::config::RunConfig;
use saber_rs::correction::{Correction, Corrector, HindcastSource, ObservationSource};
use saber_rs::io::csv::{CsvObservations, read_metrics_report, write_metrics_report};
use saber_rs::metrics::{Change, ChangeCounts, Metric, postprocess};
use saber_rs::series::Series;
use saber_rs::{AssignmentTable, GaugeId, Method, NetworkTopology, SegmentId, SegmentRecord};
use std::collections::HashMap;
use std::fs;

fn day(d: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2000, 1, d)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn series(values: &[f64]) -> Series {
    values
        .iter()
        .enumerate()
        .map(|(i, &v)| (day(i as u32 + 1), v))
        .collect()
}

/// Uses the reference gauge's observations as the corrected series.
struct BorrowObservations;

impl Corrector for BorrowObservations {
    fn correct(
        &self,
        target: SegmentId,
        _reference_segment: SegmentId,
        reference_gauge: &GaugeId,
        hindcast: &dyn HindcastSource,
        gauges: &dyn ObservationSource,
    ) -> anyhow::Result<Option<Correction>> {
        let (Some(simulated), Some(corrected)) =
            (hindcast.simulated(target)?, gauges.observed(reference_gauge)?)
        else {
            return Ok(None);
        };
        Ok(Some(Correction {
            simulated,
            corrected,
        }))
    }
}

fn chain() -> NetworkTopology {
    NetworkTopology::from_records([
        SegmentRecord::new(1, 1, Some(2)),
        SegmentRecord::new(2, 1, Some(3)),
        SegmentRecord::new(3, 1, None),
    ])
    .unwrap()
}

fn config() -> RunConfig {
    RunConfig {
        max_propagation: 2,
        n_processes: 2,
        ..RunConfig::default()
    }
}

fn hindcast() -> HashMap<SegmentId, Series> {
    // every segment overestimates by one
    [1, 2, 3]
        .into_iter()
        .map(|s| (s, series(&[2.0, 3.0, 4.0, 5.0])))
        .collect()
}

#[test]
fn each_withheld_gauge_is_scored_from_its_neighbour() {
    let network = chain();
    let table = AssignmentTable::new(
        &network,
        [(1, GaugeId::new("G1")), (3, GaugeId::new("G3"))],
    )
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    for gauge in ["G1", "G3"] {
        fs::write(
            dir.path().join(format!("{gauge}.csv")),
            "datetime,flow\n\
             2000-01-01 00:00:00,1.0\n\
             2000-01-02 00:00:00,2.0\n\
             2000-01-03 00:00:00,3.0\n\
             2000-01-04 00:00:00,4.0\n",
        )
        .unwrap();
    }
    let observations = CsvObservations::new(dir.path());

    let bootstrap = Bootstrap::new(&network, &table, &config()).unwrap();
    assert_eq!(bootstrap.trial_count(), 2);
    let report = bootstrap
        .run(&BorrowObservations, &hindcast(), &observations)
        .unwrap();

    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.skipped(), 0);

    let assignments = report.assignments();
    assert_eq!(assignments[0].segment_id, 1);
    assert_eq!(assignments[0].method, Method::PropagatedUpstream);
    assert_eq!(assignments[0].assigned_gauge_id, Some(GaugeId::new("G3")));
    assert_eq!(assignments[0].propagation_distance, Some(2));
    assert_eq!(assignments[1].segment_id, 3);
    assert_eq!(assignments[1].method, Method::PropagatedDownstream);
    assert_eq!(assignments[1].assigned_gauge_id, Some(GaugeId::new("G1")));

    let records = report.records();
    let counts = ChangeCounts::tally(&records);
    for metric in [Metric::Me, Metric::Mae, Metric::Rmse, Metric::Nse] {
        assert_eq!(counts.get(metric, Change::Improved), 2, "{metric}");
    }
    assert_eq!(counts.get(Metric::Kge, Change::Worsened), 0);

    let rows = postprocess(&records);
    assert_eq!(rows[0].reach_id, 1);
    assert_eq!(rows[0].asgn_reach_id, 3);
    assert_eq!(rows[0].me, 2);

    let out = dir.path().join("bootstrap_metrics.csv");
    write_metrics_report(&out, &rows).unwrap();
    assert_eq!(read_metrics_report(&out).unwrap(), rows);
}

#[test]
fn lone_gauge_trial_is_skipped_as_unassigned() {
    let network = chain();
    let table = AssignmentTable::new(&network, [(2, GaugeId::new("G2"))]).unwrap();
    let observations: HashMap<GaugeId, Series> =
        [(GaugeId::new("G2"), series(&[1.0, 2.0, 3.0, 4.0]))].into();

    let bootstrap = Bootstrap::new(&network, &table, &config()).unwrap();
    let withheld = bootstrap.reassign(2);
    assert!(withheld.iter().all(|r| r.method == Method::Unassigned));
    assert_eq!(withheld.get(2).unwrap().gauge_id, Some(GaugeId::new("G2")));

    let report = bootstrap
        .run(&BorrowObservations, &hindcast(), &observations)
        .unwrap();
    assert_eq!(report.succeeded(), 0);
    assert_eq!(report.failure_counts().get("unassigned"), Some(&1));
    assert!(report.records().is_empty());
}

#[test]
fn source_table_is_untouched_by_trials() {
    let network = chain();
    let table = AssignmentTable::new(
        &network,
        [(1, GaugeId::new("G1")), (3, GaugeId::new("G3"))],
    )
    .unwrap();
    let before = table.clone();

    let observations: HashMap<GaugeId, Series> = HashMap::new();
    let bootstrap = Bootstrap::new(&network, &table, &config()).unwrap();
    let report = bootstrap
        .run(&BorrowObservations, &hindcast(), &observations)
        .unwrap();

    assert_eq!(report.failure_counts().get("no-correction"), Some(&2));
    assert_eq!(table, before);
}
