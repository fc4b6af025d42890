use crate::assign::{AssignmentTable, GaugeId, Method};
use crate::network::{NetworkTopology, SegmentId};
use std::collections::HashMap;
use tracing::debug;

pub type ClusterId = u32;

#[derive(Debug, Clone, Default)]
pub struct ClusterLabels {
    labels: HashMap<SegmentId, ClusterId>,
}

impl ClusterLabels {
    pub fn new(labels: HashMap<SegmentId, ClusterId>) -> Self {
        ClusterLabels { labels }
    }

    pub fn label(&self, segment: SegmentId) -> Option<ClusterId> {
        self.labels.get(&segment).copied()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl FromIterator<(SegmentId, ClusterId)> for ClusterLabels {
    fn from_iter<T: IntoIterator<Item = (SegmentId, ClusterId)>>(iter: T) -> Self {
        ClusterLabels {
            labels: iter.into_iter().collect(),
        }
    }
}

struct ClusterCandidate {
    segment: SegmentId,
    gauge: GaugeId,
    order: u32,
    area: Option<f64>,
}

/// Assigns every still-unassigned, labelled segment. Returns how many
/// segments were assigned.
pub fn assign_by_cluster(
    table: &mut AssignmentTable,
    network: &NetworkTopology,
    clusters: &ClusterLabels,
) -> usize {
    let mut options: HashMap<ClusterId, Vec<ClusterCandidate>> = HashMap::new();
    for (segment, gauge) in table.gauge_sources() {
        let (Some(label), Some(info)) = (clusters.label(segment), network.segment(segment)) else {
            continue;
        };
        options.entry(label).or_default().push(ClusterCandidate {
            segment,
            gauge,
            order: info.order,
            area: info.area_sqkm,
        });
    }

    let pending: Vec<SegmentId> = table
        .iter()
        .filter(|r| r.method == Method::Unassigned)
        .map(|r| r.segment_id)
        .collect();

    let mut assigned = 0;
    for segment in pending {
        let (Some(label), Some(info)) = (clusters.label(segment), network.segment(segment)) else {
            continue;
        };
        let Some(choices) = options.get(&label) else {
            continue;
        };

        // gauge_sources is sorted by gauge id, so min_by keeps the lowest id on ties
        let best = choices
            .iter()
            .filter(|o| o.order == info.order)
            .min_by(|a, b| {
                let distance = |o: &ClusterCandidate| match (o.area, info.area_sqkm) {
                    (Some(x), Some(y)) => (x - y).abs(),
                    _ => f64::INFINITY,
                };
                distance(a).total_cmp(&distance(b))
            });

        if let Some(best) = best {
            if table.assign_clustered(segment, best.segment, &best.gauge) {
                assigned += 1;
            }
        }
    }

    debug!(assigned, clusters = options.len(), "cluster assignment complete");
    assigned
}
