use crate::assign::{AssignmentTable, Method};
use crate::error::ConfigError;
use crate::network::{NetworkTopology, SegmentId};
use tracing::debug;

pub const DEFAULT_MAX_PROPAGATION: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub segment: SegmentId,
    pub hops: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct PropagationEngine<'a> {
    network: &'a NetworkTopology,
    max_propagation: usize,
}

impl<'a> PropagationEngine<'a> {
    pub fn new(network: &'a NetworkTopology, max_propagation: usize) -> Result<Self, ConfigError> {
        if max_propagation == 0 {
            return Err(ConfigError::InvalidMaxPropagation(max_propagation));
        }
        Ok(PropagationEngine {
            network,
            max_propagation,
        })
    }

    pub fn max_propagation(&self) -> usize {
        self.max_propagation
    }

    /// Follows the downstream pointer from `source` while the order matches,
    /// up to the hop limit. The walk stops at the first order change.
    pub fn walk_downstream(&self, source: SegmentId) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        let Some(start) = self.network.segment(source) else {
            return candidates;
        };

        let mut next = start.downstream_id;
        let mut hops = 1;
        while let Some(id) = next {
            if hops > self.max_propagation {
                break;
            }
            let Some(segment) = self.network.segment(id) else {
                break;
            };
            if segment.order != start.order {
                break;
            }
            candidates.push(Candidate { segment: id, hops });
            next = segment.downstream_id;
            hops += 1;
        }
        candidates
    }

    /// Breadth-first expansion over upstream neighbours of the same order.
    /// Each branch is followed independently until it changes order or runs
    /// out of hops.
    pub fn walk_upstream(&self, source: SegmentId) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        let Some(start) = self.network.segment(source) else {
            return candidates;
        };

        let mut frontier = vec![source];
        for hops in 1..=self.max_propagation {
            let mut next_frontier = Vec::new();
            for id in frontier {
                for &upstream in self.network.upstream_ids(id) {
                    let same_order = self
                        .network
                        .segment(upstream)
                        .is_some_and(|s| s.order == start.order);
                    if same_order {
                        candidates.push(Candidate {
                            segment: upstream,
                            hops,
                        });
                        next_frontier.push(upstream);
                    }
                }
            }
            if next_frontier.is_empty() {
                break;
            }
            frontier = next_frontier;
        }
        candidates
    }

    /// Propagates every gauge in the table's pool. Gauges are visited in
    /// ascending gauge id so equal-distance ties always go to the lowest id.
    pub fn propagate(&self, table: &mut AssignmentTable) {
        let sources = table.gauge_sources();
        let mut accepted = 0usize;

        for (source, gauge) in &sources {
            for candidate in self.walk_downstream(*source) {
                if table.offer_propagated(
                    candidate.segment,
                    *source,
                    gauge,
                    Method::PropagatedDownstream,
                    candidate.hops,
                ) {
                    accepted += 1;
                }
            }
            for candidate in self.walk_upstream(*source) {
                if table.offer_propagated(
                    candidate.segment,
                    *source,
                    gauge,
                    Method::PropagatedUpstream,
                    candidate.hops,
                ) {
                    accepted += 1;
                }
            }
        }

        debug!(
            gauges = sources.len(),
            accepted,
            max_propagation = self.max_propagation,
            "propagation pass complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assign::GaugeId;
    use crate::network::SegmentRecord;

    fn chain_of_five() -> NetworkTopology {
        NetworkTopology::from_records(vec![
            SegmentRecord::new(1, 1, Some(2)),
            SegmentRecord::new(2, 1, Some(3)),
            SegmentRecord::new(3, 1, Some(4)),
            SegmentRecord::new(4, 1, Some(5)),
            SegmentRecord::new(5, 1, None),
        ])
        .unwrap()
    }

    fn assign(network: &NetworkTopology, gauges: &[(SegmentId, &str)], max: usize) -> AssignmentTable {
        let mut table = AssignmentTable::new(
            network,
            gauges.iter().map(|&(s, g)| (s, GaugeId::new(g))),
        )
        .unwrap();
        PropagationEngine::new(network, max).unwrap().propagate(&mut table);
        table
    }

    #[test]
    fn linear_chain_with_two_hops() {
        let network = chain_of_five();
        let table = assign(&network, &[(3, "g3")], 2);

        let expect = [
            (1, Method::PropagatedUpstream, 2),
            (2, Method::PropagatedUpstream, 1),
            (3, Method::Gauged, 0),
            (4, Method::PropagatedDownstream, 1),
            (5, Method::PropagatedDownstream, 2),
        ];
        for (id, method, distance) in expect {
            let record = table.get(id).unwrap();
            assert_eq!(record.method, method, "segment {id}");
            assert_eq!(record.propagation_distance, Some(distance), "segment {id}");
            assert_eq!(record.assigned_gauge_id, Some(GaugeId::new("g3")));
            assert_eq!(record.assigned_segment_id, Some(3));
        }
    }

    #[test]
    fn linear_chain_with_one_hop_leaves_ends_unassigned() {
        let network = chain_of_five();
        let table = assign(&network, &[(3, "g3")], 1);

        assert_eq!(table.get(1).unwrap().method, Method::Unassigned);
        assert_eq!(table.get(5).unwrap().method, Method::Unassigned);
        assert!(table.get(1).unwrap().propagation_distance.is_none());
        assert_eq!(table.get(2).unwrap().propagation_distance, Some(1));
        assert_eq!(table.get(4).unwrap().propagation_distance, Some(1));
    }

    #[test]
    fn downstream_walk_stops_at_order_change() {
        // 1 (order 1) -> 2 (order 2) -> 3 (order 1)
        let network = NetworkTopology::from_records(vec![
            SegmentRecord::new(1, 1, Some(2)),
            SegmentRecord::new(2, 2, Some(3)),
            SegmentRecord::new(3, 1, None),
        ])
        .unwrap();
        let engine = PropagationEngine::new(&network, 5).unwrap();
        assert!(engine.walk_downstream(1).is_empty());

        let table = assign(&network, &[(1, "g1")], 5);
        assert_eq!(table.get(2).unwrap().method, Method::Unassigned);
        assert_eq!(table.get(3).unwrap().method, Method::Unassigned);
    }

    #[test]
    fn upstream_walk_follows_every_same_order_branch() {
        //  1 -> 3, 2 -> 3, 0 -> 1, 4 (order 2) -> 3 is a different river
        let network = NetworkTopology::from_records(vec![
            SegmentRecord::new(0, 2, Some(1)),
            SegmentRecord::new(1, 2, Some(3)),
            SegmentRecord::new(2, 2, Some(3)),
            SegmentRecord::new(3, 2, None),
            SegmentRecord::new(4, 1, Some(3)),
        ])
        .unwrap();
        let engine = PropagationEngine::new(&network, 5).unwrap();
        let mut found = engine.walk_upstream(3);
        found.sort_by_key(|c| c.segment);
        assert_eq!(
            found,
            vec![
                Candidate { segment: 0, hops: 2 },
                Candidate { segment: 1, hops: 1 },
                Candidate { segment: 2, hops: 1 },
            ]
        );
    }

    #[test]
    fn closer_gauge_wins_regardless_of_processing_order() {
        // chain 1..=5, gauges at 1 ("a") and 5 ("b"); segment 4 is closer to "b"
        let network = chain_of_five();
        let table = assign(&network, &[(1, "a"), (5, "b")], 5);

        assert_eq!(table.get(2).unwrap().assigned_gauge_id, Some(GaugeId::new("a")));
        assert_eq!(table.get(4).unwrap().assigned_gauge_id, Some(GaugeId::new("b")));
        assert_eq!(table.get(4).unwrap().method, Method::PropagatedUpstream);
        assert_eq!(table.get(4).unwrap().propagation_distance, Some(1));
    }

    #[test]
    fn equal_distance_goes_to_lowest_gauge_id() {
        // gauges at 1 and 5 are both two hops from 3
        let network = chain_of_five();
        let table = assign(&network, &[(5, "a"), (1, "z")], 5);
        let middle = table.get(3).unwrap();
        assert_eq!(middle.assigned_gauge_id, Some(GaugeId::new("a")));
        assert_eq!(middle.propagation_distance, Some(2));

        let swapped = assign(&network, &[(5, "z"), (1, "a")], 5);
        assert_eq!(swapped.get(3).unwrap().assigned_gauge_id, Some(GaugeId::new("a")));
    }

    #[test]
    fn gauged_segments_are_never_overwritten() {
        let network = chain_of_five();
        let table = assign(&network, &[(2, "g2"), (3, "g3")], 5);
        for id in [2, 3] {
            let record = table.get(id).unwrap();
            assert_eq!(record.method, Method::Gauged);
            assert_eq!(record.assigned_gauge_id, record.gauge_id);
        }
    }

    #[test]
    fn no_distance_exceeds_hop_limit() {
        let network = chain_of_five();
        for max in 1..=4 {
            let table = assign(&network, &[(1, "g1")], max);
            for record in table.iter() {
                if let Some(distance) = record.propagation_distance {
                    assert!(distance <= max);
                }
            }
        }
    }

    #[test]
    fn zero_hop_limit_is_rejected() {
        let network = chain_of_five();
        assert!(matches!(
            PropagationEngine::new(&network, 0),
            Err(ConfigError::InvalidMaxPropagation(0))
        ));
    }
}
