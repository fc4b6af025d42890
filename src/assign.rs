use crate::error::DataIntegrityError;
use crate::network::{NetworkTopology, SegmentId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Identifier of a physical gauging station.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GaugeId(String);

impl GaugeId {
    pub fn new(id: impl Into<String>) -> Self {
        GaugeId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GaugeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a segment obtained its reference gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Method {
    #[serde(rename = "gauged")]
    Gauged,
    #[serde(rename = "propagated-downstream")]
    PropagatedDownstream,
    #[serde(rename = "propagated-upstream")]
    PropagatedUpstream,
    #[serde(rename = "clustered")]
    Clustered,
    #[serde(rename = "unassigned")]
    Unassigned,
}

impl Method {
    pub const ALL: [Method; 5] = [
        Method::Gauged,
        Method::PropagatedDownstream,
        Method::PropagatedUpstream,
        Method::Clustered,
        Method::Unassigned,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Gauged => "gauged",
            Method::PropagatedDownstream => "propagated-downstream",
            Method::PropagatedUpstream => "propagated-upstream",
            Method::Clustered => "clustered",
            Method::Unassigned => "unassigned",
        }
    }

    pub fn is_propagated(&self) -> bool {
        matches!(self, Method::PropagatedDownstream | Method::PropagatedUpstream)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown assignment method {s:?}"))
    }
}

/// One row of the assignment table.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentRecord {
    pub segment_id: SegmentId,
    pub gauge_id: Option<GaugeId>,
    pub assigned_gauge_id: Option<GaugeId>,
    pub assigned_segment_id: Option<SegmentId>,
    pub method: Method,
    pub propagation_distance: Option<usize>,
}

impl AssignmentRecord {
    pub(crate) fn unassigned(segment_id: SegmentId, gauge_id: Option<GaugeId>) -> Self {
        AssignmentRecord {
            segment_id,
            gauge_id,
            assigned_gauge_id: None,
            assigned_segment_id: None,
            method: Method::Unassigned,
            propagation_distance: None,
        }
    }

    fn self_gauged(segment_id: SegmentId, gauge_id: GaugeId) -> Self {
        AssignmentRecord {
            segment_id,
            gauge_id: Some(gauge_id.clone()),
            assigned_gauge_id: Some(gauge_id),
            assigned_segment_id: Some(segment_id),
            method: Method::Gauged,
            propagation_distance: Some(0),
        }
    }

    pub fn is_assigned(&self) -> bool {
        self.method != Method::Unassigned
    }

    fn reset(&mut self) {
        self.assigned_gauge_id = None;
        self.assigned_segment_id = None;
        self.method = Method::Unassigned;
        self.propagation_distance = None;
    }
}

/// Per-segment assignments keyed by segment id.
///
/// The `excluded` gauge keeps its `gauge_id` on the record but is not part
/// of the pool. It is never `gauged` and never a source.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentTable {
    records: BTreeMap<SegmentId, AssignmentRecord>,
    excluded: Option<SegmentId>,
}

impl AssignmentTable {
    /// Every segment starts `unassigned`, then each gauged segment is marked
    /// `gauged` with itself as the reference.
    pub fn new<I>(network: &NetworkTopology, gauges: I) -> Result<Self, DataIntegrityError>
    where
        I: IntoIterator<Item = (SegmentId, GaugeId)>,
    {
        let mut gauge_sites: HashMap<GaugeId, SegmentId> = HashMap::new();
        let mut by_segment: HashMap<SegmentId, GaugeId> = HashMap::new();

        for (segment, gauge) in gauges {
            if !network.contains(segment) {
                return Err(DataIntegrityError::UnknownSegment(segment));
            }
            if let Some(existing) = by_segment.get(&segment) {
                if existing != &gauge {
                    return Err(DataIntegrityError::DuplicateGaugeOnSegment {
                        segment,
                        first: existing.to_string(),
                        second: gauge.to_string(),
                    });
                }
                continue;
            }
            if let Some(&first) = gauge_sites.get(&gauge) {
                return Err(DataIntegrityError::GaugeOnMultipleSegments {
                    gauge: gauge.to_string(),
                    first: first.min(segment),
                    second: first.max(segment),
                });
            }
            gauge_sites.insert(gauge.clone(), segment);
            by_segment.insert(segment, gauge);
        }

        let records = network
            .segments()
            .map(|s| {
                let record = match by_segment.remove(&s.id) {
                    Some(gauge) => AssignmentRecord::self_gauged(s.id, gauge),
                    None => AssignmentRecord::unassigned(s.id, None),
                };
                (s.id, record)
            })
            .collect();

        Ok(AssignmentTable {
            records,
            excluded: None,
        })
    }

    /// Rebuilds a table from persisted records, checked against `network`.
    /// Gauges go through the same checks as `new`, and every referenced
    /// segment must exist. Segments missing from the records start
    /// `unassigned`.
    pub fn from_records<I>(network: &NetworkTopology, records: I) -> Result<Self, DataIntegrityError>
    where
        I: IntoIterator<Item = AssignmentRecord>,
    {
        let mut persisted = BTreeMap::new();
        for record in records {
            let id = record.segment_id;
            for segment in std::iter::once(id).chain(record.assigned_segment_id) {
                if !network.contains(segment) {
                    return Err(DataIntegrityError::UnknownSegment(segment));
                }
            }
            if persisted.insert(id, record).is_some() {
                return Err(DataIntegrityError::DuplicateSegment(id));
            }
        }

        let gauges: Vec<(SegmentId, GaugeId)> = persisted
            .values()
            .filter_map(|r| r.gauge_id.clone().map(|g| (r.segment_id, g)))
            .collect();
        let mut table = AssignmentTable::new(network, gauges)?;
        table.records.extend(persisted);
        Ok(table)
    }

    /// A fresh copy of the gauged state with `segment`'s gauge withheld from
    /// the pool. All derived assignments are cleared so they can be
    /// recomputed from the remaining gauges.
    pub fn without_gauge(&self, segment: SegmentId) -> Self {
        let mut trial = self.clone();
        trial.excluded = Some(segment);
        trial.reset_derived();
        trial
    }

    /// Resets every segment that is not a pooled gauge to `unassigned`.
    pub fn reset_derived(&mut self) {
        let excluded = self.excluded;
        for record in self.records.values_mut() {
            match &record.gauge_id {
                Some(gauge) if Some(record.segment_id) != excluded => {
                    *record = AssignmentRecord::self_gauged(record.segment_id, gauge.clone());
                }
                _ => record.reset(),
            }
        }
    }

    pub fn excluded(&self) -> Option<SegmentId> {
        self.excluded
    }

    pub fn get(&self, segment: SegmentId) -> Option<&AssignmentRecord> {
        self.records.get(&segment)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AssignmentRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Gauged segments in the pool, ordered by gauge id then segment id. This
    /// is the processing order that decides equal-distance ties.
    pub fn gauge_sources(&self) -> Vec<(SegmentId, GaugeId)> {
        let mut sources: Vec<(SegmentId, GaugeId)> = self
            .records
            .values()
            .filter(|r| r.method == Method::Gauged)
            .filter_map(|r| r.gauge_id.clone().map(|g| (r.segment_id, g)))
            .collect();
        sources.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
        sources
    }

    /// Every segment hosting a physical gauge, excluded or not.
    pub fn gauged_segments(&self) -> Vec<(SegmentId, GaugeId)> {
        self.records
            .values()
            .filter_map(|r| r.gauge_id.clone().map(|g| (r.segment_id, g)))
            .collect()
    }

    /// Offers a propagated assignment to `segment`. Gauged segments are never
    /// touched; an existing propagated assignment at the same or a smaller
    /// distance is kept. Returns whether the offer was accepted.
    pub fn offer_propagated(
        &mut self,
        segment: SegmentId,
        source_segment: SegmentId,
        gauge: &GaugeId,
        method: Method,
        distance: usize,
    ) -> bool {
        debug_assert!(method.is_propagated());
        let Some(record) = self.records.get_mut(&segment) else {
            return false;
        };

        let accept = match record.method {
            Method::Gauged => false,
            Method::PropagatedDownstream | Method::PropagatedUpstream => record
                .propagation_distance
                .is_none_or(|existing| distance < existing),
            Method::Clustered | Method::Unassigned => true,
        };

        if accept {
            record.assigned_gauge_id = Some(gauge.clone());
            record.assigned_segment_id = Some(source_segment);
            record.method = method;
            record.propagation_distance = Some(distance);
        }
        accept
    }

    /// Assigns a still-unassigned segment by cluster membership.
    pub fn assign_clustered(
        &mut self,
        segment: SegmentId,
        source_segment: SegmentId,
        gauge: &GaugeId,
    ) -> bool {
        match self.records.get_mut(&segment) {
            Some(record) if record.method == Method::Unassigned => {
                record.assigned_gauge_id = Some(gauge.clone());
                record.assigned_segment_id = Some(source_segment);
                record.method = Method::Clustered;
                record.propagation_distance = None;
                true
            }
            _ => false,
        }
    }

    pub fn count_by_method(&self) -> BTreeMap<Method, usize> {
        let mut counts = BTreeMap::new();
        for record in self.records.values() {
            *counts.entry(record.method).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::SegmentRecord;

    fn network() -> NetworkTopology {
        NetworkTopology::from_records(vec![
            SegmentRecord::new(1, 1, Some(2)),
            SegmentRecord::new(2, 1, Some(3)),
            SegmentRecord::new(3, 1, None),
        ])
        .unwrap()
    }

    #[test]
    fn gauged_segments_reference_themselves() {
        let table = AssignmentTable::new(&network(), [(2, GaugeId::new("g2"))]).unwrap();
        let record = table.get(2).unwrap();
        assert_eq!(record.method, Method::Gauged);
        assert_eq!(record.assigned_gauge_id, record.gauge_id);
        assert_eq!(record.assigned_segment_id, Some(2));
        assert_eq!(record.propagation_distance, Some(0));

        let other = table.get(1).unwrap();
        assert_eq!(other.method, Method::Unassigned);
        assert!(other.assigned_gauge_id.is_none());
        assert!(other.propagation_distance.is_none());
    }

    #[test]
    fn rejects_gauge_on_unknown_segment() {
        let err = AssignmentTable::new(&network(), [(9, GaugeId::new("g"))]).unwrap_err();
        assert_eq!(err, DataIntegrityError::UnknownSegment(9));
    }

    #[test]
    fn rejects_one_gauge_on_two_segments() {
        let err = AssignmentTable::new(
            &network(),
            [(1, GaugeId::new("g")), (3, GaugeId::new("g"))],
        )
        .unwrap_err();
        assert!(matches!(err, DataIntegrityError::GaugeOnMultipleSegments { .. }));
    }

    #[test]
    fn rejects_two_gauges_on_one_segment() {
        let err = AssignmentTable::new(
            &network(),
            [(1, GaugeId::new("a")), (1, GaugeId::new("b"))],
        )
        .unwrap_err();
        assert!(matches!(err, DataIntegrityError::DuplicateGaugeOnSegment { segment: 1, .. }));
    }

    #[test]
    fn offer_keeps_closer_assignment() {
        let mut table = AssignmentTable::new(&network(), [(3, GaugeId::new("g3"))]).unwrap();
        let far = GaugeId::new("far");
        let near = GaugeId::new("near");

        assert!(table.offer_propagated(1, 3, &far, Method::PropagatedUpstream, 2));
        assert!(table.offer_propagated(1, 2, &near, Method::PropagatedDownstream, 1));
        assert!(!table.offer_propagated(1, 3, &far, Method::PropagatedUpstream, 1));
        assert_eq!(table.get(1).unwrap().assigned_gauge_id, Some(near));
        assert!(!table.offer_propagated(3, 1, &far, Method::PropagatedDownstream, 1));
        assert_eq!(table.get(3).unwrap().method, Method::Gauged);
    }

    #[test]
    fn without_gauge_hides_source_but_keeps_gauge_id() {
        let mut table = AssignmentTable::new(
            &network(),
            [(1, GaugeId::new("g1")), (3, GaugeId::new("g3"))],
        )
        .unwrap();
        table.offer_propagated(2, 1, &GaugeId::new("g1"), Method::PropagatedDownstream, 1);

        let trial = table.without_gauge(1);
        let hidden = trial.get(1).unwrap();
        assert_eq!(hidden.gauge_id, Some(GaugeId::new("g1")));
        assert_eq!(hidden.method, Method::Unassigned);
        assert_eq!(trial.get(2).unwrap().method, Method::Unassigned);
        assert_eq!(trial.gauge_sources(), vec![(3, GaugeId::new("g3"))]);
        assert_eq!(trial.excluded(), Some(1));
        // source table untouched
        assert_eq!(table.get(1).unwrap().method, Method::Gauged);
    }

    #[test]
    fn persisted_records_are_checked_against_network() {
        let network = network();
        let stale = |segment, gauge: &str| AssignmentRecord {
            segment_id: segment,
            gauge_id: Some(GaugeId::new(gauge)),
            assigned_gauge_id: Some(GaugeId::new(gauge)),
            assigned_segment_id: Some(segment),
            method: Method::Gauged,
            propagation_distance: Some(0),
        };

        let err = AssignmentTable::from_records(&network, [stale(1, "g1"), stale(99, "h")]).unwrap_err();
        assert_eq!(err, DataIntegrityError::UnknownSegment(99));

        let err = AssignmentTable::from_records(&network, [stale(1, "g"), stale(2, "g")]).unwrap_err();
        assert_eq!(
            err,
            DataIntegrityError::GaugeOnMultipleSegments {
                gauge: "g".to_string(),
                first: 1,
                second: 2
            }
        );

        let mut dangling = AssignmentRecord::unassigned(2, None);
        dangling.assigned_segment_id = Some(42);
        let err = AssignmentTable::from_records(&network, [stale(1, "g1"), dangling]).unwrap_err();
        assert_eq!(err, DataIntegrityError::UnknownSegment(42));
    }

    #[test]
    fn persisted_records_fill_missing_segments_as_unassigned() {
        let network = network();
        let mut propagated = AssignmentRecord::unassigned(2, None);
        propagated.assigned_gauge_id = Some(GaugeId::new("g1"));
        propagated.assigned_segment_id = Some(1);
        propagated.method = Method::PropagatedDownstream;
        propagated.propagation_distance = Some(1);

        let fresh = AssignmentTable::new(&network, [(1, GaugeId::new("g1"))]).unwrap();
        let table = AssignmentTable::from_records(
            &network,
            [fresh.get(1).unwrap().clone(), propagated.clone()],
        )
        .unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.get(2), Some(&propagated));
        assert_eq!(table.get(3).unwrap().method, Method::Unassigned);
        assert_eq!(table.gauge_sources(), vec![(1, GaugeId::new("g1"))]);
    }

    #[test]
    fn method_tags_parse_back() {
        for method in Method::ALL {
            assert_eq!(method.as_str().parse::<Method>().unwrap(), method);
        }
        assert!("spatial".parse::<Method>().is_err());
    }
}
