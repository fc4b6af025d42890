use crate::error::DataIntegrityError;
use std::collections::{HashMap, HashSet, VecDeque};

pub type SegmentId = u64;

// Raw row of the drain table, before validation
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRecord {
    pub id: SegmentId,
    pub order: u32,
    pub downstream_id: Option<SegmentId>,
    pub area_sqkm: Option<f64>,
}

impl SegmentRecord {
    pub fn new(id: SegmentId, order: u32, downstream_id: Option<SegmentId>) -> Self {
        SegmentRecord {
            id,
            order,
            downstream_id,
            area_sqkm: None,
        }
    }

    pub fn with_area(mut self, area_sqkm: f64) -> Self {
        self.area_sqkm = Some(area_sqkm);
        self
    }
}

// Network node representing a river segment
#[derive(Debug, Clone)]
pub struct Segment {
    pub id: SegmentId,
    pub order: u32,
    pub downstream_id: Option<SegmentId>,
    pub upstream_ids: Vec<SegmentId>,
    pub area_sqkm: Option<f64>,
}

/// Validated drainage network. The downstream relation is guaranteed to be a
/// forest once construction succeeds.
#[derive(Debug, Clone)]
pub struct NetworkTopology {
    segments: HashMap<SegmentId, Segment>,
    routing_order: Vec<SegmentId>,
}

impl NetworkTopology {
    /// Builds the topology, rejecting duplicate ids, zero orders, dangling
    /// downstream references and cycles.
    pub fn from_records<I>(records: I) -> Result<Self, DataIntegrityError>
    where
        I: IntoIterator<Item = SegmentRecord>,
    {
        let mut segments: HashMap<SegmentId, Segment> = HashMap::new();

        for record in records {
            if record.order == 0 {
                return Err(DataIntegrityError::InvalidOrder {
                    segment: record.id,
                    order: record.order,
                });
            }
            if segments.contains_key(&record.id) {
                return Err(DataIntegrityError::DuplicateSegment(record.id));
            }
            segments.insert(
                record.id,
                Segment {
                    id: record.id,
                    order: record.order,
                    downstream_id: record.downstream_id,
                    upstream_ids: Vec::new(),
                    area_sqkm: record.area_sqkm,
                },
            );
        }

        let mut topology = NetworkTopology {
            segments,
            routing_order: Vec::new(),
        };
        topology.build_upstream_connections()?;
        topology.topological_sort()?;
        Ok(topology)
    }

    fn build_upstream_connections(&mut self) -> Result<(), DataIntegrityError> {
        let mut upstream_map: HashMap<SegmentId, Vec<SegmentId>> = HashMap::new();

        for (id, segment) in &self.segments {
            if let Some(downstream) = segment.downstream_id {
                if !self.segments.contains_key(&downstream) {
                    return Err(DataIntegrityError::DanglingDownstream {
                        segment: *id,
                        downstream,
                    });
                }
                upstream_map.entry(downstream).or_default().push(*id);
            }
        }

        for (id, mut upstreams) in upstream_map {
            upstreams.sort_unstable();
            if let Some(segment) = self.segments.get_mut(&id) {
                segment.upstream_ids = upstreams;
            }
        }
        Ok(())
    }

    // Kahn's algorithm from headwaters to outlets; leftovers sit on a cycle
    fn topological_sort(&mut self) -> Result<(), DataIntegrityError> {
        let mut in_degree: HashMap<SegmentId, usize> = self
            .segments
            .values()
            .map(|s| (s.id, s.upstream_ids.len()))
            .collect();

        let mut headwaters: Vec<SegmentId> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&id, _)| id)
            .collect();
        headwaters.sort_unstable();
        let mut queue: VecDeque<SegmentId> = headwaters.into();

        self.routing_order.clear();

        while let Some(current) = queue.pop_front() {
            self.routing_order.push(current);

            if let Some(downstream) = self.segments.get(&current).and_then(|s| s.downstream_id) {
                if let Some(degree) = in_degree.get_mut(&downstream) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(downstream);
                    }
                }
            }
        }

        if self.routing_order.len() != self.segments.len() {
            let visited: HashSet<SegmentId> = self.routing_order.iter().copied().collect();
            let segment = self
                .segments
                .keys()
                .filter(|id| !visited.contains(*id))
                .min()
                .copied()
                .unwrap_or_default();
            return Err(DataIntegrityError::Cycle { segment });
        }

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn contains(&self, id: SegmentId) -> bool {
        self.segments.contains_key(&id)
    }

    pub fn segment(&self, id: SegmentId) -> Option<&Segment> {
        self.segments.get(&id)
    }

    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.values()
    }

    /// Headwaters first, outlets last.
    pub fn routing_order(&self) -> &[SegmentId] {
        &self.routing_order
    }

    pub fn upstream_ids(&self, id: SegmentId) -> &[SegmentId] {
        self.segments
            .get(&id)
            .map(|s| s.upstream_ids.as_slice())
            .unwrap_or(&[])
    }

    pub fn outlets(&self) -> Vec<SegmentId> {
        let mut outlets: Vec<SegmentId> = self
            .segments
            .values()
            .filter(|s| s.downstream_id.is_none())
            .map(|s| s.id)
            .collect();
        outlets.sort_unstable();
        outlets
    }

    /// Ids reached by following downstream pointers from `id`, excluding `id`
    /// itself, ending at the outlet.
    pub fn downstream_chain(&self, id: SegmentId) -> Result<Vec<SegmentId>, DataIntegrityError> {
        let start = self
            .segments
            .get(&id)
            .ok_or(DataIntegrityError::UnknownSegment(id))?;

        let mut seen = HashSet::from([id]);
        let mut chain = Vec::new();
        let mut next = start.downstream_id;

        while let Some(current) = next {
            if !seen.insert(current) {
                return Err(DataIntegrityError::Cycle { segment: current });
            }
            chain.push(current);
            next = self.segments.get(&current).and_then(|s| s.downstream_id);
        }

        Ok(chain)
    }

    /// Every segment whose downstream chain passes through `id`.
    pub fn upstream_set(&self, id: SegmentId) -> Result<HashSet<SegmentId>, DataIntegrityError> {
        if !self.segments.contains_key(&id) {
            return Err(DataIntegrityError::UnknownSegment(id));
        }

        let mut found = HashSet::new();
        let mut stack: Vec<SegmentId> = self.upstream_ids(id).to_vec();
        while let Some(current) = stack.pop() {
            if current == id || !found.insert(current) {
                return Err(DataIntegrityError::Cycle { segment: current });
            }
            stack.extend_from_slice(self.upstream_ids(current));
        }
        Ok(found)
    }
}
