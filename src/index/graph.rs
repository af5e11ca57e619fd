//! HNSW graph backend for small corpora
use super::{
    rank_neighbors, validate_batch, validate_vector, IndexBackend, IndexError, IndexParams,
    IndexSnapshot, Neighbor, SearchMode, Topology,
};
use hnsw_rs::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Upper bound on graph layers (hnsw_rs caps this at 16 internally)
const MAX_LAYERS: usize = 16;

/// Persisted form of a [`GraphIndex`]; the graph itself is rebuilt on restore
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub dimension: usize,
    pub ids: Vec<u64>,
    /// Row-major, `ids.len() * dimension` values
    pub vectors: Vec<f32>,
}

/// HNSW graph over exact stored vectors
///
/// The graph narrows the candidate set; candidates are then re-scored by exact
/// inner product against the stored vectors, so scores are never approximate.
/// There is no partitioning, so [`SearchMode`] has no effect here.
pub struct GraphIndex {
    /// Inner HNSW graph, data ids are positions into `vectors`
    graph: Hnsw<'static, f32, DistCosine>,
    dimension: usize,
    ef_search: usize,
    vectors: Vec<Vec<f32>>,
    ids: Vec<u64>,
    positions: HashMap<u64, usize>,
}

impl GraphIndex {
    pub fn new(dimension: usize, params: &IndexParams) -> Self {
        let graph = Hnsw::<f32, DistCosine>::new(
            params.hnsw_m,
            1024, // initial capacity hint, grows as needed
            MAX_LAYERS,
            params.hnsw_ef_construction,
            DistCosine,
        );

        Self {
            graph,
            dimension,
            ef_search: params.hnsw_ef_search.max(1),
            vectors: Vec::new(),
            ids: Vec::new(),
            positions: HashMap::new(),
        }
    }

    pub fn restore(snapshot: GraphSnapshot, params: &IndexParams) -> Result<Self, IndexError> {
        let GraphSnapshot {
            dimension,
            ids,
            vectors,
        } = snapshot;

        if dimension == 0 || vectors.len() != ids.len() * dimension {
            return Err(IndexError::InvalidParameters(format!(
                "graph snapshot holds {} values for {} ids of dimension {}",
                vectors.len(),
                ids.len(),
                dimension
            )));
        }

        let rows: Vec<Vec<f32>> = vectors.chunks(dimension).map(<[f32]>::to_vec).collect();
        let mut index = Self::new(dimension, params);
        index.add_with_ids(&rows, &ids)?;
        Ok(index)
    }
}

impl IndexBackend for GraphIndex {
    fn topology(&self) -> Topology {
        Topology::Graph
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn is_trained(&self) -> bool {
        true
    }

    fn train(&mut self, _samples: &[Vec<f32>]) -> Result<(), IndexError> {
        Ok(())
    }

    fn add_with_ids(&mut self, vectors: &[Vec<f32>], ids: &[u64]) -> Result<(), IndexError> {
        validate_batch(self.dimension, vectors, ids, |id| {
            self.positions.contains_key(&id)
        })?;

        for (vector, &id) in vectors.iter().zip(ids) {
            let position = self.vectors.len();
            self.graph.insert((vector, position));
            self.vectors.push(vector.clone());
            self.ids.push(id);
            self.positions.insert(id, position);
        }

        Ok(())
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        _mode: SearchMode,
    ) -> Result<Vec<Neighbor>, IndexError> {
        validate_vector(self.dimension, query, 0)?;
        if k == 0 || self.ids.is_empty() {
            return Ok(Vec::new());
        }

        let candidates = k.max(self.ef_search).min(self.ids.len());
        let ef = self.ef_search.max(candidates);

        let neighbors = self
            .graph
            .search(query, candidates, ef)
            .into_iter()
            .filter_map(|n| {
                let vector = self.vectors.get(n.d_id)?;
                Some(Neighbor {
                    id: self.ids[n.d_id],
                    similarity: super::dot(query, vector),
                })
            })
            .collect();

        Ok(rank_neighbors(neighbors, k))
    }

    fn reconstruct_range(&self, start: u64, count: usize) -> Result<Vec<Vec<f32>>, IndexError> {
        (start..start + count as u64)
            .map(|id| {
                self.positions
                    .get(&id)
                    .map(|&p| self.vectors[p].clone())
                    .ok_or(IndexError::MissingId(id))
            })
            .collect()
    }

    fn group_count(&self) -> usize {
        usize::from(!self.ids.is_empty())
    }

    fn group_members(&self, group: usize) -> &[u64] {
        if group == 0 {
            self.ids.as_slice()
        } else {
            &[]
        }
    }

    fn snapshot(&self) -> IndexSnapshot {
        IndexSnapshot::Graph(GraphSnapshot {
            dimension: self.dimension,
            ids: self.ids.clone(),
            vectors: self.vectors.iter().flatten().copied().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::test_support::unit_vectors;

    fn populated(count: usize) -> (GraphIndex, Vec<Vec<f32>>) {
        let params = IndexParams::default();
        let mut index = GraphIndex::new(32, &params);
        let vectors = unit_vectors(count, 32, 7);
        let ids: Vec<u64> = (0..count as u64).collect();
        index.add_with_ids(&vectors, &ids).unwrap();
        (index, vectors)
    }

    #[test]
    fn test_insert_and_search() {
        let (index, vectors) = populated(20);
        assert_eq!(index.len(), 20);

        let results = index.search(&vectors[3], 5, SearchMode::Auto).unwrap();
        assert_eq!(results.len(), 5);
        assert_eq!(results[0].id, 3);
        assert!((results[0].similarity - 1.0).abs() < 1e-4);
        for pair in results.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
    }

    #[test]
    fn test_modes_are_equivalent() {
        let (index, vectors) = populated(25);
        let auto = index.search(&vectors[10], 4, SearchMode::Auto).unwrap();
        let breadth = index.search(&vectors[10], 4, SearchMode::Breadth).unwrap();
        let depth = index.search(&vectors[10], 4, SearchMode::Depth).unwrap();
        assert_eq!(auto, breadth);
        assert_eq!(auto, depth);
    }

    #[test]
    fn test_reconstruct_in_id_order() {
        let (index, vectors) = populated(6);
        let rebuilt = index.reconstruct_range(0, 6).unwrap();
        assert_eq!(rebuilt, vectors);
        assert!(matches!(
            index.reconstruct_range(4, 5),
            Err(IndexError::MissingId(6))
        ));
    }

    #[test]
    fn test_rejected_batch_leaves_index_unchanged() {
        let (mut index, _) = populated(3);
        let mut batch = unit_vectors(2, 32, 99);
        batch[1] = vec![1.0; 8];
        assert!(index.add_with_ids(&batch, &[3, 4]).is_err());
        assert_eq!(index.len(), 3);

        assert!(matches!(
            index.add_with_ids(&unit_vectors(1, 32, 5), &[1]),
            Err(IndexError::DuplicateId(1))
        ));
    }

    #[test]
    fn test_empty_search() {
        let index = GraphIndex::new(8, &IndexParams::default());
        let results = index.search(&[0.0; 8], 3, SearchMode::Auto).unwrap();
        assert!(results.is_empty());
        assert_eq!(index.group_count(), 0);
        assert!(index.group_members(0).is_empty());
    }

    #[test]
    fn test_snapshot_restore() {
        let (index, vectors) = populated(12);
        let IndexSnapshot::Graph(snapshot) = index.snapshot() else {
            panic!("graph index produced a non-graph snapshot");
        };
        let restored = GraphIndex::restore(snapshot, &IndexParams::default()).unwrap();
        assert_eq!(restored.len(), 12);
        let hit = restored.search(&vectors[11], 1, SearchMode::Auto).unwrap();
        assert_eq!(hit[0].id, 11);
    }
}
