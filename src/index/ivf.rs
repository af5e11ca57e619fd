//! Inverted file backends for medium and very large corpora
use super::kmeans::{self, Metric};
use super::pq::ProductQuantizer;
use super::{
    dot, rank_neighbors, validate_batch, validate_vector, IndexBackend, IndexError, IndexParams,
    IndexSnapshot, Neighbor, SearchMode, Topology,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, warn};

/// One partition of the inverted file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvertedList {
    ids: Vec<u64>,
    /// `ids.len() * code_size` bytes
    codes: Vec<u8>,
    /// `ids.len() * dimension` values in the refine topology, empty otherwise
    raw: Vec<f32>,
}

/// Persisted form of an [`IvfIndex`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IvfSnapshot {
    pub topology: Topology,
    pub dimension: usize,
    pub centroids: Vec<Vec<f32>>,
    pub quantizer: Option<ProductQuantizer>,
    pub lists: Vec<InvertedList>,
}

impl IvfSnapshot {
    pub fn len(&self) -> usize {
        self.lists.iter().map(|l| l.ids.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Inverted file with residual product quantization
///
/// Vectors are assigned to the coarse centroid with the highest inner product,
/// and the residual to that centroid is product-quantized. A query probes the
/// `nprobe` closest lists (see [`SearchMode::nprobe`]) and scores codes with a
/// per-query lookup table. The [`Topology::IvfRefine`] flavour additionally
/// keeps raw vectors and re-scores `k * refine_factor` candidates exactly.
pub struct IvfIndex {
    topology: Topology,
    dimension: usize,
    params: IndexParams,
    centroids: Vec<Vec<f32>>,
    quantizer: Option<ProductQuantizer>,
    lists: Vec<InvertedList>,
    /// id -> (list, offset)
    locations: HashMap<u64, (usize, usize)>,
}

struct Candidate {
    neighbor: Neighbor,
    list: usize,
    offset: usize,
}

impl IvfIndex {
    pub fn new(
        topology: Topology,
        dimension: usize,
        params: &IndexParams,
    ) -> Result<Self, IndexError> {
        if !topology.is_partitioned() {
            return Err(IndexError::InvalidParameters(format!(
                "{} is not an inverted file topology",
                topology
            )));
        }
        if params.pq_m == 0 || dimension % params.pq_m != 0 {
            return Err(IndexError::InvalidParameters(format!(
                "pq_m {} must divide dimension {}",
                params.pq_m, dimension
            )));
        }

        Ok(Self {
            topology,
            dimension,
            params: params.clone(),
            centroids: Vec::new(),
            quantizer: None,
            lists: Vec::new(),
            locations: HashMap::new(),
        })
    }

    pub fn restore(snapshot: IvfSnapshot, params: &IndexParams) -> Result<Self, IndexError> {
        let IvfSnapshot {
            topology,
            dimension,
            centroids,
            quantizer,
            lists,
        } = snapshot;

        let mut index = Self::new(topology, dimension, params)?;
        let invalid = |message: String| Err(IndexError::InvalidParameters(message));

        if centroids.len() != lists.len() {
            return invalid(format!(
                "{} centroids for {} inverted lists",
                centroids.len(),
                lists.len()
            ));
        }
        if centroids.iter().any(|c| c.len() != dimension) {
            return invalid("centroid dimension mismatch".to_string());
        }
        if quantizer.is_none() != centroids.is_empty() {
            return invalid("quantizer and centroids disagree on training state".to_string());
        }

        if let Some(pq) = &quantizer {
            pq.validate(dimension)?;
        }

        let code_size = quantizer.as_ref().map_or(0, ProductQuantizer::code_size);
        let keeps_raw = topology == Topology::IvfRefine;
        for (list_no, list) in lists.iter().enumerate() {
            let raw_expected = if keeps_raw { list.ids.len() * dimension } else { 0 };
            if list.codes.len() != list.ids.len() * code_size || list.raw.len() != raw_expected {
                return invalid(format!("inverted list {} has inconsistent lengths", list_no));
            }
            if quantizer.as_ref().is_some_and(|pq| !pq.codes_in_range(&list.codes)) {
                return invalid(format!("inverted list {} has out-of-range codes", list_no));
            }
            for (offset, &id) in list.ids.iter().enumerate() {
                if index.locations.insert(id, (list_no, offset)).is_some() {
                    return Err(IndexError::DuplicateId(id));
                }
            }
        }

        index.centroids = centroids;
        index.quantizer = quantizer;
        index.lists = lists;
        Ok(index)
    }

    fn nlist_target(&self) -> usize {
        match self.topology {
            Topology::IvfCompressed => self.params.nlist_compressed,
            _ => self.params.nlist_refine,
        }
    }

    fn keeps_raw(&self) -> bool {
        self.topology == Topology::IvfRefine
    }

    fn residual(&self, list: usize, vector: &[f32]) -> Vec<f32> {
        vector
            .iter()
            .zip(&self.centroids[list])
            .map(|(v, c)| v - c)
            .collect()
    }

    /// Lists to scan, best first
    fn probe(&self, query: &[f32], nprobe: usize) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, dot(c, query)))
            .collect();
        scored.sort_by(|a, b| match b.1.total_cmp(&a.1) {
            Ordering::Equal => a.0.cmp(&b.0),
            other => other,
        });
        scored.truncate(nprobe);
        scored
    }

    fn raw_vector(&self, list: usize, offset: usize) -> &[f32] {
        let start = offset * self.dimension;
        &self.lists[list].raw[start..start + self.dimension]
    }
}

impl IndexBackend for IvfIndex {
    fn topology(&self) -> Topology {
        self.topology
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.locations.len()
    }

    fn is_trained(&self) -> bool {
        self.quantizer.is_some()
    }

    fn train(&mut self, samples: &[Vec<f32>]) -> Result<(), IndexError> {
        if !self.locations.is_empty() {
            return Err(IndexError::InvalidParameters(
                "cannot retrain an inverted file that already holds vectors".to_string(),
            ));
        }
        if samples.is_empty() {
            return Err(IndexError::NotEnoughTrainingData { needed: 1, got: 0 });
        }
        for (position, sample) in samples.iter().enumerate() {
            validate_vector(self.dimension, sample, position)?;
        }

        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let target = self.nlist_target();
        if samples.len() < target {
            warn!(
                "Training {} with {} points for {} lists; using {} lists",
                self.topology,
                samples.len(),
                target,
                samples.len()
            );
        }

        let points: Vec<&[f32]> = samples.iter().map(Vec::as_slice).collect();
        let iterations = self.params.kmeans_iterations;
        let centroids = kmeans::train(&points, target, iterations, Metric::InnerProduct, &mut rng)?;

        let residuals: Vec<Vec<f32>> = points
            .iter()
            .map(|p| {
                let list = kmeans::nearest(&centroids, p, Metric::InnerProduct);
                p.iter().zip(&centroids[list]).map(|(v, c)| v - c).collect()
            })
            .collect();
        let residual_slices: Vec<&[f32]> = residuals.iter().map(Vec::as_slice).collect();
        let quantizer = ProductQuantizer::train(
            &residual_slices,
            self.dimension,
            self.params.pq_m,
            iterations,
            &mut rng,
        )?;

        debug!(
            "Trained {}: {} lists, {} byte codes, {} samples",
            self.topology,
            centroids.len(),
            quantizer.code_size(),
            samples.len()
        );

        self.lists = vec![InvertedList::default(); centroids.len()];
        self.centroids = centroids;
        self.quantizer = Some(quantizer);
        Ok(())
    }

    fn add_with_ids(&mut self, vectors: &[Vec<f32>], ids: &[u64]) -> Result<(), IndexError> {
        if self.quantizer.is_none() {
            return Err(IndexError::NotTrained);
        }
        validate_batch(self.dimension, vectors, ids, |id| {
            self.locations.contains_key(&id)
        })?;

        let encoded: Vec<(usize, Vec<u8>)> = vectors
            .iter()
            .map(|v| {
                let list = kmeans::nearest(&self.centroids, v, Metric::InnerProduct);
                let codes = self
                    .quantizer
                    .as_ref()
                    .map(|q| q.encode(&self.residual(list, v)))
                    .unwrap_or_default();
                (list, codes)
            })
            .collect();

        let keeps_raw = self.keeps_raw();
        for ((vector, &id), (list_no, codes)) in vectors.iter().zip(ids).zip(encoded) {
            let list = &mut self.lists[list_no];
            let offset = list.ids.len();
            list.ids.push(id);
            list.codes.extend_from_slice(&codes);
            if keeps_raw {
                list.raw.extend_from_slice(vector);
            }
            self.locations.insert(id, (list_no, offset));
        }

        Ok(())
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        mode: SearchMode,
    ) -> Result<Vec<Neighbor>, IndexError> {
        validate_vector(self.dimension, query, 0)?;
        let Some(quantizer) = self.quantizer.as_ref() else {
            return Ok(Vec::new());
        };
        if k == 0 || self.locations.is_empty() {
            return Ok(Vec::new());
        }

        let nprobe = mode.nprobe(&self.params, self.centroids.len());
        let table = quantizer.inner_product_table(query);
        let code_size = quantizer.code_size();

        let mut candidates = Vec::new();
        for (list_no, coarse) in self.probe(query, nprobe) {
            let list = &self.lists[list_no];
            let entries = list.ids.iter().zip(list.codes.chunks(code_size));
            for (offset, (&id, codes)) in entries.enumerate() {
                candidates.push(Candidate {
                    neighbor: Neighbor {
                        id,
                        similarity: coarse + ProductQuantizer::score(&table, codes),
                    },
                    list: list_no,
                    offset,
                });
            }
        }

        if !self.keeps_raw() {
            let neighbors = candidates.into_iter().map(|c| c.neighbor).collect();
            return Ok(rank_neighbors(neighbors, k));
        }

        candidates.sort_by(|a, b| {
            match b.neighbor.similarity.total_cmp(&a.neighbor.similarity) {
                Ordering::Equal => a.neighbor.id.cmp(&b.neighbor.id),
                other => other,
            }
        });
        candidates.truncate(k.saturating_mul(self.params.refine_factor.max(1)));

        let refined = candidates
            .into_iter()
            .map(|c| Neighbor {
                id: c.neighbor.id,
                similarity: dot(query, self.raw_vector(c.list, c.offset)),
            })
            .collect();
        Ok(rank_neighbors(refined, k))
    }

    fn reconstruct_range(&self, start: u64, count: usize) -> Result<Vec<Vec<f32>>, IndexError> {
        (start..start + count as u64)
            .map(|id| {
                let &(list_no, offset) =
                    self.locations.get(&id).ok_or(IndexError::MissingId(id))?;
                if self.keeps_raw() {
                    return Ok(self.raw_vector(list_no, offset).to_vec());
                }
                let quantizer = self.quantizer.as_ref().ok_or(IndexError::NotTrained)?;
                let code_size = quantizer.code_size();
                let span = offset * code_size..(offset + 1) * code_size;
                let codes = &self.lists[list_no].codes[span];
                Ok(quantizer
                    .decode(codes)
                    .iter()
                    .zip(&self.centroids[list_no])
                    .map(|(r, c)| r + c)
                    .collect())
            })
            .collect()
    }

    fn group_count(&self) -> usize {
        self.lists.len()
    }

    fn group_members(&self, group: usize) -> &[u64] {
        self.lists.get(group).map_or(&[], |l| l.ids.as_slice())
    }

    fn snapshot(&self) -> IndexSnapshot {
        IndexSnapshot::Ivf(IvfSnapshot {
            topology: self.topology,
            dimension: self.dimension,
            centroids: self.centroids.clone(),
            quantizer: self.quantizer.clone(),
            lists: self.lists.clone(),
        })
    }
}
