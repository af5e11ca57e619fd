//! Product quantizer with 8-bit codes

use super::kmeans::{self, Metric};
use super::IndexError;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

/// Centroids per sub-space; codes are stored as one byte each
const MAX_CENTROIDS: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductQuantizer {
    dimension: usize,
    sub_dimension: usize,
    /// One row-major `ksub * sub_dimension` codebook per sub-space
    codebooks: Vec<Vec<f32>>,
}

impl ProductQuantizer {
    pub(crate) fn train(
        points: &[&[f32]],
        dimension: usize,
        sub_spaces: usize,
        iterations: usize,
        rng: &mut StdRng,
    ) -> Result<Self, IndexError> {
        if sub_spaces == 0 || dimension % sub_spaces != 0 {
            return Err(IndexError::InvalidParameters(format!(
                "pq_m {} must divide dimension {}",
                sub_spaces, dimension
            )));
        }
        let sub_dimension = dimension / sub_spaces;

        let mut codebooks = Vec::with_capacity(sub_spaces);
        for sub in 0..sub_spaces {
            let range = sub * sub_dimension..(sub + 1) * sub_dimension;
            let slices: Vec<&[f32]> = points.iter().map(|p| &p[range.clone()]).collect();
            let centroids = kmeans::train(&slices, MAX_CENTROIDS, iterations, Metric::L2, rng)?;
            codebooks.push(centroids.into_iter().flatten().collect());
        }

        Ok(Self {
            dimension,
            sub_dimension,
            codebooks,
        })
    }

    /// Check a decoded quantizer against the index it belongs to
    pub(crate) fn validate(&self, dimension: usize) -> Result<(), IndexError> {
        let sub_spaces = self.codebooks.len();
        if self.dimension != dimension
            || sub_spaces == 0
            || self.sub_dimension == 0
            || self.sub_dimension * sub_spaces != dimension
        {
            return Err(IndexError::InvalidParameters(format!(
                "quantizer with {} sub-spaces of {} does not fit dimension {}",
                sub_spaces, self.sub_dimension, dimension
            )));
        }
        for (sub, codebook) in self.codebooks.iter().enumerate() {
            let centroids = codebook.len() / self.sub_dimension;
            if codebook.len() % self.sub_dimension != 0 || centroids == 0 || centroids > MAX_CENTROIDS
            {
                return Err(IndexError::InvalidParameters(format!(
                    "codebook {} holds {} values",
                    sub,
                    codebook.len()
                )));
            }
        }
        Ok(())
    }

    /// Whether every code in `codes` names a centroid of its sub-space
    pub(crate) fn codes_in_range(&self, codes: &[u8]) -> bool {
        codes.chunks(self.code_size().max(1)).all(|code| {
            code.iter()
                .enumerate()
                .all(|(sub, &c)| (c as usize) < self.centroid_count(sub))
        })
    }

    pub fn code_size(&self) -> usize {
        self.codebooks.len()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn centroid(&self, sub: usize, code: u8) -> &[f32] {
        let start = code as usize * self.sub_dimension;
        &self.codebooks[sub][start..start + self.sub_dimension]
    }

    fn centroid_count(&self, sub: usize) -> usize {
        self.codebooks[sub].len() / self.sub_dimension
    }

    pub fn encode(&self, vector: &[f32]) -> Vec<u8> {
        (0..self.codebooks.len())
            .map(|sub| {
                let part = &vector[sub * self.sub_dimension..(sub + 1) * self.sub_dimension];
                let mut best = 0usize;
                let mut best_distance = f32::INFINITY;
                for c in 0..self.centroid_count(sub) {
                    let distance = kmeans::squared_l2(self.centroid(sub, c as u8), part);
                    if distance < best_distance {
                        best = c;
                        best_distance = distance;
                    }
                }
                best as u8
            })
            .collect()
    }

    pub fn decode(&self, codes: &[u8]) -> Vec<f32> {
        codes
            .iter()
            .enumerate()
            .flat_map(|(sub, &code)| self.centroid(sub, code).iter().copied())
            .collect()
    }

    /// Inner products of each query sub-vector with every centroid of its sub-space
    pub fn inner_product_table(&self, query: &[f32]) -> Vec<Vec<f32>> {
        (0..self.codebooks.len())
            .map(|sub| {
                let part = &query[sub * self.sub_dimension..(sub + 1) * self.sub_dimension];
                (0..self.centroid_count(sub))
                    .map(|c| super::dot(self.centroid(sub, c as u8), part))
                    .collect()
            })
            .collect()
    }

    /// Approximate `<query, decode(codes)>` from a precomputed table
    pub fn score(table: &[Vec<f32>], codes: &[u8]) -> f32 {
        codes
            .iter()
            .zip(table)
            .map(|(&code, row)| row[code as usize])
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::test_support::unit_vectors;
    use rand::SeedableRng;

    #[test]
    fn test_small_training_set_is_lossless() {
        let points = unit_vectors(10, 8, 4);
        let slices: Vec<&[f32]> = points.iter().map(Vec::as_slice).collect();
        let mut rng = StdRng::seed_from_u64(11);
        let pq = ProductQuantizer::train(&slices, 8, 4, 10, &mut rng).unwrap();

        assert_eq!(pq.code_size(), 4);
        for p in &points {
            let decoded = pq.decode(&pq.encode(p));
            assert!(kmeans::squared_l2(&decoded, p) < 1e-9);
        }
    }

    #[test]
    fn test_table_score_matches_decoded_dot() {
        let points = unit_vectors(300, 16, 2);
        let slices: Vec<&[f32]> = points.iter().map(Vec::as_slice).collect();
        let mut rng = StdRng::seed_from_u64(5);
        let pq = ProductQuantizer::train(&slices, 16, 4, 5, &mut rng).unwrap();

        let query = &points[17];
        let table = pq.inner_product_table(query);
        let codes = pq.encode(&points[42]);
        let approx = ProductQuantizer::score(&table, &codes);
        let exact = crate::index::dot(query, &pq.decode(&codes));
        assert!((approx - exact).abs() < 1e-5);
    }

    #[test]
    fn test_sub_spaces_must_divide_dimension() {
        let points = unit_vectors(4, 10, 1);
        let slices: Vec<&[f32]> = points.iter().map(Vec::as_slice).collect();
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            ProductQuantizer::train(&slices, 10, 3, 5, &mut rng),
            Err(IndexError::InvalidParameters(_))
        ));
    }
}
