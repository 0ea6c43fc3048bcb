//! Mandatory brute-force `VectorIndex` backend (spec §4.9, §1: "an exact
//! brute-force implementation is mandatory"), grounded in
//! `original_source/proto_db/vector_index.py::ExactVectorIndex`.

use rayon::prelude::*;

use crate::error::{Error, Result};

use super::{Metric, ScoredId, Vector, VectorIndex, VectorIndexStats};

/// Below this many live entries, scoring sequentially avoids the thread
/// pool's dispatch overhead; above it, the batch path (spec §4.9: "batch
/// search path when a numeric array facility is available") pays off.
const PARALLEL_THRESHOLD: usize = 2048;

struct Entry {
    id: i64,
    vector: Vector,
    tombstoned: bool,
}

/// Scores every live (non-tombstoned) vector against the query and keeps
/// the top-k (spec §4.9: "brute-force over stored vectors, excluding
/// tombstones").
pub struct ExactIndex {
    metric: Metric,
    entries: Vec<Entry>,
}

impl ExactIndex {
    pub fn new(metric: Metric) -> Self {
        ExactIndex { metric, entries: Vec::new() }
    }

    fn score_all(&self, query: &Vector) -> Result<Vec<ScoredId>> {
        let live: Vec<&Entry> = self.entries.iter().filter(|e| !e.tombstoned).collect();
        if live.len() >= PARALLEL_THRESHOLD {
            live.into_par_iter()
                .map(|e| Ok(ScoredId { id: e.id, score: e.vector.similarity(query, self.metric)? }))
                .collect()
        } else {
            live.into_iter()
                .map(|e| Ok(ScoredId { id: e.id, score: e.vector.similarity(query, self.metric)? }))
                .collect()
        }
    }
}

impl VectorIndex for ExactIndex {
    fn build(&mut self, vectors: Vec<Vector>, ids: Vec<i64>) -> Result<()> {
        if vectors.len() != ids.len() {
            return Err(Error::validation("vectors and ids must have the same length"));
        }
        self.entries = vectors
            .into_iter()
            .zip(ids)
            .map(|(vector, id)| Entry { id, vector, tombstoned: false })
            .collect();
        Ok(())
    }

    fn add(&mut self, id: i64, vector: Vector) -> Result<()> {
        self.entries.push(Entry { id, vector, tombstoned: false });
        Ok(())
    }

    fn remove(&mut self, id: i64) -> Result<()> {
        for e in self.entries.iter_mut() {
            if e.id == id {
                e.tombstoned = true;
            }
        }
        Ok(())
    }

    fn search(&self, query: &Vector, k: usize) -> Result<Vec<ScoredId>> {
        let mut scored = self.score_all(query)?;
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    fn range_search(&self, query: &Vector, threshold: f64) -> Result<Vec<ScoredId>> {
        let mut scored: Vec<_> = self.score_all(query)?.into_iter().filter(|s| s.score >= threshold).collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored)
    }

    fn stats(&self) -> VectorIndexStats {
        VectorIndexStats {
            len: self.entries.iter().filter(|e| !e.tombstoned).count(),
            tombstones: self.entries.iter().filter(|e| e.tombstoned).count(),
            dim: self.entries.first().map(|e| e.vector.dim()).unwrap_or(0),
        }
    }

    fn metric(&self) -> Metric {
        self.metric
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(data: Vec<f64>) -> Vector {
        Vector::from_values(data, true).unwrap()
    }

    #[test]
    fn near_query_returns_only_the_close_vector() {
        let mut index = ExactIndex::new(Metric::Cosine);
        index.build(vec![v(vec![1.0, 0.0]), v(vec![0.0, 1.0]), v(vec![0.7, 0.7])], vec![0, 1, 2]).unwrap();
        let hits = index.range_search(&v(vec![1.0, 0.0]), 0.8).unwrap();
        assert_eq!(hits.iter().map(|h| h.id).collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn removed_vector_is_excluded_from_search() {
        let mut index = ExactIndex::new(Metric::Cosine);
        index.build(vec![v(vec![1.0, 0.0]), v(vec![0.0, 1.0])], vec![0, 1]).unwrap();
        index.remove(0).unwrap();
        let hits = index.search(&v(vec![1.0, 0.0]), 2).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 1);
    }

    #[test]
    fn search_k_limits_result_count() {
        let mut index = ExactIndex::new(Metric::Cosine);
        index.build(vec![v(vec![1.0, 0.0]), v(vec![0.9, 0.1]), v(vec![0.0, 1.0])], vec![0, 1, 2]).unwrap();
        let hits = index.search(&v(vec![1.0, 0.0]), 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 0);
    }
}
