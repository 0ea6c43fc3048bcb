//! Vector similarity index (spec §4.9, §4.10 supplemented from
//! `original_source/proto_db/vectors.py` and `vector_index.py`): a small
//! immutable `Vector` value type, a `VectorIndex` trait as the pluggable
//! seam (spec §1: "only the abstract `VectorIndex` contract is in
//! scope"), and two concrete backends, `Exact` (mandatory brute force)
//! and `IvfFlat` (described in spec §4.9).

mod exact;
mod ivf_flat;

pub use exact::ExactIndex;
pub use ivf_flat::IvfFlatIndex;

use crate::atom::AtomPointer;
use crate::error::{Error, Result};

/// Distance/similarity metric a `VectorIndex` scores by (spec §4.9).
/// Cosine similarity and L2 are the two named in spec; higher score is
/// always "better" for ranking purposes (L2 reports negative distance).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Cosine,
    L2,
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::L2 => "l2",
        }
    }

    pub fn parse(s: &str) -> Result<Metric> {
        match s {
            "cosine" => Ok(Metric::Cosine),
            "l2" => Ok(Metric::L2),
            other => Err(Error::validation(format!("unsupported vector metric: {other}"))),
        }
    }
}

impl Default for Metric {
    fn default() -> Self {
        Metric::Cosine
    }
}

fn validate_finite(values: &[f64]) -> Result<()> {
    if values.iter().any(|v| v.is_nan() || v.is_infinite()) {
        return Err(Error::validation("vector contains invalid value (NaN/Inf)"));
    }
    Ok(())
}

fn norm2(values: &[f64]) -> f64 {
    values.iter().map(|v| v * v).sum::<f64>().sqrt()
}

/// Immutable fixed-dimension float vector (spec §4.9, grounded in
/// `original_source/proto_db/vectors.py`'s `Vector` dataclass).
#[derive(Debug, Clone, PartialEq)]
pub struct Vector {
    data: Vec<f64>,
    normalized: bool,
}

impl Vector {
    pub fn from_values(values: Vec<f64>, normalize: bool) -> Result<Vector> {
        validate_finite(&values)?;
        if values.is_empty() {
            return Err(Error::validation("vector must have positive dimension"));
        }
        if normalize {
            let n = norm2(&values);
            if n == 0.0 {
                return Err(Error::validation("cannot normalize a zero vector"));
            }
            let data = values.iter().map(|v| v / n).collect();
            Ok(Vector { data, normalized: true })
        } else {
            Ok(Vector { data: values, normalized: false })
        }
    }

    pub fn dim(&self) -> usize {
        self.data.len()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn is_normalized(&self) -> bool {
        self.normalized
    }

    pub fn similarity(&self, other: &Vector, metric: Metric) -> Result<f64> {
        if self.dim() != other.dim() {
            return Err(Error::validation("vectors have different dimensions"));
        }
        Ok(match metric {
            Metric::Cosine => cosine_similarity(&self.data, &other.data),
            Metric::L2 => -l2_distance(&self.data, &other.data),
        })
    }

    /// `<4-byte dim><1-byte normalized><8-byte-per-component f64>`
    /// (spec §8 round-trip property), matching
    /// `original_source/proto_db/vectors.py::Vector.to_bytes`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(5 + 8 * self.data.len());
        out.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        out.push(if self.normalized { 1 } else { 0 });
        for v in &self.data {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Vector> {
        if bytes.len() < 5 {
            return Err(Error::corruption("invalid vector bytes"));
        }
        let dim = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let normalized = bytes[4] != 0;
        let expected = 5 + 8 * dim;
        if bytes.len() != expected {
            return Err(Error::corruption("invalid vector bytes length"));
        }
        let mut data = Vec::with_capacity(dim);
        for chunk in bytes[5..].chunks_exact(8) {
            data.push(f64::from_le_bytes(chunk.try_into().unwrap()));
        }
        Ok(Vector { data, normalized })
    }
}

pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = norm2(a);
    let nb = norm2(b);
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

pub fn l2_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f64>().sqrt()
}

/// A scored hit: the id it was built/added with, and its similarity
/// score under the index's metric (spec §4.9: "results yield `{id,
/// score}` tuples").
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredId {
    pub id: i64,
    pub score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct VectorIndexStats {
    pub len: usize,
    pub tombstones: usize,
    pub dim: usize,
}

/// Pluggable vector-index seam (spec §4.9). `ExactIndex` is the mandatory
/// brute-force backend; `IvfFlatIndex` is the approximate backend spec
/// describes; a third-party HNSW backend is a documented extension point
/// that is never implemented here (spec §1 Non-goal).
pub trait VectorIndex {
    fn build(&mut self, vectors: Vec<Vector>, ids: Vec<i64>) -> Result<()>;
    fn add(&mut self, id: i64, vector: Vector) -> Result<()>;
    /// Soft-delete: tombstones `id` rather than compacting storage
    /// immediately (spec §4.9).
    fn remove(&mut self, id: i64) -> Result<()>;
    fn search(&self, query: &Vector, k: usize) -> Result<Vec<ScoredId>>;
    fn range_search(&self, query: &Vector, threshold: f64) -> Result<Vec<ScoredId>>;
    fn stats(&self) -> VectorIndexStats;
    fn metric(&self) -> Metric;
}

/// The persisted metadata atom for a vector index (spec §3.1
/// `VectorIndex (abstract)`): the large backend-specific state (vectors,
/// centroids, pages) lives in its own file under `storage_path` via the
/// backend's own `save`/`load`, not inline in the object graph — mirrors
/// how `BytesAtom` keeps large blobs out of the generic atom payload.
#[derive(Debug, Clone)]
pub struct VectorIndexRecord {
    pub pointer: Option<AtomPointer>,
    pub name: String,
    pub metric: String,
    pub storage_path: Option<String>,
}

impl VectorIndexRecord {
    pub fn metric_name(&self) -> &str {
        &self.metric
    }
}
