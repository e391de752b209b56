//! IVF-flat similarity index over reference embeddings plus the retrieval blend.

use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
    sync::Arc,
};

use ndarray::{Array2, ArrayView1};
use rand::{rngs::StdRng, seq::index::sample, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, VcError};

/// Neighbours averaged per query vector.
pub const RETRIEVAL_K: usize = 8;

const KMEANS_ITERS: usize = 20;
const SCORE_EPS: f32 = 1e-12;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SimilarityIndex {
    pub dim: usize,
    pub min_lists: usize,
    pub centroids: Vec<Vec<f32>>,
    /// Vector ids assigned to each centroid.
    pub lists: Vec<Vec<usize>>,
    pub vectors: Vec<Vec<f32>>,
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn nearest_centroid(centroids: &[Vec<f32>], v: &[f32]) -> usize {
    let mut best = (0usize, f32::MAX);
    for (i, c) in centroids.iter().enumerate() {
        let d = squared_l2(c, v);
        if d < best.1 {
            best = (i, d);
        }
    }
    best.0
}

impl SimilarityIndex {
    /// Clusters `vectors` (rows) into `nlist` inverted lists with seeded k-means.
    pub fn build(vectors: &Array2<f32>, nlist: usize, seed: u64) -> Result<Self> {
        let (n, dim) = vectors.dim();
        if n == 0 || dim == 0 {
            return Err(VcError::InvalidRequest(
                "cannot build an index from zero vectors".into(),
            ));
        }
        let rows: Vec<Vec<f32>> = vectors.outer_iter().map(|r| r.to_vec()).collect();
        let nlist = nlist.clamp(1, n);

        let mut rng = StdRng::seed_from_u64(seed);
        let mut centroids: Vec<Vec<f32>> = sample(&mut rng, n, nlist)
            .into_iter()
            .map(|i| rows[i].clone())
            .collect();

        let mut assign = vec![0usize; n];
        for _ in 0..KMEANS_ITERS {
            let mut changed = false;
            for (i, row) in rows.iter().enumerate() {
                let c = nearest_centroid(&centroids, row);
                if c != assign[i] {
                    assign[i] = c;
                    changed = true;
                }
            }
            let mut sums = vec![vec![0.0f32; dim]; nlist];
            let mut counts = vec![0usize; nlist];
            for (row, &c) in rows.iter().zip(&assign) {
                counts[c] += 1;
                for (s, v) in sums[c].iter_mut().zip(row) {
                    *s += v;
                }
            }
            for (c, (sum, count)) in sums.into_iter().zip(counts).enumerate() {
                // Empty clusters keep their previous centroid.
                if count > 0 {
                    centroids[c] = sum.into_iter().map(|s| s / count as f32).collect();
                }
            }
            if !changed {
                break;
            }
        }

        let mut lists = vec![Vec::new(); nlist];
        for (i, row) in rows.iter().enumerate() {
            lists[nearest_centroid(&centroids, row)].push(i);
        }
        debug!("built index: {} vectors, dim {}, {} lists", n, dim, nlist);

        Ok(Self {
            dim,
            min_lists: 1,
            centroids,
            lists,
            vectors: rows,
        })
    }

    pub fn with_min_lists(mut self, min_lists: usize) -> Self {
        self.min_lists = min_lists.max(1);
        self
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let index: SimilarityIndex = serde_json::from_reader(reader)?;
        index.check()?;
        Ok(index)
    }

    fn check(&self) -> Result<()> {
        let bad = self.vectors.iter().any(|v| v.len() != self.dim)
            || self.centroids.iter().any(|c| c.len() != self.dim)
            || self.lists.len() != self.centroids.len()
            || self.lists.iter().flatten().any(|&id| id >= self.vectors.len());
        if bad {
            return Err(anyhow::anyhow!("index structure is inconsistent").into());
        }
        Ok(())
    }

    /// Up to `k` nearest stored vectors as `(id, squared_l2)`, closest first.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        if query.len() != self.dim || self.vectors.is_empty() || k == 0 {
            return Vec::new();
        }
        let mut order: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, squared_l2(c, query)))
            .collect();
        order.sort_by(|a, b| a.1.total_cmp(&b.1));

        // Visit at least `min_lists` lists, then keep going in centroid order
        // until `k` candidates are found or every list has been seen.
        let mut hits: Vec<(usize, f32)> = Vec::new();
        for (visited, &(list, _)) in order.iter().enumerate() {
            if visited >= self.min_lists.max(1) && hits.len() >= k {
                break;
            }
            hits.extend(
                self.lists[list]
                    .iter()
                    .map(|&id| (id, squared_l2(&self.vectors[id], query))),
            );
        }
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        hits.truncate(k);
        hits
    }

    /// Inverse-distance-squared weighted mean of the neighbours of `query`.
    fn retrieve(&self, query: ArrayView1<'_, f32>, out: &mut [f32]) -> bool {
        let q: Vec<f32> = query.to_vec();
        let hits = self.search(&q, RETRIEVAL_K);
        if hits.is_empty() {
            return false;
        }
        let weights: Vec<f32> = hits
            .iter()
            .map(|&(_, score)| {
                let inv = 1.0 / score.max(SCORE_EPS);
                inv * inv
            })
            .collect();
        let total: f32 = weights.iter().sum();
        out.fill(0.0);
        for (&(id, _), w) in hits.iter().zip(&weights) {
            let w = w / total;
            for (o, v) in out.iter_mut().zip(&self.vectors[id]) {
                *o += w * v;
            }
        }
        true
    }
}

/// `(1 - rate) * feats + rate * retrieved`, row by row. Rate 0 returns the
/// input untouched; rate 1 the retrieved vectors alone.
pub fn retrieve_and_blend(feats: &Array2<f32>, index: &SimilarityIndex, rate: f32) -> Array2<f32> {
    if rate <= 0.0 || index.is_empty() {
        return feats.clone();
    }
    if feats.ncols() != index.dim {
        warn!(
            "index dim {} does not match embedding width {}; skipping retrieval",
            index.dim,
            feats.ncols()
        );
        return feats.clone();
    }
    let rate = rate.min(1.0);
    let mut out = feats.clone();
    let mut retrieved = vec![0.0f32; index.dim];
    for (row_in, mut row_out) in feats.outer_iter().zip(out.outer_iter_mut()) {
        if !index.retrieve(row_in, &mut retrieved) {
            continue;
        }
        if rate >= 1.0 {
            for (o, r) in row_out.iter_mut().zip(&retrieved) {
                *o = *r;
            }
        } else {
            for ((o, x), r) in row_out.iter_mut().zip(row_in.iter()).zip(&retrieved) {
                *o = rate * r + (1.0 - rate) * x;
            }
        }
    }
    out
}

/// Normalises a user-typed index path: trims blanks and quotes and swaps a
/// `trained` index for its `added` sibling. Empty input means "no index".
pub fn resolve_index_path(raw: &str) -> Option<PathBuf> {
    let trimmed = raw.trim().trim_matches(|c| c == '"' || c == '\'').trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.contains("trained") {
        let rewritten = trimmed.replace("trained", "added");
        info!("index path {} rewritten to {}", trimmed, rewritten);
        return Some(PathBuf::from(rewritten));
    }
    Some(PathBuf::from(trimmed))
}

/// The most recently used index, keyed by canonical path. Loading a
/// different path drops the previous one.
#[derive(Default)]
pub struct IndexCache {
    current: Option<(PathBuf, Arc<SimilarityIndex>)>,
}

impl IndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The index at `path`, or `None` (with a warning) when it is missing,
    /// unreadable or empty. Failures are not cached.
    pub fn get_or_load(&mut self, path: &Path) -> Option<Arc<SimilarityIndex>> {
        if !path.is_file() {
            warn!("index {} not found; skipping retrieval", path.display());
            return None;
        }
        let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if let Some((cached, index)) = &self.current {
            if *cached == key {
                return Some(Arc::clone(index));
            }
        }
        match SimilarityIndex::load(&key) {
            Ok(index) if index.is_empty() => {
                warn!("index {} is empty; skipping retrieval", path.display());
                None
            }
            Ok(index) => {
                info!(
                    "loaded index {} ({} vectors, dim {})",
                    path.display(),
                    index.len(),
                    index.dim
                );
                if let Some((old, _)) = self.current.take() {
                    debug!("evicting index {}", old.display());
                }
                let index = Arc::new(index);
                self.current = Some((key, Arc::clone(&index)));
                Some(index)
            }
            Err(e) => {
                warn!("index {} unreadable ({}); skipping retrieval", path.display(), e);
                None
            }
        }
    }

    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|(p, _)| p.as_path())
    }

    pub fn len(&self) -> usize {
        usize::from(self.current.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_rewrites_trained_and_trims() {
        assert_eq!(
            resolve_index_path("  \"logs/trained_IVF.index\" "),
            Some(PathBuf::from("logs/added_IVF.index"))
        );
        assert_eq!(resolve_index_path("   "), None);
        assert_eq!(
            resolve_index_path("voice.index"),
            Some(PathBuf::from("voice.index"))
        );
    }
}
