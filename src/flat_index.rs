use std::cmp::Ordering;
use std::collections::BinaryHeap;

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Scales `v` to unit length in place. Zero vectors are left alone.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub score: f32,
}

/// Min-heap entry: the weakest candidate sits on top so it can be evicted.
#[derive(Debug, PartialEq)]
struct Candidate(Neighbor);

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .0
            .score
            .total_cmp(&self.0.score)
            .then_with(|| self.0.position.cmp(&other.0.position))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Exhaustive inner-product index over L2-normalized vectors, so scores are
/// cosine similarities.
#[derive(Debug, Clone, Default)]
pub struct FlatIndex {
    dim: usize,
    vectors: Vec<Vec<f32>>,
}

impl FlatIndex {
    /// Copies and normalizes `vectors`. All vectors must share one dimension.
    pub fn build(vectors: &[Vec<f32>]) -> FlatIndex {
        let dim = vectors.first().map(|v| v.len()).unwrap_or(0);
        let vectors = vectors
            .iter()
            .map(|v| {
                let mut v = v.clone();
                l2_normalize(&mut v);
                v
            })
            .collect();
        FlatIndex { dim, vectors }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// The `k` best matches for `query` (normalized here), best first. A
    /// query of the wrong width matches nothing.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        if k == 0 || self.vectors.is_empty() || query.len() != self.dim {
            return Vec::new();
        }
        let mut query = query.to_vec();
        l2_normalize(&mut query);

        let mut heap = BinaryHeap::with_capacity(k + 1);
        for (position, vector) in self.vectors.iter().enumerate() {
            heap.push(Candidate(Neighbor {
                position,
                score: dot(&query, vector),
            }));
            if heap.len() > k {
                heap.pop();
            }
        }
        // ascending by the min-heap order is best first
        heap.into_sorted_vec().into_iter().map(|c| c.0).collect()
    }
}
