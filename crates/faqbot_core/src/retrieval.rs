pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (dot, na, nb) = a
        .iter()
        .zip(b.iter())
        .fold((0.0f32, 0.0f32, 0.0f32), |(d, aa, bb), (x, y)| {
            (d + (x * y), aa + (x * x), bb + (y * y))
        });

    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        (dot / (na.sqrt() * nb.sqrt())).clamp(-1.0, 1.0)
    }
}

/// Nearest-neighbor lookup over the corpus embeddings.
pub trait VectorIndex: Send + Sync {
    /// Position and cosine score of the closest stored vector. Ties go to
    /// the lowest position.
    fn best_match(&self, query: &[f32]) -> Option<(usize, f32)>;

    fn len(&self) -> usize;

    fn dimension(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exhaustive scan. The corpus is FAQ-sized, so every query is scored
/// against every stored vector.
#[derive(Debug, Clone, Default)]
pub struct LinearIndex {
    vectors: Vec<Vec<f32>>,
    dim: usize,
}

impl LinearIndex {
    /// Returns `None` if the vectors do not all share one dimension.
    pub fn new(vectors: Vec<Vec<f32>>) -> Option<Self> {
        let dim = vectors.first().map_or(0, Vec::len);
        if vectors.iter().any(|v| v.len() != dim) {
            return None;
        }
        Some(Self { vectors, dim })
    }
}

impl VectorIndex for LinearIndex {
    fn best_match(&self, query: &[f32]) -> Option<(usize, f32)> {
        let mut best: Option<(usize, f32)> = None;
        for (idx, v) in self.vectors.iter().enumerate() {
            let score = cosine_similarity(query, v);
            debug_assert!(!score.is_nan(), "NaN similarity at position {idx}");
            match best {
                Some((_, top)) if score <= top => {}
                _ => best = Some((idx, score)),
            }
        }
        best
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}
