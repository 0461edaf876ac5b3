//! Vector helpers for memory search.

/// Cosine similarity. Returns 0.0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Scale to unit length. Near-zero vectors are returned unchanged.
pub fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-8 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

/// Element-wise mean. None if empty or dimensions disagree.
pub fn mean(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    let dim = first.len();
    if vectors.iter().any(|v| v.len() != dim) {
        return None;
    }
    let mut acc = vec![0.0f32; dim];
    for v in vectors {
        for (a, x) in acc.iter_mut().zip(v) {
            *a += x;
        }
    }
    let n = vectors.len() as f32;
    acc.iter_mut().for_each(|a| *a /= n);
    Some(acc)
}

/// Weighted blend of a query and a context vector, normalised.
///
/// Weights are rescaled to sum to one. Falls back to the query alone when
/// dimensions differ.
pub fn weighted_combine(query: &[f32], context: &[f32], query_weight: f32, context_weight: f32) -> Vec<f32> {
    let total = query_weight + context_weight;
    if query.len() != context.len() || total <= 0.0 {
        return normalize(query.to_vec());
    }
    let (qw, cw) = (query_weight / total, context_weight / total);
    let combined = query
        .iter()
        .zip(context)
        .map(|(q, c)| q * qw + c * cw)
        .collect();
    normalize(combined)
}
