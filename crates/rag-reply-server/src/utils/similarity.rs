/// Cosine similarity between two embedding vectors, in [-1.0, 1.0].
///
/// Returns `None` when the dimensions differ or a vector is empty; such an
/// entry cannot be ranked against the query at all.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return Some(0.0);
    }

    // Clamp to [-1, 1] to absorb floating point drift
    Some((dot_product / (magnitude_a * magnitude_b)).clamp(-1.0, 1.0))
}

/// Convert a pgvector cosine distance (`<=>`, 0..2) into a [0, 1] score.
pub fn score_from_distance(distance: f64) -> f32 {
    (1.0 - distance).clamp(0.0, 1.0) as f32
}
