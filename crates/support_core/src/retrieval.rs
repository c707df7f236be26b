//! Cosine similarity scoring over embedding vectors.

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "cosine over vectors of different length");
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

/// Similarity of `query` to each candidate, in candidate order.
pub fn score<V: AsRef<[f32]>>(query: &[f32], candidates: &[V]) -> Vec<f32> {
    candidates
        .iter()
        .map(|c| cosine_similarity(query, c.as_ref()))
        .collect()
}

/// Argmax over `candidates`, reporting the matching id from `ids`.
///
/// Ties go to the earliest candidate. Returns `None` when there are no
/// candidates.
pub fn best<V: AsRef<[f32]>>(
    query: &[f32],
    candidates: &[V],
    ids: &[usize],
) -> Option<(usize, f32)> {
    assert_eq!(candidates.len(), ids.len(), "one id per candidate");

    let mut winner: Option<(usize, f32)> = None;
    for (id, s) in ids.iter().zip(score(query, candidates)) {
        if s.is_nan() {
            continue;
        }
        match winner {
            Some((_, top)) if s <= top => {}
            _ => winner = Some((*id, s)),
        }
    }
    winner
}
