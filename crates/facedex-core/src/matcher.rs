//! Linear distance matching of a query embedding against known embeddings.

use crate::types::{Embedding, EmbeddingError};

/// Distance from the query to each known embedding, in input order.
pub fn face_distance(known: &[Embedding], query: &Embedding) -> Result<Vec<f64>, EmbeddingError> {
    known.iter().map(|k| k.distance(query)).collect()
}

/// For each known embedding, whether it lies within `tolerance` of the query.
pub fn compare_faces(
    known: &[Embedding],
    query: &Embedding,
    tolerance: f64,
) -> Result<Vec<bool>, EmbeddingError> {
    Ok(face_distance(known, query)?
        .into_iter()
        .map(|d| d <= tolerance)
        .collect())
}

/// An enrolled embedding tagged with the id of the person it belongs to.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub owner_id: i64,
    pub embedding: Embedding,
}

/// Result of matching a query embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Distance to the closest gallery entry, `None` for an empty gallery.
    pub distance: Option<f64>,
    /// Owner of the closest entry when `matched`.
    pub owner_id: Option<i64>,
}

impl MatchResult {
    fn no_match(distance: Option<f64>) -> Self {
        Self {
            matched: false,
            distance,
            owner_id: None,
        }
    }
}

/// Strategy for comparing a query embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn best_match(
        &self,
        query: &Embedding,
        gallery: &[GalleryEntry],
        tolerance: f64,
    ) -> Result<MatchResult, EmbeddingError>;
}

/// Euclidean nearest-neighbour matcher.
///
/// Visits every gallery entry and keeps the closest; the first entry wins ties.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn best_match(
        &self,
        query: &Embedding,
        gallery: &[GalleryEntry],
        tolerance: f64,
    ) -> Result<MatchResult, EmbeddingError> {
        let mut best: Option<(f64, i64)> = None;

        for entry in gallery {
            let d = entry.embedding.distance(query)?;
            if best.map_or(true, |(best_d, _)| d < best_d) {
                best = Some((d, entry.owner_id));
            }
        }

        Ok(match best {
            Some((d, owner)) if d <= tolerance => MatchResult {
                matched: true,
                distance: Some(d),
                owner_id: Some(owner),
            },
            Some((d, _)) => MatchResult::no_match(Some(d)),
            None => MatchResult::no_match(None),
        })
    }
}
