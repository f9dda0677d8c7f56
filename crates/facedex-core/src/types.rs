use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size in bytes of one serialized embedding element.
const F64_BYTES: usize = std::mem::size_of::<f64>();

#[derive(Error, Debug, PartialEq)]
pub enum EmbeddingError {
    #[error("embedding is empty")]
    Empty,
    #[error("embedding blob of {0} bytes is not a whole number of f64 values")]
    TruncatedBlob(usize),
    #[error("embedding dimensions differ: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
}

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional for the bundled ArcFace model).
///
/// Stored on disk as raw little-endian `f64` bytes, one value after another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f64>,
}

impl Embedding {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    /// Number of dimensions.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Serialize to raw little-endian `f64` bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.values.len() * F64_BYTES);
        for v in &self.values {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    /// Decode raw little-endian `f64` bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EmbeddingError> {
        if bytes.is_empty() {
            return Err(EmbeddingError::Empty);
        }
        if bytes.len() % F64_BYTES != 0 {
            return Err(EmbeddingError::TruncatedBlob(bytes.len()));
        }

        let values = bytes
            .chunks_exact(F64_BYTES)
            .map(|chunk| {
                let mut buf = [0u8; F64_BYTES];
                buf.copy_from_slice(chunk);
                f64::from_le_bytes(buf)
            })
            .collect();

        Ok(Self { values })
    }

    /// Euclidean distance to another embedding of the same dimensionality.
    pub fn distance(&self, other: &Embedding) -> Result<f64, EmbeddingError> {
        if self.values.len() != other.values.len() {
            return Err(EmbeddingError::DimensionMismatch {
                left: self.values.len(),
                right: other.values.len(),
            });
        }

        Ok(self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt())
    }
}
