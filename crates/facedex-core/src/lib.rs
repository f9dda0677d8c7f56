//! facedex-core — Face embeddings and matching.
//!
//! SCRFD finds faces, ArcFace turns each aligned face into an embedding,
//! and embeddings are compared by Euclidean distance against a tolerance.

pub mod alignment;
pub mod detector;
pub mod encoder;
pub mod matcher;
pub mod recognizer;
pub mod types;

pub use encoder::{decode_image, load_image, EncoderError, FaceEncoder, OnnxFaceEncoder};
pub use matcher::{compare_faces, face_distance, EuclideanMatcher, GalleryEntry, MatchResult, Matcher};
pub use types::{BoundingBox, Embedding, EmbeddingError};
