//! Image → embeddings boundary.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::Embedding;
use image::GrayImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the SCRFD detection model inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// File name of the ArcFace recognition model inside the model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("failed to read image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Produces one embedding per face found in an image.
pub trait FaceEncoder {
    /// Embeddings for every detected face, most confident first.
    /// An image without faces yields an empty vector.
    fn encode(&mut self, image: &GrayImage) -> Result<Vec<Embedding>, EncoderError>;
}

/// Decode an image file and convert it to 8-bit grayscale.
pub fn load_image(path: &Path) -> Result<GrayImage, EncoderError> {
    let decoded = image::open(path).map_err(|source| EncoderError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(decoded.into_luma8())
}

/// Decode in-memory image bytes (format sniffed from content) to 8-bit grayscale.
pub fn decode_image(bytes: &[u8]) -> Result<GrayImage, image::ImageError> {
    Ok(image::load_from_memory(bytes)?.into_luma8())
}

/// SCRFD detection followed by ArcFace embedding of each face.
pub struct OnnxFaceEncoder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceEncoder {
    pub fn load(detector_path: &Path, recognizer_path: &Path) -> Result<Self, EncoderError> {
        let detector = FaceDetector::load(detector_path)?;
        let recognizer = FaceRecognizer::load(recognizer_path)?;
        tracing::info!(
            detector = %detector_path.display(),
            recognizer = %recognizer_path.display(),
            "face models loaded"
        );
        Ok(Self {
            detector,
            recognizer,
        })
    }

    /// Load both models from their standard file names in `model_dir`.
    pub fn from_model_dir(model_dir: &Path) -> Result<Self, EncoderError> {
        Self::load(
            &model_dir.join(DETECTOR_MODEL_FILE),
            &model_dir.join(RECOGNIZER_MODEL_FILE),
        )
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn encode(&mut self, image: &GrayImage) -> Result<Vec<Embedding>, EncoderError> {
        let faces = self.detector.detect(image)?;
        let mut embeddings = Vec::with_capacity(faces.len());
        for face in &faces {
            // Faces decoded without landmarks cannot be aligned; skip them.
            if face.landmarks.is_none() {
                tracing::debug!(confidence = face.confidence, "skipping face without landmarks");
                continue;
            }
            embeddings.push(self.recognizer.extract(image, face)?);
        }
        Ok(embeddings)
    }
}
