//! JSON responses and human-readable command outcomes.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use facedex_store::PersonSummary;
use serde::Serialize;
use std::fmt;

pub const NO_FACE_DETECTED: &str = "No face detected in the input image.";
pub const NO_MATCH_FOUND: &str = "No match found in the database.";

/// Embed image bytes as a `data:` URL, sniffing the MIME type from content.
///
/// Unrecognized content is labelled `image/jpeg`.
pub fn data_url(bytes: &[u8]) -> String {
    let mime = image::guess_format(bytes)
        .map(|f| f.to_mime_type())
        .unwrap_or("image/jpeg");
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

/// Result of `search-person`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    /// Matched person's name, or a status / error message.
    #[serde(rename = "Found")]
    pub found: String,
    /// Data URL of the matched person's main image, empty otherwise.
    pub main_image: String,
}

impl SearchResponse {
    pub fn found(name: &str, main_image: &[u8]) -> Self {
        Self {
            found: name.to_string(),
            main_image: data_url(main_image),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            found: message.into(),
            main_image: String::new(),
        }
    }

    /// Report any failure in-band, including its cause chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        Self::message(format!("{err:#}"))
    }
}

/// Result of `search-name`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NameSearchResponse {
    #[serde(rename = "Found")]
    pub found: String,
    pub main_image: String,
    pub people: Vec<PersonSummary>,
}

/// Outcome of `add-person`.
#[derive(Debug, Clone, PartialEq)]
pub enum AddOutcome {
    Added { name: String, person_id: i64, images: usize },
    NoFaces,
}

impl fmt::Display for AddOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added { name, .. } => write!(f, "Added {name} to the database."),
            Self::NoFaces => write!(f, "No faces found in the images."),
        }
    }
}

/// Outcome of one image (against one person) in `update-person`.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    UnknownPerson { name: String },
    NoFace,
    Updated { name: String, person_id: i64 },
    CapReached { name: String, person_id: i64 },
    NoMatch { name: String, person_id: i64 },
}

impl fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownPerson { name } => {
                write!(f, "No person named {name} found in the database.")
            }
            Self::NoFace => write!(f, "No faces found in the image."),
            Self::Updated { name, .. } => write!(f, "Updated {name} in the database."),
            Self::CapReached { name, .. } => write!(
                f,
                "Maximum number of images for {name} reached. No more images will be added."
            ),
            Self::NoMatch { name, .. } => write!(
                f,
                "The face in the new image does not match the existing images of {name}."
            ),
        }
    }
}
