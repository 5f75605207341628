use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::photo::{Photo, PhotoError};

/// Face location in pixels, as reported by the detect endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceRectangle {
    pub top: u32,
    pub left: u32,
    pub width: u32,
    pub height: u32,
}

/// A face found in the target photo. `face_id` is valid server-side for 24h.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedFace {
    pub face_id: String,
    pub face_rectangle: FaceRectangle,
}

/// One identification candidate for a detected face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub person_id: String,
    pub confidence: f64,
}

/// Identification outcome for a single detected face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyResult {
    pub face_id: String,
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedPerson {
    pub person_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedFace {
    pub persisted_face_id: String,
}

/// Server-side training state of a person group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainingState {
    NotStarted,
    Running,
    Succeeded,
    Failed,
}

impl TrainingState {
    /// Training has not reached a terminal state yet.
    pub fn is_pending(self) -> bool {
        matches!(self, TrainingState::NotStarted | TrainingState::Running)
    }
}

impl std::fmt::Display for TrainingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TrainingState::NotStarted => "notstarted",
            TrainingState::Running => "running",
            TrainingState::Succeeded => "succeeded",
            TrainingState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingStatus {
    pub status: TrainingState,
    #[serde(default)]
    pub created_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_action_date_time: Option<DateTime<Utc>>,
    /// Failure reason; only set when `status` is `failed`.
    #[serde(default)]
    pub message: Option<String>,
}

/// A user entry from the directory service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryUser {
    pub display_name: String,
    pub user_principal_name: String,
}

/// The reference person to look for.
#[derive(Debug, Clone)]
pub struct Person {
    pub name: String,
    /// Directory principal name, when the person came from the directory.
    pub upn: Option<String>,
    pub photo: Photo,
}

impl Person {
    /// Build a reference person from a local photo.
    pub fn from_file(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self, PhotoError> {
        Ok(Self {
            name: name.into(),
            upn: None,
            photo: Photo::open(path)?,
        })
    }
}

/// A detected face that was identified as the reference person.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceMatch {
    pub face: DetectedFace,
    pub confidence: f64,
}

impl FaceMatch {
    /// Human-readable confidence and geometry summary.
    pub fn report(&self) -> String {
        let r = &self.face.face_rectangle;
        format!(
            "confidence: {}\n\
             dimensions: \n\
             \x20  top   : {}\n\
             \x20  left  : {}\n\
             \x20  width : {}\n\
             \x20  height: {}\n",
            self.confidence, r.top, r.left, r.width, r.height
        )
    }
}
