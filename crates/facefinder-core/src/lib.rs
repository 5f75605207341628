//! facefinder-core — Find a known person in a photo with a cloud Face API.
//!
//! Registers a reference person in a person group, trains the group, then
//! detects and identifies the faces of a target photo. The Face API and the
//! user directory are reached through the [`FaceService`] and
//! [`DirectoryService`] traits; HTTP implementations live in
//! `facefinder-cloud`.

pub mod matching;
pub mod photo;
pub mod service;
pub mod types;
pub mod workflow;

pub use matching::find_person;
pub use photo::{Photo, PhotoError};
pub use service::{person_from_directory, DirectoryService, FaceService, ServiceError};
pub use types::{
    Candidate, CreatedPerson, DetectedFace, DirectoryUser, FaceMatch, FaceRectangle,
    IdentifyResult, PersistedFace, Person, TrainingState, TrainingStatus,
};
pub use workflow::{IdentifyWorkflow, Step, WorkflowConfig, WorkflowError, WorkflowState};
