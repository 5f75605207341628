//! Seams to the external Face API and directory services.

use async_trait::async_trait;
use thiserror::Error;

use crate::photo::Photo;
use crate::types::{
    CreatedPerson, DetectedFace, DirectoryUser, IdentifyResult, PersistedFace, Person,
    TrainingStatus,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("unauthorized: check the subscription key or access token")]
    Unauthorized,
    #[error("service returned HTTP {status}{}: {message}", code_suffix(.code))]
    Service {
        status: u16,
        code: Option<String>,
        message: String,
    },
    #[error("unexpected response body: {0}")]
    Decode(String),
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref().map(|c| format!(" ({c})")).unwrap_or_default()
}

/// Face API operations used by the identify workflow.
///
/// Images are passed as encoded PNG bytes.
#[async_trait]
pub trait FaceService: Send + Sync {
    /// Create a person group. An already existing group counts as success.
    async fn create_person_group(
        &self,
        group_id: &str,
        name: &str,
        user_data: Option<&str>,
    ) -> Result<(), ServiceError>;

    async fn create_person(
        &self,
        group_id: &str,
        name: &str,
        user_data: Option<&str>,
    ) -> Result<CreatedPerson, ServiceError>;

    async fn add_person_face(
        &self,
        group_id: &str,
        person_id: &str,
        png: Vec<u8>,
    ) -> Result<PersistedFace, ServiceError>;

    /// Queue training; completion is observed through [`training_status`](Self::training_status).
    async fn train_person_group(&self, group_id: &str) -> Result<(), ServiceError>;

    async fn training_status(&self, group_id: &str) -> Result<TrainingStatus, ServiceError>;

    async fn detect_faces(&self, png: Vec<u8>) -> Result<Vec<DetectedFace>, ServiceError>;

    async fn identify(
        &self,
        face_ids: &[String],
        group_id: &str,
        max_candidates: u32,
        confidence_threshold: f64,
    ) -> Result<Vec<IdentifyResult>, ServiceError>;
}

/// User directory lookups.
#[async_trait]
pub trait DirectoryService: Send + Sync {
    async fn list_users(&self) -> Result<Vec<DirectoryUser>, ServiceError>;

    async fn get_user(&self, upn: &str) -> Result<DirectoryUser, ServiceError>;

    /// Raw bytes of the user's profile photo.
    async fn get_photo(&self, upn: &str) -> Result<Vec<u8>, ServiceError>;
}

/// Resolve a directory user into a reference [`Person`] with their profile photo.
pub async fn person_from_directory<D>(directory: &D, upn: &str) -> Result<Person, ServiceError>
where
    D: DirectoryService + ?Sized,
{
    let user = directory.get_user(upn).await?;
    let bytes = directory.get_photo(upn).await?;
    tracing::debug!(upn, bytes = bytes.len(), "downloaded profile photo");

    let photo = Photo::from_bytes(&bytes)
        .map_err(|e| ServiceError::Decode(format!("profile photo for {upn}: {e}")))?;

    Ok(Person {
        name: user.display_name,
        upn: Some(user.user_principal_name),
        photo,
    })
}
