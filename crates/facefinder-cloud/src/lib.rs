//! facefinder-cloud — HTTP clients for the Face API and the user directory.
//!
//! [`FaceClient`] implements [`facefinder_core::FaceService`] against the
//! Cognitive Services Face REST API; [`GraphDirectory`] implements
//! [`facefinder_core::DirectoryService`] against Microsoft Graph.

pub mod auth;
pub mod directory;
pub mod face;
mod http;

pub use auth::AccessToken;
pub use directory::{GraphDirectory, DEFAULT_GRAPH_ENDPOINT};
pub use face::{FaceClient, DEFAULT_FACE_ENDPOINT};
