//! Face API client (Cognitive Services Face v1.0).

use async_trait::async_trait;
use facefinder_core::types::{
    CreatedPerson, DetectedFace, IdentifyResult, PersistedFace, TrainingStatus,
};
use facefinder_core::{FaceService, ServiceError};
use reqwest::header::CONTENT_TYPE;
use reqwest::{RequestBuilder, StatusCode};
use serde::Serialize;

use crate::http::{build_client, endpoint_url, expect_json, expect_status, transport};

pub const DEFAULT_FACE_ENDPOINT: &str = "https://westus.api.cognitive.microsoft.com/face/v1.0";

const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NamedEntity<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_data: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IdentifyRequest<'a> {
    person_group_id: &'a str,
    face_ids: &'a [String],
    max_num_of_candidates_returned: u32,
    confidence_threshold: f64,
}

/// Face API client authenticated with a subscription key.
#[derive(Clone)]
pub struct FaceClient {
    http: reqwest::Client,
    endpoint: String,
    subscription_key: String,
}

impl FaceClient {
    pub fn new(
        endpoint: impl Into<String>,
        subscription_key: impl Into<String>,
    ) -> Result<Self, ServiceError> {
        Ok(Self::with_client(build_client()?, endpoint, subscription_key))
    }

    pub fn with_client(
        http: reqwest::Client,
        endpoint: impl Into<String>,
        subscription_key: impl Into<String>,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            subscription_key: subscription_key.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request(
        &self,
        method: reqwest::Method,
        segments: &[&str],
    ) -> Result<RequestBuilder, ServiceError> {
        let url = endpoint_url(&self.endpoint, segments)?;
        tracing::debug!(%method, %url, "face api request");
        Ok(self
            .http
            .request(method, url)
            .header(SUBSCRIPTION_KEY_HEADER, &self.subscription_key))
    }
}

#[async_trait]
impl FaceService for FaceClient {
    async fn create_person_group(
        &self,
        group_id: &str,
        name: &str,
        user_data: Option<&str>,
    ) -> Result<(), ServiceError> {
        let response = self
            .request(reqwest::Method::PUT, &["persongroups", group_id])?
            .json(&NamedEntity { name, user_data })
            .send()
            .await
            .map_err(transport)?;

        let status = expect_status(response, &[StatusCode::OK, StatusCode::CONFLICT]).await?;
        if status == StatusCode::CONFLICT {
            tracing::info!(group_id, "person group already exists");
        }
        Ok(())
    }

    async fn create_person(
        &self,
        group_id: &str,
        name: &str,
        user_data: Option<&str>,
    ) -> Result<CreatedPerson, ServiceError> {
        let response = self
            .request(reqwest::Method::POST, &["persongroups", group_id, "persons"])?
            .json(&NamedEntity { name, user_data })
            .send()
            .await
            .map_err(transport)?;
        expect_json(response, StatusCode::OK).await
    }

    async fn add_person_face(
        &self,
        group_id: &str,
        person_id: &str,
        png: Vec<u8>,
    ) -> Result<PersistedFace, ServiceError> {
        let response = self
            .request(
                reqwest::Method::POST,
                &["persongroups", group_id, "persons", person_id, "persistedFaces"],
            )?
            .header(CONTENT_TYPE, OCTET_STREAM)
            .body(png)
            .send()
            .await
            .map_err(transport)?;
        expect_json(response, StatusCode::OK).await
    }

    async fn train_person_group(&self, group_id: &str) -> Result<(), ServiceError> {
        let response = self
            .request(reqwest::Method::POST, &["persongroups", group_id, "train"])?
            .send()
            .await
            .map_err(transport)?;
        expect_status(response, &[StatusCode::ACCEPTED]).await?;
        Ok(())
    }

    async fn training_status(&self, group_id: &str) -> Result<TrainingStatus, ServiceError> {
        let response = self
            .request(reqwest::Method::GET, &["persongroups", group_id, "training"])?
            .send()
            .await
            .map_err(transport)?;
        expect_json(response, StatusCode::OK).await
    }

    async fn detect_faces(&self, png: Vec<u8>) -> Result<Vec<DetectedFace>, ServiceError> {
        let response = self
            .request(reqwest::Method::POST, &["detect"])?
            .query(&[("returnFaceId", "true"), ("returnFaceLandmarks", "false")])
            .header(CONTENT_TYPE, OCTET_STREAM)
            .body(png)
            .send()
            .await
            .map_err(transport)?;
        expect_json(response, StatusCode::OK).await
    }

    async fn identify(
        &self,
        face_ids: &[String],
        group_id: &str,
        max_candidates: u32,
        confidence_threshold: f64,
    ) -> Result<Vec<IdentifyResult>, ServiceError> {
        let response = self
            .request(reqwest::Method::POST, &["identify"])?
            .json(&IdentifyRequest {
                person_group_id: group_id,
                face_ids,
                max_num_of_candidates_returned: max_candidates,
                confidence_threshold,
            })
            .send()
            .await
            .map_err(transport)?;
        expect_json(response, StatusCode::OK).await
    }
}
