//! Microsoft Graph user directory.

use async_trait::async_trait;
use facefinder_core::{DirectoryService, DirectoryUser, ServiceError};
use reqwest::{RequestBuilder, StatusCode, Url};
use serde::Deserialize;

use crate::auth::AccessToken;
use crate::http::{build_client, endpoint_url, error_from, expect_json, transport};

pub const DEFAULT_GRAPH_ENDPOINT: &str = "https://graph.microsoft.com/v1.0";

const USER_FIELDS: &str = "displayName,userPrincipalName";

/// Upper bound on followed `@odata.nextLink` pages.
const MAX_PAGES: usize = 50;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphUser {
    display_name: Option<String>,
    user_principal_name: String,
}

impl From<GraphUser> for DirectoryUser {
    fn from(u: GraphUser) -> Self {
        Self {
            display_name: u.display_name.unwrap_or_else(|| u.user_principal_name.clone()),
            user_principal_name: u.user_principal_name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserPage {
    value: Vec<GraphUser>,
    #[serde(rename = "@odata.nextLink", default)]
    next_link: Option<String>,
}

/// Graph directory client authenticated with a bearer token.
#[derive(Clone)]
pub struct GraphDirectory {
    http: reqwest::Client,
    endpoint: String,
    token: AccessToken,
}

impl GraphDirectory {
    pub fn new(endpoint: impl Into<String>, token: AccessToken) -> Result<Self, ServiceError> {
        Ok(Self::with_client(build_client()?, endpoint, token))
    }

    pub fn with_client(http: reqwest::Client, endpoint: impl Into<String>, token: AccessToken) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            token,
        }
    }

    fn get(&self, url: Url) -> RequestBuilder {
        tracing::debug!(%url, "graph request");
        self.http.get(url).bearer_auth(self.token.secret())
    }
}

#[async_trait]
impl DirectoryService for GraphDirectory {
    async fn list_users(&self) -> Result<Vec<DirectoryUser>, ServiceError> {
        let mut url = endpoint_url(&self.endpoint, &["users"])?;
        url.query_pairs_mut().append_pair("$select", USER_FIELDS);

        let mut users = Vec::new();
        for page in 1..=MAX_PAGES {
            let response = self.get(url).send().await.map_err(transport)?;
            let body: UserPage = expect_json(response, StatusCode::OK).await?;
            users.extend(body.value.into_iter().map(DirectoryUser::from));

            let Some(next) = body.next_link else {
                break;
            };
            if page == MAX_PAGES {
                tracing::warn!(pages = MAX_PAGES, "directory listing truncated");
                break;
            }
            url = Url::parse(&next)
                .map_err(|e| ServiceError::Decode(format!("invalid nextLink {next}: {e}")))?;
        }

        tracing::debug!(count = users.len(), "listed directory users");
        Ok(users)
    }

    async fn get_user(&self, upn: &str) -> Result<DirectoryUser, ServiceError> {
        let mut url = endpoint_url(&self.endpoint, &["users", upn])?;
        url.query_pairs_mut().append_pair("$select", USER_FIELDS);

        let response = self.get(url).send().await.map_err(transport)?;
        let user: GraphUser = expect_json(response, StatusCode::OK).await?;
        Ok(user.into())
    }

    async fn get_photo(&self, upn: &str) -> Result<Vec<u8>, ServiceError> {
        let url = endpoint_url(&self.endpoint, &["users", upn, "photo", "$value"])?;
        let response = self.get(url).send().await.map_err(transport)?;
        if response.status() != StatusCode::OK {
            return Err(error_from(response).await);
        }
        let bytes = response.bytes().await.map_err(transport)?;
        Ok(bytes.to_vec())
    }
}
