//! GraphQL requester.

use std::sync::Arc;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::error::ApiError;
use super::requester::{Requester, decode_body};
use crate::http::HttpMethod;

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(bound = "T: DeserializeOwned")]
struct GraphqlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

/// Posts queries to `{base}/api/graphql/`.
///
/// Shares the REST requester's concurrency cap and retry policy.
#[derive(Debug, Clone)]
pub struct GraphqlRequester {
    requester: Arc<Requester>,
    url: String,
}

impl GraphqlRequester {
    pub fn new(requester: Arc<Requester>, url: impl Into<String>) -> Self {
        Self {
            requester,
            url: url.into(),
        }
    }

    /// Run a query and decode its `data` member.
    pub async fn query<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Option<Value>,
    ) -> Result<T, ApiError> {
        let mut body = json!({ "query": query });
        if let Some(variables) = variables {
            body["variables"] = variables;
        }
        let resp = self
            .requester
            .send(
                HttpMethod::Post,
                "graphql",
                self.url.clone(),
                serde_json::to_vec(&body)?,
            )
            .await?;

        let decoded: GraphqlResponse<T> = decode_body(&resp)?;
        if !decoded.errors.is_empty() {
            let messages: Vec<&str> = decoded.errors.iter().map(|e| e.message.as_str()).collect();
            return Err(ApiError::GraphQl(messages.join("; ")));
        }
        decoded
            .data
            .ok_or_else(|| ApiError::GraphQl("response carried no data".to_string()))
    }
}

/// The trailing numeric part of a GraphQL global ID,
/// e.g. `gid://gitlab/Iteration/7` becomes `7`.
pub fn extract_graphql_id(id: &str) -> &str {
    id.rsplit('/').next().unwrap_or(id)
}
