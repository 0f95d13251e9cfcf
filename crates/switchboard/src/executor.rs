//! Request executor: resolves an [`ApiRequest`] against a session and sends it.

use std::sync::Arc;

use log::debug;

use crate::auth::Session;
use crate::error::{ApiError, Error, Result};
use crate::transport::{ApiRequest, HttpRequest, HttpResponse, HttpTransport, RequestPreprocessor};

const JSON: &str = "application/json";

/// Shared by the authenticators and the metadata resolver. Holds no state
/// beyond its collaborators.
#[derive(Clone)]
pub struct RequestExecutor {
    transport: Arc<dyn HttpTransport>,
    preprocessors: Vec<RequestPreprocessor>,
}

impl RequestExecutor {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            preprocessors: Vec::new(),
        }
    }

    pub fn with_preprocessors(mut self, preprocessors: Vec<RequestPreprocessor>) -> Self {
        self.preprocessors = preprocessors;
        self
    }

    /// Send a request. Without a session, `request.path` must be an
    /// absolute URL. Any non-2xx status becomes [`Error::Api`].
    pub async fn execute(
        &self,
        request: &ApiRequest,
        session: Option<&Session>,
    ) -> Result<HttpResponse> {
        let http = self.resolve(request, session)?;
        for preprocess in &self.preprocessors {
            preprocess(&http)?;
        }

        debug!("{} {}", http.method, http.url);
        let response = self.transport.send(http).await?;
        if !response.is_success() {
            return Err(Error::Api(ApiError::from_response(
                response.status,
                &response.body,
            )));
        }
        Ok(response)
    }

    fn resolve(&self, request: &ApiRequest, session: Option<&Session>) -> Result<HttpRequest> {
        let mut headers = vec![
            ("Accept".to_string(), JSON.to_string()),
            ("Content-Type".to_string(), JSON.to_string()),
        ];

        let url = match session {
            Some(session) => {
                if let Some(cookie) = &session.cookie {
                    headers.push(("Cookie".to_string(), cookie.clone()));
                }
                let path = substitute(&request.path, session);
                if is_absolute(&path) {
                    path
                } else {
                    format!("https://{}{}", session.api_host, path)
                }
            }
            None if is_absolute(&request.path) => request.path.clone(),
            None => {
                return Err(Error::InvalidRequest(format!(
                    "relative path {} needs a session",
                    request.path
                )));
            }
        };

        Ok(HttpRequest {
            method: request.method.clone(),
            url,
            headers,
            body: request.body.clone(),
        })
    }
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("preprocessors", &self.preprocessors.len())
            .finish_non_exhaustive()
    }
}

/// Replace `:userID` and `:organizationID` with the session's values.
pub fn substitute(path: &str, session: &Session) -> String {
    path.replace(":userID", session.user_id.as_str())
        .replace(":organizationID", session.org_id.as_str())
}

fn is_absolute(path: &str) -> bool {
    path.starts_with("https://") || path.starts_with("http://")
}
