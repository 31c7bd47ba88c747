//! Authorization seam
//!
//! Who may upload or delete is decided by an external auth subsystem; this
//! crate only consumes its allow/deny decision through `Authorizer`.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};

use crate::upload::UploadError;

/// Decision returned by the auth collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthDecision {
    pub allowed: bool,
    pub role: Option<String>,
}

impl AuthDecision {
    pub fn allow(role: impl Into<String>) -> Self {
        Self {
            allowed: true,
            role: Some(role.into()),
        }
    }

    pub fn deny() -> Self {
        Self {
            allowed: false,
            role: None,
        }
    }
}

/// Role of the authorized caller, inserted into request extensions
#[derive(Debug, Clone)]
pub struct CallerRole(pub Option<String>);

#[async_trait::async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, headers: &HeaderMap) -> AuthDecision;
}

/// Bearer-token authorizer
///
/// With no token configured every caller is allowed as `anonymous`.
pub struct TokenAuthorizer {
    token: Option<String>,
}

impl TokenAuthorizer {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }

    pub fn is_open(&self) -> bool {
        self.token.is_none()
    }
}

#[async_trait::async_trait]
impl Authorizer for TokenAuthorizer {
    async fn authorize(&self, headers: &HeaderMap) -> AuthDecision {
        let Some(expected) = &self.token else {
            return AuthDecision::allow("anonymous");
        };

        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));

        match presented {
            Some(token) if token == expected => AuthDecision::allow("uploader"),
            _ => AuthDecision::deny(),
        }
    }
}

/// Middleware gating ingestion and delete routes
pub async fn require_authorized(
    State(authorizer): State<Arc<dyn Authorizer>>,
    mut request: Request,
    next: Next,
) -> Result<Response, UploadError> {
    let decision = authorizer.authorize(request.headers()).await;
    if !decision.allowed {
        tracing::debug!(path = %request.uri().path(), "Rejected unauthorized caller");
        return Err(UploadError::Unauthorized);
    }

    request.extensions_mut().insert(CallerRole(decision.role));
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[tokio::test]
    async fn test_open_authorizer_allows_everyone() {
        let authorizer = TokenAuthorizer::new(None);
        let decision = authorizer.authorize(&HeaderMap::new()).await;
        assert_eq!(decision, AuthDecision::allow("anonymous"));
    }

    #[tokio::test]
    async fn test_token_authorizer() {
        let authorizer = TokenAuthorizer::new(Some("s3cret".to_string()));

        assert!(!authorizer.authorize(&HeaderMap::new()).await.allowed);

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer nope"));
        assert!(!authorizer.authorize(&headers).await.allowed);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        let decision = authorizer.authorize(&headers).await;
        assert!(decision.allowed);
        assert_eq!(decision.role.as_deref(), Some("uploader"));
    }

    #[tokio::test]
    async fn test_middleware_hands_role_to_handler() {
        use axum::{body::Body, http::StatusCode, middleware, routing::get, Extension, Router};
        use tower::ServiceExt;

        let authorizer: Arc<dyn Authorizer> =
            Arc::new(TokenAuthorizer::new(Some("s3cret".to_string())));
        let app = Router::new()
            .route(
                "/",
                get(|Extension(CallerRole(role)): Extension<CallerRole>| async move {
                    role.unwrap_or_default()
                }),
            )
            .route_layer(middleware::from_fn_with_state(authorizer, require_authorized));

        let request = axum::http::Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let request = axum::http::Request::builder()
            .uri("/")
            .header(header::AUTHORIZATION, "Bearer s3cret")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"uploader");
    }
}
