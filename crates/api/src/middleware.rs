use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use gestio_auth::{MembershipDirectory, PrincipalId};

/// Header carrying the authenticated principal. Sessions are handled in
/// front of this service; by the time a request gets here the id is trusted.
pub const PRINCIPAL_HEADER: &str = "x-principal-id";

#[derive(Clone)]
pub struct AuthState {
    pub directory: Arc<dyn MembershipDirectory>,
}

/// Resolve the caller's tenant membership and attach the
/// [`gestio_auth::Principal`] to the request.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let principal_id = extract_principal_id(req.headers())?;

    let principal = state.directory.resolve(principal_id).map_err(|err| {
        debug!(error = %err, "principal rejected");
        StatusCode::UNAUTHORIZED
    })?;

    req.extensions_mut().insert(principal);

    Ok(next.run(req).await)
}

fn extract_principal_id(headers: &HeaderMap) -> Result<PrincipalId, StatusCode> {
    let header = headers.get(PRINCIPAL_HEADER).ok_or(StatusCode::UNAUTHORIZED)?;
    let raw = header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?.trim();
    if raw.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }
    raw.parse().map_err(|_| StatusCode::UNAUTHORIZED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn missing_or_malformed_header_is_unauthorized() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_principal_id(&headers), Err(StatusCode::UNAUTHORIZED));

        headers.insert(PRINCIPAL_HEADER, HeaderValue::from_static("not-a-uuid"));
        assert_eq!(extract_principal_id(&headers), Err(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn well_formed_header_parses() {
        let id = PrincipalId::new();
        let mut headers = HeaderMap::new();
        headers.insert(PRINCIPAL_HEADER, HeaderValue::from_str(&format!(" {id} ")).unwrap());
        assert_eq!(extract_principal_id(&headers), Ok(id));
    }
}
