use crate::api_error::ApiError;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use leadflow_core::{Identity, Role};

pub const USER_HEADER: &str = "x-leadflow-user";
pub const ROLE_HEADER: &str = "x-leadflow-role";
pub const USERNAME_HEADER: &str = "x-leadflow-username";

/// Caller identity as asserted by the authenticating proxy in front of the hub.
#[derive(Debug, Clone)]
pub struct Caller(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        identity_from_headers(&parts.headers).map(Caller)
    }
}

fn identity_from_headers(headers: &HeaderMap) -> Result<Identity, ApiError> {
    let subject_id = header_text(headers, USER_HEADER)
        .ok_or_else(|| ApiError::unauthorized("access denied, no identity provided"))?;
    let role = header_text(headers, ROLE_HEADER)
        .ok_or_else(|| ApiError::unauthorized("access denied, no role provided"))?
        .parse::<Role>()
        .map_err(ApiError::unauthorized)?;
    let username = header_text(headers, USERNAME_HEADER).unwrap_or(subject_id);
    Ok(Identity::new(subject_id, role, username))
}

fn header_text<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_static(value));
        }
        headers
    }

    #[test]
    fn agent_role_accepts_the_legacy_user_name() {
        let identity = identity_from_headers(&headers(&[
            (USER_HEADER, "a-1"),
            (ROLE_HEADER, "user"),
            (USERNAME_HEADER, "ada"),
        ]))
        .unwrap();
        assert_eq!(identity, Identity::agent("a-1", "ada"));
    }

    #[test]
    fn username_defaults_to_subject() {
        let identity =
            identity_from_headers(&headers(&[(USER_HEADER, "root"), (ROLE_HEADER, "admin")]))
                .unwrap();
        assert!(identity.is_admin());
        assert_eq!(identity.username, "root");
    }

    #[test]
    fn missing_or_unknown_claims_are_unauthorized() {
        assert!(matches!(
            identity_from_headers(&headers(&[(ROLE_HEADER, "admin")])),
            Err(ApiError::Unauthorized(_))
        ));
        assert!(matches!(
            identity_from_headers(&headers(&[(USER_HEADER, "x"), (ROLE_HEADER, "owner")])),
            Err(ApiError::Unauthorized(_))
        ));
    }
}
