//! Caller identity as forwarded by the authentication layer.
//!
//! This service does not authenticate. It trusts two headers set upstream:
//! `x-user-id` and a comma-separated `x-user-groups`.

use crate::models::policy::Principal;
use axum::{extract::FromRequestParts, http::request::Parts};
use std::convert::Infallible;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_GROUPS_HEADER: &str = "x-user-groups";

/// `None` for anonymous requests.
#[derive(Debug, Clone, Default)]
pub struct RequestPrincipal(pub Option<Principal>);

impl RequestPrincipal {
    pub fn principal(&self) -> Option<&Principal> {
        self.0.as_ref()
    }

    pub fn id(&self) -> Option<&str> {
        self.0.as_ref().map(|p| p.id.as_str())
    }
}

impl<S> FromRequestParts<S> for RequestPrincipal
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(id) = header_value(parts, USER_ID_HEADER) else {
            return Ok(Self(None));
        };
        let groups = header_value(parts, USER_GROUPS_HEADER)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|g| !g.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Ok(Self(Some(Principal::new(id).with_groups(groups))))
    }
}

fn header_value<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
