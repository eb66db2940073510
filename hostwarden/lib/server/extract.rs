use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};

use crate::{auth::Principal, HostwardenError};

use super::{ApiError, ServerState};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const BEARER_PREFIX: &str = "Bearer ";

const FORWARDED_FOR: &str = "x-forwarded-for";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The principal behind the request's bearer token.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Principal);

/// The address the request came from.
///
/// The first `X-Forwarded-For` hop is used only when the peer is a trusted proxy; otherwise the
/// header is ignored and the peer address is reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAddress(pub String);

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl FromRequestParts<ServerState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or_else(|| {
            HostwardenError::Authentication("missing or invalid bearer token".to_string())
        })?;

        let principal = state.authenticator().authenticate(token).await?;
        Ok(Self(principal))
    }
}

impl FromRequestParts<ServerState> for ClientAddress {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        client_address(&parts.headers, peer, state.trusted_proxies())
            .map(Self)
            .ok_or_else(|| {
                ApiError(HostwardenError::InvalidInput(
                    "could not determine client address".to_string(),
                ))
            })
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix(BEARER_PREFIX))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// The first `X-Forwarded-For` hop when `peer` is one of `trusted`, else the peer address.
/// IPv4-mapped IPv6 peers are reported in dotted-quad form.
fn client_address(
    headers: &HeaderMap,
    peer: Option<IpAddr>,
    trusted: &[IpAddr],
) -> Option<String> {
    let peer = peer.map(|ip| ip.to_canonical())?;

    if trusted.contains(&peer) {
        let forwarded = headers
            .get(FORWARDED_FOR)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|hop| !hop.is_empty());

        if let Some(hop) = forwarded {
            return Some(hop.to_string());
        }
    } else if headers.contains_key(FORWARDED_FOR) {
        tracing::debug!(%peer, "ignoring X-Forwarded-For from untrusted peer");
    }

    Some(peer.to_string())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
