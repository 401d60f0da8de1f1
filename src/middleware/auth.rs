use crate::{
    state::ChannelState,
    types::{AccountId, ApiError, AuthError},
    utils::{
        crypto::{create_request_message, verify_signature, SIGNATURE_LENGTH},
        unix_time_millis,
    },
};
use axum::{
    body::Body,
    extract::State,
    http::{header::CONTENT_LENGTH, HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use tracing::debug;

pub const SIGNER_HEADER: &str = "X-Signer";
pub const SIGNATURE_HEADER: &str = "X-Signature";
pub const TIMESTAMP_HEADER: &str = "X-Timestamp";

/// Largest signed request body read into memory. Channel requests are well under 1 KiB.
pub const MAX_REQUEST_BODY: usize = 16 * 1024;

/// Account that signed the current request, inserted into the request extensions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signer(pub AccountId);

fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, AuthError> {
    headers
        .get(name)
        .ok_or(AuthError::MissingCredentials)?
        .to_str()
        .map_err(|_| AuthError::MalformedCredentials)
}

/// Verifies `X-Signer`/`X-Timestamp`/`X-Signature` over the request body and hands the
/// authenticated [`Signer`] to the handler. `X-Timestamp` is in unix milliseconds.
pub async fn auth_middleware(
    State(state): State<ChannelState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let headers = request.headers();
    let signer: AccountId = header(headers, SIGNER_HEADER)?
        .parse()
        .map_err(|_| AuthError::MalformedCredentials)?;
    let timestamp: u64 = header(headers, TIMESTAMP_HEADER)?
        .parse()
        .map_err(|_| AuthError::MalformedCredentials)?;
    let signature = hex::decode(header(headers, SIGNATURE_HEADER)?.trim_start_matches("0x"))
        .map_err(|_| AuthError::MalformedCredentials)?;
    if signature.len() != SIGNATURE_LENGTH {
        return Err(AuthError::MalformedCredentials.into());
    }

    let now = unix_time_millis();
    if now.abs_diff(timestamp) > state.request_window_millis() {
        debug!(?signer, timestamp, now, "request timestamp outside window");
        return Err(AuthError::StaleTimestamp.into());
    }

    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());
    if declared.is_some_and(|length| length > MAX_REQUEST_BODY) {
        return Err(AuthError::PayloadTooLarge.into());
    }

    let (parts, body) = request.into_parts();
    // stops reading as soon as the cap is passed
    let body_bytes = axum::body::to_bytes(body, MAX_REQUEST_BODY)
        .await
        .map_err(|_| AuthError::PayloadTooLarge)?;

    let message = create_request_message(timestamp, &body_bytes);
    if !verify_signature(&signer, &message, &signature) {
        debug!(?signer, "request signature mismatch");
        return Err(AuthError::InvalidSignature.into());
    }

    state.check_replay(&signature, timestamp, now).await?;

    let mut request = Request::from_parts(parts, Body::from(body_bytes));
    request.extensions_mut().insert(Signer(signer));
    Ok(next.run(request).await)
}
