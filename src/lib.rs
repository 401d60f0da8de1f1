//! Unidirectional micropayment channels settled against a ledger.
//!
//! A sender locks funds into a channel with a receiver, pays off-chain by signing
//! vouchers, and the receiver redeems the latest voucher on the ledger. Channels
//! expire at a block height, after which anyone party to them can return the
//! unclaimed balance to the sender.

pub mod client;
pub mod config;
pub mod handlers;
pub mod ledger;
pub mod middleware;
pub mod state;
pub mod types;
pub mod utils;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use client::{ChannelClient, HttpTransport, RetryPolicy, RouterTransport, Transport};
pub use config::ServiceConfig;
pub use ledger::{InMemoryLedger, Ledger};
pub use state::{spawn_block_clock, ChannelManager, ChannelState};
pub use types::{AccountId, Balance, BlockNumber, Channel, ChannelError, Voucher};

pub fn create_router(state: ChannelState) -> Router {
    let signed = Router::new()
        .route("/channels/open", post(handlers::channels::open_channel))
        .route("/channels/add-balance", post(handlers::channels::add_balance))
        .route("/channels/claim", post(handlers::channels::claim_payment))
        .route("/channels/close", post(handlers::channels::close_channel))
        .route(
            "/channels/close-expired",
            post(handlers::channels::close_expired_channels),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::channels::health))
        .route(
            "/channels/:sender/:receiver",
            get(handlers::channels::get_channel),
        )
        .route(
            "/channels/:sender/:receiver/session",
            get(handlers::channels::get_session),
        )
        .route("/accounts/:account", get(handlers::channels::get_account))
        .route("/statistics", get(handlers::channels::statistics))
        .merge(signed)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        middleware::{MAX_REQUEST_BODY, SIGNATURE_HEADER, SIGNER_HEADER, TIMESTAMP_HEADER},
        state::testing::*,
        types::{ErrorBody, OpenChannelRequest},
        utils::{crypto::sign_request, unix_time_millis},
    };
    use axum::{
        body::Body,
        http::{self, HeaderMap, HeaderValue, Request, StatusCode},
    };
    use ed25519_dalek::SigningKey;
    use serde::Serialize;
    use tower::util::ServiceExt;

    fn create_test_state() -> ChannelState {
        ChannelState::new(InMemoryLedger::with_balances([(alice(), 1_000)]), 300)
    }

    fn create_signed_headers(key: &SigningKey, timestamp: u64, body: &[u8]) -> HeaderMap {
        let signature = sign_request(key, timestamp, body);

        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNER_HEADER,
            HeaderValue::from_str(&AccountId::from(key).to_hex()).unwrap(),
        );
        headers.insert(
            TIMESTAMP_HEADER,
            HeaderValue::from_str(&timestamp.to_string()).unwrap(),
        );
        headers.insert(
            SIGNATURE_HEADER,
            HeaderValue::from_str(&hex::encode(signature)).unwrap(),
        );
        headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers
    }

    async fn send_test_request(
        app: Router,
        uri: &str,
        headers: HeaderMap,
        body: Vec<u8>,
    ) -> axum::response::Response {
        let request = Request::builder()
            .method(http::Method::POST)
            .uri(uri)
            .body(Body::from(body))
            .unwrap();

        let request = {
            let (mut parts, body) = request.into_parts();
            parts.headers = headers;
            Request::from_parts(parts, body)
        };

        app.oneshot(request).await.unwrap()
    }

    async fn send_signed<T: Serialize>(
        app: Router,
        key: &SigningKey,
        uri: &str,
        payload: &T,
    ) -> axum::response::Response {
        let body = serde_json::to_vec(payload).unwrap();
        let headers = create_signed_headers(key, unix_time_millis(), &body);
        send_test_request(app, uri, headers, body).await
    }

    async fn error_code(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice::<ErrorBody>(&bytes).unwrap().code
    }

    fn open_request() -> OpenChannelRequest {
        OpenChannelRequest {
            sender: alice(),
            receiver: bob(),
            amount: 100,
            duration: 1_000,
        }
    }

    #[tokio::test]
    async fn test_valid_open_request() {
        let state = create_test_state();
        let app = create_router(state.clone());

        let response = send_signed(app, &alice_key(), "/channels/open", &open_request()).await;

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let channel: Channel = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(channel.balance, 100);
        assert_eq!(state.free_balance(&alice()).await, 900);
    }

    #[tokio::test]
    async fn test_invalid_signature() {
        let app = create_router(create_test_state());
        let body = serde_json::to_vec(&open_request()).unwrap();

        let mut headers = create_signed_headers(&alice_key(), unix_time_millis(), &body);
        let forged = hex::encode([1u8; 64]);
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(&forged).unwrap());

        let response = send_test_request(app, "/channels/open", headers, body).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_tampered_body_is_rejected() {
        let state = create_test_state();
        let app = create_router(state.clone());
        let body = serde_json::to_vec(&open_request()).unwrap();
        let headers = create_signed_headers(&alice_key(), unix_time_millis(), &body);

        let mut tampered = open_request();
        tampered.amount = 900;
        let tampered = serde_json::to_vec(&tampered).unwrap();

        let response = send_test_request(app, "/channels/open", headers, tampered).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(state.free_balance(&alice()).await, 1_000);
    }

    #[tokio::test]
    async fn test_missing_headers() {
        let app = create_router(create_test_state());
        let body = serde_json::to_vec(&open_request()).unwrap();

        for header_name in [SIGNER_HEADER, TIMESTAMP_HEADER, SIGNATURE_HEADER] {
            let mut headers = create_signed_headers(&alice_key(), unix_time_millis(), &body);
            headers.remove(header_name);

            let response =
                send_test_request(app.clone(), "/channels/open", headers, body.clone()).await;
            assert_eq!(
                response.status(),
                StatusCode::UNAUTHORIZED,
                "Request missing {} should be unauthorized",
                header_name
            );
        }

        let mut headers = create_signed_headers(&alice_key(), unix_time_millis(), &body);
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_static("invalid-signature"));

        let response = send_test_request(app, "/channels/open", headers, body).await;
        assert_eq!(
            response.status(),
            StatusCode::BAD_REQUEST,
            "Request with malformed signature should be bad request"
        );
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected_before_verification() {
        let state = create_test_state();
        let app = create_router(state.clone());
        let body = vec![b' '; 8 * 1024 * 1024];

        let mut headers = create_signed_headers(&alice_key(), unix_time_millis(), b"{}");
        headers.insert(
            SIGNATURE_HEADER,
            HeaderValue::from_str(&hex::encode([7u8; 64])).unwrap(),
        );
        let response =
            send_test_request(app.clone(), "/channels/open", headers.clone(), body).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(error_code(response).await, "PayloadTooLarge");

        headers.insert(
            http::header::CONTENT_LENGTH,
            HeaderValue::from_str(&(MAX_REQUEST_BODY + 1).to_string()).unwrap(),
        );
        let response = send_test_request(app, "/channels/open", headers, Vec::new()).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(state.free_balance(&alice()).await, 1_000);
    }

    #[tokio::test]
    async fn test_stale_timestamp() {
        let app = create_router(create_test_state());
        let body = serde_json::to_vec(&open_request()).unwrap();
        let ten_minutes_ago = unix_time_millis() - 600_000;

        let headers = create_signed_headers(&alice_key(), ten_minutes_ago, &body);
        let response = send_test_request(app, "/channels/open", headers, body).await;

        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn test_replayed_request() {
        let state = create_test_state();
        let app = create_router(state.clone());
        let request = open_request();
        let body = serde_json::to_vec(&request).unwrap();
        let headers = create_signed_headers(&alice_key(), unix_time_millis(), &body);

        let first = send_test_request(app.clone(), "/channels/open", headers.clone(), body.clone()).await;
        assert_eq!(first.status(), StatusCode::OK);
        state.manager.write().await.close_channel(alice(), alice(), bob()).unwrap();

        let replay = send_test_request(app, "/channels/open", headers, body).await;
        assert_eq!(replay.status(), StatusCode::CONFLICT);
        assert_eq!(error_code(replay).await, "Replayed");
        assert_eq!(state.free_balance(&alice()).await, 1_000);
    }

    #[tokio::test]
    async fn test_signer_must_be_the_sender() {
        let state = create_test_state();
        let app = create_router(state.clone());

        let response = send_signed(app, &bob_key(), "/channels/open", &open_request()).await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(error_code(response).await, "Unauthorized");
        assert_eq!(state.free_balance(&alice()).await, 1_000);
    }

    #[tokio::test]
    async fn test_claim_flow_reports_typed_errors() {
        let state = create_test_state();
        let app = create_router(state.clone());
        let response =
            send_signed(app.clone(), &alice_key(), "/channels/open", &open_request()).await;
        assert_eq!(response.status(), StatusCode::OK);

        let voucher = Voucher::sign(&alice_key(), &bob(), 0, 1, 10);
        let claim = types::ClaimPaymentRequest {
            sender: alice(),
            receiver: bob(),
            session_id: voucher.session_id,
            amount: voucher.amount,
            signature: voucher.signature.clone(),
        };

        // only the receiver may redeem
        let response = send_signed(app.clone(), &alice_key(), "/channels/claim", &claim).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = send_signed(app.clone(), &bob_key(), "/channels/claim", &claim).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.free_balance(&bob()).await, 10);

        let stale = Voucher::sign(&alice_key(), &bob(), 0, 1, 5);
        let claim = types::ClaimPaymentRequest {
            amount: stale.amount,
            signature: stale.signature,
            ..claim
        };
        let response = send_signed(app.clone(), &bob_key(), "/channels/claim", &claim).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(error_code(response).await, "StaleSessionId");

        let overdraw = Voucher::sign(&alice_key(), &bob(), 0, 2, 1_000);
        let claim = types::ClaimPaymentRequest {
            session_id: 2,
            amount: overdraw.amount,
            signature: overdraw.signature,
            ..claim
        };
        let response = send_signed(app, &bob_key(), "/channels/claim", &claim).await;
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(error_code(response).await, "InsufficientChannelBalance");
    }

    #[tokio::test]
    async fn test_queries_do_not_require_signatures() {
        let state = create_test_state();
        let app = create_router(state.clone());

        let missing = Request::get(format!("/channels/{}/{}", alice().to_hex(), bob().to_hex()))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(missing).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(error_code(response).await, "ChannelNotFound");

        state
            .manager
            .write()
            .await
            .open_channel(alice(), bob(), 100, 10)
            .unwrap();

        let found = Request::get(format!("/channels/0x{}/{}", alice().to_hex(), bob().to_hex()))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(found).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let health = Request::get("/health").body(Body::empty()).unwrap();
        let response = app.oneshot(health).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
