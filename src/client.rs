//! Typed client for the channel service.
//!
//! The client owns the caller's signing key, signs every request, and applies a
//! bounded retry policy. Retries live here and nowhere else: the service either
//! applies an operation completely or rejects it, so a retried submission is safe as
//! long as the operation itself is (claims carry their own session id).

use async_trait::async_trait;
use axum::{body::Body, http::Request, Router};
use ed25519_dalek::SigningKey;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use thiserror::Error;
use tokio::sync::RwLock;
use tower::ServiceExt;
use tracing::{debug, warn};

use crate::{
    handlers::{AccountResponse, HealthResponse, SessionResponse},
    middleware::{SIGNATURE_HEADER, SIGNER_HEADER, TIMESTAMP_HEADER},
    types::{
        AccountId, AddBalanceRequest, Balance, BlockNumber, Channel, ChannelError,
        ClaimPaymentRequest, ClaimReceipt, CloseChannelRequest, CloseExpiredRequest,
        ClosedChannelInfo, ErrorBody, OpenChannelRequest, ReceiverStats, Voucher,
    },
    utils::{crypto::sign_request, unix_time_millis},
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, path: &str) -> Result<TransportResponse, TransportError>;

    async fn post(
        &self,
        path: &str,
        headers: Vec<(&'static str, String)>,
        body: Vec<u8>,
    ) -> Result<TransportResponse, TransportError>;

    /// Re-establishes the underlying connection after a transport failure.
    async fn reconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// HTTP transport with an explicit connect/reconnect lifecycle.
pub struct HttpTransport {
    base_url: String,
    timeout: Duration,
    client: RwLock<reqwest::Client>,
}

impl HttpTransport {
    /// Builds the connection and checks that the service answers `/health`.
    pub async fn connect(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let transport = Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            client: RwLock::new(build_http_client(timeout)?),
        };
        let health = transport.get("/health").await?;
        if !health.is_success() {
            return Err(TransportError(format!(
                "health check returned status {}",
                health.status
            )));
        }
        Ok(transport)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn build_http_client(timeout: Duration) -> Result<reqwest::Client, TransportError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| TransportError(err.to_string()))
}

async fn read_response(response: reqwest::Response) -> Result<TransportResponse, TransportError> {
    let status = response.status().as_u16();
    let body = response
        .bytes()
        .await
        .map_err(|err| TransportError(err.to_string()))?;
    Ok(TransportResponse {
        status,
        body: body.to_vec(),
    })
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, path: &str) -> Result<TransportResponse, TransportError> {
        let client = self.client.read().await.clone();
        let response = client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .map_err(|err| TransportError(err.to_string()))?;
        read_response(response).await
    }

    async fn post(
        &self,
        path: &str,
        headers: Vec<(&'static str, String)>,
        body: Vec<u8>,
    ) -> Result<TransportResponse, TransportError> {
        let client = self.client.read().await.clone();
        let mut request = client
            .post(format!("{}{}", self.base_url, path))
            .header("Content-Type", "application/json")
            .body(body);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request
            .send()
            .await
            .map_err(|err| TransportError(err.to_string()))?;
        read_response(response).await
    }

    async fn reconnect(&self) -> Result<(), TransportError> {
        let fresh = build_http_client(self.timeout)?;
        *self.client.write().await = fresh;
        debug!(base_url = %self.base_url, "http transport reconnected");
        Ok(())
    }
}

/// Drives an in-process router, e.g. a service embedded in the same binary.
#[derive(Clone)]
pub struct RouterTransport {
    router: Router,
}

impl RouterTransport {
    pub fn new(router: Router) -> Self {
        Self { router }
    }

    async fn call(&self, request: Request<Body>) -> Result<TransportResponse, TransportError> {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .map_err(|err| TransportError(err.to_string()))?;
        let status = response.status().as_u16();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .map_err(|err| TransportError(err.to_string()))?;
        Ok(TransportResponse {
            status,
            body: body.to_vec(),
        })
    }
}

#[async_trait]
impl Transport for RouterTransport {
    async fn get(&self, path: &str) -> Result<TransportResponse, TransportError> {
        let request = Request::get(path)
            .body(Body::empty())
            .map_err(|err| TransportError(err.to_string()))?;
        self.call(request).await
    }

    async fn post(
        &self,
        path: &str,
        headers: Vec<(&'static str, String)>,
        body: Vec<u8>,
    ) -> Result<TransportResponse, TransportError> {
        let mut builder = Request::post(path).header("Content-Type", "application/json");
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        let request = builder
            .body(Body::from(body))
            .map_err(|err| TransportError(err.to_string()))?;
        self.call(request).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(4),
        }
    }
}

fn is_retryable(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("rejected: {0}")]
    Rejected(ChannelError),
    #[error("request refused ({status}): {code}")]
    Refused { status: u16, code: String },
    #[error("unexpected response ({status})")]
    Unexpected { status: u16, body: String },
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl ClientError {
    fn from_response(response: &TransportResponse) -> Self {
        match serde_json::from_slice::<ErrorBody>(&response.body) {
            Ok(body) => match ChannelError::from_code(&body.code) {
                Some(error) => ClientError::Rejected(error),
                None => ClientError::Refused {
                    status: response.status,
                    code: body.code,
                },
            },
            Err(_) => ClientError::Unexpected {
                status: response.status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            },
        }
    }

    pub fn channel_error(&self) -> Option<ChannelError> {
        match self {
            ClientError::Rejected(error) => Some(*error),
            _ => None,
        }
    }
}

pub struct ChannelClient<T> {
    transport: T,
    key: SigningKey,
    retry: RetryPolicy,
    last_timestamp: AtomicU64,
}

impl ChannelClient<HttpTransport> {
    pub async fn connect(
        base_url: &str,
        key: SigningKey,
        retry: RetryPolicy,
    ) -> Result<Self, ClientError> {
        let transport = HttpTransport::connect(base_url, Duration::from_secs(10)).await?;
        Ok(Self::new(transport, key, retry))
    }
}

impl<T: Transport> ChannelClient<T> {
    pub fn new(transport: T, key: SigningKey, retry: RetryPolicy) -> Self {
        Self {
            transport,
            key,
            retry,
            last_timestamp: AtomicU64::new(0),
        }
    }

    pub fn account(&self) -> AccountId {
        AccountId::from(&self.key)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Signs a voucher from this client's account to `receiver`.
    pub fn sign_voucher(
        &self,
        receiver: &AccountId,
        nonce: u64,
        session_id: u32,
        amount: Balance,
    ) -> Voucher {
        Voucher::sign(&self.key, receiver, nonce, session_id, amount)
    }

    pub async fn open_channel(
        &self,
        receiver: AccountId,
        amount: Balance,
        duration: BlockNumber,
    ) -> Result<Channel, ClientError> {
        let request = OpenChannelRequest {
            sender: self.account(),
            receiver,
            amount,
            duration,
        };
        self.submit("/channels/open", &request).await
    }

    pub async fn add_balance(
        &self,
        receiver: AccountId,
        amount: Balance,
    ) -> Result<Channel, ClientError> {
        let request = AddBalanceRequest {
            sender: self.account(),
            receiver,
            amount,
        };
        self.submit("/channels/add-balance", &request).await
    }

    /// Redeems `voucher` as the receiver of the `sender` channel.
    pub async fn claim_payment(
        &self,
        sender: AccountId,
        voucher: &Voucher,
    ) -> Result<ClaimReceipt, ClientError> {
        let request = ClaimPaymentRequest {
            sender,
            receiver: self.account(),
            session_id: voucher.session_id,
            amount: voucher.amount,
            signature: voucher.signature.clone(),
        };
        self.submit("/channels/claim", &request).await
    }

    pub async fn close_channel(
        &self,
        sender: AccountId,
        receiver: AccountId,
    ) -> Result<ClosedChannelInfo, ClientError> {
        let request = CloseChannelRequest { sender, receiver };
        self.submit("/channels/close", &request).await
    }

    pub async fn close_expired_channels(&self) -> Result<Vec<ClosedChannelInfo>, ClientError> {
        let request = CloseExpiredRequest {
            caller: self.account(),
        };
        self.submit("/channels/close-expired", &request).await
    }

    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        self.query("/health").await
    }

    pub async fn get_channel(
        &self,
        sender: &AccountId,
        receiver: &AccountId,
    ) -> Result<Option<Channel>, ClientError> {
        match self.query(&format!("/channels/{}/{}", sender.to_hex(), receiver.to_hex())).await {
            Ok(channel) => Ok(Some(channel)),
            Err(ClientError::Rejected(ChannelError::ChannelNotFound)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn session(
        &self,
        sender: &AccountId,
        receiver: &AccountId,
    ) -> Result<SessionResponse, ClientError> {
        self.query(&format!(
            "/channels/{}/{}/session",
            sender.to_hex(),
            receiver.to_hex()
        ))
        .await
    }

    pub async fn last_claimed_session(
        &self,
        sender: &AccountId,
        receiver: &AccountId,
    ) -> Result<u32, ClientError> {
        Ok(self.session(sender, receiver).await?.last_claimed_session)
    }

    pub async fn account_info(&self, account: &AccountId) -> Result<AccountResponse, ClientError> {
        self.query(&format!("/accounts/{}", account.to_hex())).await
    }

    pub async fn statistics(&self) -> Result<Vec<ReceiverStats>, ClientError> {
        self.query("/statistics").await
    }

    async fn query<R: DeserializeOwned>(&self, path: &str) -> Result<R, ClientError> {
        let mut attempt = 1;
        loop {
            let outcome = self.transport.get(path).await;
            match self.settle(outcome, attempt).await {
                Some(result) => return result,
                None => attempt += 1,
            }
        }
    }

    /// Signs and posts `body`, re-signing with a fresh timestamp on every attempt.
    async fn submit<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, ClientError> {
        let body = serde_json::to_vec(body)?;
        let mut attempt = 1;
        loop {
            let timestamp = self.next_timestamp();
            let signature = sign_request(&self.key, timestamp, &body);
            let headers = vec![
                (SIGNER_HEADER, self.account().to_hex()),
                (TIMESTAMP_HEADER, timestamp.to_string()),
                (SIGNATURE_HEADER, hex::encode(signature)),
            ];
            let outcome = self.transport.post(path, headers, body.clone()).await;
            match self.settle(outcome, attempt).await {
                Some(result) => return result,
                None => attempt += 1,
            }
        }
    }

    /// Strictly increasing per client, so two identical requests never carry the
    /// same signature and trip the service's replay check.
    fn next_timestamp(&self) -> u64 {
        let now = unix_time_millis();
        let previous = self
            .last_timestamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        now.max(previous + 1)
    }

    /// `None` means the attempt failed in a retryable way and the backoff elapsed.
    async fn settle<R: DeserializeOwned>(
        &self,
        outcome: Result<TransportResponse, TransportError>,
        attempt: u32,
    ) -> Option<Result<R, ClientError>> {
        let exhausted = attempt >= self.retry.max_attempts;
        match outcome {
            Ok(response) if response.is_success() => {
                Some(serde_json::from_slice(&response.body).map_err(ClientError::from))
            }
            Ok(response) if is_retryable(response.status) && !exhausted => {
                warn!(status = response.status, attempt, "retryable response, backing off");
                tokio::time::sleep(self.retry.backoff(attempt)).await;
                None
            }
            Ok(response) => Some(Err(ClientError::from_response(&response))),
            Err(err) if !exhausted => {
                warn!(%err, attempt, "transport failure, reconnecting");
                tokio::time::sleep(self.retry.backoff(attempt)).await;
                if let Err(err) = self.transport.reconnect().await {
                    warn!(%err, "reconnect failed");
                }
                None
            }
            Err(err) => Some(Err(ClientError::Transport(err))),
        }
    }
}
