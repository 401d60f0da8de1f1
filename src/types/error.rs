use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::InsufficientFunds;

/// Every way a channel operation can be rejected. Rejections never mutate state.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Channel already open")]
    ChannelAlreadyOpen,
    #[error("Channel not found")]
    ChannelNotFound,
    #[error("Channel expired")]
    ChannelExpired,
    #[error("Insufficient free balance")]
    InsufficientFunds,
    #[error("Insufficient channel balance")]
    InsufficientChannelBalance,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Session id already consumed")]
    StaleSessionId,
    #[error("Caller is not a party allowed to perform this operation")]
    Unauthorized,
    #[error("Sender and receiver are the same account")]
    SameChannelEnds,
    #[error("Channel duration must be positive")]
    InvalidDuration,
    #[error("Balance overflow")]
    BalanceOverflow,
}

impl ChannelError {
    pub fn code(&self) -> &'static str {
        match self {
            ChannelError::ChannelAlreadyOpen => "ChannelAlreadyOpen",
            ChannelError::ChannelNotFound => "ChannelNotFound",
            ChannelError::ChannelExpired => "ChannelExpired",
            ChannelError::InsufficientFunds => "InsufficientFunds",
            ChannelError::InsufficientChannelBalance => "InsufficientChannelBalance",
            ChannelError::InvalidSignature => "InvalidSignature",
            ChannelError::StaleSessionId => "StaleSessionId",
            ChannelError::Unauthorized => "Unauthorized",
            ChannelError::SameChannelEnds => "SameChannelEnds",
            ChannelError::InvalidDuration => "InvalidDuration",
            ChannelError::BalanceOverflow => "BalanceOverflow",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        let error = match code {
            "ChannelAlreadyOpen" => ChannelError::ChannelAlreadyOpen,
            "ChannelNotFound" => ChannelError::ChannelNotFound,
            "ChannelExpired" => ChannelError::ChannelExpired,
            "InsufficientFunds" => ChannelError::InsufficientFunds,
            "InsufficientChannelBalance" => ChannelError::InsufficientChannelBalance,
            "InvalidSignature" => ChannelError::InvalidSignature,
            "StaleSessionId" => ChannelError::StaleSessionId,
            "Unauthorized" => ChannelError::Unauthorized,
            "SameChannelEnds" => ChannelError::SameChannelEnds,
            "InvalidDuration" => ChannelError::InvalidDuration,
            "BalanceOverflow" => ChannelError::BalanceOverflow,
            _ => return None,
        };
        Some(error)
    }
}

impl From<InsufficientFunds> for ChannelError {
    fn from(_: InsufficientFunds) -> Self {
        ChannelError::InsufficientFunds
    }
}

impl From<ChannelError> for StatusCode {
    fn from(error: ChannelError) -> Self {
        match error {
            ChannelError::ChannelAlreadyOpen => StatusCode::CONFLICT,
            ChannelError::ChannelNotFound => StatusCode::NOT_FOUND,
            ChannelError::ChannelExpired => StatusCode::GONE,
            ChannelError::InsufficientFunds => StatusCode::PAYMENT_REQUIRED,
            ChannelError::InsufficientChannelBalance => StatusCode::PAYMENT_REQUIRED,
            ChannelError::InvalidSignature => StatusCode::UNAUTHORIZED,
            ChannelError::StaleSessionId => StatusCode::CONFLICT,
            ChannelError::Unauthorized => StatusCode::FORBIDDEN,
            ChannelError::SameChannelEnds => StatusCode::BAD_REQUEST,
            ChannelError::InvalidDuration => StatusCode::BAD_REQUEST,
            ChannelError::BalanceOverflow => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

pub type ChannelResult<T> = Result<T, ChannelError>;

/// Failures while authenticating a signed request, before any channel logic runs.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing request credentials")]
    MissingCredentials,
    #[error("Malformed request credentials")]
    MalformedCredentials,
    #[error("Invalid request signature")]
    InvalidSignature,
    #[error("Request timestamp outside the accepted window")]
    StaleTimestamp,
    #[error("Request already processed")]
    Replayed,
    #[error("Request body exceeds the size limit")]
    PayloadTooLarge,
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingCredentials => "MissingCredentials",
            AuthError::MalformedCredentials => "MalformedCredentials",
            AuthError::InvalidSignature => "InvalidRequestSignature",
            AuthError::StaleTimestamp => "StaleTimestamp",
            AuthError::Replayed => "Replayed",
            AuthError::PayloadTooLarge => "PayloadTooLarge",
        }
    }
}

impl From<AuthError> for StatusCode {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::MissingCredentials => StatusCode::UNAUTHORIZED,
            AuthError::MalformedCredentials => StatusCode::BAD_REQUEST,
            AuthError::InvalidSignature => StatusCode::UNAUTHORIZED,
            AuthError::StaleTimestamp => StatusCode::REQUEST_TIMEOUT,
            AuthError::Replayed => StatusCode::CONFLICT,
            AuthError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub error: String,
}

/// Error returned by route handlers and the auth middleware.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Channel(error) => (StatusCode::from(*error), error.code()),
            ApiError::Auth(error) => (StatusCode::from(*error), error.code()),
        };
        let body = ErrorBody {
            code: code.to_string(),
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("cryptography error: {0}")]
    Crypto(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;
