use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    ledger::Ledger,
    middleware::Signer,
    state::ChannelState,
    types::{
        AccountId, AddBalanceRequest, ApiError, Balance, BlockNumber, Channel, ChannelError,
        ClaimPaymentRequest, ClaimReceipt, CloseChannelRequest, CloseExpiredRequest,
        ClosedChannelInfo, OpenChannelRequest, ReceiverStats, Validate,
    },
};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub height: BlockNumber,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub last_claimed_session: u32,
    pub next_nonce: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountResponse {
    pub account: AccountId,
    pub free: Balance,
    pub locked: Balance,
}

pub async fn health(State(state): State<ChannelState>) -> Json<HealthResponse> {
    let height = state.manager.read().await.current_height();
    Json(HealthResponse {
        status: "ok".to_string(),
        height,
    })
}

pub async fn get_channel(
    State(state): State<ChannelState>,
    Path((sender, receiver)): Path<(AccountId, AccountId)>,
) -> Result<Json<Channel>, ApiError> {
    state
        .manager
        .read()
        .await
        .get_channel(&sender, &receiver)
        .map(Json)
        .ok_or_else(|| ChannelError::ChannelNotFound.into())
}

pub async fn get_session(
    State(state): State<ChannelState>,
    Path((sender, receiver)): Path<(AccountId, AccountId)>,
) -> Json<SessionResponse> {
    let manager = state.manager.read().await;
    Json(SessionResponse {
        last_claimed_session: manager.last_claimed_session(&sender, &receiver),
        next_nonce: manager.next_nonce(&sender, &receiver),
    })
}

pub async fn get_account(
    State(state): State<ChannelState>,
    Path(account): Path<AccountId>,
) -> Json<AccountResponse> {
    let manager = state.manager.read().await;
    Json(AccountResponse {
        account,
        free: manager.ledger().free_balance(&account),
        locked: manager.total_locked(&account),
    })
}

pub async fn statistics(State(state): State<ChannelState>) -> Json<Vec<ReceiverStats>> {
    Json(state.manager.read().await.payment_statistics())
}

pub async fn open_channel(
    State(state): State<ChannelState>,
    Extension(Signer(signer)): Extension<Signer>,
    Json(request): Json<OpenChannelRequest>,
) -> Result<Json<Channel>, ApiError> {
    request.validate(&signer)?;
    let channel = state.manager.write().await.open_channel(
        request.sender,
        request.receiver,
        request.amount,
        request.duration,
    )?;
    Ok(Json(channel))
}

pub async fn add_balance(
    State(state): State<ChannelState>,
    Extension(Signer(signer)): Extension<Signer>,
    Json(request): Json<AddBalanceRequest>,
) -> Result<Json<Channel>, ApiError> {
    request.validate(&signer)?;
    let channel = state
        .manager
        .write()
        .await
        .add_balance(request.sender, request.receiver, request.amount)?;
    Ok(Json(channel))
}

pub async fn claim_payment(
    State(state): State<ChannelState>,
    Extension(Signer(signer)): Extension<Signer>,
    Json(request): Json<ClaimPaymentRequest>,
) -> Result<Json<ClaimReceipt>, ApiError> {
    request.validate(&signer)?;
    let receipt = state.manager.write().await.claim_payment(
        request.sender,
        request.receiver,
        request.session_id,
        request.amount,
        &request.signature,
    )?;
    Ok(Json(receipt))
}

pub async fn close_channel(
    State(state): State<ChannelState>,
    Extension(Signer(signer)): Extension<Signer>,
    Json(request): Json<CloseChannelRequest>,
) -> Result<Json<ClosedChannelInfo>, ApiError> {
    request.validate(&signer)?;
    let closed = state
        .manager
        .write()
        .await
        .close_channel(signer, request.sender, request.receiver)?;
    Ok(Json(closed))
}

pub async fn close_expired_channels(
    State(state): State<ChannelState>,
    Extension(Signer(signer)): Extension<Signer>,
    Json(request): Json<CloseExpiredRequest>,
) -> Result<Json<Vec<ClosedChannelInfo>>, ApiError> {
    request.validate(&signer)?;
    let closed = state
        .manager
        .write()
        .await
        .close_expired_channels(request.caller)?;
    Ok(Json(closed))
}
