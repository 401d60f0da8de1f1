pub mod channel;
pub mod error;
pub mod request;

pub use channel::{
    AccountId, Balance, BlockNumber, Channel, ChannelEvent, ChannelKey, ClaimReceipt,
    ClosedChannelInfo, ReceiverStats, Voucher,
};
pub use error::{
    ApiError, AuthError, ChannelError, ChannelResult, ErrorBody, ServiceError, ServiceResult,
};
pub use request::{
    AddBalanceRequest, ClaimPaymentRequest, CloseChannelRequest, CloseExpiredRequest,
    OpenChannelRequest, Validate,
};
