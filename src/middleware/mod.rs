pub mod auth;

pub use auth::{
    auth_middleware, Signer, MAX_REQUEST_BODY, SIGNATURE_HEADER, SIGNER_HEADER, TIMESTAMP_HEADER,
};
