pub mod session;
pub mod verifier;

pub use session::{SessionToken, SessionTokens};
pub use verifier::{
    message_timestamp, recover_address, verify_wallet_signature, SignatureVerifier,
};
