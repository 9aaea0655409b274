mod id_token;
mod manager;

pub use id_token::IdTokenVerifier;
pub use manager::{TokenManager, REFRESH_MARGIN_SECS};
