mod infomaniak;
mod traits;

pub use infomaniak::InfomaniakProvider;
pub use traits::{OAuthProvider, TokenSet};
