//! Credential identifiers, scope sets, and the cached access-token model.

pub mod credential;
pub mod id;
pub mod scope;
pub mod secret;
pub mod token;

pub use credential::*;
pub use id::*;
pub use scope::*;
pub use secret::*;
pub use token::*;
