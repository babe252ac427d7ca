pub mod api_key;
pub mod jwt;
pub mod password;
pub mod vault;

pub use jwt::{JwtIssuer, TokenKind, TokenPair};
pub use password::{hash_password, verify_password};
pub use vault::SecretVault;
