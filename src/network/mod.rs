//! Network Layer
//!
//! WebSocket submission interface to the voting ledger. Authority calls are
//! JWT-authenticated; vote submission and inclusion queries are anonymous.

pub mod auth;
pub mod protocol;
pub mod server;

pub use auth::{authenticate, validate_token, AuthConfig, AuthError, TokenClaims};
pub use protocol::{ErrorCode, ErrorResponse, Request, Response};
pub use server::{handle_request, ConnectionState, GatewayConfig, GatewayError, LedgerGateway};
