//! Network Layer
//!
//! Client protocol, request routing, identity and the live feed.
//! Nothing here holds battle state; it all goes through `battle/`.

pub mod auth;
pub mod dispatch;
pub mod feed;
pub mod protocol;

pub use auth::{AuthConfig, AuthError, Identity, IdentityResolver, JwtIdentity, StaticIdentity, TokenClaims};
pub use dispatch::Dispatcher;
pub use feed::{BroadcastFeed, FeedEvent, LiveFeed};
pub use protocol::{ClientMessage, Response};
