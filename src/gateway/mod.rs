//! Gateway server implementation

pub mod auth;
pub mod channel;
mod router;
mod server;
pub mod session;

pub use auth::{Authenticator, Caller};
pub use channel::{ChannelReply, ToolChannel};
pub use router::{AppState, create_router};
pub use server::Gateway;
pub use session::{SESSION_HEADER, Session, SessionMultiplexer};
