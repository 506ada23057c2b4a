pub mod error;
pub mod fanout;
pub mod handlers;
pub mod oracle;
pub mod presence;
pub mod rooms;
pub mod router;
pub mod server;
pub mod session;

pub use error::GatewayError;
pub use fanout::Fanout;
pub use oracle::{Grant, MembershipOracle};
pub use presence::PresenceTracker;
pub use rooms::{RoomKey, RoomRegistry};
