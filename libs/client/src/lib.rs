//! Client side of the Teamboard sync engine.
//!
//! A [`SyncController`] keeps one project's [`ProjectView`] in step with the
//! server: it hydrates over REST through a [`Hydrator`], joins the project
//! room over a [`Transport`], applies live events, and re-joins after every
//! reconnect.

pub mod controller;
pub mod error;
pub mod hydrate;
pub mod transport;
pub mod view;

pub use controller::{ResyncPolicy, SyncController, SyncState};
pub use error::{ClientError, ClientResult};
pub use hydrate::{Hydrator, RestHydrator, Snapshot};
pub use transport::{Transport, TransportConfig, TransportEvent, WsTransport};
pub use view::ProjectView;
