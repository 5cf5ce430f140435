//! TCP transport: relay server, session relay and client.

pub mod client;
pub mod companion;
pub mod server;
pub mod session;

pub use client::{ClientEvent, RelayClient};
pub use companion::{select_ready, Companion};
pub use server::RelayServer;
pub use session::{Session, SessionEnd};
