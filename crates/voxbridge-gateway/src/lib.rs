//! The gateway: answers the telephony media-stream WebSocket, dispatches
//! transport events, sequences synthesized playback, and cancels playback
//! on barge-in. Also exposes the REST control plane for placing and
//! inspecting calls.

pub mod connection;
pub mod dispatch;
pub mod interrupt;
pub mod playback;
pub mod server;
pub mod state;

pub use server::start_server;
pub use state::GatewayState;
