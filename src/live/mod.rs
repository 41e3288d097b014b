pub mod models;
pub use models::*;

mod broadcaster;
pub use broadcaster::*;

mod registry;
pub use registry::*;

mod sse;
mod ws;

pub use sse::live_events_sse;
pub use ws::websocket_handler;
