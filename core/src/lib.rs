/// Haggle - marketplace chat synchronization engine
///
/// Keeps buyer/seller conversation rooms in sync: paginated history merged
/// with a live push stream, optimistic sends reconciled against server
/// echoes, per-peer read floors, and room departure, over a live channel
/// with a request/response fallback.

pub mod error;
pub mod config;
pub mod chat_types;
pub mod normalize;
pub mod utils;
pub mod service;
pub mod http_service;
pub mod transport;
pub mod room_directory;
pub mod message_cache;
pub mod read_tracker;
pub mod engine;
pub mod render_api;

pub use error::{ChatError, Result};
pub use config::EngineConfig;
pub use engine::{ChatEngine, Draft};
