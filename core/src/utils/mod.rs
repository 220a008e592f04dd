/// Utility modules
pub mod event_log;
