//! Utility modules and helper functions
//!
//! Shared helpers used across the application.

pub mod logging;
pub mod validation;

// Re-export commonly used utilities
pub use logging::init_tracing;
pub use validation::{is_playlist_url, is_valid_preset_name, validate_media_url};
