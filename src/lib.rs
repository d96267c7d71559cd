pub mod config;
pub mod db;
pub mod format;
pub mod scanner;
pub mod span;

pub use format::Format;
pub use span::Span;

/// Application name for XDG paths
pub const APP_NAME: &str = "tapeshelf";
