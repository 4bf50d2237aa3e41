//! # chat-client-common
//!
//! Shared utilities for the chat client: configuration, error types,
//! telemetry setup, and protocol value objects.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod value_objects;

// Re-export commonly used types at crate root
pub use config::{ClientConfig, ConfigError};
pub use error::LimitError;
pub use telemetry::{
    init_tracing, init_tracing_with_config, try_init_tracing, try_init_tracing_with_config,
    TracingConfig, TracingError,
};
pub use value_objects::{Intents, Snowflake, SnowflakeParseError};
