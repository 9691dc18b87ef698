//! Configuration for the loading stack.
//!
//! Parsed from `stone.toml` with `STONE_*` environment variable overrides.

mod loading;
mod types;
mod validation;


pub use loading::load_dotenv;
pub use types::*;
