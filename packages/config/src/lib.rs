// ABOUTME: Shared configuration constants for Codebox
// ABOUTME: Environment variable names and the defaults applied when they are absent

pub mod constants;

pub use constants::*;
