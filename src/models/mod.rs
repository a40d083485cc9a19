pub mod chain;
pub mod common;
pub mod definitions;
pub mod errors;
pub mod events;
