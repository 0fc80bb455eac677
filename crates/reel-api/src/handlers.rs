//! Request handlers.

pub mod health;
pub mod scenes;
pub mod scripts;

pub use health::*;
pub use scenes::*;
pub use scripts::*;
