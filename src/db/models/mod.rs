//! Database models split into domain-specific modules.

pub mod common;
pub mod message;
pub mod reservation;
pub mod user;
pub mod venue;

pub use common::*;
pub use message::*;
pub use reservation::*;
pub use user::*;
pub use venue::*;
