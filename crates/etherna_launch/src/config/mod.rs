//! Session configuration

mod session;

pub use session::*;
