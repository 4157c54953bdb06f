//! Runtime components for process and container management

pub mod discovery;
pub mod launcher;
pub mod process;
pub mod provision;
pub mod readiness;
pub mod registry;
pub mod session;

pub use discovery::*;
pub use launcher::*;
pub use process::*;
pub use provision::*;
pub use readiness::*;
pub use registry::*;
pub use session::*;
