//! syshook-callbacks: the syscall callback table
//!
//! Callbacks are keyed by (syscall number, phase). The registry is generic over
//! the executable callback type so it carries no dependency on the scripting VM;
//! [`CallbackInfo`] is the structured description controllers see.

pub mod declaration;
pub mod info;
pub mod registry;

pub use declaration::{find_declaration, Declaration};
pub use info::{conventional_entry_point, CallbackInfo};
pub use registry::CallbackRegistry;
