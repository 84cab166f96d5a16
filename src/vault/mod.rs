//! Vault capability providers
//!
//! Notes, installed extensions, task lines and templates of a vault on disk,
//! exposed to the registry through [`discover`].

pub mod discovery;
pub mod notes;
pub mod plugins;
pub mod tasks;
pub mod templates;

pub use discovery::{discover, registry_for, HostEnvironment};
pub use notes::Vault;
