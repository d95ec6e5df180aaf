pub mod hosted;
pub mod scripted;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use hosted::{HostedBackend, HostedConfig};
pub use scripted::ScriptedBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
