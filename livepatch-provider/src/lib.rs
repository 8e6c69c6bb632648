//! # livepatch-provider
//!
//! Bridge to the remapping provider: the [`Provider`] capability the reload
//! loop depends on, the C ABI it is reached through, and [`DylibProvider`],
//! which resolves that ABI from a shared library once at startup.

pub mod abi;
pub mod dylib;
pub mod error;
pub mod log_bridge;
pub mod provider;
pub mod reloadee;

pub use dylib::{probe, DylibProvider, ProviderApi, SymbolStatus};
pub use error::ProviderError;
pub use provider::Provider;
pub use reloadee::Reloadee;
