//! Scout core library: candidate collection, scoring, safe resolution, and caching.
//!
//! The main entry point is [`discovery::DiscoveryEngine`], which finds code
//! matching a [`scout_lang::Signature`] anywhere under a project root using
//! the plugins in a [`registry::PluginRegistry`].

pub mod assembler;
pub mod cache;
pub mod candidate;
pub mod config;
pub mod discovery;
pub mod error;
pub mod evaluator;
pub mod loader;
pub mod registry;
pub mod scoring;

pub use discovery::{CollectReport, DiscoveryEngine};
pub use error::{DiscoveryError, Result};
pub use scout_lang::{Kind, ResolvedTarget, Signature, SignatureInput};
