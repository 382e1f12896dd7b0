//! Re-compiles a submitted Solidity source bundle with an authoritative compiler release and
//! decides whether the produced bytecode matches an on-chain artifact.
//!
//! This crate is a library with no HTTP surface, database, RPC client, or UI: those are
//! external collaborators. A caller constructs a [`Verifier`] with an [`EngineConfig`] and
//! calls [`Verifier::verify`] once per request.

pub mod bytecode;
pub mod compile;
pub mod compile_cache;
pub mod compiler_store;
pub mod config;
pub mod error;
pub mod evm_target;
pub mod flatten;
pub mod types;
pub mod verifier;
pub mod version_catalog;
pub mod vfs;

pub use config::EngineConfig;
pub use error::VerifierError;
pub use types::{CompilationArtifact, CompilerDescriptor, SourceBundle, SourceInput, Verdict, VerifyRequest};
pub use verifier::Verifier;
