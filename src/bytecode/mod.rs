//! C8 — Bytecode Canonicalizer & Matcher.

pub mod matcher;
pub mod metadata;

pub use matcher::MatchBuilder;
