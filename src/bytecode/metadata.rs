//! Thin wrapper around the real `solidity_metadata::MetadataHash` CBOR decoder for the
//! auxiliary solc-version cross-check described in `SPEC_FULL.md`'s supplemented features.
//!
//! Takes hex text rather than decoded bytes, matching the hex-based bytecode representation
//! used throughout this crate (see `bytecode::matcher`'s module doc for why).

/// The solc version embedded in a bytecode's trailing CBOR metadata, if decodable.
pub fn embedded_solc_version(runtime_bytecode_hex: &str) -> Option<semver::Version> {
    let hex = runtime_bytecode_hex.strip_prefix("0x").unwrap_or(runtime_bytecode_hex);
    let bytes = hex::decode(hex).ok()?;
    // The CBOR map is itself prefixed by a two-byte big-endian length just before the end of
    // the bytecode; solidity-metadata decodes from the start of the map, so walk backwards
    // trying decreasing prefixes is unnecessary: the crate decodes from the full trailing
    // slice and reports how many bytes it consumed.
    let (hash, _consumed) = solidity_metadata::MetadataHash::from_cbor(&bytes).ok()?;
    hash.solc
}

/// Cross-checks the solc version embedded in `runtime_bytecode_hex`'s metadata against the
/// compiler version actually used, surfacing a non-fatal note rather than failing the match.
pub fn cross_check(runtime_bytecode_hex: &str, used_compiler: &semver::Version) -> Option<String> {
    let embedded = embedded_solc_version(runtime_bytecode_hex)?;
    if &embedded != used_compiler {
        Some(format!(
            "embedded metadata reports solc {embedded}, compilation used {used_compiler}"
        ))
    } else {
        None
    }
}
