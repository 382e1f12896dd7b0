//! C3 — EVM-Target Policy.
//!
//! A pure function reconciling a requested EVM target against what a given compiler release
//! supports, over `foundry_compilers::EvmVersion` (the teacher's own target enum).

use foundry_compilers::artifacts::EvmVersion;
use semver::Version;

/// Picks the effective EVM target for `compiler_version`, honoring `requested` when the
/// compiler supports it and silently substituting the compiler's default otherwise.
///
/// Returns `(target, substituted)`; `substituted` is `true` when `requested` was present but
/// unsupported, so callers can attach an observability note (§4.3).
pub fn choose(compiler_version: &Version, requested: Option<EvmVersion>) -> (EvmVersion, bool) {
    let default = default_for(compiler_version);
    let Some(requested) = requested else {
        return (default, false);
    };
    if supports(compiler_version, requested) {
        (requested, false)
    } else {
        (default, true)
    }
}

/// Whether `compiler_version` supports `target` at all (not necessarily as its default).
pub fn supports(compiler_version: &Version, target: EvmVersion) -> bool {
    let rank = target_rank(target);
    rank <= max_supported_rank(compiler_version)
}

fn default_for(v: &Version) -> EvmVersion {
    match (v.major, v.minor, v.patch) {
        (0, 4, _) => EvmVersion::Byzantium,
        (0, 5, _) => EvmVersion::Petersburg,
        (0, 6, _) => EvmVersion::Istanbul,
        (0, 7, _) => EvmVersion::Berlin,
        (0, 8, 0) => EvmVersion::Istanbul,
        (0, 8, p) if (1..=5).contains(&p) => EvmVersion::Berlin,
        (0, 8, p) if (6..=9).contains(&p) => EvmVersion::London,
        (0, 8, p) if (10..=19).contains(&p) => EvmVersion::Paris,
        (0, 8, p) if (20..=23).contains(&p) => EvmVersion::Shanghai,
        (0, 8, _) => EvmVersion::Cancun,
        (0, minor, _) if minor >= 9 => EvmVersion::Cancun,
        (major, _, _) if major >= 1 => EvmVersion::Cancun,
        _ => EvmVersion::Istanbul,
    }
}

/// Ordinal rank of each fork relevant to §4.3's supported-target table; higher is later.
fn target_rank(target: EvmVersion) -> u8 {
    match target {
        EvmVersion::Homestead => 0,
        EvmVersion::TangerineWhistle => 1,
        EvmVersion::SpuriousDragon => 2,
        EvmVersion::Byzantium => 3,
        EvmVersion::Constantinople => 4,
        EvmVersion::Petersburg => 5,
        EvmVersion::Istanbul => 6,
        EvmVersion::Berlin => 7,
        EvmVersion::London => 8,
        EvmVersion::Paris => 9,
        EvmVersion::Shanghai => 10,
        EvmVersion::Cancun => 11,
        _ => 11,
    }
}

fn max_supported_rank(v: &Version) -> u8 {
    target_rank(default_for(v)).max(match (v.major, v.minor, v.patch) {
        (0, 4, _) => target_rank(EvmVersion::Byzantium),
        (0, 5, _) => target_rank(EvmVersion::Petersburg),
        (0, 6, _) => target_rank(EvmVersion::Istanbul),
        (0, 7, _) => target_rank(EvmVersion::Berlin),
        _ => target_rank(default_for(v)),
    })
}
