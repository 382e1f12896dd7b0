//! C6 — Compilation Driver.
//!
//! Builds the Standard-JSON input described in `spec.md` §4.6, pre-resolving the transitive
//! import closure through the VFS instead of a live callback (see `SPEC_FULL.md` §9 — native
//! `solc` has no host-callback mechanism over its `--standard-json` stdio protocol).

use crate::{
    compiler_store::{CompilerBackend, Handle},
    error::{Diagnostic, VfsError},
    types::SourceBundle,
    vfs::Vfs,
};
use foundry_compilers::artifacts::EvmVersion;
use std::collections::BTreeMap;

/// Bytecode-hash metadata options tried in order when the caller does not pin one down,
/// mirroring the teacher's `settings_metadata()` (`SPEC_FULL.md`'s supplemented features).
const BYTECODE_HASH_OPTIONS: &[&str] = &["ipfs", "bzzr1", "none"];

#[derive(Debug, Clone)]
pub struct CompileRequest<'a> {
    pub bundle: &'a SourceBundle,
    pub entry_unit: &'a str,
    pub contract_name: &'a str,
    pub optimizer_enabled: bool,
    pub optimizer_runs: u32,
    pub libraries: &'a BTreeMap<String, String>,
    pub evm_target: EvmVersion,
    pub import_overlay: &'a BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct CompileOutcome {
    pub abi: serde_json::Value,
    /// Hex-encoded (no `0x` prefix); may contain unlinked `__$...$__` library placeholders.
    pub deploy_bytecode: String,
    /// Hex-encoded (no `0x` prefix); may contain unlinked `__$...$__` library placeholders.
    pub runtime_bytecode: String,
    pub metadata_json: String,
    pub source_map: Option<String>,
    pub diagnostics: Vec<Diagnostic>,
    /// Hex-char `[start, end)` ranges of unlinked library placeholders, read from the
    /// compiler's own `evm.deployedBytecode.linkReferences` (byte offsets doubled to hex-char
    /// offsets), per §4.8 step 3's library-placement-map clause.
    pub library_offsets: Vec<(usize, usize)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// At least one compiler diagnostic of severity `error`, or the binary itself failed.
    Diagnostics(Vec<Diagnostic>),
    /// The named contract was not present in any compiled unit.
    ContractNotPresent,
}

/// Resolves the transitive import closure of `entry_unit` (folding `import_overlay` entries
/// into the VFS first), builds Standard-JSON, invokes `handle`, and extracts the named
/// contract's artifact.
pub fn compile(handle: &Handle, request: &CompileRequest<'_>) -> Result<CompileOutcome, CompileError> {
    let mut overlay_bundle = request.bundle.clone();
    for (name, content) in request.import_overlay {
        overlay_bundle.insert(name.clone(), content.clone());
    }

    let mut vfs = Vfs::new();
    vfs.install(&overlay_bundle);

    let sources = resolve_closure(&vfs, &overlay_bundle, request.entry_unit).map_err(|err| {
        CompileError::Diagnostics(vec![Diagnostic::error(err.to_string())])
    })?;

    let mut last_err = None;
    for bytecode_hash in BYTECODE_HASH_OPTIONS {
        let input = build_standard_json(request, &sources, bytecode_hash);
        match invoke(handle, &input) {
            Ok(output) => return extract(&output, request.entry_unit, request.contract_name),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or(CompileError::ContractNotPresent))
}

/// Resolves `entry_unit`'s transitive import closure through `vfs.resolve_transitive`, which
/// nests resolution on the call stack so a real import cycle surfaces as `VfsError::Circular`
/// instead of being silently absorbed by a flat visited-set (as a naive worklist would).
fn resolve_closure(
    vfs: &Vfs,
    bundle: &SourceBundle,
    entry_unit: &str,
) -> Result<BTreeMap<String, String>, VfsError> {
    let mut sources = BTreeMap::new();
    if let Some(content) = bundle.get(entry_unit) {
        sources.insert(entry_unit.to_string(), content.to_string());
    }

    for resolved in vfs.resolve_transitive(entry_unit)? {
        sources.entry(resolved.name).or_insert(resolved.content);
    }

    // Multi-unit requests may reference units the entry never imports; include them too so a
    // caller-specified main file still compiles standalone units bundled alongside it.
    for (name, content) in bundle.iter() {
        sources.entry(name.to_string()).or_insert_with(|| content.to_string());
    }

    Ok(sources)
}

fn build_standard_json(
    request: &CompileRequest<'_>,
    sources: &BTreeMap<String, String>,
    bytecode_hash: &str,
) -> serde_json::Value {
    let mut sources_json = serde_json::Map::new();
    for (name, content) in sources {
        sources_json.insert(
            name.clone(),
            serde_json::json!({ "content": content }),
        );
    }

    serde_json::json!({
        "language": "Solidity",
        "sources": sources_json,
        "settings": {
            "optimizer": {
                "enabled": request.optimizer_enabled,
                "runs": request.optimizer_runs,
            },
            "libraries": placement_map(request.libraries, request.entry_unit),
            "evmVersion": evm_version_str(request.evm_target),
            "metadata": { "bytecodeHash": bytecode_hash },
            "outputSelection": {
                "*": {
                    "*": ["abi", "evm.bytecode.object", "evm.deployedBytecode.object",
                          "evm.deployedBytecode.sourceMap", "metadata"]
                }
            }
        }
    })
}

/// Places each `"Name" -> 0x..."` entry per §4.6: `File:Name` keys split on `:`, bare names
/// are placed under the entry unit.
fn placement_map(
    libraries: &BTreeMap<String, String>,
    entry_unit: &str,
) -> serde_json::Value {
    let mut by_file: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    for (key, address) in libraries {
        let (file, name) = match key.split_once(':') {
            Some((file, name)) => (file.to_string(), name.to_string()),
            None => (entry_unit.to_string(), key.clone()),
        };
        by_file.entry(file).or_default().insert(name, address.clone());
    }
    serde_json::to_value(by_file).unwrap_or(serde_json::json!({}))
}

fn evm_version_str(target: EvmVersion) -> &'static str {
    match target {
        EvmVersion::Homestead => "homestead",
        EvmVersion::TangerineWhistle => "tangerineWhistle",
        EvmVersion::SpuriousDragon => "spuriousDragon",
        EvmVersion::Byzantium => "byzantium",
        EvmVersion::Constantinople => "constantinople",
        EvmVersion::Petersburg => "petersburg",
        EvmVersion::Istanbul => "istanbul",
        EvmVersion::Berlin => "berlin",
        EvmVersion::London => "london",
        EvmVersion::Paris => "paris",
        EvmVersion::Shanghai => "shanghai",
        EvmVersion::Cancun => "cancun",
        _ => "cancun",
    }
}

fn invoke(
    handle: &impl CompilerBackend,
    input: &serde_json::Value,
) -> Result<serde_json::Value, CompileError> {
    let output = handle
        .compile(input)
        .map_err(|err| CompileError::Diagnostics(vec![Diagnostic::error(err.to_string())]))?;

    let diagnostics = parse_diagnostics(&output);
    if diagnostics.iter().any(Diagnostic::is_fatal) {
        return Err(CompileError::Diagnostics(diagnostics));
    }
    Ok(output)
}

fn parse_diagnostics(output: &serde_json::Value) -> Vec<Diagnostic> {
    output
        .get("errors")
        .and_then(|v| v.as_array())
        .map(|errors| {
            errors
                .iter()
                .map(|e| {
                    let message = e
                        .get("formattedMessage")
                        .or_else(|| e.get("message"))
                        .and_then(|m| m.as_str())
                        .unwrap_or("compiler error")
                        .to_string();
                    let severity = e.get("severity").and_then(|s| s.as_str()).unwrap_or("error");
                    if severity == "warning" {
                        Diagnostic::warning(message)
                    } else {
                        Diagnostic::error(message)
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

fn extract(
    output: &serde_json::Value,
    entry_unit: &str,
    contract_name: &str,
) -> Result<CompileOutcome, CompileError> {
    let diagnostics = parse_diagnostics(output);
    let contracts = output.get("contracts").and_then(|v| v.as_object());

    let contract_json = contracts.and_then(|contracts| {
        contracts
            .get(entry_unit)
            .and_then(|unit| unit.get(contract_name))
            .or_else(|| {
                contracts.values().find_map(|unit| unit.get(contract_name))
            })
    });

    let Some(contract_json) = contract_json else {
        return Err(CompileError::ContractNotPresent);
    };

    let abi = contract_json.get("abi").cloned().unwrap_or(serde_json::json!([]));
    let deploy_hex = contract_json
        .pointer("/evm/bytecode/object")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let runtime_hex = contract_json
        .pointer("/evm/deployedBytecode/object")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let source_map = contract_json
        .pointer("/evm/deployedBytecode/sourceMap")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let metadata_json = contract_json
        .get("metadata")
        .map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_default();
    let library_offsets = link_reference_offsets(contract_json);

    Ok(CompileOutcome {
        abi,
        deploy_bytecode: deploy_hex.trim_start_matches("0x").to_string(),
        runtime_bytecode: runtime_hex.trim_start_matches("0x").to_string(),
        metadata_json,
        source_map,
        diagnostics,
        library_offsets,
    })
}

/// Reads `evm.deployedBytecode.linkReferences` (`{file: {libraryName: [{start, length}]}}`,
/// byte offsets) and converts each entry to a hex-char `[start, end)` range.
fn link_reference_offsets(contract_json: &serde_json::Value) -> Vec<(usize, usize)> {
    let Some(by_file) = contract_json
        .pointer("/evm/deployedBytecode/linkReferences")
        .and_then(|v| v.as_object())
    else {
        return Vec::new();
    };

    let mut offsets = Vec::new();
    for by_name in by_file.values().filter_map(|v| v.as_object()) {
        for entries in by_name.values().filter_map(|v| v.as_array()) {
            for entry in entries {
                let start = entry.get("start").and_then(|v| v.as_u64());
                let length = entry.get("length").and_then(|v| v.as_u64());
                if let (Some(start), Some(length)) = (start, length) {
                    let hex_start = start as usize * 2;
                    let hex_end = hex_start + length as usize * 2;
                    offsets.push((hex_start, hex_end));
                }
            }
        }
    }
    offsets
}
