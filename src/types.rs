//! Core data model (`spec.md` §3).

use crate::error::Diagnostic;
use std::collections::BTreeMap;

/// A named byte sequence as referenced by imports. Names are slash-separated logical paths.
pub type SourceName = String;

/// A mapping from source-unit name to its UTF-8 content. Keys are unique and case-sensitive;
/// two different names may alias the same content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceBundle {
    units: BTreeMap<SourceName, String>,
    insertion_order: Vec<SourceName>,
}

impl SourceBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<SourceName>, content: impl Into<String>) -> &mut Self {
        let name = name.into();
        if !self.units.contains_key(&name) {
            self.insertion_order.push(name.clone());
        }
        self.units.insert(name, content.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.units.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.units.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.units.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.units.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.units.values().map(|c| c.len() as u64).sum()
    }

    /// The name inserted first, used as a last-resort entry-unit fallback (§3).
    pub fn first_inserted(&self) -> Option<&str> {
        self.insertion_order.first().map(String::as_str)
    }

    /// Locates the entry unit by matching `contract_name` against a `<Name>.sol` unit name,
    /// falling back to scanning for a `contract <Name>` declaration, per §3.
    pub fn detect_entry_unit(&self, contract_name: &str) -> Option<&str> {
        let by_name = format!("{contract_name}.sol");
        if self.units.contains_key(&by_name) {
            return Some(self.units.keys().find(|k| *k == &by_name).unwrap().as_str());
        }
        let declaration = format!("contract {contract_name}");
        if let Some((name, _)) = self
            .insertion_order
            .iter()
            .filter_map(|n| self.units.get(n).map(|c| (n, c)))
            .find(|(_, content)| content.contains(&declaration))
        {
            return Some(name.as_str());
        }
        self.first_inserted()
    }
}

/// A Compiler Descriptor: a resolved, canonical compiler release (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerDescriptor {
    pub version: semver::Version,
    pub canonical_build_id: String,
    pub source_url: url::Url,
}

/// Hex-encoded (no `0x` prefix) deploy and runtime bytecode plus compiler-emitted metadata,
/// produced by one successful compilation (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationArtifact {
    pub abi: serde_json::Value,
    pub deploy_bytecode: String,
    pub runtime_bytecode: String,
    pub metadata_json: String,
    pub main_unit_name: String,
    pub was_flattened: bool,
    pub warnings: Vec<Diagnostic>,
    pub source_map: Option<String>,
    /// Hex-char `[start, end)` ranges of unlinked library placeholders in `runtime_bytecode`,
    /// from the compiler's own `linkReferences` output.
    pub library_offsets: Vec<(usize, usize)>,
}

/// Sub-cause attached to a [`Verdict::Mismatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchReason {
    BodiesDiffer,
    MetadataEqualBodiesDiffer,
}

/// The outcome of one verification request (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Verified {
        abi: serde_json::Value,
        metadata: String,
        /// Hex-encoded (no `0x` prefix) runtime bytecode that was verified.
        bytecode: String,
        flattened: bool,
        /// Non-fatal notes attached alongside a successful match, e.g. a solc-version
        /// cross-check discrepancy between the embedded metadata and the compiler used.
        notes: Vec<String>,
    },
    Mismatch {
        reason: MismatchReason,
    },
    InputInvalid {
        message: String,
    },
    CompilationFailed {
        diagnostics: Vec<Diagnostic>,
    },
}

impl Verdict {
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Verified { .. } => "VERIFIED",
            Verdict::Mismatch { .. } => "MISMATCH",
            Verdict::InputInvalid { .. } => "INPUT_INVALID",
            Verdict::CompilationFailed { .. } => "COMPILATION_FAILED",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Verdict::Verified { .. } => "bytecode verified".to_string(),
            Verdict::Mismatch {
                reason: MismatchReason::BodiesDiffer,
            } => "compiled bytecode body does not match on-chain bytecode".to_string(),
            Verdict::Mismatch {
                reason: MismatchReason::MetadataEqualBodiesDiffer,
            } => {
                "metadata hashes match but bytecode bodies differ (likely library linking or \
                 constructor argument mismatch)"
                    .to_string()
            }
            Verdict::InputInvalid { message } => message.clone(),
            Verdict::CompilationFailed { diagnostics } => diagnostics
                .iter()
                .find(|d| d.is_fatal())
                .map(|d| d.message.clone())
                .unwrap_or_else(|| "compilation failed".to_string()),
        }
    }
}

/// Conceptual verification request (§6). Transport/serialization is left to collaborators;
/// this type is what a collaborator HTTP layer would deserialize into.
#[derive(Debug, Clone)]
pub struct VerifyRequest {
    /// Hex-encoded (optional `0x` prefix tolerated).
    pub address: String,
    /// Hex-encoded (optional `0x` prefix tolerated).
    pub on_chain_bytecode: String,
    pub source: SourceInput,
    pub contract_name: String,
    pub compiler_version: String,
    pub optimization_used: bool,
    pub runs: u32,
    pub evm_version: Option<String>,
    /// Hex-encoded (optional `0x` prefix tolerated).
    pub constructor_arguments: Option<String>,
    pub libraries: BTreeMap<String, String>,
    pub import_mappings: BTreeMap<String, String>,
    pub auto_flatten: bool,
}

#[derive(Debug, Clone)]
pub enum SourceInput {
    SingleUnit(String),
    MultiUnit(BTreeMap<String, String>),
}

impl Default for VerifyRequest {
    fn default() -> Self {
        Self {
            address: String::new(),
            on_chain_bytecode: String::new(),
            source: SourceInput::MultiUnit(BTreeMap::new()),
            contract_name: String::new(),
            compiler_version: String::new(),
            optimization_used: false,
            runs: 200,
            evm_version: None,
            constructor_arguments: None,
            libraries: BTreeMap::new(),
            import_mappings: BTreeMap::new(),
            auto_flatten: false,
        }
    }
}
