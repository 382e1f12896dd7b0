//! C5 — Flattener.
//!
//! Pure, no I/O beyond what the caller's [`Vfs`] already performed at `install` time.

use crate::{types::SourceBundle, vfs::Vfs};
use std::collections::{HashMap, HashSet};

lazy_static::lazy_static! {
    static ref LICENSE_RE: regex::Regex =
        regex::Regex::new(r"(?m)^\s*//\s*SPDX-License-Identifier:.*$").unwrap();
    static ref PRAGMA_RE: regex::Regex =
        regex::Regex::new(r"(?m)^\s*pragma\s+solidity\s+[^;]*;\s*$").unwrap();
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlattenOutcome {
    pub flattened: String,
    /// Non-fatal notes, e.g. a broken import cycle.
    pub warnings: Vec<String>,
}

/// Produces a single source unit equivalent to `bundle` under "all imports inlined" per §4.5.
pub fn flatten(
    vfs: &Vfs,
    bundle: &SourceBundle,
    entry_unit: &str,
    default_license: &str,
    default_pragma: &str,
) -> FlattenOutcome {
    let mut warnings = Vec::new();
    let order = topological_order(vfs, bundle, entry_unit, &mut warnings);

    let (license, pragma) = extract_directives(bundle.get(entry_unit).unwrap_or(""))
        .unwrap_or_else(|| (default_license.to_string(), default_pragma.to_string()));

    let mut body = String::new();
    for unit_name in &order {
        if let Some(content) = bundle.get(unit_name) {
            let stripped = strip_directives(content);
            let trimmed = stripped.trim();
            if !trimmed.is_empty() {
                body.push_str(trimmed);
                body.push('\n');
            }
        }
    }

    let mut flattened = String::new();
    if !license.is_empty() {
        flattened.push_str(license.trim());
        flattened.push('\n');
    }
    if !pragma.is_empty() {
        flattened.push_str(pragma.trim());
        flattened.push('\n');
    }
    flattened.push_str(&body);

    if !flattened.ends_with('\n') {
        flattened.push('\n');
    }
    while flattened.ends_with("\n\n") {
        flattened.pop();
    }
    if !flattened.ends_with('\n') {
        flattened.push('\n');
    }

    FlattenOutcome {
        flattened,
        warnings,
    }
}

/// Builds its own flat dependency graph and DFS order rather than routing through
/// `Vfs::resolve_transitive`: a cycle here must be broken and flagged as a warning so
/// flattening still produces output, whereas `resolve_transitive` hard-fails a real
/// compilation on the same cycle. The two callers want opposite behavior from the same
/// shape of cycle, so they carry separate cycle-tracking rather than sharing one.
fn topological_order(
    vfs: &Vfs,
    bundle: &SourceBundle,
    entry_unit: &str,
    warnings: &mut Vec<String>,
) -> Vec<String> {
    let mut graph: HashMap<String, Vec<String>> = HashMap::new();
    let mut discovered = vec![entry_unit.to_string()];
    let mut seen: HashSet<String> = discovered.iter().cloned().collect();

    let mut frontier = discovered.clone();
    while let Some(unit_name) = frontier.pop() {
        let content = match bundle.get(&unit_name) {
            Some(c) => c,
            None => continue,
        };
        let mut deps = Vec::new();
        for import_ref in Vfs::extract_imports(content) {
            if let Ok(resolved) = vfs.resolve(&import_ref) {
                deps.push(resolved.name.clone());
                if seen.insert(resolved.name.clone()) {
                    discovered.push(resolved.name.clone());
                    frontier.push(resolved.name);
                }
            }
        }
        deps.sort();
        graph.insert(unit_name, deps);
    }

    let mut visited: HashSet<String> = HashSet::new();
    let mut in_progress: HashSet<String> = HashSet::new();
    let mut order = Vec::new();
    let mut sorted_roots = discovered.clone();
    sorted_roots.sort();

    for root in sorted_roots {
        visit(
            &root,
            &graph,
            &mut visited,
            &mut in_progress,
            &mut order,
            warnings,
        );
    }

    order
}

fn visit(
    unit_name: &str,
    graph: &HashMap<String, Vec<String>>,
    visited: &mut HashSet<String>,
    in_progress: &mut HashSet<String>,
    order: &mut Vec<String>,
    warnings: &mut Vec<String>,
) {
    if visited.contains(unit_name) {
        return;
    }
    if !in_progress.insert(unit_name.to_string()) {
        warnings.push(format!("import cycle broken at '{unit_name}'"));
        return;
    }
    if let Some(deps) = graph.get(unit_name) {
        for dep in deps {
            visit(dep, graph, visited, in_progress, order, warnings);
        }
    }
    in_progress.remove(unit_name);
    visited.insert(unit_name.to_string());
    order.push(unit_name.to_string());
}

fn extract_directives(entry_content: &str) -> Option<(String, String)> {
    let license = LICENSE_RE.find(entry_content).map(|m| m.as_str().to_string());
    let pragma = PRAGMA_RE.find(entry_content).map(|m| m.as_str().to_string());
    match (license, pragma) {
        (None, None) => None,
        (license, pragma) => Some((license.unwrap_or_default(), pragma.unwrap_or_default())),
    }
}

fn strip_directives(content: &str) -> String {
    let without_license = LICENSE_RE.replace_all(content, "");
    PRAGMA_RE.replace_all(&without_license, "").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(pairs: &[(&str, &str)]) -> SourceBundle {
        let mut bundle = SourceBundle::new();
        for (name, content) in pairs {
            bundle.insert(*name, *content);
        }
        bundle
    }

    #[test]
    fn inlines_single_import_in_topo_order() {
        let b = bundle(&[
            (
                "Main.sol",
                "// SPDX-License-Identifier: MIT\npragma solidity ^0.8.20;\nimport \"./lib/L.sol\";\ncontract A is L {}",
            ),
            ("lib/L.sol", "contract L {}"),
        ]);
        let mut vfs = Vfs::new();
        vfs.install(&b);

        let outcome = flatten(&vfs, &b, "Main.sol", "// SPDX-License-Identifier: MIT", "pragma solidity ^0.8.20;");

        assert!(outcome.warnings.is_empty());
        let l_pos = outcome.flattened.find("contract L").unwrap();
        let a_pos = outcome.flattened.find("contract A").unwrap();
        assert!(l_pos < a_pos, "dependency must precede dependent");
        assert_eq!(outcome.flattened.matches("SPDX-License-Identifier").count(), 1);
        assert_eq!(outcome.flattened.matches("pragma solidity").count(), 1);
        assert!(outcome.flattened.ends_with('\n'));
        assert!(!outcome.flattened.ends_with("\n\n"));
    }

    #[test]
    fn is_a_fixed_point_under_repeated_flattening() {
        let b = bundle(&[
            (
                "Main.sol",
                "// SPDX-License-Identifier: MIT\npragma solidity ^0.8.20;\nimport \"./lib/L.sol\";\ncontract A is L {}",
            ),
            ("lib/L.sol", "contract L {}"),
        ]);
        let mut vfs = Vfs::new();
        vfs.install(&b);

        let first = flatten(&vfs, &b, "Main.sol", "// SPDX-License-Identifier: MIT", "pragma solidity ^0.8.20;");

        let mut once_bundle = SourceBundle::new();
        once_bundle.insert("Main.sol", first.flattened.clone());
        let mut vfs2 = Vfs::new();
        vfs2.install(&once_bundle);
        let second = flatten(
            &vfs2,
            &once_bundle,
            "Main.sol",
            "// SPDX-License-Identifier: MIT",
            "pragma solidity ^0.8.20;",
        );

        assert_eq!(first.flattened, second.flattened);
    }

    #[test]
    fn breaks_cycles_deterministically_and_warns() {
        let b = bundle(&[
            ("A.sol", "import \"./B.sol\"; contract A {}"),
            ("B.sol", "import \"./A.sol\"; contract B {}"),
        ]);
        let mut vfs = Vfs::new();
        vfs.install(&b);

        let outcome = flatten(&vfs, &b, "A.sol", "", "");
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.flattened.contains("contract A"));
        assert!(outcome.flattened.contains("contract B"));
    }
}
