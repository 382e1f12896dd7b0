//! C4 — Virtual Filesystem.
//!
//! One instance per verification request (`spec.md` §9's explicit redesign note against a
//! shared singleton with `clearMappings()` between requests — this type has no such method,
//! a fresh instance is constructed per request instead).

use crate::{error::VfsError, types::SourceBundle};
use parking_lot::Mutex;
use regex::Regex;
use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};

lazy_static::lazy_static! {
    static ref IMPORT_RE: Regex = Regex::new(
        r#"import\s*(?:\{[^}]*\}\s*from\s*)?["']([^"']+)["']"#
    ).unwrap();
}

/// A resolved import: its content plus the installed name it was found under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub name: String,
    pub content: String,
}

/// Indexes a [`SourceBundle`] and answers import lookups per the five-strategy precedence
/// chain in §4.4, with circular-resolution detection via an in-flight set.
pub struct Vfs {
    entries: HashMap<String, String>,
    package_roots: HashSet<String>,
    disk_base: Option<PathBuf>,
    in_flight: Mutex<HashSet<String>>,
}

impl Vfs {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            package_roots: HashSet::new(),
            disk_base: None,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Allows strategy 5 (disk fallback) against `base`, never traversing above it.
    pub fn with_disk_fallback(mut self, base: PathBuf) -> Self {
        self.disk_base = Some(base);
        self
    }

    /// Clears prior state and indexes `bundle`, inserting the five alias entries per name
    /// described in §4.4.
    pub fn install(&mut self, bundle: &SourceBundle) {
        self.entries.clear();
        self.package_roots.clear();

        for (name, content) in bundle.iter() {
            self.entries.insert(name.to_string(), content.to_string());

            if let Some(stripped) = name.strip_suffix(".sol") {
                self.entries.entry(stripped.to_string()).or_insert_with(|| content.to_string());
            } else {
                self.entries
                    .entry(format!("{name}.sol"))
                    .or_insert_with(|| content.to_string());
            }

            if let Some(basename) = name.rsplit('/').next() {
                self.entries
                    .entry(basename.to_string())
                    .or_insert_with(|| content.to_string());
            }

            let normalized = normalize(name);
            if normalized != name {
                self.entries
                    .entry(normalized)
                    .or_insert_with(|| content.to_string());
            }

            if let Some(root) = name.strip_prefix('@').and_then(|rest| rest.split('/').next()) {
                self.package_roots.insert(format!("@{root}"));
            }
        }
    }

    /// Resolves `reference` per the five-strategy precedence chain, guarding against
    /// circular resolution via the in-flight set.
    pub fn resolve(&self, reference: &str) -> Result<Resolved, VfsError> {
        let resolved = self.begin(reference)?;
        self.end(reference);
        Ok(resolved)
    }

    /// Recursively resolves `entry`'s transitive import closure, returning reachable units in
    /// post-order (dependencies before dependents). Unlike `resolve`, the in-flight guard
    /// spans the whole walk rather than a single call: a genuine import cycle (A imports B
    /// imports A) keeps A in-flight across the recursion into B, so it trips
    /// `VfsError::Circular` for real, not just in the synthetic single-call scenario that
    /// `self_referencing_import_is_circular` exercises. An import that cannot be resolved at
    /// all is tolerated here (omitted from the closure) so the compiler itself reports the
    /// missing file, per §4.4's failure semantics; only a true cycle is fatal to the walk.
    pub fn resolve_transitive(&self, entry: &str) -> Result<Vec<Resolved>, VfsError> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        self.walk(entry, &mut order, &mut seen)?;
        Ok(order)
    }

    /// Cycle tracking here keys the shared in-flight set by the *canonical resolved name*
    /// rather than the raw reference text `begin`/`end` use: two different import spellings
    /// (`"A.sol"` vs. `"./A.sol"`) must collide on the same ancestor for a cycle to be caught,
    /// which a raw-reference key would miss.
    fn walk(
        &self,
        reference: &str,
        order: &mut Vec<Resolved>,
        seen: &mut HashSet<String>,
    ) -> Result<(), VfsError> {
        let resolved = match self.resolve_inner(reference) {
            Ok(resolved) => resolved,
            Err(VfsError::NotFound(_)) => return Ok(()),
            Err(err) => return Err(err),
        };

        if !self.in_flight.lock().insert(resolved.name.clone()) {
            return Err(VfsError::Circular(resolved.name));
        }

        if !seen.insert(resolved.name.clone()) {
            self.in_flight.lock().remove(&resolved.name);
            return Ok(());
        }

        let mut child_result = Ok(());
        for import_ref in Self::extract_imports(&resolved.content) {
            if let Err(err) = self.walk(&import_ref, order, seen) {
                child_result = Err(err);
                break;
            }
        }
        self.in_flight.lock().remove(&resolved.name);
        child_result?;
        order.push(resolved);
        Ok(())
    }

    fn begin(&self, reference: &str) -> Result<Resolved, VfsError> {
        let inserted = self.in_flight.lock().insert(reference.to_string());
        if !inserted {
            return Err(VfsError::Circular(reference.to_string()));
        }
        match self.resolve_inner(reference) {
            Ok(resolved) => Ok(resolved),
            Err(err) => {
                self.in_flight.lock().remove(reference);
                Err(err)
            }
        }
    }

    fn end(&self, reference: &str) {
        self.in_flight.lock().remove(reference);
    }

    fn resolve_inner(&self, reference: &str) -> Result<Resolved, VfsError> {
        // 1. exact match
        if let Some(content) = self.entries.get(reference) {
            return Ok(Resolved {
                name: reference.to_string(),
                content: content.clone(),
            });
        }

        // 2. normalized match
        let normalized = normalize(reference);
        if let Some(content) = self.entries.get(&normalized) {
            return Ok(Resolved {
                name: normalized,
                content: content.clone(),
            });
        }

        // 3. package-style match
        if reference.starts_with('@') {
            if let Some(resolved) = self.resolve_package_style(reference) {
                return Ok(resolved);
            }
        }

        // 4. suffix / casing / separator tolerance
        if let Some(resolved) = self.resolve_tolerant(reference) {
            return Ok(resolved);
        }

        // 5. disk fallback
        if let Some(base) = &self.disk_base {
            if let Some(resolved) = self.resolve_on_disk(base, reference) {
                return Ok(resolved);
            }
        }

        Err(VfsError::NotFound(reference.to_string()))
    }

    fn resolve_package_style(&self, reference: &str) -> Option<Resolved> {
        let candidates: Vec<String> = {
            let with_suffix = format!("{reference}.sol");
            let minus_first_segment = reference
                .strip_prefix('@')
                .and_then(|rest| rest.split_once('/'))
                .map(|(_, tail)| tail.to_string());
            let basename = reference.rsplit('/').next().map(str::to_string);
            let basename_sol = basename.as_ref().map(|b| format!("{b}.sol"));

            [
                Some(reference.to_string()),
                Some(with_suffix),
                minus_first_segment,
                basename.clone(),
                basename_sol,
            ]
            .into_iter()
            .flatten()
            .collect()
        };

        for candidate in &candidates {
            if let Some(content) = self.entries.get(candidate) {
                return Some(Resolved {
                    name: candidate.clone(),
                    content: content.clone(),
                });
            }
        }

        let basename = reference.rsplit('/').next()?;
        let suffix_a = format!("/{basename}");
        let suffix_b = format!("/{basename}.sol");
        self.entries
            .iter()
            .find(|(name, _)| name.ends_with(&suffix_a) || name.ends_with(&suffix_b))
            .map(|(name, content)| Resolved {
                name: name.clone(),
                content: content.clone(),
            })
    }

    fn resolve_tolerant(&self, reference: &str) -> Option<Resolved> {
        let swapped = reference.replace('\\', "/");
        if let Some(content) = self.entries.get(&swapped) {
            return Some(Resolved {
                name: swapped,
                content: content.clone(),
            });
        }
        let swapped_back = reference.replace('/', "\\");
        if let Some(content) = self.entries.get(&swapped_back) {
            return Some(Resolved {
                name: swapped_back,
                content: content.clone(),
            });
        }

        let target_basename = reference.rsplit(['/', '\\']).next()?.to_lowercase();
        self.entries
            .iter()
            .find(|(name, _)| {
                name.rsplit(['/', '\\'])
                    .next()
                    .map(|b| b.to_lowercase() == target_basename)
                    .unwrap_or(false)
            })
            .map(|(name, content)| Resolved {
                name: name.clone(),
                content: content.clone(),
            })
    }

    fn resolve_on_disk(&self, base: &Path, reference: &str) -> Option<Resolved> {
        let candidate = base.join(reference);
        let canonical_base = base.canonicalize().ok()?;
        let canonical_candidate = candidate.canonicalize().ok()?;
        if !canonical_candidate.starts_with(&canonical_base) {
            return None;
        }
        let content = std::fs::read_to_string(&canonical_candidate).ok()?;
        Some(Resolved {
            name: reference.to_string(),
            content,
        })
    }

    /// Scans `unit` for both `import "<ref>";` and `import { ... } from "<ref>";` forms.
    pub fn extract_imports(unit: &str) -> Vec<String> {
        IMPORT_RE
            .captures_iter(unit)
            .map(|cap| cap[1].to_string())
            .collect()
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(reference: &str) -> String {
    let mut remaining = reference;
    loop {
        if let Some(rest) = remaining.strip_prefix("./") {
            remaining = rest;
        } else if let Some(rest) = remaining.strip_prefix("../") {
            remaining = rest;
        } else {
            break;
        }
    }
    remaining.to_string()
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
    fn exact_match_resolves() {
        let mut vfs = Vfs::new();
        vfs.install(&bundle(&[("Main.sol", "contract A {}")]));
        let resolved = vfs.resolve("Main.sol").unwrap();
        assert_eq!(resolved.content, "contract A {}");
    }

    #[test]
    fn normalized_match_strips_leading_dot_slash() {
        let mut vfs = Vfs::new();
        vfs.install(&bundle(&[("lib/L.sol", "contract L {}")]));
        let resolved = vfs.resolve("./lib/L.sol").unwrap();
        assert_eq!(resolved.content, "contract L {}");
    }

    #[test]
    fn package_style_match_via_basename() {
        let mut vfs = Vfs::new();
        vfs.install(&bundle(&[("vendor/x/L.sol", "contract L {}")]));
        let resolved = vfs.resolve("@x/L.sol").unwrap();
        assert_eq!(resolved.content, "contract L {}");
    }

    #[test]
    fn tolerant_match_is_case_insensitive_on_basename() {
        let mut vfs = Vfs::new();
        vfs.install(&bundle(&[("lib/L.sol", "contract L {}")]));
        let resolved = vfs.resolve("lib/l.sol").unwrap();
        assert_eq!(resolved.content, "contract L {}");
    }

    #[test]
    fn unknown_reference_is_not_found() {
        let mut vfs = Vfs::new();
        vfs.install(&bundle(&[("Main.sol", "contract A {}")]));
        assert!(matches!(
            vfs.resolve("Missing.sol"),
            Err(VfsError::NotFound(_))
        ));
    }

    #[test]
    fn self_referencing_import_is_circular() {
        let mut vfs = Vfs::new();
        vfs.install(&bundle(&[("vendor/x/X.sol", "contract X {}")]));
        vfs.in_flight.lock().insert("@x/X.sol".to_string());
        assert!(matches!(
            vfs.resolve("@x/X.sol"),
            Err(VfsError::Circular(_))
        ));
    }

    #[test]
    fn extract_imports_matches_both_forms() {
        let unit = r#"
            import "./lib/L.sol";
            import { Thing } from "@x/Thing.sol";
        "#;
        let refs = Vfs::extract_imports(unit);
        assert_eq!(refs, vec!["./lib/L.sol", "@x/Thing.sol"]);
    }

    #[test]
    fn in_flight_set_is_released_after_resolve() {
        let mut vfs = Vfs::new();
        vfs.install(&bundle(&[("Main.sol", "contract A {}")]));
        vfs.resolve("Main.sol").unwrap();
        assert!(vfs.in_flight.lock().is_empty());
    }

    #[test]
    fn resolve_transitive_detects_a_real_self_import_cycle() {
        let mut vfs = Vfs::new();
        vfs.install(&bundle(&[("A.sol", "import \"./A.sol\"; contract A {}")]));
        assert!(matches!(
            vfs.resolve_transitive("A.sol"),
            Err(VfsError::Circular(_))
        ));
        assert!(vfs.in_flight.lock().is_empty());
    }

    #[test]
    fn resolve_transitive_detects_a_two_unit_cycle() {
        let mut vfs = Vfs::new();
        vfs.install(&bundle(&[
            ("A.sol", "import \"./B.sol\"; contract A {}"),
            ("B.sol", "import \"./A.sol\"; contract B {}"),
        ]));
        assert!(matches!(
            vfs.resolve_transitive("A.sol"),
            Err(VfsError::Circular(_))
        ));
    }

    #[test]
    fn resolve_transitive_collects_the_whole_acyclic_closure() {
        let mut vfs = Vfs::new();
        vfs.install(&bundle(&[
            ("A.sol", "import \"./B.sol\"; contract A {}"),
            ("B.sol", "import \"./C.sol\"; contract B {}"),
            ("C.sol", "contract C {}"),
        ]));
        let order = vfs.resolve_transitive("A.sol").unwrap();
        let names: Vec<_> = order.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names.len(), 3);
        assert!(names.contains(&"B.sol"));
        assert!(names.contains(&"C.sol"));
    }

    #[test]
    fn disk_fallback_reads_a_file_under_base() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Extra.sol"), "contract E {}").unwrap();

        let mut vfs = Vfs::new().with_disk_fallback(dir.path().to_path_buf());
        vfs.install(&SourceBundle::new());

        let resolved = vfs.resolve("Extra.sol").unwrap();
        assert_eq!(resolved.content, "contract E {}");
    }

    #[test]
    fn disk_fallback_refuses_to_escape_base_via_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let mut vfs = Vfs::new().with_disk_fallback(dir.path().to_path_buf());
        vfs.install(&SourceBundle::new());

        assert!(matches!(
            vfs.resolve("../outside.sol"),
            Err(VfsError::NotFound(_))
        ));
    }
}
