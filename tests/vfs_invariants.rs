//! Coverage for the quantified invariants and boundary behaviours of `spec.md` §8 that concern
//! the virtual filesystem.

use contract_verifier::types::SourceBundle;
use contract_verifier::vfs::Vfs;

fn bundle(pairs: &[(&str, &str)]) -> SourceBundle {
    let mut bundle = SourceBundle::new();
    for (name, content) in pairs {
        bundle.insert(*name, *content);
    }
    bundle
}

#[test]
fn reinstalling_the_same_bundle_yields_the_same_resolution() {
    let b = bundle(&[("lib/L.sol", "contract L {}")]);

    let mut vfs = Vfs::new();
    vfs.install(&b);
    let first = vfs.resolve("./lib/L.sol").unwrap();

    vfs.install(&b);
    let second = vfs.resolve("./lib/L.sol").unwrap();

    assert_eq!(first.content, second.content);
}

#[test]
fn a_reference_that_resolves_to_itself_is_reported_circular() {
    use contract_verifier::error::VfsError;

    let b = bundle(&[("A.sol", "import \"./A.sol\"; contract A {}")]);
    let mut vfs = Vfs::new();
    vfs.install(&b);

    assert!(matches!(
        vfs.resolve_transitive("A.sol"),
        Err(VfsError::Circular(_))
    ));
}

#[test]
fn unbounded_recursion_does_not_occur_for_a_bundle_with_no_cycles() {
    let b = bundle(&[
        ("A.sol", "import \"./B.sol\"; contract A {}"),
        ("B.sol", "import \"./C.sol\"; contract B {}"),
        ("C.sol", "contract C {}"),
    ]);
    let mut vfs = Vfs::new();
    vfs.install(&b);

    for name in ["A.sol", "B.sol", "C.sol"] {
        assert!(vfs.resolve(name).is_ok());
    }
}
