//! Integration coverage for the concrete scenarios in `spec.md` §8 that do not require a live
//! compiler binary: input validation and the bytecode matcher driven through public types.
//! Scenarios that require an actual solc invocation (1, 2, 4, 5, 6 with a real compile) are
//! exercised at the unit level inside `src/compile.rs`, `src/bytecode/matcher.rs`, and
//! `src/flatten.rs`, the way the teacher splits "pure logic" unit tests from
//! network-dependent integration tests in `tests/middleware.rs`.

use contract_verifier::{types::SourceInput, Verdict, VerifyRequest};
use pretty_assertions::assert_eq;

fn request_with(on_chain_bytecode: &str, contract_name: &str, compiler_version: &str) -> VerifyRequest {
    VerifyRequest {
        address: "0x1111111111111111111111111111111111111111".to_string(),
        on_chain_bytecode: on_chain_bytecode.to_string(),
        source: SourceInput::SingleUnit(
            "// SPDX-License-Identifier: MIT\npragma solidity ^0.8.20;\ncontract A { uint public x = 1; }"
                .to_string(),
        ),
        contract_name: contract_name.to_string(),
        compiler_version: compiler_version.to_string(),
        optimization_used: false,
        ..Default::default()
    }
}

#[test]
fn malformed_constructor_arguments_are_input_invalid() {
    let mut request = request_with("60", "A", "0.8.20");
    request.constructor_arguments = Some("not-hex".to_string());
    // Validation happens inside `Verifier::verify`; this asserts the shape a caller can check
    // without touching the network-dependent compiler path.
    let trimmed = request.constructor_arguments.as_deref().unwrap().trim_start_matches("0x");
    assert!(hex::decode(trimmed).is_err());
}

#[test]
fn scenario_metadata_only_mismatch_via_matcher() {
    use contract_verifier::bytecode::MatchBuilder;
    use contract_verifier::types::MismatchReason;

    let body = "608060405234801561001057600080fd5b50";
    let compiled = format!("{body}{}", "aa".repeat(43));
    let on_chain = format!("{body}{}", "bb".repeat(43));

    let matcher = MatchBuilder::new();
    let verdict = matcher.verify(&on_chain, &compiled, "");

    assert_eq!(
        verdict,
        Verdict::Mismatch {
            reason: MismatchReason::MetadataEqualBodiesDiffer
        }
    );
}

#[test]
fn scenario_constructor_args_tail_via_matcher() {
    use contract_verifier::bytecode::MatchBuilder;

    let body = "6080604052";
    let args = "000000000000000000000000000000000000000000000000000000000000002a";
    let metadata = "cc".repeat(43);

    let compiled = format!("{body}{metadata}");
    let on_chain = format!("{body}{metadata}{args}");

    let matcher = MatchBuilder::new();
    let verdict = matcher
        .try_alternate_layout(&on_chain, &compiled, args)
        .expect("alternate layout should match");

    assert!(matches!(verdict, Verdict::Verified { .. }));
}

#[test]
fn scenario_compile_error_surfaces_as_compilation_failed_shape() {
    // The driver itself requires a real compiler binary; here we confirm the verdict shape
    // contract holds for the CompilationFailed arm used by that path.
    let verdict = Verdict::CompilationFailed {
        diagnostics: vec![contract_verifier::error::Diagnostic::error("ParserError: expected ';'")],
    };
    assert_eq!(verdict.label(), "COMPILATION_FAILED");
    assert!(verdict.message().contains("ParserError"));
}
