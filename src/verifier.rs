//! C9 — Verifier.
//!
//! Orchestrates C1–C8 per the state machine in `spec.md` §4.9: validate inputs, resolve the
//! EVM target, load a compiler, compile (optionally retrying via the flattener on failure),
//! then match against the on-chain artifact.

use crate::{
    bytecode::{self, MatchBuilder},
    compile::{self, CompileError, CompileRequest},
    compile_cache::{CompileCache, InputKey, Lookup},
    compiler_store::CompilerStore,
    config::EngineConfig,
    error::{Diagnostic, VerifierError},
    evm_target,
    flatten,
    types::{CompilationArtifact, MismatchReason, SourceBundle, SourceInput, Verdict, VerifyRequest},
    vfs::Vfs,
};
use foundry_compilers::artifacts::EvmVersion;
use std::{str::FromStr, sync::Arc};

pub struct Verifier {
    compiler_store: CompilerStore,
    compile_cache: CompileCache,
    config: EngineConfig,
}

impl Verifier {
    pub fn new(config: EngineConfig) -> Self {
        let compiler_store = CompilerStore::new(
            url::Url::parse(&config.release_index_url).expect("release index url is valid"),
            config.compiler_cache_dir.clone(),
            config.compiler_max_warm,
        );
        let compile_cache = CompileCache::new(config.compilation_cache_size);
        Self {
            compiler_store,
            compile_cache,
            config,
        }
    }

    pub async fn verify(&self, request: VerifyRequest) -> Result<Verdict, VerifierError> {
        if let Err(message) = validate(&request, self.config.max_source_bytes) {
            return Ok(Verdict::InputInvalid { message });
        }

        let compiler_version = match semver::Version::parse(
            request.compiler_version.split('+').next().unwrap_or(&request.compiler_version),
        ) {
            Ok(v) => v,
            Err(_) => {
                return Ok(Verdict::InputInvalid {
                    message: format!("malformed compiler version: {}", request.compiler_version),
                })
            }
        };

        let requested_evm = request
            .evm_version
            .as_deref()
            .and_then(parse_evm_version);
        let (evm_target, substituted) = evm_target::choose(&compiler_version, requested_evm);
        if substituted {
            tracing::warn!(
                compiler_version = %compiler_version,
                requested = ?request.evm_version,
                chosen = ?evm_target,
                "requested EVM target unsupported by compiler, substituting default"
            );
        }

        let handle = self
            .compiler_store
            .load(&request.compiler_version)
            .await?;

        let bundle = build_bundle(&request.source);
        let entry_unit = bundle
            .detect_entry_unit(&request.contract_name)
            .unwrap_or("Main.sol")
            .to_string();

        let mut import_overlay = std::collections::BTreeMap::new();
        import_overlay.extend(request.import_mappings.clone());

        let multi_attempt = self
            .try_compile(
                &handle,
                &bundle,
                &entry_unit,
                &request,
                evm_target,
                &import_overlay,
                false,
            )
            .await?;

        let artifact = match multi_attempt {
            Ok(artifact) => artifact,
            Err(diagnostics) => {
                if !request.auto_flatten {
                    return Ok(Verdict::CompilationFailed { diagnostics });
                }

                let mut vfs = Vfs::new();
                vfs.install(&bundle);
                let outcome = flatten::flatten(
                    &vfs,
                    &bundle,
                    &entry_unit,
                    "// SPDX-License-Identifier: UNLICENSED",
                    "pragma solidity ^0.8.0;",
                );

                let mut flat_bundle = SourceBundle::new();
                flat_bundle.insert(entry_unit.clone(), outcome.flattened);

                match self
                    .try_compile(
                        &handle,
                        &flat_bundle,
                        &entry_unit,
                        &request,
                        evm_target,
                        &import_overlay,
                        true,
                    )
                    .await?
                {
                    Ok(artifact) => artifact,
                    Err(diagnostics) => return Ok(Verdict::CompilationFailed { diagnostics }),
                }
            }
        };

        let matcher = MatchBuilder::new().with_library_offsets(artifact.library_offsets.clone());
        let constructor_args = request.constructor_arguments.clone().unwrap_or_default();
        let verdict = matcher.verify(
            &request.on_chain_bytecode,
            &artifact.runtime_bytecode,
            &constructor_args,
        );

        let verdict = match verdict {
            Verdict::Mismatch {
                reason: MismatchReason::BodiesDiffer,
            } if !constructor_args.is_empty() => matcher
                .try_alternate_layout(
                    &request.on_chain_bytecode,
                    &artifact.runtime_bytecode,
                    &constructor_args,
                )
                .unwrap_or(Verdict::Mismatch {
                    reason: MismatchReason::BodiesDiffer,
                }),
            other => other,
        };

        Ok(finalize(verdict, &artifact, &compiler_version))
    }

    async fn try_compile(
        &self,
        handle: &Arc<crate::compiler_store::Handle>,
        bundle: &SourceBundle,
        entry_unit: &str,
        request: &VerifyRequest,
        evm_target: EvmVersion,
        import_overlay: &std::collections::BTreeMap<String, String>,
        was_flattened: bool,
    ) -> Result<Result<Arc<CompilationArtifact>, Vec<Diagnostic>>, VerifierError> {
        let key = InputKey::compute(
            &bundle_digest_input(bundle),
            &handle.canonical_build_id,
            &request.contract_name,
            request.optimization_used,
            request.runs,
            &request.libraries,
            &format!("{evm_target:?}"),
        );

        match self.compile_cache.get_or_claim(key) {
            Lookup::Hit(artifact) => return Ok(Ok(artifact)),
            Lookup::Await(mut receiver) => {
                return Ok(Ok(receiver
                    .recv()
                    .await
                    .map_err(|err| VerifierError::Internal(anyhow::Error::new(err)))?))
            }
            Lookup::Miss => {}
        }

        // `compile::compile` is CPU-bound (it drives the `solc` binary synchronously under
        // the handle's mutex); dispatch it to the blocking pool rather than stalling the
        // async worker that's running `verify`, and bound it by `config.compile_timeout`.
        let bundle_owned = bundle.clone();
        let entry_unit_owned = entry_unit.to_string();
        let contract_name_owned = request.contract_name.clone();
        let libraries_owned = request.libraries.clone();
        let import_overlay_owned = import_overlay.clone();
        let optimizer_enabled = request.optimization_used;
        let optimizer_runs = request.runs;
        let handle_owned = Arc::clone(handle);

        let compile_task = tokio::task::spawn_blocking(move || {
            let compile_request = CompileRequest {
                bundle: &bundle_owned,
                entry_unit: &entry_unit_owned,
                contract_name: &contract_name_owned,
                optimizer_enabled,
                optimizer_runs,
                libraries: &libraries_owned,
                evm_target,
                import_overlay: &import_overlay_owned,
            };
            compile::compile(&handle_owned, &compile_request)
        });

        let outcome = match tokio::time::timeout(self.config.compile_timeout, compile_task).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_err)) => {
                self.compile_cache.abandon(key);
                return Err(if join_err.is_cancelled() {
                    VerifierError::Cancelled
                } else {
                    VerifierError::Internal(anyhow::Error::new(join_err))
                });
            }
            Err(_elapsed) => {
                self.compile_cache.abandon(key);
                return Err(VerifierError::Timeout(self.config.compile_timeout));
            }
        };

        match outcome {
            Ok(outcome) => {
                let artifact = Arc::new(CompilationArtifact {
                    abi: outcome.abi,
                    deploy_bytecode: outcome.deploy_bytecode,
                    runtime_bytecode: outcome.runtime_bytecode,
                    metadata_json: outcome.metadata_json,
                    main_unit_name: entry_unit.to_string(),
                    was_flattened,
                    warnings: outcome.diagnostics,
                    source_map: outcome.source_map,
                    library_offsets: outcome.library_offsets,
                });
                self.compile_cache.complete(key, artifact.clone());
                Ok(Ok(artifact))
            }
            Err(CompileError::Diagnostics(diagnostics)) => {
                self.compile_cache.abandon(key);
                Ok(Err(diagnostics))
            }
            Err(CompileError::ContractNotPresent) => {
                self.compile_cache.abandon(key);
                Ok(Err(vec![Diagnostic::error(format!(
                    "contract '{}' not present in compiled output",
                    request.contract_name
                ))]))
            }
        }
    }
}

fn finalize(verdict: Verdict, artifact: &CompilationArtifact, compiler_version: &semver::Version) -> Verdict {
    match verdict {
        Verdict::Verified { bytecode, .. } => {
            let notes = bytecode::metadata::cross_check(&bytecode, compiler_version)
                .into_iter()
                .collect();
            Verdict::Verified {
                abi: artifact.abi.clone(),
                metadata: artifact.metadata_json.clone(),
                bytecode,
                flattened: artifact.was_flattened,
                notes,
            }
        }
        other => other,
    }
}

fn build_bundle(source: &SourceInput) -> SourceBundle {
    let mut bundle = SourceBundle::new();
    match source {
        SourceInput::SingleUnit(content) => {
            bundle.insert("Main.sol", content.clone());
        }
        SourceInput::MultiUnit(units) => {
            for (name, content) in units {
                bundle.insert(name.clone(), content.clone());
            }
        }
    }
    bundle
}

fn bundle_digest_input(bundle: &SourceBundle) -> String {
    let mut combined = String::new();
    for (name, content) in bundle.iter() {
        combined.push_str(name);
        combined.push('\0');
        combined.push_str(content);
        combined.push('\0');
    }
    combined
}

fn parse_evm_version(raw: &str) -> Option<EvmVersion> {
    EvmVersion::from_str(raw).ok()
}

fn validate(request: &VerifyRequest, max_source_bytes: u64) -> Result<(), String> {
    if request.contract_name.trim().is_empty() {
        return Err("contract name must not be empty".to_string());
    }

    if semver::Version::parse(
        request
            .compiler_version
            .split('+')
            .next()
            .unwrap_or(&request.compiler_version),
    )
    .is_err()
    {
        return Err(format!(
            "unparseable compiler version shorthand: {}",
            request.compiler_version
        ));
    }

    let address = request.address.trim_start_matches("0x");
    if address.is_empty() || hex::decode(address).is_err() {
        return Err("address is not well-formed hex".to_string());
    }

    if let Some(args) = &request.constructor_arguments {
        let trimmed = args.trim_start_matches("0x");
        if !trimmed.is_empty() && hex::decode(trimmed).is_err() {
            return Err("constructor arguments are not valid hex".to_string());
        }
    }

    let bundle = build_bundle(&request.source);
    if bundle.is_empty() {
        return Err("at least one source unit is required".to_string());
    }
    if bundle.total_bytes() > max_source_bytes {
        return Err(format!(
            "source bundle exceeds MAX_SOURCE_BYTES ({max_source_bytes})"
        ));
    }

    Ok(())
}
