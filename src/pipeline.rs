//! One inbound request, start to finish: input document -> witness
//! generator -> witness validation -> single-flight proof.

use std::fmt;
use std::process::ExitStatus;
use std::sync::Arc;

use ark_bn254::Fr;
use serde_json::{Map, Value};

use crate::binfile::{check_curve, read_witness_elements, BinFile, WitnessHeader, WTNS_KIND, WTNS_VERSION};
use crate::config::{ExitStatusPolicy, ProverConfig};
use crate::engine::{signals_to_strings, ProofDocument};
use crate::error::{ProofError, StartupError};
use crate::prover::SingleProver;
use crate::scratch::{ScratchSpace, TempArtifact};
use crate::types::ProveResponse;
use crate::witness::WitnessGenerator;

/// Pipeline position of a request, used in failure logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    InputWritten,
    WitnessGenerated,
    WitnessValidated,
    Proved,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::InputWritten => "input_written",
            Stage::WitnessGenerated => "witness_generated",
            Stage::WitnessValidated => "witness_validated",
            Stage::Proved => "proved",
        };
        f.write_str(name)
    }
}

pub struct ProofPipeline {
    config: Arc<ProverConfig>,
    scratch: ScratchSpace,
    generator: WitnessGenerator,
    prover: SingleProver,
}

impl ProofPipeline {
    /// Build the whole service core. Fails if the prover cannot start.
    pub fn load(config: Arc<ProverConfig>) -> Result<Self, StartupError> {
        let prover = SingleProver::load(&config)?;
        Self::with_prover(config, prover)
    }

    pub fn with_prover(config: Arc<ProverConfig>, prover: SingleProver) -> Result<Self, StartupError> {
        let scratch = ScratchSpace::new(&config.scratch_dir)?;
        let generator = WitnessGenerator::new(&config.witness_generator, &config.witness_data);
        tracing::info!(
            generator = %generator.executable().display(),
            scratch_dir = %scratch.dir().display(),
            "proof pipeline ready"
        );
        Ok(Self {
            config,
            scratch,
            generator,
            prover,
        })
    }

    pub fn prover(&self) -> &SingleProver {
        &self.prover
    }

    pub fn config(&self) -> &ProverConfig {
        &self.config
    }

    /// Run one request. Both scratch files are gone when this returns,
    /// whichever way it returns.
    pub async fn run(&self, body: &[u8]) -> Result<ProveResponse, ProofError> {
        let mut stage = Stage::Received;
        let result = self.run_stages(body, &mut stage).await;
        if let Err(e) = &result {
            tracing::warn!(%stage, kind = e.kind(), error = %e, "proof request failed");
        }
        result
    }

    async fn run_stages(&self, body: &[u8], stage: &mut Stage) -> Result<ProveResponse, ProofError> {
        tracing::debug!(body_len = body.len(), "proof request received");
        let inputs = self.parse_inputs(body)?;

        let mut input = self.scratch.allocate(".json").map_err(ProofError::Scratch)?;
        let serialized = serde_json::to_vec(&Value::Object(inputs))
            .map_err(|e| ProofError::BadInput(e.to_string()))?;
        tokio::fs::write(input.path(), serialized)
            .await
            .map_err(ProofError::Scratch)?;
        input.mark_written();
        *stage = Stage::InputWritten;

        let mut output = self.scratch.allocate(".wtns").map_err(ProofError::Scratch)?;
        let status = self
            .generator
            .run(input.path(), output.path())
            .await
            .map_err(ProofError::Spawn)?;
        input.mark_consumed();

        let generator_exit = (!status.success()).then_some(status);
        if let Some(status) = generator_exit {
            if self.config.exit_status_policy == ExitStatusPolicy::Strict {
                return Err(ProofError::Subprocess { status });
            }
        }
        *stage = Stage::WitnessGenerated;

        let witness = self.load_witness(&mut output, generator_exit).await?;
        tracing::trace!(input = ?input.state(), output = ?output.state(), "releasing scratch files");
        input.release();
        output.release();
        *stage = Stage::WitnessValidated;

        let generated = self.prover.prove(witness).await?;
        *stage = Stage::Proved;

        Ok(ProveResponse {
            proof: ProofDocument::from(&generated.proof),
            public_signals: signals_to_strings(&generated.public_signals),
        })
    }

    /// Request bodies must be a JSON object holding every required input.
    fn parse_inputs(&self, body: &[u8]) -> Result<Map<String, Value>, ProofError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| ProofError::BadInput(format!("request body is not valid JSON: {e}")))?;
        let Value::Object(inputs) = value else {
            return Err(ProofError::BadInput(
                "request body must be a JSON object of circuit inputs".to_string(),
            ));
        };

        if let Some(missing) = self
            .config
            .required_inputs
            .iter()
            .find(|name| !inputs.contains_key(name.as_str()))
        {
            return Err(ProofError::BadInput(format!("missing required input `{missing}`")));
        }
        Ok(inputs)
    }

    /// Open the witness, check its curve and size, and decode its elements.
    async fn load_witness(
        &self,
        artifact: &mut TempArtifact,
        generator_exit: Option<ExitStatus>,
    ) -> Result<Vec<Fr>, ProofError> {
        let invalid = |reason: String| ProofError::invalid_witness(reason, generator_exit);

        let bytes = tokio::fs::read(artifact.path())
            .await
            .map_err(|e| invalid(format!("cannot read witness file: {e}")))?;
        artifact.mark_written();

        let file = BinFile::from_bytes(bytes, WTNS_KIND, WTNS_VERSION).map_err(|e| invalid(e.to_string()))?;
        let header = WitnessHeader::parse(&file).map_err(|e| invalid(e.to_string()))?;
        check_curve(&header.prime, &self.config.modulus).map_err(|e| invalid(e.to_string()))?;

        let n_vars = self.prover.circuit().n_vars;
        if header.n_witness != n_vars {
            return Err(invalid(format!(
                "witness has {} elements, circuit has {n_vars} variables",
                header.n_witness
            )));
        }

        let elements = read_witness_elements(&file, &header).map_err(|e| invalid(e.to_string()))?;
        artifact.mark_consumed();
        Ok(elements)
    }
}
