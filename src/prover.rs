use std::sync::Arc;
use std::time::Instant;

use ark_bn254::{Bn254, Fr};
use ark_groth16::Proof;
use tokio::sync::Mutex;

use crate::binfile::{check_curve, BinFile, ZkeyHeader, ZKEY_KIND, ZKEY_VERSION};
use crate::config::ProverConfig;
use crate::engine::{ArkGroth16Engine, GeneratedProof, ProvingEngine};
use crate::error::{ProofError, StartupError};

/// Owns the proving engine and runs at most one engine call at a time.
///
/// Concurrent Groth16 runs slow each other down enough that serializing them
/// gives better aggregate throughput. Scale out with more processes instead.
pub struct SingleProver {
    gate: Mutex<()>,
    engine: Arc<dyn ProvingEngine>,
    circuit: ZkeyHeader,
}

impl SingleProver {
    /// Full startup sequence: file checks, zkey header and curve check, then
    /// engine construction. Any failure leaves nothing behind.
    pub fn load(config: &ProverConfig) -> Result<Self, StartupError> {
        tracing::info!("SingleProver initialization begin");
        let started = Instant::now();

        config.check_files()?;

        let zkey = BinFile::open(&config.zkey, ZKEY_KIND, ZKEY_VERSION)?;
        let header = ZkeyHeader::parse(&zkey)?;
        check_curve(&header.r, &config.modulus)?;

        tracing::info!(
            version = zkey.version(),
            n_vars = header.n_vars,
            n_public = header.n_public,
            domain_size = header.domain_size,
            "zkey header loaded"
        );

        let engine = ArkGroth16Engine::from_zkey(&zkey, &header, config.randomness)?;

        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "SingleProver initialized from zkey"
        );

        Ok(Self::with_engine(Arc::new(engine), header))
    }

    pub fn with_engine(engine: Arc<dyn ProvingEngine>, circuit: ZkeyHeader) -> Self {
        Self {
            gate: Mutex::new(()),
            engine,
            circuit,
        }
    }

    /// Dimensions of the loaded circuit.
    pub fn circuit(&self) -> &ZkeyHeader {
        &self.circuit
    }

    /// Compute a proof from a full witness assignment.
    pub async fn prove(&self, witness: Vec<Fr>) -> Result<GeneratedProof, ProofError> {
        let _guard = self.gate.lock().await;
        tracing::info!(witness_len = witness.len(), "SingleProver::prove begin");

        let started = Instant::now();
        let engine = Arc::clone(&self.engine);
        let result = tokio::task::spawn_blocking(move || engine.prove(&witness))
            .await
            .map_err(|e| ProofError::Engine(format!("proving task aborted: {e}")))?;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => tracing::info!(elapsed_ms, "Proof generation finished"),
            Err(e) => tracing::error!(elapsed_ms, error = %e, "Proof generation failed"),
        }
        result
    }

    /// Check a proof against the circuit's verifying key.
    pub async fn verify(&self, proof: Proof<Bn254>, public_signals: Vec<Fr>) -> Result<bool, ProofError> {
        let _guard = self.gate.lock().await;
        let engine = Arc::clone(&self.engine);
        let valid = tokio::task::spawn_blocking(move || engine.verify(&proof, &public_signals))
            .await
            .map_err(|e| ProofError::Engine(format!("verification task aborted: {e}")))??;

        tracing::info!(valid, "Proof verification finished");
        Ok(valid)
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::fixtures::mock_prover;
    use super::*;
    use crate::binfile::fixtures::{zkey_header_only, MULTIPLIER_ZKEY};
    use crate::config::{Args, FieldModulus};
    use crate::engine::mock::RecordingEngine;
    use clap::Parser;

    fn witness(values: &[u64]) -> Vec<Fr> {
        values.iter().map(|v| Fr::from(*v)).collect()
    }

    fn config_in(dir: &std::path::Path) -> ProverConfig {
        let args = Args::try_parse_from([
            "prover",
            dir.join("circuit.zkey").to_str().unwrap(),
            dir.to_str().unwrap(),
        ])
        .unwrap();
        ProverConfig::from_args(&args)
    }

    #[tokio::test]
    async fn test_prove_returns_public_signals() {
        let engine = Arc::new(RecordingEngine::new(1));
        let prover = mock_prover(engine.clone(), 4);

        let result = prover.prove(witness(&[1, 12, 3, 4])).await.unwrap();
        assert_eq!(result.public_signals, witness(&[12]));
        assert_eq!(engine.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_engine_failure_is_reported() {
        let engine = Arc::new(RecordingEngine::new(1).failing("constraint not satisfied"));
        let prover = mock_prover(engine, 4);

        let err = prover.prove(witness(&[1, 2, 3, 4])).await.unwrap_err();
        assert_eq!(err.kind(), "engine_error");
        assert!(err.to_string().contains("constraint not satisfied"));
    }

    #[tokio::test]
    async fn test_gate_released_after_failure() {
        let engine = Arc::new(RecordingEngine::new(1).failing("boom"));
        let prover = mock_prover(engine.clone(), 4);

        assert!(prover.prove(witness(&[1, 2])).await.is_err());
        assert!(prover.prove(witness(&[1, 2])).await.is_err());
        assert_eq!(engine.calls().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_proofs_never_overlap() {
        let engine = Arc::new(RecordingEngine::new(1).with_delay(Duration::from_millis(25)));
        let prover = Arc::new(mock_prover(engine.clone(), 4));

        let tasks: Vec<_> = (0..6)
            .map(|i| {
                let prover = Arc::clone(&prover);
                tokio::spawn(async move { prover.prove(witness(&[1, i, 0, 0])).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(engine.max_active(), 1);
        let mut calls = engine.calls();
        assert_eq!(calls.len(), 6);
        calls.sort_by_key(|(start, _)| *start);
        for pair in calls.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "proof computations overlapped");
        }
    }

    #[tokio::test]
    async fn test_verify_goes_through_engine() {
        let engine = Arc::new(RecordingEngine::new(1));
        let prover = mock_prover(engine, 4);
        let valid = prover
            .verify(RecordingEngine::sample_proof(), witness(&[12]))
            .await
            .unwrap();
        assert!(valid);
    }

    #[test]
    fn test_load_fails_when_files_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = SingleProver::load(&config_in(dir.path())).err().unwrap();
        assert!(matches!(err, StartupError::MissingFile { .. }));
    }

    #[tokio::test]
    async fn test_load_circom_zkey_and_prove() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("zkLogin"), b"").unwrap();
        std::fs::write(dir.path().join("zkLogin.dat"), b"").unwrap();
        std::fs::copy(MULTIPLIER_ZKEY, dir.path().join("circuit.zkey")).unwrap();

        let prover = SingleProver::load(&config_in(dir.path())).unwrap();
        assert_eq!(prover.circuit().n_vars, 4);
        assert_eq!(prover.circuit().n_public, 1);

        let generated = prover.prove(witness(&[1, 33, 3, 11])).await.unwrap();
        assert_eq!(generated.public_signals, witness(&[33]));
        assert!(prover.verify(generated.proof, generated.public_signals).await.unwrap());
    }

    #[test]
    fn test_load_rejects_zkey_on_other_curve() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("zkLogin"), b"").unwrap();
        std::fs::write(dir.path().join("zkLogin.dat"), b"").unwrap();
        let other = FieldModulus::from_le_bytes(&[0x61, 0x00, 0x00, 0x01]);
        std::fs::write(dir.path().join("circuit.zkey"), zkey_header_only(&other, 4, 1)).unwrap();

        let err = SingleProver::load(&config_in(dir.path())).err().unwrap();
        assert!(matches!(err, StartupError::Curve(_)));
        assert!(err.to_string().contains("zkey curve not supported"));
    }

    #[test]
    fn test_load_rejects_malformed_zkey() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("zkLogin"), b"").unwrap();
        std::fs::write(dir.path().join("zkLogin.dat"), b"").unwrap();
        std::fs::write(dir.path().join("circuit.zkey"), b"not a zkey").unwrap();

        let err = SingleProver::load(&config_in(dir.path())).err().unwrap();
        assert!(matches!(err, StartupError::Format(_)));
    }
}
