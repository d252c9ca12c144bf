use std::fmt;
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use num_bigint::BigUint;

use crate::error::StartupError;

/// Scalar field of alt_bn128 (BN254), the only curve the service proves on.
pub const BN254_SCALAR_MODULUS: &str =
    "21888242871839275222246405745257275088548364400416034343698204186575808495617";

/// Command-line / environment configuration.
///
/// Both paths may be given positionally (`prover-server <zkey> <binaries>`)
/// or through the `ZKEY` and `WITNESS_BINARIES` environment variables.
#[derive(Parser, Debug, Clone)]
#[command(name = "groth16-prover-server", about, long_about = None)]
pub struct Args {
    /// Path to the proving key, e.g. /app/zkLogin.zkey
    #[arg(env = "ZKEY")]
    pub zkey: PathBuf,

    /// Directory containing the witness generator and its .dat file
    #[arg(env = "WITNESS_BINARIES")]
    pub witness_binaries: PathBuf,

    /// Name of the witness generator executable inside the binaries directory
    #[arg(long, env = "CIRCUIT_NAME", default_value = "zkLogin")]
    pub circuit_name: String,

    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Largest accepted request body in bytes
    #[arg(long, env = "MAX_REQUEST_BYTES", default_value_t = 128_000_000)]
    pub max_request_bytes: usize,

    /// Directory for per-request scratch files (defaults to the system temp dir)
    #[arg(long, env = "SCRATCH_DIR")]
    pub scratch_dir: Option<PathBuf>,

    /// How a nonzero witness generator exit status is treated
    #[arg(long, env = "EXIT_STATUS_POLICY", value_enum, default_value_t = ExitStatusPolicy::Advisory)]
    pub exit_status_policy: ExitStatusPolicy,

    /// Input names every request document must contain
    #[arg(long = "required-input", env = "REQUIRED_INPUTS", value_delimiter = ',')]
    pub required_inputs: Vec<String>,

    /// Seed for proof randomness; proofs are reproducible when set
    #[arg(long, env = "PROOF_SEED")]
    pub proof_seed: Option<u64>,
}

/// Treatment of a nonzero exit status from the witness generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExitStatusPolicy {
    /// Log it and let witness validation decide the outcome.
    Advisory,
    /// Fail the request before the witness is opened.
    Strict,
}

/// Source of the blinding scalars `r` and `s` used by Groth16.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofRandomness {
    Os,
    Seeded(u64),
}

/// Prime modulus of a circuit's scalar field.
#[derive(Clone, PartialEq, Eq)]
pub struct FieldModulus(BigUint);

impl FieldModulus {
    pub fn bn254() -> Self {
        Self(BigUint::parse_bytes(BN254_SCALAR_MODULUS.as_bytes(), 10).unwrap_or_default())
    }

    /// Decode a modulus stored little-endian, as binfile headers store it.
    pub fn from_le_bytes(bytes: &[u8]) -> Self {
        Self(BigUint::from_bytes_le(bytes))
    }

    #[cfg(test)]
    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }
}

impl fmt::Display for FieldModulus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for FieldModulus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldModulus({})", self.0)
    }
}

/// Immutable prover configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct ProverConfig {
    pub circuit_name: String,
    pub witness_generator: PathBuf,
    pub witness_data: PathBuf,
    pub zkey: PathBuf,
    pub modulus: FieldModulus,
    pub exit_status_policy: ExitStatusPolicy,
    pub required_inputs: Vec<String>,
    pub randomness: ProofRandomness,
    pub scratch_dir: PathBuf,
}

impl ProverConfig {
    /// Derive the prover configuration from parsed arguments.
    ///
    /// The witness generator is `<binaries>/<circuit_name>` and its auxiliary
    /// data file `<binaries>/<circuit_name>.dat`.
    pub fn from_args(args: &Args) -> Self {
        let witness_generator = args.witness_binaries.join(&args.circuit_name);
        let witness_data = args
            .witness_binaries
            .join(format!("{}.dat", args.circuit_name));

        Self {
            circuit_name: args.circuit_name.clone(),
            witness_generator,
            witness_data,
            zkey: args.zkey.clone(),
            modulus: FieldModulus::bn254(),
            exit_status_policy: args.exit_status_policy,
            required_inputs: args
                .required_inputs
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            randomness: match args.proof_seed {
                Some(seed) => ProofRandomness::Seeded(seed),
                None => ProofRandomness::Os,
            },
            scratch_dir: args
                .scratch_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
        }
    }

    /// Check that the generator, its data file and the zkey are all readable.
    pub fn check_files(&self) -> Result<(), StartupError> {
        check_readable("witness generator", &self.witness_generator)?;
        check_readable("witness generator data file", &self.witness_data)?;
        check_readable("proving key", &self.zkey)?;
        Ok(())
    }
}

fn check_readable(what: &'static str, path: &Path) -> Result<(), StartupError> {
    match std::fs::File::open(path) {
        Ok(_) => Ok(()),
        Err(source) => Err(StartupError::MissingFile {
            what,
            path: path.to_path_buf(),
            source,
        }),
    }
}
