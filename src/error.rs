use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

use crate::config::FieldModulus;

/// Failures that prevent the service from starting. Always fatal.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("cannot find the {what} at {}: {source}", path.display())]
    MissingFile {
        what: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("proving key is malformed: {0}")]
    Format(#[from] FormatError),

    #[error("zkey curve not supported: {0}")]
    Curve(#[from] CurveMismatchError),

    #[error("failed to construct proving engine: {0}")]
    Engine(String),

    #[error("scratch directory {} is not usable: {source}", path.display())]
    ScratchDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Structural problems with a section-structured binary artifact.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid file type: expected {expected:?}, found {found:?}")]
    BadMagic { expected: String, found: String },

    #[error("unsupported {kind} version {found} (supported up to {max})")]
    UnsupportedVersion { kind: String, found: u32, max: u32 },

    #[error("{kind} file truncated: {detail}")]
    Truncated { kind: String, detail: String },

    #[error("{kind} file has no section {id}")]
    MissingSection { kind: String, id: u32 },

    #[error("{kind} header invalid: {detail}")]
    Header { kind: String, detail: String },
}

/// Declared field modulus differs from the configured one.
#[derive(Error, Debug)]
#[error("field modulus mismatch: expected {expected}, found {found}")]
pub struct CurveMismatchError {
    pub expected: FieldModulus,
    pub found: FieldModulus,
}

/// Per-request failure, reported to the caller.
#[derive(Error, Debug)]
pub enum ProofError {
    #[error("bad input: {0}")]
    BadInput(String),

    #[error("witness generator exited with {status}")]
    Subprocess { status: ExitStatus },

    #[error("failed to run witness generator: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("invalid witness: {reason}{}", exit_note(generator_exit))]
    InvalidWitness {
        reason: String,
        generator_exit: Option<ExitStatus>,
    },

    #[error("proof computation failed: {0}")]
    Engine(String),

    #[error("scratch file error: {0}")]
    Scratch(#[source] std::io::Error),
}

impl ProofError {
    /// Stable failure category exposed to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            ProofError::BadInput(_) => "bad_input",
            ProofError::Subprocess { .. } | ProofError::Spawn(_) => "subprocess_error",
            ProofError::InvalidWitness { .. } => "invalid_witness",
            ProofError::Engine(_) => "engine_error",
            ProofError::Scratch(_) => "internal_error",
        }
    }

    pub(crate) fn invalid_witness(reason: impl ToString, generator_exit: Option<ExitStatus>) -> Self {
        ProofError::InvalidWitness {
            reason: reason.to_string(),
            generator_exit,
        }
    }
}

fn exit_note(status: &Option<ExitStatus>) -> String {
    match status {
        Some(status) => format!(" (witness generator exited with {status})"),
        None => String::new(),
    }
}
