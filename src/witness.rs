use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Instant;

use tokio::process::Command;

const STDERR_LOG_LIMIT: usize = 2048;

/// Runs the circuit's native witness generator as a child process.
///
/// The generator is invoked as `<executable> <input.json> <output.wtns>` and
/// locates its `.dat` file next to itself.
#[derive(Debug, Clone)]
pub struct WitnessGenerator {
    executable: PathBuf,
    data_file: PathBuf,
}

impl WitnessGenerator {
    pub fn new(executable: impl Into<PathBuf>, data_file: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            data_file: data_file.into(),
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Run the generator to completion and hand back its exit status.
    ///
    /// A nonzero status is returned as-is; only a failure to spawn or wait
    /// on the child is an error. The output file may be missing or partial
    /// whatever the status is.
    pub async fn run(&self, input: &Path, output: &Path) -> io::Result<ExitStatus> {
        tracing::debug!(
            executable = %self.executable.display(),
            data_file = %self.data_file.display(),
            input = %input.display(),
            output = %output.display(),
            "running witness generator"
        );

        let started = Instant::now();
        let out = Command::new(&self.executable)
            .arg(input)
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if out.status.success() {
            tracing::info!(elapsed_ms, "Witness generation finished");
        } else {
            let stderr = String::from_utf8_lossy(&out.stderr);
            let stderr = truncate(stderr.trim(), STDERR_LOG_LIMIT);
            tracing::warn!(elapsed_ms, status = %out.status, "Witness generator returned unexpected status");
            // Generator diagnostics may echo input values.
            tracing::debug!(stderr, "witness generator stderr");
        }

        Ok(out.status)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}


#[cfg(test)]
mod tests {
    use super::fixtures::script_generator;
    use super::*;

    #[tokio::test]
    async fn test_successful_run_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let generator = script_generator(dir.path(), "copy", r#"cp "$1" "$2""#);
        let input = dir.path().join("in.json");
        let output = dir.path().join("out.wtns");
        std::fs::write(&input, br#"{"a":"3"}"#).unwrap();

        let status = generator.run(&input, &output).await.unwrap();
        assert!(status.success());
        assert_eq!(std::fs::read(&output).unwrap(), br#"{"a":"3"}"#);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let generator = script_generator(dir.path(), "fail", "echo boom >&2; exit 3");
        let status = generator
            .run(&dir.path().join("in.json"), &dir.path().join("out.wtns"))
            .await
            .unwrap();
        assert!(!status.success());
        assert_eq!(status.code(), Some(3));
        assert!(!dir.path().join("out.wtns").exists());
    }

    #[tokio::test]
    async fn test_chatty_generator_stdout_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let generator = script_generator(
            dir.path(),
            "chatty",
            r#"head -c 8000000 /dev/zero; cp "$1" "$2""#,
        );
        let input = dir.path().join("in.json");
        let output = dir.path().join("out.wtns");
        std::fs::write(&input, b"{}").unwrap();

        let status = generator.run(&input, &output).await.unwrap();
        assert!(status.success());
        assert_eq!(std::fs::read(&output).unwrap(), b"{}");
    }

    #[tokio::test]
    async fn test_missing_executable_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let generator = WitnessGenerator::new(dir.path().join("absent"), dir.path().join("absent.dat"));
        let err = generator
            .run(&dir.path().join("in.json"), &dir.path().join("out.wtns"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        assert_eq!(truncate("abc", 10), "abc");
        assert_eq!(truncate("héllo", 2), "h");
    }
}
