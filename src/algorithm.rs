//! Verification algorithm collaborator.
//!
//! The algorithm internals live outside this crate. A device job only
//! needs a factory that builds an algorithm for (data path, device name)
//! and the init / process / deinit calls.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::{debug, warn};

use crate::error::ErrorCode;

/// Algorithm errors.
#[derive(Debug, Error)]
pub enum AlgorithmError {
    #[error("failed to create algorithm: {0}")]
    Create(String),

    #[error("algorithm init failed: {0}")]
    Init(String),

    #[error("algorithm deinit failed: {0}")]
    Deinit(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl AlgorithmError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::Propagated
    }
}

/// One verification pass over a device's data directory.
pub trait VerificationAlgorithm: Send {
    fn init(&mut self) -> Result<(), AlgorithmError>;

    /// Run the verification. The verdict is independent of `init`'s status.
    fn process(&mut self) -> bool;

    fn deinit(&mut self) -> Result<(), AlgorithmError>;
}

/// Builds an algorithm bound to a data path and device name.
pub trait AlgorithmFactory: Send + Sync {
    fn create(&self, path: &Path, device: &str)
        -> Result<Box<dyn VerificationAlgorithm>, AlgorithmError>;
}

impl<F> AlgorithmFactory for F
where
    F: Fn(&Path, &str) -> Result<Box<dyn VerificationAlgorithm>, AlgorithmError> + Send + Sync,
{
    fn create(
        &self,
        path: &Path,
        device: &str,
    ) -> Result<Box<dyn VerificationAlgorithm>, AlgorithmError> {
        self(path, device)
    }
}

/// Algorithm that accepts every device. Used when no verifier is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl VerificationAlgorithm for AcceptAll {
    fn init(&mut self) -> Result<(), AlgorithmError> {
        Ok(())
    }

    fn process(&mut self) -> bool {
        true
    }

    fn deinit(&mut self) -> Result<(), AlgorithmError> {
        Ok(())
    }
}

impl AlgorithmFactory for AcceptAll {
    fn create(&self, _: &Path, _: &str) -> Result<Box<dyn VerificationAlgorithm>, AlgorithmError> {
        Ok(Box::new(AcceptAll))
    }
}

/// Runs an external verifier executable as `<program> <data_path> <device>`.
///
/// Exit status 0 means the device passed.
#[derive(Debug, Clone)]
pub struct CommandVerifier {
    program: PathBuf,
    path: PathBuf,
    device: String,
}

impl CommandVerifier {
    pub fn new(program: impl Into<PathBuf>, path: &Path, device: &str) -> Self {
        Self {
            program: program.into(),
            path: path.to_path_buf(),
            device: device.to_string(),
        }
    }
}

impl VerificationAlgorithm for CommandVerifier {
    fn init(&mut self) -> Result<(), AlgorithmError> {
        if !self.program.is_file() {
            return Err(AlgorithmError::Init(format!(
                "verifier not found: {}",
                self.program.display()
            )));
        }
        Ok(())
    }

    fn process(&mut self) -> bool {
        let output = Command::new(&self.program)
            .arg(&self.path)
            .arg(&self.device)
            .stdin(Stdio::null())
            .output();

        match output {
            Ok(output) => {
                debug!(
                    device = %self.device,
                    status = ?output.status.code(),
                    "verifier finished"
                );
                if !output.status.success() {
                    for line in String::from_utf8_lossy(&output.stderr).lines() {
                        warn!(device = %self.device, "verifier: {}", line);
                    }
                }
                output.status.success()
            }
            Err(e) => {
                warn!(device = %self.device, error = %e, "failed to run verifier");
                false
            }
        }
    }

    fn deinit(&mut self) -> Result<(), AlgorithmError> {
        Ok(())
    }
}

/// Factory for [`CommandVerifier`].
#[derive(Debug, Clone)]
pub struct CommandVerifierFactory {
    program: PathBuf,
}

impl CommandVerifierFactory {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl AlgorithmFactory for CommandVerifierFactory {
    fn create(
        &self,
        path: &Path,
        device: &str,
    ) -> Result<Box<dyn VerificationAlgorithm>, AlgorithmError> {
        Ok(Box::new(CommandVerifier::new(&self.program, path, device)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_accept_all() {
        let mut alg = AcceptAll.create(Path::new("/tmp"), "dev").unwrap();
        alg.init().unwrap();
        assert!(alg.process());
        alg.deinit().unwrap();
    }

    #[test]
    fn test_closure_factory() {
        let factory = |_: &Path, device: &str| -> Result<Box<dyn VerificationAlgorithm>, AlgorithmError> {
            if device.is_empty() {
                Err(AlgorithmError::Create("no device".to_string()))
            } else {
                Ok(Box::new(AcceptAll))
            }
        };
        assert!(factory.create(Path::new("/tmp"), "").is_err());
        assert!(factory.create(Path::new("/tmp"), "dev").is_ok());
    }

    #[test]
    fn test_command_verifier_missing_program() {
        let temp = TempDir::new().unwrap();
        let mut alg = CommandVerifier::new(temp.path().join("absent"), temp.path(), "dev");
        assert!(matches!(alg.init(), Err(AlgorithmError::Init(_))));
        assert!(!alg.process());
    }

    #[test]
    #[cfg(unix)]
    fn test_command_verifier_exit_status() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let script = temp.path().join("verify.sh");
        std::fs::write(&script, "#!/bin/sh\n[ \"$2\" = \"good\" ]\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let factory = CommandVerifierFactory::new(&script);
        let mut good = factory.create(temp.path(), "good").unwrap();
        good.init().unwrap();
        assert!(good.process());

        let mut bad = factory.create(temp.path(), "bad").unwrap();
        bad.init().unwrap();
        assert!(!bad.process());
    }
}
