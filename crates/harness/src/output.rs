//! Publishing scenario outputs to CI

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::HarnessResult;

/// Where scenario outputs go
pub trait OutputChannel: Send + Sync {
    fn set_output(&self, key: &str, value: &str) -> HarnessResult<()>;

    fn set_failed(&self, message: &str) -> HarnessResult<()>;

    fn info(&self, message: &str) -> HarnessResult<()>;
}

/// GitHub Actions workflow-command output
///
/// Outputs are appended to the file named by `GITHUB_OUTPUT` as heredoc blocks.
/// Without that file they fall back to `::set-output` commands on stdout.
#[derive(Debug, Clone, Default)]
pub struct GithubActionsOutput {
    output_file: Option<PathBuf>,
}

impl GithubActionsOutput {
    pub fn new(output_file: Option<PathBuf>) -> Self {
        Self { output_file }
    }

    pub fn from_env() -> Self {
        Self::new(
            std::env::var_os("GITHUB_OUTPUT")
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
        )
    }
}

impl OutputChannel for GithubActionsOutput {
    fn set_output(&self, key: &str, value: &str) -> HarnessResult<()> {
        match &self.output_file {
            Some(path) => {
                let delimiter = format!("ghadelimiter_{}", Uuid::new_v4());
                let mut file = OpenOptions::new().create(true).append(true).open(path)?;
                writeln!(file, "{}<<{}", key, delimiter)?;
                writeln!(file, "{}", value)?;
                writeln!(file, "{}", delimiter)?;
                debug!(key, bytes = value.len(), "output written");
            }
            None => println!("::set-output name={}::{}", key, escape_data(value)),
        }
        Ok(())
    }

    fn set_failed(&self, message: &str) -> HarnessResult<()> {
        println!("::error::{}", escape_data(message));
        Ok(())
    }

    fn info(&self, message: &str) -> HarnessResult<()> {
        println!("{}", message);
        Ok(())
    }
}

fn escape_data(value: &str) -> String {
    value
        .replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

/// Keeps everything in memory
#[derive(Debug, Default)]
pub struct RecordingOutput {
    outputs: Mutex<BTreeMap<String, String>>,
    failure: Mutex<Option<String>>,
    infos: Mutex<Vec<String>>,
}

impl RecordingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output(&self, key: &str) -> Option<String> {
        self.outputs.lock().get(key).cloned()
    }

    pub fn outputs(&self) -> BTreeMap<String, String> {
        self.outputs.lock().clone()
    }

    pub fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }

    pub fn infos(&self) -> Vec<String> {
        self.infos.lock().clone()
    }
}

impl OutputChannel for RecordingOutput {
    fn set_output(&self, key: &str, value: &str) -> HarnessResult<()> {
        self.outputs.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn set_failed(&self, message: &str) -> HarnessResult<()> {
        *self.failure.lock() = Some(message.to_string());
        Ok(())
    }

    fn info(&self, message: &str) -> HarnessResult<()> {
        self.infos.lock().push(message.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_file_uses_heredoc_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("github_output");
        let output = GithubActionsOutput::new(Some(path.clone()));

        output.set_output("success", "true").unwrap();
        output.set_output("error", "line one\nline two").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 7);
        assert!(lines[0].starts_with("success<<ghadelimiter_"));
        assert_eq!(lines[1], "true");
        assert_eq!(lines[2], &lines[0]["success<<".len()..]);
        assert!(lines[3].starts_with("error<<ghadelimiter_"));
        assert_eq!(&lines[4..6], &["line one", "line two"]);
    }

    #[test]
    fn test_escape_data() {
        assert_eq!(escape_data("50%\r\ndone"), "50%25%0D%0Adone");
    }

    #[test]
    fn test_recording_output() {
        let output = RecordingOutput::new();
        output.set_output("success", "false").unwrap();
        output.set_failed("boom").unwrap();
        output.info("hello").unwrap();

        assert_eq!(output.output("success").as_deref(), Some("false"));
        assert_eq!(output.failure().as_deref(), Some("boom"));
        assert_eq!(output.infos(), vec!["hello"]);
    }
}
