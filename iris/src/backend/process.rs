//! Spawned-script backend

use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use super::invoker::BackendInvoker;
use super::{prediction_start, validate_payload};
use crate::error::BackendError;
use crate::model::{InputKey, ModelIdentity};

/// Runs `program args... <image_url> <model_ref> [labels_ref]` per prediction
/// and treats the JSON document at the end of stdout as the payload.
pub struct ProcessBackend {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
}

impl ProcessBackend {
    pub fn new(
        program: &str,
        args: Vec<String>,
        working_dir: Option<PathBuf>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        if program.trim().is_empty() {
            anyhow::bail!("process backend requires a program");
        }
        Ok(Self {
            program: program.to_string(),
            args,
            working_dir,
            timeout,
        })
    }

    fn command(&self, key: &InputKey, model: &ModelIdentity) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(key.as_str())
            .arg(&model.model_ref);
        if let Some(labels) = &model.labels_ref {
            cmd.arg(labels);
        }
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl BackendInvoker for ProcessBackend {
    async fn invoke(&self, key: &InputKey, model: &ModelIdentity) -> Result<Bytes, BackendError> {
        let mut cmd = self.command(key, model);

        let output = match timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(BackendError::Unavailable(format!(
                    "failed to run '{}': {}",
                    self.program, e
                )))
            }
            Err(_) => return Err(BackendError::Timeout(self.timeout)),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let text = if stderr.trim().is_empty() {
                String::from_utf8_lossy(&output.stdout).trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(BackendError::Exited {
                code: output.status.code(),
                output: text,
            });
        }

        let stdout = Bytes::from(output.stdout);
        let payload = stdout.slice(prediction_start(&stdout)..);
        validate_payload(&payload)?;
        Ok(payload)
    }

    fn name(&self) -> &str {
        "process"
    }
}
