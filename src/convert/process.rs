//! External helper process converter (JSON on stdin, JSON on stdout).

use super::{ConvertRequest, ConvertResponse, FileDescriptor, ImageConverter, UploadedFile, WireFile};
use anyhow::{Context, Result};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

pub struct ProcessConverter {
    program: String,
    args: Vec<String>,
}

impl ProcessConverter {
    /// Build from a whitespace-separated command line, e.g. `python3 render_pages.py --scale 2`.
    pub fn from_command_line(command_line: &str) -> Result<Self> {
        let mut words = command_line.split_whitespace().map(str::to_string);
        let program = words
            .next()
            .context("Converter command line is empty")?;

        Ok(Self {
            program,
            args: words.collect(),
        })
    }
}

#[async_trait::async_trait]
impl ImageConverter for ProcessConverter {
    fn name(&self) -> &str {
        "process"
    }

    async fn convert_pdf(&self, file: &UploadedFile) -> Result<Vec<FileDescriptor>> {
        let payload = serde_json::to_vec(&ConvertRequest {
            files: vec![WireFile::from_upload(file)],
        })?;

        info!("ProcessConverter: running {} ({} byte payload)", self.program, payload.len());

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start converter: {}", self.program))?;

        // stdin is fed concurrently: the converter may fill stderr before reading all input.
        let mut stdin = child.stdin.take().context("Converter stdin unavailable")?;
        let writer = tokio::spawn(async move {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await
        });

        let output = child
            .wait_with_output()
            .await
            .context("Failed to wait for converter")?;

        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("ProcessConverter: converter closed stdin early: {}", e),
            Err(e) => return Err(e).context("Converter input task panicked"),
        }

        debug!(
            "ProcessConverter: exit={} stdout={} bytes",
            output.status,
            output.stdout.len()
        );

        let response: ConvertResponse = serde_json::from_slice(&output.stdout).with_context(|| {
            format!(
                "Converter exited with {} and unreadable output: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )
        })?;

        response.into_descriptors()
    }
}
