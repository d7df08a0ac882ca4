//! Archive Jobs
//!
//! Wraps a `tar` child process producing an archive on its stdout. Member names go to the
//! child's stdin as a NUL-separated list, so the store size is not bounded by the
//! command-line limit. The job owns the child: `stream_into` relays the output and waits
//! for the child on every path, killing it first when the consumer went away.

use crate::error::StorageError;
use crate::transport::relay::{self, RelayError};

use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::process::{Child, ChildStdin, Command};

pub struct ArchiveJob {
    child: Option<Child>,
    /// Member names, relative to the archive root.
    files: Vec<String>,
}

impl ArchiveJob {
    /// An archive with no members. Streams zero bytes.
    pub fn empty() -> Self {
        Self {
            child: None,
            files: Vec::new(),
        }
    }

    /// Starts `tar` over `files`, given relative to `root`.
    pub fn spawn(root: &Path, files: Vec<String>) -> Result<Self, StorageError> {
        if files.is_empty() {
            return Ok(Self::empty());
        }

        let mut command = Command::new("tar");
        command
            .arg("-cf")
            .arg("-")
            .arg("-C")
            .arg(root)
            .arg("--null")
            .arg("-T")
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|e| StorageError::Archive(format!("failed to start tar: {}", e)))?;

        tracing::info!(
            "Started archive of {} file(s) under {} (pid {:?})",
            files.len(),
            root.display(),
            child.id()
        );

        Ok(Self {
            child: Some(child),
            files,
        })
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Process id of the running `tar`, if one was started.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Relays the archive into `sink`, ends the sink and reaps the child.
    pub async fn stream_into<W>(mut self, sink: &mut W) -> Result<u64, RelayError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let Some(mut child) = self.child.take() else {
            sink.shutdown().await.map_err(RelayError::Sink)?;
            return Ok(0);
        };

        let Some(stdout) = child.stdout.take() else {
            reap(&mut child, true).await;
            return Err(RelayError::Source(std::io::Error::other(
                "tar stdout was not captured",
            )));
        };

        let Some(stdin) = child.stdin.take() else {
            reap(&mut child, true).await;
            return Err(RelayError::Source(std::io::Error::other(
                "tar stdin was not captured",
            )));
        };

        // The list is fed concurrently: tar starts writing before it has read every name
        let feeder = tokio::spawn(feed_names(stdin, std::mem::take(&mut self.files)));

        let result = relay::relay_to_end(relay::chunks(stdout), sink).await;

        reap(&mut child, result.is_err()).await;

        // Once the child is gone its stdin is closed, so the feeder cannot block
        match feeder.await {
            Ok(Ok(count)) => {
                if let Ok(bytes) = result {
                    tracing::info!("Archive of {} file(s) sent ({} bytes)", count, bytes);
                }
            }
            Ok(Err(e)) => tracing::warn!("Could not pass the member list to tar: {}", e),
            Err(e) => tracing::error!("Member list task failed: {}", e),
        }

        result
    }
}

/// Writes `./<name>\0` per member and closes the pipe. Returns the number of names.
async fn feed_names(stdin: ChildStdin, files: Vec<String>) -> std::io::Result<usize> {
    let mut stdin = BufWriter::new(stdin);
    for file in &files {
        // `./` keeps names starting with '-' from being read as options
        stdin.write_all(b"./").await?;
        stdin.write_all(file.as_bytes()).await?;
        stdin.write_all(&[0]).await?;
    }
    stdin.shutdown().await?;
    Ok(files.len())
}

async fn reap(child: &mut Child, abort: bool) {
    if abort && let Err(e) = child.start_kill() {
        tracing::debug!("tar already exited before kill: {}", e);
    }

    match child.wait().await {
        Ok(status) if status.success() => tracing::debug!("tar exited cleanly"),
        Ok(status) if abort => tracing::debug!("tar stopped after aborted relay: {}", status),
        Ok(status) => tracing::warn!("tar exited with {}, archive may be truncated", status),
        Err(e) => tracing::error!("Failed to reap tar: {}", e),
    }
}
