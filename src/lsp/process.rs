//! Language server child process supervision.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

use super::LspError;

/// A supervised language server child.
///
/// The stdio pipes are handed to the RPC engine at spawn time; this handle
/// retains only the process itself. `kill_on_drop` backs the termination
/// guarantee if the handle is dropped without an explicit [`kill`](Self::kill).
#[derive(Debug)]
pub struct ServerProcess {
    child: Child,
}

impl ServerProcess {
    /// Spawns `server_path` with piped stdio, appending
    /// `--compile-commands-dir=<dir>` when configured.
    ///
    /// Stderr is drained on its own task and line-forwarded to the host log
    /// so the child can never block on a full pipe.
    pub fn spawn(
        language: &str,
        server_path: &str,
        compile_commands_dir: Option<&str>,
    ) -> Result<(Self, ChildStdin, ChildStdout), LspError> {
        let mut cmd = Command::new(server_path);
        if let Some(dir) = compile_commands_dir {
            cmd.arg(format!("--compile-commands-dir={dir}"));
        }

        let mut child = cmd
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(LspError::Spawn)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| LspError::Spawn(std::io::Error::other("stdin not piped")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LspError::Spawn(std::io::Error::other("stdout not piped")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| LspError::Spawn(std::io::Error::other("stderr not piped")))?;

        let lang = language.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "lsp_stderr", language = %lang, "{}", line);
            }
        });

        debug!(language, server = server_path, pid = child.id(), "language server spawned");
        Ok((Self { child }, stdin, stdout))
    }

    /// OS process id, if the child has not already been reaped.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Forces the child to exit and reaps it. This gateway does not perform
    /// the LSP `shutdown`/`exit` handshake; termination is by signal.
    pub async fn kill(&mut self) {
        // The process may have already exited on its own.
        let _ = self.child.kill().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn spawn_pipes_stdio_and_kill_reaps() {
        let (mut proc, mut stdin, mut stdout) =
            ServerProcess::spawn("test", "/bin/cat", None).unwrap();
        stdin.write_all(b"ping").await.unwrap();
        stdin.flush().await.unwrap();

        let mut buf = [0u8; 4];
        stdout.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        assert!(proc.id().is_some());
        proc.kill().await;
        assert!(proc.id().is_none());
    }

    #[tokio::test]
    async fn spawn_missing_binary_fails() {
        let err = ServerProcess::spawn("test", "/no/such/binary", None).unwrap_err();
        assert!(matches!(err, LspError::Spawn(_)), "{err}");
    }
}
