use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use lmx_types::{LoadResult, LoadSpec, LoaderFailure};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use super::LoaderProtocol;

/// Spawns the `lmx-loader` worker binary for each load attempt.
///
/// One call to [`ChildLoader::load`] is one child process: write one
/// `LoadSpec` line to its stdin, close stdin, read one reply line from its
/// stdout, then wait for exit. A worker that exits non-zero, is killed by a
/// signal, or never produces a parseable reply line is converted into a
/// [`LoaderFailure::crashed`]; exceeding `timeout` kills the worker and
/// yields [`LoaderFailure::timeout`].
pub struct ChildLoader {
    binary_path: PathBuf,
    timeout: Duration,
}

impl ChildLoader {
    pub fn new(binary_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary_path: binary_path.into(),
            timeout,
        }
    }

    async fn run(&self, spec: LoadSpec) -> Result<LoadResult, LoaderFailure> {
        let mut child = Command::new(&self.binary_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LoaderFailure {
                code: "loader_spawn_failed".to_string(),
                message: format!("failed to spawn loader worker: {e}"),
                exit_code: None,
                signal: None,
                metadata: Default::default(),
            })?;

        let mut stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let mut request_line = serde_json::to_string(&spec).map_err(|e| LoaderFailure {
            code: "loader_encode_failed".to_string(),
            message: format!("failed to encode load spec: {e}"),
            exit_code: None,
            signal: None,
            metadata: Default::default(),
        })?;
        request_line.push('\n');

        if let Err(e) = stdin.write_all(request_line.as_bytes()).await {
            warn!(error = %e, "failed writing load spec to loader stdin");
        }
        drop(stdin);

        let mut reply_line = String::new();
        let mut reader = BufReader::new(stdout);
        let read_result = reader.read_line(&mut reply_line).await;

        let mut stderr_tail = String::new();
        let _ = BufReader::new(stderr).read_to_string(&mut stderr_tail).await;

        let status = match child.wait().await {
            Ok(status) => status,
            Err(e) => {
                return Err(LoaderFailure {
                    code: "loader_wait_failed".to_string(),
                    message: format!("failed waiting on loader worker: {e}"),
                    exit_code: None,
                    signal: None,
                    metadata: Default::default(),
                })
            }
        };

        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        if status.success() {
            if let Ok(n) = read_result {
                if n > 0 {
                    match serde_json::from_str::<LoadResult>(reply_line.trim_end()) {
                        Ok(result) => return Ok(result),
                        Err(_) => {
                            if let Ok(failure) =
                                serde_json::from_str::<LoaderFailure>(reply_line.trim_end())
                            {
                                return Err(failure);
                            }
                        }
                    }
                }
            }
        }

        debug!(
            exit_code = status.code(),
            signal, stderr_tail, "loader worker exited without a usable structured result"
        );
        Err(LoaderFailure::crashed(status.code(), signal, stderr_tail))
    }
}

#[async_trait]
impl LoaderProtocol for ChildLoader {
    async fn load(&self, spec: LoadSpec) -> Result<LoadResult, LoaderFailure> {
        match tokio::time::timeout(self.timeout, self.run(spec)).await {
            Ok(result) => result,
            Err(_) => Err(LoaderFailure::timeout()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fake_worker_script(body: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake-loader.sh");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh").unwrap();
        writeln!(file, "{body}").unwrap();
        drop(file);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
        }
        (dir, path)
    }

    fn spec() -> LoadSpec {
        LoadSpec {
            model_id: "org/model".to_string(),
            backend: "gguf".to_string(),
            batching: false,
            performance_overrides: Default::default(),
            probe_only: false,
        }
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn successful_worker_yields_load_result() {
        let (_dir, path) = fake_worker_script(
            r#"cat > /dev/null; echo '{"ok":true,"backend":"gguf","reason":null,"telemetry":{}}'"#,
        );
        let loader = ChildLoader::new(path, Duration::from_secs(5));
        let result = loader.load(spec()).await.unwrap();
        assert!(result.ok);
        assert_eq!(result.backend, "gguf");
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn nonzero_exit_becomes_crashed_failure() {
        let (_dir, path) = fake_worker_script("cat > /dev/null; exit 7");
        let loader = ChildLoader::new(path, Duration::from_secs(5));
        let failure = loader.load(spec()).await.unwrap_err();
        assert_eq!(failure.code, "model_loader_crashed");
        assert_eq!(failure.exit_code, Some(7));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn hang_past_timeout_is_killed_and_reported() {
        let (_dir, path) = fake_worker_script("cat > /dev/null; sleep 30");
        let loader = ChildLoader::new(path, Duration::from_millis(100));
        let failure = loader.load(spec()).await.unwrap_err();
        assert_eq!(failure.code, "loader_timeout");
    }
}
