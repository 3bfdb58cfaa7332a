//! External command runner
//!
//! Client tools (psql, pg_dump, mysql, mysqldump) are spawned through here so
//! every invocation gets the same timeout, optional `docker exec` wrapping and
//! error reporting (failing command line plus captured stderr).

use crate::error::{DblError, DblResult};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// A single program invocation
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Command line for diagnostics; environment values are never shown
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Spawns invocations with a finite timeout
#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Duration,
    container: Option<String>,
}

impl CommandRunner {
    pub fn new(timeout: Duration, container: Option<String>) -> Self {
        Self { timeout, container }
    }

    /// Rewrite the invocation to run inside the configured container
    fn wrap(&self, invocation: Invocation) -> Invocation {
        match &self.container {
            None => invocation,
            Some(container) => {
                let mut wrapped = Invocation::new("docker").arg("exec");
                if invocation.stdin.is_some() {
                    wrapped = wrapped.arg("-i");
                }
                for (key, value) in &invocation.env {
                    wrapped = wrapped.arg("-e").arg(format!("{}={}", key, value));
                }
                wrapped = wrapped
                    .arg(container.clone())
                    .arg(invocation.program)
                    .args(invocation.args);
                wrapped.stdin = invocation.stdin;
                wrapped
            }
        }
    }

    /// Run to completion and return trimmed stdout
    pub async fn run(&self, invocation: Invocation) -> DblResult<String> {
        let invocation = self.wrap(invocation);
        let shown = invocation.display();
        debug!("Running: {}", shown);

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let execution = async {
            let mut child = command.spawn().map_err(|e| DblError::Engine {
                command: shown.clone(),
                diagnostics: e.to_string(),
            })?;

            // Feed stdin from a separate task so a chatty child cannot fill its
            // stdout pipe while we are still writing.
            let writer = match (invocation.stdin, child.stdin.take()) {
                (Some(input), Some(mut pipe)) => Some(tokio::spawn(async move {
                    let result = pipe.write_all(input.as_bytes()).await;
                    drop(pipe);
                    result
                })),
                _ => None,
            };

            let output = child.wait_with_output().await?;
            if let Some(writer) = writer {
                // A broken pipe here means the child exited early; its status says why.
                let _ = writer.await;
            }
            Ok::<_, DblError>(output)
        };

        let output = tokio::time::timeout(self.timeout, execution)
            .await
            .map_err(|_| DblError::Timeout {
                command: shown.clone(),
                seconds: self.timeout.as_secs(),
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(DblError::Engine {
                command: shown,
                diagnostics: if stderr.is_empty() {
                    output.status.to_string()
                } else {
                    stderr
                },
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_hides_environment() {
        let invocation = Invocation::new("psql")
            .args(["-d", "shop"])
            .env("PGPASSWORD", "secret");
        assert_eq!(invocation.display(), "psql -d shop");
    }

    #[test]
    fn test_docker_wrapping_forwards_env_and_stdin() {
        let runner = CommandRunner::new(Duration::from_secs(5), Some("pg".to_string()));
        let wrapped = runner.wrap(
            Invocation::new("psql")
                .arg("-d")
                .arg("shop")
                .env("PGPASSWORD", "pw")
                .stdin("SELECT 1;"),
        );
        assert_eq!(wrapped.program, "docker");
        assert_eq!(
            wrapped.args,
            vec!["exec", "-i", "-e", "PGPASSWORD=pw", "pg", "psql", "-d", "shop"]
        );
        assert_eq!(wrapped.stdin.as_deref(), Some("SELECT 1;"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_captures_stdout_and_stdin() {
        let runner = CommandRunner::new(Duration::from_secs(5), None);
        let out = runner
            .run(Invocation::new("cat").stdin("hello\n"))
            .await
            .unwrap();
        assert_eq!(out, "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_command_reports_invocation() {
        let runner = CommandRunner::new(Duration::from_secs(5), None);
        let err = runner
            .run(Invocation::new("sh").args(["-c", "echo nope >&2; exit 3"]))
            .await
            .unwrap_err();
        match err {
            DblError::Engine {
                command,
                diagnostics,
            } => {
                assert!(command.starts_with("sh -c"));
                assert_eq!(diagnostics, "nope");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_child() {
        let runner = CommandRunner::new(Duration::from_millis(100), None);
        let err = runner
            .run(Invocation::new("sleep").arg("5"))
            .await
            .unwrap_err();
        assert!(matches!(err, DblError::Timeout { .. }));
    }
}
