//! Spawns one process per invocation and exchanges JSON over stdio.
//!
//! The request is written to stdin as a single JSON document. The process
//! prints its result between [`OUTPUT_START_MARKER`] and
//! [`OUTPUT_END_MARKER`]; anything else on stdout is ignored, and stderr is
//! forwarded to tracing.

use std::{
    collections::{HashMap, VecDeque},
    path::PathBuf,
    process::Stdio,
    time::{Duration, Instant},
};

use {
    async_trait::async_trait,
    courier_config::AgentConfig,
    serde::Deserialize,
    tokio::{
        io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader},
        process::{Child, ChildStderr, Command},
    },
    tracing::{debug, info, warn},
};

use crate::{
    Error, Result,
    runtime::{AgentReply, AgentRequest, AgentRuntime},
};

pub const OUTPUT_START_MARKER: &str = "---COURIER_OUTPUT_START---";
pub const OUTPUT_END_MARKER: &str = "---COURIER_OUTPUT_END---";

/// Time between SIGTERM and SIGKILL for a timed-out process.
pub const DEFAULT_TERMINATION_GRACE: Duration = Duration::from_secs(5);

const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum OutputStatus {
    Success,
    Error,
}

#[derive(Debug, Deserialize)]
struct AgentOutput {
    status: OutputStatus,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Runs a configured command (e.g. `docker run -i --rm image`) per request.
#[derive(Debug, Clone)]
pub struct CommandRuntime {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
    termination_grace: Duration,
    max_output_bytes: usize,
}

impl CommandRuntime {
    pub fn new(command: impl Into<String>) -> Self {
        let defaults = AgentConfig::default();
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            timeout: Duration::from_secs(defaults.timeout_secs),
            termination_grace: DEFAULT_TERMINATION_GRACE,
            max_output_bytes: defaults.max_output_bytes,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            env: config.env.clone(),
            working_dir: config.working_dir.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            termination_grace: DEFAULT_TERMINATION_GRACE,
            max_output_bytes: config.max_output_bytes,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_termination_grace(mut self, grace: Duration) -> Self {
        self.termination_grace = grace;
        self
    }

    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn termination_grace(&self) -> Duration {
        self.termination_grace
    }
}

#[async_trait]
impl AgentRuntime for CommandRuntime {
    async fn run(&self, request: AgentRequest) -> Result<AgentReply> {
        let payload = serde_json::to_vec(&request)?;
        let conversation_id = request.conversation_id;

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            command: self.command.clone(),
            source,
        })?;
        debug!(conversation_id = %conversation_id, pid = child.id(), "agent spawned");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("agent stdout not captured"))?;
        let stdout_task = tokio::spawn(read_capped(stdout, self.max_output_bytes));
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(collect_stderr(stderr, conversation_id.clone())));
        let mut stdin = child.stdin.take();

        let waited = tokio::time::timeout(self.timeout, async {
            if let Some(mut stdin) = stdin.take() {
                // The process may exit without reading its input.
                if let Err(e) = stdin.write_all(&payload).await {
                    debug!(conversation_id = %conversation_id, error = %e, "agent stdin closed early");
                }
            }
            child.wait().await
        })
        .await;

        let status = match waited {
            Ok(status) => status?,
            Err(_) => {
                warn!(
                    conversation_id = %conversation_id,
                    timeout_secs = self.timeout.as_secs(),
                    "agent timed out, terminating"
                );
                terminate(&mut child, self.termination_grace).await;
                stdout_task.abort();
                return Err(Error::Timeout {
                    after: self.timeout,
                });
            },
        };

        let (stdout, truncated) = stdout_task.await.map_err(std::io::Error::other)??;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if !status.success() {
            warn!(conversation_id = %conversation_id, code = ?status.code(), elapsed_ms, "agent exited with failure");
            return Err(Error::Exited {
                code: status.code(),
                stderr,
            });
        }
        if truncated {
            return Err(Error::malformed(format!(
                "output exceeded {} bytes",
                self.max_output_bytes
            )));
        }

        let reply = parse_output(&String::from_utf8_lossy(&stdout))?;
        info!(
            conversation_id = %conversation_id,
            elapsed_ms,
            replied = reply.text.is_some(),
            "agent finished"
        );
        Ok(reply)
    }
}

/// Extract the reply from the last marked output block.
pub(crate) fn parse_output(stdout: &str) -> Result<AgentReply> {
    let start = stdout
        .rfind(OUTPUT_START_MARKER)
        .ok_or_else(|| Error::malformed("missing output start marker"))?;
    let rest = &stdout[start + OUTPUT_START_MARKER.len()..];
    let end = rest
        .find(OUTPUT_END_MARKER)
        .ok_or_else(|| Error::malformed("missing output end marker"))?;

    let output: AgentOutput =
        serde_json::from_str(rest[..end].trim()).map_err(|e| Error::malformed(e.to_string()))?;
    match output.status {
        OutputStatus::Success => Ok(AgentReply {
            text: output.result.filter(|text| !text.trim().is_empty()),
        }),
        OutputStatus::Error => Err(Error::failed(
            output.error.unwrap_or_else(|| "no error message".into()),
        )),
    }
}

/// Read everything, keeping at most `max` bytes. Returns whether bytes were
/// dropped.
async fn read_capped<R: AsyncRead + Unpin>(
    mut reader: R,
    max: usize,
) -> std::io::Result<(Vec<u8>, bool)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut truncated = false;
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = max.saturating_sub(buf.len());
        if n > room {
            truncated = true;
        }
        buf.extend_from_slice(&chunk[..n.min(room)]);
    }
    Ok((buf, truncated))
}

async fn collect_stderr(stderr: ChildStderr, conversation_id: String) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "courier_agent", conversation_id = %conversation_id, "{line}");
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Vec::from(tail).join("\n")
}

/// SIGTERM, then SIGKILL if the process is still alive after `grace`.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        use nix::{
            sys::signal::{Signal, kill},
            unistd::Pid,
        };

        if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
            let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
            if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
                debug!(?status, "agent exited after SIGTERM");
                return;
            }
            warn!(pid, "agent ignored SIGTERM, killing");
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to kill agent process");
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> AgentRequest {
        AgentRequest {
            conversation_id: "c1".into(),
            assistant_name: "Andy".into(),
            context: "<messages conversation=\"c1\"></messages>".into(),
        }
    }

    fn marked(json: &str) -> String {
        format!("log line\n{OUTPUT_START_MARKER}\n{json}\n{OUTPUT_END_MARKER}\n")
    }

    #[test]
    fn parses_success() {
        let reply = parse_output(&marked(r#"{"status":"success","result":"hi"}"#)).unwrap();
        assert_eq!(reply.text.as_deref(), Some("hi"));
    }

    #[test]
    fn blank_result_is_silent() {
        let reply = parse_output(&marked(r#"{"status":"success","result":"  "}"#)).unwrap();
        assert_eq!(reply, AgentReply::silent());
        let reply = parse_output(&marked(r#"{"status":"success"}"#)).unwrap();
        assert!(reply.text.is_none());
    }

    #[test]
    fn error_status_is_failure() {
        let err = parse_output(&marked(r#"{"status":"error","error":"quota"}"#)).unwrap_err();
        assert!(matches!(err, Error::Failed { ref message } if message == "quota"));
    }

    #[test]
    fn last_block_wins() {
        let out = format!(
            "{}{}",
            marked(r#"{"status":"success","result":"draft"}"#),
            marked(r#"{"status":"success","result":"final"}"#)
        );
        assert_eq!(parse_output(&out).unwrap().text.as_deref(), Some("final"));
    }

    #[test]
    fn missing_markers_are_malformed() {
        assert!(matches!(
            parse_output("just text"),
            Err(Error::Malformed { .. })
        ));
        assert!(matches!(
            parse_output(&format!("{OUTPUT_START_MARKER}\n{{}}")),
            Err(Error::Malformed { .. })
        ));
        assert!(matches!(
            parse_output(&marked("not json")),
            Err(Error::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn read_capped_flags_overflow() {
        let (buf, truncated) = read_capped(&b"0123456789"[..], 4).await.unwrap();
        assert_eq!(buf, b"0123");
        assert!(truncated);
        let (buf, truncated) = read_capped(&b"0123"[..], 4).await.unwrap();
        assert_eq!(buf, b"0123");
        assert!(!truncated);
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let runtime = CommandRuntime::new("/nonexistent/courier-agent-binary");
        assert!(matches!(
            runtime.run(request()).await,
            Err(Error::Spawn { .. })
        ));
    }

    #[cfg(unix)]
    mod process {
        use super::*;

        fn sh(script: &str) -> CommandRuntime {
            CommandRuntime::new("sh")
                .with_args(["-c", script])
                .with_timeout(Duration::from_secs(10))
        }

        fn reply_script(json: &str) -> String {
            format!(
                "cat >/dev/null; printf '%s\\n' '{OUTPUT_START_MARKER}' '{json}' '{OUTPUT_END_MARKER}'"
            )
        }

        #[tokio::test]
        async fn returns_reply() {
            let runtime = sh(&reply_script(r#"{"status":"success","result":"hello"}"#));
            let reply = runtime.run(request()).await.unwrap();
            assert_eq!(reply.text.as_deref(), Some("hello"));
        }

        #[tokio::test]
        async fn receives_request_on_stdin() {
            let script = format!(
                "input=$(cat); case \"$input\" in *'\"conversation_id\":\"c1\"'*) {} ;; *) exit 3 ;; esac",
                reply_script(r#"{"status":"success","result":"seen"}"#)
            );
            let reply = sh(&script).run(request()).await.unwrap();
            assert_eq!(reply.text.as_deref(), Some("seen"));
        }

        #[tokio::test]
        async fn passes_env() {
            let script = format!(
                "cat >/dev/null; printf '%s\\n' '{OUTPUT_START_MARKER}' \"{{\\\"status\\\":\\\"success\\\",\\\"result\\\":\\\"$COURIER_TEST\\\"}}\" '{OUTPUT_END_MARKER}'"
            );
            let reply = sh(&script)
                .with_env("COURIER_TEST", "from-env")
                .run(request())
                .await
                .unwrap();
            assert_eq!(reply.text.as_deref(), Some("from-env"));
        }

        #[tokio::test]
        async fn nonzero_exit_carries_stderr() {
            let err = sh("echo boom >&2; exit 2").run(request()).await.unwrap_err();
            match err {
                Error::Exited { code, stderr } => {
                    assert_eq!(code, Some(2));
                    assert!(stderr.contains("boom"));
                },
                other => panic!("unexpected error: {other}"),
            }
        }

        #[tokio::test]
        async fn timeout_terminates_process() {
            let runtime = sh("exec sleep 30")
                .with_timeout(Duration::from_millis(200))
                .with_termination_grace(Duration::from_secs(2));
            let started = Instant::now();
            let err = runtime.run(request()).await.unwrap_err();
            assert!(err.is_timeout());
            assert!(started.elapsed() < Duration::from_secs(10));
        }

        #[tokio::test]
        async fn oversized_output_is_malformed() {
            let runtime = sh(&reply_script(r#"{"status":"success","result":"a long enough reply"}"#))
                .with_max_output_bytes(16);
            assert!(matches!(
                runtime.run(request()).await,
                Err(Error::Malformed { .. })
            ));
        }

        #[tokio::test]
        async fn runs_in_working_dir() {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
            let script = format!(
                "cat >/dev/null; test -f marker.txt || exit 4; {}",
                reply_script(r#"{"status":"success","result":"found"}"#)
                    .trim_start_matches("cat >/dev/null; ")
            );
            let reply = sh(&script)
                .with_working_dir(dir.path())
                .run(request())
                .await
                .unwrap();
            assert_eq!(reply.text.as_deref(), Some("found"));
        }

        #[tokio::test]
        async fn unmarked_output_is_malformed() {
            assert!(matches!(
                sh("cat >/dev/null; echo hello").run(request()).await,
                Err(Error::Malformed { .. })
            ));
        }
    }
}
