//! CLI subprocess executor: spawns, feeds, times out, and reaps a local
//! subprocess, with safe JSON argument encoding.

mod prompt;
mod sanitize;

pub use prompt::{build_prompt, Message};
pub use sanitize::sanitize_json_param;

use crate::error::ExecutorError;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

/// Which of the three mutually exclusive session-control modes a request
/// is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionControl {
    /// Resume a specific prior session.
    Resume,
    /// Continue whatever session was most recently active.
    ContinueLatest,
    /// Start a new session.
    New,
}

/// Input to the CLI executor. Fields mirror the fixed set of named,
/// optional CLI flags; unknown keys are never accepted.
#[derive(Debug, Clone, Default)]
pub struct ExecutionRequest {
    /// The fully reduced prompt string (already passed through the prompt
    /// builder).
    pub query: String,
    /// Session id to resume, when `session_control == Resume`.
    pub session_id: Option<String>,
    pub session_control: Option<SessionControl>,
    pub model: Option<String>,
    pub fallback_model: Option<String>,
    pub system_prompt: Option<String>,
    pub append_system_prompt: Option<String>,
    pub fork_session: bool,
    pub no_session_persistence: bool,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    pub max_budget_usd: Option<f64>,
    pub permission_mode: Option<String>,
    pub json_schema: Option<Value>,
    pub agent: Option<String>,
    pub agents: Option<Value>,
    pub add_dirs: Vec<String>,
    pub mcp_config: Vec<String>,
    pub strict_mcp_config: bool,
    pub verbose: bool,
    pub betas: Vec<String>,
    pub working_directory: Option<String>,
    pub claude_config_dir: Option<String>,
}

impl ExecutionRequest {
    /// Does this request use any flag that forces `query` onto stdin
    /// instead of being passed positionally? A "variadic" flag here means
    /// `json_schema`, `agents`, `mcp_config`, or `append_system_prompt` —
    /// the flag categories whose values can contain characters or lengths
    /// that make positional argv placement fragile.
    fn has_variadic_flags(&self) -> bool {
        self.json_schema.is_some()
            || self.agents.is_some()
            || !self.mcp_config.is_empty()
            || self.append_system_prompt.is_some()
    }
}

/// Metadata returned alongside a successful execution.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionMetadata {
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub api_duration_ms: u64,
    #[serde(default)]
    pub turns: u32,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub model_usage_map: HashMap<String, Value>,
    #[serde(default)]
    pub uuid: Option<String>,
}

/// Token usage breakdown, all fields defaulting to zero when absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input: u64,
    #[serde(default)]
    pub output: u64,
    #[serde(default)]
    pub cache_read: u64,
    #[serde(default)]
    pub cache_create: u64,
}

/// Result of a single CLI execution.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub ok: bool,
    pub output_text: String,
    pub session_id: Option<String>,
    pub metadata: Option<ExecutionMetadata>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CliOutputEnvelope {
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    duration_ms: u64,
    #[serde(default)]
    api_duration_ms: u64,
    #[serde(default)]
    num_turns: u32,
    #[serde(default)]
    total_cost_usd: f64,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default, rename = "modelUsage")]
    model_usage: Option<HashMap<String, Value>>,
    #[serde(default)]
    uuid: Option<String>,
}

/// Runs a single local subprocess backend with a wall-clock timeout.
pub struct CliExecutor {
    command: String,
    timeout: Duration,
}

impl CliExecutor {
    /// `command` is the binary to invoke (resolved via `PATH`); `timeout`
    /// bounds the subprocess's total wall-clock time.
    pub fn new(command: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            command: command.into(),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    /// Execute `req`, returning the parsed result or the reason execution
    /// could not proceed.
    pub async fn execute(&self, req: &ExecutionRequest) -> Result<ExecutionResult, ExecutorError> {
        if req.query.trim().is_empty() {
            return Err(ExecutorError::EmptyQuery);
        }

        let args = build_argv(req)?;
        let use_stdin = req.has_variadic_flags();

        let mut command = Command::new(&self.command);
        command
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &req.working_directory {
            command.current_dir(dir);
        }
        if let Some(config_dir) = &req.claude_config_dir {
            command.env("CLAUDE_CONFIG_DIR", config_dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| ExecutorError::SpawnFailed(e.to_string()))?;

        let mut stdin = child.stdin.take().expect("stdin was piped");
        let mut stdout = child.stdout.take().expect("stdout was piped");
        let mut stderr = child.stderr.take().expect("stderr was piped");

        if use_stdin {
            let write_result = stdin.write_all(req.query.as_bytes()).await;
            drop(stdin);
            if let Err(e) = write_result {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(ExecutorError::StdinWriteError(e.to_string()));
            }
        } else {
            drop(stdin);
        }

        let wait_result = tokio::select! {
            status = child.wait() => Ok(status),
            _ = tokio::time::sleep(self.timeout) => Err(()),
        };

        let status = match wait_result {
            Ok(status) => status.map_err(|e| ExecutorError::SpawnFailed(e.to_string()))?,
            Err(()) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(ExecutorError::Timeout {
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
        };

        let mut stdout_buf = String::new();
        let mut stderr_buf = String::new();
        let _ = stdout.read_to_string(&mut stdout_buf).await;
        let _ = stderr.read_to_string(&mut stderr_buf).await;

        if !status.success() {
            let message = if stderr_buf.trim().is_empty() {
                format!("exited with code {}", status.code().unwrap_or(-1))
            } else {
                stderr_buf.trim().to_string()
            };
            return Err(ExecutorError::NonZeroExit {
                code: status.code().unwrap_or(-1),
                message,
            });
        }

        Ok(parse_cli_output(&stdout_buf))
    }
}

fn parse_cli_output(stdout: &str) -> ExecutionResult {
    match serde_json::from_str::<CliOutputEnvelope>(stdout) {
        Ok(envelope) => {
            if envelope.is_error || envelope.subtype.as_deref() == Some("error") {
                ExecutionResult {
                    ok: false,
                    output_text: String::new(),
                    session_id: envelope.session_id,
                    metadata: None,
                    error: Some(envelope.output.or(envelope.result).unwrap_or_default()),
                }
            } else {
                ExecutionResult {
                    ok: true,
                    output_text: envelope.result.or(envelope.output).unwrap_or_default(),
                    session_id: envelope.session_id,
                    metadata: Some(ExecutionMetadata {
                        duration_ms: envelope.duration_ms,
                        api_duration_ms: envelope.api_duration_ms,
                        turns: envelope.num_turns,
                        cost_usd: envelope.total_cost_usd,
                        usage: envelope.usage.unwrap_or_default(),
                        model_usage_map: envelope.model_usage.unwrap_or_default(),
                        uuid: envelope.uuid,
                    }),
                    error: None,
                }
            }
        }
        // Text-fallback mode: a non-JSON stdout is treated as a successful
        // plain-text response rather than a parse error.
        Err(_) => ExecutionResult {
            ok: true,
            output_text: stdout.trim().to_string(),
            session_id: None,
            metadata: None,
            error: None,
        },
    }
}

/// Assemble argv in the fixed category order: model, system prompt,
/// session control, tool control, budget, structured output, agent,
/// directory access, MCP, advanced. The query is appended positionally
/// unless a variadic flag forces it onto stdin.
fn build_argv(req: &ExecutionRequest) -> Result<Vec<String>, ExecutorError> {
    let mut args = vec!["-p".to_string(), "--output-format".to_string(), "json".to_string()];

    if let Some(model) = &req.model {
        args.push("--model".to_string());
        args.push(model.clone());
    }
    if let Some(fallback) = &req.fallback_model {
        args.push("--fallback-model".to_string());
        args.push(fallback.clone());
    }

    if let Some(prompt) = &req.system_prompt {
        args.push("--system-prompt".to_string());
        args.push(prompt.clone());
    }
    if let Some(append) = &req.append_system_prompt {
        args.push("--append-system-prompt".to_string());
        args.push(append.clone());
    }

    match req.session_control {
        Some(SessionControl::Resume) => {
            if let Some(id) = &req.session_id {
                args.push("--resume".to_string());
                args.push(id.clone());
            }
        }
        Some(SessionControl::ContinueLatest) => args.push("--continue".to_string()),
        Some(SessionControl::New) | None => {}
    }
    if req.fork_session {
        args.push("--fork-session".to_string());
    }
    if req.no_session_persistence {
        args.push("--no-session-persistence".to_string());
    }

    if !req.allowed_tools.is_empty() {
        args.push("--allowedTools".to_string());
        args.push(req.allowed_tools.join(","));
    }
    if !req.disallowed_tools.is_empty() {
        args.push("--disallowedTools".to_string());
        args.push(req.disallowed_tools.join(","));
    }

    if let Some(budget) = req.max_budget_usd {
        args.push("--max-budget-usd".to_string());
        args.push(budget.to_string());
    }

    if let Some(mode) = &req.permission_mode {
        args.push("--permission-mode".to_string());
        args.push(mode.clone());
    }

    if let Some(schema) = &req.json_schema {
        let encoded = sanitize_json_param("jsonSchema", schema)?;
        args.push("--json-schema".to_string());
        args.push(encoded);
    }

    if let Some(agent) = &req.agent {
        args.push("--agent".to_string());
        args.push(agent.clone());
    }
    if let Some(agents) = &req.agents {
        let encoded = sanitize_json_param("agents", agents)?;
        args.push("--agents".to_string());
        args.push(encoded);
    }

    for dir in &req.add_dirs {
        args.push("--add-dir".to_string());
        args.push(dir.clone());
    }

    for mcp in &req.mcp_config {
        args.push("--mcp-config".to_string());
        args.push(mcp.clone());
    }
    if req.strict_mcp_config {
        args.push("--strict-mcp-config".to_string());
    }

    if req.verbose {
        args.push("--verbose".to_string());
    }
    for beta in &req.betas {
        args.push("--betas".to_string());
        args.push(beta.clone());
    }

    if !req.has_variadic_flags() {
        args.push(req.query.clone());
    }

    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_request() -> ExecutionRequest {
        ExecutionRequest {
            query: "hello".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn empty_query_argv_still_positional() {
        let req = base_request();
        let argv = build_argv(&req).unwrap();
        assert_eq!(argv.last().unwrap(), "hello");
    }

    #[test]
    fn variadic_flag_suppresses_positional_query() {
        let mut req = base_request();
        req.mcp_config = vec!["server.json".to_string()];
        let argv = build_argv(&req).unwrap();
        assert!(!argv.contains(&"hello".to_string()));
        assert!(req.has_variadic_flags());
    }

    #[test]
    fn tool_flags_alone_keep_positional_query() {
        let mut req = base_request();
        req.allowed_tools = vec!["bash".to_string()];
        req.betas = vec!["beta-1".to_string()];
        let argv = build_argv(&req).unwrap();
        assert_eq!(argv.last().unwrap(), "hello");
        assert!(!req.has_variadic_flags());
    }

    #[test]
    fn malicious_json_schema_rejected_before_spawn() {
        let mut req = base_request();
        req.json_schema = Some(json!({"cmd": "$(rm -rf /)"}));
        let err = build_argv(&req).unwrap_err();
        assert!(matches!(err, ExecutorError::InvalidArgument { reason, .. } if reason.contains("shell metacharacters")));
    }

    #[test]
    fn parse_cli_output_success_path() {
        let stdout = r#"{"is_error":false,"result":"hi","session_id":"abc","duration_ms":12,"total_cost_usd":0.01}"#;
        let result = parse_cli_output(stdout);
        assert!(result.ok);
        assert_eq!(result.output_text, "hi");
        assert_eq!(result.session_id.as_deref(), Some("abc"));
        assert_eq!(result.metadata.unwrap().duration_ms, 12);
    }

    #[test]
    fn parse_cli_output_error_subtype() {
        let stdout = r#"{"subtype":"error","output":"boom","session_id":"abc"}"#;
        let result = parse_cli_output(stdout);
        assert!(!result.ok);
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert_eq!(result.session_id.as_deref(), Some("abc"));
    }

    #[test]
    fn parse_cli_output_text_fallback() {
        let stdout = "not json at all\n";
        let result = parse_cli_output(stdout);
        assert!(result.ok);
        assert_eq!(result.output_text, "not json at all");
        assert!(result.session_id.is_none());
        assert!(result.metadata.is_none());
    }

    #[tokio::test]
    async fn execute_rejects_empty_query() {
        let executor = CliExecutor::new("true", 1_000);
        let req = ExecutionRequest {
            query: "   ".to_string(),
            ..Default::default()
        };
        let err = executor.execute(&req).await.unwrap_err();
        assert!(matches!(err, ExecutorError::EmptyQuery));
    }

    #[tokio::test]
    async fn execute_spawn_failure_on_missing_binary() {
        let executor = CliExecutor::new("this-binary-does-not-exist-xyz", 1_000);
        let req = base_request();
        let err = executor.execute(&req).await.unwrap_err();
        assert!(matches!(err, ExecutorError::SpawnFailed(_)));
    }
}
