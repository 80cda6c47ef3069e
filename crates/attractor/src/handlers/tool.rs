//! Tool handler: executes a shell command named in the node's
//! `tool_command` attribute, with an optional `timeout` attribute.

use std::path::Path;

use async_trait::async_trait;

use crate::context::PipelineContext;
use crate::error::PipelineResult;
use crate::graph::{Graph, Node};
use crate::handler::{Handler, Outcome};
use crate::types::{Duration, HandlerType};

#[derive(Debug, Clone, Copy, Default)]
pub struct ToolHandler;

#[async_trait]
impl Handler for ToolHandler {
    fn handler_type(&self) -> HandlerType {
        HandlerType::Tool
    }

    async fn execute(&self, node: &Node, _context: &PipelineContext, _graph: &Graph, _logs_root: &Path) -> PipelineResult<Outcome> {
        let Some(command) = node.get_str("tool_command") else {
            return Ok(Outcome::fail(format!("node '{}' has type 'tool' but no 'tool_command' attribute", node.id)));
        };
        if command.trim().is_empty() {
            return Ok(Outcome::fail(format!("node '{}' has an empty 'tool_command' attribute", node.id)));
        }

        let timeout = node.get_str("timeout").and_then(|t| Duration::parse(&t).ok()).map(|d| d.as_std());

        match run_command(&command, timeout).await {
            Ok(output) if output.success => Ok(Outcome::success().with_context_update("tool.output", output.stdout)),
            Ok(output) => Ok(Outcome::fail(format!("command exited with non-zero status: {}", output.stderr))),
            Err(err) => Ok(Outcome::fail(format!("command execution failed: {err}"))),
        }
    }
}

struct CommandOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

/// Runs `command` via `sh -c`, draining stdout and stderr concurrently
/// with the wait so a child filling the ~64 KB pipe buffer never
/// deadlocks the parent.
async fn run_command(command: &str, timeout: Option<std::time::Duration>) -> std::io::Result<CommandOutput> {
    let mut child =
        tokio::process::Command::new("sh").arg("-c").arg(command).stdout(std::process::Stdio::piped()).stderr(std::process::Stdio::piped()).spawn()?;

    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();

    let collect = async {
        let (status, stdout, stderr) = tokio::join!(child.wait(), read_pipe(stdout_pipe), read_pipe(stderr_pipe));
        let status = status?;
        Ok(CommandOutput { success: status.success(), stdout, stderr })
    };

    if let Some(duration) = timeout {
        match tokio::time::timeout(duration, collect).await {
            Ok(result) => result,
            Err(_) => {
                let _ = child.kill().await;
                Ok(CommandOutput { success: false, stdout: String::new(), stderr: format!("command timed out after {duration:?}") })
            }
        }
    } else {
        collect.await
    }
}

async fn read_pipe<R: tokio::io::AsyncRead + Unpin>(pipe: Option<R>) -> String {
    use tokio::io::AsyncReadExt;
    let Some(mut reader) = pipe else {
        return String::new();
    };
    let mut buf = Vec::new();
    let _ = reader.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).to_string()
}
