//! The sandboxed surface a session uses to touch the outside world: files,
//! shell commands, and content search. Kept behind a trait so tests can
//! swap in an in-memory fake.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::error::{AgentError, AgentResult};
use crate::types::{DirEntry, ExecResult, GrepOptions};

/// A file's contents, as either text or (for a handful of known
/// extensions) an image.
#[derive(Debug, Clone)]
pub enum FileContent {
    Text(String),
    Image { data: Vec<u8>, media_type: String },
}

/// How much of the host process's environment a shell command inherits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EnvVarPolicy {
    #[default]
    InheritFiltered,
    InheritNone,
    InheritAll,
}

static DENY_SUFFIXES: &[&str] = &["_API_KEY", "_SECRET", "_TOKEN", "_PASSWORD", "_CREDENTIAL"];

static ALLOWLIST: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "PATH", "HOME", "USER", "SHELL", "LANG", "TERM", "TMPDIR", "GOPATH", "CARGO_HOME",
        "NVM_DIR",
    ]
    .into_iter()
    .collect()
});

/// Apply an [`EnvVarPolicy`] plus explicit overrides to the host's
/// environment.
#[must_use]
pub fn filter_env_vars(policy: EnvVarPolicy, overrides: &[(String, String)]) -> Vec<(String, String)> {
    let mut vars: Vec<(String, String)> = match policy {
        EnvVarPolicy::InheritNone => Vec::new(),
        EnvVarPolicy::InheritAll => std::env::vars().collect(),
        EnvVarPolicy::InheritFiltered => std::env::vars()
            .filter(|(key, _)| {
                ALLOWLIST.contains(key.as_str())
                    || !DENY_SUFFIXES.iter().any(|suffix| key.ends_with(suffix))
            })
            .collect(),
    };
    for (key, value) in overrides {
        vars.retain(|(k, _)| k != key);
        vars.push((key.clone(), value.clone()));
    }
    vars
}

/// The capability set a session needs from its host: file access, shell
/// execution, and content search, scoped to one working directory.
#[async_trait]
pub trait ExecutionEnvironment: Send + Sync {
    async fn read_file(&self, path: &str, offset: Option<u64>, limit: Option<u64>) -> AgentResult<FileContent>;
    async fn write_file(&self, path: &str, content: &str) -> AgentResult<()>;
    async fn file_exists(&self, path: &str) -> bool;
    async fn delete_file(&self, path: &str) -> AgentResult<()>;
    async fn list_directory(&self, path: &str, depth: u32) -> AgentResult<Vec<DirEntry>>;
    async fn exec_command(
        &self,
        command: &str,
        timeout_ms: u64,
        working_dir: Option<&str>,
        env_vars: &[(String, String)],
    ) -> AgentResult<ExecResult>;
    async fn grep(&self, pattern: &str, path: &str, options: &GrepOptions) -> AgentResult<String>;
    async fn glob_files(&self, pattern: &str, path: &str) -> AgentResult<Vec<String>>;

    async fn initialize(&self) -> AgentResult<()> {
        Ok(())
    }

    async fn cleanup(&self) -> AgentResult<()> {
        Ok(())
    }

    fn working_directory(&self) -> &str;

    fn platform(&self) -> &'static str {
        match std::env::consts::OS {
            "macos" => "darwin",
            other => other,
        }
    }

    fn os_version(&self) -> String {
        String::new()
    }
}

fn image_media_type(path: &Path) -> Option<&'static str> {
    match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "svg" => Some("image/svg+xml"),
        _ => None,
    }
}

/// A real filesystem and shell, rooted at a working directory.
pub struct LocalExecutionEnvironment {
    working_dir: PathBuf,
    env_policy: EnvVarPolicy,
}

impl LocalExecutionEnvironment {
    #[must_use]
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            env_policy: EnvVarPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_env_policy(mut self, policy: EnvVarPolicy) -> Self {
        self.env_policy = policy;
        self
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.working_dir.join(candidate)
        }
    }

    async fn list_dir_recursive(&self, dir: &Path, depth: u32, out: &mut Vec<DirEntry>) -> AgentResult<()> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| AgentError::from_io(e, &dir.display().to_string()))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AgentError::from_io(e, &dir.display().to_string()))?
        {
            let metadata = entry.metadata().await.map_err(|e| AgentError::from_io(e, "metadata"))?;
            out.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: metadata.is_dir(),
                size: if metadata.is_dir() { None } else { Some(metadata.len()) },
            });
            if metadata.is_dir() && depth > 0 {
                Box::pin(self.list_dir_recursive(&entry.path(), depth - 1, out)).await?;
            }
        }
        Ok(())
    }

    fn grep_file(path: &Path, matcher: &regex::Regex, results: &mut Vec<String>, max_results: u32) {
        let Ok(content) = std::fs::read_to_string(path) else {
            return;
        };
        for (lineno, line) in content.lines().enumerate() {
            if results.len() as u32 >= max_results {
                return;
            }
            if matcher.is_match(line) {
                results.push(format!("{}:{}:{}", path.display(), lineno + 1, line));
            }
        }
    }

    fn grep_walk(dir: &Path, matcher: &regex::Regex, glob_filter: Option<&glob::Pattern>, results: &mut Vec<String>, max_results: u32) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            if results.len() as u32 >= max_results {
                return;
            }
            let path = entry.path();
            if path.is_dir() {
                Self::grep_walk(&path, matcher, glob_filter, results, max_results);
            } else if glob_filter.map_or(true, |g| g.matches_path(&path)) {
                Self::grep_file(&path, matcher, results, max_results);
            }
        }
    }
}

#[async_trait]
impl ExecutionEnvironment for LocalExecutionEnvironment {
    async fn read_file(&self, path: &str, offset: Option<u64>, limit: Option<u64>) -> AgentResult<FileContent> {
        let resolved = self.resolve_path(path);
        if let Some(media_type) = image_media_type(&resolved) {
            let data = tokio::fs::read(&resolved)
                .await
                .map_err(|e| AgentError::from_io(e, path))?;
            return Ok(FileContent::Image { data, media_type: media_type.into() });
        }

        let content = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| AgentError::from_io(e, path))?;

        if offset.is_none() && limit.is_none() {
            return Ok(FileContent::Text(content));
        }
        let offset = offset.unwrap_or(0) as usize;
        let lines: Vec<&str> = content.lines().collect();
        let end = limit.map_or(lines.len(), |l| (offset + l as usize).min(lines.len()));
        let start = offset.min(lines.len());
        Ok(FileContent::Text(lines[start..end].join("\n")))
    }

    async fn write_file(&self, path: &str, content: &str) -> AgentResult<()> {
        let resolved = self.resolve_path(path);
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AgentError::from_io(e, path))?;
        }
        tokio::fs::write(&resolved, content)
            .await
            .map_err(|e| AgentError::from_io(e, path))
    }

    async fn file_exists(&self, path: &str) -> bool {
        tokio::fs::metadata(self.resolve_path(path)).await.is_ok()
    }

    async fn delete_file(&self, path: &str) -> AgentResult<()> {
        tokio::fs::remove_file(self.resolve_path(path))
            .await
            .map_err(|e| AgentError::from_io(e, path))
    }

    async fn list_directory(&self, path: &str, depth: u32) -> AgentResult<Vec<DirEntry>> {
        let resolved = self.resolve_path(path);
        let mut out = Vec::new();
        self.list_dir_recursive(&resolved, depth, &mut out).await?;
        Ok(out)
    }

    async fn exec_command(
        &self,
        command: &str,
        timeout_ms: u64,
        working_dir: Option<&str>,
        env_vars: &[(String, String)],
    ) -> AgentResult<ExecResult> {
        let dir = working_dir.map(|d| self.resolve_path(d)).unwrap_or_else(|| self.working_dir.clone());
        let vars = filter_env_vars(self.env_policy, env_vars);

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&dir)
            .env_clear()
            .envs(vars)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        #[allow(unsafe_code)]
        unsafe {
            use std::os::unix::process::CommandExt;
            cmd.pre_exec(|| {
                libc::setpgid(0, 0);
                Ok(())
            });
        }

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|e| AgentError::from_io(e, command))?;
        let pid = child.id();

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });

        let wait_result = tokio::time::timeout(Duration::from_millis(timeout_ms), child.wait()).await;

        match wait_result {
            Ok(status) => {
                let status = status.map_err(|e| AgentError::from_io(e, command))?;
                let stdout = stdout_task.await.unwrap_or_default();
                let stderr = stderr_task.await.unwrap_or_default();
                Ok(ExecResult {
                    stdout,
                    stderr,
                    exit_code: status.code().unwrap_or(-1),
                    timed_out: false,
                    duration_ms: start.elapsed().as_millis() as u64,
                })
            }
            Err(_) => {
                if let Some(pid) = pid {
                    sigterm_process_group(pid);
                    if tokio::time::timeout(Duration::from_secs(2), child.wait()).await.is_err() {
                        sigkill_process_group(pid);
                        let _ = child.wait().await;
                    }
                }
                let stdout = stdout_task.await.unwrap_or_default();
                let stderr = stderr_task.await.unwrap_or_default();
                Ok(ExecResult {
                    stdout,
                    stderr,
                    exit_code: -1,
                    timed_out: true,
                    duration_ms: start.elapsed().as_millis() as u64,
                })
            }
        }
    }

    async fn grep(&self, pattern: &str, path: &str, options: &GrepOptions) -> AgentResult<String> {
        let resolved = self.resolve_path(path);
        let pattern = pattern.to_string();
        let case_insensitive = options.case_insensitive;
        let max_results = options.max_results;
        let glob_filter = options
            .glob_filter
            .as_ref()
            .map(|g| glob::Pattern::new(g))
            .transpose()
            .map_err(|e| AgentError::ValidationError { reason: e.to_string() })?;

        let results = tokio::task::spawn_blocking(move || -> AgentResult<Vec<String>> {
            let regex_pattern = if case_insensitive {
                format!("(?i){pattern}")
            } else {
                pattern
            };
            let matcher = regex::Regex::new(&regex_pattern)
                .map_err(|e| AgentError::ValidationError { reason: e.to_string() })?;
            let mut results = Vec::new();
            if resolved.is_dir() {
                Self::grep_walk(&resolved, &matcher, glob_filter.as_ref(), &mut results, max_results);
            } else {
                Self::grep_file(&resolved, &matcher, &mut results, max_results);
            }
            Ok(results)
        })
        .await
        .map_err(|e| AgentError::Io { message: e.to_string() })??;

        Ok(results.join("\n"))
    }

    async fn glob_files(&self, pattern: &str, path: &str) -> AgentResult<Vec<String>> {
        let resolved = self.resolve_path(path);
        if !resolved.exists() {
            return Err(AgentError::FileNotFound { path: path.into() });
        }
        let full_pattern = resolved.join(pattern);
        let full_pattern_str = full_pattern.to_string_lossy().into_owned();

        tokio::task::spawn_blocking(move || -> AgentResult<Vec<String>> {
            let mut matches: Vec<(PathBuf, std::time::SystemTime)> = glob::glob(&full_pattern_str)
                .map_err(|e| AgentError::ValidationError { reason: e.to_string() })?
                .filter_map(Result::ok)
                .filter_map(|p| {
                    let mtime = p.metadata().and_then(|m| m.modified()).ok()?;
                    Some((p, mtime))
                })
                .collect();
            matches.sort_by(|a, b| b.1.cmp(&a.1));
            Ok(matches.into_iter().map(|(p, _)| p.to_string_lossy().into_owned()).collect())
        })
        .await
        .map_err(|e| AgentError::Io { message: e.to_string() })?
    }

    fn working_directory(&self) -> &str {
        self.working_dir.to_str().unwrap_or_default()
    }

    fn os_version(&self) -> String {
        std::env::consts::ARCH.to_string()
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn sigterm_process_group(pid: u32) {
    unsafe {
        libc::kill(-(pid as i32), libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn sigterm_process_group(_pid: u32) {}

#[cfg(unix)]
#[allow(unsafe_code)]
fn sigkill_process_group(pid: u32) {
    unsafe {
        libc::kill(-(pid as i32), libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn sigkill_process_group(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempdir();
        let env = LocalExecutionEnvironment::new(dir.clone());
        env.write_file("note.txt", "hello").await.unwrap();
        match env.read_file("note.txt", None, None).await.unwrap() {
            FileContent::Text(t) => assert_eq!(t, "hello"),
            FileContent::Image { .. } => panic!("expected text"),
        }
        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn exec_command_captures_stdout() {
        let dir = tempdir();
        let env = LocalExecutionEnvironment::new(dir.clone());
        let result = env.exec_command("echo hi", 5_000, None, &[]).await.unwrap();
        assert_eq!(result.stdout.trim(), "hi");
        assert_eq!(result.exit_code, 0);
        assert!(!result.timed_out);
        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn exec_command_times_out() {
        let dir = tempdir();
        let env = LocalExecutionEnvironment::new(dir.clone());
        let result = env.exec_command("sleep 5", 50, None, &[]).await.unwrap();
        assert!(result.timed_out);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn filter_env_vars_inherit_none_is_empty() {
        assert!(filter_env_vars(EnvVarPolicy::InheritNone, &[]).is_empty());
    }

    #[test]
    fn filter_env_vars_denies_secret_suffix() {
        std::env::set_var("TEST_AGENT_API_KEY", "shh");
        let vars = filter_env_vars(EnvVarPolicy::InheritFiltered, &[]);
        assert!(!vars.iter().any(|(k, _)| k == "TEST_AGENT_API_KEY"));
        std::env::remove_var("TEST_AGENT_API_KEY");
    }

    fn tempdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("agent-loop-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
