//! LLM-generated programs run in a resource-limited child process.

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use tokio::process::Command;

use super::{Capability, CapabilityResult, Tool, ToolError};
use crate::config::{CodeSandboxConfig, SandboxIsolation};
use crate::llm::{ContentPart, LlmClient};
use crate::request::Request;

const CODE_PROMPT: &str = "Generate Python code to solve this problem:
1. Write clean, efficient code
2. Print ONLY the final numerical result
3. Use the EXACT value of n specified
4. Apply modulo if mentioned
5. No explanations, just code

Problem: {problem}

Return only Python code, no markdown blocks.";

const SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";
const MAX_FILE_BYTES: u64 = 16 * 1024 * 1024;
const MAX_OPEN_FILES: u64 = 64;
const STDERR_TAIL: usize = 500;

/// Where the scratch directory appears inside the bubblewrap sandbox.
const SANDBOX_WORKDIR: &str = "/work";
const SCRIPT_NAME: &str = "main.py";

/// Read-only host paths exposed to sandboxed programs, when present.
const READ_ONLY_BINDS: &[&str] = &["/usr", "/bin", "/sbin", "/lib", "/lib64", "/etc/alternatives"];

/// Remove markdown code fences (with or without a language tag).
pub fn strip_fences(reply: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?m)^\s*```[A-Za-z0-9_+-]*\s*$\n?").expect("valid fence regex"));
    re.replace_all(reply.trim(), "").trim().to_string()
}

/// Last non-blank stdout line, or "No output".
fn final_line(stdout: &str) -> String {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .unwrap_or("No output")
        .to_string()
}

fn tail(text: &str, max: usize) -> &str {
    let text = text.trim();
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
type Resource = libc::__rlimit_resource_t;
#[cfg(all(unix, not(all(target_os = "linux", target_env = "gnu"))))]
type Resource = libc::c_int;

#[cfg(unix)]
fn set_limit(resource: Resource, value: u64) -> std::io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: value as libc::rlim_t,
        rlim_max: value as libc::rlim_t,
    };
    // SAFETY: setrlimit only reads the struct we pass.
    if unsafe { libc::setrlimit(resource, &limit) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Locate an executable in the sandbox PATH.
fn find_executable(name: &str) -> Option<std::path::PathBuf> {
    SANDBOX_PATH
        .split(':')
        .map(|dir| Path::new(dir).join(name))
        .find(|candidate| candidate.is_file())
}

/// bubblewrap argv running `interpreter` on the script inside `scratch`.
///
/// Every namespace is unshared (no network), the host root is not mounted,
/// system directories are read-only and `/tmp` is a private tmpfs. The
/// scratch directory is the only writable host path.
fn bubblewrap_argv(bwrap: &Path, scratch: &Path, config: &CodeSandboxConfig) -> Vec<String> {
    let mut argv = vec![
        bwrap.display().to_string(),
        "--unshare-all".to_string(),
        "--die-with-parent".to_string(),
        "--new-session".to_string(),
    ];
    for dir in READ_ONLY_BINDS {
        if Path::new(dir).exists() {
            argv.extend(["--ro-bind", *dir, *dir].map(str::to_string));
        }
    }
    argv.extend(
        [
            "--proc",
            "/proc",
            "--dev",
            "/dev",
            "--tmpfs",
            "/tmp",
        ]
        .map(str::to_string),
    );
    argv.extend([
        "--bind".to_string(),
        scratch.display().to_string(),
        SANDBOX_WORKDIR.to_string(),
        "--chdir".to_string(),
        SANDBOX_WORKDIR.to_string(),
        "--setenv".to_string(),
        "HOME".to_string(),
        SANDBOX_WORKDIR.to_string(),
        "--".to_string(),
        config.interpreter.clone(),
    ]);
    argv.extend(config.interpreter_args.iter().cloned());
    argv.push(format!("{}/{}", SANDBOX_WORKDIR, SCRIPT_NAME));
    argv
}

/// Runs a program text through the configured interpreter.
///
/// By default the child runs under bubblewrap with no network and no view of
/// the host filesystem beyond read-only system directories and its scratch
/// directory. It always gets an empty environment, CPU/memory/file rlimits,
/// and is killed on timeout. When bubblewrap is missing the run fails rather
/// than falling back to an unisolated child.
pub struct Sandbox {
    config: CodeSandboxConfig,
}

impl Sandbox {
    pub fn new(config: CodeSandboxConfig) -> Self {
        Self { config }
    }

    fn argv(&self, scratch: &Path) -> Result<Vec<String>, ToolError> {
        let script = scratch.join(SCRIPT_NAME).display().to_string();
        let argv = match &self.config.isolation {
            SandboxIsolation::Bubblewrap => {
                let bwrap = find_executable("bwrap").ok_or_else(|| {
                    ToolError::Execution(
                        "bubblewrap (bwrap) not found; refusing to run generated code unisolated"
                            .to_string(),
                    )
                })?;
                bubblewrap_argv(&bwrap, scratch, &self.config)
            }
            SandboxIsolation::Wrapper(wrapper) => {
                let mut argv = wrapper.clone();
                argv.push(self.config.interpreter.clone());
                argv.extend(self.config.interpreter_args.iter().cloned());
                argv.push(script);
                argv
            }
            SandboxIsolation::Disabled => {
                let mut argv = vec![self.config.interpreter.clone()];
                argv.extend(self.config.interpreter_args.iter().cloned());
                argv.push(script);
                argv
            }
        };
        Ok(argv)
    }

    pub async fn run(&self, program: &str) -> Result<String, ToolError> {
        let scratch = tempfile::tempdir().map_err(|e| ToolError::Execution(e.to_string()))?;
        tokio::fs::write(scratch.path().join(SCRIPT_NAME), program)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;

        let argv = self.argv(scratch.path())?;

        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .current_dir(scratch.path())
            .env_clear()
            .env("PATH", SANDBOX_PATH)
            .env("HOME", scratch.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            let cpu = self.config.cpu_limit_secs;
            let memory = self.config.memory_limit_bytes;
            // SAFETY: the closure only calls async-signal-safe setrlimit.
            unsafe {
                command.pre_exec(move || {
                    set_limit(libc::RLIMIT_CPU, cpu)?;
                    set_limit(libc::RLIMIT_AS, memory)?;
                    set_limit(libc::RLIMIT_FSIZE, MAX_FILE_BYTES)?;
                    set_limit(libc::RLIMIT_NOFILE, MAX_OPEN_FILES)?;
                    Ok(())
                });
            }
        }

        tracing::debug!(argv = ?argv, "Running generated program");
        let output = tokio::time::timeout(self.config.timeout, command.output())
            .await
            .map_err(|_| {
                ToolError::Timeout(format!(
                    "Program run ({:.1}s limit)",
                    self.config.timeout.as_secs_f32()
                ))
            })?
            .map_err(|e| ToolError::Execution(format!("failed to start {}: {}", argv[0], e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            return Err(ToolError::Execution(format!(
                "exit {}: {}",
                code,
                tail(&stderr, STDERR_TAIL)
            )));
        }
        Ok(final_line(&stdout))
    }
}

/// Asks the LLM for a program and reports the last line it prints.
pub struct CodeRunner {
    llm: Arc<dyn LlmClient>,
    sandbox: Sandbox,
    budget: Duration,
}

impl CodeRunner {
    pub fn new(llm: Arc<dyn LlmClient>, config: CodeSandboxConfig) -> Self {
        // Generation plus execution.
        let budget = config.timeout + Duration::from_secs(30);
        Self {
            llm,
            sandbox: Sandbox::new(config),
            budget,
        }
    }
}

#[async_trait]
impl Tool for CodeRunner {
    fn capability(&self) -> Capability {
        Capability::Code
    }

    fn description(&self) -> &str {
        "Generate and run a program for computational problems: sequences, primes, large numbers, modulo, iterations and algorithms"
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.budget)
    }

    async fn execute(&self, request: &Request) -> Result<CapabilityResult, ToolError> {
        let problem = request.text_content();
        let prompt = CODE_PROMPT.replace("{problem}", &problem);
        let reply = self.llm.generate(&[ContentPart::text(prompt)]).await?;
        let program = strip_fences(&reply);
        if program.is_empty() {
            return Err(ToolError::Execution("model returned no code".to_string()));
        }
        tracing::debug!(lines = program.lines().count(), "Generated program");

        let answer = self.sandbox.run(&program).await?;
        tracing::info!(answer = %answer, "Program finished");
        Ok(CapabilityResult::text(answer).with_metadata(json!({ "code": program })))
    }
}
