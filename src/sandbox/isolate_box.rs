//! Isolate box management
//!
//! Low-level wrapper around the isolate sandbox for secure code execution.
//! Manages box initialization, cleanup, and abortable command execution.

use std::path::Path;
use std::process::Stdio;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::fs;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::meta::{parse_meta, IsolateMeta};

/// Cached cgroup availability
static USE_CGROUPS: OnceLock<bool> = OnceLock::new();

/// Check if isolate cgroups are available
pub async fn is_cgroups_available() -> bool {
    if let Some(value) = USE_CGROUPS.get() {
        return *value;
    }

    // Try to initialize a test box with cgroups
    let test_result = Command::new("isolate")
        .args(["--box-id", "9999", "--cg", "--init"])
        .output()
        .await;

    let _ = Command::new("isolate")
        .args(["--box-id", "9999", "--cleanup"])
        .output()
        .await;

    let available = matches!(test_result, Ok(r) if r.status.success());
    if !available {
        warn!("Isolate cgroups unavailable; memory is measured by max-rss");
    }

    let _ = USE_CGROUPS.set(available);
    available
}

/// I/O specification for sandbox execution
#[derive(Debug, Clone)]
pub struct IoSpec {
    /// Content written to the program's stdin
    pub stdin: Option<String>,
    /// File name for stdout inside the box
    pub stdout_file: String,
    /// File name for stderr inside the box; merged into stdout when `None`
    pub stderr_file: Option<String>,
}

impl Default for IoSpec {
    fn default() -> Self {
        Self {
            stdin: None,
            stdout_file: "stdout.txt".to_string(),
            stderr_file: Some("stderr.txt".to_string()),
        }
    }
}

impl IoSpec {
    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn merged(mut self) -> Self {
        self.stderr_file = None;
        self
    }
}

/// Resource limits for sandbox execution
#[derive(Debug, Clone)]
pub struct Limits {
    /// CPU time limit in seconds
    pub time_secs: f64,
    /// Memory limit in KiB
    pub memory_kb: u64,
    /// Maximum number of processes
    pub processes: u32,
    /// Maximum open files
    pub open_files: u32,
    /// Maximum file size in KB
    pub fsize_kb: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            time_secs: 1.0,
            memory_kb: 256 * 1024,
            processes: 64,
            open_files: 256,
            fsize_kb: 262144, // 256MB
        }
    }
}

/// Raw outcome from sandbox execution (no verdict interpretation)
#[derive(Debug)]
pub struct SandboxOutcome {
    pub meta: IsolateMeta,
    pub stdout: String,
    pub stderr: String,
}

/// Isolate box manager
pub struct IsolateBox {
    box_id: u32,
    box_path: String,
    use_cgroups: bool,
}

impl IsolateBox {
    /// Create and initialize a new isolate box
    pub async fn new(box_id: u32, use_cgroups: bool) -> Result<Self> {
        // Clean up any stale box with the same id
        let _ = cleanup_box(box_id).await;

        let box_id_str = box_id.to_string();
        let mut args = vec!["--box-id", &box_id_str];
        if use_cgroups {
            args.push("--cg");
        }
        args.push("--init");

        let output = Command::new("isolate")
            .args(&args)
            .output()
            .await
            .context("Failed to run isolate --init")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Failed to initialize isolate box {}: {}", box_id, stderr);
        }

        let box_path = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(
            "Initialized isolate box {} at {} (cgroups: {})",
            box_id, box_path, use_cgroups
        );

        Ok(Self {
            box_id,
            box_path,
            use_cgroups,
        })
    }

    pub fn box_id(&self) -> u32 {
        self.box_id
    }

    /// Working directory of the sandboxed program
    pub fn work_dir(&self) -> String {
        format!("{}/box", self.box_path)
    }

    /// Write a file into the box's working directory
    pub async fn write_file(&self, name: &str, content: &[u8]) -> Result<()> {
        let path = format!("{}/{}", self.work_dir(), name);
        fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write {}", path))
    }

    /// Copy a directory's contents into the box's working directory
    pub async fn copy_dir_in(&self, source_dir: &Path) -> Result<()> {
        let mut entries = fs::read_dir(source_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let dest = format!("{}/{}", self.work_dir(), entry.file_name().to_string_lossy());
            fs::copy(entry.path(), &dest).await?;
        }
        Ok(())
    }

    /// Copy a directory's contents out of the box
    pub async fn copy_dir_out(&self, dest_dir: &Path) -> Result<()> {
        let mut entries = fs::read_dir(self.work_dir()).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                fs::copy(entry.path(), dest_dir.join(entry.file_name())).await?;
            }
        }
        Ok(())
    }

    async fn read_file_lossy(&self, name: &str) -> String {
        let path = format!("{}/{}", self.work_dir(), name);
        match fs::read(&path).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => String::new(),
        }
    }

    /// Run a command in the box.
    ///
    /// Returns `Ok(None)` when `abort` fires first; the isolate process group is
    /// killed before returning.
    pub async fn run(
        &self,
        command: &[String],
        limits: &Limits,
        io: &IoSpec,
        abort: &CancellationToken,
    ) -> Result<Option<SandboxOutcome>> {
        let meta_file = format!("/tmp/isolate_meta_{}.txt", self.box_id);
        let wall_time_secs = limits.time_secs * 2.0 + 1.0;

        let mut args = vec!["--box-id".to_string(), self.box_id.to_string()];

        if self.use_cgroups {
            args.push("--cg".to_string());
            args.push(format!("--cg-mem={}", limits.memory_kb));
        } else {
            args.push(format!("--mem={}", limits.memory_kb));
        }

        args.extend([
            format!("--time={}", limits.time_secs),
            format!("--wall-time={}", wall_time_secs),
            format!("--meta={}", meta_file),
            format!("--stdout={}", io.stdout_file),
            format!("--processes={}", limits.processes),
            format!("--open-files={}", limits.open_files),
            format!("--fsize={}", limits.fsize_kb),
            // Mount directories needed for runtime
            "--dir=/usr".to_string(),
            "--dir=/lib".to_string(),
            "--dir=/lib64".to_string(),
            "--dir=/etc:noexec".to_string(),
            "--dir=/tmp:tmp".to_string(),
            "--env=PATH=/usr/local/bin:/usr/bin:/bin".to_string(),
            "--env=HOME=/box".to_string(),
            "--env=JAVA_HOME=/usr/lib/jvm/java-17-openjdk-amd64".to_string(),
        ]);

        match &io.stderr_file {
            Some(file) => args.push(format!("--stderr={}", file)),
            None => args.push("--stderr-to-stdout".to_string()),
        }

        if let Some(input) = &io.stdin {
            self.write_file("stdin.txt", input.as_bytes()).await?;
            args.push("--stdin=stdin.txt".to_string());
        }

        args.push("--run".to_string());
        args.push("--".to_string());

        // Prepend /usr/bin/ to the command if it's not a path
        let mut cmd_iter = command.iter();
        if let Some(cmd) = cmd_iter.next() {
            if cmd.starts_with('/') || cmd.starts_with("./") {
                args.push(cmd.clone());
            } else {
                args.push(format!("/usr/bin/{}", cmd));
            }
            args.extend(cmd_iter.cloned());
        }

        debug!("Running isolate with args: {:?}", args);

        let mut child = Command::new("isolate")
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .context("Failed to spawn isolate")?;

        let status = tokio::select! {
            status = child.wait() => status.context("Failed to wait for isolate")?,
            _ = abort.cancelled() => {
                if let Some(pid) = child.id() {
                    // The group leader is isolate; its keeper and the program follow it
                    let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
                }
                let _ = child.wait().await;
                let _ = fs::remove_file(&meta_file).await;
                info!("Aborted execution in isolate box {}", self.box_id);
                return Ok(None);
            }
        };

        let meta_content = fs::read_to_string(&meta_file).await.unwrap_or_default();
        let _ = fs::remove_file(&meta_file).await;

        if meta_content.is_empty() {
            anyhow::bail!(
                "isolate exited with {} without writing a meta file",
                status
            );
        }

        let meta = parse_meta(&meta_content);
        let stdout = self.read_file_lossy(&io.stdout_file).await;
        let stderr = match &io.stderr_file {
            Some(file) => self.read_file_lossy(file).await,
            None => String::new(),
        };

        Ok(Some(SandboxOutcome {
            meta,
            stdout,
            stderr,
        }))
    }

    /// Cleanup the isolate box
    pub async fn cleanup(self) -> Result<()> {
        cleanup_box(self.box_id).await?;
        debug!("Cleaned up isolate box {}", self.box_id);
        Ok(())
    }
}

async fn cleanup_box(box_id: u32) -> Result<()> {
    Command::new("isolate")
        .args(["--box-id", &box_id.to_string(), "--cleanup"])
        .output()
        .await
        .context("Failed to run isolate --cleanup")?;
    Ok(())
}
