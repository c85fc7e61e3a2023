//! Container listing through the runtime's CLI (`docker ps`).

use crate::error::{SourceError, SourceResult};
use crate::types::ContainerInfo;
use std::io::ErrorKind;
use std::process::Stdio;
use tokio::process::Command;

const FIELD_SEP: &str = "||";
const PS_FORMAT: &str = "{{.Names}}||{{.Image}}||{{.Status}}||{{.Ports}}";

#[derive(Debug, Clone)]
pub struct DockerCli {
    bin: String,
    include_stopped: bool,
}

impl DockerCli {
    pub fn new(bin: impl Into<String>, include_stopped: bool) -> Self {
        Self {
            bin: bin.into(),
            include_stopped,
        }
    }

    fn args(&self) -> Vec<&str> {
        let mut args = vec!["ps", "--no-trunc", "--format", PS_FORMAT];
        if self.include_stopped {
            args.push("--all");
        }
        args
    }

    /// Run `docker ps` once. The child is killed if the future is dropped,
    /// so a caller-side timeout does not leak processes.
    pub async fn list(&self) -> SourceResult<Vec<ContainerInfo>> {
        let output = Command::new(&self.bin)
            .args(self.args())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    SourceError::Unavailable(format!("container runtime `{}` not found", self.bin))
                }
                ErrorKind::PermissionDenied => SourceError::Unavailable(format!(
                    "permission denied running `{}`",
                    self.bin
                )),
                _ => SourceError::Io(e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = match stderr.trim() {
                "" => output.status.to_string(),
                msg => msg.to_string(),
            };
            return Err(SourceError::Command {
                command: format!("{} ps", self.bin),
                detail,
            });
        }

        let stdout = String::from_utf8(output.stdout).map_err(|e| SourceError::Parse {
            what: "`docker ps` output",
            detail: e.to_string(),
        })?;
        Ok(parse_ps(&stdout))
    }
}

/// Parse `docker ps` lines in [`PS_FORMAT`]. Blank lines are skipped and
/// missing trailing fields are treated as empty.
pub fn parse_ps(stdout: &str) -> Vec<ContainerInfo> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|line| {
            let mut f = line.split(FIELD_SEP);
            let name = f.next().unwrap_or_default().to_string();
            let image = f.next().unwrap_or_default().to_string();
            let status = f.next().unwrap_or_default().to_string();
            let ports = f.next().unwrap_or_default().to_string();
            ContainerInfo {
                running: is_up(&status),
                name,
                image,
                status,
                ports,
            }
        })
        .collect()
}

/// Docker status text starts with the word "Up" for running containers
/// ("Up 3 hours", "Up About a minute (healthy)").
pub fn is_up(status: &str) -> bool {
    let s = status.trim_start();
    match s.get(..2) {
        Some(head) if head.eq_ignore_ascii_case("up") => s[2..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric() && c != '_'),
        _ => false,
    }
}
