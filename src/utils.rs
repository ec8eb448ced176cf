use std::process::{Command, Output, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crate::error::ProbeError;

/// How long a vendor tool may run before its probe is abandoned.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(10);

/// Run an external tool, killing it if it exceeds `timeout`.
///
/// A hung vendor tool must only ever cost its own probe, so expiry is
/// reported as a regular probe error instead of blocking detection.
pub fn run_tool(tool: &str, args: &[&str], timeout: Duration) -> Result<Output, ProbeError> {
    let child = Command::new(tool)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => ProbeError::ToolNotFound(tool.to_string()),
            _ => ProbeError::ToolExecutionFailed {
                tool: tool.to_string(),
                message: err.to_string(),
            },
        })?;

    let pid = child.id();
    let (tx, rx) = mpsc::channel();
    // The reader thread owns the child so pipe draining and reaping never
    // block the probe itself.
    thread::spawn(move || {
        let _ = tx.send(child.wait_with_output());
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(err)) => Err(ProbeError::ToolExecutionFailed {
            tool: tool.to_string(),
            message: err.to_string(),
        }),
        Err(_) => {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGKILL);
            }
            Err(ProbeError::ToolTimedOut {
                tool: tool.to_string(),
                seconds: timeout.as_secs(),
            })
        }
    }
}

/// Run a tool and return its stdout, failing on a non-zero exit status.
pub fn tool_stdout(tool: &str, args: &[&str], timeout: Duration) -> Result<String, ProbeError> {
    let output = run_tool(tool, args, timeout)?;

    if !output.status.success() {
        return Err(ProbeError::ToolExecutionFailed {
            tool: tool.to_string(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Format byte counts in a human-readable form.
pub fn format_size(size_bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size_bytes >= GB {
        format!("{:.2} GB", size_bytes as f64 / GB as f64)
    } else if size_bytes >= MB {
        format!("{:.2} MB", size_bytes as f64 / MB as f64)
    } else if size_bytes >= KB {
        format!("{:.2} KB", size_bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", size_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_size_picks_unit() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(8 * 1024), "8.00 KB");
        assert_eq!(format_size(512 * 1024 * 1024), "512.00 MB");
        assert_eq!(format_size(40 * 1024 * 1024 * 1024), "40.00 GB");
    }

    #[test]
    fn missing_tool_reports_not_found() {
        let err = run_tool("definitely-not-a-real-tool", &[], DEFAULT_TOOL_TIMEOUT).unwrap_err();
        assert!(matches!(err, ProbeError::ToolNotFound(_)));
    }

    #[test]
    fn tool_output_is_captured() {
        let out = tool_stdout("echo", &["hello"], DEFAULT_TOOL_TIMEOUT).unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[test]
    fn hung_tool_is_killed() {
        let err = run_tool("sleep", &["30"], Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, ProbeError::ToolTimedOut { .. }));
    }
}
