//! Run external tools under a timeout.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Bytes of stderr kept in error messages.
const STDERR_EXCERPT: usize = 400;

/// A finished child process.
#[derive(Debug)]
pub struct Finished {
    pub status: ExitStatus,
    pub stderr: String,
    pub elapsed: Duration,
}

/// Run `cmd` to completion or kill it after `timeout`.
///
/// stdout and stderr go to files in `log_dir`, so a chatty child can never
/// block on a full pipe. On Unix the child leads a new process group and a
/// timeout kills the whole group, including helpers it forked (`soffice`
/// hands the work to `soffice.bin`). Launch failure, timeout, and non-zero
/// exit all map to [`Error::Resource`].
pub fn run_with_timeout(cmd: &mut Command, timeout: Duration, log_dir: &Path) -> Result<Finished> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    let stdout_path = log_dir.join("stdout.log");
    let stderr_path = log_dir.join("stderr.log");
    let stdout = File::create(&stdout_path).map_err(|e| Error::io(&stdout_path, e))?;
    let stderr = File::create(&stderr_path).map_err(|e| Error::io(&stderr_path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let start = Instant::now();
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .spawn()
        .map_err(|e| Error::resource(&program, format!("cannot launch: {e}")))?;

    tracing::debug!(program = %program, pid = child.id(), "Started external tool");

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                let finished = Finished {
                    status,
                    stderr: read_excerpt(&stderr_path),
                    elapsed: start.elapsed(),
                };
                if !status.success() {
                    return Err(Error::resource(
                        &program,
                        format!("exited with {status}: {}", finished.stderr),
                    ));
                }
                tracing::debug!(
                    program = %program,
                    elapsed_ms = finished.elapsed.as_millis() as u64,
                    "External tool finished"
                );
                return Ok(finished);
            }
            Ok(None) => {
                if start.elapsed() > timeout {
                    kill_group(&mut child);
                    tracing::warn!(
                        program = %program,
                        timeout_secs = timeout.as_secs_f32(),
                        "External tool timed out, killed"
                    );
                    return Err(Error::resource(
                        &program,
                        format!("timed out after {:.1}s", timeout.as_secs_f32()),
                    ));
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                kill_group(&mut child);
                return Err(Error::resource(&program, format!("cannot wait: {e}")));
            }
        }
    }
}

/// Kill the child and every process in its group, then reap the child.
///
/// Called only while the child is unreaped, so its pid still names the group.
fn kill_group(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
            // SAFETY: killpg takes plain integers and has no memory effects.
            let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
            if rc != 0 {
                tracing::debug!(
                    pgid,
                    error = %std::io::Error::last_os_error(),
                    "killpg failed, killing the child only"
                );
            }
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn read_excerpt(path: &Path) -> String {
    let text = std::fs::read(path)
        .map(|b| String::from_utf8_lossy(&b).into_owned())
        .unwrap_or_default();
    let text = text.trim();
    match text.char_indices().nth(STDERR_EXCERPT) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

/// Resolve a program name against `PATH` and a list of well-known locations.
pub fn find_program(name: &Path, fallbacks: &[&str]) -> Option<PathBuf> {
    if name.components().count() > 1 {
        return name.exists().then(|| name.to_path_buf());
    }
    if let Ok(found) = which::which(name) {
        return Some(found);
    }
    fallbacks.iter().map(PathBuf::from).find(|p| p.exists())
}

/// `file://` URL for a local directory, as LibreOffice expects in `-env:` options.
pub fn file_url(path: &Path) -> String {
    let s = path.to_string_lossy().replace('\\', "/");
    if s.starts_with('/') {
        format!("file://{s}")
    } else {
        format!("file:///{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_url() {
        assert_eq!(file_url(Path::new("/tmp/p")), "file:///tmp/p");
        assert_eq!(file_url(Path::new("C:\\tmp\\p")), "file:///C:/tmp/p");
    }

    #[test]
    fn test_missing_program_is_resource_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_with_timeout(
            &mut Command::new("eml2pdf-definitely-missing-tool"),
            Duration::from_secs(1),
            dir.path(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Resource { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let start = Instant::now();
        let err = run_with_timeout(
            Command::new("sleep").arg("10"),
            Duration::from_millis(200),
            dir.path(),
        )
        .unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(err.to_string().contains("timed out"));
    }

    /// Whether `pid` is a live (not zombie) process.
    #[cfg(target_os = "linux")]
    fn alive(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => !stat
                .rsplit_once(')')
                .is_some_and(|(_, rest)| rest.trim_start().starts_with('Z')),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_timeout_kills_forked_helpers() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("helper.pid");
        let script = format!("sleep 30 & echo $! > '{}'; wait", pid_file.display());
        let err = run_with_timeout(
            Command::new("sh").args(["-c", &script]),
            Duration::from_millis(300),
            dir.path(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("timed out"));

        let helper: u32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(3);
        while alive(helper) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(!alive(helper), "helper {helper} outlived the timeout");
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_with_timeout(
            Command::new("sh").args(["-c", "echo broken >&2; exit 3"]),
            Duration::from_secs(5),
            dir.path(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[cfg(unix)]
    #[test]
    fn test_success() {
        let dir = tempfile::tempdir().unwrap();
        let done = run_with_timeout(
            Command::new("sh").args(["-c", "exit 0"]),
            Duration::from_secs(5),
            dir.path(),
        )
        .unwrap();
        assert!(done.status.success());
    }
}
