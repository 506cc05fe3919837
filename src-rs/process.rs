//! Bounded waits on child processes.

use std::io::{self, Read};
use std::process::{Child, ExitStatus};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use wait_timeout::ChildExt;

pub(crate) struct Finished {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .map(|buf| String::from_utf8_lossy(&buf).into_owned())
        .unwrap_or_default()
}

/// Waits up to `timeout` for `child`, reading its piped stdout and stderr meanwhile
/// so a chatty child never blocks on a full pipe.
///
/// Returns `Ok(None)` after killing a child that overran the timeout.
pub(crate) fn wait_with_output(mut child: Child, timeout: Duration) -> io::Result<Option<Finished>> {
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = match child.wait_timeout(timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            let _ = child.kill();
            let _ = child.wait();
            // Grandchildren may still hold the pipes open; the readers are left detached.
            return Ok(None);
        }
        Err(err) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(err);
        }
    };

    Ok(Some(Finished {
        status,
        stdout: collect(stdout),
        stderr: collect(stderr),
    }))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    fn sh(script: &str) -> Child {
        Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap()
    }

    #[test]
    fn output_larger_than_a_pipe_buffer_is_collected() {
        let child = sh("head -c 300000 /dev/zero | tr '\\0' x >&2; head -c 200000 /dev/zero | tr '\\0' y");
        let finished = wait_with_output(child, Duration::from_secs(10))
            .unwrap()
            .unwrap();
        assert!(finished.status.success());
        assert_eq!(finished.stderr.len(), 300_000);
        assert_eq!(finished.stdout.len(), 200_000);
    }

    #[test]
    fn overrunning_child_is_killed() {
        let child = sh("sleep 5");
        let result = wait_with_output(child, Duration::from_millis(200)).unwrap();
        assert!(result.is_none());
    }
}
