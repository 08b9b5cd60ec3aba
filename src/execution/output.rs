//! Subprocess output capture shared by both backends.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::LazyLock;

use regex::Regex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// Maximum captured output kept per run (64KB).
pub const MAX_OUTPUT_SIZE: usize = 64 * 1024;

/// Characters of output echoed into the log after a run.
pub const LOG_TAIL_CHARS: usize = 2000;

const READ_CHUNK: usize = 8 * 1024;

static PULL_REQUEST_URL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"https://github\.com/[^\s)]+/pull/\d+").ok());

/// Combined output and exit status of a finished process.
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub output: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

/// Run `command` to completion with stdin closed, capturing stdout and
/// stderr.
///
/// The child leads its own process group, so a Ctrl-C or a service
/// manager's SIGTERM aimed at the daemon's group never reaches the tool and
/// the daemon can drain. If the returned future is dropped (the caller's
/// deadline fired), the whole group is killed, not just the direct child.
pub async fn run_captured(mut command: Command) -> std::io::Result<CapturedOutput> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);

    let mut child = command.spawn()?;
    let mut group = child.id().map(GroupKill::new);

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (stdout, stderr, status) =
        tokio::try_join!(drain(stdout), drain(stderr), child.wait())?;

    if let Some(group) = group.as_mut() {
        group.disarm();
    }

    let stdout = stdout.into_string();
    let stderr = stderr.into_string();
    let output = if stderr.is_empty() {
        stdout
    } else if stdout.is_empty() {
        stderr
    } else {
        format!("{}\n\n--- stderr ---\n{}", stdout, stderr)
    };

    Ok(CapturedOutput {
        output: truncate_output(&output),
        exit_code: status.code(),
    })
}

/// SIGKILLs a process group on drop unless disarmed.
struct GroupKill {
    pgid: u32,
    armed: bool,
}

impl GroupKill {
    fn new(pgid: u32) -> Self {
        Self { pgid, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for GroupKill {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let status = std::process::Command::new("kill")
            .args(["-KILL", "--", &format!("-{}", self.pgid)])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if let Err(e) = status {
            tracing::warn!(pgid = self.pgid, error = %e, "Failed to kill tool process group");
        }
    }
}

/// Keeps the first and last `MAX_OUTPUT_SIZE / 2` bytes of a stream and
/// counts what falls in between.
#[derive(Debug, Default)]
struct CappedBuffer {
    head: Vec<u8>,
    tail: VecDeque<u8>,
    dropped: usize,
}

impl CappedBuffer {
    fn push(&mut self, mut bytes: &[u8]) {
        let half = MAX_OUTPUT_SIZE / 2;
        if self.head.len() < half {
            let take = (half - self.head.len()).min(bytes.len());
            self.head.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];
        }
        for &b in bytes {
            if self.tail.len() == half {
                self.tail.pop_front();
                self.dropped += 1;
            }
            self.tail.push_back(b);
        }
    }

    fn into_string(self) -> String {
        let mut head = self.head;
        let tail: Vec<u8> = self.tail.into();
        if self.dropped == 0 {
            head.extend_from_slice(&tail);
            return String::from_utf8_lossy(&head).into_owned();
        }
        format!(
            "{}\n\n... [truncated {} bytes] ...\n\n{}",
            String::from_utf8_lossy(&head),
            self.dropped,
            String::from_utf8_lossy(&tail)
        )
    }
}

/// Read a stream to EOF, keeping at most `MAX_OUTPUT_SIZE` bytes of it.
async fn drain<R: AsyncRead + Unpin>(reader: Option<R>) -> std::io::Result<CappedBuffer> {
    let mut captured = CappedBuffer::default();
    let Some(mut reader) = reader else {
        return Ok(captured);
    };
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(captured);
        }
        captured.push(&buf[..n]);
    }
}

/// First pull-request URL mentioned in tool output.
pub fn extract_pull_request_url(output: &str) -> Option<String> {
    PULL_REQUEST_URL
        .as_ref()?
        .find(output)
        .map(|m| m.as_str().to_string())
}

/// Truncate output to fit within limits (UTF-8 safe), keeping head and tail.
pub fn truncate_output(s: &str) -> String {
    if s.len() <= MAX_OUTPUT_SIZE {
        s.to_string()
    } else {
        let half = MAX_OUTPUT_SIZE / 2;
        let head_end = floor_char_boundary(s, half);
        let tail_start = floor_char_boundary(s, s.len() - half);
        format!(
            "{}\n\n... [truncated {} bytes] ...\n\n{}",
            &s[..head_end],
            s.len() - MAX_OUTPUT_SIZE,
            &s[tail_start..]
        )
    }
}

/// Last `max_chars` characters of `s`.
pub fn tail(s: &str, max_chars: usize) -> &str {
    let count = s.chars().count();
    if count <= max_chars {
        return s;
    }
    let start = s
        .char_indices()
        .nth(count - max_chars)
        .map_or(0, |(i, _)| i);
    &s[start..]
}

/// Find the largest byte index <= `i` that is a valid char boundary.
fn floor_char_boundary(s: &str, i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    let mut pos = i;
    while pos > 0 && !s.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    /// Process group of the current process, from `/proc/self/stat`.
    fn own_pgid() -> String {
        let stat = std::fs::read_to_string("/proc/self/stat").unwrap();
        let after_comm = &stat[stat.rfind(')').unwrap() + 2..];
        after_comm.split(' ').nth(2).unwrap().to_string()
    }

    #[tokio::test]
    async fn captures_both_streams() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo err >&2; exit 3"]);
        let captured = run_captured(cmd).await.unwrap();
        assert_eq!(captured.exit_code, Some(3));
        assert!(captured.output.starts_with("out\n"));
        assert!(captured.output.contains("--- stderr ---\nerr"));
    }

    #[tokio::test]
    async fn missing_program_is_io_error() {
        let cmd = Command::new("/nonexistent/definitely-not-here");
        assert!(run_captured(cmd).await.is_err());
    }

    #[tokio::test]
    async fn child_leads_its_own_process_group() {
        let mut cmd = Command::new("sh");
        cmd.args([
            "-c",
            "echo \"$$ $(cut -d' ' -f5 /proc/$$/stat)\"",
        ]);
        let captured = run_captured(cmd).await.unwrap();
        let mut ids = captured.output.split_whitespace();
        let pid = ids.next().unwrap();
        let pgid = ids.next().unwrap();

        assert_eq!(pid, pgid);
        assert_ne!(pgid, own_pgid());
    }

    #[tokio::test]
    async fn dropped_run_kills_grandchildren() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("finished");
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(format!(
            "sh -c 'sleep 1; touch \"{}\"'; true",
            marker.display()
        ));

        let run = tokio::time::timeout(Duration::from_millis(200), run_captured(cmd)).await;
        assert!(run.is_err());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn chatty_output_is_bounded_and_keeps_both_ends() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "seq 1 200000"]);
        let captured = run_captured(cmd).await.unwrap();

        assert_eq!(captured.exit_code, Some(0));
        assert!(captured.output.len() <= MAX_OUTPUT_SIZE + 100);
        assert!(captured.output.starts_with("1\n2\n3\n"));
        assert!(captured.output.ends_with("199999\n200000\n"));
        assert!(captured.output.contains("[truncated"));
    }

    #[test]
    fn capped_buffer_counts_dropped_middle() {
        let mut buf = CappedBuffer::default();
        buf.push(&vec![b'a'; MAX_OUTPUT_SIZE / 2]);
        buf.push(&vec![b'b'; 10]);
        buf.push(&vec![b'c'; MAX_OUTPUT_SIZE / 2]);
        let s = buf.into_string();
        assert!(s.contains("[truncated 10 bytes]"));
        assert!(!s.contains("bbb"));
        assert!(s.ends_with(&"c".repeat(MAX_OUTPUT_SIZE / 2)));
    }

    #[test]
    fn finds_pull_request_url() {
        let out = "Created PR (https://github.com/acme/web/pull/128) for review.";
        assert_eq!(
            extract_pull_request_url(out).as_deref(),
            Some("https://github.com/acme/web/pull/128")
        );
        assert!(extract_pull_request_url("https://github.com/acme/web/issues/4").is_none());
    }

    #[test]
    fn short_output_is_untouched() {
        assert_eq!(truncate_output("short output"), "short output");
    }

    #[test]
    fn long_output_keeps_head_and_tail() {
        let s = "x".repeat(MAX_OUTPUT_SIZE + 1000);
        let result = truncate_output(&s);
        assert!(result.len() <= MAX_OUTPUT_SIZE + 100);
        assert!(result.contains("[truncated 1000 bytes]"));
    }

    #[test]
    fn char_boundary_steps_back_inside_multibyte() {
        let s2 = "café";
        assert_eq!(floor_char_boundary(s2, 5), 5);
        assert_eq!(floor_char_boundary(s2, 4), 3);
        assert_eq!(floor_char_boundary(s2, 3), 3);
    }

    #[test]
    fn tail_is_char_based() {
        assert_eq!(tail("hello", 10), "hello");
        assert_eq!(tail("hello", 3), "llo");
        assert_eq!(tail("naïve café", 4), "café");
    }
}
