//! Child-process plumbing shared by the CLI-backed providers
//!
//! The agent CLI runs in the workspace directory, reads the prompt from
//! stdin and prints one JSON object per line. Each line goes through a
//! backend-specific parser. The child is killed when the cancellation token
//! fires or the stream is dropped.

use foreman_core::{ForemanError, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::provider::ProviderStream;
use crate::types::ProviderEvent;

/// Upper bound on captured stderr included in error messages
const STDERR_TAIL: usize = 2000;

enum Next {
    Line(std::io::Result<Option<String>>),
    Cancelled,
}

/// Run `cmd`, feed `input` on stdin and turn stdout lines into events
///
/// `parse` maps one stdout line to zero or more events; lines it cannot
/// use should produce none. The stream ends after the first result event.
/// A process that exits without one surfaces as a transport error.
pub(crate) fn run_json_lines<F>(
    label: &'static str,
    mut cmd: Command,
    input: String,
    cancel: CancellationToken,
    mut parse: F,
) -> ProviderStream
where
    F: FnMut(&str) -> Vec<ProviderEvent> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let message = if e.kind() == std::io::ErrorKind::NotFound {
                    format!("{} CLI not found on PATH", label)
                } else {
                    format!("Failed to spawn {} CLI: {}", label, e)
                };
                yield Err(ForemanError::ProviderTransport(message));
                return;
            }
        };
        debug!(pid = ?child.id(), "{} process started", label);

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                yield Err(ForemanError::ProviderTransport(format!(
                    "Failed to write prompt to {}: {}", label, e
                )));
                return;
            }
            drop(stdin);
        }

        let Some(stdout) = child.stdout.take() else {
            yield Err(ForemanError::ProviderTransport(format!("{} stdout unavailable", label)));
            return;
        };

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut finished = false;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => Next::Cancelled,
                line = lines.next_line() => Next::Line(line),
            };

            match next {
                Next::Cancelled => {
                    debug!("{} query cancelled, killing process", label);
                    let _ = child.kill().await;
                    return;
                }
                Next::Line(Ok(Some(line))) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    for event in parse(line) {
                        let is_result = event.is_result();
                        yield Ok(event);
                        if is_result {
                            finished = true;
                            break;
                        }
                    }
                    if finished {
                        break;
                    }
                }
                Next::Line(Ok(None)) => break,
                Next::Line(Err(e)) => {
                    yield Err(ForemanError::ProviderTransport(format!(
                        "Failed to read {} output: {}", label, e
                    )));
                    return;
                }
            }
        }

        if finished {
            return;
        }

        let status = child.wait().await;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        let stderr = tail(stderr.trim(), STDERR_TAIL);

        let message = match status {
            Ok(status) if status.success() => {
                format!("{} exited without a result", label)
            }
            Ok(status) => format!("{} exited with {}: {}", label, status, stderr),
            Err(e) => format!("Failed to wait for {}: {}", label, e),
        };
        warn!("{}", message);
        yield Err(ForemanError::ProviderTransport(message));
    })
}

fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    fn text_parser(line: &str) -> Vec<ProviderEvent> {
        match line.strip_prefix("done:") {
            Some(rest) => vec![ProviderEvent::success(rest)],
            None => vec![ProviderEvent::text(line)],
        }
    }

    #[tokio::test]
    async fn test_stream_ends_at_result() {
        let stream = run_json_lines(
            "test",
            sh("cat; echo; echo done:ok; echo ignored"),
            "hello\n".to_string(),
            CancellationToken::new(),
            text_parser,
        );
        let events: Vec<_> = stream.collect().await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].as_ref().unwrap(), &ProviderEvent::text("hello"));
        assert_eq!(events[1].as_ref().unwrap(), &ProviderEvent::success("ok"));
    }

    #[tokio::test]
    async fn test_exit_without_result_is_transport_error() {
        let stream = run_json_lines(
            "test",
            sh("echo partial; echo oops >&2; exit 3"),
            String::new(),
            CancellationToken::new(),
            text_parser,
        );
        let events: Vec<_> = stream.collect().await;

        assert!(events[0].is_ok());
        let err = events.last().unwrap().as_ref().unwrap_err();
        assert!(matches!(err, ForemanError::ProviderTransport(m) if m.contains("oops")));
    }

    #[tokio::test]
    async fn test_cancel_ends_stream() {
        let cancel = CancellationToken::new();
        let mut stream = run_json_lines(
            "test",
            sh("echo started; sleep 30"),
            String::new(),
            cancel.clone(),
            text_parser,
        );

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, ProviderEvent::text("started"));

        cancel.cancel();
        let rest = tokio::time::timeout(std::time::Duration::from_secs(5), stream.next())
            .await
            .unwrap();
        assert!(rest.is_none());
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let stream = run_json_lines(
            "ghost",
            Command::new("/nonexistent/ghost-cli"),
            String::new(),
            CancellationToken::new(),
            text_parser,
        );
        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_err());
    }

    #[test]
    fn test_tail() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("ab", 3), "ab");
    }
}
