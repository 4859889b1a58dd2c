//! Utilities for the `tfill` binary.

use crate::error::FillError;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    process::{Output, Stdio},
    time::Duration,
};
use tokio::{io::AsyncWriteExt, process::Command, time::timeout};

/// Runs a command in a child process, feeding `input` to its stdin and capturing its output.
///
/// Stdin is written while the output is collected. A child that exits without reading all of
/// its input still reports its status and stderr. The child is killed if it does not exit within
/// `limit`.
///
/// ## Takes
/// - `cmd` - The command to run.
/// - `input` - The bytes to write to the child's stdin.
/// - `limit` - The maximum time to wait for the child.
///
/// ## Returns
/// - `Result<Output, FillError>` - The captured output, [FillError::ToolTimeout] if the limit
///   was hit, or [FillError::ToolInvocation] if the child could not be run.
pub(crate) async fn run_cmd_with_input(
    cmd: &mut Command,
    input: &[u8],
    limit: Duration,
) -> Result<Output, FillError> {
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| FillError::ToolInvocation("child stdin unavailable".into()))?;

    let feed = async move {
        let written = stdin.write_all(input).await;
        // Close stdin so the child sees EOF.
        drop(stdin);
        match written {
            Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
            written => written,
        }
    };
    let interaction = async { tokio::try_join!(feed, child.wait_with_output()) };

    let (_, output) = timeout(limit, interaction)
        .await
        .map_err(|_| FillError::ToolTimeout(limit))??;
    Ok(output)
}

/// Turns a fixture identity into a path component, replacing characters that are awkward in
/// file names.
pub(crate) fn sanitize_path_component(name: &str) -> PathBuf {
    let sanitized = name
        .chars()
        .map(|c| match c {
            '[' | '=' | '-' | '+' | ',' | '/' | ' ' => '_',
            c => c,
        })
        .filter(|c| *c != ']')
        .collect::<String>();
    Path::new(&sanitized).to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_of_child() {
        let output = run_cmd_with_input(Command::new("cat").arg("-"), b"hello", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(output.status.success());
        assert_eq!(output.stdout, b"hello");
    }

    #[tokio::test]
    async fn early_exit_keeps_status_and_stderr() {
        // Far more input than a pipe buffers, to a child that never reads it.
        let input = vec![b'x'; 4 << 20];
        let output = run_cmd_with_input(
            Command::new("sh").args(["-c", "echo oops >&2; exit 3"]),
            &input,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stderr, b"oops\n");
    }

    #[tokio::test]
    async fn times_out_hung_child() {
        let err = run_cmd_with_input(
            Command::new("sleep").arg("5"),
            b"",
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FillError::ToolTimeout(_)));
    }

    #[tokio::test]
    async fn missing_binary_is_an_invocation_error() {
        let err = run_cmd_with_input(
            &mut Command::new("/nonexistent/tfill-tool"),
            b"",
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FillError::ToolInvocation(_)));
    }

    #[test]
    fn sanitizes_names() {
        assert_eq!(
            sanitize_path_component("transfer-fork=London+3855"),
            PathBuf::from("transfer_fork_London_3855")
        );
    }
}
