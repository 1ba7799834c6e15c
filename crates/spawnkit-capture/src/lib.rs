//! # spawnkit-capture
//!
//! Bounded output aggregation for process handles.
//!
//! [`capture`] drains a handle's piped stdout and stderr concurrently,
//! each against its own byte cap. A stream that exceeds the cap is
//! truncated to exactly the cap, the process is killed with the handle's
//! configured signal and the overflow is recorded in the result. Output
//! gathered before the overflow is preserved.

use spawnkit_common::{CapturedResult, Encoding, StreamType, DEFAULT_MAX_BUFFER};
use spawnkit_process::ChildHandle;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const READ_CHUNK: usize = 8 * 1024;

/// Aggregation parameters.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Per-stream byte cap. Zero allows no output at all.
    pub max_buffer: usize,
    /// Decoding applied to both aggregated streams.
    pub encoding: Encoding,
    /// Bytes written to the child's stdin before it is closed. Without
    /// input the stdin pipe is closed immediately so the child sees
    /// end-of-stream instead of blocking.
    pub input: Option<Vec<u8>>,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            max_buffer: DEFAULT_MAX_BUFFER,
            encoding: Encoding::Buffer,
            input: None,
        }
    }
}

impl CaptureOptions {
    pub fn max_buffer(mut self, max_buffer: usize) -> Self {
        self.max_buffer = max_buffer;
        self
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn input(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.input = Some(input.into());
        self
    }
}

/// Drain the handle's output streams and wait for termination.
///
/// Claims stdin, stdout and stderr from the handle; call this before
/// taking any stream yourself. Streams the handle does not expose (not
/// piped, or already taken) aggregate as empty.
pub async fn capture(handle: &ChildHandle, options: &CaptureOptions) -> CapturedResult {
    let stdin = handle.take_stdin();
    let stdout = handle.take_stdout();
    let stderr = handle.take_stderr();

    let feed = async {
        if let Some(mut stdin) = stdin {
            if let Some(input) = &options.input {
                if let Err(err) = stdin.write_all(input).await {
                    // Child closed its end early; not a capture failure.
                    debug!(error = %err, "stdin write cut short");
                }
            }
            let _ = stdin.shutdown().await;
        }
    };

    let (_, out, err) = tokio::join!(
        feed,
        drain(handle, stdout, options.max_buffer, StreamType::Stdout),
        drain(handle, stderr, options.max_buffer, StreamType::Stderr),
    );

    let (status, signal) = handle.wait().await;
    let overflow = match (out.1, err.1) {
        (true, _) => Some(StreamType::Stdout),
        (false, true) => Some(StreamType::Stderr),
        (false, false) => None,
    };

    CapturedResult {
        pid: Some(handle.pid()),
        stdout: options.encoding.decode(out.0),
        stderr: options.encoding.decode(err.0),
        status,
        signal,
        overflow,
        timed_out: handle.timed_out(),
        error: None,
    }
}

/// Read one stream to end-of-stream or to the cap, whichever comes
/// first. On overflow the process is killed before reading stops.
async fn drain<R>(
    handle: &ChildHandle,
    reader: Option<R>,
    max_buffer: usize,
    stream: StreamType,
) -> (Vec<u8>, bool)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return (Vec::new(), false);
    };

    let mut collected = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => return (collected, false),
            Ok(n) => {
                collected.extend_from_slice(&chunk[..n]);
                if collected.len() > max_buffer {
                    collected.truncate(max_buffer);
                    warn!(
                        pid = handle.pid(),
                        stream = %stream,
                        max_buffer,
                        "output cap exceeded, killing process"
                    );
                    let _ = handle.kill(None);
                    return (collected, true);
                }
            }
            Err(err) => {
                debug!(pid = handle.pid(), stream = %stream, error = %err, "stream read ended");
                return (collected, false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spawnkit_common::Signal;
    use spawnkit_process::LaunchSpec;
    use spawnkit_stdio::StdioConfig;

    fn piped(command: &str, args: &[&str]) -> LaunchSpec {
        LaunchSpec::new(command)
            .args(args.iter().copied())
            .stdio(StdioConfig::piped())
    }

    #[tokio::test]
    async fn test_capture_stdout_and_status() {
        let handle =
            spawnkit_process::launch(piped("/bin/sh", &["-c", "echo out; echo err >&2; exit 3"]))
                .unwrap();
        let result = capture(&handle, &CaptureOptions::default()).await;
        assert_eq!(result.stdout.as_bytes(), b"out\n");
        assert_eq!(result.stderr.as_bytes(), b"err\n");
        assert_eq!(result.status, Some(3));
        assert_eq!(result.overflow, None);
        assert!(!result.success());
    }

    #[tokio::test]
    async fn test_utf8_decoding() {
        let handle = spawnkit_process::launch(piped("/bin/echo", &["héllo"])).unwrap();
        let options = CaptureOptions::default().encoding(Encoding::Utf8);
        let result = capture(&handle, &options).await;
        assert_eq!(result.stdout.as_text(), Some("héllo\n"));
        assert!(result.success());
    }

    #[tokio::test]
    async fn test_overflow_truncates_and_kills() {
        // Unbounded output; only the cap stops it.
        let handle = spawnkit_process::launch(piped("/bin/sh", &["-c", "yes x"])).unwrap();
        let options = CaptureOptions::default().max_buffer(1024);
        let result = capture(&handle, &options).await;
        assert_eq!(result.overflow, Some(StreamType::Stdout));
        assert_eq!(result.stdout.len(), 1024);
        assert_eq!(result.signal, Some(Signal::SIGTERM));
        assert!(!result.success());
    }

    #[tokio::test]
    async fn test_output_exactly_at_cap_is_not_overflow() {
        // 16 bytes against a 16 byte cap.
        let handle =
            spawnkit_process::launch(piped("/bin/sh", &["-c", "printf 0123456789abcdef"])).unwrap();
        let options = CaptureOptions::default().max_buffer(16);
        let result = capture(&handle, &options).await;
        assert_eq!(result.stdout.as_bytes(), b"0123456789abcdef");
        assert_eq!(result.overflow, None);
        assert_eq!(result.status, Some(0));
    }

    #[tokio::test]
    async fn test_input_reaches_child() {
        let handle = spawnkit_process::launch(piped("/bin/cat", &[])).unwrap();
        let options = CaptureOptions::default().input("fed via stdin");
        let result = capture(&handle, &options).await;
        assert_eq!(result.stdout.as_bytes(), b"fed via stdin");
        assert_eq!(result.status, Some(0));
    }

    #[tokio::test]
    async fn test_output_before_overflow_is_kept() {
        let handle = spawnkit_process::launch(piped(
            "/bin/sh",
            &["-c", "printf aaaa; sleep 30"],
        ))
        .unwrap();
        let options = CaptureOptions::default().max_buffer(2);
        let result = capture(&handle, &options).await;
        assert_eq!(result.stdout.as_bytes(), b"aa");
        assert_eq!(result.overflow, Some(StreamType::Stdout));
    }
}
