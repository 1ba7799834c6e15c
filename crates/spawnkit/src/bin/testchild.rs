//! Scriptable child process used by the integration tests.
//!
//! Behavior is driven entirely by flags so a single binary covers the
//! stream, lifecycle and IPC scenarios.

use clap::Parser;
use spawnkit::IpcChannel;
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{debug, error};

#[derive(Parser, Debug)]
#[command(name = "spawnkit-testchild")]
#[command(about = "Scriptable child process for spawnkit tests", long_about = None)]
struct Args {
    /// Number of lines to write to stdout ("out-<i>")
    #[arg(long, default_value = "0")]
    emit_stdout: usize,

    /// Number of lines to write to stderr ("err-<i>")
    #[arg(long, default_value = "0")]
    emit_stderr: usize,

    /// Copy stdin to stdout until end-of-stream
    #[arg(long)]
    echo_stdin: bool,

    /// Print the value of this environment variable to stdout
    #[arg(long)]
    print_env: Option<String>,

    /// Milliseconds to sleep before exiting
    #[arg(long, default_value = "0")]
    sleep_ms: u64,

    /// Echo every IPC message back to the parent until disconnect
    #[arg(long)]
    ipc_echo: bool,

    /// Exit code to return
    #[arg(long, default_value = "0")]
    exit_code: i32,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "off".into()),
        )
        .init();

    let args = Args::parse();
    debug!(?args, "testchild starting");

    let mut stdout = std::io::stdout();
    for i in 0..args.emit_stdout {
        writeln!(stdout, "out-{}", i).expect("stdout write");
    }
    let mut stderr = std::io::stderr();
    for i in 0..args.emit_stderr {
        writeln!(stderr, "err-{}", i).expect("stderr write");
    }

    if let Some(key) = &args.print_env {
        writeln!(stdout, "{}", std::env::var(key).unwrap_or_default()).expect("stdout write");
    }

    if args.echo_stdin {
        let mut input = Vec::new();
        std::io::stdin().read_to_end(&mut input).expect("stdin read");
        stdout.write_all(&input).expect("stdout write");
    }
    stdout.flush().expect("stdout flush");

    if args.ipc_echo {
        match IpcChannel::from_env() {
            Ok(Some(channel)) => {
                while let Some(message) = channel.recv().await {
                    if channel.send(&message.payload).is_err() {
                        break;
                    }
                }
                debug!("ipc channel disconnected");
            }
            Ok(None) => {
                error!("launched with --ipc-echo but no channel descriptor");
                std::process::exit(3);
            }
            Err(err) => {
                error!(error = %err, "ipc channel setup failed");
                std::process::exit(3);
            }
        }
    }

    if args.sleep_ms > 0 {
        tokio::time::sleep(Duration::from_millis(args.sleep_ms)).await;
    }

    std::process::exit(args.exit_code);
}
