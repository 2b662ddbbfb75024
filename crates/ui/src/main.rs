use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use fixstream::repair::{RepairController, StatusTone, SubmitError, ViewSnapshot};
use fixstream::settings::{Settings, SettingsOverrides, default_config_path};
use fixstream_transport::{ConnectionHandle, ConnectionManager, ConnectionState};
use snafu::{ResultExt, Snafu};
use tracing_subscriber::EnvFilter;

const PYTHON_EXTENSION: &str = "py";

#[derive(Debug, Parser)]
#[command(name = "fixstream")]
#[command(
    about = "Submit a Python snippet for repair and watch the fixes arrive",
    long_about = None
)]
struct Cli {
    /// Snippet to submit. Reads stdin when omitted.
    input: Option<PathBuf>,

    /// Write the final fixed code here.
    output: Option<PathBuf>,

    /// Repair service URL, overriding settings and environment.
    #[arg(long)]
    url: Option<String>,

    /// Settings file to read instead of the per-user one.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Debug, Snafu)]
enum CliError {
    #[snafu(display("Only .py files are allowed: {path:?}"))]
    UnsupportedFile { stage: &'static str, path: PathBuf },
    #[snafu(display("failed to read {path:?} on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        path: PathBuf,
        source: io::Error,
    },
    #[snafu(display("failed to read stdin on `{stage}`: {source}"))]
    ReadStdin {
        stage: &'static str,
        source: io::Error,
    },
    #[snafu(display("failed to write {path:?} on `{stage}`: {source}"))]
    WriteOutput {
        stage: &'static str,
        path: PathBuf,
        source: io::Error,
    },
    #[snafu(display("failed to write to the terminal on `{stage}`: {source}"))]
    Terminal {
        stage: &'static str,
        source: io::Error,
    },
    #[snafu(display("failed to build the async runtime on `{stage}`: {source}"))]
    BuildRuntime {
        stage: &'static str,
        source: io::Error,
    },
    #[snafu(display("could not open '{url}' on `{stage}` (state {state:?})"))]
    Connect {
        stage: &'static str,
        url: String,
        state: ConnectionState,
    },
    #[snafu(display("failed to submit on `{stage}`: {source}"))]
    Submit {
        stage: &'static str,
        source: SubmitError,
    },
    #[snafu(display("{message}"))]
    Session {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("repair controller stopped unexpectedly on `{stage}`"))]
    ControllerStopped { stage: &'static str },
    #[snafu(display("interrupted"))]
    Interrupted { stage: &'static str },
}

type CliResult<T> = Result<T, CliError>;

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr; stdout carries only revealed code.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> CliResult<()> {
    let code = read_snippet(cli.input.as_deref())?;

    let config_path = cli.config.unwrap_or_else(default_config_path);
    let settings = Settings::resolve(
        &config_path,
        &SettingsOverrides {
            socket_url: cli.url,
        },
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context(BuildRuntimeSnafu {
            stage: "build-runtime",
        })?;
    let final_code = runtime.block_on(stream_repair(&settings, code))?;

    if let Some(path) = cli.output {
        std::fs::write(&path, final_code).context(WriteOutputSnafu {
            stage: "write-final-code",
            path: path.clone(),
        })?;
        tracing::info!("wrote final code to {:?}", path);
    }

    Ok(())
}

fn read_snippet(path: Option<&Path>) -> CliResult<String> {
    let Some(path) = path else {
        let mut code = String::new();
        io::stdin()
            .read_to_string(&mut code)
            .context(ReadStdinSnafu {
                stage: "read-snippet-stdin",
            })?;
        return Ok(code);
    };

    let is_python = path
        .extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case(PYTHON_EXTENSION));
    if !is_python {
        return UnsupportedFileSnafu {
            stage: "check-snippet-extension",
            path: path.to_path_buf(),
        }
        .fail();
    }

    std::fs::read_to_string(path).context(ReadInputSnafu {
        stage: "read-snippet-file",
        path: path.to_path_buf(),
    })
}

/// Connects, submits once, and streams the reveal until the session ends.
async fn stream_repair(settings: &Settings, code: String) -> CliResult<String> {
    let ConnectionHandle { manager, worker } = ConnectionManager::connect(
        settings.socket_url.clone(),
        settings.reconnect.to_policy(),
    );
    let worker_task = tokio::spawn(worker);

    let retries = settings.reconnect.enabled;
    let mut state_rx = manager.watch_state();
    let state = state_rx
        .wait_for(|state| match state {
            ConnectionState::Open => true,
            ConnectionState::Connecting => false,
            ConnectionState::Closed | ConnectionState::Errored => !retries,
        })
        .await
        .map(|state| *state)
        .unwrap_or(ConnectionState::Errored);

    if state != ConnectionState::Open {
        drop(manager);
        let _ = worker_task.await;
        return ConnectSnafu {
            stage: "wait-for-connection",
            url: settings.socket_url.clone(),
            state,
        }
        .fail();
    }

    let (controller, handle) = RepairController::new(settings, manager);
    let controller_task = tokio::spawn(controller.run());
    let mut snapshots = handle.watch_snapshots();
    handle.submit(code).context(SubmitSnafu {
        stage: "submit-snippet",
    })?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut printer = TerminalPrinter::default();

    let outcome = loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break ControllerStoppedSnafu { stage: "watch-snapshots" }.fail();
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if let Err(error) = printer.render(&snapshot) {
                    break Err(error);
                }
                if let Some(outcome) = session_outcome(&snapshot) {
                    break outcome;
                }
            }
            _ = &mut ctrl_c => {
                tracing::info!("interrupted, closing connection");
                break InterruptedSnafu { stage: "wait-for-session" }.fail();
            }
        }
    };

    handle.shutdown();
    if let Err(error) = controller_task.await {
        tracing::warn!(error = %error, "repair controller task failed");
    }
    if let Err(error) = worker_task.await {
        tracing::warn!(error = %error, "connection worker task failed");
    }

    outcome
}

fn session_outcome(snapshot: &ViewSnapshot) -> Option<CliResult<String>> {
    if let Some(message) = &snapshot.error {
        return Some(
            SessionSnafu {
                stage: "repair-session",
                message: message.clone(),
            }
            .fail(),
        );
    }

    if snapshot.session.is_some() && !snapshot.loading {
        return snapshot.final_code.as_deref().map(|code| Ok(code.to_string()));
    }

    None
}

#[derive(Debug, Default)]
struct PrintedEntry {
    bytes: usize,
    closed: bool,
}

/// Writes only what changed since the previous snapshot.
#[derive(Debug, Default)]
struct TerminalPrinter {
    entries: Vec<PrintedEntry>,
    last_status_id: u64,
}

impl TerminalPrinter {
    fn render(&mut self, snapshot: &ViewSnapshot) -> CliResult<()> {
        let mut stdout = io::stdout().lock();
        self.write_entries(&mut stdout, snapshot)
            .and_then(|()| stdout.flush())
            .context(TerminalSnafu {
                stage: "render-entries",
            })?;

        let mut stderr = io::stderr().lock();
        self.write_status(&mut stderr, snapshot).context(TerminalSnafu {
            stage: "render-status",
        })
    }

    fn write_status(&mut self, out: &mut impl Write, snapshot: &ViewSnapshot) -> io::Result<()> {
        let last_printed = self.last_status_id;
        for line in snapshot
            .status_log
            .iter()
            .filter(|line| line.id > last_printed)
        {
            let tag = match line.tone {
                StatusTone::Progress => "..",
                StatusTone::Success => "ok",
                StatusTone::Error => "!!",
            };
            writeln!(out, "[{tag}] {}", line.text)?;
            self.last_status_id = line.id;
        }
        Ok(())
    }

    fn write_entries(&mut self, out: &mut impl Write, snapshot: &ViewSnapshot) -> io::Result<()> {
        for (index, entry) in snapshot.entries.iter().enumerate() {
            if index == self.entries.len() {
                writeln!(out, "# {}", entry.label)?;
                self.entries.push(PrintedEntry::default());
            }
            let Some(printed) = self.entries.get_mut(index) else {
                continue;
            };

            let text = entry.text();
            if text.len() > printed.bytes {
                out.write_all(text[printed.bytes..].as_bytes())?;
                printed.bytes = text.len();
            }
            if entry.revealed_len == entry.total_len && !printed.closed {
                writeln!(out)?;
                writeln!(out)?;
                printed.closed = true;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use fixstream::repair::{CONNECTION_ERROR_MESSAGE, RepairView, StatusLine};
    use fixstream_transport::{ConnectionEvent, InboundEvent};

    use super::*;

    fn status(id: u64, text: &str) -> StatusLine {
        StatusLine {
            id,
            text: text.to_string(),
            tone: StatusTone::Progress,
        }
    }

    fn tick(view: &mut RepairView) {
        let token = view.active_token().expect("animating");
        view.handle_tick(token);
    }

    #[test]
    fn status_lines_are_written_once() {
        let mut printer = TerminalPrinter::default();
        let mut snapshot = ViewSnapshot {
            status_log: vec![status(1, "Fixing Code..."), status(2, "Fixing Code...")],
            ..ViewSnapshot::default()
        };

        let mut out = Vec::new();
        printer.write_status(&mut out, &snapshot).expect("write");
        printer.write_status(&mut out, &snapshot).expect("write");
        snapshot.status_log.push(StatusLine {
            id: 3,
            text: "Error: NameError".to_string(),
            tone: StatusTone::Error,
        });
        printer.write_status(&mut out, &snapshot).expect("write");

        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "[..] Fixing Code...\n[..] Fixing Code...\n[!!] Error: NameError\n"
        );
        assert_eq!(printer.last_status_id, 3);
    }

    #[test]
    fn entries_stream_only_the_new_characters() {
        let mut view = RepairView::new(&Settings::default());
        view.begin_submission("x").expect("submission accepted");
        view.handle_connection_event(ConnectionEvent::Frame(InboundEvent::Incremental {
            code: "abc".to_string(),
        }));
        let mut printer = TerminalPrinter::default();
        let mut out = Vec::new();

        printer.write_entries(&mut out, &view.snapshot()).expect("write");
        for _ in 0..3 {
            tick(&mut view);
            printer.write_entries(&mut out, &view.snapshot()).expect("write");
        }
        printer.write_entries(&mut out, &view.snapshot()).expect("write");

        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "# Code Fix - Iteration 1\nabc\n\n"
        );
    }

    #[test]
    fn outcome_waits_for_the_final_entry() {
        let mut view = RepairView::new(&Settings::default());
        assert!(session_outcome(&view.snapshot()).is_none());

        view.begin_submission("x").expect("submission accepted");
        view.handle_connection_event(ConnectionEvent::Frame(InboundEvent::Final {
            code: "ok".to_string(),
        }));
        view.handle_connection_event(ConnectionEvent::Closed);
        tick(&mut view);
        assert!(session_outcome(&view.snapshot()).is_none());

        tick(&mut view);
        let outcome = session_outcome(&view.snapshot()).expect("session finished");
        assert_eq!(outcome.expect("successful repair"), "ok");
    }

    #[test]
    fn outcome_reports_the_error_banner() {
        let mut view = RepairView::new(&Settings::default());
        view.begin_submission("x").expect("submission accepted");
        view.handle_connection_event(ConnectionEvent::Failed {
            detail: "refused".to_string(),
        });

        let outcome = session_outcome(&view.snapshot()).expect("session failed");
        assert!(matches!(
            outcome,
            Err(CliError::Session { ref message, .. }) if message == CONNECTION_ERROR_MESSAGE
        ));
    }
}
