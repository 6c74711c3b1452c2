use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

use xcmon_core::types::{ChangeEvent, MonitoredProject};

use crate::error::{io_err, DaemonError};
use crate::monitor::Monitor;
use crate::paths::{socket_path, xcmon_root};
use crate::protocol::{dispatch, DaemonResponse, ToolRequest};
use crate::watcher::{watch, ChangeStream, WatchOptions};

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path, initial_root: Option<PathBuf>) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), initial_root))
}

/// Run the daemon runtime.
///
/// `initial_root` wins over `default_root` from the config. A root that fails
/// to resolve is logged and the daemon starts with no project.
pub async fn run(home: PathBuf, initial_root: Option<PathBuf>) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;
    let config = xcmon_core::config::load_at(&home)?;
    let monitor = Arc::new(Monitor::new(&config, &home));

    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let aggregator_handle = {
        let shutdown = shutdown_tx.clone();
        let aggregator = monitor.aggregator();
        let projects = monitor.subscribe();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            aggregator.run(projects, shutdown_rx).await;
            let _ = shutdown.send(());
            Ok::<(), DaemonError>(())
        })
    };

    if let Some(root) = initial_root.or_else(|| config.default_root.clone()) {
        if let Err(err) = monitor.set_project_path(&root).await {
            tracing::warn!(root = %root.display(), error = %err, "initial project not set");
        }
    }

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let monitor = monitor.clone();
        let options = WatchOptions::from_config(&config);
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = watcher_task(monitor, options, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let ticker_handle = {
        let shutdown = shutdown_tx.clone();
        let monitor = monitor.clone();
        let period = config.poll_interval();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = ticker_task(monitor, period, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let monitor = monitor.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = socket_server_task(home, monitor, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (aggregator_result, watcher_result, ticker_result, socket_result, signal_result) = tokio::join!(
        aggregator_handle,
        watcher_handle,
        ticker_handle,
        socket_handle,
        signal_handle
    );

    handle_join("aggregator", aggregator_result)?;
    handle_join("watcher", watcher_result)?;
    handle_join("ticker", ticker_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Watcher supervisor
// ---------------------------------------------------------------------------

/// A change stream plus the root spelling the monitored project uses.
struct WatchedRoot {
    stream: ChangeStream,
    root: PathBuf,
}

impl WatchedRoot {
    async fn next(&mut self) -> Option<ChangeEvent> {
        let mut event = self.stream.next().await?;
        event.path = rebase(event.path, self.stream.root(), &self.root);
        Some(event)
    }
}

enum WatchStep {
    Shutdown,
    Switch,
    Change(Option<ChangeEvent>),
}

/// Keep one change stream on the active root; restart it on every switch.
async fn watcher_task(
    monitor: Arc<Monitor>,
    options: WatchOptions,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut projects = monitor.subscribe();
    let initial = projects.borrow_and_update().clone();
    let mut watched = initial.and_then(|active| start_watch(&active.project, &options));

    loop {
        let step = tokio::select! {
            _ = shutdown_rx.recv() => WatchStep::Shutdown,
            changed = projects.changed() => match changed {
                Ok(()) => WatchStep::Switch,
                Err(_) => WatchStep::Shutdown,
            },
            event = next_change(&mut watched) => WatchStep::Change(event),
        };

        match step {
            WatchStep::Shutdown => break,
            WatchStep::Switch => {
                let active = projects.borrow_and_update().clone();
                // Dropping the previous stream cancels it.
                drop(watched.take());
                watched = active.and_then(|active| start_watch(&active.project, &options));
            }
            WatchStep::Change(Some(event)) => {
                monitor.notify_change(event).await;
            }
            WatchStep::Change(None) => {
                tracing::warn!("change stream ended; waiting for the next project switch");
                watched = None;
            }
        }
    }
    Ok(())
}

fn start_watch(project: &MonitoredProject, options: &WatchOptions) -> Option<WatchedRoot> {
    let root = project.path.as_path();
    let options = options
        .clone()
        .with_build_log_dirs(root, &project.artifacts.build_log_dirs);
    match watch(root, options) {
        Ok(stream) => Some(WatchedRoot {
            stream,
            root: root.to_path_buf(),
        }),
        Err(err) => {
            tracing::warn!(root = %root.display(), error = %err, "cannot watch project root");
            None
        }
    }
}

async fn next_change(watched: &mut Option<WatchedRoot>) -> Option<ChangeEvent> {
    match watched {
        Some(watched) => watched.next().await,
        None => std::future::pending().await,
    }
}

/// Re-express `path` (below the canonical `watched` root) under `root`.
fn rebase(path: PathBuf, watched: &Path, root: &Path) -> PathBuf {
    match path.strip_prefix(watched) {
        Ok(relative) if watched != root => root.join(relative),
        _ => path,
    }
}

// ---------------------------------------------------------------------------
// Ticker
// ---------------------------------------------------------------------------

async fn ticker_task(
    monitor: Arc<Monitor>,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await; // consume the first immediate tick

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                monitor.tick().await;
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Socket server
// ---------------------------------------------------------------------------

async fn socket_server_task(
    home: PathBuf,
    monitor: Arc<Monitor>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "daemon socket listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let monitor = monitor.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, monitor).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(stream: UnixStream, monitor: Arc<Monitor>) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<ToolRequest>(&line) {
            Ok(request) => dispatch(&monitor, &request).await,
            Err(err) => DaemonResponse::error(format!("invalid request JSON: {err}")),
        };
        write_response(&mut writer, &response).await?;
    }

    Ok(())
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let root = xcmon_root(home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
