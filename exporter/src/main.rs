#[macro_use]
extern crate tracing;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use camino::Utf8PathBuf;
use clap::Parser;
use jmp_exporter::config::{self, Conf};
use jmp_exporter::lifecycle::{stop_channel, Lifecycle, StopHandle};
use jmp_exporter::registration::{register, unregister};
use jmp_exporter::service::ExporterServiceImpl;
use jmp_exporter::session::{ExporterState, Session};
use jmp_exporter::status::StatusLoopTask;
use jmp_exporter::{controller_client, export_tree, ExporterLogConfig};
use jmp_proto::proto::controller_service_client::ControllerServiceClient;
use jmp_proto::proto::exporter_service_server::ExporterServiceServer;
use jmp_task::{spawn_task, ShutdownHandle};
use tokio::net::UnixListener;
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::UnixListenerStream;

#[derive(Debug, Parser)]
#[command(name = "jmp-exporter", about = "Runs an exporter process against a Jumpstarter controller")]
struct Args {
    /// Path to the exporter's YAML config file.
    #[arg(long, env = "JMP_EXPORTER_CONFIG")]
    config: Utf8PathBuf,

    /// Write an example config to `--config` if it doesn't exist yet (or just print the existing
    /// one), then exit without connecting to the controller.
    #[arg(long)]
    config_init_only: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    if args.config_init_only {
        let conf_file = config::load_conf_file_or_generate_new(&args.config)?;
        println!("{}", config::dto::render_example(&conf_file)?);
        return Ok(ExitCode::SUCCESS);
    }

    let conf_file = config::load_conf_file(&args.config)?;
    let conf = Conf::from_conf_file(&conf_file)?;

    let _logger_guard = jmp_log::init::<ExporterLogConfig>(&conf.log_dir, "info", std::env::var("JMP_DEBUG_DIRECTIVES").ok().as_deref())
        .context("failed to initialize logging")?;

    info!(alias = %conf.alias, endpoint = %conf.endpoint, "starting exporter");

    run(conf).await
}

async fn run(conf: Conf) -> Result<ExitCode> {
    let session_socket = session_socket_path(&conf.alias);
    let _ = std::fs::remove_file(&session_socket);

    let resources = Arc::new(jmp_driver::ResourceTable::new());
    let initial_root = export_tree::build(&conf.export, &resources).context("failed to build the initial export tree")?;
    let initial_session = Session::new(initial_root);

    let state = Arc::new(ExporterState::new());
    let session: Arc<RwLock<Option<Session>>> = Arc::new(RwLock::new(None));

    let mut controller = controller_client::connect(&conf.endpoint, &conf.tls).await.map(ControllerServiceClient::new)?;

    let mut labels = std::collections::HashMap::new();
    if !conf.name.is_empty() {
        labels.insert("name".to_owned(), conf.name.clone());
    }
    register(&mut controller, &conf.token, labels, &initial_session)
        .await
        .context("registration failed")?;

    let listener = UnixListener::bind(&session_socket).with_context(|| format!("couldn't bind session socket at {session_socket}"))?;
    let (local_server_shutdown, local_server_signal) = ShutdownHandle::new();
    let server_session = Arc::clone(&session);
    let server_state = Arc::clone(&state);
    let local_server = tokio::spawn(async move {
        let mut signal = local_server_signal;
        let service = ExporterServiceImpl::new(server_state, server_session);
        let incoming = UnixListenerStream::new(listener);
        tokio::select! {
            result = tonic::transport::Server::builder().add_service(ExporterServiceServer::new(service)).serve_with_incoming(incoming) => {
                if let Err(error) = result {
                    error!(%error, "local session server exited");
                }
            }
            _ = signal.wait() => {}
        }
    });

    let (changes_tx, changes_rx) = mpsc::channel(16);
    let (status_shutdown, status_signal) = ShutdownHandle::new();
    let status_task = spawn_task(
        StatusLoopTask::new(controller.clone(), conf.token.clone(), Arc::clone(&state.lease), changes_tx),
        status_signal,
    );

    let token = conf.token.clone();
    let mut unregister_controller = controller.clone();

    let (stop_handle, stop_rx) = stop_channel();
    let signal_watcher = tokio::spawn(watch_stop_signals(stop_handle));

    let lifecycle = Lifecycle::new(
        conf,
        controller,
        Arc::clone(&state.lease),
        state.log_sink.clone(),
        Arc::clone(&session),
        session_socket,
    );

    let exit_code = lifecycle.run(changes_rx, stop_rx).await;
    signal_watcher.abort();

    info!("unregistering exporter with controller");
    unregister(&mut unregister_controller, &token, "exporter shutdown").await;

    status_shutdown.signal();
    status_task.abort();
    local_server_shutdown.signal();
    let _ = local_server.await;

    Ok(exit_code.unwrap_or(ExitCode::SUCCESS))
}

/// Waits for a stop signal and relays it to the lifecycle as `stop(wait_for_lease_exit)` (spec
/// §4.3): the first signal requests a graceful stop once the current lease exits, a second
/// escalates to an immediate stop, matching the teacher's own terminate/quit/interrupt handling.
#[cfg(unix)]
async fn watch_stop_signals(stop: StopHandle) {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut terminate, mut quit, mut interrupt) = match (signal(SignalKind::terminate()), signal(SignalKind::quit()), signal(SignalKind::interrupt())) {
        (Ok(terminate), Ok(quit), Ok(interrupt)) => (terminate, quit, interrupt),
        (Err(error), _, _) | (_, Err(error), _) | (_, _, Err(error)) => {
            warn!(%error, "failed to install stop signal handlers");
            return;
        }
    };

    let mut graceful_requested = false;
    loop {
        tokio::select! {
            _ = terminate.recv() => {}
            _ = quit.recv() => {}
            _ = interrupt.recv() => {}
        }

        if graceful_requested {
            info!("second stop signal received, stopping immediately");
            stop.stop(false);
            return;
        }

        info!("stop signal received, stopping once the current lease exits");
        graceful_requested = true;
        stop.stop(true);
    }
}

#[cfg(not(unix))]
async fn watch_stop_signals(stop: StopHandle) {
    let mut graceful_requested = false;
    loop {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }

        if graceful_requested {
            info!("second stop signal received, stopping immediately");
            stop.stop(false);
            return;
        }

        info!("stop signal received, stopping once the current lease exits");
        graceful_requested = true;
        stop.stop(true);
    }
}

fn session_socket_path(alias: &str) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("/tmp/jmp-exporter-{alias}.sock"))
}
