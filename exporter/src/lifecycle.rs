//! Drives the lease state machine (spec §4.3) from the stream of [`LeaseChange`]s the status
//! loop produces: tears down the previous session and listen loop before building the next one,
//! runs the before/after-lease hooks, and reacts to hook failure per `on_failure`.

use std::process::ExitCode;
use std::sync::Arc;

use camino::Utf8PathBuf;
use jmp_driver::ResourceTable;
use jmp_proto::proto::controller_service_client::ControllerServiceClient;
use jmp_task::{ChildTask, Task as _};
use tokio::sync::{mpsc, RwLock};
use tonic::transport::Channel;
use tracing::{error, info, warn};

use crate::config::{Conf, OnFailure};
use crate::export_tree;
use crate::hook::run_hook;
use crate::lease::{LeaseContext, Phase};
use crate::listen::ListenLoopTask;
use crate::log_sink::LogSink;
use crate::session::Session;
use crate::status::LeaseChange;

/// Requests the exporter to stop (spec §4.3's `stop(wait_for_lease_exit)` operation), either
/// immediately or once the current lease ends. Cloneable so both a signal handler and, in
/// principle, an embedder can hold one.
#[derive(Clone)]
pub struct StopHandle(mpsc::Sender<bool>);

impl StopHandle {
    pub fn stop(&self, wait_for_lease_exit: bool) {
        let _ = self.0.try_send(wait_for_lease_exit);
    }
}

pub fn stop_channel() -> (StopHandle, mpsc::Receiver<bool>) {
    let (tx, rx) = mpsc::channel(1);
    (StopHandle(tx), rx)
}

pub struct Lifecycle {
    conf: Conf,
    controller: ControllerServiceClient<Channel>,
    lease: Arc<LeaseContext>,
    log_sink: LogSink,
    session: Arc<RwLock<Option<Session>>>,
    session_socket: Utf8PathBuf,
    listen_task: Option<(ChildTask<anyhow::Result<()>>, jmp_task::ShutdownHandle)>,
}

impl Lifecycle {
    pub fn new(
        conf: Conf,
        controller: ControllerServiceClient<Channel>,
        lease: Arc<LeaseContext>,
        log_sink: LogSink,
        session: Arc<RwLock<Option<Session>>>,
        session_socket: Utf8PathBuf,
    ) -> Self {
        Self {
            conf,
            controller,
            lease,
            log_sink,
            session,
            session_socket,
            listen_task: None,
        }
    }

    /// Consumes lease-change notifications until the channel closes or a stop is requested.
    /// Returns `Some(code)` when a hook's `on_failure: exit` policy or a stop request demands
    /// the process terminate.
    ///
    /// A stop with `wait_for_lease_exit: true` is deferred until the lease currently held (if
    /// any) releases; a stop with `wait_for_lease_exit: false` terminates immediately, matching
    /// `Exporter.stop()`'s two modes.
    pub async fn run(mut self, mut changes: mpsc::Receiver<LeaseChange>, mut stop_requests: mpsc::Receiver<bool>) -> Option<ExitCode> {
        let mut stop_pending = false;

        loop {
            tokio::select! {
                stop = stop_requests.recv() => {
                    match stop {
                        Some(true) if self.lease.lease_name().is_empty() => return Some(ExitCode::SUCCESS),
                        Some(true) => {
                            info!("exporter marked for stop upon lease exit");
                            stop_pending = true;
                        }
                        Some(false) => return Some(ExitCode::SUCCESS),
                        None => {}
                    }
                }
                change = changes.recv() => {
                    let Some(change) = change else { return None };
                    if change.lease_name.is_empty() {
                        if let Some(code) = self.release_lease().await {
                            return Some(code);
                        }
                        if stop_pending {
                            return Some(ExitCode::SUCCESS);
                        }
                    } else if let Some(code) = self.acquire_lease(&change.lease_name, &change.client_name).await {
                        return Some(code);
                    }
                }
            }
        }
    }

    async fn acquire_lease(&mut self, lease_name: &str, client_name: &str) -> Option<ExitCode> {
        self.teardown_session().await;

        self.lease.set_phase(Phase::BeforeLeaseHook);
        if let Some(hook) = self.conf.hooks.before_lease.clone() {
            if let Err(failure) = run_hook(&hook, "BEFORE_LEASE_HOOK", &self.session_socket, lease_name, client_name, &self.log_sink).await {
                warn!(error = %failure.message, "beforeLease hook failed");
                match failure.on_failure {
                    OnFailure::Warn => {}
                    OnFailure::EndLease => {
                        self.lease.set_phase(Phase::BeforeLeaseHookFailed(failure.message));
                        return self.release_lease().await;
                    }
                    OnFailure::Exit => {
                        self.lease.set_phase(Phase::BeforeLeaseHookFailed(failure.message));
                        error!("beforeLease hook failed with on_failure=exit, shutting down");
                        return Some(ExitCode::FAILURE);
                    }
                }
            }
        }

        let resources = Arc::new(ResourceTable::new());
        let root = match export_tree::build(&self.conf.export, &resources) {
            Ok(root) => root,
            Err(error) => {
                error!(%error, "failed to build export tree for new lease");
                return Some(ExitCode::FAILURE);
            }
        };

        let session = Session::new(root);
        session.registry.reset().await;
        *self.session.write().await = Some(session);

        self.lease.set_phase(Phase::LeaseReady);

        let (shutdown_handle, shutdown_signal) = jmp_task::ShutdownHandle::new();
        let task = ChildTask::spawn(
            ListenLoopTask::new(
                self.controller.clone(),
                self.conf.token.clone(),
                lease_name.to_owned(),
                self.session_socket.clone(),
                self.conf.tls.clone(),
            )
            .run(shutdown_signal),
        );
        self.listen_task = Some((task, shutdown_handle));

        None
    }

    async fn release_lease(&mut self) -> Option<ExitCode> {
        self.listen_task.take();

        self.lease.set_phase(Phase::AfterLeaseHook);
        let lease_name = self.lease.lease_name();
        let client_name = self.lease.client_name();

        if let Some(hook) = self.conf.hooks.after_lease.clone() {
            if let Err(failure) = run_hook(&hook, "AFTER_LEASE_HOOK", &self.session_socket, &lease_name, &client_name, &self.log_sink).await {
                warn!(error = %failure.message, "afterLease hook failed");
                match failure.on_failure {
                    OnFailure::Warn | OnFailure::EndLease => {}
                    OnFailure::Exit => {
                        self.lease.set_phase(Phase::AfterLeaseHookFailed(failure.message));
                        error!("afterLease hook failed with on_failure=exit, shutting down");
                        self.teardown_session().await;
                        return Some(ExitCode::FAILURE);
                    }
                }
            }
        }

        self.teardown_session().await;
        self.lease.clear_lease();
        self.lease.set_phase(Phase::Available);
        None
    }

    async fn teardown_session(&mut self) {
        self.listen_task.take();
        if let Some(session) = self.session.write().await.take() {
            session.registry.close().await;
        }
    }
}
