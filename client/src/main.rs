#[macro_use]
extern crate tracing;

use std::time::Duration;

use anyhow::{Context as _, Result};
use camino::Utf8PathBuf;
use clap::Parser;
use jmp_client::config::{self, Conf};
use jmp_client::lease::{acquire_lease, release_lease, AcquireLeaseRequest, AuthTokens};
use jmp_client::{controller_client, dial, stub_tree, ClientLogConfig};
use jmp_proto::proto::controller_service_client::ControllerServiceClient;
use jmp_proto::proto::exporter_service_client::ExporterServiceClient;
use jmp_proto::proto::Empty;
use jmp_task::{spawn_task, ShutdownHandle};

#[derive(Debug, Parser)]
#[command(name = "jmp-client", about = "Acquires a lease and opens a local socket onto the held exporter")]
struct Args {
    #[arg(long, env = "JMP_CLIENT_CONFIG")]
    config: Utf8PathBuf,

    /// Write an example config to `--config` if it doesn't exist yet (or just print the existing
    /// one), then exit without connecting to the controller.
    #[arg(long)]
    config_init_only: bool,

    /// Label query selecting an exporter; ignored if `--lease-name` names an existing lease.
    #[arg(long)]
    selector: Option<String>,

    #[arg(long, default_value_t = 1800)]
    duration_secs: u64,

    #[arg(long)]
    lease_name: Option<String>,

    #[arg(long, default_value_t = 7200)]
    acquisition_timeout_secs: u64,

    /// Delete the lease on exit. Disable to hand the lease off to another process.
    #[arg(long, default_value_t = true)]
    release: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.config_init_only {
        let conf_file = config::load_conf_file_or_generate_new(&args.config)?;
        println!("{}", config::dto::render_example(&conf_file)?);
        return Ok(());
    }

    let conf_file = config::load_conf_file(&args.config)?;
    let conf = Conf::from_conf_file(&conf_file)?;

    let _logger_guard = jmp_log::init::<ClientLogConfig>(&conf.log_dir, "info", std::env::var("JMP_DEBUG_DIRECTIVES").ok().as_deref())
        .context("failed to initialize logging")?;

    info!(alias = %conf.alias, endpoint = %conf.endpoint, "acquiring lease");

    run(conf, args).await
}

async fn run(conf: Conf, args: Args) -> Result<()> {
    let mut controller = controller_client::connect(&conf.endpoint, &conf.tls).await.map(ControllerServiceClient::new)?;
    let mut tokens = AuthTokens::new(conf.token.clone(), conf.refresh_token.clone());

    let selector = args.selector.clone().unwrap_or_default();
    let lease = acquire_lease(
        &mut controller,
        &mut tokens,
        AcquireLeaseRequest {
            selector: &selector,
            duration_seconds: args.duration_secs,
            name: args.lease_name.as_deref(),
            acquisition_timeout: Duration::from_secs(args.acquisition_timeout_secs),
        },
    )
    .await
    .context("lease acquisition failed")?;

    info!(lease = %lease.name, exporter = %lease.exporter, "lease ready");

    let teardown = run_with_lease(&conf, &mut controller, &conf.token, &lease.name).await;

    if args.release {
        release_lease(&mut controller, &tokens, &lease.name).await;
    }

    teardown
}

async fn run_with_lease(
    conf: &Conf,
    controller: &mut ControllerServiceClient<tonic::transport::Channel>,
    token: &str,
    lease_name: &str,
) -> Result<()> {
    let (listener, socket_path) = dial::bind_local_socket()?;
    let (dial_shutdown, dial_signal) = ShutdownHandle::new();
    let dial_task = spawn_task(
        dial::DialLoopTask::new(controller.clone(), token.to_owned(), lease_name.to_owned(), listener, conf.tls.clone()),
        dial_signal,
    );

    let channel = dial::connect_session(socket_path).await.context("couldn't open the session channel")?;
    let mut exporter = ExporterServiceClient::new(channel);
    let report = exporter.get_report(Empty {}).await.context("GetReport RPC failed")?.into_inner();

    let root = stub_tree::build(&report.uuid, &report.reports, exporter, &conf.drivers).context("failed to build the client stub tree")?;
    info!(root_class = %root.class, children = root.children.len(), "stub tree ready");

    tokio::signal::ctrl_c().await.context("failed to wait for ctrl-c")?;

    dial_shutdown.signal();
    dial_task.abort();

    Ok(())
}
