mod http;
mod repl;

use clap::Parser;
use tabscope_engine::config::CaptureConfig;
use tabscope_engine::session::SessionController;
use tabscope_h::backend::CdpSession;

#[derive(Parser)]
#[command(name = "tabscope", version, about = "Capture console, network, and page state from a live browser tab")]
struct Args {
    /// Directory the dump artifacts are written into
    #[arg(long, default_value = "tabscope-dump")]
    output: std::path::PathBuf,

    /// Attach to a running browser via its debugger websocket URL
    /// instead of launching one
    #[arg(long)]
    connect: Option<String>,

    /// Launch the browser in visible mode (not headless)
    #[arg(long)]
    visible: bool,

    /// Navigate the monitored tab to this URL before capturing
    #[arg(long)]
    url: Option<String>,

    /// Monitor the tab at this 1-based index after startup
    #[arg(long)]
    tab: Option<usize>,

    /// Port for the HTTP trigger endpoints
    #[arg(long, default_value_t = 3580)]
    http_port: u16,

    /// Disable the HTTP trigger server
    #[arg(long)]
    no_http: bool,

    /// Extra denylist pattern (repeatable); matching console text and
    /// request URLs are never captured
    #[arg(long = "filter")]
    filters: Vec<String>,

    /// Hard wall-clock limit in seconds; a final dump is taken before
    /// exiting
    #[arg(long)]
    timeout: Option<u64>,

    /// Byte ceiling for captured request/response bodies
    #[arg(long, default_value_t = 64 * 1024)]
    body_ceiling: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Log to stderr so stdout stays usable for the keyboard loop.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = CaptureConfig {
        output_dir: args.output,
        hard_timeout_secs: args.timeout,
        body_ceiling: args.body_ceiling,
        ..Default::default()
    };
    config.denylist.extend(args.filters);

    let mut session = match &args.connect {
        Some(ws_url) => CdpSession::connect(ws_url).await?,
        None => CdpSession::launch(args.visible).await?,
    };
    if let Some(url) = &args.url {
        session.goto(url).await?;
    }

    let (controller, handle) = SessionController::new(Some(Box::new(session)), config)?;
    let mut engine = tokio::spawn(controller.run());

    if let Some(index) = args.tab {
        match handle.switch_tab(index).await {
            Ok(tab) => println!("Monitoring tab {}: {} ({})", tab.index, tab.title, tab.url),
            Err(e) => eprintln!("Cannot monitor tab {}: {}", index, e),
        }
    }

    if !args.no_http {
        let http_handle = handle.clone();
        tokio::spawn(async move {
            if let Err(e) = http::serve(args.http_port, http_handle).await {
                tracing::warn!("HTTP trigger server stopped: {}", e);
            }
        });
    }

    run_until_exit(&handle, &mut engine).await?;
    Ok(())
}

/// Run the keyboard loop until the user exits or the engine ends on
/// its own (hard timeout, lost browser session). Either way the
/// process leaves this function once the engine task has finished.
async fn run_until_exit(
    handle: &tabscope_engine::session::SessionHandle,
    engine: &mut tokio::task::JoinHandle<()>,
) -> anyhow::Result<()> {
    tokio::select! {
        result = repl::run(handle) => {
            result?;
            handle.shutdown().await.ok();
            (&mut *engine).await?;
        }
        result = &mut *engine => {
            result?;
        }
    }
    Ok(())
}
