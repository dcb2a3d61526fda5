use std::io::IsTerminal;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use dicedb_cli::{
    bench::{self, TrackingAllocator},
    cli::{Cli, Command},
    client::{ServerAddr, TcpClient},
    render::TerminalRenderer,
    session::{EditorLines, LineSource, PromptedStdin, Session, SessionEnd},
    signal::{SignalRouter, ctrl_c_stream},
};

#[global_allocator]
static GLOBAL: TrackingAllocator = TrackingAllocator;

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    // stdout belongs to the shell; logs go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let addr = cli.server.addr();
    match cli.command {
        None => {
            let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
            runtime.block_on(repl(addr))?;
        }
        // Workers build their own runtimes, so the benchmark runs outside any.
        Some(Command::Bench(args)) => {
            let report = bench::run(&addr, args.num_connections)
                .context("benchmark failed")?;
            println!("{report}");
        }
    }

    Ok(())
}

fn line_source(addr: &ServerAddr) -> Box<dyn LineSource> {
    if !std::io::stdin().is_terminal() {
        return Box::new(PromptedStdin::new(addr));
    }
    match EditorLines::new(addr) {
        Ok(editor) => Box::new(editor),
        Err(error) => {
            warn!(?error, "line editor unavailable, reading plain stdin");
            Box::new(PromptedStdin::new(addr))
        }
    }
}

fn exit_on_interrupt() -> ! {
    println!("\nreceived interrupt. exiting...");
    std::process::exit(0);
}

async fn repl(addr: ServerAddr) -> Result<()> {
    let client = TcpClient::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;
    let router = SignalRouter::new();
    let mut session = Session::new(
        client,
        line_source(&addr),
        TerminalRenderer::stdout(),
        router.clone(),
    );

    // A listener that ends without terminating (no handler) just disables its branch.
    let end = tokio::select! {
        end = session.run() => end?,
        true = router.listen(ctrl_c_stream()) => {
            // A pending stdin read would keep the runtime alive on shutdown.
            exit_on_interrupt()
        }
    };
    info!(?end, "shell closed");
    if end == SessionEnd::Interrupted {
        exit_on_interrupt();
    }

    let (client, _, _) = session.into_parts();
    client.shutdown().await;
    Ok(())
}
