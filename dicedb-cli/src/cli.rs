use std::num::NonZeroUsize;

use clap::{Args, Parser, Subcommand};

use crate::client::ServerAddr;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 7379;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub server: ServerArgs,

    /// Without a subcommand, starts the interactive shell.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Host of the DiceDB server.
    #[arg(long, global = true, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port of the DiceDB server.
    #[arg(long, global = true, default_value_t = DEFAULT_PORT)]
    pub port: u16,
}

impl ServerArgs {
    pub fn addr(&self) -> ServerAddr {
        ServerAddr::new(self.host.clone(), self.port)
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Measure GET throughput over parallel connections.
    Bench(BenchArgs),
}

#[derive(Args, Debug, Clone)]
pub struct BenchArgs {
    /// Number of parallel connections, one worker each.
    #[arg(long, default_value = "4")]
    pub num_connections: NonZeroUsize,
}
