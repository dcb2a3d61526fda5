//! The DiceDB workload: round-robin `GET` over a fixed key space.

use anyhow::{Context, Result};
use tokio::runtime::{Builder, Runtime};

use super::bencher::Bencher;
use crate::{
    client::{ClientError, ClientPort, ServerAddr, TcpClient},
    command::Command,
    wire::Response,
};

/// Number of distinct keys cycled through by [`get_keys`].
pub const KEY_SPACE: usize = 1000;

/// One benchmark connection with a runtime owned by its worker thread.
pub struct BenchConnection {
    runtime: Runtime,
    client: TcpClient,
}

impl BenchConnection {
    pub fn open(addr: &ServerAddr) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to build worker runtime")?;
        let client = runtime
            .block_on(TcpClient::connect(addr))
            .with_context(|| format!("failed to connect to {addr}"))?;
        Ok(Self { runtime, client })
    }

    pub fn send(&mut self, command: &Command) -> Result<Response, ClientError> {
        self.runtime.block_on(self.client.send(command))
    }
}

/// `GET key-0` .. `GET key-999`.
pub fn key_commands() -> Result<Vec<Command>> {
    (0..KEY_SPACE)
        .map(|i| Command::new("GET", vec![format!("key-{i}")]).map_err(Into::into))
        .collect()
}

/// Sends `b.iterations()` GETs; command construction is not measured.
///
/// Missing keys and other `ERR` replies count as completed operations.
pub fn get_keys(connection: &mut BenchConnection, b: &mut Bencher) -> Result<()> {
    let commands = key_commands()?;
    b.reset_timer();
    for i in 0..b.iterations() {
        let command = &commands[i as usize % KEY_SPACE];
        connection
            .send(command)
            .with_context(|| format!("request {command} failed"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_space_is_cycled_in_order() {
        let commands = key_commands().expect("commands");

        assert_eq!(commands.len(), KEY_SPACE);
        assert_eq!(commands[0].to_string(), "GET key-0");
        assert_eq!(commands[999].to_string(), "GET key-999");
        assert!(commands.iter().all(|command| command.verb() == "GET"));
    }

    #[test]
    fn unreachable_server_fails_to_open() {
        // Port 1 on localhost is reserved and closed in test environments.
        let result = BenchConnection::open(&ServerAddr::new("127.0.0.1", 1));
        assert!(result.is_err());
    }
}
