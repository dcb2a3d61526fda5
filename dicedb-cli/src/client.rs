use std::{fmt, io};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};
use tracing::{debug, info, warn};

use crate::{
    command::Command,
    wire::{Response, WireCommand, read_message, write_message},
};

const HANDSHAKE: &str = "HANDSHAKE";
const COMMAND_MODE: &str = "command";
const WATCH_MODE: &str = "watch";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {addr}")]
    Connect {
        addr: ServerAddr,
        #[source]
        source: io::Error,
    },
    #[error("connection i/o failed")]
    Io(#[from] io::Error),
    #[error("server closed the connection")]
    ConnectionClosed,
    #[error("handshake rejected: {0}")]
    Handshake(String),
}

/// Where the server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddr {
    pub host: String,
    pub port: u16,
}

impl ServerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The session's view of a server connection: one request in flight at a time.
#[async_trait]
pub trait ClientPort: Send {
    type Stream: Subscription;

    async fn send(&mut self, command: &Command) -> Result<Response, ClientError>;

    async fn open_subscription(&mut self) -> Result<Self::Stream, ClientError>;
}

/// Pushed responses for watch commands.
#[async_trait]
pub trait Subscription: Send {
    /// Next push in delivery order; `None` once the stream has ended or was closed.
    async fn next(&mut self) -> Option<Result<Response, ClientError>>;

    /// Closing twice is a no-op.
    async fn close(&mut self);
}

pub struct TcpClient {
    addr: ServerAddr,
    client_id: String,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TcpClient {
    pub async fn connect(addr: &ServerAddr) -> Result<Self, ClientError> {
        let client_id = nanoid::nanoid!();
        let (reader, writer) = establish_connection(addr, &client_id, COMMAND_MODE).await?;
        info!(%addr, %client_id, "connected");

        Ok(Self {
            addr: addr.clone(),
            client_id,
            reader,
            writer,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub async fn shutdown(mut self) {
        if let Err(error) = self.writer.shutdown().await {
            warn!(?error, "failed to shutdown client writer cleanly");
        }
    }
}

#[async_trait]
impl ClientPort for TcpClient {
    type Stream = TcpSubscription;

    async fn send(&mut self, command: &Command) -> Result<Response, ClientError> {
        exchange(&mut self.reader, &mut self.writer, &WireCommand::from(command)).await
    }

    async fn open_subscription(&mut self) -> Result<TcpSubscription, ClientError> {
        let (reader, writer) =
            establish_connection(&self.addr, &self.client_id, WATCH_MODE).await?;
        debug!(client_id = %self.client_id, "watch connection established");

        Ok(TcpSubscription {
            reader,
            writer: Some(writer),
        })
    }
}

/// Watch connection sharing the command connection's client id.
pub struct TcpSubscription {
    reader: BufReader<OwnedReadHalf>,
    writer: Option<OwnedWriteHalf>,
}

impl TcpSubscription {
    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }
}

#[async_trait]
impl Subscription for TcpSubscription {
    async fn next(&mut self) -> Option<Result<Response, ClientError>> {
        if self.is_closed() {
            return None;
        }
        match read_message::<_, Response>(&mut self.reader).await {
            Ok(Some(response)) => Some(Ok(response)),
            Ok(None) => None,
            Err(error) => Some(Err(ClientError::Io(error))),
        }
    }

    async fn close(&mut self) {
        let Some(mut writer) = self.writer.take() else {
            return;
        };
        if let Err(error) = writer.shutdown().await {
            debug!(?error, "watch connection already gone");
        }
    }
}

async fn establish_connection(
    addr: &ServerAddr,
    client_id: &str,
    mode: &str,
) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf), ClientError> {
    let stream = TcpStream::connect((addr.host.as_str(), addr.port))
        .await
        .map_err(|source| ClientError::Connect {
            addr: addr.clone(),
            source,
        })?;
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut writer = writer;

    let handshake = WireCommand {
        cmd: HANDSHAKE.to_string(),
        args: vec![client_id.to_string(), mode.to_string()],
    };
    let reply = exchange(&mut reader, &mut writer, &handshake).await?;
    if reply.is_err() {
        return Err(ClientError::Handshake(reply.message));
    }

    Ok((reader, writer))
}

async fn exchange(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    command: &WireCommand,
) -> Result<Response, ClientError> {
    write_message(writer, command).await?;
    read_message::<_, Response>(reader)
        .await?
        .ok_or(ClientError::ConnectionClosed)
}
