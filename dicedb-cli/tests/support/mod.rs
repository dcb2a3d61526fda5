//! In-process server speaking the JSON line protocol, with just enough
//! commands (`SET`, `GET`, `GET.WATCH`) to drive the client end to end.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use dicedb_cli::{
    client::ServerAddr,
    wire::{Payload, Response, WireCommand, read_message, write_message},
};
use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream},
    sync::{broadcast, mpsc},
    task::JoinHandle,
    time::{Instant, sleep},
};

pub const WATCH_FINGERPRINT: u64 = 4_242_424_242;
const WAIT_LIMIT: Duration = Duration::from_secs(3);

#[derive(Default)]
struct State {
    store: Mutex<HashMap<String, String>>,
    /// client id -> keys watched through `GET.WATCH`
    watched: Mutex<HashMap<String, Vec<String>>>,
    /// client id -> push channel of its watch connection
    watchers: Mutex<HashMap<String, mpsc::UnboundedSender<Response>>>,
    commands: AtomicUsize,
    watch_connections_closed: AtomicUsize,
}

impl State {
    fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set(&self, key: &str, value: &str) {
        Self::lock(&self.store).insert(key.to_string(), value.to_string());

        let push = Response::ok("OK")
            .with_fingerprint(WATCH_FINGERPRINT)
            .with_payload(&Payload::Value {
                value: value.to_string(),
            });
        let watched = Self::lock(&self.watched);
        let watchers = Self::lock(&self.watchers);
        for (client_id, keys) in watched.iter() {
            if keys.iter().any(|watched_key| watched_key == key) {
                if let Some(sender) = watchers.get(client_id) {
                    let _ = sender.send(push.clone());
                }
            }
        }
    }

    fn execute(&self, client_id: &str, command: WireCommand) -> Response {
        self.commands.fetch_add(1, Ordering::SeqCst);
        match (command.cmd.as_str(), command.args.as_slice()) {
            ("SET", [key, value]) => {
                self.set(key, value);
                Response::ok("OK").with_payload(&Payload::Ack)
            }
            ("GET", [key]) => {
                let value = Self::lock(&self.store).get(key).cloned().unwrap_or_default();
                Response::ok("OK").with_payload(&Payload::Value { value })
            }
            ("GET.WATCH", [key]) => {
                Self::lock(&self.watched)
                    .entry(client_id.to_string())
                    .or_default()
                    .push(key.clone());
                Response::ok("OK")
                    .with_fingerprint(WATCH_FINGERPRINT)
                    .with_payload(&Payload::Ack)
            }
            (cmd, _) => Response::err(format!("unknown command '{cmd}'")),
        }
    }
}

pub struct FakeServer {
    addr: SocketAddr,
    state: Arc<State>,
    disconnect: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl FakeServer {
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(State::default());
        let (disconnect, _) = broadcast::channel(4);

        let task = tokio::spawn({
            let state = Arc::clone(&state);
            let disconnect = disconnect.clone();
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let state = Arc::clone(&state);
                    let disconnect = disconnect.subscribe();
                    tokio::spawn(async move {
                        let _ = handle_connection(stream, state, disconnect).await;
                    });
                }
            }
        });

        Ok(Self {
            addr,
            state,
            disconnect,
            task,
        })
    }

    pub fn addr(&self) -> ServerAddr {
        ServerAddr::new(self.addr.ip().to_string(), self.addr.port())
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Stores a value as if another client had sent `SET`, notifying watchers.
    pub fn publish(&self, key: &str, value: &str) {
        self.state.set(key, value);
    }

    pub fn commands_handled(&self) -> usize {
        self.state.commands.load(Ordering::SeqCst)
    }

    pub fn watch_connections(&self) -> usize {
        State::lock(&self.state.watchers).len()
    }

    pub fn watch_connections_closed(&self) -> usize {
        self.state.watch_connections_closed.load(Ordering::SeqCst)
    }

    /// Ends every open watch connection from the server side.
    pub fn disconnect_watchers(&self) {
        let _ = self.disconnect.send(());
    }

    pub async fn wait_until(
        &self,
        description: &str,
        condition: impl Fn(&Self) -> bool,
    ) -> Result<()> {
        let deadline = Instant::now() + WAIT_LIMIT;
        while !condition(self) {
            if Instant::now() >= deadline {
                return Err(anyhow!("timed out waiting for {description}"));
            }
            sleep(Duration::from_millis(10)).await;
        }
        Ok(())
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<State>,
    mut disconnect: broadcast::Receiver<()>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let handshake = read_message::<_, WireCommand>(&mut reader)
        .await?
        .context("connection closed before handshake")?;
    let (client_id, mode) = match (handshake.cmd.as_str(), handshake.args.as_slice()) {
        ("HANDSHAKE", [client_id, mode]) => (client_id.clone(), mode.clone()),
        _ => {
            write_message(&mut writer, &Response::err("handshake required")).await?;
            return Ok(());
        }
    };
    write_message(&mut writer, &Response::ok("OK").with_payload(&Payload::Ack)).await?;

    if mode == "watch" {
        let (push_tx, mut push_rx) = mpsc::unbounded_channel();
        State::lock(&state.watchers).insert(client_id.clone(), push_tx);
        loop {
            tokio::select! {
                push = push_rx.recv() => match push {
                    Some(push) => write_message(&mut writer, &push).await?,
                    None => break,
                },
                // The client half-closes the watch connection to leave watch mode.
                frame = read_message::<_, WireCommand>(&mut reader) => {
                    if !matches!(frame, Ok(Some(_))) {
                        break;
                    }
                }
                _ = disconnect.recv() => break,
            }
        }
        State::lock(&state.watchers).remove(&client_id);
        State::lock(&state.watched).remove(&client_id);
        state.watch_connections_closed.fetch_add(1, Ordering::SeqCst);
        return Ok(());
    }

    while let Some(command) = read_message::<_, WireCommand>(&mut reader).await? {
        let response = state.execute(&client_id, command);
        write_message(&mut writer, &response).await?;
    }
    Ok(())
}
