//! The REPL state machine.
//!
//! In [`SessionMode::Normal`] the session reads a line, sends it as one
//! command and renders the reply. A successful watch command opens a
//! subscription and switches to [`SessionMode::Streaming`], where pushed
//! responses are rendered until the [`SignalRouter`] routes an interrupt to
//! the session's cancel scope or the stream ends.
//!
//! A command sent from Normal mode is a single round trip and cannot be
//! interrupted; an interrupt during that wait terminates the process.

use std::{
    collections::VecDeque,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use colored::Colorize;
use rustyline::{DefaultEditor, error::ReadlineError};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdin},
    select,
    sync::watch,
};
use tracing::{debug, info, warn};

use crate::{
    client::{ClientPort, ServerAddr, Subscription},
    command::{self, Command},
    render::Renderer,
    signal::{Dispatch, SessionMode, SignalRouter},
};

pub const EXIT_KEYWORD: &str = "exit";

/// File under `$HOME` holding the line editor's history.
pub const HISTORY_FILE: &str = ".dicedb_history";

/// One read from a [`LineSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Text(String),
    /// Ctrl-C caught by the source itself while it owned the terminal.
    Interrupted,
    End,
}

#[async_trait]
pub trait LineSource: Send {
    async fn next_line(&mut self) -> io::Result<Line>;
}

#[async_trait]
impl LineSource for Box<dyn LineSource> {
    async fn next_line(&mut self) -> io::Result<Line> {
        (**self).next_line().await
    }
}

fn prompt(addr: &ServerAddr) -> String {
    format!(
        "{}:{}> ",
        addr.host.as_str().blue().bold(),
        addr.port.to_string().blue().bold()
    )
}

/// Reads stdin, printing the `host:port> ` prompt before each line.
///
/// Used when stdin is not a terminal.
pub struct PromptedStdin {
    prompt: String,
    reader: BufReader<Stdin>,
    buffer: String,
}

impl PromptedStdin {
    pub fn new(addr: &ServerAddr) -> Self {
        Self {
            prompt: prompt(addr),
            reader: BufReader::new(tokio::io::stdin()),
            buffer: String::new(),
        }
    }
}

#[async_trait]
impl LineSource for PromptedStdin {
    async fn next_line(&mut self) -> io::Result<Line> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(self.prompt.as_bytes()).await?;
        stdout.flush().await?;

        self.buffer.clear();
        if self.reader.read_line(&mut self.buffer).await? == 0 {
            return Ok(Line::End);
        }
        Ok(Line::Text(self.buffer.clone()))
    }
}

/// Line editor with persistent history, for interactive terminals.
///
/// `readline` blocks, so every read runs on the blocking pool. While it runs
/// the terminal is in raw mode and Ctrl-C comes back as [`Line::Interrupted`]
/// instead of a signal.
pub struct EditorLines {
    prompt: String,
    editor: Option<DefaultEditor>,
    history: Option<PathBuf>,
}

impl EditorLines {
    pub fn new(addr: &ServerAddr) -> Result<Self, ReadlineError> {
        let history = std::env::var_os("HOME").map(|home| Path::new(&home).join(HISTORY_FILE));
        Self::with_history(addr, history)
    }

    pub fn with_history(
        addr: &ServerAddr,
        history: Option<PathBuf>,
    ) -> Result<Self, ReadlineError> {
        let mut editor = DefaultEditor::new()?;
        if let Some(path) = &history {
            if let Err(error) = editor.load_history(path) {
                debug!(?error, path = %path.display(), "no history loaded");
            }
        }

        Ok(Self {
            prompt: prompt(addr),
            editor: Some(editor),
            history,
        })
    }
}

fn remember(editor: &mut DefaultEditor, history: Option<&Path>, line: &str) {
    if line.trim().is_empty() {
        return;
    }
    if let Err(error) = editor.add_history_entry(line) {
        warn!(?error, "failed to record history entry");
        return;
    }
    if let Some(path) = history {
        if let Err(error) = editor.save_history(path) {
            warn!(?error, path = %path.display(), "failed to save history");
        }
    }
}

#[async_trait]
impl LineSource for EditorLines {
    async fn next_line(&mut self) -> io::Result<Line> {
        let mut editor = self
            .editor
            .take()
            .ok_or_else(|| io::Error::other("line editor lost by an earlier read"))?;
        let prompt = self.prompt.clone();
        let history = self.history.clone();

        let (editor, read) = tokio::task::spawn_blocking(move || {
            let read = editor.readline(&prompt);
            if let Ok(line) = &read {
                remember(&mut editor, history.as_deref(), line);
            }
            (editor, read)
        })
        .await
        .map_err(io::Error::other)?;
        self.editor = Some(editor);

        match read {
            Ok(line) => Ok(Line::Text(line)),
            Err(ReadlineError::Interrupted) => Ok(Line::Interrupted),
            Err(ReadlineError::Eof) => Ok(Line::End),
            Err(ReadlineError::Io(error)) => Err(error),
            Err(error) => Err(io::Error::other(error)),
        }
    }
}

/// Fixed list of lines, for scripted sessions.
#[derive(Debug, Default)]
pub struct ScriptedLines {
    lines: VecDeque<Line>,
}

impl ScriptedLines {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(|line| Line::Text(line.into())).collect(),
        }
    }

    /// Appends a Ctrl-C at the prompt after the scripted lines.
    pub fn then_interrupt(mut self) -> Self {
        self.lines.push_back(Line::Interrupted);
        self
    }
}

#[async_trait]
impl LineSource for ScriptedLines {
    async fn next_line(&mut self) -> io::Result<Line> {
        Ok(self.lines.pop_front().unwrap_or(Line::End))
    }
}

/// Why a session loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    ExitKeyword,
    EndOfInput,
    /// Ctrl-C at the prompt, routed to termination.
    Interrupted,
}

enum Step {
    Continue,
    Stop(SessionEnd),
}

pub struct Session<C, I, R> {
    client: C,
    input: I,
    renderer: R,
    router: Arc<SignalRouter>,
    mode: watch::Sender<SessionMode>,
}

impl<C, I, R> Session<C, I, R>
where
    C: ClientPort,
    I: LineSource,
    R: Renderer,
{
    pub fn new(client: C, input: I, renderer: R, router: Arc<SignalRouter>) -> Self {
        let (mode, _) = watch::channel(SessionMode::Normal);
        Self {
            client,
            input,
            renderer,
            router,
            mode,
        }
    }

    pub fn mode(&self) -> SessionMode {
        *self.mode.borrow()
    }

    /// Observes every mode transition without going through the renderer.
    pub fn mode_changes(&self) -> watch::Receiver<SessionMode> {
        self.mode.subscribe()
    }

    pub fn into_parts(self) -> (C, I, R) {
        (self.client, self.input, self.renderer)
    }

    /// Runs until `exit`, end of input, or a connection failure (the error).
    pub async fn run(&mut self) -> Result<SessionEnd> {
        loop {
            let line = self
                .input
                .next_line()
                .await
                .context("failed to read input")?;
            let line = match line {
                Line::Text(line) => line,
                Line::End => return Ok(SessionEnd::EndOfInput),
                Line::Interrupted => match self.router.interrupt() {
                    Dispatch::Terminate => return Ok(SessionEnd::Interrupted),
                    Dispatch::Cancelled => continue,
                },
            };

            if let Step::Stop(end) = self.handle_line(&line).await? {
                info!(?end, "session finished");
                return Ok(end);
            }
        }
    }

    async fn handle_line(&mut self, line: &str) -> Result<Step> {
        let input = line.trim();
        if input == EXIT_KEYWORD {
            return Ok(Step::Stop(SessionEnd::ExitKeyword));
        }
        if input.is_empty() {
            return Ok(Step::Continue);
        }

        let tokens = match command::split(input) {
            Ok(tokens) => tokens,
            Err(error) => {
                warn!(%error, "recovered malformed input");
                error.into_recovered()
            }
        };
        if tokens.is_empty() {
            return Ok(Step::Continue);
        }
        let command = match Command::from_tokens(tokens) {
            Ok(command) => command,
            Err(error) => {
                self.renderer
                    .diagnostic(&format!("failed to parse command: {error}"));
                return Ok(Step::Continue);
            }
        };

        debug!(verb = command.verb(), "sending command");
        let response = self
            .client
            .send(&command)
            .await
            .with_context(|| format!("failed to send {}", command.verb()))?;
        self.renderer.response(&response);

        if command.is_watch() && !response.is_err() {
            self.watch(&command).await?;
        }
        Ok(Step::Continue)
    }

    async fn watch(&mut self, command: &Command) -> Result<()> {
        let mut subscription = match self.client.open_subscription().await {
            Ok(subscription) => subscription,
            Err(error) => {
                warn!(?error, "failed to open watch stream");
                self.renderer.diagnostic(&format!("error watching: {error}"));
                return Ok(());
            }
        };

        self.renderer
            .notice(&format!("entered the watch mode for {command}"));
        let result = self.stream(&mut subscription).await;
        subscription.close().await;
        self.set_mode(SessionMode::Normal);
        result
    }

    async fn stream(&mut self, subscription: &mut C::Stream) -> Result<()> {
        let mut scope = self.router.enter_streaming();
        self.set_mode(SessionMode::Streaming);

        loop {
            // `biased` checks cancellation first; a push that is dropped
            // mid-read does not matter because the subscription closes next.
            select! {
                biased;
                () = scope.cancelled() => {
                    self.renderer.notice("exiting the watch mode. back to command mode");
                    return Ok(());
                }
                push = subscription.next() => match push {
                    Some(Ok(response)) => self.renderer.response(&response),
                    Some(Err(error)) => {
                        return Err(error).context("watch stream failed");
                    }
                    None => {
                        self.renderer.notice("watch stream ended. back to command mode");
                        return Ok(());
                    }
                },
            }
        }
    }

    fn set_mode(&self, mode: SessionMode) {
        self.mode.send_replace(mode);
        debug!(?mode, "session mode changed");
    }
}
