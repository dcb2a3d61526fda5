use std::io::{self, Write};

use colored::Colorize;
use tracing::warn;

use crate::wire::{GeoCoordinates, GeoElement, Payload, Response, ZElement};

const UNSUPPORTED_NOTE: &str = "note: this response is JSON serialized version of the response because it is not supported by this version of the CLI. You can upgrade the CLI to the latest version to get a formatted response.";

/// Sink for everything the session shows the user.
pub trait Renderer: Send {
    fn response(&mut self, response: &Response);

    /// Informational line, e.g. watch mode transitions.
    fn notice(&mut self, message: &str);

    /// Recoverable problem with the user's input.
    fn diagnostic(&mut self, message: &str);
}

pub struct TerminalRenderer<W> {
    out: W,
}

impl TerminalRenderer<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_response(&mut self, response: &Response) -> io::Result<()> {
        if response.is_err() {
            writeln!(self.out, "{} {}", "ERR".red().bold(), response.message)?;
            return self.out.flush();
        }

        write!(self.out, "{} ", response.message.green().bold())?;
        if response.fingerprint64 != 0 {
            write!(self.out, "[fingerprint={}] ", response.fingerprint64)?;
        }

        match response.payload() {
            Some(payload) => self.write_payload(&payload)?,
            None if response.response.is_some() => self.write_raw(response)?,
            None => writeln!(self.out)?,
        }
        self.out.flush()
    }

    fn write_payload(&mut self, payload: &Payload) -> io::Result<()> {
        let out = &mut self.out;
        match payload {
            Payload::Value { value } => writeln!(out, "\"{value}\""),
            Payload::Ack => writeln!(out),
            Payload::Count { count } => writeln!(out, "{count}"),
            Payload::Integer { value } => writeln!(out, "{value}"),
            Payload::Echo { message } => writeln!(out, "{message}"),
            Payload::Ping { message } => writeln!(out, "\"{message}\""),
            Payload::Expire { is_changed } => writeln!(out, "{is_changed}"),
            Payload::ExpireTime { unix_sec } => writeln!(out, "{unix_sec}"),
            Payload::Ttl { seconds } => writeln!(out, "{seconds}"),
            Payload::Type { kind } => writeln!(out, "{kind}"),
            Payload::Keys { keys } => {
                writeln!(out)?;
                for (i, key) in keys.iter().enumerate() {
                    writeln!(out, "{i}) {key}")?;
                }
                Ok(())
            }
            Payload::HashElements { elements } => {
                writeln!(out)?;
                for (i, element) in elements.iter().enumerate() {
                    writeln!(out, "{i}) {}=\"{}\"", element.key, element.value)?;
                }
                Ok(())
            }
            Payload::SortedElements { elements } => {
                writeln!(out)?;
                for element in elements {
                    write_z_element(out, element)?;
                }
                Ok(())
            }
            Payload::Rank { element } => write_z_element(out, element),
            Payload::GeoDistance { distance } => writeln!(out, "{distance:.6}"),
            Payload::GeoHashes { hashes } => {
                writeln!(out)?;
                for (i, hash) in hashes.iter().enumerate() {
                    let hash = if hash.is_empty() { "nil" } else { hash.as_str() };
                    writeln!(out, "{i}) {hash}")?;
                }
                Ok(())
            }
            Payload::GeoSearch { elements } => {
                writeln!(out)?;
                for (i, element) in elements.iter().enumerate() {
                    write_geo_element(out, i, element)?;
                }
                Ok(())
            }
            Payload::GeoPositions { coords } => {
                writeln!(out)?;
                for (i, coords) in coords.iter().enumerate() {
                    write_geo_position(out, i, coords)?;
                }
                Ok(())
            }
        }
    }

    fn write_raw(&mut self, response: &Response) -> io::Result<()> {
        writeln!(self.out)?;
        writeln!(self.out, "{UNSUPPORTED_NOTE}")?;
        let dump = serde_json::to_string_pretty(response).map_err(io::Error::other)?;
        writeln!(self.out, "{dump}")
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.out, "{line}")?;
        self.out.flush()
    }
}

fn write_z_element<W: Write>(out: &mut W, element: &ZElement) -> io::Result<()> {
    writeln!(
        out,
        "{}) {}, {}",
        element.rank, element.score, element.member
    )
}

fn write_geo_element<W: Write>(out: &mut W, index: usize, element: &GeoElement) -> io::Result<()> {
    writeln!(
        out,
        "{index}) {}, {:.6}, ({:.6}, {:.6}), {}",
        element.hash,
        element.distance,
        element.coords.longitude,
        element.coords.latitude,
        element.member
    )
}

fn write_geo_position<W: Write>(
    out: &mut W,
    index: usize,
    coords: &GeoCoordinates,
) -> io::Result<()> {
    if coords.latitude == 0.0 || coords.longitude == 0.0 {
        return writeln!(out, "{index}) (nil)");
    }
    writeln!(out, "{index}) {:.6}, {:.6}", coords.longitude, coords.latitude)
}

impl<W: Write + Send> Renderer for TerminalRenderer<W> {
    fn response(&mut self, response: &Response) {
        if let Err(error) = self.write_response(response) {
            warn!(?error, "failed to render response");
        }
    }

    fn notice(&mut self, message: &str) {
        if let Err(error) = self.write_line(message) {
            warn!(?error, "failed to write notice");
        }
    }

    fn diagnostic(&mut self, message: &str) {
        let line = format!("{} {message}", "ERR".red().bold());
        if let Err(error) = self.write_line(&line) {
            warn!(?error, "failed to write diagnostic");
        }
    }
}
