//! Line-oriented control protocol.
//!
//! One command per line, one response line per command:
//!
//! ```text
//! START <room> <speed>     -> OK queued
//! UPDATE <room> <speed>    -> OK queued
//! STOP <room>              -> OK queued
//! STATUS                   -> {"active":[..],"waiting":[..]}
//! USAGE <room> [since_ms]  -> {"room_id":..,"total_cost":..,"records":[..]}
//! ```
//!
//! Errors are reported as `ERR <reason>`; the connection stays open.

use std::sync::Arc;

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder, Framed, LinesCodec, LinesCodecError};

use crate::ledger::UsageLedger;
use crate::model::*;
use crate::scheduler::Scheduler;

const MAX_LINE_LEN: usize = 1024;

/// Parsed control command.
#[derive(Debug, PartialEq)]
pub enum Command {
    Submit(ServiceRequest),
    Status,
    Usage { room_id: RoomId, since: Ms },
}

#[derive(Debug, PartialEq)]
pub enum CommandError {
    Empty,
    Unknown(String),
    MissingArgument(&'static str),
    InvalidRoom(String),
    InvalidTimestamp(String),
    TrailingInput(String),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Empty => write!(f, "empty command"),
            CommandError::Unknown(cmd) => write!(f, "unknown command: {cmd}"),
            CommandError::MissingArgument(arg) => write!(f, "missing argument: {arg}"),
            CommandError::InvalidRoom(s) => write!(f, "invalid room id: {s}"),
            CommandError::InvalidTimestamp(s) => write!(f, "invalid timestamp: {s}"),
            CommandError::TrailingInput(s) => write!(f, "unexpected input: {s}"),
        }
    }
}

impl std::error::Error for CommandError {}

pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let mut parts = line.split_whitespace();
    let verb = parts.next().ok_or(CommandError::Empty)?.to_ascii_uppercase();

    let command = match verb.as_str() {
        "START" => {
            let room_id = parse_room(parts.next())?;
            let speed = Speed::parse(parts.next().ok_or(CommandError::MissingArgument("speed"))?);
            Command::Submit(ServiceRequest::start(room_id, speed))
        }
        "UPDATE" => {
            let room_id = parse_room(parts.next())?;
            let speed = Speed::parse(parts.next().ok_or(CommandError::MissingArgument("speed"))?);
            Command::Submit(ServiceRequest::update(room_id, speed))
        }
        "STOP" => Command::Submit(ServiceRequest::stop(parse_room(parts.next())?)),
        "STATUS" => Command::Status,
        "USAGE" => {
            let room_id = parse_room(parts.next())?;
            let since = match parts.next() {
                Some(s) => s
                    .parse::<Ms>()
                    .map_err(|_| CommandError::InvalidTimestamp(s.to_string()))?,
                None => 0,
            };
            Command::Usage { room_id, since }
        }
        _ => return Err(CommandError::Unknown(verb)),
    };

    let rest: Vec<&str> = parts.collect();
    if !rest.is_empty() {
        return Err(CommandError::TrailingInput(rest.join(" ")));
    }
    Ok(command)
}

fn parse_room(arg: Option<&str>) -> Result<RoomId, CommandError> {
    let s = arg.ok_or(CommandError::MissingArgument("room"))?;
    s.parse().map_err(|_| CommandError::InvalidRoom(s.to_string()))
}

#[derive(Serialize)]
struct UsageReport {
    room_id: RoomId,
    total_cost: f64,
    records: Vec<UsageRecord>,
}

async fn execute(command: Command, scheduler: &Scheduler, ledger: &UsageLedger) -> String {
    match command {
        Command::Submit(req) => match scheduler.submit(req).await {
            Ok(()) => "OK queued".to_string(),
            Err(e) => format!("ERR {e}"),
        },
        Command::Status => to_json_line(&scheduler.snapshot().await),
        Command::Usage { room_id, since } => to_json_line(&UsageReport {
            room_id,
            total_cost: ledger.total_cost_since(room_id, since),
            records: ledger.records_since(room_id, since),
        }),
    }
}

fn to_json_line<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("ERR encoding failed: {e}"))
}

/// One inbound line as seen by the connection loop.
#[derive(Debug, PartialEq)]
enum Frame {
    Line(String),
    TooLong,
    NotUtf8,
}

/// `LinesCodec` with malformed lines surfaced as frames rather than stream
/// errors, so the connection outlives them. The remainder of an over-long
/// line is discarded by the inner codec.
struct ControlCodec {
    lines: LinesCodec,
}

impl ControlCodec {
    fn new() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_LINE_LEN),
        }
    }
}

fn to_frame(decoded: Result<Option<String>, LinesCodecError>) -> Result<Option<Frame>, LinesCodecError> {
    match decoded {
        Ok(line) => Ok(line.map(Frame::Line)),
        Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Frame::TooLong)),
        Err(LinesCodecError::Io(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
            Ok(Some(Frame::NotUtf8))
        }
        Err(e) => Err(e),
    }
}

impl Decoder for ControlCodec {
    type Item = Frame;
    type Error = LinesCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, LinesCodecError> {
        to_frame(self.lines.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, LinesCodecError> {
        to_frame(self.lines.decode_eof(buf))
    }
}

impl Encoder<String> for ControlCodec {
    type Error = LinesCodecError;

    fn encode(&mut self, line: String, buf: &mut BytesMut) -> Result<(), LinesCodecError> {
        self.lines.encode(line, buf)
    }
}

/// Serve one control connection until the peer closes it. Only socket
/// errors end the session early.
pub async fn process_connection(
    socket: TcpStream,
    scheduler: Arc<Scheduler>,
    ledger: Arc<UsageLedger>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut framed = Framed::new(socket, ControlCodec::new());
    while let Some(frame) = framed.next().await {
        let response = match frame? {
            Frame::Line(line) if line.trim().is_empty() => continue,
            Frame::Line(line) => match parse_command(&line) {
                Ok(command) => execute(command, &scheduler, &ledger).await,
                Err(e) => format!("ERR {e}"),
            },
            Frame::TooLong => format!("ERR line too long (max {MAX_LINE_LEN} bytes)"),
            Frame::NotUtf8 => "ERR line is not valid utf-8".to_string(),
        };
        framed.send(response).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_start() {
        assert_eq!(
            parse_command("START 101 medium").unwrap(),
            Command::Submit(ServiceRequest::start(101, Speed::Medium))
        );
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(
            parse_command("update 7 HIGH").unwrap(),
            Command::Submit(ServiceRequest::update(7, Speed::High))
        );
        assert_eq!(parse_command("status").unwrap(), Command::Status);
    }

    #[test]
    fn unknown_speed_defaults_to_low() {
        assert_eq!(
            parse_command("START 101 turbo").unwrap(),
            Command::Submit(ServiceRequest::start(101, Speed::Low))
        );
    }

    #[test]
    fn parse_stop() {
        assert_eq!(
            parse_command("  STOP   42 ").unwrap(),
            Command::Submit(ServiceRequest::stop(42))
        );
    }

    #[test]
    fn parse_usage_with_and_without_since() {
        assert_eq!(
            parse_command("USAGE 101").unwrap(),
            Command::Usage { room_id: 101, since: 0 }
        );
        assert_eq!(
            parse_command("USAGE 101 1700000000000").unwrap(),
            Command::Usage { room_id: 101, since: 1_700_000_000_000 }
        );
    }

    #[test]
    fn parse_errors() {
        assert_eq!(parse_command("   "), Err(CommandError::Empty));
        assert_eq!(
            parse_command("RESET"),
            Err(CommandError::Unknown("RESET".into()))
        );
        assert_eq!(
            parse_command("START"),
            Err(CommandError::MissingArgument("room"))
        );
        assert_eq!(
            parse_command("START 101"),
            Err(CommandError::MissingArgument("speed"))
        );
        assert_eq!(
            parse_command("STOP abc"),
            Err(CommandError::InvalidRoom("abc".into()))
        );
        assert_eq!(
            parse_command("STOP -1"),
            Err(CommandError::InvalidRoom("-1".into()))
        );
        assert_eq!(
            parse_command("USAGE 1 yesterday"),
            Err(CommandError::InvalidTimestamp("yesterday".into()))
        );
        assert_eq!(
            parse_command("STOP 1 now please"),
            Err(CommandError::TrailingInput("now please".into()))
        );
    }

    #[test]
    fn over_long_line_is_reported_and_skipped() {
        let mut codec = ControlCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice("x".repeat(MAX_LINE_LEN * 2).as_bytes());
        buf.extend_from_slice(b"\nSTATUS\n");

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::TooLong));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::Line("STATUS".into())));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn invalid_utf8_is_reported_and_skipped() {
        let mut codec = ControlCodec::new();
        let mut buf = BytesMut::from(&b"\xff\xfe\nSTOP 1\n"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::NotUtf8));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::Line("STOP 1".into())));
    }
}
