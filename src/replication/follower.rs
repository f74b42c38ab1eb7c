//! Follower side of replication: handshake with the leader, then apply the
//! propagated command stream while tracking the processed byte offset.

use crate::config::LeaderAddr;
use crate::error::ReplicationError;
use crate::protocol::{Command, FrameSource, FramedReader, Incoming, RespValue};
use crate::server::{Handler, ServerContext, Session};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    Init,
    AwaitPong,
    SendReplconfPort,
    AwaitPortOk,
    SendReplconfCapa,
    AwaitCapaOk,
    SendPsync,
    AwaitFullresync,
    LoadingSnapshot,
    Streaming,
}

impl HandshakePhase {
    pub fn name(self) -> &'static str {
        match self {
            HandshakePhase::Init => "init",
            HandshakePhase::AwaitPong => "await-pong",
            HandshakePhase::SendReplconfPort => "send-replconf-port",
            HandshakePhase::AwaitPortOk => "await-port-ok",
            HandshakePhase::SendReplconfCapa => "send-replconf-capa",
            HandshakePhase::AwaitCapaOk => "await-capa-ok",
            HandshakePhase::SendPsync => "send-psync",
            HandshakePhase::AwaitFullresync => "await-fullresync",
            HandshakePhase::LoadingSnapshot => "loading-snapshot",
            HandshakePhase::Streaming => "streaming",
        }
    }
}

/// Drives the PING / REPLCONF / PSYNC exchange one phase at a time.
pub struct Handshake<R, W> {
    reader: FramedReader<R>,
    writer: W,
    listening_port: u16,
    phase: HandshakePhase,
    offset: u64,
}

impl<R, W> Handshake<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W, listening_port: u16) -> Self {
        Self {
            reader: FramedReader::new(reader),
            writer,
            listening_port,
            phase: HandshakePhase::Init,
            offset: 0,
        }
    }

    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    /// Complete the handshake. Returns the reader positioned at the start of
    /// the command stream, the writer, and the offset the leader reported.
    pub async fn run(mut self) -> Result<(FramedReader<R>, W, u64), ReplicationError> {
        while self.phase != HandshakePhase::Streaming {
            self.step().await?;
        }
        Ok((self.reader, self.writer, self.offset))
    }

    /// Perform one transition.
    pub async fn step(&mut self) -> Result<HandshakePhase, ReplicationError> {
        let next = match self.phase {
            HandshakePhase::Init => {
                self.send(Command::new("PING", Vec::<String>::new())).await?;
                HandshakePhase::AwaitPong
            }
            HandshakePhase::AwaitPong => {
                self.expect_simple("PONG").await?;
                HandshakePhase::SendReplconfPort
            }
            HandshakePhase::SendReplconfPort => {
                let port = self.listening_port.to_string();
                self.send(Command::new("REPLCONF", ["listening-port", port.as_str()]))
                    .await?;
                HandshakePhase::AwaitPortOk
            }
            HandshakePhase::AwaitPortOk => {
                self.expect_simple("OK").await?;
                HandshakePhase::SendReplconfCapa
            }
            HandshakePhase::SendReplconfCapa => {
                self.send(Command::new("REPLCONF", ["capa", "psync2"])).await?;
                HandshakePhase::AwaitCapaOk
            }
            HandshakePhase::AwaitCapaOk => {
                self.expect_simple("OK").await?;
                HandshakePhase::SendPsync
            }
            HandshakePhase::SendPsync => {
                self.send(Command::new("PSYNC", ["?", "-1"])).await?;
                HandshakePhase::AwaitFullresync
            }
            HandshakePhase::AwaitFullresync => {
                let reply = self.read_reply().await?;
                match parse_fullresync(&reply) {
                    Some(offset) => self.offset = offset,
                    None => warn!("Unexpected reply to PSYNC: {:?}", reply),
                }
                HandshakePhase::LoadingSnapshot
            }
            HandshakePhase::LoadingSnapshot => {
                let payload = self.reader.read_snapshot_payload().await.map_err(|e| {
                    if e.kind() == io::ErrorKind::InvalidData {
                        ReplicationError::MalformedSnapshot
                    } else {
                        ReplicationError::Io(e)
                    }
                })?;
                let payload = payload.ok_or(ReplicationError::ConnectionClosed(self.phase.name()))?;
                debug!(bytes = payload.len(), "Received snapshot from leader");
                HandshakePhase::Streaming
            }
            HandshakePhase::Streaming => HandshakePhase::Streaming,
        };

        if next != self.phase {
            info!("Handshake phase: {} -> {}", self.phase.name(), next.name());
        }
        self.phase = next;
        Ok(next)
    }

    async fn send(&mut self, command: Command) -> Result<(), ReplicationError> {
        self.writer.write_all(&command.encode()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn read_reply(&mut self) -> Result<RespValue, ReplicationError> {
        loop {
            match self.reader.next_frame().await? {
                Some(Incoming::Frame { value, .. }) => return Ok(value),
                Some(Incoming::Malformed(e)) => warn!("Malformed handshake reply: {}", e),
                None => return Err(ReplicationError::ConnectionClosed(self.phase.name())),
            }
        }
    }

    async fn expect_simple(&mut self, expected: &str) -> Result<(), ReplicationError> {
        let reply = self.read_reply().await?;
        match &reply {
            RespValue::SimpleString(s) if s.eq_ignore_ascii_case(expected) => {}
            _ => warn!(
                "Unexpected handshake reply in {}: {:?}",
                self.phase.name(),
                reply
            ),
        }
        Ok(())
    }
}

/// Offset from `+FULLRESYNC <replid> <offset>`.
fn parse_fullresync(reply: &RespValue) -> Option<u64> {
    let RespValue::SimpleString(line) = reply else {
        return None;
    };
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(tag), Some(_replid), Some(offset)) if tag.eq_ignore_ascii_case("FULLRESYNC") => {
            offset.parse().ok()
        }
        _ => None,
    }
}

/// Keep a link to the leader alive, reconnecting after failures.
pub async fn run_follower(ctx: Arc<ServerContext>, leader: LeaderAddr) {
    let delay = Duration::from_millis(ctx.config.replication.reconnect_delay_ms);
    loop {
        match follow_once(&ctx, &leader).await {
            Ok(()) => info!("Leader {} closed the replication link", leader),
            Err(e) => error!("Replication from {} failed: {}", leader, e),
        }
        ctx.replication.set_link_up(false);
        tokio::time::sleep(delay).await;
    }
}

async fn follow_once(
    ctx: &Arc<ServerContext>,
    leader: &LeaderAddr,
) -> Result<(), ReplicationError> {
    let stream = TcpStream::connect((leader.host.as_str(), leader.port)).await?;
    info!("Connected to leader {}", leader);
    let (read_half, write_half) = stream.into_split();

    let handshake = Handshake::new(read_half, write_half, ctx.config.server.port);
    let (mut reader, mut writer, offset) = handshake.run().await?;

    ctx.replication.set_follower_offset(offset);
    ctx.replication.set_link_up(true);
    info!(offset, "Replication stream established");

    apply_stream(ctx.clone(), &mut reader, &mut writer).await
}

/// Apply propagated commands from the leader. Only REPLCONF replies are
/// written back; everything else runs silently.
pub async fn apply_stream<S, W>(
    ctx: Arc<ServerContext>,
    source: &mut S,
    writer: &mut W,
) -> Result<(), ReplicationError>
where
    S: FrameSource,
    W: AsyncWrite + Unpin + Send,
{
    let handler = Handler::new(ctx.clone());
    let mut session = Session::leader_link();

    while let Some(incoming) = source.next_frame().await? {
        let (value, len) = match incoming {
            Incoming::Frame { value, len } => (value, len),
            Incoming::Malformed(e) => {
                warn!("Malformed frame from leader: {}", e);
                continue;
            }
        };

        match Command::from_frame(value) {
            Ok(command) => {
                let answers = command.name() == "REPLCONF";
                let reply = handler.execute(&mut session, command).await;
                if answers {
                    for value in reply.into_values() {
                        writer.write_all(&value.to_bytes()).await?;
                    }
                    writer.flush().await?;
                }
            }
            Err(e) => warn!("Invalid command from leader: {}", e),
        }

        let offset = ctx.replication.advance_follower_offset(len as u64);
        debug!(offset, "Applied replicated frame");
    }

    Ok(())
}
