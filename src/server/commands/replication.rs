use super::parse_u64;
use crate::error::CommandError;
use crate::protocol::{Command, RespValue};
use crate::server::handler::{CommandResult, Handler, Reply};
use crate::server::session::Session;
use crate::snapshot;
use bytes::{BufMut, BytesMut};
use std::time::Duration;
use tracing::info;

impl Handler {
    pub(in crate::server) fn handle_replconf(
        &self,
        session: &mut Session,
        command: &Command,
    ) -> Result<Reply, CommandError> {
        let args = command.args();
        let value = &args[1];

        match args[0].to_ascii_lowercase().as_str() {
            "listening-port" => {
                let port: u16 = value.parse().map_err(|_| CommandError::NotInteger)?;
                self.ctx
                    .replication
                    .leader()
                    .register_follower(session.id, port, session.sink.clone());
                Ok(RespValue::ok().into())
            }
            "capa" => Ok(RespValue::ok().into()),
            "getack" => {
                let offset = self.ctx.replication.follower_offset();
                let reply = ["REPLCONF".to_string(), "ACK".to_string(), offset.to_string()];
                Ok(RespValue::bulk_array(reply).into())
            }
            "ack" => {
                let offset = parse_u64(value)?;
                self.ctx.replication.leader().record_ack(session.id, offset);
                Ok(Reply::Pending)
            }
            _ => Err(CommandError::Syntax),
        }
    }

    /// Answer `PSYNC` with a full resync and start streaming writes.
    ///
    /// Runs under the write gate, so no write lands between the snapshot
    /// and the start of propagation.
    pub(in crate::server) fn handle_psync(&self, session: &mut Session) -> Reply {
        let leader = self.ctx.replication.leader();
        let payload = snapshot::encode(&self.ctx.store.string_entries());

        let header = format!("+FULLRESYNC {} {}\r\n", leader.replid(), leader.offset());
        let mut out = BytesMut::with_capacity(header.len() + payload.len() + 16);
        out.put_slice(header.as_bytes());
        out.put_slice(format!("${}\r\n", payload.len()).as_bytes());
        out.put_slice(&payload);
        session.sink.send_raw(out.freeze());

        if !leader.start_streaming(session.id) {
            // PSYNC without a prior listening-port
            leader.register_follower(session.id, 0, session.sink.clone());
            leader.start_streaming(session.id);
        }
        info!(session = session.id, offset = leader.offset(), "Full resync sent");
        Reply::Pending
    }

    pub(in crate::server) async fn handle_wait(&self, command: &Command) -> CommandResult {
        let args = command.args();
        let needed = parse_u64(&args[0])? as usize;
        let timeout_ms = parse_u64(&args[1])?;
        let poll = Duration::from_millis(self.ctx.config.replication.ack_poll_interval_ms);

        let acked = self
            .ctx
            .replication
            .leader()
            .wait_for_acks(needed, timeout_ms, poll)
            .await;
        Ok(RespValue::Integer(acked as i64))
    }
}
