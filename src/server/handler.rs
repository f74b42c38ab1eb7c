use super::registry::{self, CommandSpec};
use super::session::Session;
use super::ServerContext;
use crate::error::CommandError;
use crate::metrics::{Metrics, Timer};
use crate::protocol::{Command, FrameSource, Incoming, RespValue};
use std::io;
use std::sync::Arc;
use tracing::debug;

/// What a command produced for its caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Value(RespValue),
    /// Several top-level replies, e.g. one per channel for SUBSCRIBE.
    Many(Vec<RespValue>),
    /// Nothing to send now: the reply is delivered later through the
    /// session's sink (blocked clients, PSYNC) or never (REPLCONF ACK).
    Pending,
}

impl Reply {
    pub fn into_values(self) -> Vec<RespValue> {
        match self {
            Reply::Value(value) => vec![value],
            Reply::Many(values) => values,
            Reply::Pending => Vec::new(),
        }
    }

    /// Collapse into the single value an EXEC result slot holds.
    fn into_single(self) -> RespValue {
        match self {
            Reply::Value(value) => value,
            Reply::Many(values) => RespValue::array(values),
            Reply::Pending => RespValue::null(),
        }
    }
}

impl From<RespValue> for Reply {
    fn from(value: RespValue) -> Self {
        Reply::Value(value)
    }
}

impl From<CommandError> for Reply {
    fn from(err: CommandError) -> Self {
        Reply::Value(RespValue::Error(err.to_string()))
    }
}

pub(super) type CommandResult = Result<RespValue, CommandError>;

/// Routes commands from one session to their handlers.
///
/// The same entry point serves client connections and the follower's
/// replication stream; only the session differs.
#[derive(Clone)]
pub struct Handler {
    pub(super) ctx: Arc<ServerContext>,
}

impl Handler {
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    /// Process frames from `source` until it closes or the session quits.
    pub async fn serve<S: FrameSource>(
        &self,
        session: &mut Session,
        source: &mut S,
    ) -> io::Result<()> {
        let metrics = Metrics::get();

        while let Some(incoming) = source.next_frame().await? {
            match incoming {
                Incoming::Frame { value, .. } => {
                    debug!(session = session.id, "Received command: {:?}", value);
                    let reply = match Command::from_frame(value) {
                        Ok(command) => self.execute(session, command).await,
                        Err(e) => {
                            metrics.record_error(e.kind(), None);
                            Reply::from(e)
                        }
                    };
                    for value in reply.into_values() {
                        session.sink.send(&value);
                    }
                }
                Incoming::Malformed(e) => {
                    // Protocol error - send error response but keep connection alive
                    metrics.record_error("protocol_error", None);
                    session
                        .sink
                        .send(&RespValue::Error(format!("ERR Protocol error: {}", e)));
                }
            }

            if session.closing {
                break;
            }
        }

        Ok(())
    }

    /// Validate, queue or run one command.
    pub async fn execute(&self, session: &mut Session, command: Command) -> Reply {
        let metrics = Metrics::get();
        let timer = Timer::new();
        let name = command.name().to_string();

        let reply = match self.route(session, command).await {
            Ok(reply) => reply,
            Err(e) => {
                metrics.record_error(e.kind(), Some(&name));
                Reply::from(e)
            }
        };

        metrics.record_command(&name, timer.elapsed_seconds());
        reply
    }

    async fn route(&self, session: &mut Session, command: Command) -> Result<Reply, CommandError> {
        let spec = registry::lookup(command.name());

        if session.is_subscribed() && !spec.map_or(false, |s| s.pubsub) {
            return Err(CommandError::SubscribedContext(
                command.name().to_ascii_lowercase(),
            ));
        }

        let spec =
            spec.ok_or_else(|| CommandError::UnknownCommand(command.verb().to_string()))?;

        if command.arity() < spec.arity {
            return Err(CommandError::WrongArity(spec.name.to_ascii_lowercase()));
        }

        if session.in_transaction() && spec.queueable {
            session.enqueue(command);
            return Ok(RespValue::simple("QUEUED").into());
        }

        if spec.name == "EXEC" {
            return self.exec_transaction(session).await;
        }

        self.run(session, spec, command).await
    }

    async fn run(
        &self,
        session: &mut Session,
        spec: &CommandSpec,
        command: Command,
    ) -> Result<Reply, CommandError> {
        if spec.write && !session.executing {
            let _gate = self.ctx.write_gate.lock().await;
            self.dispatch(session, command).await
        } else {
            self.dispatch(session, command).await
        }
    }

    /// Run queued commands back to back under the write gate.
    async fn exec_transaction(&self, session: &mut Session) -> Result<Reply, CommandError> {
        let queued = session
            .drain_transaction()
            .ok_or(CommandError::ExecWithoutMulti)?;

        let _gate = self.ctx.write_gate.lock().await;
        session.executing = true;

        let mut replies = Vec::with_capacity(queued.len());
        for command in queued {
            let reply = match self.dispatch(session, command).await {
                Ok(reply) => reply.into_single(),
                Err(e) => RespValue::Error(e.to_string()),
            };
            replies.push(reply);
        }

        session.executing = false;
        Ok(RespValue::array(replies).into())
    }

    async fn dispatch(
        &self,
        session: &mut Session,
        command: Command,
    ) -> Result<Reply, CommandError> {
        let reply = match command.name() {
            // connection
            "PING" => self.handle_ping(session, &command),
            "ECHO" => self.handle_echo(&command),
            "QUIT" => self.handle_quit(session),

            // strings and keyspace
            "SET" => self.handle_set(&command),
            "GET" => self.handle_get(&command),
            "INCR" => self.handle_incr(&command),
            "TYPE" => self.handle_type(&command),
            "KEYS" => self.handle_keys(&command),

            // lists
            "RPUSH" | "LPUSH" => self.handle_push(&command).await,
            "LRANGE" => self.handle_lrange(&command),
            "LLEN" => self.handle_llen(&command),
            "LPOP" => self.handle_lpop(&command),
            "BLPOP" => return self.handle_blpop(session, &command).await,

            // streams
            "XADD" => self.handle_xadd(&command).await,
            "XRANGE" => self.handle_xrange(&command),
            "XREAD" => return self.handle_xread(session, &command).await,

            // sorted sets
            "ZADD" => self.handle_zadd(&command),
            "ZRANK" => self.handle_zrank(&command),
            "ZRANGE" => self.handle_zrange(&command),
            "ZCARD" => self.handle_zcard(&command),
            "ZSCORE" => self.handle_zscore(&command),
            "ZREM" => self.handle_zrem(&command),

            // transactions
            "MULTI" => self.handle_multi(session),
            "DISCARD" => self.handle_discard(session),

            // pub/sub
            "SUBSCRIBE" => return Ok(self.handle_subscribe(session, &command)),
            "UNSUBSCRIBE" => return Ok(self.handle_unsubscribe(session, &command)),
            "PUBLISH" => self.handle_publish(&command),

            // replication
            "REPLCONF" => return self.handle_replconf(session, &command),
            "PSYNC" => return Ok(self.handle_psync(session)),
            "WAIT" => self.handle_wait(&command).await,

            // server
            "INFO" => self.handle_info(&command),
            "CONFIG" => self.handle_config(&command),

            other => Err(CommandError::UnknownCommand(other.to_string())),
        };
        reply.map(Reply::from)
    }

    /// Forward a successful write to followers.
    pub(super) fn propagate(&self, command: &Command) {
        self.ctx.replication.propagate(command);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::Config;
    use crate::protocol::{FramedReader, ReplySink};
    use crate::storage::Store;
    use bytes::Bytes;
    use tokio::sync::mpsc::UnboundedReceiver;

    pub(crate) fn handler() -> Handler {
        let ctx = ServerContext::new(Config::default(), Arc::new(Store::new()));
        Handler::new(Arc::new(ctx))
    }

    pub(crate) async fn exec(handler: &Handler, session: &mut Session, parts: &[&str]) -> Reply {
        let command = Command::new(parts[0], parts[1..].iter().copied());
        handler.execute(session, command).await
    }

    pub(crate) fn client() -> (Session, UnboundedReceiver<Bytes>) {
        let (sink, rx) = ReplySink::channel();
        (Session::new(sink), rx)
    }

    fn err(e: CommandError) -> Reply {
        Reply::from(e)
    }

    #[tokio::test]
    async fn test_unknown_command_keeps_original_spelling() {
        let handler = handler();
        let (mut session, _rx) = client();
        assert_eq!(
            exec(&handler, &mut session, &["fooBar", "x"]).await,
            err(CommandError::UnknownCommand("fooBar".to_string()))
        );
    }

    #[tokio::test]
    async fn test_arity_is_checked_before_execution() {
        let handler = handler();
        let (mut session, _rx) = client();
        assert_eq!(
            exec(&handler, &mut session, &["SET", "k"]).await,
            err(CommandError::WrongArity("set".to_string()))
        );
        assert_eq!(
            exec(&handler, &mut session, &["GET", "k"]).await,
            Reply::Value(RespValue::null())
        );
    }

    #[tokio::test]
    async fn test_transaction_replies_in_order() {
        let handler = handler();
        let (mut session, _rx) = client();

        let queued = Reply::Value(RespValue::simple("QUEUED"));
        assert_eq!(exec(&handler, &mut session, &["MULTI"]).await, Reply::Value(RespValue::ok()));
        assert_eq!(exec(&handler, &mut session, &["SET", "a", "1"]).await, queued);
        assert_eq!(exec(&handler, &mut session, &["INCR", "a"]).await, queued);
        assert_eq!(exec(&handler, &mut session, &["RPUSH", "a", "x"]).await, queued);

        assert_eq!(
            exec(&handler, &mut session, &["EXEC"]).await,
            Reply::Value(RespValue::array(vec![
                RespValue::ok(),
                RespValue::Integer(2),
                RespValue::Error(CommandError::WrongType.to_string()),
            ]))
        );
        assert_eq!(
            exec(&handler, &mut session, &["EXEC"]).await,
            err(CommandError::ExecWithoutMulti)
        );
    }

    #[tokio::test]
    async fn test_transaction_control_errors() {
        let handler = handler();
        let (mut session, _rx) = client();

        assert_eq!(
            exec(&handler, &mut session, &["DISCARD"]).await,
            err(CommandError::DiscardWithoutMulti)
        );
        exec(&handler, &mut session, &["MULTI"]).await;
        assert_eq!(
            exec(&handler, &mut session, &["MULTI"]).await,
            err(CommandError::NestedMulti)
        );
        // arity errors are not queued
        assert_eq!(
            exec(&handler, &mut session, &["GET"]).await,
            err(CommandError::WrongArity("get".to_string()))
        );
        exec(&handler, &mut session, &["SET", "a", "1"]).await;
        assert_eq!(
            exec(&handler, &mut session, &["DISCARD"]).await,
            Reply::Value(RespValue::ok())
        );
        assert_eq!(
            exec(&handler, &mut session, &["GET", "a"]).await,
            Reply::Value(RespValue::null())
        );
    }

    #[tokio::test]
    async fn test_blocking_commands_do_not_block_inside_exec() {
        let handler = handler();
        let (mut session, _rx) = client();

        exec(&handler, &mut session, &["MULTI"]).await;
        exec(&handler, &mut session, &["BLPOP", "empty", "0"]).await;
        exec(&handler, &mut session, &["XREAD", "BLOCK", "0", "STREAMS", "s", "$"]).await;
        assert_eq!(
            exec(&handler, &mut session, &["EXEC"]).await,
            Reply::Value(RespValue::array(vec![RespValue::null(), RespValue::null()]))
        );
        assert_eq!(handler.ctx.blocking.waiter_counts().await, (0, 0));
    }

    #[tokio::test]
    async fn test_subscribed_context_restricts_commands() {
        let handler = handler();
        let (mut session, _rx) = client();

        exec(&handler, &mut session, &["SUBSCRIBE", "news"]).await;
        assert_eq!(
            exec(&handler, &mut session, &["GET", "k"]).await,
            err(CommandError::SubscribedContext("get".to_string()))
        );
        assert_eq!(
            exec(&handler, &mut session, &["PING"]).await,
            Reply::Value(RespValue::bulk_array(["pong", ""]))
        );
        exec(&handler, &mut session, &["UNSUBSCRIBE", "news"]).await;
        assert_eq!(
            exec(&handler, &mut session, &["PING"]).await,
            Reply::Value(RespValue::simple("PONG"))
        );
    }

    #[tokio::test]
    async fn test_serve_replies_in_order_and_recovers_from_bad_frames() {
        let handler = handler();
        let (mut session, mut rx) = client();
        let mock = tokio_test::io::Builder::new()
            .read(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n")
            .read(b"$-9\r\n")
            .read(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n*1\r\n$4\r\nQUIT\r\n*1\r\n$4\r\nPING\r\n")
            .build();
        let mut reader = FramedReader::new(mock);

        handler.serve(&mut session, &mut reader).await.unwrap();
        assert!(session.closing);

        assert_eq!(&rx.recv().await.unwrap()[..], b"+OK\r\n");
        assert!(rx.recv().await.unwrap().starts_with(b"-ERR Protocol error"));
        assert_eq!(&rx.recv().await.unwrap()[..], b"$3\r\nbar\r\n");
        assert_eq!(&rx.recv().await.unwrap()[..], b"+OK\r\n");
        // PING after QUIT is never answered
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_serve_answers_commands_pipelined_after_an_invalid_frame() {
        let handler = handler();
        let (mut session, mut rx) = client();
        let mock = tokio_test::io::Builder::new()
            .read(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\n\xff\r\n*1\r\n$4\r\nPING\r\n")
            .build();
        let mut reader = FramedReader::new(mock);

        handler.serve(&mut session, &mut reader).await.unwrap();

        assert_eq!(
            &rx.recv().await.unwrap()[..],
            b"-ERR Protocol error: Invalid UTF-8\r\n"
        );
        assert_eq!(&rx.recv().await.unwrap()[..], b"+PONG\r\n");
        assert!(rx.try_recv().is_err());
        assert_eq!(handler.context().store.get_string("k"), None);
    }
}
