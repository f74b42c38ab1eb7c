use super::{deadline_after, parse_i64};
use crate::error::CommandError;
use crate::protocol::{Command, RespValue};
use crate::server::handler::{CommandResult, Handler, Reply};
use crate::server::session::Session;

impl Handler {
    /// RPUSH and LPUSH. Each pushed element may wake one blocked BLPOP.
    pub(in crate::server) async fn handle_push(&self, command: &Command) -> CommandResult {
        let args = command.args();
        let key = &args[0];
        let values = &args[1..];

        let len = if command.name() == "LPUSH" {
            self.ctx.store.push_left(key, values)?
        } else {
            self.ctx.store.push_right(key, values)?
        };
        self.propagate(command);

        for _ in values {
            if self.ctx.blocking.notify_list_push(key).await.is_none() {
                break;
            }
            self.propagate(&Command::new("LPOP", [key.as_str()]));
        }

        Ok(RespValue::Integer(len as i64))
    }

    pub(in crate::server) fn handle_lrange(&self, command: &Command) -> CommandResult {
        let args = command.args();
        let start = parse_i64(&args[1])?;
        let end = parse_i64(&args[2])?;
        Ok(RespValue::bulk_array(self.ctx.store.list_range(&args[0], start, end)))
    }

    pub(in crate::server) fn handle_llen(&self, command: &Command) -> CommandResult {
        Ok(RespValue::Integer(self.ctx.store.list_len(&command.args()[0]) as i64))
    }

    pub(in crate::server) fn handle_lpop(&self, command: &Command) -> CommandResult {
        let key = &command.args()[0];

        let Some(count) = command.arg(1) else {
            let popped = self.ctx.store.pop_left(key, 1)?;
            let reply = match popped.into_iter().next() {
                Some(value) => {
                    self.propagate(command);
                    RespValue::bulk(value)
                }
                None => RespValue::null(),
            };
            return Ok(reply);
        };

        let count = parse_i64(count)?;
        if count < 0 {
            return Err(CommandError::NotPositive);
        }
        let popped = self.ctx.store.pop_left(key, count as usize)?;
        if !popped.is_empty() {
            self.propagate(command);
        }
        Ok(RespValue::bulk_array(popped))
    }

    /// BLPOP key timeout. The timeout is in seconds, fractional allowed, and
    /// zero waits forever.
    pub(in crate::server) async fn handle_blpop(
        &self,
        session: &mut Session,
        command: &Command,
    ) -> Result<Reply, CommandError> {
        let args = command.args();
        let key = &args[0];
        let timeout: f64 = args[1].parse().map_err(|_| CommandError::InvalidTimeout)?;
        if timeout.is_nan() || timeout.is_infinite() {
            return Err(CommandError::InvalidTimeout);
        }
        if timeout < 0.0 {
            return Err(CommandError::NegativeTimeout);
        }

        let served = |value: String| {
            self.propagate(&Command::new("LPOP", [key.as_str()]));
            Reply::Value(RespValue::bulk_array([key.clone(), value]))
        };

        if session.executing {
            let popped = self.ctx.store.pop_left(key, 1)?;
            return Ok(match popped.into_iter().next() {
                Some(value) => served(value),
                None => Reply::Value(RespValue::null()),
            });
        }

        let deadline = deadline_after((timeout * 1000.0).ceil() as u64);
        let popped = self
            .ctx
            .blocking
            .block_list_pop(session.id, key, deadline, session.sink.clone())
            .await?;

        Ok(match popped {
            Some(value) => served(value),
            None => Reply::Pending,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::error::CommandError;
    use crate::protocol::RespValue;
    use crate::server::handler::tests::{client, exec, handler};
    use crate::server::handler::Reply;

    fn int(n: i64) -> Reply {
        Reply::Value(RespValue::Integer(n))
    }

    #[tokio::test]
    async fn test_push_and_range() {
        let handler = handler();
        let (mut session, _rx) = client();

        assert_eq!(exec(&handler, &mut session, &["RPUSH", "l", "a", "b", "c"]).await, int(3));
        assert_eq!(exec(&handler, &mut session, &["LPUSH", "l", "z"]).await, int(4));
        assert_eq!(
            exec(&handler, &mut session, &["LRANGE", "l", "0", "-1"]).await,
            Reply::Value(RespValue::bulk_array(["z", "a", "b", "c"]))
        );
        assert_eq!(
            exec(&handler, &mut session, &["LRANGE", "l", "-2", "10"]).await,
            Reply::Value(RespValue::bulk_array(["b", "c"]))
        );
        assert_eq!(
            exec(&handler, &mut session, &["LRANGE", "l", "x", "1"]).await,
            Reply::from(CommandError::NotInteger)
        );
        assert_eq!(exec(&handler, &mut session, &["LLEN", "l"]).await, int(4));
        assert_eq!(exec(&handler, &mut session, &["LLEN", "missing"]).await, int(0));
    }

    #[tokio::test]
    async fn test_lpop_shapes() {
        let handler = handler();
        let (mut session, _rx) = client();

        exec(&handler, &mut session, &["RPUSH", "l", "a", "b", "c"]).await;
        assert_eq!(
            exec(&handler, &mut session, &["LPOP", "l"]).await,
            Reply::Value(RespValue::bulk("a"))
        );
        assert_eq!(
            exec(&handler, &mut session, &["LPOP", "l", "5"]).await,
            Reply::Value(RespValue::bulk_array(["b", "c"]))
        );
        assert_eq!(
            exec(&handler, &mut session, &["LPOP", "l"]).await,
            Reply::Value(RespValue::null())
        );
        assert_eq!(
            exec(&handler, &mut session, &["LPOP", "l", "2"]).await,
            Reply::Value(RespValue::array(vec![]))
        );
        assert_eq!(
            exec(&handler, &mut session, &["LPOP", "l", "-1"]).await,
            Reply::from(CommandError::NotPositive)
        );
    }

    #[tokio::test]
    async fn test_blpop_wakes_on_push() {
        let handler = handler();
        let (mut waiter, mut rx) = client();
        let (mut pusher, _rx) = client();

        assert_eq!(exec(&handler, &mut waiter, &["BLPOP", "q", "0"]).await, Reply::Pending);
        assert_eq!(exec(&handler, &mut pusher, &["RPUSH", "q", "x", "y"]).await, int(2));

        assert_eq!(&rx.recv().await.unwrap()[..], b"*2\r\n$1\r\nq\r\n$1\r\nx\r\n");
        assert_eq!(
            exec(&handler, &mut pusher, &["LRANGE", "q", "0", "-1"]).await,
            Reply::Value(RespValue::bulk_array(["y"]))
        );
    }

    #[tokio::test]
    async fn test_blpop_immediate_and_timeout() {
        let handler = handler();
        let (mut session, mut rx) = client();

        exec(&handler, &mut session, &["RPUSH", "q", "x"]).await;
        assert_eq!(
            exec(&handler, &mut session, &["BLPOP", "q", "1"]).await,
            Reply::Value(RespValue::bulk_array(["q", "x"]))
        );

        assert_eq!(exec(&handler, &mut session, &["BLPOP", "q", "0.05"]).await, Reply::Pending);
        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        assert_eq!(handler.context().blocking.sweep_now().await, 1);
        assert_eq!(&rx.recv().await.unwrap()[..], b"$-1\r\n");
    }

    #[tokio::test]
    async fn test_blpop_timeout_errors() {
        let handler = handler();
        let (mut session, _rx) = client();

        assert_eq!(
            exec(&handler, &mut session, &["BLPOP", "q", "soon"]).await,
            Reply::from(CommandError::InvalidTimeout)
        );
        assert_eq!(
            exec(&handler, &mut session, &["BLPOP", "q", "-1"]).await,
            Reply::from(CommandError::NegativeTimeout)
        );
    }

    #[tokio::test]
    async fn test_push_against_wrong_type() {
        let handler = handler();
        let (mut session, _rx) = client();

        exec(&handler, &mut session, &["SET", "s", "v"]).await;
        assert_eq!(
            exec(&handler, &mut session, &["RPUSH", "s", "a"]).await,
            Reply::from(CommandError::WrongType)
        );
    }
}
