use super::{parse_f64, parse_i64};
use crate::error::CommandError;
use crate::protocol::{Command, RespValue};
use crate::server::handler::{CommandResult, Handler};

impl Handler {
    /// ZADD key score member [score member ...]
    pub(in crate::server) fn handle_zadd(&self, command: &Command) -> CommandResult {
        let args = command.args();
        let pairs = &args[1..];
        if pairs.len() % 2 != 0 {
            return Err(CommandError::Syntax);
        }

        let pairs = pairs
            .chunks_exact(2)
            .map(|pair| Ok((parse_f64(&pair[0])?, pair[1].clone())))
            .collect::<Result<Vec<_>, CommandError>>()?;

        let added = self.ctx.store.zadd(&args[0], &pairs)?;
        self.propagate(command);
        Ok(RespValue::Integer(added as i64))
    }

    pub(in crate::server) fn handle_zrank(&self, command: &Command) -> CommandResult {
        let args = command.args();
        Ok(self
            .ctx
            .store
            .zrank(&args[0], &args[1])
            .map_or_else(RespValue::null, |rank| RespValue::Integer(rank as i64)))
    }

    pub(in crate::server) fn handle_zrange(&self, command: &Command) -> CommandResult {
        let args = command.args();
        let start = parse_i64(&args[1])?;
        let end = parse_i64(&args[2])?;
        Ok(RespValue::bulk_array(self.ctx.store.zrange(&args[0], start, end)))
    }

    pub(in crate::server) fn handle_zcard(&self, command: &Command) -> CommandResult {
        Ok(RespValue::Integer(self.ctx.store.zcard(&command.args()[0]) as i64))
    }

    pub(in crate::server) fn handle_zscore(&self, command: &Command) -> CommandResult {
        let args = command.args();
        Ok(self
            .ctx
            .store
            .zscore(&args[0], &args[1])
            .map_or_else(RespValue::null, |score| RespValue::bulk(score.to_string())))
    }

    pub(in crate::server) fn handle_zrem(&self, command: &Command) -> CommandResult {
        let args = command.args();
        let removed = self.ctx.store.zrem(&args[0], &args[1..])?;
        if removed > 0 {
            self.propagate(command);
        }
        Ok(RespValue::Integer(removed as i64))
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
    async fn test_rank_follows_score_then_member() {
        let handler = handler();
        let (mut session, _rx) = client();

        assert_eq!(
            exec(&handler, &mut session, &["ZADD", "z", "2", "b", "1", "c", "2", "a"]).await,
            int(3)
        );
        assert_eq!(exec(&handler, &mut session, &["ZADD", "z", "0.5", "b"]).await, int(0));

        assert_eq!(exec(&handler, &mut session, &["ZRANK", "z", "b"]).await, int(0));
        assert_eq!(exec(&handler, &mut session, &["ZRANK", "z", "a"]).await, int(2));
        assert_eq!(
            exec(&handler, &mut session, &["ZRANK", "z", "nope"]).await,
            Reply::Value(RespValue::null())
        );
        assert_eq!(
            exec(&handler, &mut session, &["ZRANGE", "z", "0", "-1"]).await,
            Reply::Value(RespValue::bulk_array(["b", "c", "a"]))
        );
        assert_eq!(exec(&handler, &mut session, &["ZCARD", "z"]).await, int(3));
        assert_eq!(
            exec(&handler, &mut session, &["ZSCORE", "z", "b"]).await,
            Reply::Value(RespValue::bulk("0.5"))
        );
        assert_eq!(
            exec(&handler, &mut session, &["ZSCORE", "z", "nope"]).await,
            Reply::Value(RespValue::null())
        );
    }

    #[tokio::test]
    async fn test_zrem_and_bad_scores() {
        let handler = handler();
        let (mut session, _rx) = client();

        exec(&handler, &mut session, &["ZADD", "z", "1", "a", "2", "b"]).await;
        assert_eq!(exec(&handler, &mut session, &["ZREM", "z", "a", "missing"]).await, int(1));
        assert_eq!(exec(&handler, &mut session, &["ZCARD", "z"]).await, int(1));

        assert_eq!(
            exec(&handler, &mut session, &["ZADD", "z", "high", "c"]).await,
            Reply::from(CommandError::NotFloat)
        );
        assert_eq!(
            exec(&handler, &mut session, &["ZADD", "z", "1", "c", "2"]).await,
            Reply::from(CommandError::Syntax)
        );
        assert_eq!(exec(&handler, &mut session, &["ZCARD", "z"]).await, int(1));
    }
}
