use crate::protocol::{Command, RespValue};
use crate::server::handler::{CommandResult, Handler};

impl Handler {
    pub(in crate::server) fn handle_type(&self, command: &Command) -> CommandResult {
        Ok(RespValue::simple(self.ctx.store.key_type(&command.args()[0])))
    }

    pub(in crate::server) fn handle_keys(&self, command: &Command) -> CommandResult {
        Ok(RespValue::bulk_array(self.ctx.store.keys(&command.args()[0])))
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::RespValue;
    use crate::server::handler::tests::{client, exec, handler};
    use crate::server::handler::Reply;

    #[tokio::test]
    async fn test_type_reports_each_kind() {
        let handler = handler();
        let (mut session, _rx) = client();

        exec(&handler, &mut session, &["SET", "s", "1"]).await;
        exec(&handler, &mut session, &["RPUSH", "l", "a"]).await;
        exec(&handler, &mut session, &["ZADD", "z", "1", "m"]).await;
        exec(&handler, &mut session, &["XADD", "x", "1-1", "f", "v"]).await;

        for (key, kind) in [
            ("s", "string"),
            ("l", "list"),
            ("z", "zset"),
            ("x", "stream"),
            ("nope", "none"),
        ] {
            assert_eq!(
                exec(&handler, &mut session, &["TYPE", key]).await,
                Reply::Value(RespValue::simple(kind))
            );
        }
    }

    #[tokio::test]
    async fn test_keys_glob() {
        let handler = handler();
        let (mut session, _rx) = client();

        exec(&handler, &mut session, &["SET", "user:1", "a"]).await;
        exec(&handler, &mut session, &["SET", "user:2", "b"]).await;
        exec(&handler, &mut session, &["SET", "other", "c"]).await;

        assert_eq!(
            exec(&handler, &mut session, &["KEYS", "user:*"]).await,
            Reply::Value(RespValue::bulk_array(["user:1", "user:2"]))
        );
        assert_eq!(
            exec(&handler, &mut session, &["KEYS", "*"]).await,
            Reply::Value(RespValue::bulk_array(["other", "user:1", "user:2"]))
        );
    }
}
