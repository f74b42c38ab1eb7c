use crate::protocol::{Command, RespValue};
use crate::server::handler::{CommandResult, Handler};
use crate::server::session::Session;

impl Handler {
    pub(in crate::server) fn handle_ping(
        &self,
        session: &Session,
        command: &Command,
    ) -> CommandResult {
        if session.is_subscribed() {
            let message = command.arg(0).unwrap_or("");
            return Ok(RespValue::bulk_array(["pong", message]));
        }
        Ok(match command.arg(0) {
            Some(message) => RespValue::bulk(message),
            None => RespValue::simple("PONG"),
        })
    }

    pub(in crate::server) fn handle_echo(&self, command: &Command) -> CommandResult {
        Ok(RespValue::bulk(command.args()[0].clone()))
    }

    pub(in crate::server) fn handle_quit(&self, session: &mut Session) -> CommandResult {
        session.closing = true;
        Ok(RespValue::ok())
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::RespValue;
    use crate::server::handler::tests::{client, exec, handler};
    use crate::server::handler::Reply;

    #[tokio::test]
    async fn test_ping_and_echo() {
        let handler = handler();
        let (mut session, _rx) = client();

        assert_eq!(
            exec(&handler, &mut session, &["ping"]).await,
            Reply::Value(RespValue::simple("PONG"))
        );
        assert_eq!(
            exec(&handler, &mut session, &["PING", "hi"]).await,
            Reply::Value(RespValue::bulk("hi"))
        );
        assert_eq!(
            exec(&handler, &mut session, &["ECHO", "hello world"]).await,
            Reply::Value(RespValue::bulk("hello world"))
        );
    }

    #[tokio::test]
    async fn test_quit_marks_session_closing() {
        let handler = handler();
        let (mut session, _rx) = client();

        assert_eq!(exec(&handler, &mut session, &["QUIT"]).await, Reply::Value(RespValue::ok()));
        assert!(session.closing);
    }
}
