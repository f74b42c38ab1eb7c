use crate::protocol::{Command, RespValue};
use crate::server::handler::{CommandResult, Handler, Reply};
use crate::server::session::Session;

impl Handler {
    pub(in crate::server) fn handle_subscribe(
        &self,
        session: &mut Session,
        command: &Command,
    ) -> Reply {
        let replies = command
            .args()
            .iter()
            .map(|channel| {
                let count = session.subscribe(channel);
                self.ctx.pubsub.subscribe(session.id, channel, session.sink.clone());
                subscription_reply("subscribe", channel, count)
            })
            .collect();
        Reply::Many(replies)
    }

    pub(in crate::server) fn handle_unsubscribe(
        &self,
        session: &mut Session,
        command: &Command,
    ) -> Reply {
        let replies = command
            .args()
            .iter()
            .map(|channel| {
                let count = session.unsubscribe(channel);
                self.ctx.pubsub.unsubscribe(session.id, channel);
                subscription_reply("unsubscribe", channel, count)
            })
            .collect();
        Reply::Many(replies)
    }

    pub(in crate::server) fn handle_publish(&self, command: &Command) -> CommandResult {
        let args = command.args();
        let receivers = self.ctx.pubsub.publish(&args[0], &args[1]);
        Ok(RespValue::Integer(receivers as i64))
    }
}

fn subscription_reply(kind: &str, channel: &str, count: usize) -> RespValue {
    RespValue::array(vec![
        RespValue::bulk(kind),
        RespValue::bulk(channel),
        RespValue::Integer(count as i64),
    ])
}
