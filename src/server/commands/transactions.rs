use crate::error::CommandError;
use crate::protocol::RespValue;
use crate::server::handler::{CommandResult, Handler};
use crate::server::session::Session;

impl Handler {
    pub(in crate::server) fn handle_multi(&self, session: &mut Session) -> CommandResult {
        session.begin_transaction()?;
        Ok(RespValue::ok())
    }

    pub(in crate::server) fn handle_discard(&self, session: &mut Session) -> CommandResult {
        if !session.discard_transaction() {
            return Err(CommandError::DiscardWithoutMulti);
        }
        Ok(RespValue::ok())
    }
}
