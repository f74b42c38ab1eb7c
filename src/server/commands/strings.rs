use super::parse_i64;
use crate::error::CommandError;
use crate::protocol::{Command, RespValue};
use crate::server::handler::{CommandResult, Handler};
use crate::storage::now_millis;

impl Handler {
    pub(in crate::server) fn handle_set(&self, command: &Command) -> CommandResult {
        let args = command.args();
        let key = &args[0];
        let value = &args[1];

        let mut expires_at = None;
        let mut options = args[2..].iter();
        while let Some(option) = options.next() {
            let millis_per_unit = match option.to_ascii_uppercase().as_str() {
                "PX" => 1,
                "EX" => 1000,
                _ => return Err(CommandError::Syntax),
            };
            let amount = options.next().ok_or(CommandError::Syntax)?;
            let amount = parse_i64(amount)?;
            if amount <= 0 {
                return Err(CommandError::InvalidExpire("set".to_string()));
            }
            let ttl = (amount as u64).saturating_mul(millis_per_unit);
            expires_at = Some(now_millis().saturating_add(ttl));
        }

        self.ctx.store.set_string(key, value.clone(), expires_at);
        self.propagate(command);
        Ok(RespValue::ok())
    }

    pub(in crate::server) fn handle_get(&self, command: &Command) -> CommandResult {
        Ok(self
            .ctx
            .store
            .get_string(&command.args()[0])
            .map_or_else(RespValue::null, RespValue::bulk))
    }

    pub(in crate::server) fn handle_incr(&self, command: &Command) -> CommandResult {
        let value = self.ctx.store.incr(&command.args()[0])?;
        self.propagate(command);
        Ok(RespValue::Integer(value))
    }
}
