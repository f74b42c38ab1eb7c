use crate::error::CommandError;
use crate::protocol::{Command, RespValue};
use crate::server::handler::{CommandResult, Handler};

impl Handler {
    pub(in crate::server) fn handle_info(&self, command: &Command) -> CommandResult {
        match command.arg(0).map(str::to_ascii_lowercase).as_deref() {
            None | Some("replication") | Some("all") | Some("default") => {
                Ok(RespValue::bulk(self.ctx.replication.info()))
            }
            Some(_) => Ok(RespValue::bulk("")),
        }
    }

    pub(in crate::server) fn handle_config(&self, command: &Command) -> CommandResult {
        let args = command.args();
        if !args[0].eq_ignore_ascii_case("GET") {
            return Err(CommandError::Syntax);
        }

        let config = &self.ctx.config;
        let mut reply = Vec::new();
        for param in &args[1..] {
            let param = param.to_ascii_lowercase();
            let value = match param.as_str() {
                "dir" => config.snapshot.dir.clone(),
                "dbfilename" => config.snapshot.dbfilename.clone(),
                "port" => config.server.port.to_string(),
                "bind" => config.server.host.clone(),
                "replicaof" => config
                    .replication
                    .replicaof
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
                _ => continue,
            };
            reply.push(RespValue::bulk(param));
            reply.push(RespValue::bulk(value));
        }
        Ok(RespValue::array(reply))
    }
}
