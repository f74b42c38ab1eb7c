use super::{deadline_after, parse_i64};
use crate::blocking::collect_stream_entries;
use crate::error::CommandError;
use crate::protocol::{Command, RespValue};
use crate::server::handler::{CommandResult, Handler, Reply};
use crate::server::session::Session;
use crate::storage::stream::read_reply;
use crate::storage::{IdSpec, StreamId};

/// Parsed `XREAD [COUNT n] [BLOCK ms] STREAMS key... id...`.
#[derive(Debug)]
struct ReadRequest {
    count: Option<usize>,
    block_ms: Option<u64>,
    keys: Vec<String>,
    ids: Vec<String>,
}

fn parse_count(s: &str) -> Result<Option<usize>, CommandError> {
    let count = parse_i64(s)?;
    Ok((count > 0).then_some(count as usize))
}

fn parse_read_request(args: &[String]) -> Result<ReadRequest, CommandError> {
    let mut count = None;
    let mut block_ms = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].to_ascii_uppercase().as_str() {
            "COUNT" => {
                let value = args.get(i + 1).ok_or(CommandError::Syntax)?;
                count = parse_count(value)?;
                i += 2;
            }
            "BLOCK" => {
                let value = args.get(i + 1).ok_or(CommandError::Syntax)?;
                let ms: i64 = value.parse().map_err(|_| CommandError::InvalidTimeout)?;
                if ms < 0 {
                    return Err(CommandError::NegativeTimeout);
                }
                block_ms = Some(ms as u64);
                i += 2;
            }
            "STREAMS" => {
                let rest = &args[i + 1..];
                if rest.is_empty() || rest.len() % 2 != 0 {
                    return Err(CommandError::Syntax);
                }
                let (keys, ids) = rest.split_at(rest.len() / 2);
                return Ok(ReadRequest {
                    count,
                    block_ms,
                    keys: keys.to_vec(),
                    ids: ids.to_vec(),
                });
            }
            _ => return Err(CommandError::Syntax),
        }
    }
    Err(CommandError::Syntax)
}

fn parse_range_start(s: &str) -> Result<StreamId, CommandError> {
    match s {
        "-" => Ok(StreamId::ZERO),
        _ => Ok(StreamId::parse_bound(s, 0)?),
    }
}

fn parse_range_end(s: &str) -> Result<StreamId, CommandError> {
    match s {
        "+" => Ok(StreamId::MAX),
        _ => Ok(StreamId::parse_bound(s, u64::MAX)?),
    }
}

impl Handler {
    pub(in crate::server) async fn handle_xadd(&self, command: &Command) -> CommandResult {
        let args = command.args();
        let key = &args[0];
        let pairs = &args[2..];
        if pairs.is_empty() || pairs.len() % 2 != 0 {
            return Err(CommandError::WrongArity("xadd".to_string()));
        }

        let spec: IdSpec = args[1].parse()?;
        let fields: Vec<(String, String)> = pairs
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect();

        let id = self.ctx.store.add_stream_entry(key, spec, fields)?;

        // followers must store the same ID, not regenerate one
        let id_text = id.to_string();
        let resolved = std::iter::once(key.as_str())
            .chain(std::iter::once(id_text.as_str()))
            .chain(pairs.iter().map(String::as_str));
        self.propagate(&Command::new(command.verb(), resolved));

        self.ctx.blocking.notify_stream_append(key).await;
        Ok(RespValue::bulk(id_text))
    }

    pub(in crate::server) fn handle_xrange(&self, command: &Command) -> CommandResult {
        let args = command.args();
        let start = parse_range_start(&args[1])?;
        let end = parse_range_end(&args[2])?;

        let count = match &args[3..] {
            [] => None,
            [option, value] if option.eq_ignore_ascii_case("COUNT") => parse_count(value)?,
            _ => return Err(CommandError::Syntax),
        };

        let entries = self.ctx.store.range_stream(&args[0], start, end, false, count);
        Ok(RespValue::array(entries.iter().map(RespValue::from).collect()))
    }

    pub(in crate::server) async fn handle_xread(
        &self,
        session: &mut Session,
        command: &Command,
    ) -> Result<Reply, CommandError> {
        let request = parse_read_request(command.args())?;

        // `$` is resolved once, at call time
        let mut starts = Vec::with_capacity(request.ids.len());
        for (key, id) in request.keys.iter().zip(&request.ids) {
            let start = match id.as_str() {
                "$" => self.ctx.store.stream_last_id(key).unwrap_or(StreamId::ZERO),
                _ => id.parse()?,
            };
            starts.push(start);
        }

        let Some(block_ms) = request.block_ms.filter(|_| !session.executing) else {
            let results =
                collect_stream_entries(&self.ctx.store, &request.keys, &starts, request.count);
            return Ok(Reply::Value(if results.is_empty() {
                RespValue::null()
            } else {
                read_reply(&results)
            }));
        };

        let reply = self
            .ctx
            .blocking
            .block_stream_read(
                session.id,
                request.keys,
                starts,
                request.count,
                deadline_after(block_ms),
                session.sink.clone(),
            )
            .await;

        Ok(reply.map_or(Reply::Pending, Reply::Value))
    }
}
