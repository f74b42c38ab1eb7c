use super::RespValue;
use crate::error::CommandError;
use bytes::Bytes;

/// A request frame: a verb followed by its arguments.
///
/// The verb keeps its original spelling so the frame can be re-encoded
/// byte-for-byte for replication; `name()` is the uppercased form used for
/// routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    verb: String,
    name: String,
    args: Vec<String>,
}

impl Command {
    pub fn new<I, S>(verb: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            verb: verb.to_string(),
            name: verb.to_ascii_uppercase(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Build a command from a decoded frame. Only non-empty arrays of bulk
    /// strings are accepted.
    pub fn from_frame(value: RespValue) -> Result<Self, CommandError> {
        let RespValue::Array(Some(parts)) = value else {
            return Err(CommandError::InvalidFrame);
        };

        let mut strings = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                RespValue::BulkString(Some(s)) => strings.push(s),
                _ => return Err(CommandError::InvalidFrame),
            }
        }

        let mut iter = strings.into_iter();
        let verb = iter.next().ok_or(CommandError::InvalidFrame)?;
        Ok(Self {
            name: verb.to_ascii_uppercase(),
            verb,
            args: iter.collect(),
        })
    }

    /// Verb as the client spelled it.
    pub fn verb(&self) -> &str {
        &self.verb
    }

    /// Uppercased verb.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Number of frame elements, verb included.
    pub fn arity(&self) -> usize {
        self.args.len() + 1
    }

    pub fn to_frame(&self) -> RespValue {
        RespValue::bulk_array(std::iter::once(&self.verb).chain(self.args.iter()).cloned())
    }

    pub fn encode(&self) -> Bytes {
        Bytes::from(self.to_frame().to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_frame_uppercases_name_but_keeps_verb() {
        let cmd = Command::from_frame(RespValue::bulk_array(["set", "k", "v"])).unwrap();
        assert_eq!(cmd.name(), "SET");
        assert_eq!(cmd.args(), &["k".to_string(), "v".to_string()]);
        assert_eq!(cmd.arity(), 3);
        assert_eq!(&cmd.encode()[..], b"*3\r\n$3\r\nset\r\n$1\r\nk\r\n$1\r\nv\r\n");
    }

    #[test]
    fn test_rejects_non_array_and_empty_frames() {
        assert_eq!(
            Command::from_frame(RespValue::simple("PING")),
            Err(CommandError::InvalidFrame)
        );
        assert_eq!(
            Command::from_frame(RespValue::array(vec![])),
            Err(CommandError::InvalidFrame)
        );
        assert_eq!(
            Command::from_frame(RespValue::array(vec![RespValue::Integer(1)])),
            Err(CommandError::InvalidFrame)
        );
    }
}
