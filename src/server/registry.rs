//! Static command table used for validation before dispatch.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    /// Minimum number of frame elements, verb included.
    pub arity: usize,
    /// Mutates the keyspace; runs under the write gate.
    pub write: bool,
    /// Queued instead of executed while MULTI is open.
    pub queueable: bool,
    /// Allowed while the session has subscriptions.
    pub pubsub: bool,
}

const fn read(name: &'static str, arity: usize) -> CommandSpec {
    CommandSpec {
        name,
        arity,
        write: false,
        queueable: true,
        pubsub: false,
    }
}

const fn write(name: &'static str, arity: usize) -> CommandSpec {
    CommandSpec {
        write: true,
        ..read(name, arity)
    }
}

const fn control(name: &'static str, arity: usize) -> CommandSpec {
    CommandSpec {
        queueable: false,
        ..read(name, arity)
    }
}

const fn pubsub(name: &'static str, arity: usize) -> CommandSpec {
    CommandSpec {
        pubsub: true,
        ..read(name, arity)
    }
}

pub const COMMANDS: &[CommandSpec] = &[
    // connection
    pubsub("PING", 1),
    read("ECHO", 2),
    CommandSpec {
        queueable: false,
        ..pubsub("QUIT", 1)
    },
    // strings and keyspace
    write("SET", 3),
    read("GET", 2),
    write("INCR", 2),
    read("TYPE", 2),
    read("KEYS", 2),
    // lists
    write("RPUSH", 3),
    write("LPUSH", 3),
    read("LRANGE", 4),
    read("LLEN", 2),
    write("LPOP", 2),
    write("BLPOP", 3),
    // streams
    write("XADD", 5),
    read("XRANGE", 4),
    read("XREAD", 4),
    // sorted sets
    write("ZADD", 4),
    read("ZRANK", 3),
    read("ZRANGE", 4),
    read("ZCARD", 2),
    read("ZSCORE", 3),
    write("ZREM", 3),
    // transactions
    control("MULTI", 1),
    control("EXEC", 1),
    control("DISCARD", 1),
    // pub/sub
    pubsub("SUBSCRIBE", 2),
    pubsub("UNSUBSCRIBE", 2),
    read("PUBLISH", 3),
    // replication
    control("REPLCONF", 3),
    CommandSpec {
        write: true,
        ..control("PSYNC", 3)
    },
    control("WAIT", 3),
    // server
    read("INFO", 1),
    read("CONFIG", 3),
];

/// Look up a command by its uppercased name.
pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|spec| spec.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_names_are_unique_and_uppercase() {
        let mut seen = HashSet::new();
        for spec in COMMANDS {
            assert!(seen.insert(spec.name), "duplicate {}", spec.name);
            assert_eq!(spec.name, spec.name.to_ascii_uppercase());
            assert!(spec.arity >= 1);
        }
    }

    #[test]
    fn test_flags() {
        assert!(lookup("SET").unwrap().write);
        assert!(lookup("SET").unwrap().queueable);
        assert!(!lookup("GET").unwrap().write);
        assert!(!lookup("EXEC").unwrap().queueable);
        assert!(!lookup("WAIT").unwrap().queueable);
        assert!(lookup("PING").unwrap().pubsub);
        assert!(lookup("QUIT").unwrap().pubsub);
        assert!(!lookup("QUIT").unwrap().queueable);
        assert!(!lookup("PUBLISH").unwrap().pubsub);
        assert!(lookup("FLUSHALL").is_none());
    }
}
