//! Command allow-list and reply conversion for the key-value engine.

use std::fmt;
use std::str::FromStr;

use redis::Value as Reply;
use serde_json::{Map, Value};

use crate::error::{Result, StoreError};

/// Commands the engine will send, grouped by data type.
const ALLOWED: &[&str] = &[
    // strings
    "GET", "SET", "SETEX", "SETNX", "PSETEX", "MGET", "MSET", "APPEND", "STRLEN", "GETSET",
    "GETDEL", "GETRANGE", "SETRANGE",
    // counters
    "INCR", "INCRBY", "INCRBYFLOAT", "DECR", "DECRBY",
    // keys and expiry
    "DEL", "UNLINK", "EXISTS", "EXPIRE", "PEXPIRE", "EXPIREAT", "TTL", "PTTL", "PERSIST", "KEYS",
    "SCAN", "TYPE", "RENAME", "RENAMENX", "DBSIZE", "FLUSHDB",
    // hashes
    "HGET", "HSET", "HSETNX", "HMSET", "HMGET", "HGETALL", "HDEL", "HEXISTS", "HKEYS", "HVALS",
    "HLEN", "HINCRBY", "HINCRBYFLOAT",
    // lists
    "LPUSH", "RPUSH", "LPOP", "RPOP", "LRANGE", "LLEN", "LINDEX", "LINSERT", "LREM", "LSET",
    "LTRIM",
    // sets
    "SADD", "SREM", "SMEMBERS", "SISMEMBER", "SCARD", "SPOP", "SRANDMEMBER", "SMOVE", "SUNION",
    "SINTER", "SDIFF",
    // sorted sets
    "ZADD", "ZREM", "ZRANGE", "ZREVRANGE", "ZRANGEBYSCORE", "ZREVRANGEBYSCORE", "ZSCORE", "ZCARD",
    "ZCOUNT", "ZINCRBY", "ZRANK", "ZREVRANK",
    // connection
    "PING",
];

/// Friendly names accepted in addition to the native command names.
const ALIASES: &[(&str, &str)] = &[
    ("delete", "DEL"),
    ("remove", "DEL"),
    ("increment", "INCR"),
    ("decrement", "DECR"),
    ("flush", "FLUSHDB"),
    ("flushdb", "FLUSHDB"),
    ("has", "EXISTS"),
];

/// A command from the allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedisCommand {
    name: &'static str,
}

impl RedisCommand {
    /// Native command name, upper case.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl FromStr for RedisCommand {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let alias = ALIASES
            .iter()
            .find(|(alias, _)| alias.eq_ignore_ascii_case(trimmed))
            .map(|(_, name)| *name);
        let upper = trimmed.to_ascii_uppercase();
        let name = alias
            .or_else(|| ALLOWED.iter().copied().find(|name| *name == upper))
            .ok_or_else(|| StoreError::unsupported(format!("unsupported command '{}'", trimmed)))?;
        Ok(Self { name })
    }
}

impl fmt::Display for RedisCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// One `{command, args}` entry of an operation-list file, parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedCommand {
    pub command: RedisCommand,
    pub args: Vec<String>,
}

impl PlannedCommand {
    pub fn to_cmd(&self) -> redis::Cmd {
        let mut cmd = redis::cmd(self.command.name());
        for arg in &self.args {
            cmd.arg(arg);
        }
        cmd
    }
}

/// Decode the outer operation list.
///
/// # Errors
///
/// Returns `StoreError::MalformedOperationFile` if the batch is not a JSON array.
pub fn parse_command_list(batch: &str) -> Result<Vec<Value>> {
    match serde_json::from_str::<Value>(batch) {
        Ok(Value::Array(entries)) => Ok(entries),
        Ok(_) => Err(StoreError::MalformedOperationFile(
            "expected a JSON array of commands".to_string(),
        )),
        Err(err) => Err(StoreError::MalformedOperationFile(err.to_string())),
    }
}

/// Label of an entry for results and logs.
pub fn command_label(entry: &Value) -> String {
    entry
        .get("command")
        .and_then(Value::as_str)
        .unwrap_or("?")
        .to_string()
}

/// Parse one `{command, args}` descriptor.
pub fn plan_command(entry: &Value) -> Result<PlannedCommand> {
    let name = entry
        .get("command")
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::unsupported("entry is missing 'command'"))?;
    let command: RedisCommand = name.parse()?;
    let args = match entry.get("args") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(args)) => args.iter().map(arg_string).collect(),
        Some(single) => vec![arg_string(single)],
    };
    Ok(PlannedCommand { command, args })
}

/// Render a JSON argument the way the server expects it.
pub fn arg_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => "0".to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Error text of a server error reply, if `reply` is one.
pub fn server_error(reply: &Reply) -> Option<String> {
    match reply {
        Reply::ServerError(err) => Some(format!("{:?}", err)),
        _ => None,
    }
}

/// Error for a command the server answered with an error reply.
pub fn command_failed(command: RedisCommand, message: impl Into<String>) -> StoreError {
    StoreError::QueryFailed(format!("{}: {}", command, message.into()))
}

/// Convert a native reply to JSON.
pub fn reply_to_json(reply: Reply) -> Value {
    match reply {
        Reply::Nil => Value::Null,
        Reply::Int(i) => Value::from(i),
        Reply::BulkString(bytes) => match String::from_utf8(bytes) {
            Ok(text) => Value::String(text),
            Err(err) => Value::String(hex::encode(err.into_bytes())),
        },
        Reply::SimpleString(text) => Value::String(text),
        Reply::Okay => Value::String("OK".to_string()),
        Reply::Array(items) | Reply::Set(items) => {
            Value::Array(items.into_iter().map(reply_to_json).collect())
        }
        Reply::Map(pairs) => {
            let mut object = Map::new();
            for (key, value) in pairs {
                let key = match reply_to_json(key) {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                object.insert(key, reply_to_json(value));
            }
            Value::Object(object)
        }
        Reply::Double(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Reply::Boolean(b) => Value::Bool(b),
        Reply::VerbatimString { text, .. } => Value::String(text),
        Reply::Attribute { data, .. } => reply_to_json(*data),
        Reply::ServerError(err) => Value::String(format!("{:?}", err)),
        other => Value::String(format!("{:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_commands_are_case_insensitive() {
        let command: RedisCommand = "hgetall".parse().unwrap();
        assert_eq!(command.name(), "HGETALL");
        assert_eq!("Set".parse::<RedisCommand>().unwrap().name(), "SET");
    }

    #[test]
    fn test_aliases() {
        assert_eq!("delete".parse::<RedisCommand>().unwrap().name(), "DEL");
        assert_eq!("increment".parse::<RedisCommand>().unwrap().name(), "INCR");
        assert_eq!("decrement".parse::<RedisCommand>().unwrap().name(), "DECR");
        assert_eq!("flush".parse::<RedisCommand>().unwrap().name(), "FLUSHDB");
        assert_eq!("setex".parse::<RedisCommand>().unwrap().name(), "SETEX");
    }

    #[test]
    fn test_unlisted_commands_rejected() {
        for name in ["bogus", "FLUSHALL", "CONFIG", "EVAL", "SHUTDOWN"] {
            let err = name.parse::<RedisCommand>().unwrap_err();
            assert!(err.to_string().contains("unsupported command"), "{}", name);
        }
    }

    #[test]
    fn test_plan_command_args() {
        let planned = plan_command(&json!({ "command": "set", "args": ["k", 10, true] })).unwrap();
        assert_eq!(planned.command.name(), "SET");
        assert_eq!(planned.args, vec!["k", "10", "1"]);

        let planned = plan_command(&json!({ "command": "ping" })).unwrap();
        assert!(planned.args.is_empty());
    }

    #[test]
    fn test_plan_rejects_missing_command() {
        let err = plan_command(&json!({ "args": ["k"] })).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedOperation(_)));
    }

    #[test]
    fn test_server_error_is_a_query_failure() {
        let command: RedisCommand = "lpush".parse().unwrap();
        let err = command_failed(
            command,
            "WRONGTYPE Operation against a key holding the wrong kind of value",
        );
        assert!(matches!(err, StoreError::QueryFailed(_)));
        assert!(!matches!(err, StoreError::UnsupportedOperation(_)));
        assert_eq!(
            err.to_string(),
            "Query failed: LPUSH: WRONGTYPE Operation against a key holding the wrong kind of value"
        );
    }

    #[test]
    fn test_command_list_must_be_array() {
        assert!(matches!(
            parse_command_list("{}"),
            Err(StoreError::MalformedOperationFile(_))
        ));
        assert_eq!(parse_command_list("[{\"command\": \"ping\"}]").unwrap().len(), 1);
    }

    #[test]
    fn test_reply_conversion() {
        assert_eq!(reply_to_json(Reply::Nil), Value::Null);
        assert_eq!(reply_to_json(Reply::Okay), json!("OK"));
        assert_eq!(reply_to_json(Reply::BulkString(b"v".to_vec())), json!("v"));
        assert_eq!(reply_to_json(Reply::BulkString(vec![0xff, 0x00])), json!("ff00"));
        assert_eq!(
            reply_to_json(Reply::Array(vec![Reply::Int(1), Reply::SimpleString("QUEUED".into())])),
            json!([1, "QUEUED"])
        );
        assert_eq!(
            reply_to_json(Reply::Map(vec![(
                Reply::BulkString(b"field".to_vec()),
                Reply::BulkString(b"value".to_vec())
            )])),
            json!({ "field": "value" })
        );
    }
}
