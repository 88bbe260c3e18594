use thiserror::Error;

/// Errors raised while probing or commanding a redis instance.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("could not parse endpoint '{0}'")]
    InvalidEndpoint(String),
    #[error("redis connection failed: {0}")]
    Connection(#[from] redis::RedisError),
    #[error("INFO replication reply did not contain a role")]
    MissingRole,
}

/// Errors raised while reading, writing or validating the primary file.
#[derive(Debug, Error)]
pub enum PrimaryFileError {
    #[error("io error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("redis_server config option must point to a file: {0}")]
    PathLooksLikeEndpoint(String),
}

/// Errors raised while assembling or merging configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for '{field}': {value}")]
    InvalidValue { field: String, value: String },
    #[error("config file '{0}' could not be read: {1}")]
    File(String, #[source] std::io::Error),
    #[error("config file '{0}' is not valid TOML: {1}")]
    Parse(String, #[source] toml::de::Error),
    #[error(transparent)]
    PrimaryFile(#[from] PrimaryFileError),
}

/// Errors raised by the remote key/value watcher.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("request to '{0}' failed: {1}")]
    Request(String, #[source] reqwest::Error),
    #[error("unexpected status from '{0}': {1}")]
    Status(String, reqwest::StatusCode),
    #[error("watch worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Errors surfaced over the websocket/HTTP transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("malformed message: {0}")]
    MalformedMessage(#[from] serde_json::Error),
    #[error("websocket closed")]
    Closed,
}

/// Top-level coordinator error, composing the module-level ones.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error(transparent)]
    PrimaryFile(#[from] PrimaryFileError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Watch(#[from] WatchError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("configuration is invalid: {0}")]
    Misconfigured(String),
}

/// Top-level client error, composing the module-level ones.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error(transparent)]
    PrimaryFile(#[from] PrimaryFileError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("configuration is invalid: {0}")]
    Misconfigured(String),
}
