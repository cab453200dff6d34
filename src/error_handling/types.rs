use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    DuplicatePort(u16),
    NotInRange(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::DuplicatePort(p) => write!(f, "Port {} is configured more than once", p),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

#[derive(Debug)]
pub enum NetworkError {
    BindError(u16, std::io::Error),
    AcceptError(std::io::Error),
    ReadError(std::io::Error),
    /// A newer connection for the same endpoint took over.
    Evicted,
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::BindError(port, e) => write!(f, "Failed to bind port {}: {}", port, e),
            NetworkError::AcceptError(e) => write!(f, "Accept failed: {}", e),
            NetworkError::ReadError(e) => write!(f, "Read failed: {}", e),
            NetworkError::Evicted => write!(f, "Connection replaced by a newer one"),
        }
    }
}

impl std::error::Error for NetworkError {}

#[derive(Debug)]
pub enum HandshakeError {
    ReadError(std::io::Error),
    Timeout,
    Empty,
    MalformedJson(serde_json::Error),
    MissingUuid,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::ReadError(e) => write!(f, "Handshake read failed: {}", e),
            HandshakeError::Timeout => write!(f, "Handshake timed out"),
            HandshakeError::Empty => write!(f, "Handshake payload is empty"),
            HandshakeError::MalformedJson(e) => write!(f, "Malformed handshake JSON: {}", e),
            HandshakeError::MissingUuid => write!(f, "Handshake is missing the device UUID"),
        }
    }
}

impl std::error::Error for HandshakeError {}

#[derive(Debug)]
pub enum StorageError {
    DirectoryCreationFailed(String, std::io::Error),
    WriteFailed(String, std::io::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::DirectoryCreationFailed(p, e) => {
                write!(f, "Failed to create directory {}: {}", p, e)
            }
            StorageError::WriteFailed(p, e) => write!(f, "Failed to write {}: {}", p, e),
        }
    }
}

impl std::error::Error for StorageError {}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    NetworkError(NetworkError),
    StorageError(StorageError),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::NetworkError(e) => write!(f, "Network error: {}", e),
            ControllerError::StorageError(e) => write!(f, "Storage error: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<ConfigError> for ControllerError {
    fn from(err: ConfigError) -> Self {
        ControllerError::ConfigurationError(err)
    }
}

impl From<StorageError> for ControllerError {
    fn from(err: StorageError) -> Self {
        ControllerError::StorageError(err)
    }
}

impl From<NetworkError> for ControllerError {
    fn from(err: NetworkError) -> Self {
        ControllerError::NetworkError(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = NetworkError::BindError(5555, std::io::Error::other("in use"));
        assert_eq!(err.to_string(), "Failed to bind port 5555: in use");

        let err = ControllerError::from(ConfigError::DuplicatePort(5002));
        assert_eq!(
            err.to_string(),
            "Configuration error: Port 5002 is configured more than once"
        );
    }
}
