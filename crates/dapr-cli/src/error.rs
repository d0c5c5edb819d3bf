//! Error types for the CLI

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The cluster cannot be reached at all.
    #[error("Failed to initialize kubernetes client: {message}")]
    ClientInit { message: String },

    /// No candidate namespace hosts the dashboard.
    #[error(
        "Failed to find Dapr dashboard in namespaces: [{}]\n\
         If Dapr dashboard is deployed to a different namespace, please use dapr dashboard -n",
        .namespaces.join(" ")
    )]
    Resolution { namespaces: Vec<String> },

    /// Session parameters are malformed.
    #[error("invalid port-forward configuration: {message}")]
    Config { message: String },

    /// The local endpoint could not be bound.
    #[error(
        "Error in port forwarding: unable to listen on {addr}: {source}\n\
         Check for `dapr dashboard` running in other terminal sessions, \
         or use the `--port` flag to use a different port."
    )]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The remote pod could not be reached after binding.
    #[error("Error in port forwarding: {message}")]
    Connect { message: String },

    #[error("failed to open browser: {message}")]
    BrowserLaunch { message: String },

    #[error("port-forward session is {state}, expected {expected}")]
    InvalidState {
        state: crate::commands::port_forward::SessionState,
        expected: &'static str,
    },

    #[error("command failed: {message}")]
    CommandFailed { message: String },
}

impl Error {
    pub fn client_init(message: impl Into<String>) -> Self {
        Error::ClientInit {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    pub fn bind(addr: impl Into<String>, source: std::io::Error) -> Self {
        Error::Bind {
            addr: addr.into(),
            source,
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Error::Connect {
            message: message.into(),
        }
    }

    pub fn command_failed(message: impl Into<String>) -> Self {
        Error::CommandFailed {
            message: message.into(),
        }
    }
}
