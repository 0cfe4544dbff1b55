use thiserror::Error;

/// Error kinds surfaced at the parser and network seams.
///
/// The connection handler branches on the variant to decide which synthesized
/// status response (400/501/502) the client receives; client-side write
/// failures carry only a log context because no status can be delivered on a
/// broken socket.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The client's request bytes could not be parsed.
    #[error("invalid request")]
    InvalidRequest,

    /// An origin response had no header terminator.
    #[error("invalid response")]
    InvalidResponse,

    /// Request method other than GET, POST, or CONNECT.
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    /// GET/POST request whose parsed hostname is empty.
    #[error("empty hostname in request")]
    EmptyHost,

    /// The upstream connection could not be established.
    #[error("failed to connect to {host}:{port}")]
    Connect {
        host: String,
        port: String,
        #[source]
        source: std::io::Error,
    },

    /// The request bytes could not be relayed to the origin.
    #[error("failed to send request to origin server")]
    UpstreamSend(#[source] std::io::Error),

    /// The origin accepted the connection but sent nothing back.
    #[error("no response from origin server")]
    EmptyUpstreamResponse,

    /// A write towards the client failed; no status can be sent.
    #[error("{context}")]
    Client {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}
