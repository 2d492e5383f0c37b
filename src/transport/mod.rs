//! Transport module - platform channel to the compute server
//!
//! - Unix: Unix Domain Socket
//! - Windows: Named Pipe (client end)

use tokio::io::{AsyncRead, AsyncWrite};

use crate::protocol::PIPE_NAME;

/// Any duplex byte stream the client can speak the protocol over
pub trait Channel: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Channel for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Boxed channel, as owned by a connection
pub type BoxedChannel = Box<dyn Channel>;

/// Endpoint the server listens on.
///
/// Format:
/// - Unix: `/tmp/ICS0025.sock`
/// - Windows: `\\.\pipe\ICS0025`
pub fn default_endpoint() -> String {
    #[cfg(unix)]
    {
        format!("/tmp/{}.sock", PIPE_NAME)
    }

    #[cfg(windows)]
    {
        format!(r"\\.\pipe\{}", PIPE_NAME)
    }
}

/// Open the client end of the channel at `endpoint`
#[cfg(unix)]
pub async fn open(endpoint: &str) -> std::io::Result<BoxedChannel> {
    let stream = tokio::net::UnixStream::connect(endpoint).await?;
    Ok(Box::new(stream))
}

/// Open the client end of the channel at `endpoint`
#[cfg(windows)]
pub async fn open(endpoint: &str) -> std::io::Result<BoxedChannel> {
    use tokio::net::windows::named_pipe::ClientOptions;

    let pipe = ClientOptions::new().open(endpoint)?;
    Ok(Box::new(pipe))
}

/// Human-readable transport name for diagnostics
pub fn transport_name() -> &'static str {
    #[cfg(unix)]
    {
        "Unix domain socket"
    }

    #[cfg(windows)]
    {
        "Windows named pipe"
    }
}
