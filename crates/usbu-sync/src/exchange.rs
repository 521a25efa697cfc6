//! Command/response exchange over a resolved serial port
//!
//! The exchange itself works on any async byte stream so it can be driven
//! by an in-memory pipe; [`send_to_port`] opens the real port with
//! `tokio-serial` first.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace, warn};

use crate::error::ServiceError;

/// How much of the device's answer to read
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Write only
    #[default]
    Nothing,
    /// Exactly this many bytes
    Bytes(usize),
    /// Up to and including this delimiter
    Until(Vec<u8>),
}

/// Configuration for one exchange
#[derive(Debug, Clone)]
pub struct ExchangeOptions {
    pub baud_rate: u32,
    /// Bound on the whole write + read
    pub timeout: Duration,
    pub read: ReadMode,
    /// Terminate the payload with `\n` unless it already ends with one
    pub append_newline: bool,
    /// Pause after opening before the first write
    pub settle: Duration,
}

impl Default for ExchangeOptions {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            timeout: Duration::from_secs(2),
            read: ReadMode::Nothing,
            append_newline: false,
            settle: Duration::from_millis(50),
        }
    }
}

/// Result of one exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeReply {
    pub port: String,
    pub bytes_written: usize,
    pub response: Vec<u8>,
}

impl ExchangeReply {
    /// Response decoded as UTF-8, with invalid sequences replaced
    pub fn response_text(&self) -> String {
        String::from_utf8_lossy(&self.response).into_owned()
    }
}

/// An empty delimiter means newline
fn delimiter(delim: &[u8]) -> &[u8] {
    if delim.is_empty() {
        b"\n"
    } else {
        delim
    }
}

/// The bytes actually written for `payload`
pub fn frame_payload(payload: &[u8], append_newline: bool) -> Vec<u8> {
    let mut framed = payload.to_vec();
    if append_newline && !framed.ends_with(b"\n") {
        framed.push(b'\n');
    }
    framed
}

/// Write `payload` to `stream` and read the answer described by `options`
///
/// A read that runs out of time returns what arrived so far; if nothing
/// arrived at all, the exchange fails with [`ServiceError::Timeout`].
pub async fn exchange<S>(
    stream: &mut S,
    port: &str,
    payload: &[u8],
    options: &ExchangeOptions,
) -> Result<ExchangeReply, ServiceError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let deadline = Instant::now() + options.timeout;
    let io_err = |source| ServiceError::Io {
        port: port.to_string(),
        source,
    };
    let timed_out = || ServiceError::Timeout {
        port: port.to_string(),
        timeout_ms: u64::try_from(options.timeout.as_millis()).unwrap_or(u64::MAX),
    };

    let framed = frame_payload(payload, options.append_newline);
    trace!("-> {}: {:?}", port, String::from_utf8_lossy(&framed));
    match timeout_at(deadline, async {
        stream.write_all(&framed).await?;
        stream.flush().await
    })
    .await
    {
        Ok(result) => result.map_err(io_err)?,
        Err(_) => return Err(timed_out()),
    }

    let mut response = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        let wanted = match &options.read {
            ReadMode::Nothing => break,
            ReadMode::Bytes(n) if response.len() >= *n => break,
            ReadMode::Bytes(n) => (*n - response.len()).min(buf.len()),
            ReadMode::Until(delim) if response.ends_with(delimiter(delim)) => break,
            // One byte at a time so nothing past the delimiter is consumed
            ReadMode::Until(_) => 1,
        };

        match timeout_at(deadline, stream.read(&mut buf[..wanted])).await {
            Ok(Ok(0)) => {
                debug!("{} closed after {} byte(s)", port, response.len());
                break;
            }
            Ok(Ok(n)) => response.extend_from_slice(&buf[..n]),
            Ok(Err(e)) => return Err(io_err(e)),
            Err(_) if response.is_empty() => {
                warn!("No response from {} within {:?}", port, options.timeout);
                return Err(timed_out());
            }
            Err(_) => {
                debug!("Read on {} timed out with {} byte(s)", port, response.len());
                break;
            }
        }
    }

    trace!("<- {}: {:?}", port, String::from_utf8_lossy(&response));
    Ok(ExchangeReply {
        port: port.to_string(),
        bytes_written: framed.len(),
        response,
    })
}

/// Open `port` and run one exchange on it
pub async fn send_to_port(
    port: &str,
    payload: &[u8],
    options: &ExchangeOptions,
) -> Result<ExchangeReply, ServiceError> {
    use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt};

    debug!("Opening {} at {} baud", port, options.baud_rate);
    let mut stream = tokio_serial::new(port, options.baud_rate)
        .timeout(options.timeout)
        .open_native_async()
        .map_err(|source| ServiceError::Open {
            port: port.to_string(),
            source,
        })?;

    // Drop anything the device sent before we asked
    if let Err(e) = stream.clear(ClearBuffer::All) {
        debug!("Could not clear buffers on {}: {}", port, e);
    }

    // Give the port a moment to settle
    tokio::time::sleep(options.settle).await;

    exchange(&mut stream, port, payload, options).await
}
