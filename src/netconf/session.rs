//! NETCONF transport: an SSH session to port 830 with the netconf
//! subsystem, base-1.0 `]]>]]>` framing, and synchronous RPC exchange.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use ssh2::Session;
use thiserror::Error;
use tracing::debug;

/// NETCONF well-known port.
pub const NETCONF_PORT: u16 = 830;

/// Synchronous RPC ceiling.
const RPC_TIMEOUT: Duration = Duration::from_secs(60);

/// TCP connect ceiling.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const FRAME_DELIMITER: &[u8] = b"]]>]]>";

const HELLO: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8"?>"#,
    r#"<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">"#,
    r#"<capabilities><capability>urn:ietf:params:netconf:base:1.0</capability></capabilities>"#,
    r#"</hello>"#,
);

/// RPC-level failure classification. Timeouts skip the one RPC; session
/// errors bubble to the redial loop.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("rpc timed out after {}s", RPC_TIMEOUT.as_secs())]
    Timeout,

    #[error("netconf session failed: {0}")]
    Session(anyhow::Error),
}

/// An established NETCONF session.
pub struct NetconfSession {
    channel: ssh2::Channel,
    // The channel borrows nothing but must not outlive its session.
    _session: Session,
    message_id: u64,
    carry: Vec<u8>,
}

impl NetconfSession {
    /// Dial, authenticate, open the netconf subsystem and exchange hellos.
    pub fn connect(address: &str, username: &str, password: &str) -> Result<Self> {
        let addr = (address, NETCONF_PORT)
            .to_socket_addrs()
            .with_context(|| format!("resolving {address}"))?
            .next()
            .with_context(|| format!("no usable address for {address}"))?;

        let tcp = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
            .with_context(|| format!("connecting to {addr}"))?;

        let mut session = Session::new().context("creating ssh session")?;
        session.set_tcp_stream(tcp);
        session.handshake().context("ssh handshake")?;
        session
            .userauth_password(username, password)
            .context("ssh authentication")?;

        let mut channel = session.channel_session().context("opening ssh channel")?;
        channel
            .subsystem("netconf")
            .context("requesting netconf subsystem")?;

        // Blocking reads on the channel observe this ceiling.
        session.set_timeout(RPC_TIMEOUT.as_millis() as u32);

        let mut nc = Self {
            channel,
            _session: session,
            message_id: 0,
            carry: Vec::new(),
        };

        nc.exchange_hello()?;

        Ok(nc)
    }

    fn exchange_hello(&mut self) -> Result<()> {
        self.send_frame(HELLO).context("sending hello")?;

        let reply = match self.read_frame() {
            Ok(reply) => reply,
            Err(RpcError::Timeout) => bail!("timed out awaiting server hello"),
            Err(RpcError::Session(e)) => return Err(e.context("awaiting server hello")),
        };

        if !reply.contains("<hello") {
            bail!("unexpected reply to hello exchange");
        }

        debug!("netconf hello exchanged");
        Ok(())
    }

    /// Send one RPC and wait synchronously for its reply.
    pub fn rpc(&mut self, body: &str) -> Result<String, RpcError> {
        self.message_id += 1;
        let frame = format!(
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8"?>"#,
                r#"<rpc message-id="{}" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">{}</rpc>"#,
            ),
            self.message_id, body,
        );

        self.send_frame(&frame).map_err(RpcError::Session)?;

        self.read_frame()
    }

    fn send_frame(&mut self, payload: &str) -> Result<()> {
        self.channel
            .write_all(payload.as_bytes())
            .context("writing rpc frame")?;
        self.channel
            .write_all(FRAME_DELIMITER)
            .context("writing frame delimiter")?;
        self.channel.flush().context("flushing channel")?;
        Ok(())
    }

    /// Read until the next `]]>]]>` delimiter, within the RPC ceiling.
    fn read_frame(&mut self) -> Result<String, RpcError> {
        let deadline = Instant::now() + RPC_TIMEOUT;
        let mut chunk = [0u8; 16384];

        loop {
            if let Some(pos) = find_delimiter(&self.carry) {
                let mut frame: Vec<u8> =
                    self.carry.drain(..pos + FRAME_DELIMITER.len()).collect();
                frame.truncate(pos);
                return Ok(String::from_utf8_lossy(&frame).into_owned());
            }

            if Instant::now() >= deadline {
                return Err(RpcError::Timeout);
            }

            match self.channel.read(&mut chunk) {
                Ok(0) => {
                    return Err(RpcError::Session(anyhow::anyhow!(
                        "session closed while awaiting reply"
                    )))
                }
                Ok(n) => self.carry.extend_from_slice(&chunk[..n]),
                Err(e)
                    if e.kind() == std::io::ErrorKind::TimedOut
                        || e.kind() == std::io::ErrorKind::WouldBlock =>
                {
                    return Err(RpcError::Timeout)
                }
                Err(e) => {
                    return Err(RpcError::Session(
                        anyhow::Error::from(e).context("reading rpc reply"),
                    ))
                }
            }
        }
    }
}

fn find_delimiter(buf: &[u8]) -> Option<usize> {
    buf.windows(FRAME_DELIMITER.len())
        .position(|w| w == FRAME_DELIMITER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_delimiter() {
        assert_eq!(find_delimiter(b"<rpc-reply/>]]>]]>"), Some(12));
        assert_eq!(find_delimiter(b"partial]]>]]"), None);
        assert_eq!(find_delimiter(b""), None);
    }

    #[test]
    fn test_hello_frame_is_base_10() {
        assert!(HELLO.contains("urn:ietf:params:netconf:base:1.0"));
        assert!(HELLO.starts_with("<?xml"));
    }
}
