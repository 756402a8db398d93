//! SOCKS5 front-end.
//!
//! Accepts local SOCKS5 clients and opens every requested connection
//! through the shared dialer. Traffic is relayed untouched.

use crate::dialer::Dialer;
use crate::error::DialError;

use log::{debug, error, info};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, ToSocketAddrs};

/// SOCKS5 protocol constants
const SOCKS_VERSION: u8 = 0x05;
const NO_AUTH_REQUIRED: u8 = 0x00;
const NO_ACCEPTABLE_METHODS: u8 = 0xFF;
const CONNECT_COMMAND: u8 = 0x01;
const IPV4_ADDRESS: u8 = 0x01;
const DOMAIN_NAME: u8 = 0x03;
const IPV6_ADDRESS: u8 = 0x04;

/// Reply codes
const SUCCESS: u8 = 0x00;
const GENERAL_FAILURE: u8 = 0x01;
const HOST_UNREACHABLE: u8 = 0x04;
const COMMAND_NOT_SUPPORTED: u8 = 0x07;
const ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// Why a client session ended before relaying.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unsupported SOCKS version {0}")]
    Version(u8),

    #[error("no acceptable auth methods")]
    NoAcceptableAuth,

    #[error("unsupported command {0}")]
    Command(u8),

    #[error("unsupported address type {0}")]
    AddressType(u8),

    #[error("domain name is not valid UTF-8")]
    InvalidDomain,

    #[error("dial {target} failed: {source}")]
    Dial {
        target: String,
        #[source]
        source: DialError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// SOCKS5 proxy server
pub struct Socks5Server {
    dialer: Arc<dyn Dialer>,
}

impl Socks5Server {
    /// Create a server that dials through `dialer`.
    pub fn new(dialer: Arc<dyn Dialer>) -> Self {
        Self { dialer }
    }

    /// Bind `addr` and serve until accepting fails.
    pub async fn run(&self, addr: impl ToSocketAddrs) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve clients from an already bound listener.
    ///
    /// Each client gets its own task. Only an accept failure ends the loop.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        info!("SOCKS5 proxy listening on {}", listener.local_addr()?);

        loop {
            let (socket, addr) = listener.accept().await?;
            debug!("SOCKS5: New connection from {}", addr);

            let dialer = self.dialer.clone();
            tokio::spawn(async move {
                match handle_client(socket, dialer.as_ref()).await {
                    Ok((sent, received)) => {
                        debug!("SOCKS5: {} closed ({} bytes up, {} bytes down)", addr, sent, received)
                    }
                    Err(e) => error!("SOCKS5 error from {}: {}", addr, e),
                }
            });
        }
    }
}

/// Drive one client through greeting, request and relay.
///
/// Returns the byte counts relayed in each direction.
pub async fn handle_client<S>(mut stream: S, dialer: &dyn Dialer) -> Result<(u64, u64), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Greeting
    let mut buf = [0u8; 2];
    stream.read_exact(&mut buf).await?;

    if buf[0] != SOCKS_VERSION {
        return Err(SessionError::Version(buf[0]));
    }

    let mut methods = vec![0u8; buf[1] as usize];
    stream.read_exact(&mut methods).await?;

    if !methods.contains(&NO_AUTH_REQUIRED) {
        stream.write_all(&[SOCKS_VERSION, NO_ACCEPTABLE_METHODS]).await?;
        return Err(SessionError::NoAcceptableAuth);
    }
    stream.write_all(&[SOCKS_VERSION, NO_AUTH_REQUIRED]).await?;

    // Request
    let mut request = [0u8; 4];
    stream.read_exact(&mut request).await?;

    if request[0] != SOCKS_VERSION {
        return Err(SessionError::Version(request[0]));
    }

    let command = request[1];
    let address_type = request[3];

    if command != CONNECT_COMMAND {
        send_reply(&mut stream, COMMAND_NOT_SUPPORTED).await?;
        return Err(SessionError::Command(command));
    }

    let target = match read_target(&mut stream, address_type).await {
        Ok(target) => target,
        Err(e @ (SessionError::AddressType(_) | SessionError::InvalidDomain)) => {
            send_reply(&mut stream, ADDRESS_TYPE_NOT_SUPPORTED).await?;
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    debug!("SOCKS5: Request to connect to {}", target);

    let mut upstream = match dialer.dial("tcp", &target).await {
        Ok(conn) => conn,
        Err(source) => {
            send_reply(&mut stream, reply_code(&source)).await?;
            return Err(SessionError::Dial { target, source });
        }
    };

    send_reply(&mut stream, SUCCESS).await?;

    // Relay
    let counts = tokio::io::copy_bidirectional(&mut stream, &mut upstream).await?;
    Ok(counts)
}

/// Read DST.ADDR and DST.PORT as `host:port`.
async fn read_target<S>(stream: &mut S, address_type: u8) -> Result<String, SessionError>
where
    S: AsyncRead + Unpin,
{
    let host = match address_type {
        IPV4_ADDRESS => {
            let mut addr = [0u8; 4];
            stream.read_exact(&mut addr).await?;
            Ipv4Addr::from(addr).to_string()
        }
        DOMAIN_NAME => {
            let len = stream.read_u8().await? as usize;
            let mut domain = vec![0u8; len];
            stream.read_exact(&mut domain).await?;
            // Consume the port so the request is fully read before replying.
            let port = stream.read_u16().await?;
            let host = String::from_utf8(domain).map_err(|_| SessionError::InvalidDomain)?;
            return Ok(format!("{}:{}", host, port));
        }
        IPV6_ADDRESS => {
            let mut addr = [0u8; 16];
            stream.read_exact(&mut addr).await?;
            format!("[{}]", Ipv6Addr::from(addr))
        }
        _ => return Err(SessionError::AddressType(address_type)),
    };
    let port = stream.read_u16().await?;

    Ok(format!("{}:{}", host, port))
}

/// Map a dial failure to a SOCKS5 reply code.
fn reply_code(err: &DialError) -> u8 {
    match err {
        DialError::NoUpstream(_) => GENERAL_FAILURE,
        DialError::UnsupportedNetwork(_) => COMMAND_NOT_SUPPORTED,
        DialError::Upstream(_) | DialError::Io(_) => HOST_UNREACHABLE,
    }
}

/// Send a SOCKS5 reply to the client
async fn send_reply<S>(stream: &mut S, reply_code: u8) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    // VER | REP | RSV | ATYP | BND.ADDR | BND.PORT
    let reply = [
        SOCKS_VERSION,
        reply_code,
        0x00,
        IPV4_ADDRESS,
        0, 0, 0, 0,
        0, 0,
    ];

    stream.write_all(&reply).await
}
