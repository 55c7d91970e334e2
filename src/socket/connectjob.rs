use crate::base::error::ConnError;
use crate::socket::client::TunnelTarget;
use crate::socket::proxy::{ProxyConfig, ProxySettings, ProxyType};
use crate::socket::stream::{BoxedSocket, SniffStream};
use crate::socket::tls::TlsParams;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};

/// Upper bound on the proxy's CONNECT response head.
const MAX_TUNNEL_HEAD: usize = 16 * 1024;

/// A socket ready for HTTP, plus what was learned while building it.
#[derive(Debug)]
pub struct Established {
    pub socket: BoxedSocket,
    pub verified: bool,
    pub proxy_verified: Option<bool>,
}

/// Manages the connection process: DNS -> TCP -> (proxy TLS) -> CONNECT -> TLS.
pub struct ConnectJob<'a> {
    pub host: &'a str,
    pub port: u16,
    pub source_address: Option<SocketAddr>,
    pub tcp_nodelay: bool,
    pub proxy: Option<&'a ProxySettings>,
    pub proxy_config: &'a ProxyConfig,
    pub tunnel: Option<&'a TunnelTarget>,
    /// TLS towards the destination. Skipped when forwarding through a proxy.
    pub tls: Option<&'a TlsParams>,
    /// Set once the proxy itself is reached, before anything is sent through it.
    pub reached_proxy: &'a AtomicBool,
}

impl ConnectJob<'_> {
    pub async fn connect(&self) -> Result<Established, ConnError> {
        let (host, port) = match self.proxy {
            // If proxy, we connect to PROXY host/port first
            Some(p) => p.host_port().ok_or_else(|| ConnError::NewConnection("proxy URL has no host".into()))?,
            None => (self.host, self.port),
        };

        let stream = self.dial(host, port).await?;
        let mut socket = BoxedSocket::new(stream);
        let mut proxy_verified = None;

        if let Some(proxy) = self.proxy.filter(|p| p.proxy_type() == ProxyType::Https) {
            let sniff = SniffStream::new(socket);
            let plaintext = sniff.plaintext_flag();
            let (proxy_host, _) = proxy.host_port().unwrap_or((host, port));
            match self.proxy_config.proxy_tls.handshake(proxy_host, sniff).await {
                Ok((tls, verified)) => {
                    socket = BoxedSocket::new(tls);
                    proxy_verified = Some(verified);
                }
                Err(_) if plaintext.load(Ordering::Relaxed) => return Err(ConnError::ProxyTunnelRejected),
                Err(e) => return Err(e),
            }
        }

        if self.proxy.is_some() {
            self.reached_proxy.store(true, Ordering::Relaxed);
        }

        if let Some(target) = self.tunnel {
            open_tunnel(&mut socket, target).await?;
        }

        let direct = self.proxy.is_none() || self.tunnel.is_some();
        let mut verified = false;
        if let Some(tls) = self.tls.filter(|_| direct) {
            let (stream, ok) = tls.handshake(self.host, socket).await?;
            socket = BoxedSocket::new(stream);
            verified = ok;
        }

        Ok(Established { socket, verified, proxy_verified })
    }

    async fn dial(&self, host: &str, port: u16) -> Result<TcpStream, ConnError> {
        // 1. DNS Resolution
        let addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| ConnError::NewConnection(format!("failed to resolve '{host}': {e}")))?;

        // 2. TCP Connect, first address that answers
        let mut last_error = None;
        for addr in addrs {
            let socket = if addr.is_ipv4() { TcpSocket::new_v4() } else { TcpSocket::new_v6() }
                .map_err(|e| ConnError::NewConnection(e.to_string()))?;
            if let Some(source) = self.source_address {
                socket.bind(source).map_err(|e| ConnError::NewConnection(e.to_string()))?;
            }
            match socket.connect(addr).await {
                Ok(stream) => {
                    stream.set_nodelay(self.tcp_nodelay).map_err(|e| ConnError::NewConnection(e.to_string()))?;
                    tracing::debug!(host = %host, addr = %addr, "tcp connected");
                    return Ok(stream);
                }
                Err(e) => {
                    tracing::debug!(host = %host, addr = %addr, error = %e, "tcp connect failed");
                    last_error = Some(e);
                }
            }
        }
        Err(ConnError::NewConnection(match last_error {
            Some(e) => e.to_string(),
            None => format!("no addresses found for '{host}'"),
        }))
    }
}

/// Send `CONNECT` and wait for a 200 from the proxy.
async fn open_tunnel(socket: &mut BoxedSocket, target: &TunnelTarget) -> Result<(), ConnError> {
    let authority = authority(&target.host, target.port);
    let mut connect_req = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n");
    for (name, value) in &target.headers {
        if let Ok(value) = value.to_str() {
            connect_req.push_str(&format!("{}: {}\r\n", name, value));
        }
    }
    connect_req.push_str("\r\n");
    socket.write_all(connect_req.as_bytes()).await?;

    let mut head = Vec::with_capacity(1024);
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            return Err(ConnError::Tunnel("proxy closed the connection during CONNECT".into()));
        }
        head.extend_from_slice(&buf[..n]);
        if head.len() > MAX_TUNNEL_HEAD {
            return Err(ConnError::Tunnel("proxy response head too large".into()));
        }
    }

    let head = String::from_utf8_lossy(&head);
    let status_line = head.lines().next().unwrap_or_default();
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    let code = parts.next().unwrap_or_default();
    let reason = parts.next().unwrap_or_default().trim();
    if !version.starts_with("HTTP/") || code.len() != 3 {
        return Err(ConnError::BadStatusLine(status_line.to_string()));
    }
    if code != "200" {
        tracing::debug!(tunnel = %authority, status = %code, "proxy refused tunnel");
        return Err(ConnError::Tunnel(format!("{code} {reason}")));
    }
    Ok(())
}

/// `host:port`, bracketing IPv6 literals.
pub(crate) fn authority(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}
