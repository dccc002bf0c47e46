//! TCP transport backend.
//!
//! Peer addresses are `host:port` strings. The service id is carried for
//! parity with record-based transports but does not select the endpoint;
//! both sides simply agree on the port out of band.

use crate::stream::StreamPair;
use crate::transport::{
    LinkListener, LinkStream, PeerAddr, ServiceId, Transport, TransportError, TransportResult,
};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// TCP transport bound to a fixed local listening address.
///
/// # Examples
///
/// ```no_run
/// use tether_transport::{TcpTransport, Transport, ServiceId, PeerAddr};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = TcpTransport::new("127.0.0.1:7654".parse()?);
/// let service = ServiceId::random();
///
/// let listener = transport.listen(&service).await?;
/// let stream = transport.dial(&PeerAddr::new("127.0.0.1:7654"), &service).await?;
/// # Ok(())
/// # }
/// ```
pub struct TcpTransport {
    bind_addr: SocketAddr,
}

impl TcpTransport {
    /// Create a transport that listens on `bind_addr`.
    ///
    /// Use a port of 0 for automatic selection; the bound address is
    /// available from the listener's `local_addr`.
    #[must_use]
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self { bind_addr }
    }

    fn bind_listener(&self) -> TransportResult<TcpListener> {
        let domain = if self.bind_addr.is_ipv4() {
            socket2::Domain::IPV4
        } else {
            socket2::Domain::IPV6
        };

        let socket =
            socket2::Socket::new(domain, socket2::Type::STREAM, Some(socket2::Protocol::TCP))
                .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        socket
            .set_reuse_address(true)
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        let keepalive = socket2::TcpKeepalive::new().with_time(Duration::from_secs(60));
        socket
            .set_tcp_keepalive(&keepalive)
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        socket
            .bind(&self.bind_addr.into())
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        socket
            .listen(8)
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        let std_listener: std::net::TcpListener = socket.into();
        TcpListener::from_std(std_listener).map_err(|e| TransportError::BindFailed(e.to_string()))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn listen(&self, _service: &ServiceId) -> TransportResult<Box<dyn LinkListener>> {
        let listener = self.bind_listener()?;
        let (closed, _) = watch::channel(false);
        Ok(Box::new(TcpLinkListener { listener, closed }))
    }

    async fn dial(
        &self,
        peer: &PeerAddr,
        _service: &ServiceId,
    ) -> TransportResult<Box<dyn LinkStream>> {
        let addr: SocketAddr = peer
            .as_str()
            .parse()
            .map_err(|_| TransportError::InvalidAddress(peer.to_string()))?;

        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::DialFailed(e.to_string()))?;

        Ok(Box::new(wrap_stream(stream, peer.clone())?))
    }
}

/// Listening TCP endpoint.
struct TcpLinkListener {
    listener: TcpListener,
    closed: watch::Sender<bool>,
}

#[async_trait]
impl LinkListener for TcpLinkListener {
    async fn accept(&self) -> TransportResult<(Box<dyn LinkStream>, PeerAddr)> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(TransportError::Closed);
        }
        tokio::select! {
            _ = closed.changed() => Err(TransportError::Closed),
            res = self.listener.accept() => {
                let (stream, addr) = res?;
                let peer = PeerAddr::new(addr.to_string());
                Ok((Box::new(wrap_stream(stream, peer.clone())?), peer))
            }
        }
    }

    fn local_addr(&self) -> TransportResult<PeerAddr> {
        let addr = self.listener.local_addr()?;
        Ok(PeerAddr::new(addr.to_string()))
    }

    async fn close(&self) {
        self.closed.send_replace(true);
    }
}

fn wrap_stream(
    stream: TcpStream,
    peer: PeerAddr,
) -> TransportResult<
    StreamPair<tokio::net::tcp::OwnedReadHalf, tokio::net::tcp::OwnedWriteHalf>,
> {
    stream.set_nodelay(true)?;
    let (reader, writer) = stream.into_split();
    Ok(StreamPair::new(reader, writer, peer))
}
