//! TCP transport wrapper, following the shape of the teacher crate's
//! socket backends (one struct for the listener, one for the connected
//! socket), but built directly on `tokio::net` rather than being swappable
//! across backends: this crate only ever runs on the tokio runtime.

use std::io;
use std::net::SocketAddr;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

pub struct Listener {
    inner: TcpListener,
}

pub struct Socket {
    inner: TcpStream,
}

pub async fn bind(addr: SocketAddr) -> io::Result<Listener> {
    let inner = TcpListener::bind(addr).await?;
    Ok(Listener { inner })
}

pub async fn connect(addr: SocketAddr) -> io::Result<Socket> {
    TcpStream::connect(addr).await.map(|inner| Socket { inner })
}

impl Listener {
    pub async fn accept(&self) -> io::Result<(Socket, SocketAddr)> {
        let (inner, peer) = self.inner.accept().await?;
        Ok((Socket { inner }, peer))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

impl Socket {
    /// Splits the socket into an owned read half and an owned write half,
    /// so each can be handed to its own task: the handler that *reads* from
    /// this socket runs on the read half, while the peer handler writes
    /// relayed bytes through the write half.
    pub fn into_split(self) -> (OwnedReadHalf, OwnedWriteHalf) {
        self.inner.into_split()
    }

    pub fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        self.inner.set_nodelay(nodelay)
    }
}
