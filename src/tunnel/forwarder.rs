// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Forwarding data plane: listeners, dialers, and the per-connection
//! byte pump.
//!
//! Every forwarded session has an SSH half (either the accepted side for
//! reverse modes or the dialed side otherwise), so tearing down the SSH
//! client ends all in-flight sessions; the engine only has to wait for
//! the copy tasks to drain.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use russh::client::Msg;
use russh::{Channel, ChannelStream};
use tokio::io::{copy_bidirectional, AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::ssh::Client;
use crate::tunnel::address::{Address, Net};
use crate::tunnel::socks;

/// A byte stream from any of the three transports a tunnel touches.
pub enum TunnelStream {
    Tcp(TcpStream),
    Unix(UnixStream),
    Ssh(ChannelStream<Msg>),
}

impl std::fmt::Debug for TunnelStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TunnelStream::Tcp(s) => f.debug_tuple("Tcp").field(s).finish(),
            TunnelStream::Unix(s) => f.debug_tuple("Unix").field(s).finish(),
            TunnelStream::Ssh(_) => f.debug_tuple("Ssh").finish(),
        }
    }
}

impl AsyncRead for TunnelStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            Self::Unix(s) => Pin::new(s).poll_read(cx, buf),
            Self::Ssh(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for TunnelStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            Self::Unix(s) => Pin::new(s).poll_write(cx, buf),
            Self::Ssh(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_flush(cx),
            Self::Unix(s) => Pin::new(s).poll_flush(cx),
            Self::Ssh(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            Self::Unix(s) => Pin::new(s).poll_shutdown(cx),
            Self::Ssh(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// A bound local listener.
pub enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

impl Listener {
    pub async fn bind(addr: &Address) -> Result<Self> {
        match addr.net {
            Net::Tcp => TcpListener::bind(&addr.addr)
                .await
                .map(Self::Tcp)
                .map_err(|e| Error::transport(format!("could not listen on {addr}: {e}"))),
            Net::Unix => UnixListener::bind(&addr.addr)
                .map(Self::Unix)
                .map_err(|e| Error::transport(format!("could not listen on {addr}: {e}"))),
        }
    }

    pub fn local_desc(&self) -> String {
        match self {
            Self::Tcp(l) => {
                l.local_addr().map(|a| a.to_string()).unwrap_or_else(|_| "tcp".to_string())
            }
            Self::Unix(l) => l
                .local_addr()
                .ok()
                .and_then(|a| a.as_pathname().map(|p| p.display().to_string()))
                .unwrap_or_else(|| "unix".to_string()),
        }
    }

    async fn accept(&self) -> io::Result<TunnelStream> {
        match self {
            Self::Tcp(l) => l.accept().await.map(|(s, _)| TunnelStream::Tcp(s)),
            Self::Unix(l) => l.accept().await.map(|(s, _)| TunnelStream::Unix(s)),
        }
    }
}

/// Where forwarded sessions come from: a local listener, or channels the
/// server opens for a remote forward.
pub enum Acceptor {
    Local(Listener),
    Remote(mpsc::UnboundedReceiver<Channel<Msg>>),
}

impl Acceptor {
    async fn accept(&mut self) -> io::Result<TunnelStream> {
        match self {
            Self::Local(l) => l.accept().await,
            Self::Remote(rx) => match rx.recv().await {
                Some(channel) => Ok(TunnelStream::Ssh(channel.into_stream())),
                None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "remote listener closed")),
            },
        }
    }

    pub fn desc(&self) -> String {
        match self {
            Self::Local(l) => l.local_desc(),
            Self::Remote(_) => "remote listener".to_string(),
        }
    }
}

/// How the opposite endpoint of an accepted session is reached.
#[derive(Clone)]
pub enum Dialer {
    /// Through the final SSH client (Local and Socks modes).
    Ssh(Arc<Client>),
    /// A direct OS dial (Remote and RemoteSocks modes).
    Direct,
}

impl Dialer {
    pub async fn dial(&self, addr: &Address) -> Result<TunnelStream> {
        match addr.net {
            Net::Tcp => {
                let (host, port) = addr.host_port()?;
                self.dial_host_port(&host, port).await
            }
            Net::Unix => match self {
                Dialer::Direct => UnixStream::connect(&addr.addr)
                    .await
                    .map(TunnelStream::Unix)
                    .map_err(|e| Error::transport(format!("could not dial {addr}: {e}"))),
                Dialer::Ssh(_) => Err(Error::transport(
                    "unix socket targets are not supported over SSH".to_string(),
                )),
            },
        }
    }

    pub async fn dial_host_port(&self, host: &str, port: u16) -> Result<TunnelStream> {
        match self {
            Dialer::Ssh(client) => client.dial_tcp(host, port).await.map(TunnelStream::Ssh),
            Dialer::Direct => TcpStream::connect((host, port))
                .await
                .map(TunnelStream::Tcp)
                .map_err(|e| Error::transport(format!("could not dial {host}:{port}: {e}"))),
        }
    }
}

/// Plain forwarding: accept, dial the counterpart, pump bytes.
///
/// Returns when cancelled or when accepting fails; an accept failure
/// closes the SSH client so the engine observes a disconnect.
pub(super) async fn run_forward(
    name: String,
    mut acceptor: Acceptor,
    target: Address,
    dialer: Dialer,
    client: Arc<Client>,
    sessions: TaskTracker,
    cancel: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            res = acceptor.accept() => res,
            _ = cancel.cancelled() => return,
        };
        let mut conn = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                error!("{name}: could not accept: {e}");
                client.disconnect().await;
                return;
            }
        };

        let name = name.clone();
        let target = target.clone();
        let dialer = dialer.clone();
        sessions.spawn(async move {
            let mut upstream = match dialer.dial(&target).await {
                Ok(s) => s,
                Err(e) => {
                    error!("{name}: could not dial: {e}");
                    return;
                }
            };
            match copy_bidirectional(&mut conn, &mut upstream).await {
                Ok((sent, received)) => {
                    debug!("{name}: session done, {sent}B sent, {received}B received")
                }
                Err(e) => debug!("{name}: session ended: {e}"),
            }
        });
    }
}

/// SOCKS forwarding: accept, run the SOCKS5 server on the connection,
/// dial CONNECT targets through the dialer.
pub(super) async fn run_socks(
    name: String,
    mut acceptor: Acceptor,
    dialer: Dialer,
    client: Arc<Client>,
    sessions: TaskTracker,
    cancel: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            res = acceptor.accept() => res,
            _ = cancel.cancelled() => return,
        };
        let conn = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                error!("{name}: could not accept: {e}");
                client.disconnect().await;
                return;
            }
        };

        let name = name.clone();
        let dialer = dialer.clone();
        sessions.spawn(async move {
            if let Err(e) = socks::serve(conn, &dialer).await {
                error!("{name}: socks session failed: {e}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_local_tcp_forward_pumps_bytes() {
        // upstream echo-ish server
        let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = upstream.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut s, _) = upstream.accept().await.unwrap();
            let mut buf = [0u8; 5];
            s.read_exact(&mut buf).await.unwrap();
            s.write_all(&buf).await.unwrap();
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let entry = listener.local_addr().unwrap();

        let sessions = TaskTracker::new();
        let cancel = CancellationToken::new();
        let fwd = tokio::spawn(run_forward_for_test(
            Acceptor::Local(Listener::Tcp(listener)),
            Address::tcp(upstream_addr.to_string()),
            sessions.clone(),
            cancel.clone(),
        ));

        let mut conn = TcpStream::connect(entry).await.unwrap();
        conn.write_all(b"hello").await.unwrap();
        let mut back = [0u8; 5];
        conn.read_exact(&mut back).await.unwrap();
        assert_eq!(&back, b"hello");

        cancel.cancel();
        fwd.await.unwrap();
    }

    // run_forward without the SSH client teardown path, for loopback tests
    async fn run_forward_for_test(
        mut acceptor: Acceptor,
        target: Address,
        sessions: TaskTracker,
        cancel: CancellationToken,
    ) {
        loop {
            let accepted = tokio::select! {
                res = acceptor.accept() => res,
                _ = cancel.cancelled() => return,
            };
            let Ok(mut conn) = accepted else { return };
            let target = target.clone();
            let dialer = Dialer::Direct;
            sessions.spawn(async move {
                if let Ok(mut upstream) = dialer.dial(&target).await {
                    let _ = copy_bidirectional(&mut conn, &mut upstream).await;
                }
            });
        }
    }

    #[tokio::test]
    async fn test_unix_listener_accepts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fwd.sock");
        let addr = Address::unix(path.to_string_lossy().into_owned());
        let listener = Listener::bind(&addr).await.unwrap();

        let path2 = path.clone();
        let client = tokio::spawn(async move {
            let mut s = UnixStream::connect(path2).await.unwrap();
            s.write_all(b"x").await.unwrap();
        });

        let mut accepted = listener.accept().await.unwrap();
        let mut b = [0u8; 1];
        accepted.read_exact(&mut b).await.unwrap();
        assert_eq!(&b, b"x");
        client.await.unwrap();
    }

    #[tokio::test]
    async fn test_direct_dial_unknown_unix_path_fails() {
        let err =
            Dialer::Direct.dial(&Address::unix("/nonexistent/nope.sock")).await.unwrap_err();
        assert!(err.to_string().contains("could not dial"));
    }
}
