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

//! A minimal SOCKS5 CONNECT server.
//!
//! The accepted connection may be a local socket or an SSH channel, and
//! the outbound dial goes through the tunnel's [`Dialer`], so the same
//! server serves both the forward (`socks`) and reverse (`socks-remote`)
//! modes. No authentication; CONNECT only.

use std::net::{Ipv4Addr, Ipv6Addr};

use anyhow::{bail, Context, Result};
use tokio::io::{copy_bidirectional, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::tunnel::forwarder::Dialer;

const VERSION: u8 = 5;
const METHOD_NONE: u8 = 0x00;
const METHOD_UNACCEPTABLE: u8 = 0xff;
const CMD_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

const REP_SUCCESS: u8 = 0x00;
const REP_CONNECTION_REFUSED: u8 = 0x05;
const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;
const REP_ATYP_NOT_SUPPORTED: u8 = 0x08;

/// Serve one SOCKS5 connection to completion.
pub(super) async fn serve<S>(mut stream: S, dialer: &Dialer) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Method negotiation: VER NMETHODS METHODS...
    let mut head = [0u8; 2];
    stream.read_exact(&mut head).await.context("could not read greeting")?;
    if head[0] != VERSION {
        bail!("invalid SOCKS version: {}", head[0]);
    }
    let mut methods = vec![0u8; head[1] as usize];
    stream.read_exact(&mut methods).await.context("could not read methods")?;

    if !methods.contains(&METHOD_NONE) {
        stream.write_all(&[VERSION, METHOD_UNACCEPTABLE]).await?;
        bail!("no acceptable authentication method");
    }
    stream.write_all(&[VERSION, METHOD_NONE]).await?;

    // Request: VER CMD RSV ATYP DST.ADDR DST.PORT
    let mut req = [0u8; 4];
    stream.read_exact(&mut req).await.context("could not read request")?;
    if req[0] != VERSION {
        bail!("invalid SOCKS request version: {}", req[0]);
    }
    if req[1] != CMD_CONNECT {
        reply(&mut stream, REP_COMMAND_NOT_SUPPORTED).await?;
        bail!("unsupported SOCKS command: {}", req[1]);
    }

    let host = match req[3] {
        ATYP_IPV4 => {
            let mut addr = [0u8; 4];
            stream.read_exact(&mut addr).await?;
            Ipv4Addr::from(addr).to_string()
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            stream.read_exact(&mut name).await?;
            String::from_utf8(name).context("domain name is not utf-8")?
        }
        ATYP_IPV6 => {
            let mut addr = [0u8; 16];
            stream.read_exact(&mut addr).await?;
            Ipv6Addr::from(addr).to_string()
        }
        other => {
            reply(&mut stream, REP_ATYP_NOT_SUPPORTED).await?;
            bail!("unsupported address type: {other}");
        }
    };
    let mut port_buf = [0u8; 2];
    stream.read_exact(&mut port_buf).await?;
    let port = u16::from_be_bytes(port_buf);

    debug!("socks connect to {host}:{port}");

    let mut upstream = match dialer.dial_host_port(&host, port).await {
        Ok(s) => s,
        Err(e) => {
            reply(&mut stream, REP_CONNECTION_REFUSED).await?;
            bail!("could not reach {host}:{port}: {e}");
        }
    };
    reply(&mut stream, REP_SUCCESS).await?;

    match copy_bidirectional(&mut stream, &mut upstream).await {
        Ok((tx, rx)) => trace!("socks session to {host}:{port} done, {tx}B/{rx}B"),
        Err(e) => trace!("socks session to {host}:{port} ended: {e}"),
    }
    Ok(())
}

/// Reply with `[VER, REP, RSV, ATYP=IPv4, 0.0.0.0, 0]`; the bound
/// address is not meaningful for tunneled CONNECTs.
async fn reply<S: AsyncWrite + Unpin>(stream: &mut S, code: u8) -> Result<()> {
    stream
        .write_all(&[VERSION, code, 0, ATYP_IPV4, 0, 0, 0, 0, 0, 0])
        .await
        .context("could not write reply")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;
    use tokio::net::TcpListener;

    async fn handshake(
        client: &mut (impl AsyncRead + AsyncWrite + Unpin),
        target: (&str, u16),
    ) -> [u8; 10] {
        client.write_all(&[5, 1, 0]).await.unwrap();
        let mut resp = [0u8; 2];
        client.read_exact(&mut resp).await.unwrap();
        assert_eq!(resp, [5, 0]);

        let (host, port) = target;
        let mut req = vec![5, 1, 0, ATYP_DOMAIN, host.len() as u8];
        req.extend_from_slice(host.as_bytes());
        req.extend_from_slice(&port.to_be_bytes());
        client.write_all(&req).await.unwrap();

        let mut rep = [0u8; 10];
        client.read_exact(&mut rep).await.unwrap();
        rep
    }

    #[tokio::test]
    async fn test_connect_via_direct_dialer() {
        let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = upstream.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut s, _) = upstream.accept().await.unwrap();
            let mut b = [0u8; 4];
            s.read_exact(&mut b).await.unwrap();
            s.write_all(b"pong").await.unwrap();
        });

        let (mut client, server) = duplex(4096);
        let srv = tokio::spawn(async move { serve(server, &Dialer::Direct).await });

        let rep = handshake(&mut client, ("127.0.0.1", port)).await;
        assert_eq!(rep[1], REP_SUCCESS);

        client.write_all(b"ping").await.unwrap();
        let mut back = [0u8; 4];
        client.read_exact(&mut back).await.unwrap();
        assert_eq!(&back, b"pong");

        drop(client);
        srv.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_rejects_wrong_version() {
        let (mut client, server) = duplex(128);
        let srv = tokio::spawn(async move { serve(server, &Dialer::Direct).await });
        client.write_all(&[4, 1, 0]).await.unwrap();
        assert!(srv.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_rejects_bind_command() {
        let (mut client, server) = duplex(128);
        let srv = tokio::spawn(async move { serve(server, &Dialer::Direct).await });

        client.write_all(&[5, 1, 0]).await.unwrap();
        let mut resp = [0u8; 2];
        client.read_exact(&mut resp).await.unwrap();

        // BIND request
        client.write_all(&[5, 2, 0, ATYP_IPV4, 127, 0, 0, 1, 0, 80]).await.unwrap();
        let mut rep = [0u8; 10];
        client.read_exact(&mut rep).await.unwrap();
        assert_eq!(rep[1], REP_COMMAND_NOT_SUPPORTED);
        assert!(srv.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_unreachable_target_reports_refused() {
        let (mut client, server) = duplex(4096);
        let srv = tokio::spawn(async move { serve(server, &Dialer::Direct).await });

        // Port 1 on localhost is almost certainly closed.
        let rep = handshake(&mut client, ("127.0.0.1", 1)).await;
        assert_eq!(rep[1], REP_CONNECTION_REFUSED);
        assert!(srv.await.unwrap().is_err());
    }
}
