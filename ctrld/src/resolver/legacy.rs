use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    time::Duration,
};

use async_trait::async_trait;
use hickory_proto::op::Message;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, UdpSocket},
};

use super::Resolver;
use crate::common::{config::UpstreamConfig, error::Error};

const MAX_UDP_MESSAGE_SIZE: usize = 4096;

/// Plain DNS over UDP, retried over TCP when the answer is truncated.
pub struct LegacyResolver {
    server: SocketAddr,
    timeout: Duration,
}

impl LegacyResolver {
    pub fn new(uc: &UpstreamConfig) -> Result<Self, Error> {
        Ok(Self {
            server: uc.legacy_addr()?,
            timeout: uc.timeout(),
        })
    }

    pub fn with_server(server: SocketAddr, timeout: Duration) -> Self {
        Self { server, timeout }
    }

    async fn exchange_udp(&self, wire: &[u8], id: u16) -> Result<Message, Error> {
        let bind_addr: SocketAddr = match self.server {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(self.server).await?;
        socket.send(wire).await?;

        let mut buf = vec![0u8; MAX_UDP_MESSAGE_SIZE];
        loop {
            let len = socket.recv(&mut buf).await?;
            let msg = match Message::from_vec(&buf[..len]) {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::debug!(?e, server = %self.server, "dropping undecodable datagram");
                    continue;
                }
            };
            if msg.id() != id {
                tracing::debug!(
                    got = msg.id(),
                    want = id,
                    server = %self.server,
                    "dropping response with mismatched id"
                );
                continue;
            }
            return Ok(msg);
        }
    }

    async fn exchange_tcp(&self, wire: &[u8], id: u16) -> Result<Message, Error> {
        let len = u16::try_from(wire.len())
            .map_err(|_| Error::UnexpectedResponse("query too large for tcp".to_owned()))?;
        let mut stream = TcpStream::connect(self.server).await?;
        let mut framed = Vec::with_capacity(wire.len() + 2);
        framed.extend_from_slice(&len.to_be_bytes());
        framed.extend_from_slice(wire);
        stream.write_all(&framed).await?;

        let resp_len = stream.read_u16().await? as usize;
        let mut buf = vec![0u8; resp_len];
        stream.read_exact(&mut buf).await?;

        let msg = Message::from_vec(&buf)?;
        if msg.id() != id {
            return Err(Error::UnexpectedResponse(format!(
                "tcp response id {} does not match query id {}",
                msg.id(),
                id
            )));
        }
        Ok(msg)
    }
}

#[async_trait]
impl Resolver for LegacyResolver {
    async fn resolve(&self, msg: &Message) -> Result<Message, Error> {
        let wire = msg.to_vec()?;
        let answer =
            tokio::time::timeout(self.timeout, self.exchange_udp(&wire, msg.id())).await??;
        if !answer.truncated() {
            return Ok(answer);
        }

        tracing::debug!(server = %self.server, "udp answer truncated, retrying over tcp");
        tokio::time::timeout(self.timeout, self.exchange_tcp(&wire, msg.id())).await?
    }
}
