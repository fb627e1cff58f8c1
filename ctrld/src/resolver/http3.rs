use std::{
    future::Future,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    pin::Pin,
    sync::Arc,
    time::Duration,
};

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use quinn::{crypto::rustls::QuicClientConfig, ClientConfig, Connection, Endpoint};
use tokio::{sync::Mutex, task::JoinHandle};

use super::round_trip::RoundTripper;
use crate::common::{
    config::{UpstreamConfig, DEFAULT_UPSTREAM_TIMEOUT},
    dns::socket_addrs,
    error::Error,
};

const ALPN_H3: &[u8] = b"h3";

fn init_crypto_provider() {
    let _ =
        rustls::crypto::CryptoProvider::install_default(rustls::crypto::ring::default_provider());
}

fn tls_client_config() -> Result<rustls::ClientConfig, Error> {
    init_crypto_provider();
    let mut root_store = rustls::RootCertStore::empty();
    let certs = rustls_native_certs::load_native_certs()?;
    let (added, ignored) = root_store.add_parsable_certificates(certs);
    tracing::trace!(added, ignored, "loaded native root certificates");

    let mut config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    config.alpn_protocols = vec![ALPN_H3.to_vec()];
    config.enable_early_data = false;
    Ok(config)
}

/// One HTTP/3 session to a DoH3 endpoint: the QUIC endpoint, its
/// connection, and the task driving the h3 control stream.
pub struct H3RoundTripper {
    endpoint: Endpoint,
    connection: Connection,
    send_request: Mutex<h3::client::SendRequest<h3_quinn::OpenStreams, Bytes>>,
    driver: JoinHandle<()>,
    timeout: Duration,
}

impl H3RoundTripper {
    pub async fn connect(
        url: &url::Url,
        bootstrap_ip: Option<IpAddr>,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let server_name = url
            .host_str()
            .ok_or_else(|| Error::InvalidUrl(url.to_string()))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_owned();
        let remote = socket_addrs(url, bootstrap_ip)
            .await?
            .into_iter()
            .next()
            .ok_or(Error::NotFound)?;

        let quic_config = QuicClientConfig::try_from(tls_client_config()?)
            .map_err(|e| Error::RequestFailed(anyhow!("quic tls config: {}", e)))?;
        let bind_addr: SocketAddr = match remote {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let mut endpoint = Endpoint::client(bind_addr)?;
        endpoint.set_default_client_config(ClientConfig::new(Arc::new(quic_config)));

        let connecting = endpoint
            .connect(remote, &server_name)
            .map_err(|e| Error::RequestFailed(anyhow!("quic connect {}: {}", remote, e)))?;
        let connection = tokio::time::timeout(timeout, connecting)
            .await?
            .map_err(|e| Error::RequestFailed(anyhow!("quic handshake {}: {}", remote, e)))?;

        let (mut driver, send_request) =
            h3::client::new(h3_quinn::Connection::new(connection.clone()))
                .await
                .map_err(|e| Error::RequestFailed(anyhow!("h3 handshake: {}", e)))?;
        let driver = tokio::spawn(async move {
            let ret = futures::future::poll_fn(|cx| driver.poll_close(cx)).await;
            tracing::debug!(?ret, "h3 connection driver exited");
        });

        tracing::debug!(%remote, server_name, "h3 session established");
        Ok(Self {
            endpoint,
            connection,
            send_request: Mutex::new(send_request),
            driver,
            timeout,
        })
    }

    async fn exchange(&self, req: http::Request<()>) -> Result<http::Response<Bytes>, Error> {
        let mut send_request = self.send_request.lock().await.clone();
        let mut stream = send_request
            .send_request(req)
            .await
            .map_err(|e| Error::RequestFailed(anyhow!("{}", e)))?;
        stream
            .finish()
            .await
            .map_err(|e| Error::RequestFailed(anyhow!("{}", e)))?;

        let resp = stream
            .recv_response()
            .await
            .map_err(|e| Error::RequestFailed(anyhow!("{}", e)))?;
        let mut body = BytesMut::new();
        while let Some(chunk) = stream
            .recv_data()
            .await
            .map_err(|e| Error::ReadBodyFailed(anyhow!("{}", e)))?
        {
            body.put(chunk);
        }

        let (parts, ()) = resp.into_parts();
        Ok(http::Response::from_parts(parts, body.freeze()))
    }
}

#[async_trait]
impl RoundTripper for H3RoundTripper {
    async fn round_trip(&self, req: http::Request<()>) -> Result<http::Response<Bytes>, Error> {
        tokio::time::timeout(self.timeout, self.exchange(req)).await?
    }

    fn close(&self) {
        self.driver.abort();
        self.connection.close(0u32.into(), b"closed");
        self.endpoint.close(0u32.into(), b"closed");
    }
}

impl Drop for H3RoundTripper {
    fn drop(&mut self) {
        self.close();
    }
}

pub type ConnectFuture =
    Pin<Box<dyn Future<Output = Result<Arc<dyn RoundTripper>, Error>> + Send>>;
pub type RoundTripperFactory = Box<dyn Fn() -> ConnectFuture + Send + Sync>;

/// Shared HTTP/3 session slot of a DoH3 upstream. The session is built on
/// first use and thrown away after any failed exchange, so a broken QUIC
/// connection is never handed to the next query.
pub struct Http3Transport {
    current: Mutex<Option<Arc<dyn RoundTripper>>>,
    connect: RoundTripperFactory,
    connect_timeout: Duration,
}

impl Http3Transport {
    pub fn new(uc: &UpstreamConfig) -> Result<Self, Error> {
        let url = uc.endpoint_url()?;
        let bootstrap_ip = uc.bootstrap_ip();
        let timeout = uc.timeout();
        Ok(Self::with_factory(Box::new(move || {
            let url = url.clone();
            Box::pin(async move {
                let rt = H3RoundTripper::connect(&url, bootstrap_ip, timeout).await?;
                Ok::<_, Error>(Arc::new(rt) as Arc<dyn RoundTripper>)
            }) as ConnectFuture
        }))
        .with_connect_timeout(timeout))
    }

    pub fn with_factory(connect: RoundTripperFactory) -> Self {
        Self {
            current: Mutex::new(None),
            connect,
            connect_timeout: DEFAULT_UPSTREAM_TIMEOUT,
        }
    }

    /// Bounds the whole session setup: name lookup, QUIC and h3 handshakes.
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// The session currently in the slot, if one is established.
    pub async fn current(&self) -> Option<Arc<dyn RoundTripper>> {
        self.current.lock().await.clone()
    }

    async fn round_tripper(&self) -> Result<Arc<dyn RoundTripper>, Error> {
        let mut current = self.current.lock().await;
        if let Some(rt) = current.as_ref() {
            return Ok(rt.clone());
        }
        // queries for this upstream wait on the slot while it is being filled
        let rt = tokio::time::timeout(self.connect_timeout, (self.connect)()).await??;
        *current = Some(rt.clone());
        Ok(rt)
    }

    /// Closes `rt` and empties the slot if it still holds that session.
    async fn discard(&self, rt: &Arc<dyn RoundTripper>) {
        let mut current = self.current.lock().await;
        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, rt)) {
            current.take();
        }
        drop(current);
        rt.close();
    }

    pub async fn round_trip(
        &self,
        req: http::Request<()>,
    ) -> Result<http::Response<Bytes>, Error> {
        let rt = self.round_tripper().await?;
        match rt.round_trip(req).await {
            Ok(resp) => Ok(resp),
            Err(e) => {
                tracing::debug!(?e, "h3 exchange failed, discarding session");
                self.discard(&rt).await;
                Err(e)
            }
        }
    }

    pub async fn close(&self) {
        if let Some(rt) = self.current.lock().await.take() {
            rt.close();
        }
    }
}
