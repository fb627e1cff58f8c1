use std::{net::SocketAddr, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;

use crate::common::{config::UpstreamConfig, error::Error};

/// A single HTTP exchange: a bodiless request in, a fully read response out.
#[async_trait]
pub trait RoundTripper: Send + Sync {
    async fn round_trip(&self, req: http::Request<()>) -> Result<http::Response<Bytes>, Error>;

    /// Tears down any connection state. Later calls may fail.
    fn close(&self) {}
}

/// HTTP/1.1 and HTTP/2 over TLS, backed by a pooled reqwest client.
pub struct HttpRoundTripper {
    client: reqwest::Client,
}

impl HttpRoundTripper {
    pub fn new(uc: &UpstreamConfig) -> Result<Self, Error> {
        let url = uc.endpoint_url()?;
        let mut builder = reqwest::Client::builder()
            .timeout(uc.timeout())
            .pool_idle_timeout(Duration::from_secs(30))
            .no_proxy()
            .redirect(reqwest::redirect::Policy::none());

        if let (Some(ip), Some(host)) = (uc.bootstrap_ip(), url.host_str()) {
            let port = url.port_or_known_default().unwrap_or(443);
            builder = builder.resolve(host, SocketAddr::new(ip, port));
        }

        let client = builder
            .build()
            .map_err(|e| Error::RequestFailed(anyhow::anyhow!("building http client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RoundTripper for HttpRoundTripper {
    async fn round_trip(&self, req: http::Request<()>) -> Result<http::Response<Bytes>, Error> {
        let (parts, ()) = req.into_parts();
        let resp = self
            .client
            .request(parts.method, parts.uri.to_string())
            .headers(parts.headers)
            .send()
            .await
            .map_err(|e| Error::RequestFailed(e.into()))?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp
            .bytes()
            .await
            .map_err(|e| Error::ReadBodyFailed(e.into()))?;

        let mut out = http::Response::new(body);
        *out.status_mut() = status;
        *out.headers_mut() = headers;
        Ok(out)
    }
}
