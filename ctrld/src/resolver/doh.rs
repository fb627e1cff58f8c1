use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hickory_proto::op::Message;
use http::{
    header::{ACCEPT, CONTENT_TYPE},
    Method, StatusCode,
};

use super::{
    http3::Http3Transport,
    round_trip::{HttpRoundTripper, RoundTripper},
    Resolver,
};
use crate::common::{
    config::{ResolverType, UpstreamConfig},
    error::Error,
};

pub const DNS_MESSAGE_CONTENT_TYPE: &str = "application/dns-message";

enum DohTransport {
    Http(Arc<dyn RoundTripper>),
    Http3(Arc<Http3Transport>),
}

/// RFC 8484 GET resolver over HTTPS or HTTP/3.
pub struct DohResolver {
    endpoint: String,
    transport: DohTransport,
}

impl DohResolver {
    pub fn new(uc: &UpstreamConfig) -> Result<Self, Error> {
        uc.endpoint_url()?;
        let transport = match uc.resolver_type() {
            ResolverType::Doh3 => DohTransport::Http3(Arc::new(Http3Transport::new(uc)?)),
            ResolverType::Doh => DohTransport::Http(Arc::new(HttpRoundTripper::new(uc)?)),
            ResolverType::Legacy => {
                return Err(Error::Unsupported(format!(
                    "{} is not a DoH upstream",
                    uc.endpoint()
                )))
            }
        };
        Ok(Self {
            endpoint: uc.endpoint().to_owned(),
            transport,
        })
    }

    pub fn with_http_transport(endpoint: impl Into<String>, rt: Arc<dyn RoundTripper>) -> Self {
        Self {
            endpoint: endpoint.into(),
            transport: DohTransport::Http(rt),
        }
    }

    pub fn with_http3_transport(
        endpoint: impl Into<String>,
        transport: Arc<Http3Transport>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            transport: DohTransport::Http3(transport),
        }
    }

    pub fn is_doh3(&self) -> bool {
        matches!(self.transport, DohTransport::Http3(_))
    }

    /// The HTTP/3 session currently held by a DoH3 resolver.
    pub async fn http3_round_tripper(&self) -> Option<Arc<dyn RoundTripper>> {
        match &self.transport {
            DohTransport::Http3(t) => t.current().await,
            DohTransport::Http(_) => None,
        }
    }

    fn build_request(&self, msg: &Message) -> Result<http::Request<()>, Error> {
        let data = msg.to_vec()?;
        let enc = URL_SAFE_NO_PAD.encode(data);
        let url = format!("{}?dns={}", self.endpoint, enc);
        let req = http::Request::builder()
            .method(Method::GET)
            .uri(url)
            .header(CONTENT_TYPE, DNS_MESSAGE_CONTENT_TYPE)
            .header(ACCEPT, DNS_MESSAGE_CONTENT_TYPE)
            .body(())?;
        Ok(req)
    }
}

#[async_trait]
impl Resolver for DohResolver {
    async fn resolve(&self, msg: &Message) -> Result<Message, Error> {
        let req = self.build_request(msg)?;
        let resp = match &self.transport {
            DohTransport::Http(rt) => rt.round_trip(req).await?,
            DohTransport::Http3(t) => t.round_trip(req).await?,
        };

        if resp.status() != StatusCode::OK {
            return Err(Error::BadStatus {
                status: resp.status().as_u16(),
                body: String::from_utf8_lossy(resp.body()).into_owned(),
            });
        }

        let answer = Message::from_vec(resp.body())?;
        Ok(answer)
    }

    async fn close(&self) {
        if let DohTransport::Http3(t) = &self.transport {
            t.close().await;
        }
    }
}
