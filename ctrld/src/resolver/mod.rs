//! Upstream resolvers. Each variant takes a wire-format query and returns
//! the upstream's wire-format answer; retry policy is left to callers.
//! Cancellation follows the usual future semantics: dropping the `resolve`
//! future aborts the in-flight exchange.

pub mod doh;
pub mod http3;
pub mod legacy;
pub mod round_trip;

use std::sync::Arc;

use async_trait::async_trait;
use hickory_proto::op::Message;

use crate::common::{
    config::{ResolverType, UpstreamConfig},
    error::Error,
};

pub use doh::DohResolver;
pub use legacy::LegacyResolver;

#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, msg: &Message) -> Result<Message, Error>;

    /// Releases pooled connections held by the resolver.
    async fn close(&self) {}
}

/// Builds the resolver variant selected by `uc`. The choice is made once
/// here and never revisited per query.
pub fn new_resolver(uc: &UpstreamConfig) -> Result<Arc<dyn Resolver>, Error> {
    let resolver: Arc<dyn Resolver> = match uc.resolver_type() {
        ResolverType::Doh | ResolverType::Doh3 => Arc::new(DohResolver::new(uc)?),
        ResolverType::Legacy => Arc::new(LegacyResolver::new(uc)?),
    };
    tracing::info!(
        name = uc.name(),
        endpoint = uc.endpoint(),
        r#type = %uc.resolver_type(),
        "upstream resolver created"
    );
    Ok(resolver)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::net::Ipv4Addr;

    use hickory_proto::{
        op::{MessageType, OpCode, Query},
        rr::{rdata::A, Name, RData, Record, RecordType},
    };

    use super::*;
    use crate::common::config::UpstreamConfigBuilder;

    /// Returns `msg` as a peer would see it after decoding, with the header
    /// counts filled in.
    pub fn on_the_wire(msg: &Message) -> Message {
        Message::from_vec(&msg.to_vec().unwrap()).unwrap()
    }

    pub fn a_query(id: u16, name: &str) -> Message {
        let mut msg = Message::new();
        msg.set_id(id)
            .set_message_type(MessageType::Query)
            .set_op_code(OpCode::Query)
            .set_recursion_desired(true);
        msg.add_query(Query::query(
            Name::from_ascii(name).unwrap(),
            RecordType::A,
        ));
        on_the_wire(&msg)
    }

    pub fn a_response(id: u16, name: &str, ip: [u8; 4]) -> Message {
        let mut msg = a_query(id, name);
        msg.set_message_type(MessageType::Response)
            .set_recursion_available(true);
        msg.add_answer(Record::from_rdata(
            Name::from_ascii(name).unwrap(),
            300,
            RData::A(A(Ipv4Addr::from(ip))),
        ));
        on_the_wire(&msg)
    }

    #[test]
    fn built_messages_match_decoded_form() {
        let query = a_query(3, "example.com.");
        assert_eq!(query.query_count(), 1);
        assert_eq!(on_the_wire(&query), query);

        let answer = a_response(3, "example.com.", [9, 9, 9, 9]);
        assert_eq!(answer.answer_count(), 1);
        assert_eq!(on_the_wire(&answer), answer);
    }

    #[test]
    fn variant_is_selected_from_config() {
        let doh = UpstreamConfigBuilder::default()
            .resolver_type(ResolverType::Doh)
            .endpoint("https://dns.example/dns-query")
            .build()
            .unwrap();
        assert!(new_resolver(&doh).is_ok());

        let doh3 = UpstreamConfigBuilder::default()
            .resolver_type(ResolverType::Doh3)
            .endpoint("https://dns.example/dns-query")
            .build()
            .unwrap();
        assert!(DohResolver::new(&doh3).unwrap().is_doh3());

        let legacy = UpstreamConfigBuilder::default()
            .resolver_type(ResolverType::Legacy)
            .endpoint("dns.example")
            .build()
            .unwrap();
        assert!(matches!(
            new_resolver(&legacy).err(),
            Some(Error::InvalidUrl(_))
        ));
    }
}
