//! DNS query classification.
//!
//! Decides what happens to every decoded packet, in order:
//! 1. Answers from upstream are relayed to the client that asked
//! 2. Non A/AAAA queries are forwarded upstream untouched
//! 3. Queries for the device's own hostname are answered with its address
//! 4. Blacklisted domains are answered with the unspecified address
//! 5. Everything else is forwarded upstream
//!
//! Transports handle the actual I/O, the resolver handles decisions.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::{debug, info, trace, warn};

use crate::correlation::CorrelationTable;
use crate::dns::{RecordType, encode};
use crate::error::AnswerError;
use crate::filter::Blacklist;
use crate::querylog::{QueryLog, QueryLogEntry};
use crate::settings::{Key, Settings, upstream_addr};
use crate::transport::Packet;

/// Why a locally generated answer was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Query for the device's own hostname.
    Captured,
    /// Query for a blacklisted domain.
    Blocked,
}

/// Why a packet was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Answer with no matching pending query.
    UnknownAnswer,
    /// Answer that did not come from the upstream server.
    UnexpectedSource,
    /// The correlation table lock timed out, so the query was not forwarded.
    NotRegistered,
    /// The upstream server setting is missing or invalid.
    NoUpstream,
    /// The device address setting is missing or invalid.
    NoDeviceAddress,
}

/// Action to take for a packet.
#[derive(Debug)]
pub enum QueryAction {
    /// Upstream answer, send it on to the original client.
    Relay {
        response: Vec<u8>,
        client: SocketAddr,
        latency: Duration,
    },
    /// Query answered locally, send the response back to the client.
    Answer {
        response: Vec<u8>,
        client: SocketAddr,
        domain: String,
        disposition: Disposition,
    },
    /// Query should be forwarded to upstream.
    Forward {
        query: Vec<u8>,
        upstream: SocketAddr,
        domain: String,
    },
    /// Nothing to send.
    Drop(DropReason),
}

/// Resolver handles DNS packet processing decisions.
///
/// Settings are read on every packet so changes apply immediately. The
/// correlation table is the only state shared with other workers.
pub struct Resolver {
    settings: Arc<dyn Settings>,
    blacklist: Arc<dyn Blacklist>,
    query_log: Arc<dyn QueryLog>,
    pending: Arc<CorrelationTable>,
}

impl Resolver {
    pub fn new(
        settings: Arc<dyn Settings>,
        blacklist: Arc<dyn Blacklist>,
        query_log: Arc<dyn QueryLog>,
        pending: Arc<CorrelationTable>,
    ) -> Self {
        Self {
            settings,
            blacklist,
            query_log,
            pending,
        }
    }

    pub fn pending(&self) -> &CorrelationTable {
        &self.pending
    }

    /// Process a decoded packet and decide what action to take.
    ///
    /// Registers forwarded queries in the correlation table, consumes it for
    /// answers, and records every classified query in the query log.
    pub fn process(&self, packet: Packet) -> QueryAction {
        if packet.message.is_response() {
            self.process_answer(packet)
        } else {
            self.process_query(packet)
        }
    }

    fn process_answer(&self, packet: Packet) -> QueryAction {
        let id = packet.message.id();

        match upstream_addr(self.settings.as_ref()) {
            Ok(upstream) if same_endpoint(upstream, packet.src) => {}
            Ok(upstream) => {
                debug!(id, src = %packet.src, %upstream, "answer from unexpected source");
                return QueryAction::Drop(DropReason::UnexpectedSource);
            }
            Err(e) => {
                warn!(id, "cannot read upstream server: {}", e);
                return QueryAction::Drop(DropReason::NoUpstream);
            }
        }

        let Some(pending) = self.pending.resolve_and_consume(id) else {
            debug!(id, "no pending query for answer");
            return QueryAction::Drop(DropReason::UnknownAnswer);
        };

        trace!(id, client = %pending.client, domain = %packet.message.domain_string(), "relaying answer");
        QueryAction::Relay {
            response: encode(&packet.message),
            client: pending.client,
            latency: pending.received_at.elapsed(),
        }
    }

    fn process_query(&self, packet: Packet) -> QueryAction {
        let domain = packet.message.domain_string();
        let qtype = packet.message.qtype();

        if !qtype.is_address() {
            self.log(&domain, false, qtype, packet.src);
            return self.forward(packet, domain);
        }

        if self.is_device_hostname(&domain) {
            self.log(&domain, false, qtype, packet.src);
            return self.capture(packet, domain);
        }

        if self.blocking_enabled() && self.is_blacklisted(&domain) {
            self.log(&domain, true, qtype, packet.src);
            let address = if qtype == RecordType::AAAA {
                "::"
            } else {
                "0.0.0.0"
            };
            return self.answer(packet, domain, address, Disposition::Blocked);
        }

        self.log(&domain, false, qtype, packet.src);
        self.forward(packet, domain)
    }

    fn forward(&self, packet: Packet, domain: String) -> QueryAction {
        let upstream = match upstream_addr(self.settings.as_ref()) {
            Ok(addr) => addr,
            Err(e) => {
                warn!(%domain, "cannot forward query: {}", e);
                return QueryAction::Drop(DropReason::NoUpstream);
            }
        };

        let id = packet.message.id();
        if self
            .pending
            .remember(packet.src, id, packet.received_at)
            .is_err()
        {
            warn!(id, %domain, "could not register pending query, not forwarding");
            return QueryAction::Drop(DropReason::NotRegistered);
        }

        debug!(id, %domain, qtype = %packet.message.qtype(), "forwarding query");
        QueryAction::Forward {
            query: encode(&packet.message),
            upstream,
            domain,
        }
    }

    fn capture(&self, packet: Packet, domain: String) -> QueryAction {
        let address = match self.settings.read_string(Key::Ip) {
            Ok(address) => address,
            Err(e) => {
                warn!(%domain, "cannot answer captured query: {}", e);
                return QueryAction::Drop(DropReason::NoDeviceAddress);
            }
        };
        self.answer(packet, domain, &address, Disposition::Captured)
    }

    fn answer(
        &self,
        packet: Packet,
        domain: String,
        address: &str,
        disposition: Disposition,
    ) -> QueryAction {
        let Packet {
            mut message, src, ..
        } = packet;

        match message.synthesize_answer(address) {
            Ok(()) => {}
            Err(e @ AnswerError::InvalidAddress { .. }) => {
                warn!(%domain, "cannot answer query: {}", e);
                return QueryAction::Drop(DropReason::NoDeviceAddress);
            }
            // No address of the asked family: answer with no records.
            Err(AnswerError::FamilyMismatch { .. } | AnswerError::UnsupportedType(_)) => {
                message.synthesize_empty_answer();
            }
        }

        info!(id = message.id(), %domain, client = %src, ?disposition, "answering locally");
        QueryAction::Answer {
            response: encode(&message),
            client: src,
            domain,
            disposition,
        }
    }

    fn is_device_hostname(&self, domain: &str) -> bool {
        match self.settings.read_string(Key::Hostname) {
            Ok(hostname) => !hostname.is_empty() && hostname == domain,
            Err(e) => {
                debug!("hostname unavailable, skipping capture: {}", e);
                false
            }
        }
    }

    fn blocking_enabled(&self) -> bool {
        self.settings.read_bool(Key::Block).unwrap_or_else(|e| {
            warn!("blocking flag unavailable, not blocking: {}", e);
            false
        })
    }

    fn is_blacklisted(&self, domain: &str) -> bool {
        self.blacklist.is_blocked(domain).unwrap_or_else(|e| {
            warn!(domain, "blacklist lookup failed, not blocking: {}", e);
            false
        })
    }

    fn log(&self, domain: &str, blocked: bool, qtype: RecordType, client: SocketAddr) {
        self.query_log.record(QueryLogEntry {
            time: SystemTime::now(),
            domain: domain.to_string(),
            qtype,
            client: client.ip(),
            blocked,
        });
    }
}

fn same_endpoint(a: SocketAddr, b: SocketAddr) -> bool {
    a.port() == b.port() && a.ip().to_canonical() == b.ip().to_canonical()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{Message, decode};
    use crate::error::BlacklistError;
    use crate::filter::PatternList;
    use crate::querylog::MemoryQueryLog;
    use crate::settings::MemorySettings;
    use std::io;
    use std::time::Instant;

    const UPSTREAM: &str = "10.0.0.53:53";

    struct Harness {
        settings: Arc<MemorySettings>,
        query_log: Arc<MemoryQueryLog>,
        resolver: Resolver,
    }

    fn harness_with(blacklist: Arc<dyn Blacklist>, capacity: usize) -> Harness {
        let settings = Arc::new(MemorySettings::new());
        settings.write_string(Key::Hostname, "esper.local");
        settings.write_string(Key::Ip, "192.168.1.5");
        settings.write_string(Key::DnsServer, UPSTREAM);
        settings.write_bool(Key::Block, true);
        let query_log = Arc::new(MemoryQueryLog::default());
        let resolver = Resolver::new(
            settings.clone(),
            blacklist,
            query_log.clone(),
            Arc::new(CorrelationTable::new(capacity)),
        );
        Harness {
            settings,
            query_log,
            resolver,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(PatternList::new(["*.ads.example.com"])), 50)
    }

    fn client() -> SocketAddr {
        "192.168.1.20:40000".parse().unwrap()
    }

    fn query(id: u16, domain: &str, qtype: RecordType) -> Packet {
        Packet::new(Message::query(id, domain, qtype).unwrap(), client())
    }

    fn upstream_answer(id: u16, domain: &str) -> Packet {
        let mut message = Message::query(id, domain, RecordType::A).unwrap();
        message.synthesize_answer("93.184.216.34").unwrap();
        message.header.aa = false;
        message.header.ra = true;
        Packet::new(message, UPSTREAM.parse().unwrap())
    }

    struct BrokenBlacklist;

    impl Blacklist for BrokenBlacklist {
        fn is_blocked(&self, _domain: &str) -> Result<bool, BlacklistError> {
            Err(BlacklistError::Io(io::Error::other("flash unavailable")))
        }
    }

    #[test]
    fn capture_answers_with_device_address() {
        let h = harness();

        let QueryAction::Answer {
            response,
            client: to,
            disposition,
            ..
        } = h.resolver.process(query(0x1111, "esper.local", RecordType::A))
        else {
            panic!("expected a local answer");
        };

        assert_eq!(disposition, Disposition::Captured);
        assert_eq!(to, client());
        let msg = decode(&response).unwrap();
        assert_eq!(msg.id(), 0x1111);
        assert!(msg.header.qr);
        assert!(msg.header.aa);
        assert_eq!(msg.header.ancount, 1);
        assert_eq!(msg.records[0].rtype, 1);
        assert_eq!(msg.records[0].ttl, 128);
        assert_eq!(msg.records[0].rdata, [192, 168, 1, 5]);
    }

    #[test]
    fn capture_of_aaaa_with_ipv4_device_is_empty_answer() {
        let h = harness();

        let QueryAction::Answer { response, .. } =
            h.resolver.process(query(2, "esper.local", RecordType::AAAA))
        else {
            panic!("expected a local answer");
        };

        let msg = decode(&response).unwrap();
        assert!(msg.header.qr);
        assert_eq!(msg.header.ancount, 0);
        assert_eq!(msg.question.qtype, 28);
    }

    #[test]
    fn capture_requires_exact_hostname() {
        let h = harness();

        assert!(matches!(
            h.resolver.process(query(3, "esper.localdomain", RecordType::A)),
            QueryAction::Forward { .. }
        ));
        assert!(matches!(
            h.resolver.process(query(4, "ESPER.local", RecordType::A)),
            QueryAction::Forward { .. }
        ));
    }

    #[test]
    fn capture_of_a_with_ipv6_device_is_empty_answer() {
        let h = harness();
        h.settings.write_string(Key::Ip, "fd00::1");

        let QueryAction::Answer {
            response,
            disposition,
            ..
        } = h.resolver.process(query(6, "esper.local", RecordType::A))
        else {
            panic!("expected a local answer");
        };

        let msg = decode(&response).unwrap();
        assert_eq!(disposition, Disposition::Captured);
        assert!(msg.header.aa);
        assert_eq!(msg.header.rcode, 0);
        assert!(msg.records.is_empty());
    }

    #[test]
    fn capture_with_invalid_device_address_drops() {
        let h = harness();
        h.settings.write_string(Key::Ip, "not-an-ip");

        assert!(matches!(
            h.resolver.process(query(5, "esper.local", RecordType::A)),
            QueryAction::Drop(DropReason::NoDeviceAddress)
        ));
    }

    #[test]
    fn empty_hostname_captures_nothing() {
        let h = harness();
        h.settings.write_string(Key::Hostname, "");

        assert!(matches!(
            h.resolver.process(query(6, "", RecordType::A)),
            QueryAction::Forward { .. }
        ));
    }

    #[test]
    fn blacklisted_a_query_gets_zero_address() {
        let h = harness();

        let QueryAction::Answer {
            response,
            disposition,
            domain,
            ..
        } = h
            .resolver
            .process(query(7, "track.ads.example.com", RecordType::A))
        else {
            panic!("expected a local answer");
        };

        assert_eq!(disposition, Disposition::Blocked);
        assert_eq!(domain, "track.ads.example.com");
        let msg = decode(&response).unwrap();
        assert_eq!(msg.records[0].rdata, [0, 0, 0, 0]);
        assert!(h.resolver.pending().is_empty());
    }

    #[test]
    fn blacklisted_aaaa_query_gets_unspecified_v6() {
        let h = harness();

        let QueryAction::Answer { response, .. } = h
            .resolver
            .process(query(8, "track.ads.example.com", RecordType::AAAA))
        else {
            panic!("expected a local answer");
        };

        let msg = decode(&response).unwrap();
        assert_eq!(msg.records[0].rtype, 28);
        assert_eq!(msg.records[0].rdata, [0u8; 16]);
    }

    #[test]
    fn blocking_disabled_forwards_blacklisted() {
        let h = harness();
        h.settings.write_bool(Key::Block, false);

        assert!(matches!(
            h.resolver
                .process(query(9, "track.ads.example.com", RecordType::A)),
            QueryAction::Forward { .. }
        ));
    }

    #[test]
    fn blacklist_failure_fails_open() {
        let h = harness_with(Arc::new(BrokenBlacklist), 50);

        assert!(matches!(
            h.resolver
                .process(query(10, "track.ads.example.com", RecordType::A)),
            QueryAction::Forward { .. }
        ));
    }

    #[test]
    fn non_address_query_is_forwarded_unmodified() {
        let h = harness();
        // Blacklisted and even the device hostname: still forwarded.
        for domain in ["example.com", "track.ads.example.com", "esper.local"] {
            let packet = query(11, domain, RecordType::MX);
            let original = encode(&packet.message);

            let QueryAction::Forward {
                query, upstream, ..
            } = h.resolver.process(packet)
            else {
                panic!("expected forward for {domain}");
            };

            assert_eq!(query, original);
            assert_eq!(upstream, UPSTREAM.parse::<SocketAddr>().unwrap());
        }
    }

    #[test]
    fn forward_registers_pending_query() {
        let h = harness();

        h.resolver.process(query(0x2222, "example.com", RecordType::A));

        let pending = h.resolver.pending().resolve_and_consume(0x2222).unwrap();
        assert_eq!(pending.client, client());
    }

    #[test]
    fn forward_without_upstream_drops() {
        let h = harness();
        h.settings.write_string(Key::DnsServer, "");

        assert!(matches!(
            h.resolver.process(query(12, "example.com", RecordType::A)),
            QueryAction::Drop(DropReason::NoUpstream)
        ));
        assert!(h.resolver.pending().is_empty());
    }

    #[test]
    fn answer_is_relayed_to_original_client() {
        let h = harness();
        h.resolver.process(query(0x3333, "example.com", RecordType::A));

        let answer = upstream_answer(0x3333, "example.com");
        let original = encode(&answer.message);

        let QueryAction::Relay {
            response,
            client: to,
            ..
        } = h.resolver.process(answer)
        else {
            panic!("expected relay");
        };

        assert_eq!(to, client());
        assert_eq!(response, original);
        assert!(h.resolver.pending().is_empty());
    }

    #[test]
    fn answer_with_unknown_id_is_dropped() {
        let h = harness();
        h.resolver.process(query(1, "example.com", RecordType::A));

        assert!(matches!(
            h.resolver.process(upstream_answer(2, "example.com")),
            QueryAction::Drop(DropReason::UnknownAnswer)
        ));
        assert_eq!(h.resolver.pending().len(), 1);
    }

    #[test]
    fn answer_is_single_use() {
        let h = harness();
        h.resolver.process(query(5, "example.com", RecordType::A));

        assert!(matches!(
            h.resolver.process(upstream_answer(5, "example.com")),
            QueryAction::Relay { .. }
        ));
        assert!(matches!(
            h.resolver.process(upstream_answer(5, "example.com")),
            QueryAction::Drop(DropReason::UnknownAnswer)
        ));
    }

    #[test]
    fn answer_from_other_source_is_dropped() {
        let h = harness();
        h.resolver.process(query(6, "example.com", RecordType::A));

        let mut spoofed = upstream_answer(6, "example.com");
        spoofed.src = "192.168.1.66:53".parse().unwrap();

        assert!(matches!(
            h.resolver.process(spoofed),
            QueryAction::Drop(DropReason::UnexpectedSource)
        ));
        assert_eq!(h.resolver.pending().len(), 1);
    }

    #[test]
    fn evicted_query_answer_is_dropped() {
        let h = harness_with(Arc::new(PatternList::default()), 2);
        for id in 1..=3u16 {
            h.resolver.process(query(id, "example.com", RecordType::A));
        }

        assert!(matches!(
            h.resolver.process(upstream_answer(1, "example.com")),
            QueryAction::Drop(DropReason::UnknownAnswer)
        ));
        assert!(matches!(
            h.resolver.process(upstream_answer(3, "example.com")),
            QueryAction::Relay { .. }
        ));
    }

    #[test]
    fn classification_is_deterministic() {
        let h = harness();
        let run = || {
            let mut packet = query(0x4444, "track.ads.example.com", RecordType::A);
            packet.received_at = Instant::now();
            match h.resolver.process(packet) {
                QueryAction::Answer { response, .. } => response,
                other => panic!("unexpected {other:?}"),
            }
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn every_classified_query_is_logged() {
        let h = harness();
        h.resolver.process(query(1, "example.com", RecordType::MX));
        h.resolver.process(query(2, "esper.local", RecordType::A));
        h.resolver
            .process(query(3, "track.ads.example.com", RecordType::AAAA));
        h.resolver.process(query(4, "example.com", RecordType::A));
        h.resolver.process(upstream_answer(4, "example.com"));

        let entries = h.query_log.entries();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].domain, "example.com");
        assert_eq!(entries[0].qtype, RecordType::A);
        assert!(!entries[0].blocked);
        assert_eq!(entries[1].domain, "track.ads.example.com");
        assert!(entries[1].blocked);
        assert_eq!(entries[2].domain, "esper.local");
        assert!(!entries[2].blocked);
        assert_eq!(entries[3].qtype, RecordType::MX);
        assert_eq!(entries[3].client, client().ip());
    }

    #[test]
    fn same_endpoint_ignores_v4_mapping() {
        let a: SocketAddr = "10.0.0.53:53".parse().unwrap();
        let b: SocketAddr = "[::ffff:10.0.0.53]:53".parse().unwrap();

        assert!(same_endpoint(a, b));
        assert!(!same_endpoint(a, "10.0.0.53:54".parse().unwrap()));
    }
}
