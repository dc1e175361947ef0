//! The step-driven engine: the single host-facing entry point that
//! ties the wire codec, record store, query tracker and publisher
//! together (spec.md section 4.5 and section 6).
//!
//! Method names mirror `mdnsd_new`/`mdnsd_set_address`/`mdnsd_publish`/
//! `mdnsd_query`/`mdnsd_in`/`mdnsd_out`/`mdnsd_step`/`mdnsd_sleep`/
//! `mdnsd_shutdown` in `original_source/src/mdnsd.c`, Rust-cased onto
//! `Engine` inherent methods.

use std::collections::{HashSet, VecDeque};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::errors::EngineError;
use crate::publish::{PublishAction, Publisher};
use crate::query::{QueryControl, QueryTracker};
use crate::rng::{Jitter, SystemJitter};
use crate::store::{LocalRecord, RecordStore};
use crate::time::{Clock, SystemClock};
use crate::wire::{
    Class, Message, Question, Record, Resource, Type, MDNS_PORT, MULTICAST_GROUP,
};

/// Opaque handle returned by [`Engine::publish`] and [`Engine::query`],
/// used to withdraw a record or cancel a query later. A monotonic
/// counter per engine, not an erased pointer (spec.md section 9).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Token(u64);

impl Token {
    pub(crate) fn from_raw(n: u64) -> Token {
        Token(n)
    }
}

/// Engine construction parameters (spec.md section 3: "a class (always
/// 1), a maximum in-memory record count ... multicast TTL").
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Always `Class::Internet` in this engine; carried as config
    /// (rather than hardcoded) only because the source config does.
    pub class: Class,
    pub max_records: usize,
    pub multicast_ttl: u8,
    pub port: u16,
}

impl Default for EngineConfig {
    fn default() -> EngineConfig {
        EngineConfig {
            class: Class::Internet,
            max_records: 1000,
            multicast_ttl: 1,
            port: MDNS_PORT,
        }
    }
}

impl EngineConfig {
    /// Sets the outbound multicast TTL, clamped to the range the
    /// platform socket API accepts (1..=255; spec.md section 6).
    pub fn with_multicast_ttl(mut self, ttl: u8) -> EngineConfig {
        self.multicast_ttl = crate::util::clamp(ttl, 1, 255);
        self
    }
}

/// A packet ready to go out, with its destination. The host is
/// responsible for actually calling `sendto`.
#[derive(Clone, Debug, PartialEq)]
pub struct Outbound {
    pub bytes: Vec<u8>,
    pub dest: SocketAddrV4,
}

const AGGREGATION_JITTER_MS: (u64, u64) = (20, 120);

struct PendingResponse {
    records: Vec<Record>,
    flush_at: Instant,
}

pub struct Engine {
    config: EngineConfig,
    address: Ipv4Addr,
    store: RecordStore,
    queries: QueryTracker,
    publisher: Publisher,
    outbound: VecDeque<Outbound>,
    receive_hooks: Vec<Box<dyn FnMut(&Record)>>,
    clock: Box<dyn Clock>,
    jitter: Box<dyn Jitter>,
    next_token: u64,
    pending: Option<PendingResponse>,
    next_wake: Instant,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Engine {
        Engine::with_deps(config, Box::new(SystemClock), Box::new(SystemJitter::new()))
    }

    /// Constructs an engine with injected `Clock`/`Jitter`, for tests
    /// that need deterministic timing (spec.md section 9).
    pub fn with_deps(config: EngineConfig, clock: Box<dyn Clock>, jitter: Box<dyn Jitter>) -> Engine {
        let now = clock.now();
        Engine {
            store: RecordStore::new(config.max_records),
            queries: QueryTracker::new(),
            publisher: Publisher::new(),
            outbound: VecDeque::new(),
            receive_hooks: Vec::new(),
            clock,
            jitter,
            next_token: 0,
            pending: None,
            next_wake: now,
            address: Ipv4Addr::UNSPECIFIED,
            config,
        }
    }

    pub fn set_address(&mut self, addr: Ipv4Addr) {
        self.address = addr;
    }

    /// The configuration this engine was constructed with, so the host
    /// can read `multicast_ttl`/`port` when setting up its socket
    /// (spec.md section 1: socket creation is the host's job).
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    fn alloc_token(&mut self) -> Token {
        self.next_token += 1;
        Token(self.next_token)
    }

    fn multicast_dest(&self) -> SocketAddrV4 {
        SocketAddrV4::new(MULTICAST_GROUP, self.config.port)
    }

    // ---- publication ----------------------------------------------------

    /// Adds a local record. Unique records (spec.md section 3: A, SRV,
    /// most TXT) probe before being announced; shared records (e.g.
    /// PTR) announce immediately. Per the resolved open question
    /// (spec.md section 9), every unique record probes unconditionally.
    pub fn publish(
        &mut self,
        record: Record,
        conflict_cb: impl FnMut(&crate::wire::Name, Type) + 'static,
    ) -> Result<Token, EngineError> {
        let token = self.alloc_token();
        let unique = record.is_unique();

        let inserted = self.store.insert_local(LocalRecord {
            record: record.clone(),
            unique,
            token,
        });
        if !inserted {
            return Err(EngineError::DuplicateRecord);
        }

        let now = self.clock.now();
        self.publisher.publish(
            token,
            record,
            unique,
            now,
            self.jitter.as_ref(),
            Box::new(conflict_cb),
        );

        Ok(token)
    }

    /// Schedules withdrawal: the record's next `step()` sends its
    /// goodbye (TTL=0) packet, after which it is removed from the
    /// store (spec.md section 6: `engine_withdraw`).
    pub fn withdraw(&mut self, token: Token) -> Result<(), EngineError> {
        let now = self.clock.now();
        if self.publisher.withdraw(token, now) {
            Ok(())
        } else {
            Err(EngineError::UnknownRecord(token))
        }
    }

    // ---- queries ----------------------------------------------------------

    pub fn query(
        &mut self,
        name: crate::wire::Name,
        qtype: Type,
        callback: impl FnMut(&Record) -> QueryControl + 'static,
    ) -> Token {
        let token = self.alloc_token();
        let now = self.clock.now();
        self.queries.register(
            token,
            name,
            qtype,
            now,
            self.jitter.as_ref(),
            Box::new(callback),
        );
        token
    }

    pub fn cancel_query(&mut self, token: Token) -> Result<(), EngineError> {
        self.queries
            .cancel(token)
            .map(|_| ())
            .ok_or(EngineError::UnknownQuery(token))
    }

    pub fn on_receive(&mut self, hook: impl FnMut(&Record) + 'static) {
        self.receive_hooks.push(Box::new(hook));
    }

    // ---- inbound ----------------------------------------------------------

    /// Injects one inbound datagram. Malformed packets are logged and
    /// dropped, never surfaced as an error (spec.md section 7).
    pub fn receive(&mut self, bytes: &[u8], source: SocketAddrV4) {
        let message = match Message::parse(bytes) {
            Ok(m) => m,
            Err(e) => {
                warn!("dropping malformed packet from {}: {}", source, e);
                return;
            }
        };

        if message.flags.qr == crate::wire::QR::Response {
            self.handle_response(message);
        } else {
            self.handle_query(message, source);
        }
    }

    fn handle_response(&mut self, message: Message) {
        let now = self.clock.now();

        for record in message.answers {
            for hook in self.receive_hooks.iter_mut() {
                hook(&record);
            }

            if let Some(&token) = self.probing_token(&record.name, record.r#type()).first() {
                self.publisher.check_conflict(token, &record.rdata_bytes(), false);
            }

            let result = self.store.insert_cached(record.clone(), now, self.jitter.as_ref());
            if let Some(evicted) = result.evicted {
                debug!("cache cap exceeded, evicted {}", evicted);
            }
            if result.is_new {
                self.queries.notify(&record);
            }
        }
    }

    fn handle_query(&mut self, message: Message, source: SocketAddrV4) {
        let now = self.clock.now();

        for record in &message.authorities {
            if let Some(&token) = self.probing_token(&record.name, record.r#type()).first() {
                self.publisher
                    .check_conflict(token, &record.rdata_bytes(), true);
            }
        }

        let known: HashSet<Vec<u8>> = message.answers.iter().map(|r| r.rdata_bytes()).collect();
        let is_legacy = source.port() != self.config.port;

        for question in &message.questions {
            let answers: Vec<Record> = self
                .publisher
                .iter_answerable(&question.name, question.qtype)
                .filter(|r| !known.contains(&r.rdata_bytes()))
                .cloned()
                .collect();

            if answers.is_empty() {
                continue;
            }

            if is_legacy || question.qu {
                let with_additional = self.with_additional_records(answers);
                let dest = if is_legacy {
                    source
                } else {
                    SocketAddrV4::new(*source.ip(), self.config.port)
                };
                let id = if is_legacy { message.id } else { 0 };
                self.send_response(with_additional, dest, id);
            } else {
                self.queue_pending(answers, now);
            }
        }
    }

    fn probing_token(&self, name: &crate::wire::Name, r#type: Type) -> Vec<Token> {
        self.publisher
            .iter()
            .filter(|(_, r)| r.is_probing() && r.record.name == *name && r.record.r#type() == r#type)
            .map(|(&t, _)| t)
            .collect()
    }

    fn queue_pending(&mut self, records: Vec<Record>, now: Instant) {
        let flush_at = now + self.jitter.jitter_ms(AGGREGATION_JITTER_MS.0, AGGREGATION_JITTER_MS.1);

        match &mut self.pending {
            Some(pending) => {
                for r in records {
                    if !pending.records.contains(&r) {
                        pending.records.push(r);
                    }
                }
            }
            None => {
                self.pending = Some(PendingResponse {
                    records,
                    flush_at,
                });
            }
        }
    }

    /// Expands SRV/PTR answers with their RFC 6763 section 12
    /// additional records: an SRV answer implies the A record for its
    /// target; a PTR answer implies the SRV and TXT of the pointed
    /// instance (applied once more to any SRV picked up this way, so
    /// a PTR answer also pulls in the target's A record).
    fn with_additional_records(&self, answers: Vec<Record>) -> (Vec<Record>, Vec<Record>) {
        let mut additional: Vec<Record> = Vec::new();
        let mut queue = answers.clone();

        while let Some(r) = queue.pop() {
            match &r.resource {
                Resource::SRV(srv) => {
                    for a in self.publisher.iter_answerable(&srv.target, Type::A) {
                        if !answers.contains(a) && !additional.contains(a) {
                            additional.push(a.clone());
                        }
                    }
                }
                Resource::PTR(instance) => {
                    for extra in self.publisher.iter_answerable(instance, Type::SRV) {
                        if !answers.contains(extra) && !additional.contains(extra) {
                            additional.push(extra.clone());
                            queue.push(extra.clone());
                        }
                    }
                    for extra in self.publisher.iter_answerable(instance, Type::TXT) {
                        if !answers.contains(extra) && !additional.contains(extra) {
                            additional.push(extra.clone());
                        }
                    }
                }
                _ => {}
            }
        }

        (answers, additional)
    }

    /// Serializes `answers`/`additional` as one or more response
    /// packets, each under `MAX_PACKET_LEN`. A record set that doesn't
    /// fit in one packet is split across several: the host keeps
    /// getting a packet back from every `next_outbound()` call until
    /// all of them have gone out (spec.md section 8, scenario 5).
    fn send_response(&mut self, (answers, additional): (Vec<Record>, Vec<Record>), dest: SocketAddrV4, id: u16) {
        let mut remaining = answers.as_slice();
        let mut first = true;

        loop {
            let mut message = Message::response(id);
            message.answers = remaining.to_vec();
            if first {
                message.additionals = additional.clone();
            }

            let (bytes, report) = message.serialize();
            if report.truncated {
                debug!(
                    "response to {} truncated: {}/{} answers written this packet",
                    dest,
                    report.answers_written,
                    remaining.len()
                );
            }
            self.outbound.push_back(Outbound { bytes, dest });

            if !report.truncated || report.answers_written == 0 {
                break;
            }
            remaining = &remaining[report.answers_written..];
            first = false;
        }
    }

    fn enqueue(&mut self, message: Message, dest: SocketAddrV4) {
        let (bytes, report) = message.serialize();
        if report.truncated {
            debug!(
                "response to {} truncated: {}/{} answers written",
                dest,
                report.answers_written,
                message.answers.len()
            );
        }
        self.outbound.push_back(Outbound { bytes, dest });
    }

    // ---- the step loop ------------------------------------------------

    /// Drains one pending outbound packet, if any.
    pub fn next_outbound(&mut self) -> Option<Outbound> {
        self.outbound.pop_front()
    }

    /// Begins the goodbye phase for every currently published record.
    /// `next_outbound` keeps returning goodbye packets until drained
    /// (spec.md section 6: `engine_shutdown`).
    pub fn shutdown(&mut self) {
        let now = self.clock.now();
        let tokens: Vec<Token> = self.publisher.iter().map(|(&t, _)| t).collect();
        for token in tokens {
            self.publisher.withdraw(token, now);
        }
    }

    /// Advances all timers: expires cache entries, fires due
    /// probes/announces/goodbyes, retransmits due queries, flushes any
    /// aggregated responses, and returns the next deadline this
    /// engine needs to be driven again.
    pub fn step(&mut self, now: Instant) -> Instant {
        for expired in self.store.expire_cached(now) {
            debug!("expired cached record {}", expired);
        }

        for (name, qtype) in self.store.poll_refresh(now) {
            self.queries.force_due(&name, qtype, now);
        }

        self.drive_publisher(now);
        self.drive_queries(now);
        self.flush_pending(now);

        let next = [
            self.store.next_deadline(),
            self.store.next_refresh_deadline(),
            self.queries.next_deadline(),
            self.publisher.next_deadline(),
            self.pending.as_ref().map(|p| p.flush_at),
        ]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(now + Duration::from_secs(3600));

        self.next_wake = next;
        next
    }

    fn drive_publisher(&mut self, now: Instant) {
        for token in self.publisher.due(now) {
            let record = match self.publisher.get(token) {
                Some(r) => r.record.clone(),
                None => continue,
            };

            let action = match self.publisher.advance(token, now) {
                Some(a) => a,
                None => continue,
            };

            match action {
                PublishAction::SendProbe => {
                    let mut message = Message::query(0);
                    message.questions.push(Question::new(record.name.clone(), record.r#type()));
                    message.authorities.push(record);
                    self.enqueue(message, self.multicast_dest());
                }
                PublishAction::SendAnnounce => {
                    let mut record = record;
                    record.cache_flush = true;
                    let mut message = Message::response(0);
                    message.answers.push(record);
                    self.enqueue(message, self.multicast_dest());
                }
                PublishAction::SendGoodbye => {
                    let mut record = record;
                    record.ttl = Duration::ZERO;
                    let mut message = Message::response(0);
                    message.answers.push(record);
                    self.enqueue(message, self.multicast_dest());
                    self.store.remove_local(token);
                }
            }
        }
    }

    fn drive_queries(&mut self, now: Instant) {
        for token in self.queries.due(now) {
            let Some(query) = self.queries.get(token) else {
                continue;
            };
            let name = query.name.clone();
            let qtype = query.qtype;

            let mut message = Message::query(0);
            message.questions.push(Question::new(name.clone(), qtype));
            message.answers = self.queries.known_answers(token, &self.store, now);
            self.enqueue(message, self.multicast_dest());
        }
    }

    fn flush_pending(&mut self, now: Instant) {
        let Some(pending) = &self.pending else {
            return;
        };
        if pending.flush_at > now {
            return;
        }

        let pending = self.pending.take().unwrap();
        let with_additional = self.with_additional_records(pending.records);
        self.send_response(with_additional, self.multicast_dest(), 0);
    }

    /// How long until anything needs to happen, without mutating any
    /// state (spec.md section 6: `engine_sleep`).
    pub fn sleep_duration(&self, now: Instant) -> Duration {
        self.next_wake.saturating_duration_since(now)
    }
}
