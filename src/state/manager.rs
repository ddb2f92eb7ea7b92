// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The state manager: authoritative maps for clients, sessions and
//! connection bindings, plus the lease reaper.
//!
//! Lock ordering, everywhere in this crate: **state lock, then connection
//! writer mutex, then slot-table lock**. The state lock is only ever held
//! for map mutations and snapshot reads; no network I/O and no `.await`
//! happens under it.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use bytes::Bytes;
use rand::RngExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    cfg::config::Config,
    metrics::{self, MetricsSink},
    models::{
        common::{ClientId, ConnectionId, SessionId},
        sequence::{SeqStatusFlags, SequenceArgs},
        session_ops::{
            CallbackSecParms, ChannelAttrs, CreateSessionArgs, CreateSessionFlags,
            ExchangeIdArgs, ExchgIdFlags,
        },
        status::NfsStat,
    },
    server::connection::ServerConnection,
    state::{
        binding::{BoundConnection, ConnDirection},
        client::{ClientRecord, MinorVersion},
        session::Session,
        slot::{SequenceDisposition, SlotTable},
    },
    utils,
};

/// Dial-out recall path for v4.0 clients. The v4.0 callback wire protocol
/// is outside this core; registering an implementation is optional.
pub trait DialOutRecall: Send + Sync {
    fn recall(
        &self,
        client: ClientId,
        stateid: crate::models::common::StateId,
        fh: crate::models::common::FileHandle,
        truncate: bool,
    );
}

#[derive(Default)]
struct StateTables {
    clients_by_short_id: HashMap<ClientId, ClientRecord>,
    clients_by_long_id: HashMap<Bytes, ClientId>,
    sessions_by_id: HashMap<SessionId, Arc<Session>>,
    connections_by_id: HashMap<ConnectionId, BoundConnection>,
    connections_by_session: HashMap<SessionId, HashSet<ConnectionId>>,
    connections_by_client: HashMap<ClientId, HashSet<ConnectionId>>,
}

/// What SEQUENCE resolved to. `New` carries everything the dispatcher
/// needs to build the result and complete the slot afterwards.
#[derive(Debug)]
pub enum SequenceOutcome {
    New {
        session: Arc<Session>,
        sequenceid: u32,
        slotid: u32,
        highest_slotid: u32,
        target_highest_slotid: u32,
        status_flags: SeqStatusFlags,
        cachethis: bool,
    },
    Replay(Bytes),
    Reject(NfsStat),
}

pub struct StateManager {
    cfg: Config,
    metrics: Arc<dyn MetricsSink>,
    tables: Mutex<StateTables>,
    next_client_id: AtomicU64,
    server_major_id: Bytes,
    server_scope: Bytes,
    dial_out: Mutex<Option<Arc<dyn DialOutRecall>>>,
    cancel: CancellationToken,
    draining: std::sync::atomic::AtomicBool,
}

impl std::fmt::Debug for StateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateManager").finish_non_exhaustive()
    }
}

impl StateManager {
    pub fn new(cfg: Config, metrics: Arc<dyn MetricsSink>) -> Arc<Self> {
        let scope = format!("nfs41-server-rs/{}", env!("CARGO_PKG_VERSION"));
        Arc::new(Self {
            cfg,
            metrics,
            tables: Mutex::new(StateTables::default()),
            // Seed the short-id space randomly so ids from a previous
            // incarnation are not accidentally honoured.
            next_client_id: AtomicU64::new(rand::rng().random::<u32>() as u64),
            server_major_id: Bytes::from(scope.clone().into_bytes()),
            server_scope: Bytes::from(scope.into_bytes()),
            dial_out: Mutex::new(None),
            cancel: CancellationToken::new(),
            draining: std::sync::atomic::AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    #[inline]
    pub fn metrics(&self) -> &Arc<dyn MetricsSink> {
        &self.metrics
    }

    #[inline]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    #[inline]
    pub fn server_major_id(&self) -> Bytes {
        self.server_major_id.clone()
    }

    #[inline]
    pub fn server_scope(&self) -> Bytes {
        self.server_scope.clone()
    }

    pub fn set_dial_out(&self, dial_out: Arc<dyn DialOutRecall>) {
        *self.dial_out.lock().expect("state poisoned") = Some(dial_out);
    }

    // ---- connection lifecycle ----

    pub fn register_connection(&self, conn: Arc<ServerConnection>) {
        let mut t = self.tables.lock().expect("state poisoned");
        let id = conn.id;
        t.connections_by_id.insert(id, BoundConnection::new(id, conn));
        debug!(conn = id, "connection registered");
    }

    pub fn remove_connection(&self, conn_id: ConnectionId) {
        let mut t = self.tables.lock().expect("state poisoned");
        t.connections_by_id.remove(&conn_id);
        for set in t.connections_by_session.values_mut() {
            set.remove(&conn_id);
        }
        for set in t.connections_by_client.values_mut() {
            set.remove(&conn_id);
        }
        self.metrics.incr(metrics::CONNS_UNBOUND, 1);
        debug!(conn = conn_id, "connection removed");
    }

    pub fn touch_connection(&self, conn_id: ConnectionId) {
        let mut t = self.tables.lock().expect("state poisoned");
        if let Some(bc) = t.connections_by_id.get_mut(&conn_id) {
            bc.last_activity = Instant::now();
        }
    }

    /// Strip the back-channel capability from a connection the sender
    /// observed failing, so the next attempt fails over — but only while
    /// the session still has an alternate back path. A lone connection is
    /// kept; it may just be slow, and the retry budget covers it.
    pub fn demote_backchannel(&self, conn_id: ConnectionId, session_id: &SessionId) {
        let mut t = self.tables.lock().expect("state poisoned");
        let has_alternate = t
            .connections_by_session
            .get(session_id)
            .is_some_and(|conns| {
                conns
                    .iter()
                    .filter(|id| **id != conn_id)
                    .filter_map(|id| t.connections_by_id.get(id))
                    .any(|bc| bc.direction.includes_back() && !bc.draining)
            });
        if !has_alternate {
            return;
        }
        if let Some(bc) = t.connections_by_id.get_mut(&conn_id) {
            bc.direction = bc.direction.without_back();
            warn!(conn = conn_id, "backchannel demoted after send failure");
        }
    }

    /// Pick the liveliest back-capable connection bound to the session.
    pub fn pick_back_connection(
        &self,
        session_id: &SessionId,
    ) -> Option<(ConnectionId, Arc<ServerConnection>)> {
        let t = self.tables.lock().expect("state poisoned");
        let bound = t.connections_by_session.get(session_id)?;
        bound
            .iter()
            .filter_map(|id| t.connections_by_id.get(id))
            .filter(|bc| bc.direction.includes_back() && !bc.draining)
            .max_by_key(|bc| bc.last_activity)
            .map(|bc| (bc.id, Arc::clone(&bc.conn)))
    }

    fn bind_connection_locked(
        t: &mut StateTables,
        conn_id: ConnectionId,
        client: ClientId,
        session_id: SessionId,
        dir: ConnDirection,
    ) {
        if let Some(bc) = t.connections_by_id.get_mut(&conn_id) {
            bc.direction = bc.direction.merge(dir);
        }
        t.connections_by_session
            .entry(session_id)
            .or_default()
            .insert(conn_id);
        t.connections_by_client
            .entry(client)
            .or_default()
            .insert(conn_id);
    }

    // ---- client registry ----

    /// EXCHANGE_ID: create or rebind a client record.
    pub fn exchange_id(
        &self,
        args: &ExchangeIdArgs,
    ) -> Result<(ClientId, u32, ExchgIdFlags), NfsStat> {
        let mut t = self.tables.lock().expect("state poisoned");
        let lease = self.cfg.lease();

        if let Some(&short_id) = t.clients_by_long_id.get(&args.ownerid) {
            let same_incarnation = {
                let record = t
                    .clients_by_short_id
                    .get_mut(&short_id)
                    .expect("long-id index points at missing client");
                if record.verifier == args.verifier {
                    // Same incarnation coming back, possibly over a new
                    // connection. Keep its state.
                    record.renew_lease(lease);
                    let mut flags = ExchgIdFlags::USE_NON_PNFS;
                    if record.confirmed {
                        flags |= ExchgIdFlags::CONFIRMED_R;
                    }
                    Some((short_id, record.create_session_seq, flags))
                } else {
                    None
                }
            };
            if let Some(res) = same_incarnation {
                return Ok(res);
            }
            // Client rebooted: discard the previous incarnation.
            info!(client = short_id, "exchange_id verifier changed, evicting old state");
            let sessions: Vec<SessionId> = t
                .clients_by_short_id
                .get(&short_id)
                .map(|r| r.sessions.iter().copied().collect())
                .unwrap_or_default();
            for sid in sessions {
                Self::destroy_session_locked(&mut t, &self.metrics, &sid);
            }
            t.clients_by_short_id.remove(&short_id);
            t.clients_by_long_id.remove(&args.ownerid);
            t.connections_by_client.remove(&short_id);
        }

        let short_id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let record = ClientRecord::new(
            short_id,
            args.ownerid.clone(),
            args.verifier,
            args.impl_id.clone(),
            lease,
        );
        t.clients_by_long_id.insert(args.ownerid.clone(), short_id);
        t.clients_by_short_id.insert(short_id, record);
        debug!(client = short_id, "client registered (unconfirmed)");
        Ok((short_id, 1, ExchgIdFlags::USE_NON_PNFS))
    }

    /// Register a v4.0 client for callback routing. The v4.0 wire path
    /// does not come through EXCHANGE_ID; the SETCLIENTID handler family
    /// (outside this core) calls this to fix the version tag.
    pub fn register_v40_client(&self, long_id: Bytes, verifier: [u8; 8]) -> ClientId {
        let mut t = self.tables.lock().expect("state poisoned");
        let short_id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let mut record =
            ClientRecord::new(short_id, long_id.clone(), verifier, None, self.cfg.lease());
        record.minor = MinorVersion::V40;
        record.confirmed = true;
        t.clients_by_long_id.insert(long_id, short_id);
        t.clients_by_short_id.insert(short_id, record);
        short_id
    }

    pub fn client_minor_version(&self, client: ClientId) -> Option<MinorVersion> {
        let t = self.tables.lock().expect("state poisoned");
        t.clients_by_short_id.get(&client).map(|c| c.minor)
    }

    pub fn renew_v41_lease(&self, client: ClientId) {
        let mut t = self.tables.lock().expect("state poisoned");
        if let Some(record) = t.clients_by_short_id.get_mut(&client) {
            record.renew_lease(self.cfg.lease());
        }
    }

    pub fn destroy_clientid(&self, client: ClientId) -> NfsStat {
        let mut t = self.tables.lock().expect("state poisoned");
        match t.clients_by_short_id.get(&client) {
            None => NfsStat::StaleClientid,
            Some(record) if !record.sessions.is_empty() => NfsStat::ClientidBusy,
            Some(record) => {
                let long_id = record.long_id.clone();
                t.clients_by_short_id.remove(&client);
                t.clients_by_long_id.remove(&long_id);
                t.connections_by_client.remove(&client);
                NfsStat::Ok
            },
        }
    }

    // ---- session registry ----

    /// CREATE_SESSION. Binds the RPC-carrying connection in the direction
    /// implied by the flags. Returns the negotiated attrs.
    #[allow(clippy::type_complexity)]
    pub fn create_session(
        &self,
        conn_id: ConnectionId,
        args: &CreateSessionArgs,
    ) -> Result<(Arc<Session>, u32, CreateSessionFlags, ChannelAttrs, ChannelAttrs), NfsStat>
    {
        if self.draining.load(Ordering::Relaxed) {
            return Err(NfsStat::Delay);
        }
        let mut t = self.tables.lock().expect("state poisoned");
        let limits = &self.cfg.sessions;

        let record = t
            .clients_by_short_id
            .get_mut(&args.clientid)
            .ok_or(NfsStat::StaleClientid)?;
        record.renew_lease(self.cfg.lease());
        record.confirmed = true;
        record.create_session_seq = args.sequence.wrapping_add(1);

        let client = record.short_id;
        let want_back = args.flags.contains(CreateSessionFlags::CONN_BACK_CHAN);

        let fore_attrs = clamp_attrs(&args.fore_attrs, limits.max_fore_slots, limits);
        let back_attrs = clamp_attrs(&args.back_attrs, limits.max_back_slots, limits);

        let session_id = utils::generate_session_id();
        let mut flags = args.flags & CreateSessionFlags::CONN_BACK_CHAN;
        flags.remove(CreateSessionFlags::PERSIST); // no persistent reply cache

        let session = Arc::new(Session::new(
            session_id,
            client,
            flags,
            SlotTable::new(fore_attrs.maxrequests),
            want_back.then(|| SlotTable::new(back_attrs.maxrequests)),
            args.cb_program,
            args.sec_parms.clone(),
        ));

        t.clients_by_short_id
            .get_mut(&client)
            .expect("client vanished under lock")
            .sessions
            .insert(session_id);
        t.sessions_by_id.insert(session_id, Arc::clone(&session));

        let dir = if want_back {
            ConnDirection::Both
        } else {
            ConnDirection::Fore
        };
        Self::bind_connection_locked(&mut t, conn_id, client, session_id, dir);

        self.metrics.incr(metrics::SESSIONS_CREATED, 1);
        self.metrics.incr(metrics::CONNS_BOUND, 1);
        info!(client, session = ?session_id, "session created");
        Ok((session, args.sequence, flags, fore_attrs, back_attrs))
    }

    pub fn get_session(&self, session_id: &SessionId) -> Option<Arc<Session>> {
        let t = self.tables.lock().expect("state poisoned");
        t.sessions_by_id.get(session_id).cloned()
    }

    /// DESTROY_SESSION. Idempotent: destroying an unknown session is a
    /// successful no-op.
    pub fn destroy_session(&self, session_id: &SessionId) -> NfsStat {
        let mut t = self.tables.lock().expect("state poisoned");
        Self::destroy_session_locked(&mut t, &self.metrics, session_id);
        NfsStat::Ok
    }

    fn destroy_session_locked(
        t: &mut StateTables,
        metrics_sink: &Arc<dyn MetricsSink>,
        session_id: &SessionId,
    ) {
        let Some(session) = t.sessions_by_id.remove(session_id) else {
            return;
        };
        if let Some(handle) = session.backchannel.get() {
            handle.shutdown();
        }
        if let Some(record) = t.clients_by_short_id.get_mut(&session.client) {
            record.sessions.remove(session_id);
        }
        t.connections_by_session.remove(session_id);
        metrics_sink.incr(metrics::SESSIONS_DESTROYED, 1);
        info!(session = ?session_id, "session destroyed");
    }

    /// BIND_CONN_TO_SESSION with direction negotiation.
    pub fn bind_conn_to_session(
        &self,
        conn_id: ConnectionId,
        session_id: &SessionId,
        requested_dir: u32,
    ) -> Result<ConnDirection, NfsStat> {
        let mut t = self.tables.lock().expect("state poisoned");
        let session = t
            .sessions_by_id
            .get(session_id)
            .cloned()
            .ok_or(NfsStat::BadSession)?;
        let Some(dir) = ConnDirection::negotiate(requested_dir) else {
            return Err(NfsStat::Inval);
        };
        // A session without a back channel cannot grant BACK.
        let dir = if session.has_backchannel() {
            dir
        } else {
            ConnDirection::Fore
        };
        match t.connections_by_id.get(&conn_id) {
            None => return Err(NfsStat::ServerFault),
            Some(bc) if bc.draining => return Err(NfsStat::Delay),
            Some(_) => {},
        }
        Self::bind_connection_locked(&mut t, conn_id, session.client, *session_id, dir);
        self.metrics.incr(metrics::CONNS_BOUND, 1);
        Ok(dir)
    }

    /// BACKCHANNEL_CTL: replace the callback program and security params.
    pub fn backchannel_ctl(
        &self,
        session_id: &SessionId,
        cb_program: u32,
        sec_parms: Vec<CallbackSecParms>,
    ) -> NfsStat {
        let Some(session) = self.get_session(session_id) else {
            return NfsStat::BadSession;
        };
        if !session.has_backchannel() {
            return NfsStat::Inval;
        }
        // AUTH_NONE, AUTH_SYS and RPCSEC_GSS are all acceptable flavors;
        // an empty offer leaves nothing to send callbacks with.
        if sec_parms.is_empty() {
            return NfsStat::EncrAlgUnsupp;
        }
        // GSS contexts are validated lazily, on the first send that uses
        // them.
        session.replace_security(cb_program, sec_parms);
        NfsStat::Ok
    }

    // ---- SEQUENCE ----

    /// Resolve a SEQUENCE against the session's fore-channel slot table,
    /// renewing the lease and computing status flags on the new-request
    /// path.
    pub fn sequence_begin(
        &self,
        conn_id: ConnectionId,
        args: &SequenceArgs,
    ) -> SequenceOutcome {
        let Some(session) = self.get_session(&args.sessionid) else {
            self.metrics.incr(metrics::SEQ_BAD_SESSION, 1);
            return SequenceOutcome::Reject(NfsStat::BadSession);
        };

        match session.fore.validate_sequence(args.slotid, args.sequenceid) {
            SequenceDisposition::Reject(stat) => {
                self.metrics.incr(
                    match stat {
                        NfsStat::BadSlot => metrics::SEQ_BAD_SLOT,
                        NfsStat::Delay => metrics::SEQ_DELAY,
                        NfsStat::RetryUncachedRep => metrics::SEQ_RETRY_UNCACHED,
                        _ => metrics::SEQ_MISORDERED,
                    },
                    1,
                );
                SequenceOutcome::Reject(stat)
            },
            SequenceDisposition::Replay(bytes) => {
                self.metrics.incr(metrics::SEQ_REPLAY, 1);
                SequenceOutcome::Replay(bytes)
            },
            SequenceDisposition::New => {
                self.metrics.incr(metrics::SEQ_NEW, 1);
                self.renew_v41_lease(session.client);
                // SEQUENCE over a connection the session has never seen
                // implicitly binds it fore-channel.
                {
                    let mut t = self.tables.lock().expect("state poisoned");
                    Self::bind_connection_locked(
                        &mut t,
                        conn_id,
                        session.client,
                        args.sessionid,
                        ConnDirection::Fore,
                    );
                }
                let status_flags = self.status_flags_for(&session);
                self.metrics.gauge(
                    metrics::SLOTS_IN_USE,
                    session.fore.in_use_count() as i64,
                );
                self.metrics.gauge(
                    metrics::REPLAY_CACHE_BYTES,
                    session.cached_reply_bytes() as i64,
                );
                SequenceOutcome::New {
                    sequenceid: args.sequenceid,
                    slotid: args.slotid,
                    highest_slotid: session.fore.highest_slotid(),
                    target_highest_slotid: session.fore.target_highest_slotid(),
                    status_flags,
                    cachethis: args.cachethis,
                    session,
                }
            },
        }
    }

    /// Compute `sa_status_flags` for a session from current state.
    pub fn status_flags_for(&self, session: &Session) -> SeqStatusFlags {
        let mut flags = SeqStatusFlags::empty();
        if session.backchannel_fault() {
            flags |= SeqStatusFlags::BACKCHANNEL_FAULT;
        }
        let t = self.tables.lock().expect("state poisoned");
        let client_conns = t.connections_by_client.get(&session.client);
        let back_path_up = client_conns.is_some_and(|conns| {
            conns
                .iter()
                .filter_map(|id| t.connections_by_id.get(id))
                .any(|bc| bc.direction.includes_back() && !bc.draining)
        });
        // Only meaningful for clients that asked for a backchannel at all.
        if session.has_backchannel() && !back_path_up {
            flags |= SeqStatusFlags::CB_PATH_DOWN;
        }
        if let Some(record) = t.clients_by_short_id.get(&session.client)
            && record.lease_expired(Instant::now())
        {
            flags |= SeqStatusFlags::EXPIRED_SOME_STATE_REVOKED;
        }
        flags
    }

    pub fn set_backchannel_fault(&self, session_id: &SessionId, faulted: bool) {
        if let Some(session) = self.get_session(session_id) {
            session.set_backchannel_fault(faulted);
        }
    }

    /// Choose the session that should carry a callback to this client:
    /// back-channel-capable, preferring one with a live back-bound
    /// connection.
    pub fn session_for_recall(&self, client: ClientId) -> Option<Arc<Session>> {
        let t = self.tables.lock().expect("state poisoned");
        let record = t.clients_by_short_id.get(&client)?;
        let mut fallback = None;
        for sid in &record.sessions {
            let Some(session) = t.sessions_by_id.get(sid) else {
                continue;
            };
            if !session.has_backchannel() {
                continue;
            }
            let has_back_conn = t
                .connections_by_session
                .get(sid)
                .is_some_and(|conns| {
                    conns
                        .iter()
                        .filter_map(|id| t.connections_by_id.get(id))
                        .any(|bc| bc.direction.includes_back() && !bc.draining)
                });
            if has_back_conn {
                return Some(Arc::clone(session));
            }
            fallback.get_or_insert_with(|| Arc::clone(session));
        }
        fallback
    }

    // ---- lease reaper / shutdown ----

    /// Evict every client whose lease deadline passed. Returns the number
    /// of evicted clients; exposed for tests.
    pub fn reap_expired_clients(&self) -> usize {
        let now = Instant::now();
        let mut t = self.tables.lock().expect("state poisoned");
        let expired: Vec<ClientId> = t
            .clients_by_short_id
            .values()
            .filter(|c| c.lease_expired(now))
            .map(|c| c.short_id)
            .collect();
        for client in &expired {
            let Some(record) = t.clients_by_short_id.remove(client) else {
                continue;
            };
            warn!(client, "lease expired, evicting client");
            for sid in &record.sessions {
                Self::destroy_session_locked(&mut t, &self.metrics, sid);
            }
            t.clients_by_long_id.remove(&record.long_id);
            t.connections_by_client.remove(client);
            self.metrics.incr(metrics::CLIENTS_EVICTED, 1);
            // Releasing the client's file state (opens, locks,
            // delegations) is the state collaborator's job.
        }
        expired.len()
    }

    /// Background task scanning for expired leases until cancelled.
    pub fn spawn_reaper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        let cancel = self.cancel.clone();
        let interval = self.cfg.reaper_interval();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        manager.reap_expired_clients();
                    },
                }
            }
            debug!("lease reaper stopped");
        })
    }

    /// Graceful shutdown: refuse new bindings, stop senders and reaper.
    pub fn drain(&self) {
        self.draining.store(true, Ordering::Relaxed);
        {
            let mut t = self.tables.lock().expect("state poisoned");
            for bc in t.connections_by_id.values_mut() {
                bc.draining = true;
            }
            for session in t.sessions_by_id.values() {
                if let Some(handle) = session.backchannel.get() {
                    handle.shutdown();
                }
            }
        }
        self.cancel.cancel();
    }

    pub fn dial_out_recall(
        &self,
        client: ClientId,
        stateid: crate::models::common::StateId,
        fh: crate::models::common::FileHandle,
        truncate: bool,
    ) -> bool {
        let dial_out = self.dial_out.lock().expect("state poisoned").clone();
        match dial_out {
            Some(d) => {
                d.recall(client, stateid, fh, truncate);
                true
            },
            None => false,
        }
    }
}

/// Clamp client-proposed channel attributes to server limits.
fn clamp_attrs(
    proposed: &ChannelAttrs,
    max_slots: u32,
    limits: &crate::cfg::config::SessionLimits,
) -> ChannelAttrs {
    ChannelAttrs {
        headerpadsize: 0,
        maxrequestsize: proposed.maxrequestsize.min(limits.max_request_bytes),
        maxresponsesize: proposed.maxresponsesize.min(limits.max_request_bytes),
        maxresponsesize_cached: proposed
            .maxresponsesize_cached
            .min(limits.max_request_bytes),
        maxoperations: proposed
            .maxoperations
            .min(crate::models::compound::MAX_OPS_PER_COMPOUND),
        maxrequests: proposed.maxrequests.clamp(1, max_slots.max(1)),
    }
}
