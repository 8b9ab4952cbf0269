use std::{
  sync::{Arc, Mutex},
  thread,
  time::Duration as StdDuration,
};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use mio::{Events, Poll, PollOpt, Ready};
use mio_extras::{channel as mio_channel, timer::Timer};
use speedy::Endianness;

use crate::{
  discovery::{
    edp::EndpointDiscovery,
    participant_data::{
      builtin_endpoint_set, ParticipantProxyData, DS_VERSION_CURRENT, DS_VERSION_PROPERTY_NAME,
    },
    proxy_db::ProxyDb,
    server_list::RemoteServer,
  },
  error::{Error, Result},
  liveliness::Wlp,
  network::udp_sender::UdpSender,
  rtps::{
    constant::{
      CLIENT_SYNC_PERIOD_DEFAULT, PARTICIPANT_LEASE_DURATION_DEFAULT,
      PDP_COMMAND_TOKEN, PDP_INITIAL_RESERVED_CACHES, PDP_LEASE_TOKEN,
      PDP_PARTICIPANT_DATA_TOKEN, PDP_CLIENT_SYNC_TOKEN, PDP_READER_PAYLOAD_SIZE,
    },
    message::MessageBuilder,
    reader::{ReaderConfig, ReaderCore, ReaderListener, ReaderProxyData, WriterProxyData},
    stateful_reader::StatefulReader,
    writer::{StatefulWriter, WriterConfig},
  },
  structure::{
    cache_change::{CacheChange, ChangeKind},
    duration::Duration,
    guid::{EntityId, GuidPrefix, GUID},
    locator::Locator,
    payload_pool::BytesPool,
    qos::{DurabilityKind, LivelinessKind, ReliabilityKind},
    time::Timestamp,
  },
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DiscoveryProtocol {
  Simple,
  Client,
  SuperClient,
  Server,
  Backup,
}

/// Flow-control settings for the metatraffic writer. Configuring one moves
/// the writer to asynchronous mode.
#[derive(Copy, Clone, Debug)]
pub struct ThroughputController {
  pub bytes_per_period: u32,
  pub period: StdDuration,
}

#[derive(Clone, Debug)]
pub struct DiscoveryConfig {
  pub protocol: DiscoveryProtocol,
  pub client_sync_period: StdDuration,
  pub lease_duration: Duration,
  /// Advertise publication announcer + subscription detector endpoints.
  pub publication_writer_and_subscription_reader: bool,
  /// Advertise publication detector + subscription announcer endpoints.
  pub publication_reader_and_subscription_writer: bool,
  pub throughput_controller: Option<ThroughputController>,
}

impl Default for DiscoveryConfig {
  fn default() -> Self {
    Self {
      protocol: DiscoveryProtocol::Client,
      client_sync_period: CLIENT_SYNC_PERIOD_DEFAULT,
      lease_duration: Duration::from(PARTICIPANT_LEASE_DURATION_DEFAULT),
      publication_writer_and_subscription_reader: true,
      publication_reader_and_subscription_writer: true,
      throughput_controller: None,
    }
  }
}

/// Identity and locators of the local participant, provided by the hosting
/// participant implementation.
#[derive(Clone, Debug)]
pub struct ParticipantAttributes {
  pub guid_prefix: GuidPrefix,
  pub domain_id: u16,
  pub participant_id: u16,
  pub metatraffic_unicast_locators: Vec<Locator>,
  pub metatraffic_multicast_locators: Vec<Locator>,
  pub default_unicast_locators: Vec<Locator>,
  pub default_multicast_locators: Vec<Locator>,
}

#[derive(Debug)]
pub enum PdpCommand {
  Stop,
  AnnounceNow,
  RestartSync,
}

/// Handle for stopping the engine's event loop from any thread. Replaces
/// process-global stop flags: whoever holds the signal decides.
#[derive(Clone)]
pub struct ShutdownSignal {
  sender: mio_channel::SyncSender<PdpCommand>,
}

impl ShutdownSignal {
  pub fn stop(&self) {
    if self.sender.try_send(PdpCommand::Stop).is_err() {
      debug!("PDP event loop is already gone");
    }
  }
}

/// Receiving ends of the engine's channels, consumed by `event_loop`.
pub struct PdpEventQueue {
  command_receiver: mio_channel::Receiver<PdpCommand>,
  data_receiver: mio_channel::Receiver<CacheChange>,
}

/// Listener on the PDP reader: forwards accepted `DATA(p)` samples into the
/// engine's event loop. Runs on the transport thread with the reader lock
/// held, so it only does a channel send.
struct PdpListener {
  sender: Mutex<mio_channel::SyncSender<CacheChange>>,
}

impl ReaderListener for PdpListener {
  fn on_new_cache_change(&self, _reader_guid: GUID, change: &CacheChange) {
    let sender = self.sender.lock().unwrap_or_else(|p| p.into_inner());
    if let Err(e) = sender.try_send(change.clone()) {
      warn!("PDP listener could not queue participant data: {:?}", e);
    }
  }
}

struct PdpInner {
  servers: Vec<RemoteServer>,
  proxies: ProxyDb,
  /// The next periodic announcement should multicast-probe servers that
  /// have not replied yet.
  server_ping: bool,
  /// The client-sync event keeps rescheduling itself.
  sync_active: bool,
}

/// Client-side Participant Discovery engine for Discovery Server
/// topologies.
///
/// Instead of multicast SPDP, the engine opens a reliable unicast channel
/// to each configured server, publishes the local participant's `DATA(p)`
/// and consumes the proxy data the servers redistribute.
///
/// Lock ordering: the PDP writer's mutex is always acquired before the
/// engine's `inner` mutex (see `announce_participant_state`); the engine
/// mutex is never held across calls into readers, the writer, EDP or WLP.
pub struct PdpClient {
  guid: GUID,
  attributes: ParticipantAttributes,
  config: DiscoveryConfig,
  super_client: bool,
  writer: Arc<StatefulWriter>,
  reader: Arc<StatefulReader>,
  udp_sender: Arc<UdpSender>,
  edp: Arc<dyn EndpointDiscovery>,
  wlp: Option<Arc<Wlp>>,
  inner: Mutex<PdpInner>,
  // scratch endpoint descriptors, never held across I/O
  temp_writer_data: Mutex<WriterProxyData>,
  temp_reader_data: Mutex<ReaderProxyData>,
  command_sender: Mutex<mio_channel::SyncSender<PdpCommand>>,
}

impl PdpClient {
  /// Create the engine: build the reliable PDP endpoint pair, match every
  /// configured server on both directions and announce the local
  /// participant. Fails fatally when endpoint creation fails; nothing
  /// partially built survives an error.
  pub fn new(
    attributes: ParticipantAttributes,
    config: DiscoveryConfig,
    servers: Vec<RemoteServer>,
    edp: Arc<dyn EndpointDiscovery>,
    wlp: Option<Arc<Wlp>>,
  ) -> Result<(Arc<Self>, PdpEventQueue, ShutdownSignal)> {
    let super_client = match config.protocol {
      DiscoveryProtocol::Client => false,
      DiscoveryProtocol::SuperClient => true,
      other => {
        error!(
          "using a PDP client engine with discovery protocol {:?}; continuing as CLIENT",
          other
        );
        false
      }
    };

    if servers.is_empty() {
      return Err(Error::config("a discovery client needs at least one server"));
    }

    let guid = GUID::new(attributes.guid_prefix, EntityId::PARTICIPANT);

    let udp_sender = Arc::new(
      UdpSender::new().map_err(|e| Error::fatal(format!("cannot create UDP sender: {}", e)))?,
    );

    let (data_sender, data_receiver) = mio_channel::sync_channel::<CacheChange>(64);
    let (command_sender, command_receiver) = mio_channel::sync_channel::<PdpCommand>(16);

    debug!("beginning PDP client endpoint creation");

    let mut reader_config = ReaderConfig::new(GUID::new(
      attributes.guid_prefix,
      EntityId::SPDP_BUILTIN_PARTICIPANT_READER,
    ));
    reader_config.reliability = ReliabilityKind::Reliable;
    reader_config.durability = DurabilityKind::TransientLocal;
    reader_config.expects_inline_qos = false;
    reader_config.trusted_writer_entity_id = Some(EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER);
    reader_config.liveliness_kind = LivelinessKind::Automatic;
    let reader = Arc::new(StatefulReader::new(
      reader_config,
      BytesPool::with_max_payload(
        "pdp-reader",
        PDP_INITIAL_RESERVED_CACHES,
        PDP_READER_PAYLOAD_SIZE,
      ),
      Some(Arc::new(PdpListener {
        sender: Mutex::new(data_sender),
      })),
    ));

    let mut writer_config = WriterConfig::pdp(GUID::new(
      attributes.guid_prefix,
      EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER,
    ));
    writer_config.asynchronous = config.throughput_controller.is_some();
    let writer = Arc::new(StatefulWriter::new(writer_config, udp_sender.clone()));

    debug!("PDP client endpoint creation finished");

    if !edp.init(&config) {
      return Err(Error::fatal("endpoint discovery configuration failed"));
    }

    let client = Arc::new(Self {
      guid,
      attributes,
      config,
      super_client,
      writer,
      reader,
      udp_sender,
      edp,
      wlp,
      inner: Mutex::new(PdpInner {
        servers,
        proxies: ProxyDb::new(),
        server_ping: false,
        sync_active: true,
      }),
      temp_writer_data: Mutex::new(WriterProxyData::default()),
      temp_reader_data: Mutex::new(ReaderProxyData::default()),
      command_sender: Mutex::new(command_sender.clone()),
    });

    // initial peer lists make no sense for a client: match the servers
    for server in client.servers() {
      client.match_pdp_writer(&server);
      client.match_pdp_reader(&server);
    }

    // the local DATA(p) must sit in the writer history before anything can
    // be acknowledged
    client.announce_participant_state(true, false);

    Ok((
      client,
      PdpEventQueue {
        command_receiver,
        data_receiver,
      },
      ShutdownSignal {
        sender: command_sender,
      },
    ))
  }

  fn lock_inner(&self) -> std::sync::MutexGuard<'_, PdpInner> {
    self.inner.lock().unwrap_or_else(|p| p.into_inner())
  }

  pub fn guid(&self) -> GUID {
    self.guid
  }

  pub fn is_super_client(&self) -> bool {
    self.super_client
  }

  pub fn reader(&self) -> &Arc<StatefulReader> {
    &self.reader
  }

  pub fn writer(&self) -> &Arc<StatefulWriter> {
    &self.writer
  }

  /// Snapshot of the configured servers, proxy handles included.
  pub fn servers(&self) -> Vec<RemoteServer> {
    self.lock_inner().servers.clone()
  }

  pub fn lookup_participant(&self, prefix: GuidPrefix) -> Option<ParticipantProxyData> {
    self.lock_inner().proxies.get(prefix).cloned()
  }

  pub fn server_ping_flag(&self) -> bool {
    self.lock_inner().server_ping
  }

  pub fn sync_active(&self) -> bool {
    self.lock_inner().sync_active
  }

  fn local_key(&self) -> [u8; 16] {
    self.guid.to_bytes()
  }

  /// The local participant's announced data: builtin endpoint set from the
  /// configured EDP direction flags, locators from the participant, and the
  /// discovery-server version property.
  pub fn local_participant_data(&self) -> ParticipantProxyData {
    let mut data = ParticipantProxyData::new(self.guid);
    data.lease_duration = self.config.lease_duration;

    let mut endpoints =
      builtin_endpoint_set::PARTICIPANT_ANNOUNCER | builtin_endpoint_set::PARTICIPANT_DETECTOR;
    if self.config.publication_writer_and_subscription_reader {
      endpoints |= builtin_endpoint_set::PUBLICATIONS_ANNOUNCER
        | builtin_endpoint_set::SUBSCRIPTIONS_DETECTOR;
    }
    if self.config.publication_reader_and_subscription_writer {
      endpoints |= builtin_endpoint_set::PUBLICATIONS_DETECTOR
        | builtin_endpoint_set::SUBSCRIPTIONS_ANNOUNCER;
    }
    data.available_builtin_endpoints = endpoints;

    data.metatraffic_unicast_locators = self.attributes.metatraffic_unicast_locators.clone();
    data.metatraffic_multicast_locators = self.attributes.metatraffic_multicast_locators.clone();
    data.default_unicast_locators = self.attributes.default_unicast_locators.clone();
    data.default_multicast_locators = self.attributes.default_multicast_locators.clone();

    data.properties.push((
      DS_VERSION_PROPERTY_NAME.to_string(),
      DS_VERSION_CURRENT.to_string(),
    ));
    data
  }

  /// Register a server's PDP writer on the local PDP reader. Server PDP
  /// writers are TRANSIENT: they replay what older clients announced.
  fn match_pdp_writer(&self, server: &RemoteServer) {
    let mut wdata = self
      .temp_writer_data
      .lock()
      .unwrap_or_else(|p| p.into_inner());
    wdata.clear();
    wdata.guid = server.pdp_writer_guid();
    wdata.unicast_locators = server.metatraffic_unicast_locators.clone();
    wdata.multicast_locators = server.metatraffic_multicast_locators.clone();
    wdata.reliability = ReliabilityKind::Reliable;
    wdata.durability = DurabilityKind::Transient;
    self.reader.matched_writer_add(&wdata);
  }

  /// Register a server's PDP reader on the local PDP writer.
  fn match_pdp_reader(&self, server: &RemoteServer) {
    let mut rdata = self
      .temp_reader_data
      .lock()
      .unwrap_or_else(|p| p.into_inner());
    rdata.clear();
    rdata.guid = server.pdp_reader_guid();
    rdata.expects_inline_qos = false;
    rdata.unicast_locators = server.metatraffic_unicast_locators.clone();
    rdata.multicast_locators = server.metatraffic_multicast_locators.clone();
    rdata.reliability = ReliabilityKind::Reliable;
    rdata.durability = DurabilityKind::TransientLocal;
    self.writer.matched_reader_add(&rdata);
  }

  /// Re-match any configured server whose PDP endpoints are currently
  /// unmatched.
  pub fn update_remote_servers_list(&self) {
    let servers = self.servers();
    for server in &servers {
      if self.reader.matched_writer_is_matched(server.pdp_writer_guid()) {
        continue;
      }
      self.match_pdp_writer(server);

      if self.writer.matched_reader_is_matched(server.pdp_reader_guid()) {
        continue;
      }
      self.match_pdp_reader(server);
    }
  }

  /// True iff the writer's minimum history change, the local `DATA(p)`, has
  /// been acknowledged by every matched server reader.
  pub fn all_servers_acknowledge_pdp(&self) -> bool {
    match self.writer.min_change() {
      Some(min) => self.writer.is_acked_by_all(&min),
      None => {
        error!(
          "participant proxy data should have been added to the PDP history by a previous \
           announcement"
        );
        false
      }
    }
  }

  /// True when no matched server writer has announced samples the local
  /// PDP reader has not received.
  pub fn is_all_servers_pdp_data_updated(&self) -> bool {
    self.reader.is_in_clean_state()
  }

  /// Assign EDP endpoints of every discovered server that is not matched
  /// yet. Returns whether ALL configured servers are currently discovered.
  pub fn match_servers_edp_endpoints(&self) -> bool {
    let (all, proxies) = {
      let inner = self.lock_inner();
      let mut all = true;
      let mut proxies = Vec::new();
      for server in &inner.servers {
        match server.proxy {
          Some(prefix) => {
            if let Some(proxy) = inner.proxies.get(prefix) {
              proxies.push(proxy.clone());
            }
          }
          None => all = false,
        }
      }
      (all, proxies)
    };

    for proxy in &proxies {
      if !self.edp.are_remote_endpoints_matched(proxy) {
        info!(
          "client {:?} matching server {:?} EDP endpoints",
          self.guid, proxy.guid
        );
        self.edp.assign_remote_endpoints(proxy);
      }
    }
    all
  }

  /// One firing of the client-sync event.
  ///
  /// Returns whether the event should reschedule itself: once every server
  /// acknowledged the local `DATA(p)`, all server EDP endpoints are matched
  /// and the PDP reader is in a clean state, the client is synchronised and
  /// the timer stops. Server loss arms it again.
  pub fn client_sync_tick(&self) -> bool {
    let acked = self.all_servers_acknowledge_pdp();
    if !acked {
      // ping until every server has our sample
      self.lock_inner().server_ping = true;
      self.announce_participant_state(false, false);
    }

    let all_discovered = self.match_servers_edp_endpoints();

    if acked && all_discovered && self.is_all_servers_pdp_data_updated() {
      info!("client {:?} synchronised with all servers", self.guid);
      self.lock_inner().sync_active = false;
      return false;
    }
    true
  }

  /// Handle one `DATA(p)` sample delivered by the PDP reader.
  pub fn handle_participant_data(&self, change: CacheChange) {
    match change.kind {
      ChangeKind::Alive => match ParticipantProxyData::from_payload(&change.payload) {
        Ok(data) => self.admit_or_update_participant(data),
        Err(e) => warn!("discarding unparseable participant data: {}", e),
      },
      _ => {
        let disposed = GUID::from_bytes(change.instance_key).prefix;
        info!("participant {:?} disposed", disposed);
        self.remove_remote_participant(disposed);
      }
    }
  }

  fn admit_or_update_participant(&self, data: ParticipantProxyData) {
    let prefix = data.guid.prefix;
    if prefix == self.guid.prefix {
      return; // servers echo our own sample back
    }

    let (is_new, proxy_snapshot) = {
      let mut inner = self.lock_inner();
      let is_server = inner.servers.iter().any(|s| s.guid_prefix == prefix);

      let is_new = if inner.proxies.contains(prefix) {
        inner.proxies.update(data);
        false
      } else {
        inner.proxies.admit(data, is_server).is_some()
      };

      if is_server {
        for server in inner
          .servers
          .iter_mut()
          .filter(|s| s.guid_prefix == prefix)
        {
          server.proxy = Some(prefix);
        }
      }
      (is_new, inner.proxies.get(prefix).cloned())
    };

    // EDP matching is deferred to the sync event; WLP is notified now
    if is_new {
      if let (Some(wlp), Some(proxy)) = (&self.wlp, &proxy_snapshot) {
        wlp.assign_remote_endpoints(proxy);
      }
    }
  }

  /// Drop a remote participant: unmatch EDP and WLP endpoints first, then
  /// release the PDP-level state.
  pub fn remove_remote_participant(&self, prefix: GuidPrefix) -> bool {
    let proxy = match self.lookup_participant(prefix) {
      Some(proxy) => proxy,
      None => return false,
    };

    self.edp.remove_remote_endpoints(&proxy);
    if let Some(wlp) = &self.wlp {
      wlp.remove_remote_endpoints(&proxy);
    }

    self.remove_remote_endpoints(&proxy);
    self.lock_inner().proxies.drop_participant(prefix);
    true
  }

  /// PDP-level reaction to a lost participant. EDP endpoints must already
  /// be unmatched by the caller.
  ///
  /// For a server: clear its proxy handle, resurrect the sync event (ping
  /// until the server reappears) and re-match the PDP endpoints so the
  /// reliability state tracked against the dead server is discarded. The
  /// re-match carries the server's former persistence GUID, so replayed
  /// historical samples are accepted after a restart.
  pub fn remove_remote_endpoints(&self, pdata: &ParticipantProxyData) {
    debug_assert!(!self.edp.are_remote_endpoints_matched(pdata));

    let prefix = pdata.guid.prefix;
    let mut is_server = false;
    {
      let mut inner = self.lock_inner();
      for server in inner
        .servers
        .iter_mut()
        .filter(|s| s.guid_prefix == prefix)
      {
        server.proxy = None; // reassigned when the server's DATA(p) returns
        is_server = true;
      }
      if is_server {
        inner.sync_active = true;
        inner.server_ping = true;
      }
    }

    if !is_server {
      return;
    }

    info!("unmatching PDP endpoints of server {:?}", pdata.guid);
    self.request_sync_restart();

    let endpoints = pdata.available_builtin_endpoints;

    if endpoints & builtin_endpoint_set::PARTICIPANT_ANNOUNCER != 0 {
      let wguid = GUID::new(prefix, EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER);
      self.reader.matched_writer_remove(wguid, false);

      let mut wdata = self
        .temp_writer_data
        .lock()
        .unwrap_or_else(|p| p.into_inner());
      wdata.clear();
      wdata.guid = wguid;
      wdata.persistence_guid = pdata.persistence_guid;
      wdata.unicast_locators = pdata.metatraffic_unicast_locators.clone();
      wdata.multicast_locators = pdata.metatraffic_multicast_locators.clone();
      wdata.reliability = ReliabilityKind::Reliable;
      wdata.durability = DurabilityKind::Transient;
      self.reader.matched_writer_add(&wdata);
    }

    if endpoints & builtin_endpoint_set::PARTICIPANT_DETECTOR != 0 {
      let rguid = GUID::new(prefix, EntityId::SPDP_BUILTIN_PARTICIPANT_READER);
      self.writer.matched_reader_remove(rguid);

      let mut rdata = self
        .temp_reader_data
        .lock()
        .unwrap_or_else(|p| p.into_inner());
      rdata.clear();
      rdata.guid = rguid;
      rdata.expects_inline_qos = false;
      rdata.unicast_locators = pdata.metatraffic_unicast_locators.clone();
      rdata.multicast_locators = pdata.metatraffic_multicast_locators.clone();
      rdata.reliability = ReliabilityKind::Reliable;
      rdata.durability = DurabilityKind::TransientLocal;
      self.writer.matched_reader_add(&rdata);
    }
  }

  /// Announce the local participant's state to the servers.
  ///
  /// `new_change` refreshes the `DATA(p)` sample in the writer history;
  /// `dispose` sends a `NOT_ALIVE_DISPOSED_UNREGISTERED` sample through the
  /// direct-send path, because no ACKNACK cycle is possible on shutdown.
  pub fn announce_participant_state(&self, new_change: bool, dispose: bool) {
    // The writer mutex is systematically locked before the engine one to
    // prevent an AB/BA deadlock: transport callbacks, initialization and
    // teardown, and the sync event all follow this order.
    let mut writer = self.writer.lock();

    if dispose {
      let change = writer.new_change(ChangeKind::NotAliveDisposedUnregistered, self.local_key());

      let (remote_readers, locators) = {
        let inner = self.lock_inner();
        let mut readers = Vec::new();
        let mut locators = Vec::new();
        for server in &inner.servers {
          // report the demise only to servers we are matched with
          if server.proxy.is_some() {
            readers.push(server.pdp_reader_guid());
            locators.extend(server.metatraffic_unicast_locators.iter().copied());
          }
        }
        (readers, locators)
      };

      self.direct_send(&change, &remote_readers, &locators);
      return;
    }

    if new_change {
      let data = self.local_participant_data();
      match data.to_payload() {
        Ok(payload) => {
          let mut change = writer.new_change(ChangeKind::Alive, self.local_key());
          change.payload = payload;
          writer.add_change(change);
        }
        Err(e) => error!("cannot serialize local participant data: {}", e),
      }
      return;
    }

    // periodic re-announcement: direct-send the current DATA(p) so even
    // servers that have not answered yet get probed
    match writer.min_change() {
      Some(min) => {
        let mut inner = self.lock_inner();
        let mut readers = Vec::new();
        let mut locators = Vec::new();
        for server in &inner.servers {
          readers.push(server.pdp_reader_guid());
          if inner.server_ping || server.proxy.is_none() {
            // ping: probe both multicast and unicast
            locators.extend(server.metatraffic_multicast_locators.iter().copied());
            locators.extend(server.metatraffic_unicast_locators.iter().copied());
          } else {
            locators.extend(server.metatraffic_unicast_locators.iter().copied());
          }
        }
        // the ping is honoured by this announcement whatever triggered it
        inner.server_ping = false;
        drop(inner);

        self.direct_send(&min, &readers, &locators);
      }
      None => error!(
        "participant proxy data should have been added to the PDP history by a previous \
         announcement"
      ),
    }
  }

  /// Direct-send escape hatch: one RTPS message carrying the sample as a
  /// single DATA submessage, sent straight to the given locators. Bypasses
  /// the reliability queue, per-reader state and backpressure. Failures are
  /// logged and not retried.
  fn direct_send(&self, change: &CacheChange, remote_readers: &[GUID], locators: &[Locator]) {
    if remote_readers.is_empty() || locators.is_empty() {
      trace!("direct send without destinations, skipping");
      return;
    }

    let endianness = Endianness::LittleEndian;
    let mut builder = MessageBuilder::new();
    if let [single] = remote_readers {
      builder = builder.dst_submessage(endianness, single.prefix);
    }
    let message = builder
      .data_msg(
        change,
        EntityId::SPDP_BUILTIN_PARTICIPANT_READER,
        self.writer.guid(),
        endianness,
      )
      .add_header_and_build(self.guid.prefix);

    match message.write_to_vec() {
      Ok(bytes) => self.udp_sender.send_to_locators(&bytes, locators),
      Err(e) => error!("error sending announcement from client to servers: {:?}", e),
    }
  }

  /// Drop every server proxy whose lease ran out.
  pub fn handle_lease_expirations(&self) {
    let expired = {
      let inner = self.lock_inner();
      inner.proxies.expired_leases(Timestamp::now())
    };
    for prefix in expired {
      warn!("lease of participant {:?} expired", prefix);
      self.remove_remote_participant(prefix);
    }
  }

  fn request_sync_restart(&self) {
    let sender = self.command_sender.lock().unwrap_or_else(|p| p.into_inner());
    if sender.try_send(PdpCommand::RestartSync).is_err() {
      trace!("sync restart request not queued (no event loop running)");
    }
  }

  /// The engine's event loop: periodic client-sync, lease supervision and
  /// inbound participant data. Runs until a `Stop` command arrives.
  pub fn event_loop(self: Arc<Self>, queue: PdpEventQueue) {
    let poll = match Poll::new() {
      Ok(poll) => poll,
      Err(e) => {
        error!("cannot create PDP poll: {:?}", e);
        return;
      }
    };

    let mut sync_timer: Timer<()> = Timer::default();
    let mut lease_timer: Timer<()> = Timer::default();

    let registration = poll
      .register(
        &queue.command_receiver,
        PDP_COMMAND_TOKEN,
        Ready::readable(),
        PollOpt::edge(),
      )
      .and_then(|_| {
        poll.register(
          &queue.data_receiver,
          PDP_PARTICIPANT_DATA_TOKEN,
          Ready::readable(),
          PollOpt::edge(),
        )
      })
      .and_then(|_| {
        poll.register(
          &sync_timer,
          PDP_CLIENT_SYNC_TOKEN,
          Ready::readable(),
          PollOpt::edge(),
        )
      })
      .and_then(|_| {
        poll.register(&lease_timer, PDP_LEASE_TOKEN, Ready::readable(), PollOpt::edge())
      });
    if let Err(e) = registration {
      error!("cannot register PDP event sources: {:?}", e);
      return;
    }

    let lease_check_period = StdDuration::from_secs(1);
    sync_timer.set_timeout(self.config.client_sync_period, ());
    lease_timer.set_timeout(lease_check_period, ());

    let mut events = Events::with_capacity(64);
    loop {
      if let Err(e) = poll.poll(&mut events, None) {
        error!("PDP poll failed: {:?}", e);
        return;
      }

      for event in events.iter() {
        match event.token() {
          PDP_COMMAND_TOKEN => {
            while let Ok(command) = queue.command_receiver.try_recv() {
              match command {
                PdpCommand::Stop => {
                  info!("stopping PDP client {:?}", self.guid);
                  // the sync event must not fire into a half-dead engine
                  drop(sync_timer);
                  drop(lease_timer);
                  return;
                }
                PdpCommand::AnnounceNow => {
                  self.announce_participant_state(false, false);
                }
                PdpCommand::RestartSync => {
                  self.lock_inner().sync_active = true;
                  sync_timer.set_timeout(self.config.client_sync_period, ());
                }
              }
            }
          }
          PDP_PARTICIPANT_DATA_TOKEN => {
            while let Ok(change) = queue.data_receiver.try_recv() {
              self.handle_participant_data(change);
            }
          }
          PDP_CLIENT_SYNC_TOKEN => {
            while sync_timer.poll().is_some() {}
            if self.client_sync_tick() {
              sync_timer.set_timeout(self.config.client_sync_period, ());
            }
          }
          PDP_LEASE_TOKEN => {
            while lease_timer.poll().is_some() {}
            self.handle_lease_expirations();
            lease_timer.set_timeout(lease_check_period, ());
          }
          other => trace!("spurious poll token {:?}", other),
        }
      }
    }
  }

  /// Convenience: build the engine and run its event loop on a dedicated
  /// thread.
  pub fn start(
    attributes: ParticipantAttributes,
    config: DiscoveryConfig,
    servers: Vec<RemoteServer>,
    edp: Arc<dyn EndpointDiscovery>,
    wlp: Option<Arc<Wlp>>,
  ) -> Result<(Arc<Self>, ShutdownSignal, thread::JoinHandle<()>)> {
    let (client, queue, signal) = Self::new(attributes, config, servers, edp, wlp)?;
    let loop_client = client.clone();
    let handle = thread::Builder::new()
      .name("pdp-client".to_string())
      .spawn(move || loop_client.event_loop(queue))
      .map_err(Error::from)?;
    Ok((client, signal, handle))
  }
}
