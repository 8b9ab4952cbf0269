use std::{
  net::UdpSocket,
  sync::Arc,
  time::Duration as StdDuration,
};

use bytes::Bytes;

use dds_discovery_client::{
  discovery::{
    edp::{EndpointDiscovery, SimpleEndpointDiscovery},
    participant_data::{builtin_endpoint_set, ParticipantProxyData},
    pdp_client::{
      DiscoveryConfig, DiscoveryProtocol, ParticipantAttributes, PdpClient,
    },
    server_list::{parse_server_list, RemoteServer},
  },
  liveliness::Wlp,
  network::constant::{spdp_well_known_unicast_port, user_traffic_unicast_port},
  rtps::reader::ReaderCore,
  structure::{
    cache_change::{CacheChange, ChangeKind},
    duration::Duration,
    guid::GuidPrefix,
    locator::Locator,
    sequence_number::SequenceNumber,
  },
};

/// Bind a throwaway loopback socket standing in for a server's PDP
/// endpoint, returning it with a short read timeout.
fn server_socket() -> UdpSocket {
  let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
  socket
    .set_read_timeout(Some(StdDuration::from_millis(500)))
    .unwrap();
  socket
}

fn attributes() -> ParticipantAttributes {
  let localhost = "127.0.0.1".parse().unwrap();
  ParticipantAttributes {
    guid_prefix: GuidPrefix::new([0xc1; 12]),
    domain_id: 0,
    participant_id: 0,
    metatraffic_unicast_locators: vec![Locator::udp_v4(
      localhost,
      spdp_well_known_unicast_port(0, 0),
    )],
    metatraffic_multicast_locators: vec![],
    default_unicast_locators: vec![Locator::udp_v4(localhost, user_traffic_unicast_port(0, 0))],
    default_multicast_locators: vec![],
  }
}

fn client_with_servers(
  servers: Vec<RemoteServer>,
) -> (Arc<PdpClient>, Arc<SimpleEndpointDiscovery>, Arc<Wlp>) {
  let edp = Arc::new(SimpleEndpointDiscovery::new());
  let wlp = Wlp::new();
  let (client, _queue, _signal) = PdpClient::new(
    attributes(),
    DiscoveryConfig::default(),
    servers,
    edp.clone(),
    Some(wlp.clone()),
  )
  .unwrap();
  (client, edp, wlp)
}

/// The `DATA(p)` a server would publish about itself.
fn server_participant_data(server: &RemoteServer, lease: Duration) -> ParticipantProxyData {
  let mut data = ParticipantProxyData::new(server.participant_guid());
  data.lease_duration = lease;
  data.available_builtin_endpoints =
    builtin_endpoint_set::PARTICIPANT_ANNOUNCER | builtin_endpoint_set::PARTICIPANT_DETECTOR;
  data.metatraffic_unicast_locators = server.metatraffic_unicast_locators.clone();
  data.persistence_guid = Some(server.participant_guid());
  data
}

fn data_p_change(server: &RemoteServer, data: &ParticipantProxyData, sn: i64) -> CacheChange {
  let mut change = CacheChange::new(
    server.pdp_writer_guid(),
    SequenceNumber::new(sn),
    ChangeKind::Alive,
  );
  change.instance_key = data.key();
  change.payload = data.to_payload().unwrap();
  change
}

fn drain(socket: &UdpSocket) {
  let mut buffer = [0u8; 2048];
  socket
    .set_read_timeout(Some(StdDuration::from_millis(50)))
    .unwrap();
  while socket.recv_from(&mut buffer).is_ok() {}
  socket
    .set_read_timeout(Some(StdDuration::from_millis(500)))
    .unwrap();
}

fn recv_rtps(socket: &UdpSocket) -> Option<Vec<u8>> {
  let mut buffer = [0u8; 2048];
  match socket.recv_from(&mut buffer) {
    Ok((length, _)) => Some(buffer[..length].to_vec()),
    Err(_) => None,
  }
}

#[test]
fn boot_with_one_server() {
  let socket = server_socket();
  let port = socket.local_addr().unwrap().port();
  let servers = parse_server_list(&format!("127.0.0.1:{}", port)).unwrap();
  let server = servers[0].clone();

  let (client, edp, wlp) = client_with_servers(servers);

  // both PDP directions are matched right after init
  assert!(client
    .reader()
    .matched_writer_is_matched(server.pdp_writer_guid()));
  assert!(client
    .writer()
    .matched_reader_is_matched(server.pdp_reader_guid()));
  assert!(client.sync_active());

  // the local DATA(p) sits in the history but is not acknowledged yet
  let own_sample = client.writer().min_change().unwrap();
  assert!(!client.all_servers_acknowledge_pdp());

  // the server's DATA(p) arrives over the reliable reader
  let sdata = server_participant_data(&server, Duration::from_secs(300));
  let change = data_p_change(&server, &sdata, 1);
  assert!(client.reader().process_data(change.clone()));
  client.handle_participant_data(change);

  // admitted as a server, proxy handle repopulated, WLP notified
  let proxy = client.lookup_participant(server.guid_prefix).unwrap();
  assert_eq!(proxy.guid, server.participant_guid());
  assert_eq!(client.servers()[0].proxy, Some(server.guid_prefix));
  assert!(wlp.is_assigned(server.guid_prefix));
  assert!(client.is_all_servers_pdp_data_updated());

  // not synchronised until the server acknowledges our sample
  assert!(client.client_sync_tick());
  assert!(client.sync_active());
  // EDP matching is lazy, via the sync event
  assert!(edp.are_remote_endpoints_matched(&proxy));

  client.writer().handle_ack_nack(
    server.pdp_reader_guid(),
    own_sample.sequence_number.plus_1(),
    &[],
  );
  assert!(client.all_servers_acknowledge_pdp());

  // fully synchronised: the sync event stops rescheduling
  assert!(!client.client_sync_tick());
  assert!(!client.sync_active());
}

#[test]
fn ping_until_server_is_alive() {
  let socket = server_socket();
  let port = socket.local_addr().unwrap().port();
  let servers = parse_server_list(&format!("127.0.0.1:{}", port)).unwrap();
  let server = servers[0].clone();

  let (client, _edp, _wlp) = client_with_servers(servers);
  drain(&socket); // initial announcement traffic

  // server unreachable: every sync tick pings it
  assert!(client.client_sync_tick());
  let ping = recv_rtps(&socket).expect("ping must reach the server locator");
  assert_eq!(&ping[..4], b"RTPS");
  // the ping honoured the flag and cleared it
  assert!(!client.server_ping_flag());

  // server appears
  let sdata = server_participant_data(&server, Duration::from_secs(300));
  client.handle_participant_data(data_p_change(&server, &sdata, 1));
  assert_eq!(client.servers()[0].proxy, Some(server.guid_prefix));

  // announcements keep flowing (unicast now), no crash
  drain(&socket);
  assert!(client.client_sync_tick());
  assert!(recv_rtps(&socket).is_some());
}

#[test]
fn graceful_dispose_is_direct_sent_to_all_live_servers() {
  let socket_a = server_socket();
  let socket_b = server_socket();
  let list = format!(
    "127.0.0.1:{};127.0.0.1:{}",
    socket_a.local_addr().unwrap().port(),
    socket_b.local_addr().unwrap().port()
  );
  let servers = parse_server_list(&list).unwrap();
  let (server_a, server_b) = (servers[0].clone(), servers[1].clone());

  let (client, _edp, _wlp) = client_with_servers(servers);

  for (server, sn) in [(&server_a, 1), (&server_b, 1)] {
    let sdata = server_participant_data(server, Duration::from_secs(300));
    client.handle_participant_data(data_p_change(server, &sdata, sn));
  }
  drain(&socket_a);
  drain(&socket_b);

  client.announce_participant_state(false, true);

  for socket in [&socket_a, &socket_b] {
    let message = recv_rtps(socket).expect("dispose must reach every live server");
    assert_eq!(&message[..4], b"RTPS");
    // the sample is keyed by the local participant's GUID
    let key = client.guid().to_bytes();
    assert!(message
      .windows(key.len())
      .any(|window| window == key));
  }
}

#[test]
fn server_crash_and_return() {
  let socket = server_socket();
  let port = socket.local_addr().unwrap().port();
  let servers = parse_server_list(&format!("127.0.0.1:{}", port)).unwrap();
  let server = servers[0].clone();

  let (client, _edp, _wlp) = client_with_servers(servers);

  // discover the server with a very short lease
  let sdata = server_participant_data(&server, Duration::from_millis(5));
  client.handle_participant_data(data_p_change(&server, &sdata, 1));
  assert_eq!(client.servers()[0].proxy, Some(server.guid_prefix));

  // mark the client synchronised so we can observe the restart
  client.writer().handle_ack_nack(
    server.pdp_reader_guid(),
    client.writer().min_change().unwrap().sequence_number.plus_1(),
    &[],
  );
  assert!(!client.client_sync_tick());
  assert!(!client.sync_active());

  // lease runs out
  std::thread::sleep(StdDuration::from_millis(20));
  client.handle_lease_expirations();

  assert_eq!(client.servers()[0].proxy, None);
  assert!(client.lookup_participant(server.guid_prefix).is_none());
  // the sync event is armed again and the next announcement will ping
  assert!(client.sync_active());
  assert!(client.server_ping_flag());
  // PDP endpoints were re-matched (unmatch + match), reliability state reset
  assert!(client
    .reader()
    .matched_writer_is_matched(server.pdp_writer_guid()));
  assert!(client
    .writer()
    .matched_reader_is_matched(server.pdp_reader_guid()));
  assert!(!client.all_servers_acknowledge_pdp());

  // the server restarts and re-advertises: admitted and matched again
  let sdata = server_participant_data(&server, Duration::from_secs(300));
  let change = data_p_change(&server, &sdata, 1);
  assert!(client.reader().process_data(change.clone()));
  client.handle_participant_data(change);
  assert_eq!(client.servers()[0].proxy, Some(server.guid_prefix));
  assert!(client
    .reader()
    .matched_writer_is_matched(server.pdp_writer_guid()));
}

#[test]
fn acknowledgement_needs_every_server() {
  let socket_a = server_socket();
  let socket_b = server_socket();
  let list = format!(
    "127.0.0.1:{};127.0.0.1:{}",
    socket_a.local_addr().unwrap().port(),
    socket_b.local_addr().unwrap().port()
  );
  let servers = parse_server_list(&list).unwrap();
  let (server_a, server_b) = (servers[0].clone(), servers[1].clone());

  let (client, _edp, _wlp) = client_with_servers(servers);
  let base = client
    .writer()
    .min_change()
    .unwrap()
    .sequence_number
    .plus_1();

  assert!(!client.all_servers_acknowledge_pdp());
  client
    .writer()
    .handle_ack_nack(server_a.pdp_reader_guid(), base, &[]);
  assert!(!client.all_servers_acknowledge_pdp());
  client
    .writer()
    .handle_ack_nack(server_b.pdp_reader_guid(), base, &[]);
  assert!(client.all_servers_acknowledge_pdp());
}

#[test]
fn update_remote_servers_list_rematches_missing_endpoints() {
  let socket = server_socket();
  let port = socket.local_addr().unwrap().port();
  let servers = parse_server_list(&format!("127.0.0.1:{}", port)).unwrap();
  let server = servers[0].clone();

  let (client, _edp, _wlp) = client_with_servers(servers);

  client
    .reader()
    .matched_writer_remove(server.pdp_writer_guid(), false);
  client.writer().matched_reader_remove(server.pdp_reader_guid());
  assert!(!client
    .reader()
    .matched_writer_is_matched(server.pdp_writer_guid()));

  client.update_remote_servers_list();
  assert!(client
    .reader()
    .matched_writer_is_matched(server.pdp_writer_guid()));
  assert!(client
    .writer()
    .matched_reader_is_matched(server.pdp_reader_guid()));
}

#[test]
fn wrong_discovery_protocol_still_runs_as_client() {
  let socket = server_socket();
  let port = socket.local_addr().unwrap().port();
  let servers = parse_server_list(&format!("127.0.0.1:{}", port)).unwrap();

  let mut config = DiscoveryConfig::default();
  config.protocol = DiscoveryProtocol::Simple;
  let (client, _queue, _signal) = PdpClient::new(
    attributes(),
    config,
    servers.clone(),
    Arc::new(SimpleEndpointDiscovery::new()),
    None,
  )
  .unwrap();
  assert!(!client.is_super_client());

  let mut config = DiscoveryConfig::default();
  config.protocol = DiscoveryProtocol::SuperClient;
  let (super_client, _queue, _signal) = PdpClient::new(
    attributes(),
    config,
    servers,
    Arc::new(SimpleEndpointDiscovery::new()),
    None,
  )
  .unwrap();
  // SUPER_CLIENT behaves as CLIENT here, only the role differs
  assert!(super_client.is_super_client());
  assert!(super_client.sync_active());
}

#[test]
fn own_echoed_data_is_ignored() {
  let socket = server_socket();
  let port = socket.local_addr().unwrap().port();
  let servers = parse_server_list(&format!("127.0.0.1:{}", port)).unwrap();
  let server = servers[0].clone();

  let (client, _edp, _wlp) = client_with_servers(servers);

  // a server relaying our own announcement back must not create a proxy
  let own = client.local_participant_data();
  let mut change = CacheChange::new(
    server.pdp_writer_guid(),
    SequenceNumber::new(1),
    ChangeKind::Alive,
  );
  change.instance_key = own.key();
  change.payload = own.to_payload().unwrap();
  client.handle_participant_data(change);

  assert!(client.lookup_participant(client.guid().prefix).is_none());
}

#[test]
fn dispose_sample_drops_remote_participant() {
  let socket = server_socket();
  let port = socket.local_addr().unwrap().port();
  let servers = parse_server_list(&format!("127.0.0.1:{}", port)).unwrap();
  let server = servers[0].clone();

  let (client, _edp, wlp) = client_with_servers(servers);

  // a plain client participant relayed by the server
  let peer_guid_prefix = GuidPrefix::new([0x77; 12]);
  let mut peer = ParticipantProxyData::new(
    dds_discovery_client::structure::guid::GUID::new(
      peer_guid_prefix,
      dds_discovery_client::structure::guid::EntityId::PARTICIPANT,
    ),
  );
  peer.lease_duration = Duration::from_millis(1);

  let mut change = CacheChange::new(
    server.pdp_writer_guid(),
    SequenceNumber::new(1),
    ChangeKind::Alive,
  );
  change.instance_key = peer.key();
  change.payload = peer.to_payload().unwrap();
  client.handle_participant_data(change);
  assert!(client.lookup_participant(peer_guid_prefix).is_some());
  assert!(wlp.is_assigned(peer_guid_prefix));

  // non-servers never arm a lease: much later, the peer is still there
  std::thread::sleep(StdDuration::from_millis(10));
  client.handle_lease_expirations();
  assert!(client.lookup_participant(peer_guid_prefix).is_some());

  // the server relays the peer's disposal
  let mut dispose = CacheChange::new(
    server.pdp_writer_guid(),
    SequenceNumber::new(2),
    ChangeKind::NotAliveDisposedUnregistered,
  );
  dispose.instance_key = peer.key();
  dispose.payload = Bytes::new();
  client.handle_participant_data(dispose);

  assert!(client.lookup_participant(peer_guid_prefix).is_none());
  assert!(!wlp.is_assigned(peer_guid_prefix));
}
