//! End-to-end scenarios: synthetic frames through dissection, matching and
//! the asset store.

use std::net::Ipv4Addr;

use prads::asset::{AssetSink, AssetStore, ServiceKind};
use prads::config::Config;
use prads::db::SignatureDb;
use prads::Prads;
use pnet::packet::arp::{ArpHardwareTypes, ArpOperations, MutableArpPacket};
use pnet::packet::ethernet::{EtherType, EtherTypes, MutableEthernetPacket};
use pnet::packet::icmp::{IcmpCode, IcmpTypes, MutableIcmpPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::MutableIpv4Packet;
use pnet::packet::tcp::{MutableTcpPacket, TcpFlags, TcpOption};
use pnet::packet::udp::MutableUdpPacket;
use pnet::packet::vlan::MutableVlanPacket;
use pnet::util::MacAddr;

const ETH_LEN: usize = 14;
const IP_LEN: usize = 20;

fn ethernet_header(buf: &mut [u8], ethertype: EtherType) {
    let mut eth = MutableEthernetPacket::new(buf).unwrap();
    eth.set_destination(MacAddr::new(0xff, 0xff, 0xff, 0xff, 0xff, 0xff));
    eth.set_source(MacAddr::new(0x00, 0x1b, 0x21, 0xaa, 0xbb, 0xcc));
    eth.set_ethertype(ethertype);
}

#[allow(clippy::too_many_arguments)]
fn ipv4_header(
    buf: &mut [u8],
    src: Ipv4Addr,
    dst: Ipv4Addr,
    ttl: u8,
    flags: u8,
    id: u16,
    total_len: u16,
    proto: pnet::packet::ip::IpNextHeaderProtocol,
) {
    let mut ip = MutableIpv4Packet::new(buf).unwrap();
    ip.set_version(4);
    ip.set_header_length(5);
    ip.set_total_length(total_len);
    ip.set_identification(id);
    ip.set_flags(flags);
    ip.set_fragment_offset(0);
    ip.set_ttl(ttl);
    ip.set_next_level_protocol(proto);
    ip.set_source(src);
    ip.set_destination(dst);
}

/// The spec's reference packet: a Linux 2.6 SYN with
/// `M1460,S,T0,N,W7`, window 5840, ttl 64, df, 60 bytes.
fn linux_syn_frame() -> Vec<u8> {
    let mut buf = vec![0u8; ETH_LEN + 60];
    ethernet_header(&mut buf, EtherTypes::Ipv4);
    ipv4_header(
        &mut buf[ETH_LEN..],
        "10.0.0.5".parse().unwrap(),
        "10.0.0.1".parse().unwrap(),
        64,
        2,
        0x1234,
        60,
        IpNextHeaderProtocols::Tcp,
    );
    let mut tcp = MutableTcpPacket::new(&mut buf[ETH_LEN + IP_LEN..]).unwrap();
    tcp.set_source(41234);
    tcp.set_destination(80);
    tcp.set_sequence(0x01020304);
    tcp.set_acknowledgement(0);
    tcp.set_data_offset(10);
    tcp.set_flags(TcpFlags::SYN);
    tcp.set_window(5840);
    tcp.set_urgent_ptr(0);
    tcp.set_options(&[
        TcpOption::mss(1460),
        TcpOption::sack_perm(),
        TcpOption::timestamp(0, 0),
        TcpOption::nop(),
        TcpOption::wscale(7),
    ]);
    buf
}

fn arp_reply_frame() -> Vec<u8> {
    let mut buf = vec![0u8; ETH_LEN + 28];
    ethernet_header(&mut buf, EtherTypes::Arp);
    let mut arp = MutableArpPacket::new(&mut buf[ETH_LEN..]).unwrap();
    arp.set_hardware_type(ArpHardwareTypes::Ethernet);
    arp.set_protocol_type(EtherTypes::Ipv4);
    arp.set_hw_addr_len(6);
    arp.set_proto_addr_len(4);
    arp.set_operation(ArpOperations::Reply);
    arp.set_sender_hw_addr(MacAddr::new(0x00, 0x1b, 0x21, 0xaa, 0xbb, 0xcc));
    arp.set_sender_proto_addr("10.0.0.5".parse().unwrap());
    arp.set_target_hw_addr(MacAddr::new(0, 0, 0, 0, 0, 0));
    arp.set_target_proto_addr("10.0.0.1".parse().unwrap());
    buf
}

fn udp_frame(src_port: u16, payload: &[u8]) -> Vec<u8> {
    let udp_len = 8 + payload.len();
    let total = IP_LEN + udp_len;
    let mut buf = vec![0u8; ETH_LEN + total];
    ethernet_header(&mut buf, EtherTypes::Ipv4);
    ipv4_header(
        &mut buf[ETH_LEN..],
        "10.0.0.9".parse().unwrap(),
        "10.0.0.1".parse().unwrap(),
        64,
        2,
        0x4444,
        total as u16,
        IpNextHeaderProtocols::Udp,
    );
    let mut udp = MutableUdpPacket::new(&mut buf[ETH_LEN + IP_LEN..]).unwrap();
    udp.set_source(src_port);
    udp.set_destination(33000);
    udp.set_length(udp_len as u16);
    udp.set_payload(payload);
    buf
}

fn icmp_echo_frame(ttl: u8, total_len: u16) -> Vec<u8> {
    let mut buf = vec![0u8; ETH_LEN + usize::from(total_len)];
    ethernet_header(&mut buf, EtherTypes::Ipv4);
    ipv4_header(
        &mut buf[ETH_LEN..],
        "10.0.0.7".parse().unwrap(),
        "10.0.0.1".parse().unwrap(),
        ttl,
        2,
        0x99,
        total_len,
        IpNextHeaderProtocols::Icmp,
    );
    let mut icmp = MutableIcmpPacket::new(&mut buf[ETH_LEN + IP_LEN..]).unwrap();
    icmp.set_icmp_type(IcmpTypes::EchoRequest);
    icmp.set_icmp_code(IcmpCode(0));
    buf
}

fn engine_with<'a>(config: &'a Config, db: &'a SignatureDb) -> Prads<'a> {
    Prads::new(config, db, AssetStore::new(AssetSink::Buffer(Vec::new())), None)
}

#[test]
fn linux_syn_identified() {
    let config = Config::default();
    let db = SignatureDb::load_embedded().unwrap();
    let mut engine = engine_with(&config, &db);

    engine.process_frame(&linux_syn_frame(), 1700000000);

    assert_eq!(engine.store.len(), 1);
    let asset = engine.store.iter().next().unwrap();
    assert_eq!(asset.service, ServiceKind::Syn);
    assert_eq!(asset.ip, "10.0.0.5".parse::<Ipv4Addr>().unwrap());
    assert_eq!(asset.os, "Linux");
    assert!(asset.details.starts_with("2.6"));
    assert_eq!(asset.fp, "S4:64:1:60:M1460,S,T0,N,W7:.");
    assert_eq!(asset.distance, 0);
    assert_eq!(asset.link, "ethernet");
    assert_eq!(engine.stats.tcp, 1);
}

#[test]
fn syn_behind_vlan_tag_still_matches() {
    let inner = linux_syn_frame();
    let mut buf = vec![0u8; inner.len() + 4];
    ethernet_header(&mut buf, EtherType(0x8100));
    {
        let mut vlan = MutableVlanPacket::new(&mut buf[ETH_LEN..]).unwrap();
        vlan.set_vlan_identifier(42);
        vlan.set_ethertype(EtherTypes::Ipv4);
    }
    buf[ETH_LEN + 4..].copy_from_slice(&inner[ETH_LEN..]);

    let config = Config::default();
    let db = SignatureDb::load_embedded().unwrap();
    let mut engine = engine_with(&config, &db);
    engine.process_frame(&buf, 1);

    assert_eq!(engine.store.len(), 1);
    assert_eq!(engine.store.iter().next().unwrap().os, "Linux");
}

#[test]
fn arp_reply_resolves_vendor() {
    let config = Config::default();
    let db = SignatureDb::load_embedded().unwrap();
    let mut engine = engine_with(&config, &db);

    engine.process_frame(&arp_reply_frame(), 1700000000);

    assert_eq!(engine.store.len(), 1);
    let asset = engine.store.iter().next().unwrap();
    assert_eq!(asset.service, ServiceKind::Arp);
    assert_eq!(asset.ip, "10.0.0.5".parse::<Ipv4Addr>().unwrap());
    assert_eq!(asset.fp, "001b21");
    assert_eq!(asset.mac.as_deref(), Some("00:1b:21:aa:bb:cc"));
    assert_eq!(asset.os, "Intel");
    assert_eq!(asset.link, "ethernet");
    assert_eq!(asset.distance, 1);
}

#[test]
fn arp_disabled_records_nothing() {
    let mut config = Config::default();
    config.arp = false;
    let db = SignatureDb::load_embedded().unwrap();
    let mut engine = engine_with(&config, &db);

    engine.process_frame(&arp_reply_frame(), 1);
    assert!(engine.store.is_empty());
    assert_eq!(engine.stats.arp, 1, "dropped frames are still counted");
}

#[test]
fn udp_port_53_wellknown_when_regex_off() {
    let mut config = Config::default();
    config.service_udp = false;
    config.os_udp = false;
    let db = SignatureDb::load_embedded().unwrap();
    let mut engine = engine_with(&config, &db);

    engine.process_frame(&udp_frame(53, b"\x12\x34\x81\x80rest-of-dns-answer"), 1);

    assert_eq!(engine.store.len(), 1);
    let asset = engine.store.iter().next().unwrap();
    assert_eq!(asset.service, ServiceKind::ServiceUdp);
    assert_eq!(asset.os, "-");
    assert_eq!(asset.details, "DNS");
    assert_eq!(asset.fp, "10.0.0.9:53");
}

#[test]
fn udp_regex_matching_beats_wellknown_table() {
    let mut config = Config::default();
    config.os_udp = false;
    let db = SignatureDb::load_embedded().unwrap();
    let mut engine = engine_with(&config, &db);

    // regex mode on: an unknown payload from port 53 records nothing
    engine.process_frame(&udp_frame(53, b"zzzz not dns at all"), 1);
    assert!(engine.store.is_empty());

    // a real-looking DNS answer matches the dns signature
    engine.process_frame(&udp_frame(53, b"\x12\x34\x81\x00\x00\x01\x00\x01"), 2);
    assert_eq!(engine.store.len(), 1);
    assert_eq!(engine.store.iter().next().unwrap().details, "DNS");
}

#[test]
fn udp_os_fingerprint_matches_embedded_linux() {
    let mut config = Config::default();
    config.service_udp = false;
    let db = SignatureDb::load_embedded().unwrap();
    let mut engine = engine_with(&config, &db);

    // ip_len 48, udp_len 28: fplen 20, ttl 64, df, flags 2
    engine.process_frame(&udp_frame(5353, b"01234567890123456789"), 1);

    let udp_assets: Vec<_> = engine
        .store
        .iter()
        .filter(|a| a.service == ServiceKind::Udp)
        .collect();
    assert_eq!(udp_assets.len(), 1);
    assert_eq!(udp_assets[0].os, "Linux");
    assert_eq!(udp_assets[0].fp, "20:64:1:0:2:0");
}

#[test]
fn icmp_unknown_still_becomes_asset() {
    let config = Config::default();
    let db = SignatureDb::load_embedded().unwrap();
    let mut engine = engine_with(&config, &db);

    // ttl 200 normalizes to 255; nothing in icmp.fp matches that shape
    engine.process_frame(&icmp_echo_frame(200, 33), 1);

    assert_eq!(engine.store.len(), 1);
    let asset = engine.store.iter().next().unwrap();
    assert_eq!(asset.service, ServiceKind::Icmp);
    assert_eq!(asset.os, "?");
    assert_eq!(asset.details, "?");
    assert_eq!(asset.distance, 55);
}

#[test]
fn icmp_linux_ping_identified() {
    let config = Config::default();
    let db = SignatureDb::load_embedded().unwrap();
    let mut engine = engine_with(&config, &db);

    engine.process_frame(&icmp_echo_frame(64, 84), 1);

    let asset = engine.store.iter().next().unwrap();
    assert_eq!(asset.os, "Linux");
    assert_eq!(asset.fp, "8:0:64:1:0:84:2:0:0");
}

#[test]
fn repeat_sightings_keep_one_asset() {
    let config = Config::default();
    let db = SignatureDb::load_embedded().unwrap();
    let mut engine = engine_with(&config, &db);

    for t in 0..5 {
        engine.process_frame(&linux_syn_frame(), 1700000000 + t);
    }
    assert_eq!(engine.store.len(), 1);
    let asset = engine.store.iter().next().unwrap();
    assert_eq!(asset.first_seen, 1700000000);
    assert_eq!(asset.last_seen, 1700000004);

    let printed = String::from_utf8(engine.store.sink_buffer().unwrap().to_vec()).unwrap();
    assert_eq!(printed.lines().count(), 1, "record line appears exactly once");
}

#[test]
fn non_ip_ethertype_is_counted_not_recorded() {
    let config = Config::default();
    let db = SignatureDb::load_embedded().unwrap();
    let mut engine = engine_with(&config, &db);

    let mut buf = vec![0u8; 60];
    ethernet_header(&mut buf, EtherTypes::Ipv6);
    engine.process_frame(&buf, 1);

    assert!(engine.store.is_empty());
    assert_eq!(engine.stats.other_link, 1);
    assert_eq!(engine.stats.frames, 1);
}
