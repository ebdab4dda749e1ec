use std::net::Ipv4Addr;

use crate::error::PradsError;
use crate::tcp::{format_olayout, OptValue, Quirk, QuirkSet, TcpOpt};
use crate::ttl::normalize_ttl;
use crate::window_size::normalize_wss;
use pnet::packet::arp::ArpPacket;
use pnet::packet::ethernet::{EtherType, EtherTypes, EthernetPacket};
use pnet::packet::icmp::IcmpPacket;
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::tcp::{TcpFlags, TcpPacket};
use pnet::packet::udp::UdpPacket;
use pnet::packet::vlan::VlanPacket;
use pnet::packet::Packet;
use pnet::util::MacAddr;

/// 802.1Q tagged frame.
const ETHERTYPE_VLAN: EtherType = EtherType(0x8100);
/// Q-in-Q double-tagged frame.
const ETHERTYPE_QINQ: EtherType = EtherType(0x9100);

/// IP header facts every transport observation carries.
#[derive(Clone, Debug)]
pub struct IpMeta {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub ttl: u8,
    /// normalized initial TTL.
    pub gttl: u8,
    /// estimated hops, `gttl - ttl`.
    pub distance: u8,
    pub df: bool,
    pub ipopts: bool,
    pub len: u16,
    pub id: u16,
    pub flags: u8,
    pub frag_offset: u16,
    pub tos: u8,
}

/// Which handshake role a TCP packet plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TcpKind {
    Syn,
    SynAck,
    Other,
}

/// The fingerprint feature vector of one SYN or SYN+ACK.
#[derive(Clone, Debug)]
pub struct TcpObservation {
    pub winsize: u16,
    pub mss: Option<u16>,
    pub wscale: Option<u8>,
    pub gttl: u8,
    pub df: bool,
    /// packet size bucket: total length when under 100, else 0.
    pub size: u16,
    pub olayout: Vec<TcpOpt>,
    pub quirks: QuirkSet,
}

impl TcpObservation {
    pub fn optcnt(&self) -> u8 {
        self.olayout.len() as u8
    }

    /// Same bucketing as the signature side: an absent timestamp and a zero
    /// TSval are equivalent.
    pub fn t0(&self) -> bool {
        !self.olayout.iter().any(|o| matches!(o, TcpOpt::Ts))
    }

    /// The canonical fingerprint string `wss:ttl:df:sz:opts:quirks`.
    pub fn fp_string(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}",
            normalize_wss(self.winsize, self.mss),
            self.gttl,
            u8::from(self.df),
            self.size,
            format_olayout(&self.olayout),
            self.quirks
        )
    }
}

#[derive(Clone, Debug)]
pub struct ObservableTcp {
    pub ip: IpMeta,
    pub kind: TcpKind,
    pub src_port: u16,
    pub dst_port: u16,
    /// present on SYN and SYN+ACK only.
    pub observation: Option<TcpObservation>,
    pub payload: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct ObservableUdp {
    pub ip: IpMeta,
    pub src_port: u16,
    pub dst_port: u16,
    /// `max(0, ip_len - udp_len)`.
    pub fplen: u16,
    pub payload: Vec<u8>,
}

impl ObservableUdp {
    pub fn fp_string(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}",
            self.fplen,
            self.ip.gttl,
            u8::from(self.ip.df),
            u8::from(self.ip.ipopts),
            self.ip.flags,
            self.ip.frag_offset
        )
    }

    /// Tree levels in database order: fplen, ttl, df, if, fo, io.
    pub fn lookup_values(&self) -> [u32; 6] {
        [
            u32::from(self.fplen),
            u32::from(self.ip.gttl),
            u32::from(self.ip.df),
            u32::from(self.ip.flags),
            u32::from(self.ip.frag_offset),
            u32::from(self.ip.ipopts),
        ]
    }
}

#[derive(Clone, Debug)]
pub struct ObservableIcmp {
    pub ip: IpMeta,
    pub itype: u8,
    pub icode: u8,
}

impl ObservableIcmp {
    pub fn fp_string(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}:{}:{}:{}",
            self.itype,
            self.icode,
            self.ip.gttl,
            u8::from(self.ip.df),
            u8::from(self.ip.ipopts),
            self.ip.len,
            self.ip.flags,
            self.ip.frag_offset,
            self.ip.tos
        )
    }

    /// Tree levels in database order: itype, icode, il, ttl, df, if, fo, io, tos.
    pub fn lookup_values(&self) -> [u32; 9] {
        [
            u32::from(self.itype),
            u32::from(self.icode),
            u32::from(self.ip.len),
            u32::from(self.ip.gttl),
            u32::from(self.ip.df),
            u32::from(self.ip.flags),
            u32::from(self.ip.frag_offset),
            u32::from(self.ip.ipopts),
            u32::from(self.ip.tos),
        ]
    }
}

#[derive(Clone, Debug)]
pub struct ObservableArp {
    pub sender_ip: Ipv4Addr,
    pub sender_mac: MacAddr,
}

/// Everything one frame can turn into.
#[derive(Clone, Debug)]
pub enum Observation {
    Arp(ObservableArp),
    Tcp(ObservableTcp),
    Udp(ObservableUdp),
    Icmp(ObservableIcmp),
}

/// Decodes one link-layer frame into an observation, stripping up to two
/// VLAN tags first. Anything that is not ARP or IPv4 TCP/UDP/ICMP is an
/// error the caller only counts.
pub fn dissect(frame: &[u8]) -> Result<Observation, PradsError> {
    let ethernet = EthernetPacket::new(frame)
        .ok_or_else(|| PradsError::Truncated("ethernet header".to_string()))?;

    let mut ethertype = ethernet.get_ethertype();
    let mut payload = ethernet.payload().to_vec();

    for _ in 0..2 {
        if ethertype != ETHERTYPE_VLAN && ethertype != ETHERTYPE_QINQ {
            break;
        }
        let vlan = VlanPacket::new(&payload)
            .ok_or_else(|| PradsError::Truncated("vlan header".to_string()))?;
        ethertype = vlan.get_ethertype();
        payload = vlan.payload().to_vec();
    }

    match ethertype {
        EtherTypes::Arp => dissect_arp(&payload),
        EtherTypes::Ipv4 => dissect_ipv4(&payload),
        other => Err(PradsError::UnsupportedEthernetType(other)),
    }
}

fn dissect_arp(payload: &[u8]) -> Result<Observation, PradsError> {
    let arp =
        ArpPacket::new(payload).ok_or_else(|| PradsError::Truncated("arp header".to_string()))?;
    let sender_ip = arp.get_sender_proto_addr();
    if sender_ip.is_unspecified() {
        // ARP probe with a zero sender; nothing to record
        return Err(PradsError::Parse("arp probe without sender ip".to_string()));
    }
    Ok(Observation::Arp(ObservableArp {
        sender_ip,
        sender_mac: arp.get_sender_hw_addr(),
    }))
}

fn dissect_ipv4(payload: &[u8]) -> Result<Observation, PradsError> {
    let ip =
        Ipv4Packet::new(payload).ok_or_else(|| PradsError::Truncated("ipv4 header".to_string()))?;

    let ttl = ip.get_ttl();
    let gttl = normalize_ttl(ttl);
    let meta = IpMeta {
        src: ip.get_source(),
        dst: ip.get_destination(),
        ttl,
        gttl,
        distance: gttl - ttl,
        df: ip.get_flags() == 2,
        ipopts: ip.get_header_length() > 5,
        len: ip.get_total_length(),
        id: ip.get_identification(),
        flags: ip.get_flags(),
        frag_offset: ip.get_fragment_offset(),
        tos: (ip.get_dscp() << 2) | ip.get_ecn(),
    };

    match ip.get_next_level_protocol() {
        IpNextHeaderProtocols::Tcp => dissect_tcp(meta, ip.payload()),
        IpNextHeaderProtocols::Udp => dissect_udp(meta, ip.payload()),
        IpNextHeaderProtocols::Icmp => dissect_icmp(meta, ip.payload()),
        other => Err(PradsError::UnsupportedProtocol(format!(
            "ip protocol {}",
            other.0
        ))),
    }
}

fn dissect_tcp(meta: IpMeta, payload: &[u8]) -> Result<Observation, PradsError> {
    use TcpFlags::{ACK, SYN};

    let tcp =
        TcpPacket::new(payload).ok_or_else(|| PradsError::Truncated("tcp header".to_string()))?;
    let flags = tcp.get_flags();
    let kind = if flags & SYN != 0 {
        if flags & ACK != 0 {
            TcpKind::SynAck
        } else {
            TcpKind::Syn
        }
    } else {
        TcpKind::Other
    };

    let observation = if kind == TcpKind::Syn || kind == TcpKind::SynAck {
        Some(observe_handshake(&meta, &tcp, flags))
    } else {
        None
    };

    Ok(Observation::Tcp(ObservableTcp {
        src_port: tcp.get_source(),
        dst_port: tcp.get_destination(),
        observation,
        payload: tcp.payload().to_vec(),
        ip: meta,
        kind,
    }))
}

fn observe_handshake(meta: &IpMeta, tcp: &TcpPacket, flags: u8) -> TcpObservation {
    use TcpFlags::{ACK, SYN};

    let mut quirks = QuirkSet::empty();
    let (olayout, mss, wscale) = parse_tcp_options(tcp.get_options_raw(), &mut quirks);

    if meta.id == 0 {
        quirks.set(Quirk::ZeroId);
    }
    if meta.ipopts {
        quirks.set(Quirk::IpOpt);
    }
    if tcp.get_urgent_ptr() != 0 {
        quirks.set(Quirk::Urgent);
    }
    if tcp.get_reserved() != 0 {
        quirks.set(Quirk::Reserved);
    }
    if tcp.get_acknowledgement() != 0 {
        quirks.set(Quirk::Ack);
    }
    if flags & !(SYN | ACK) != 0 {
        quirks.set(Quirk::Flags);
    }
    if !tcp.payload().is_empty() {
        quirks.set(Quirk::Data);
    }

    TcpObservation {
        winsize: tcp.get_window(),
        mss,
        wscale,
        gttl: meta.gttl,
        df: meta.df,
        size: if meta.len < 100 { meta.len } else { 0 },
        olayout,
        quirks,
    }
}

/// Walks the raw TCP option bytes the way the fingerprint format defines
/// them. A length shorter than 2 or pointing past the end raises the `!`
/// quirk and stops the walk.
fn parse_tcp_options(
    raw: &[u8],
    quirks: &mut QuirkSet,
) -> (Vec<TcpOpt>, Option<u16>, Option<u8>) {
    let mut olayout = Vec::new();
    let mut mss = None;
    let mut wscale = None;
    let mut i = 0usize;

    while i < raw.len() {
        match raw[i] {
            0 => {
                olayout.push(TcpOpt::Eol);
                if i + 1 < raw.len() {
                    quirks.set(Quirk::PastEol);
                }
                break;
            }
            1 => {
                olayout.push(TcpOpt::Nop);
                i += 1;
            }
            kind => {
                let Some(&olen) = raw.get(i + 1) else {
                    quirks.set(Quirk::Broken);
                    break;
                };
                let olen = usize::from(olen);
                if olen < 2 || i + olen > raw.len() {
                    quirks.set(Quirk::Broken);
                    break;
                }
                match kind {
                    2 if olen >= 4 => {
                        let value = u16::from_be_bytes([raw[i + 2], raw[i + 3]]);
                        mss = Some(value);
                        olayout.push(TcpOpt::Mss(OptValue::Value(value)));
                    }
                    3 if olen >= 3 => {
                        wscale = Some(raw[i + 2]);
                        olayout.push(TcpOpt::Ws(OptValue::Value(u16::from(raw[i + 2]))));
                    }
                    4 => {
                        olayout.push(TcpOpt::SackOk);
                    }
                    8 if olen >= 10 => {
                        let tsval = u32::from_be_bytes([
                            raw[i + 2],
                            raw[i + 3],
                            raw[i + 4],
                            raw[i + 5],
                        ]);
                        let tsecr = u32::from_be_bytes([
                            raw[i + 6],
                            raw[i + 7],
                            raw[i + 8],
                            raw[i + 9],
                        ]);
                        olayout.push(if tsval != 0 { TcpOpt::Ts } else { TcpOpt::TsZero });
                        if tsecr != 0 {
                            quirks.set(Quirk::Tsecr);
                        }
                    }
                    2 | 3 | 8 => {
                        // known kind with an impossible length
                        quirks.set(Quirk::Broken);
                        return (olayout, mss, wscale);
                    }
                    other => {
                        olayout.push(TcpOpt::Unknown(other));
                    }
                }
                i += olen;
            }
        }
    }

    (olayout, mss, wscale)
}

fn dissect_udp(meta: IpMeta, payload: &[u8]) -> Result<Observation, PradsError> {
    let udp =
        UdpPacket::new(payload).ok_or_else(|| PradsError::Truncated("udp header".to_string()))?;
    let fplen = meta.len.saturating_sub(udp.get_length());
    Ok(Observation::Udp(ObservableUdp {
        src_port: udp.get_source(),
        dst_port: udp.get_destination(),
        fplen,
        payload: udp.payload().to_vec(),
        ip: meta,
    }))
}

fn dissect_icmp(meta: IpMeta, payload: &[u8]) -> Result<Observation, PradsError> {
    let icmp =
        IcmpPacket::new(payload).ok_or_else(|| PradsError::Truncated("icmp header".to_string()))?;
    Ok(Observation::Icmp(ObservableIcmp {
        itype: icmp.get_icmp_type().0,
        icode: icmp.get_icmp_code().0,
        ip: meta,
    }))
}
