use std::collections::HashMap;

use crate::config::Config;
use crate::error::PradsError;
use crate::icmp::{FieldSpec, IcmpSignature, UdpSignature};
use crate::mac::MacDb;
use crate::mtu::{strip_comment, MtuDb};
use crate::service::ServiceDb;
use crate::tcp::{OptValue, QuirkSet, TcpOpt, TcpSignature};
use tracing::warn;

/// An OS identification held at a tree leaf. Distinct details coexist under
/// one leaf; re-inserting the same details overwrites (and warns).
pub type OsLeaf = HashMap<String, String>;

/// The SYN or SYN+ACK signature tree, indexed in the order
/// `size → optcnt → t0 → df → quirks → mss → wsc → wss → opts → ttl`.
///
/// The two boolean levels are arrays, the sparse levels hash maps, and the
/// ordered option level a vector scanned first-match-first.
#[derive(Debug, Default)]
pub struct TcpSigDb {
    pub(crate) by_size: HashMap<u16, HashMap<u8, T0DfLevel>>,
    records: Vec<TcpSignature>,
}

#[derive(Debug, Default)]
pub(crate) struct T0DfLevel {
    /// indexed `[t0][df]`
    pub(crate) slots: [[QuirkLevel; 2]; 2],
}

#[derive(Debug, Default)]
pub(crate) struct QuirkLevel {
    pub(crate) by_quirks: HashMap<QuirkSet, MssLevel>,
}

#[derive(Debug, Default)]
pub(crate) struct MssLevel {
    pub(crate) exact: HashMap<u16, WscLevel>,
    pub(crate) mods: HashMap<u16, WscLevel>,
    pub(crate) any: Option<Box<WscLevel>>,
}

#[derive(Debug, Default)]
pub(crate) struct WscLevel {
    pub(crate) exact: HashMap<u8, WssLevel>,
    pub(crate) any: Option<Box<WssLevel>>,
}

#[derive(Debug, Default)]
pub(crate) struct WssLevel {
    pub(crate) children: HashMap<crate::tcp::WssSpec, OptsLevel>,
}

#[derive(Debug, Default)]
pub(crate) struct OptsLevel {
    /// insertion order is file order; the matcher picks the first hit
    pub(crate) children: Vec<(Vec<TcpOpt>, TtlLevel)>,
}

#[derive(Debug, Default)]
pub(crate) struct TtlLevel {
    pub(crate) by_ttl: HashMap<u8, OsLeaf>,
}

impl TcpSigDb {
    pub fn parse(name: &str, content: &str) -> Result<Self, PradsError> {
        let mut db = TcpSigDb::default();
        for (lineno, line) in content.lines().enumerate() {
            let line = strip_comment(line);
            if line.is_empty() {
                continue;
            }
            let sig: TcpSignature = line.parse().map_err(|e| PradsError::Signature {
                file: name.to_string(),
                line: lineno + 1,
                message: format!("{e}"),
            })?;
            db.insert(sig, name);
        }
        Ok(db)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[TcpSignature] {
        &self.records
    }

    fn insert(&mut self, sig: TcpSignature, file: &str) {
        let quirk_level = &mut self
            .by_size
            .entry(sig.size)
            .or_default()
            .entry(sig.optcnt())
            .or_default()
            .slots[usize::from(sig.t0())][usize::from(sig.df)];

        let mss_level = quirk_level.by_quirks.entry(sig.quirks).or_default();
        let wsc_level = match sig.mss() {
            OptValue::Value(n) => mss_level.exact.entry(n).or_default(),
            OptValue::Mod(n) => mss_level.mods.entry(n).or_default(),
            OptValue::Any => &mut **mss_level.any.get_or_insert_with(Default::default),
        };
        let wss_level = match sig.wsc() {
            OptValue::Value(n) => wsc_level.exact.entry(n as u8).or_default(),
            // a window scale never carries a modulo pattern in practice;
            // treat it as a wildcard rather than reject the file
            OptValue::Mod(_) | OptValue::Any => {
                &mut **wsc_level.any.get_or_insert_with(Default::default)
            }
        };
        let opts_level = wss_level.children.entry(sig.wss).or_default();
        let ttl_level = match opts_level
            .children
            .iter_mut()
            .find(|(layout, _)| layout == &sig.olayout)
        {
            Some((_, level)) => level,
            None => {
                opts_level.children.push((sig.olayout.clone(), TtlLevel::default()));
                &mut opts_level.children.last_mut().expect("just pushed").1
            }
        };
        let leaf = ttl_level.by_ttl.entry(sig.ittl).or_default();
        if let Some(previous) = leaf.insert(sig.details.clone(), sig.os.clone()) {
            warn!(
                file,
                os = %sig.os,
                details = %sig.details,
                %previous,
                "duplicate signature, overwriting"
            );
        }
        self.records.push(sig);
    }
}

/// Key of one level of the ICMP/UDP trees.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum FieldKey {
    Any,
    Value(u32),
}

impl From<FieldSpec> for FieldKey {
    fn from(spec: FieldSpec) -> Self {
        match spec {
            FieldSpec::Any => FieldKey::Any,
            FieldSpec::Value(n) => FieldKey::Value(n),
        }
    }
}

/// A uniform wildcard tree for the ICMP and UDP databases: exact key first,
/// `*` as the fallback, no backtracking.
#[derive(Debug, Default)]
pub struct FpTree {
    pub(crate) root: FpNode,
    records: Vec<String>,
}

#[derive(Debug, Default)]
pub(crate) struct FpNode {
    pub(crate) children: HashMap<FieldKey, FpNode>,
    pub(crate) leaf: Option<(String, String)>,
}

impl FpTree {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[String] {
        &self.records
    }

    fn insert(&mut self, path: &[FieldSpec], record: String, os: &str, details: &str, file: &str) {
        let mut node = &mut self.root;
        for spec in path {
            node = node.children.entry(FieldKey::from(*spec)).or_default();
        }
        if node.leaf.is_some() {
            warn!(file, os, details, "duplicate signature, overwriting");
        }
        node.leaf = Some((os.to_string(), details.to_string()));
        self.records.push(record);
    }

    /// Walks the tree with the packet's values, preferring an exact child
    /// and falling back to `*` at every level.
    pub fn lookup(&self, values: &[u32]) -> Option<(&str, &str)> {
        let mut node = &self.root;
        for &value in values {
            node = node
                .children
                .get(&FieldKey::Value(value))
                .or_else(|| node.children.get(&FieldKey::Any))?;
        }
        node.leaf
            .as_ref()
            .map(|(os, details)| (os.as_str(), details.as_str()))
    }
}

/// Parses the ICMP fingerprint file into its tree; the tree level order
/// (`itype, icode, il, ttl, df, if, fo, io, tos`) differs from the record
/// field order.
pub fn parse_icmp_tree(name: &str, content: &str) -> Result<FpTree, PradsError> {
    let mut tree = FpTree::default();
    for (lineno, line) in content.lines().enumerate() {
        let line = strip_comment(line);
        if line.is_empty() {
            continue;
        }
        let sig: IcmpSignature = line.parse().map_err(|e| PradsError::Signature {
            file: name.to_string(),
            line: lineno + 1,
            message: format!("{e}"),
        })?;
        tree.insert(
            &[
                sig.itype,
                sig.icode,
                sig.iplen,
                sig.ittl,
                sig.df,
                sig.ipflags,
                sig.fragoff,
                sig.ipopts,
                sig.tos,
            ],
            sig.to_string(),
            &sig.os,
            &sig.details,
            name,
        );
    }
    Ok(tree)
}

/// Parses the UDP fingerprint file; tree order is
/// `fplen, ttl, df, if, fo, io`.
pub fn parse_udp_tree(name: &str, content: &str) -> Result<FpTree, PradsError> {
    let mut tree = FpTree::default();
    for (lineno, line) in content.lines().enumerate() {
        let line = strip_comment(line);
        if line.is_empty() {
            continue;
        }
        let sig: UdpSignature = line.parse().map_err(|e| PradsError::Signature {
            file: name.to_string(),
            line: lineno + 1,
            message: format!("{e}"),
        })?;
        tree.insert(
            &[
                sig.fplen,
                sig.ittl,
                sig.df,
                sig.ipflags,
                sig.fragoff,
                sig.ipopts,
            ],
            sig.to_string(),
            &sig.os,
            &sig.details,
            name,
        );
    }
    Ok(tree)
}

/// Every signature database the engine matches against. Read-only after
/// load.
#[derive(Debug)]
pub struct SignatureDb {
    pub syn: TcpSigDb,
    pub synack: TcpSigDb,
    pub icmp: FpTree,
    pub udp: FpTree,
    pub service_tcp: ServiceDb,
    pub service_udp: ServiceDb,
    pub mac: MacDb,
    pub mtu: MtuDb,
}

impl SignatureDb {
    /// Loads every database from the configured paths. An unset path falls
    /// back to the embedded default file; a set but unreadable or malformed
    /// file is fatal.
    pub fn load(config: &Config) -> Result<Self, PradsError> {
        Ok(SignatureDb {
            syn: TcpSigDb::parse(
                &config.sig_file_syn,
                &read_or_embedded(&config.sig_file_syn, include_str!("../config/os.fp"))?,
            )?,
            synack: TcpSigDb::parse(
                &config.sig_file_synack,
                &read_or_embedded(&config.sig_file_synack, include_str!("../config/osa.fp"))?,
            )?,
            icmp: parse_icmp_tree(
                &config.sig_file_icmp,
                &read_or_embedded(&config.sig_file_icmp, include_str!("../config/icmp.fp"))?,
            )?,
            udp: parse_udp_tree(
                &config.sig_file_udp,
                &read_or_embedded(&config.sig_file_udp, include_str!("../config/udp.fp"))?,
            )?,
            service_tcp: ServiceDb::parse(
                &config.sig_file_serv_tcp,
                &read_or_embedded(
                    &config.sig_file_serv_tcp,
                    include_str!("../config/tcp-service.sig"),
                )?,
            )?,
            service_udp: ServiceDb::parse(
                &config.sig_file_serv_udp,
                &read_or_embedded(
                    &config.sig_file_serv_udp,
                    include_str!("../config/udp-service.sig"),
                )?,
            )?,
            mac: MacDb::parse(
                &config.mac_file,
                &read_or_embedded(&config.mac_file, include_str!("../config/mac.sig"))?,
            )?,
            mtu: MtuDb::parse(
                &config.sig_file_mtu,
                &read_or_embedded(&config.sig_file_mtu, include_str!("../config/mtu.sig"))?,
            )?,
        })
    }

    /// The signature set shipped inside the binary.
    pub fn load_embedded() -> Result<Self, PradsError> {
        Self::load(&Config::default())
    }
}

fn read_or_embedded(path: &str, embedded: &str) -> Result<String, PradsError> {
    if path.is_empty() {
        Ok(embedded.to_string())
    } else {
        std::fs::read_to_string(path)
            .map_err(|e| PradsError::Config(format!("cannot read signature file {path}: {e}")))
    }
}
