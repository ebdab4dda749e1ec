use crate::db::{MssLevel, OptsLevel, SignatureDb, TcpSigDb, TtlLevel, WssLevel};
use crate::packet::{ObservableIcmp, ObservableUdp, TcpObservation};
use crate::tcp::{match_opts, WssSpec};
use crate::ttl::normalize_ttl;
use tracing::trace;

/// One OS identification out of the TCP tree.
#[derive(Clone, Debug, PartialEq)]
pub struct OsMatch {
    pub os: String,
    pub details: String,
    /// true when only a wildcard window-size arm matched.
    pub guessed: bool,
}

/// Matches observations against the loaded signature databases. The
/// databases are read-only after load; the matcher only borrows them.
pub struct SignatureMatcher<'a> {
    db: &'a SignatureDb,
}

impl<'a> SignatureMatcher<'a> {
    pub fn new(db: &'a SignatureDb) -> Self {
        Self { db }
    }

    pub fn match_syn(&self, observed: &TcpObservation) -> Vec<OsMatch> {
        match_tcp(&self.db.syn, observed)
    }

    pub fn match_synack(&self, observed: &TcpObservation) -> Vec<OsMatch> {
        match_tcp(&self.db.synack, observed)
    }

    /// ICMP misses still produce an asset, so the caller gets the UNKNOWN
    /// pair instead of nothing.
    pub fn match_icmp(&self, observed: &ObservableIcmp) -> (String, String) {
        match self.db.icmp.lookup(&observed.lookup_values()) {
            Some((os, details)) => (os.to_string(), details.to_string()),
            None => ("UNKNOWN".to_string(), "UNKNOWN".to_string()),
        }
    }

    /// UDP misses are dropped by the caller.
    pub fn match_udp(&self, observed: &ObservableUdp) -> Option<(String, String)> {
        self.db
            .udp
            .lookup(&observed.lookup_values())
            .map(|(os, details)| (os.to_string(), details.to_string()))
    }
}

/// The hierarchical SYN/SYN+ACK descent: exact keys down to the quirk set,
/// then the rule-based window arms with a wildcard fuzzy fallback, the
/// ordered option-layout scan, the one-extra-hop TTL retry, and the
/// generic-label filter.
fn match_tcp(tree: &TcpSigDb, observed: &TcpObservation) -> Vec<OsMatch> {
    let Some(by_optcnt) = tree.by_size.get(&observed.size) else {
        return vec![];
    };
    let Some(level) = by_optcnt.get(&observed.optcnt()) else {
        return vec![];
    };
    let quirk_level =
        &level.slots[usize::from(observed.t0())][usize::from(observed.df)];
    let Some(mss_level) = quirk_level.by_quirks.get(&observed.quirks) else {
        return vec![];
    };

    let mut primary: Vec<&OptsLevel> = Vec::new();
    let mut fuzzy: Vec<&OptsLevel> = Vec::new();
    for wsc_level in mss_branches(mss_level, observed) {
        let mut wss_levels: Vec<&WssLevel> = Vec::new();
        if let Some(wscale) = observed.wscale {
            if let Some(exact) = wsc_level.exact.get(&wscale) {
                wss_levels.push(exact);
            }
        }
        if let Some(ref any) = wsc_level.any {
            wss_levels.push(&**any);
        }

        for wss_level in wss_levels {
            for (spec, opts_level) in &wss_level.children {
                match wss_arm(*spec, observed) {
                    WssArm::Primary => primary.push(opts_level),
                    WssArm::Fuzzy => fuzzy.push(opts_level),
                    WssArm::Miss => {}
                }
            }
        }
    }

    let (candidates, guessed) = if primary.is_empty() {
        (fuzzy, true)
    } else {
        (primary, false)
    };
    if guessed && !candidates.is_empty() {
        trace!("window size missed, falling back to wildcard candidates");
    }

    let mut matches = Vec::new();
    for opts_level in candidates {
        let Some(ttl_level) = first_opts_match(opts_level, observed) else {
            continue;
        };
        if let Some(leaf) = ttl_lookup(ttl_level, observed.gttl) {
            for (details, os) in leaf {
                matches.push(OsMatch {
                    os: os.clone(),
                    details: details.clone(),
                    guessed,
                });
            }
        }
    }

    // a generic (@-prefixed) label only survives when nothing specific matched
    if matches.iter().any(|m| !m.os.starts_with('@')) {
        matches.retain(|m| !m.os.starts_with('@'));
    }
    matches.sort_by(|a, b| a.os.cmp(&b.os).then_with(|| a.details.cmp(&b.details)));
    matches
}

fn mss_branches<'a>(
    level: &'a MssLevel,
    observed: &TcpObservation,
) -> Vec<&'a crate::db::WscLevel> {
    let mut branches = Vec::new();
    if let Some(mss) = observed.mss {
        if let Some(exact) = level.exact.get(&mss) {
            branches.push(exact);
        }
        for (modulo, branch) in &level.mods {
            if *modulo != 0 && mss % modulo == 0 {
                branches.push(branch);
            }
        }
    }
    if let Some(ref any) = level.any {
        branches.push(&**any);
    }
    branches
}

enum WssArm {
    Primary,
    Fuzzy,
    Miss,
}

fn wss_arm(spec: WssSpec, observed: &TcpObservation) -> WssArm {
    let winsize = u32::from(observed.winsize);
    let mss = observed.mss.map(u32::from);
    let hit = match spec {
        WssSpec::Value(v) => v == winsize,
        WssSpec::Mss(n) => mss.is_some_and(|mss| n * mss == winsize),
        WssSpec::Mtu(n) => mss.is_some_and(|mss| n * (mss + 40) == winsize),
        WssSpec::Mod(n) => n != 0 && winsize % n == 0,
        WssSpec::Any => return WssArm::Fuzzy,
    };
    if hit {
        WssArm::Primary
    } else {
        WssArm::Miss
    }
}

fn first_opts_match<'a>(
    level: &'a OptsLevel,
    observed: &TcpObservation,
) -> Option<&'a TtlLevel> {
    level
        .children
        .iter()
        .find(|(spec, _)| match_opts(spec, &observed.olayout))
        .map(|(_, ttl_level)| ttl_level)
}

fn ttl_lookup(level: &TtlLevel, gttl: u8) -> Option<&crate::db::OsLeaf> {
    if let Some(leaf) = level.by_ttl.get(&gttl) {
        return Some(leaf);
    }
    if gttl < 255 {
        // the sender may sit one normalization band further away
        return level.by_ttl.get(&normalize_ttl(gttl + 1));
    }
    None
}
