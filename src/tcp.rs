use std::fmt;

/// A single TCP option token as it appears in a fingerprint, in wire order.
///
/// Packets always carry concrete values; signature files may use `*` or `%n`
/// patterns inside the `M`/`W` tokens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TcpOpt {
    /// `N` - no-op padding
    Nop,
    /// `E` - explicit end of options
    Eol,
    /// `M<mss>` - maximum segment size
    Mss(OptValue),
    /// `W<scale>` - window scaling factor
    Ws(OptValue),
    /// `S` - selective ACK permitted
    SackOk,
    /// `T` - timestamp with a non-zero TSval
    Ts,
    /// `T0` - timestamp present but TSval is zero
    TsZero,
    /// `?<kind>` - option kind we do not model
    Unknown(u8),
}

/// Value slot of an `M` or `W` option token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OptValue {
    /// `*` - any value
    Any,
    /// `%n` - value must divide by n
    Mod(u16),
    /// literal value
    Value(u16),
}

impl fmt::Display for OptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptValue::Any => f.write_str("*"),
            OptValue::Mod(n) => write!(f, "%{n}"),
            OptValue::Value(n) => write!(f, "{n}"),
        }
    }
}

impl fmt::Display for TcpOpt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TcpOpt::Nop => f.write_str("N"),
            TcpOpt::Eol => f.write_str("E"),
            TcpOpt::Mss(v) => write!(f, "M{v}"),
            TcpOpt::Ws(v) => write!(f, "W{v}"),
            TcpOpt::SackOk => f.write_str("S"),
            TcpOpt::Ts => f.write_str("T"),
            TcpOpt::TsZero => f.write_str("T0"),
            TcpOpt::Unknown(kind) => write!(f, "?{kind}"),
        }
    }
}

/// Formats an option layout the way it appears in a fingerprint: a
/// comma-joined token list, or `.` when there are no options at all.
pub fn format_olayout(olayout: &[TcpOpt]) -> String {
    if olayout.is_empty() {
        return ".".to_owned();
    }
    olayout
        .iter()
        .map(|o| o.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Matches a signature option layout against an observed one.
///
/// Both lists must be the same length. `M*`/`W*` match any observed value,
/// `M%n` matches observed values divisible by n, and every other token must
/// be equal.
pub fn match_opts(spec: &[TcpOpt], observed: &[TcpOpt]) -> bool {
    if spec.len() != observed.len() {
        return false;
    }
    spec.iter().zip(observed.iter()).all(|(s, o)| match (s, o) {
        (TcpOpt::Mss(s), TcpOpt::Mss(o)) | (TcpOpt::Ws(s), TcpOpt::Ws(o)) => match (s, o) {
            (OptValue::Any, _) | (_, OptValue::Any) => true,
            (OptValue::Mod(n), OptValue::Value(v)) => *n != 0 && v % n == 0,
            (OptValue::Value(a), OptValue::Value(b)) => a == b,
            _ => false,
        },
        (s, o) => s == o,
    })
}

/// A protocol-level oddity that narrows a fingerprint match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Quirk {
    /// `P` - options continue past an EOL
    PastEol,
    /// `Z` - IP identification field is zero
    ZeroId,
    /// `I` - IP options present
    IpOpt,
    /// `U` - urgent pointer set
    Urgent,
    /// `X` - reserved (x2) bits set
    Reserved,
    /// `A` - non-zero ACK number on a packet without ACK semantics
    Ack,
    /// `F` - flags beyond SYN/ACK set
    Flags,
    /// `D` - payload on a handshake packet
    Data,
    /// `T` - non-zero TSecr on an initial SYN
    Tsecr,
    /// `!` - broken option length
    Broken,
}

/// Canonical quirk ordering. Both the fingerprint string and the signature
/// files list quirks in this order.
pub const QUIRK_ORDER: [(Quirk, char); 10] = [
    (Quirk::PastEol, 'P'),
    (Quirk::ZeroId, 'Z'),
    (Quirk::IpOpt, 'I'),
    (Quirk::Urgent, 'U'),
    (Quirk::Reserved, 'X'),
    (Quirk::Ack, 'A'),
    (Quirk::Flags, 'F'),
    (Quirk::Data, 'D'),
    (Quirk::Tsecr, 'T'),
    (Quirk::Broken, '!'),
];

/// The quirks of one packet or signature, held as a 10-bit mask so the
/// order-independent set comparison of the matcher is a plain equality test.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct QuirkSet(u16);

impl QuirkSet {
    pub fn empty() -> Self {
        QuirkSet(0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn set(&mut self, quirk: Quirk) {
        self.0 |= 1 << quirk as u16;
    }

    pub fn contains(self, quirk: Quirk) -> bool {
        self.0 & (1 << quirk as u16) != 0
    }

    pub fn from_chars(s: &str) -> Option<Self> {
        let mut quirks = QuirkSet::empty();
        if s == "." {
            return Some(quirks);
        }
        for c in s.chars() {
            let (quirk, _) = QUIRK_ORDER.iter().find(|(_, ch)| *ch == c)?;
            quirks.set(*quirk);
        }
        Some(quirks)
    }
}

impl fmt::Display for QuirkSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str(".");
        }
        for (quirk, c) in QUIRK_ORDER {
            if self.contains(quirk) {
                write!(f, "{c}")?;
            }
        }
        Ok(())
    }
}

/// Window size expression of a TCP signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WssSpec {
    /// `*` - any window size
    Any,
    /// `%n` - window size divides by n
    Mod(u32),
    /// `S<n>` - window size is n times the MSS
    Mss(u32),
    /// `T<n>` - window size is n times the MTU (MSS + 40)
    Mtu(u32),
    /// literal window size
    Value(u32),
}

impl fmt::Display for WssSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WssSpec::Any => f.write_str("*"),
            WssSpec::Mod(n) => write!(f, "%{n}"),
            WssSpec::Mss(n) => write!(f, "S{n}"),
            WssSpec::Mtu(n) => write!(f, "T{n}"),
            WssSpec::Value(n) => write!(f, "{n}"),
        }
    }
}

/// One record of an OS fingerprint file:
/// `wss:ttl:df:size:options:quirks:os:details`.
#[derive(Clone, Debug, PartialEq)]
pub struct TcpSignature {
    pub wss: WssSpec,
    /// initial TTL used by the OS.
    pub ittl: u8,
    /// "don't fragment" bit.
    pub df: bool,
    /// packet size bucket; 0 means "at least 100 bytes".
    pub size: u16,
    /// layout and ordering of TCP options, if any.
    pub olayout: Vec<TcpOpt>,
    /// quirks observed in IP or TCP headers.
    pub quirks: QuirkSet,
    /// OS label; a leading `@` marks a generic signature.
    pub os: String,
    /// OS flavor or version details.
    pub details: String,
}

impl TcpSignature {
    /// A generic signature matches only when no specific one does.
    pub fn is_generic(&self) -> bool {
        self.os.starts_with('@')
    }

    /// Number of option tokens, the second level of the signature tree.
    pub fn optcnt(&self) -> u8 {
        self.olayout.len() as u8
    }

    /// True unless the layout carries a timestamp with a non-zero TSval.
    /// An absent timestamp and `T0` land in the same bucket.
    pub fn t0(&self) -> bool {
        !self.olayout.iter().any(|o| matches!(o, TcpOpt::Ts))
    }

    /// MSS constraint lifted out of the option layout, or `*` if absent.
    pub fn mss(&self) -> OptValue {
        self.olayout
            .iter()
            .find_map(|o| match o {
                TcpOpt::Mss(v) => Some(*v),
                _ => None,
            })
            .unwrap_or(OptValue::Any)
    }

    /// Window scale constraint lifted out of the option layout, or `*`.
    pub fn wsc(&self) -> OptValue {
        self.olayout
            .iter()
            .find_map(|o| match o {
                TcpOpt::Ws(v) => Some(*v),
                _ => None,
            })
            .unwrap_or(OptValue::Any)
    }
}

impl fmt::Display for TcpSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}:{}:{}:{}",
            self.wss,
            self.ittl,
            u8::from(self.df),
            self.size,
            format_olayout(&self.olayout),
            self.quirks,
            self.os,
            self.details
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quirk_set_roundtrip() {
        let quirks = QuirkSet::from_chars("ZAT").unwrap();
        assert!(quirks.contains(Quirk::ZeroId));
        assert!(quirks.contains(Quirk::Ack));
        assert!(quirks.contains(Quirk::Tsecr));
        assert!(!quirks.contains(Quirk::Broken));
        // display is canonical order, not insertion order
        assert_eq!(QuirkSet::from_chars("TAZ").unwrap().to_string(), "ZAT");
    }

    #[test]
    fn quirk_set_empty_is_dot() {
        assert_eq!(QuirkSet::empty().to_string(), ".");
        assert_eq!(QuirkSet::from_chars(".").unwrap(), QuirkSet::empty());
    }

    #[test]
    fn quirk_set_rejects_unknown_chars() {
        assert!(QuirkSet::from_chars("Q").is_none());
    }

    #[test]
    fn opts_match_literal_and_wildcard() {
        let observed = vec![
            TcpOpt::Mss(OptValue::Value(1460)),
            TcpOpt::SackOk,
            TcpOpt::TsZero,
            TcpOpt::Nop,
            TcpOpt::Ws(OptValue::Value(7)),
        ];
        let exact = observed.clone();
        let wild = vec![
            TcpOpt::Mss(OptValue::Any),
            TcpOpt::SackOk,
            TcpOpt::TsZero,
            TcpOpt::Nop,
            TcpOpt::Ws(OptValue::Any),
        ];
        let modded = vec![
            TcpOpt::Mss(OptValue::Mod(10)),
            TcpOpt::SackOk,
            TcpOpt::TsZero,
            TcpOpt::Nop,
            TcpOpt::Ws(OptValue::Value(7)),
        ];
        assert!(match_opts(&exact, &observed));
        assert!(match_opts(&wild, &observed));
        assert!(match_opts(&modded, &observed));
        assert!(!match_opts(&exact[..4], &observed));
    }

    #[test]
    fn opts_match_rejects_t_vs_t0() {
        assert!(!match_opts(&[TcpOpt::Ts], &[TcpOpt::TsZero]));
    }

    #[test]
    fn signature_display() {
        let sig = TcpSignature {
            wss: WssSpec::Mss(4),
            ittl: 64,
            df: true,
            size: 60,
            olayout: vec![
                TcpOpt::Mss(OptValue::Value(1460)),
                TcpOpt::SackOk,
                TcpOpt::TsZero,
                TcpOpt::Nop,
                TcpOpt::Ws(OptValue::Value(7)),
            ],
            quirks: QuirkSet::empty(),
            os: "Linux".to_owned(),
            details: "2.6".to_owned(),
        };
        assert_eq!(sig.to_string(), "S4:64:1:60:M1460,S,T0,N,W7:.:Linux:2.6");
        assert_eq!(sig.optcnt(), 5);
        assert!(sig.t0());
        assert_eq!(sig.mss(), OptValue::Value(1460));
        assert_eq!(sig.wsc(), OptValue::Value(7));
    }
}
