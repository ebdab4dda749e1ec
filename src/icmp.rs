use std::fmt;

/// A value at one level of the ICMP/UDP signature trees: an exact number or
/// the `*` wildcard. `.` in the IP-options column is read as `0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldSpec {
    Any,
    Value(u32),
}

impl fmt::Display for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldSpec::Any => f.write_str("*"),
            FieldSpec::Value(n) => write!(f, "{n}"),
        }
    }
}

/// One record of the ICMP fingerprint file:
/// `itype:icode:ttl:df:io:il:if:fo:tos:os:details`.
#[derive(Clone, Debug, PartialEq)]
pub struct IcmpSignature {
    pub itype: FieldSpec,
    pub icode: FieldSpec,
    pub ittl: FieldSpec,
    pub df: FieldSpec,
    /// IP options present (0/1).
    pub ipopts: FieldSpec,
    /// IP total length.
    pub iplen: FieldSpec,
    /// IP flags field.
    pub ipflags: FieldSpec,
    /// fragment offset.
    pub fragoff: FieldSpec,
    pub tos: FieldSpec,
    pub os: String,
    pub details: String,
}

impl fmt::Display for IcmpSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}",
            self.itype,
            self.icode,
            self.ittl,
            self.df,
            self.ipopts,
            self.iplen,
            self.ipflags,
            self.fragoff,
            self.tos,
            self.os,
            self.details
        )
    }
}

/// One record of the UDP fingerprint file:
/// `fplen:ttl:df:io:if:fo:os:details`.
#[derive(Clone, Debug, PartialEq)]
pub struct UdpSignature {
    /// `max(0, ip_len - udp_len)`.
    pub fplen: FieldSpec,
    pub ittl: FieldSpec,
    pub df: FieldSpec,
    pub ipopts: FieldSpec,
    pub ipflags: FieldSpec,
    pub fragoff: FieldSpec,
    pub os: String,
    pub details: String,
}

impl fmt::Display for UdpSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}:{}:{}:{}",
            self.fplen,
            self.ittl,
            self.df,
            self.ipopts,
            self.ipflags,
            self.fragoff,
            self.os,
            self.details
        )
    }
}
