use std::str::FromStr;

use crate::error::PradsError;
use crate::icmp::{FieldSpec, IcmpSignature, UdpSignature};
use crate::tcp::{OptValue, QuirkSet, TcpOpt, TcpSignature, WssSpec};
use nom::branch::alt;
use nom::bytes::complete::{is_not, tag, take_until};
use nom::character::complete::digit1;
use nom::combinator::{map, map_opt, map_res, rest};
use nom::multi::separated_list1;
use nom::sequence::{preceded, tuple};
use nom::IResult;

macro_rules! impl_from_str {
    ($ty:ty, $parse:ident) => {
        impl FromStr for $ty {
            type Err = PradsError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let (remaining, res) = $parse(s).map_err(|err| {
                    PradsError::Parse(format!("{}: {}: {}", stringify!($ty), s, err))
                })?;

                if !remaining.is_empty() {
                    Err(PradsError::Parse(format!(
                        "{}: trailing input: {}",
                        stringify!($ty),
                        remaining
                    )))
                } else {
                    Ok(res)
                }
            }
        }
    };
}

impl_from_str!(TcpSignature, parse_tcp_signature);
impl_from_str!(WssSpec, parse_wss_spec);
impl_from_str!(QuirkSet, parse_quirk_set);
impl_from_str!(IcmpSignature, parse_icmp_signature);
impl_from_str!(UdpSignature, parse_udp_signature);
impl_from_str!(FieldSpec, parse_field_spec);

fn parse_u8(input: &str) -> IResult<&str, u8> {
    map_res(digit1, |s: &str| s.parse::<u8>())(input)
}

fn parse_u16(input: &str) -> IResult<&str, u16> {
    map_res(digit1, |s: &str| s.parse::<u16>())(input)
}

fn parse_u32(input: &str) -> IResult<&str, u32> {
    map_res(digit1, |s: &str| s.parse::<u32>())(input)
}

fn parse_bool01(input: &str) -> IResult<&str, bool> {
    alt((map(tag("0"), |_| false), map(tag("1"), |_| true)))(input)
}

fn parse_wss_spec(input: &str) -> IResult<&str, WssSpec> {
    alt((
        map(tag("*"), |_| WssSpec::Any),
        map(preceded(tag("%"), parse_u32), WssSpec::Mod),
        map(preceded(tag("S"), parse_u32), WssSpec::Mss),
        // T and M both mean "n times MSS+40"; T is canonical
        map(preceded(tag("T"), parse_u32), WssSpec::Mtu),
        map(preceded(tag("M"), parse_u32), WssSpec::Mtu),
        map(parse_u32, WssSpec::Value),
    ))(input)
}

fn parse_opt_value(input: &str) -> IResult<&str, OptValue> {
    alt((
        map(tag("*"), |_| OptValue::Any),
        map(preceded(tag("%"), parse_u16), OptValue::Mod),
        map(parse_u16, OptValue::Value),
    ))(input)
}

fn parse_tcp_option(input: &str) -> IResult<&str, TcpOpt> {
    alt((
        map(tag("T0"), |_| TcpOpt::TsZero),
        map(tag("T"), |_| TcpOpt::Ts),
        map(tag("N"), |_| TcpOpt::Nop),
        map(tag("E"), |_| TcpOpt::Eol),
        map(tag("S"), |_| TcpOpt::SackOk),
        map(preceded(tag("M"), parse_opt_value), TcpOpt::Mss),
        map(preceded(tag("W"), parse_opt_value), TcpOpt::Ws),
        map(preceded(tag("?"), parse_u8), TcpOpt::Unknown),
    ))(input)
}

fn parse_olayout(input: &str) -> IResult<&str, Vec<TcpOpt>> {
    alt((
        map(tag("."), |_| vec![]),
        separated_list1(tag(","), parse_tcp_option),
    ))(input)
}

fn parse_quirk_set(input: &str) -> IResult<&str, QuirkSet> {
    map_opt(is_not(":"), QuirkSet::from_chars)(input)
}

fn parse_tcp_signature(input: &str) -> IResult<&str, TcpSignature> {
    let (input, (wss, _, ittl, _, df, _, size, _, olayout, _, quirks, _, os, _, details)) =
        tuple((
            parse_wss_spec,
            tag(":"),
            parse_u8,
            tag(":"),
            parse_bool01,
            tag(":"),
            parse_u16,
            tag(":"),
            parse_olayout,
            tag(":"),
            parse_quirk_set,
            tag(":"),
            take_until(":"),
            tag(":"),
            rest,
        ))(input)?;

    Ok((
        input,
        TcpSignature {
            wss,
            ittl,
            df,
            size,
            olayout,
            quirks,
            os: os.to_string(),
            details: details.to_string(),
        },
    ))
}

fn parse_field_spec(input: &str) -> IResult<&str, FieldSpec> {
    alt((
        map(tag("*"), |_| FieldSpec::Any),
        // `.` in the IP-options column means "none", i.e. zero
        map(tag("."), |_| FieldSpec::Value(0)),
        map(parse_u32, FieldSpec::Value),
    ))(input)
}

fn parse_icmp_signature(input: &str) -> IResult<&str, IcmpSignature> {
    let (
        input,
        (itype, _, icode, _, ittl, _, df, _, ipopts, _, iplen, _, ipflags, _, fragoff, _, tos, _, os, _, details),
    ) = tuple((
        parse_field_spec,
        tag(":"),
        parse_field_spec,
        tag(":"),
        parse_field_spec,
        tag(":"),
        parse_field_spec,
        tag(":"),
        parse_field_spec,
        tag(":"),
        parse_field_spec,
        tag(":"),
        parse_field_spec,
        tag(":"),
        parse_field_spec,
        tag(":"),
        parse_field_spec,
        tag(":"),
        take_until(":"),
        tag(":"),
        rest,
    ))(input)?;

    Ok((
        input,
        IcmpSignature {
            itype,
            icode,
            ittl,
            df,
            ipopts,
            iplen,
            ipflags,
            fragoff,
            tos,
            os: os.to_string(),
            details: details.to_string(),
        },
    ))
}

fn parse_udp_signature(input: &str) -> IResult<&str, UdpSignature> {
    let (input, (fplen, _, ittl, _, df, _, ipopts, _, ipflags, _, fragoff, _, os, _, details)) =
        tuple((
            parse_field_spec,
            tag(":"),
            parse_field_spec,
            tag(":"),
            parse_field_spec,
            tag(":"),
            parse_field_spec,
            tag(":"),
            parse_field_spec,
            tag(":"),
            parse_field_spec,
            tag(":"),
            take_until(":"),
            tag(":"),
            rest,
        ))(input)?;

    Ok((
        input,
        UdpSignature {
            fplen,
            ittl,
            df,
            ipopts,
            ipflags,
            fragoff,
            os: os.to_string(),
            details: details.to_string(),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lazy_static::lazy_static;

    lazy_static! {
        static ref TCP_SIGNATURES: Vec<(&'static str, TcpSignature)> = vec![
            (
                "S4:64:1:60:M1460,S,T0,N,W7:.:Linux:2.6",
                TcpSignature {
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
                },
            ),
            (
                "65535:128:1:64:M*,N,W*,N,N,T0,N,N,S:.:Windows:XP SP1+, 2000 SP3",
                TcpSignature {
                    wss: WssSpec::Value(65535),
                    ittl: 128,
                    df: true,
                    size: 64,
                    olayout: vec![
                        TcpOpt::Mss(OptValue::Any),
                        TcpOpt::Nop,
                        TcpOpt::Ws(OptValue::Any),
                        TcpOpt::Nop,
                        TcpOpt::Nop,
                        TcpOpt::TsZero,
                        TcpOpt::Nop,
                        TcpOpt::Nop,
                        TcpOpt::SackOk,
                    ],
                    quirks: QuirkSet::empty(),
                    os: "Windows".to_owned(),
                    details: "XP SP1+, 2000 SP3".to_owned(),
                },
            ),
            (
                "%8192:255:0:44:M%512:Z:@AnyOS:modulo test",
                TcpSignature {
                    wss: WssSpec::Mod(8192),
                    ittl: 255,
                    df: false,
                    size: 44,
                    olayout: vec![TcpOpt::Mss(OptValue::Mod(512))],
                    quirks: QuirkSet::from_chars("Z").unwrap(),
                    os: "@AnyOS".to_owned(),
                    details: "modulo test".to_owned(),
                },
            ),
            (
                "T4:64:0:40:.:ZA!:weird:no options",
                TcpSignature {
                    wss: WssSpec::Mtu(4),
                    ittl: 64,
                    df: false,
                    size: 40,
                    olayout: vec![],
                    quirks: QuirkSet::from_chars("ZA!").unwrap(),
                    os: "weird".to_owned(),
                    details: "no options".to_owned(),
                },
            ),
        ];
        static ref ICMP_SIGNATURES: Vec<(&'static str, IcmpSignature)> = vec![(
            "8:0:64:1:.:84:2:0:0:Linux:2.4/2.6 ping",
            IcmpSignature {
                itype: FieldSpec::Value(8),
                icode: FieldSpec::Value(0),
                ittl: FieldSpec::Value(64),
                df: FieldSpec::Value(1),
                ipopts: FieldSpec::Value(0),
                iplen: FieldSpec::Value(84),
                ipflags: FieldSpec::Value(2),
                fragoff: FieldSpec::Value(0),
                tos: FieldSpec::Value(0),
                os: "Linux".to_owned(),
                details: "2.4/2.6 ping".to_owned(),
            },
        )];
        static ref UDP_SIGNATURES: Vec<(&'static str, UdpSignature)> = vec![(
            "20:64:0:.:0:0:Linux:generic dgram",
            UdpSignature {
                fplen: FieldSpec::Value(20),
                ittl: FieldSpec::Value(64),
                df: FieldSpec::Value(0),
                ipopts: FieldSpec::Value(0),
                ipflags: FieldSpec::Value(0),
                fragoff: FieldSpec::Value(0),
                os: "Linux".to_owned(),
                details: "generic dgram".to_owned(),
            },
        )];
    }

    #[test]
    fn tcp_signature_roundtrip() {
        for (s, sig) in TCP_SIGNATURES.iter() {
            assert_eq!(&s.parse::<TcpSignature>().unwrap(), sig, "parse {s}");
        }
        // canonical forms print back unchanged
        let canonical = "S4:64:1:60:M1460,S,T0,N,W7:.:Linux:2.6";
        assert_eq!(
            canonical.parse::<TcpSignature>().unwrap().to_string(),
            canonical
        );
    }

    #[test]
    fn tcp_signature_derived_levels() {
        let sig: TcpSignature = "%8192:255:0:44:M%512:Z:@AnyOS:modulo test".parse().unwrap();
        assert_eq!(sig.optcnt(), 1);
        assert!(sig.t0());
        assert_eq!(sig.mss(), OptValue::Mod(512));
        assert_eq!(sig.wsc(), OptValue::Any);
        assert!(sig.is_generic());
    }

    #[test]
    fn tcp_signature_rejects_garbage() {
        assert!("S4:64".parse::<TcpSignature>().is_err());
        assert!("S4:64:2:60:.:.:os:details".parse::<TcpSignature>().is_err());
        assert!("S4:64:1:60:Q9:.:os:details".parse::<TcpSignature>().is_err());
    }

    #[test]
    fn icmp_signature_parse() {
        for (s, sig) in ICMP_SIGNATURES.iter() {
            assert_eq!(&s.parse::<IcmpSignature>().unwrap(), sig);
        }
        let wild: IcmpSignature = "8:0:*:*:.:*:*:0:0:FreeBSD:ping".parse().unwrap();
        assert_eq!(wild.ittl, FieldSpec::Any);
        assert_eq!(wild.iplen, FieldSpec::Any);
    }

    #[test]
    fn udp_signature_parse() {
        for (s, sig) in UDP_SIGNATURES.iter() {
            assert_eq!(&s.parse::<UdpSignature>().unwrap(), sig);
        }
    }
}
