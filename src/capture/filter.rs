//! Software evaluation of a small BPF-style filter language.
//!
//! Supported: `ip`, `tcp`, `udp`, `icmp`, `[src|dst] port N`,
//! `[src|dst] host A.B.C.D`, combined with `not`/`!`, `and`/`&&`,
//! `or`/`||` and parentheses. An empty expression matches every frame.

use std::fmt;
use std::net::Ipv4Addr;

use crate::error::ConfigError;
use crate::packet::{self, DecodedPacket, NotApplicable, RawPacket, Transport};

const ICMP: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dir {
    Src,
    Dst,
    Either,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    Ip,
    Tcp,
    Udp,
    Icmp,
    Port(Dir, u16),
    Host(Dir, Ipv4Addr),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    fn eval(&self, pkt: &Result<DecodedPacket, NotApplicable>) -> bool {
        let pkt = match (self, pkt) {
            (Expr::Not(inner), _) => return !inner.eval(pkt),
            (Expr::And(a, b), _) => return a.eval(pkt) && b.eval(pkt),
            (Expr::Or(a, b), _) => return a.eval(pkt) || b.eval(pkt),
            (_, Ok(pkt)) => pkt,
            // An IPv4 ethertype with a broken header is still `ip`.
            (Expr::Ip, Err(NotApplicable::Malformed(_))) => return true,
            (_, Err(_)) => return false,
        };
        match *self {
            Expr::Tcp => matches!(pkt.transport, Transport::Tcp { .. }),
            Expr::Udp => matches!(pkt.transport, Transport::Udp { .. }),
            Expr::Icmp => pkt.ip.protocol == ICMP,
            Expr::Port(dir, port) => {
                if pkt.transport == Transport::None {
                    return false;
                }
                let (src, dst) = pkt.transport.ports();
                match dir {
                    Dir::Src => src == port,
                    Dir::Dst => dst == port,
                    Dir::Either => src == port || dst == port,
                }
            }
            Expr::Host(dir, addr) => match dir {
                Dir::Src => pkt.ip.source == addr,
                Dir::Dst => pkt.ip.destination == addr,
                Dir::Either => pkt.ip.source == addr || pkt.ip.destination == addr,
            },
            Expr::Ip | Expr::Not(_) | Expr::And(..) | Expr::Or(..) => true,
        }
    }
}

/// A parsed capture filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketFilter {
    source: String,
    expr: Option<Expr>,
}

impl PacketFilter {
    pub fn parse(source: &str) -> Result<Self, ConfigError> {
        let tokens = tokenize(source);
        if tokens.is_empty() {
            return Ok(PacketFilter {
                source: String::new(),
                expr: None,
            });
        }

        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
        };
        let expr = parser.or().map_err(|reason| ConfigError::Filter {
            expr: source.to_string(),
            reason,
        })?;
        if let Some(extra) = parser.peek() {
            return Err(ConfigError::Filter {
                expr: source.to_string(),
                reason: format!("unexpected token {:?}", extra),
            });
        }

        Ok(PacketFilter {
            source: source.trim().to_string(),
            expr: Some(expr),
        })
    }

    /// Filter that accepts every frame.
    pub fn any() -> Self {
        PacketFilter {
            source: String::new(),
            expr: None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, packet: &RawPacket<'_>) -> bool {
        match &self.expr {
            None => true,
            Some(expr) => expr.eval(&packet::decode(packet)),
        }
    }
}

impl Default for PacketFilter {
    fn default() -> Self {
        PacketFilter::any()
    }
}

impl fmt::Display for PacketFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.source.is_empty() {
            write!(f, "<all traffic>")
        } else {
            write!(f, "{}", self.source)
        }
    }
}

fn tokenize(source: &str) -> Vec<String> {
    source
        .replace('(', " ( ")
        .replace(')', " ) ")
        .split_whitespace()
        .map(str::to_ascii_lowercase)
        .collect()
}

struct Parser<'a> {
    tokens: &'a [String],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn next(&mut self) -> Option<&'a str> {
        let tok = self.peek();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn or(&mut self) -> Result<Expr, String> {
        let mut lhs = self.and()?;
        while matches!(self.peek(), Some("or" | "||")) {
            self.pos += 1;
            let rhs = self.and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, String> {
        let mut lhs = self.unary()?;
        while matches!(self.peek(), Some("and" | "&&")) {
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if matches!(self.peek(), Some("not" | "!")) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, String> {
        let tok = self.next().ok_or_else(|| "unexpected end of expression".to_string())?;
        match tok {
            "(" => {
                let inner = self.or()?;
                match self.next() {
                    Some(")") => Ok(inner),
                    _ => Err("missing closing parenthesis".to_string()),
                }
            }
            "ip" => Ok(Expr::Ip),
            "tcp" => Ok(Expr::Tcp),
            "udp" => Ok(Expr::Udp),
            "icmp" => Ok(Expr::Icmp),
            "src" => self.qualified(Dir::Src),
            "dst" => self.qualified(Dir::Dst),
            "port" => self.port(Dir::Either),
            "host" => self.host(Dir::Either),
            other => Err(format!("unsupported primitive {:?}", other)),
        }
    }

    fn qualified(&mut self, dir: Dir) -> Result<Expr, String> {
        match self.next() {
            Some("port") => self.port(dir),
            Some("host") => self.host(dir),
            Some(other) => Err(format!("expected port or host after direction, got {:?}", other)),
            None => Err("expected port or host after direction".to_string()),
        }
    }

    fn port(&mut self, dir: Dir) -> Result<Expr, String> {
        let tok = self.next().ok_or_else(|| "missing port number".to_string())?;
        tok.parse::<u16>()
            .map(|p| Expr::Port(dir, p))
            .map_err(|_| format!("invalid port {:?}", tok))
    }

    fn host(&mut self, dir: Dir) -> Result<Expr, String> {
        let tok = self.next().ok_or_else(|| "missing host address".to_string())?;
        tok.parse::<Ipv4Addr>()
            .map(|a| Expr::Host(dir, a))
            .map_err(|_| format!("invalid IPv4 address {:?}", tok))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::synth::{arp_frame, ipv4_frame, L4};

    fn tcp_443() -> Vec<u8> {
        ipv4_frame(L4::Tcp { src: 443, dst: 51000 }, 64, 100, true)
    }

    fn udp_dns() -> Vec<u8> {
        ipv4_frame(L4::Udp { src: 40000, dst: 53 }, 64, 90, false)
    }

    fn accepts(filter: &str, frame: &[u8]) -> bool {
        PacketFilter::parse(filter)
            .unwrap()
            .matches(&RawPacket::ethernet(frame))
    }

    #[test]
    fn ip_filter_drops_non_ip() {
        assert!(accepts("ip", &tcp_443()));
        assert!(!accepts("ip", &arp_frame()));
        assert!(accepts("not ip", &arp_frame()));
    }

    #[test]
    fn broken_ipv4_header_still_matches_ip() {
        let mut frame = tcp_443();
        frame[14] = 0x43;
        assert!(accepts("ip", &frame));
        assert!(!accepts("tcp", &frame));
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(accepts("", &arp_frame()));
        assert!(accepts("   ", &tcp_443()));
    }

    #[test]
    fn protocol_and_port_primitives() {
        assert!(accepts("tcp", &tcp_443()));
        assert!(!accepts("udp", &tcp_443()));
        assert!(accepts("udp and dst port 53", &udp_dns()));
        assert!(!accepts("udp and src port 53", &udp_dns()));
        assert!(accepts("port 443", &tcp_443()));
        assert!(accepts("src host 10.0.0.1", &tcp_443()));
        assert!(!accepts("dst host 10.0.0.1", &tcp_443()));
    }

    #[test]
    fn precedence_and_parentheses() {
        // and binds tighter than or
        assert!(accepts("udp and port 1 or tcp", &tcp_443()));
        assert!(!accepts("udp and (port 1 or tcp)", &tcp_443()));
        assert!(accepts("ip && !(udp || icmp)", &tcp_443()));
    }

    #[test]
    fn parse_errors_name_the_expression() {
        for bad in ["port", "tcp and", "(tcp", "ip6", "port 70000", "host 300.1.1.1", "tcp udp"] {
            match PacketFilter::parse(bad) {
                Err(ConfigError::Filter { expr, .. }) => assert_eq!(expr, bad),
                other => panic!("{bad:?} parsed as {other:?}"),
            }
        }
    }
}
