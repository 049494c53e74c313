use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// One endpoint of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HalfKey {
    pub addr: IpAddr,
    pub port: u16,
}

impl HalfKey {
    pub fn new(addr: IpAddr, port: u16) -> Self {
        Self { addr, port }
    }
}

impl fmt::Display for HalfKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

/// Flow identity from two half-keys. `(A, B)` and `(B, A)` name the same
/// logical flow; the table resolves both to one entry and reports which
/// orientation the probe used.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowKey {
    pub a: HalfKey,
    pub b: HalfKey,
}

impl FlowKey {
    pub fn new(a: HalfKey, b: HalfKey) -> Self {
        Self { a, b }
    }

    /// Orientation-independent form: half-keys in sorted order.
    pub fn canonical(&self) -> FlowKey {
        if self.b < self.a {
            FlowKey {
                a: self.b,
                b: self.a,
            }
        } else {
            self.clone()
        }
    }

    pub fn reversed(&self) -> FlowKey {
        FlowKey {
            a: self.b,
            b: self.a,
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.a, self.b)
    }
}

/// How a probe key relates to the orientation the flow was created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn key() -> FlowKey {
        FlowKey::new(
            HalfKey::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 1234),
            HalfKey::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), 80),
        )
    }

    #[test]
    fn test_canonical_is_orientation_independent() {
        let k = key();
        assert_eq!(k.canonical(), k.reversed().canonical());
    }
}
