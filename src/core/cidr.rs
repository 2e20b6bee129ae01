//! ST-007: IPv4 CIDR parsing and subnet partitioning.
//!
//! Subnets are carved sequentially from the start of the address space,
//! each aligned to its own block size, so a given partition scheme always
//! yields the same subnets.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Smallest subnet the provider allows.
pub const MAX_PREFIX: u8 = 28;

/// An IPv4 network in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Cidr {
    base: u32,
    prefix: u8,
}

impl Ipv4Cidr {
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self, String> {
        if prefix > 32 {
            return Err(format!("prefix /{} out of range", prefix));
        }
        let base = u32::from(addr);
        if base & !mask(prefix) != 0 {
            return Err(format!(
                "{}/{} has host bits set (network is {}/{})",
                addr,
                prefix,
                Ipv4Addr::from(base & mask(prefix)),
                prefix
            ));
        }
        Ok(Self { base, prefix })
    }

    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.base)
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Number of addresses in the block.
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix))
    }

    /// Whether `other` lies entirely inside this block.
    pub fn contains(&self, other: &Ipv4Cidr) -> bool {
        other.prefix >= self.prefix && (other.base & mask(self.prefix)) == self.base
    }

    /// Carve `count` subnets of `/mask_bits` for each group, in order.
    ///
    /// Returns one list per requested group.
    pub fn partition(&self, groups: &[(u8, usize)]) -> Result<Vec<Vec<Ipv4Cidr>>, String> {
        let start = u64::from(self.base);
        let end = start + self.size();
        let mut cursor = start;
        let mut out = Vec::with_capacity(groups.len());

        for &(mask_bits, count) in groups {
            if mask_bits < self.prefix || mask_bits > 32 {
                return Err(format!(
                    "subnet mask /{} does not fit in {}",
                    mask_bits, self
                ));
            }
            let block = 1u64 << (32 - u32::from(mask_bits));
            let mut subnets = Vec::with_capacity(count);
            for _ in 0..count {
                cursor = cursor.div_ceil(block) * block;
                if cursor + block > end {
                    return Err(format!(
                        "subnet partition exceeds address space {}",
                        self
                    ));
                }
                let base = u32::try_from(cursor)
                    .map_err(|_| format!("subnet partition exceeds address space {}", self))?;
                subnets.push(Ipv4Cidr {
                    base,
                    prefix: mask_bits,
                });
                cursor += block;
            }
            out.push(subnets);
        }

        Ok(out)
    }
}

fn mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

impl FromStr for Ipv4Cidr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| format!("invalid CIDR '{}': missing /prefix", s))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|e| format!("invalid CIDR '{}': {}", s, e))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|e| format!("invalid CIDR '{}': {}", s, e))?;
        Self::new(addr, prefix)
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network(), self.prefix)
    }
}
