//! Shard selection from raw frame bytes.
//!
//! Hashes the direction-independent TCP 4-tuple at fixed offsets without a
//! full parse, so both directions of a connection land on the same worker
//! and the capture thread stays lean.

use std::hash::{Hash, Hasher};

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;
const ETHERTYPE_VLAN: u16 = 0x8100;
const IPPROTO_TCP: u8 = 6;

/// Shard index for a raw Ethernet frame, or `None` when the frame does not
/// carry a routable TCP segment (non-IP, non-TCP, IPv4 fragment, truncated).
#[inline]
pub fn shard_for_frame(data: &[u8], num_shards: usize) -> Option<usize> {
    if num_shards == 0 {
        return None;
    }
    let hash = tcp_flow_hash(data)?;
    Some((hash as usize) % num_shards)
}

#[inline]
fn tcp_flow_hash(data: &[u8]) -> Option<u64> {
    if data.len() < 14 {
        return None;
    }

    let mut ether_type = u16::from_be_bytes([data[12], data[13]]);
    let mut ip_offset: usize = 14;

    if ether_type == ETHERTYPE_VLAN {
        if data.len() < 18 {
            return None;
        }
        ether_type = u16::from_be_bytes([data[16], data[17]]);
        ip_offset = 18;
    }

    match ether_type {
        ETHERTYPE_IPV4 => hash_ipv4(data, ip_offset),
        ETHERTYPE_IPV6 => hash_ipv6(data, ip_offset),
        _ => None,
    }
}

#[inline]
fn hash_ipv4(data: &[u8], offset: usize) -> Option<u64> {
    if data.len() < offset + 20 || data[offset + 9] != IPPROTO_TCP {
        return None;
    }
    // MF set or non-zero offset.
    let frag = u16::from_be_bytes([data[offset + 6], data[offset + 7]]);
    if frag & 0x3FFF != 0 {
        return None;
    }

    let ihl = (data[offset] & 0x0F) as usize * 4;
    let (src_port, dst_port) = ports(data, offset + ihl)?;
    Some(hash_pair(
        &data[offset + 12..offset + 16],
        src_port,
        &data[offset + 16..offset + 20],
        dst_port,
    ))
}

#[inline]
fn hash_ipv6(data: &[u8], offset: usize) -> Option<u64> {
    if data.len() < offset + 40 || data[offset + 6] != IPPROTO_TCP {
        return None;
    }
    let (src_port, dst_port) = ports(data, offset + 40)?;
    Some(hash_pair(
        &data[offset + 8..offset + 24],
        src_port,
        &data[offset + 24..offset + 40],
        dst_port,
    ))
}

#[inline]
fn ports(data: &[u8], offset: usize) -> Option<(u16, u16)> {
    let bytes = data.get(offset..offset + 4)?;
    Some((
        u16::from_be_bytes([bytes[0], bytes[1]]),
        u16::from_be_bytes([bytes[2], bytes[3]]),
    ))
}

// Hash (min, max) so both directions agree.
#[inline]
fn hash_pair(src_ip: &[u8], src_port: u16, dst_ip: &[u8], dst_port: u16) -> u64 {
    let mut hasher = ahash::AHasher::default();
    if (src_ip, src_port) <= (dst_ip, dst_port) {
        src_ip.hash(&mut hasher);
        src_port.hash(&mut hasher);
        dst_ip.hash(&mut hasher);
        dst_port.hash(&mut hasher);
    } else {
        dst_ip.hash(&mut hasher);
        dst_port.hash(&mut hasher);
        src_ip.hash(&mut hasher);
        src_port.hash(&mut hasher);
    }
    hasher.finish()
}
