// tests/flowlimiter/fixtures/flows.rs

// dependencies
use flow_limiter::FlowKey;
use std::net::{IpAddr, Ipv4Addr};

pub const SEC: u64 = 1_000_000_000;

// Flow from 10.0.0.<src> to 10.0.1.<dst>
pub fn key(src: u8, dst: u8) -> FlowKey {
    FlowKey::new(
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, src)),
        IpAddr::V4(Ipv4Addr::new(10, 0, 1, dst)),
    )
}
