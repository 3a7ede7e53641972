use std::fmt::{self, Display, Formatter};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use crate::bencoding::{SchemaError, Value};
use crate::tracker::TrackerError;

const COMPACT_V4_LEN: usize = 6;
const COMPACT_V6_LEN: usize = 18;

#[derive(Debug, PartialEq)]
pub struct AnnounceResult {
    pub interval: Duration,
    pub min_interval: Option<Duration>,
    pub complete: Option<usize>,
    pub incomplete: Option<usize>,
    pub tracker_id: Option<String>,
    pub warning: Option<String>,
    pub peers: Vec<SocketAddr>,
}

impl TryFrom<Value> for AnnounceResult {
    type Error = TrackerError;

    fn try_from(mut value: Value) -> Result<Self, Self::Error> {
        if let Some(reason) = value.optional_field::<String>("failure reason")? {
            return Err(TrackerError::Failure(reason));
        }
        let interval = value.field("interval")?;
        let mut peers = match value.remove_entry("peers")? {
            Value::String(bytes) => compact_peers(&bytes, COMPACT_V4_LEN)?,
            Value::List(_) => return Err(TrackerError::UnsupportedPeerList),
            other => {
                let source = SchemaError::UnexpectedType {
                    expected: "string",
                    found: other.kind(),
                };
                return Err(SchemaError::field("peers", source).into());
            }
        };
        if let Some(bytes) = value.optional_field::<Vec<u8>>("peers6")? {
            peers.extend(compact_peers(&bytes, COMPACT_V6_LEN)?);
        }
        Ok(AnnounceResult {
            interval,
            min_interval: value.optional_field("min interval")?,
            complete: value.optional_field("complete")?,
            incomplete: value.optional_field("incomplete")?,
            tracker_id: value.optional_field("tracker id")?,
            warning: value.optional_field("warning message")?,
            peers,
        })
    }
}

impl Display for AnnounceResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Interval: {}\nPeers:", self.interval.as_secs())?;
        for peer in &self.peers {
            write!(f, "\n{}", peer)?;
        }
        Ok(())
    }
}

/// Decodes a compact peer list: an IP address in network byte order followed by a big-endian
/// port, `entry` bytes per peer.
fn compact_peers(bytes: &[u8], entry: usize) -> Result<Vec<SocketAddr>, TrackerError> {
    if bytes.len() % entry != 0 {
        return Err(TrackerError::MalformedPeerList {
            length: bytes.len(),
            entry,
        });
    }
    let peers = bytes
        .chunks_exact(entry)
        .map(|chunk| {
            let (ip, port) = chunk.split_at(entry - 2);
            let ip = match <[u8; 4]>::try_from(ip) {
                Ok(v4) => IpAddr::V4(Ipv4Addr::from(v4)),
                Err(_) => {
                    let mut v6 = [0; 16];
                    v6.copy_from_slice(ip);
                    IpAddr::V6(Ipv6Addr::from(v6))
                }
            };
            SocketAddr::new(ip, u16::from_be_bytes([port[0], port[1]]))
        })
        .collect();
    Ok(peers)
}
