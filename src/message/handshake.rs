use std::io::{Error, ErrorKind, Result};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::{AsyncDecoder, AsyncEncoder, TransportMessage};
use crate::core::PeerId;
use crate::crypto::{SHA1_LEN, Sha1};
use crate::message::HandshakeError;

const PROTOCOL: &str = "BitTorrent protocol";
const RESERVED_LEN: usize = 8;

/// The first message on every connection, `<pstrlen><pstr><reserved><info_hash><peer_id>`.
///
/// For the standard protocol string this is exactly 68 bytes. Reserved bytes are sent as zeroes
/// and ignored when reading. A connection whose handshake carries another info hash than the one
/// we're downloading must be dropped right away, see [`Handshake::verify`].
#[derive(Debug, PartialEq, Clone)]
pub struct Handshake {
    pub protocol: String,
    pub info_hash: Sha1,
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(info_hash: Sha1, peer_id: PeerId) -> Self {
        Self {
            protocol: PROTOCOL.to_string(),
            info_hash,
            peer_id,
        }
    }

    pub fn is_standard_protocol(&self) -> bool {
        self.protocol == PROTOCOL
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.transport_bytes());
        buf.push(self.protocol.len() as u8);
        buf.extend_from_slice(self.protocol.as_bytes());
        buf.extend_from_slice(&[0; RESERVED_LEN]);
        buf.extend_from_slice(&self.info_hash.0);
        buf.extend_from_slice(&self.peer_id.0);
        buf
    }

    pub fn deserialize(buf: &[u8]) -> std::result::Result<Self, HandshakeError> {
        let Some(&protocol_len) = buf.first() else {
            return Err(HandshakeError::Truncated {
                length: 0,
                needed: 1,
            });
        };
        let protocol_end = 1 + protocol_len as usize;
        let needed = protocol_end + RESERVED_LEN + 2 * SHA1_LEN;
        if buf.len() < needed {
            return Err(HandshakeError::Truncated {
                length: buf.len(),
                needed,
            });
        }
        let protocol = String::from_utf8_lossy(&buf[1..protocol_end]).into_owned();
        let info_hash_start = protocol_end + RESERVED_LEN;
        let peer_id_start = info_hash_start + SHA1_LEN;
        let mut info_hash = [0; SHA1_LEN];
        info_hash.copy_from_slice(&buf[info_hash_start..peer_id_start]);
        let mut peer_id = [0; 20];
        peer_id.copy_from_slice(&buf[peer_id_start..peer_id_start + 20]);
        Ok(Handshake {
            protocol,
            info_hash: Sha1(info_hash),
            peer_id: PeerId(peer_id),
        })
    }

    /// Checks a received handshake against the torrent we're serving.
    pub fn verify(&self, info_hash: &Sha1) -> std::result::Result<(), HandshakeError> {
        if !self.is_standard_protocol() {
            return Err(HandshakeError::Protocol(self.protocol.clone()));
        }
        if &self.info_hash != info_hash {
            return Err(HandshakeError::InfoHashMismatch {
                expected: *info_hash,
                actual: self.info_hash,
            });
        }
        Ok(())
    }
}

impl AsyncDecoder for Handshake {
    async fn decode<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Self> {
        let protocol_len = stream.read_u8().await?;
        let mut buf = vec![0; 1 + protocol_len as usize + RESERVED_LEN + 2 * SHA1_LEN];
        buf[0] = protocol_len;
        stream.read_exact(&mut buf[1..]).await?;
        Handshake::deserialize(&buf).map_err(|err| Error::new(ErrorKind::InvalidData, err))
    }
}

impl AsyncEncoder for Handshake {
    async fn encode<S: AsyncWrite + Unpin>(&self, stream: &mut S) -> Result<()> {
        stream.write_all(&self.serialize()).await?;
        stream.flush().await?;
        Ok(())
    }
}

impl TransportMessage for Handshake {
    fn transport_bytes(&self) -> usize {
        1 + // pstr len
            self.protocol.len() + // pstr bytes
            RESERVED_LEN +
            SHA1_LEN + // info hash
            20 // peer id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handshake() -> Handshake {
        Handshake::new(Sha1([1; 20]), PeerId([2; 20]))
    }

    #[test]
    fn serialized_layout() {
        let bytes = handshake().serialize();

        assert_eq!(bytes.len(), 68);
        assert_eq!(bytes[0], 19);
        assert_eq!(&bytes[1..20], b"BitTorrent protocol");
        assert_eq!(&bytes[20..28], &[0; 8]);
        assert_eq!(&bytes[28..48], &[1; 20]);
        assert_eq!(&bytes[48..68], &[2; 20]);
    }

    #[test]
    fn deserialize_ignores_reserved_bits() {
        let mut bytes = handshake().serialize();
        bytes[20] = 0x80;
        bytes[27] = 0x01;

        assert_eq!(Handshake::deserialize(&bytes).unwrap(), handshake());
    }

    #[test]
    fn fail_for_truncated_buffer() {
        let bytes = handshake().serialize();

        assert!(matches!(
            Handshake::deserialize(&bytes[..67]),
            Err(HandshakeError::Truncated {
                length: 67,
                needed: 68
            })
        ));
        assert!(matches!(
            Handshake::deserialize(&[]),
            Err(HandshakeError::Truncated { length: 0, .. })
        ));
    }

    #[test]
    fn verify_rejects_other_swarm() {
        let result = handshake().verify(&Sha1([9; 20]));

        assert!(matches!(
            result,
            Err(HandshakeError::InfoHashMismatch { .. })
        ));
    }

    #[test]
    fn verify_rejects_other_protocol() {
        let mut other = handshake();
        other.protocol = "Other protocol".to_string();

        assert!(matches!(
            other.verify(&Sha1([1; 20])),
            Err(HandshakeError::Protocol(_))
        ));
    }

    #[test]
    fn verify_accepts_matching_info_hash() {
        assert!(handshake().verify(&Sha1([1; 20])).is_ok());
    }

    #[tokio::test]
    async fn encode_decode_over_stream() {
        let (mut client, mut server) = tokio::io::duplex(128);

        handshake().encode(&mut server).await.unwrap();
        let handshake_read = Handshake::decode(&mut client).await.unwrap();

        assert_eq!(handshake_read, handshake());
    }
}
