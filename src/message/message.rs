use std::fmt::Formatter;

use bit_set::BitSet;
use log::debug;
use tokio_util::bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::TransportMessage;
use crate::message::{Block, BlockData, ProtocolError};

const ID_CHOKE: u8 = 0;
const ID_UNCHOKE: u8 = 1;
const ID_INTERESTED: u8 = 2;
const ID_NOT_INTERESTED: u8 = 3;
const ID_HAVE: u8 = 4;
const ID_BITFIELD: u8 = 5;
const ID_REQUEST: u8 = 6;
const ID_PIECE: u8 = 7;
const ID_CANCEL: u8 = 8;
const ID_PORT: u8 = 9;
const LENGTH_SIZE: usize = 4;

/// Every message after the handshake is `<length prefix><message ID><payload>`, the length
/// prefix being a four byte big-endian count of the ID and payload bytes.
#[derive(PartialEq, Clone)]
pub enum Message {
    /// `<len=0000>`, no ID and no payload.
    KeepAlive,

    /// `<len=0001><id=0>`: the sender won't serve requests until it unchokes.
    Choke,

    /// `<len=0001><id=1>`
    Unchoke,

    /// `<len=0001><id=2>`: the sender wants pieces the receiver has.
    Interested,

    /// `<len=0001><id=3>`
    NotInterested,

    /// `<len=0005><id=4><piece index>`: the sender just verified a piece.
    Have(usize),

    /// `<len=0001+X><id=5><bitfield>`: pieces the sender has, high bit of the first byte is
    /// piece 0. Spare bits at the end must be zero, only sent right after the handshake.
    Bitfield(BitSet),

    /// `<len=0013><id=6><index><begin><length>`
    Request(Block),

    /// `<len=0009+X><id=7><index><begin><block>`
    Piece(BlockData),

    /// `<len=0013><id=8><index><begin><length>`
    Cancel(Block),

    /// `<len=0003><id=9><listen-port>`: DHT port, accepted and ignored.
    Port(u16),
}

pub struct MessageCodec {
    max_length: usize,
}

impl MessageCodec {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        dst.reserve(item.transport_bytes());
        match item {
            Message::KeepAlive => dst.put_u32(0),
            Message::Choke => {
                dst.put_u32(1);
                dst.put_u8(ID_CHOKE);
            }
            Message::Unchoke => {
                dst.put_u32(1);
                dst.put_u8(ID_UNCHOKE);
            }
            Message::Interested => {
                dst.put_u32(1);
                dst.put_u8(ID_INTERESTED);
            }
            Message::NotInterested => {
                dst.put_u32(1);
                dst.put_u8(ID_NOT_INTERESTED);
            }
            Message::Have(piece) => {
                dst.put_u32(5);
                dst.put_u8(ID_HAVE);
                dst.put_u32(piece as u32);
            }
            Message::Bitfield(bitset) => {
                let bytes = bitset.get_ref().to_bytes();
                dst.put_u32(1 + (bytes.len() as u32));
                dst.put_u8(ID_BITFIELD);
                dst.extend_from_slice(&bytes);
            }
            Message::Request(block) => {
                dst.put_u32(13);
                dst.put_u8(ID_REQUEST);
                encode_block(block, dst);
            }
            Message::Piece(BlockData {
                piece,
                offset,
                data,
            }) => {
                let length = 9 + data.len();
                dst.put_u32(length as u32);
                dst.put_u8(ID_PIECE);
                dst.put_u32(piece as u32);
                dst.put_u32(offset as u32);
                dst.extend_from_slice(&data);
            }
            Message::Cancel(block) => {
                dst.put_u32(13);
                dst.put_u8(ID_CANCEL);
                encode_block(block, dst);
            }
            Message::Port(port) => {
                dst.put_u32(3);
                dst.put_u8(ID_PORT);
                dst.put_u16(port);
            }
        }
        Ok(())
    }
}

fn encode_block(block: Block, dst: &mut BytesMut) {
    dst.put_u32(block.piece as u32);
    dst.put_u32(block.offset as u32);
    dst.put_u32(block.length as u32);
}

impl Decoder for MessageCodec {
    type Error = ProtocolError;
    type Item = Message;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, ProtocolError> {
        loop {
            if src.len() < LENGTH_SIZE {
                // Not enough data to read length marker.
                return Ok(None);
            }

            let mut length_bytes = [0; LENGTH_SIZE];
            length_bytes.copy_from_slice(&src[0..LENGTH_SIZE]);
            let length = u32::from_be_bytes(length_bytes) as usize;

            if length == 0 {
                src.advance(LENGTH_SIZE);
                return Ok(Some(Message::KeepAlive));
            }

            if length > self.max_length {
                return Err(ProtocolError::MessageTooLong {
                    length,
                    max: self.max_length,
                });
            }

            if src.len() < LENGTH_SIZE + length {
                src.reserve(LENGTH_SIZE + length - src.len());
                return Ok(None);
            }

            src.advance(LENGTH_SIZE);
            let mut payload = src.split_to(length);
            let id = payload.get_u8();
            if let Some(message) = decode_payload(id, length, &mut payload)? {
                return Ok(Some(message));
            }
            // Unknown extension message, its frame is already consumed
            debug!("skipping message with unknown id {} ({} bytes)", id, length);
        }
    }
}

fn decode_payload(
    id: u8,
    length: usize,
    payload: &mut BytesMut,
) -> Result<Option<Message>, ProtocolError> {
    let message = match (id, length) {
        (ID_CHOKE, 1) => Message::Choke,
        (ID_UNCHOKE, 1) => Message::Unchoke,
        (ID_INTERESTED, 1) => Message::Interested,
        (ID_NOT_INTERESTED, 1) => Message::NotInterested,
        (ID_HAVE, 5) => Message::Have(payload.get_u32() as usize),
        (ID_BITFIELD, _) => Message::Bitfield(BitSet::from_bytes(&payload[..])),
        (ID_REQUEST, 13) => Message::Request(decode_block(payload)),
        (ID_PIECE, 9..) => {
            let piece = payload.get_u32() as usize;
            let offset = payload.get_u32() as usize;
            Message::Piece(BlockData {
                piece,
                offset,
                data: payload.to_vec(),
            })
        }
        (ID_CANCEL, 13) => Message::Cancel(decode_block(payload)),
        (ID_PORT, 3) => Message::Port(payload.get_u16()),
        (ID_CHOKE..=ID_PORT, _) => return Err(ProtocolError::InvalidLength { id, length }),
        _ => return Ok(None),
    };
    Ok(Some(message))
}

fn decode_block(src: &mut BytesMut) -> Block {
    let piece = src.get_u32() as usize;
    let offset = src.get_u32() as usize;
    let length = src.get_u32() as usize;
    Block::new(piece, offset, length)
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::KeepAlive => write!(f, "KeepAlive"),
            Message::Choke => write!(f, "Choke"),
            Message::Unchoke => write!(f, "Unchoke"),
            Message::Interested => write!(f, "Interested"),
            Message::NotInterested => write!(f, "NotInterested"),
            Message::Have(piece) => write!(f, "Have {{ piece: {} }}", piece),
            Message::Bitfield(bitset) => write!(f, "Bitfield(<{} pieces>)", bitset.len()),
            Message::Request(block) => write!(f, "Request({:?})", block),
            Message::Piece(block) => write!(f, "Piece({:?})", block),
            Message::Cancel(block) => write!(f, "Cancel({:?})", block),
            Message::Port(port) => write!(f, "Port({})", port),
        }
    }
}

impl TransportMessage for Message {
    fn transport_bytes(&self) -> usize {
        let payload_size = match self {
            Self::KeepAlive => 0,
            Self::Choke => 1,
            Self::Unchoke => 1,
            Self::Interested => 1,
            Self::NotInterested => 1,
            Self::Have(_) => 5,
            Self::Bitfield(bitset) => 1 + bitset.get_ref().len().div_ceil(8),
            Self::Request(_) => 13,
            Self::Piece(block) => 9 + block.data.len(),
            Self::Cancel(_) => 13,
            Self::Port(_) => 3,
        };
        LENGTH_SIZE + payload_size
    }
}
