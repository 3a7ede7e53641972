//! A scripted remote peer for tests, serving a fixed payload over loopback.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bit_set::BitSet;
use futures::SinkExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;

use crate::codec::{AsyncDecoder, AsyncEncoder};
use crate::core::PeerId;
use crate::crypto::Sha1;
use crate::message::{BlockData, Handshake, Message, MessageCodec};

#[derive(Clone)]
pub struct Seeder {
    pub info_hash: Sha1,
    pub content: Vec<u8>,
    pub piece_size: usize,
    /// Bytes sent as the bitfield payload, defaults to every piece.
    pub bitfield: Option<Vec<u8>>,
    /// Flip the first byte of every block served.
    pub corrupt: bool,
    /// Choke right after answering this many requests.
    pub choke_after: Option<usize>,
    /// Connections accepted so far.
    pub accepted: Arc<AtomicUsize>,
    /// Piece messages sent so far, across all connections.
    pub served: Arc<AtomicUsize>,
}

impl Seeder {
    pub fn new(info_hash: Sha1, content: Vec<u8>, piece_size: usize) -> Self {
        Self {
            info_hash,
            content,
            piece_size,
            bitfield: None,
            corrupt: false,
            choke_after: None,
            accepted: Arc::new(AtomicUsize::new(0)),
            served: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Accepts connections on an ephemeral loopback port until the test ends.
    pub async fn spawn(self) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                self.accepted.fetch_add(1, Ordering::SeqCst);
                let seeder = self.clone();
                tokio::spawn(async move {
                    let _ = seeder.serve(socket).await;
                });
            }
        });
        addr
    }

    async fn serve(self, mut socket: TcpStream) -> anyhow::Result<()> {
        Handshake::decode(&mut socket).await?;
        Handshake::new(self.info_hash, PeerId([7; 20]))
            .encode(&mut socket)
            .await?;

        let mut transport = Framed::new(socket, MessageCodec::new(1 << 20));
        let total_pieces = self.content.len().div_ceil(self.piece_size);
        let bitfield = match &self.bitfield {
            Some(bytes) => BitSet::from_bytes(bytes),
            None => (0..total_pieces).collect(),
        };
        transport.send(Message::Bitfield(bitfield)).await?;
        transport.send(Message::Unchoke).await?;

        let mut served = 0;
        while let Some(message) = transport.next().await {
            if let Message::Request(block) = message? {
                if self.choke_after == Some(served) {
                    transport.send(Message::Choke).await?;
                    continue;
                }
                let start = block.global_offset(self.piece_size);
                let mut data = self.content[start..start + block.length].to_vec();
                if self.corrupt {
                    data[0] ^= 0xff;
                }
                let piece = BlockData {
                    piece: block.piece,
                    offset: block.offset,
                    data,
                };
                transport.send(Message::Piece(piece)).await?;
                self.served.fetch_add(1, Ordering::SeqCst);
                served += 1;
            }
        }
        Ok(())
    }
}
