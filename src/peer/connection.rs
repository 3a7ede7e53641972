use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bit_set::BitSet;
use futures::SinkExt;
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::{Instant, interval_at, sleep_until, timeout};
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::client::{Config, Notification};
use crate::codec::{AsyncDecoder, AsyncEncoder};
use crate::crypto::Sha1;
use crate::message::{
    Block, BlockData, Handshake, HandshakeError, Message, MessageCodec, ProtocolError,
};
use crate::peer::{ConnectionState, Flags, PeerError};
use crate::scheduler::{Claim, CompletedPiece, Received, Scheduler};
use crate::storage::VerifiedPiece;

type Transport = Framed<TcpStream, MessageCodec>;

/// Everything a connection shares with the rest of the download.
#[derive(Clone)]
pub struct Swarm {
    pub config: Arc<Config>,
    pub info_hash: Sha1,
    pub total_pieces: usize,
    pub scheduler: Arc<Mutex<Scheduler>>,
    /// Bumped whenever blocks go back to the pool, wakes up idle connections.
    pub work: Arc<watch::Sender<u64>>,
    /// Number of pieces still missing, updated after each verified piece.
    pub progress: Arc<watch::Sender<usize>>,
    pub storage_tx: mpsc::Sender<VerifiedPiece>,
    pub notifications_tx: mpsc::Sender<Notification>,
}

impl Swarm {
    fn work_returned(&self) {
        self.work.send_modify(|version| *version = version.wrapping_add(1));
    }

    fn notify(&self, notification: Notification) {
        // Progress reporting must never hold up the download
        let _ = self.notifications_tx.try_send(notification);
    }
}

/// A single outgoing peer connection. It exclusively owns its socket and works against the
/// shared [`Scheduler`] until the peer goes away, misbehaves, or the download is cancelled.
pub struct Connection {
    addr: SocketAddr,
    swarm: Swarm,
    state: ConnectionState,
    flags: Flags,
    bitfield: BitSet,
    in_flight: HashMap<(usize, usize), Block>,
    last_progress: Instant,
}

impl Connection {
    pub fn new(addr: SocketAddr, swarm: Swarm) -> Self {
        Self {
            addr,
            swarm,
            state: ConnectionState::Unconnected,
            flags: Flags::default(),
            bitfield: BitSet::new(),
            in_flight: HashMap::new(),
            last_progress: Instant::now(),
        }
    }

    /// Runs the connection to completion. Cancellation is a clean exit, anything else that ends
    /// the connection is returned as an error. Either way every block assigned to this peer is
    /// back in the pool when this returns.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), PeerError> {
        let result = self.connect_and_download(&cancel).await;
        self.close().await;
        match &result {
            Ok(()) => debug!("[{}] connection closed", self.addr),
            Err(err) => warn!("[{}] connection closed: {}", self.addr, err),
        }
        result
    }

    fn transition(&mut self, state: ConnectionState) {
        debug!("[{}] {:?} -> {:?}", self.addr, self.state, state);
        self.state = state;
    }

    async fn connect_and_download(&mut self, cancel: &CancellationToken) -> Result<(), PeerError> {
        let mut socket = tokio::select! {
            socket = self.dial() => socket?,
            _ = cancel.cancelled() => return Ok(()),
        };
        self.transition(ConnectionState::Connected);

        tokio::select! {
            result = self.exchange_handshakes(&mut socket) => result?,
            _ = cancel.cancelled() => return Ok(()),
        };
        self.transition(ConnectionState::Handshaked);

        let mut transport = Framed::new(
            socket,
            MessageCodec::new(self.swarm.config.max_message_length()),
        );
        self.swarm.scheduler.lock().await.peer_connected(self.addr);
        self.swarm.notify(Notification::PeerConnected(self.addr));
        info!("[{}] connected", self.addr);

        self.message_loop(&mut transport, cancel).await
    }

    async fn dial(&self) -> Result<TcpStream, PeerError> {
        debug!("[{}] connecting...", self.addr);
        match timeout(self.swarm.config.connect_timeout, TcpStream::connect(self.addr)).await {
            Ok(result) => result.map_err(PeerError::Dial),
            Err(_) => Err(PeerError::Timeout("connect")),
        }
    }

    async fn exchange_handshakes(&self, socket: &mut TcpStream) -> Result<(), PeerError> {
        let handshake = Handshake::new(self.swarm.info_hash, self.swarm.config.client_id);
        let exchange = async {
            handshake.encode(&mut *socket).await?;
            let handshake_got = Handshake::decode(&mut *socket).await?;
            handshake_got.verify(&self.swarm.info_hash)?;
            debug!("[{}] peer id {:?}", self.addr, handshake_got.peer_id);
            Ok::<(), HandshakeError>(())
        };
        match timeout(self.swarm.config.handshake_timeout, exchange).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(PeerError::Timeout("handshake")),
        }
    }

    async fn message_loop(
        &mut self,
        transport: &mut Transport,
        cancel: &CancellationToken,
    ) -> Result<(), PeerError> {
        let config = Arc::clone(&self.swarm.config);
        let mut work_rx = self.swarm.work.subscribe();
        let mut keep_alive = interval_at(
            Instant::now() + config.keep_alive_interval,
            config.keep_alive_interval,
        );
        let mut read_deadline = Instant::now() + config.read_timeout;

        loop {
            self.fill_pipeline(transport).await?;
            let request_deadline = (!self.in_flight.is_empty())
                .then(|| self.last_progress + config.request_timeout);

            tokio::select! {
                message = transport.next() => match message {
                    Some(Ok(message)) => {
                        read_deadline = Instant::now() + config.read_timeout;
                        if self.state == ConnectionState::Handshaked {
                            self.transition(ConnectionState::Active);
                        }
                        self.handle(message).await?;
                    }
                    Some(Err(err)) => return Err(err.into()),
                    None => {
                        let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "closed by peer");
                        return Err(PeerError::Io(eof));
                    }
                },
                _ = sleep_until(read_deadline) => return Err(PeerError::Timeout("read")),
                _ = sleep_until_some(request_deadline) => {
                    return Err(PeerError::Timeout("request"));
                }
                _ = keep_alive.tick() => self.send(transport, Message::KeepAlive).await?,
                Ok(()) = work_rx.changed() => {
                    // Blocks were returned to the pool, try to claim some on the next iteration
                }
                _ = cancel.cancelled() => return Ok(()),
            }
        }
    }

    async fn send(&self, transport: &mut Transport, message: Message) -> Result<(), PeerError> {
        debug!("[{}] > sending {:?}", self.addr, message);
        match timeout(self.swarm.config.write_timeout, transport.send(message)).await {
            Ok(result) => result.map_err(PeerError::from),
            Err(_) => Err(PeerError::Timeout("write")),
        }
    }

    /// Keeps our interest in sync with what the peer has, and tops up the request pipeline.
    async fn fill_pipeline(&mut self, transport: &mut Transport) -> Result<(), PeerError> {
        let wants = self.swarm.scheduler.lock().await.wants_any(&self.bitfield);
        if wants != self.flags.am_interested {
            self.flags.am_interested = wants;
            let message = if wants {
                Message::Interested
            } else {
                Message::NotInterested
            };
            self.send(transport, message).await?;
        }

        let room = self
            .swarm
            .config
            .pipeline_depth
            .saturating_sub(self.in_flight.len());
        if !self.flags.can_request() || room == 0 {
            return Ok(());
        }
        let claim = self
            .swarm
            .scheduler
            .lock()
            .await
            .claim(self.addr, &self.bitfield, room);
        match claim {
            Claim::Banned => Err(PeerError::HashFailures(self.swarm.config.max_hash_failures)),
            Claim::Blocks(blocks) => {
                if self.in_flight.is_empty() && !blocks.is_empty() {
                    self.last_progress = Instant::now();
                }
                for block in &blocks {
                    self.in_flight.insert((block.piece, block.offset), *block);
                }
                for block in blocks {
                    self.send(transport, Message::Request(block)).await?;
                }
                Ok(())
            }
        }
    }

    async fn handle(&mut self, message: Message) -> Result<(), PeerError> {
        debug!("[{}] < got {:?}", self.addr, message);
        match message {
            Message::KeepAlive => (),
            Message::Choke => {
                self.flags.peer_choking = true;
                self.release_in_flight().await;
            }
            Message::Unchoke => self.flags.peer_choking = false,
            Message::Have(piece) => {
                if piece >= self.swarm.total_pieces {
                    return Err(ProtocolError::PieceOutOfRange(piece).into());
                }
                if self.bitfield.insert(piece) {
                    self.swarm.scheduler.lock().await.peer_has_piece(piece);
                }
            }
            Message::Bitfield(bitfield) => self.update_bitfield(bitfield).await?,
            Message::Piece(block_data) => self.block_received(block_data).await?,
            Message::Request(block) => {
                // Uploading isn't supported, we never unchoke anyone
                debug!("[{}] ignoring request for {:?}", self.addr, block);
            }
            Message::Interested
            | Message::NotInterested
            | Message::Cancel(_)
            | Message::Port(_) => (),
        }
        Ok(())
    }

    async fn update_bitfield(&mut self, bitfield: BitSet) -> Result<(), PeerError> {
        let expected = self.swarm.total_pieces.div_ceil(8);
        let found = bitfield.get_ref().len() / 8;
        if found != expected {
            return Err(ProtocolError::BitfieldLength { expected, found }.into());
        }
        if bitfield.iter().any(|piece| piece >= self.swarm.total_pieces) {
            return Err(ProtocolError::BitfieldSpareBits.into());
        }
        let mut new_pieces = bitfield;
        new_pieces.difference_with(&self.bitfield);
        self.swarm.scheduler.lock().await.peer_has_pieces(&new_pieces);
        self.bitfield.union_with(&new_pieces);
        Ok(())
    }

    async fn release_in_flight(&mut self) {
        if self.in_flight.is_empty() {
            return;
        }
        let blocks: Vec<Block> = self.in_flight.drain().map(|(_, block)| block).collect();
        debug!("[{}] choked, releasing {} blocks", self.addr, blocks.len());
        if self.swarm.scheduler.lock().await.release(self.addr, &blocks) {
            self.swarm.work_returned();
        }
    }

    async fn block_received(&mut self, block_data: BlockData) -> Result<(), PeerError> {
        let key = (block_data.piece, block_data.offset);
        let Some(block) = self.in_flight.remove(&key) else {
            debug!("[{}] unrequested block {:?}", self.addr, block_data);
            return Ok(());
        };
        if block.length != block_data.data.len() {
            return Err(ProtocolError::BlockLength {
                piece: block.piece,
                offset: block.offset,
                found: block_data.data.len(),
            }
            .into());
        }
        self.last_progress = Instant::now();
        let received = self
            .swarm
            .scheduler
            .lock()
            .await
            .block_received(self.addr, block_data);
        match received {
            Received::Complete(piece) => self.piece_completed(piece).await,
            Received::Incomplete => Ok(()),
            Received::Ignored => {
                debug!("[{}] block {:?} no longer needed", self.addr, block);
                Ok(())
            }
        }
    }

    /// Verifies an assembled piece outside the scheduler lock.
    async fn piece_completed(&mut self, piece: CompletedPiece) -> Result<(), PeerError> {
        let index = piece.index;
        if Sha1::digest(&piece.data) == piece.hash {
            let remaining = {
                let mut scheduler = self.swarm.scheduler.lock().await;
                scheduler.piece_verified(index);
                scheduler.remaining_pieces()
            };
            info!("[{}] piece {} verified, {} remaining", self.addr, index, remaining);
            let verified = VerifiedPiece {
                index,
                data: piece.data,
            };
            if self.swarm.storage_tx.send(verified).await.is_err() {
                return Err(PeerError::StorageClosed);
            }
            self.swarm.progress.send_replace(remaining);
            self.swarm.notify(Notification::PieceCompleted(index));
        } else {
            let contributors = self.swarm.scheduler.lock().await.piece_corrupted(index);
            warn!(
                "[{}] piece {} failed verification, contributors: {:?}",
                self.addr, index, contributors
            );
            self.swarm.work_returned();
            self.swarm.notify(Notification::PieceCorrupted(index));
        }
        Ok(())
    }

    async fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        let registered = matches!(
            self.state,
            ConnectionState::Handshaked | ConnectionState::Active
        );
        self.in_flight.clear();
        let returned = self
            .swarm
            .scheduler
            .lock()
            .await
            .peer_disconnected(self.addr, &self.bitfield);
        if returned {
            self.swarm.work_returned();
        }
        if registered {
            self.swarm.notify(Notification::PeerDisconnected(self.addr));
        }
        self.transition(ConnectionState::Closed);
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
