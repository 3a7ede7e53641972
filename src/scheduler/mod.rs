mod available_pieces;
mod blocks;
mod piece;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;

use bit_set::BitSet;
use log::debug;

use crate::crypto::Sha1;
use crate::message::{Block, BlockData};
use crate::torrent::Info;

use self::available_pieces::AvailablePieces;
use self::piece::{ActivePiece, BlockOutcome};

pub use self::blocks::Blocks;

#[derive(Debug, PartialEq, Eq)]
pub enum Claim {
    /// Blocks now assigned to the peer, empty when there's nothing it can help with right now.
    Blocks(Vec<Block>),
    /// The peer sent too many corrupt pieces and must be disconnected.
    Banned,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Received {
    /// Unexpected block: not requested from this peer, duplicate or of the wrong size.
    Ignored,
    Incomplete,
    /// The piece is fully assembled and must be verified by the caller.
    Complete(CompletedPiece),
}

#[derive(Debug, PartialEq, Eq)]
pub struct CompletedPiece {
    pub index: usize,
    pub hash: Sha1,
    pub data: Vec<u8>,
}

/// The shared pool of work: every piece that hasn't been verified yet, and the state of each of
/// its blocks.
///
/// A block is always in exactly one of three states: pending, assigned to a single peer, or
/// received. Blocks of a disconnected or choking peer go back to pending, so no work is lost and
/// no block is requested from two peers at once.
pub struct Scheduler {
    info: Info,
    block_size: usize,
    available: AvailablePieces,
    active: BTreeMap<usize, ActivePiece>,
    verified: BitSet,
    downloaded: usize,
    peers: HashSet<SocketAddr>,
    /// Handshaked connections registered so far, including closed ones
    sessions: usize,
    strikes: HashMap<SocketAddr, usize>,
    excluded: HashMap<usize, HashSet<SocketAddr>>,
    max_hash_failures: usize,
}

impl Scheduler {
    pub fn new(info: &Info, block_size: usize, max_hash_failures: usize) -> Self {
        Self {
            info: info.clone(),
            block_size,
            available: AvailablePieces::new(info.total_pieces()),
            active: BTreeMap::new(),
            verified: BitSet::with_capacity(info.total_pieces()),
            downloaded: 0,
            peers: HashSet::new(),
            sessions: 0,
            strikes: HashMap::new(),
            excluded: HashMap::new(),
            max_hash_failures,
        }
    }

    pub fn total_pieces(&self) -> usize {
        self.info.total_pieces()
    }

    pub fn peer_connected(&mut self, addr: SocketAddr) {
        self.peers.insert(addr);
        self.sessions += 1;
    }

    /// Number of times a peer was registered since the download started.
    pub fn sessions(&self) -> usize {
        self.sessions
    }

    /// Forgets a peer: its pieces no longer count towards availability and every block assigned
    /// to it becomes pending again. Returns `true` if any work was returned to the pool.
    pub fn peer_disconnected(&mut self, addr: SocketAddr, bitfield: &BitSet) -> bool {
        if !self.peers.remove(&addr) {
            return false;
        }
        for piece in bitfield.iter() {
            self.available.peer_lost_piece(piece);
        }
        let released: usize = self
            .active
            .values_mut()
            .map(|piece| piece.release_peer(addr))
            .sum();
        if released > 0 {
            debug!("[{}] returned {} blocks to the pool", addr, released);
        }
        released > 0
    }

    pub fn connected_peers(&self) -> usize {
        self.peers.len()
    }

    pub fn peer_has_pieces(&mut self, bitfield: &BitSet) {
        for piece in bitfield.iter() {
            self.available.peer_has_piece(piece);
        }
    }

    pub fn peer_has_piece(&mut self, piece: usize) {
        self.available.peer_has_piece(piece);
    }

    /// Whether a peer with this bitfield has anything we still need.
    pub fn wants_any(&self, bitfield: &BitSet) -> bool {
        bitfield
            .iter()
            .any(|piece| piece < self.total_pieces() && !self.verified.contains(piece))
    }

    pub fn is_banned(&self, addr: &SocketAddr) -> bool {
        self.strikes.get(addr).copied().unwrap_or(0) >= self.max_hash_failures
    }

    /// Assigns up to `n` blocks the peer can serve. Pieces already in progress come first, new
    /// pieces are then started rarest first.
    pub fn claim(&mut self, addr: SocketAddr, bitfield: &BitSet, n: usize) -> Claim {
        if self.is_banned(&addr) {
            return Claim::Banned;
        }
        let mut blocks = Vec::with_capacity(n);
        let in_progress: Vec<usize> = self
            .active
            .values()
            .filter(|piece| piece.has_pending() && bitfield.contains(piece.index))
            .map(|piece| piece.index)
            .filter(|&piece| {
                is_allowed(&self.excluded, &addr, piece, self.available.availability(piece))
            })
            .collect();
        for index in in_progress {
            if blocks.len() == n {
                break;
            }
            if let Some(piece) = self.active.get_mut(&index) {
                piece.assign(addr, n - blocks.len(), &mut blocks);
            }
        }
        while blocks.len() < n {
            let excluded = &self.excluded;
            let Some(index) = self.available.take_next(|piece, availability| {
                bitfield.contains(piece) && is_allowed(excluded, &addr, piece, availability)
            }) else {
                break;
            };
            debug!("[{}] starting piece {}", addr, index);
            let mut piece = ActivePiece::new(
                index,
                self.info.pieces[index],
                self.info.piece_size(index),
                self.block_size,
            );
            piece.assign(addr, n - blocks.len(), &mut blocks);
            self.active.insert(index, piece);
        }
        Claim::Blocks(blocks)
    }

    /// Returns blocks that were assigned to `addr` to the pool.
    pub fn release(&mut self, addr: SocketAddr, blocks: &[Block]) -> bool {
        let mut released = false;
        for block in blocks {
            if let Some(piece) = self.active.get_mut(&block.piece) {
                released |= piece.release(addr, block);
            }
        }
        released
    }

    pub fn block_received(&mut self, addr: SocketAddr, data: BlockData) -> Received {
        let Some(piece) = self.active.get_mut(&data.piece) else {
            return Received::Ignored;
        };
        match piece.receive(addr, &data) {
            BlockOutcome::Rejected => Received::Ignored,
            BlockOutcome::Accepted => Received::Incomplete,
            BlockOutcome::Completed => Received::Complete(CompletedPiece {
                index: piece.index,
                hash: piece.hash,
                data: piece.take_data(),
            }),
        }
    }

    pub fn piece_verified(&mut self, index: usize) {
        if self.active.remove(&index).is_some() && self.verified.insert(index) {
            self.downloaded += self.info.piece_size(index);
            self.excluded.remove(&index);
        }
    }

    /// Puts a piece that failed verification back in the pool. Every peer that contributed to it
    /// gets a strike and won't be given this piece again. Returns the contributors.
    pub fn piece_corrupted(&mut self, index: usize) -> Vec<SocketAddr> {
        let Some(piece) = self.active.remove(&index) else {
            return Vec::new();
        };
        let contributors: Vec<SocketAddr> = piece.contributors().copied().collect();
        for addr in &contributors {
            *self.strikes.entry(*addr).or_default() += 1;
            self.excluded.entry(index).or_default().insert(*addr);
        }
        self.available.insert(index);
        contributors
    }

    pub fn is_complete(&self) -> bool {
        self.verified.len() == self.total_pieces()
    }

    pub fn remaining_pieces(&self) -> usize {
        self.total_pieces() - self.verified.len()
    }

    /// Verified bytes.
    pub fn downloaded(&self) -> usize {
        self.downloaded
    }

    pub fn is_verifying(&self, index: usize) -> bool {
        self.active
            .get(&index)
            .is_some_and(|piece| piece.is_verifying())
    }

    pub fn is_pending(&self, index: usize) -> bool {
        self.available.is_pending(index)
    }
}

/// A peer that corrupted a piece won't get it again, unless nobody else can provide it.
fn is_allowed(
    excluded: &HashMap<usize, HashSet<SocketAddr>>,
    addr: &SocketAddr,
    piece: usize,
    availability: usize,
) -> bool {
    let corrupted_by_peer = excluded
        .get(&piece)
        .is_some_and(|peers| peers.contains(addr));
    !corrupted_by_peer || availability <= 1
}
