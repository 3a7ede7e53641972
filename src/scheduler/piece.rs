use std::collections::HashSet;
use std::net::SocketAddr;

use crate::crypto::Sha1;
use crate::message::{Block, BlockData};
use crate::scheduler::blocks::Blocks;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    Pending,
    Assigned(SocketAddr),
    Received,
}

/// Outcome of handing a block to an [`ActivePiece`].
#[derive(Debug, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Not assigned to this peer, already received, or not a block of this piece.
    Rejected,
    Accepted,
    /// The last missing block, the piece is now waiting for verification.
    Completed,
}

/// A piece that has been started: block bookkeeping plus the buffer the blocks are written to.
#[derive(Debug)]
pub struct ActivePiece {
    pub index: usize,
    pub hash: Sha1,
    block_size: usize,
    blocks: Vec<(Block, BlockState)>,
    received: usize,
    buffer: Vec<u8>,
    contributors: HashSet<SocketAddr>,
    verifying: bool,
}

impl ActivePiece {
    pub fn new(index: usize, hash: Sha1, length: usize, block_size: usize) -> Self {
        let blocks = Blocks::new(index, length, block_size)
            .map(|block| (block, BlockState::Pending))
            .collect();
        Self {
            index,
            hash,
            block_size,
            blocks,
            received: 0,
            buffer: vec![0; length],
            contributors: HashSet::new(),
            verifying: false,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.blocks
            .iter()
            .any(|(_, state)| *state == BlockState::Pending)
    }

    pub fn is_verifying(&self) -> bool {
        self.verifying
    }

    /// Assigns up to `n` pending blocks to `addr`, returns how many were assigned.
    pub fn assign(&mut self, addr: SocketAddr, n: usize, dest: &mut Vec<Block>) -> usize {
        let mut assigned = 0;
        for (block, state) in self.blocks.iter_mut() {
            if assigned == n {
                break;
            }
            if *state == BlockState::Pending {
                *state = BlockState::Assigned(addr);
                dest.push(*block);
                assigned += 1;
            }
        }
        assigned
    }

    fn slot(&mut self, offset: usize) -> Option<&mut (Block, BlockState)> {
        if offset % self.block_size != 0 {
            return None;
        }
        self.blocks.get_mut(offset / self.block_size)
    }

    /// Returns a block assigned to `addr` to the pending state. Returns `true` if it was.
    pub fn release(&mut self, addr: SocketAddr, block: &Block) -> bool {
        match self.slot(block.offset) {
            Some((_, state)) if *state == BlockState::Assigned(addr) => {
                *state = BlockState::Pending;
                true
            }
            _ => false,
        }
    }

    /// Returns every block assigned to `addr` to the pending state, returns how many there were.
    pub fn release_peer(&mut self, addr: SocketAddr) -> usize {
        let mut released = 0;
        for (_, state) in self.blocks.iter_mut() {
            if *state == BlockState::Assigned(addr) {
                *state = BlockState::Pending;
                released += 1;
            }
        }
        released
    }

    pub fn receive(&mut self, addr: SocketAddr, data: &BlockData) -> BlockOutcome {
        let Some((block, state)) = self.slot(data.offset) else {
            return BlockOutcome::Rejected;
        };
        if *state != BlockState::Assigned(addr) || block.length != data.data.len() {
            return BlockOutcome::Rejected;
        }
        *state = BlockState::Received;
        let range = block.offset..block.offset + block.length;
        self.buffer[range].copy_from_slice(&data.data);
        self.received += 1;
        self.contributors.insert(addr);
        if self.received == self.blocks.len() {
            self.verifying = true;
            BlockOutcome::Completed
        } else {
            BlockOutcome::Accepted
        }
    }

    /// Moves the assembled data out, leaving an empty buffer behind.
    pub fn take_data(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    pub fn contributors(&self) -> impl Iterator<Item = &SocketAddr> {
        self.contributors.iter()
    }
}
