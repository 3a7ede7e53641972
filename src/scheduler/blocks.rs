use crate::message::Block;

/// Splits one piece into consecutive blocks of `block_size`, the last one possibly shorter.
pub struct Blocks {
    block_size: usize,
    piece: usize,
    offset: usize,
    end: usize,
}

impl Blocks {
    pub fn new(piece: usize, piece_length: usize, block_size: usize) -> Self {
        Self {
            block_size,
            piece,
            offset: 0,
            end: piece_length,
        }
    }
}

impl Iterator for Blocks {
    type Item = Block;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset < self.end {
            let block_size = self.block_size.min(self.end - self.offset);
            let block = Block::new(self.piece, self.offset, block_size);
            self.offset += block_size;
            Some(block)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK_SIZE: usize = 1024;

    #[test]
    fn one_piece_one_block() {
        let mut blocks = Blocks::new(0, 1024, BLOCK_SIZE);

        assert_eq!(Some(Block::new(0, 0, BLOCK_SIZE)), blocks.next());
        assert_eq!(None, blocks.next());
    }

    #[test]
    fn one_piece_multiple_blocks() {
        let mut blocks = Blocks::new(0, 2048, BLOCK_SIZE);

        assert_eq!(Some(Block::new(0, 0, BLOCK_SIZE)), blocks.next());
        assert_eq!(Some(Block::new(0, 1024, BLOCK_SIZE)), blocks.next());
        assert_eq!(None, blocks.next());
    }

    #[test]
    fn uneven_block_sizes() {
        let mut blocks = Blocks::new(3, BLOCK_SIZE + 42, BLOCK_SIZE);

        assert_eq!(Some(Block::new(3, 0, BLOCK_SIZE)), blocks.next());
        assert_eq!(Some(Block::new(3, 1024, 42)), blocks.next());
        assert_eq!(None, blocks.next());
    }

    #[test]
    fn short_last_piece() {
        let blocks: Vec<_> = Blocks::new(2, 10, BLOCK_SIZE).collect();

        assert_eq!(blocks, vec![Block::new(2, 0, 10)]);
    }
}
