mod writer;

pub use writer::FileWriter;

/// A piece whose SHA-1 matched the descriptor, ready to be persisted.
#[derive(PartialEq, Eq)]
pub struct VerifiedPiece {
    pub index: usize,
    pub data: Vec<u8>,
}

impl std::fmt::Debug for VerifiedPiece {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "VerifiedPiece {{ index: {}, data: <{} bytes> }}",
            self.index,
            self.data.len()
        )
    }
}
