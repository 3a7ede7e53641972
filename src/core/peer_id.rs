use std::fmt::{self, Debug, Formatter};

use rand::RngCore;

const CLIENT_PREFIX: &[u8; 8] = b"-RT0100-";

#[derive(PartialEq, Eq, Clone, Copy, Hash)]
pub struct PeerId(pub [u8; 20]);

impl PeerId {
    /// Azureus-style id: client prefix followed by random bytes.
    pub fn random() -> Self {
        let mut data = [0; 20];
        rand::rng().fill_bytes(&mut data);
        data[..CLIENT_PREFIX.len()].copy_from_slice(CLIENT_PREFIX);
        Self(data)
    }
}

impl Debug for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_carry_client_prefix() {
        let a = PeerId::random();
        let b = PeerId::random();

        assert_eq!(&a.0[..8], CLIENT_PREFIX);
        assert_ne!(a, b);
    }
}
