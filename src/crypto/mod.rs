use std::fmt::{self, Debug, Display, Formatter};

use sha1::Digest;

pub const SHA1_LEN: usize = 20;

#[derive(PartialEq, Eq, Clone, Copy, Hash)]
pub struct Sha1(pub [u8; SHA1_LEN]);

impl Sha1 {
    pub fn digest(data: &[u8]) -> Self {
        Self(sha1::Sha1::digest(data).into())
    }

    pub fn from_hex(hex: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0; SHA1_LEN];
        hex::decode_to_slice(hex, &mut bytes)?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Debug for Sha1 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Sha1({})", self.to_hex())
    }
}

impl Display for Sha1 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest() {
        assert_eq!(
            Sha1::digest(b"abc"),
            Sha1::from_hex("a9993e364706816aba3e25717850c26c9cd0d89d").unwrap()
        );
    }

    #[test]
    fn invalid_hex() {
        assert!(Sha1::from_hex("abc").is_err());
    }

    #[test]
    fn debug_shows_hex() {
        assert_eq!(format!("{:?}", Sha1([0xab; 20])), format!("Sha1({})", "ab".repeat(20)));
    }
}
