//! Account Keys (a.k.a. setup codes)
//!
//! 160 random bits rendered as eight groups of four Crockford base32
//! characters, e.g. `7K2M-QX9D-…`. Users type them back in when setting up a
//! new device, so input is normalized before it ever reaches the KDF.

use std::fmt;

use zeroize::Zeroizing;

use super::keys::random_bytes;

const ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";
const ENTROPY_BYTES: usize = 20;
const GROUP_LEN: usize = 4;

/// A user's Account Key, zeroed on drop
#[derive(Clone, PartialEq, Eq)]
pub struct AccountKey(Zeroizing<String>);

impl fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccountKey(..)")
    }
}

impl AccountKey {
    /// Generate a fresh Account Key from the OS RNG
    pub fn generate() -> Self {
        let entropy = Zeroizing::new(random_bytes::<ENTROPY_BYTES>());

        // 20 bytes = 160 bits = 32 five-bit symbols
        let mut symbols = Zeroizing::new(String::with_capacity(40));
        let mut acc: u16 = 0;
        let mut bits = 0;
        let mut emitted = 0;
        for byte in entropy.iter() {
            acc = (acc << 8) | u16::from(*byte);
            bits += 8;
            while bits >= 5 {
                bits -= 5;
                if emitted > 0 && emitted % GROUP_LEN == 0 {
                    symbols.push('-');
                }
                symbols.push(ALPHABET[usize::from((acc >> bits) & 0x1f)] as char);
                emitted += 1;
            }
            acc &= (1 << bits) - 1;
        }
        Self(symbols)
    }

    /// Accept user input: trims, drops inner whitespace, upper-cases
    pub fn parse(input: &str) -> Self {
        let normalized: String = input
            .chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_uppercase)
            .collect();
        Self(Zeroizing::new(normalized))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
