//! Bluetooth device addresses as they appear in scan results and filters.

use std::fmt::{self, Debug, Display, Formatter, LowerHex, UpperHex};
use std::str::FromStr;

/// The 6 byte address identifying a Bluetooth device. `address[0]` is the most significant byte.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Default)]
pub struct BDAddr {
    address: [u8; 6],
}

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ParseBDAddrError {
    #[error("Bluetooth address has to be 6 bytes long")]
    IncorrectByteCount,
    #[error("Invalid digit in address: {0}")]
    InvalidDigit(#[from] std::num::ParseIntError),
}

impl Display for BDAddr {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        <Self as UpperHex>::fmt(self, f)
    }
}

impl Debug for BDAddr {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        <Self as Display>::fmt(self, f)
    }
}

impl UpperHex for BDAddr {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let [a, b, c, d, e, g] = self.address;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a, b, c, d, e, g
        )
    }
}

impl LowerHex for BDAddr {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let [a, b, c, d, e, g] = self.address;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a, b, c, d, e, g
        )
    }
}

impl From<[u8; 6]> for BDAddr {
    fn from(address: [u8; 6]) -> Self {
        Self { address }
    }
}

impl AsRef<[u8]> for BDAddr {
    fn as_ref(&self) -> &[u8] {
        &self.address
    }
}

impl FromStr for BDAddr {
    type Err = ParseBDAddrError;

    /// Parses `aa:bb:cc:dd:ee:ff`, `aa-bb-cc-dd-ee-ff` or `aabbccddeeff`, in any letter case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = if s.contains([':', '-']) {
            s.split([':', '-'])
                .map(|part| {
                    if part.len() != 2 {
                        return Err(ParseBDAddrError::IncorrectByteCount);
                    }
                    Ok(u8::from_str_radix(part, 16)?)
                })
                .collect::<Result<Vec<u8>, _>>()?
        } else {
            if s.len() != 12 || !s.is_ascii() {
                return Err(ParseBDAddrError::IncorrectByteCount);
            }
            (0..12)
                .step_by(2)
                .map(|i| u8::from_str_radix(&s[i..i + 2], 16))
                .collect::<Result<Vec<u8>, _>>()?
        };

        let address: [u8; 6] = bytes
            .try_into()
            .map_err(|_| ParseBDAddrError::IncorrectByteCount)?;
        Ok(BDAddr { address })
    }
}

impl BDAddr {
    /// Destruct the address into the underlying array.
    pub fn into_inner(self) -> [u8; 6] {
        self.address
    }
}

#[cfg(feature = "serde")]
mod serde_impl {
    use super::BDAddr;
    use serde_cr::de::{Deserialize, Deserializer, Error};
    use serde_cr::ser::{Serialize, Serializer};

    /// Addresses travel as their colon-delimited string form.
    impl Serialize for BDAddr {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_str(self)
        }
    }

    impl<'de> Deserialize<'de> for BDAddr {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
            s.parse().map_err(D::Error::custom)
        }
    }
}
