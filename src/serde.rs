//! De-/Serialization with alternative formats.
//!
//! The various modules in here are intended to be used with `serde`'s [`with` annotation] to de-/serialize as something other than the default format.
//!
//! [`with` annotation]: https://serde.rs/attributes.html#field-attributes

/// De-/serialize a [`std::time::Duration`] as a whole number of milliseconds.
pub mod millis {
    use serde_cr::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// De-/serialize [`crate::api::CallbackType`] as its raw bits.
pub mod callback_type {
    use crate::api::CallbackType;
    use serde_cr::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        callback_type: &CallbackType,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(callback_type.bits())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<CallbackType, D::Error> {
        let bits = u32::deserialize(deserializer)?;
        CallbackType::from_bits(bits)
            .ok_or_else(|| D::Error::custom(format!("unknown callback type bits {:#x}", bits)))
    }
}
