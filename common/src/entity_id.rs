// Copyright (c) 2024 Botho Foundation

//! The entity identifier (GID) type

use core::{
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    str::FromStr,
};
use displaydoc::Display;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Number of bytes backing an entity identifier.
pub const GID_STORAGE_SIZE: usize = 24;

/// Length of the participant prefix shared by a participant and the endpoints
/// it owns.
const PREFIX_SIZE: usize = 12;

/// Potential parse errors
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum EntityIdError {
    /// Expected {expected} bytes, got {actual}
    InvalidLength {
        /// Required length
        expected: usize,
        /// Length that was supplied
        actual: usize,
    },
    /// Input is not valid hex
    InvalidHex,
}

impl std::error::Error for EntityIdError {}

/// Globally unique identifier of a participant or one of its entities.
///
/// Equality, ordering and hashing are byte-exact.
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct EntityId([u8; GID_STORAGE_SIZE]);

impl EntityId {
    /// Wrap raw identifier bytes.
    pub const fn from_bytes(bytes: [u8; GID_STORAGE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Copy an identifier out of a slice of exactly [GID_STORAGE_SIZE] bytes.
    pub fn try_from_slice(src: &[u8]) -> Result<Self, EntityIdError> {
        let bytes: [u8; GID_STORAGE_SIZE] =
            src.try_into().map_err(|_| EntityIdError::InvalidLength {
                expected: GID_STORAGE_SIZE,
                actual: src.len(),
            })?;
        Ok(Self(bytes))
    }

    /// The raw identifier bytes.
    pub fn as_bytes(&self) -> &[u8; GID_STORAGE_SIZE] {
        &self.0
    }

    /// Identifier of an endpoint owned by this participant.
    ///
    /// The endpoint shares the participant prefix and carries `entity_key` in
    /// the following four bytes, the layout DDS uses for GUIDs.
    pub fn derive_endpoint(&self, entity_key: u32) -> Self {
        let mut bytes = [0u8; GID_STORAGE_SIZE];
        bytes[..PREFIX_SIZE].copy_from_slice(&self.0[..PREFIX_SIZE]);
        bytes[PREFIX_SIZE..PREFIX_SIZE + 4].copy_from_slice(&entity_key.to_be_bytes());
        Self(bytes)
    }

    /// True if both identifiers carry the same participant prefix.
    pub fn same_participant(&self, other: &Self) -> bool {
        self.0[..PREFIX_SIZE] == other.0[..PREFIX_SIZE]
    }
}

impl From<[u8; GID_STORAGE_SIZE]> for EntityId {
    fn from(bytes: [u8; GID_STORAGE_SIZE]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for EntityId {
    type Error = EntityIdError;

    fn try_from(src: &[u8]) -> Result<Self, Self::Error> {
        Self::try_from_slice(src)
    }
}

impl AsRef<[u8]> for EntityId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for EntityId {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Debug for EntityId {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "EntityId({self})")
    }
}

impl FromStr for EntityId {
    type Err = EntityIdError;

    fn from_str(src: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(src).map_err(|_| EntityIdError::InvalidHex)?;
        Self::try_from_slice(&bytes)
    }
}

// Hex on the wire keeps config files and JSON output readable.
impl Serialize for EntityId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        hex::encode(self.0).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let hex_str = String::deserialize(deserializer)?;
        Self::from_str(&hex_str).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EntityId {
        let mut bytes = [0u8; GID_STORAGE_SIZE];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = i as u8;
        }
        EntityId::from_bytes(bytes)
    }

    #[test]
    fn test_entity_id_display_is_hex() {
        let id = sample();
        assert_eq!(
            id.to_string(),
            "000102030405060708090a0b0c0d0e0f1011121314151617"
        );
    }

    #[test]
    fn test_entity_id_from_str() {
        let id = sample();
        let parsed = EntityId::from_str(&id.to_string()).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_entity_id_from_str_rejects_bad_input() {
        assert_eq!(EntityId::from_str("zz"), Err(EntityIdError::InvalidHex));
        assert_eq!(
            EntityId::from_str("0011"),
            Err(EntityIdError::InvalidLength {
                expected: GID_STORAGE_SIZE,
                actual: 2
            })
        );
    }

    #[test]
    fn test_entity_id_equality_is_byte_exact() {
        let a = sample();
        let mut bytes = *a.as_bytes();
        bytes[GID_STORAGE_SIZE - 1] ^= 0x01;
        let b = EntityId::from_bytes(bytes);
        assert_ne!(a, b);
        assert_eq!(a, EntityId::try_from(&a.as_bytes()[..]).unwrap());
    }

    #[test]
    fn test_derive_endpoint_keeps_prefix() {
        let participant = sample();
        let writer = participant.derive_endpoint(7);
        let reader = participant.derive_endpoint(8);

        assert!(writer.same_participant(&participant));
        assert!(reader.same_participant(&participant));
        assert_ne!(writer, reader);
        assert_ne!(writer, participant);
        assert_eq!(&writer.as_bytes()[12..16], &7u32.to_be_bytes());
    }

    #[test]
    fn test_entity_id_serde_uses_hex() {
        let id = sample();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let parsed: EntityId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }
}
