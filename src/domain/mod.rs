//! Core domain types for Tollgate.

mod card;
mod chain;
mod event;
mod healing;
mod reader;

pub use card::{Card, Tariff, VehicleType};
pub use chain::{Anchor, AnchorStatus, ChainReport, TamperClass, VdfLink};
pub use event::{
    Decision, DecisionRecord, RejectCode, RuleFlag, TollEvent, TrustSnapshot,
};
pub use healing::{
    ChallengeKind, ChallengeOutcome, PeerVote, ProbationChallenge, QuarantineRecord, TagSuspicion,
    Vote,
};
pub use reader::{Reader, ReaderStatus, ViolationClass, ViolationRecord};

/// 32-byte SHA-256 hash
pub type Hash256 = [u8; 32];

/// Reader identifier (opaque string assigned at registration)
pub type ReaderId = String;

/// Serde module for serializing Hash256 as hex strings
pub mod hash256_hex {
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes for Hash256"))
    }
}

/// Serde module for Vec<Hash256> as hex strings
pub mod hash256_hex_vec {
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(items: &[[u8; 32]], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let hexed: Vec<String> = items.iter().map(hex::encode).collect();
        serializer.collect_seq(hexed)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<[u8; 32]>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let strings: Vec<String> = Vec::deserialize(deserializer)?;
        strings
            .into_iter()
            .map(|s| {
                hex::decode(&s)
                    .map_err(serde::de::Error::custom)
                    .and_then(|b| {
                        b.try_into()
                            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
                    })
            })
            .collect()
    }
}
