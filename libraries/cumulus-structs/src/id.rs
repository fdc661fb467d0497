use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid identifier")]
pub struct IdParseError;

fn random_hex() -> SmolStr {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    SmolStr::new(hex::encode(bytes))
}

fn parse_token(s: &str) -> Result<SmolStr, IdParseError> {
    if s.is_empty() || s.len() > 64 || !s.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(IdParseError);
    }
    Ok(SmolStr::new(s))
}

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(SmolStr);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_token(s).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

id_type!(
    /// Identity of a storage hub.
    HubId
);
id_type!(
    /// Identity of a catalog file.
    FileId
);
id_type!(
    /// Identity of a fragment; also the key of its remote blob.
    FragId
);

impl HubId {
    /// Generate a fresh hub id.
    pub fn generate() -> Self {
        Self(smol_str::format_smolstr!("CML-{}", random_hex()))
    }
}

impl FileId {
    pub fn generate() -> Self {
        Self(random_hex())
    }
}

impl FragId {
    pub fn generate() -> Self {
        Self(random_hex())
    }
}
