pub mod broker;
pub mod encoding;
pub mod hub;
pub mod id;
pub mod timestamp;

use bytes::Bytes;
use derivative::Derivative;
use serde_with::base64::{Base64, UrlSafe};
use serde_with::formats::Unpadded;
use serde_with::{FromInto, IfIsHumanReadable, serde_as};

/// An opaque byte payload on the wire. Base64 in human-readable encodings.
#[serde_as]
#[derive(serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq, Derivative)]
#[derivative(Debug)]
pub struct Blob(
    #[derivative(Debug(format_with = "debug_bytes_len"))]
    #[serde_as(as = "IfIsHumanReadable<Base64<UrlSafe, Unpadded>, FromInto<Vec<u8>>>")]
    pub Bytes,
);

impl Blob {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl AsRef<[u8]> for Blob {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Bytes> for Blob {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl From<Vec<u8>> for Blob {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

pub(crate) fn debug_bytes_len(
    bytes: &Bytes,
    f: &mut std::fmt::Formatter<'_>,
) -> Result<(), std::fmt::Error> {
    write!(f, "<{} bytes>", bytes.len())
}

#[cfg(test)]
mod tests {
    use super::Blob;

    #[test]
    fn blob_json_roundtrip() {
        let blob = Blob::from(vec![0u8, 1, 2, 250, 251, 252]);
        let json = serde_json::to_string(&blob).expect("serialize blob");
        let back: Blob = serde_json::from_str(&json).expect("deserialize blob");
        assert_eq!(back, blob);
    }

    #[test]
    fn blob_debug_hides_content() {
        let blob = Blob::from(vec![7u8; 42]);
        assert_eq!(format!("{blob:?}"), "Blob(<42 bytes>)");
    }
}
