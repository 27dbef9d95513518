//! Content digests, `algorithm:encoded`.

use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};

use sha2::{Digest as _, Sha256};
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt as _, AsyncRead, ReadBuf};

use crate::error::RegistryError;

const SHA256: &str = "sha256";
const SHA512: &str = "sha512";

/// A content digest such as `sha256:3a6eb079...`.
///
/// Digests are validated on construction: `sha256` and `sha512` require
/// lowercase hex of the right length, other algorithms must follow the
/// OCI digest grammar.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    value: String,
    colon: usize,
}

impl Digest {
    /// Digest of an in-memory payload.
    pub fn sha256(data: &[u8]) -> Self {
        Self::from_hasher(Sha256::new_with_prefix(data))
    }

    /// Read `reader` to the end and return the sha256 digest of everything read.
    pub async fn from_content<R>(mut reader: R) -> io::Result<Self>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut hasher = Sha256::new();
        loop {
            let chunk = reader.fill_buf().await?;
            if chunk.is_empty() {
                break;
            }
            hasher.update(chunk);
            let n = chunk.len();
            reader.consume(n);
        }
        Ok(Self::from_hasher(hasher))
    }

    fn from_hasher(hasher: Sha256) -> Self {
        Self {
            value: format!("{SHA256}:{}", hex::encode(hasher.finalize())),
            colon: SHA256.len(),
        }
    }

    /// The hash algorithm, e.g. `sha256`.
    pub fn algorithm(&self) -> &str {
        &self.value[..self.colon]
    }

    /// The encoded hash.
    pub fn hex(&self) -> &str {
        &self.value[self.colon + 1..]
    }

    /// Canonical `algorithm:hex` form.
    pub fn as_str(&self) -> &str {
        &self.value
    }
}

fn valid_algorithm(algorithm: &str) -> bool {
    // [a-z0-9]+([+._-][a-z0-9]+)*
    !algorithm.is_empty()
        && algorithm.split(['+', '.', '_', '-']).all(|component| {
            !component.is_empty()
                && component
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        })
}

fn lower_hex(encoded: &str, len: usize) -> bool {
    encoded.len() == len
        && encoded
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

impl FromStr for Digest {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || RegistryError::MalformedDigest(s.to_owned());
        let (algorithm, encoded) = s.split_once(':').ok_or_else(malformed)?;

        let valid = match algorithm {
            SHA256 => lower_hex(encoded, 64),
            SHA512 => lower_hex(encoded, 128),
            other => {
                valid_algorithm(other)
                    && !encoded.is_empty()
                    && encoded
                        .bytes()
                        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'=' | b'_' | b'-'))
            }
        };

        if !valid {
            return Err(malformed());
        }

        Ok(Self {
            value: s.to_owned(),
            colon: algorithm.len(),
        })
    }
}

impl TryFrom<String> for Digest {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Digest> for String {
    fn from(value: Digest) -> Self {
        value.value
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// An [`AsyncRead`] adapter which hashes every byte read through it.
#[pin_project::pin_project]
pub struct DigestReader<R> {
    #[pin]
    inner: R,
    hasher: Sha256,
    read: u64,
}

impl<R> DigestReader<R> {
    /// Wrap `inner`.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            read: 0,
        }
    }

    /// Digest of the bytes read so far.
    pub fn digest(&self) -> Digest {
        Digest::from_hasher(self.hasher.clone())
    }

    /// Number of bytes read so far.
    pub fn bytes_read(&self) -> u64 {
        self.read
    }
}

impl<R> fmt::Debug for DigestReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestReader")
            .field("read", &self.read)
            .finish_non_exhaustive()
    }
}

impl<R: AsyncRead> AsyncRead for DigestReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        let before = buf.filled().len();
        let poll = this.inner.poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let fresh = &buf.filled()[before..];
            this.hasher.update(fresh);
            *this.read += fresh.len() as u64;
        }
        poll
    }
}


#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        /// Streaming and in-memory hashing agree, whatever the chunking.
        #[test]
        fn from_content_matches_sha256(
            data in prop::collection::vec(any::<u8>(), 0..4096),
            capacity in 1usize..512,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let reader = tokio::io::BufReader::with_capacity(capacity, &data[..]);
            let streamed = runtime.block_on(Digest::from_content(reader)).unwrap();
            prop_assert_eq!(streamed, Digest::sha256(&data));
        }

        /// The string form parses back to the same digest.
        #[test]
        fn display_parse_round_trip(data in prop::collection::vec(any::<u8>(), 0..256)) {
            let digest = Digest::sha256(&data);
            let parsed: Digest = digest.to_string().parse().unwrap();
            prop_assert_eq!(&parsed, &digest);
            prop_assert_eq!(parsed.hex().len(), 64);
        }

        /// Parsing never panics, and whatever parses prints the same way.
        #[test]
        fn parse_is_canonical(input in "[a-z0-9+._-]{1,12}:[a-zA-Z0-9=_-]{0,80}") {
            if let Ok(digest) = input.parse::<Digest>() {
                prop_assert_eq!(digest.to_string(), input);
            }
        }
    }
}
