//! Checksum hash algorithms and values.
//!
//! Assets record one checksum per requested algorithm when a blob is
//! attached. Artifact clients conventionally verify MD5/SHA-1 alongside
//! the SHA-2 family, so all four are supported.

use digest::DynDigest;
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Read};

/// A checksum hash algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    /// Stable lowercase name, used as the checksum attribute key.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Digest length in bytes.
    pub fn digest_len(&self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }

    /// Parse from a stable name.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "md5" => Ok(Self::Md5),
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            other => Err(crate::Error::UnknownAlgorithm(other.to_string())),
        }
    }

    fn new_digest(&self) -> Box<dyn DynDigest> {
        match self {
            Self::Md5 => Box::new(Md5::new()),
            Self::Sha1 => Box::new(Sha1::new()),
            Self::Sha256 => Box::new(Sha256::new()),
            Self::Sha512 => Box::new(Sha512::new()),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A computed hash value.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashValue(Vec<u8>);

impl HashValue {
    /// Create from raw digest bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Parse from lowercase hex, validating the length for the algorithm.
    pub fn from_hex(algorithm: HashAlgorithm, s: &str) -> crate::Result<Self> {
        if s.len() != algorithm.digest_len() * 2 {
            return Err(crate::Error::InvalidHash(format!(
                "expected {} hex chars for {}, got {}",
                algorithm.digest_len() * 2,
                algorithm,
                s.len()
            )));
        }
        let mut bytes = Vec::with_capacity(algorithm.digest_len());
        for chunk in s.as_bytes().chunks(2) {
            let hex_str = std::str::from_utf8(chunk)
                .map_err(|e| crate::Error::InvalidHash(e.to_string()))?;
            bytes.push(
                u8::from_str_radix(hex_str, 16)
                    .map_err(|e| crate::Error::InvalidHash(e.to_string()))?,
            );
        }
        Ok(Self(bytes))
    }

    /// Encode as lowercase hex.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for HashValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashValue({})", self.to_hex())
    }
}

impl fmt::Display for HashValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Incremental hasher for a single algorithm.
pub struct Hasher {
    algorithm: HashAlgorithm,
    digest: Box<dyn DynDigest>,
}

impl Hasher {
    /// Create a hasher for the given algorithm.
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            digest: algorithm.new_digest(),
        }
    }

    /// Update the hasher with data.
    pub fn update(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    /// Finalize and return the computed value.
    pub fn finalize(self) -> HashValue {
        HashValue(self.digest.finalize().to_vec())
    }

    /// The algorithm this hasher computes.
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }
}

/// Computes any requested set of algorithms in one pass over the input.
pub struct MultiHasher {
    hashers: Vec<Hasher>,
}

impl MultiHasher {
    /// Create a multi-hasher for the given algorithms.
    ///
    /// Duplicate algorithms are collapsed.
    pub fn new(algorithms: &[HashAlgorithm]) -> Self {
        let mut seen = Vec::new();
        let mut hashers = Vec::new();
        for algorithm in algorithms {
            if !seen.contains(algorithm) {
                seen.push(*algorithm);
                hashers.push(Hasher::new(*algorithm));
            }
        }
        Self { hashers }
    }

    /// Update all hashers with data.
    pub fn update(&mut self, data: &[u8]) {
        for hasher in &mut self.hashers {
            hasher.update(data);
        }
    }

    /// Consume a reader, hashing everything it yields.
    ///
    /// Returns the number of bytes read.
    pub fn consume(&mut self, reader: &mut dyn Read) -> io::Result<u64> {
        let mut buf = [0u8; 8192];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            self.update(&buf[..n]);
            total += n as u64;
        }
        Ok(total)
    }

    /// Finalize, returning one value per requested algorithm.
    pub fn finalize(self) -> BTreeMap<HashAlgorithm, HashValue> {
        self.hashers
            .into_iter()
            .map(|h| (h.algorithm, h.finalize()))
            .collect()
    }
}

/// Reader adapter feeding everything it yields through a [`MultiHasher`].
///
/// Lets a consumer hash a stream in the same pass that stores it.
pub struct HashingReader<'a> {
    inner: &'a mut dyn Read,
    hasher: &'a mut MultiHasher,
}

impl<'a> HashingReader<'a> {
    /// Wrap a reader, updating `hasher` with every byte read.
    pub fn new(inner: &'a mut dyn Read, hasher: &'a mut MultiHasher) -> Self {
        Self { inner, hasher }
    }
}

impl Read for HashingReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

/// Compute a single hash of a byte slice.
pub fn hash_of(algorithm: HashAlgorithm, data: &[u8]) -> HashValue {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_sha256() {
        // sha256 of empty input
        let value = hash_of(HashAlgorithm::Sha256, b"");
        assert_eq!(
            value.to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_known_md5_and_sha1() {
        let value = hash_of(HashAlgorithm::Md5, b"abc");
        assert_eq!(value.to_hex(), "900150983cd24fb0d6963f7d28e17f72");

        let value = hash_of(HashAlgorithm::Sha1, b"abc");
        assert_eq!(value.to_hex(), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn test_hex_roundtrip_rejects_bad_length() {
        let value = hash_of(HashAlgorithm::Sha256, b"data");
        let parsed = HashValue::from_hex(HashAlgorithm::Sha256, &value.to_hex()).unwrap();
        assert_eq!(value, parsed);

        assert!(HashValue::from_hex(HashAlgorithm::Sha256, "abcd").is_err());
    }

    #[test]
    fn test_multi_hasher_single_pass() {
        let mut multi = MultiHasher::new(&[
            HashAlgorithm::Sha1,
            HashAlgorithm::Sha256,
            HashAlgorithm::Sha1, // duplicate collapsed
        ]);
        let mut reader: &[u8] = b"hello world";
        let read = multi.consume(&mut reader).unwrap();
        assert_eq!(read, 11);

        let hashes = multi.finalize();
        assert_eq!(hashes.len(), 2);
        assert_eq!(
            hashes[&HashAlgorithm::Sha256],
            hash_of(HashAlgorithm::Sha256, b"hello world")
        );
    }

    #[test]
    fn test_algorithm_parse() {
        assert_eq!(HashAlgorithm::parse("sha512").unwrap(), HashAlgorithm::Sha512);
        assert!(HashAlgorithm::parse("crc32").is_err());
    }
}
