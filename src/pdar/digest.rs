use core::{cmp, fmt};
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io;
use std::io::Read;
use std::path::Path;

use digest::{Digest, DynDigest};
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use snafu::ResultExt;
use strum_macros::{Display as EnumDisplay, EnumString};

use crate::pdar::error::{Error, IoReadSnafu, Result};

/// The closed set of digest algorithms a PDAR archive may declare.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, EnumString, EnumDisplay)]
pub enum DigestAlgorithm {
    #[strum(serialize = "sha1")]
    Sha1,
    #[strum(serialize = "sha256")]
    Sha256,
    #[strum(serialize = "sha512")]
    Sha512,
    #[strum(serialize = "md5")]
    Md5,
}

impl DigestAlgorithm {
    pub fn parse(name: &str) -> Result<Self> {
        name.parse()
            .map_err(|_| Error::UnknownHashAlgorithm { name: name.into() })
    }

    fn new_digest(&self) -> Box<dyn DynDigest> {
        match self {
            DigestAlgorithm::Sha1 => Box::new(Sha1::new()),
            DigestAlgorithm::Sha256 => Box::new(Sha256::new()),
            DigestAlgorithm::Sha512 => Box::new(Sha512::new()),
            DigestAlgorithm::Md5 => Box::new(Md5::new()),
        }
    }

    /// The digest of the zero-length byte sequence; the reserved "absent" sentinel.
    pub fn empty_digest(&self) -> HexDigest {
        self.new_digest().finalize().to_vec().into()
    }
}

/// Computes content digests under a configured algorithm. Mirrors the `HashEngine` the format
/// spec describes: a thin, stateless handle bound to one algorithm.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct HashEngine {
    algorithm: DigestAlgorithm,
}

impl HashEngine {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    pub fn hash_bytes(&self, bytes: &[u8]) -> HexDigest {
        let mut reader = self.algorithm.reader(bytes);
        io::copy(&mut reader, &mut io::sink()).expect("hashing an in-memory buffer cannot fail");
        reader.finalize_hex()
    }

    pub fn hash_file<P: AsRef<Path>>(&self, path: P) -> Result<HexDigest> {
        let path = path.as_ref();
        let file = File::open(path).context(IoReadSnafu { path })?;
        let mut reader = self.algorithm.reader(file);
        io::copy(&mut reader, &mut io::sink()).context(IoReadSnafu { path })?;
        Ok(reader.finalize_hex())
    }

    pub fn empty_digest(&self) -> HexDigest {
        self.algorithm.empty_digest()
    }
}

impl DigestAlgorithm {
    fn reader<R: Read>(&self, reader: R) -> DigestReader<R> {
        DigestReader::new(self.new_digest(), reader)
    }
}

/// Reader wrapper that calculates a digest while reading.
pub struct DigestReader<R: Read> {
    digest: Box<dyn DynDigest>,
    inner: R,
}

impl<R: Read> DigestReader<R> {
    fn new(digest: Box<dyn DynDigest>, reader: R) -> Self {
        Self {
            digest,
            inner: reader,
        }
    }

    fn finalize_hex(self) -> HexDigest {
        self.digest.finalize().to_vec().into()
    }
}

impl<R: Read> Read for DigestReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let result = self.inner.read(buf)?;
        if result > 0 {
            self.digest.update(&buf[0..result]);
        }
        Ok(result)
    }
}

/// A digest encoded as a hex string.
#[derive(Debug, Clone, Eq)]
pub struct HexDigest(String);

impl From<Vec<u8>> for HexDigest {
    fn from(bytes: Vec<u8>) -> Self {
        Self(hex::encode(bytes))
    }
}

impl From<&str> for HexDigest {
    fn from(digest: &str) -> Self {
        Self(digest.to_string())
    }
}

impl From<String> for HexDigest {
    fn from(digest: String) -> Self {
        Self(digest)
    }
}

impl From<HexDigest> for String {
    fn from(digest: HexDigest) -> Self {
        digest.0
    }
}

impl AsRef<str> for HexDigest {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl Ord for HexDigest {
    /// Case insensitive string comparison.
    fn cmp(&self, other: &Self) -> Ordering {
        let left = self.0.as_bytes();
        let right = other.0.as_bytes();
        let l = cmp::min(left.len(), right.len());

        for i in 0..l {
            match left[i].to_ascii_lowercase().cmp(&right[i].to_ascii_lowercase()) {
                Ordering::Equal => (),
                non_eq => return non_eq,
            }
        }

        left.len().cmp(&right.len())
    }
}

impl PartialOrd for HexDigest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HexDigest {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Hash for HexDigest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_ascii_lowercase().hash(state);
    }
}

impl Display for HexDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
