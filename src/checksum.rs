/// Checksum algorithms accepted for chunk verification.
///
/// `xxh3_64` is the fast default for LAN uploads; `blake3` is the
/// cryptographic option for deployments that need collision resistance.
/// The deployment picks one algorithm and advertises its name to clients
/// through the status response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Xxh3_64,
    Blake3,
}

impl Algorithm {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "xxh3_64" => Some(Algorithm::Xxh3_64),
            "blake3" => Some(Algorithm::Blake3),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Xxh3_64 => "xxh3_64",
            Algorithm::Blake3 => "blake3",
        }
    }
}

/// Compute the digest of `data` under the algorithm named `algorithm`.
///
/// Returns lowercase hex. An unknown algorithm name yields `None`, not an
/// error; callers treat that the same as a digest that fails to match.
pub fn compute(algorithm: &str, data: &[u8]) -> Option<String> {
    match Algorithm::from_name(algorithm)? {
        Algorithm::Xxh3_64 => {
            let digest = xxhash_rust::xxh3::xxh3_64(data);
            Some(hex::encode(digest.to_be_bytes()))
        }
        Algorithm::Blake3 => {
            let digest = blake3::hash(data);
            Some(hex::encode(digest.as_bytes()))
        }
    }
}
