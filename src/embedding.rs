//! Embedding generation and vector utilities.
//!
//! Defines the [`Embedder`] trait and the default [`HashEmbedder`], a
//! deterministic hash-feature embedding: no model download, no network,
//! bit-identical output for identical input. Embedding quality is a
//! pluggable strategy — anything honoring the fixed-dimension, pure,
//! deterministic contract can be swapped in behind the trait.
//!
//! Also provides the vector codecs used by the SQLite-backed index:
//! - [`vec_to_blob`] — encode a `Vec<f32>` as little-endian bytes
//! - [`blob_to_vec`] — decode a BLOB back into a `Vec<f32>`
//! - [`inner_product`] — similarity over the L2-normalized embedding space

use sha2::{Digest, Sha256};

/// Deterministic mapping from ruling text to a fixed-dimension vector.
///
/// Implementations must be pure: identical input produces a bit-identical
/// vector on every call, so re-embedding unchanged documents never
/// perturbs index contents and tests can assert exact vectors.
pub trait Embedder: Send + Sync {
    /// The fixed output dimension for the lifetime of an index.
    fn dimension(&self) -> usize;

    /// Embed a text into a vector of exactly `dimension()` components.
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Hash-feature embedder: tokens are hashed into buckets with a signed
/// contribution, then the vector is L2-normalized so inner product acts
/// as cosine similarity.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        HashEmbedder { dimension }
    }
}

impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u64::from_le_bytes(digest[0..8].try_into().unwrap()) as usize
                % self.dimension;
            // Signed contribution keeps hash collisions from only ever
            // inflating a bucket.
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        l2_normalize(&mut vector);
        vector
    }
}

/// Lowercased alphanumeric tokens; HS codes like `8518.22.00` split into
/// their numeric groups plus the whole code so exact-code overlap scores
/// highest.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric() && c != '.')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect();

    let dotted: Vec<String> = tokens
        .iter()
        .filter(|t| t.contains('.'))
        .flat_map(|t| t.split('.').map(|p| p.to_string()))
        .filter(|p| !p.is_empty())
        .collect();
    tokens.extend(dotted);
    tokens
}

fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Inner-product similarity.
///
/// Vectors are L2-normalized at embed time, so this is cosine similarity
/// in `[-1.0, 1.0]`. Returns `0.0` for empty or mismatched lengths.
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
