//! Content fingerprints for change detection.
//!
//! A fingerprint is the SHA-256 digest of a document's title, body,
//! last-modified time and version. Every field is written with a length
//! prefix so that moving bytes between adjacent fields changes the digest.

use sha2::{Digest, Sha256};

use crate::models::Document;

/// Compute the fingerprint of a document as lowercase hex.
///
/// ```rust
/// use chrono::{TimeZone, Utc};
/// use vector_sync::fingerprint::fingerprint;
/// use vector_sync::models::Document;
///
/// let doc = Document {
///     id: "1".into(),
///     title: "A".into(),
///     body: "x".into(),
///     last_modified: Utc.timestamp_opt(0, 0).unwrap(),
///     version: 1,
///     metadata: Default::default(),
/// };
/// assert_eq!(fingerprint(&doc).len(), 64);
/// assert_eq!(fingerprint(&doc), fingerprint(&doc.clone()));
/// ```
pub fn fingerprint(doc: &Document) -> String {
    let mut hasher = Sha256::new();
    write_field(&mut hasher, doc.title.as_bytes());
    write_field(&mut hasher, doc.body.as_bytes());
    write_field(
        &mut hasher,
        &doc.last_modified.timestamp_micros().to_le_bytes(),
    );
    write_field(&mut hasher, &doc.version.to_le_bytes());
    hex::encode(hasher.finalize())
}

fn write_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}
