//! Entity: the payload carrier of every message.
//!
//! An entity is an ordered metadata map (string keys and values, used for
//! content types, dispositions, fragment indices, ranges) plus a binary data
//! buffer. Metadata is mutable until the message is built; the data buffer is
//! an in-memory re-readable [`Bytes`].

use bytes::Bytes;

/// Well-known entity metadata names.
pub mod metas {
    /// Framework version number
    pub const META_SOCKETD_VERSION: &str = "SocketD";
    /// Total data length (set on the first fragment of a split entity)
    pub const META_DATA_LENGTH: &str = "Data-Length";
    /// Data content type
    pub const META_DATA_TYPE: &str = "Data-Type";
    /// Fragment index (1-based) of a split entity
    pub const META_DATA_FRAGMENT_IDX: &str = "Data-Fragment-Idx";
    /// Disposition file name
    pub const META_DATA_DISPOSITION_FILENAME: &str = "Data-Disposition-Filename";
    /// Range start (paging)
    pub const META_RANGE_START: &str = "Data-Range-Start";
    /// Range size (paging)
    pub const META_RANGE_SIZE: &str = "Data-Range-Size";
}

/// A payload carrier: ordered metadata plus a binary data buffer.
///
/// # Examples
///
/// ```
/// use socketd_core::entity::Entity;
///
/// let entity = Entity::of_text("hello")
///     .put_meta("Data-Type", "text/plain");
/// assert_eq!(entity.meta("Data-Type"), Some("text/plain"));
/// assert_eq!(entity.data_size(), 5);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Entity {
    // Linear scan keeps insertion order; meta maps are tiny.
    meta: Vec<(String, String)>,
    data: Bytes,
}

impl Entity {
    /// Create an empty entity.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            meta: Vec::new(),
            data: Bytes::new(),
        }
    }

    /// Create an entity with a UTF-8 text body.
    #[must_use]
    pub fn of_text(text: impl Into<String>) -> Self {
        Self {
            meta: Vec::new(),
            data: Bytes::from(text.into()),
        }
    }

    /// Create an entity with a binary body.
    #[must_use]
    pub fn of_bytes(data: impl Into<Bytes>) -> Self {
        Self {
            meta: Vec::new(),
            data: data.into(),
        }
    }

    /// Add or replace a metadata entry (insertion order preserved,
    /// last put wins).
    #[must_use]
    pub fn put_meta(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_meta(name, value);
        self
    }

    /// In-place variant of [`Entity::put_meta`].
    pub fn set_meta(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(entry) = self.meta.iter_mut().find(|(k, _)| *k == name) {
            entry.1 = value;
        } else {
            self.meta.push((name, value));
        }
    }

    /// Remove a metadata entry; idempotent.
    pub fn remove_meta(&mut self, name: &str) {
        self.meta.retain(|(k, _)| k != name);
    }

    /// Get a metadata value.
    #[must_use]
    pub fn meta(&self, name: &str) -> Option<&str> {
        self.meta
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Get a metadata value or a default.
    #[must_use]
    pub fn meta_or_default<'a>(&'a self, name: &str, def: &'a str) -> &'a str {
        self.meta(name).unwrap_or(def)
    }

    /// Get a metadata value as an integer.
    ///
    /// Missing or unparsable values fall back to `0` — a deliberate lenient
    /// default, not an error path.
    #[must_use]
    pub fn meta_as_int(&self, name: &str) -> i64 {
        self.meta(name).and_then(|v| v.parse().ok()).unwrap_or(0)
    }

    /// Get a metadata value as a float, `0.0` on missing/unparsable.
    #[must_use]
    pub fn meta_as_float(&self, name: &str) -> f64 {
        self.meta(name).and_then(|v| v.parse().ok()).unwrap_or(0.0)
    }

    /// All metadata entries in insertion order.
    #[must_use]
    pub fn meta_map(&self) -> &[(String, String)] {
        &self.meta
    }

    /// Encode the metadata as a query string (`k=v&k2=v2`).
    ///
    /// `%`, `=`, and `&` are percent-escaped so the encoding round-trips
    /// losslessly through [`Entity::parse_meta_string`].
    #[must_use]
    pub fn meta_string(&self) -> String {
        let mut out = String::new();
        for (k, v) in &self.meta {
            if !out.is_empty() {
                out.push('&');
            }
            escape_into(&mut out, k);
            out.push('=');
            escape_into(&mut out, v);
        }
        out
    }

    /// Decode a query-string metadata encoding produced by
    /// [`Entity::meta_string`]. Keys without `=` get an empty value.
    #[must_use]
    pub fn parse_meta_string(meta_string: &str) -> Vec<(String, String)> {
        if meta_string.is_empty() {
            return Vec::new();
        }
        meta_string
            .split('&')
            .map(|kv| match kv.split_once('=') {
                Some((k, v)) => (unescape(k), unescape(v)),
                None => (unescape(kv), String::new()),
            })
            .collect()
    }

    /// Replace the whole metadata map (used when reassembling fragments).
    pub fn set_meta_map(&mut self, meta: Vec<(String, String)>) {
        self.meta = meta;
    }

    /// The data buffer.
    #[must_use]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// The data as UTF-8 text (lossy).
    #[must_use]
    pub fn data_as_string(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    /// Data size in bytes.
    #[must_use]
    pub fn data_size(&self) -> usize {
        self.data.len()
    }

    /// Replace the data buffer.
    pub fn set_data(&mut self, data: impl Into<Bytes>) {
        self.data = data.into();
    }

    /// Release any transient backing resource. Idempotent; safe to call
    /// multiple times. After release the data buffer reads as empty.
    pub fn release(&mut self) {
        self.data = Bytes::new();
    }
}

fn escape_into(out: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            '=' => out.push_str("%3D"),
            '&' => out.push_str("%26"),
            _ => out.push(c),
        }
    }
}

fn unescape(s: &str) -> String {
    // Decode into raw bytes first; multi-byte UTF-8 sequences must pass
    // through intact, so per-byte char conversion is not an option.
    let mut out = Vec::with_capacity(s.len());
    let mut bytes = s.bytes();
    while let Some(b) = bytes.next() {
        if b == b'%' {
            let hi = bytes.next();
            let lo = bytes.next();
            let decoded = match (hi, lo) {
                (Some(h), Some(l)) => {
                    let hex = [h, l];
                    std::str::from_utf8(&hex)
                        .ok()
                        .and_then(|s| u8::from_str_radix(s, 16).ok())
                }
                _ => None,
            };
            match decoded {
                Some(byte) => out.push(byte),
                None => out.push(b'%'),
            }
        } else {
            out.push(b);
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
