use ulid::Ulid;

/// Generates a new ULID-based ID with the given prefix.
///
/// # Examples
/// ```
/// let id = murmur_common::id::prefixed_ulid("sck");
/// assert!(id.starts_with("sck_"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new().to_string())
}

/// Well-known ID prefixes.
pub mod prefix {
    /// Realtime socket connections.
    pub const CONNECTION: &str = "sck";
}
