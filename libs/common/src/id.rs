use ulid::Ulid;

/// Prefixes of the identifiers this service mints. User ids come from the
/// platform and are opaque here.
pub mod prefix {
    pub const COMMUNITY: &str = "com";
    pub const MESSAGE: &str = "msg";
    pub const CONNECTION: &str = "conn";
}

/// A fresh `<prefix>_<ulid>` identifier.
///
/// # Examples
/// ```
/// let id = community_common::id::prefixed_ulid("msg");
/// assert!(id.starts_with("msg_"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{prefix}_{}", Ulid::new())
}

/// Whether `id` is `<prefix>_<ulid>` with a well-formed ULID body.
pub fn has_prefix(id: &str, prefix: &str) -> bool {
    id.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('_'))
        .is_some_and(|body| Ulid::from_string(body).is_ok())
}
