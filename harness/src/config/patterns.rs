//! Output patterns the workers are known to print

/// Literal marker the worker prints when it hits an unrecoverable condition
pub const FATAL_MARKER: &str = "[ABORT]";

/// A TCP listener (client front end or injector endpoint) is accepting connections
pub const TCP_LISTENING: &str = r"TCP.*[Ll]istening";

/// An anonymizing-transport tunnel to the peer is up
pub const TUNNEL_ESTABLISHED: &str = r"[Tt]unnel has been established";

/// A response was stored and announced through the distributed cache
pub const CACHE_PUBLISHED: &str = r"successfully published to cache";

/// The cache index accepted a new key
pub const INDEX_KEY_INSERTED: &str = r"[Ii]ndex.*inserted key";
