//! Lookup hook for private room codes.
//!
//! A private room is one whose world id is an access code handed out
//! elsewhere (a sponsor dashboard, an invite link). The relay does not
//! issue codes itself. It asks a [`PrivateRooms`] implementation whether
//! a code is registered while admitting a connection.

use std::collections::HashSet;
use std::future::Future;

/// Answers "is this a registered private room code?".
///
/// # Trait bounds
///
/// - `Send + Sync`: shared by every connection handler task.
/// - `'static`: lives as long as the relay.
///
/// # Example
///
/// ```rust
/// use meshroom_room::PrivateRooms;
///
/// /// Treats every code starting with `vip` as registered.
/// struct PrefixRooms;
///
/// impl PrivateRooms for PrefixRooms {
///     async fn is_registered(&self, code: &str) -> bool {
///         code.starts_with("vip")
///     }
/// }
/// ```
pub trait PrivateRooms: Send + Sync + 'static {
    /// Returns `true` if `code` names a registered private room.
    fn is_registered(&self, code: &str) -> impl Future<Output = bool> + Send;

    /// Whether lookups are possible at all. When `false` the admission
    /// policy rejects unlisted worlds without calling
    /// [`is_registered`](Self::is_registered).
    fn enabled(&self) -> bool {
        true
    }
}

/// Deployments without private rooms.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPrivateRooms;

impl PrivateRooms for NoPrivateRooms {
    async fn is_registered(&self, _code: &str) -> bool {
        false
    }

    fn enabled(&self) -> bool {
        false
    }
}

/// A fixed set of codes, typically read from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticPrivateRooms {
    codes: HashSet<String>,
}

impl StaticPrivateRooms {
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            codes: codes.into_iter().map(Into::into).collect(),
        }
    }
}

impl PrivateRooms for StaticPrivateRooms {
    async fn is_registered(&self, code: &str) -> bool {
        self.codes.contains(code)
    }

    fn enabled(&self) -> bool {
        !self.codes.is_empty()
    }
}
