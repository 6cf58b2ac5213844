//! An in-flight funding negotiation that hasn't persisted into a `Channel`
//! yet (`spec.md` §3). Transient: if the opening worker fails or the peer
//! forgets, it is killed and the peer becomes eligible for deletion.

/// Placeholder for whatever opening-worker state is in flight. The opening
/// worker itself is out of scope (`spec.md` §1); this core only needs to
/// know that *something* is pending so the owning peer isn't deleted.
pub struct UncommittedChannel {
    /// Opaque progress marker surfaced to `listpeers`' synthetic
    /// `uncommitted_channel` entry.
    pub status: &'static str,
}

impl UncommittedChannel {
    pub fn new() -> Self {
        Self {
            status: "Opening channel",
        }
    }
}

impl Default for UncommittedChannel {
    fn default() -> Self {
        Self::new()
    }
}
