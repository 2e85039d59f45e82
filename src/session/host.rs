//! Host integration seam.

use async_trait::async_trait;

use crate::capture::ParticipantId;

/// The session the pipeline is attached to. Implemented by the host
/// integration; lifecycle events are delivered by calling the coordinator's
/// `on_*` methods directly.
#[async_trait]
pub trait SessionHost: Send + Sync {
    /// Everyone currently connected to the session.
    async fn participants(&self) -> Vec<ParticipantId>;
}

/// A host with a fixed roster, for tooling and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticRoster {
    participants: Vec<ParticipantId>,
}

impl StaticRoster {
    pub fn new(participants: impl IntoIterator<Item = ParticipantId>) -> Self {
        Self {
            participants: participants.into_iter().collect(),
        }
    }
}

#[async_trait]
impl SessionHost for StaticRoster {
    async fn participants(&self) -> Vec<ParticipantId> {
        self.participants.clone()
    }
}
