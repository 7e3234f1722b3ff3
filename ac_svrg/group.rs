use crate::{
    episode::Episode,
    error::Result,
    gradient::Gradients,
};

/// Episodes collected since the last SVRG phase, each paired with the critic
/// gradient captured when it finished.
#[derive(Debug, Default)]
pub struct Group {
    episodes: Vec<Episode>,
    snapshots: Vec<Gradients>,
}

impl Group {
    #[must_use]
    pub fn new() -> Group {
        Group::default()
    }

    pub fn push(&mut self, episode: Episode, snapshot: Gradients) {
        self.episodes.push(episode);
        self.snapshots.push(snapshot);
        debug_assert_eq!(self.episodes.len(), self.snapshots.len());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    #[must_use]
    pub fn episodes(&self) -> &[Episode] {
        &self.episodes
    }

    #[must_use]
    pub fn snapshots(&self) -> &[Gradients] {
        &self.snapshots
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<(&Episode, &Gradients)> {
        Some((self.episodes.get(index)?, self.snapshots.get(index)?))
    }

    /// Mean of the stored snapshots. Fails on an empty group.
    pub fn mean_gradient(&self) -> Result<Gradients> {
        Gradients::mean(&self.snapshots)
    }

    /// Closes the group, dropping every archived episode and snapshot.
    pub fn clear(&mut self) {
        self.episodes.clear();
        self.snapshots.clear();
    }
}
