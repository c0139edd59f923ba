use dashmap::DashMap;

use crate::common::types::SessionKey;

/// Last explicitly chosen volume per session key.
///
/// Entries are never removed while the process runs, so a preference set
/// with no session active applies to the next play.
#[derive(Default)]
pub struct VolumeRegistry {
    levels: DashMap<SessionKey, f32>,
}

impl VolumeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &SessionKey) -> Option<f32> {
        self.levels.get(key).map(|level| *level)
    }

    pub fn set(&self, key: &SessionKey, volume: f32) {
        self.levels.insert(key.clone(), volume);
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}
