use serde::{Deserialize, Serialize};

/// Season/episode identity for a TV file, as reported by the (out of
/// scope) media-server adapter or reconstructed from a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeInfo {
    pub show: String,
    pub season: u32,
    pub episode: u32,
    /// True when this is the user's *current* OnDeck position, as
    /// opposed to a prefetched successor. Only meaningful on
    /// `OnDeckEntry::episode_info`; absent elsewhere.
    #[serde(default)]
    pub is_current_ondeck: bool,
}

impl EpisodeInfo {
    pub fn new(show: impl Into<String>, season: u32, episode: u32) -> Self {
        Self {
            show: show.into(),
            season,
            episode,
            is_current_ondeck: false,
        }
    }

    /// Rough cross-season distance using the source's fixed 13
    /// episodes/season prior (see `SPEC_FULL.md` §9, cross-season
    /// estimation open question).
    pub const EPISODES_PER_SEASON_PRIOR: u32 = 13;

    /// Estimated number of episodes between `self` and `current`,
    /// assuming `self` is the same show and at or after `current`.
    /// Returns `None` for a different show.
    pub fn estimated_distance_after(&self, current: &EpisodeInfo) -> Option<i64> {
        if self.show != current.show {
            return None;
        }
        let season_gap = self.season as i64 - current.season as i64;
        let within_season = self.episode as i64 - current.episode as i64;
        Some(season_gap * Self::EPISODES_PER_SEASON_PRIOR as i64 + within_season)
    }
}
