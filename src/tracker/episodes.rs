use crate::models::episode::IdleEpisode;

const SCORE_CAP: u8 = 100;
/// Score points per minute of idle time.
const POINTS_PER_MINUTE: f64 = 10.0;

/// Procrastination score for a total amount of idle time, in `0..=100`.
pub fn procrastination_score(total_idle_secs: f64) -> u8 {
    if total_idle_secs.is_nan() || total_idle_secs <= 0.0 {
        return 0;
    }
    let points = (total_idle_secs / 60.0 * POINTS_PER_MINUTE).floor();
    if points >= SCORE_CAP as f64 {
        SCORE_CAP
    } else {
        points as u8
    }
}

/// Idle episodes of the current session, in the order they closed.
#[derive(Debug, Clone, Default)]
pub struct EpisodeLog {
    episodes: Vec<IdleEpisode>,
}

impl EpisodeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, episode: IdleEpisode) {
        self.episodes.push(episode);
    }

    pub fn clear(&mut self) {
        self.episodes.clear();
    }

    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    pub fn total_idle_secs(&self) -> f64 {
        self.episodes.iter().map(|e| e.duration_secs).sum()
    }

    pub fn score(&self) -> u8 {
        procrastination_score(self.total_idle_secs())
    }

    pub fn episodes(&self) -> &[IdleEpisode] {
        &self.episodes
    }
}
