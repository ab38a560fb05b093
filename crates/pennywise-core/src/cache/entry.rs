use chrono::{DateTime, Duration, Utc};

/// State of one entity cache: the data plus everything needed to decide
/// whether it can be served.
#[derive(Debug, Clone, Default)]
pub struct CacheEntry<T> {
    pub data: T,
    /// Time of the last successful fetch, `None` until one succeeds.
    pub fetched_at: Option<DateTime<Utc>>,
    /// User the data belongs to.
    pub user_id: Option<String>,
    pub loading: bool,
    pub error: Option<String>,
    /// Bumped whenever the data is discarded; responses from an older epoch
    /// are dropped.
    pub(crate) epoch: u64,
}

impl<T: Default> CacheEntry<T> {
    /// Discard everything and start a new epoch for `user_id`.
    pub(crate) fn reset(&mut self, user_id: Option<&str>) {
        self.data = T::default();
        self.fetched_at = None;
        self.user_id = user_id.map(str::to_string);
        self.loading = false;
        self.error = None;
        self.epoch += 1;
    }
}

impl<T> CacheEntry<T> {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn belongs_to(&self, user_id: &str) -> bool {
        self.user_id.as_deref() == Some(user_id)
    }

    pub fn age_minutes(&self) -> Option<i64> {
        self.fetched_at.map(|at| (Utc::now() - at).num_minutes())
    }

    /// Whether the data was fetched successfully no longer than `ttl` ago.
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at
            .map(|at| Utc::now() - at <= ttl)
            .unwrap_or(false)
    }

    pub fn age_display(&self) -> String {
        let Some(minutes) = self.age_minutes() else {
            return "never".to_string();
        };
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            format!("{}h ago", minutes / 60)
        } else {
            format!("{}d ago", minutes / 1440)
        }
    }
}
