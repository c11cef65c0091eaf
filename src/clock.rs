use chrono::{DateTime, NaiveDate, Utc};

/// Time source threaded through `AppState`. Aggregation windows and
/// attendance timestamps must be reproducible, so handlers never call
/// `Utc::now()` directly.
#[derive(Debug, Clone, Copy)]
pub enum Clock {
    System,
    Fixed(DateTime<Utc>),
}

impl Clock {
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::System => Utc::now(),
            Clock::Fixed(at) => *at,
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    /// RFC 3339 with second precision; stored form for *_at columns.
    pub fn timestamp(&self) -> String {
        self.now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    }
}
