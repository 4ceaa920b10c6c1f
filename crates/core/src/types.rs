use crate::error::CoreError;

/// All primary keys are UUIDs.
pub type DbId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Generate a fresh random id.
pub fn new_id() -> DbId {
    uuid::Uuid::new_v4()
}

/// Parse an id received at an API boundary.
pub fn parse_id(raw: &str) -> Result<DbId, CoreError> {
    uuid::Uuid::parse_str(raw.trim())
        .map_err(|_| CoreError::Validation(format!("Invalid id '{raw}'")))
}

/// Half-open `[from, to)` filter on a timestamp column. Either bound may be
/// absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub from: Option<Timestamp>,
    pub to: Option<Timestamp>,
}

impl DateRange {
    pub fn new(from: Option<Timestamp>, to: Option<Timestamp>) -> Self {
        Self { from, to }
    }

    /// Whether `at` falls inside the range.
    pub fn contains(&self, at: Timestamp) -> bool {
        self.from.is_none_or(|from| at >= from) && self.to.is_none_or(|to| at < to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn parse_id_accepts_uuid() {
        let id = new_id();
        assert_eq!(parse_id(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn parse_id_rejects_garbage() {
        let err = parse_id("not-an-id").unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn unbounded_range_contains_everything() {
        assert!(DateRange::default().contains(Utc::now()));
    }

    #[test]
    fn range_is_half_open() {
        let now = Utc::now();
        let range = DateRange::new(Some(now), Some(now + Duration::hours(1)));
        assert!(range.contains(now));
        assert!(!range.contains(now + Duration::hours(1)));
        assert!(!range.contains(now - Duration::seconds(1)));
    }
}
