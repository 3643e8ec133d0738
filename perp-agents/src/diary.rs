use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use common::JsonStore;
use std::collections::BTreeMap;

const FOLDER: &str = "diary";
const FILE: &str = "diary";
const RETAIN_DAYS: i64 = 7;

/// Day-keyed log of everything the agent broadcast, kept for a week.
///
/// Keys are ISO `YYYY-MM-DD` dates, so lexicographic order is chronological
/// order and pruning can compare keys as plain strings.
pub struct Diary {
    store: JsonStore,
    entries: BTreeMap<String, Vec<String>>,
}

impl Diary {
    pub async fn load(store: JsonStore) -> Result<Self> {
        let entries = store.load(FOLDER, FILE).await?.unwrap_or_default();
        Ok(Self { store, entries })
    }

    /// Append a line under today's date and drop days that fell out of the
    /// retention window.
    pub async fn write(&mut self, message: &str, now: DateTime<Utc>) -> Result<()> {
        let today = now.date_naive().to_string();
        self.entries
            .entry(today)
            .or_default()
            .push(message.to_string());

        let cutoff = (now - Duration::days(RETAIN_DAYS)).date_naive().to_string();
        self.entries.retain(|day, _| day.as_str() >= cutoff.as_str());

        self.store.save(FOLDER, FILE, &self.entries).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn day(offset_days: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 15, 9, 0, 0).unwrap() + Duration::days(offset_days)
    }

    #[tokio::test]
    async fn lines_collect_under_their_day() {
        let dir = tempdir().unwrap();
        let mut diary = Diary::load(JsonStore::new(dir.path())).await.unwrap();

        diary.write("starting run", day(0)).await.unwrap();
        diary.write("run complete", day(0)).await.unwrap();

        assert_eq!(diary.entries["2024-05-15"].len(), 2);

        let reloaded = Diary::load(JsonStore::new(dir.path())).await.unwrap();
        assert_eq!(reloaded.entries["2024-05-15"][1], "run complete");
    }

    #[tokio::test]
    async fn old_days_are_pruned_on_write() {
        let dir = tempdir().unwrap();
        let mut diary = Diary::load(JsonStore::new(dir.path())).await.unwrap();

        diary.write("ancient", day(-10)).await.unwrap();
        diary.write("recent", day(-6)).await.unwrap();
        diary.write("today", day(0)).await.unwrap();

        assert!(!diary.entries.contains_key("2024-05-05"));
        assert!(diary.entries.contains_key("2024-05-09"));
        assert!(diary.entries.contains_key("2024-05-15"));
    }

    #[tokio::test]
    async fn a_day_exactly_at_the_window_edge_survives() {
        let dir = tempdir().unwrap();
        let mut diary = Diary::load(JsonStore::new(dir.path())).await.unwrap();

        diary.write("week old", day(-7)).await.unwrap();
        diary.write("today", day(0)).await.unwrap();

        assert!(diary.entries.contains_key("2024-05-08"));
    }
}
