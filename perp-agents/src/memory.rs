use crate::models::ResearchSnapshot;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use common::{text, JsonStore};
use std::collections::HashMap;

const FOLDER: &str = "research";
/// Snapshots kept per sector, newest first.
const HISTORY_CAP: usize = 50;
/// A snapshot younger than this is reused instead of paying for new research.
const REUSE_WINDOW_MS: i64 = 10 * 60 * 1000;

/// Per-sector research history on disk, one file per sector.
pub struct ResearchMemory {
    store: JsonStore,
}

/// How one identified coin's price moved since the snapshot was taken.
#[derive(Debug, Clone)]
pub struct CoinDrift {
    pub coin: String,
    pub old_price: f64,
    pub today_price: Option<f64>,
    /// Rounded to two decimals. Zero when the coin is no longer quotable or
    /// the recorded price was zero.
    pub change_pct: f64,
}

/// A past snapshot re-read against today's prices.
#[derive(Debug, Clone)]
pub struct SnapshotReview {
    pub snapshot: ResearchSnapshot,
    pub drifts: Vec<CoinDrift>,
    pub avg_change_pct: f64,
    pub summary: String,
}

/// Outcome of scanning recent history before a research pass.
pub struct Freshness {
    /// A snapshot young enough to stand in for a new pass, if any.
    pub reusable: Option<SnapshotReview>,
    /// Rendered summaries of the stale snapshots scanned, newest first.
    pub summaries: Vec<String>,
}

impl ResearchMemory {
    pub fn new(store: JsonStore) -> Self {
        Self { store }
    }

    pub async fn history(&self, sector: &str) -> Result<Vec<ResearchSnapshot>> {
        Ok(self
            .store
            .load(FOLDER, sector)
            .await?
            .unwrap_or_default())
    }

    /// Prepend `snapshot` to the sector's history and drop anything beyond
    /// the cap.
    pub async fn append(&self, sector: &str, snapshot: ResearchSnapshot) -> Result<()> {
        let mut history = self.history(sector).await?;
        history.insert(0, snapshot);
        history.truncate(HISTORY_CAP);
        self.store.save(FOLDER, sector, &history).await
    }

    /// Re-apply the history cap to every sector file. Run at startup so a
    /// cap lowered between releases takes effect on old data too.
    pub async fn enforce_caps(&self) -> Result<()> {
        let dir = self.store.root().join(FOLDER);
        if !dir.exists() {
            return Ok(());
        }
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("Failed to list {}", dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let sector = match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => stem.to_string(),
                None => continue,
            };
            let mut history = self.history(&sector).await?;
            if history.len() > HISTORY_CAP {
                println!(
                    "⚠️ Trimming research history for {} from {} to {} entries",
                    sector,
                    history.len(),
                    HISTORY_CAP
                );
                history.truncate(HISTORY_CAP);
                self.store.save(FOLDER, &sector, &history).await?;
            }
        }
        Ok(())
    }

    /// Scan up to `lookup_limit` recent snapshots for the sector. The first
    /// one inside the reuse window is returned immediately; everything older
    /// is summarized for the next prompt instead.
    pub async fn check_freshness(
        &self,
        sector: &str,
        prices: &HashMap<String, f64>,
        lookup_limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Freshness> {
        let now_ms = now.timestamp_millis();
        let mut summaries = Vec::new();

        for snapshot in self.history(sector).await?.into_iter().take(lookup_limit) {
            let review = review_snapshot(snapshot, prices, now);
            if now_ms - review.snapshot.run_id < REUSE_WINDOW_MS {
                return Ok(Freshness {
                    reusable: Some(review),
                    summaries,
                });
            }
            summaries.push(review.summary);
        }

        Ok(Freshness {
            reusable: None,
            summaries,
        })
    }
}

fn review_snapshot(
    snapshot: ResearchSnapshot,
    prices: &HashMap<String, f64>,
    now: DateTime<Utc>,
) -> SnapshotReview {
    let drifts: Vec<CoinDrift> = snapshot
        .identified_coins
        .iter()
        .map(|coin| {
            let today_price = prices.get(&coin.coin).copied();
            let change_pct = match today_price {
                Some(today) if coin.price != 0.0 => {
                    round2((today - coin.price) / coin.price * 100.0)
                }
                _ => 0.0,
            };
            CoinDrift {
                coin: coin.coin.clone(),
                old_price: coin.price,
                today_price,
                change_pct,
            }
        })
        .collect();

    let avg_change_pct = if drifts.is_empty() {
        0.0
    } else {
        round2(drifts.iter().map(|d| d.change_pct).sum::<f64>() / drifts.len() as f64)
    };

    let mut lines = vec![
        format!("ANALYSIS FROM {}:", text::time_ago(snapshot.run_id, now)),
        format!("Bias: {}", snapshot.market_bias),
        format!("Reason: {}", snapshot.market_bias_reason),
        "Identified Coins:".to_string(),
    ];
    for drift in &drifts {
        let today = match drift.today_price {
            Some(price) => format!("${}", price),
            None => "?".to_string(),
        };
        lines.push(format!(
            "- {}: OLD PRICE ${} -> TODAY {} ({}%)",
            drift.coin, drift.old_price, today, drift.change_pct
        ));
    }
    lines.push(format!("Overall Price Change: {}%", avg_change_pct));

    SnapshotReview {
        snapshot,
        drifts,
        avg_change_pct,
        summary: lines.join("\n"),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
