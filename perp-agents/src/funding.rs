use crate::api::exchange::PerpMetadata;
use std::cmp::Ordering;
use std::collections::HashMap;

/// A sector's markets ranked by how stretched their funding rate is.
///
/// `coins_by_diff` holds `(coin, funding)` pairs, most extreme first. Every
/// sector coin with a quotable mid price lands in `coin_to_price`, including
/// the ones the volume floor kept out of the ranking.
#[derive(Debug, Clone, Default)]
pub struct FundingRank {
    pub coin_to_price: HashMap<String, f64>,
    pub coins_by_diff: Vec<(String, f64)>,
}

impl FundingRank {
    pub fn is_empty(&self) -> bool {
        self.coins_by_diff.is_empty()
    }

    /// The top `limit` ranked coins.
    pub fn top(&self, limit: usize) -> &[(String, f64)] {
        &self.coins_by_diff[..self.coins_by_diff.len().min(limit)]
    }
}

/// Rank the sector's markets by funding extremity.
///
/// Markets are visited in listing order. Positive rates collect into one
/// bucket sorted descending, zero and negative rates into another sorted
/// ascending, and the concatenation is then ordered by absolute rate. Both
/// sorts keep ties in listing order, so reruns over the same snapshot give
/// the same ranking. Markets below `min_volume` are skipped entirely, but
/// their mid price is still recorded for drift checks.
pub fn rank_by_funding(
    meta: &PerpMetadata,
    sector_coins: &[String],
    min_volume: f64,
) -> FundingRank {
    let mut coin_to_price = HashMap::new();
    let mut positive: Vec<(String, f64)> = Vec::new();
    let mut negative: Vec<(String, f64)> = Vec::new();

    for (asset, ctx) in meta.iter() {
        if !sector_coins.iter().any(|coin| *coin == asset.name) {
            continue;
        }
        if let Some(mid) = ctx.mid_px {
            coin_to_price.insert(asset.name.clone(), mid);
        }
        if ctx.day_ntl_vlm < min_volume {
            continue;
        }
        if ctx.funding > 0.0 {
            insert_descending(&mut positive, &asset.name, ctx.funding);
        } else {
            insert_ascending(&mut negative, &asset.name, ctx.funding);
        }
    }

    let mut coins_by_diff = positive;
    coins_by_diff.append(&mut negative);
    coins_by_diff.sort_by(|a, b| {
        b.1.abs()
            .partial_cmp(&a.1.abs())
            .unwrap_or(Ordering::Equal)
    });

    FundingRank {
        coin_to_price,
        coins_by_diff,
    }
}

// Binary insertion keeps each bucket ordered as it fills. Equal rates land
// after the entries already present.

fn insert_descending(bucket: &mut Vec<(String, f64)>, coin: &str, funding: f64) {
    let mut low = 0;
    let mut high = bucket.len();
    while low < high {
        let mid = (low + high) / 2;
        if funding > bucket[mid].1 {
            high = mid;
        } else {
            low = mid + 1;
        }
    }
    bucket.insert(low, (coin.to_string(), funding));
}

fn insert_ascending(bucket: &mut Vec<(String, f64)>, coin: &str, funding: f64) {
    let mut low = 0;
    let mut high = bucket.len();
    while low < high {
        let mid = (low + high) / 2;
        if funding < bucket[mid].1 {
            high = mid;
        } else {
            low = mid + 1;
        }
    }
    bucket.insert(low, (coin.to_string(), funding));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::exchange::{AssetCtx, AssetMeta};

    fn meta(entries: &[(&str, Option<f64>, f64, f64)]) -> PerpMetadata {
        PerpMetadata {
            assets: entries
                .iter()
                .map(|(name, ..)| AssetMeta {
                    name: name.to_string(),
                    max_leverage: 20,
                    sz_decimals: 2,
                })
                .collect(),
            contexts: entries
                .iter()
                .map(|&(_, mid_px, day_ntl_vlm, funding)| AssetCtx {
                    mid_px,
                    day_ntl_vlm,
                    funding,
                })
                .collect(),
        }
    }

    fn sector(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn ranked_coins(rank: &FundingRank) -> Vec<&str> {
        rank.coins_by_diff
            .iter()
            .map(|(coin, _)| coin.as_str())
            .collect()
    }

    #[test]
    fn thin_markets_are_skipped_but_still_priced() {
        let meta = meta(&[
            ("A", Some(10.0), 50_000.0, 0.02),
            ("B", Some(20.0), 50_000.0, -0.05),
            ("C", Some(30.0), 5_000.0, 0.01),
        ]);
        let rank = rank_by_funding(&meta, &sector(&["A", "B", "C"]), 10_000.0);

        assert_eq!(ranked_coins(&rank), vec!["B", "A"]);
        assert_eq!(rank.coin_to_price.get("C"), Some(&30.0));
    }

    #[test]
    fn ordering_is_by_absolute_rate_across_signs() {
        let meta = meta(&[
            ("A", Some(1.0), 1e6, 0.0001),
            ("B", Some(1.0), 1e6, -0.0030),
            ("C", Some(1.0), 1e6, 0.0020),
            ("D", Some(1.0), 1e6, -0.0002),
        ]);
        let rank = rank_by_funding(&meta, &sector(&["A", "B", "C", "D"]), 0.0);

        assert_eq!(ranked_coins(&rank), vec!["B", "C", "D", "A"]);
    }

    #[test]
    fn equal_rates_stay_in_listing_order() {
        let meta = meta(&[
            ("A", Some(1.0), 1e6, 0.0005),
            ("B", Some(1.0), 1e6, 0.0005),
            ("C", Some(1.0), 1e6, 0.0005),
        ]);
        let rank = rank_by_funding(&meta, &sector(&["A", "B", "C"]), 0.0);

        assert_eq!(ranked_coins(&rank), vec!["A", "B", "C"]);
    }

    #[test]
    fn reruns_over_the_same_snapshot_match() {
        let meta = meta(&[
            ("A", Some(10.0), 50_000.0, 0.02),
            ("B", Some(20.0), 50_000.0, -0.05),
            ("C", Some(30.0), 5_000.0, 0.01),
        ]);
        let coins = sector(&["A", "B", "C"]);

        let first = rank_by_funding(&meta, &coins, 10_000.0);
        let second = rank_by_funding(&meta, &coins, 10_000.0);

        assert_eq!(first.coins_by_diff, second.coins_by_diff);
        assert_eq!(first.coin_to_price, second.coin_to_price);
    }

    #[test]
    fn zero_funding_ranks_last() {
        let meta = meta(&[
            ("A", Some(1.0), 1e6, 0.0),
            ("B", Some(1.0), 1e6, 0.0001),
            ("C", Some(1.0), 1e6, -0.0001),
        ]);
        let rank = rank_by_funding(&meta, &sector(&["A", "B", "C"]), 0.0);

        assert_eq!(ranked_coins(&rank).last(), Some(&"A"));
    }

    #[test]
    fn coins_outside_the_sector_are_invisible() {
        let meta = meta(&[
            ("BTC", Some(61000.0), 1e9, 0.0001),
            ("ETH", Some(3300.0), 1e8, -0.0002),
        ]);
        let rank = rank_by_funding(&meta, &sector(&["DOGE"]), 0.0);

        assert!(rank.is_empty());
        assert!(rank.coin_to_price.is_empty());
    }

    #[test]
    fn halted_markets_rank_without_a_price() {
        let meta = meta(&[("A", None, 1e6, 0.001)]);
        let rank = rank_by_funding(&meta, &sector(&["A"]), 0.0);

        assert_eq!(ranked_coins(&rank), vec!["A"]);
        assert!(rank.coin_to_price.is_empty());
    }

    #[test]
    fn top_clamps_to_available_coins() {
        let meta = meta(&[
            ("A", Some(1.0), 1e6, 0.001),
            ("B", Some(1.0), 1e6, 0.002),
        ]);
        let rank = rank_by_funding(&meta, &sector(&["A", "B"]), 0.0);

        assert_eq!(rank.top(10).len(), 2);
        assert_eq!(rank.top(1)[0].0, "B");
    }
}
