use anyhow::Result;
use chrono::{DateTime, Utc};
use common::providers::ChatMessage;
use common::{template, text};

use super::{prompts, replies, MarketBelief, PerpAgent, SectorResearch};
use crate::api::exchange::PerpMetadata;
use crate::funding::{self, FundingRank};
use crate::models::{IdentifiedCoin, ResearchSnapshot, SectorPick};

impl PerpAgent {
    /// Ask the research model which way the market as a whole is leaning.
    pub(super) async fn market_belief(&mut self) -> Result<MarketBelief> {
        self.note("---\nResearching market belief...").await;
        let reply = self
            .chat
            .complete(
                &self.config.research_model,
                &[ChatMessage::user(prompts::MARKET_BELIEF_PROMPT)],
            )
            .await?;
        let belief = replies::parse_belief_reply(&reply)?;
        self.note(&format!(
            "Identified market belief: {} ({} days), {}",
            belief.direction, belief.applicability_days, belief.reasons
        ))
        .await;
        Ok(belief)
    }

    /// Ask the research model which of the agent's sectors to work this run.
    /// Picks outside the configured sector list are dropped.
    pub(super) async fn pick_sectors(&mut self, belief: &MarketBelief) -> Result<Vec<SectorPick>> {
        self.note("---\nResearching sectors...").await;
        let prompt = template::fill(
            prompts::SECTOR_PROMPT,
            &[
                ("direction", &belief.direction.to_string()),
                ("marketReasons", &belief.reasons),
                ("allSectors", &self.config.sectors.join(", ")),
            ],
        )?;
        let reply = self
            .chat
            .complete(&self.config.research_model, &[ChatMessage::user(prompt)])
            .await?;

        let mut picks = replies::parse_sector_reply(&reply)?;
        picks.retain(|pick| {
            let offered = self.config.sectors.iter().any(|s| s == &pick.name);
            if offered && self.sectors.contains(&pick.name) {
                return true;
            }
            println!(
                "⚠️ [{}] Dropping unknown sector pick '{}'",
                self.config.agent_id, pick.name
            );
            false
        });

        let mut message = String::from("Identified sectors: ");
        for pick in &picks {
            message.push_str(&format!(
                "{}: {}\n",
                pick.name,
                text::truncate(&pick.reasons, 100)
            ));
        }
        self.note(message.trim_end()).await;
        Ok(picks)
    }

    /// Research one sector: rank its coins by funding extremity, reuse a
    /// fresh snapshot when one exists, otherwise ask the research model for
    /// a new one and persist it.
    pub(super) async fn research_sector(
        &mut self,
        sector: &str,
        meta: &PerpMetadata,
        now: DateTime<Utc>,
    ) -> Result<SectorResearch> {
        let rank = funding::rank_by_funding(meta, self.sectors.coins(sector), self.config.min_volume);
        if rank.is_empty() {
            anyhow::bail!("no {} coin clears the volume floor", sector);
        }

        let freshness = self
            .memory
            .check_freshness(
                sector,
                &rank.coin_to_price,
                self.config.research_params.rag_lookup_limit,
                now,
            )
            .await?;

        if let Some(review) = freshness.reusable {
            self.note(&format!(
                "---\nRecent research still applicable:\n{}",
                review.summary
            ))
            .await;
            return Ok(SectorResearch {
                sector: sector.to_string(),
                snapshot: review.snapshot,
                coin_to_price: rank.coin_to_price,
                reused: true,
            });
        }

        let recent_analysis = if freshness.summaries.is_empty() {
            "None".to_string()
        } else {
            let joined = freshness.summaries.join("\n\n");
            self.note(&format!("---\nRetrieved previous research:\n{}", joined))
                .await;
            joined
        };

        let limit = self.config.research_params.identify_coin_limit;
        let table = coins_table(&rank, self.config.research_params.coin_lookup_limit);
        let system = template::fill(
            prompts::RESEARCH_SYSTEM_PROMPT,
            &[
                ("persona", &self.config.persona),
                ("recentAnalysis", &recent_analysis),
                ("maxLeverage", &self.config.max_leverage.to_string()),
                ("minOrderSize", &self.config.min_order_size.to_string()),
            ],
        )?;
        let prompt = template::fill(
            prompts::RESEARCH_PROMPT,
            &[
                ("sector", &sector.to_uppercase()),
                ("coins", &table),
                ("limit", &limit.to_string()),
            ],
        )?;

        self.note(&format!(
            "Researching {} coins in {}, identifying {} coins...",
            rank.top(self.config.research_params.coin_lookup_limit).len(),
            sector,
            limit
        ))
        .await;

        let reply = self
            .chat
            .complete(
                &self.config.research_model,
                &[ChatMessage::system(system), ChatMessage::user(prompt)],
            )
            .await?;
        let parsed = replies::parse_research_reply(&reply, limit)?;

        // The snapshot records the price the ranking saw, not whatever the
        // model echoed back. Coins it invented have no price and are
        // dropped.
        let mut identified = Vec::new();
        for raw in parsed.identified_coins {
            match rank.coin_to_price.get(&raw.coin) {
                Some(&price) => identified.push(IdentifiedCoin {
                    coin: raw.coin,
                    price,
                    analysis: raw.analysis,
                }),
                None => println!(
                    "⚠️ [{}] Research named {} but it has no quotable price, dropping",
                    self.config.agent_id, raw.coin
                ),
            }
        }

        let snapshot = ResearchSnapshot {
            run_id: now.timestamp_millis(),
            market_bias: parsed.market_bias,
            market_bias_reason: parsed.market_bias_reason,
            identified_coins: identified,
        };
        self.memory.append(sector, snapshot.clone()).await?;

        let coin_lines = snapshot
            .identified_coins
            .iter()
            .map(|coin| format!("- {}: ${}, {}", coin.coin, coin.price, coin.analysis))
            .collect::<Vec<_>>()
            .join("\n");
        self.note(&format!(
            "Identified market bias: {} {}, {}.\n{}",
            snapshot.market_bias.to_string().to_uppercase(),
            sector,
            text::truncate(&snapshot.market_bias_reason, 100),
            coin_lines
        ))
        .await;

        Ok(SectorResearch {
            sector: sector.to_string(),
            snapshot,
            coin_to_price: rank.coin_to_price,
            reused: false,
        })
    }
}

/// CSV-like table of the top ranked coins with their prices, for the
/// research prompt. A ranked coin without a quotable mid shows a zero price.
fn coins_table(rank: &FundingRank, limit: usize) -> String {
    let mut rows = vec!["coin,price".to_string()];
    for (coin, _) in rank.top(limit) {
        let price = rank.coin_to_price.get(coin).copied().unwrap_or_default();
        rows.push(format!("{},{}", coin, price));
    }
    rows.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn coins_table_lists_ranked_coins_with_prices() {
        let rank = FundingRank {
            coin_to_price: HashMap::from([
                ("UNI".to_string(), 9.8),
                ("AAVE".to_string(), 142.5),
                ("CRV".to_string(), 0.41),
            ]),
            coins_by_diff: vec![
                ("AAVE".to_string(), -0.05),
                ("UNI".to_string(), 0.02),
                ("CRV".to_string(), 0.01),
            ],
        };

        let table = coins_table(&rank, 2);
        assert_eq!(table, "coin,price\nAAVE,142.5\nUNI,9.8");
    }

    #[test]
    fn halted_coin_shows_a_zero_price() {
        let rank = FundingRank {
            coin_to_price: HashMap::new(),
            coins_by_diff: vec![("UNI".to_string(), 0.02)],
        };
        assert_eq!(coins_table(&rank, 5), "coin,price\nUNI,0");
    }
}
