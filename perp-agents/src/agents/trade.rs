use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use common::providers::ChatMessage;
use common::{template, text};

use super::{prompts, replies, Level, PerpAgent, SectorResearch, ToolCall};
use crate::api::exchange::{self, PerpMetadata};
use crate::exec::{OpenOrder, Position};
use crate::ledger::{self, OrderLedger};
use crate::models::{ClosePositionRequest, HistoricalOrderEvent, PlaceOrderRequest, Side};

const HOUR_MS: i64 = 60 * 60 * 1000;

impl PerpAgent {
    /// Turn one sector's research into orders: review how past triggers
    /// resolved, gather candles and account state, ask the trade model and
    /// execute whatever tool calls come back.
    pub(super) async fn trade_sector(
        &mut self,
        research: &SectorResearch,
        meta: &PerpMetadata,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let now_ms = now.timestamp_millis();

        let reviews = if self.ledger.is_empty() {
            Vec::new()
        } else {
            let history = self.exec.historical_orders();
            render_trigger_reviews(
                &self.ledger,
                &history,
                &research.coin_to_price,
                self.config.trade_params.order_lookup_limit,
                now,
            )
        };
        if !reviews.is_empty() {
            self.note(&format!(
                "---\nRetrieved previous trades:\n{}\n",
                reviews.join("\n")
            ))
            .await;
        }

        let candles = self.candle_tables(research, now_ms).await;
        let account_state =
            render_account_state(self.exec.account_value(), &self.exec.positions(meta));
        let open_orders = render_open_orders(&self.exec.open_orders());
        let previous_trades = if reviews.is_empty() {
            "None".to_string()
        } else {
            reviews.join("\n")
        };
        let frequency_hours = self.config.trade_frequency_ms as f64 / HOUR_MS as f64;

        let system = template::fill(
            prompts::TRADE_SYSTEM_PROMPT,
            &[
                ("persona", &self.config.persona),
                ("tradeFrequencyHours", &frequency_hours.to_string()),
                ("maxLeverage", &self.config.max_leverage.to_string()),
                ("minOrderSize", &self.config.min_order_size.to_string()),
                ("accountState", &account_state),
                ("openOrders", &open_orders),
                ("previousTrades", &previous_trades),
                ("tradeTools", prompts::TOOL_PROTOCOL),
            ],
        )?;
        let coin_lines = research
            .snapshot
            .identified_coins
            .iter()
            .map(|coin| format!("- {} (${}): {}", coin.coin, coin.price, coin.analysis))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = template::fill(
            prompts::TRADE_PROMPT,
            &[
                ("marketBias", &research.snapshot.market_bias.to_string()),
                ("identifiedCoins", &coin_lines),
                ("candles", &candles),
            ],
        )?;

        self.note("Researching TA-based trade decisions...").await;
        let reply = self
            .chat
            .complete(
                &self.config.trade_model,
                &[ChatMessage::system(system), ChatMessage::user(prompt)],
            )
            .await?;

        for call in replies::parse_tool_calls(&reply) {
            match call {
                Ok(ToolCall::ClosePositions(closes)) => {
                    for close in closes {
                        self.execute_close(&close, meta, now_ms).await;
                    }
                }
                Ok(ToolCall::PlaceOrders(orders)) => {
                    for order in orders {
                        self.execute_placement(&order, meta, now_ms).await;
                    }
                }
                Err(e) => {
                    self.broadcast(
                        Level::Error,
                        &format!("Skipping malformed tool call: {}", e),
                        false,
                    )
                    .await;
                }
            }
        }
        Ok(())
    }

    /// One CSV-like candle table per identified coin. A coin whose candles
    /// cannot be fetched is reported and skipped rather than failing the
    /// whole trade pass.
    async fn candle_tables(&mut self, research: &SectorResearch, now_ms: i64) -> String {
        let (interval, hours) = candle_window(self.config.trade_frequency_ms);
        let mut lines = Vec::new();
        for coin in &research.snapshot.identified_coins {
            let start_ms = now_ms - hours * HOUR_MS;
            match self
                .info
                .candle_snapshot(&coin.coin, interval, start_ms, now_ms)
                .await
            {
                Ok(candles) => {
                    lines.push(format!("{} past {}h ({} interval)", coin.coin, hours, interval));
                    lines.push(exchange::candles_to_table(&candles));
                    lines.push(String::new());
                }
                Err(e) => {
                    self.note(&format!("Candles for {} unavailable: {}", coin.coin, e))
                        .await;
                }
            }
        }
        lines.join("\n")
    }

    async fn execute_placement(
        &mut self,
        order: &PlaceOrderRequest,
        meta: &PerpMetadata,
        now_ms: i64,
    ) {
        match self.exec.place_bracket(order, meta, now_ms).await {
            Ok(receipt) => {
                // The requested entry goes into the ledger, not the fill
                // price; later trigger PnL is measured against it.
                if let Err(e) = self
                    .ledger
                    .record_placement(
                        receipt.main_oid,
                        &order.coin,
                        order.leverage,
                        order.entry,
                        &order.reason,
                    )
                    .await
                {
                    self.broadcast(
                        Level::Error,
                        &format!("Order {} placed but not recorded: {}", receipt.main_oid, e),
                        false,
                    )
                    .await;
                }
                self.note(&format!(
                    "✅ Placed {} {} {}x: size {} at {}, TP {}, SL {}",
                    order.side,
                    order.coin,
                    order.leverage,
                    order.size,
                    receipt.avg_px,
                    order.take_profit,
                    order.stop_loss
                ))
                .await;
            }
            Err(e) => {
                self.broadcast(
                    Level::Error,
                    &format!("🚫 Order for {} rejected: {}", order.coin, e),
                    false,
                )
                .await;
            }
        }
    }

    async fn execute_close(
        &mut self,
        close: &ClosePositionRequest,
        meta: &PerpMetadata,
        now_ms: i64,
    ) {
        match self.exec.close_position(&close.coin, meta, now_ms).await {
            Ok(outcome) => self.note(&format!("✅ {}", outcome)).await,
            Err(e) => {
                self.broadcast(
                    Level::Error,
                    &format!("🚫 Close for {} rejected: {}", close.coin, e),
                    false,
                )
                .await;
            }
        }
    }
}

/// One multi-line review per resolved trigger the ledger knows about: what
/// the order was, how it resolved, what it realized and where the price sits
/// now. A zero recorded entry reports the PnL as unavailable instead of
/// inventing a number.
fn render_trigger_reviews(
    ledger: &OrderLedger,
    history: &[HistoricalOrderEvent],
    prices: &HashMap<String, f64>,
    limit: usize,
    now: DateTime<Utc>,
) -> Vec<String> {
    let mut reviews = Vec::new();
    for (event, record) in ledger.match_recent_triggers(history, limit) {
        let order = &event.order;
        let mut lines = vec![
            format!(
                "{} {}x {}",
                record.coin,
                record.leverage,
                text::time_ago(event.status_timestamp, now)
            ),
            format!("- Entry Price: {}", record.main_order_entry),
            format!("- {} {} at {}", record.order_type, event.status, order.trigger_px),
        ];
        match ledger::compute_trigger_pnl(event, record.main_order_entry) {
            Ok(Some(pnl)) => lines.push(format!("- PnL: {}", pnl)),
            Ok(None) => {}
            Err(e) => lines.push(format!("- PnL: unavailable ({})", e)),
        }
        if let Some(&price_now) = prices.get(&record.coin) {
            let line = if order.trigger_px == 0.0 {
                format!("- Current Price: {} (?)", price_now)
            } else {
                let diff = (price_now - order.trigger_px) / order.trigger_px * 100.0;
                format!("- Current Price: {} ({:.2}%)", price_now, diff)
            };
            lines.push(line);
        }
        lines.push(format!("- Original Thesis: {}", record.reason));
        reviews.push(lines.join("\n"));
    }
    reviews
}

/// Candle granularity follows the trade cadence: agents running hourly or
/// faster look at two hours of 15m candles, slower ones at a day of hourly
/// candles. The cadence is compared in fractional hours so a 90-minute agent
/// lands on the daily window.
fn candle_window(trade_frequency_ms: i64) -> (&'static str, i64) {
    if trade_frequency_ms as f64 / HOUR_MS as f64 <= 1.0 {
        ("15m", 2)
    } else {
        ("1h", 24)
    }
}

fn render_open_orders(orders: &[OpenOrder]) -> String {
    if orders.is_empty() {
        return "None".to_string();
    }
    let mut lines = vec!["coin,side,type,trigger,size".to_string()];
    for order in orders {
        lines.push(format!(
            "{},{},{},{},{}",
            order.coin,
            order_side_word(order.side),
            order.order_type,
            order.trigger_px,
            order.sz
        ));
    }
    lines.join("\n")
}

/// Sides read as position direction in the prompt. A resting buy opens or
/// rides a long, a resting sell a short.
fn order_side_word(side: Side) -> &'static str {
    match side {
        Side::Buy => "long",
        Side::Sell => "short",
    }
}

fn render_account_state(account_value: f64, positions: &[Position]) -> String {
    let mut out = format!("Account value: {:.2} USD", account_value);
    if positions.is_empty() {
        out.push_str("\nPositions: none");
        return out;
    }
    out.push_str("\ncoin,szi,entry,leverage,unrealized_pnl");
    for position in positions {
        out.push_str(&format!(
            "\n{},{},{},{},{:.2}",
            position.coin,
            position.szi,
            position.entry_px,
            position.leverage,
            position.unrealized_pnl
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HistoricalOrder;
    use chrono::TimeZone;
    use common::JsonStore;
    use tempfile::tempdir;

    fn trigger_event(oid: u64, side: Side, trigger_px: f64, sz: f64, ago_ms: i64, now: DateTime<Utc>) -> HistoricalOrderEvent {
        HistoricalOrderEvent {
            order: HistoricalOrder {
                coin: "BTC".to_string(),
                side,
                trigger_px,
                sz,
                reduce_only: true,
                oid,
                timestamp: now.timestamp_millis() - ago_ms,
            },
            status: "triggered".to_string(),
            status_timestamp: now.timestamp_millis() - ago_ms,
        }
    }

    #[tokio::test]
    async fn trigger_review_covers_entry_outcome_and_thesis() {
        let dir = tempdir().unwrap();
        let mut ledger = OrderLedger::load(JsonStore::new(dir.path())).await.unwrap();
        ledger
            .record_placement(1000, "BTC", 3, 100.0, "funding stretched")
            .await
            .unwrap();

        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let events = vec![trigger_event(1001, Side::Sell, 110.0, 0.5, 2 * HOUR_MS, now)];
        let prices = HashMap::from([("BTC".to_string(), 120.0)]);

        let reviews = render_trigger_reviews(&ledger, &events, &prices, 5, now);
        assert_eq!(reviews.len(), 1);
        assert_eq!(
            reviews[0],
            "BTC 3x 2 hours ago\n\
             - Entry Price: 100\n\
             - Take Profit triggered at 110\n\
             - PnL: 10.00% (5.00 USD)\n\
             - Current Price: 120 (9.09%)\n\
             - Original Thesis: funding stretched"
        );
    }

    #[tokio::test]
    async fn zero_entry_reports_pnl_unavailable() {
        let dir = tempdir().unwrap();
        let mut ledger = OrderLedger::load(JsonStore::new(dir.path())).await.unwrap();
        ledger.record_placement(2000, "BTC", 2, 0.0, "r").await.unwrap();

        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let events = vec![trigger_event(2002, Side::Sell, 90.0, 1.0, HOUR_MS, now)];

        let reviews = render_trigger_reviews(&ledger, &events, &HashMap::new(), 5, now);
        assert_eq!(reviews.len(), 1);
        assert!(reviews[0].contains(
            "- PnL: unavailable (entry price recorded for order 2002 is zero, cannot compute pnl)"
        ));
        // No quotable price, so no current-price line either.
        assert!(!reviews[0].contains("Current Price"));
    }

    #[tokio::test]
    async fn unknown_trigger_events_are_ignored() {
        let dir = tempdir().unwrap();
        let ledger = OrderLedger::load(JsonStore::new(dir.path())).await.unwrap();

        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let events = vec![trigger_event(7001, Side::Buy, 50.0, 1.0, HOUR_MS, now)];

        assert!(render_trigger_reviews(&ledger, &events, &HashMap::new(), 5, now).is_empty());
    }

    #[test]
    fn fast_cadence_uses_short_candles() {
        assert_eq!(candle_window(30 * 60 * 1000), ("15m", 2));
        assert_eq!(candle_window(HOUR_MS), ("15m", 2));
    }

    #[test]
    fn slow_cadence_uses_hourly_candles() {
        assert_eq!(candle_window(90 * 60 * 1000), ("1h", 24));
        assert_eq!(candle_window(24 * HOUR_MS), ("1h", 24));
    }

    #[test]
    fn open_orders_render_as_a_table() {
        let orders = vec![OpenOrder {
            coin: "BTC".to_string(),
            side: Side::Sell,
            order_type: "Take Profit Market".to_string(),
            trigger_px: 110.0,
            sz: 0.5,
            oid: 1001,
            reduce_only: true,
        }];
        assert_eq!(
            render_open_orders(&orders),
            "coin,side,type,trigger,size\nBTC,short,Take Profit Market,110,0.5"
        );
        assert_eq!(render_open_orders(&[]), "None");
    }

    #[test]
    fn account_state_lists_positions() {
        let positions = vec![Position {
            coin: "BTC".to_string(),
            szi: 0.5,
            entry_px: 100.0,
            leverage: 3,
            unrealized_pnl: 10.0,
        }];
        assert_eq!(
            render_account_state(1015.5, &positions),
            "Account value: 1015.50 USD\ncoin,szi,entry,leverage,unrealized_pnl\nBTC,0.5,100,3,10.00"
        );
        assert_eq!(
            render_account_state(1000.0, &[]),
            "Account value: 1000.00 USD\nPositions: none"
        );
    }
}
