use crate::models::{HistoricalOrderEvent, OrderKind, Side};
use anyhow::Result;
use common::JsonStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

const FOLDER: &str = "orders";
const FILE: &str = "ledger";

#[derive(Debug, Error, PartialEq)]
pub enum LedgerError {
    #[error("entry price recorded for order {0} is zero, cannot compute pnl")]
    DivisionByZero(u64),
}

/// What the agent knew about an order at placement time. The same record is
/// written under all three legs of a bracket, only `order_type` differs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub coin: String,
    pub leverage: u32,
    /// Entry price the model asked for, which is what later PnL is measured
    /// against.
    pub main_order_entry: f64,
    pub reason: String,
    pub order_type: OrderKind,
}

/// Realized outcome of a resolved trigger leg.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerPnl {
    pub pnl_percent: f64,
    pub pnl_usd: f64,
    /// Labeled by the sign of the PnL. A stop that fired in profit reads as
    /// a take profit here even though the ledger filed it as a stop loss.
    pub outcome: OrderKind,
}

impl fmt::Display for TriggerPnl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}% ({:.2} USD)", self.pnl_percent, self.pnl_usd)
    }
}

/// Durable map from order id to placement context, one file per agent.
pub struct OrderLedger {
    store: JsonStore,
    entries: BTreeMap<u64, OrderRecord>,
}

impl OrderLedger {
    pub async fn load(store: JsonStore) -> Result<Self> {
        let entries = store.load(FOLDER, FILE).await?.unwrap_or_default();
        Ok(Self { store, entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, oid: u64) -> bool {
        self.entries.contains_key(&oid)
    }

    pub fn get(&self, oid: u64) -> Option<&OrderRecord> {
        self.entries.get(&oid)
    }

    /// File a filled bracket under its three consecutive order ids: the main
    /// fill, then the take profit at `main_oid + 1`, then the stop loss at
    /// `main_oid + 2`.
    pub async fn record_placement(
        &mut self,
        main_oid: u64,
        coin: &str,
        leverage: u32,
        entry: f64,
        reason: &str,
    ) -> Result<()> {
        let record = OrderRecord {
            coin: coin.to_string(),
            leverage,
            main_order_entry: entry,
            reason: reason.to_string(),
            order_type: OrderKind::Main,
        };
        self.entries.insert(
            main_oid + 1,
            OrderRecord {
                order_type: OrderKind::TakeProfit,
                ..record.clone()
            },
        );
        self.entries.insert(
            main_oid + 2,
            OrderRecord {
                order_type: OrderKind::StopLoss,
                ..record.clone()
            },
        );
        self.entries.insert(main_oid, record);
        self.store.save(FOLDER, FILE, &self.entries).await
    }

    /// Walk order history newest first and pair resolved trigger legs with
    /// their ledger records.
    ///
    /// The cap is checked with a strict greater-than before the ledger
    /// lookup, so one extra match can slip through and skipped events never
    /// spend the budget.
    pub fn match_recent_triggers<'a>(
        &'a self,
        events: &'a [HistoricalOrderEvent],
        limit: usize,
    ) -> Vec<(&'a HistoricalOrderEvent, &'a OrderRecord)> {
        let mut matched = Vec::new();
        for event in events {
            if !event.order.reduce_only {
                continue;
            }
            if event.status != "cancelled" && event.status != "triggered" {
                continue;
            }
            if matched.len() > limit {
                break;
            }
            let record = match self.entries.get(&event.order.oid) {
                Some(record) => record,
                None => continue,
            };
            matched.push((event, record));
        }
        matched
    }
}

/// PnL a resolved trigger leg realized against the recorded entry price. The
/// trigger price is taken as the exit because that is where the position
/// actually left. Non-trigger fills have no realized PnL and yield `None`.
pub fn compute_trigger_pnl(
    event: &HistoricalOrderEvent,
    entry: f64,
) -> Result<Option<TriggerPnl>, LedgerError> {
    let order = &event.order;
    if !order.reduce_only {
        return Ok(None);
    }
    if entry == 0.0 {
        return Err(LedgerError::DivisionByZero(order.oid));
    }

    let (pnl_percent, pnl_usd) = match order.side {
        // A reduce-only sell closes a long.
        Side::Sell => (
            (order.trigger_px - entry) / entry * 100.0,
            (order.trigger_px - entry) * order.sz,
        ),
        // A reduce-only buy closes a short.
        Side::Buy => (
            (entry - order.trigger_px) / entry * 100.0,
            (entry - order.trigger_px) * order.sz,
        ),
    };
    let outcome = if pnl_percent >= 0.0 {
        OrderKind::TakeProfit
    } else {
        OrderKind::StopLoss
    };

    Ok(Some(TriggerPnl {
        pnl_percent,
        pnl_usd,
        outcome,
    }))
}
