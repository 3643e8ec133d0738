use crate::api::exchange::PerpMetadata;
use crate::models::{
    HistoricalOrder, HistoricalOrderEvent, OrderKind, PlaceOrderRequest, PositionSide, Side,
};
use anyhow::Result;
use async_trait::async_trait;
use common::JsonStore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const FOLDER: &str = "state";
const FILE: &str = "paper";

/// Minimum order value in $.
const MIN_ORDER_VALUE: f64 = 10.0;
const STARTING_BALANCE: f64 = 10_000.0;
const FIRST_OID: u64 = 1000;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Coin not found: {0}")]
    UnknownCoin(String),
    #[error("There exist open positions for {0}")]
    PositionExists(String),
    #[error("Invalid leverage for this coin. Min: 1, Max: {max}")]
    InvalidLeverage { max: u32 },
    #[error("Order value too small. Minimum required is ${min}. Current value: ${value}")]
    OrderValueTooSmall { value: f64, min: f64 },
    #[error("No position found for {0}")]
    NoPosition(String),
}

/// Outcome of a filled bracket placement. The take profit rests at
/// `main_oid + 1` and the stop loss at `main_oid + 2`.
#[derive(Debug, Clone, Copy)]
pub struct PlacementReceipt {
    pub main_oid: u64,
    pub avg_px: f64,
}

/// A resting trigger leg as the account surface reports it.
#[derive(Debug, Clone)]
pub struct OpenOrder {
    pub coin: String,
    pub side: Side,
    pub order_type: String,
    pub trigger_px: f64,
    pub sz: f64,
    pub oid: u64,
    pub reduce_only: bool,
}

/// One open position. `szi` is signed: positive long, negative short.
#[derive(Debug, Clone)]
pub struct Position {
    pub coin: String,
    pub szi: f64,
    pub entry_px: f64,
    pub leverage: u32,
    pub unrealized_pnl: f64,
}

/// Where orders go. The agent only ever talks to this surface, so swapping
/// the paper engine for a signing client is a drop-in change.
#[async_trait]
pub trait ExecutionPort: Send + Sync {
    /// Upsert leverage and place an entry order bracketed by a take profit
    /// and a stop loss.
    async fn place_bracket(
        &mut self,
        request: &PlaceOrderRequest,
        meta: &PerpMetadata,
        now_ms: i64,
    ) -> Result<PlacementReceipt>;

    /// Close the position at the current mid and cancel its trigger legs.
    /// Returns a line describing what happened.
    async fn close_position(
        &mut self,
        coin: &str,
        meta: &PerpMetadata,
        now_ms: i64,
    ) -> Result<String>;

    /// Resolve any trigger leg the current mids have crossed. Returns one
    /// line per resolved bracket.
    async fn mark_to_market(&mut self, meta: &PerpMetadata, now_ms: i64) -> Result<Vec<String>>;

    fn open_orders(&self) -> Vec<OpenOrder>;

    fn positions(&self, meta: &PerpMetadata) -> Vec<Position>;

    /// Order history, newest first.
    fn historical_orders(&self) -> Vec<HistoricalOrderEvent>;

    /// Cash balance including realized PnL.
    fn account_value(&self) -> f64;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PaperPosition {
    coin: String,
    side: PositionSide,
    size: f64,
    entry_px: f64,
    leverage: u32,
    tp_oid: u64,
    sl_oid: u64,
    tp_px: f64,
    sl_px: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PaperState {
    balance: f64,
    next_oid: u64,
    positions: Vec<PaperPosition>,
    history: Vec<HistoricalOrderEvent>,
}

impl PaperState {
    fn new(balance: f64) -> Self {
        Self {
            balance,
            next_oid: FIRST_OID,
            positions: Vec::new(),
            history: Vec::new(),
        }
    }
}

/// In-process stand-in for the venue. Entries fill immediately at their
/// normalized price and trigger legs resolve against the mid each cycle,
/// with the surviving sibling cancelled. State persists across restarts in
/// the agent's data directory.
pub struct PaperExecution {
    store: JsonStore,
    state: PaperState,
}

impl PaperExecution {
    pub async fn load(store: JsonStore) -> Result<Self> {
        let state = store
            .load(FOLDER, FILE)
            .await?
            .unwrap_or_else(|| PaperState::new(STARTING_BALANCE));
        Ok(Self { store, state })
    }

    #[cfg(test)]
    fn with_balance(store: JsonStore, balance: f64) -> Self {
        Self {
            store,
            state: PaperState::new(balance),
        }
    }

    fn position(&self, coin: &str) -> Option<&PaperPosition> {
        self.state.positions.iter().find(|p| p.coin == coin)
    }

    fn close_side(side: PositionSide) -> Side {
        match side {
            PositionSide::Long => Side::Sell,
            PositionSide::Short => Side::Buy,
        }
    }

    fn leg_event(
        position: &PaperPosition,
        trigger_px: f64,
        oid: u64,
        status: &str,
        now_ms: i64,
    ) -> HistoricalOrderEvent {
        HistoricalOrderEvent {
            order: HistoricalOrder {
                coin: position.coin.clone(),
                side: Self::close_side(position.side),
                trigger_px,
                sz: position.size,
                reduce_only: true,
                oid,
                timestamp: now_ms,
            },
            status: status.to_string(),
            status_timestamp: now_ms,
        }
    }

    async fn save(&self) -> Result<()> {
        self.store.save(FOLDER, FILE, &self.state).await
    }
}

#[async_trait]
impl ExecutionPort for PaperExecution {
    async fn place_bracket(
        &mut self,
        request: &PlaceOrderRequest,
        meta: &PerpMetadata,
        now_ms: i64,
    ) -> Result<PlacementReceipt> {
        let (asset, _) = meta
            .find(&request.coin)
            .ok_or_else(|| ExecError::UnknownCoin(request.coin.clone()))?;
        if self.position(&request.coin).is_some() {
            return Err(ExecError::PositionExists(request.coin.clone()).into());
        }

        let leverage = request.leverage.min(asset.max_leverage);
        if leverage < 1 {
            return Err(ExecError::InvalidLeverage {
                max: asset.max_leverage,
            }
            .into());
        }

        let size = normalize_size(request.size, asset.sz_decimals);
        let entry = normalize_price(request.entry, asset.sz_decimals);
        let take_profit = normalize_price(request.take_profit, asset.sz_decimals);
        let stop_loss = normalize_price(request.stop_loss, asset.sz_decimals);

        let value = size * entry;
        if value < MIN_ORDER_VALUE {
            return Err(ExecError::OrderValueTooSmall {
                value,
                min: MIN_ORDER_VALUE,
            }
            .into());
        }

        let main_oid = self.state.next_oid;
        self.state.next_oid += 3;

        self.state.history.insert(
            0,
            HistoricalOrderEvent {
                order: HistoricalOrder {
                    coin: request.coin.clone(),
                    side: match request.side {
                        PositionSide::Long => Side::Buy,
                        PositionSide::Short => Side::Sell,
                    },
                    trigger_px: 0.0,
                    sz: size,
                    reduce_only: false,
                    oid: main_oid,
                    timestamp: now_ms,
                },
                status: "filled".to_string(),
                status_timestamp: now_ms,
            },
        );
        self.state.positions.push(PaperPosition {
            coin: request.coin.clone(),
            side: request.side,
            size,
            entry_px: entry,
            leverage,
            tp_oid: main_oid + 1,
            sl_oid: main_oid + 2,
            tp_px: take_profit,
            sl_px: stop_loss,
        });
        self.save().await?;

        Ok(PlacementReceipt {
            main_oid,
            avg_px: entry,
        })
    }

    async fn close_position(
        &mut self,
        coin: &str,
        meta: &PerpMetadata,
        now_ms: i64,
    ) -> Result<String> {
        let index = self
            .state
            .positions
            .iter()
            .position(|p| p.coin == coin)
            .ok_or_else(|| ExecError::NoPosition(coin.to_string()))?;
        let position = self.state.positions.remove(index);

        let exit = meta.mid_price(coin).unwrap_or(position.entry_px);
        let realized = match position.side {
            PositionSide::Long => (exit - position.entry_px) * position.size,
            PositionSide::Short => (position.entry_px - exit) * position.size,
        };
        self.state.balance += realized;

        let cancelled_tp =
            Self::leg_event(&position, position.tp_px, position.tp_oid, "cancelled", now_ms);
        let cancelled_sl =
            Self::leg_event(&position, position.sl_px, position.sl_oid, "cancelled", now_ms);
        self.state.history.insert(0, cancelled_tp);
        self.state.history.insert(0, cancelled_sl);
        self.save().await?;

        Ok(format!(
            "Closed {} {} at {}, realized {:.2} USD",
            position.side, coin, exit, realized
        ))
    }

    async fn mark_to_market(&mut self, meta: &PerpMetadata, now_ms: i64) -> Result<Vec<String>> {
        let mut notices = Vec::new();
        let mut remaining = Vec::new();

        for position in std::mem::take(&mut self.state.positions) {
            let mid = match meta.mid_price(&position.coin) {
                Some(mid) => mid,
                None => {
                    remaining.push(position);
                    continue;
                }
            };

            // One cycle resolves at most one leg. A take profit wins when
            // the mid has crossed both.
            let fired = match position.side {
                PositionSide::Long if mid >= position.tp_px => Some(OrderKind::TakeProfit),
                PositionSide::Long if mid <= position.sl_px => Some(OrderKind::StopLoss),
                PositionSide::Short if mid <= position.tp_px => Some(OrderKind::TakeProfit),
                PositionSide::Short if mid >= position.sl_px => Some(OrderKind::StopLoss),
                _ => None,
            };

            let kind = match fired {
                Some(kind) => kind,
                None => {
                    remaining.push(position);
                    continue;
                }
            };
            let (exit, exit_oid, sibling_px, sibling_oid) = match kind {
                OrderKind::TakeProfit => (
                    position.tp_px,
                    position.tp_oid,
                    position.sl_px,
                    position.sl_oid,
                ),
                _ => (
                    position.sl_px,
                    position.sl_oid,
                    position.tp_px,
                    position.tp_oid,
                ),
            };

            let realized = match position.side {
                PositionSide::Long => (exit - position.entry_px) * position.size,
                PositionSide::Short => (position.entry_px - exit) * position.size,
            };
            self.state.balance += realized;

            let triggered = Self::leg_event(&position, exit, exit_oid, "triggered", now_ms);
            let cancelled =
                Self::leg_event(&position, sibling_px, sibling_oid, "cancelled", now_ms);
            self.state.history.insert(0, triggered);
            self.state.history.insert(0, cancelled);

            notices.push(format!(
                "{} {} triggered at {}, realized {:.2} USD",
                position.coin, kind, exit, realized
            ));
        }

        self.state.positions = remaining;
        if !notices.is_empty() {
            self.save().await?;
        }
        Ok(notices)
    }

    fn open_orders(&self) -> Vec<OpenOrder> {
        let mut orders = Vec::new();
        for position in &self.state.positions {
            let side = Self::close_side(position.side);
            orders.push(OpenOrder {
                coin: position.coin.clone(),
                side,
                order_type: "Take Profit Market".to_string(),
                trigger_px: position.tp_px,
                sz: position.size,
                oid: position.tp_oid,
                reduce_only: true,
            });
            orders.push(OpenOrder {
                coin: position.coin.clone(),
                side,
                order_type: "Stop Market".to_string(),
                trigger_px: position.sl_px,
                sz: position.size,
                oid: position.sl_oid,
                reduce_only: true,
            });
        }
        orders
    }

    fn positions(&self, meta: &PerpMetadata) -> Vec<Position> {
        self.state
            .positions
            .iter()
            .map(|position| {
                let mid = meta.mid_price(&position.coin).unwrap_or(position.entry_px);
                let szi = match position.side {
                    PositionSide::Long => position.size,
                    PositionSide::Short => -position.size,
                };
                Position {
                    coin: position.coin.clone(),
                    szi,
                    entry_px: position.entry_px,
                    leverage: position.leverage,
                    unrealized_pnl: (mid - position.entry_px) * szi,
                }
            })
            .collect()
    }

    fn historical_orders(&self) -> Vec<HistoricalOrderEvent> {
        self.state.history.clone()
    }

    fn account_value(&self) -> f64 {
        self.state.balance
    }
}

/// Clamp a price to the venue's tick rules: integers pass through, a whole
/// part of five or more digits drops its decimals, everything else rounds to
/// `6 - szDecimals` decimal places and then at most five significant
/// figures.
fn normalize_price(px: f64, sz_decimals: u32) -> f64 {
    if px.fract() == 0.0 {
        return px;
    }
    if px.trunc().abs() >= 10_000.0 {
        return px.trunc();
    }
    let fixed = round_to_decimals(px, 6u32.saturating_sub(sz_decimals));
    round_to_sig_figs(fixed, 5)
}

fn normalize_size(sz: f64, sz_decimals: u32) -> f64 {
    if sz.fract() == 0.0 {
        return sz;
    }
    round_to_decimals(sz, sz_decimals)
}

fn round_to_decimals(value: f64, decimals: u32) -> f64 {
    let scale = 10f64.powi(decimals as i32);
    (value * scale).round() / scale
}

fn round_to_sig_figs(value: f64, figures: i32) -> f64 {
    if value == 0.0 {
        return 0.0;
    }
    let magnitude = value.abs().log10().floor() as i32;
    let scale = 10f64.powi(figures - 1 - magnitude);
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::exchange::{AssetCtx, AssetMeta};
    use tempfile::tempdir;

    fn meta(entries: &[(&str, u32, u32, Option<f64>)]) -> PerpMetadata {
        PerpMetadata {
            assets: entries
                .iter()
                .map(|&(name, max_leverage, sz_decimals, _)| AssetMeta {
                    name: name.to_string(),
                    max_leverage,
                    sz_decimals,
                })
                .collect(),
            contexts: entries
                .iter()
                .map(|&(_, _, _, mid_px)| AssetCtx {
                    mid_px,
                    day_ntl_vlm: 1e6,
                    funding: 0.0,
                })
                .collect(),
        }
    }

    fn long_request(coin: &str) -> PlaceOrderRequest {
        PlaceOrderRequest {
            coin: coin.to_string(),
            side: PositionSide::Long,
            leverage: 3,
            entry: 100.0,
            take_profit: 110.0,
            stop_loss: 95.0,
            size: 0.5,
            reason: "funding stretched".to_string(),
        }
    }

    async fn engine() -> (tempfile::TempDir, PaperExecution) {
        let dir = tempdir().unwrap();
        let exec = PaperExecution::with_balance(JsonStore::new(dir.path()), 10_000.0);
        (dir, exec)
    }

    #[tokio::test]
    async fn a_bracket_fills_and_rests_its_legs() {
        let (_dir, mut exec) = engine().await;
        let meta = meta(&[("BTC", 50, 1, Some(100.0))]);

        let receipt = exec
            .place_bracket(&long_request("BTC"), &meta, 1_000)
            .await
            .unwrap();
        assert_eq!(receipt.main_oid, 1000);
        assert_eq!(receipt.avg_px, 100.0);

        let positions = exec.positions(&meta);
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].szi, 0.5);
        assert_eq!(positions[0].leverage, 3);

        let orders = exec.open_orders();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].oid, 1001);
        assert_eq!(orders[1].oid, 1002);
        assert!(orders.iter().all(|o| o.reduce_only && o.side == Side::Sell));

        let history = exec.historical_orders();
        assert_eq!(history[0].status, "filled");
        assert_eq!(history[0].order.oid, 1000);
        assert!(!history[0].order.reduce_only);
    }

    #[tokio::test]
    async fn order_ids_stay_consecutive_across_brackets() {
        let (_dir, mut exec) = engine().await;
        let meta = meta(&[("BTC", 50, 1, Some(100.0)), ("ETH", 50, 1, Some(100.0))]);

        let first = exec
            .place_bracket(&long_request("BTC"), &meta, 1_000)
            .await
            .unwrap();
        let second = exec
            .place_bracket(&long_request("ETH"), &meta, 2_000)
            .await
            .unwrap();

        assert_eq!(first.main_oid, 1000);
        assert_eq!(second.main_oid, 1003);
    }

    #[tokio::test]
    async fn a_second_bracket_on_the_same_coin_is_rejected() {
        let (_dir, mut exec) = engine().await;
        let meta = meta(&[("BTC", 50, 1, Some(100.0))]);

        exec.place_bracket(&long_request("BTC"), &meta, 1_000)
            .await
            .unwrap();
        let err = exec
            .place_bracket(&long_request("BTC"), &meta, 2_000)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExecError>(),
            Some(ExecError::PositionExists(_))
        ));
    }

    #[tokio::test]
    async fn unknown_coins_and_small_orders_are_rejected() {
        let (_dir, mut exec) = engine().await;
        let meta = meta(&[("BTC", 50, 1, Some(100.0))]);

        let err = exec
            .place_bracket(&long_request("DOGE"), &meta, 1_000)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExecError>(),
            Some(ExecError::UnknownCoin(_))
        ));

        let mut small = long_request("BTC");
        small.size = 0.05;
        let err = exec.place_bracket(&small, &meta, 1_000).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExecError>(),
            Some(ExecError::OrderValueTooSmall { .. })
        ));
    }

    #[tokio::test]
    async fn leverage_is_clamped_down_but_zero_is_an_error() {
        let (_dir, mut exec) = engine().await;
        let meta = meta(&[("BTC", 5, 1, Some(100.0))]);

        let mut request = long_request("BTC");
        request.leverage = 100;
        exec.place_bracket(&request, &meta, 1_000).await.unwrap();
        assert_eq!(exec.positions(&meta)[0].leverage, 5);

        exec.close_position("BTC", &meta, 2_000).await.unwrap();
        request.leverage = 0;
        let err = exec
            .place_bracket(&request, &meta, 3_000)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExecError>(),
            Some(ExecError::InvalidLeverage { max: 5 })
        ));
    }

    #[tokio::test]
    async fn a_crossed_take_profit_cancels_the_stop() {
        let (_dir, mut exec) = engine().await;
        let resting = meta(&[("BTC", 50, 1, Some(100.0))]);
        exec.place_bracket(&long_request("BTC"), &resting, 1_000)
            .await
            .unwrap();

        let pumped = meta(&[("BTC", 50, 1, Some(111.0))]);
        let notices = exec.mark_to_market(&pumped, 2_000).await.unwrap();

        assert_eq!(notices.len(), 1);
        assert!(notices[0].contains("Take Profit triggered at 110"));
        assert!(exec.positions(&pumped).is_empty());
        assert_eq!(exec.account_value(), 10_005.0);

        let history = exec.historical_orders();
        let triggered = history.iter().find(|e| e.status == "triggered").unwrap();
        let cancelled = history.iter().find(|e| e.status == "cancelled").unwrap();
        assert_eq!(triggered.order.oid, 1001);
        assert!(triggered.order.reduce_only);
        assert_eq!(cancelled.order.oid, 1002);
    }

    #[tokio::test]
    async fn a_short_stops_out_when_the_mid_rises() {
        let (_dir, mut exec) = engine().await;
        let resting = meta(&[("ETH", 50, 1, Some(100.0))]);
        let request = PlaceOrderRequest {
            side: PositionSide::Short,
            take_profit: 90.0,
            stop_loss: 105.0,
            ..long_request("ETH")
        };
        exec.place_bracket(&request, &resting, 1_000).await.unwrap();

        let squeezed = meta(&[("ETH", 50, 1, Some(106.0))]);
        let notices = exec.mark_to_market(&squeezed, 2_000).await.unwrap();

        assert!(notices[0].contains("Stop Loss triggered at 105"));
        assert_eq!(exec.account_value(), 9_997.5);
    }

    #[tokio::test]
    async fn closing_cancels_both_legs_and_realizes_at_mid() {
        let (_dir, mut exec) = engine().await;
        let resting = meta(&[("BTC", 50, 1, Some(100.0))]);
        exec.place_bracket(&long_request("BTC"), &resting, 1_000)
            .await
            .unwrap();

        let drifted = meta(&[("BTC", 50, 1, Some(104.0))]);
        let notice = exec.close_position("BTC", &drifted, 2_000).await.unwrap();

        assert!(notice.contains("realized 2.00 USD"));
        assert_eq!(exec.account_value(), 10_002.0);
        assert!(exec.positions(&drifted).is_empty());

        let cancelled: Vec<_> = exec
            .historical_orders()
            .into_iter()
            .filter(|e| e.status == "cancelled")
            .collect();
        assert_eq!(cancelled.len(), 2);
        assert!(cancelled.iter().all(|e| e.order.reduce_only));

        let err = exec
            .close_position("BTC", &drifted, 3_000)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExecError>(),
            Some(ExecError::NoPosition(_))
        ));
    }

    #[tokio::test]
    async fn paper_state_survives_a_restart() {
        let dir = tempdir().unwrap();
        let meta = meta(&[("BTC", 50, 1, Some(100.0))]);
        {
            let mut exec = PaperExecution::with_balance(JsonStore::new(dir.path()), 10_000.0);
            exec.place_bracket(&long_request("BTC"), &meta, 1_000)
                .await
                .unwrap();
        }

        let exec = PaperExecution::load(JsonStore::new(dir.path())).await.unwrap();
        assert_eq!(exec.positions(&meta).len(), 1);
        assert_eq!(exec.state.next_oid, 1003);
        assert_eq!(exec.historical_orders().len(), 1);
    }

    #[test]
    fn price_normalization_follows_the_tick_rules() {
        // Integers pass through untouched.
        assert_eq!(normalize_price(5000.0, 2), 5000.0);
        // A five digit whole part drops its decimals outright.
        assert_eq!(normalize_price(61234.567, 3), 61234.0);
        // Five significant figures after the decimal cap.
        assert_eq!(normalize_price(4321.987, 1), 4322.0);
        assert_eq!(normalize_price(1234.5678, 2), 1234.6);
        // Small prices keep 6 - szDecimals decimals.
        assert_eq!(normalize_price(0.0123456, 0), 0.012346);
    }

    #[test]
    fn size_normalization_rounds_to_sz_decimals() {
        assert_eq!(normalize_size(0.0123456, 3), 0.012);
        assert_eq!(normalize_size(1.26, 1), 1.3);
        assert_eq!(normalize_size(3.0, 0), 3.0);
    }
}
