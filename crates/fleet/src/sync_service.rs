//! Trade Sync Service (C7): reconciles local trades with the broker's
//! historical deal ledger on a timer, and on demand via [`TradeSyncService::sync_now`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use broker::BrokerAdapter;
use chrono::{DateTime, Utc};
use core_types::{CloseReason, Deal, Trade, TradeStatus};
use trade_store::TradeStore;

use crate::error::FleetError;

/// Outcome of one reconciliation cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub inserted: u32,
    pub updated: u32,
}

pub struct TradeSyncService {
    broker: Arc<dyn BrokerAdapter>,
    store: TradeStore,
    history_days: i64,
    interval_minutes: u64,
    magic_to_strategy: HashMap<i64, String>,
    last_sync: Mutex<Option<DateTime<Utc>>>,
    stop: AtomicBool,
}

impl TradeSyncService {
    pub fn new(
        broker: Arc<dyn BrokerAdapter>,
        store: TradeStore,
        history_days: i64,
        interval_minutes: u64,
        magic_to_strategy: HashMap<i64, String>,
    ) -> Self {
        Self {
            broker,
            store,
            history_days,
            interval_minutes,
            magic_to_strategy,
            last_sync: Mutex::new(None),
            stop: AtomicBool::new(false),
        }
    }

    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        *self.last_sync.lock().expect("sync service last_sync lock poisoned")
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Runs forever until [`TradeSyncService::request_stop`] is called,
    /// sleeping `interval_minutes` between cycles (checked every second so
    /// shutdown is observed within 5s, per the fleet's cancellation SLA).
    pub async fn run(self: Arc<Self>) {
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return;
            }
            match self.sync_now().await {
                Ok(stats) => {
                    tracing::info!(inserted = stats.inserted, updated = stats.updated, "trade sync cycle complete");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "trade sync cycle failed, will retry next cycle");
                }
            }

            let total_secs = self.interval_minutes * 60;
            for _ in 0..total_secs.max(1) {
                if self.stop.load(Ordering::SeqCst) {
                    return;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }

    /// One reconciliation cycle: pulls broker history for the configured
    /// lookback window, groups by position, and upserts matching rows.
    pub async fn sync_now(&self) -> Result<SyncStats, FleetError> {
        let to = Utc::now();
        let from = to - chrono::Duration::days(self.history_days);
        let deals = self.broker.history_deals(from, to).await?;

        let mut groups: HashMap<i64, Vec<Deal>> = HashMap::new();
        for deal in deals {
            if deal.position_id == 0 {
                continue;
            }
            groups.entry(deal.position_id).or_default().push(deal);
        }

        let mut stats = SyncStats::default();
        for (position_id, mut deals) in groups {
            deals.sort_by_key(|d| d.time);
            let entry = deals.first().cloned().expect("group always has at least one deal");
            let exit = if deals.len() > 1 { deals.last().cloned() } else { None };
            let ticket = if entry.order_id != 0 { entry.order_id } else { position_id };

            match self.store.get_by_ticket(ticket).await? {
                Some(trade) if trade.status == TradeStatus::Opened => {
                    if let Some(exit_deal) = &exit {
                        let reason = classify_close_reason(&exit_deal.comment);
                        let pips = trade_logger::profit_pips(&trade.symbol, trade.action, trade.entry_price, exit_deal.price);
                        let updated = self
                            .store
                            .close_by_ticket(
                                ticket,
                                exit_deal.price,
                                exit_deal.profit,
                                pips,
                                exit_deal.commission,
                                exit_deal.swap,
                                exit_deal.time,
                                reason,
                            )
                            .await?;
                        if updated {
                            stats.updated += 1;
                        }
                    }
                }
                Some(_) => {
                    // Already closed/cancelled/errored — nothing new to reconcile.
                }
                None => {
                    let strategy_name = self
                        .magic_to_strategy
                        .get(&entry.magic_number)
                        .cloned()
                        .unwrap_or_else(|| format!("Unknown_M{}", entry.magic_number));
                    let bot_id = format!("Synced_{}_M{}", entry.symbol, entry.magic_number);

                    let mut trade = Trade::new_opened(
                        ticket,
                        entry.magic_number,
                        bot_id,
                        strategy_name,
                        entry.symbol.clone(),
                        entry.deal_type,
                        entry.volume,
                        entry.price,
                        None,
                        None,
                        None,
                        None,
                    );
                    trade.commission = entry.commission;
                    trade.swap = entry.swap;

                    if let Some(exit_deal) = &exit {
                        let reason = classify_close_reason(&exit_deal.comment);
                        let pips = trade_logger::profit_pips(&entry.symbol, entry.deal_type, entry.price, exit_deal.price);
                        trade.exit_price = Some(exit_deal.price);
                        trade.profit = Some(exit_deal.profit);
                        trade.profit_pips = Some(pips);
                        trade.commission += exit_deal.commission;
                        trade.swap += exit_deal.swap;
                        trade.closed_at = Some(exit_deal.time);
                        trade.status = TradeStatus::Closed;
                        trade.close_reason = Some(reason);
                    }

                    self.store.insert_trade(&trade).await?;
                    stats.inserted += 1;
                }
            }
        }

        *self.last_sync.lock().expect("sync service last_sync lock poisoned") = Some(Utc::now());
        Ok(stats)
    }
}

/// Derives a close reason from a broker deal comment, scanning for the
/// bracketed take-profit/stop-loss markers MT5-style brokers append.
fn classify_close_reason(comment: &str) -> CloseReason {
    let lower = comment.to_lowercase();
    if lower.contains("[tp") {
        CloseReason::Tp
    } else if lower.contains("[sl") {
        CloseReason::Sl
    } else {
        CloseReason::Synced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker::SimulatedBroker;
    use core_types::OrderSide;
    use rust_decimal_macros::dec;
    use trade_store::open_in_memory;

    async fn service() -> TradeSyncService {
        let broker = Arc::new(SimulatedBroker::new("", ""));
        let store = TradeStore::new(open_in_memory().await.unwrap());
        TradeSyncService::new(broker, store, 7, 10, HashMap::new())
    }

    #[test]
    fn classifies_close_reason_case_insensitively() {
        assert_eq!(classify_close_reason("[TP 1902.5]"), CloseReason::Tp);
        assert_eq!(classify_close_reason("[sl hit]"), CloseReason::Sl);
        assert_eq!(classify_close_reason("manual close"), CloseReason::Synced);
    }

    #[tokio::test]
    async fn sync_now_is_idempotent_with_no_new_history() {
        let service = service().await;
        let first = service.sync_now().await.unwrap();
        let second = service.sync_now().await.unwrap();
        assert_eq!(first, SyncStats::default());
        assert_eq!(second, SyncStats::default());
        assert!(service.last_sync_time().is_some());
    }

    #[tokio::test]
    async fn synthesizes_closed_trade_from_two_deals() {
        let broker = SimulatedBroker::new("", "")
            .seed_deal(Deal {
                position_id: 42,
                order_id: 42,
                time: Utc::now() - chrono::Duration::hours(2),
                price: dec!(1900.00),
                volume: dec!(0.10),
                deal_type: OrderSide::Buy,
                profit: dec!(0.0),
                commission: dec!(0.0),
                swap: dec!(0.0),
                magic_number: 77,
                comment: "open".to_string(),
                symbol: "XAUUSD".to_string(),
            })
            .await
            .seed_deal(Deal {
                position_id: 42,
                order_id: 43,
                time: Utc::now(),
                price: dec!(1902.50),
                volume: dec!(0.10),
                deal_type: OrderSide::Sell,
                profit: dec!(25.0),
                commission: dec!(0.0),
                swap: dec!(0.0),
                magic_number: 77,
                comment: "[tp 1902.5]".to_string(),
                symbol: "XAUUSD".to_string(),
            })
            .await;
        let broker = Arc::new(broker);

        let store = TradeStore::new(open_in_memory().await.unwrap());
        let service = TradeSyncService::new(broker, store.clone(), 7, 10, HashMap::new());
        let stats = service.sync_now().await.unwrap();
        assert_eq!(stats.inserted, 1);

        let trade = store.get_by_ticket(42).await.unwrap().unwrap();
        assert_eq!(trade.status, TradeStatus::Closed);
        assert_eq!(trade.close_reason, Some(CloseReason::Tp));
        assert_eq!(trade.symbol, "XAUUSD");
        assert_eq!(trade.profit_pips, Some(dec!(25.0)));
    }
}
