//! Bot Worker (C8): the per-strategy execution loop.
//!
//! One [`BotWorker`] drives one `(symbol, timeframe, interval)` instance of a
//! strategy, cooperatively, as its own tokio task. The fleet controller only
//! ever talks to a worker through its [`WorkerHandle`] — pause/resume/stop are
//! flag flips the worker observes at the next loop edge (≤1s), never a forced
//! cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use broker::BrokerAdapter;
use core_types::{BotRegistration, BotStatus, CloseReason, Event, EventType, OrderSide, PositionFilter};
use events::EventBus;
use serde_json::json;
use strategies::Strategy;
use tokio::task::JoinHandle;
use trade_logger::TradeLogger;

/// Shared, lock-light state a [`WorkerHandle`] uses to observe and steer a
/// running worker task without touching its internals.
#[derive(Debug)]
struct Shared {
    status: std::sync::Mutex<BotStatus>,
    stop: AtomicBool,
    paused: AtomicBool,
}

/// A live reference to a spawned bot worker task, owned by the [`crate::FleetController`].
pub struct WorkerHandle {
    pub registration: BotRegistration,
    shared: Arc<Shared>,
    join_handle: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn status(&self) -> BotStatus {
        *self.shared.status.lock().expect("worker status lock poisoned")
    }

    /// Whether the underlying task is still running. A stopped worker's task
    /// has necessarily exited, but the task may also exit before `status` is
    /// observed as `Stopped` by a caller racing the transition.
    pub fn is_alive(&self) -> bool {
        !self.join_handle.is_finished()
    }

    pub fn request_pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
    }

    pub fn request_resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
    }

    pub fn request_stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Waits up to `timeout` for the task to finish after a stop request.
    /// Returns `true` if it exited in time.
    pub async fn join(self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.join_handle).await.is_ok()
    }
}

/// Spawns a bot worker task and returns a handle to it. `strategy` is moved
/// into the task; the controller never touches it again directly.
pub fn spawn(
    registration: BotRegistration,
    strategy: Box<dyn Strategy>,
    broker: Arc<dyn BrokerAdapter>,
    trade_logger: TradeLogger,
    event_bus: EventBus,
    max_consecutive_errors: u32,
) -> WorkerHandle {
    let shared = Arc::new(Shared {
        status: std::sync::Mutex::new(BotStatus::Starting),
        stop: AtomicBool::new(false),
        paused: AtomicBool::new(false),
    });

    let task_shared = shared.clone();
    let task_registration = registration.clone();
    let join_handle = tokio::spawn(async move {
        run(task_registration, strategy, broker, trade_logger, event_bus, max_consecutive_errors, task_shared).await;
    });

    WorkerHandle {
        registration,
        shared,
        join_handle,
    }
}

enum SleepOutcome {
    Completed,
    Stopped,
    PausedNow,
}

/// Sleeps `total_secs`, broken into 1-second slices, so `stop`/`pause` are
/// observed within one second rather than at the end of a long sleep.
async fn interruptible_sleep(total_secs: u64, shared: &Shared) -> SleepOutcome {
    for _ in 0..total_secs.max(1) {
        if shared.stop.load(Ordering::SeqCst) {
            return SleepOutcome::Stopped;
        }
        if shared.paused.load(Ordering::SeqCst) {
            return SleepOutcome::PausedNow;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    SleepOutcome::Completed
}

fn set_status(shared: &Shared, status: BotStatus) {
    *shared.status.lock().expect("worker status lock poisoned") = status;
}

#[allow(clippy::too_many_arguments)]
async fn run(
    registration: BotRegistration,
    mut strategy: Box<dyn Strategy>,
    broker: Arc<dyn BrokerAdapter>,
    trade_logger: TradeLogger,
    event_bus: EventBus,
    max_consecutive_errors: u32,
    shared: Arc<Shared>,
) {
    let bot_id = registration.bot_id.clone();
    let params = strategy.parameters();

    let resolved = match broker.resolve_symbol(&registration.symbol).await {
        Ok(resolved) => resolved,
        Err(e) => {
            tracing::error!(bot_id = %bot_id, error = %e, "symbol resolution failed, worker cannot start");
            set_status(&shared, BotStatus::Stopped);
            return;
        }
    };
    if let Err(e) = broker.select_symbol(&resolved.name).await {
        tracing::error!(bot_id = %bot_id, error = %e, "symbol select failed, worker cannot start");
        set_status(&shared, BotStatus::Stopped);
        return;
    }
    let symbol = resolved.name;

    event_bus.publish(Event::new(
        EventType::BotStarted,
        bot_id.clone(),
        json!({ "symbol": symbol, "magic_number": registration.magic_number }),
    ));
    tracing::info!(bot_id = %bot_id, symbol = %symbol, "bot worker started");

    let mut consecutive_errors: u32 = 0;
    let mut market_closed_streak: u64 = 0;
    let mut connection_lost = false;
    let mut iteration: u64 = 0;

    'outer: loop {
        iteration += 1;

        // 1. Pause gate.
        loop {
            if shared.stop.load(Ordering::SeqCst) {
                break 'outer;
            }
            if !shared.paused.load(Ordering::SeqCst) {
                break;
            }
            set_status(&shared, BotStatus::Paused);
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        // 2. Stop check.
        if shared.stop.load(Ordering::SeqCst) {
            break 'outer;
        }

        // 3. Health check.
        if !broker.connected().await {
            if !connection_lost {
                connection_lost = true;
                event_bus.publish(Event::new(EventType::ConnectionLost, bot_id.clone(), json!({})));
                tracing::warn!(bot_id = %bot_id, "broker connection lost");
            }
            let reconnected = broker.reconnect(3, 1000).await;
            if reconnected {
                connection_lost = false;
                consecutive_errors = 0;
                event_bus.publish(Event::new(EventType::ConnectionRestored, bot_id.clone(), json!({})));
                tracing::info!(bot_id = %bot_id, "broker reconnected");
            } else {
                consecutive_errors += 1;
                if consecutive_errors >= max_consecutive_errors {
                    tracing::error!(bot_id = %bot_id, "consecutive error budget exceeded on reconnect, stopping");
                    event_bus.publish(Event::new(EventType::BotError, bot_id.clone(), json!({"reason": "reconnect_budget_exceeded"})));
                    break 'outer;
                }
            }
            match interruptible_sleep(10, &shared).await {
                SleepOutcome::Stopped => break 'outer,
                _ => continue,
            }
        }

        // 4. Market-open gate.
        if !broker.market_open(&symbol).await {
            market_closed_streak += 1;
            if market_closed_streak == 1 || market_closed_streak % 5 == 0 {
                tracing::info!(bot_id = %bot_id, symbol = %symbol, "market closed, waiting");
            }
            set_status(&shared, BotStatus::WaitingMarket);
            match interruptible_sleep(registration.interval_seconds, &shared).await {
                SleepOutcome::Stopped => break 'outer,
                _ => continue,
            }
        }

        // 5. Resume to running.
        if market_closed_streak > 0 {
            tracing::info!(bot_id = %bot_id, symbol = %symbol, "market open again, resuming");
        }
        market_closed_streak = 0;
        set_status(&shared, BotStatus::Running);

        // 6. Fetch bars.
        let bars = match broker.rates(&symbol, &registration.timeframe, registration.window_size).await {
            Ok(bars) => bars,
            Err(e) => {
                consecutive_errors += 1;
                tracing::warn!(bot_id = %bot_id, error = %e, consecutive_errors, "rates fetch failed");
                if consecutive_errors >= max_consecutive_errors {
                    event_bus.publish(Event::new(EventType::BotError, bot_id.clone(), json!({"reason": "rates_error_budget_exceeded"})));
                    break 'outer;
                }
                match interruptible_sleep(5, &shared).await {
                    SleepOutcome::Stopped => break 'outer,
                    _ => continue,
                }
            }
        };
        if bars.is_empty() {
            match interruptible_sleep(registration.interval_seconds, &shared).await {
                SleepOutcome::Stopped => break 'outer,
                _ => continue,
            }
        }

        // 7. Signal.
        let last_index = bars.len() - 1;
        let price_at_signal = bars[last_index].close;
        let signal = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            strategy.generate_signal(&bars, last_index)
        })) {
            Ok(signal) => signal,
            Err(_) => {
                consecutive_errors += 1;
                tracing::error!(bot_id = %bot_id, "strategy panicked generating a signal");
                if consecutive_errors >= max_consecutive_errors {
                    event_bus.publish(Event::new(EventType::BotError, bot_id.clone(), json!({"reason": "strategy_panic_budget_exceeded"})));
                    break 'outer;
                }
                match interruptible_sleep(registration.interval_seconds, &shared).await {
                    SleepOutcome::Stopped => break 'outer,
                    _ => continue,
                }
            }
        };
        event_bus.publish(Event::new(
            EventType::SignalGenerated,
            bot_id.clone(),
            json!({ "symbol": symbol, "signal": signal, "price": price_at_signal }),
        ));

        let mut was_executed = false;
        let mut execution_ticket: Option<i64> = None;
        let mut skip_reason: Option<String> = None;

        // 8. Hold path.
        if let Some(action) = signal.order_side() {
            // 9. Market re-check.
            if !broker.market_open(&symbol).await {
                skip_reason = Some("market_closed".to_string());
            } else {
                match handle_tradeable_signal(
                    &bot_id,
                    &symbol,
                    &registration,
                    action,
                    &params,
                    strategy.as_ref(),
                    &broker,
                    &trade_logger,
                    &event_bus,
                    price_at_signal,
                )
                .await
                {
                    Ok((executed, ticket, skip)) => {
                        was_executed = executed;
                        execution_ticket = ticket;
                        skip_reason = skip;
                    }
                    Err(e) => {
                        tracing::warn!(bot_id = %bot_id, error = %e, "order submission failed");
                        skip_reason = Some("order_failed".to_string());
                    }
                }
            }
        } else {
            skip_reason = Some("hold".to_string());
        }

        if let Err(e) = trade_logger
            .log_signal(
                bot_id.clone(),
                registration.strategy_name.clone(),
                symbol.clone(),
                registration.timeframe.clone(),
                signal,
                price_at_signal,
                was_executed,
                execution_ticket,
                skip_reason,
                None,
            )
            .await
        {
            tracing::warn!(bot_id = %bot_id, error = %e, "failed to persist signal");
        }

        consecutive_errors = 0;

        // 14. Sleep.
        if let SleepOutcome::Stopped = interruptible_sleep(registration.interval_seconds, &shared).await {
            break 'outer;
        }
    }

    set_status(&shared, BotStatus::Stopped);
    event_bus.publish(Event::new(EventType::BotStopped, bot_id.clone(), json!({})));
    tracing::info!(bot_id = %bot_id, "bot worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker::SimulatedBroker;
    use core_types::{EventType, SymbolInfo};
    use global_state::GlobalState;
    use rust_decimal_macros::dec;
    use strategies::StrategyParameters;
    use trade_store::{open_in_memory, TradeStore};

    /// A `Strategy` whose every decision is fixed at construction, for
    /// deterministic exercise of the worker's position-management policy
    /// without needing a real indicator over a bar window.
    struct ScriptedStrategy {
        magic: i64,
        signal: core_types::SignalType,
        params: StrategyParameters,
        volume: rust_decimal::Decimal,
    }

    impl Strategy for ScriptedStrategy {
        fn magic_number(&self) -> i64 {
            self.magic
        }
        fn generate_signal(&mut self, _bar_window: &[core_types::Bar], _current_index: usize) -> core_types::SignalType {
            self.signal
        }
        fn parameters(&self) -> StrategyParameters {
            self.params.clone()
        }
        fn position_size(&self, _symbol: &str, _equity: rust_decimal::Decimal, _entry_price: rust_decimal::Decimal) -> rust_decimal::Decimal {
            self.volume
        }
        fn sl_tp(
            &self,
            _symbol: &str,
            _action: OrderSide,
            _entry_price: rust_decimal::Decimal,
        ) -> (Option<rust_decimal::Decimal>, Option<rust_decimal::Decimal>) {
            (None, None)
        }
    }

    fn tradable_symbol(name: &str) -> SymbolInfo {
        SymbolInfo {
            name: name.to_string(),
            digits: 5,
            visible: false,
            tradable: true,
            volume_min: dec!(0.01),
            volume_max: dec!(100),
            volume_step: dec!(0.01),
            bid: dec!(1.10000),
            ask: dec!(1.10010),
            last_tick_age_secs: 1,
            session_active: true,
            nominal_spread_points: dec!(2),
        }
    }

    fn closed_symbol(name: &str) -> SymbolInfo {
        SymbolInfo {
            session_active: false,
            last_tick_age_secs: 10_000,
            ..tradable_symbol(name)
        }
    }

    fn registration(magic: i64) -> BotRegistration {
        BotRegistration {
            bot_id: BotRegistration::default_bot_id("Scripted", "EURUSD", "M1"),
            strategy_name: "Scripted".to_string(),
            symbol: "EURUSD".to_string(),
            timeframe: "M1".to_string(),
            interval_seconds: 1,
            window_size: 10,
            magic_number: magic,
        }
    }

    async fn harness() -> (TradeLogger, EventBus) {
        let store = TradeStore::new(open_in_memory().await.unwrap());
        (TradeLogger::new(store), EventBus::new(100, GlobalState::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_market_when_closed_and_never_trades() {
        let broker = SimulatedBroker::new("", "").with_symbol(closed_symbol("EURUSD")).await;
        broker.initialize("", 1, "", "", 100).await.unwrap();
        let broker: Arc<dyn BrokerAdapter> = Arc::new(broker);
        let (trade_logger, event_bus) = harness().await;

        let strategy = Box::new(ScriptedStrategy {
            magic: 1,
            signal: core_types::SignalType::Hold,
            params: StrategyParameters {
                symbols: vec!["EURUSD".to_string()],
                close_before_open: true,
                max_open_positions: 1,
            },
            volume: dec!(0.1),
        });

        let handle = spawn(registration(1), strategy, broker.clone(), trade_logger, event_bus, 5);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(handle.status(), BotStatus::WaitingMarket);
        assert!(broker.positions(core_types::PositionFilter::default()).await.unwrap().is_empty());

        handle.request_stop();
        assert!(handle.join(Duration::from_secs(5)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn buy_signal_opens_a_position_and_persists_the_trade() {
        let broker = SimulatedBroker::new("", "").with_symbol(tradable_symbol("EURUSD")).await;
        broker.initialize("", 1, "", "", 100).await.unwrap();
        let broker: Arc<dyn BrokerAdapter> = Arc::new(broker);
        let (trade_logger, event_bus) = harness().await;

        let opened_events = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let opened_events_clone = opened_events.clone();
        event_bus.subscribe(EventType::TradeOpened, move |_| {
            opened_events_clone.fetch_add(1, Ordering::SeqCst);
        });

        let strategy = Box::new(ScriptedStrategy {
            magic: 2,
            signal: core_types::SignalType::Buy,
            params: StrategyParameters {
                symbols: vec!["EURUSD".to_string()],
                close_before_open: true,
                max_open_positions: 1,
            },
            volume: dec!(0.1),
        });

        let handle = spawn(registration(2), strategy, broker.clone(), trade_logger.clone(), event_bus, 5);
        tokio::time::sleep(Duration::from_secs(3)).await;

        let positions = broker.positions(core_types::PositionFilter::default()).await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(opened_events.load(Ordering::SeqCst), 1);

        let open_trades = trade_logger.open_trades(None).await.unwrap();
        assert_eq!(open_trades.len(), 1);
        assert_eq!(open_trades[0].ticket, positions[0].ticket);

        handle.request_stop();
        assert!(handle.join(Duration::from_secs(5)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn max_open_positions_blocks_further_entries() {
        let broker = SimulatedBroker::new("", "").with_symbol(tradable_symbol("EURUSD")).await;
        broker.initialize("", 1, "", "", 100).await.unwrap();
        // Pre-seed one open position so the cap is already reached.
        broker
            .submit_market("EURUSD", OrderSide::Buy, dec!(0.1), None, None, 3, "preexisting", core_types::FillingPolicy::FillOrKill)
            .await
            .unwrap();
        let broker: Arc<dyn BrokerAdapter> = Arc::new(broker);
        let (trade_logger, event_bus) = harness().await;

        let opened_events = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let opened_events_clone = opened_events.clone();
        event_bus.subscribe(EventType::TradeOpened, move |_| {
            opened_events_clone.fetch_add(1, Ordering::SeqCst);
        });

        let strategy = Box::new(ScriptedStrategy {
            magic: 3,
            signal: core_types::SignalType::Buy,
            params: StrategyParameters {
                symbols: vec!["EURUSD".to_string()],
                close_before_open: false,
                max_open_positions: 1,
            },
            volume: dec!(0.1),
        });

        let handle = spawn(registration(3), strategy, broker.clone(), trade_logger, event_bus, 5);
        tokio::time::sleep(Duration::from_secs(3)).await;

        let positions = broker.positions(core_types::PositionFilter::default()).await.unwrap();
        assert_eq!(positions.len(), 1, "no new position should have been opened past the cap");
        assert_eq!(opened_events.load(Ordering::SeqCst), 0);

        handle.request_stop();
        assert!(handle.join(Duration::from_secs(5)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_then_resume_round_trips_through_status() {
        let broker = SimulatedBroker::new("", "").with_symbol(tradable_symbol("EURUSD")).await;
        broker.initialize("", 1, "", "", 100).await.unwrap();
        let broker: Arc<dyn BrokerAdapter> = Arc::new(broker);
        let (trade_logger, event_bus) = harness().await;

        let strategy = Box::new(ScriptedStrategy {
            magic: 4,
            signal: core_types::SignalType::Hold,
            params: StrategyParameters {
                symbols: vec!["EURUSD".to_string()],
                close_before_open: true,
                max_open_positions: 1,
            },
            volume: dec!(0.1),
        });

        let handle = spawn(registration(4), strategy, broker, trade_logger, event_bus, 5);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(handle.status(), BotStatus::Running);

        handle.request_pause();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(handle.status(), BotStatus::Paused);
        assert!(handle.is_paused());

        // Idempotent: pausing again changes nothing.
        handle.request_pause();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.status(), BotStatus::Paused);

        handle.request_resume();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(handle.status(), BotStatus::Running);

        handle.request_stop();
        assert!(handle.join(Duration::from_secs(5)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_cooperative_and_joins_within_grace_period() {
        let broker = SimulatedBroker::new("", "").with_symbol(tradable_symbol("EURUSD")).await;
        broker.initialize("", 1, "", "", 100).await.unwrap();
        let broker: Arc<dyn BrokerAdapter> = Arc::new(broker);
        let (trade_logger, event_bus) = harness().await;

        let strategy = Box::new(ScriptedStrategy {
            magic: 5,
            signal: core_types::SignalType::Hold,
            params: StrategyParameters {
                symbols: vec!["EURUSD".to_string()],
                close_before_open: true,
                max_open_positions: 1,
            },
            volume: dec!(0.1),
        });

        let handle = spawn(registration(5), strategy, broker, trade_logger, event_bus, 5);
        tokio::time::sleep(Duration::from_secs(1)).await;

        handle.request_stop();
        assert!(handle.join(Duration::from_secs(5)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn symbol_resolution_failure_stops_worker_immediately() {
        let broker: Arc<dyn BrokerAdapter> = Arc::new(SimulatedBroker::new("", ""));
        let (trade_logger, event_bus) = harness().await;

        let strategy = Box::new(ScriptedStrategy {
            magic: 6,
            signal: core_types::SignalType::Hold,
            params: StrategyParameters {
                symbols: vec!["GBPUSD".to_string()],
                close_before_open: true,
                max_open_positions: 1,
            },
            volume: dec!(0.1),
        });

        let mut reg = registration(6);
        reg.symbol = "GBPUSD".to_string();
        let handle = spawn(reg, strategy, broker, trade_logger, event_bus, 5);

        assert!(handle.join(Duration::from_secs(5)).await);
    }
}

/// Steps 10–13: position-management policy, sizing, and order submission for
/// a signal that resolved to a tradeable direction. Returns
/// `(was_executed, execution_ticket, skip_reason)`.
#[allow(clippy::too_many_arguments)]
async fn handle_tradeable_signal(
    bot_id: &str,
    symbol: &str,
    registration: &BotRegistration,
    action: OrderSide,
    params: &strategies::StrategyParameters,
    strategy: &dyn Strategy,
    broker: &Arc<dyn BrokerAdapter>,
    trade_logger: &TradeLogger,
    event_bus: &EventBus,
    price_at_signal: rust_decimal::Decimal,
) -> Result<(bool, Option<i64>, Option<String>), broker::BrokerError> {
    let positions = broker
        .positions(PositionFilter {
            symbol: Some(symbol.to_string()),
            magic_number: Some(registration.magic_number),
        })
        .await?;

    if params.close_before_open {
        for position in &positions {
            if let Some(result) = broker
                .close_by_ticket(position.ticket, symbol, position.volume, position.side)
                .await
            {
                if let Err(e) = trade_logger
                    .log_closed(position.ticket, result.price, position.profit, CloseReason::Signal, rust_decimal::Decimal::ZERO, rust_decimal::Decimal::ZERO)
                    .await
                {
                    tracing::warn!(bot_id, ticket = position.ticket, error = %e, "failed to log closed trade");
                }
                event_bus.publish(Event::new(
                    EventType::TradeClosed,
                    bot_id.to_string(),
                    json!({ "ticket": position.ticket, "symbol": symbol, "close_reason": "signal" }),
                ));
            }
        }
    } else if positions.len() as u32 >= params.max_open_positions {
        tracing::info!(bot_id, symbol, "max open positions reached, skipping signal");
        return Ok((false, None, Some("max_positions".to_string())));
    }

    let account = broker.account_info().await?;
    let volume = strategy.position_size(symbol, account.equity, price_at_signal);
    let (sl, tp) = strategy.sl_tp(symbol, action, price_at_signal);

    let comment = format!("{}_{}", registration.strategy_name, bot_id);
    let result = broker
        .submit_market(
            symbol,
            action,
            volume,
            sl,
            tp,
            registration.magic_number,
            &comment,
            core_types::FillingPolicy::FillOrKill,
        )
        .await?;

    trade_logger
        .log_opened(
            result.ticket,
            registration.magic_number,
            bot_id.to_string(),
            registration.strategy_name.clone(),
            symbol.to_string(),
            action,
            result.volume,
            result.price,
            sl,
            tp,
            None,
            None,
        )
        .await
        .map_err(|e| {
            tracing::warn!(bot_id, ticket = result.ticket, error = %e, "failed to persist opened trade");
            e
        })
        .ok();

    event_bus.publish(Event::new(
        EventType::TradeOpened,
        bot_id.to_string(),
        json!({ "ticket": result.ticket, "symbol": symbol, "action": action, "volume": result.volume }),
    ));

    Ok((true, Some(result.ticket), None))
}
