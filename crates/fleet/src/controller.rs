//! Fleet Controller (C9): registry and scheduler of bot workers.
//!
//! Owns the broker handle, the per-account trade logger, the trade sync
//! service, the worker registry, and the IPC files. Every public operation is
//! a total function — it reports failure as a `Result`, never panics or
//! crosses the IPC boundary with an exception, per spec.md §7.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use broker::BrokerAdapter;
use chrono::{DateTime, Utc};
use core_types::{
    BotRegistration, BotStateSnapshot, BotStatus, BotTradingStats, CommandAction, CommandMessage,
    Event, EventType, FleetStateSnapshot,
};
use events::EventBus;
use global_state::GlobalState;
use serde_json::json;
use strategies::Strategy;
use tokio::task::JoinHandle;
use trade_logger::TradeLogger;
use trade_store::TradeStore;

use crate::error::FleetError;
use crate::ipc::{self, COMMANDS_FILE, STATE_FILE};
use crate::sync_service::{SyncStats, TradeSyncService};
use crate::worker::{self, WorkerHandle};

const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Rebuilds a strategy instance equivalent to the one a bot was registered
/// with, from that bot's own `BotRegistration`. Registering one alongside a
/// bot lets the IPC-driven `restart` command (spec.md §6) reconstruct a fresh
/// strategy without the host polling the command queue itself.
pub type StrategyFactory = Arc<dyn Fn(&BotRegistration) -> Box<dyn Strategy> + Send + Sync>;

/// Config a caller hands the controller at startup; mirrors `FleetConfig`
/// (`configuration` crate) without depending on that crate directly, so the
/// controller stays usable from tests with ad-hoc values.
#[derive(Debug, Clone)]
pub struct FleetControllerConfig {
    pub max_consecutive_errors: u32,
    pub sync_interval_minutes: u64,
    pub sync_history_days: i64,
    pub command_poll_interval_secs: u64,
    pub ipc_dir: PathBuf,
}

struct RegisteredBot {
    handle: WorkerHandle,
}

struct Registry {
    bots: HashMap<String, RegisteredBot>,
    /// magic_number -> strategy_name, to enforce the (magic, strategy-class) invariant.
    magic_owners: HashMap<i64, String>,
    /// bot_id -> restart factory, for bots registered via `add_bot_with_restart_factory`.
    restart_factories: HashMap<String, StrategyFactory>,
}

pub struct FleetController {
    broker: Arc<dyn BrokerAdapter>,
    trade_logger: TradeLogger,
    event_bus: EventBus,
    global_state: GlobalState,
    sync_service: Arc<TradeSyncService>,
    sync_task: Mutex<Option<JoinHandle<()>>>,
    registry: Mutex<Registry>,
    config: FleetControllerConfig,
}

impl FleetController {
    /// Resolves the broker account login (for per-account DB naming, per
    /// `trade-store`'s convention) and constructs the controller. The trade
    /// store and its sync service share the same `TradeStore` handle.
    pub fn new(
        broker: Arc<dyn BrokerAdapter>,
        trade_store: TradeStore,
        event_bus: EventBus,
        global_state: GlobalState,
        config: FleetControllerConfig,
        magic_to_strategy: HashMap<i64, String>,
    ) -> Self {
        let trade_logger = TradeLogger::new(trade_store.clone());
        let sync_service = Arc::new(TradeSyncService::new(
            broker.clone(),
            trade_store,
            config.sync_history_days,
            config.sync_interval_minutes,
            magic_to_strategy,
        ));

        Self {
            broker,
            trade_logger,
            event_bus,
            global_state,
            sync_service,
            sync_task: Mutex::new(None),
            registry: Mutex::new(Registry {
                bots: HashMap::new(),
                magic_owners: HashMap::new(),
                restart_factories: HashMap::new(),
            }),
            config,
        }
    }

    /// Registers and launches a new bot worker. Rejects if `bot_id` already
    /// exists, or if `magic_number` is already owned by a different strategy
    /// class. Starts the Trade Sync Service if this is the first worker.
    pub async fn add_bot(
        &self,
        registration: BotRegistration,
        strategy: Box<dyn Strategy>,
    ) -> Result<(), FleetError> {
        self.add_bot_inner(registration, strategy, None).await
    }

    /// Like [`Self::add_bot`], but also registers a [`StrategyFactory`] for
    /// this bot so a later IPC-driven `restart` command can rebuild an
    /// equivalent strategy instance.
    pub async fn add_bot_with_restart_factory(
        &self,
        registration: BotRegistration,
        strategy: Box<dyn Strategy>,
        factory: StrategyFactory,
    ) -> Result<(), FleetError> {
        self.add_bot_inner(registration, strategy, Some(factory)).await
    }

    async fn add_bot_inner(
        &self,
        registration: BotRegistration,
        strategy: Box<dyn Strategy>,
        factory: Option<StrategyFactory>,
    ) -> Result<(), FleetError> {
        {
            let mut registry = self.registry.lock().expect("fleet registry lock poisoned");
            if registry.bots.contains_key(&registration.bot_id) {
                return Err(FleetError::BotAlreadyExists(registration.bot_id));
            }
            if let Some(existing_strategy) = registry.magic_owners.get(&registration.magic_number) {
                if existing_strategy != &registration.strategy_name {
                    return Err(FleetError::MagicNumberConflict {
                        magic: registration.magic_number,
                        existing_strategy: existing_strategy.clone(),
                        new_strategy: registration.strategy_name,
                    });
                }
            }
            registry
                .magic_owners
                .insert(registration.magic_number, registration.strategy_name.clone());
        }

        if !self.broker.market_open(&registration.symbol).await {
            tracing::warn!(bot_id = %registration.bot_id, symbol = %registration.symbol, "market closed at registration time, bot will wait");
        }

        let handle = worker::spawn(
            registration.clone(),
            strategy,
            self.broker.clone(),
            self.trade_logger.clone(),
            self.event_bus.clone(),
            self.config.max_consecutive_errors,
        );

        let is_first = {
            let mut registry = self.registry.lock().expect("fleet registry lock poisoned");
            let was_empty = registry.bots.is_empty();
            registry.bots.insert(registration.bot_id.clone(), RegisteredBot { handle });
            if let Some(factory) = factory {
                registry.restart_factories.insert(registration.bot_id.clone(), factory);
            }
            was_empty
        };

        if is_first {
            self.start_sync_service();
        }

        self.refresh_global_pause();
        self.write_state_snapshot();
        Ok(())
    }

    fn start_sync_service(&self) {
        let sync_service = self.sync_service.clone();
        let mut task = self.sync_task.lock().expect("fleet sync task lock poisoned");
        if task.is_none() {
            *task = Some(tokio::spawn(async move { sync_service.run().await }));
            tracing::info!("trade sync service started");
        }
    }

    pub fn pause_bot(&self, bot_id: &str) -> Result<(), FleetError> {
        let registry = self.registry.lock().expect("fleet registry lock poisoned");
        let bot = registry.bots.get(bot_id).ok_or_else(|| FleetError::BotNotFound(bot_id.to_string()))?;
        bot.handle.request_pause();
        drop(registry);
        self.event_bus.publish(Event::new(EventType::BotPaused, bot_id.to_string(), json!({})));
        self.refresh_global_pause();
        self.write_state_snapshot();
        Ok(())
    }

    pub fn resume_bot(&self, bot_id: &str) -> Result<(), FleetError> {
        let registry = self.registry.lock().expect("fleet registry lock poisoned");
        let bot = registry.bots.get(bot_id).ok_or_else(|| FleetError::BotNotFound(bot_id.to_string()))?;
        bot.handle.request_resume();
        drop(registry);
        self.event_bus.publish(Event::new(EventType::BotResumed, bot_id.to_string(), json!({})));
        self.refresh_global_pause();
        self.write_state_snapshot();
        Ok(())
    }

    pub fn pause_all(&self) {
        let registry = self.registry.lock().expect("fleet registry lock poisoned");
        for (bot_id, bot) in registry.bots.iter() {
            bot.handle.request_pause();
            self.event_bus.publish(Event::new(EventType::BotPaused, bot_id.clone(), json!({})));
        }
        drop(registry);
        self.refresh_global_pause();
        self.write_state_snapshot();
    }

    pub fn resume_all(&self) {
        let registry = self.registry.lock().expect("fleet registry lock poisoned");
        for (bot_id, bot) in registry.bots.iter() {
            bot.handle.request_resume();
            self.event_bus.publish(Event::new(EventType::BotResumed, bot_id.clone(), json!({})));
        }
        drop(registry);
        self.refresh_global_pause();
        self.write_state_snapshot();
    }

    /// Signals stop, joins the worker (timeout 5s), and removes it from the
    /// registry. The magic-number ownership slot is released only once no
    /// remaining bot shares it, so a same-class sibling keeps the claim.
    pub async fn stop_bot(&self, bot_id: &str) -> Result<(), FleetError> {
        let registered = {
            let mut registry = self.registry.lock().expect("fleet registry lock poisoned");
            let registered = registry.bots.remove(bot_id).ok_or_else(|| FleetError::BotNotFound(bot_id.to_string()))?;
            registry.restart_factories.remove(bot_id);
            registered
        };

        registered.handle.request_stop();
        let stopped_in_time = registered.handle.join(STOP_JOIN_TIMEOUT).await;

        // Magic-number ownership is keyed by strategy class for the lifetime of
        // the fleet, not by any single bot instance, so stopping one bot never
        // releases it: a same-class sibling may still hold it, and a future
        // `add_bot` for the same class should keep matching against it.
        self.refresh_global_pause();
        self.write_state_snapshot();

        if !stopped_in_time {
            tracing::warn!(bot_id, "worker did not join within the shutdown grace period");
            return Err(FleetError::StopTimedOut(bot_id.to_string()));
        }
        Ok(())
    }

    /// Stops and relaunches a bot with the same configuration, yielding a
    /// fresh state machine starting in `starting`.
    pub async fn restart_bot(
        &self,
        bot_id: &str,
        strategy: Box<dyn Strategy>,
    ) -> Result<(), FleetError> {
        let (registration, factory) = {
            let registry = self.registry.lock().expect("fleet registry lock poisoned");
            let registration = registry
                .bots
                .get(bot_id)
                .map(|b| b.handle.registration.clone())
                .ok_or_else(|| FleetError::BotNotFound(bot_id.to_string()))?;
            let factory = registry.restart_factories.get(bot_id).cloned();
            (registration, factory)
        };

        self.stop_bot(bot_id).await.ok();
        self.add_bot_inner(registration, strategy, factory).await
    }

    /// Stops the Trade Sync Service, then stops every registered bot.
    pub async fn stop_all_bots(&self) {
        self.sync_service.request_stop();
        if let Some(task) = self.sync_task.lock().expect("fleet sync task lock poisoned").take() {
            let _ = tokio::time::timeout(STOP_JOIN_TIMEOUT, task).await;
        }

        let bot_ids: Vec<String> = {
            let registry = self.registry.lock().expect("fleet registry lock poisoned");
            registry.bots.keys().cloned().collect()
        };
        for bot_id in bot_ids {
            if let Err(e) = self.stop_bot(&bot_id).await {
                tracing::warn!(bot_id, error = %e, "bot did not stop cleanly during shutdown");
            }
        }
    }

    pub fn bot_status(&self, bot_id: &str) -> Option<BotStatus> {
        self.registry
            .lock()
            .expect("fleet registry lock poisoned")
            .bots
            .get(bot_id)
            .map(|b| b.handle.status())
    }

    pub fn list_bots(&self) -> Vec<String> {
        self.registry.lock().expect("fleet registry lock poisoned").bots.keys().cloned().collect()
    }

    pub fn all_bot_status(&self) -> Vec<BotStateSnapshot> {
        self.registry
            .lock()
            .expect("fleet registry lock poisoned")
            .bots
            .values()
            .map(|b| BotStateSnapshot {
                bot_id: b.handle.registration.bot_id.clone(),
                status: b.handle.status(),
                symbol: b.handle.registration.symbol.clone(),
                timeframe: b.handle.registration.timeframe.clone(),
                interval_seconds: b.handle.registration.interval_seconds,
                magic_number: b.handle.registration.magic_number,
                is_alive: b.handle.is_alive(),
            })
            .collect()
    }

    pub async fn bot_trading_stats(&self, bot_id: &str) -> Result<BotTradingStats, FleetError> {
        Ok(self.trade_logger.bot_stats(bot_id).await?)
    }

    pub async fn sync_trades_now(&self) -> Result<SyncStats, FleetError> {
        self.sync_service.sync_now().await
    }

    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        self.sync_service.last_sync_time()
    }

    /// Global-pause is set iff at least one worker is registered and every
    /// registered worker (ignoring `stopped` ones) is `paused`.
    fn refresh_global_pause(&self) {
        let registry = self.registry.lock().expect("fleet registry lock poisoned");
        let active: Vec<BotStatus> = registry
            .bots
            .values()
            .map(|b| b.handle.status())
            .filter(|s| *s != BotStatus::Stopped)
            .collect();
        let all_paused = !active.is_empty() && active.iter().all(|s| *s == BotStatus::Paused);
        self.global_state.set_paused(all_paused);
    }

    fn write_state_snapshot(&self) {
        let snapshot = FleetStateSnapshot {
            global_paused: self.global_state.is_paused(),
            bots: self.all_bot_status(),
        };
        let path = self.config.ipc_dir.join(STATE_FILE);
        if let Err(e) = ipc::write_state_snapshot(&path, &snapshot) {
            tracing::warn!(error = %e, path = %path.display(), "failed to write state snapshot");
        }
    }

    /// Drains the command queue once. Run this on a `command_poll_interval_secs`
    /// tick from the host (see `fleet::run_command_loop`).
    pub async fn process_commands_once(&self) {
        let path = self.config.ipc_dir.join(COMMANDS_FILE);
        let commands = ipc::take_commands(&path);
        for command in commands {
            self.dispatch_command(command).await;
        }
    }

    async fn dispatch_command(&self, command: CommandMessage) {
        let outcome = match (command.action, command.bot_id.as_deref()) {
            (CommandAction::Pause, Some(bot_id)) => self.pause_bot(bot_id).map_err(|e| e.to_string()),
            (CommandAction::Resume, Some(bot_id)) => self.resume_bot(bot_id).map_err(|e| e.to_string()),
            (CommandAction::Stop, Some(bot_id)) => self.stop_bot(bot_id).await.map_err(|e| e.to_string()),
            (CommandAction::PauseAll, _) => {
                self.pause_all();
                Ok(())
            }
            (CommandAction::ResumeAll, _) => {
                self.resume_all();
                Ok(())
            }
            (action, None) if matches!(action, CommandAction::Pause | CommandAction::Resume | CommandAction::Stop | CommandAction::Restart) => {
                Err("command requires a bot_id".to_string())
            }
            (CommandAction::Restart, Some(bot_id)) => {
                let plan = {
                    let registry = self.registry.lock().expect("fleet registry lock poisoned");
                    registry.bots.get(bot_id).zip(registry.restart_factories.get(bot_id)).map(
                        |(bot, factory)| (bot.handle.registration.clone(), factory.clone()),
                    )
                };
                match plan {
                    Some((registration, factory)) => {
                        let strategy = factory(&registration);
                        self.restart_bot(bot_id, strategy).await.map_err(|e| e.to_string())
                    }
                    None => {
                        tracing::warn!(
                            bot_id,
                            "restart command received but no restart factory is registered for this bot; \
                             register one via add_bot_with_restart_factory to enable IPC-driven restarts"
                        );
                        Err("no restart factory registered for this bot".to_string())
                    }
                }
            }
            _ => Err("unrecognized command".to_string()),
        };
        if let Err(reason) = outcome {
            tracing::warn!(action = ?command.action, bot_id = ?command.bot_id, reason, "command dispatch failed");
        }
    }

    /// Runs the command-processor loop forever, polling every
    /// `command_poll_interval_secs`. Intended to be spawned as its own task by the host.
    pub async fn run_command_loop(self: Arc<Self>) {
        let interval = Duration::from_secs(self.config.command_poll_interval_secs.max(1));
        loop {
            self.clone().process_commands_once().await;
            tokio::time::sleep(interval).await;
        }
    }
}
