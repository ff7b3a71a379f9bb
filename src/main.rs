use std::io::Write as _;
use std::sync::Arc;

use anyhow::{Context, Result};
use broker::SimulatedBroker;
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use events::EventBus;
use fleet::{FleetController, FleetControllerConfig};
use global_state::GlobalState;
use rust_decimal_macros::dec;
use strategies::{MovingAverageCrossover, Strategy};
use trade_store::{db_path, open};

/// Wires up the bot fleet controller against a broker terminal and drops into an
/// interactive shell. This binary is a thin demonstration host: the core lives
/// entirely in the `fleet`, `broker`, `trade-store`, `trade-logger`, `events`,
/// and `global-state` crates. A production host swaps `SimulatedBroker` for a
/// real terminal adapter without touching anything else wired up here.
#[tokio::main]
async fn main() -> Result<()> {
    let config = configuration::load_config().context("loading configuration")?;
    configuration::init_tracing(&config.logging).context("initializing tracing")?;

    tracing::info!("bot fleet controller starting");

    let global_state = GlobalState::new();
    let event_bus = EventBus::new(config.fleet.event_history_capacity, global_state.clone());
    event_bus.subscribe(core_types::EventType::BotError, |event: &core_types::Event| {
        tracing::error!(source = %event.source, payload = %event.payload, "bot error event");
    });

    // Demo broker: a real deployment initializes a production BrokerAdapter here
    // with `config.broker` and calls `initialize` before handing it to the fleet.
    let broker: Arc<dyn broker::BrokerAdapter> = Arc::new(SimulatedBroker::new(
        config.broker.symbol_prefix.clone(),
        config.broker.symbol_suffix.clone(),
    ));

    let db_file = db_path(&config.fleet.data_dir, Some(config.broker.login));
    let pool = open(&db_file).await.context("opening trade store")?;
    let trade_store = trade_store::TradeStore::new(pool);

    let mut magic_to_strategy = std::collections::HashMap::new();
    magic_to_strategy.insert(12345_i64, "MovingAverageCrossover".to_string());

    let controller = Arc::new(FleetController::new(
        broker,
        trade_store,
        event_bus,
        global_state,
        FleetControllerConfig {
            max_consecutive_errors: config.fleet.max_consecutive_errors,
            sync_interval_minutes: config.fleet.sync_interval_minutes,
            sync_history_days: config.fleet.sync_history_days,
            command_poll_interval_secs: config.fleet.command_poll_interval_secs,
            ipc_dir: config.fleet.ipc_dir.clone(),
        },
        magic_to_strategy,
    ));

    tokio::spawn(controller.clone().run_command_loop());

    let demo_strategy: Box<dyn Strategy> = Box::new(
        MovingAverageCrossover::new(
            12345,
            5,
            20,
            vec!["EURUSD".to_string()],
            dec!(0.1),
            Some(dec!(20)),
            Some(dec!(40)),
            dec!(0.0001),
        )
        .context("constructing demo strategy")?,
    );
    let registration = core_types::BotRegistration {
        bot_id: core_types::BotRegistration::default_bot_id("MovingAverageCrossover", "EURUSD", "M1"),
        strategy_name: "MovingAverageCrossover".to_string(),
        symbol: "EURUSD".to_string(),
        timeframe: "M1".to_string(),
        interval_seconds: 60,
        window_size: 50,
        magic_number: 12345,
    };
    // A restart factory lets the `restart` IPC command (spec.md §6) rebuild an
    // equivalent strategy instance without a human driving a Rust call site.
    let demo_restart_factory: fleet::StrategyFactory = std::sync::Arc::new(|_registration| {
        Box::new(
            MovingAverageCrossover::new(
                12345,
                5,
                20,
                vec!["EURUSD".to_string()],
                dec!(0.1),
                Some(dec!(20)),
                Some(dec!(40)),
                dec!(0.0001),
            )
            .expect("rebuilding demo strategy"),
        )
    });
    controller
        .add_bot_with_restart_factory(registration, demo_strategy, demo_restart_factory)
        .await
        .context("registering demo bot")?;

    run_shell(controller).await;

    tracing::info!("bot fleet controller finished");
    Ok(())
}

/// The command-line REPL described in spec.md §6: `status[ bot]`, `stats[ bot]`,
/// `sync`, `pause`, `resume`, `help`, `exit`. Not part of the core contract —
/// only a thin convenience layer for operating this demonstration host.
async fn run_shell(controller: Arc<FleetController>) {
    let mut input = String::new();
    loop {
        print!("fleet> ");
        let _ = std::io::stdout().flush();
        input.clear();
        if std::io::stdin().read_line(&mut input).unwrap_or(0) == 0 {
            break;
        }
        let line = input.trim();
        let mut parts = line.splitn(2, char::is_whitespace);
        let command = parts.next().unwrap_or("");
        let argument = parts.next().map(str::trim).filter(|s| !s.is_empty());

        match command {
            "" => continue,
            "help" => print_help(),
            "status" => print_status(&controller, argument),
            "stats" => print_stats(&controller, argument).await,
            "sync" => match controller.sync_trades_now().await {
                Ok(stats) => println!("synced: {} inserted, {} updated", stats.inserted, stats.updated),
                Err(e) => println!("sync failed: {e}"),
            },
            "pause" => {
                controller.pause_all();
                println!("fleet paused");
            }
            "resume" => {
                controller.resume_all();
                println!("fleet resumed");
            }
            "exit" | "quit" => {
                controller.stop_all_bots().await;
                break;
            }
            other => println!("unrecognized command `{other}`, type `help` for the list"),
        }
    }
}

fn print_help() {
    println!("commands:");
    println!("  status[ bot_id]   show one bot's status, or every bot's");
    println!("  stats[ bot_id]    show one bot's trading stats, or every bot's");
    println!("  sync              trigger an immediate trade sync cycle");
    println!("  pause             pause every running bot");
    println!("  resume            resume every paused bot");
    println!("  help              show this message");
    println!("  exit              stop every bot and quit");
}

fn print_status(controller: &FleetController, bot_id: Option<&str>) {
    if let Some(bot_id) = bot_id {
        match controller.bot_status(bot_id) {
            Some(status) => println!("{bot_id}: {}", status.as_str()),
            None => println!("no such bot: {bot_id}"),
        }
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["bot_id", "status", "symbol", "timeframe", "magic", "alive"]);
    for bot in controller.all_bot_status() {
        table.add_row(vec![
            Cell::new(bot.bot_id),
            Cell::new(bot.status.as_str()),
            Cell::new(bot.symbol),
            Cell::new(bot.timeframe),
            Cell::new(bot.magic_number),
            Cell::new(bot.is_alive),
        ]);
    }
    println!("{table}");
}

async fn print_stats(controller: &FleetController, bot_id: Option<&str>) {
    let Some(bot_id) = bot_id else {
        println!("usage: stats <bot_id>");
        return;
    };
    match controller.bot_trading_stats(bot_id).await {
        Ok(stats) => {
            println!(
                "{bot_id}: total={} open={} closed={} wins={} losses={} win_rate={}% total_profit={} avg_profit={}",
                stats.total,
                stats.open,
                stats.closed,
                stats.wins,
                stats.losses,
                stats.win_rate_pct,
                stats.total_profit,
                stats.avg_profit,
            );
        }
        Err(e) => println!("failed to load stats for {bot_id}: {e}"),
    }
}
