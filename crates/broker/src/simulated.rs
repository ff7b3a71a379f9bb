use crate::error::BrokerError;
use crate::BrokerAdapter;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use core_types::{AccountInfo, Bar, Deal, FillingPolicy, OrderResult, OrderSide, Position, PositionFilter, SymbolInfo};
use rust_decimal::Decimal;
use tokio::sync::Mutex;

/// MT5's own sentinel for "the trade request completed".
const RETCODE_DONE: i32 = 10009;
/// MT5's own sentinel for a request MT5 itself refused (bad stops, bad volume, ...).
const RETCODE_INVALID_REQUEST: i32 = 10013;

const COMMON_SUFFIXES: [&str; 4] = [".ecn", ".sml", "m", "micro"];
const COMMON_PREFIXES: [&str; 1] = ["#"];
const SUBSTRING_PREFERRED_MAX_LEN: usize = 10;

#[derive(Clone)]
struct PendingOrder {
    ticket: i64,
    symbol: String,
    action: OrderSide,
    price: Decimal,
    sl: Option<Decimal>,
    tp: Option<Decimal>,
}

struct State {
    connected: bool,
    symbols: Vec<SymbolInfo>,
    positions: Vec<Position>,
    pending: Vec<PendingOrder>,
    deals: Vec<Deal>,
    account: AccountInfo,
    next_ticket: i64,
    symbol_prefix: String,
    symbol_suffix: String,
}

/// An in-memory stand-in for a broker terminal: deterministic, single-process,
/// and good enough to drive a bot worker end-to-end in tests without a real
/// terminal connection.
pub struct SimulatedBroker {
    state: Mutex<State>,
}

impl SimulatedBroker {
    pub fn new(symbol_prefix: impl Into<String>, symbol_suffix: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(State {
                connected: false,
                symbols: Vec::new(),
                positions: Vec::new(),
                pending: Vec::new(),
                deals: Vec::new(),
                account: AccountInfo {
                    login: 0,
                    balance: Decimal::ZERO,
                    equity: Decimal::ZERO,
                    profit: Decimal::ZERO,
                    free_margin: Decimal::ZERO,
                    leverage: 100,
                    trade_mode: 0,
                },
                next_ticket: 1,
                symbol_prefix: symbol_prefix.into(),
                symbol_suffix: symbol_suffix.into(),
            }),
        }
    }

    /// Seeds the broker's symbol universe. Builder-style for easy test setup.
    pub async fn with_symbol(self, symbol: SymbolInfo) -> Self {
        self.state.lock().await.symbols.push(symbol);
        self
    }

    pub async fn seed_account(self, account: AccountInfo) -> Self {
        self.state.lock().await.account = account;
        self
    }

    /// Seeds a closed-history deal directly, for tests exercising the sync
    /// service without driving a full submit/close cycle through this adapter.
    pub async fn seed_deal(self, deal: Deal) -> Self {
        self.state.lock().await.deals.push(deal);
        self
    }
}

fn find_symbol(symbols: &[SymbolInfo], requested: &str, prefix: &str, suffix: &str) -> Option<SymbolInfo> {
    let mut candidates = Vec::new();
    if !prefix.is_empty() || !suffix.is_empty() {
        candidates.push(format!("{prefix}{requested}{suffix}"));
    }
    for s in COMMON_SUFFIXES {
        candidates.push(format!("{requested}{s}"));
    }
    for p in COMMON_PREFIXES {
        candidates.push(format!("{p}{requested}"));
    }

    for candidate in &candidates {
        if let Some(found) = symbols.iter().find(|s| s.name.eq_ignore_ascii_case(candidate)) {
            return Some(found.clone());
        }
    }

    if let Some(found) = symbols.iter().find(|s| s.name.eq_ignore_ascii_case(requested)) {
        return Some(found.clone());
    }

    let requested_lower = requested.to_lowercase();
    let mut matches: Vec<&SymbolInfo> = symbols
        .iter()
        .filter(|s| s.name.to_lowercase().contains(&requested_lower))
        .collect();
    if matches.is_empty() {
        return None;
    }
    matches.sort_by_key(|s| s.name.len());
    matches
        .iter()
        .find(|s| s.name.len() <= SUBSTRING_PREFERRED_MAX_LEN)
        .or_else(|| matches.first())
        .map(|s| (*s).clone())
}

#[async_trait]
impl BrokerAdapter for SimulatedBroker {
    async fn initialize(
        &self,
        _path: &str,
        login: i64,
        _password: &str,
        _server: &str,
        _timeout_ms: u64,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        state.connected = true;
        state.account.login = login;
        Ok(())
    }

    async fn connected(&self) -> bool {
        self.state.lock().await.connected
    }

    async fn reconnect(&self, _retries: u32, _delay_ms: u64) -> bool {
        let mut state = self.state.lock().await;
        state.connected = true;
        true
    }

    async fn resolve_symbol(&self, requested: &str) -> Result<SymbolInfo, BrokerError> {
        let state = self.state.lock().await;
        find_symbol(&state.symbols, requested, &state.symbol_prefix, &state.symbol_suffix)
            .ok_or_else(|| BrokerError::SymbolNotFound(requested.to_string()))
    }

    async fn select_symbol(&self, resolved_name: &str) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        match state.symbols.iter_mut().find(|s| s.name == resolved_name) {
            Some(symbol) => {
                symbol.visible = true;
                Ok(())
            }
            None => Err(BrokerError::SymbolSelectError(resolved_name.to_string())),
        }
    }

    async fn market_open(&self, requested_symbol: &str) -> bool {
        let state = self.state.lock().await;
        if !state.connected {
            return false;
        }
        let Some(symbol) = find_symbol(&state.symbols, requested_symbol, &state.symbol_prefix, &state.symbol_suffix)
        else {
            return false;
        };
        if !symbol.tradable || symbol.bid.is_zero() || symbol.ask.is_zero() {
            return false;
        }
        if symbol.session_active {
            return true;
        }

        // No reported session activity: fall back to tick-age thresholds. A
        // spread more than 10x nominal is treated as a sign of a thin or
        // closed market, so it gets the tighter of the two windows.
        let point = Decimal::new(1, symbol.digits);
        let spread_points = (symbol.ask - symbol.bid) / point;
        let wide_spread = spread_points > symbol.nominal_spread_points * Decimal::from(10);
        let threshold_secs = if wide_spread { 120 } else { 300 };
        symbol.last_tick_age_secs <= threshold_secs
    }

    async fn rates(&self, symbol: &str, _timeframe: &str, count: usize) -> Result<Vec<Bar>, BrokerError> {
        let state = self.state.lock().await;
        let Some(info) = find_symbol(&state.symbols, symbol, &state.symbol_prefix, &state.symbol_suffix) else {
            return Err(BrokerError::SymbolNotFound(symbol.to_string()));
        };
        drop(state);

        let mut bars = Vec::with_capacity(count);
        let now = Utc::now();
        let mut price = info.bid;
        for i in (0..count).rev() {
            let time = now - ChronoDuration::minutes(i as i64);
            bars.push(Bar {
                time,
                open: price,
                high: price,
                low: price,
                close: price,
                volume: Decimal::ONE,
            });
            price = info.bid; // flat synthetic series; deterministic by construction
        }
        Ok(bars)
    }

    async fn positions(&self, filter: PositionFilter) -> Result<Vec<Position>, BrokerError> {
        let state = self.state.lock().await;
        Ok(state
            .positions
            .iter()
            .filter(|p| filter.symbol.as_deref().is_none_or(|s| s == p.symbol))
            .filter(|p| filter.magic_number.is_none_or(|m| m == p.magic_number))
            .cloned()
            .collect())
    }

    async fn history_deals(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Deal>, BrokerError> {
        let state = self.state.lock().await;
        Ok(state
            .deals
            .iter()
            .filter(|d| d.time >= from && d.time <= to)
            .cloned()
            .collect())
    }

    async fn submit_market(
        &self,
        symbol: &str,
        action: OrderSide,
        volume: Decimal,
        sl: Option<Decimal>,
        tp: Option<Decimal>,
        magic: i64,
        comment: &str,
        _filling_policy: FillingPolicy,
    ) -> Result<OrderResult, BrokerError> {
        let mut state = self.state.lock().await;
        let Some(info) = find_symbol(&state.symbols, symbol, &state.symbol_prefix, &state.symbol_suffix) else {
            return Err(BrokerError::SymbolNotFound(symbol.to_string()));
        };
        let price = match action {
            OrderSide::Buy => info.ask,
            OrderSide::Sell => info.bid,
        };

        let ticket = state.next_ticket;
        state.next_ticket += 1;

        state.positions.push(Position {
            ticket,
            symbol: symbol.to_string(),
            magic_number: magic,
            side: action,
            volume,
            entry_price: price,
            sl_price: sl,
            tp_price: tp,
            profit: Decimal::ZERO,
        });
        state.deals.push(Deal {
            position_id: ticket,
            order_id: ticket,
            time: Utc::now(),
            price,
            volume,
            deal_type: action,
            profit: Decimal::ZERO,
            commission: Decimal::ZERO,
            swap: Decimal::ZERO,
            magic_number: magic,
            comment: comment.to_string(),
            symbol: symbol.to_string(),
        });

        Ok(OrderResult {
            ticket,
            retcode: RETCODE_DONE,
            volume,
            price,
        })
    }

    async fn submit_pending(
        &self,
        symbol: &str,
        action: OrderSide,
        price: Decimal,
        _expiration: Option<DateTime<Utc>>,
        sl: Option<Decimal>,
        tp: Option<Decimal>,
        magic: i64,
        _comment: &str,
        _filling_policy: FillingPolicy,
    ) -> Result<OrderResult, BrokerError> {
        let mut state = self.state.lock().await;
        if find_symbol(&state.symbols, symbol, &state.symbol_prefix, &state.symbol_suffix).is_none() {
            return Err(BrokerError::SymbolNotFound(symbol.to_string()));
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.pending.push(PendingOrder {
            ticket,
            symbol: symbol.to_string(),
            action,
            price,
            sl,
            tp,
        });
        let _ = magic;

        Ok(OrderResult {
            ticket,
            retcode: RETCODE_DONE,
            volume: Decimal::ZERO,
            price,
        })
    }

    async fn modify_sl_tp(&self, ticket: i64, sl: Option<Decimal>, tp: Option<Decimal>) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        match state.positions.iter_mut().find(|p| p.ticket == ticket) {
            Some(position) => {
                if sl.is_some() {
                    position.sl_price = sl;
                }
                if tp.is_some() {
                    position.tp_price = tp;
                }
                Ok(())
            }
            None => Err(BrokerError::OrderSubmitError {
                retcode: RETCODE_INVALID_REQUEST,
                message: format!("no open position for ticket {ticket}"),
            }),
        }
    }

    async fn close_by_ticket(
        &self,
        ticket: i64,
        symbol: &str,
        volume: Decimal,
        position_type: OrderSide,
    ) -> Option<OrderResult> {
        let mut state = self.state.lock().await;
        let index = state.positions.iter().position(|p| p.ticket == ticket)?;
        let position = state.positions.remove(index);

        let info = find_symbol(&state.symbols, symbol, &state.symbol_prefix, &state.symbol_suffix)?;
        let exit_price = match position_type.opposite() {
            OrderSide::Buy => info.ask,
            OrderSide::Sell => info.bid,
        };
        let direction = match position_type {
            OrderSide::Buy => Decimal::ONE,
            OrderSide::Sell => Decimal::NEGATIVE_ONE,
        };
        let profit = (exit_price - position.entry_price) * direction * volume;

        state.deals.push(Deal {
            position_id: ticket,
            order_id: state.next_ticket,
            time: Utc::now(),
            price: exit_price,
            volume,
            deal_type: position_type.opposite(),
            profit,
            commission: Decimal::ZERO,
            swap: Decimal::ZERO,
            magic_number: position.magic_number,
            comment: String::new(),
            symbol: symbol.to_string(),
        });
        state.next_ticket += 1;

        Some(OrderResult {
            ticket,
            retcode: RETCODE_DONE,
            volume,
            price: exit_price,
        })
    }

    async fn remove_pending(&self, ticket: i64) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        let before = state.pending.len();
        state.pending.retain(|p| p.ticket != ticket);
        if state.pending.len() == before {
            return Err(BrokerError::OrderSubmitError {
                retcode: RETCODE_INVALID_REQUEST,
                message: format!("no pending order for ticket {ticket}"),
            });
        }
        Ok(())
    }

    async fn account_info(&self) -> Result<AccountInfo, BrokerError> {
        let state = self.state.lock().await;
        let floating: Decimal = state.positions.iter().map(|p| p.profit).sum();
        Ok(AccountInfo {
            equity: state.account.balance + floating,
            ..state.account
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn symbol(name: &str) -> SymbolInfo {
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

    #[tokio::test]
    async fn resolves_via_configured_suffix_envelope() {
        let broker = SimulatedBroker::new("", ".ecn")
            .with_symbol(symbol("EURUSD.ecn"))
            .await;
        let resolved = broker.resolve_symbol("EURUSD").await.unwrap();
        assert_eq!(resolved.name, "EURUSD.ecn");
    }

    #[tokio::test]
    async fn resolves_via_common_prefix_variant() {
        let broker = SimulatedBroker::new("", "").with_symbol(symbol("#EURUSD")).await;
        let resolved = broker.resolve_symbol("EURUSD").await.unwrap();
        assert_eq!(resolved.name, "#EURUSD");
    }

    #[tokio::test]
    async fn resolves_case_insensitive_exact_match() {
        let broker = SimulatedBroker::new("", "").with_symbol(symbol("eurusd")).await;
        let resolved = broker.resolve_symbol("EURUSD").await.unwrap();
        assert_eq!(resolved.name, "eurusd");
    }

    #[tokio::test]
    async fn resolves_via_substring_preferring_shorter_name() {
        let broker = SimulatedBroker::new("", "")
            .with_symbol(symbol("EURUSD.raw.ecn.micro"))
            .await
            .with_symbol(symbol("EURUSDpro"))
            .await;
        let resolved = broker.resolve_symbol("EURUSD").await.unwrap();
        assert_eq!(resolved.name, "EURUSDpro");
    }

    #[tokio::test]
    async fn fails_when_nothing_matches() {
        let broker = SimulatedBroker::new("", "");
        let err = broker.resolve_symbol("GBPUSD").await.unwrap_err();
        assert!(matches!(err, BrokerError::SymbolNotFound(_)));
    }

    #[tokio::test]
    async fn market_open_false_when_disconnected() {
        let broker = SimulatedBroker::new("", "").with_symbol(symbol("EURUSD")).await;
        assert!(!broker.market_open("EURUSD").await);
    }

    #[tokio::test]
    async fn market_open_tolerates_normal_spread_up_to_300_seconds_stale() {
        let stale_normal_spread = SymbolInfo {
            session_active: false,
            last_tick_age_secs: 299,
            ..symbol("EURUSD")
        };
        let broker = SimulatedBroker::new("", "").with_symbol(stale_normal_spread).await;
        broker.initialize("", 1, "", "", 1000).await.unwrap();
        assert!(broker.market_open("EURUSD").await);
    }

    #[tokio::test]
    async fn market_open_closes_normal_spread_past_300_seconds_stale() {
        let too_stale = SymbolInfo {
            session_active: false,
            last_tick_age_secs: 301,
            ..symbol("EURUSD")
        };
        let broker = SimulatedBroker::new("", "").with_symbol(too_stale).await;
        broker.initialize("", 1, "", "", 1000).await.unwrap();
        assert!(!broker.market_open("EURUSD").await);
    }

    #[tokio::test]
    async fn market_open_closes_wide_spread_past_120_seconds_stale() {
        // ask - bid = 0.00200 at 5 digits = 20 points, nominal is 2 -> 10x nominal exactly, not yet wide.
        // Push it past 10x nominal so the tighter 120s window applies.
        let wide_spread_and_stale = SymbolInfo {
            session_active: false,
            ask: dec!(1.10300),
            last_tick_age_secs: 121,
            ..symbol("EURUSD")
        };
        let broker = SimulatedBroker::new("", "").with_symbol(wide_spread_and_stale).await;
        broker.initialize("", 1, "", "", 1000).await.unwrap();
        assert!(!broker.market_open("EURUSD").await);
    }

    #[tokio::test]
    async fn market_open_tolerates_wide_spread_within_120_seconds_stale() {
        let wide_spread_but_fresh = SymbolInfo {
            session_active: false,
            ask: dec!(1.10300),
            last_tick_age_secs: 119,
            ..symbol("EURUSD")
        };
        let broker = SimulatedBroker::new("", "").with_symbol(wide_spread_but_fresh).await;
        broker.initialize("", 1, "", "", 1000).await.unwrap();
        assert!(broker.market_open("EURUSD").await);
    }

    #[tokio::test]
    async fn submits_and_closes_a_market_order() {
        let broker = SimulatedBroker::new("", "").with_symbol(symbol("EURUSD")).await;
        broker.initialize("", 1, "", "", 1000).await.unwrap();

        let opened = broker
            .submit_market(
                "EURUSD",
                OrderSide::Buy,
                dec!(0.1),
                None,
                None,
                12345,
                "test",
                FillingPolicy::FillOrKill,
            )
            .await
            .unwrap();
        assert_eq!(opened.retcode, RETCODE_DONE);

        let positions = broker.positions(PositionFilter::default()).await.unwrap();
        assert_eq!(positions.len(), 1);

        let closed = broker
            .close_by_ticket(opened.ticket, "EURUSD", dec!(0.1), OrderSide::Buy)
            .await
            .unwrap();
        assert_eq!(closed.retcode, RETCODE_DONE);
        assert!(broker.positions(PositionFilter::default()).await.unwrap().is_empty());
    }
}
