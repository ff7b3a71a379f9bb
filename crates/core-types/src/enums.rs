use serde::{Deserialize, Serialize};

/// Direction of an order or position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl serde::Serialize for OrderSide {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            OrderSide::Buy => serializer.serialize_str("buy"),
            OrderSide::Sell => serializer.serialize_str("sell"),
        }
    }
}

impl<'de> serde::Deserialize<'de> for OrderSide {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.to_lowercase().as_str() {
            "buy" => Ok(OrderSide::Buy),
            "sell" => Ok(OrderSide::Sell),
            _ => Err(serde::de::Error::custom(format!(
                "unknown order side `{s}`, expected `buy` or `sell`"
            ))),
        }
    }
}

impl OrderSide {
    /// The side that closes a position opened with this side.
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// A strategy's raw decision for a single evaluation, independent of execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    Buy,
    Sell,
    Hold,
}

impl SignalType {
    /// Converts a tradeable signal into the order side it implies, if any.
    pub fn order_side(&self) -> Option<OrderSide> {
        match self {
            SignalType::Buy => Some(OrderSide::Buy),
            SignalType::Sell => Some(OrderSide::Sell),
            SignalType::Hold => None,
        }
    }
}

/// Lifecycle status of a persisted `Trade` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Opened,
    Closed,
    Cancelled,
    Error,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Opened => "opened",
            TradeStatus::Closed => "closed",
            TradeStatus::Cancelled => "cancelled",
            TradeStatus::Error => "error",
        }
    }
}

impl std::str::FromStr for TradeStatus {
    type Err = crate::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "opened" => Ok(TradeStatus::Opened),
            "closed" => Ok(TradeStatus::Closed),
            "cancelled" => Ok(TradeStatus::Cancelled),
            "error" => Ok(TradeStatus::Error),
            other => Err(crate::CoreError::InvalidInput(
                "trade status".to_string(),
                other.to_string(),
            )),
        }
    }
}

/// Why a trade was closed, for attribution and analytics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Sl,
    Tp,
    Manual,
    Signal,
    Synced,
    EndOfData,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Sl => "sl",
            CloseReason::Tp => "tp",
            CloseReason::Manual => "manual",
            CloseReason::Signal => "signal",
            CloseReason::Synced => "synced",
            CloseReason::EndOfData => "end_of_data",
        }
    }
}

impl std::str::FromStr for CloseReason {
    type Err = crate::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sl" => Ok(CloseReason::Sl),
            "tp" => Ok(CloseReason::Tp),
            "manual" => Ok(CloseReason::Manual),
            "signal" => Ok(CloseReason::Signal),
            "synced" => Ok(CloseReason::Synced),
            "end_of_data" => Ok(CloseReason::EndOfData),
            other => Err(crate::CoreError::InvalidInput(
                "close reason".to_string(),
                other.to_string(),
            )),
        }
    }
}

/// Execution state of a single `BotWorker`, as reflected in the fleet state snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotStatus {
    Starting,
    Running,
    WaitingMarket,
    Paused,
    Stopped,
}

impl BotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotStatus::Starting => "starting",
            BotStatus::Running => "running",
            BotStatus::WaitingMarket => "waiting_market",
            BotStatus::Paused => "paused",
            BotStatus::Stopped => "stopped",
        }
    }
}

/// A message drained from the on-disk command queue and dispatched by the fleet controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandAction {
    Pause,
    Resume,
    Stop,
    Restart,
    PauseAll,
    ResumeAll,
}

/// The fixed enumeration of event types the bus can publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SignalGenerated,
    TradeOpened,
    TradeClosed,
    TradeModified,
    BotStarted,
    BotStopped,
    BotPaused,
    BotResumed,
    BotError,
    MarketOpened,
    MarketClosed,
    ConnectionLost,
    ConnectionRestored,
}

impl EventType {
    /// Event types suppressed while the fleet is globally paused.
    pub fn suppressed_while_paused(&self) -> bool {
        matches!(
            self,
            EventType::SignalGenerated | EventType::TradeOpened | EventType::TradeClosed
        )
    }

    pub const ALL: [EventType; 13] = [
        EventType::SignalGenerated,
        EventType::TradeOpened,
        EventType::TradeClosed,
        EventType::TradeModified,
        EventType::BotStarted,
        EventType::BotStopped,
        EventType::BotPaused,
        EventType::BotResumed,
        EventType::BotError,
        EventType::MarketOpened,
        EventType::MarketClosed,
        EventType::ConnectionLost,
        EventType::ConnectionRestored,
    ];
}

/// Broker-specific rule controlling whether an order may be partially filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillingPolicy {
    FillOrKill,
    ImmediateOrCancel,
}
