use crate::error::StrategyError;
use crate::{Strategy, StrategyParameters};
use core_types::{Bar, OrderSide, SignalType};
use rust_decimal::Decimal;

/// A reference strategy used to exercise the `Strategy` trait in tests: a plain
/// fast/slow simple-moving-average crossover with fixed sizing and a pip-based
/// stop-loss / take-profit.
///
/// Recomputes both averages from the supplied window on every call rather than
/// carrying indicator state, since `generate_signal` already receives the full
/// window it needs.
pub struct MovingAverageCrossover {
    magic_number: i64,
    fast_period: usize,
    slow_period: usize,
    symbols: Vec<String>,
    volume: Decimal,
    sl_pips: Option<Decimal>,
    tp_pips: Option<Decimal>,
    pip_size: Decimal,
}

impl MovingAverageCrossover {
    pub fn new(
        magic_number: i64,
        fast_period: usize,
        slow_period: usize,
        symbols: Vec<String>,
        volume: Decimal,
        sl_pips: Option<Decimal>,
        tp_pips: Option<Decimal>,
        pip_size: Decimal,
    ) -> Result<Self, StrategyError> {
        if fast_period == 0 || slow_period == 0 {
            return Err(StrategyError::InvalidParameters(
                "MA periods must be at least 1".to_string(),
            ));
        }
        if fast_period >= slow_period {
            return Err(StrategyError::InvalidParameters(
                "fast MA period must be less than slow MA period".to_string(),
            ));
        }
        Ok(Self {
            magic_number,
            fast_period,
            slow_period,
            symbols,
            volume,
            sl_pips,
            tp_pips,
            pip_size,
        })
    }

    /// Mean close over the `period` bars ending at (and including) `index`, or
    /// `None` if the window doesn't reach back that far.
    fn sma(bar_window: &[Bar], index: usize, period: usize) -> Option<Decimal> {
        if index + 1 < period {
            return None;
        }
        let start = index + 1 - period;
        let sum: Decimal = bar_window[start..=index].iter().map(|b| b.close).sum();
        Some(sum / Decimal::from(period as u64))
    }
}

impl Strategy for MovingAverageCrossover {
    fn magic_number(&self) -> i64 {
        self.magic_number
    }

    fn generate_signal(&mut self, bar_window: &[Bar], current_index: usize) -> SignalType {
        if current_index == 0 || current_index >= bar_window.len() {
            return SignalType::Hold;
        }

        let (Some(fast_now), Some(slow_now)) = (
            Self::sma(bar_window, current_index, self.fast_period),
            Self::sma(bar_window, current_index, self.slow_period),
        ) else {
            return SignalType::Hold;
        };
        let (Some(fast_prev), Some(slow_prev)) = (
            Self::sma(bar_window, current_index - 1, self.fast_period),
            Self::sma(bar_window, current_index - 1, self.slow_period),
        ) else {
            return SignalType::Hold;
        };

        let bullish_cross = fast_prev <= slow_prev && fast_now > slow_now;
        let bearish_cross = fast_prev >= slow_prev && fast_now < slow_now;

        if bullish_cross {
            SignalType::Buy
        } else if bearish_cross {
            SignalType::Sell
        } else {
            SignalType::Hold
        }
    }

    fn parameters(&self) -> StrategyParameters {
        StrategyParameters {
            symbols: self.symbols.clone(),
            close_before_open: true,
            max_open_positions: 1,
        }
    }

    fn position_size(&self, _symbol: &str, _equity: Decimal, _entry_price: Decimal) -> Decimal {
        self.volume
    }

    fn sl_tp(
        &self,
        _symbol: &str,
        action: OrderSide,
        entry_price: Decimal,
    ) -> (Option<Decimal>, Option<Decimal>) {
        let sign = match action {
            OrderSide::Buy => Decimal::ONE,
            OrderSide::Sell => Decimal::NEGATIVE_ONE,
        };
        let sl = self
            .sl_pips
            .map(|pips| entry_price - sign * pips * self.pip_size);
        let tp = self
            .tp_pips
            .map(|pips| entry_price + sign * pips * self.pip_size);
        (sl, tp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn bar(close: Decimal) -> Bar {
        Bar {
            time: Utc::now(),
            open: close,
            high: close,
            low: close,
            close,
            volume: Decimal::ONE,
        }
    }

    fn strategy() -> MovingAverageCrossover {
        MovingAverageCrossover::new(
            12345,
            2,
            4,
            vec!["EURUSD".to_string()],
            dec!(0.1),
            Some(dec!(20)),
            Some(dec!(40)),
            dec!(0.0001),
        )
        .unwrap()
    }

    #[test]
    fn rejects_fast_period_not_less_than_slow() {
        let result = MovingAverageCrossover::new(
            1,
            5,
            5,
            vec!["EURUSD".to_string()],
            dec!(0.1),
            None,
            None,
            dec!(0.0001),
        );
        assert!(result.is_err());
    }

    #[test]
    fn detects_bullish_crossover() {
        let mut strat = strategy();
        let closes = [dec!(10), dec!(10), dec!(10), dec!(10), dec!(12), dec!(14)];
        let window: Vec<Bar> = closes.iter().map(|c| bar(*c)).collect();

        let mut last = SignalType::Hold;
        for i in 0..window.len() {
            last = strat.generate_signal(&window, i);
        }
        assert_eq!(last, SignalType::Buy);
    }

    #[test]
    fn holds_when_window_too_short() {
        let mut strat = strategy();
        let window = vec![bar(dec!(10))];
        assert_eq!(strat.generate_signal(&window, 0), SignalType::Hold);
    }

    #[test]
    fn sl_tp_applies_pip_distance_in_order_direction() {
        let strat = strategy();
        let (sl, tp) = strat.sl_tp("EURUSD", OrderSide::Buy, dec!(1.10000));
        assert_eq!(sl, Some(dec!(1.09800)));
        assert_eq!(tp, Some(dec!(1.10400)));
    }
}
