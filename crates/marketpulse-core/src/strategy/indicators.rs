//! Indicator series aligned with their input: index `i` uses inputs `0..=i`,
//! and positions without enough history hold `NaN`.

/// Simple moving average over `period` values.
pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    let mut result = vec![f64::NAN; values.len()];
    if period == 0 || values.len() < period {
        return result;
    }

    let mut sum: f64 = values[..period].iter().sum();
    result[period - 1] = sum / period as f64;
    for index in period..values.len() {
        sum += values[index] - values[index - period];
        result[index] = sum / period as f64;
    }
    result
}

/// Wilder-smoothed relative strength index.
///
/// A window without losses reads 100, one without gains reads 0.
pub fn rsi(closes: &[f64], period: usize) -> Vec<f64> {
    let mut result = vec![f64::NAN; closes.len()];
    if period == 0 || closes.len() < period + 1 {
        return result;
    }

    let (mut avg_gain, mut avg_loss) = (0.0, 0.0);
    for index in 1..=period {
        let change = closes[index] - closes[index - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss -= change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    result[period] = rsi_value(avg_gain, avg_loss);

    let smoothing = period as f64;
    for index in (period + 1)..closes.len() {
        let change = closes[index] - closes[index - 1];
        let (gain, loss) = if change > 0.0 { (change, 0.0) } else { (0.0, -change) };
        avg_gain = (avg_gain * (smoothing - 1.0) + gain) / smoothing;
        avg_loss = (avg_loss * (smoothing - 1.0) + loss) / smoothing;
        result[index] = rsi_value(avg_gain, avg_loss);
    }
    result
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            50.0
        } else {
            100.0
        }
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_leaves_warmup_as_nan() {
        let values = sma(&[1.0, 2.0, 3.0, 4.0], 3);
        assert!(values[0].is_nan() && values[1].is_nan());
        assert_eq!(values[2], 2.0);
        assert_eq!(values[3], 3.0);
    }

    #[test]
    fn rsi_extremes() {
        let rising: Vec<f64> = (0..20).map(f64::from).collect();
        let falling: Vec<f64> = rising.iter().rev().copied().collect();

        assert_eq!(rsi(&rising, 14)[19], 100.0);
        assert_eq!(rsi(&falling, 14)[19], 0.0);
        assert!(rsi(&rising, 14)[13].is_nan());
    }
}
