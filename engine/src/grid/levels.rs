//! Grid level price computation.

use shared::models::{GridConfig, GridMode};

/// Equal absolute spacing between adjacent levels.
pub fn arithmetic_spacing(lower: f64, upper: f64, grid_count: u32) -> f64 {
    (upper - lower) / (grid_count - 1) as f64
}

/// Equal price ratio between adjacent levels.
pub fn geometric_ratio(lower: f64, upper: f64, grid_count: u32) -> f64 {
    (upper / lower).powf(1.0 / (grid_count - 1) as f64)
}

/// All level prices, ascending, index 0 at the lower bound. Computed once at
/// grid (re)arm time and never mid-cycle.
pub fn grid_prices(config: &GridConfig) -> Vec<f64> {
    let GridConfig { lower_price, upper_price, grid_count, mode, .. } = *config;
    match mode {
        GridMode::Arithmetic => {
            let spacing = arithmetic_spacing(lower_price, upper_price, grid_count);
            (0..grid_count).map(|i| lower_price + spacing * i as f64).collect()
        }
        GridMode::Geometric => {
            let ratio = geometric_ratio(lower_price, upper_price, grid_count);
            (0..grid_count).map(|i| lower_price * ratio.powi(i as i32)).collect()
        }
    }
}

/// The sell target one level above a buy level.
pub fn next_level_up(config: &GridConfig, grid_price: f64) -> f64 {
    match config.mode {
        GridMode::Arithmetic => {
            grid_price + arithmetic_spacing(config.lower_price, config.upper_price, config.grid_count)
        }
        GridMode::Geometric => {
            grid_price * geometric_ratio(config.lower_price, config.upper_price, config.grid_count)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::GridMode;

    #[test]
    fn test_arithmetic_levels_match_known_scenario() {
        // 90k..100k split into 10 levels
        let config =
            GridConfig::new("bot", 90_000.0, 100_000.0, 10, GridMode::Arithmetic, 1_000.0);
        let spacing = arithmetic_spacing(90_000.0, 100_000.0, 10);
        assert!((spacing - 1_111.11).abs() < 0.01);

        let prices = grid_prices(&config);
        assert_eq!(prices.len(), 10);
        assert_eq!(prices[0], 90_000.0);
        assert!((prices[9] - 100_000.0).abs() < 1e-6);
        assert!(prices.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_geometric_ratio_round_trips() {
        let config = GridConfig::new("bot", 90_000.0, 100_000.0, 10, GridMode::Geometric, 1_000.0);
        let ratio = geometric_ratio(90_000.0, 100_000.0, 10);
        assert!((ratio.powi(9) * 90_000.0 - 100_000.0).abs() < 1e-4);

        let prices = grid_prices(&config);
        assert_eq!(prices.len(), 10);
        assert!((prices[9] - 100_000.0).abs() < 1e-4);
        assert!(prices.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_next_level_up() {
        let config =
            GridConfig::new("bot", 90_000.0, 100_000.0, 10, GridMode::Arithmetic, 1_000.0);
        let spacing = arithmetic_spacing(90_000.0, 100_000.0, 10);
        assert!((next_level_up(&config, 90_000.0) - (90_000.0 + spacing)).abs() < 1e-9);
    }
}
