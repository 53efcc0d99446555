//! Production and financial model driven by aggregate plant health.
//!
//! The model owns the facility totals (biomass, ready harvest, cumulative
//! profit). It is moved into the production unit and mutated only there.

use chrono::{DateTime, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{FinancialRecord, ProductionRecord, SensorState};

// ---

/// Efficiency used before any sensor has reported, or when the snapshot
/// cannot be read.
pub const COLD_START_EFFICIENCY: f64 = 0.5;

/// Fraction of states that are OK; [`COLD_START_EFFICIENCY`] when empty.
pub fn efficiency<I>(states: I) -> f64
where
    I: IntoIterator<Item = SensorState>,
{
    // ---
    let (ok, total) = states.into_iter().fold((0u32, 0u32), |(ok, total), state| {
        (ok + u32::from(state == SensorState::Ok), total + 1)
    });

    if total == 0 {
        COLD_START_EFFICIENCY
    } else {
        f64::from(ok) / f64::from(total)
    }
}

/// Facility-wide accumulators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProductionState {
    pub biomass_kg: f64,
    pub harvest_kg: f64,
    pub cumulative_profit: f64,
}

impl Default for ProductionState {
    /// Starting stock, with the initial capital outlay as a negative profit.
    fn default() -> Self {
        ProductionState {
            biomass_kg: 100.0,
            harvest_kg: 0.0,
            cumulative_profit: -1000.0,
        }
    }
}

/// Prices, costs and growth rates of the model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProductionParams {
    pub harvest_price_per_kg: f64,
    pub fish_price_per_kg: f64,
    /// Operating cost charged every cycle.
    pub hourly_cost: f64,
    /// Chance per cycle that a sale happens.
    pub sale_probability: f64,
    /// Share of the biomass sold with each sale.
    pub fish_sale_fraction: f64,
    /// Per-cycle biomass growth range at full efficiency, kg.
    pub biomass_growth: (f64, f64),
    /// Per-cycle harvest growth range at full efficiency, kg.
    pub harvest_growth: (f64, f64),
    pub initial: ProductionState,
}

impl Default for ProductionParams {
    fn default() -> Self {
        ProductionParams {
            harvest_price_per_kg: 3.5,
            fish_price_per_kg: 8.0,
            hourly_cost: 5.0,
            sale_probability: 0.1,
            fish_sale_fraction: 0.1,
            biomass_growth: (0.5, 1.5),
            harvest_growth: (1.0, 3.0),
            initial: ProductionState::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sale {
    pub harvest_kg: f64,
    pub fish_kg: f64,
    pub revenue: f64,
}

/// Records produced by one cycle, ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    pub efficiency: f64,
    pub production: ProductionRecord,
    pub financial: FinancialRecord,
    pub sale: Option<Sale>,
}

pub struct ProductionModel {
    params: ProductionParams,
    state: ProductionState,
    rng: StdRng,
}

impl ProductionModel {
    // ---
    pub fn new(params: ProductionParams) -> Self {
        Self::with_rng(params, StdRng::from_entropy())
    }

    pub fn with_seed(params: ProductionParams, seed: u64) -> Self {
        Self::with_rng(params, StdRng::seed_from_u64(seed))
    }

    fn with_rng(params: ProductionParams, rng: StdRng) -> Self {
        ProductionModel {
            params,
            state: params.initial,
            rng,
        }
    }

    pub fn state(&self) -> &ProductionState {
        &self.state
    }

    /// Grow, maybe sell, and settle one period at the given efficiency.
    pub fn cycle(&mut self, efficiency: f64, timestamp: DateTime<Utc>) -> CycleOutcome {
        // ---
        let efficiency = efficiency.clamp(0.0, 1.0);
        let p = self.params;

        // Step 1: growth scaled by plant health
        let (lo, hi) = p.biomass_growth;
        self.state.biomass_kg += self.rng.gen_range(lo..=hi) * efficiency;
        let (lo, hi) = p.harvest_growth;
        self.state.harvest_kg += self.rng.gen_range(lo..=hi) * efficiency;

        let production = ProductionRecord {
            timestamp,
            biomass_kg: self.state.biomass_kg,
            harvest_kg: self.state.harvest_kg,
            note: "Hourly growth".to_string(),
        };

        // Step 2: occasional sale of the whole harvest and part of the stock
        let sale = (self.rng.gen::<f64>() < p.sale_probability).then(|| {
            let harvest_kg = self.state.harvest_kg;
            let fish_kg = self.state.biomass_kg * p.fish_sale_fraction;
            self.state.harvest_kg = 0.0;
            self.state.biomass_kg -= fish_kg;
            Sale {
                harvest_kg,
                fish_kg,
                revenue: harvest_kg * p.harvest_price_per_kg + fish_kg * p.fish_price_per_kg,
            }
        });

        // Step 3: settle the period
        let revenue = sale.map_or(0.0, |s| s.revenue);
        let period_profit = revenue - p.hourly_cost;
        self.state.cumulative_profit += period_profit;

        let note = match &sale {
            Some(s) => format!(
                "Sale: {:.1} kg produce, {:.1} kg fish",
                s.harvest_kg, s.fish_kg
            ),
            None => "Operating costs".to_string(),
        };

        CycleOutcome {
            efficiency,
            production,
            financial: FinancialRecord {
                timestamp,
                revenue,
                cost: p.hourly_cost,
                period_profit,
                cumulative_profit: self.state.cumulative_profit,
                note,
            },
            sale,
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn no_sale() -> ProductionParams {
        ProductionParams {
            sale_probability: 0.0,
            ..ProductionParams::default()
        }
    }

    fn always_sell() -> ProductionParams {
        ProductionParams {
            sale_probability: 1.0,
            ..ProductionParams::default()
        }
    }

    #[test]
    fn test_efficiency_cold_start() {
        // ---
        assert_eq!(efficiency(Vec::<SensorState>::new()), 0.5);
    }

    #[test]
    fn test_efficiency_ratio() {
        // ---
        let states = [
            SensorState::Ok,
            SensorState::Ok,
            SensorState::Warning,
            SensorState::Critical,
        ];
        assert_eq!(efficiency(states), 0.5);
        assert_eq!(efficiency([SensorState::Ok; 3]), 1.0);
        assert_eq!(efficiency([SensorState::Critical, SensorState::Unknown]), 0.0);
    }

    #[test]
    fn test_cycle_without_sale_charges_hourly_cost() {
        // ---
        let mut model = ProductionModel::with_seed(no_sale(), 1);
        let outcome = model.cycle(0.8, Utc::now());

        assert!(outcome.sale.is_none());
        assert_eq!(outcome.financial.revenue, 0.0);
        assert_eq!(outcome.financial.cost, 5.0);
        assert_eq!(outcome.financial.period_profit, -5.0);
        assert_eq!(outcome.financial.cumulative_profit, -1005.0);
        assert_eq!(outcome.financial.note, "Operating costs");
        assert_eq!(model.state().cumulative_profit, -1005.0);
    }

    #[test]
    fn test_growth_scales_with_efficiency() {
        // ---
        let mut model = ProductionModel::with_seed(no_sale(), 2);
        let outcome = model.cycle(1.0, Utc::now());
        assert!((100.5..=101.5).contains(&outcome.production.biomass_kg));
        assert!((1.0..=3.0).contains(&outcome.production.harvest_kg));
        assert_eq!(outcome.production.note, "Hourly growth");

        // Nothing grows when every sensor is out of range
        let mut stalled = ProductionModel::with_seed(no_sale(), 2);
        let outcome = stalled.cycle(0.0, Utc::now());
        assert_eq!(outcome.production.biomass_kg, 100.0);
        assert_eq!(outcome.production.harvest_kg, 0.0);
    }

    #[test]
    fn test_sale_converts_harvest_and_fish() {
        // ---
        let mut model = ProductionModel::with_seed(always_sell(), 3);
        let outcome = model.cycle(1.0, Utc::now());
        let sale = outcome.sale.expect("sale forced by probability 1");

        let grown_biomass = outcome.production.biomass_kg;
        assert_eq!(sale.harvest_kg, outcome.production.harvest_kg);
        assert!((sale.fish_kg - grown_biomass * 0.1).abs() < 1e-9);
        assert!((sale.revenue - (sale.harvest_kg * 3.5 + sale.fish_kg * 8.0)).abs() < 1e-9);

        assert_eq!(model.state().harvest_kg, 0.0);
        assert!((model.state().biomass_kg - grown_biomass * 0.9).abs() < 1e-9);

        let financial = &outcome.financial;
        assert_eq!(financial.revenue, sale.revenue);
        assert!((financial.period_profit - (sale.revenue - 5.0)).abs() < 1e-9);
        assert!((financial.cumulative_profit - (-1000.0 + sale.revenue - 5.0)).abs() < 1e-9);
        assert!(financial.note.starts_with("Sale: "));
    }

    #[test]
    fn test_cumulative_profit_accumulates() {
        // ---
        let mut model = ProductionModel::with_seed(no_sale(), 4);
        for _ in 0..10 {
            model.cycle(0.5, Utc::now());
        }
        assert_eq!(model.state().cumulative_profit, -1050.0);
        assert!(model.state().biomass_kg > 100.0);
    }
}
