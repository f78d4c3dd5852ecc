use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

use crate::models::{Direction, PositionStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub direction: Direction,
    pub price: f64,
    pub volume: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Plan that produced this order, for log correlation.
    pub plan_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub ticket: u64,
    pub symbol: String,
    pub direction: Direction,
    pub price: f64,
    pub volume: f64,
    pub fee: f64,
    pub filled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub ticket: u64,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub volume: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub exit_price: Option<f64>,
    pub pnl: f64,
}

/// Result of a stop-modification request. A broker rejecting a change
/// smaller than its minimum modification distance reports `NoChange`,
/// which callers treat as success.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopModification {
    Moved { from: f64, to: f64 },
    NoChange,
}

#[async_trait]
pub trait ExecutionClient: Send + Sync {
    async fn open(&mut self, order: &OrderRequest) -> Result<Fill>;
    async fn modify_stop(&mut self, ticket: u64, new_stop: f64) -> Result<StopModification>;
    async fn close(
        &mut self,
        ticket: u64,
        price: f64,
        status: PositionStatus,
    ) -> Result<Position>;
    /// Minimum stop-modification distance the venue accepts, in price units.
    fn min_stop_distance(&self, symbol: &str) -> f64;
    fn open_positions(&self) -> Vec<Position>;
}

/// In-memory execution venue for the demo binary and tests. Fills orders
/// with adverse slippage and a flat fee rate, and enforces the minimum
/// stop-modification distance.
pub struct PaperExecution {
    fee_rate: f64,
    slippage_rate: f64,
    default_min_stop: f64,
    min_stop_overrides: HashMap<String, f64>,
    positions: HashMap<u64, Position>,
    closed: Vec<Position>,
    next_ticket: u64,
}

impl PaperExecution {
    pub fn new(fee_rate: f64, slippage_rate: f64, default_min_stop: f64) -> Self {
        Self {
            fee_rate,
            slippage_rate,
            default_min_stop,
            min_stop_overrides: HashMap::new(),
            positions: HashMap::new(),
            closed: Vec::new(),
            next_ticket: 0,
        }
    }

    pub fn with_min_stop(mut self, symbol: &str, distance: f64) -> Self {
        self.min_stop_overrides.insert(symbol.to_string(), distance);
        self
    }

    pub fn position(&self, ticket: u64) -> Option<&Position> {
        self.positions.get(&ticket)
    }

    pub fn closed_positions(&self) -> &[Position] {
        &self.closed
    }
}

impl Default for PaperExecution {
    fn default() -> Self {
        Self::new(0.001, 0.0005, 1.0)
    }
}

#[async_trait]
impl ExecutionClient for PaperExecution {
    async fn open(&mut self, order: &OrderRequest) -> Result<Fill> {
        if order.volume <= 0.0 {
            return Err(anyhow!("volume must be positive"));
        }

        // Adverse slippage on entry
        let fill_price = match order.direction {
            Direction::Long => order.price * (1.0 + self.slippage_rate),
            Direction::Short => order.price * (1.0 - self.slippage_rate),
        };
        let fee = fill_price * order.volume * self.fee_rate;

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let now = Utc::now();

        self.positions.insert(
            ticket,
            Position {
                ticket,
                symbol: order.symbol.clone(),
                direction: order.direction,
                entry_price: fill_price,
                volume: order.volume,
                stop_loss: order.stop_loss,
                take_profit: order.take_profit,
                status: PositionStatus::Open,
                opened_at: now,
                exit_price: None,
                pnl: 0.0,
            },
        );

        info!(
            ticket,
            symbol = %order.symbol,
            direction = %order.direction,
            price = fill_price,
            volume = order.volume,
            "paper fill"
        );

        Ok(Fill {
            ticket,
            symbol: order.symbol.clone(),
            direction: order.direction,
            price: fill_price,
            volume: order.volume,
            fee,
            filled_at: now,
        })
    }

    async fn modify_stop(&mut self, ticket: u64, new_stop: f64) -> Result<StopModification> {
        let symbol = self
            .positions
            .get(&ticket)
            .map(|p| p.symbol.clone())
            .ok_or_else(|| anyhow!("unknown ticket {ticket}"))?;
        let min_distance = self.min_stop_distance(&symbol);

        let pos = self
            .positions
            .get_mut(&ticket)
            .ok_or_else(|| anyhow!("unknown ticket {ticket}"))?;
        if (new_stop - pos.stop_loss).abs() < min_distance {
            return Ok(StopModification::NoChange);
        }

        let from = pos.stop_loss;
        pos.stop_loss = new_stop;
        Ok(StopModification::Moved { from, to: new_stop })
    }

    async fn close(
        &mut self,
        ticket: u64,
        price: f64,
        status: PositionStatus,
    ) -> Result<Position> {
        let mut pos = self
            .positions
            .remove(&ticket)
            .ok_or_else(|| anyhow!("unknown ticket {ticket}"))?;

        let exit_price = match pos.direction {
            Direction::Long => price * (1.0 - self.slippage_rate),
            Direction::Short => price * (1.0 + self.slippage_rate),
        };
        let gross = match pos.direction {
            Direction::Long => (exit_price - pos.entry_price) * pos.volume,
            Direction::Short => (pos.entry_price - exit_price) * pos.volume,
        };
        let exit_fee = exit_price * pos.volume * self.fee_rate;

        pos.exit_price = Some(exit_price);
        pos.pnl = gross - exit_fee;
        pos.status = status;

        info!(
            ticket,
            symbol = %pos.symbol,
            status = %status,
            pnl = pos.pnl,
            "paper close"
        );

        self.closed.push(pos.clone());
        Ok(pos)
    }

    fn min_stop_distance(&self, symbol: &str) -> f64 {
        self.min_stop_overrides
            .get(symbol)
            .copied()
            .unwrap_or(self.default_min_stop)
    }

    fn open_positions(&self) -> Vec<Position> {
        self.positions.values().cloned().collect()
    }
}
