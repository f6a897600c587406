//! In-memory paper exchange.
//!
//! Fills limit orders when the marked price crosses them and market orders
//! immediately at the last marked price. Positions are netted per symbol.
//! Used by the integration tests and the paper trading example.

use crate::exchange::{ExchangeError, ExchangeGateway, FillEvent, OrderRef, PositionSnapshot};
use async_trait::async_trait;
use chrono::Utc;
use shared::models::Side;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

struct OpenOrder {
    order: OrderRef,
    fill: Option<FillEvent>,
    fill_consumed: bool,
}

#[derive(Default)]
struct Book {
    orders: HashMap<String, OpenOrder>,
    positions: HashMap<String, PositionSnapshot>,
    last_price: HashMap<String, f64>,
}

/// Paper implementation of [`ExchangeGateway`].
pub struct PaperExchange {
    book: Mutex<Book>,
    fee_rate: f64,
}

impl PaperExchange {
    pub fn new(fee_rate: f64) -> Self {
        Self { book: Mutex::new(Book::default()), fee_rate }
    }

    /// Mark a new price for a symbol and fill any crossed limit orders.
    pub fn mark_price(&self, symbol: &str, price: f64) {
        let mut book = self.book.lock().unwrap();
        book.last_price.insert(symbol.to_string(), price);

        let fee_rate = self.fee_rate;
        let mut fills = Vec::new();
        for open in book.orders.values_mut() {
            if open.fill.is_some() || open.order.symbol != symbol {
                continue;
            }
            let crossed = match (open.order.side, open.order.price) {
                (Side::Buy, Some(limit)) => price <= limit,
                (Side::Sell, Some(limit)) => price >= limit,
                // market orders fill on the first mark after placement
                (_, None) => true,
            };
            if crossed {
                let fill_price = open.order.price.unwrap_or(price);
                let fill = FillEvent {
                    order_id: open.order.id.clone(),
                    symbol: symbol.to_string(),
                    side: open.order.side,
                    price: fill_price,
                    qty: open.order.qty,
                    fee: fill_price * open.order.qty * fee_rate,
                    filled_at: Utc::now(),
                };
                debug!(order_id = %fill.order_id, price = fill_price, "paper fill");
                open.fill = Some(fill.clone());
                fills.push(fill);
            }
        }
        for fill in fills {
            Self::apply_to_position(&mut book, &fill);
        }
    }

    fn apply_to_position(book: &mut Book, fill: &FillEvent) {
        let entry = book.positions.remove(&fill.symbol);
        let next = match entry {
            None => Some(PositionSnapshot {
                side: fill.side,
                entry_price: fill.price,
                size: fill.qty,
                leverage: 1.0,
            }),
            Some(mut position) if position.side == fill.side => {
                // same direction: average in
                let total = position.size + fill.qty;
                position.entry_price =
                    (position.entry_price * position.size + fill.price * fill.qty) / total;
                position.size = total;
                Some(position)
            }
            Some(mut position) => {
                if fill.qty >= position.size {
                    let remainder = fill.qty - position.size;
                    if remainder > f64::EPSILON {
                        Some(PositionSnapshot {
                            side: fill.side,
                            entry_price: fill.price,
                            size: remainder,
                            leverage: 1.0,
                        })
                    } else {
                        None
                    }
                } else {
                    position.size -= fill.qty;
                    Some(position)
                }
            }
        };
        if let Some(position) = next {
            book.positions.insert(fill.symbol.clone(), position);
        }
    }
}

#[async_trait]
impl ExchangeGateway for PaperExchange {
    async fn place_order(
        &self,
        symbol: &str,
        side: Side,
        qty: f64,
        price: Option<f64>,
    ) -> Result<OrderRef, ExchangeError> {
        if qty <= 0.0 {
            return Err(ExchangeError::Rejected("quantity must be positive".into()));
        }
        let mut book = self.book.lock().unwrap();
        if price.is_none() && !book.last_price.contains_key(symbol) {
            return Err(ExchangeError::Rejected(format!("no market price for {symbol}")));
        }
        let order = OrderRef {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side,
            qty,
            price,
        };
        // market orders fill against the last marked price right away
        let fill = price.is_none().then(|| {
            let fill_price = book.last_price[symbol];
            FillEvent {
                order_id: order.id.clone(),
                symbol: symbol.to_string(),
                side,
                price: fill_price,
                qty,
                fee: fill_price * qty * self.fee_rate,
                filled_at: Utc::now(),
            }
        });
        if let Some(ref fill) = fill {
            Self::apply_to_position(&mut book, fill);
        }
        book.orders.insert(
            order.id.clone(),
            OpenOrder { order: order.clone(), fill, fill_consumed: false },
        );
        Ok(order)
    }

    async fn cancel_order(&self, order: &OrderRef) -> Result<(), ExchangeError> {
        let mut book = self.book.lock().unwrap();
        match book.orders.get(&order.id) {
            Some(open) if open.fill.is_none() => {
                book.orders.remove(&order.id);
                Ok(())
            }
            Some(_) => Err(ExchangeError::Rejected("order already filled".into())),
            None => Ok(()), // cancelling an unknown/cancelled order is a no-op
        }
    }

    async fn get_fills(&self, order: &OrderRef) -> Result<Option<FillEvent>, ExchangeError> {
        let mut book = self.book.lock().unwrap();
        if let Some(open) = book.orders.get_mut(&order.id) {
            if let Some(fill) = open.fill.clone() {
                if !open.fill_consumed {
                    open.fill_consumed = true;
                    return Ok(Some(fill));
                }
            }
        }
        Ok(None)
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<PositionSnapshot>, ExchangeError> {
        let book = self.book.lock().unwrap();
        Ok(book.positions.get(symbol).cloned())
    }
}
