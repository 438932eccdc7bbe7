//! In-memory paper broker: market data and instant-fill order execution over
//! a simulated book.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::info;

use crate::domain::config_validation::PaperSettings;
use crate::domain::error::TradeloopError;
use crate::domain::market::{Holding, OrderAck, PortfolioSnapshot, Quote, Side};
use crate::ports::execution_port::OrderExecutionProvider;
use crate::ports::market_data_port::MarketDataProvider;

const SERVICE: &str = "paper_broker";

#[derive(Debug, Clone, PartialEq)]
struct Position {
    quantity: i64,
    avg_price: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct Listing {
    price: f64,
    reference: f64,
    volume: i64,
}

#[derive(Debug, Default)]
struct PaperBook {
    cash: f64,
    positions: BTreeMap<String, Position>,
    listings: BTreeMap<String, Listing>,
    orders: u64,
}

impl PaperBook {
    fn listing(&self, ticker: &str) -> Result<&Listing, TradeloopError> {
        self.listings
            .get(ticker)
            .ok_or_else(|| TradeloopError::external(SERVICE, format!("no quote for {}", ticker)))
    }

    fn change_pct(listing: &Listing) -> f64 {
        if listing.reference > 0.0 {
            (listing.price - listing.reference) / listing.reference * 100.0
        } else {
            0.0
        }
    }
}

pub struct PaperBroker {
    book: Mutex<PaperBook>,
}

impl PaperBroker {
    pub fn new(settings: &PaperSettings) -> Self {
        let mut book = PaperBook {
            cash: settings.cash,
            ..PaperBook::default()
        };
        for (ticker, price) in &settings.quotes {
            book.listings.insert(
                ticker.clone(),
                Listing {
                    price: *price,
                    reference: *price,
                    volume: 0,
                },
            );
        }
        for holding in &settings.holdings {
            book.positions.insert(
                holding.ticker.clone(),
                Position {
                    quantity: holding.quantity,
                    avg_price: holding.avg_price,
                },
            );
        }
        Self {
            book: Mutex::new(book),
        }
    }

    /// Move a ticker's price; the first listed price stays the reference for
    /// `change_pct`.
    pub async fn set_quote(&self, ticker: &str, price: f64) {
        let mut book = self.book.lock().await;
        book.listings
            .entry(ticker.to_string())
            .and_modify(|l| l.price = price)
            .or_insert(Listing {
                price,
                reference: price,
                volume: 0,
            });
    }

    pub async fn cash(&self) -> f64 {
        self.book.lock().await.cash
    }

    pub async fn position(&self, ticker: &str) -> i64 {
        let book = self.book.lock().await;
        book.positions.get(ticker).map(|p| p.quantity).unwrap_or(0)
    }
}

#[async_trait]
impl MarketDataProvider for PaperBroker {
    async fn portfolio(&self) -> Result<PortfolioSnapshot, TradeloopError> {
        let book = self.book.lock().await;
        let holdings = book
            .positions
            .iter()
            .filter(|(_, p)| p.quantity > 0)
            .map(|(ticker, p)| Holding {
                ticker: ticker.clone(),
                quantity: p.quantity,
                avg_price: p.avg_price,
                current_price: book.listings.get(ticker).map(|l| l.price).unwrap_or(p.avg_price),
            })
            .collect();
        Ok(PortfolioSnapshot {
            cash: book.cash,
            holdings,
            taken_at: Utc::now(),
        })
    }

    async fn quote(&self, ticker: &str) -> Result<Quote, TradeloopError> {
        let book = self.book.lock().await;
        let listing = book.listing(ticker)?;
        Ok(Quote {
            ticker: ticker.to_string(),
            price: listing.price,
            change_pct: PaperBook::change_pct(listing),
            volume: listing.volume,
            quoted_at: Utc::now(),
        })
    }

    /// Supported criteria: `gainers`, `losers`, `volume`, `price`.
    async fn rankings(&self, criteria: &str) -> Result<Vec<String>, TradeloopError> {
        let book = self.book.lock().await;
        let mut listed: Vec<(&String, &Listing)> = book.listings.iter().collect();
        match criteria {
            "gainers" => listed.sort_by(|a, b| {
                PaperBook::change_pct(b.1).total_cmp(&PaperBook::change_pct(a.1))
            }),
            "losers" => listed.sort_by(|a, b| {
                PaperBook::change_pct(a.1).total_cmp(&PaperBook::change_pct(b.1))
            }),
            "volume" => listed.sort_by(|a, b| b.1.volume.cmp(&a.1.volume)),
            "price" => listed.sort_by(|a, b| b.1.price.total_cmp(&a.1.price)),
            other => {
                return Err(TradeloopError::external(
                    SERVICE,
                    format!("unsupported ranking criteria '{}'", other),
                ));
            }
        }
        Ok(listed.into_iter().map(|(t, _)| t.clone()).collect())
    }
}

#[async_trait]
impl OrderExecutionProvider for PaperBroker {
    async fn buy_capacity(&self, ticker: &str, price: f64) -> Result<i64, TradeloopError> {
        let book = self.book.lock().await;
        book.listing(ticker)?;
        if price <= 0.0 {
            return Ok(0);
        }
        Ok((book.cash / price).floor() as i64)
    }

    async fn sell_capacity(&self, ticker: &str) -> Result<i64, TradeloopError> {
        let book = self.book.lock().await;
        Ok(book.positions.get(ticker).map(|p| p.quantity).unwrap_or(0))
    }

    async fn submit_order(
        &self,
        ticker: &str,
        side: Side,
        quantity: i64,
        price: f64,
    ) -> Result<OrderAck, TradeloopError> {
        let mut book = self.book.lock().await;
        book.listing(ticker)?;
        if quantity <= 0 || price <= 0.0 {
            return Err(TradeloopError::external(SERVICE, "quantity and price must be positive"));
        }

        let cost = quantity as f64 * price;
        match side {
            Side::Buy => {
                if cost > book.cash {
                    return Err(TradeloopError::external(
                        SERVICE,
                        format!("insufficient cash: need {:.2}, have {:.2}", cost, book.cash),
                    ));
                }
                book.cash -= cost;
                let position = book.positions.entry(ticker.to_string()).or_insert(Position {
                    quantity: 0,
                    avg_price: 0.0,
                });
                let held_cost = position.quantity as f64 * position.avg_price;
                position.quantity += quantity;
                position.avg_price = (held_cost + cost) / position.quantity as f64;
            }
            Side::Sell => {
                let held = book.positions.get(ticker).map(|p| p.quantity).unwrap_or(0);
                if quantity > held {
                    return Err(TradeloopError::external(
                        SERVICE,
                        format!("cannot sell {} {}, holding {}", quantity, ticker, held),
                    ));
                }
                book.cash += cost;
                if let Some(position) = book.positions.get_mut(ticker) {
                    position.quantity -= quantity;
                }
            }
        }

        if let Some(listing) = book.listings.get_mut(ticker) {
            listing.volume += quantity;
        }
        book.orders += 1;
        let order_id = format!("paper-{:06}", book.orders);
        info!(order_id = %order_id, ticker, %side, quantity, price, "paper order filled");

        Ok(OrderAck {
            order_id,
            filled_quantity: quantity,
            fill_price: price,
        })
    }
}
