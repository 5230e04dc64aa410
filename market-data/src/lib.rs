// Market Data
// Trading calendar plus HTTP clients for historical and real-time prices

pub mod calendar;
pub mod client;
pub mod intraday;

pub use calendar::{
    eastern_date, is_early_close_day, is_market_holiday, is_market_open, is_trading_day,
    market_close_time, next_trading_day, previous_trading_day,
};
pub use client::{PriceDataClient, PriceHistorySource};
pub use intraday::{IntradaySource, MultiSourceClient, Quote};
