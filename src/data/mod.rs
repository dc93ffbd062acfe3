pub mod aggregate;
pub mod candle_store;
pub mod csv_loader;
pub mod synthetic;

pub use aggregate::aggregate_candles;
pub use candle_store::CandleStore;
pub use csv_loader::{load_candles, load_candles_from_path};
pub use synthetic::SyntheticSeries;
