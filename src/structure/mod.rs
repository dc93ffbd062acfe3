pub mod market_structure;
pub mod swings;

pub use market_structure::{BreakDirection, MarketStructureAnalyzer, StructureEvent, StructureKind};
pub use swings::{find_swings, SwingKind, SwingPoint};
