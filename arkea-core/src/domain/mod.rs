//! Domain types: bars, orders, fills, positions, closed trades.

pub mod bar;
pub mod fill;
pub mod ids;
pub mod order;
pub mod position;
pub mod trade;

pub use bar::{Bar, Timestamp};
pub use fill::{Fill, FillStatus, RejectReason};
pub use ids::{IdGen, OrderId, RunId};
pub use order::{Order, OrderKind, OrderSide};
pub use position::{Position, QUANTITY_EPSILON};
pub use trade::ClosedTrade;
