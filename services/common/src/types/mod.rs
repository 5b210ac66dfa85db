//! Canonical data model shared by the manager and trader processes

pub mod enums;
pub mod market;
pub mod trading;
pub mod views;

pub use enums::{
    CmdStatus, Direction, Interval, Offset, OrderStatus, PosSide, PriceType, SplitStrategy,
    TraderState,
};
pub use market::{parse_symbol, std_symbol, BarData, ContractData, TickData};
pub use trading::{
    AccountData, CancelRequest, OrderData, OrderRequest, PositionData, TradeData, REJECT_KEYWORDS,
};
pub use views::{
    AccountStatusUpdate, JobView, OrderCmdView, ParamDefinition, StrategyStatus, SystemParam,
    TraderStatusView,
};
