// Thin request/response façade over the venue's order/cancel/query/fill
// operations, covering the five operations the quoting core actually
// drives. Every operation returns a tagged result rather than relying on
// exceptions.
use async_trait::async_trait;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn is_buy(self) -> bool {
        matches!(self, Side::Buy)
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tif {
    Gtc,
    Ioc,
}

impl Tif {
    pub fn as_wire(self) -> &'static str {
        match self {
            Tif::Gtc => "Gtc",
            Tif::Ioc => "Ioc",
        }
    }
}

/// A single Gateway error type reused across operations (one enum, not one
/// per operation); callers only ever match the variants that are meaningful
/// for the call they made.
#[derive(Debug, Clone)]
pub enum GatewayError {
    Transport(String),
    Rejected(String),
    /// cancel(): the venue no longer knows this order id. Treated as success
    /// by callers.
    Unknown,
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Transport(s) => write!(f, "transport error: {s}"),
            GatewayError::Rejected(s) => write!(f, "rejected: {s}"),
            GatewayError::Unknown => write!(f, "unknown order id"),
        }
    }
}

impl std::error::Error for GatewayError {}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaceResult {
    Resting { oid: u64 },
    Filled { qty: f64, avg_px: f64 },
}

#[derive(Debug, Clone)]
pub struct OpenOrderInfo {
    pub oid: u64,
    pub coin: String,
    pub side: Side,
    pub price: f64,
    pub remaining_size: f64,
    pub opened_at: u64,
}

#[derive(Debug, Clone)]
pub struct FillInfo {
    pub hash: String,
    pub coin: String,
    pub side: Side,
    pub size: f64,
    pub price: f64,
    pub fee: f64,
    pub ts: u64,
}

/// A single (coin, order_id) to cancel in a `bulk_cancel` call.
#[derive(Debug, Clone)]
pub struct CancelRequest {
    pub coin: String,
    pub oid: u64,
}

#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn place(
        &self,
        pair: &str,
        side: Side,
        price: f64,
        size: f64,
        tif: Tif,
        reduce_only: bool,
    ) -> Result<PlaceResult, GatewayError>;

    async fn cancel(&self, coin: &str, oid: u64) -> Result<(), GatewayError>;

    /// Returns per-id outcomes; only the outer `Transport` failure short-
    /// circuits the whole call.
    async fn bulk_cancel(
        &self,
        cancels: &[CancelRequest],
    ) -> Result<Vec<(u64, Result<(), GatewayError>)>, GatewayError>;

    async fn open_orders(&self, address: &str) -> Result<Vec<OpenOrderInfo>, GatewayError>;

    async fn user_fills(&self, address: &str) -> Result<Vec<FillInfo>, GatewayError>;
}
