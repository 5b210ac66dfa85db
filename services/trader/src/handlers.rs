//! The IPC request catalog: every `request_type` the trader serves, wired to
//! the engine, executor, strategy harness, param store and scheduler.
//!
//! Handlers decode their payloads into typed records and answer JSON values;
//! failures surface as `{success:false, error}` on the same request id.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use qtrader_common::errors::{TraderError, TraderResult};
use qtrader_common::types::{Direction, Offset, OrderRequest};

use crate::engine::TradingEngine;
use crate::executor::OrderCmdExecutor;
use crate::ipc::{decode_payload, IpcServer};
use crate::params::SystemParamStore;
use crate::scheduler::TaskScheduler;
use crate::strategy::{Signal, StrategyManager};

/// Shared handles the handlers close over
#[derive(Clone)]
pub struct HandlerContext {
    /// Trading engine
    pub engine: Arc<TradingEngine>,
    /// Order-command executor
    pub executor: OrderCmdExecutor,
    /// Strategy harness
    pub strategies: StrategyManager,
    /// System parameter store
    pub params: Arc<SystemParamStore>,
    /// Job scheduler
    pub scheduler: TaskScheduler,
}

#[derive(Deserialize)]
struct SymbolsPayload {
    symbols: Vec<String>,
}

#[derive(Deserialize)]
struct OrderIdPayload {
    order_id: String,
}

#[derive(Deserialize)]
struct TradeIdPayload {
    trade_id: String,
}

#[derive(Debug, Deserialize)]
struct OrderReqPayload {
    symbol: String,
    direction: Direction,
    offset: Offset,
    volume: i64,
    #[serde(default)]
    price: Option<f64>,
}

#[derive(Deserialize)]
struct StrategyIdPayload {
    strategy_id: String,
}

#[derive(Deserialize)]
struct StrategyParamsPayload {
    strategy_id: String,
    params: rustc_hash::FxHashMap<String, Value>,
}

#[derive(Deserialize)]
struct StrategySignalPayload {
    strategy_id: String,
    signal: Signal,
}

#[derive(Deserialize)]
struct TradingStatusPayload {
    strategy_id: String,
    status: TradingStatusFields,
}

#[derive(Deserialize)]
struct TradingStatusFields {
    #[serde(default)]
    opening_paused: Option<bool>,
    #[serde(default)]
    closing_paused: Option<bool>,
}

#[derive(Deserialize)]
struct StrategyCmdsPayload {
    strategy_id: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Deserialize)]
struct ParamGroupPayload {
    #[serde(default)]
    group: Option<String>,
}

#[derive(Deserialize)]
struct ParamKeyPayload {
    key: String,
}

#[derive(Deserialize)]
struct ParamUpdatePayload {
    key: String,
    value: String,
}

#[derive(Deserialize)]
struct GroupPayload {
    group: String,
}

fn ok_message() -> Value {
    json!({"success": true, "message": "ok"})
}

fn to_json<T: serde::Serialize>(value: T) -> TraderResult<Value> {
    serde_json::to_value(value).map_err(|e| TraderError::Protocol(e.to_string()))
}

/// Register the full request catalog on the server
pub fn register_all(server: &IpcServer, ctx: HandlerContext) {
    register_gateway_control(server, &ctx);
    register_queries(server, &ctx);
    register_trading(server, &ctx);
    register_strategy_admin(server, &ctx);
    register_system_params(server, &ctx);
}

fn register_gateway_control(server: &IpcServer, ctx: &HandlerContext) {
    let engine = ctx.engine.clone();
    server.register("connect_gateway", move |_| {
        let engine = engine.clone();
        async move {
            engine.connect();
            Ok(Value::Bool(true))
        }
    });

    let engine = ctx.engine.clone();
    server.register("disconnect_gateway", move |_| {
        let engine = engine.clone();
        async move { Ok(Value::Bool(engine.disconnect().await?)) }
    });

    let engine = ctx.engine.clone();
    server.register("pause_trading", move |_| {
        let engine = engine.clone();
        async move {
            engine.pause();
            Ok(Value::Bool(true))
        }
    });

    let engine = ctx.engine.clone();
    server.register("resume_trading", move |_| {
        let engine = engine.clone();
        async move {
            engine.resume();
            Ok(Value::Bool(true))
        }
    });

    let engine = ctx.engine.clone();
    server.register("subscribe", move |data| {
        let engine = engine.clone();
        async move {
            let payload: SymbolsPayload = decode_payload(data)?;
            Ok(Value::Bool(engine.subscribe_symbols(&payload.symbols).await?))
        }
    });

    let engine = ctx.engine.clone();
    server.register("unsubscribe", move |data| {
        let engine = engine.clone();
        async move {
            let payload: SymbolsPayload = decode_payload(data)?;
            Ok(Value::Bool(
                engine.unsubscribe_symbols(&payload.symbols).await?,
            ))
        }
    });

    server.register("ping", |_| async { Ok(json!({"pong": true})) });
}

fn register_queries(server: &IpcServer, ctx: &HandlerContext) {
    let engine = ctx.engine.clone();
    server.register("get_account", move |_| {
        let engine = engine.clone();
        async move { to_json(engine.account()) }
    });

    let engine = ctx.engine.clone();
    server.register("get_order", move |data| {
        let engine = engine.clone();
        async move {
            let payload: OrderIdPayload = decode_payload(data)?;
            to_json(engine.order(&payload.order_id))
        }
    });

    let engine = ctx.engine.clone();
    server.register("get_orders", move |_| {
        let engine = engine.clone();
        async move { to_json(engine.orders()) }
    });

    let engine = ctx.engine.clone();
    server.register("get_active_orders", move |_| {
        let engine = engine.clone();
        async move { to_json(engine.active_orders()) }
    });

    let engine = ctx.engine.clone();
    server.register("get_trade", move |data| {
        let engine = engine.clone();
        async move {
            let payload: TradeIdPayload = decode_payload(data)?;
            to_json(engine.trade(&payload.trade_id))
        }
    });

    let engine = ctx.engine.clone();
    server.register("get_trades", move |_| {
        let engine = engine.clone();
        async move { to_json(engine.trades()) }
    });

    let engine = ctx.engine.clone();
    server.register("get_positions", move |_| {
        let engine = engine.clone();
        async move { to_json(engine.positions()) }
    });

    let engine = ctx.engine.clone();
    server.register("get_quotes", move |_| {
        let engine = engine.clone();
        async move { to_json(engine.quotes()) }
    });

    let scheduler = ctx.scheduler.clone();
    server.register("get_jobs", move |_| {
        let scheduler = scheduler.clone();
        async move { to_json(scheduler.jobs()) }
    });
}

fn register_trading(server: &IpcServer, ctx: &HandlerContext) {
    let engine = ctx.engine.clone();
    server.register("order_req", move |data| {
        let engine = engine.clone();
        async move {
            let payload: OrderReqPayload = decode_payload(data)?;
            let order = engine
                .insert_order(OrderRequest {
                    symbol: payload.symbol,
                    direction: payload.direction,
                    offset: payload.offset,
                    volume: payload.volume,
                    price: payload.price,
                })
                .await?;
            Ok(Value::String(order.order_id))
        }
    });

    let engine = ctx.engine.clone();
    server.register("cancel_req", move |data| {
        let engine = engine.clone();
        async move {
            let payload: OrderIdPayload = decode_payload(data)?;
            Ok(Value::Bool(engine.cancel_order(&payload.order_id).await?))
        }
    });
}

fn register_strategy_admin(server: &IpcServer, ctx: &HandlerContext) {
    let strategies = ctx.strategies.clone();
    server.register("list_strategies", move |_| {
        let strategies = strategies.clone();
        async move { to_json(strategies.list_status().await) }
    });

    let strategies = ctx.strategies.clone();
    server.register("get_strategy", move |data| {
        let strategies = strategies.clone();
        async move {
            let payload: StrategyIdPayload = decode_payload(data)?;
            to_json(strategies.status(&payload.strategy_id).await)
        }
    });

    for (name, enabled) in [("start_strategy", true), ("stop_strategy", false)] {
        let strategies = ctx.strategies.clone();
        server.register(name, move |data| {
            let strategies = strategies.clone();
            async move {
                let payload: StrategyIdPayload = decode_payload(data)?;
                Ok(Value::Bool(
                    strategies.set_enabled(&payload.strategy_id, enabled).await,
                ))
            }
        });
    }

    for (name, enabled) in [("start_all_strategies", true), ("stop_all_strategies", false)] {
        let strategies = ctx.strategies.clone();
        server.register(name, move |_| {
            let strategies = strategies.clone();
            async move { Ok(Value::Bool(strategies.set_all_enabled(enabled).await)) }
        });
    }

    let strategies = ctx.strategies.clone();
    server.register("init_strategy", move |data| {
        let strategies = strategies.clone();
        async move {
            let payload: StrategyIdPayload = decode_payload(data)?;
            strategies.init_strategy(&payload.strategy_id).await?;
            Ok(ok_message())
        }
    });

    let strategies = ctx.strategies.clone();
    server.register("update_strategy_params", move |data| {
        let strategies = strategies.clone();
        async move {
            let payload: StrategyParamsPayload = decode_payload(data)?;
            strategies
                .update_params(&payload.strategy_id, &payload.params)
                .await?;
            Ok(ok_message())
        }
    });

    let strategies = ctx.strategies.clone();
    server.register("update_strategy_signal", move |data| {
        let strategies = strategies.clone();
        async move {
            let payload: StrategySignalPayload = decode_payload(data)?;
            strategies
                .update_signal(&payload.strategy_id, payload.signal)
                .await?;
            Ok(ok_message())
        }
    });

    let strategies = ctx.strategies.clone();
    server.register("set_strategy_trading_status", move |data| {
        let strategies = strategies.clone();
        async move {
            let payload: TradingStatusPayload = decode_payload(data)?;
            let (opening_paused, closing_paused) = strategies
                .set_trading_status(
                    &payload.strategy_id,
                    payload.status.opening_paused,
                    payload.status.closing_paused,
                )
                .await?;
            Ok(json!({
                "success": true,
                "message": "ok",
                "data": {
                    "opening_paused": opening_paused,
                    "closing_paused": closing_paused,
                },
            }))
        }
    });

    for (name, enabled) in [("enable_strategy", true), ("disable_strategy", false)] {
        let strategies = ctx.strategies.clone();
        server.register(name, move |data| {
            let strategies = strategies.clone();
            async move {
                let payload: StrategyIdPayload = decode_payload(data)?;
                if strategies.set_enabled(&payload.strategy_id, enabled).await {
                    Ok(ok_message())
                } else {
                    Err(TraderError::Strategy(format!(
                        "unknown strategy: {}",
                        payload.strategy_id
                    )))
                }
            }
        });
    }

    let strategies = ctx.strategies.clone();
    server.register("reload_strategy_params", move |data| {
        let strategies = strategies.clone();
        async move {
            let payload: StrategyIdPayload = decode_payload(data)?;
            strategies.reload_params(&payload.strategy_id).await?;
            Ok(ok_message())
        }
    });

    let strategies = ctx.strategies.clone();
    server.register("get_strategy_order_cmds", move |data| {
        let strategies = strategies.clone();
        async move {
            let payload: StrategyCmdsPayload = decode_payload(data)?;
            to_json(
                strategies
                    .order_cmds(&payload.strategy_id, payload.status.as_deref())
                    .await,
            )
        }
    });
}

fn register_system_params(server: &IpcServer, ctx: &HandlerContext) {
    let params = ctx.params.clone();
    server.register("list_system_params", move |data| {
        let params = params.clone();
        async move {
            let payload: ParamGroupPayload = if data.is_null() {
                ParamGroupPayload { group: None }
            } else {
                decode_payload(data)?
            };
            to_json(params.list(payload.group.as_deref()))
        }
    });

    let params = ctx.params.clone();
    server.register("get_system_param", move |data| {
        let params = params.clone();
        async move {
            let payload: ParamKeyPayload = decode_payload(data)?;
            to_json(params.get(&payload.key))
        }
    });

    let params = ctx.params.clone();
    server.register("update_system_param", move |data| {
        let params = params.clone();
        async move {
            let payload: ParamUpdatePayload = decode_payload(data)?;
            to_json(params.update(&payload.key, &payload.value))
        }
    });

    let params = ctx.params.clone();
    server.register("get_system_params_by_group", move |data| {
        let params = params.clone();
        async move {
            let payload: GroupPayload = decode_payload(data)?;
            to_json(params.group(&payload.group))
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_req_payload_decoding() {
        let payload: OrderReqPayload = decode_payload(json!({
            "symbol": "rb2505",
            "direction": "buy",
            "offset": "open",
            "volume": 3,
            "price": 3500.0,
        }))
        .unwrap();
        assert_eq!(payload.symbol, "rb2505");
        assert_eq!(payload.direction, Direction::Buy);
        assert_eq!(payload.offset, Offset::Open);
        assert_eq!(payload.price, Some(3500.0));

        // Market orders omit the price.
        let payload: OrderReqPayload = decode_payload(json!({
            "symbol": "rb2505",
            "direction": "sell",
            "offset": "close",
            "volume": 1,
        }))
        .unwrap();
        assert_eq!(payload.price, None);

        let err = decode_payload::<OrderReqPayload>(json!({"symbol": "x"})).unwrap_err();
        assert_eq!(err.kind(), "protocol");
    }

    #[test]
    fn test_trading_status_payload_partial() {
        let payload: TradingStatusPayload = decode_payload(json!({
            "strategy_id": "s1",
            "status": {"opening_paused": true},
        }))
        .unwrap();
        assert_eq!(payload.status.opening_paused, Some(true));
        assert_eq!(payload.status.closing_paused, None);
    }
}
