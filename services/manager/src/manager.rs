//! Manager: the catalog of trader proxies and the unified query/command
//! surface over them.
//!
//! Account-scoped calls forward to the named proxy; cross-account queries
//! fan out over every proxy and merge, keeping positions grouped per account
//! and concatenating orders, trades and accounts. Nothing is cached here:
//! authoritative state lives in the traders.

use std::path::PathBuf;
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{info, warn};

use qtrader_common::config::AppConfig;
use qtrader_common::errors::{TraderError, TraderResult};
use qtrader_common::event_bus::EventBus;
use qtrader_common::types::{
    AccountData, OrderData, PositionData, TradeData, TraderStatusView,
};

use crate::proxy::TraderProxy;

/// The manager process core
pub struct Manager {
    config: AppConfig,
    socket_dir: PathBuf,
    bus: EventBus,
    proxies: RwLock<FxHashMap<String, TraderProxy>>,
}

impl Manager {
    /// Create the manager; the bus carries pushes from every trader
    #[must_use]
    pub fn new(config: AppConfig) -> Self {
        let bus = EventBus::default();
        bus.start();
        let socket_dir = config.socket.socket_dir.clone();
        if let Err(e) = std::fs::create_dir_all(&socket_dir) {
            warn!(dir = %socket_dir.display(), error = %e, "socket dir creation failed");
        }
        Self {
            config,
            socket_dir,
            bus,
            proxies: RwLock::new(FxHashMap::default()),
        }
    }

    /// The manager-level event bus: trader pushes republish here under the
    /// same topics, for API broadcasters to consume.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Build proxies for every configured account and start the enabled ones
    pub fn start(&self) {
        for account in &self.config.accounts {
            let proxy = TraderProxy::new(account.clone(), &self.socket_dir, self.bus.clone());
            if account.enabled {
                proxy.start();
            } else {
                info!(account_id = %account.account_id, "account disabled, proxy idle");
            }
            self.proxies
                .write()
                .insert(account.account_id.clone(), proxy);
        }
        info!(accounts = self.proxies.read().len(), "manager started");
    }

    /// Stop every proxy and the bus
    pub async fn stop(&self) {
        let proxies: Vec<TraderProxy> = self.proxies.read().values().cloned().collect();
        for proxy in proxies {
            proxy.stop().await;
        }
        self.bus.stop().await;
        info!("manager stopped");
    }

    /// The proxy for one account
    pub fn proxy(&self, account_id: &str) -> TraderResult<TraderProxy> {
        self.proxies
            .read()
            .get(account_id)
            .cloned()
            .ok_or_else(|| TraderError::Protocol(format!("unknown account: {account_id}")))
    }

    fn all_proxies(&self) -> Vec<TraderProxy> {
        let mut proxies: Vec<TraderProxy> = self.proxies.read().values().cloned().collect();
        proxies.sort_by(|a, b| a.account_id().cmp(b.account_id()));
        proxies
    }

    /// Start one trader's supervision
    pub fn start_trader(&self, account_id: &str) -> TraderResult<bool> {
        Ok(self.proxy(account_id)?.start())
    }

    /// Stop one trader's supervision
    pub async fn stop_trader(&self, account_id: &str) -> TraderResult<bool> {
        Ok(self.proxy(account_id)?.stop().await)
    }

    /// Restart one trader's supervision
    pub async fn restart_trader(&self, account_id: &str) -> TraderResult<bool> {
        Ok(self.proxy(account_id)?.restart().await)
    }

    /// Supervision status of one trader
    pub fn trader_status(&self, account_id: &str) -> TraderResult<TraderStatusView> {
        Ok(self.proxy(account_id)?.status())
    }

    /// Supervision status of every trader
    #[must_use]
    pub fn all_trader_status(&self) -> Vec<TraderStatusView> {
        self.all_proxies().iter().map(TraderProxy::status).collect()
    }

    /// Account snapshot for one account
    pub async fn get_account(&self, account_id: &str) -> TraderResult<AccountData> {
        Ok(self.proxy(account_id)?.get_account().await)
    }

    /// Account snapshots across every account
    pub async fn get_all_accounts(&self) -> Vec<AccountData> {
        let mut accounts = Vec::new();
        for proxy in self.all_proxies() {
            accounts.push(proxy.get_account().await);
        }
        accounts
    }

    /// Orders of one account, or of every account concatenated
    pub async fn get_orders(&self, account_id: Option<&str>) -> TraderResult<Vec<OrderData>> {
        match account_id {
            Some(account_id) => Ok(self.proxy(account_id)?.get_orders().await),
            None => {
                let mut orders = Vec::new();
                for proxy in self.all_proxies() {
                    orders.extend(proxy.get_orders().await);
                }
                Ok(orders)
            }
        }
    }

    /// Active orders of one account, or of every account concatenated
    pub async fn get_active_orders(
        &self,
        account_id: Option<&str>,
    ) -> TraderResult<Vec<OrderData>> {
        match account_id {
            Some(account_id) => Ok(self.proxy(account_id)?.get_active_orders().await),
            None => {
                let mut orders = Vec::new();
                for proxy in self.all_proxies() {
                    orders.extend(proxy.get_active_orders().await);
                }
                Ok(orders)
            }
        }
    }

    /// Fills of one account, or of every account concatenated
    pub async fn get_trades(&self, account_id: Option<&str>) -> TraderResult<Vec<TradeData>> {
        match account_id {
            Some(account_id) => Ok(self.proxy(account_id)?.get_trades().await),
            None => {
                let mut trades = Vec::new();
                for proxy in self.all_proxies() {
                    trades.extend(proxy.get_trades().await);
                }
                Ok(trades)
            }
        }
    }

    /// Positions grouped per account
    pub async fn get_positions(
        &self,
        account_id: Option<&str>,
    ) -> TraderResult<FxHashMap<String, Vec<PositionData>>> {
        let mut grouped = FxHashMap::default();
        match account_id {
            Some(account_id) => {
                let positions = self.proxy(account_id)?.get_positions().await;
                grouped.insert(account_id.to_string(), positions);
            }
            None => {
                for proxy in self.all_proxies() {
                    grouped.insert(proxy.account_id().to_string(), proxy.get_positions().await);
                }
            }
        }
        Ok(grouped)
    }

    /// Submit a child order on one account
    pub async fn send_order_request(
        &self,
        account_id: &str,
        symbol: &str,
        direction: &str,
        offset: &str,
        volume: i64,
        price: f64,
    ) -> TraderResult<String> {
        self.proxy(account_id)?
            .send_order_request(symbol, direction, offset, volume, price)
            .await
    }

    /// Cancel a child order on one account
    pub async fn send_cancel_request(
        &self,
        account_id: &str,
        order_id: &str,
    ) -> TraderResult<bool> {
        self.proxy(account_id)?.send_cancel_request(order_id).await
    }

    /// Forward an arbitrary catalog request to one account's trader
    pub async fn forward(
        &self,
        account_id: &str,
        request_type: &str,
        data: Value,
        timeout: Duration,
    ) -> TraderResult<Value> {
        self.proxy(account_id)?
            .send_request(request_type, data, timeout)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qtrader_common::config::AccountConfig;

    fn manager_with_accounts(dir: &std::path::Path, ids: &[&str]) -> Manager {
        let config = AppConfig {
            socket: qtrader_common::config::SocketConfig {
                socket_dir: dir.to_path_buf(),
            },
            accounts: ids
                .iter()
                .map(|id| AccountConfig {
                    account_id: (*id).to_string(),
                    enabled: true,
                    auto_spawn: false,
                    debug: false,
                    trading: Default::default(),
                    gateway: Default::default(),
                    strategies: Default::default(),
                })
                .collect(),
        };
        Manager::new(config)
    }

    #[tokio::test]
    async fn test_unknown_account_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_accounts(dir.path(), &["a1"]);
        manager.start();

        let err = manager.get_account("nope").await.unwrap_err();
        assert!(err.to_string().contains("unknown account"));
        let err = manager
            .send_cancel_request("nope", "o1")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown account"));
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_fan_out_merges_disconnected_accounts() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_accounts(dir.path(), &["a1", "a2"]);
        manager.start();

        // Nothing is running: queries degrade to empty, never error.
        assert!(manager.get_orders(None).await.unwrap().is_empty());
        assert!(manager.get_trades(None).await.unwrap().is_empty());
        let positions = manager.get_positions(None).await.unwrap();
        assert_eq!(positions.len(), 2);
        assert!(positions.values().all(Vec::is_empty));

        let accounts = manager.get_all_accounts().await;
        assert_eq!(accounts.len(), 2);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_trader_status_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_accounts(dir.path(), &["a1", "a2"]);
        manager.start();
        let statuses = manager.all_trader_status();
        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().all(|s| s.running));
        manager.stop().await;
    }
}
