//! Module/bootstrap contract (component O, §4.O). Each business module
//! (login/gate/game/world/alliance, §1 "Out of scope") is modeled here only
//! through the five-method lifecycle it must expose; the modules
//! themselves are opaque consumers of the core subsystems and live outside
//! this crate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::async_trait;
use common::errors::*;
use log::{error, info, warn};

/// One entry from the settings document's instance list (§6 "Server
/// bootstrap configuration"): `module`, `serverId`, `rpcPort`, `webPort`,
/// plus a free-form `extra` map for module-specific settings.
#[derive(Debug, Clone)]
pub struct ModuleConfig {
    pub module: String,
    pub server_id: u32,
    pub rpc_port: u16,
    pub web_port: Option<u16>,
    pub extra: std::collections::HashMap<String, String>,
}

/// Priority convention from §4.O: configuration loads before every
/// business module.
pub const CONFIG_MODULE_PRIORITY: i32 = -1000;

#[async_trait]
pub trait Module: Send + Sync {
    fn name(&self) -> &str;

    /// Lower runs earlier. §4.O: "Priority convention: configuration =
    /// -1000 (before all business modules)."
    fn priority(&self) -> i32;

    fn init(&self, config: &ModuleConfig) -> Result<()>;

    async fn start(&self) -> Result<()>;

    /// Best-effort: a stop failure is logged by the bootstrap, not
    /// propagated (§4.O "Shutdown: reverse-order stop, each stop is
    /// best-effort and logs but does not throw").
    async fn stop(&self);

    fn is_running(&self) -> bool;

    fn rpc_port(&self) -> Option<u16> {
        None
    }

    fn web_port(&self) -> Option<u16> {
        None
    }
}

/// A simple `Module` base that most business modules can embed for the
/// `is_running` bookkeeping, mirroring the `AtomicBool` pattern already
/// used by the land engine and RPC server for shutdown flags.
pub struct RunningFlag(AtomicBool);

impl Default for RunningFlag {
    fn default() -> Self {
        Self(AtomicBool::new(false))
    }
}

impl RunningFlag {
    pub fn set(&self, value: bool) {
        self.0.store(value, Ordering::SeqCst);
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Orders modules by priority, then sequences `init` and `start`; on any
/// start failure it stops everything already started, in reverse order,
/// and aborts the sequence (§4.O).
pub struct Bootstrap {
    modules: Vec<Arc<dyn Module>>,
}

impl Bootstrap {
    pub fn new(mut modules: Vec<Arc<dyn Module>>) -> Self {
        modules.sort_by_key(|m| m.priority());
        Self { modules }
    }

    pub fn modules(&self) -> &[Arc<dyn Module>] {
        &self.modules
    }

    /// Runs `init` for every module in priority order, then `start` for
    /// every module in the same order. If a `start` fails, already-started
    /// modules are stopped in reverse order and the error is returned.
    pub async fn run(&self, configs: &std::collections::HashMap<String, ModuleConfig>) -> Result<()> {
        for module in &self.modules {
            let config = configs.get(module.name()).ok_or_else(|| {
                format_err!("no configuration provided for module '{}'", module.name())
            })?;
            module.init(config)?;
        }

        let mut started: Vec<Arc<dyn Module>> = Vec::with_capacity(self.modules.len());
        for module in &self.modules {
            info!("starting module '{}' (priority {})", module.name(), module.priority());
            match module.start().await {
                Ok(()) => started.push(module.clone()),
                Err(err) => {
                    error!("module '{}' failed to start: {}", module.name(), err);
                    self.stop_in_reverse(&started).await;
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Reverse-order shutdown of every module that was started (§4.O).
    pub async fn shutdown(&self) {
        self.stop_in_reverse(&self.modules).await;
    }

    async fn stop_in_reverse(&self, modules: &[Arc<dyn Module>]) {
        for module in modules.iter().rev() {
            info!("stopping module '{}'", module.name());
            module.stop().await;
            if module.is_running() {
                warn!("module '{}' still reports running after stop()", module.name());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        name: &'static str,
        priority: i32,
        fail_start: bool,
        running: RunningFlag,
        order: Arc<std::sync::Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Module for Recorder {
        fn name(&self) -> &str {
            self.name
        }
        fn priority(&self) -> i32 {
            self.priority
        }
        fn init(&self, _config: &ModuleConfig) -> Result<()> {
            Ok(())
        }
        async fn start(&self) -> Result<()> {
            if self.fail_start {
                return Err(format_err!("boom"));
            }
            self.running.set(true);
            self.order.lock().unwrap().push(self.name);
            Ok(())
        }
        async fn stop(&self) {
            self.running.set(false);
            self.order.lock().unwrap().push(self.name);
        }
        fn is_running(&self) -> bool {
            self.running.get()
        }
    }

    fn cfg(name: &str) -> (String, ModuleConfig) {
        (
            name.to_string(),
            ModuleConfig {
                module: name.to_string(),
                server_id: 1,
                rpc_port: 0,
                web_port: None,
                extra: Default::default(),
            },
        )
    }

    #[async_std::test]
    async fn starts_in_priority_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let config_mod = Arc::new(Recorder {
            name: "config",
            priority: CONFIG_MODULE_PRIORITY,
            fail_start: false,
            running: RunningFlag::default(),
            order: order.clone(),
        });
        let game_mod = Arc::new(Recorder {
            name: "game",
            priority: 0,
            fail_start: false,
            running: RunningFlag::default(),
            order: order.clone(),
        });
        let bootstrap = Bootstrap::new(vec![game_mod.clone(), config_mod.clone()]);
        let configs: std::collections::HashMap<_, _> = [cfg("config"), cfg("game")].into_iter().collect();
        bootstrap.run(&configs).await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["config", "game"]);
        assert!(config_mod.is_running());
        assert!(game_mod.is_running());
    }

    #[async_std::test]
    async fn start_failure_stops_already_started_modules_in_reverse() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let a = Arc::new(Recorder {
            name: "a",
            priority: 0,
            fail_start: false,
            running: RunningFlag::default(),
            order: order.clone(),
        });
        let b = Arc::new(Recorder {
            name: "b",
            priority: 1,
            fail_start: true,
            running: RunningFlag::default(),
            order: order.clone(),
        });
        let bootstrap = Bootstrap::new(vec![a.clone(), b.clone()]);
        let configs: std::collections::HashMap<_, _> = [cfg("a"), cfg("b")].into_iter().collect();
        let result = bootstrap.run(&configs).await;
        assert!(result.is_err());
        assert!(!a.is_running());
        // `a` started then was stopped; `b` never started.
        assert_eq!(*order.lock().unwrap(), vec!["a", "a"]);
    }
}
