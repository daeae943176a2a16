//! Concrete [`module::Module`] implementations this binary boots: a
//! configuration module that always runs first (§4.O priority convention)
//! and a per-instance core module that hosts that instance's RPC endpoint
//! and optional GM HTTP endpoint. Business logic (login/gate/game/world/
//! alliance) is out of scope (§1) — `CoreModule` only stands up the
//! plumbing a real business module would be layered on top of.

use std::sync::Arc;

use common::async_trait;
use common::errors::*;
use config::ConfigManager;
use discovery::{ServiceInstance, ServiceRegistry};
use gmhttp::GmServer;
use module::{Module, ModuleConfig, RunningFlag, CONFIG_MODULE_PRIORITY};
use rpc::{RpcServer, RpcServerOptions};
use serialize::SerializerRegistry;

/// Shared, process-wide handles every instance's [`CoreModule`] is built
/// from (§9 "prefer a constructed 'runtime' handle passed explicitly
/// rather than implicit process globals").
pub struct SharedRuntime {
    pub host: String,
    pub serializer_registry: Arc<SerializerRegistry>,
    pub service_registry: Arc<dyn ServiceRegistry>,
    pub config_manager: Arc<ConfigManager>,
}

/// Priority-(-1000) module that loads every registered static table before
/// any business module starts (§4.O).
pub struct ConfigModule {
    config_manager: Arc<ConfigManager>,
    running: RunningFlag,
}

impl ConfigModule {
    pub fn new(config_manager: Arc<ConfigManager>) -> Self {
        Self { config_manager, running: RunningFlag::default() }
    }
}

#[async_trait]
impl Module for ConfigModule {
    fn name(&self) -> &str {
        "config"
    }

    fn priority(&self) -> i32 {
        CONFIG_MODULE_PRIORITY
    }

    fn init(&self, _config: &ModuleConfig) -> Result<()> {
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.config_manager.load_all()?;
        self.running.set(true);
        Ok(())
    }

    async fn stop(&self) {
        self.running.set(false);
    }

    fn is_running(&self) -> bool {
        self.running.get()
    }
}

/// One fleet instance (a login/gate/game/world/alliance process slot in
/// the settings document, §6): hosts an RPC endpoint, registers with the
/// coordination service, and optionally serves a GM HTTP surface.
pub struct CoreModule {
    name: String,
    runtime: Arc<SharedRuntime>,
    rpc_server: Arc<RpcServer>,
    gm_server: Option<Arc<GmServer>>,
    running: RunningFlag,
    config: parking_lot::Mutex<Option<ModuleConfig>>,
}

impl CoreModule {
    pub fn new(name: impl Into<String>, runtime: Arc<SharedRuntime>, gm_controllers: Vec<Arc<dyn gmhttp::GmController>>) -> Self {
        let rpc_server = RpcServer::new(runtime.serializer_registry.clone(), RpcServerOptions::default());
        let gm_server = if gm_controllers.is_empty() {
            None
        } else {
            Some(Arc::new(GmServer::new(gm_controllers)))
        };
        Self {
            name: name.into(),
            runtime,
            rpc_server,
            gm_server,
            running: RunningFlag::default(),
            config: parking_lot::Mutex::new(None),
        }
    }

    pub fn rpc_server(&self) -> &Arc<RpcServer> {
        &self.rpc_server
    }
}

#[async_trait]
impl Module for CoreModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        0
    }

    fn init(&self, config: &ModuleConfig) -> Result<()> {
        *self.config.lock() = Some(config.clone());
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let config = self
            .config
            .lock()
            .clone()
            .ok_or_else(|| format_err!("module '{}' started before init", self.name))?;

        let bind_addr = format!("0.0.0.0:{}", config.rpc_port);
        let server = self.rpc_server.clone();
        let listen_addr = bind_addr.clone();
        async_std::task::spawn(async move {
            if let Err(e) = server.serve(&listen_addr).await {
                log::error!("rpc server for exited with error: {}", e);
            }
        });

        if let Some(gm) = &self.gm_server {
            if let Some(web_port) = config.web_port {
                let gm = gm.clone();
                let addr = format!("0.0.0.0:{}", web_port);
                async_std::task::spawn(async move {
                    if let Err(e) = gm.serve(&addr).await {
                        log::error!("gm http surface exited with error: {}", e);
                    }
                });
            }
        }

        let service_key = format!("{}#{}", self.name, config.server_id);
        let instance = ServiceInstance::new(service_key, format!("{}:{}", self.runtime.host, config.rpc_port));
        self.runtime.service_registry.register(instance).await?;

        self.running.set(true);
        Ok(())
    }

    async fn stop(&self) {
        common::shutdown::trigger_shutdown();
        self.running.set(false);
    }

    fn is_running(&self) -> bool {
        self.running.get()
    }

    fn rpc_port(&self) -> Option<u16> {
        self.config.lock().as_ref().map(|c| c.rpc_port)
    }

    fn web_port(&self) -> Option<u16> {
        self.config.lock().as_ref().and_then(|c| c.web_port)
    }
}
