//! Process bootstrap (§1 "the process bootstrap that sequences module
//! lifecycles" is named out of scope as a *specific implementation*, but
//! the module/bootstrap contract it drives, component O, is squarely in
//! scope). `--config=<path>` selects the settings document (§6 CLI),
//! defaulting to `serverconfig/server.yaml`; exit status is 0 on clean
//! shutdown and nonzero on startup failure.

mod runtime;
mod settings;

use std::collections::HashMap;
use std::sync::Arc;

use clap::Parser;
use common::errors::*;
use config::ConfigManager;
use discovery::EtcdServiceRegistry;
use module::{Bootstrap, ModuleConfig};
use runtime::{CoreModule, SharedRuntime};
use serialize::SerializerRegistry;
use settings::{Settings, DEFAULT_SETTINGS_PATH};

#[derive(Parser, Debug)]
#[command(name = "slgserver")]
struct Cli {
    /// Path to the settings document (§6 "CLI").
    #[arg(long, default_value = DEFAULT_SETTINGS_PATH)]
    config: String,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let exit_code = async_std::task::block_on(run(&cli.config));
    std::process::exit(exit_code);
}

async fn run(config_path: &str) -> i32 {
    let settings = match Settings::load(config_path) {
        Ok(s) => s,
        Err(e) => {
            log::error!("failed to load settings from {}: {}", config_path, e);
            return 1;
        }
    };

    let runtime = match build_runtime(&settings).await {
        Ok(r) => r,
        Err(e) => {
            log::error!("failed to initialize runtime: {}", e);
            return 1;
        }
    };

    let mut modules: Vec<Arc<dyn module::Module>> = vec![Arc::new(runtime::ConfigModule::new(runtime.config_manager.clone()))];
    let mut configs: HashMap<String, ModuleConfig> = HashMap::new();
    configs.insert(
        "config".to_string(),
        ModuleConfig {
            module: "config".to_string(),
            server_id: 0,
            rpc_port: 0,
            web_port: None,
            extra: HashMap::new(),
        },
    );

    for instance in &settings.instances {
        let core = Arc::new(CoreModule::new(instance.module.clone(), runtime.clone(), Vec::new()));
        configs.insert(
            instance.module.clone(),
            ModuleConfig {
                module: instance.module.clone(),
                server_id: instance.server_id,
                rpc_port: instance.rpc_port,
                web_port: instance.web_port,
                extra: instance.extra.clone(),
            },
        );
        modules.push(core);
    }

    let bootstrap = Bootstrap::new(modules);
    if let Err(e) = bootstrap.run(&configs).await {
        log::error!("startup failed: {}", e);
        return 1;
    }

    log::info!("slgserver up with {} instance(s), awaiting shutdown signal", settings.instances.len());
    wait_for_ctrl_c().await;

    bootstrap.shutdown().await;
    0
}

async fn build_runtime(settings: &Settings) -> Result<Arc<SharedRuntime>> {
    let serializer_registry = Arc::new(SerializerRegistry::new());
    let service_registry = Arc::new(
        EtcdServiceRegistry::connect(&[settings.coordination_addr.as_str()], "/slg/services").await?,
    );
    let config_manager = Arc::new(ConfigManager::new());

    Ok(Arc::new(SharedRuntime {
        host: settings.host.clone(),
        serializer_registry,
        service_registry,
        config_manager,
    }))
}

/// Installs a Ctrl-C/SIGTERM handler that trips the same process-wide
/// shutdown signal every module's accept loop already selects on, then
/// waits for it.
async fn wait_for_ctrl_c() {
    if let Err(e) = ctrlc::set_handler(common::shutdown::trigger_shutdown) {
        log::warn!("could not install signal handler: {}", e);
    }
    common::shutdown::wait_for_shutdown().await;
}
