//! Config manager (component N, §4.N): the type -> (path, container)
//! registry, `load_all`, and the atomic-by-default `reload_multiple` swap
//! with rollback described in §4.N and exercised by end-to-end scenario 4
//! (§8, "Atomic reload rollback").

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use common::errors::*;
use parking_lot::RwLock;

use crate::container::ConfigContainer;
use crate::loader;
use crate::schema::ConfigSchema;

/// Type-erased handle the manager holds per registered table so that
/// `reload_multiple` can drive heterogeneous `ConfigContainer<T>`s through
/// one loop instead of requiring one hand-written match arm per type.
trait ConfigTable: Send + Sync {
    fn path(&self) -> &str;
    fn load_temp(&self) -> Result<Box<dyn Any + Send + Sync>>;
    fn publish(&self, temp: Box<dyn Any + Send + Sync>);
}

struct TypedTable<T: ConfigSchema> {
    path: String,
    container: Arc<ConfigContainer<T>>,
}

impl<T: ConfigSchema> ConfigTable for TypedTable<T> {
    fn path(&self) -> &str {
        &self.path
    }

    fn load_temp(&self) -> Result<Box<dyn Any + Send + Sync>> {
        let records = loader::parse_file::<T>(&self.path)?;
        Ok(Box::new(records))
    }

    fn publish(&self, temp: Box<dyn Any + Send + Sync>) {
        // The box was produced by `load_temp` above for this exact `T`, so
        // the downcast can't fail outside of a programming error in this
        // file.
        let records = *temp.downcast::<Vec<T>>().expect("temp snapshot type mismatch");
        self.container.set_all(records);
    }
}

/// Per-type outcome of a `reload_multiple` call.
#[derive(Debug, Clone)]
pub struct TableReloadOutcome {
    pub type_name: &'static str,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ReloadResult {
    pub version: u64,
    pub outcomes: Vec<TableReloadOutcome>,
}

impl ReloadResult {
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.success)
    }
}

/// Listener contract from §4.N: `before_reload`/`on_config_reloaded`/
/// `after_reload`. A listener that panics is isolated (caught and logged)
/// so one bad listener can't stop the others from firing.
pub trait ReloadListener: Send + Sync {
    fn before_reload(&self, _types: &[&'static str]) {}
    fn on_config_reloaded(&self, _type_name: &'static str, _success: bool) {}
    fn after_reload(&self, _result: &ReloadResult) {}
}

fn isolated<F: FnOnce() + std::panic::UnwindSafe>(label: &str, f: F) {
    if std::panic::catch_unwind(f).is_err() {
        log::error!("config reload listener panicked during {}", label);
    }
}

pub struct ConfigManager {
    tables: RwLock<HashMap<&'static str, Arc<dyn ConfigTable>>>,
    listeners: RwLock<Vec<Arc<dyn ReloadListener>>>,
    version: AtomicU64,
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            version: AtomicU64::new(0),
        }
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn add_listener(&self, listener: Arc<dyn ReloadListener>) {
        self.listeners.write().push(listener);
    }

    /// Registers a record type under `type_name` (conventionally
    /// `std::any::type_name::<T>()` at the call site) backed by the file at
    /// `path`. Re-registering the same `type_name` replaces the binding.
    pub fn register<T: ConfigSchema>(
        &self,
        type_name: &'static str,
        path: impl Into<String>,
        container: Arc<ConfigContainer<T>>,
    ) {
        let table = Arc::new(TypedTable { path: path.into(), container });
        self.tables.write().insert(type_name, table);
    }

    pub fn registered_types(&self) -> Vec<&'static str> {
        self.tables.read().keys().copied().collect()
    }

    /// Loads every registered type for the first time (startup path).
    /// Unlike `reload_multiple`, a missing file here is a hard error since
    /// there is no "old state" to fall back to.
    pub fn load_all(&self) -> Result<()> {
        let types = self.registered_types();
        let result = self.reload_multiple(&types, true);
        if !result.all_succeeded() {
            let failures: Vec<String> = result
                .outcomes
                .iter()
                .filter(|o| !o.success)
                .map(|o| format!("{}: {}", o.type_name, o.error.as_deref().unwrap_or("unknown error")))
                .collect();
            return Err(format_err!("initial config load failed: {}", failures.join("; ")));
        }
        Ok(())
    }

    /// Atomic-by-default multi-table reload (§4.N steps 1-3). Every target
    /// type is parsed into a temporary snapshot first; if any parse fails
    /// the whole batch is discarded and the live containers (and the
    /// version counter) are left untouched — end-to-end scenario 4 in §8.
    pub fn reload_multiple(&self, types: &[&'static str], atomic: bool) -> ReloadResult {
        self.reload_multiple_with_types(types.to_vec(), atomic)
    }

    fn reload_multiple_with_types(&self, types: Vec<&'static str>, atomic: bool) -> ReloadResult {
        for listener in self.listeners.read().iter() {
            isolated("before_reload", std::panic::AssertUnwindSafe(|| listener.before_reload(&types)));
        }

        struct Attempt {
            type_name: &'static str,
            table: Option<Arc<dyn ConfigTable>>,
            temp: std::result::Result<Box<dyn Any + Send + Sync>, String>,
        }

        let tables = self.tables.read();
        let mut attempts: Vec<Attempt> = Vec::with_capacity(types.len());
        for type_name in &types {
            match tables.get(type_name).cloned() {
                Some(table) => {
                    let temp = table.load_temp().map_err(|e| e.to_string());
                    attempts.push(Attempt { type_name, table: Some(table), temp });
                }
                None => attempts.push(Attempt {
                    type_name,
                    table: None,
                    temp: Err("not registered".to_string()),
                }),
            }
        }
        drop(tables);

        let any_failed = attempts.iter().any(|a| a.temp.is_err());
        let publish = !(any_failed && atomic);

        let new_version = if publish {
            self.version.fetch_add(1, Ordering::SeqCst) + 1
        } else {
            self.version()
        };

        let mut outcomes = Vec::with_capacity(attempts.len());
        for attempt in attempts {
            let (success, error) = match attempt.temp {
                Ok(temp) => {
                    if publish {
                        if let Some(table) = attempt.table {
                            table.publish(temp);
                        }
                    }
                    (publish, None)
                }
                Err(message) => (false, Some(message)),
            };
            outcomes.push(TableReloadOutcome {
                type_name: attempt.type_name,
                success,
                error,
            });
        }

        let result = ReloadResult { version: new_version, outcomes };
        for outcome in &result.outcomes {
            for listener in self.listeners.read().iter() {
                isolated("on_config_reloaded", std::panic::AssertUnwindSafe(|| listener.on_config_reloaded(outcome.type_name, outcome.success)));
            }
        }
        for listener in self.listeners.read().iter() {
            isolated("after_reload", std::panic::AssertUnwindSafe(|| listener.after_reload(&result)));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ConfigRecord;
    use crate::schema::{primitive, FieldBinding};
    use std::io::Write;
    use std::sync::Mutex;

    #[derive(Default, Clone)]
    struct Item {
        id: i64,
        name: String,
    }

    impl ConfigRecord for Item {
        type Id = i64;
        fn id(&self) -> i64 {
            self.id
        }
    }

    impl ConfigSchema for Item {
        fn root_element() -> &'static str {
            "items"
        }
        fn fields() -> &'static [FieldBinding<Self>] {
            const FIELDS: &[FieldBinding<Item>] = &[
                FieldBinding::new("id", |r, raw| {
                    r.id = primitive::parse_i64(raw)?;
                    Ok(())
                }),
                FieldBinding::new("name", |r, raw| {
                    r.name = primitive::parse_string(raw)?;
                    Ok(())
                }),
            ];
            FIELDS
        }
    }

    fn write_temp(name: &str, contents: &str) -> String {
        let mut path = std::env::temp_dir();
        path.push(format!("{}-{}.xml", name, std::process::id()));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn successful_reload_bumps_version_and_publishes() {
        let manager = ConfigManager::new();
        let container = Arc::new(ConfigContainer::<Item>::new());
        let path = write_temp("items_ok", r#"<items><item id="1" name="sword"/></items>"#);
        manager.register::<Item>("items", &path, container.clone());

        let result = manager.reload_multiple(&["items"], true);
        assert!(result.all_succeeded());
        assert_eq!(manager.version(), 1);
        assert_eq!(container.get(&1).unwrap().name, "sword");
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn atomic_rollback_leaves_old_state_and_version_on_any_failure() {
        let manager = ConfigManager::new();
        let a_container = Arc::new(ConfigContainer::<Item>::new());
        let b_container = Arc::new(ConfigContainer::<Item>::new());
        let a_path = write_temp("a_ok", r#"<items><item id="1" name="old-a"/></items>"#);
        let b_path = write_temp("b_ok", r#"<items><item id="2" name="old-b"/></items>"#);
        manager.register::<Item>("A", &a_path, a_container.clone());
        manager.register::<Item>("B", &b_path, b_container.clone());
        manager.reload_multiple(&["A", "B"], true);
        assert_eq!(manager.version(), 1);

        std::fs::write(&a_path, r#"<items><item id="1" name="new-a"/></items>"#).unwrap();
        std::fs::write(&b_path, "<items><item not-xml").unwrap();

        let result = manager.reload_multiple(&["A", "B"], true);
        assert_eq!(manager.version(), 1, "version must not advance on atomic rollback");
        assert_eq!(a_container.get(&1).unwrap().name, "old-a");
        assert_eq!(b_container.get(&2).unwrap().name, "old-b");
        assert!(!result.all_succeeded());
        let b_outcome = result.outcomes.iter().find(|o| o.type_name == "B").unwrap();
        assert!(!b_outcome.success);

        std::fs::remove_file(a_path).ok();
        std::fs::remove_file(b_path).ok();
    }

    #[test]
    fn listener_panic_does_not_prevent_other_listeners_from_firing() {
        struct Panicky;
        impl ReloadListener for Panicky {
            fn after_reload(&self, _result: &ReloadResult) {
                panic!("boom");
            }
        }
        struct Counter(Arc<Mutex<u32>>);
        impl ReloadListener for Counter {
            fn after_reload(&self, _result: &ReloadResult) {
                *self.0.lock().unwrap() += 1;
            }
        }

        let manager = ConfigManager::new();
        let container = Arc::new(ConfigContainer::<Item>::new());
        let path = write_temp("listeners", r#"<items><item id="1" name="sword"/></items>"#);
        manager.register::<Item>("items", &path, container);
        manager.add_listener(Arc::new(Panicky));
        let count = Arc::new(Mutex::new(0));
        manager.add_listener(Arc::new(Counter(count.clone())));

        let prev_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(|_| {}));
        manager.reload_multiple(&["items"], true);
        std::panic::set_hook(prev_hook);

        assert_eq!(*count.lock().unwrap(), 1);
        std::fs::remove_file(path).ok();
    }
}
