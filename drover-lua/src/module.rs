//! Script-facing modules
//!
//! A module is one global table (`log`, `job`, ...) installed into the
//! sandbox of a single execution. Modules close over that execution's
//! [`JobContext`](drover_jobs::JobContext), so a fresh set is built per run.

use anyhow::bail;
use mlua::prelude::*;

/// A global table exposed to job scripts during execution.
///
/// # Example
///
/// ```
/// use drover_lua::module::DroverModule;
/// use mlua::prelude::*;
///
/// struct ClockModule;
///
/// impl DroverModule for ClockModule {
///     fn id(&self) -> &'static str {
///         "clock"
///     }
///
///     fn register(&self, lua: &Lua) -> LuaResult<()> {
///         let table = lua.create_table()?;
///         table.set("ticks", lua.create_function(|_, ()| Ok(42))?)?;
///         lua.globals().set(self.id(), table)?;
///         Ok(())
///     }
/// }
/// ```
pub trait DroverModule: Send + Sync {
    /// Global name of the module; must be a valid Lua identifier
    fn id(&self) -> &'static str;

    fn register(&self, lua: &Lua) -> LuaResult<()>;
}

/// Modules of one execution, installed in insertion order
#[derive(Default)]
pub struct ModuleSet {
    modules: Vec<Box<dyn DroverModule>>,
}

impl ModuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module, refusing a second module for the same global
    pub fn with<M: DroverModule + 'static>(mut self, module: M) -> anyhow::Result<Self> {
        if self.modules.iter().any(|m| m.id() == module.id()) {
            bail!("Lua global '{}' is provided by two modules", module.id());
        }
        self.modules.push(Box::new(module));
        Ok(self)
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.modules.iter().map(|m| m.id()).collect()
    }

    /// Installs every module into `lua`
    ///
    /// A module may not replace a global the sandbox already defines.
    pub fn install(&self, lua: &Lua) -> anyhow::Result<()> {
        let globals = lua.globals();
        for module in &self.modules {
            let id = module.id();
            if globals.contains_key(id)? {
                bail!("Lua module '{}' would shadow an existing global", id);
            }
            anyhow::Context::with_context(module.register(lua), || {
                format!("Failed to install Lua module '{}'", id)
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Inventory;

    impl DroverModule for Inventory {
        fn id(&self) -> &'static str {
            "inventory"
        }

        fn register(&self, lua: &Lua) -> LuaResult<()> {
            let table = lua.create_table()?;
            table.set("devices", 42)?;
            lua.globals().set(self.id(), table)?;
            Ok(())
        }
    }

    /// Claims the sandbox's registration table
    struct Jobs;

    impl DroverModule for Jobs {
        fn id(&self) -> &'static str {
            "jobs"
        }

        fn register(&self, lua: &Lua) -> LuaResult<()> {
            lua.globals().set(self.id(), lua.create_table()?)
        }
    }

    #[test]
    fn test_install() {
        let modules = ModuleSet::new().with(Inventory).unwrap();
        assert_eq!(modules.ids(), ["inventory"]);

        let lua = Lua::new();
        modules.install(&lua).unwrap();
        let devices: i32 = lua.load("return inventory.devices").eval().unwrap();
        assert_eq!(devices, 42);
    }

    #[test]
    fn test_duplicate_global_is_refused() {
        let err = ModuleSet::new()
            .with(Inventory)
            .unwrap()
            .with(Inventory)
            .err()
            .unwrap();
        assert!(err.to_string().contains("'inventory'"));
    }

    #[test]
    fn test_sandbox_globals_are_not_shadowed() {
        let lua = crate::sandbox::create_sandbox().unwrap();
        let err = ModuleSet::new()
            .with(Jobs)
            .unwrap()
            .install(&lua)
            .unwrap_err();
        assert!(err.to_string().contains("shadow"));
    }
}
