//! Built-in hooks and the name-to-constructor registry.
//!
//! Each hook lives in its own file and is also registered by name in
//! [`HookRegistry::with_defaults`], so configuration layers can
//! instantiate them without knowing the concrete types. Registry-built
//! instances carry neutral defaults (decimate ratio 1, skip count 0,
//! fixed-point scale 1000); parameterized setups construct the typed
//! hook directly.

pub mod convert;
pub mod decimate;
pub mod drop_reordered;
pub mod print;
pub mod restart;
pub mod skip_first;
pub mod stats;

pub use convert::{Convert, ConvertMode};
pub use decimate::Decimate;
pub use drop_reordered::DropReordered;
pub use print::Print;
pub use restart::Restart;
pub use skip_first::SkipFirst;
pub use stats::StatsHook;

use crate::error::{Error, Result};
use crate::hook::Hook;
use std::collections::HashMap;
use std::num::NonZeroU32;

/// Priority of the auto-installed restart hook.
pub const RESTART_PRIORITY: i32 = 1;
/// Priority of the auto-installed drop-reordered hook.
pub const DROP_REORDERED_PRIORITY: i32 = 2;

struct RegistryEntry {
    priority: i32,
    build: fn() -> Box<dyn Hook>,
}

/// Explicit name → constructor map, built once at startup.
///
/// Unknown names are fatal configuration errors, caught before any
/// worker thread exists.
pub struct HookRegistry {
    entries: HashMap<&'static str, RegistryEntry>,
}

impl HookRegistry {
    /// Registry with nothing in it.
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Registry holding every built-in hook.
    pub fn with_defaults() -> Self {
        let mut reg = Self::empty();
        reg.register("restart", RESTART_PRIORITY, || Box::new(Restart::new()));
        reg.register("drop_reordered", DROP_REORDERED_PRIORITY, || {
            Box::new(DropReordered::new())
        });
        reg.register("stats", 3, || Box::new(StatsHook::with_defaults("path")));
        reg.register("decimate", 99, || Box::new(Decimate::new(NonZeroU32::MIN)));
        reg.register("skip_first", 99, || Box::new(SkipFirst::count(0)));
        reg.register("convert", 99, || {
            Box::new(Convert::new(ConvertMode::ToFixed, 1000.0))
        });
        reg.register("print", 99, || Box::new(Print::new()));
        reg
    }

    /// Add or replace a named constructor with its default priority.
    pub fn register(&mut self, name: &'static str, priority: i32, build: fn() -> Box<dyn Hook>) {
        self.entries.insert(name, RegistryEntry { priority, build });
    }

    /// Instantiate a hook by name, returning its default priority too.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownHook`] when no constructor is registered under
    /// `name`.
    pub fn create(&self, name: &str) -> Result<(i32, Box<dyn Hook>)> {
        match self.entries.get(name) {
            Some(entry) => Ok((entry.priority, (entry.build)())),
            None => Err(Error::UnknownHook(name.to_string())),
        }
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted for stable logs.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("HookRegistry").field(&self.names()).finish()
    }
}
