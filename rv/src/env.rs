//! Environment published to spawned workers
//!
//! The coordinator writes the same set of variables into two places: the
//! launcher's own process environment and the environment table used for the
//! workers it is about to spawn.

use std::collections::BTreeMap;

use tracing::debug;

/// Listening port of the master; its presence also means "already handled"
pub const GMPI_PORT: &str = "GMPI_PORT";
pub const GMPI_MAGIC: &str = "GMPI_MAGIC";
pub const GMPI_NP: &str = "GMPI_NP";
pub const GMPI_SHMEM: &str = "GMPI_SHMEM";
pub const GMPI_BOARD: &str = "GMPI_BOARD";
/// Per-worker rank, set by the launcher rather than the coordinator
pub const GMPI_ID: &str = "GMPI_ID";

/// Read/write access to an environment table
pub trait Environment {
    fn get(&self, key: &str) -> Option<String>;

    /// Set `key`, overwriting any previous value
    fn set(&mut self, key: &str, value: &str);
}

/// The current process environment
///
/// Writing the environment is only sound while no other thread reads or
/// writes it, so a `ProcessEnv` can only be made through the `unsafe`
/// [`ProcessEnv::new`]. Use it from a current-thread runtime, before any
/// other thread has been started.
///
/// ```compile_fail
/// let env = gmpi_rendezvous::ProcessEnv::new();
/// ```
#[derive(Debug)]
pub struct ProcessEnv {
    _private: (),
}

impl ProcessEnv {
    /// # Safety
    ///
    /// No other thread may read or write the process environment while this
    /// value is alive.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl Environment for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn set(&mut self, key: &str, value: &str) {
        debug!(key, value, "ProcessEnv::set: called");
        // SAFETY: upheld by the caller of `ProcessEnv::new`
        unsafe { std::env::set_var(key, value) };
    }
}

/// An owned environment for a child process
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EnvTable {
    vars: BTreeMap<String, String>,
}

impl EnvTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Add every variable to a command about to be spawned
    pub fn apply(&self, cmd: &mut tokio::process::Command) {
        cmd.envs(self.vars.iter());
    }
}

impl Environment for EnvTable {
    fn get(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) {
        self.vars.insert(key.to_string(), value.to_string());
    }
}

/// The variables the coordinator publishes for a job step
pub fn coordinator_vars(port: u16, magic: u32, task_count: usize) -> Vec<(&'static str, String)> {
    vec![
        (GMPI_PORT, port.to_string()),
        (GMPI_MAGIC, magic.to_string()),
        (GMPI_NP, task_count.to_string()),
        (GMPI_SHMEM, "1".to_string()),
        // Any board; multi-board configurations are not supported
        (GMPI_BOARD, "-1".to_string()),
    ]
}

/// Write the coordinator variables into `env`
pub fn publish(env: &mut dyn Environment, port: u16, magic: u32, task_count: usize) {
    for (key, value) in coordinator_vars(port, magic, task_count) {
        env.set(key, &value);
    }
}

/// True when a worker-side launcher already assigned its own port
pub fn is_bypassed(env: &dyn Environment) -> bool {
    env.get(GMPI_PORT).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_publish_into_table() {
        let mut table = EnvTable::new();
        publish(&mut table, 4242, 42, 8);
        assert_eq!(table.get(GMPI_PORT).as_deref(), Some("4242"));
        assert_eq!(table.get(GMPI_MAGIC).as_deref(), Some("42"));
        assert_eq!(table.get(GMPI_NP).as_deref(), Some("8"));
        assert_eq!(table.get(GMPI_SHMEM).as_deref(), Some("1"));
        assert_eq!(table.get(GMPI_BOARD).as_deref(), Some("-1"));
        assert_eq!(table.len(), 5);
    }

    #[test]
    fn test_table_overwrites() {
        let mut table = EnvTable::new();
        table.set(GMPI_NP, "1");
        publish(&mut table, 1, 1, 16);
        assert_eq!(table.get(GMPI_NP).as_deref(), Some("16"));
    }

    #[test]
    fn test_bypass_detection() {
        let mut table = EnvTable::new();
        assert!(!is_bypassed(&table));
        table.set(GMPI_PORT, "9999");
        assert!(is_bypassed(&table));
    }

    #[test]
    #[serial]
    fn test_process_env_round_trip() {
        // SAFETY: serialized with the other environment tests; nothing else
        // in this test binary touches the variable
        let mut env = unsafe { ProcessEnv::new() };
        env.set("GMPI_RENDEZVOUS_TEST_VAR", "abc");
        assert_eq!(env.get("GMPI_RENDEZVOUS_TEST_VAR").as_deref(), Some("abc"));
    }
}
