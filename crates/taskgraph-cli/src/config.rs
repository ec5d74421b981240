//! Environment-driven configuration for the kernel, scheduler, and HTTP
//! surface.
//!
//! Resolution chain: CLI flag (where one exists) overrides the environment
//! variable, which overrides the compiled-in default. No config file is
//! read -- this system has no secrets or multi-value sections that would
//! justify one.

use std::env;
use std::time::Duration;

use taskgraph_core::SchedulerConfig;
use taskgraph_db::config::DbConfig;

/// Fully resolved process configuration.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub db_config: DbConfig,
    pub max_concurrent_tasks: usize,
    pub sched_tick_ms: u64,
    pub lease_ms: i64,
    pub max_attempts: i64,
    pub recovery_interval_ms: u64,
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

impl KernelConfig {
    /// Resolve configuration from an optional CLI `--db-path` flag and the
    /// process environment, falling back to documented defaults.
    pub fn resolve(cli_db_path: Option<&str>) -> Self {
        let db_config = match cli_db_path {
            Some(path) => DbConfig::new(path),
            None => DbConfig::from_env(),
        };

        Self {
            db_config,
            max_concurrent_tasks: env_parsed("MAX_CONCURRENT", 3),
            sched_tick_ms: env_parsed("SCHED_TICK_MS", 200),
            lease_ms: env_parsed("LEASE_MS", 60_000),
            max_attempts: env_parsed("MAX_ATTEMPTS", 3),
            recovery_interval_ms: env_parsed("RECOVERY_INTERVAL_MS", 1_000),
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_owned()),
            port: env_parsed("PORT", 8080),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned()),
        }
    }

    /// Build the [`SchedulerConfig`] this configuration implies.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent_tasks: self.max_concurrent_tasks,
            tick_interval: Duration::from_millis(self.sched_tick_ms),
            lease_ms: self.lease_ms,
            recovery_interval: Duration::from_millis(self.recovery_interval_ms),
        }
    }
}

/// Parse an environment variable of type `T`, falling back to `default` when
/// the variable is unset or fails to parse.
fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_when_nothing_set() {
        let _guard = ENV_LOCK.lock().unwrap();
        for key in ["MAX_CONCURRENT", "SCHED_TICK_MS", "LEASE_MS", "MAX_ATTEMPTS", "RECOVERY_INTERVAL_MS", "HOST", "PORT", "LOG_LEVEL"] {
            unsafe { env::remove_var(key) };
        }

        let cfg = KernelConfig::resolve(None);
        assert_eq!(cfg.max_concurrent_tasks, 3);
        assert_eq!(cfg.sched_tick_ms, 200);
        assert_eq!(cfg.lease_ms, 60_000);
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.recovery_interval_ms, 1_000);
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn cli_flag_overrides_env_db_path() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { env::set_var("DB_PATH", "/tmp/from-env.db") };

        let cfg = KernelConfig::resolve(Some("/tmp/from-cli.db"));
        assert_eq!(cfg.db_config.path().to_str().unwrap(), "/tmp/from-cli.db");

        unsafe { env::remove_var("DB_PATH") };
    }

    #[test]
    fn env_vars_are_parsed() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { env::set_var("MAX_CONCURRENT", "7") };
        unsafe { env::set_var("PORT", "9090") };

        let cfg = KernelConfig::resolve(None);
        assert_eq!(cfg.max_concurrent_tasks, 7);
        assert_eq!(cfg.port, 9090);

        unsafe { env::remove_var("MAX_CONCURRENT") };
        unsafe { env::remove_var("PORT") };
    }
}
