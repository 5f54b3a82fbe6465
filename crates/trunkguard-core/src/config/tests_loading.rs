//! Loading-focused tests for configuration
//!
//! File parsing, layering over defaults, and environment overrides.

#[cfg(test)]
mod loading_tests {
    use std::io::Write;

    use serial_test::serial;

    use crate::config::{load_config, load_toml_file, project_config_path, Config, ProbeKind};
    use crate::{Error, Result};

    fn write_project_config(root: &std::path::Path, body: &str) -> Result<()> {
        let dir = root.join(".trunkguard");
        std::fs::create_dir_all(&dir)?;
        let mut file = std::fs::File::create(dir.join("config.toml"))?;
        file.write_all(body.as_bytes())?;
        Ok(())
    }

    #[test]
    fn test_project_config_path_is_under_dot_trunkguard() -> Result<()> {
        let path = project_config_path(Some(std::path::Path::new("/repo")))?;
        assert_eq!(path, std::path::PathBuf::from("/repo/.trunkguard/config.toml"));
        Ok(())
    }

    #[test]
    #[serial]
    fn test_no_project_config_returns_defaults() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let config = load_config(Some(temp.path()))?;
        assert_eq!(config.repository.trunk, Config::default().repository.trunk);
        assert_eq!(config.queue.retry_cap, 3);
        Ok(())
    }

    #[test]
    #[serial]
    fn test_partial_project_config_keeps_other_defaults() -> Result<()> {
        let temp = tempfile::tempdir()?;
        write_project_config(
            temp.path(),
            "[merge]\nlock_timeout_secs = 7\n\n[rollback.thresholds.error-rate-spike]\ncritical = 40.0\n",
        )?;

        let config = load_config(Some(temp.path()))?;
        assert_eq!(config.merge.lock_timeout_secs, 7);
        assert_eq!(config.merge.lock_retry_ms, 250);
        let spike = config.rollback.thresholds.error_rate_spike;
        assert!((spike.critical - 40.0).abs() < f64::EPSILON);
        assert!((spike.high - 25.0).abs() < f64::EPSILON);
        Ok(())
    }

    #[test]
    #[serial]
    fn test_probes_parse_from_array_of_tables() -> Result<()> {
        let temp = tempfile::tempdir()?;
        write_project_config(
            temp.path(),
            "[[health.probes]]\nname = \"api\"\nkind = \"http\"\ntarget = \"http://localhost/healthz\"\n\n[[health.probes]]\nname = \"worker\"\nkind = \"command\"\ntarget = \"true\"\ntimeout_ms = 100\n",
        )?;

        let config = load_config(Some(temp.path()))?;
        assert_eq!(config.health.probes.len(), 2);
        assert_eq!(config.health.probes[0].kind, ProbeKind::Http);
        assert_eq!(config.health.probes[0].timeout_ms, 5_000);
        assert_eq!(config.health.probes[1].timeout_ms, 100);
        Ok(())
    }

    #[test]
    fn test_malformed_toml_returns_parse_error() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("bad.toml");
        std::fs::write(&path, "merge = [[[")?;

        let result = load_toml_file(&path);
        assert!(matches!(result, Err(Error::Validation(_))));
        Ok(())
    }

    #[test]
    #[serial]
    fn test_descending_thresholds_are_rejected() -> Result<()> {
        let temp = tempfile::tempdir()?;
        write_project_config(
            temp.path(),
            "[rollback.thresholds.slo-violation]\ncritical = 10.0\nhigh = 75.0\nmedium = 50.0\n",
        )?;
        let result = load_config(Some(temp.path()));
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn test_lease_ttls_are_bounded() {
        let mut config = Config::default();
        config.merge.lock_ttl_secs = u64::MAX;
        let err = config.validate();
        assert!(matches!(err, Err(ref e @ Error::Validation(_)) if e.to_string().contains("merge.lock_ttl_secs")));

        let mut config = Config::default();
        config.scheduler.processor_lock_ttl_secs = crate::coordination::MAX_LEASE_SECS + 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.merge.lock_ttl_secs = crate::coordination::MAX_LEASE_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_env_overrides_file_values() -> Result<()> {
        let temp = tempfile::tempdir()?;
        write_project_config(temp.path(), "[queue]\nretry_cap = 9\n")?;

        std::env::set_var("TRUNKGUARD_RETRY_CAP", "2");
        std::env::set_var("TRUNKGUARD_TRUNK", "develop");
        let result = load_config(Some(temp.path()));
        std::env::remove_var("TRUNKGUARD_RETRY_CAP");
        std::env::remove_var("TRUNKGUARD_TRUNK");

        let config = result?;
        assert_eq!(config.queue.retry_cap, 2);
        assert_eq!(config.repository.trunk, "develop");
        Ok(())
    }

    #[test]
    #[serial]
    fn test_invalid_env_value_is_config_error() {
        std::env::set_var("TRUNKGUARD_POLL_INTERVAL_SECS", "soon");
        let result = Config::default().apply_env_vars();
        std::env::remove_var("TRUNKGUARD_POLL_INTERVAL_SECS");
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_queue_lock_path_defaults_next_to_database() {
        let mut config = Config::default();
        config.repository.path = "/srv/repo".to_string();
        assert_eq!(
            config.queue_lock_path(),
            std::path::PathBuf::from("/srv/repo/.trunkguard/queue.db.lock")
        );
    }
}
