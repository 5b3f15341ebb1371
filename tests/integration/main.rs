//! Integration tests for Prefetch Worker

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn prefetch_worker() -> Command {
        cargo_bin_cmd!("prefetch-worker")
    }

    /// Write a config whose cache store lives inside the temp dir
    fn write_config(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("config.toml");
        let content = format!(
            "[cache]\ndir = {:?}\n\n[worker]\norigin = \"http://127.0.0.1:9/\"\n",
            dir.path().join("caches").display().to_string()
        );
        std::fs::write(&path, content).unwrap();
        path
    }

    fn write_events(dir: &TempDir, lines: &[&str]) -> PathBuf {
        let path = dir.path().join("events.jsonl");
        std::fs::write(&path, lines.join("\n")).unwrap();
        path
    }

    fn with_config(config: &Path) -> Command {
        let mut cmd = prefetch_worker();
        cmd.arg("--config").arg(config);
        cmd
    }

    #[test]
    fn help_displays() {
        prefetch_worker()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("background bundle prefetch cache"));
    }

    #[test]
    fn version_displays() {
        prefetch_worker()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("prefetch-worker"));
    }

    #[test]
    fn config_path() {
        let dir = TempDir::new().unwrap();
        let config = write_config(&dir);
        with_config(&config)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let dir = TempDir::new().unwrap();
        let config = write_config(&dir);
        with_config(&config)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[worker]"))
            .stdout(predicate::str::contains("http://127.0.0.1:9/"));
    }

    #[test]
    fn invalid_config_reports_hint() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("config.toml");
        std::fs::write(&config, "[worker\n").unwrap();
        with_config(&config)
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn cache_list_empty() {
        let dir = TempDir::new().unwrap();
        let config = write_config(&dir);
        with_config(&config)
            .args(["cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No cached bundles."));
    }

    #[test]
    fn replay_without_network() {
        let dir = TempDir::new().unwrap();
        let config = write_config(&dir);
        let events = write_events(
            &dir,
            &[
                r#"{"event":"install"}"#,
                r#"{"event":"activate"}"#,
                r#"# pages start talking"#,
                r#"{"event":"message","data":["ping"]}"#,
                r#"{"event":"message","data":{"type":"graph","base":"/assets/"}}"#,
                r#"{"event":"fetch","url":"/index.html"}"#,
                r#"{"event":"fetch","method":"POST","url":"/build/a.js"}"#,
            ],
        );

        with_config(&config)
            .arg("replay")
            .arg(&events)
            .arg("--memory")
            .assert()
            .success()
            .stdout(predicate::str::contains("ok      install"))
            .stdout(predicate::str::contains("pass    --- GET /index.html"))
            .stdout(predicate::str::contains("2 fetch(es): 0 hit, 0 fetched, 2 pass, 0 error"))
            .stdout(predicate::str::contains("2 message(s)"));
    }

    #[test]
    fn replay_missing_file() {
        let dir = TempDir::new().unwrap();
        let config = write_config(&dir);
        with_config(&config)
            .args(["replay", "does-not-exist.jsonl", "--memory"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("opening events file"));
    }

    #[test]
    fn replay_rejects_bad_event() {
        let dir = TempDir::new().unwrap();
        let config = write_config(&dir);
        let events = write_events(&dir, &[r#"{"event":"teleport"}"#]);
        with_config(&config)
            .arg("replay")
            .arg(&events)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid event on line 1"));
    }
}
