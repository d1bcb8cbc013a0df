//! The NGINX binary seam.
//!
//! [`NginxBinary`] is everything the config-apply plugin needs from an NGINX
//! installation: instance lookup, writing files, `nginx -t` and reload.
//! [`NginxCommand`] is the host implementation, built on an injected
//! [`CommandRunner`] for `nginx -t` and a [`Signaller`] for reloads.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use nginx_agent_sdk::{AllowedDirectories, ConfigApply, Directory, NginxConfig, NginxDetails};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::command::CommandRunner;
use crate::error::{NginxError, NginxResult};
use crate::signal::{Signaller, SystemSignaller};

const DEFAULT_NGINX_BINARY: &str = "nginx";

#[async_trait]
pub trait NginxBinary: Send + Sync {
    /// The instance with this id, if known.
    fn details(&self, nginx_id: &str) -> Option<NginxDetails>;

    /// Every known instance, ordered by id.
    fn instances(&self) -> Vec<NginxDetails>;

    /// Replaces the known instances.
    fn update_details(&self, instances: Vec<NginxDetails>);

    /// On-disk listing of the directories named in `incoming`.
    fn current_listing(&self, incoming: &[Directory]) -> NginxResult<Vec<Directory>>;

    /// Writes `config` for `details` inside `apply`. Returns deleted paths.
    fn write_config(
        &self,
        apply: &mut ConfigApply,
        config: &NginxConfig,
        details: &NginxDetails,
    ) -> NginxResult<Vec<PathBuf>>;

    /// Runs `nginx -t -c <conf>` and returns its output.
    async fn validate_config(&self, details: &NginxDetails) -> NginxResult<String>;

    /// Signals the master process to reload.
    async fn reload(&self, details: &NginxDetails) -> NginxResult<()>;
}

/// [`NginxBinary`] for instances on this host.
pub struct NginxCommand {
    runner: Arc<dyn CommandRunner>,
    signaller: Arc<dyn Signaller>,
    allowed: AllowedDirectories,
    treat_warnings_as_errors: bool,
    instances: RwLock<BTreeMap<String, NginxDetails>>,
}

impl NginxCommand {
    pub fn new(runner: Arc<dyn CommandRunner>, allowed: AllowedDirectories) -> Self {
        Self {
            runner,
            signaller: Arc::new(SystemSignaller),
            allowed,
            treat_warnings_as_errors: false,
            instances: RwLock::new(BTreeMap::new()),
        }
    }

    /// Delivers reload signals through `signaller` instead of `kill(2)`.
    pub fn with_signaller(mut self, signaller: Arc<dyn Signaller>) -> Self {
        self.signaller = signaller;
        self
    }

    /// Fails validation when `nginx -t` prints warnings.
    pub fn with_treat_warnings_as_errors(mut self, enabled: bool) -> Self {
        self.treat_warnings_as_errors = enabled;
        self
    }

    pub fn allowed_directories(&self) -> &AllowedDirectories {
        &self.allowed
    }
}

#[async_trait]
impl NginxBinary for NginxCommand {
    fn details(&self, nginx_id: &str) -> Option<NginxDetails> {
        self.instances.read().get(nginx_id).cloned()
    }

    fn instances(&self) -> Vec<NginxDetails> {
        self.instances.read().values().cloned().collect()
    }

    fn update_details(&self, instances: Vec<NginxDetails>) {
        let instances: BTreeMap<_, _> = instances
            .into_iter()
            .map(|details| (details.nginx_id.clone(), details))
            .collect();
        debug!(count = instances.len(), "updating NGINX instances");
        *self.instances.write() = instances;
    }

    /// Lists only directories the payload names, without descending, so
    /// files in directories it does not mention are never deleted by
    /// omission. Relative, disallowed and missing directories are skipped.
    fn current_listing(&self, incoming: &[Directory]) -> NginxResult<Vec<Directory>> {
        let mut listing = BTreeMap::new();
        for dir in incoming {
            let path = Path::new(&dir.name);
            if !path.is_absolute() || !self.allowed.permits(path) || !path.is_dir() {
                continue;
            }
            if listing.contains_key(&dir.name) {
                continue;
            }
            listing.insert(dir.name.clone(), nginx_agent_sdk::list_directory(path)?);
        }
        Ok(listing.into_values().collect())
    }

    fn write_config(
        &self,
        apply: &mut ConfigApply,
        config: &NginxConfig,
        details: &NginxDetails,
    ) -> NginxResult<Vec<PathBuf>> {
        let current = self.current_listing(&config.directory_map)?;
        let deleted =
            nginx_agent_sdk::write_config(apply, config, details, &current, &self.allowed)?;
        Ok(deleted)
    }

    async fn validate_config(&self, details: &NginxDetails) -> NginxResult<String> {
        let program = binary_path(details);
        debug!(nginx_id = %details.nginx_id, conf = %details.conf_path.display(), "validating config");

        let args = vec![
            "-t".to_string(),
            "-c".to_string(),
            details.conf_path.to_string_lossy().into_owned(),
        ];
        let output = self.runner.run(&program, &args).await?;
        let report = output.combined();

        if !output.succeeded() {
            return Err(NginxError::ValidationFailed {
                conf_path: details.conf_path.clone(),
                output: report,
            });
        }
        if self.treat_warnings_as_errors && report.contains("[warn]") {
            warn!(nginx_id = %details.nginx_id, "config validated with warnings");
            return Err(NginxError::ValidationFailed {
                conf_path: details.conf_path.clone(),
                output: report,
            });
        }

        info!(nginx_id = %details.nginx_id, "config validated");
        Ok(report)
    }

    async fn reload(&self, details: &NginxDetails) -> NginxResult<()> {
        if details.process_id == 0 {
            return Err(NginxError::InvalidProcessId {
                nginx_id: details.nginx_id.clone(),
                process_id: details.process_id,
            });
        }

        info!(nginx_id = %details.nginx_id, pid = details.process_id, "reloading NGINX");
        self.signaller.hangup(details.process_id)?;
        info!(pid = details.process_id, "NGINX reloaded");
        Ok(())
    }
}

fn binary_path(details: &NginxDetails) -> String {
    if details.process_path.as_os_str().is_empty() {
        DEFAULT_NGINX_BINARY.to_string()
    } else {
        details.process_path.to_string_lossy().into_owned()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::command::{CommandOutput, display_command};
    use crate::testing::RecordingSignaller;
    use nginx_agent_sdk::{ConfigFile, FileEntry};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::fs;
    use tempfile::TempDir;

    /// Replays queued outputs and records every command line.
    #[derive(Default)]
    pub(crate) struct ScriptedRunner {
        pub calls: Mutex<Vec<String>>,
        pub outputs: Mutex<VecDeque<CommandOutput>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn with_outputs(outputs: impl IntoIterator<Item = CommandOutput>) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::default(),
                outputs: Mutex::new(outputs.into_iter().collect()),
            })
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, program: &str, args: &[String]) -> NginxResult<CommandOutput> {
            self.calls.lock().push(display_command(program, args));
            Ok(self
                .outputs
                .lock()
                .pop_front()
                .unwrap_or_else(|| CommandOutput::success("", "")))
        }
    }

    fn details(conf_path: impl Into<PathBuf>) -> NginxDetails {
        NginxDetails {
            nginx_id: "nginx-1".into(),
            process_id: 4242,
            process_path: "/usr/sbin/nginx".into(),
            conf_path: conf_path.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn validate_runs_nginx_t() {
        let runner = ScriptedRunner::with_outputs([CommandOutput::success(
            "",
            "nginx: configuration file /etc/nginx/nginx.conf test is successful",
        )]);
        let nginx = NginxCommand::new(runner.clone(), AllowedDirectories::new(["/etc/nginx"]));

        let report = nginx
            .validate_config(&details("/etc/nginx/nginx.conf"))
            .await
            .unwrap();

        assert!(report.contains("test is successful"));
        assert_eq!(
            *runner.calls.lock(),
            ["/usr/sbin/nginx -t -c /etc/nginx/nginx.conf"]
        );
    }

    #[tokio::test]
    async fn validate_failure_carries_output() {
        let runner = ScriptedRunner::with_outputs([CommandOutput::failure(
            1,
            "nginx: [emerg] unknown directive \"bogus\"",
        )]);
        let nginx = NginxCommand::new(runner, AllowedDirectories::default());

        let err = nginx
            .validate_config(&details("/etc/nginx/nginx.conf"))
            .await
            .unwrap_err();

        match err {
            NginxError::ValidationFailed { output, .. } => assert!(output.contains("[emerg]")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn warnings_fail_when_configured() {
        let warn = CommandOutput::success("", "nginx: [warn] duplicate MIME type");
        let lenient = NginxCommand::new(
            ScriptedRunner::with_outputs([warn.clone()]),
            AllowedDirectories::default(),
        );
        let strict = NginxCommand::new(
            ScriptedRunner::with_outputs([warn]),
            AllowedDirectories::default(),
        )
        .with_treat_warnings_as_errors(true);
        let details = details("/etc/nginx/nginx.conf");

        assert!(lenient.validate_config(&details).await.is_ok());
        assert!(strict.validate_config(&details).await.is_err());
    }

    #[tokio::test]
    async fn reload_sends_hup_to_master() {
        let runner = ScriptedRunner::new();
        let signaller = RecordingSignaller::new();
        let nginx = NginxCommand::new(runner.clone(), AllowedDirectories::default())
            .with_signaller(signaller.clone());

        nginx.reload(&details("/etc/nginx/nginx.conf")).await.unwrap();
        assert_eq!(*signaller.pids.lock(), [4242]);
        assert!(runner.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn reload_rejects_missing_pid() {
        let signaller = RecordingSignaller::new();
        let nginx = NginxCommand::new(ScriptedRunner::new(), AllowedDirectories::default())
            .with_signaller(signaller.clone());
        let mut details = details("/etc/nginx/nginx.conf");
        details.process_id = 0;

        let err = nginx.reload(&details).await.unwrap_err();
        assert!(matches!(err, NginxError::InvalidProcessId { .. }));
        assert!(signaller.pids.lock().is_empty());
    }

    #[tokio::test]
    async fn reload_failure_is_reported() {
        let nginx = NginxCommand::new(ScriptedRunner::new(), AllowedDirectories::default())
            .with_signaller(RecordingSignaller::failing());

        let err = nginx
            .reload(&details("/etc/nginx/nginx.conf"))
            .await
            .unwrap_err();
        assert!(matches!(err, NginxError::Signal { pid: 4242, .. }));
    }

    #[test]
    fn instances_are_replaced_on_update() {
        let nginx = NginxCommand::new(ScriptedRunner::new(), AllowedDirectories::default());
        let mut second = details("/etc/nginx/nginx.conf");
        second.nginx_id = "nginx-2".into();

        nginx.update_details(vec![details("/etc/nginx/nginx.conf"), second]);
        assert_eq!(nginx.instances().len(), 2);
        assert!(nginx.details("nginx-2").is_some());

        nginx.update_details(Vec::new());
        assert!(nginx.details("nginx-1").is_none());
    }

    #[test]
    fn listing_covers_only_named_allowed_directories() {
        let root = TempDir::new().unwrap();
        let conf = root.path().join("nginx");
        fs::create_dir_all(conf.join("conf.d")).unwrap();
        fs::write(conf.join("nginx.conf"), "").unwrap();
        fs::write(conf.join("conf.d/default.conf"), "").unwrap();
        let outside = TempDir::new().unwrap();

        let nginx = NginxCommand::new(
            ScriptedRunner::new(),
            AllowedDirectories::new([root.path()]),
        );
        let incoming = vec![
            Directory::new(conf.to_string_lossy(), vec![]),
            Directory::new(outside.path().to_string_lossy(), vec![]),
            Directory::new("relative", vec![]),
            Directory::new(root.path().join("missing").to_string_lossy(), vec![]),
        ];

        let listing = nginx.current_listing(&incoming).unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].files, vec![FileEntry::new("nginx.conf")]);
    }

    #[test]
    fn write_config_deletes_files_dropped_from_named_directory() {
        let root = TempDir::new().unwrap();
        let conf = root.path().join("nginx");
        fs::create_dir_all(&conf).unwrap();
        fs::write(conf.join("nginx.conf"), "events {}").unwrap();
        fs::write(conf.join("old.conf"), "").unwrap();

        let nginx = NginxCommand::new(
            ScriptedRunner::new(),
            AllowedDirectories::new([root.path()]),
        );
        let config = NginxConfig {
            nginx_id: "nginx-1".into(),
            files: vec![ConfigFile::new("nginx.conf", "events {}")],
            directory_map: vec![Directory::new(
                conf.to_string_lossy(),
                vec![FileEntry::new("nginx.conf")],
            )],
            ..Default::default()
        };

        let mut apply = ConfigApply::new();
        let deleted = nginx
            .write_config(&mut apply, &config, &details(conf.join("nginx.conf")))
            .unwrap();

        assert_eq!(deleted, vec![conf.join("old.conf")]);
        apply.rollback("test").unwrap();
        assert!(conf.join("old.conf").exists());
    }
}
