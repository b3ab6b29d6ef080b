//! Exporter configuration: a flat YAML file, validated into a runtime [`Conf`].
//!
//! Mirrors the split used throughout this codebase's config layers: [`dto::ConfFile`] is the
//! wire shape (every field optional, defaults filled in by `serde`), [`Conf`] is what the rest
//! of the exporter actually reads.

use std::fs::File;
use std::io::BufReader;

use anyhow::Context as _;
use camino::{Utf8Path, Utf8PathBuf};

#[derive(Debug, Clone)]
pub struct Conf {
    pub alias: String,
    pub endpoint: String,
    pub token: String,
    pub namespace: String,
    pub name: String,
    pub tls: TlsConf,
    pub export: ExportNode,
    pub hooks: HooksConf,
    pub log_dir: Utf8PathBuf,
}

#[derive(Debug, Clone)]
pub struct TlsConf {
    pub insecure: bool,
    pub ca: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct HooksConf {
    pub before_lease: Option<HookConf>,
    pub after_lease: Option<HookConf>,
}

#[derive(Debug, Clone)]
pub struct HookConf {
    pub script: String,
    pub timeout_secs: u64,
    pub on_failure: OnFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnFailure {
    Warn,
    EndLease,
    Exit,
}

/// Declarative driver-tree node; resolved against a compiled-in constructor table (see
/// `crate::export_tree`) rather than anything dynamically loaded.
#[derive(Debug, Clone)]
pub struct ExportNode {
    pub name: String,
    pub driver_type: String,
    pub labels: Vec<(String, String)>,
    pub children: Vec<ExportNode>,
}

impl Conf {
    pub fn from_conf_file(conf_file: &dto::ConfFile) -> anyhow::Result<Self> {
        let tls = conf_file.tls.clone().unwrap_or_default().validate()?;
        let hooks = conf_file.hooks.clone().unwrap_or_default().validate()?;
        let export = conf_file
            .export
            .clone()
            .context("`export` is required: the exporter has nothing to serve without a driver tree")?
            .validate()?;

        Ok(Self {
            alias: conf_file.alias.clone().unwrap_or_else(|| "default".to_owned()),
            endpoint: conf_file.endpoint.clone().context("`endpoint` is required")?,
            token: conf_file.token.clone().context("`token` is required")?,
            namespace: conf_file.namespace.clone().unwrap_or_default(),
            name: conf_file.name.clone().unwrap_or_default(),
            tls,
            export,
            hooks,
            log_dir: conf_file
                .log_dir
                .clone()
                .unwrap_or_else(|| Utf8PathBuf::from("/var/log/jumpstarter-exporter")),
        })
    }
}

pub fn load_conf_file(path: &Utf8Path) -> anyhow::Result<dto::ConfFile> {
    let file = File::open(path).with_context(|| format!("couldn't open config file at {path}"))?;
    serde_yaml::from_reader(BufReader::new(file)).with_context(|| format!("invalid config file at {path}"))
}

/// Loads the config file at `path` if it exists, otherwise writes a commented example config
/// there and returns it. Used by `--config-init-only` so a fresh host can bootstrap a config
/// without hand-authoring one first.
pub fn load_conf_file_or_generate_new(path: &Utf8Path) -> anyhow::Result<dto::ConfFile> {
    match File::open(path) {
        Ok(file) => serde_yaml::from_reader(BufReader::new(file)).with_context(|| format!("invalid config file at {path}")),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            let conf_file = dto::ConfFile::generate_new();
            let yaml = dto::render_example(&conf_file).context("failed to render example config")?;
            std::fs::write(path, yaml).with_context(|| format!("failed to write config file at {path}"))?;
            Ok(conf_file)
        }
        Err(error) => Err(error).with_context(|| format!("couldn't open config file at {path}")),
    }
}

pub mod dto {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct ConfFile {
        pub alias: Option<String>,
        pub endpoint: Option<String>,
        pub token: Option<String>,
        pub namespace: Option<String>,
        pub name: Option<String>,
        #[serde(default)]
        pub tls: Option<TlsConfFile>,
        pub export: Option<ExportNodeFile>,
        #[serde(default)]
        pub hooks: Option<HooksConfFile>,
        pub log_dir: Option<Utf8PathBuf>,
    }

    impl ConfFile {
        /// A placeholder config for `--config-init-only`: fills in everything the exporter needs
        /// to start, with an `endpoint`/`token` a new user must still edit in.
        pub fn generate_new() -> Self {
            Self {
                alias: Some("default".to_owned()),
                endpoint: Some("https://controller.example:8443".to_owned()),
                token: Some("REPLACE_ME".to_owned()),
                namespace: None,
                name: None,
                tls: Some(TlsConfFile::default()),
                export: Some(ExportNodeFile {
                    name: "power".to_owned(),
                    driver_type: "mock_power".to_owned(),
                    labels: std::collections::BTreeMap::new(),
                    children: Vec::new(),
                }),
                hooks: None,
                log_dir: None,
            }
        }
    }

    /// Renders `conf_file` as YAML with a leading comment header, matching the teacher's
    /// generate-and-print behavior for `--config-init-only`.
    pub fn render_example(conf_file: &ConfFile) -> anyhow::Result<String> {
        let yaml = serde_yaml::to_string(conf_file)?;
        Ok(format!("# example jmp-exporter configuration, edit `endpoint`/`token`/`export` before use\n{yaml}"))
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct TlsConfFile {
        #[serde(default)]
        pub insecure: bool,
        pub ca: Option<Utf8PathBuf>,
    }

    impl TlsConfFile {
        pub(super) fn validate(self) -> anyhow::Result<super::TlsConf> {
            Ok(super::TlsConf {
                insecure: self.insecure,
                ca: self.ca,
            })
        }
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct HooksConfFile {
        pub before_lease: Option<HookConfFile>,
        pub after_lease: Option<HookConfFile>,
    }

    impl HooksConfFile {
        pub(super) fn validate(self) -> anyhow::Result<super::HooksConf> {
            Ok(super::HooksConf {
                before_lease: self.before_lease.map(HookConfFile::validate).transpose()?,
                after_lease: self.after_lease.map(HookConfFile::validate).transpose()?,
            })
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct HookConfFile {
        pub script: String,
        #[serde(default = "default_hook_timeout")]
        pub timeout_secs: u64,
        #[serde(default)]
        pub on_failure: OnFailureFile,
    }

    fn default_hook_timeout() -> u64 {
        30
    }

    impl HookConfFile {
        fn validate(self) -> anyhow::Result<super::HookConf> {
            Ok(super::HookConf {
                script: self.script,
                timeout_secs: self.timeout_secs,
                on_failure: self.on_failure.into(),
            })
        }
    }

    #[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub enum OnFailureFile {
        #[default]
        Warn,
        EndLease,
        Exit,
    }

    impl From<OnFailureFile> for super::OnFailure {
        fn from(value: OnFailureFile) -> Self {
            match value {
                OnFailureFile::Warn => super::OnFailure::Warn,
                OnFailureFile::EndLease => super::OnFailure::EndLease,
                OnFailureFile::Exit => super::OnFailure::Exit,
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ExportNodeFile {
        #[serde(default)]
        pub name: String,
        pub driver_type: String,
        #[serde(default)]
        pub labels: std::collections::BTreeMap<String, String>,
        #[serde(default)]
        pub children: Vec<ExportNodeFile>,
    }

    impl ExportNodeFile {
        pub(super) fn validate(self) -> anyhow::Result<super::ExportNode> {
            let children = self
                .children
                .into_iter()
                .map(ExportNodeFile::validate)
                .collect::<anyhow::Result<Vec<_>>>()?;

            Ok(super::ExportNode {
                name: if self.name.is_empty() { "root".to_owned() } else { self.name },
                driver_type: self.driver_type,
                labels: self.labels.into_iter().collect(),
                children,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_conf_file_validates() {
        let yaml = r#"
endpoint: https://controller.example:8443
token: secret
export:
  driver_type: mock_power
"#;
        let conf_file: dto::ConfFile = serde_yaml::from_str(yaml).unwrap();
        let conf = Conf::from_conf_file(&conf_file).unwrap();
        assert_eq!(conf.endpoint, "https://controller.example:8443");
        assert_eq!(conf.export.driver_type, "mock_power");
        assert_eq!(conf.export.name, "root");
    }

    #[test]
    fn missing_export_is_rejected() {
        let conf_file: dto::ConfFile = serde_yaml::from_str("endpoint: e\ntoken: t\n").unwrap();
        assert!(Conf::from_conf_file(&conf_file).is_err());
    }

    #[test]
    fn generated_config_validates_and_round_trips_through_yaml() {
        let generated = dto::ConfFile::generate_new();
        Conf::from_conf_file(&generated).unwrap();

        let yaml = dto::render_example(&generated).unwrap();
        assert!(yaml.starts_with("# example"));
        let body = yaml.lines().skip(1).collect::<Vec<_>>().join("\n");
        let reparsed: dto::ConfFile = serde_yaml::from_str(&body).unwrap();
        Conf::from_conf_file(&reparsed).unwrap();
    }
}
