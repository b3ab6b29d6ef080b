//! Client configuration: same dto/Conf split as the exporter (see `jmp_exporter::config`).

use std::fs::File;
use std::io::BufReader;

use anyhow::Context as _;
use camino::{Utf8Path, Utf8PathBuf};

#[derive(Debug, Clone)]
pub struct Conf {
    pub alias: String,
    pub endpoint: String,
    pub token: String,
    pub refresh_token: Option<String>,
    pub namespace: String,
    pub name: String,
    pub tls: TlsConf,
    pub drivers: DriversConf,
    pub log_dir: Utf8PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct TlsConf {
    pub insecure: bool,
    pub ca: Option<Utf8PathBuf>,
}

/// Stub-class instantiation policy (spec §4.5 step 4): either any class is importable
/// (`unsafe: true`), or only classes whose top-level package prefix is in `allow`.
#[derive(Debug, Clone, Default)]
pub struct DriversConf {
    pub allow: Vec<String>,
    pub unsafe_allow_all: bool,
}

impl DriversConf {
    pub fn permits(&self, client_class: &str) -> bool {
        if self.unsafe_allow_all {
            return true;
        }
        let Some(top_level) = client_class.split('.').next() else {
            return false;
        };
        self.allow.iter().any(|allowed| allowed == top_level)
    }
}

impl Conf {
    pub fn from_conf_file(conf_file: &dto::ConfFile) -> anyhow::Result<Self> {
        let tls = conf_file.tls.clone().unwrap_or_default().validate();
        let drivers = conf_file.drivers.clone().unwrap_or_default().validate();

        Ok(Self {
            alias: conf_file.alias.clone().unwrap_or_else(|| "default".to_owned()),
            endpoint: conf_file.endpoint.clone().context("`endpoint` is required")?,
            token: conf_file.token.clone().context("`token` is required")?,
            refresh_token: conf_file.refresh_token.clone(),
            namespace: conf_file.namespace.clone().unwrap_or_default(),
            name: conf_file.name.clone().unwrap_or_default(),
            tls,
            drivers,
            log_dir: conf_file.log_dir.clone().unwrap_or_else(|| Utf8PathBuf::from("/var/log/jumpstarter-client")),
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
        pub refresh_token: Option<String>,
        pub namespace: Option<String>,
        pub name: Option<String>,
        #[serde(default)]
        pub tls: Option<TlsConfFile>,
        #[serde(default)]
        pub drivers: Option<DriversConfFile>,
        pub log_dir: Option<Utf8PathBuf>,
    }

    impl ConfFile {
        /// A placeholder config for `--config-init-only`: fills in everything the client needs to
        /// start, with an `endpoint`/`token` a new user must still edit in.
        pub fn generate_new() -> Self {
            Self {
                alias: Some("default".to_owned()),
                endpoint: Some("https://controller.example:8443".to_owned()),
                token: Some("REPLACE_ME".to_owned()),
                refresh_token: None,
                namespace: None,
                name: None,
                tls: Some(TlsConfFile::default()),
                drivers: Some(DriversConfFile {
                    allow: vec!["jumpstarter".to_owned()],
                    unsafe_allow_all: false,
                }),
                log_dir: None,
            }
        }
    }

    /// Renders `conf_file` as YAML with a leading comment header, matching the teacher's
    /// generate-and-print behavior for `--config-init-only`.
    pub fn render_example(conf_file: &ConfFile) -> anyhow::Result<String> {
        let yaml = serde_yaml::to_string(conf_file)?;
        Ok(format!("# example jmp-client configuration, edit `endpoint`/`token`/`drivers` before use\n{yaml}"))
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct TlsConfFile {
        #[serde(default)]
        pub insecure: bool,
        pub ca: Option<Utf8PathBuf>,
    }

    impl TlsConfFile {
        pub(super) fn validate(self) -> super::TlsConf {
            super::TlsConf {
                insecure: self.insecure,
                ca: self.ca,
            }
        }
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct DriversConfFile {
        #[serde(default)]
        pub allow: Vec<String>,
        #[serde(default, rename = "unsafe")]
        pub unsafe_allow_all: bool,
    }

    impl DriversConfFile {
        pub(super) fn validate(self) -> super::DriversConf {
            super::DriversConf {
                allow: self.allow,
                unsafe_allow_all: self.unsafe_allow_all,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsafe_allows_any_class() {
        let drivers = DriversConf {
            allow: Vec::new(),
            unsafe_allow_all: true,
        };
        assert!(drivers.permits("jumpstarter.drivers.power.MockPowerClient"));
    }

    #[test]
    fn allow_list_matches_top_level_package_only() {
        let drivers = DriversConf {
            allow: vec!["jumpstarter".to_owned()],
            unsafe_allow_all: false,
        };
        assert!(drivers.permits("jumpstarter.drivers.power.MockPowerClient"));
        assert!(!drivers.permits("evil.drivers.power.MockPowerClient"));
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
