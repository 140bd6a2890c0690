//! Server configuration.
//!
//! Built once at startup, then shared read-only (behind an `Arc`) by every
//! request handler.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::store::ObjectStore;
use crate::{Error, Result};

/// Default listening port, also used by the default public URL.
pub const DEFAULT_PORT: u16 = 5000;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP listener binds to.
    pub bind_addr: SocketAddr,
    /// Directory holding one Git repository per name.
    ///
    /// LFS objects of `<repo>` live under `<project_root>/<repo>/lfs`.
    pub project_root: PathBuf,
    /// Public base URL clients use to reach this server.
    pub server_url: String,
    /// Reject uploads whose SHA256 digest differs from the OID.
    pub verify_content: bool,
    pub git_http_backend: BackendConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            project_root: PathBuf::from("."),
            server_url: format!("http://localhost:{}", DEFAULT_PORT),
            verify_content: false,
            git_http_backend: BackendConfig::default(),
        }
    }
}

/// How to launch the Git smart-HTTP CGI program.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("git"),
            args: vec!["http-backend".to_string()],
        }
    }
}

impl Config {
    /// Read a TOML configuration file and validate it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let config: Config = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        self.links().map(|_| ())
    }

    /// Link builder for the configured public URL.
    pub fn links(&self) -> Result<Links> {
        Links::new(&self.server_url)
    }

    /// Object store for `repo`.
    pub fn store(&self, repo: &str) -> Result<ObjectStore> {
        Ok(ObjectStore::for_repo(&self.project_root, repo)?.verify_content(self.verify_content))
    }
}

/// Builds the transfer URLs handed out to clients.
///
/// Pure string work, never touches the store.
#[derive(Clone, Debug)]
pub struct Links {
    base: Url,
}

impl Links {
    /// Parse the public server URL.
    pub fn new(server_url: &str) -> Result<Self> {
        let base = Url::parse(server_url)?;
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "server URL must be an http(s) base URL: {}",
                server_url
            )));
        }
        Ok(Links { base })
    }

    /// `<server_url>/<repo>/lfs/<oid>`, used for both upload and download.
    pub fn object_href(&self, repo: &str, oid: &str) -> String {
        let mut href = self.base.clone();
        if let Ok(mut segments) = href.path_segments_mut() {
            segments.pop_if_empty().extend([repo, "lfs", oid]);
        }
        href.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = Config::default();
        assert_eq!(c.bind_addr, "127.0.0.1:5000".parse::<SocketAddr>().unwrap());
        assert_eq!(c.server_url, "http://localhost:5000");
        assert!(!c.verify_content);
        assert_eq!(c.git_http_backend.program, PathBuf::from("git"));
        assert_eq!(c.git_http_backend.args, vec!["http-backend"]);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn load_partial_toml() {
        let td = tempfile::TempDir::new().unwrap();
        let path = td.path().join("lfs.toml");
        std::fs::write(
            &path,
            r#"
project_root = "/srv/git"
server_url = "https://lfs.example.com/git"

[git_http_backend]
program = "/usr/lib/git-core/git-http-backend"
args = []
"#,
        )
        .unwrap();

        let c = Config::load(&path).unwrap();
        assert_eq!(c.project_root, PathBuf::from("/srv/git"));
        assert_eq!(c.server_url, "https://lfs.example.com/git");
        assert!(c.git_http_backend.args.is_empty());
        // Unset keys keep their defaults.
        assert_eq!(c.bind_addr.port(), DEFAULT_PORT);
    }

    #[test]
    fn load_rejects_bad_url() {
        let td = tempfile::TempDir::new().unwrap();
        let path = td.path().join("lfs.toml");
        std::fs::write(&path, "server_url = \"mailto:ops@example.com\"\n").unwrap();

        assert!(matches!(Config::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn load_missing_file() {
        assert!(matches!(
            Config::load("/nonexistent/lfs.toml"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn object_href() {
        let links = Links::new("http://localhost:5000").unwrap();
        assert_eq!(
            links.object_href("demo", "deadbeef01"),
            "http://localhost:5000/demo/lfs/deadbeef01"
        );

        let links = Links::new("https://example.com/git/").unwrap();
        assert_eq!(
            links.object_href("repo.git", "a1"),
            "https://example.com/git/repo.git/lfs/a1"
        );
    }

    #[test]
    fn store_for_repo() {
        let c = Config {
            project_root: PathBuf::from("/srv/git"),
            ..Config::default()
        };
        let store = c.store("demo").unwrap();
        assert_eq!(store.root(), Path::new("/srv/git/demo/lfs"));
        assert!(c.store("..").is_err());
    }
}
