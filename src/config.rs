//! Configuration loaded from `packsmith.toml`.
//!
//! A missing file yields defaults; a present file overrides field by field.
//! The GitHub client id can additionally come from the `GITHUB_CLIENT_ID`
//! environment variable, which wins over the file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

pub const CONFIG_FILE: &str = "packsmith.toml";

/// Build orchestration settings.
#[derive(Debug, Clone)]
pub struct BuildSettings {
    /// Image that carries the `pack` CLI.
    pub builder_image: String,
    /// Buildpack builder passed to `pack build --builder`.
    pub builder_name: String,
    /// Name given to the image produced by a build.
    pub app_image: String,
    /// Port quoted in the post-build run hint.
    pub app_port: u16,
    /// Where the source directory is mounted inside the build container.
    pub workspace_dir: String,
    /// Host container-control socket, mounted to the same path in the
    /// container so the builder can launch nested containers.
    pub docker_socket: String,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            builder_image: "buildpacksio/pack:latest".to_string(),
            builder_name: "paketobuildpacks/builder-jammy-base".to_string(),
            app_image: "app".to_string(),
            app_port: 3000,
            workspace_dir: "/workspace".to_string(),
            docker_socket: "/var/run/docker.sock".to_string(),
        }
    }
}

/// Device authorization settings.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// OAuth app client id from the config file, if any.
    pub client_id: Option<String>,
    /// Overall polling deadline in seconds.
    pub timeout_secs: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            client_id: None,
            timeout_secs: 120,
        }
    }
}

impl AuthSettings {
    /// Client id with the environment override applied.
    pub fn resolve_client_id(&self) -> Option<String> {
        std::env::var("GITHUB_CLIENT_ID")
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| self.client_id.clone())
    }
}

/// Repository cache settings.
#[derive(Debug, Clone, Default)]
pub struct RepoSettings {
    /// Repositories root; defaults to `repos/` beside the executable.
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub build: BuildSettings,
    pub auth: AuthSettings,
    pub repos: RepoSettings,
}

/// Raw TOML structure for `packsmith.toml`.
#[derive(Debug, Deserialize)]
struct ConfigToml {
    build: Option<BuildSection>,
    auth: Option<AuthSection>,
    repos: Option<RepoSection>,
}

#[derive(Debug, Deserialize)]
struct BuildSection {
    builder_image: Option<String>,
    builder_name: Option<String>,
    app_image: Option<String>,
    app_port: Option<u16>,
    workspace_dir: Option<String>,
    docker_socket: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthSection {
    client_id: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RepoSection {
    root: Option<PathBuf>,
}

impl Config {
    /// Load config from `packsmith.toml` in `dir`. Returns defaults if the
    /// file doesn't exist.
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE);
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let toml: ConfigToml = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        let mut config = Self::default();
        if let Some(section) = toml.build {
            if let Some(builder_image) = section.builder_image {
                config.build.builder_image = builder_image;
            }
            if let Some(builder_name) = section.builder_name {
                config.build.builder_name = builder_name;
            }
            if let Some(app_image) = section.app_image {
                config.build.app_image = app_image;
            }
            if let Some(app_port) = section.app_port {
                config.build.app_port = app_port;
            }
            if let Some(workspace_dir) = section.workspace_dir {
                config.build.workspace_dir = workspace_dir;
            }
            if let Some(docker_socket) = section.docker_socket {
                config.build.docker_socket = docker_socket;
            }
        }
        if let Some(section) = toml.auth {
            if let Some(client_id) = section.client_id {
                config.auth.client_id = Some(client_id);
            }
            if let Some(timeout_secs) = section.timeout_secs {
                config.auth.timeout_secs = timeout_secs;
            }
        }
        if let Some(section) = toml.repos {
            if let Some(root) = section.root {
                config.repos.root = Some(root);
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.build.builder_image, "buildpacksio/pack:latest");
        assert_eq!(config.build.builder_name, "paketobuildpacks/builder-jammy-base");
        assert_eq!(config.build.app_port, 3000);
        assert_eq!(config.auth.timeout_secs, 120);
        assert!(config.auth.client_id.is_none());
        assert!(config.repos.root.is_none());
    }

    #[test]
    fn load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.build.app_image, "app");
    }

    #[test]
    fn load_full() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            r#"
[build]
builder_image = "buildpacksio/pack:0.35.0"
builder_name = "heroku/builder:24"
app_image = "shop-backend"
app_port = 8080

[auth]
client_id = "Iv1.abc123"
timeout_secs = 300

[repos]
root = "/srv/repos"
"#,
        )
        .unwrap();

        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.build.builder_image, "buildpacksio/pack:0.35.0");
        assert_eq!(config.build.builder_name, "heroku/builder:24");
        assert_eq!(config.build.app_image, "shop-backend");
        assert_eq!(config.build.app_port, 8080);
        assert_eq!(config.auth.client_id.as_deref(), Some("Iv1.abc123"));
        assert_eq!(config.auth.timeout_secs, 300);
        assert_eq!(config.repos.root.as_deref(), Some(Path::new("/srv/repos")));
    }

    #[test]
    fn load_partial_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            "[build]\napp_image = \"demo\"\n",
        )
        .unwrap();

        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.build.app_image, "demo");
        assert_eq!(config.build.builder_image, "buildpacksio/pack:latest"); // default
        assert_eq!(config.auth.timeout_secs, 120); // default
    }

    #[test]
    fn load_invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "not valid toml {{{{").unwrap();
        assert!(Config::load(dir.path()).is_err());
    }
}
