use serde::{Deserialize, Serialize};
use std::fs;

use crate::environment::Environment;
use crate::paths;
use crate::utils::io;

/// Root configuration structure for dominion.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DominionConfig {
    #[serde(default)]
    pub defaults: Defaults,
}

/// All configurable defaults that can be overridden via dominion.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    #[serde(default)]
    pub default_environment: Environment,

    #[serde(default = "default_pipeline_file")]
    pub pipeline_file: String,

    #[serde(default = "default_image")]
    pub image: ImageConfig,

    #[serde(default = "default_build")]
    pub build: BuildConfig,

    #[serde(default = "default_cluster")]
    pub cluster: ClusterConfig,

    #[serde(default = "default_notify")]
    pub notify: NotifyConfig,

    #[serde(default = "default_secrets")]
    pub secrets: Vec<String>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            default_environment: Environment::default(),
            pipeline_file: default_pipeline_file(),
            image: default_image(),
            build: default_build(),
            cluster: default_cluster(),
            notify: default_notify(),
            secrets: default_secrets(),
        }
    }
}

/// Where the built container image is published
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    pub registry: String,
    pub repository: String,
}

/// Commands that make up the build-and-push stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(default = "default_build_timeout")]
    pub timeout_minutes: u64,
    pub registry_login_command: String,
    pub build_command: String,
    pub scan_command: String,
    pub image_build_command: String,
    pub push_command: String,
    #[serde(default)]
    pub cleanup_commands: Vec<String>,
}

/// Cluster naming, overlays and add-ons for the deploy stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_cluster_suffix")]
    pub suffix: String,
    #[serde(default = "default_overlay_root")]
    pub overlay_root: String,
    pub auth_command: String,
    pub addon_apply_command: String,
    pub set_image_command: String,
    pub apply_command: String,
    #[serde(default)]
    pub addons: Vec<AddonConfig>,
}

/// A cluster-wide supporting service applied before the application overlay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddonConfig {
    pub name: String,
    pub manifest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "default_webhook_env")]
    pub webhook_env: String,
    #[serde(default = "default_notify_timeout")]
    pub timeout_secs: u64,
}

// =============================================================================
// Default value functions
// =============================================================================

fn default_pipeline_file() -> String {
    "dominion.yml".to_string()
}

fn default_image() -> ImageConfig {
    ImageConfig {
        registry: "registry.dominion.internal".to_string(),
        repository: "dominion/app".to_string(),
    }
}

fn default_build_timeout() -> u64 {
    30
}

fn default_build() -> BuildConfig {
    BuildConfig {
        timeout_minutes: default_build_timeout(),
        registry_login_command:
            "aws ecr get-login-password | docker login --username AWS --password-stdin {{registry}}"
                .to_string(),
        build_command: "mvn -B clean package".to_string(),
        scan_command: "mvn -B sonar:sonar -Dsonar.host.url=\"$SONAR_HOST_URL\" -Dsonar.token=\"$SONAR_TOKEN\""
            .to_string(),
        image_build_command: "docker build -t {{image}} .".to_string(),
        push_command: "docker push {{image}}".to_string(),
        cleanup_commands: vec![
            "docker rmi {{image}}".to_string(),
            "rm -rf target".to_string(),
        ],
    }
}

fn default_cluster_suffix() -> String {
    "-dominion-cluster".to_string()
}

fn default_overlay_root() -> String {
    "k8s/overlays".to_string()
}

fn default_cluster() -> ClusterConfig {
    ClusterConfig {
        suffix: default_cluster_suffix(),
        overlay_root: default_overlay_root(),
        auth_command: "aws eks update-kubeconfig --name {{cluster}} && kubectl cluster-info"
            .to_string(),
        addon_apply_command: "kubectl apply -f {{manifest}}".to_string(),
        set_image_command: "cd {{overlay_dir}} && kustomize edit set image app={{image}}"
            .to_string(),
        apply_command: "kubectl apply -k {{overlay_dir}}".to_string(),
        addons: vec![
            AddonConfig {
                name: "monitoring".to_string(),
                manifest:
                    "https://github.com/kubernetes-sigs/metrics-server/releases/latest/download/components.yaml"
                        .to_string(),
            },
            AddonConfig {
                name: "logging".to_string(),
                manifest:
                    "https://raw.githubusercontent.com/fluent/fluent-bit-kubernetes-logging/master/output/elasticsearch/fluent-bit-ds.yaml"
                        .to_string(),
            },
        ],
    }
}

fn default_webhook_env() -> String {
    "DOMINION_WEBHOOK_URL".to_string()
}

fn default_notify_timeout() -> u64 {
    10
}

fn default_notify() -> NotifyConfig {
    NotifyConfig {
        webhook_env: default_webhook_env(),
        timeout_secs: default_notify_timeout(),
    }
}

fn default_secrets() -> Vec<String> {
    vec![
        "AWS_ACCESS_KEY_ID".to_string(),
        "AWS_SECRET_ACCESS_KEY".to_string(),
        "SONAR_TOKEN".to_string(),
        "SONAR_HOST_URL".to_string(),
    ]
}

// =============================================================================
// Loading functions
// =============================================================================

/// Load defaults, merging file config with built-in defaults.
/// If dominion.json is missing or invalid, silently returns built-in defaults.
pub fn load_defaults() -> Defaults {
    load_config().defaults
}

/// Load the full dominion.json config, falling back to defaults on any error.
pub fn load_config() -> DominionConfig {
    match load_config_from_file() {
        Ok(Some(config)) => config,
        Ok(None) => DominionConfig::default(),
        Err(err) => {
            log_status!("config", "Ignoring dominion.json: {}", err.message);
            DominionConfig::default()
        }
    }
}

/// Attempt to load config from dominion.json file.
fn load_config_from_file() -> crate::Result<Option<DominionConfig>> {
    let path = paths::dominion_json()?;

    if !path.exists() {
        return Ok(None);
    }

    let content = io::read_file(&path, &format!("read {}", path.display()))?;

    let config: DominionConfig = serde_json::from_str(&content)
        .map_err(|e| crate::Error::config_invalid_json(path.display().to_string(), e))?;

    Ok(Some(config))
}

/// Check if dominion.json file exists
pub fn config_exists() -> bool {
    paths::dominion_json()
        .map(|p| p.exists())
        .unwrap_or(false)
}

/// Delete dominion.json file (reset to defaults)
pub fn reset_config() -> crate::Result<bool> {
    let path = paths::dominion_json()?;

    if path.exists() {
        fs::remove_file(&path).map_err(|e| {
            crate::Error::internal_io(e.to_string(), Some(format!("delete {}", path.display())))
        })?;
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Get the path to dominion.json (for display purposes)
pub fn config_path() -> crate::Result<String> {
    Ok(paths::dominion_json()?.display().to_string())
}

/// Get built-in defaults (ignoring any file config)
pub fn builtin_defaults() -> Defaults {
    Defaults::default()
}
