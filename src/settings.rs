use color_eyre::eyre::{self, eyre};
use once_cell::sync::Lazy;
use simple_kv_store::KubernetesResource;
use std::{env, process, str::FromStr, time::Duration};

pub static ENV_PREFIX: Lazy<String> = Lazy::new(|| "SWTIMER".to_string());

pub static SETTINGS: Lazy<Settings> = Lazy::new(Settings::default);

pub const CHANNEL_CAPACITY: usize = 65535;

fn env_name(name: &str) -> String {
    format!("{}_{}", *ENV_PREFIX, name)
}

#[derive(Debug)]
pub struct Settings {
    pub value_store_config: ValueStoreConfig,
    pub storage_key: String,
    pub entities: SeedEntities,
    /// Idle tick of the event loop; a store that failed to save is retried on every tick.
    pub store_retry_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            value_store_config: generic_setting("VALUE_STORE_CONFIG", ValueStoreConfig::InMemory),
            storage_key: string_setting("STORAGE_KEY", "switch_timer"),
            entities: generic_setting("ENTITIES", SeedEntities::default()),
            store_retry_interval: Duration::from_secs(number_setting("STORE_RETRY_SECS", 60u64)),
        }
    }
}

#[derive(Debug)]
pub enum ValueStoreConfig {
    InMemory,
    Kubernetes {
        name: String,
        namespace: String,
        ressource_type: KubernetesResource,
    },
    Sqlite {
        path: String,
    },
}

impl TryFrom<String> for ValueStoreConfig {
    type Error = eyre::Report;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let parts: Vec<&str> = s.splitn(2, ':').collect();

        match (parts[0].to_lowercase().as_str(), parts.get(1)) {
            ("inmemory", _) => Ok(ValueStoreConfig::InMemory),
            ("sqlite", Some(path)) if !path.is_empty() => Ok(ValueStoreConfig::Sqlite { path: path.to_string() }),
            ("kubernetes", Some(spec)) => {
                let kube_parts: Vec<&str> = spec.splitn(3, ',').collect();
                let ressource_type = match kube_parts[0] {
                    "secret" => KubernetesResource::Secret,
                    _ => KubernetesResource::ConfigMap,
                };
                let Some(name) = kube_parts.get(1).filter(|n| !n.is_empty()) else {
                    return Err(eyre!("Missing kubernetes resource name in [{}]", s));
                };
                let namespace = kube_parts.get(2).copied().unwrap_or("default");
                Ok(ValueStoreConfig::Kubernetes {
                    name: name.to_string(),
                    namespace: namespace.to_string(),
                    ressource_type,
                })
            }
            _ => Err(eyre!(
                "Invalid format. Use 'inmemory', 'sqlite:/path/to/filename.db' or 'kubernetes:secret|configmap,name[,namespace]'"
            )),
        }
    }
}

/// Source entity registered on the in-process host at startup, e.g. `switch.lamp=Desk Lamp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedEntity {
    pub entity_id: String,
    pub friendly_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedEntities(pub Vec<SeedEntity>);

impl FromStr for SeedEntity {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (entity_id, friendly_name) = match s.split_once('=') {
            Some((id, name)) => (id.trim(), Some(name.trim().to_string())),
            None => (s.trim(), None),
        };
        match entity_id.split_once('.') {
            Some((domain, object_id)) if !domain.is_empty() && !object_id.is_empty() => Ok(SeedEntity {
                entity_id: entity_id.to_string(),
                friendly_name: friendly_name.filter(|n| !n.is_empty()),
            }),
            _ => Err(eyre!("Invalid entity id [{}]. Use '<domain>.<object_id>[=Friendly name]'", entity_id)),
        }
    }
}

impl TryFrom<String> for SeedEntities {
    type Error = eyre::Report;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<_>, _>>()
            .map(SeedEntities)
    }
}

fn or_exit<T, E: std::fmt::Display>(value: Result<T, E>, msg: &str) -> T {
    match value {
        Ok(value) => value,
        Err(e) => {
            eprintln!("Error: {}: {}", msg, e);
            process::exit(1);
        }
    }
}

fn string_setting(name: &str, default: impl Into<String>) -> String {
    env::var(env_name(name)).ok().unwrap_or(default.into())
}

fn number_setting<T>(name: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env::var(env_name(name))
        .ok()
        .map(|value| or_exit(value.parse::<T>(), "Not a valid number!"))
        .unwrap_or(default)
}

fn generic_setting<T>(name: &str, default: T) -> T
where
    T: TryFrom<String>,
    T::Error: std::fmt::Display,
{
    env::var(env_name(name))
        .ok()
        .map(|value| or_exit(value.try_into(), "Invalid setting supplied!"))
        .unwrap_or(default)
}
