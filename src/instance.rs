use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{AgentError, AgentResult};

/// Reserved environment key carrying the process start command.
pub const START_KEY: &str = "START";

lazy_static! {
    static ref INSTANCE_ID: Regex = Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap();
    static ref JAVA_PREFIX: Regex = Regex::new(r"^(java\s+)").unwrap();
}

/// Instance ids double as container names and volume directory names.
pub fn validate_instance_id(id: &str) -> AgentResult<()> {
    if INSTANCE_ID.is_match(id) {
        Ok(())
    } else {
        Err(AgentError::InvalidRequest(format!(
            "Invalid container ID: {:?}",
            id
        )))
    }
}

/// Declarative parameters of a managed instance.
#[derive(Debug, Clone)]
pub struct InstanceSpec {
    pub id: String,
    pub image: String,
    pub env: EnvironmentMap,
    pub ports: PortBindings,
    pub memory_mib: Option<u64>,
    pub cpu_count: Option<f64>,
}

/// `"{containerPort}/tcp"` → host ports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PortBindings(BTreeMap<String, Vec<String>>);

impl PortBindings {
    /// Parses comma separated `hostPort:containerPort` pairs. Malformed pairs
    /// are dropped with a warning.
    pub fn parse(ports: &str) -> Self {
        let mut bindings = BTreeMap::new();

        if ports.trim().is_empty() {
            return Self(bindings);
        }

        for mapping in ports.split(',') {
            let mut parts = mapping.split(':');
            let host = parts.next().map(str::trim).unwrap_or("");
            let container = parts.next().map(str::trim).unwrap_or("");

            match (host.parse::<u16>(), container.parse::<u16>()) {
                (Ok(host_port), Ok(container_port)) => {
                    bindings.insert(
                        format!("{}/tcp", container_port),
                        vec![host_port.to_string()],
                    );
                }
                _ => warn!("Invalid port mapping: {:?}", mapping),
            }
        }

        Self(bindings)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    pub fn get(&self, key: &str) -> Option<&Vec<String>> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Insertion-ordered environment of an instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentMap {
    entries: Vec<(String, String)>,
}

impl EnvironmentMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the map from a panel-supplied JSON value. Anything other than an
    /// object yields an empty map; non-string values are stringified.
    pub fn from_json(value: &Value) -> Self {
        let mut env = Self::new();
        if let Value::Object(map) = value {
            for (key, value) in map {
                let value = match value {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                env.insert(key.clone(), value);
            }
        }
        env
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Replaces an existing value in place, or appends a new entry.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// `KEY=value` strings in insertion order.
    pub fn to_docker_env(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect()
    }
}

/// Resolves `$KEYWORD(name)` tokens against an environment map.
#[derive(Debug, Clone)]
pub struct TemplateResolver {
    pattern: Regex,
}

impl TemplateResolver {
    pub fn new(keyword: &str) -> AgentResult<Self> {
        let pattern = Regex::new(&format!(r"\${}\((\w+)\)", regex::escape(keyword)))
            .map_err(|e| AgentError::ConfigError(format!("Invalid template keyword: {}", e)))?;
        Ok(Self { pattern })
    }

    /// Unknown or empty variables resolve to an empty string.
    pub fn resolve(&self, input: &str, env: &EnvironmentMap) -> String {
        self.pattern
            .replace_all(input, |caps: &regex::Captures<'_>| {
                let name = &caps[1];
                match env.get(name).filter(|value| !value.is_empty()) {
                    Some(value) => value.to_string(),
                    None => {
                        warn!("Variable {:?} not found in environment", name);
                        String::new()
                    }
                }
            })
            .into_owned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPlatform {
    Linux,
    MacOs,
    Windows,
    Other,
}

impl HostPlatform {
    pub fn detect() -> Self {
        match std::env::consts::OS {
            "linux" => HostPlatform::Linux,
            "macos" => HostPlatform::MacOs,
            "windows" => HostPlatform::Windows,
            _ => HostPlatform::Other,
        }
    }
}

/// A named rewrite of an instance environment, applied before container
/// creation on the platforms it targets.
pub trait EnvTransform: Send + Sync {
    fn name(&self) -> &'static str;
    fn applies_to(&self, platform: HostPlatform) -> bool;
    fn apply(&self, env: &mut EnvironmentMap);
}

/// Java 21 images crash on Apple silicon unless SVE is disabled.
pub struct JvmSveWorkaround;

impl EnvTransform for JvmSveWorkaround {
    fn name(&self) -> &'static str {
        "jvm-disable-sve"
    }

    fn applies_to(&self, platform: HostPlatform) -> bool {
        platform == HostPlatform::MacOs
    }

    fn apply(&self, env: &mut EnvironmentMap) {
        let Some(start) = env.get(START_KEY) else {
            return;
        };
        if start.contains("UseSVE") {
            return;
        }
        let patched = JAVA_PREFIX
            .replace(start, "${1}-XX:UseSVE=0 ")
            .into_owned();
        env.insert(START_KEY, patched);
    }
}

pub struct EnvTransforms {
    platform: HostPlatform,
    transforms: Vec<Box<dyn EnvTransform>>,
}

impl EnvTransforms {
    pub fn new(platform: HostPlatform, transforms: Vec<Box<dyn EnvTransform>>) -> Self {
        Self {
            platform,
            transforms,
        }
    }

    pub fn builtin(platform: HostPlatform) -> Self {
        Self::new(platform, vec![Box::new(JvmSveWorkaround)])
    }

    /// Applies every transform targeting the host platform and returns the
    /// names of those applied.
    pub fn apply(&self, env: &mut EnvironmentMap) -> Vec<&'static str> {
        let mut applied = Vec::new();
        for transform in &self.transforms {
            if transform.applies_to(self.platform) {
                transform.apply(env);
                debug!("Applied environment transform {}", transform.name());
                applied.push(transform.name());
            }
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_valid_pairs() {
        let ports = PortBindings::parse("25565:25565,8080:80");
        assert_eq!(ports.len(), 2);
        assert_eq!(ports.get("25565/tcp"), Some(&vec!["25565".to_string()]));
        assert_eq!(ports.get("80/tcp"), Some(&vec!["8080".to_string()]));
    }

    #[test]
    fn test_parse_drops_malformed_pairs() {
        for input in ["abc:80", "80", "", ":", "80:", ":80", "70000:80", "80:abc", ",,"] {
            assert!(
                PortBindings::parse(input).is_empty(),
                "unexpected binding for {:?}",
                input
            );
        }
    }

    #[test]
    fn test_parse_keeps_valid_entries_next_to_bad_ones() {
        let ports = PortBindings::parse("abc:80, 25565:25565 ,x");
        assert_eq!(ports.len(), 1);
        assert!(ports.get("25565/tcp").is_some());
    }

    #[test]
    fn test_environment_preserves_order_and_replaces_in_place() {
        let mut env = EnvironmentMap::from_json(&json!({
            "SERVER_JAR": "server.jar",
            "MEMORY": 2048,
            "EULA": true,
        }));
        env.insert("MEMORY", "4096");
        env.insert(START_KEY, "java -jar server.jar");

        assert_eq!(
            env.to_docker_env(),
            vec![
                "SERVER_JAR=server.jar",
                "MEMORY=4096",
                "EULA=true",
                "START=java -jar server.jar",
            ]
        );
    }

    #[test]
    fn test_environment_from_non_object_is_empty() {
        assert!(EnvironmentMap::from_json(&json!("nope")).to_docker_env().is_empty());
        assert!(EnvironmentMap::from_json(&Value::Null).to_docker_env().is_empty());
    }

    #[test]
    fn test_template_tokens_resolve_against_env() {
        let resolver = TemplateResolver::new("ALVKT").unwrap();
        let mut env = EnvironmentMap::new();
        env.insert("SERVER_JAR", "paper.jar");
        env.insert("EMPTY", "");

        assert_eq!(
            resolver.resolve("java -jar $ALVKT(SERVER_JAR) nogui", &env),
            "java -jar paper.jar nogui"
        );
        assert_eq!(resolver.resolve("a$ALVKT(MISSING)b$ALVKT(EMPTY)c", &env), "abc");
        assert_eq!(resolver.resolve("$OTHER(SERVER_JAR)", &env), "$OTHER(SERVER_JAR)");
    }

    #[test]
    fn test_jvm_workaround_only_on_macos() {
        let mut env = EnvironmentMap::new();
        env.insert(START_KEY, "java -Xmx2G -jar server.jar");

        let mut linux_env = env.clone();
        let applied = EnvTransforms::builtin(HostPlatform::Linux).apply(&mut linux_env);
        assert!(applied.is_empty());
        assert_eq!(linux_env, env);

        let applied = EnvTransforms::builtin(HostPlatform::MacOs).apply(&mut env);
        assert_eq!(applied, vec!["jvm-disable-sve"]);
        assert_eq!(
            env.get(START_KEY),
            Some("java -XX:UseSVE=0 -Xmx2G -jar server.jar")
        );

        // Applying twice does not stack the flag.
        EnvTransforms::builtin(HostPlatform::MacOs).apply(&mut env);
        assert_eq!(
            env.get(START_KEY),
            Some("java -XX:UseSVE=0 -Xmx2G -jar server.jar")
        );
    }

    #[test]
    fn test_jvm_workaround_ignores_non_java_commands() {
        let mut env = EnvironmentMap::new();
        env.insert(START_KEY, "./bedrock_server");
        EnvTransforms::builtin(HostPlatform::MacOs).apply(&mut env);
        assert_eq!(env.get(START_KEY), Some("./bedrock_server"));
    }

    #[test]
    fn test_instance_id_validation() {
        assert!(validate_instance_id("3f2a-b_9").is_ok());
        assert!(validate_instance_id("").is_err());
        assert!(validate_instance_id("../etc").is_err());
        assert!(validate_instance_id("a/b").is_err());
        assert!(validate_instance_id(&"x".repeat(65)).is_err());
    }
}
