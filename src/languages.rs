//! Language configuration for compilation and execution

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

/// Configuration for a supported programming language
#[derive(Debug, Clone, PartialEq)]
pub struct LanguageConfig {
    /// Canonical language tag
    pub name: String,
    /// Name of the source file (e.g., "main.cpp")
    pub source_file: String,
    /// Compile command (None for interpreted languages)
    pub compile_command: Option<Vec<String>>,
    /// Run command
    pub run_command: Vec<String>,
    /// Time limit multiplier and bonus: (multiplier, bonus_seconds)
    /// actual_time = base_time * multiplier + bonus
    pub time_limit: Option<(u32, u32)>,
    /// Memory limit multiplier and bonus: (multiplier, bonus_mb)
    /// actual_memory = base_memory * multiplier + bonus
    pub memory_limit: Option<(u32, u32)>,
}

impl LanguageConfig {
    /// Adjusted time limit in seconds
    pub fn calculate_time_limit(&self, base_secs: f64) -> f64 {
        match self.time_limit {
            Some((multiplier, bonus_seconds)) => {
                base_secs * multiplier as f64 + bonus_seconds as f64
            }
            None => base_secs,
        }
    }

    /// Adjusted memory limit in KiB
    pub fn calculate_memory_limit(&self, base_kb: u64) -> u64 {
        match self.memory_limit {
            Some((multiplier, bonus_mb)) => base_kb * multiplier as u64 + bonus_mb as u64 * 1024,
            None => base_kb,
        }
    }
}

/// Raw TOML configuration for a language
#[derive(Debug, Deserialize)]
struct RawLanguageConfig {
    source_file: String,
    compile_command: Option<String>,
    run_command: String,
    #[serde(default)]
    time_limit: Vec<String>,
    #[serde(default)]
    memory_limit: Vec<String>,
    #[serde(default)]
    aliases: Vec<String>,
}

/// Language tag (or alias) to configuration
#[derive(Debug, Clone, Default)]
pub struct LanguageTable {
    languages: HashMap<String, LanguageConfig>,
}

impl LanguageTable {
    /// Load language configurations from a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read language config {:?}", path))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let raw_configs: HashMap<String, RawLanguageConfig> = toml::from_str(content)?;
        let mut languages = HashMap::new();

        for (name, raw) in raw_configs {
            let parse_limit =
                |raw_limit: Vec<String>, kind: &str| -> anyhow::Result<Option<(u32, u32)>> {
                    if raw_limit.is_empty() {
                        return Ok(None);
                    }
                    if raw_limit.len() != 2 {
                        anyhow::bail!("Invalid {} limit for {}: {:?}", kind, name, raw_limit);
                    }
                    let multiplier = raw_limit[0].parse::<u32>().with_context(|| {
                        format!("Invalid {} multiplier for {}: {}", kind, name, raw_limit[0])
                    })?;
                    let offset = raw_limit[1].parse::<u32>().with_context(|| {
                        format!("Invalid {} offset for {}: {}", kind, name, raw_limit[1])
                    })?;
                    Ok(Some((multiplier, offset)))
                };

            let config = LanguageConfig {
                name: name.to_lowercase(),
                source_file: raw.source_file,
                compile_command: raw.compile_command.map(|cmd| into_command(&cmd)),
                run_command: into_command(&raw.run_command),
                time_limit: parse_limit(raw.time_limit, "time")?,
                memory_limit: parse_limit(raw.memory_limit, "memory")?,
            };

            if config.run_command.is_empty() {
                anyhow::bail!("Empty run command for {}", name);
            }

            for alias in raw.aliases {
                languages.insert(alias.to_lowercase(), config.clone());
            }
            languages.insert(name.to_lowercase(), config);
        }

        Ok(Self { languages })
    }

    /// Get language configuration by tag or alias
    pub fn get(&self, language: &str) -> Option<&LanguageConfig> {
        self.languages.get(&language.to_lowercase())
    }

    /// Every accepted tag, aliases included, sorted
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.languages.keys().cloned().collect();
        tags.sort();
        tags
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &LanguageConfig)> {
        self.languages.iter()
    }
}

fn into_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[c]
source_file = "main.c"
compile_command = "gcc -O2 -o main main.c"
run_command = "./main"

[python]
source_file = "main.py"
run_command = "python3 main.py"
aliases = ["py", "Python3"]
time_limit = ["3", "2"]
memory_limit = ["2", "32"]
"#;

    #[test]
    fn test_load_languages_with_aliases() {
        let table = LanguageTable::from_toml_str(CONFIG).unwrap();

        let c = table.get("C").unwrap();
        assert_eq!(c.compile_command.as_ref().unwrap()[0], "gcc");
        assert_eq!(c.run_command, vec!["./main"]);

        let py = table.get("python3").unwrap();
        assert_eq!(py.name, "python");
        assert!(py.compile_command.is_none());
        assert_eq!(table.tags(), vec!["c", "py", "python", "python3"]);
    }

    #[test]
    fn test_limit_adjustments() {
        let table = LanguageTable::from_toml_str(CONFIG).unwrap();

        let py = table.get("py").unwrap();
        assert_eq!(py.calculate_time_limit(1.5), 6.5);
        assert_eq!(py.calculate_memory_limit(65536), 65536 * 2 + 32 * 1024);

        let c = table.get("c").unwrap();
        assert_eq!(c.calculate_time_limit(1.5), 1.5);
        assert_eq!(c.calculate_memory_limit(1024), 1024);
    }

    #[test]
    fn test_invalid_limit_is_rejected() {
        let bad = r#"
[c]
source_file = "main.c"
run_command = "./main"
time_limit = ["x", "1"]
"#;
        assert!(LanguageTable::from_toml_str(bad).is_err());
    }
}
