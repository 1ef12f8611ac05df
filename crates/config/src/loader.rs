use std::fmt::Write;
use std::path::Path;

use anyhow::bail;
use indoc::indoc;
use serde::Deserialize;
use toml::Value;

use crate::{Config, env::resolve_env};

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let mut raw_config: Value = toml::from_str(&content)?;

    resolve_env_references(&mut Vec::new(), &mut raw_config)?;

    let config = Config::deserialize(raw_config)?;
    validate(&config)?;

    Ok(config)
}

/// Walk every string in the raw document and substitute exact-match
/// environment references. Non-matching strings are left untouched, so
/// the pass is safe to run over the whole tree.
fn resolve_env_references<'a>(path: &mut Vec<Result<&'a str, usize>>, value: &'a mut Value) -> anyhow::Result<()> {
    match value {
        Value::String(s) => {
            let resolved = match resolve_env(s) {
                Ok(resolved) => resolved.into_owned(),
                Err(err) => {
                    bail!(
                        "Failed to resolve configuration value at path '{}': {err}",
                        format_path(path)
                    );
                }
            };

            *s = resolved;
        }
        Value::Array(values) => {
            for (i, value) in values.iter_mut().enumerate() {
                path.push(Err(i));
                resolve_env_references(path, value)?;
                path.pop();
            }
        }
        Value::Table(map) => {
            for (key, value) in map {
                path.push(Ok(key.as_str()));
                resolve_env_references(path, value)?;
                path.pop();
            }
        }
        Value::Integer(_) | Value::Float(_) | Value::Boolean(_) | Value::Datetime(_) => (),
    }

    Ok(())
}

fn format_path(path: &[Result<&str, usize>]) -> String {
    let mut p = String::new();

    for segment in path {
        match segment {
            Ok(s) => {
                p.push_str(s);
                p.push('.');
            }
            Err(i) => write!(p, "[{i}]").unwrap(),
        }
    }

    if p.ends_with('.') {
        p.pop();
    }

    p
}

pub(crate) fn validate(config: &Config) -> anyhow::Result<()> {
    if !config.has_providers() {
        bail!(indoc! {r#"
            No providers configured. Switchboard requires at least one upstream provider to function.

            Example configuration:

              [providers.openai]
              api_base_url = "https://api.openai.com/v1"
              api_key = "$OPENAI_API_KEY"
              models = ["gpt-5"]
        "#});
    }

    for (model, provider) in &config.routes {
        if !config.providers.contains_key(provider) {
            bail!("Route for model '{model}' references unknown provider '{provider}'");
        }
    }

    for (name, provider) in &config.providers {
        if provider.api_base_url.trim().is_empty() {
            bail!("Provider '{name}' has an empty api_base_url");
        }
    }

    Ok(())
}
