//! Template expansion behind a swappable renderer
//!
//! The deploy pipeline only ever sees `render(filename, raw, bindings) ->
//! rendered text`; the engine behind it can change freely. The default
//! implementation uses MiniJinja in strict mode.

use indexmap::IndexMap;
use minijinja::{Environment, UndefinedBehavior};
use rand::Rng;

use crate::error::{DeployError, Result};

const HEX_CHARS: &[u8] = b"0123456789abcdef";

/// Variables available inside templates
#[derive(Debug, Clone)]
pub struct Bindings {
    values: IndexMap<String, String>,
}

impl Bindings {
    /// Build the template variables for one deploy: user bindings plus
    /// `current_sha` and a synthetic per-deploy `deployment_id`.
    pub fn new(current_sha: &str, user: IndexMap<String, String>) -> Self {
        let mut values = user;
        values.insert("current_sha".to_string(), current_sha.to_string());
        values.insert("deployment_id".to_string(), deployment_id(current_sha));
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn values(&self) -> &IndexMap<String, String> {
        &self.values
    }
}

/// `<first 8 sha chars>-<8 random hex chars>`, unique per deploy invocation
fn deployment_id(current_sha: &str) -> String {
    let prefix_len = current_sha.len().min(8);
    let mut rng = rand::thread_rng();
    let suffix: String = (0..8)
        .map(|_| HEX_CHARS[rng.gen_range(0..HEX_CHARS.len())] as char)
        .collect();
    format!("{}-{}", &current_sha[..prefix_len], suffix)
}

/// Parse `k1=v1,k2=v2` pairs from the CLI
pub fn parse_binding_pairs(raw: &str) -> Result<IndexMap<String, String>> {
    let mut pairs = IndexMap::new();
    for pair in raw.split(',').filter(|p| !p.trim().is_empty()) {
        match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                pairs.insert(key.trim().to_string(), value.trim().to_string());
            }
            _ => {
                return Err(DeployError::invalid_config(format!(
                    "binding '{}' is not of the form key=value",
                    pair
                )))
            }
        }
    }
    Ok(pairs)
}

/// Maps filename + raw text + bindings to expanded text
pub trait Renderer {
    fn render(&self, filename: &str, raw: &str, bindings: &Bindings) -> Result<String>;
}

/// MiniJinja-backed renderer, strict about undefined variables
pub struct JinjaRenderer;

impl Renderer for JinjaRenderer {
    fn render(&self, filename: &str, raw: &str, bindings: &Bindings) -> Result<String> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.render_str(raw, bindings.values())
            .map_err(|e| DeployError::Render {
                template: filename.to_string(),
                reason: e.to_string(),
            })
    }
}
