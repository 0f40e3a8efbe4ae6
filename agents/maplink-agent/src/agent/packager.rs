//! Packager
//!
//! Builds the [`DeploymentUnit`]: the agent definition with its tool
//! registrations, every Python dependency pinned to an exact version, and the
//! bootstrap steps the execution image needs before the agent can start.

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

use crate::agent::definition::{AgentDefinition, MapsToolset, RequiredToolchain, MAPS_API_KEY_VAR};
use crate::env::keys;
use crate::error::{MaplinkError, Result};

/// File name of the staged dependencies archive
pub const DEPENDENCIES_ARCHIVE: &str = "dependencies.tar.gz";

/// Path of the Node.js bootstrap script inside the staged package
pub const INSTALL_NPX_PATH: &str = "installation_scripts/install_npx.sh";

const INSTALL_NPX_SCRIPT: &str = r#"#!/bin/bash
set -euo pipefail

# The Agent Engine base image ships without Node.js; the maps MCP server runs via npx.
if command -v npx >/dev/null 2>&1; then
    echo "npx already installed: $(npx --version)"
    exit 0
fi

apt-get update
apt-get install -y --no-install-recommends ca-certificates curl gnupg
curl -fsSL https://deb.nodesource.com/setup_20.x | bash -
apt-get install -y --no-install-recommends nodejs
npx --version
"#;

/// Requirements the maps assistant is deployed with
pub const DEFAULT_REQUIREMENTS: &[&str] = &[
    "cloudpickle",
    "google-adk>=1.15.1",
    "google-genai",
    "google-cloud-aiplatform[agent-engines]==1.119.0",
    "pydantic",
    "python-dotenv",
];

/// One entry of the dependency lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedPackage {
    pub version: String,
    /// Packages this one pulls in, pinned through the same lock
    #[serde(default)]
    pub requires: Vec<String>,
}

/// Exact versions every deploy resolves against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyLock {
    packages: BTreeMap<String, LockedPackage>,
}

impl DependencyLock {
    pub fn new(packages: BTreeMap<String, LockedPackage>) -> Self {
        Self {
            packages: packages
                .into_iter()
                .map(|(name, pkg)| (normalize(&name), pkg))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&LockedPackage> {
        self.packages.get(&normalize(name))
    }
}

impl Default for DependencyLock {
    fn default() -> Self {
        let entry = |version: &str, requires: &[&str]| LockedPackage {
            version: version.to_string(),
            requires: requires.iter().map(|r| r.to_string()).collect(),
        };

        let mut packages = BTreeMap::new();
        packages.insert("cloudpickle".into(), entry("3.1.1", &[]));
        packages.insert(
            "google-adk".into(),
            entry("1.15.1", &["google-genai", "mcp", "pydantic", "python-dotenv"]),
        );
        packages.insert("google-genai".into(), entry("1.38.0", &["google-auth", "pydantic"]));
        packages.insert(
            "google-cloud-aiplatform".into(),
            entry("1.119.0", &["google-auth", "google-cloud-storage", "pydantic"]),
        );
        packages.insert("google-cloud-storage".into(), entry("2.19.0", &["google-auth"]));
        packages.insert("google-auth".into(), entry("2.40.3", &[]));
        packages.insert("mcp".into(), entry("1.14.1", &["pydantic"]));
        packages.insert("pydantic".into(), entry("2.11.9", &[]));
        packages.insert("python-dotenv".into(), entry("1.1.1", &[]));
        Self::new(packages)
    }
}

/// Dependency pinned to an exact version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinnedDependency {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extras: Vec<String>,
    pub version: String,
}

impl fmt::Display for PinnedDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.extras.is_empty() {
            write!(f, "{}=={}", self.name, self.version)
        } else {
            write!(f, "{}[{}]=={}", self.name, self.extras.join(","), self.version)
        }
    }
}

/// Script run on the execution image before the agent starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapStep {
    pub path: String,
    pub script: String,
    pub provides: RequiredToolchain,
}

impl BootstrapStep {
    fn for_toolchain(toolchain: RequiredToolchain) -> Self {
        match toolchain {
            RequiredToolchain::NodeJs => Self {
                path: INSTALL_NPX_PATH.to_string(),
                script: INSTALL_NPX_SCRIPT.to_string(),
                provides: toolchain,
            },
        }
    }
}

/// Packaged artifact handed to the deployment client
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentUnit {
    definition: AgentDefinition,
    display_name: String,
    requirements: Vec<PinnedDependency>,
    bootstrap: Vec<BootstrapStep>,
    extra_packages: Vec<String>,
    #[serde(skip)]
    env_vars: BTreeMap<String, String>,
}

impl DeploymentUnit {
    pub fn definition(&self) -> &AgentDefinition {
        &self.definition
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn requirements(&self) -> &[PinnedDependency] {
        &self.requirements
    }

    pub fn bootstrap(&self) -> &[BootstrapStep] {
        &self.bootstrap
    }

    pub fn extra_packages(&self) -> &[String] {
        &self.extra_packages
    }

    /// Runtime environment for the deployed agent. Never serialized into the
    /// staged artifact.
    pub fn env_vars(&self) -> &BTreeMap<String, String> {
        &self.env_vars
    }

    /// `requirements.txt` contents
    pub fn requirements_txt(&self) -> String {
        let mut out = String::new();
        for dep in &self.requirements {
            out.push_str(&dep.to_string());
            out.push('\n');
        }
        out
    }

    /// Serialized agent definition with its tool registrations
    pub fn definition_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.definition).map_err(|e| {
            MaplinkError::ToolProviderConfig(format!("cannot serialize agent definition: {e}"))
        })
    }

    /// Gzipped tarball of the extra packages: bootstrap scripts at their
    /// declared paths, and the agent definition inside the agent package.
    pub fn dependencies_archive(&self) -> Result<Vec<u8>> {
        let archive_err = |e: std::io::Error| {
            MaplinkError::ToolProviderConfig(format!("cannot build dependencies archive: {e}"))
        };
        let definition = self.definition_json()?;

        let mut archive = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for package in &self.extra_packages {
            let (path, content, mode) = match self.bootstrap.iter().find(|step| step.path == *package) {
                Some(step) => (step.path.clone(), step.script.as_bytes(), 0o755),
                None => (
                    format!("{}/agent_definition.json", package.trim_start_matches("./")),
                    definition.as_bytes(),
                    0o644,
                ),
            };

            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(mode);
            header.set_mtime(0);
            archive.append_data(&mut header, &path, content).map_err(archive_err)?;
        }

        archive
            .into_inner()
            .and_then(GzEncoder::finish)
            .map_err(archive_err)
    }

    /// Content hash of everything that gets staged
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(self).unwrap_or_default());
        hex::encode(hasher.finalize())
    }
}

/// Turns an agent definition into a deployable unit
#[derive(Debug, Clone)]
pub struct Packager {
    lock: DependencyLock,
    requirements: Vec<String>,
}

impl Default for Packager {
    fn default() -> Self {
        Self::new(DependencyLock::default())
    }
}

impl Packager {
    pub fn new(lock: DependencyLock) -> Self {
        Self {
            lock,
            requirements: DEFAULT_REQUIREMENTS.iter().map(|r| r.to_string()).collect(),
        }
    }

    /// Replace the top-level requirement list
    pub fn with_requirements<I, S>(mut self, requirements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requirements = requirements.into_iter().map(Into::into).collect();
        self
    }

    /// Build the deployable unit for `definition` using `toolset`
    pub fn package(
        &self,
        definition: &AgentDefinition,
        toolset: &MapsToolset,
        display_name: &str,
    ) -> Result<DeploymentUnit> {
        let api_key = toolset.api_key().unwrap_or_default();
        if is_placeholder(api_key) {
            return Err(MaplinkError::ToolProviderConfig(format!(
                "{MAPS_API_KEY_VAR} is missing or still a placeholder"
            )));
        }

        let requirements = self.resolve()?;
        debug!(count = requirements.len(), "Dependencies pinned");

        let mut env_vars = toolset.env.clone();
        env_vars.insert(keys::MODEL.to_string(), definition.model().to_string());

        let bootstrap = vec![BootstrapStep::for_toolchain(toolset.toolchain())];
        let mut extra_packages = vec!["./google_maps_mcp_agent".to_string()];
        extra_packages.extend(bootstrap.iter().map(|step| step.path.clone()));

        let unit = DeploymentUnit {
            definition: definition.clone(),
            display_name: display_name.to_string(),
            requirements,
            bootstrap,
            extra_packages,
            env_vars,
        };

        info!(
            agent = %definition.name(),
            requirements = unit.requirements.len(),
            bootstrap_steps = unit.bootstrap.len(),
            "Deployment unit packaged"
        );
        Ok(unit)
    }

    /// Resolve every requirement and its lock-declared dependencies
    fn resolve(&self) -> Result<Vec<PinnedDependency>> {
        let mut pinned: BTreeMap<String, PinnedDependency> = BTreeMap::new();
        let mut pending: Vec<(String, Requirement)> = Vec::new();

        for raw in &self.requirements {
            pending.push((raw.clone(), Requirement::parse(raw)?));
        }

        while let Some((raw, requirement)) = pending.pop() {
            let key = normalize(&requirement.name);
            let locked = self.lock.get(&key).ok_or_else(|| MaplinkError::UnresolvedDependency {
                requirement: raw.clone(),
                reason: "package is not in the dependency lock".to_string(),
            })?;

            if let Some((op, wanted)) = &requirement.constraint {
                if !satisfies(&locked.version, *op, wanted, &raw)? {
                    return Err(MaplinkError::UnresolvedDependency {
                        requirement: raw,
                        reason: format!("locked version {} does not satisfy it", locked.version),
                    });
                }
            }

            match pinned.entry(key) {
                Entry::Occupied(mut existing) => {
                    let existing = existing.get_mut();
                    for extra in requirement.extras {
                        if !existing.extras.contains(&extra) {
                            existing.extras.push(extra);
                        }
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(PinnedDependency {
                        name: requirement.name.clone(),
                        extras: requirement.extras,
                        version: locked.version.clone(),
                    });
                    for transitive in &locked.requires {
                        pending.push((transitive.clone(), Requirement::parse(transitive)?));
                    }
                }
            }
        }

        Ok(pinned.into_values().collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ge,
    Gt,
    Le,
    Lt,
    Compatible,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Requirement {
    name: String,
    extras: Vec<String>,
    constraint: Option<(Op, String)>,
}

impl Requirement {
    fn parse(raw: &str) -> Result<Self> {
        let unresolved = |reason: &str| MaplinkError::UnresolvedDependency {
            requirement: raw.to_string(),
            reason: reason.to_string(),
        };

        let raw_trimmed = raw.trim();
        let split_at = raw_trimmed
            .find(|c: char| matches!(c, '=' | '>' | '<' | '~' | '!'))
            .unwrap_or(raw_trimmed.len());
        let (head, spec) = raw_trimmed.split_at(split_at);

        let (name, extras) = match head.split_once('[') {
            Some((name, rest)) => {
                let inner = rest
                    .strip_suffix(']')
                    .ok_or_else(|| unresolved("unterminated extras"))?;
                let extras = inner
                    .split(',')
                    .map(|e| e.trim().to_string())
                    .filter(|e| !e.is_empty())
                    .collect();
                (name.trim(), extras)
            }
            None => (head.trim(), Vec::new()),
        };
        if name.is_empty() {
            return Err(unresolved("missing package name"));
        }

        let constraint = if spec.is_empty() {
            None
        } else {
            let ops = [
                ("==", Op::Eq),
                (">=", Op::Ge),
                ("<=", Op::Le),
                ("~=", Op::Compatible),
                (">", Op::Gt),
                ("<", Op::Lt),
            ];
            let (op, version) = ops
                .iter()
                .find_map(|(token, op)| spec.strip_prefix(token).map(|v| (*op, v.trim())))
                .ok_or_else(|| unresolved("unsupported version operator"))?;
            if version.is_empty() || version.contains(',') {
                return Err(unresolved("expected a single version constraint"));
            }
            Some((op, version.to_string()))
        };

        Ok(Self {
            name: name.to_string(),
            extras,
            constraint,
        })
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace('_', "-")
}

fn parse_version(version: &str, raw: &str) -> Result<Vec<u64>> {
    version
        .split('.')
        .map(|part| {
            part.parse::<u64>().map_err(|_| MaplinkError::UnresolvedDependency {
                requirement: raw.to_string(),
                reason: format!("unsupported version `{version}`"),
            })
        })
        .collect()
}

fn compare(a: &[u64], b: &[u64]) -> std::cmp::Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let left = a.get(i).copied().unwrap_or(0);
        let right = b.get(i).copied().unwrap_or(0);
        match left.cmp(&right) {
            std::cmp::Ordering::Equal => continue,
            other => return other,
        }
    }
    std::cmp::Ordering::Equal
}

fn satisfies(locked: &str, op: Op, wanted: &str, raw: &str) -> Result<bool> {
    use std::cmp::Ordering::*;

    let have = parse_version(locked, raw)?;
    let want = parse_version(wanted, raw)?;
    let ord = compare(&have, &want);

    Ok(match op {
        Op::Eq => ord == Equal,
        Op::Ge => ord != Less,
        Op::Gt => ord == Greater,
        Op::Le => ord != Greater,
        Op::Lt => ord == Less,
        // ~=X.Y.Z means >=X.Y.Z and same X.Y prefix
        Op::Compatible => {
            let prefix = want.len().saturating_sub(1).max(1);
            ord != Less && have.iter().take(prefix).eq(want.iter().take(prefix))
        }
    })
}

fn is_placeholder(value: &str) -> bool {
    let value = value.trim();
    let lower = value.to_ascii_lowercase();
    value.is_empty()
        || (value.starts_with('<') && value.ends_with('>'))
        || lower.contains("your-api-key")
        || lower.contains("your_api_key")
        || lower.starts_with("your_")
        || lower == "changeme"
        || value.chars().all(|c| c == 'x' || c == 'X')
}
