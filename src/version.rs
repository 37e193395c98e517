//! Versioned command dispatch
//!
//! The same binary talks to the SaaS backend and to pinned Self-Hosted
//! releases that may lack newer operations. Each command carries variants
//! tagged with the earliest backend version that supports them, and the
//! command tree is resolved once per invocation against the detected
//! [`InstanceVersion`].

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SpacectlError};
use crate::graphql::GraphqlClient;

const DEBUG_INFO: &str = "query GetDebugInfo { debugInfo { selfHostedVersion } }";

/// `MAJOR.MINOR.PATCH` of a release; prerelease and build metadata are dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    /// Major version
    pub major: u64,
    /// Minor version
    pub minor: u64,
    /// Patch version
    pub patch: u64,
}

impl Version {
    /// Create a version
    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for Version {
    type Err = SpacectlError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || SpacectlError::InvalidVersion(s.to_string());

        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let core = trimmed
            .split(['-', '+'])
            .next()
            .ok_or_else(invalid)?;

        let mut parts = core.split('.').map(|p| p.parse::<u64>().map_err(|_| invalid()));
        let version = Self::new(
            parts.next().ok_or_else(invalid)??,
            parts.next().ok_or_else(invalid)??,
            parts.next().ok_or_else(invalid)??,
        );
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Kind of backend the CLI is talking to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceVersion {
    /// Not known yet, usually because there are no credentials
    Unknown,
    /// Hosted Spacelift
    SaaS,
    /// Self-Hosted release
    SelfHosted(Version),
}

impl fmt::Display for InstanceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("unknown"),
            Self::SaaS => f.write_str("SaaS"),
            Self::SelfHosted(v) => write!(f, "Self-Hosted v{v}"),
        }
    }
}

/// Earliest backend a command variant works with.
///
/// Variants are ordered by preference: `All < Since(..) < Latest`, with
/// `Since` ordered by version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EarliestVersion {
    /// Every backend
    All,
    /// Self-Hosted from this release on, and SaaS
    Since(Version),
    /// SaaS only, not in any Self-Hosted release yet
    Latest,
}

impl EarliestVersion {
    /// Whether a variant with this marker can run against `instance`
    #[must_use]
    pub fn supports(self, instance: InstanceVersion) -> bool {
        match (instance, self) {
            (_, Self::All) | (InstanceVersion::SaaS, _) => true,
            (InstanceVersion::SelfHosted(v), Self::Since(required)) => required <= v,
            _ => false,
        }
    }
}

/// One revision of a command
#[derive(Debug, Clone)]
pub struct Variant<T> {
    /// Earliest supporting backend
    pub earliest: EarliestVersion,
    /// Command definition for this revision
    pub spec: T,
    /// Subcommands, resolved independently
    pub subcommands: Vec<VersionedCommand<T>>,
}

impl<T> Variant<T> {
    /// Variant without subcommands
    pub fn new(earliest: EarliestVersion, spec: T) -> Self {
        Self {
            earliest,
            spec,
            subcommands: Vec::new(),
        }
    }

    /// Add a subcommand
    #[must_use]
    pub fn subcommand(mut self, command: VersionedCommand<T>) -> Self {
        self.subcommands.push(command);
        self
    }
}

/// A named command with all its revisions
#[derive(Debug, Clone)]
pub struct VersionedCommand<T> {
    /// Command name
    pub name: String,
    /// Revisions in declaration order
    pub variants: Vec<Variant<T>>,
}

impl<T> VersionedCommand<T> {
    /// Command with no variants yet
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variants: Vec::new(),
        }
    }

    /// Add a revision
    #[must_use]
    pub fn variant(mut self, variant: Variant<T>) -> Self {
        self.variants.push(variant);
        self
    }
}

/// The revision of a command chosen for one backend
#[derive(Debug, PartialEq, Eq)]
pub struct ResolvedCommand<'a, T> {
    /// Command name
    pub name: &'a str,
    /// Marker of the chosen variant
    pub earliest: EarliestVersion,
    /// Command definition of the chosen variant
    pub spec: &'a T,
    /// Surviving subcommands
    pub subcommands: Vec<ResolvedCommand<'a, T>>,
}

/// Best variant for `instance`; the earliest declared wins ties
pub fn select_variant<T>(variants: &[Variant<T>], instance: InstanceVersion) -> Option<&Variant<T>> {
    variants
        .iter()
        .filter(|v| v.earliest.supports(instance))
        .fold(None, |best: Option<&Variant<T>>, candidate| match best {
            Some(best) if best.earliest >= candidate.earliest => Some(best),
            _ => Some(candidate),
        })
}

/// Resolve a command tree, dropping commands without a supported variant
pub fn resolve<T>(commands: &[VersionedCommand<T>], instance: InstanceVersion) -> Vec<ResolvedCommand<'_, T>> {
    commands
        .iter()
        .filter_map(|command| {
            let variant = select_variant(&command.variants, instance)?;
            Some(ResolvedCommand {
                name: &command.name,
                earliest: variant.earliest,
                spec: &variant.spec,
                subcommands: resolve(&variant.subcommands, instance),
            })
        })
        .collect()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DebugInfoData {
    debug_info: DebugInfo,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DebugInfo {
    self_hosted_version: Option<String>,
}

/// Ask the backend what it is.
///
/// Best effort: without a client, or when the probe fails, the instance is
/// [`InstanceVersion::Unknown`].
pub async fn detect_instance(
    client: Option<&GraphqlClient>,
    cancel: &CancellationToken,
) -> InstanceVersion {
    let Some(client) = client else {
        return InstanceVersion::Unknown;
    };

    let info = match client.query::<DebugInfoData>(DEBUG_INFO, Value::Null, cancel).await {
        Ok(data) => data.debug_info,
        Err(e) => {
            tracing::debug!("could not detect the instance version: {e}");
            return InstanceVersion::Unknown;
        }
    };

    match info.self_hosted_version.as_deref().map(str::parse::<Version>) {
        None => InstanceVersion::SaaS,
        Some(Ok(version)) => InstanceVersion::SelfHosted(version),
        Some(Err(e)) => {
            tracing::debug!("ignoring instance version: {e}");
            InstanceVersion::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    fn since(s: &str) -> EarliestVersion {
        EarliestVersion::Since(v(s))
    }

    fn sample() -> Vec<VersionedCommand<&'static str>> {
        vec![
            VersionedCommand::new("stack")
                .variant(Variant::new(EarliestVersion::All, "all"))
                .variant(Variant::new(since("1.2.0"), "1.2.0"))
                .variant(Variant::new(since("1.5.0"), "1.5.0"))
                .variant(Variant::new(since("2.3.3"), "2.3.3"))
                .variant(Variant::new(EarliestVersion::Latest, "latest")),
        ]
    }

    fn chosen(instance: InstanceVersion) -> &'static str {
        let commands = sample();
        let resolved = resolve(&commands, instance);
        assert_eq!(resolved.len(), 1);
        *resolved[0].spec
    }

    #[test]
    fn test_version_parsing() {
        assert_eq!(v("1.5.3"), Version::new(1, 5, 3));
        assert_eq!(v("v2.0.1"), Version::new(2, 0, 1));
        assert_eq!(v("3.0.0-rc1+build.7"), Version::new(3, 0, 0));
        assert_eq!(v(" 1.10.0 ").to_string(), "1.10.0");
        assert!(v("1.9.0") < v("1.10.0"));

        for bad in ["", "1.2", "1.2.3.4", "x.y.z", "v"] {
            assert!(matches!(
                bad.parse::<Version>(),
                Err(SpacectlError::InvalidVersion(_))
            ));
        }
    }

    #[test]
    fn test_dispatch_by_instance() {
        assert_eq!(chosen(InstanceVersion::SelfHosted(v("1.5.3"))), "1.5.0");
        assert_eq!(chosen(InstanceVersion::SaaS), "latest");
        assert_eq!(chosen(InstanceVersion::SelfHosted(v("1.1.3"))), "all");
        assert_eq!(chosen(InstanceVersion::Unknown), "all");
        assert_eq!(chosen(InstanceVersion::SelfHosted(v("2.3.3"))), "2.3.3");
    }

    #[test]
    fn test_prerelease_instance_compares_core_version() {
        let instance = InstanceVersion::SelfHosted(v("1.5.0-beta"));
        assert_eq!(chosen(instance), "1.5.0");
    }

    #[test]
    fn test_command_without_supported_variant_disappears() {
        let commands = vec![
            VersionedCommand::new("blueprint").variant(Variant::new(EarliestVersion::Latest, "new")),
            VersionedCommand::new("stack").variant(Variant::new(EarliestVersion::All, "old")),
        ];

        let resolved = resolve(&commands, InstanceVersion::SelfHosted(v("9.9.9")));
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].name, "stack");
        assert!(resolve(&commands[..1], InstanceVersion::Unknown).is_empty());
    }

    #[test]
    fn test_ties_keep_declaration_order() {
        let variants = vec![
            Variant::new(since("1.0.0"), "first"),
            Variant::new(since("1.0.0"), "second"),
        ];
        let best = select_variant(&variants, InstanceVersion::SaaS).unwrap();
        assert_eq!(best.spec, "first");
    }

    #[test]
    fn test_subcommands_resolved_recursively() {
        let commands = vec![
            VersionedCommand::new("module").variant(
                Variant::new(EarliestVersion::All, "module")
                    .subcommand(
                        VersionedCommand::new("list").variant(Variant::new(EarliestVersion::All, "list")),
                    )
                    .subcommand(
                        VersionedCommand::new("search")
                            .variant(Variant::new(since("2.0.0"), "search")),
                    ),
            ),
        ];

        let old = resolve(&commands, InstanceVersion::SelfHosted(v("1.0.0")));
        let names: Vec<_> = old[0].subcommands.iter().map(|c| c.name).collect();
        assert_eq!(names, ["list"]);

        let saas = resolve(&commands, InstanceVersion::SaaS);
        assert_eq!(saas[0].subcommands.len(), 2);
        assert_eq!(saas, resolve(&commands, InstanceVersion::SaaS));
    }

    #[tokio::test]
    async fn test_detect_without_client_is_unknown() {
        assert_eq!(
            detect_instance(None, &CancellationToken::new()).await,
            InstanceVersion::Unknown
        );
    }
}
