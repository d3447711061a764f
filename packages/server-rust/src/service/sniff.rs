//! Static analysis of the configuration keys a set of services reads.
//!
//! [`ConfigSniffer`] walks the same descriptors a [`ServiceRegistry`]
//! resolves, but with a recording configuration source that answers every
//! key with a placeholder. Registration failures are collected, never
//! returned, and nothing is cached in a runtime registry.
//!
//! [`ServiceRegistry`]: super::ServiceRegistry

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::registry::{Instance, ServiceContext, ServiceDescriptor, Services};
use crate::traits::ConfigSource;

/// Configuration source that records reads and returns `<KEY>` for each.
#[derive(Debug, Default)]
struct RecordingSource {
    read: Mutex<BTreeSet<String>>,
}

impl ConfigSource for RecordingSource {
    fn get(&self, key: &str) -> Option<String> {
        self.read.lock().insert(key.to_string());
        Some(format!("<{key}>"))
    }

    fn is_recording(&self) -> bool {
        true
    }
}

/// Result of a sniffing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SniffReport {
    /// Every configuration key read by any registration function.
    pub keys: BTreeSet<String>,
    /// Services visited, dependencies first.
    pub services: Vec<&'static str>,
    /// Services whose registration failed under placeholder values, with
    /// the error message. Their keys read before failing are still listed.
    pub failures: BTreeMap<&'static str, String>,
}

/// Build-time resolver that reports which configuration keys a deployment
/// needs.
#[derive(Debug, Default)]
pub struct ConfigSniffer {
    source: Arc<RecordingSource>,
}

impl ConfigSniffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every descriptor once, dependencies first, and report the keys read.
    ///
    /// A service whose dependency failed still runs, with that dependency
    /// missing from its context, so keys it reads up front are recorded.
    pub async fn sniff(&self, descriptors: &[ServiceDescriptor]) -> SniffReport {
        let order = dependency_order(descriptors);
        let config: Arc<dyn ConfigSource> = self.source.clone();
        let mut resolved: BTreeMap<&'static str, Instance> = BTreeMap::new();
        let mut report = SniffReport::default();

        for descriptor in order {
            let deps = descriptor
                .dependencies()
                .iter()
                .filter_map(|d| resolved.get(d.name()).map(|i| (d.name(), Arc::clone(i))))
                .collect();
            let ctx = ServiceContext::new(descriptor.name(), Arc::clone(&config), Services::from_map(deps));
            match descriptor.run(ctx).await {
                Ok(instance) => {
                    resolved.insert(descriptor.name(), instance);
                }
                Err(err) => {
                    debug!(service = descriptor.name(), error = %err, "registration failed while sniffing");
                    report.failures.insert(descriptor.name(), format!("{err:#}"));
                }
            }
            report.services.push(descriptor.name());
        }

        report.keys = self.source.read.lock().clone();
        report
    }
}

/// Depth-first post-order over the dependency graph, visiting each name once.
fn dependency_order(descriptors: &[ServiceDescriptor]) -> Vec<ServiceDescriptor> {
    fn visit(d: &ServiceDescriptor, seen: &mut HashSet<&'static str>, out: &mut Vec<ServiceDescriptor>) {
        if !seen.insert(d.name()) {
            return;
        }
        for dep in d.dependencies() {
            visit(dep, seen, out);
        }
        out.push(d.clone());
    }

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for d in descriptors {
        visit(d, &mut seen, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pool {
        url: String,
    }

    fn pool() -> ServiceDescriptor {
        ServiceDescriptor::new("pool", |ctx| async move {
            let url = ctx.require("DATABASE_URL")?;
            let _ = ctx.get("DATABASE_POOL_SIZE");
            Ok(Pool { url })
        })
    }

    fn mailer() -> ServiceDescriptor {
        ServiceDescriptor::new("mailer", |ctx| async move {
            let key = ctx.require("SMTP_PASSWORD")?;
            anyhow::ensure!(!ctx.is_sniffing(), "would connect to smtp with {key}");
            Ok(key)
        })
    }

    #[tokio::test]
    async fn records_keys_from_all_services_and_dependencies() {
        let repo = ServiceDescriptor::new("repo", |ctx| async move {
            let table = ctx.require("USERS_TABLE")?;
            let pool = ctx.service::<Pool>("pool")?;
            Ok(format!("{}/{table}", pool.url))
        })
        .depends_on([pool()]);

        let report = ConfigSniffer::new().sniff(&[repo, mailer(), pool()]).await;

        let keys: Vec<_> = report.keys.iter().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["DATABASE_POOL_SIZE", "DATABASE_URL", "SMTP_PASSWORD", "USERS_TABLE"]
        );
        assert_eq!(report.services, vec!["pool", "repo", "mailer"]);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures["mailer"].contains("<SMTP_PASSWORD>"));
    }

    #[tokio::test]
    async fn failed_dependency_still_sniffs_dependent() {
        let broken = ServiceDescriptor::new("broken", |ctx| async move {
            let _ = ctx.require("BROKEN_URL")?;
            Err::<(), _>(anyhow::anyhow!("cannot start"))
        });
        let dependent = ServiceDescriptor::new("dependent", |ctx| async move {
            let region = ctx.require("REGION")?;
            ctx.service::<()>("broken")?;
            Ok(region)
        })
        .depends_on([broken]);

        let report = ConfigSniffer::new().sniff(&[dependent]).await;

        assert!(report.keys.contains("BROKEN_URL"));
        assert!(report.keys.contains("REGION"));
        assert_eq!(report.failures.len(), 2);
    }
}
