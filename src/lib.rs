//! Shared fixtures for the cross-crate scenario tests
//!
//! Every upstream points at one local mock server. Credentials come from a
//! fixed in-memory source so the developer's environment never leaks in.

use std::sync::Arc;

use sitewright_providers::{
    CredentialResolver, ProviderKind, ProviderManager, ProvidersConfig, StaticCredentialSource,
};

/// Key handed to every keyed provider
pub const TEST_KEY: &str = "scenario-key";

/// Configuration routing every upstream to `base_url`
///
/// `priority` is the selection order; the relay is configured only when it
/// is listed there. `base_delay_ms` is the first retry backoff, with the cap
/// four times higher.
pub fn scenario_config(base_url: &str, priority: &[ProviderKind], base_delay_ms: u64) -> ProvidersConfig {
    let mut yaml = String::from("providers:\n");
    for kind in ProviderKind::ALL.iter().filter(|k| **k != ProviderKind::Proxy) {
        yaml.push_str(&format!(
            "  {}:\n    base_url: \"{}\"\n    timeout_secs: 10\n",
            kind.id(),
            base_url
        ));
    }

    let order: Vec<&str> = priority.iter().map(|k| k.id()).collect();
    yaml.push_str(&format!("priority: [{}]\n", order.join(", ")));
    yaml.push_str(&format!(
        "retry:\n  max_attempts: 3\n  base_delay_ms: {}\n  max_delay_ms: {}\n  jitter: 0.0\n",
        base_delay_ms,
        base_delay_ms * 4
    ));

    let mut config = ProvidersConfig::from_yaml(&yaml).expect("scenario config is valid");
    config.proxy.url = priority
        .contains(&ProviderKind::Proxy)
        .then(|| base_url.to_string());
    config
}

/// Credentials for exactly `kinds`
pub fn keyed(kinds: &[ProviderKind]) -> CredentialResolver {
    let source = kinds
        .iter()
        .fold(StaticCredentialSource::new("scenario"), |source, kind| {
            source.with_key(*kind, TEST_KEY)
        });
    CredentialResolver::new().with_source(source)
}

/// Manager over the real HTTP clients, keyed for `kinds` only
pub fn scenario_manager(config: ProvidersConfig, kinds: &[ProviderKind]) -> Arc<ProviderManager> {
    Arc::new(ProviderManager::from_config(config, keyed(kinds)))
}
