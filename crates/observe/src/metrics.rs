use {
    prometheus::Registry,
    prometheus_metric_storage::StorageRegistry,
    std::{collections::HashMap, sync::OnceLock},
};

static REGISTRY: OnceLock<StorageRegistry> = OnceLock::new();

/// Configures the global metrics registry with an optional prefix and fixed
/// labels. Must be called before the first `get_registry`/`get_storage_registry`
/// to take effect; afterwards the default registry is already in place.
pub fn setup_registry(prefix: Option<String>, labels: Option<HashMap<String, String>>) {
    let registry = Registry::new_custom(prefix, labels).expect("invalid metrics prefix");
    if REGISTRY.set(StorageRegistry::new(registry)).is_err() {
        tracing::warn!("metrics registry already set up");
    }
}

pub fn get_storage_registry() -> &'static StorageRegistry {
    REGISTRY.get_or_init(|| StorageRegistry::new(Registry::default()))
}

pub fn get_registry() -> &'static Registry {
    get_storage_registry().registry()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_singleton() {
        assert!(std::ptr::eq(get_storage_registry(), get_storage_registry()));
        let _ = get_registry();
    }
}
