use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use super::backend::{FaceCapability, FaceDetector};

/// Shared handle to a registered backend.
pub type SharedDetector = Arc<Mutex<dyn FaceDetector>>;

/// Thread-safe registry of face detector backends.
///
/// Backends are wrapped in `Mutex` because `FaceDetector::detect` takes `&mut self`.
pub struct BackendRegistry {
    backends: HashMap<String, SharedDetector>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Registry holding every built-in backend, `synthetic` as default.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(super::backends::SyntheticFaceDetector::new());
        registry.register(super::backends::ScriptedDetector::new());
        registry
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: FaceDetector + 'static>(&mut self, backend: B) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, Arc::new(Mutex::new(backend)));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!("face detector '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<SharedDetector> {
        self.backends.get(name).cloned()
    }

    pub fn default_backend(&self) -> Option<SharedDetector> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// Registered backend names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Select a backend that supports the requested capability.
    ///
    /// Prefers the default backend when it supports the capability.
    pub fn backend_for_capability(&self, capability: FaceCapability) -> Result<SharedDetector> {
        if let Some(default_backend) = self.default_backend() {
            if Self::supports(&default_backend, capability)? {
                return Ok(default_backend);
            }
        }

        for name in self.list() {
            if let Some(backend) = self.get(&name) {
                if Self::supports(&backend, capability)? {
                    return Ok(backend);
                }
            }
        }

        Err(anyhow!(
            "no registered face detector supports capability {:?}",
            capability
        ))
    }

    /// Resolve a backend by name and check it can classify faces.
    pub fn resolve(&self, name: &str) -> Result<SharedDetector> {
        let backend = self.get(name).ok_or_else(|| {
            anyhow!(
                "face detector '{}' not registered (available: {})",
                name,
                self.list().join(", ")
            )
        })?;
        if !Self::supports(&backend, FaceCapability::Classification)? {
            return Err(anyhow!(
                "face detector '{}' does not report classification probabilities",
                name
            ));
        }
        Ok(backend)
    }

    fn supports(backend: &SharedDetector, capability: FaceCapability) -> Result<bool> {
        let guard = backend
            .lock()
            .map_err(|_| anyhow!("face detector lock poisoned"))?;
        Ok(guard.supports(capability))
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::DetectedEntity;
    use crate::frame::{ImageData, Rotation};

    struct BoundsOnly;

    impl FaceDetector for BoundsOnly {
        fn name(&self) -> &'static str {
            "bounds-only"
        }

        fn supports(&self, capability: FaceCapability) -> bool {
            matches!(capability, FaceCapability::Bounds)
        }

        fn detect(
            &mut self,
            _image: &ImageData,
            _rotation: Rotation,
        ) -> Result<Vec<DetectedEntity>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn first_registered_backend_is_default() {
        let mut registry = BackendRegistry::new();
        registry.register(BoundsOnly);
        registry.register(crate::detect::backends::SyntheticFaceDetector::new());
        let default = registry.default_backend().unwrap();
        assert_eq!(default.lock().unwrap().name(), "bounds-only");
        assert_eq!(registry.list(), vec!["bounds-only", "synthetic"]);
    }

    #[test]
    fn capability_lookup_skips_default_when_unsupported() {
        let mut registry = BackendRegistry::new();
        registry.register(BoundsOnly);
        registry.register(crate::detect::backends::SyntheticFaceDetector::new());
        let backend = registry
            .backend_for_capability(FaceCapability::Classification)
            .unwrap();
        assert_eq!(backend.lock().unwrap().name(), "synthetic");
    }

    #[test]
    fn resolve_rejects_unknown_and_non_classifying_backends() {
        let mut registry = BackendRegistry::with_builtin();
        registry.register(BoundsOnly);
        assert!(registry.resolve("synthetic").is_ok());
        assert!(registry.resolve("scripted").is_ok());
        assert!(registry.resolve("bounds-only").is_err());
        let err = registry.resolve("mlkit").err().unwrap();
        assert!(err.to_string().contains("not registered"));
        assert!(registry.set_default("mlkit").is_err());
    }
}
