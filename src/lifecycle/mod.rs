//! Shutdown hooks, run once when the HTTP server stops

use std::sync::Mutex;
use tracing::info;

type Hook = Box<dyn Fn() + Send + Sync>;

/// Named cleanup hooks owned by the process root
#[derive(Default)]
pub struct ShutdownHooks {
    hooks: Mutex<Vec<(String, Hook)>>,
}

impl ShutdownHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook under `name`. Returns false (and drops `hook`) if that
    /// name is already registered.
    pub fn register_once(&self, name: &str, hook: Hook) -> bool {
        let mut hooks = self.hooks.lock().unwrap();
        if hooks.iter().any(|(n, _)| n == name) {
            return false;
        }
        hooks.push((name.to_string(), hook));
        true
    }

    pub fn len(&self) -> usize {
        self.hooks.lock().unwrap().len()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.hooks.lock().unwrap().iter().any(|(n, _)| n == name)
    }

    /// Run and drain every hook in registration order
    pub fn run_all(&self) {
        let hooks: Vec<(String, Hook)> = std::mem::take(&mut *self.hooks.lock().unwrap());
        for (name, hook) in hooks {
            info!("Running shutdown hook '{}'", name);
            hook();
        }
    }
}
