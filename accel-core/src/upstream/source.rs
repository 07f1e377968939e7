use serde::{Deserialize, Serialize};

/// A single upstream registry the accelerator may pull from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpstreamSource {
    pub name: String,
    pub url: String,
    /// Smaller priority is tried earlier.
    pub priority: i32,
    pub enabled: bool,
}

impl UpstreamSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            priority,
            enabled: true,
        }
    }
}

/// The built-in default list used when no persisted config exists yet.
pub fn default_sources() -> Vec<UpstreamSource> {
    vec![
        UpstreamSource::new("docker-hub", "https://registry-1.docker.io", 1),
        UpstreamSource::new("mirror-a", "https://mirror-a.example.com", 2),
        UpstreamSource::new("mirror-b", "https://mirror-b.example.com", 3),
    ]
}
