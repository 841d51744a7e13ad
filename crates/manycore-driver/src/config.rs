//! Host configuration
//!
//! Geometry and timeouts are configuration, not constants. Defaults match the
//! 4×4 reference mesh; each can be overridden from the environment:
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `MANYCORE_DIM_X` | mesh columns |
//! | `MANYCORE_DIM_Y` | mesh rows, I/O row included |
//! | `MANYCORE_COMPLETION_TIMEOUT_MS` | completion timeout; `0` waits forever |

use std::time::Duration;

use manycore_chip::MeshGeometry;
use tracing::{debug, warn};

/// Default completion timeout.
pub const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(60);

/// Host configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    /// Mesh geometry
    pub mesh: MeshGeometry,

    /// How long to wait for all completion signals (`None` = forever)
    pub completion_timeout: Option<Duration>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self::new(MeshGeometry::default())
    }
}

impl HostConfig {
    /// Configuration for `mesh` with the default timeout.
    pub const fn new(mesh: MeshGeometry) -> Self {
        Self {
            mesh,
            completion_timeout: Some(DEFAULT_COMPLETION_TIMEOUT),
        }
    }

    /// Defaults overridden by `MANYCORE_*` environment variables.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parse = |key: &str| -> Option<u64> {
            let raw = lookup(key)?;
            match raw.trim().parse() {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!("Ignoring {key}={raw:?}: {e}");
                    None
                }
            }
        };
        let dim = |key: &str, default: u8| -> u8 {
            let Some(value) = parse(key) else {
                return default;
            };
            match u8::try_from(value) {
                Ok(v) if v > 0 => v,
                _ => {
                    warn!("Ignoring {key}={value}: mesh dimensions must be 1..=255");
                    default
                }
            }
        };

        let base = MeshGeometry::default();
        let mut config = Self::new(MeshGeometry::new(
            dim("MANYCORE_DIM_X", base.columns),
            dim("MANYCORE_DIM_Y", base.rows),
        ));
        if let Some(ms) = parse("MANYCORE_COMPLETION_TIMEOUT_MS") {
            config.completion_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }

        debug!(
            "Host config: {}x{} mesh, completion timeout {:?}",
            config.mesh.columns, config.mesh.rows, config.completion_timeout
        );
        config
    }

    /// Replace the mesh geometry
    #[must_use]
    pub const fn with_mesh(mut self, mesh: MeshGeometry) -> Self {
        self.mesh = mesh;
        self
    }

    /// Replace the completion timeout
    #[must_use]
    pub const fn with_completion_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.completion_timeout = timeout;
        self
    }
}
