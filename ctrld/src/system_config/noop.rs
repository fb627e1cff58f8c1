use super::{OSConfig, OSConfigurator};
use crate::common::error::Error;

/// Used where the host's resolver settings cannot be managed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopConfigurator;

impl OSConfigurator for NoopConfigurator {
    fn set_dns(&self, config: &OSConfig) -> Result<(), Error> {
        tracing::debug!(?config, "dns: noop mode, ignoring os configuration");
        Ok(())
    }

    fn close(&self) -> Result<(), Error> {
        Ok(())
    }

    fn mode(&self) -> &'static str {
        "noop"
    }
}
