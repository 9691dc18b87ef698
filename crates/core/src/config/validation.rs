use crate::error::StoneError;

use super::types::StoneConfig;

impl StoneConfig {
    /// Validate the config: lane caps, thread counts and endpoints.
    pub fn validate(&self) -> Result<(), StoneError> {
        self.validate_scheduler()?;
        self.validate_oracle()?;
        self.validate_state_machine()?;
        Ok(())
    }

    fn validate_scheduler(&self) -> Result<(), StoneError> {
        if self.scheduler.max_low == 0 {
            return Err(StoneError::Config(
                "scheduler.max_low must be at least 1".into(),
            ));
        }
        Ok(())
    }

    fn validate_oracle(&self) -> Result<(), StoneError> {
        if self.oracle.threads == 0 {
            return Err(StoneError::Config("oracle.threads must be at least 1".into()));
        }
        if self.oracle.sleeping_time_resolution_ms == 0 {
            return Err(StoneError::Config(
                "oracle.sleeping_time_resolution_ms must be at least 1".into(),
            ));
        }
        let url = self.oracle.orthanc.url.trim();
        if url.is_empty() {
            return Err(StoneError::Config("oracle.orthanc.url must not be empty".into()));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(StoneError::Config(format!(
                "invalid orthanc url '{url}', expected an http:// or https:// endpoint"
            )));
        }
        Ok(())
    }

    fn validate_state_machine(&self) -> Result<(), StoneError> {
        if self.state_machine.simultaneous_downloads == 0 {
            return Err(StoneError::Config(
                "state_machine.simultaneous_downloads must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
