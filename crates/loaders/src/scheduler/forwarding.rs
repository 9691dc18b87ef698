use std::sync::Arc;

use stone_core::StoneError;
use stone_messaging::Observable;
use stone_oracle::messages::{
    GetOrthancImageSuccess, GetOrthancWebViewerJpegSuccess, HttpSuccess, OracleCommandException,
    OracleMessage, OrthancRestApiSuccess, ParseDicomSuccess, ReadFileSuccess, SleepTimeout,
};
use tracing::error;

use super::core::OracleScheduler;
use super::types::{ActiveCommand, Lane};

impl OracleScheduler {
    pub(crate) fn register_handlers(self: &Arc<Self>, observable: &Observable) {
        observable.register(self, Self::forward::<HttpSuccess>);
        observable.register(self, Self::forward::<OrthancRestApiSuccess>);
        observable.register(self, Self::forward::<GetOrthancImageSuccess>);
        observable.register(self, Self::forward::<GetOrthancWebViewerJpegSuccess>);
        observable.register(self, Self::forward::<ReadFileSuccess>);
        observable.register(self, Self::forward::<SleepTimeout>);
        observable.register(self, Self::forward::<ParseDicomSuccess>);
        observable.register(self, Self::forward::<OracleCommandException>);
    }

    /// Completion of a wrapped command: free its slot, then hand the
    /// message, rebound to the original command, to the original receiver.
    fn forward<M: OracleMessage>(&self, message: &M) -> Result<(), StoneError> {
        let active = message
            .origin()
            .payload_as::<ActiveCommand>()
            .ok_or_else(|| {
                StoneError::Internal(format!(
                    "{:?} reached the scheduler without its bookkeeping payload",
                    message.identifier()
                ))
            })?;

        self.remove_active_command(active.lane);

        let original = message.with_origin(Arc::clone(&active.original));
        self.emitter.emit_message(&active.receiver, &original);
        Ok(())
    }

    fn remove_active_command(&self, lane: Lane) {
        {
            let mut state = self.state.lock();
            state.statistics.processed += 1;
            let slots = state.slots_mut(lane);
            if slots.active == 0 {
                error!(lane = ?lane, "completion for a lane without active commands");
            } else {
                slots.active -= 1;
            }
        }
        self.spawn_commands();
    }
}
