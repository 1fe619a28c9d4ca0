use std::sync::Arc;

use parking_lot::Mutex;

use crate::block::{IndexUpdate, IndexUpdateStorage};
use crate::error::{Error, Result};
use crate::key::Layout;

/// Records updates made to the indexed data while the scan is still running.
///
/// Updates are stored in arrival order and applied after the scan entries,
/// so they win over whatever the scan saw. Several updaters may share one
/// storage; each `process` call appends atomically.
pub struct PopulatingUpdater<L: Layout> {
    updates: Arc<Mutex<IndexUpdateStorage<L>>>,
    closed: bool,
}

impl<L: Layout> PopulatingUpdater<L> {
    pub(crate) fn new(updates: Arc<Mutex<IndexUpdateStorage<L>>>) -> Self {
        PopulatingUpdater {
            updates,
            closed: false,
        }
    }

    pub fn process(&mut self, update: IndexUpdate<L::Key, L::Value>) -> Result<()> {
        if self.closed {
            return Err(Error::IllegalState("updater has been closed".into()));
        }
        let mut updates = self.updates.lock();
        if updates.is_done_adding() {
            return Err(Error::IllegalState(
                "scan already completed, apply updates to the index directly".into(),
            ));
        }
        updates.add(&update)
    }

    pub fn close(&mut self) {
        self.closed = true;
    }
}
