use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::key::{GenericLayout, IndexKey, Layout};

/// Uniqueness check over keys arriving in sorted order.
///
/// Sorted order puts equal values next to each other, so comparing each
/// key with the one before it finds every duplicate. The same entity
/// repeating a value is not a conflict.
///
/// A failing detector returns [`Error::Conflict`] on the first duplicate.
/// A recording detector keeps the duplicate keys instead, so they can be
/// checked again once later updates have been applied.
pub struct ConflictDetector {
    layout: GenericLayout,
    previous: Option<IndexKey>,
    recorded: Option<Vec<IndexKey>>,
}

impl ConflictDetector {
    pub fn new(layout: GenericLayout) -> Self {
        ConflictDetector {
            layout,
            previous: None,
            recorded: None,
        }
    }

    pub fn recording(layout: GenericLayout) -> Self {
        ConflictDetector {
            recorded: Some(Vec::new()),
            ..ConflictDetector::new(layout)
        }
    }

    pub fn check(&mut self, key: &IndexKey) -> Result<()> {
        match &mut self.previous {
            Some(previous) => {
                if self.layout.compare(previous, key) == Ordering::Equal
                    && previous.entity_id() != key.entity_id()
                {
                    match &mut self.recorded {
                        Some(recorded) => {
                            // runs of one value need a single recheck
                            let repeat = recorded.last().is_some_and(|last| {
                                self.layout.compare_value(last, key) == Ordering::Equal
                            });
                            if !repeat {
                                recorded.push(key.clone());
                            }
                        }
                        None => {
                            return Err(Error::Conflict {
                                first_entity: previous.entity_id(),
                                other_entity: key.entity_id(),
                                values: key.to_string(),
                            });
                        }
                    }
                }
                previous.copy_from(key);
            }
            None => self.previous = Some(key.clone()),
        }
        if let Some(previous) = &mut self.previous {
            previous.set_compare_id(false);
        }
        Ok(())
    }

    /// Remember `key` for a later recheck, outside the sorted stream.
    pub fn record(&mut self, key: &IndexKey) -> Result<()> {
        match &mut self.recorded {
            Some(recorded) => {
                recorded.push(key.clone());
                Ok(())
            }
            None => Err(Error::IllegalState("conflict detector is not recording".into())),
        }
    }

    /// Hand over the recorded keys. Empty for a failing detector.
    pub fn take_recorded(&mut self) -> Vec<IndexKey> {
        self.recorded.as_mut().map(std::mem::take).unwrap_or_default()
    }
}
