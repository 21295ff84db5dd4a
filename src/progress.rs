//! Progress reporting and cooperative cancellation.
//!
//! Pipeline stages report through a [`ProgressSink`]; every call doubles as
//! the cancellation checkpoint. The worker's sink writes the update to the
//! job repository and returns [`Canceled`] when the job was canceled out
//! from under it, which unwinds the pipeline without a terminal write.

/// Fixed stage sequence per job type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Scanning,
    Filtered,
    Indexing,
    Indexed,
    Checksums,
    Prune,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Scanning => "scanning",
            Stage::Filtered => "filtered",
            Stage::Indexing => "indexing",
            Stage::Indexed => "indexed",
            Stage::Checksums => "checksums",
            Stage::Prune => "prune",
            Stage::Done => "done",
        }
    }
}

/// The job was canceled; abort without calling `complete` or `fail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canceled;

impl std::fmt::Display for Canceled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("job canceled")
    }
}

impl std::error::Error for Canceled {}

pub trait ProgressSink: Send + Sync {
    /// Report progress. Missing fields preserve their prior values in the
    /// repository. Returns `Err(Canceled)` when the job should abort.
    fn update(
        &self,
        stage: Stage,
        done: Option<u64>,
        total: Option<u64>,
        note: Option<&str>,
    ) -> Result<(), Canceled>;
}

/// Sink that discards updates; never cancels.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn update(
        &self,
        _stage: Stage,
        _done: Option<u64>,
        _total: Option<u64>,
        _note: Option<&str>,
    ) -> Result<(), Canceled> {
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every update; optionally cancels after N calls.
    #[derive(Default)]
    pub struct RecordingSink {
        pub updates: Mutex<Vec<(Stage, Option<u64>, Option<u64>, Option<String>)>>,
        pub cancel_after: Option<usize>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn canceling_after(calls: usize) -> Self {
            Self {
                updates: Mutex::new(Vec::new()),
                cancel_after: Some(calls),
            }
        }

        pub fn stages(&self) -> Vec<Stage> {
            self.updates
                .lock()
                .unwrap()
                .iter()
                .map(|(stage, ..)| *stage)
                .collect()
        }

        pub fn last(&self) -> Option<(Stage, Option<u64>, Option<u64>, Option<String>)> {
            self.updates.lock().unwrap().last().cloned()
        }
    }

    impl ProgressSink for RecordingSink {
        fn update(
            &self,
            stage: Stage,
            done: Option<u64>,
            total: Option<u64>,
            note: Option<&str>,
        ) -> Result<(), Canceled> {
            let mut updates = self.updates.lock().unwrap();
            updates.push((stage, done, total, note.map(str::to_owned)));
            if let Some(limit) = self.cancel_after {
                if updates.len() >= limit {
                    return Err(Canceled);
                }
            }
            Ok(())
        }
    }
}
