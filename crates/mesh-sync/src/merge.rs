//! Merge-by-recency for incoming snapshots.
use board::{Element, ElementMap};

/// Outcome of comparing a local element with an incoming copy of the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    KeepLocal,
    TakeIncoming,
}

/// Counts of what a snapshot merge did to the local map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub inserted: usize,
    pub replaced: usize,
    pub kept: usize,
}

impl MergeReport {
    pub fn changed(&self) -> bool {
        self.inserted + self.replaced > 0
    }
}

/// The incoming copy wins only with a strictly greater recency; ties keep local.
pub fn resolve(local: &Element, incoming: &Element) -> Resolution {
    if incoming.recency() > local.recency() {
        Resolution::TakeIncoming
    } else {
        Resolution::KeepLocal
    }
}

/// Fold a snapshot into `local`.
///
/// Ids missing locally are inserted whatever their recency, which is how a
/// stale snapshot can bring back an element deleted here: deletes leave no
/// tombstone to compare against.
pub fn merge_snapshot(local: &mut ElementMap, incoming: ElementMap) -> MergeReport {
    let mut report = MergeReport::default();

    for (id, theirs) in incoming {
        match local.get_mut(&id) {
            None => {
                local.insert(id, theirs);
                report.inserted += 1;
            }
            Some(ours) => match resolve(ours, &theirs) {
                Resolution::TakeIncoming => {
                    *ours = theirs;
                    report.replaced += 1;
                }
                Resolution::KeepLocal => report.kept += 1,
            },
        }
    }

    report
}
