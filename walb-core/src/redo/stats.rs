//! Counters accumulated over one redo run.

/// Summary of what a redo run did, returned once the input stream is
/// exhausted and every in-flight IO has completed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RedoStats {
    pub n_written: u64,
    pub n_overwritten: u64,
    pub n_clipped: u64,
    pub n_discard: u64,
    pub n_padding: u64,
    pub n_coalesced: u64,
    pub begin_lsid: Option<u64>,
    pub end_lsid: Option<u64>,
}

impl RedoStats {
    pub(crate) fn observe_lsid(&mut self, lsid: u64) {
        self.begin_lsid.get_or_insert(lsid);
        self.end_lsid = Some(lsid + 1);
    }
}
