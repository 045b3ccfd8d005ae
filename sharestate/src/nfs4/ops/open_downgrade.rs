use super::{SequenceId4, StateId4};
use sharestate_macros::PackTo;

#[derive(PackTo, Debug, Clone, PartialEq, Eq)]
pub struct OpenDowngrade4Args {
    pub open_stateid: StateId4,
    pub seqid: SequenceId4,
    pub share_access: u32,
    pub share_deny: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenDowngrade4ResOk {
    pub open_stateid: StateId4,
}
