use super::{SequenceId4, StateId4};
use sharestate_macros::PackTo;

#[derive(PackTo, Debug, Clone, PartialEq, Eq)]
pub struct OpenConfirm4Args {
    pub open_stateid: StateId4,
    pub seqid: SequenceId4,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenConfirm4ResOk {
    pub open_stateid: StateId4,
}
