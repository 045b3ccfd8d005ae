use super::{SequenceId4, StateId4};
use sharestate_macros::PackTo;

#[derive(PackTo, Debug, Clone, PartialEq, Eq)]
pub struct Close4Args {
    pub seqid: SequenceId4,
    pub open_stateid: StateId4,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Close4ResOk {
    pub open_stateid: StateId4,
}
