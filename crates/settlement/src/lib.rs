pub mod encode;
pub mod submitter;

pub use encode::{encode_batch_call, encode_proposal, TokenMap, EXECUTE_BATCH_SELECTOR};
pub use submitter::{
    BatchSubmitter, MockSubmitter, RpcBatchSubmitter, SettlementReceipt, SubmitError,
};
