//! Change detection between the cached state of a topic and a fresh fetch.
//!
//! Only the two block heights are compared. A different inference height is
//! accepted even when it moves backwards; values at equal heights are never
//! compared.

use crate::{CachedTopicState, RawSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptReason {
    FirstSeen,
    NewInferenceHeight,
    LossRecomputed,
}

impl AcceptReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcceptReason::FirstSeen => "first_seen",
            AcceptReason::NewInferenceHeight => "new_inference_height",
            AcceptReason::LossRecomputed => "loss_recomputed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept(AcceptReason),
    Skip,
}

impl Decision {
    pub fn is_accept(&self) -> bool {
        matches!(self, Decision::Accept(_))
    }
}

pub fn should_accept(cached: Option<&CachedTopicState>, incoming: &RawSnapshot) -> Decision {
    let Some(prev) = cached else {
        return Decision::Accept(AcceptReason::FirstSeen);
    };
    let prev = &prev.record;
    if prev.inference_block_height != incoming.inference_block_height {
        return Decision::Accept(AcceptReason::NewInferenceHeight);
    }
    if prev.loss_block_height != incoming.loss_block_height {
        return Decision::Accept(AcceptReason::LossRecomputed);
    }
    Decision::Skip
}
