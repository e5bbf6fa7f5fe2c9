//! Membership gating: cache, concurrent verifier, and the gate interceptor.

mod cache;
mod gate;
mod verifier;

pub use cache::MembershipCache;
pub use gate::{
    ChatKind, GateDecision, Interaction, InteractionKind, MembershipGate, Prompt, PromptAction,
    PromptButton, RecheckOutcome,
};
pub use verifier::{ChannelVerifier, Verification};
