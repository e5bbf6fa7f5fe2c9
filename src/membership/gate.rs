//! Gating interceptor run by the dispatcher before any interaction handler.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::api::{ChannelRegistry, LocaleResolver, MembershipClient};
use crate::config::TurnstileConfig;
use crate::error::Result;
use crate::throttle::{RateLimiter, RatePolicy};
use super::cache::MembershipCache;
use super::verifier::{ChannelVerifier, Verification};

/// Flood guard for the recheck button: 3 attempts per 10 seconds per user.
const RECHECK_POLICY: RatePolicy = RatePolicy::per(3, Duration::from_secs(10));

/// Kind of chat an interaction originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

/// Kind of interaction being gated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionKind {
    /// A plain message or command
    Message,
    /// A callback-style button press
    Callback,
}

/// The typed interaction context the gate inspects.
///
/// Built by the dispatcher from the raw platform update; no reflection on
/// handler call shape is needed.
#[derive(Debug, Clone)]
pub struct Interaction {
    /// Acting user, absent for anonymous service updates
    pub user_id: Option<i64>,
    pub chat: ChatKind,
    pub kind: InteractionKind,
}

/// An action attached to a prompt button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptAction {
    /// Open a deep link
    Url(String),
    /// Trigger the membership recheck flow
    Recheck,
}

/// One button in a prompt keyboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptButton {
    pub label: String,
    pub action: PromptAction,
}

/// A user-facing prompt the host renders instead of running the handler.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub text: String,
    /// Button rows, one row per entry
    pub keyboard: Vec<Vec<PromptButton>>,
}

/// The gate's verdict for one interaction.
#[derive(Debug)]
pub enum GateDecision {
    /// Call the wrapped handler.
    Proceed,
    /// Authoritative negative: show the join prompt, do not run the handler.
    Join(Prompt),
    /// Transient backend trouble: show a retry prompt, do not run the handler.
    Retry(Prompt),
    /// A required collaborator is unreachable: fail closed with a generic error.
    Deny(Prompt),
}

/// Outcome of a user-initiated membership recheck.
#[derive(Debug)]
pub enum RecheckOutcome {
    /// The user now belongs everywhere; the host shows the main menu.
    Verified,
    /// Channels are still missing; show the reminder prompt.
    StillMissing(Prompt),
    /// Connectivity trouble; show the retry prompt.
    NetworkIssue(Prompt),
    /// Too many recheck attempts; ask the user to wait.
    Throttled { wait: Duration },
}

/// The membership gate.
///
/// Wraps any interaction handler: consults the cache, runs the concurrent
/// verifier when needed, and either lets the interaction through or
/// substitutes a prompt. Whenever a definite positive cannot be produced the
/// gate denies — it never silently proceeds.
pub struct MembershipGate {
    verifier: ChannelVerifier,
    cache: Arc<MembershipCache>,
    locale: Arc<dyn LocaleResolver>,
    limiter: Arc<RateLimiter>,
    language_onboarding: bool,
    default_lang: String,
}

impl MembershipGate {
    /// Assemble a gate over the given collaborators and shared state.
    pub fn new(
        client: Arc<dyn MembershipClient>,
        registry: Arc<dyn ChannelRegistry>,
        locale: Arc<dyn LocaleResolver>,
        cache: Arc<MembershipCache>,
        limiter: Arc<RateLimiter>,
        config: &TurnstileConfig,
    ) -> Self {
        Self {
            verifier: ChannelVerifier::new(client, registry, cache.clone()),
            cache,
            locale,
            limiter,
            language_onboarding: config.language_onboarding,
            default_lang: config.default_lang.clone(),
        }
    }

    /// The shared membership cache.
    ///
    /// Registry mutations (add/remove/reorder/toggle of a required channel)
    /// must call `invalidate_all` on it, since the definition of membership
    /// changed for every user at once.
    pub fn cache(&self) -> &Arc<MembershipCache> {
        &self.cache
    }

    /// Decide whether an interaction may reach its handler.
    pub async fn admit(&self, interaction: &Interaction) -> GateDecision {
        // Policy exception: feedback buttons on content already posted to
        // groups must stay clickable regardless of the clicker's membership.
        if interaction.kind == InteractionKind::Callback
            && matches!(interaction.chat, ChatKind::Group | ChatKind::Supergroup)
        {
            return GateDecision::Proceed;
        }

        let Some(user_id) = interaction.user_id else {
            return GateDecision::Proceed;
        };

        let lang = if self.language_onboarding {
            match self.locale.user_lang(user_id).await {
                Ok(lang) => lang.unwrap_or_else(|| self.default_lang.clone()),
                Err(e) => {
                    error!(user_id, error = %e, "locale collaborator unreachable, denying");
                    return GateDecision::Deny(strings::generic_error(&self.default_lang));
                }
            }
        } else {
            self.default_lang.clone()
        };

        self.cache.maybe_sweep();

        // Only a fresh positive short-circuits; anything else re-verifies.
        if self.cache.get(user_id) == Some(true) {
            debug!(user_id, "membership cache hit, proceeding");
            return GateDecision::Proceed;
        }

        match self.verifier.verify(user_id).await {
            Ok(Verification::Member) => GateDecision::Proceed,
            Ok(Verification::NotMember(missing)) => {
                let first_time = interaction.kind == InteractionKind::Message;
                GateDecision::Join(strings::join_prompt(&missing, first_time, &lang))
            }
            Ok(Verification::Transient(e)) => {
                warn!(user_id, error = %e, "network trouble during gating, offering retry");
                GateDecision::Retry(strings::network_error_prompt(&lang))
            }
            Err(e) => {
                error!(user_id, error = %e, "channel registry unreachable, denying");
                GateDecision::Deny(strings::generic_error(&lang))
            }
        }
    }

    /// Handle the "I've joined" recheck button.
    ///
    /// Flood-guarded per user, then invalidates the user's cache entry (they
    /// just claimed to have joined) and re-verifies live.
    ///
    /// Errors only when the channel registry is unreachable; the host shows
    /// a generic error in that case.
    pub async fn recheck(&self, user_id: i64, lang: &str) -> Result<RecheckOutcome> {
        let key = format!("membership_check_{}", user_id);
        let (allowed, wait) = self.limiter.check(&key, Some(RECHECK_POLICY)).await;
        if !allowed {
            warn!(user_id, wait_secs = wait.as_secs_f64(), "recheck flood guard hit");
            return Ok(RecheckOutcome::Throttled { wait });
        }

        self.cache.invalidate(user_id);

        match self.verifier.verify(user_id).await? {
            Verification::Member => {
                debug!(user_id, "membership confirmed after recheck");
                Ok(RecheckOutcome::Verified)
            }
            Verification::NotMember(missing) => Ok(RecheckOutcome::StillMissing(
                strings::join_prompt(&missing, false, lang),
            )),
            Verification::Transient(e) => {
                warn!(user_id, error = %e, "network trouble during recheck");
                Ok(RecheckOutcome::NetworkIssue(strings::network_error_prompt(lang)))
            }
        }
    }
}

/// Built-in prompt strings, English with a Persian translation.
///
/// Anything richer belongs to the host application's i18n layer; the gate
/// only needs these few phrases to stay self-contained.
mod strings {
    use super::{Prompt, PromptAction, PromptButton};
    use crate::api::RequiredChannel;

    fn fa(lang: &str) -> bool {
        lang.starts_with("fa")
    }

    pub(super) fn join_prompt(
        missing: &[RequiredChannel],
        first_time: bool,
        lang: &str,
    ) -> Prompt {
        let title = match (first_time, fa(lang)) {
            (true, false) => "Welcome! To use this bot, you first need to join our channels.",
            (true, true) => "خوش آمدید! برای استفاده از ربات ابتدا باید عضو کانال‌های ما شوید.",
            (false, false) => "You still need to join the required channels.",
            (false, true) => "هنوز باید عضو کانال‌های اجباری شوید.",
        };
        let body = if fa(lang) {
            "در کانال‌های زیر عضو شوید و سپس دکمه را بزنید."
        } else {
            "Join the channels below, then press the button to verify."
        };
        let cta = joined_label(lang);

        let mut text = format!("{}\n\n{}\n\n", title, body);
        for (i, channel) in missing.iter().enumerate() {
            text.push_str(&format!("{}. {}\n", i + 1, channel.title));
        }
        if fa(lang) {
            text.push_str(&format!("\nپس از عضویت، دکمه «{}» را بزنید.", cta));
        } else {
            text.push_str(&format!("\nAfter joining, press \"{}\".", cta));
        }

        let mut keyboard: Vec<Vec<PromptButton>> = missing
            .iter()
            .map(|channel| {
                let label = if fa(lang) {
                    format!("عضویت در {}", channel.title)
                } else {
                    format!("Join {}", channel.title)
                };
                vec![PromptButton {
                    label,
                    action: PromptAction::Url(channel.url.clone()),
                }]
            })
            .collect();
        keyboard.push(vec![PromptButton {
            label: cta.to_string(),
            action: PromptAction::Recheck,
        }]);

        Prompt { text, keyboard }
    }

    pub(super) fn network_error_prompt(lang: &str) -> Prompt {
        let (text, retry) = if fa(lang) {
            (
                "مشکل در اتصال\n\nعضویت شما بررسی نشد. لطفاً دوباره تلاش کنید.",
                "تلاش مجدد",
            )
        } else {
            (
                "Connection problem\n\nWe couldn't verify your membership. Please try again.",
                "Retry",
            )
        };
        Prompt {
            text: text.to_string(),
            keyboard: vec![vec![PromptButton {
                label: retry.to_string(),
                action: PromptAction::Recheck,
            }]],
        }
    }

    pub(super) fn generic_error(lang: &str) -> Prompt {
        let text = if fa(lang) {
            "خطایی رخ داد. لطفاً بعداً دوباره تلاش کنید."
        } else {
            "Something went wrong. Please try again later."
        };
        Prompt {
            text: text.to_string(),
            keyboard: Vec::new(),
        }
    }

    fn joined_label(lang: &str) -> &'static str {
        if fa(lang) {
            "عضو شدم ✅"
        } else {
            "I've joined ✅"
        }
    }
}
