//! Access policy — who may talk to a bot.

use bh_domain::bot::{Bot, BotType};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PolicyDecision {
    pub bot_type: BotType,
    pub allow_guest: bool,
}

/// Resolve the effective policy for a bot. Personal bots never admit
/// guests, whatever their settings say.
pub fn resolve(bot: &Bot) -> PolicyDecision {
    let allow_guest = match bot.bot_type {
        BotType::Personal => false,
        BotType::Public => bot.allow_guest,
    };
    PolicyDecision {
        bot_type: bot.bot_type,
        allow_guest,
    }
}
