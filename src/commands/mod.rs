use std::collections::HashMap;
use std::sync::Arc;

use crate::execution::flair::render_top;
use crate::execution::{FlairLedger, RateLimiter};

/// Chat commands the bot understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Flair,
    Help,
    Donate,
}

/// Token → command table, built once at startup.
#[derive(Debug, Clone)]
pub struct CommandRegistry {
    commands: HashMap<&'static str, CommandKind>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        let commands = HashMap::from([
            ("flair", CommandKind::Flair),
            ("help", CommandKind::Help),
            ("donate", CommandKind::Donate),
        ]);
        Self { commands }
    }
}

impl CommandRegistry {
    pub fn lookup(&self, token: &str) -> Option<CommandKind> {
        self.commands.get(token).copied()
    }
}

#[derive(Debug, Clone)]
pub struct ResponderConfig {
    pub prefix: String,
    pub top_size: usize,
    /// Always answered, never rate limited.
    pub privileged_users: Vec<String>,
    /// Never answered.
    pub banned_users: Vec<String>,
    /// BTC address for `donate`; the command stays silent without one.
    pub donation_address: Option<String>,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            prefix: "!".into(),
            top_size: 5,
            privileged_users: Vec::new(),
            banned_users: Vec::new(),
            donation_address: None,
        }
    }
}

/// Turns chat lines into replies.
///
/// `dispatch` answers a single line; `respond` additionally applies reply
/// gating, so a chatty user is answered less and less often.
pub struct Responder {
    config: ResponderConfig,
    registry: CommandRegistry,
    ledger: Arc<FlairLedger>,
    reply_limiter: Arc<dyn RateLimiter>,
}

impl Responder {
    pub fn new(
        config: ResponderConfig,
        ledger: Arc<FlairLedger>,
        reply_limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        Self {
            config,
            registry: CommandRegistry::default(),
            ledger,
            reply_limiter,
        }
    }

    pub fn ledger(&self) -> &Arc<FlairLedger> {
        &self.ledger
    }

    pub fn can_reply(&self, user: &str) -> bool {
        let listed = |list: &[String]| list.iter().any(|u| u.eq_ignore_ascii_case(user));

        if listed(&self.config.privileged_users) {
            true
        } else if listed(&self.config.banned_users) {
            false
        } else {
            !self.reply_limiter.is_limited(user)
        }
    }

    pub fn responded_to(&self, user: &str) {
        self.reply_limiter.record_event(user);
    }

    /// Gated entry point for a chat front-end.
    pub async fn respond(&self, user: &str, line: &str) -> Option<String> {
        if !self.can_reply(user) {
            tracing::debug!(user = %user, "Reply suppressed");
            return None;
        }
        let reply = self.dispatch(user, line).await?;
        self.responded_to(user);
        Some(reply)
    }

    /// Answer one line, or `None` if it is not a command or warrants no reply.
    pub async fn dispatch(&self, user: &str, line: &str) -> Option<String> {
        let body = line.trim().strip_prefix(self.config.prefix.as_str())?;
        let mut args = body.split_whitespace();
        let token = args.next()?;
        let args: Vec<&str> = args.collect();

        let Some(kind) = self.registry.lookup(token) else {
            tracing::warn!(user = %user, command = %token, ?args, "Invalid command");
            return None;
        };

        match kind {
            CommandKind::Help => Some(self.help()),
            CommandKind::Flair => self.flair(user, &args).await,
            CommandKind::Donate => self.donate(user),
        }
    }

    fn donate(&self, user: &str) -> Option<String> {
        match &self.config.donation_address {
            Some(address) => Some(format!("Bitcoin donations accepted at {address}.")),
            None => {
                tracing::debug!(user = %user, "Donate requested but no address is configured");
                None
            }
        }
    }

    fn help(&self) -> String {
        format!(
            "Commands: {0}flair <long|short|flat>, {0}flair status [user], {0}flair top",
            self.config.prefix
        )
    }

    async fn flair(&self, user: &str, args: &[&str]) -> Option<String> {
        let result = match args {
            [] => {
                tracing::info!(user = %user, "No flair subcommand, returning own status");
                self.ledger.status(user).await.map(|s| s.to_string())
            }
            [sub, rest @ ..] if sub.eq_ignore_ascii_case("status") => {
                let target = rest.first().copied().unwrap_or(user);
                tracing::info!(user = %user, target = %target, "Flair status requested");
                self.ledger.status(target).await.map(|s| s.to_string())
            }
            [sub, ..] if sub.eq_ignore_ascii_case("top") => {
                tracing::info!(user = %user, "Flair top requested");
                self.ledger
                    .top(self.config.top_size)
                    .await
                    .map(|standings| render_top(&standings))
            }
            [token, ..] => {
                tracing::info!(user = %user, token = %token, "Flair change requested");
                self.ledger
                    .change_position(user, token)
                    .await
                    .map(|outcome| outcome.to_string())
            }
        };

        match result {
            Ok(reply) => Some(reply),
            Err(e) => e.user_message(),
        }
    }
}
