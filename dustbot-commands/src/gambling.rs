//! src/gambling.rs
//!
//! The gamble command: 50/50 roll over a checked bet, 30 s per-user
//! cooldown. All stat updates go through one mutator so a failed debit
//! persists nothing.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use dustbot_common::envelope::Envelope;
use dustbot_common::error::{Error, Result};
use dustbot_common::topics;
use dustbot_common::user::UserRecord;
use dustbot_core::cooldown::CooldownTracker;
use dustbot_core::worker::{Worker, WorkerContext};

pub const COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BetAmount {
    All,
    Count(i64),
}

/// First whitespace token of the command content; `all` is allowed.
pub fn parse_bet(content: &str) -> Option<BetAmount> {
    let token = content.split_whitespace().next()?;
    if token.eq_ignore_ascii_case("all") {
        return Some(BetAmount::All);
    }
    token.parse::<i64>().ok().map(BetAmount::Count)
}

/// Applies one gamble to the aggregate. The balance check runs first, so an
/// oversized bet fails before any counter moves.
pub fn apply_gamble(user: &mut UserRecord, amount: i64, won: bool) -> Result<()> {
    let held = user.balance();
    if amount > held {
        return Err(Error::InsufficientFunds {
            requested: amount,
            held,
        });
    }
    let gambling = user.gambling_mut();
    gambling.input += amount;
    if won {
        gambling.results += amount;
        gambling.wins += amount;
        user.credit(amount);
    } else {
        gambling.results -= amount;
        gambling.losses += amount;
        user.debit(amount)?;
    }
    Ok(())
}

pub struct GambleWorker {
    cooldowns: CooldownTracker,
    forced_roll: Option<bool>,
}

impl GambleWorker {
    pub fn new() -> Self {
        Self {
            cooldowns: CooldownTracker::new(COOLDOWN),
            forced_roll: None,
        }
    }

    /// Deterministic roll, for tests.
    pub fn with_forced_roll(won: bool) -> Self {
        Self {
            cooldowns: CooldownTracker::new(COOLDOWN),
            forced_roll: Some(won),
        }
    }
}

impl Default for GambleWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Worker for GambleWorker {
    fn name(&self) -> &'static str {
        "gamble"
    }

    fn topics(&self) -> Vec<String> {
        vec![
            topics::command("gamble"),
            topics::command("bet"),
            topics::command("gambling"),
        ]
    }

    async fn handle(&mut self, ctx: &WorkerContext, _topic: &str, envelope: Envelope) -> Result<()> {
        let Some(author) = envelope.author.clone() else {
            return Ok(());
        };
        let mention = &author.mention;

        let Some(bet) = parse_bet(&envelope.content) else {
            if envelope.content.trim().is_empty() {
                ctx.reply(&format!("{mention} You need to specify an amount to gamble!"))
                    .await?;
            } else {
                ctx.reply(&format!(
                    "{mention} Please enter a valid number of dustbunnies to gamble!"
                ))
                .await?;
            }
            return Ok(());
        };

        if let Some(remaining) = self.cooldowns.check(&author.name) {
            ctx.reply(&format!(
                "{mention} Please wait {remaining} seconds before gambling again."
            ))
            .await?;
            return Ok(());
        }

        let user = ctx
            .users
            .get_or_create(&author.name, &author.display_name)
            .await?;
        let amount = match bet {
            BetAmount::All => user.balance(),
            BetAmount::Count(n) if n > 0 => n,
            BetAmount::Count(_) => {
                ctx.reply(&format!(
                    "{mention} Please enter a valid number of dustbunnies to gamble!"
                ))
                .await?;
                return Ok(());
            }
        };
        if amount <= 0 {
            ctx.reply(&format!("{mention} You don't have any dustbunnies to gamble!"))
                .await?;
            return Ok(());
        }

        let won = self
            .forced_roll
            .unwrap_or_else(|| rand::rng().random_bool(0.5));

        match ctx
            .users
            .update(&author.name, &author.display_name, |u| {
                apply_gamble(u, amount, won)
            })
            .await
        {
            Ok(_) => {
                if won {
                    ctx.reply(&format!("{mention} You won {amount} Dustbunnies! 🎉"))
                        .await?;
                } else {
                    ctx.reply(&format!("{mention} You lost {amount} Dustbunnies! 😢"))
                        .await?;
                }
                Ok(())
            }
            Err(Error::InsufficientFunds { requested, .. }) => {
                ctx.reply(&format!(
                    "{mention} You don't have enough dustbunnies to gamble {requested}! 😢"
                ))
                .await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bet_variants() {
        assert_eq!(parse_bet("50"), Some(BetAmount::Count(50)));
        assert_eq!(parse_bet("  all extra"), Some(BetAmount::All));
        assert_eq!(parse_bet("ALL"), Some(BetAmount::All));
        assert_eq!(parse_bet("fifty"), None);
        assert_eq!(parse_bet(""), None);
    }

    #[test]
    fn winning_credits_and_tracks() {
        let mut user = UserRecord::new("alice", "Alice");
        user.credit(100);
        apply_gamble(&mut user, 50, true).unwrap();
        assert_eq!(user.balance(), 150);
        let g = user.gambling.as_ref().unwrap();
        assert_eq!(g.input, 50);
        assert_eq!(g.results, 50);
        assert_eq!(g.wins, 50);
        assert_eq!(g.losses, 0);
    }

    #[test]
    fn losing_debits_and_tracks() {
        let mut user = UserRecord::new("alice", "Alice");
        user.credit(100);
        apply_gamble(&mut user, 40, false).unwrap();
        assert_eq!(user.balance(), 60);
        let g = user.gambling.as_ref().unwrap();
        assert_eq!(g.input, 40);
        assert_eq!(g.results, -40);
        assert_eq!(g.losses, 40);
    }

    #[test]
    fn oversized_bet_fails_before_any_counter_moves() {
        let mut user = UserRecord::new("alice", "Alice");
        user.credit(10);
        assert!(apply_gamble(&mut user, 50, true).is_err());
        assert_eq!(user.balance(), 10);
        assert!(user.gambling.is_none());
    }
}
