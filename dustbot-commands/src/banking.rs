//! src/banking.rs
//!
//! Invest/collect: dustbunnies move into `banking.bunnies_invested` and earn
//! daily compound interest. Collecting folds the interest into the invested
//! principal and resets the investment timestamp to now.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use dustbot_common::envelope::{Envelope, normalize_username};
use dustbot_common::error::{Error, Result};
use dustbot_common::user::UserRecord;
use dustbot_common::{keys, topics};
use dustbot_core::worker::{Worker, WorkerContext};

pub const DEFAULT_DAILY_RATE: f64 = 0.02;

pub fn apply_invest(user: &mut UserRecord, amount: i64, now: DateTime<Utc>) -> Result<()> {
    user.debit(amount)?;
    let banking = user.banking_mut();
    banking.bunnies_invested += amount;
    banking.timestamp_investment = Some(now);
    Ok(())
}

pub fn whole_days_since(since: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - since).num_days().max(0)
}

/// Compound interest over `days` at `rate`, folded into the principal.
/// Returns the interest collected. Caller guarantees something is invested.
pub fn apply_interest(user: &mut UserRecord, days: i64, rate: f64, now: DateTime<Utc>) -> i64 {
    let banking = user.banking_mut();
    let invested = banking.bunnies_invested;
    let total = ((invested as f64) * (1.0 + rate).powi(days as i32)).floor() as i64;
    let interest = total - invested;
    banking.bunnies_invested = total;
    banking.total_bunnies_collected += interest;
    banking.last_interest_collected = interest;
    banking.timestamp_investment = Some(now);
    interest
}

pub struct InvestWorker;

impl InvestWorker {
    pub fn new() -> Self {
        Self
    }
}

impl Default for InvestWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Worker for InvestWorker {
    fn name(&self) -> &'static str {
        "invest"
    }

    fn topics(&self) -> Vec<String> {
        ["invest", "investment", "investing", "bank", "banking", "investments", "deposit"]
            .iter()
            .copied()
            .map(topics::command)
            .collect()
    }

    async fn handle(&mut self, ctx: &WorkerContext, _topic: &str, envelope: Envelope) -> Result<()> {
        let Some(author) = envelope.author.clone() else {
            return Ok(());
        };
        let mention = &author.mention;

        let amount = envelope
            .content
            .split_whitespace()
            .next()
            .and_then(|token| token.parse::<i64>().ok())
            .filter(|n| *n > 0);
        let Some(amount) = amount else {
            ctx.reply(&format!("{mention} you need to specify an amount to invest"))
                .await?;
            return Ok(());
        };

        match ctx
            .users
            .update(&author.name, &author.display_name, |u| {
                apply_invest(u, amount, Utc::now())
            })
            .await
        {
            Ok(_) => {
                ctx.reply(&format!("{mention} you have invested {amount} dustbunnies"))
                    .await?;
                Ok(())
            }
            Err(Error::InsufficientFunds { held, .. }) => {
                ctx.reply(&format!(
                    "{mention} you only have {held} dustbunnies to invest"
                ))
                .await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

pub struct CollectWorker {
    rate: f64,
}

impl CollectWorker {
    pub fn new() -> Self {
        Self {
            rate: DEFAULT_DAILY_RATE,
        }
    }

    async fn collect_for_self(&self, ctx: &WorkerContext, author_name: &str, display: &str, mention: &str) -> Result<()> {
        let user = ctx.users.get_or_create(author_name, display).await?;
        let banking = user.banking.clone().unwrap_or_default();
        if banking.bunnies_invested <= 0 {
            ctx.reply(&format!(
                "{mention} you have not invested any dustbunnies yet, use !invest to open an account"
            ))
            .await?;
            return Ok(());
        }
        let now = Utc::now();
        let days = banking
            .timestamp_investment
            .map(|ts| whole_days_since(ts, now))
            .unwrap_or(0);
        if days < 1 {
            ctx.reply(&format!(
                "{mention} you have to wait at least 1 day to collect interest"
            ))
            .await?;
            return Ok(());
        }
        let interest = self.collect_with_days(ctx, author_name, display, days).await?;
        ctx.reply(&format!(
            "{mention} you have collected {interest} dustbunnies from interest"
        ))
        .await?;
        Ok(())
    }

    /// Mods collect for someone with the actual elapsed days; broadcasters
    /// can force an arbitrary day count.
    async fn collect_for_other(
        &self,
        ctx: &WorkerContext,
        mention: &str,
        target: &str,
        forced_days: Option<i64>,
    ) -> Result<()> {
        let target_name = normalize_username(target);
        let Some(user) = ctx.users.get(&target_name).await? else {
            ctx.reply(&format!(
                "{mention} the user {target} does not exist or has no bank account"
            ))
            .await?;
            return Ok(());
        };
        let banking = user.banking.clone().unwrap_or_default();
        if banking.bunnies_invested <= 0 {
            ctx.reply(&format!(
                "{mention} the user {target} has not invested any dustbunnies yet"
            ))
            .await?;
            return Ok(());
        }
        let days = forced_days.unwrap_or_else(|| {
            banking
                .timestamp_investment
                .map(|ts| whole_days_since(ts, Utc::now()))
                .unwrap_or(0)
                .max(1)
        });
        let interest = self
            .collect_with_days(ctx, &target_name, &user.display_name, days)
            .await?;
        ctx.reply(&format!(
            "{mention} collected {interest} dustbunnies of interest for {target}"
        ))
        .await?;
        Ok(())
    }

    async fn collect_with_days(
        &self,
        ctx: &WorkerContext,
        name: &str,
        display: &str,
        days: i64,
    ) -> Result<i64> {
        let rate = self.rate;
        let mut collected = 0;
        ctx.users
            .update(name, display, |u| {
                collected = apply_interest(u, days, rate, Utc::now());
                Ok(())
            })
            .await?;
        Ok(collected)
    }
}

impl Default for CollectWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Worker for CollectWorker {
    fn name(&self) -> &'static str {
        "collect"
    }

    fn topics(&self) -> Vec<String> {
        vec![topics::command("collect"), topics::command("interest")]
    }

    /// The daily rate is operator-settable through the KV; seed the default
    /// on first start.
    async fn started(&mut self, ctx: &WorkerContext) -> Result<()> {
        match ctx.bus.get(keys::DAILY_INTEREST_RATE).await? {
            Some(raw) => {
                self.rate = raw
                    .parse::<f64>()
                    .map_err(|_| Error::Parse(format!("bad daily_interest_rate: {raw}")))?;
            }
            None => {
                ctx.bus
                    .set(keys::DAILY_INTEREST_RATE, &DEFAULT_DAILY_RATE.to_string())
                    .await?;
                self.rate = DEFAULT_DAILY_RATE;
            }
        }
        Ok(())
    }

    async fn handle(&mut self, ctx: &WorkerContext, _topic: &str, envelope: Envelope) -> Result<()> {
        let Some(author) = envelope.author.clone() else {
            return Ok(());
        };
        let mention = author.mention.clone();
        let parts: Vec<&str> = envelope.content.split_whitespace().collect();

        if !parts.is_empty() && (author.broadcaster || author.moderator) {
            let target = parts[0];
            if !target.starts_with('@') {
                ctx.reply(&format!(
                    "{mention} you need to use the @username to collect for someone"
                ))
                .await?;
                return Ok(());
            }
            if author.broadcaster {
                let days = match parts.get(1) {
                    Some(raw) => match raw.parse::<i64>() {
                        Ok(days) if days > 0 => days,
                        _ => {
                            ctx.reply(&format!("{mention} the days must be a number"))
                                .await?;
                            return Ok(());
                        }
                    },
                    None => 1,
                };
                return self
                    .collect_for_other(ctx, &mention, target, Some(days))
                    .await;
            }
            return self.collect_for_other(ctx, &mention, target, None).await;
        }

        self.collect_for_self(ctx, &author.name, &author.display_name, &mention)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn invest_debits_and_stamps() {
        let mut user = UserRecord::new("carol", "Carol");
        user.credit(1000);
        let now = Utc::now();
        apply_invest(&mut user, 400, now).unwrap();
        assert_eq!(user.balance(), 600);
        let banking = user.banking.as_ref().unwrap();
        assert_eq!(banking.bunnies_invested, 400);
        assert_eq!(banking.timestamp_investment, Some(now));
    }

    #[test]
    fn invest_more_than_held_fails_clean() {
        let mut user = UserRecord::new("carol", "Carol");
        user.credit(100);
        assert!(apply_invest(&mut user, 400, Utc::now()).is_err());
        assert_eq!(user.balance(), 100);
        assert!(user.banking.is_none());
    }

    #[test]
    fn two_days_at_two_percent_compounds() {
        let mut user = UserRecord::new("carol", "Carol");
        user.credit(400);
        let start = Utc::now();
        apply_invest(&mut user, 400, start).unwrap();

        let interest = apply_interest(&mut user, 2, 0.02, start + Duration::days(2));
        assert_eq!(interest, 16);
        let banking = user.banking.as_ref().unwrap();
        assert_eq!(banking.bunnies_invested, 416);
        assert_eq!(banking.last_interest_collected, 16);
        assert_eq!(banking.total_bunnies_collected, 16);
    }

    #[test]
    fn whole_days_rounds_down() {
        let now = Utc::now();
        assert_eq!(whole_days_since(now - Duration::hours(23), now), 0);
        assert_eq!(whole_days_since(now - Duration::hours(49), now), 2);
        // clock skew never yields negative days
        assert_eq!(whole_days_since(now + Duration::hours(5), now), 0);
    }

    #[test]
    fn interest_resets_timestamp_to_now() {
        let mut user = UserRecord::new("carol", "Carol");
        user.credit(100);
        let start = Utc::now() - Duration::days(10);
        apply_invest(&mut user, 100, start).unwrap();
        let now = Utc::now();
        apply_interest(&mut user, 10, 0.02, now);
        assert_eq!(
            user.banking.as_ref().unwrap().timestamp_investment,
            Some(now)
        );
    }
}
