//! src/fighting.rs
//!
//! Turn-based duel: random class/weapon/ability loadouts, abilities spend
//! mana, weapons carry on-hit effects. Damage-over-time ticks on the
//! attacker before ability selection each turn. 50 turns without a kill is
//! a draw.

use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use dustbot_common::envelope::{Envelope, normalize_username};
use dustbot_common::error::Result;
use dustbot_common::topics;
use dustbot_core::cooldown::CooldownTracker;
use dustbot_core::logging::BusLogLevel;
use dustbot_core::worker::{Worker, WorkerContext};
use dustbot_core::caller;

use crate::narration::Narrator;

pub const COOLDOWN: Duration = Duration::from_secs(30);

const MAX_TURNS: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WeaponEffect {
    Bleed,
    InstakillChance,
    DoubleHit,
    Burn,
    Freeze,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AbilityEffect {
    Damage,
    Block,
    Buff,
    Heal,
    Dot,
    Dodge,
    Miss,
    Freeze,
    ManaDrain,
}

struct ClassDef {
    name: &'static str,
    health: (i32, i32),
    mana: (i32, i32),
    weapons: &'static [&'static str],
    special: &'static str,
    abilities: [&'static str; 5],
}

const CLASSES: [ClassDef; 3] = [
    ClassDef {
        name: "Warrior",
        health: (120, 160),
        mana: (30, 50),
        weapons: &["Greatsword", "Battle Axe"],
        special: "Berserk",
        abilities: ["Power Strike", "Shield Block", "Battle Cry", "Charge", "Second Wind"],
    },
    ClassDef {
        name: "Rogue",
        health: (70, 100),
        mana: (40, 60),
        weapons: &["Dagger", "Shortbow"],
        special: "Backstab",
        abilities: ["Poison Blade", "Evasion", "Shadowstep", "Quick Shot", "Smoke Bomb"],
    },
    ClassDef {
        name: "Mage",
        health: (50, 80),
        mana: (80, 120),
        weapons: &["Fire Staff", "Ice Wand"],
        special: "Fireball",
        abilities: ["Magic Missile", "Frost Nova", "Arcane Shield", "Mana Burn", "Heal"],
    },
];

struct WeaponDef {
    dmg: (i32, i32),
    hit_chance: (i32, i32),
    effect: Option<WeaponEffect>,
}

fn weapon_def(name: &str) -> WeaponDef {
    match name {
        "Greatsword" => WeaponDef { dmg: (18, 28), hit_chance: (65, 85), effect: None },
        "Battle Axe" => WeaponDef { dmg: (22, 32), hit_chance: (60, 80), effect: Some(WeaponEffect::Bleed) },
        "Dagger" => WeaponDef { dmg: (10, 18), hit_chance: (85, 100), effect: Some(WeaponEffect::InstakillChance) },
        "Shortbow" => WeaponDef { dmg: (14, 22), hit_chance: (75, 95), effect: Some(WeaponEffect::DoubleHit) },
        "Fire Staff" => WeaponDef { dmg: (12, 20), hit_chance: (70, 90), effect: Some(WeaponEffect::Burn) },
        _ => WeaponDef { dmg: (10, 16), hit_chance: (80, 100), effect: Some(WeaponEffect::Freeze) },
    }
}

struct AbilityDef {
    cost: i32,
    effect: AbilityEffect,
    value: (i32, i32),
}

fn ability_def(name: &str) -> AbilityDef {
    match name {
        "Power Strike" => AbilityDef { cost: 10, effect: AbilityEffect::Damage, value: (20, 30) },
        "Shield Block" => AbilityDef { cost: 8, effect: AbilityEffect::Block, value: (10, 20) },
        "Battle Cry" => AbilityDef { cost: 12, effect: AbilityEffect::Buff, value: (5, 10) },
        "Charge" => AbilityDef { cost: 15, effect: AbilityEffect::Damage, value: (15, 25) },
        "Second Wind" => AbilityDef { cost: 20, effect: AbilityEffect::Heal, value: (20, 30) },
        "Poison Blade" => AbilityDef { cost: 10, effect: AbilityEffect::Dot, value: (5, 10) },
        "Evasion" => AbilityDef { cost: 8, effect: AbilityEffect::Dodge, value: (1, 2) },
        "Shadowstep" => AbilityDef { cost: 12, effect: AbilityEffect::Damage, value: (15, 25) },
        "Quick Shot" => AbilityDef { cost: 10, effect: AbilityEffect::Damage, value: (10, 20) },
        "Smoke Bomb" => AbilityDef { cost: 15, effect: AbilityEffect::Miss, value: (1, 2) },
        "Magic Missile" => AbilityDef { cost: 10, effect: AbilityEffect::Damage, value: (18, 28) },
        "Frost Nova" => AbilityDef { cost: 12, effect: AbilityEffect::Freeze, value: (1, 2) },
        "Arcane Shield" => AbilityDef { cost: 15, effect: AbilityEffect::Block, value: (15, 25) },
        "Mana Burn" => AbilityDef { cost: 10, effect: AbilityEffect::ManaDrain, value: (10, 20) },
        _ => AbilityDef { cost: 20, effect: AbilityEffect::Heal, value: (20, 35) },
    }
}

#[derive(Debug, Clone)]
pub struct Loadout {
    pub class_name: &'static str,
    pub health: i32,
    pub mana: i32,
    pub weapon: &'static str,
    pub abilities: Vec<&'static str>,
    pub special: &'static str,
}

pub fn random_loadout<R: Rng>(rng: &mut R) -> Loadout {
    let class = &CLASSES[rng.random_range(0..CLASSES.len())];
    let mut abilities = class.abilities.to_vec();
    abilities.shuffle(rng);
    Loadout {
        class_name: class.name,
        health: rng.random_range(class.health.0..=class.health.1),
        mana: rng.random_range(class.mana.0..=class.mana.1),
        weapon: class.weapons[rng.random_range(0..class.weapons.len())],
        abilities,
        special: class.special,
    }
}

#[derive(Debug, Default)]
struct FighterState {
    health: i32,
    mana: i32,
    block: i32,
    buff: i32,
    dot: i32,
    dodge: i32,
    miss: i32,
    frozen: i32,
    weapon: &'static str,
    abilities: Vec<&'static str>,
}

impl FighterState {
    fn from_loadout(loadout: &Loadout) -> Self {
        Self {
            health: loadout.health,
            mana: loadout.mana,
            weapon: loadout.weapon,
            abilities: loadout.abilities.clone(),
            ..Default::default()
        }
    }
}

#[derive(Debug)]
pub struct FightOutcome {
    /// Index into the `names` array; `None` on a draw.
    pub winner: Option<usize>,
    pub turns: u32,
    pub log: Vec<String>,
}

pub fn simulate<R: Rng>(names: [&str; 2], loadouts: [&Loadout; 2], rng: &mut R) -> FightOutcome {
    let mut states = [
        FighterState::from_loadout(loadouts[0]),
        FighterState::from_loadout(loadouts[1]),
    ];
    let mut log = Vec::new();
    let mut turn: u32 = 0;

    loop {
        let attacker_idx = (turn % 2) as usize;
        let defender_idx = 1 - attacker_idx;
        let attacker = names[attacker_idx];
        let defender = names[defender_idx];

        let (left, right) = states.split_at_mut(1);
        let (attacker_state, defender_state) = if attacker_idx == 0 {
            (&mut left[0], &mut right[0])
        } else {
            (&mut right[0], &mut left[0])
        };

        // DOT ticks before the attacker picks an ability.
        if attacker_state.dot > 0 {
            attacker_state.health -= attacker_state.dot;
            log.push(format!(
                "{attacker} suffers {} damage from ongoing effects. {attacker} has {} health left.",
                attacker_state.dot, attacker_state.health
            ));
        }
        if attacker_state.health <= 0 {
            return FightOutcome {
                winner: Some(defender_idx),
                turns: turn,
                log,
            };
        }

        let mut used_ability = false;
        if !attacker_state.abilities.is_empty() && rng.random_bool(0.5) {
            used_ability = use_ability(attacker, defender, attacker_state, defender_state, &mut log, rng);
        }
        if !used_ability {
            weapon_attack(attacker, defender, attacker_state, defender_state, &mut log, rng);
        }

        if defender_state.health <= 0 {
            return FightOutcome {
                winner: Some(attacker_idx),
                turns: turn,
                log,
            };
        }

        turn += 1;
        if turn > MAX_TURNS {
            log.push("The fight was too long and ends in a draw!".to_string());
            return FightOutcome {
                winner: None,
                turns: turn,
                log,
            };
        }
    }
}

fn use_ability<R: Rng>(
    user: &str,
    opponent: &str,
    user_state: &mut FighterState,
    opponent_state: &mut FighterState,
    log: &mut Vec<String>,
    rng: &mut R,
) -> bool {
    let affordable: Vec<&'static str> = user_state
        .abilities
        .iter()
        .copied()
        .filter(|a| user_state.mana >= ability_def(a).cost)
        .collect();
    if affordable.is_empty() {
        return false;
    }
    let ability = affordable[rng.random_range(0..affordable.len())];
    let def = ability_def(ability);
    user_state.mana -= def.cost;
    let value = rng.random_range(def.value.0..=def.value.1);
    match def.effect {
        AbilityEffect::Damage => {
            opponent_state.health -= value;
            log.push(format!(
                "{user} uses {ability} on {opponent}, dealing {value} damage! {opponent} has {} health left.",
                opponent_state.health
            ));
        }
        AbilityEffect::Heal => {
            user_state.health += value;
            log.push(format!(
                "{user} uses {ability} and heals for {value} health! Now at {} health.",
                user_state.health
            ));
        }
        AbilityEffect::Block => {
            user_state.block += value;
            log.push(format!("{user} uses {ability} and gains a shield of {value} points!"));
        }
        AbilityEffect::Buff => {
            user_state.buff += value;
            log.push(format!(
                "{user} uses {ability} and increases their damage by {value} for the next attack!"
            ));
        }
        AbilityEffect::Dot => {
            opponent_state.dot += value;
            log.push(format!(
                "{user} uses {ability} and poisons {opponent} for {value} damage per turn!"
            ));
        }
        AbilityEffect::Dodge => {
            user_state.dodge += value;
            log.push(format!(
                "{user} uses {ability} and will dodge the next {value} attack(s)!"
            ));
        }
        AbilityEffect::Miss => {
            opponent_state.miss += value;
            log.push(format!(
                "{user} uses {ability} and causes {opponent} to miss their next {value} attack(s)!"
            ));
        }
        AbilityEffect::Freeze => {
            opponent_state.frozen += value;
            log.push(format!("{user} uses {ability} and freezes {opponent} for {value} turn(s)!"));
        }
        AbilityEffect::ManaDrain => {
            let drained = value.min(opponent_state.mana);
            opponent_state.mana -= drained;
            log.push(format!("{user} uses {ability} and drains {drained} mana from {opponent}!"));
        }
    }
    true
}

fn weapon_attack<R: Rng>(
    user: &str,
    opponent: &str,
    user_state: &mut FighterState,
    opponent_state: &mut FighterState,
    log: &mut Vec<String>,
    rng: &mut R,
) {
    let weapon = user_state.weapon;
    let stats = weapon_def(weapon);
    let mut dmg = rng.random_range(stats.dmg.0..=stats.dmg.1);
    let hit_chance = rng.random_range(stats.hit_chance.0..=stats.hit_chance.1);

    if user_state.buff > 0 {
        dmg += user_state.buff;
        user_state.buff = 0;
    }
    if opponent_state.block > 0 {
        if opponent_state.block >= dmg {
            opponent_state.block -= dmg;
            dmg = 0;
        } else {
            dmg -= opponent_state.block;
            opponent_state.block = 0;
        }
    }
    if opponent_state.dodge > 0 {
        opponent_state.dodge -= 1;
        log.push(format!("{opponent} dodges the attack from {user}!"));
        return;
    }
    if user_state.miss > 0 {
        user_state.miss -= 1;
        log.push(format!("{user} misses their attack due to confusion!"));
        return;
    }
    if user_state.frozen > 0 {
        user_state.frozen -= 1;
        log.push(format!("{user} is frozen and cannot act!"));
        return;
    }

    if rng.random_range(1..=100) <= hit_chance {
        if stats.effect == Some(WeaponEffect::InstakillChance) && rng.random_bool(0.05) {
            opponent_state.health = 0;
            log.push(format!(
                "{user} uses {weapon} and lands a deadly blow! {opponent} is instantly defeated!"
            ));
            return;
        }
        if stats.effect == Some(WeaponEffect::DoubleHit) && rng.random_bool(0.15) {
            log.push(format!("{user} uses {weapon} and attacks twice!"));
            for _ in 0..2 {
                weapon_attack(user, opponent, user_state, opponent_state, log, rng);
            }
            return;
        }
        if stats.effect == Some(WeaponEffect::Bleed) && rng.random_bool(0.2) {
            opponent_state.dot += 5;
            log.push(format!(
                "{user} uses {weapon} and causes {opponent} to bleed for 5 damage per turn!"
            ));
        }
        if stats.effect == Some(WeaponEffect::Burn) && rng.random_bool(0.2) {
            opponent_state.dot += 7;
            log.push(format!(
                "{user} uses {weapon} and burns {opponent} for 7 damage per turn!"
            ));
        }
        if stats.effect == Some(WeaponEffect::Freeze) && rng.random_bool(0.15) {
            opponent_state.frozen += 1;
            log.push(format!("{user} uses {weapon} and freezes {opponent} for 1 turn!"));
        }
        opponent_state.health -= dmg;
        log.push(format!(
            "{user} hits {opponent} with {weapon} for {dmg} damage. {opponent} has {} health left.",
            opponent_state.health
        ));
    } else {
        log.push(format!("{user} attacks with {weapon} but misses {opponent}!"));
    }
}

pub struct FightWorker {
    cooldowns: CooldownTracker,
}

impl FightWorker {
    pub fn new() -> Self {
        Self {
            cooldowns: CooldownTracker::new(COOLDOWN),
        }
    }
}

impl Default for FightWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Worker for FightWorker {
    fn name(&self) -> &'static str {
        "fight"
    }

    fn topics(&self) -> Vec<String> {
        vec![
            topics::command("fight"),
            topics::command("battle"),
            topics::command("duel"),
        ]
    }

    async fn handle(&mut self, ctx: &WorkerContext, _topic: &str, envelope: Envelope) -> Result<()> {
        let Some(author) = envelope.author.clone() else {
            return Ok(());
        };
        let mention = &author.mention;

        let Some(raw_target) = envelope.content.split_whitespace().next() else {
            ctx.reply(&format!(
                "{mention} Please provide a username to fight with. Usage: !fight <username>"
            ))
            .await?;
            return Ok(());
        };
        let target = normalize_username(raw_target);
        if target == author.name {
            ctx.reply(&format!("{mention} You can't fight yourself!")).await?;
            return Ok(());
        }

        if let Some(remaining) = self.cooldowns.check(&author.name) {
            ctx.reply(&format!(
                "{mention} Please wait {remaining} seconds before challenging again."
            ))
            .await?;
            return Ok(());
        }

        let challenger = author.name.clone();
        ctx.users
            .update(&target, &target, |user| {
                user.fighting_mut().fight_requested_by = challenger;
                Ok(())
            })
            .await?;

        ctx.reply(&format!(
            "@{target} {} has requested a fight with you! Type !accept to fight back!",
            author.display_name
        ))
        .await?;
        Ok(())
    }
}

pub struct AcceptWorker {
    cooldowns: CooldownTracker,
    rng: StdRng,
    narrator: Option<Narrator>,
}

impl AcceptWorker {
    pub fn new() -> Self {
        Self {
            cooldowns: CooldownTracker::new(COOLDOWN),
            rng: StdRng::from_os_rng(),
            narrator: None,
        }
    }

    /// Deterministic simulation, for tests.
    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            cooldowns: CooldownTracker::new(COOLDOWN),
            rng,
            narrator: None,
        }
    }
}

impl Default for AcceptWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Worker for AcceptWorker {
    fn name(&self) -> &'static str {
        "accept"
    }

    fn topics(&self) -> Vec<String> {
        vec![topics::command("accept")]
    }

    /// Narration is optional: without an LLM key the fight result is posted
    /// without flavor text.
    async fn started(&mut self, ctx: &WorkerContext) -> Result<()> {
        if let Some(api_key) = ctx.secrets.get(dustbot_core::secrets::OPENAI_API_KEY).await? {
            let mut narrator = Narrator::new(api_key);
            if let Some(base) = ctx.secrets.get(dustbot_core::secrets::OPENAI_API_BASE).await? {
                narrator = narrator.with_api_base(base);
            }
            self.narrator = Some(narrator);
        }
        Ok(())
    }

    async fn handle(&mut self, ctx: &WorkerContext, _topic: &str, envelope: Envelope) -> Result<()> {
        let Some(author) = envelope.author.clone() else {
            return Ok(());
        };
        let mention = &author.mention;

        if let Some(remaining) = self.cooldowns.check(&author.name) {
            ctx.reply(&format!(
                "{mention} Please wait {remaining} seconds before accepting again."
            ))
            .await?;
            return Ok(());
        }

        let opponent = match envelope.content.split_whitespace().next() {
            Some(raw) => normalize_username(raw),
            None => {
                let me = ctx
                    .users
                    .get_or_create(&author.name, &author.display_name)
                    .await?;
                let pending = me
                    .fighting
                    .map(|f| f.fight_requested_by)
                    .unwrap_or_default();
                if pending.is_empty() {
                    ctx.reply(&format!("{mention} You do not have any pending fight requests."))
                        .await?;
                    return Ok(());
                }
                pending
            }
        };

        ctx.users
            .update(&author.name, &author.display_name, |user| {
                user.fighting_mut().fight_requested_by.clear();
                Ok(())
            })
            .await?;

        ctx.reply(&format!(
            "@{} has accepted the fight with @{opponent}! Let the battle begin!",
            author.display_name
        ))
        .await?;

        let loadouts = [random_loadout(&mut self.rng), random_loadout(&mut self.rng)];
        let names = [author.name.as_str(), opponent.as_str()];
        let outcome = simulate(names, [&loadouts[0], &loadouts[1]], &mut self.rng);

        if let Some(narrator) = &self.narrator {
            let fighters = [
                (author.display_name.clone(), loadouts[0].clone()),
                (opponent.clone(), loadouts[1].clone()),
            ];
            match narrator.narrate(&fighters, &outcome.log).await {
                Ok(narration) => {
                    for chunk in chunk_text(&narration, 450) {
                        ctx.reply(&chunk).await?;
                    }
                }
                Err(e) => {
                    ctx.log(
                        BusLogLevel::Error,
                        format!("AI narration failed: {e}"),
                        caller!(),
                    )
                    .await;
                }
            }
        }

        match outcome.winner {
            Some(idx) => {
                let winner = names[idx];
                let loser = names[1 - idx];
                ctx.reply(&format!("@{winner} has won the fight! 🎉")).await?;
                ctx.users
                    .update(winner, winner, |user| {
                        user.fighting_mut().fights_won += 1;
                        Ok(())
                    })
                    .await?;
                ctx.users
                    .update(loser, loser, |user| {
                        user.fighting_mut().fights_lost += 1;
                        Ok(())
                    })
                    .await?;
            }
            None => {
                ctx.reply("The fight ended in a draw!").await?;
            }
        }
        Ok(())
    }
}

fn chunk_text(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size)
        .map(|chunk| chunk.iter().collect())
        .collect()
}
